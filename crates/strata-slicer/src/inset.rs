//! Shell loops, infill regions and comb boundaries for each island.

use crate::clip;
use crate::config::Config;
use crate::geom::{self, PathSet};
use crate::slice::{Island, Layer};

/// Rotate each closed path so it starts at the vertex nearest the lower-left
/// corner (minimum X + Y).
fn align_seams(paths: &mut PathSet) {
    for p in paths.iter_mut() {
        if p.len() < 3 {
            continue;
        }
        let mut best = 0;
        let mut lowest = i64::MAX;
        for (i, pt) in p.iter().enumerate() {
            let v = pt.x + pt.y;
            if v < lowest {
                best = i;
                lowest = v;
            }
        }
        p.rotate_left(best);
    }
}

fn generate_island(island: &mut Island, cfg: &Config) {
    let w = cfg.extrusion_width;
    let bound_offset = w / 8.0;
    let bound_epsilon = bound_offset / 2.0 * cfg.scale_constant;
    let epsilon = cfg.simplify_epsilon();
    let shells = cfg.shells.max(0) as usize;

    if shells > 0 {
        for i in 1..shells {
            let mut inset = clip::offset(cfg, &island.insets[i - 1], -w, 1.0);
            if cfg.simplify_insets && epsilon > 0.0 {
                geom::rdp_simplify_paths(&mut inset, epsilon);
            }
            let empty = inset.is_empty();
            island.insets[i] = inset;
            if empty {
                break;
            }
        }
        if !island.insets[shells - 1].is_empty() {
            island.infill_insets = clip::offset(
                cfg,
                &island.insets[shells - 1],
                (0.5 - cfg.infill_overlap) * -w,
                0.0,
            );
            if epsilon > 0.0 {
                geom::rdp_simplify_paths(&mut island.infill_insets, epsilon);
            }
        }
    } else {
        // Not dimensionally exact, but nobody printing bare infill is
        // expecting that anyway.
        island.infill_insets = island.insets[0].clone();
    }

    island.boundaries = clip::offset(cfg, &island.insets[0], bound_offset, 0.0);
    geom::rdp_simplify_paths(&mut island.boundaries, bound_epsilon);

    island.solid_infill_clip = if cfg.solid_infill_clip_offset > 0.0 {
        clip::offset(cfg, &island.infill_insets, cfg.solid_infill_clip_offset, 0.0)
    } else {
        island.infill_insets.clone()
    };

    if cfg.comb || cfg.generate_support {
        island.outer_boundaries =
            clip::offset(cfg, &island.insets[0], 0.5 * cfg.edge_width - cfg.edge_offset, 0.0);
        geom::rdp_simplify_paths(&mut island.outer_boundaries, bound_epsilon);
    }
    if cfg.comb {
        island.comb_paths = island.insets[0].clone();
        island.outer_comb_paths = clip::offset(cfg, &island.outer_boundaries, bound_offset, 0.0);
        geom::rdp_simplify_paths(&mut island.outer_comb_paths, bound_epsilon);
    }

    if shells > 1 && cfg.fill_inset_gaps {
        island.inset_gaps = vec![PathSet::new(); shells - 1];
        for i in 0..shells - 1 {
            if island.insets[i].is_empty() {
                break;
            }
            let mut combined = island.insets[i].clone();
            for hole in &island.insets[i + 1] {
                let mut hole = hole.clone();
                hole.reverse();
                combined.push(hole);
            }
            island.inset_gaps[i] = if cfg.fill_threshold > 0.0 {
                let tmp = clip::offset(
                    cfg,
                    &combined,
                    (0.5 + cfg.fill_threshold / 2.0) * -w,
                    0.0,
                );
                clip::offset(cfg, &tmp, (cfg.infill_overlap + cfg.fill_threshold / 2.0) * w, 0.0)
            } else {
                clip::offset(cfg, &combined, (0.5 - cfg.infill_overlap) * -w, 0.0)
            };
        }
    }

    island.constraining_edge = clip::offset(cfg, &island.infill_insets, -bound_offset, 0.0);

    if cfg.align_seams {
        let depth = if cfg.align_interior_seams { island.insets.len() } else { 1 };
        for i in 0..depth {
            align_seams(&mut island.insets[i]);
        }
    }
}

/// Generate shells and derived regions for every island of the layer.
pub fn generate(layer: &mut Layer, cfg: &Config) {
    for island in &mut layer.islands {
        generate_island(island, cfg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Point;
    use crate::outline;
    use crate::slice::Segment;

    fn seg(x0: f64, y0: f64, x1: f64, y1: f64) -> Segment {
        Segment { x: [x0, x1], y: [y0, y1] }
    }

    fn square_layer(size: f64, cfg: &Config) -> Layer {
        let segs = vec![
            seg(0.0, 0.0, size, 0.0),
            seg(size, 0.0, size, size),
            seg(size, size, 0.0, size),
            seg(0.0, size, 0.0, 0.0),
        ];
        outline::build_layer(0, segs, cfg)
    }

    fn cfg() -> Config {
        let mut c = Config { coarseness: 0.0, ..Config::default() };
        c.resolve().unwrap();
        c
    }

    #[test]
    fn test_two_shells_and_infill_region() {
        let c = cfg();
        let mut layer = square_layer(10.0, &c);
        generate(&mut layer, &c);
        let island = &layer.islands[0];
        assert_eq!(island.insets.len(), 2);
        assert!(!island.insets[1].is_empty());
        assert!(!island.infill_insets.is_empty());
        // Each deeper ring nests strictly inside the previous one.
        let outer = geom::signed_area_2x(&island.insets[0][0]);
        let inner = geom::signed_area_2x(&island.insets[1][0]);
        assert!(inner > 0 && inner < outer);
        let infill = geom::signed_area_2x(&island.infill_insets[0]);
        assert!(infill > 0 && infill < inner);
        assert!(!island.boundaries.is_empty());
        assert!(!island.comb_paths.is_empty());
        assert!(!island.constraining_edge.is_empty());
    }

    #[test]
    fn test_thin_wall_drops_second_shell_and_gap_fills() {
        let mut c = Config { coarseness: 0.0, ..Config::default() };
        c.resolve().unwrap();
        // A 1.2 unit wall leaves room for the outer shell but not a second
        // one; the remaining band must be offered for gap fill.
        let segs = vec![
            seg(0.0, 0.0, 10.0, 0.0),
            seg(10.0, 0.0, 10.0, 1.2),
            seg(10.0, 1.2, 0.0, 1.2),
            seg(0.0, 1.2, 0.0, 0.0),
        ];
        let mut layer = outline::build_layer(0, segs, &c);
        assert_eq!(layer.islands.len(), 1);
        generate(&mut layer, &c);
        let island = &layer.islands[0];
        assert!(island.insets[1].is_empty());
        assert_eq!(island.inset_gaps.len(), 1);
        assert!(!island.inset_gaps[0].is_empty());
    }

    #[test]
    fn test_seam_alignment_rotates_to_lower_left() {
        let mut paths = vec![vec![
            Point::new(100, 100),
            Point::new(0, 100),
            Point::new(0, 0),
            Point::new(100, 0),
        ]];
        align_seams(&mut paths);
        assert_eq!(paths[0][0], Point::new(0, 0));
        assert_eq!(paths[0].len(), 4);
    }
}
