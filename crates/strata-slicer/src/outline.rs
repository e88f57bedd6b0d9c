//! Outline building: stitch raw segments into closed polygons and extract
//! islands.

use crate::clip::{self, PolyNode};
use crate::config::{Config, FillKind};
use crate::geom::{self, Path, PathSet, Rect};
use crate::slice::{Island, Layer, Segment};

/// Stitch one layer's segments into closed integer polygons.
///
/// Exact endpoint matches are preferred; a candidate whose far endpoint
/// matches is reversed (and the flip counted). When nothing matches exactly,
/// the nearest candidate within the configured tolerance is accepted. A
/// polygon closes when its tail reaches its head exactly, or within
/// tolerance and closer than any remaining candidate.
fn stitch(mut remaining: Vec<Segment>, index: usize, cfg: &Config) -> PathSet {
    let tolerance_sq = cfg.tolerance * cfg.tolerance;
    let epsilon = cfg.simplify_epsilon();
    let mut outlines = PathSet::new();

    while !remaining.is_empty() {
        let mut poly: Vec<Segment> = vec![remaining.swap_remove(0)];
        let mut flip_count = 0usize;
        let mut closed = false;

        'grow: loop {
            let end = *poly.last().unwrap();
            let begin = poly[0];

            // Closed exactly?
            if poly.len() > 1 && begin.x[0] == end.x[1] && begin.y[0] == end.y[1] {
                closed = true;
                break 'grow;
            }

            // First exact connection in list order, forward before reversed
            // within each candidate.
            let mut connected = false;
            for i in 0..remaining.len() {
                let s = remaining[i];
                if s.x[0] == end.x[1] && s.y[0] == end.y[1] {
                    poly.push(remaining.swap_remove(i));
                    connected = true;
                    break;
                }
                if s.x[1] == end.x[1] && s.y[1] == end.y[1] {
                    log::debug!("flipped segment {} at layer {}", poly.len(), index + 1);
                    flip_count += 1;
                    let mut s = remaining.swap_remove(i);
                    s.x.swap(0, 1);
                    s.y.swap(0, 1);
                    poly.push(s);
                    connected = true;
                    break;
                }
            }
            if connected {
                continue 'grow;
            }

            // Nearest candidate by squared endpoint distance.
            let mut best: Option<usize> = None;
            let mut best_dist = f64::INFINITY;
            let mut flip_points = false;
            for (i, s) in remaining.iter().enumerate() {
                let d0 = (s.x[0] - end.x[1]).powi(2) + (s.y[0] - end.y[1]).powi(2);
                let d1 = (s.x[1] - end.x[1]).powi(2) + (s.y[1] - end.y[1]).powi(2);
                let dist = d0.min(d1);
                if dist < best_dist {
                    flip_points = d1 < d0;
                    best_dist = dist;
                    best = Some(i);
                }
            }

            // Closed within tolerance, and closer than the best candidate?
            if poly.len() > 1 {
                let close_dist =
                    (begin.x[0] - end.x[1]).powi(2) + (begin.y[0] - end.y[1]).powi(2);
                if close_dist <= tolerance_sq && close_dist < best_dist {
                    closed = true;
                    break 'grow;
                }
            }

            if let Some(i) = best {
                if best_dist <= tolerance_sq {
                    let mut s = remaining.swap_remove(i);
                    if flip_points {
                        log::debug!("flipped segment {} at layer {}", poly.len(), index + 1);
                        flip_count += 1;
                        s.x.swap(0, 1);
                        s.y.swap(0, 1);
                    }
                    poly.push(s);
                    continue 'grow;
                }
            }

            if !remaining.is_empty() && poly.len() > 1 {
                log::warn!(
                    "there is (probably) a hole in the mesh at layer {} (best_dist = {})",
                    index + 1,
                    best_dist.sqrt()
                );
            }
            break 'grow;
        }

        if !closed {
            continue;
        }
        let mut path: Path = poly
            .iter()
            .map(|s| geom::Point::new(cfg.scale(s.x[0]), cfg.scale(s.y[0])))
            .collect();
        if epsilon > 0.0 {
            geom::rdp_simplify(&mut path, epsilon);
        }
        if cfg.combine_all {
            // Remove self-intersections and orient everything
            // counter-clockwise; fills holes in exchange for tolerating some
            // broken models.
            for mut p in clip::union_all(&vec![path], FillKind::EvenOdd) {
                if !geom::is_ccw(&p) {
                    p.reverse();
                }
                outlines.push(p);
            }
        } else {
            if flip_count > poly.len() / 2 {
                // The first segment was probably ingested backwards.
                log::debug!("reversed outline order at layer {}", index + 1);
                path.reverse();
            }
            outlines.push(path);
        }
    }
    outlines
}

fn generate_islands(islands: &mut Vec<Island>, nodes: &[PolyNode], cfg: &Config) {
    for node in nodes {
        let mut insets = vec![PathSet::new(); cfg.shells.max(1) as usize];
        insets[0].push(node.contour.clone());
        for hole in &node.children {
            insets[0].push(hole.contour.clone());
            generate_islands(islands, &hole.children, cfg);
        }
        islands.push(Island { insets, ..Default::default() });
    }
}

/// Build a layer from its raw segment bucket: stitch, union under the
/// configured fill rule, apply the edge offset, and split the resulting
/// forest into islands.
pub fn build_layer(index: usize, segments: Vec<Segment>, cfg: &Config) -> Layer {
    let mut layer = Layer::new(index);
    let outlines = stitch(segments, index, cfg);
    let outlines = clip::union_all(&outlines, cfg.poly_fill_type);
    let rings = if 1.0 - cfg.edge_overlap > 0.0 {
        // Overshoot inward and come back out so barely touching edge paths
        // cannot overlap at the seam.
        let extra = -cfg.extrusion_width * (1.0 - cfg.edge_overlap) / 2.0;
        let tmp = clip::offset(cfg, &outlines, cfg.edge_offset + cfg.extra_offset + extra, 0.0);
        clip::offset(cfg, &tmp, -extra, 0.0)
    } else {
        clip::offset(cfg, &outlines, cfg.edge_offset + cfg.extra_offset, 0.0)
    };
    let tree = clip::build_tree(rings);
    generate_islands(&mut layer.islands, &tree, cfg);
    let epsilon = cfg.simplify_epsilon();
    for island in &mut layer.islands {
        if cfg.simplify_insets && epsilon > 0.0 {
            geom::rdp_simplify_paths(&mut island.insets[0], epsilon);
        }
        island.bounds = Rect::of_paths(&island.insets[0]);
    }
    layer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(x0: f64, y0: f64, x1: f64, y1: f64) -> Segment {
        Segment { x: [x0, x1], y: [y0, y1] }
    }

    fn cfg() -> Config {
        let mut c = Config { coarseness: 0.0, edge_overlap: 1.0, ..Config::default() };
        c.resolve().unwrap();
        c
    }

    fn square_segs() -> Vec<Segment> {
        vec![
            seg(0.0, 0.0, 10.0, 0.0),
            seg(10.0, 0.0, 10.0, 10.0),
            seg(10.0, 10.0, 0.0, 10.0),
            seg(0.0, 10.0, 0.0, 0.0),
        ]
    }

    #[test]
    fn test_stitch_exact_square() {
        let c = cfg();
        let outlines = stitch(square_segs(), 0, &c);
        assert_eq!(outlines.len(), 1);
        assert_eq!(outlines[0].len(), 4);
        assert!(geom::is_ccw(&outlines[0]));
    }

    #[test]
    fn test_stitch_recovers_within_tolerance() {
        let mut c = cfg();
        c.tolerance = 0.01;
        let mut segs = square_segs();
        // Nudge one endpoint by less than the tolerance.
        segs[2].x[0] = 10.004;
        let outlines = stitch(segs, 0, &c);
        assert_eq!(outlines.len(), 1);
        assert_eq!(outlines[0].len(), 4);
    }

    #[test]
    fn test_stitch_flips_reversed_segments() {
        let c = cfg();
        let mut segs = square_segs();
        // Reverse one segment; the stitcher must flip it back.
        segs[1] = seg(10.0, 10.0, 10.0, 0.0);
        let outlines = stitch(segs, 0, &c);
        assert_eq!(outlines.len(), 1);
        assert!(geom::is_ccw(&outlines[0]));
    }

    #[test]
    fn test_stitch_determinism() {
        let c = cfg();
        let a = stitch(square_segs(), 0, &c);
        let b = stitch(square_segs(), 0, &c);
        assert_eq!(a, b);
    }

    #[test]
    fn test_stitch_drops_open_chains() {
        let mut c = cfg();
        c.tolerance = 0.001;
        // Three sides only; the gap is far beyond tolerance.
        let segs = square_segs()[..3].to_vec();
        let outlines = stitch(segs, 0, &c);
        assert!(outlines.is_empty());
    }

    #[test]
    fn test_build_layer_square_with_hole() {
        let c = cfg();
        let mut segs = square_segs();
        // Clockwise inner square = hole.
        segs.extend([
            seg(3.0, 3.0, 3.0, 7.0),
            seg(3.0, 7.0, 7.0, 7.0),
            seg(7.0, 7.0, 7.0, 3.0),
            seg(7.0, 3.0, 3.0, 3.0),
        ]);
        let layer = build_layer(0, segs, &c);
        assert_eq!(layer.islands.len(), 1);
        let first = &layer.islands[0].insets[0];
        assert_eq!(first.len(), 2);
        let ccw = first.iter().filter(|p| geom::is_ccw(p)).count();
        assert_eq!(ccw, 1);
        // Edge offset pulled the contour inside the nominal outline.
        assert!(layer.islands[0].bounds.x0 > 0);
    }

    #[test]
    fn test_combine_all_fills_holes() {
        let mut c = cfg();
        c.combine_all = true;
        let mut segs = square_segs();
        segs.extend([
            seg(3.0, 3.0, 3.0, 7.0),
            seg(3.0, 7.0, 7.0, 7.0),
            seg(7.0, 7.0, 7.0, 3.0),
            seg(7.0, 3.0, 3.0, 3.0),
        ]);
        let layer = build_layer(0, segs, &c);
        assert_eq!(layer.islands.len(), 1);
        // The hole is filled: a single contour remains.
        assert_eq!(layer.islands[0].insets[0].len(), 1);
    }
}
