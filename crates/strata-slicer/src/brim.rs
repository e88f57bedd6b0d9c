//! Brim and raft adhesion geometry.

use crate::clip;
use crate::config::{Config, FillKind};
use crate::geom::{self, PathSet};
use crate::infill::Patterns;
use crate::slice::Layer;

fn first_layer_footprint(layers: &[Layer], cfg: &Config) -> PathSet {
    let mut paths = PathSet::new();
    for island in &layers[0].islands {
        paths.extend(island.insets[0].iter().cloned());
    }
    if cfg.generate_support {
        paths.extend(layers[0].support_map.iter().cloned());
        paths = clip::union_all(&paths, FillKind::NonZero);
    }
    paths
}

/// Concentric adhesion loops around everything on layer 0, innermost first.
pub fn generate_brim(layers: &[Layer], cfg: &Config) -> Vec<PathSet> {
    if layers.is_empty() {
        return Vec::new();
    }
    let epsilon = cfg.simplify_epsilon();
    let mut brim = Vec::with_capacity(cfg.brim_lines.max(0) as usize);
    for i in 1..=cfg.brim_lines {
        let paths = first_layer_footprint(layers, cfg);
        let dist = cfg.extrusion_width * i as f64
            + (cfg.edge_offset * -2.0 - cfg.extrusion_width)
                * (1.0 - cfg.brim_adhesion_factor)
                * 2.0;
        let mut loop_paths = clip::offset_square(cfg, &paths, dist, 1.0);
        if epsilon > 0.0 {
            geom::rdp_simplify_paths(&mut loop_paths, epsilon);
        }
        brim.push(loop_paths);
    }
    brim
}

/// The two raft line sets: the low-density base layer and the solid
/// interface pattern reused for each interface layer.
pub fn generate_raft(
    layers: &[Layer],
    brim: &[PathSet],
    patterns: &Patterns,
    cfg: &Config,
) -> [PathSet; 2] {
    if layers.is_empty() {
        return [PathSet::new(), PathSet::new()];
    }
    let footprint = if cfg.brim_lines > 0 {
        let mut paths = PathSet::new();
        for set in brim {
            paths.extend(set.iter().cloned());
        }
        clip::union_all(&paths, FillKind::NonZero)
    } else {
        first_layer_footprint(layers, cfg)
    };
    let region = clip::offset_square(cfg, &footprint, cfg.raft_xy_expansion, 0.0);
    [
        clip::clip_lines(&patterns.raft_base, &region),
        clip::clip_lines(&patterns.solid_rotated, &region),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infill;
    use crate::mesh::BuildArea;
    use crate::outline;
    use crate::slice::Segment;

    fn square_layer(size: f64, cfg: &Config) -> Layer {
        let seg = |x0: f64, y0: f64, x1: f64, y1: f64| Segment { x: [x0, x1], y: [y0, y1] };
        let segs = vec![
            seg(0.0, 0.0, size, 0.0),
            seg(size, 0.0, size, size),
            seg(size, size, 0.0, size),
            seg(0.0, size, 0.0, 0.0),
        ];
        outline::build_layer(0, segs, cfg)
    }

    #[test]
    fn test_brim_loop_count_and_growth() {
        let mut c = Config { brim_width: 3.0, coarseness: 0.0, ..Config::default() };
        c.resolve().unwrap();
        assert_eq!(c.brim_lines, 7);
        let layers = vec![square_layer(10.0, &c)];
        let brim = generate_brim(&layers, &c);
        assert_eq!(brim.len(), 7);
        let area = |set: &PathSet| -> i128 {
            set.iter().map(|p| geom::signed_area_2x(p)).sum::<i128>() / 2
        };
        for w in brim.windows(2) {
            assert!(area(&w[1]) > area(&w[0]), "brim loops must grow outward");
        }
    }

    #[test]
    fn test_raft_lines_cover_expanded_footprint() {
        let mut c = Config { generate_raft: true, coarseness: 0.0, ..Config::default() };
        c.resolve().unwrap();
        let layers = vec![square_layer(10.0, &c)];
        let area = BuildArea { x0: -6.0, y0: -6.0, x1: 16.0, y1: 16.0 };
        let patterns = infill::generate_patterns(&area, &c);
        let raft = generate_raft(&layers, &[], &patterns, &c);
        assert!(!raft[0].is_empty());
        assert!(!raft[1].is_empty());
        // Base layer is sparser than the interface.
        assert!(raft[0].len() < raft[1].len());
        // Lines reach beyond the model footprint into the expansion zone.
        let min_x = raft[1].iter().flat_map(|l| l.iter()).map(|p| p.x).min().unwrap();
        assert!(min_x < 0);
    }
}
