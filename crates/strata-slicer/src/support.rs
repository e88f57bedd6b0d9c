//! Support structure generation.
//!
//! Runs as three sub-stages separated by barriers: per-layer overhang maps
//! and boundaries, downward extension (which writes into a window of lower
//! layers), then union, interface classification and line generation.

use std::sync::Mutex;

use crate::clip::{self, PolyNode};
use crate::config::Config;
use crate::geom::PathSet;
use crate::infill::Patterns;
use crate::slice::Layer;

/// This layer's new overhang: the part of its footprint not already resting
/// on the previous layer grown by the support angle.
pub fn layer_support_map(layers: &[Layer], index: usize, cfg: &Config) -> Vec<PolyNode> {
    if (index as i64) < cfg.support_vert_margin + 1 {
        return Vec::new();
    }
    let mut below = PathSet::new();
    for island in &layers[index - 1].islands {
        below.extend(island.insets[0].iter().cloned());
    }
    let reach = (cfg.support_angle.to_radians()).tan() * cfg.layer_height;
    let below = clip::offset(cfg, &below, reach, 0.0);
    let mut here = PathSet::new();
    for island in &layers[index].islands {
        here.extend(island.insets[0].iter().cloned());
    }
    let overhang = clip::difference(&here, &below);
    let expanded = clip::offset_square(
        cfg,
        &overhang,
        cfg.support_xy_expansion + (0.5 + cfg.support_margin) * cfg.edge_width - cfg.edge_offset,
        0.0,
    );
    clip::build_tree(expanded)
}

/// Keep-out region around the model on one layer.
pub fn support_boundaries(layer: &Layer, cfg: &Config) -> PathSet {
    let mut src = PathSet::new();
    for island in &layer.islands {
        src.extend(island.insets[0].iter().cloned());
    }
    let mut bounds = clip::offset(
        cfg,
        &src,
        (0.5 + cfg.support_margin) * cfg.edge_width - cfg.edge_offset,
        0.0,
    );
    let epsilon = cfg.extrusion_width / 16.0 * cfg.scale_constant;
    crate::geom::rdp_simplify_paths(&mut bounds, epsilon);
    bounds
}

/// Union of the support boundaries in the vertical-margin window around `k`.
fn boundary_window(layers: &[Layer], k: i64, cfg: &Config) -> PathSet {
    let mut out = PathSet::new();
    let margin = cfg.support_vert_margin;
    let start = if k >= margin { -margin } else { -k };
    let mut i = start;
    while k + i < layers.len() as i64 && i <= margin {
        out.extend(layers[(k + i) as usize].support_boundaries.iter().cloned());
        i += 1;
    }
    out
}

fn extend_column(
    layers: &[Layer],
    maps: &[Mutex<PathSet>],
    node: &PolyNode,
    index: usize,
    cfg: &Config,
) {
    let mut column = PathSet::with_capacity(1 + node.children.len());
    column.push(node.contour.clone());
    for child in &node.children {
        column.push(child.contour.clone());
    }
    let mut clipped: Vec<PathSet> = vec![PathSet::new(); index + 1];
    let mut stop: i64 = -1;
    for k in (0..=index as i64).rev() {
        let result = clip::difference(&column, &boundary_window(layers, k, cfg));
        if result.is_empty() {
            stop = k;
            break;
        }
        clipped[k as usize] = result;
    }
    // Columns that never reach the build plate are dropped unless support
    // may rest on the model.
    if cfg.support_everywhere || stop == -1 {
        for k in (stop + 1)..=index as i64 {
            let paths = std::mem::take(&mut clipped[k as usize]);
            maps[k as usize].lock().unwrap().extend(paths);
        }
    }
}

/// Extend every overhang column of `layers[index]` down toward the plate.
/// Writes are synchronized through the per-layer accumulators in `maps`.
pub fn extend_downward(
    layers: &[Layer],
    maps: &[Mutex<PathSet>],
    index: usize,
    cfg: &Config,
) {
    fn walk(
        layers: &[Layer],
        maps: &[Mutex<PathSet>],
        nodes: &[PolyNode],
        index: usize,
        cfg: &Config,
    ) {
        for node in nodes {
            extend_column(layers, maps, node, index, cfg);
            for hole in &node.children {
                walk(layers, maps, &hole.children, index, cfg);
            }
        }
    }
    walk(layers, maps, &layers[index].layer_support_map, index, cfg);
}

/// Drop support regions that do not rest on the build plate. Walks upward,
/// accumulating the model keep-out of everything below.
pub fn remove_unsupported(layers: &mut [Layer]) {
    if layers.is_empty() {
        return;
    }
    let mut clip_paths: PathSet = layers[0].support_boundaries.clone();
    for i in 1..layers.len() {
        clip_paths.extend(layers[i].support_boundaries.iter().cloned());
        clip_paths = clip::union_all(&clip_paths, crate::config::FillKind::NonZero);
        layers[i].support_map = clip::difference(&layers[i].support_map, &clip_paths);
    }
}

/// Interface and body line sets for one layer. Reads neighbor layers'
/// `support_interface_clip` read-only.
pub fn generate_lines(
    layers: &[Layer],
    index: usize,
    patterns: &Patterns,
    cfg: &Config,
) -> (PathSet, PathSet) {
    let layer = &layers[index];
    if layer.support_map.is_empty() {
        return (PathSet::new(), PathSet::new());
    }
    if cfg.solid_support_base && index == 0 {
        let interface = clip::clip_lines(&patterns.solid_rotated, &layer.support_map);
        return (interface, PathSet::new());
    }
    if cfg.interface_roof_layers > 0 || cfg.interface_floor_layers > 0 {
        // Region that stays clear of the model through the whole interface
        // window needs only body density.
        let mut clear = layer.support_map.clone();
        let floor = cfg.interface_floor_layers;
        let start = if index as i64 > floor { -floor } else { -(index as i64) };
        let mut i = start;
        while index as i64 + i < layers.len() as i64 && i <= cfg.interface_roof_layers {
            if i != 0 {
                clear = clip::intersection(
                    &clear,
                    &layers[(index as i64 + i) as usize].support_interface_clip,
                );
            }
            i += 1;
        }
        let mut interface_region = clip::difference(&layer.support_map, &clear);
        if cfg.expand_support_interface {
            let expanded = clip::offset_square(
                cfg,
                &interface_region,
                cfg.extrusion_width / cfg.support_density,
                0.0,
            );
            interface_region = clip::intersection(&expanded, &layer.support_map);
        }
        let interface = clip::clip_lines(&patterns.support_interface, &interface_region);
        let body_region = clip::difference(&layer.support_map, &interface_region);
        let body = clip::clip_lines(&patterns.support, &body_region);
        (interface, body)
    } else {
        let body = clip::clip_lines(&patterns.support, &layer.support_map);
        (PathSet::new(), body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline;
    use crate::slice::Segment;

    fn seg(x0: f64, y0: f64, x1: f64, y1: f64) -> Segment {
        Segment { x: [x0, x1], y: [y0, y1] }
    }

    fn square_segs(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Segment> {
        vec![
            seg(x0, y0, x1, y0),
            seg(x1, y0, x1, y1),
            seg(x1, y1, x0, y1),
            seg(x0, y1, x0, y0),
        ]
    }

    fn cfg() -> Config {
        let mut c = Config {
            coarseness: 0.0,
            generate_support: true,
            ..Config::default()
        };
        c.resolve().unwrap();
        c
    }

    /// Narrow column for layers 0..9, then a wide plate on layer 10.
    fn bracket_layers(c: &Config) -> Vec<Layer> {
        let mut layers = Vec::new();
        for i in 0..10 {
            layers.push(outline::build_layer(i, square_segs(0.0, 0.0, 10.0, 10.0), c));
        }
        layers.push(outline::build_layer(10, square_segs(0.0, 0.0, 30.0, 10.0), c));
        layers
    }

    #[test]
    fn test_overhang_detected_at_step() {
        let c = cfg();
        let layers = bracket_layers(&c);
        // Below the step nothing overhangs.
        assert!(layer_support_map(&layers, 5, &c).is_empty());
        // The plate juts out at layer 10.
        let map = layer_support_map(&layers, 10, &c);
        assert!(!map.is_empty());
    }

    #[test]
    fn test_extension_reaches_build_plate() {
        let c = cfg();
        let mut layers = bracket_layers(&c);
        for i in 0..layers.len() {
            layers[i].support_boundaries = support_boundaries(&layers[i], &c);
        }
        for i in 0..layers.len() {
            layers[i].layer_support_map = layer_support_map(&layers, i, &c);
        }
        let maps: Vec<Mutex<PathSet>> = (0..layers.len()).map(|_| Mutex::new(PathSet::new())).collect();
        for i in 0..layers.len() {
            extend_downward(&layers, &maps, i, &c);
        }
        let maps: Vec<PathSet> = maps.into_iter().map(|m| m.into_inner().unwrap()).collect();
        // The column under the overhang is supported all the way down.
        for (i, map) in maps.iter().enumerate().take(10) {
            assert!(!map.is_empty(), "layer {i} has no support");
        }
        // Support never intrudes into the model keep-out.
        for (map, layer) in maps.iter().zip(&layers) {
            let overlap = clip::intersection(map, &layer.support_boundaries);
            assert!(overlap.is_empty(), "support overlaps model keep-out");
        }
    }

    #[test]
    fn test_interface_lines_denser_than_body() {
        let c = cfg();
        let mut layers = bracket_layers(&c);
        for i in 0..layers.len() {
            layers[i].support_boundaries = support_boundaries(&layers[i], &c);
        }
        for i in 0..layers.len() {
            layers[i].layer_support_map = layer_support_map(&layers, i, &c);
        }
        let maps: Vec<Mutex<PathSet>> = (0..layers.len()).map(|_| Mutex::new(PathSet::new())).collect();
        for i in 0..layers.len() {
            extend_downward(&layers, &maps, i, &c);
        }
        for (layer, map) in layers.iter_mut().zip(maps) {
            layer.support_map =
                clip::union_all(&map.into_inner().unwrap(), crate::config::FillKind::NonZero);
            layer.support_interface_clip =
                clip::offset_square(&c, &layer.support_map, c.interface_clip_offset, 0.0);
        }
        let area = crate::mesh::BuildArea { x0: -5.0, y0: -5.0, x1: 35.0, y1: 15.0 };
        let patterns = crate::infill::generate_patterns(&area, &c);
        // Near the top of the column the model arrives within the roof
        // window, so the region beneath the plate is interface.
        let (top_interface, top_body) = generate_lines(&layers, 8, &patterns, &c);
        assert!(!top_interface.is_empty());
        let (_, mid_body) = generate_lines(&layers, 5, &patterns, &c);
        assert!(!mid_body.is_empty());
        let _ = top_body;
        // Layer 0 with a solid base is interface only.
        let (base_interface, base_body) = generate_lines(&layers, 0, &patterns, &c);
        assert!(!base_interface.is_empty());
        assert!(base_body.is_empty());
    }
}
