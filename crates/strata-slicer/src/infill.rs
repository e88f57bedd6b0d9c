//! Infill generation: top-surface detection, solid/sparse region
//! decomposition and angle-parameterized line patterns.

use crate::clip;
use crate::config::{Config, FillPattern};
use crate::geom::{self, PathSet, Rect};
use crate::mesh::BuildArea;
use crate::slice::Layer;

/// Object-level line patterns shared by all layers. Generated once so the
/// patterns line up across layers.
#[derive(Debug, Clone, Default)]
pub struct Patterns {
    /// Full-density lines at the solid angle + 90 degrees; used by the raft
    /// interface and the solid support base.
    pub solid_rotated: PathSet,
    /// Support body lines at the solid angle - 45 degrees.
    pub support: PathSet,
    /// Support interface lines at the solid angle + 45 degrees.
    pub support_interface: PathSet,
    /// Low-density wide lines for the raft base layer.
    pub raft_base: PathSet,
}

/// Emit parallel 2-point lines covering the rotated bounding box of
/// `(x0, y0)-(x1, y1)` at `angle` radians, spaced `extrusion_width / density`
/// apart. Rotation is about the origin so every layer's lines coincide.
pub fn line_fill_at_angle(
    out: &mut PathSet,
    cfg: &Config,
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
    density: f64,
    angle: f64,
) {
    let (sin_a, cos_a) = angle.sin_cos();
    let (sin_na, cos_na) = (-angle).sin_cos();
    let step = cfg.extrusion_width / density;
    let corners = [(x0, y0), (x0, y1), (x1, y1), (x1, y0)];
    let rot: Vec<(f64, f64)> = corners
        .iter()
        .map(|&(x, y)| (x * cos_na - y * sin_na, x * sin_na + y * cos_na))
        .collect();
    let min_y = rot.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
    let max_y = rot.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);
    let min_x = rot.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
    let max_x = rot.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
    let start = (min_y / step).floor() as i64;
    let end = (max_y / step).ceil() as i64;
    for i in start..=end {
        let y = step * i as f64;
        out.push(vec![
            geom::Point::new(
                cfg.scale(cos_a * min_x - sin_a * y),
                cfg.scale(sin_a * min_x + cos_a * y),
            ),
            geom::Point::new(
                cfg.scale(cos_a * max_x - sin_a * y),
                cfg.scale(sin_a * max_x + cos_a * y),
            ),
        ]);
    }
}

/// Pattern lines for one island bounding box at `density` and `angle`
/// degrees. The pattern's per-layer rotation depends on `pattern`.
pub fn lines_for_box(
    cfg: &Config,
    bounds: &Rect,
    density: f64,
    angle: f64,
    pattern: FillPattern,
    index: usize,
) -> PathSet {
    let mut out = PathSet::new();
    if density <= 0.0 {
        return out;
    }
    let angle = angle.to_radians();
    let x0 = cfg.unscale(bounds.x0);
    let y0 = cfg.unscale(bounds.y0);
    let x1 = cfg.unscale(bounds.x1);
    let y1 = cfg.unscale(bounds.y1);
    use std::f64::consts::{FRAC_PI_2, PI};
    match pattern {
        FillPattern::Grid => {
            line_fill_at_angle(&mut out, cfg, x0, y0, x1, y1, density / 2.0, angle);
            line_fill_at_angle(&mut out, cfg, x0, y0, x1, y1, density / 2.0, angle + FRAC_PI_2);
        }
        FillPattern::Triangle => {
            for k in 0..3 {
                line_fill_at_angle(
                    &mut out,
                    cfg,
                    x0,
                    y0,
                    x1,
                    y1,
                    density / 3.0,
                    angle + k as f64 * PI / 3.0,
                );
            }
        }
        FillPattern::Triangle2 => {
            line_fill_at_angle(
                &mut out,
                cfg,
                x0,
                y0,
                x1,
                y1,
                density,
                angle + index as f64 * PI / 3.0,
            );
        }
        FillPattern::Rectilinear => {
            line_fill_at_angle(
                &mut out,
                cfg,
                x0,
                y0,
                x1,
                y1,
                density,
                angle + index as f64 * FRAC_PI_2,
            );
        }
    }
    out
}

/// Generate the object-level patterns needed by support, raft and the solid
/// support base.
pub fn generate_patterns(area: &BuildArea, cfg: &Config) -> Patterns {
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
    let mut p = Patterns::default();
    let angle = cfg.solid_infill_angle.to_radians();
    let (x0, y0, x1, y1) = (area.x0, area.y0, area.x1, area.y1);
    if cfg.generate_raft || (cfg.generate_support && cfg.solid_support_base) {
        line_fill_at_angle(&mut p.solid_rotated, cfg, x0, y0, x1, y1, 1.0, angle + FRAC_PI_2);
    }
    if cfg.generate_support {
        line_fill_at_angle(
            &mut p.support,
            cfg,
            x0,
            y0,
            x1,
            y1,
            cfg.support_density,
            angle - FRAC_PI_4,
        );
        line_fill_at_angle(
            &mut p.support_interface,
            cfg,
            x0,
            y0,
            x1,
            y1,
            cfg.interface_density,
            angle + FRAC_PI_4,
        );
    }
    if cfg.generate_raft {
        line_fill_at_angle(
            &mut p.raft_base,
            cfg,
            x0,
            y0,
            x1,
            y1,
            (cfg.extrusion_width / cfg.raft_base_layer_width) * cfg.raft_base_layer_density,
            angle,
        );
    }
    p
}

/// Per-island infill output, computed against an immutable view of the layer
/// stack and applied after the stage barrier.
#[derive(Debug, Default)]
pub struct IslandFill {
    exposed_surface: PathSet,
    iron_paths: PathSet,
    solid_infill: PathSet,
    sparse_infill: PathSet,
    solid_infill_boundaries: PathSet,
}

/// Union of `insets[0]` of the bounding-box neighbors of `bounds` on `layer`.
fn neighbor_outlines(layer: &Layer, bounds: &Rect) -> PathSet {
    let mut out = PathSet::new();
    for island in &layer.islands {
        if bounds.intersects(&island.bounds) {
            out.extend(island.insets[0].iter().cloned());
        }
    }
    out
}

fn neighbor_solid_clips(layer: &Layer, bounds: &Rect) -> PathSet {
    let mut out = PathSet::new();
    for island in &layer.islands {
        if bounds.intersects(&island.bounds) {
            out.extend(island.solid_infill_clip.iter().cloned());
        }
    }
    out
}

/// Compute infill for every island of `layers[index]`. Reads neighbor layers
/// in the roof/floor window; writes nothing.
pub fn generate(layers: &[Layer], index: usize, cfg: &Config) -> Vec<IslandFill> {
    let layer = &layers[index];
    let n = layers.len();
    let w = cfg.extrusion_width;
    let bound_offset = w / 8.0;
    let bound_epsilon = bound_offset / 2.0 * cfg.scale_constant;
    let mut fills = Vec::with_capacity(layer.islands.len());

    for island in &layer.islands {
        let mut fill = IslandFill::default();
        let gaps: PathSet = island.inset_gaps.iter().flatten().cloned().collect();
        let mut boundary_src = PathSet::new();

        if cfg.roof_layers > 0 {
            fill.exposed_surface = if index + 1 == n {
                island.infill_insets.clone()
            } else {
                clip::difference(
                    &island.infill_insets,
                    &neighbor_outlines(&layers[index + 1], &island.bounds),
                )
            };
            if !fill.exposed_surface.is_empty() {
                fill.exposed_surface = clip::offset(cfg, &fill.exposed_surface, -w, 0.0);
            }
            if cfg.iron_top_surface {
                let mut iron_areas = clip::offset(cfg, &island.insets[0], -w / 2.0, 0.0);
                if index + 1 < n {
                    iron_areas = clip::difference(
                        &iron_areas,
                        &neighbor_outlines(&layers[index + 1], &island.bounds),
                    );
                }
                if !iron_areas.is_empty() {
                    let iron_areas = clip::remove_overlap(cfg, &iron_areas, 1.0);
                    let iron_pattern = lines_for_box(
                        cfg,
                        &island.bounds,
                        cfg.iron_density,
                        cfg.solid_infill_angle,
                        FillPattern::Rectilinear,
                        index + 1,
                    );
                    fill.iron_paths = clip::clip_lines(&iron_pattern, &iron_areas);
                }
            }
        }

        let all_solid = cfg.infill_density == 1.0
            || (index as i64) < cfg.floor_layers
            || index as i64 + cfg.roof_layers >= n as i64;
        if all_solid {
            let mut clip_region = if cfg.fill_threshold > 0.0 {
                clip::remove_overlap(cfg, &island.infill_insets, cfg.fill_threshold)
            } else {
                island.infill_insets.clone()
            };
            if cfg.fill_inset_gaps {
                clip_region.extend(gaps.iter().cloned());
            }
            let pattern = lines_for_box(
                cfg,
                &island.bounds,
                1.0,
                cfg.solid_infill_angle,
                FillPattern::Rectilinear,
                index,
            );
            fill.solid_infill = clip::clip_lines(&pattern, &clip_region);
            boundary_src = clip_region;
        } else if !cfg.no_solid && (cfg.floor_layers > 0 || cfg.roof_layers > 0) {
            // Region still covered by solid clip through the whole window
            // does not need to be solid on this layer.
            let mut covered = island.infill_insets.clone();
            for k in -cfg.floor_layers..=cfg.roof_layers {
                if k == 0 {
                    continue;
                }
                let neighbor = &layers[(index as i64 + k) as usize];
                covered =
                    clip::intersection(&covered, &neighbor_solid_clips(neighbor, &island.bounds));
            }
            let mut solid_region = clip::difference(&island.infill_insets, &covered);
            if cfg.fill_threshold > 0.0 {
                solid_region = clip::remove_overlap(cfg, &solid_region, cfg.fill_threshold);
            }
            if cfg.solid_fill_expansion > 0.0 || cfg.solid_infill_clip_offset > 0.0 {
                let expanded = clip::offset_square(
                    cfg,
                    &solid_region,
                    cfg.solid_infill_clip_offset + cfg.solid_fill_expansion * w,
                    0.0,
                );
                solid_region = clip::intersection(&expanded, &island.infill_insets);
            }
            let pattern = lines_for_box(
                cfg,
                &island.bounds,
                1.0,
                cfg.solid_infill_angle,
                FillPattern::Rectilinear,
                index,
            );
            let mut clip_region = solid_region.clone();
            if cfg.fill_inset_gaps {
                clip_region.extend(gaps.iter().cloned());
            }
            fill.solid_infill = clip::clip_lines(&pattern, &clip_region);
            boundary_src = clip_region;

            if cfg.infill_density > 0.0 {
                let mut sparse_region = clip::difference(&island.infill_insets, &solid_region);
                if cfg.fill_threshold > 0.0 {
                    sparse_region = clip::remove_overlap(cfg, &sparse_region, cfg.fill_threshold);
                }
                let sparse_pattern = lines_for_box(
                    cfg,
                    &island.bounds,
                    cfg.infill_density,
                    cfg.sparse_infill_angle,
                    cfg.infill_pattern,
                    index,
                );
                fill.sparse_infill = clip::clip_lines(&sparse_pattern, &sparse_region);
            }
        } else {
            if cfg.infill_density > 0.0 {
                let region = if cfg.fill_threshold > 0.0 {
                    clip::remove_overlap(cfg, &island.infill_insets, cfg.fill_threshold)
                } else {
                    island.infill_insets.clone()
                };
                let sparse_pattern = lines_for_box(
                    cfg,
                    &island.bounds,
                    cfg.infill_density,
                    cfg.sparse_infill_angle,
                    cfg.infill_pattern,
                    index,
                );
                fill.sparse_infill = clip::clip_lines(&sparse_pattern, &region);
            }
            if cfg.fill_inset_gaps && !gaps.is_empty() {
                let pattern = lines_for_box(
                    cfg,
                    &island.bounds,
                    1.0,
                    cfg.solid_infill_angle,
                    FillPattern::Rectilinear,
                    index,
                );
                fill.solid_infill = clip::clip_lines(&pattern, &gaps);
                boundary_src = gaps.clone();
            }
        }

        if !boundary_src.is_empty() {
            fill.solid_infill_boundaries = clip::offset(cfg, &boundary_src, bound_offset, 0.0);
            geom::rdp_simplify_paths(&mut fill.solid_infill_boundaries, bound_epsilon);
        }

        if cfg.min_sparse_infill_len > 0.0 {
            let min_len = cfg.min_sparse_infill_len * cfg.scale_constant;
            fill.sparse_infill
                .retain(|line| geom::distance_to_point(line[0], line[1]) >= min_len);
        }
        fills.push(fill);
    }
    fills
}

/// Write a stage's computed fills back into the layer.
pub fn apply(layer: &mut Layer, fills: Vec<IslandFill>) {
    for (island, fill) in layer.islands.iter_mut().zip(fills) {
        island.exposed_surface = fill.exposed_surface;
        island.iron_paths = fill.iron_paths;
        island.solid_infill = fill.solid_infill;
        island.sparse_infill = fill.sparse_infill;
        island.solid_infill_boundaries = fill.solid_infill_boundaries;
    }
}
