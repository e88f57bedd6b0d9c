#![warn(missing_docs)]

//! Mesh slicing and toolpath planning for fused-filament machines.
//!
//! This crate turns a triangle-soup mesh plus a [`Config`] into an ordered
//! list of planned layers, each carrying shell loops, infill and support
//! line sets, and finally a retract-aware move program. A thin companion
//! crate formats the move stream as G-code.
//!
//! # Example
//!
//! ```ignore
//! use strata_slicer::{slice_mesh, Config, Mesh};
//!
//! let mesh: Mesh = // ... read from STL
//! let mut cfg = Config::default();
//! cfg.resolve()?;
//! let result = slice_mesh(mesh, &cfg)?;
//! println!("layers: {}", result.summary.layer_count);
//! ```
//!
//! The pipeline is bulk-synchronous: each stage is a parallel map over the
//! layer index with a barrier in between. Stages that read neighbor layers
//! (infill, support) compute into fresh buffers against an immutable view
//! and are applied after the barrier; the only locked writes are the
//! per-layer segment buckets and the downward support extension.

pub mod brim;
pub mod clip;
pub mod config;
pub mod error;
pub mod geom;
pub mod infill;
pub mod inset;
pub mod mesh;
pub mod outline;
pub mod plan;
pub mod slice;
pub mod support;

use std::sync::Mutex;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use config::{AtLayerGcode, Config, FillKind, FillPattern, JoinStyle, UserVar};
pub use error::{ConfigError, Result, SlicerError};
pub use geom::{Path, PathSet, Point};
pub use mesh::{BuildArea, Mesh, Triangle, Vertex};
pub use plan::{GMove, Machine};
pub use slice::{Island, Layer};

/// Statistics about a sliced model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceSummary {
    /// Number of layers.
    pub layer_count: usize,
    /// Total islands across all layers.
    pub island_count: usize,
    /// Sum of planned layer times in seconds, before feed scaling.
    pub estimated_time_seconds: f64,
}

/// Everything the G-code emitter needs, in layer order.
#[derive(Debug)]
pub struct SliceResult {
    /// Planned layers; each holds its move program and layer time.
    pub layers: Vec<Layer>,
    /// Raft move program, emitted before layer 0 (empty without a raft).
    pub raft_moves: Vec<GMove>,
    /// Extended build footprint the planner parked in.
    pub area: BuildArea,
    /// Model statistics.
    pub summary: SliceSummary,
}

/// Scale and place the mesh on the build plate the way the CLI front end
/// expects: shrinkage compensation, user scaling, centering on the
/// configured center point, and resting the bottom at z = 0 (optionally
/// snapped to a layer boundary, optionally chopped).
pub fn position_mesh(mesh: &mut Mesh, cfg: &Config, scale_factor: f64, z_chop: f64) {
    mesh.scale(
        cfg.xy_scale_factor * scale_factor,
        cfg.xy_scale_factor * scale_factor,
        cfg.z_scale_factor * scale_factor,
    );
    let z_translate = if cfg.preserve_layer_offset {
        ((mesh.height / 2.0 - mesh.center.z) / cfg.layer_height).round() * cfg.layer_height
    } else {
        mesh.height / 2.0 - mesh.center.z
    };
    mesh.translate(
        -mesh.center.x + cfg.x_center,
        -mesh.center.y + cfg.y_center,
        z_translate - z_chop,
    );
}

/// Run the whole pipeline: slice, outline, inset, infill, support, brim,
/// raft and per-layer move planning. Consumes the mesh.
pub fn slice_mesh(mesh: Mesh, cfg: &Config) -> Result<SliceResult> {
    if mesh.triangles.is_empty() {
        return Err(SlicerError::EmptyMesh);
    }
    let area = BuildArea::of(&mesh, cfg.xy_extra);

    // Stage 1: triangles to per-layer segment buckets.
    let buckets = slice::collect_segments(mesh, cfg);
    if buckets.is_empty() {
        return Err(SlicerError::SliceFailed("model too thin to slice".into()));
    }

    // Stage 2: outlines and islands, per layer.
    let mut layers: Vec<Layer> = buckets
        .into_par_iter()
        .enumerate()
        .map(|(i, segs)| outline::build_layer(i, segs, cfg))
        .collect();

    // Stage 3: shells and comb boundaries.
    layers.par_iter_mut().for_each(|layer| inset::generate(layer, cfg));

    let patterns = infill::generate_patterns(&area, cfg);

    // Stage 4: infill, reading the roof/floor window of neighbors.
    let n = layers.len();
    let fills: Vec<_> = (0..n).into_par_iter().map(|i| infill::generate(&layers, i, cfg)).collect();
    for (layer, fill) in layers.iter_mut().zip(fills) {
        infill::apply(layer, fill);
    }

    if cfg.generate_support {
        // Stage 5a: per-layer overhang maps and model keep-outs.
        let maps: Vec<_> = (0..n)
            .into_par_iter()
            .map(|i| {
                (
                    support::layer_support_map(&layers, i, cfg),
                    support::support_boundaries(&layers[i], cfg),
                )
            })
            .collect();
        for (layer, (map, bounds)) in layers.iter_mut().zip(maps) {
            layer.layer_support_map = map;
            layer.support_boundaries = bounds;
        }

        // Stage 5b: downward extension; destination layers are locked.
        let accumulators: Vec<Mutex<PathSet>> =
            (0..n).map(|_| Mutex::new(PathSet::new())).collect();
        (0..n)
            .into_par_iter()
            .for_each(|i| support::extend_downward(&layers, &accumulators, i, cfg));
        for (layer, acc) in layers.iter_mut().zip(accumulators) {
            layer.support_map =
                clip::union_all(&acc.into_inner().unwrap(), FillKind::NonZero);
        }
        if !cfg.support_everywhere {
            support::remove_unsupported(&mut layers);
        }

        // Stage 5c: interface classification and line generation.
        if cfg.interface_roof_layers > 0 || cfg.interface_floor_layers > 0 {
            layers.par_iter_mut().for_each(|layer| {
                layer.support_interface_clip =
                    clip::offset_square(cfg, &layer.support_map, cfg.interface_clip_offset, 0.0);
            });
        }
        let lines: Vec<_> = (0..n)
            .into_par_iter()
            .map(|i| support::generate_lines(&layers, i, &patterns, cfg))
            .collect();
        for (layer, (interface, body)) in layers.iter_mut().zip(lines) {
            layer.support_interface_lines = interface;
            layer.support_lines = body;
        }
    }

    // Stage 6: adhesion geometry.
    let brim_loops =
        if cfg.brim_lines > 0 { brim::generate_brim(&layers, cfg) } else { Vec::new() };
    let raft_moves = if cfg.generate_raft {
        let raft = brim::generate_raft(&layers, &brim_loops, &patterns, cfg);
        plan::plan_raft(&raft, cfg, &area)
    } else {
        Vec::new()
    };

    // Stage 7: move planning, each layer from a freshly parked machine.
    // Planning consumes the islands.
    let island_count = layers.iter().map(|l| l.islands.len()).sum();
    layers
        .par_iter_mut()
        .for_each(|layer| plan::plan_layer(layer, &brim_loops, cfg, &area));

    let summary = SliceSummary {
        layer_count: layers.len(),
        island_count,
        estimated_time_seconds: layers.iter().map(|l| l.layer_time).sum(),
    };
    Ok(SliceResult { layers, raft_moves, area, summary })
}
