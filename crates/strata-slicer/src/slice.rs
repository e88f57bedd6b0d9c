//! Layer data model and the mesh-to-segment stage.

use std::sync::Mutex;

use rayon::prelude::*;

use crate::clip::PolyNode;
use crate::config::Config;
use crate::geom::{PathSet, Rect};
use crate::mesh::{Mesh, Triangle, Vertex};
use crate::plan::GMove;

/// One connected region of a layer's cross-section: an outer contour plus its
/// immediate holes, with everything derived from them.
#[derive(Debug, Clone, Default)]
pub struct Island {
    /// Shell loops by depth; index 0 is the outermost. Drained by planning.
    pub insets: Vec<PathSet>,
    /// Gap-fill regions between consecutive shells.
    pub inset_gaps: Vec<PathSet>,
    /// Region left to fill inside the innermost shell.
    pub infill_insets: PathSet,
    /// Solid fill lines (2-point paths).
    pub solid_infill: PathSet,
    /// Sparse fill lines (2-point paths).
    pub sparse_infill: PathSet,
    /// Obstacles for travel inside the island; slightly outset from the
    /// first inset.
    pub boundaries: PathSet,
    /// Curves travels follow; equal to the first inset, which planning
    /// consumes.
    pub comb_paths: PathSet,
    /// Obstacles for travel outside the island.
    pub outer_boundaries: PathSet,
    /// Slightly outset from `outer_boundaries`.
    pub outer_comb_paths: PathSet,
    /// Region claimed as "solid is nearby" for the roof/floor computation of
    /// neighboring layers.
    pub solid_infill_clip: PathSet,
    /// Boundary set that disqualifies solid-infill shortcuts.
    pub solid_infill_boundaries: PathSet,
    /// Top surface not covered by the layer above.
    pub exposed_surface: PathSet,
    /// Slightly inset from `infill_insets`; separates real infill from gap
    /// fill when deciding whether lines may be connected.
    pub constraining_edge: PathSet,
    /// Ironing pass lines (2-point paths).
    pub iron_paths: PathSet,
    /// Bounding rectangle of the first inset.
    pub bounds: Rect,
}

/// One horizontal slab of the object.
#[derive(Debug, Default)]
pub struct Layer {
    /// Layer index; 0 rests on the build plate.
    pub index: usize,
    /// Islands, in discovery order until planning reorders them.
    pub islands: Vec<Island>,
    /// Nesting forest of this layer's new overhang regions.
    pub layer_support_map: Vec<PolyNode>,
    /// Accumulated support regions.
    pub support_map: PathSet,
    /// Model keep-out used when clipping support.
    pub support_boundaries: PathSet,
    /// Region marking "model is near in Z" for interface classification.
    pub support_interface_clip: PathSet,
    /// Support body lines (2-point paths).
    pub support_lines: PathSet,
    /// Support interface lines (2-point paths).
    pub support_interface_lines: PathSet,
    /// Planned move program.
    pub moves: Vec<GMove>,
    /// Sum of move length over feed rate for scalable planning.
    pub layer_time: f64,
}

impl Layer {
    /// Create an empty layer.
    pub fn new(index: usize) -> Self {
        Self { index, ..Default::default() }
    }
}

/// A 2D line segment in model units, produced by a triangle-plane
/// intersection. Endpoint order encodes the triangle's winding.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    /// Endpoint X coordinates.
    pub x: [f64; 2],
    /// Endpoint Y coordinates.
    pub y: [f64; 2],
}

/// Number of slabs needed to cover the mesh. The mesh is assumed to sit on
/// z = 0; geometry below the plate is chopped off.
pub fn layer_count(mesh: &Mesh, cfg: &Config) -> usize {
    let top = mesh.center.z + mesh.height / 2.0;
    ((top / cfg.layer_height).ceil() as isize).max(0) as usize
}

/// Endpoints of the intersection of the triangle `(v0, v1, v2)` with the
/// plane at `z`, entering along the `v0`-`v1` and `v0`-`v2` edges.
fn project2d(v0: &Vertex, v1: &Vertex, v2: &Vertex, z: f64) -> Segment {
    Segment {
        x: [
            v0.x + (v1.x - v0.x) * (z - v0.z) / (v1.z - v0.z),
            v0.x + (v2.x - v0.x) * (z - v0.z) / (v2.z - v0.z),
        ],
        y: [
            v0.y + (v1.y - v0.y) * (z - v0.z) / (v1.z - v0.z),
            v0.y + (v2.y - v0.y) * (z - v0.z) / (v2.z - v0.z),
        ],
    }
}

fn find_segments(buckets: &[Mutex<Vec<Segment>>], t: &Triangle, cfg: &Config) {
    let h = cfg.layer_height;
    let max_z = t.v[0].z.max(t.v[1].z).max(t.v[2].z).max(0.0);
    let min_z = t.v[0].z.min(t.v[1].z).min(t.v[2].z).max(0.0);
    let start = (min_z / h + 0.4999).floor() as isize;
    let end = (max_z / h + 0.5001).floor() as isize;
    let [v0, v1, v2] = &t.v;
    for i in start.max(0)..end.min(buckets.len() as isize) {
        let z = i as f64 * h + h / 2.0;
        // Pick the one vertex on the minority side of the plane and
        // interpolate along its two outgoing edges, keeping the winding
        // consistent.
        let seg = if v0.z < z && v1.z >= z && v2.z >= z {
            project2d(v0, v2, v1, z)
        } else if v0.z > z && v1.z < z && v2.z < z {
            project2d(v0, v1, v2, z)
        } else if v1.z < z && v0.z >= z && v2.z >= z {
            project2d(v1, v0, v2, z)
        } else if v1.z > z && v0.z < z && v2.z < z {
            project2d(v1, v2, v0, z)
        } else if v2.z < z && v1.z >= z && v0.z >= z {
            project2d(v2, v1, v0, z)
        } else if v2.z > z && v1.z < z && v0.z < z {
            project2d(v2, v0, v1, z)
        } else {
            // Degenerate or non-manifold at this plane.
            continue;
        };
        if seg.x[0] != seg.x[1] || seg.y[0] != seg.y[1] {
            buckets[i as usize].lock().unwrap().push(seg);
        }
    }
}

/// Intersect every triangle with every slab plane, in parallel over
/// triangles. Consumes the mesh.
pub fn collect_segments(mesh: Mesh, cfg: &Config) -> Vec<Vec<Segment>> {
    let n = layer_count(&mesh, cfg);
    let buckets: Vec<Mutex<Vec<Segment>>> = (0..n).map(|_| Mutex::new(Vec::new())).collect();
    mesh.triangles.par_iter().for_each(|t| find_segments(&buckets, t, cfg));
    drop(mesh);
    buckets.into_iter().map(|b| b.into_inner().unwrap()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Triangle;

    fn tri(a: (f64, f64, f64), b: (f64, f64, f64), c: (f64, f64, f64)) -> Triangle {
        Triangle {
            v: [
                Vertex::new(a.0, a.1, a.2),
                Vertex::new(b.0, b.1, b.2),
                Vertex::new(c.0, c.1, c.2),
            ],
        }
    }

    fn cfg() -> Config {
        let mut c = Config::default();
        c.resolve().unwrap();
        c
    }

    #[test]
    fn test_triangle_below_plate_produces_nothing() {
        let c = cfg();
        let mesh = Mesh::new(vec![tri(
            (0.0, 0.0, -3.0),
            (1.0, 0.0, -2.0),
            (0.0, 1.0, -1.0),
        )]);
        let segs = collect_segments(mesh, &c);
        assert!(segs.iter().all(|b| b.is_empty()));
    }

    #[test]
    fn test_one_vertex_above_yields_one_segment_per_plane() {
        let c = cfg();
        // Apex at z = 1.0, base at z = 0; planes at 0.1, 0.3, 0.5, 0.7, 0.9.
        let mesh = Mesh::new(vec![tri(
            (0.0, 0.0, 0.0),
            (10.0, 0.0, 0.0),
            (5.0, 5.0, 1.0),
        )]);
        let segs = collect_segments(mesh, &c);
        assert_eq!(segs.len(), 5);
        for bucket in &segs {
            assert_eq!(bucket.len(), 1);
        }
    }

    #[test]
    fn test_zero_length_segments_dropped() {
        let c = cfg();
        // Vertical triangle whose intersection with z = 0.1 is a point.
        let mesh = Mesh::new(vec![tri(
            (1.0, 1.0, -0.5),
            (1.0, 1.0, 0.5),
            (1.0, 1.0, 1.5),
        )]);
        let segs = collect_segments(mesh, &c);
        assert!(segs.iter().all(|b| b.is_empty()));
    }

    #[test]
    fn test_horizontal_triangle_skipped() {
        let c = cfg();
        let mesh = Mesh::new(vec![tri(
            (0.0, 0.0, 0.1),
            (10.0, 0.0, 0.1),
            (5.0, 5.0, 0.1),
        )]);
        let segs = collect_segments(mesh, &c);
        // Exactly on the plane: no minority vertex, silently skipped.
        assert!(segs.iter().all(|b| b.is_empty()));
    }
}
