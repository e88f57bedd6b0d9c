//! Triangle-soup mesh input.
//!
//! The mesh is consumed exactly once, by the segment stage; nothing
//! downstream reads it.

/// A vertex in model space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vertex {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl Vertex {
    /// Create a vertex.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// One triangle of the soup.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Triangle {
    /// The three corners.
    pub v: [Vertex; 3],
}

/// An unindexed triangle mesh with cached extents.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    /// Triangle soup.
    pub triangles: Vec<Triangle>,
    /// Bounding-box center.
    pub center: Vertex,
    /// Height (Z extent).
    pub height: f64,
    /// Width (X extent).
    pub width: f64,
    /// Depth (Y extent).
    pub depth: f64,
}

impl Mesh {
    /// Build a mesh and compute its extents.
    pub fn new(triangles: Vec<Triangle>) -> Self {
        let mut mesh = Self { triangles, ..Default::default() };
        mesh.update_extents();
        mesh
    }

    fn update_extents(&mut self) {
        let mut first = true;
        let (mut min, mut max) = (Vertex::default(), Vertex::default());
        for t in &self.triangles {
            for v in &t.v {
                if first {
                    min = *v;
                    max = *v;
                    first = false;
                } else {
                    min.x = min.x.min(v.x);
                    min.y = min.y.min(v.y);
                    min.z = min.z.min(v.z);
                    max.x = max.x.max(v.x);
                    max.y = max.y.max(v.y);
                    max.z = max.z.max(v.z);
                }
            }
        }
        self.width = max.x - min.x;
        self.depth = max.y - min.y;
        self.height = max.z - min.z;
        self.center = Vertex::new(
            max.x - self.width / 2.0,
            max.y - self.depth / 2.0,
            max.z - self.height / 2.0,
        );
    }

    /// Translate every vertex by `(x, y, z)`.
    pub fn translate(&mut self, x: f64, y: f64, z: f64) {
        if x == 0.0 && y == 0.0 && z == 0.0 {
            return;
        }
        for t in &mut self.triangles {
            for v in &mut t.v {
                v.x += x;
                v.y += y;
                v.z += z;
            }
        }
        self.center.x += x;
        self.center.y += y;
        self.center.z += z;
    }

    /// Scale every vertex by the per-axis ratios.
    pub fn scale(&mut self, x_ratio: f64, y_ratio: f64, z_ratio: f64) {
        if x_ratio == 1.0 && y_ratio == 1.0 && z_ratio == 1.0 {
            return;
        }
        for t in &mut self.triangles {
            for v in &mut t.v {
                v.x *= x_ratio;
                v.y *= y_ratio;
                v.z *= z_ratio;
            }
        }
        self.width *= x_ratio;
        self.depth *= y_ratio;
        self.height *= z_ratio;
        self.center.x *= x_ratio;
        self.center.y *= y_ratio;
        self.center.z *= z_ratio;
    }
}

/// The build-plate footprint the print may occupy: the mesh extent grown by
/// the configured extra XY (brim, support, raft). Pattern generation and the
/// planner's parked position both derive from it, so it is captured before
/// the mesh is consumed.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildArea {
    /// Minimum X, model units.
    pub x0: f64,
    /// Minimum Y.
    pub y0: f64,
    /// Maximum X.
    pub x1: f64,
    /// Maximum Y.
    pub y1: f64,
}

impl BuildArea {
    /// Capture the extended footprint of `mesh`.
    pub fn of(mesh: &Mesh, xy_extra: f64) -> Self {
        let half_w = (mesh.width + xy_extra) / 2.0;
        let half_d = (mesh.depth + xy_extra) / 2.0;
        Self {
            x0: mesh.center.x - half_w,
            y0: mesh.center.y - half_d,
            x1: mesh.center.x + half_w,
            y1: mesh.center.y + half_d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Triangle-soup cube spanning `[0,size]^3`.
    fn cube(size: f64) -> Mesh {
        let s = size;
        let corners = [
            Vertex::new(0.0, 0.0, 0.0),
            Vertex::new(s, 0.0, 0.0),
            Vertex::new(s, s, 0.0),
            Vertex::new(0.0, s, 0.0),
            Vertex::new(0.0, 0.0, s),
            Vertex::new(s, 0.0, s),
            Vertex::new(s, s, s),
            Vertex::new(0.0, s, s),
        ];
        let faces: [[usize; 3]; 12] = [
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [2, 3, 7],
            [2, 7, 6],
            [0, 4, 7],
            [0, 7, 3],
            [1, 2, 6],
            [1, 6, 5],
        ];
        Mesh::new(
            faces
                .iter()
                .map(|f| Triangle { v: [corners[f[0]], corners[f[1]], corners[f[2]]] })
                .collect(),
        )
    }

    #[test]
    fn test_extents() {
        let mesh = cube(10.0);
        assert_relative_eq!(mesh.width, 10.0);
        assert_relative_eq!(mesh.depth, 10.0);
        assert_relative_eq!(mesh.height, 10.0);
        assert_relative_eq!(mesh.center.z, 5.0);
    }

    #[test]
    fn test_translate_scale() {
        let mut mesh = cube(10.0);
        mesh.scale(2.0, 2.0, 1.0);
        assert_relative_eq!(mesh.width, 20.0);
        assert_relative_eq!(mesh.height, 10.0);
        mesh.translate(-10.0, 0.0, 5.0);
        assert_relative_eq!(mesh.center.x, 0.0);
        assert_relative_eq!(mesh.center.z, 10.0);
    }
}
