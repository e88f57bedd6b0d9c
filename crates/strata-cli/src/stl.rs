//! Binary STL input.

use std::fs::File;
use std::io::{self, Read};

use strata_slicer::{Mesh, Triangle, Vertex};

/// Read a binary STL from any byte source: an 80-byte header, a little-
/// endian u32 triangle count, then 50-byte records. Normals and the
/// per-triangle attribute bytes are ignored.
pub fn read_mesh<R: Read>(mut input: R) -> io::Result<Mesh> {
    let mut header = [0u8; 80];
    input.read_exact(&mut header)?;
    let mut count = [0u8; 4];
    input.read_exact(&mut count)?;
    let n = u32::from_le_bytes(count) as usize;
    let mut triangles = Vec::with_capacity(n);
    let mut record = [0u8; 50];
    for _ in 0..n {
        input.read_exact(&mut record)?;
        let f = |offset: usize| {
            f32::from_le_bytes(record[offset..offset + 4].try_into().unwrap()) as f64
        };
        triangles.push(Triangle {
            v: [
                Vertex::new(f(12), f(16), f(20)),
                Vertex::new(f(24), f(28), f(32)),
                Vertex::new(f(36), f(40), f(44)),
            ],
        });
    }
    Ok(Mesh::new(triangles))
}

/// Read a binary STL from a path, or from stdin when the path is `-`.
pub fn read_stl(path: &str) -> io::Result<Mesh> {
    if path == "-" {
        read_mesh(io::stdin().lock())
    } else {
        read_mesh(File::open(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn stl_bytes(triangles: &[[f32; 9]]) -> Vec<u8> {
        let mut buf = vec![0u8; 80];
        buf.extend((triangles.len() as u32).to_le_bytes());
        for t in triangles {
            // Normal (ignored by the reader).
            for _ in 0..3 {
                buf.extend(0f32.to_le_bytes());
            }
            for v in t {
                buf.extend(v.to_le_bytes());
            }
            buf.extend(0u16.to_le_bytes());
        }
        buf
    }

    #[test]
    fn test_read_valid_stl() {
        let bytes = stl_bytes(&[
            [0.0, 0.0, 0.0, 10.0, 0.0, 0.0, 5.0, 5.0, 2.0],
            [0.0, 0.0, 2.0, 10.0, 0.0, 2.0, 5.0, 5.0, 4.0],
        ]);
        let mesh = read_mesh(Cursor::new(bytes)).unwrap();
        assert_eq!(mesh.triangles.len(), 2);
        assert!((mesh.triangles[0].v[1].x - 10.0).abs() < 1e-9);
        assert!((mesh.height - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_read_is_an_error() {
        let mut bytes = stl_bytes(&[[0.0; 9]]);
        bytes.truncate(bytes.len() - 10);
        assert!(read_mesh(Cursor::new(bytes)).is_err());
        // Truncated header as well.
        assert!(read_mesh(Cursor::new(vec![0u8; 40])).is_err());
    }

    #[test]
    fn test_trailing_attribute_bytes_ignored() {
        let mut bytes = stl_bytes(&[[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]]);
        // Nonzero attribute bytes must not affect parsing.
        let len = bytes.len();
        bytes[len - 2] = 0xAB;
        bytes[len - 1] = 0xCD;
        let mesh = read_mesh(Cursor::new(bytes)).unwrap();
        assert_eq!(mesh.triangles.len(), 1);
        assert!((mesh.triangles[0].v[2].z - 9.0).abs() < 1e-9);
    }
}
