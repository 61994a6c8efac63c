//! Mesh artifacts handed to the renderer: line lists for the skeleton and
//! the grown strands, and a triangle list for the extracted surface.

use glam::Vec3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineVertex {
    pub position: Vec3,
    pub color: Vec3,
}

/// Indexed line list: every pair in `indices` is one segment.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LineMesh {
    pub vertices: Vec<LineVertex>,
    pub indices: Vec<u32>,
}

impl LineMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a vertex and returns its index.
    pub fn push_vertex(&mut self, position: Vec3, color: Vec3) -> u32 {
        let id = self.vertices.len() as u32;
        self.vertices.push(LineVertex { position, color });
        id
    }

    pub fn push_segment(&mut self, a: u32, b: u32) {
        self.indices.push(a);
        self.indices.push(b);
    }

    /// Appends a connected polyline in a single colour.
    pub fn push_polyline(&mut self, points: &[Vec3], color: Vec3) {
        let mut prev = None;
        for &p in points {
            let id = self.push_vertex(p, color);
            if let Some(prev) = prev {
                self.push_segment(prev, id);
            }
            prev = Some(id);
        }
    }

    pub fn segment_count(&self) -> usize {
        self.indices.len() / 2
    }

    /// Merges `other` into this mesh, rebasing its indices.
    pub fn append(&mut self, other: &LineMesh) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.indices.extend(other.indices.iter().map(|i| i + base));
    }

    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        bounds_of(self.vertices.iter().map(|v| v.position))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub color: Vec3,
}

/// Indexed triangle list. Vertices are not shared between triangles.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TriangleMesh {
    pub vertices: Vec<SurfaceVertex>,
    pub indices: Vec<u32>,
}

impl TriangleMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_triangle(&mut self, corners: [SurfaceVertex; 3]) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&corners);
        self.indices.extend_from_slice(&[base, base + 1, base + 2]);
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Merges `other` into this mesh, rebasing its indices.
    pub fn append(&mut self, other: &TriangleMesh) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.indices.extend(other.indices.iter().map(|i| i + base));
    }

    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        bounds_of(self.vertices.iter().map(|v| v.position))
    }
}

fn bounds_of(points: impl Iterator<Item = Vec3>) -> Option<(Vec3, Vec3)> {
    points.fold(None, |acc, p| match acc {
        None => Some((p, p)),
        Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polyline_links_consecutive_points() {
        let mut mesh = LineMesh::new();
        mesh.push_polyline(&[Vec3::ZERO, Vec3::X, Vec3::Y], Vec3::ONE);

        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 1, 2]);
        assert_eq!(mesh.segment_count(), 2);
    }

    #[test]
    fn append_rebases_indices() {
        let mut a = LineMesh::new();
        a.push_polyline(&[Vec3::ZERO, Vec3::X], Vec3::ONE);
        let mut b = LineMesh::new();
        b.push_polyline(&[Vec3::Y, Vec3::Z], Vec3::ONE);

        a.append(&b);
        assert_eq!(a.indices, vec![0, 1, 2, 3]);

        let mut t = TriangleMesh::new();
        let v = SurfaceVertex {
            position: Vec3::ZERO,
            normal: Vec3::Z,
            color: Vec3::ONE,
        };
        t.push_triangle([v; 3]);
        let other = t.clone();
        t.append(&other);
        assert_eq!(t.triangle_count(), 2);
        assert_eq!(&t.indices[3..], &[3, 4, 5]);
    }

    #[test]
    fn bounds_cover_all_vertices() {
        let mut mesh = LineMesh::new();
        assert!(mesh.bounds().is_none());
        mesh.push_polyline(&[Vec3::new(-1.0, 2.0, 0.0), Vec3::new(3.0, -4.0, 5.0)], Vec3::ONE);
        let (lo, hi) = mesh.bounds().unwrap();
        assert_eq!(lo, Vec3::new(-1.0, -4.0, 0.0));
        assert_eq!(hi, Vec3::new(3.0, 2.0, 5.0));
    }
}
