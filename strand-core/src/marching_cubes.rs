//! Marching-cubes extraction of the grid's density field.

use glam::{IVec3, Vec3};

use crate::{
    grid::Grid,
    marching_cubes_tables::{CORNER_OFFSETS, EDGE_CORNERS, EDGE_TABLE, TRI_TABLE},
    mesh::{SurfaceVertex, TriangleMesh},
};

/// Polygonizes the iso level `threshold` of `grid`'s field.
///
/// Every cell between neighbouring voxel samples is classified by which of
/// its 8 corners fall below `threshold`; crossed edges get one vertex each,
/// placed by linear interpolation of the corner values. Vertex normals are
/// interpolated the same way from the negated central-difference gradient
/// at the corners, so they point away from high density.
///
/// Field values are evaluated lazily, hence `&mut Grid`.
///
/// ### Returns
/// A triangle soup: vertices are not shared between triangles.
pub fn polygonize(grid: &mut Grid, threshold: f32, color: Vec3) -> TriangleMesh {
    let mut mesh = TriangleMesh::new();
    let cells = grid.dimensions() - IVec3::ONE;

    for z in 0..cells.z {
        for y in 0..cells.y {
            for x in 0..cells.x {
                polygonize_cell(grid, IVec3::new(x, y, z), threshold, color, &mut mesh);
            }
        }
    }
    mesh
}

fn polygonize_cell(grid: &mut Grid, cell: IVec3, threshold: f32, color: Vec3, mesh: &mut TriangleMesh) {
    let mut values = [0.0f32; 8];
    let mut mask = 0usize;
    for (i, offset) in CORNER_OFFSETS.iter().enumerate() {
        values[i] = grid.field_value(cell + *offset);
        if values[i] < threshold {
            mask |= 1 << i;
        }
    }

    let crossed = EDGE_TABLE[mask];
    if crossed == 0 {
        return;
    }

    let mut normals: [Option<Vec3>; 8] = [None; 8];
    let mut edge_vertices = [None; 12];
    for (e, &[c0, c1]) in EDGE_CORNERS.iter().enumerate() {
        if crossed & (1 << e) == 0 {
            continue;
        }
        let n0 = *normals[c0].get_or_insert_with(|| corner_normal(grid, cell + CORNER_OFFSETS[c0]));
        let n1 = *normals[c1].get_or_insert_with(|| corner_normal(grid, cell + CORNER_OFFSETS[c1]));
        let t = crossing(values[c0], values[c1], threshold);

        let p0 = grid.grid_to_pos(cell + CORNER_OFFSETS[c0]);
        let p1 = grid.grid_to_pos(cell + CORNER_OFFSETS[c1]);
        edge_vertices[e] = Some(SurfaceVertex {
            position: p0.lerp(p1, t),
            normal: n0.lerp(n1, t).normalize_or_zero(),
            color,
        });
    }

    for tri in TRI_TABLE[mask].chunks_exact(3) {
        if tri[0] < 0 {
            break;
        }
        let corner = |e: i8| edge_vertices[e as usize];
        if let (Some(a), Some(b), Some(c)) = (corner(tri[0]), corner(tri[1]), corner(tri[2])) {
            mesh.push_triangle([a, b, c]);
        }
    }
}

/// Interpolation factor of the iso crossing between two corner values.
fn crossing(va: f32, vb: f32, threshold: f32) -> f32 {
    let dv = vb - va;
    if dv.abs() <= f32::EPSILON {
        return 0.5;
    }
    ((threshold - va) / dv).clamp(0.0, 1.0)
}

/// Outward normal at a voxel sample, from the central-difference gradient.
fn corner_normal(grid: &mut Grid, v: IVec3) -> Vec3 {
    let mut gradient = Vec3::ZERO;
    for axis in 0..3 {
        let step = IVec3::AXES[axis];
        gradient[axis] = grid.field_value(v + step) - grid.field_value(v - step);
    }
    (-gradient).normalize_or_zero()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::implicit::ImplicitModel;
    use approx::assert_relative_eq;

    const COLOR: Vec3 = Vec3::new(0.8, 0.7, 0.6);

    #[test]
    fn uniform_field_emits_nothing() {
        let mut grid = Grid::new(IVec3::splat(4), 1.0, Vec3::ZERO);
        assert!(polygonize(&mut grid, 0.5, COLOR).is_empty());
        // Everything above the threshold is just as flat.
        assert!(polygonize(&mut grid, -0.5, COLOR).is_empty());
    }

    #[test]
    fn single_corner_above_threshold_emits_one_triangle() {
        // One 2x2x2 cell with the origin corner at (0, 0, 0).
        let mut grid = Grid::new(IVec3::splat(2), 1.0, Vec3::ONE);
        let model = ImplicitModel::metaballs(1.0, 0.5).unwrap();
        let id = grid.register_strand();
        grid.add_field_source(id, &[Vec3::ZERO], model);

        let mesh = polygonize(&mut grid, 0.5, COLOR);
        assert_eq!(mesh.triangle_count(), 1);

        // Each vertex sits halfway along an edge leaving the origin.
        let mut positions: Vec<[f32; 3]> = mesh.vertices.iter().map(|v| v.position.to_array()).collect();
        positions.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(
            positions,
            vec![[0.0, 0.0, 0.5], [0.0, 0.5, 0.0], [0.5, 0.0, 0.0]]
        );

        for v in &mesh.vertices {
            assert_eq!(v.color, COLOR);
            // Normals point away from the dense corner.
            assert!(v.normal.dot(v.position) > 0.0);
        }
    }

    #[test]
    fn point_blob_yields_a_sphere_near_the_iso_radius() {
        let mut grid = Grid::new(IVec3::splat(16), 0.1, Vec3::ZERO);
        let model = ImplicitModel::metaballs(1.0, 1.0).unwrap();
        let id = grid.register_strand();
        grid.add_field_source(id, &[Vec3::ZERO], model);

        let mesh = polygonize(&mut grid, 0.5, COLOR);
        assert!(mesh.triangle_count() > 50);

        // potential(r) = 0.5 at r = 1 - sqrt(1/3).
        let iso_radius = 1.0 - (1.0f32 / 3.0).sqrt();
        for v in &mesh.vertices {
            let r = v.position.length();
            assert!((r - iso_radius).abs() < 0.1, "vertex at radius {r}");
            assert!(v.normal.dot(v.position / r) > 0.5);
        }
    }

    #[test]
    fn crossing_interpolates_and_guards_flat_edges() {
        assert_relative_eq!(crossing(0.0, 1.0, 0.25), 0.25);
        assert_relative_eq!(crossing(1.0, 0.0, 0.25), 0.75);
        assert_eq!(crossing(0.3, 0.3, 0.3), 0.5);
    }
}
