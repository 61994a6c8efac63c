//! High-level pipeline phases for strand growth and surfacing.
//!
//! A full run looks like:
//! 1. [`build_grid`]: size a [`Grid`] around the skeleton.
//! 2. [`growth_phase`]: grow strands along the skeleton paths, each one
//!    avoiding the voxels already occupied by earlier strands.
//! 3. [`field_phase`]: register the strands (and optionally the skeleton)
//!    as sources of the implicit density field.
//! 4. [`surface_phase`]: extract the iso surface of that field.
//!
//! [`run`] chains the four phases with a seeded generator.

use glam::Vec3;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::info;

use crate::{
    config::{FieldConfig, GridConfig, PipelineConfig},
    error::{ConfigError, GridError, PipelineError},
    geometry::path_length,
    grid::Grid,
    marching_cubes::polygonize,
    mesh::{LineMesh, TriangleMesh},
    skeleton::Skeleton,
    strand::{STRAND_COLOR, Strand, StrandGrower},
};

/// Outcome of one [`growth_phase`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GrowthReport {
    pub grown: usize,
    pub stalled: usize,
    /// Points over all strands grown in the phase.
    pub points: usize,
    /// Summed arc length of those strands.
    pub length: f32,
}

/// Everything a run produces, ready to be drawn or inspected.
#[derive(Debug)]
pub struct RunOutput {
    /// Seed the run's generator was created from.
    pub seed: u64,
    pub grid: Grid,
    pub strands: Vec<Strand>,
    pub report: GrowthReport,
    pub skeleton_mesh: LineMesh,
    pub strand_mesh: LineMesh,
    pub surface: TriangleMesh,
}

/// Creates the grid for `skeleton`, fitted to its combined bounds unless
/// `cfg` pins the dimensions or center.
pub fn build_grid(skeleton: &Skeleton, cfg: &GridConfig) -> Result<Grid, ConfigError> {
    Grid::from_config(cfg, &skeleton.stats())
}

/// Grows `count` strands and summarizes them.
///
/// ### Parameters
/// - `grower` - Strand grower holding the paths and the generator.
/// - `grid` - Shared occupancy; every grown strand is committed to it.
/// - `count` - Number of strands to grow.
///
/// ### Returns
/// A [`GrowthReport`] counting the strands grown by this call.
pub fn growth_phase<R: Rng>(
    grower: &mut StrandGrower<R>,
    grid: &mut Grid,
    count: usize,
) -> Result<GrowthReport, GridError> {
    let added = grower.grow(grid, count)?;
    let report = GrowthReport {
        grown: added.len(),
        stalled: added.iter().filter(|s| s.stalled).count(),
        points: added.iter().map(|s| s.points.len()).sum(),
        length: added.iter().map(|s| path_length(&s.points)).sum(),
    };
    info!(
        paths = grower.path_count(),
        segment_length = grower.config().segment_length,
        grown = report.grown,
        stalled = report.stalled,
        points = report.points,
        length = report.length,
        "growth phase done"
    );
    Ok(report)
}

/// Registers field sources on `grid`.
///
/// Every strand becomes a source under its own id. When
/// `cfg.include_skeleton` is set, each skeleton path is registered too,
/// under a freshly allocated id.
///
/// ### Returns
/// The number of sources registered.
pub fn field_phase(
    grid: &mut Grid,
    skeleton: &Skeleton,
    strands: &[Strand],
    cfg: &FieldConfig,
) -> Result<usize, ConfigError> {
    let model = cfg.model.build()?;
    grid.set_path_overshoot(cfg.overshoot);
    let mut sources = 0;

    for strand in strands {
        grid.add_field_source(strand.id, &strand.points, model);
        sources += 1;
    }
    if cfg.include_skeleton {
        for path in skeleton.paths() {
            let id = grid.register_strand();
            grid.add_field_source(id, &path, model);
            sources += 1;
        }
    }

    info!(sources, segments = grid.segments().len(), "field phase done");
    Ok(sources)
}

/// Extracts the iso surface at `cfg.threshold`.
pub fn surface_phase(grid: &mut Grid, cfg: &FieldConfig) -> TriangleMesh {
    let mesh = polygonize(grid, cfg.threshold, Vec3::from_array(cfg.surface_color));
    info!(triangles = mesh.triangle_count(), "surface phase done");
    mesh
}

/// Runs the whole pipeline on `skeleton`.
///
/// The generator is seeded from `cfg.growth.seed`, or from entropy when no
/// seed is configured; the seed actually used is reported in the output.
pub fn run(skeleton: &Skeleton, cfg: &PipelineConfig) -> Result<RunOutput, PipelineError> {
    cfg.validate()?;
    let seed = cfg.growth.seed.unwrap_or_else(|| rand::rng().random());
    info!(seed, "starting run");

    let mut grid = build_grid(skeleton, &cfg.grid)?;
    let mut grower = StrandGrower::new(skeleton.paths(), cfg.growth, StdRng::seed_from_u64(seed))?;

    let report = growth_phase(&mut grower, &mut grid, cfg.growth.strand_count)?;
    field_phase(&mut grid, skeleton, grower.strands(), &cfg.field)?;
    let surface = surface_phase(&mut grid, &cfg.field);

    Ok(RunOutput {
        seed,
        skeleton_mesh: skeleton.line_mesh(),
        strand_mesh: grower.line_mesh(STRAND_COLOR),
        strands: grower.strands().to_vec(),
        grid,
        report,
        surface,
    })
}
