//! Randomized strand synthesis along skeleton paths.
//!
//! A strand starts at the first point of a path and walks it in fixed
//! steps. Each step samples candidate directions in a cone around the
//! local path tangent, drops candidates whose whole line is already
//! occupied in the [`Grid`], and keeps the candidate that best trades off
//! closeness to a target point on the path against deviation from the
//! tangent. Finished strands are committed to the grid so later strands
//! avoid them.

use std::f32::consts::PI;

use glam::{Quat, Vec3};
use rand::{Rng, seq::SliceRandom};
use tracing::{debug, trace};

use crate::{
    config::GrowthConfig,
    error::{ConfigError, GridError},
    grid::Grid,
    mesh::LineMesh,
    types::StrandId,
};

pub const STRAND_COLOR: Vec3 = Vec3::new(0.92, 0.9, 0.8);

#[derive(Clone, Debug, PartialEq)]
pub struct Strand {
    pub id: StrandId,
    /// Index of the source path in the grower's path list.
    pub path_index: usize,
    pub points: Vec<Vec3>,
    /// `true` if growth stopped early: every candidate was occluded, or no
    /// growth direction could be derived.
    pub stalled: bool,
}

/// One surviving trial direction of a growth step.
#[derive(Clone, Copy, Debug)]
struct Candidate {
    end: Vec3,
    dir: Vec3,
    /// Distance from `end` to the step target.
    distance: f32,
    /// Angle between `dir` and the canonical direction, in radians.
    angle: f32,
}

pub struct StrandGrower<R: Rng> {
    paths: Vec<Vec<Vec3>>,
    cfg: GrowthConfig,
    rng: R,
    order: Vec<usize>,
    cursor: usize,
    strands: Vec<Strand>,
}

impl<R: Rng> StrandGrower<R> {
    /// Creates a grower over `paths` (each ordered from its free end back
    /// to its anchor). The path order is shuffled immediately.
    ///
    /// ### Errors
    /// [`ConfigError`] if `cfg` fails [`GrowthConfig::validate`].
    pub fn new(paths: Vec<Vec<Vec3>>, cfg: GrowthConfig, mut rng: R) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let mut order: Vec<usize> = (0..paths.len()).collect();
        order.shuffle(&mut rng);
        Ok(Self {
            paths,
            cfg,
            rng,
            order,
            cursor: 0,
            strands: Vec::new(),
        })
    }

    pub fn config(&self) -> &GrowthConfig {
        &self.cfg
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    pub fn strands(&self) -> &[Strand] {
        &self.strands
    }

    /// Next path in the shuffled order. The order is reshuffled every time
    /// it wraps around, so each full pass visits every path once.
    ///
    /// ### Returns
    /// `None` only when the grower has no paths.
    pub fn next_path_index(&mut self) -> Option<usize> {
        if self.order.is_empty() {
            return None;
        }
        if self.cursor == self.order.len() {
            self.order.shuffle(&mut self.rng);
            self.cursor = 0;
        }
        let idx = self.order[self.cursor];
        self.cursor += 1;
        Some(idx)
    }

    /// Grows one strand along path `path_index` and commits it to `grid`.
    ///
    /// A strict grid that rejects any of the grown points fails the call
    /// before a strand id is allocated or anything is written.
    ///
    /// ### Panics
    /// If `path_index` is not below [`StrandGrower::path_count`].
    pub fn add_strand(&mut self, grid: &mut Grid, path_index: usize) -> Result<&Strand, GridError> {
        let (points, stalled) = trace_strand(
            &self.paths[path_index],
            &self.cfg,
            &mut self.rng,
            grid,
        );

        grid.check_points(&points)?;
        let id = grid.register_strand();
        grid.commit_strand(id, &points)?;
        if stalled {
            debug!(strand = id, path = path_index, points = points.len(), "strand stalled");
        }

        self.strands.push(Strand {
            id,
            path_index,
            points,
            stalled,
        });
        Ok(&self.strands[self.strands.len() - 1])
    }

    /// Grows `count` strands on paths taken from [`StrandGrower::next_path_index`].
    ///
    /// ### Returns
    /// The strands added by this call.
    pub fn grow(&mut self, grid: &mut Grid, count: usize) -> Result<&[Strand], GridError> {
        let first = self.strands.len();
        for _ in 0..count {
            let Some(path_index) = self.next_path_index() else {
                break;
            };
            self.add_strand(grid, path_index)?;
        }
        Ok(&self.strands[first..])
    }

    /// All strands as one line list.
    pub fn line_mesh(&self, color: Vec3) -> LineMesh {
        let mut mesh = LineMesh::new();
        for strand in &self.strands {
            mesh.push_polyline(&strand.points, color);
        }
        mesh
    }
}

/// Walks `path` and returns the grown points plus whether growth stalled.
fn trace_strand<R: Rng>(
    path: &[Vec3],
    cfg: &GrowthConfig,
    rng: &mut R,
    grid: &Grid,
) -> (Vec<Vec3>, bool) {
    let Some(&anchor) = path.first() else {
        return (Vec::new(), false);
    };

    let mut head = anchor + jitter(rng, cfg.start_spread);
    let mut points = vec![head];
    let mut closest_index = 0;
    let mut last_closest = anchor;
    let mut prev_dir = Vec3::ZERO;
    let cos_max = cfg.max_angle_degrees.to_radians().cos();
    let mut candidates = Vec::with_capacity(cfg.num_trials);

    for _ in 0..cfg.max_steps {
        if closest_index + 1 >= path.len() {
            break;
        }

        // Travel one step past the point the head has drifted to.
        let reach = cfg.segment_length + last_closest.distance(head);
        let (target, target_index) = find_target(path, closest_index, last_closest, reach);

        let Some(canonical) = canonical_direction(target, last_closest, head, prev_dir) else {
            trace!(points = points.len(), "no usable growth direction");
            return (points, true);
        };
        // Cone samples are drawn around +Z and rotated onto the canonical direction.
        let frame = Quat::from_rotation_arc(Vec3::Z, canonical);

        candidates.clear();
        for _ in 0..cfg.num_trials {
            let dir = frame * sample_cap(rng, cos_max);
            let end = head + dir * cfg.segment_length;
            // Lines running entirely through occupied voxels would cross an earlier strand.
            if grid.line_occluded(head, end) {
                continue;
            }
            candidates.push(Candidate {
                end,
                dir,
                distance: end.distance(target),
                angle: dir.angle_between(canonical),
            });
        }

        let Some(best) = pick_best(&candidates, cfg.alpha) else {
            trace!(points = points.len(), trials = cfg.num_trials, "every candidate occluded");
            return (points, true);
        };

        // Advance; the target becomes the anchor of the next step's search.
        head = best.end;
        prev_dir = best.dir;
        points.push(head);
        closest_index = target_index;
        last_closest = target;
    }

    (points, false)
}

/// Point at arc length `reach` past `from` (which lies on segment
/// `start_index`), and the index of the segment it lands on. Clamps to the
/// final node, whose index is then returned.
fn find_target(path: &[Vec3], start_index: usize, from: Vec3, reach: f32) -> (Vec3, usize) {
    let mut cur = from;
    let mut remaining = reach;
    for (i, &next) in path.iter().enumerate().skip(start_index + 1) {
        let len = cur.distance(next);
        if remaining <= len {
            return (cur + (next - cur) * (remaining / len), i - 1);
        }
        remaining -= len;
        cur = next;
    }
    let last = path.len() - 1;
    (path[last], last)
}

fn canonical_direction(target: Vec3, last_closest: Vec3, head: Vec3, prev_dir: Vec3) -> Option<Vec3> {
    [target - last_closest, target - head, prev_dir]
        .into_iter()
        .map(Vec3::normalize_or_zero)
        .find(|d| *d != Vec3::ZERO)
}

/// Uniform direction on the spherical cap around `+Z` with `cos θ >= cos_max`.
fn sample_cap<R: Rng>(rng: &mut R, cos_max: f32) -> Vec3 {
    let cos_t = rng.random_range(cos_max..=1.0);
    let sin_t = (1.0 - cos_t * cos_t).max(0.0).sqrt();
    let phi = rng.random_range(-PI..=PI);
    Vec3::new(sin_t * phi.cos(), sin_t * phi.sin(), cos_t)
}

/// Uniform offset inside a ball of radius `spread`.
fn jitter<R: Rng>(rng: &mut R, spread: f32) -> Vec3 {
    if spread <= 0.0 {
        return Vec3::ZERO;
    }
    loop {
        let v = Vec3::new(
            rng.random_range(-1.0..=1.0),
            rng.random_range(-1.0..=1.0),
            rng.random_range(-1.0..=1.0),
        );
        if v.length_squared() <= 1.0 {
            return v * spread;
        }
    }
}

/// Highest `alpha * distance_score + (1 - alpha) * angle_score`, both
/// min-max normalized over the batch so the best value scores 1 and the
/// worst 0. A batch without spread in one score gives everyone 1 there.
/// Ties keep the first candidate.
fn pick_best(candidates: &[Candidate], alpha: f32) -> Option<Candidate> {
    let (d_min, d_max) = min_max(candidates.iter().map(|c| c.distance))?;
    let (a_min, a_max) = min_max(candidates.iter().map(|c| c.angle))?;

    let mut best: Option<(f32, Candidate)> = None;
    for &c in candidates {
        let fitness = alpha * score(c.distance, d_min, d_max)
            + (1.0 - alpha) * score(c.angle, a_min, a_max);
        if best.is_none_or(|(f, _)| fitness > f) {
            best = Some((fitness, c));
        }
    }
    best.map(|(_, c)| c)
}

/// Lower is better: `min` scores 1, `max` scores 0.
fn score(value: f32, min: f32, max: f32) -> f32 {
    let span = max - min;
    if span > 0.0 { (max - value) / span } else { 1.0 }
}

fn min_max(values: impl Iterator<Item = f32>) -> Option<(f32, f32)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::grid::{ExportMode, GridMode};
    use glam::IVec3;
    use rand::{SeedableRng, rngs::StdRng};

    fn straight_path() -> Vec<Vec3> {
        vec![Vec3::new(2.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO]
    }

    fn straight_path_set() -> Vec<Vec<Vec3>> {
        vec![straight_path()]
    }

    fn test_grid() -> Grid {
        Grid::new(IVec3::splat(40), 0.1, Vec3::new(1.0, 0.0, 0.0))
    }

    fn grower(paths: Vec<Vec<Vec3>>, cfg: GrowthConfig, seed: u64) -> StrandGrower<StdRng> {
        StrandGrower::new(paths, cfg, StdRng::seed_from_u64(seed)).unwrap()
    }

    fn candidate(distance: f32, angle: f32) -> Candidate {
        Candidate {
            end: Vec3::ZERO,
            dir: Vec3::Z,
            distance,
            angle,
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = GrowthConfig {
            segment_length: 0.0,
            ..GrowthConfig::default()
        };
        let result = StrandGrower::new(straight_path_set(), cfg, StdRng::seed_from_u64(0));
        assert!(result.is_err());
    }

    #[test]
    fn strand_follows_the_path_in_fixed_steps() {
        let mut grid = test_grid();
        let cfg = GrowthConfig::default();
        let mut g = grower(straight_path_set(), cfg, 11);

        let strand = g.add_strand(&mut grid, 0).unwrap().clone();
        assert!(!strand.stalled);
        assert!(strand.points.len() > 2);
        assert_eq!(strand.points[0], Vec3::new(2.0, 0.0, 0.0));

        for w in strand.points.windows(2) {
            assert_relative_eq!(w[0].distance(w[1]), cfg.segment_length, epsilon = 1e-4);
            // Every step moves toward the anchor.
            assert!(w[1].x < w[0].x);
        }
        // The cone keeps the strand close to the path.
        for p in &strand.points {
            assert!(p.y.hypot(p.z) < 0.2, "strand drifted to {p}");
        }
    }

    #[test]
    fn narrow_cone_tracks_the_tangent() {
        let mut grid = test_grid();
        let cfg = GrowthConfig {
            max_angle_degrees: 1e-3,
            ..GrowthConfig::default()
        };
        let mut g = grower(straight_path_set(), cfg, 3);

        let strand = g.add_strand(&mut grid, 0).unwrap();
        for p in &strand.points {
            assert!(p.y.abs() < 1e-3 && p.z.abs() < 1e-3);
        }
    }

    #[test]
    fn committed_strand_lands_in_the_grid() {
        let mut grid = test_grid();
        let mut g = grower(straight_path_set(), GrowthConfig::default(), 5);

        let strand = g.add_strand(&mut grid, 0).unwrap().clone();
        assert_eq!(grid.segments().len(), strand.points.len() - 1);
        assert!(grid.segments().iter().all(|s| s.strand == strand.id));
        assert!(grid.is_occupied(grid.pos_to_grid(strand.points[0])));
    }

    #[test]
    fn fully_occupied_grid_stalls_immediately() {
        let mut grid = test_grid();
        for idx in 0..grid.voxel_count() {
            let v = grid.coord_of(idx);
            grid.occupy_slot(v, 0).unwrap();
        }
        let mut g = grower(straight_path_set(), GrowthConfig::default(), 1);

        let strand = g.add_strand(&mut grid, 0).unwrap();
        assert!(strand.stalled);
        assert_eq!(strand.points, vec![Vec3::new(2.0, 0.0, 0.0)]);
    }

    #[test]
    fn strand_leaving_a_strict_grid_is_not_recorded() {
        let mut grid =
            Grid::new(IVec3::splat(10), 0.1, Vec3::new(0.5, 0.0, 0.0)).with_mode(GridMode::Strict);
        let path = vec![Vec3::new(0.05, 0.01, 0.01), Vec3::new(2.0, 0.01, 0.01)];
        let mut g = grower(vec![path], GrowthConfig::default(), 6);

        assert!(g.add_strand(&mut grid, 0).is_err());
        assert!(g.strands().is_empty());
        assert!(grid.segments().is_empty());
        assert!(grid.export_voxels(ExportMode::Occupancy).is_empty());
        // The failed strand did not use up an id.
        assert_eq!(grid.register_strand(), 0);
    }

    #[test]
    fn occupied_best_step_is_replaced_by_a_free_one() {
        let mut grid = Grid::new(IVec3::new(120, 20, 20), 0.02, Vec3::new(1.0, 0.0, 0.0));
        let path = vec![Vec3::new(2.01, 0.011, 0.013), Vec3::new(0.01, 0.011, 0.013)];
        let cfg = GrowthConfig {
            num_trials: 64,
            max_steps: 1,
            ..GrowthConfig::default()
        };

        let (free, _) = trace_strand(&path, &cfg, &mut StdRng::seed_from_u64(21), &grid);
        assert_eq!(free.len(), 2);

        // An earlier strand running exactly along the preferred step.
        grid.occupy_line(free[0], free[1], 0).unwrap();
        assert!(grid.line_occluded(free[0], free[1]));

        let (blocked, stalled) = trace_strand(&path, &cfg, &mut StdRng::seed_from_u64(21), &grid);
        assert!(!stalled);
        assert_eq!(blocked.len(), 2);
        assert_ne!(blocked[1], free[1]);
        assert!(!grid.line_occluded(blocked[0], blocked[1]));
    }

    #[test]
    fn single_point_path_yields_single_point_strand() {
        let mut grid = test_grid();
        let mut g = grower(vec![vec![Vec3::ONE]], GrowthConfig::default(), 1);

        let strand = g.add_strand(&mut grid, 0).unwrap();
        assert!(!strand.stalled);
        assert_eq!(strand.points, vec![Vec3::ONE]);
    }

    #[test]
    fn same_seed_and_occupancy_give_identical_strands() {
        let paths = vec![
            straight_path(),
            vec![Vec3::new(2.0, 1.0, 0.5), Vec3::new(1.0, 0.5, 0.0), Vec3::ZERO],
        ];
        let cfg = GrowthConfig {
            start_spread: 0.05,
            ..GrowthConfig::default()
        };

        let run = |seed| {
            let mut grid = test_grid();
            let mut g = grower(paths.clone(), cfg, seed);
            g.grow(&mut grid, 6).unwrap();
            g.strands().to_vec()
        };

        assert_eq!(run(42), run(42));
        assert_ne!(run(42), run(43));
    }

    #[test]
    fn next_path_index_visits_every_path_per_pass() {
        let paths = vec![vec![Vec3::ZERO]; 4];
        let mut g = grower(paths, GrowthConfig::default(), 9);

        for _ in 0..3 {
            let mut pass: Vec<usize> = (0..4).filter_map(|_| g.next_path_index()).collect();
            pass.sort_unstable();
            assert_eq!(pass, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn grower_without_paths_grows_nothing() {
        let mut grid = test_grid();
        let mut g = grower(Vec::new(), GrowthConfig::default(), 0);
        assert_eq!(g.next_path_index(), None);
        assert!(g.grow(&mut grid, 5).unwrap().is_empty());
    }

    #[test]
    fn grow_returns_only_new_strands() {
        let mut grid = test_grid();
        let mut g = grower(straight_path_set(), GrowthConfig::default(), 2);

        assert_eq!(g.grow(&mut grid, 2).unwrap().len(), 2);
        let added = g.grow(&mut grid, 3).unwrap();
        assert_eq!(added.len(), 3);
        assert_eq!(added[0].id, 2);
        assert_eq!(g.strands().len(), 5);
        let total_points: usize = g.strands().iter().map(|s| s.points.len()).sum();
        assert_eq!(g.line_mesh(Vec3::ONE).vertices.len(), total_points);
    }

    #[test]
    fn find_target_interpolates_and_clamps() {
        let path = straight_path();

        let (t, i) = find_target(&path, 0, path[0], 0.25);
        assert_relative_eq!(t.x, 1.75);
        assert_eq!(i, 0);

        // Crosses into the second segment.
        let (t, i) = find_target(&path, 0, Vec3::new(1.5, 0.0, 0.0), 0.75);
        assert_relative_eq!(t.x, 0.75);
        assert_eq!(i, 1);

        // Runs past the end.
        let (t, i) = find_target(&path, 1, Vec3::new(0.5, 0.0, 0.0), 3.0);
        assert_eq!(t, Vec3::ZERO);
        assert_eq!(i, 2);
    }

    #[test]
    fn canonical_direction_falls_back_when_degenerate() {
        let t = Vec3::new(1.0, 0.0, 0.0);
        assert_eq!(canonical_direction(t, Vec3::ZERO, Vec3::Y, Vec3::Z), Some(Vec3::X));
        assert_eq!(canonical_direction(t, t, Vec3::ZERO, Vec3::Z), Some(Vec3::X));
        assert_eq!(canonical_direction(t, t, t, Vec3::Z), Some(Vec3::Z));
        assert_eq!(canonical_direction(t, t, t, Vec3::ZERO), None);
    }

    #[test]
    fn sampled_directions_stay_inside_the_cone() {
        let mut rng = StdRng::seed_from_u64(8);
        let cos_max = 30f32.to_radians().cos();
        for _ in 0..500 {
            let d = sample_cap(&mut rng, cos_max);
            assert_relative_eq!(d.length(), 1.0, epsilon = 1e-5);
            assert!(d.z >= cos_max - 1e-6);
        }
    }

    #[test]
    fn pick_best_weights_distance_against_angle() {
        let batch = [candidate(0.1, 0.5), candidate(0.3, 0.0)];
        // Distance only.
        assert_eq!(pick_best(&batch, 1.0).unwrap().distance, 0.1);
        // Angle only.
        assert_eq!(pick_best(&batch, 0.0).unwrap().distance, 0.3);
        assert!(pick_best(&[], 0.5).is_none());
    }

    #[test]
    fn pick_best_keeps_first_on_ties() {
        let batch = [candidate(0.2, 0.1), candidate(0.2, 0.1), candidate(0.2, 0.1)];
        let best = pick_best(&batch, 0.5).unwrap();
        assert_eq!(best.distance, 0.2);

        // Equal fitness from opposite trade-offs: the first one wins.
        let batch = [
            Candidate {
                end: Vec3::X,
                ..candidate(0.1, 0.4)
            },
            Candidate {
                end: Vec3::Y,
                ..candidate(0.3, 0.0)
            },
        ];
        assert_eq!(pick_best(&batch, 0.5).unwrap().end, Vec3::X);
    }

    #[test]
    fn jitter_stays_within_spread() {
        let mut rng = StdRng::seed_from_u64(4);
        assert_eq!(jitter(&mut rng, 0.0), Vec3::ZERO);
        for _ in 0..200 {
            assert!(jitter(&mut rng, 0.3).length() <= 0.3 + 1e-6);
        }
    }
}
