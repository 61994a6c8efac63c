//! Voxel lattice shared by strand growth (occupancy) and surfacing
//! (density field).
//!
//! The grid is a single mutable resource: every mutating call takes
//! `&mut self`, including lazy field evaluation, which fills the
//! [`FieldCache`] on demand.

use std::{collections::HashMap, io::Write};

use glam::{IVec3, Vec3};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    config::{DEFAULT_PATH_OVERSHOOT, GridConfig},
    error::{ConfigError, GridError},
    field_cache::FieldCache,
    geometry::distance_to_segment,
    implicit::ImplicitModel,
    skeleton::SkeletonStats,
    types::{SegmentId, StrandId, VoxelCoord},
};

/// Inward bias used for boundaries crossed through a negative face, in
/// units of `scale`. Keeps the cursor strictly inside the next voxel.
const NEGATIVE_FACE_BIAS: f32 = 0.9999;

/// Smallest cursor advance, in units of `scale`.
const MIN_STEP: f32 = 1e-6;

/// Inset of the clipping box from the grid faces, in units of `scale`.
const CLIP_INSET: f32 = 1e-4;

const FACES: [IVec3; 6] = [
    IVec3::X,
    IVec3::NEG_X,
    IVec3::Y,
    IVec3::NEG_Y,
    IVec3::Z,
    IVec3::NEG_Z,
];

/// How out-of-grid writes are treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GridMode {
    /// Log a warning and ignore the write.
    #[default]
    Lenient,
    /// Return [`GridError::OutOfGrid`].
    Strict,
}

#[derive(Clone, Debug, Default)]
pub struct Voxel {
    /// Occupancy references into the segment table, sorted and unique.
    pub occupancy: Vec<SegmentId>,
    /// Field segments whose support reaches this voxel's sample position.
    pub reach: Vec<SegmentId>,
}

/// One edge of a registered polyline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub strand: StrandId,
    pub a: Vec3,
    pub b: Vec3,
    /// Position of the edge in its polyline, used as the path-search hint.
    pub index: usize,
}

#[derive(Clone, Debug)]
struct FieldSource {
    points: Vec<Vec3>,
    model: ImplicitModel,
    overshoot: usize,
}

/// Which voxels [`Grid::export_voxels`] reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportMode {
    Field,
    Occupancy,
    Both,
}

/// One line of the voxel dump.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct VoxelRecord {
    pub coord: [i32; 3],
    pub value: f32,
    pub occupancy: usize,
}

#[derive(Debug)]
pub struct Grid {
    dimensions: IVec3,
    scale: f32,
    center: Vec3,
    back_bottom_left: Vec3,
    mode: GridMode,
    voxels: Vec<Voxel>,
    segments: Vec<Segment>,
    sources: HashMap<StrandId, FieldSource>,
    path_overshoot: usize,
    next_strand: StrandId,
    cache: FieldCache,
}

impl Grid {
    /// Creates an empty grid of `dimensions` voxels of edge `scale`,
    /// centered on `center`. Non-positive dimensions are raised to 1.
    pub fn new(dimensions: IVec3, scale: f32, center: Vec3) -> Self {
        let dimensions = dimensions.max(IVec3::ONE);
        let count = (dimensions.x as usize) * (dimensions.y as usize) * (dimensions.z as usize);
        Self {
            dimensions,
            scale,
            center,
            back_bottom_left: center - dimensions.as_vec3() * scale * 0.5,
            mode: GridMode::Lenient,
            voxels: vec![Voxel::default(); count],
            segments: Vec::new(),
            sources: HashMap::new(),
            path_overshoot: DEFAULT_PATH_OVERSHOOT,
            next_strand: 0,
            cache: FieldCache::with_len(count),
        }
    }

    pub fn with_mode(mut self, mode: GridMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sizes a grid from configuration, falling back to the skeleton
    /// bounds (padded by `cfg.margin`) for anything not given explicitly.
    pub fn from_config(cfg: &GridConfig, stats: &SkeletonStats) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let center = cfg.center.map(Vec3::from_array).unwrap_or_else(|| stats.center());
        let dimensions = match cfg.dimensions {
            Some(d) => IVec3::from_array(d),
            None => {
                let extent = stats.size() + Vec3::splat(2.0 * cfg.margin);
                (extent / cfg.scale).ceil().as_ivec3() + IVec3::ONE
            }
        };
        let mode = if cfg.strict {
            GridMode::Strict
        } else {
            GridMode::Lenient
        };
        debug!(
            dimensions = ?dimensions,
            scale = cfg.scale,
            center = ?center,
            "grid created"
        );
        Ok(Grid::new(dimensions, cfg.scale, center).with_mode(mode))
    }

    pub fn dimensions(&self) -> IVec3 {
        self.dimensions
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn back_bottom_left(&self) -> Vec3 {
        self.back_bottom_left
    }

    pub fn mode(&self) -> GridMode {
        self.mode
    }

    /// Patience of the nearest-segment search used by sources added from
    /// now on.
    pub fn set_path_overshoot(&mut self, overshoot: usize) {
        self.path_overshoot = overshoot;
    }

    pub fn path_overshoot(&self) -> usize {
        self.path_overshoot
    }

    pub fn voxel_count(&self) -> usize {
        self.voxels.len()
    }

    /// Voxel containing `p` (floor toward the origin corner).
    #[inline]
    pub fn pos_to_grid(&self, p: Vec3) -> VoxelCoord {
        ((p - self.back_bottom_left) / self.scale).floor().as_ivec3()
    }

    /// Origin corner of voxel `v`, also its field sample position.
    #[inline]
    pub fn grid_to_pos(&self, v: VoxelCoord) -> Vec3 {
        v.as_vec3() * self.scale + self.back_bottom_left
    }

    #[inline]
    pub fn is_in_grid(&self, v: VoxelCoord) -> bool {
        v.cmpge(IVec3::ZERO).all() && v.cmplt(self.dimensions).all()
    }

    /// Flat storage index of `v`, if it lies in the grid.
    #[inline]
    pub fn index(&self, v: VoxelCoord) -> Option<usize> {
        if !self.is_in_grid(v) {
            return None;
        }
        let d = self.dimensions;
        Some((v.x + v.y * d.x + v.z * d.x * d.y) as usize)
    }

    /// Inverse of [`Grid::index`].
    pub fn coord_of(&self, idx: usize) -> VoxelCoord {
        let d = self.dimensions;
        let i = idx as i32;
        IVec3::new(i % d.x, (i / d.x) % d.y, i / (d.x * d.y))
    }

    pub fn voxel(&self, v: VoxelCoord) -> Option<&Voxel> {
        self.index(v).map(|i| &self.voxels[i])
    }

    /// Voxels crossed by the segment `start -> end`, in order.
    ///
    /// A 3-D DDA: only faces the direction points toward are candidates;
    /// each step moves the cursor to the nearest boundary among them and
    /// steps into the neighbour behind that face. The walk stops once the
    /// travelled distance covers the segment or the grid is left, and a
    /// final voxel that is past `end` (or outside) is dropped.
    ///
    /// ### Returns
    /// An empty list if `start` is outside the grid; a single voxel for a
    /// zero-length segment.
    pub fn get_voxels_line(&self, start: Vec3, end: Vec3) -> Vec<VoxelCoord> {
        let mut voxel = self.pos_to_grid(start);
        if !self.is_in_grid(voxel) {
            return Vec::new();
        }
        let mut out = vec![voxel];

        let delta = end - start;
        let len2 = delta.length_squared();
        let min_step = self.scale * MIN_STEP;
        if len2 <= min_step * min_step {
            return out;
        }
        let dir = delta / len2.sqrt();

        // Only faces the direction points toward can be crossed.
        let mut faces = [IVec3::ZERO; 3];
        let mut face_count = 0;
        for n in FACES {
            if n.as_vec3().dot(dir) > 0.0 {
                faces[face_count] = n;
                face_count += 1;
            }
        }
        let faces = &faces[..face_count];

        let d = self.dimensions;
        let max_steps = (d.x + d.y + d.z) as usize + 3;
        let mut cursor = start;
        let mut travelled = 0.0f32;

        for _ in 0..max_steps {
            // Nearest boundary among the faces ahead of the cursor.
            let mut best: Option<(f32, IVec3)> = None;
            for &n in faces {
                let axis = axis_of(n);
                let mut plane = self.grid_to_pos(voxel + n)[axis];
                if n[axis] < 0 {
                    plane += self.scale * NEGATIVE_FACE_BIAS;
                }
                let mut m = (plane - cursor[axis]) / dir[axis];
                // Already on the boundary: nudge forward so the walk advances.
                if m <= 0.0 {
                    m = min_step;
                }
                if best.is_none_or(|(best_m, _)| m < best_m) {
                    best = Some((m, n));
                }
            }
            let Some((m, n)) = best else {
                break;
            };

            cursor += dir * m;
            travelled += m;
            voxel += n;
            out.push(voxel);

            if travelled * travelled >= len2 || !self.is_in_grid(voxel) {
                break;
            }
        }

        // The last step may overshoot `end` or leave the grid.
        if out.len() > 1
            && let Some(&last) = out.last()
            && (last != self.pos_to_grid(end) || !self.is_in_grid(last))
        {
            out.pop();
        }
        out
    }

    /// `true` iff every voxel on the traversal `a -> b` is occupied.
    /// An empty traversal is not occluded.
    pub fn line_occluded(&self, a: Vec3, b: Vec3) -> bool {
        let voxels = self.get_voxels_line(a, b);
        !voxels.is_empty() && voxels.iter().all(|&v| self.is_occupied(v))
    }

    pub fn is_occupied(&self, v: VoxelCoord) -> bool {
        self.voxel(v).is_some_and(|vox| !vox.occupancy.is_empty())
    }

    /// Occupancy references of `v`; empty outside the grid.
    pub fn occupancy(&self, v: VoxelCoord) -> &[SegmentId] {
        self.voxel(v).map(|vox| vox.occupancy.as_slice()).unwrap_or(&[])
    }

    /// Adds `reference` to the occupancy set of voxel `v`.
    pub fn occupy_slot(&mut self, v: VoxelCoord, reference: SegmentId) -> Result<(), GridError> {
        let Some(idx) = self.index(v) else {
            return self.reject(v);
        };
        let refs = &mut self.voxels[idx].occupancy;
        if let Err(at) = refs.binary_search(&reference) {
            refs.insert(at, reference);
        }
        Ok(())
    }

    pub fn occupy_pos(&mut self, p: Vec3, reference: SegmentId) -> Result<(), GridError> {
        self.occupy_slot(self.pos_to_grid(p), reference)
    }

    /// Occupies every voxel on the traversal `a -> b`.
    ///
    /// In strict mode an endpoint outside the grid fails before anything is
    /// written; in lenient mode the in-grid part of the line is occupied,
    /// whichever end lies outside.
    pub fn occupy_line(&mut self, a: Vec3, b: Vec3, reference: SegmentId) -> Result<(), GridError> {
        for endpoint in [a, b] {
            let v = self.pos_to_grid(endpoint);
            if !self.is_in_grid(v) {
                self.reject(v)?;
            }
        }
        let Some((a, b)) = self.clip_to_grid(a, b) else {
            return Ok(());
        };
        for v in self.get_voxels_line(a, b) {
            self.occupy_slot(v, reference)?;
        }
        Ok(())
    }

    /// Part of the segment `a -> b` inside the grid box, pulled in from the
    /// faces by a small inset so both ends floor to in-grid voxels.
    ///
    /// ### Returns
    /// `None` if the segment misses the grid.
    pub fn clip_to_grid(&self, a: Vec3, b: Vec3) -> Option<(Vec3, Vec3)> {
        let inset = self.scale * CLIP_INSET;
        let far = self.back_bottom_left + self.dimensions.as_vec3() * self.scale;
        let lo = self.back_bottom_left + Vec3::splat(inset);
        let hi = far - Vec3::splat(inset);
        let delta = b - a;

        // Slab test: shrink [t0, t1] axis by axis.
        let (mut t0, mut t1) = (0.0f32, 1.0f32);
        for axis in 0..3 {
            if delta[axis].abs() <= f32::EPSILON {
                // Parallel to this slab: inside the grid or nowhere.
                if a[axis] < self.back_bottom_left[axis] || a[axis] >= far[axis] {
                    return None;
                }
                continue;
            }
            let ta = (lo[axis] - a[axis]) / delta[axis];
            let tb = (hi[axis] - a[axis]) / delta[axis];
            t0 = t0.max(ta.min(tb));
            t1 = t1.min(ta.max(tb));
            if t0 > t1 {
                return None;
            }
        }
        let start = if t0 > 0.0 { a + delta * t0 } else { a };
        let end = if t1 < 1.0 { a + delta * t1 } else { b };
        Some((start, end))
    }

    /// In strict mode, fails on the first point outside the grid. Lenient
    /// grids accept anything here and skip out-of-grid voxels on write.
    pub fn check_points(&self, points: &[Vec3]) -> Result<(), GridError> {
        if self.mode == GridMode::Lenient {
            return Ok(());
        }
        for &p in points {
            let v = self.pos_to_grid(p);
            if !self.is_in_grid(v) {
                return self.reject(v);
            }
        }
        Ok(())
    }

    /// Occupies every edge of a polyline; a single point occupies its voxel.
    pub fn occupy_path(&mut self, points: &[Vec3], reference: SegmentId) -> Result<(), GridError> {
        if let [p] = points {
            return self.occupy_pos(*p, reference);
        }
        for w in points.windows(2) {
            self.occupy_line(w[0], w[1], reference)?;
        }
        Ok(())
    }

    fn reject(&self, v: VoxelCoord) -> Result<(), GridError> {
        match self.mode {
            GridMode::Strict => Err(GridError::OutOfGrid {
                voxel: v,
                dimensions: self.dimensions,
            }),
            GridMode::Lenient => {
                warn!(voxel = ?v, dimensions = ?self.dimensions, "ignoring out-of-grid write");
                Ok(())
            }
        }
    }

    /// Allocates a fresh strand id.
    pub fn register_strand(&mut self) -> StrandId {
        let id = self.next_strand;
        self.next_strand += 1;
        id
    }

    fn push_segments(&mut self, strand: StrandId, points: &[Vec3]) -> Vec<SegmentId> {
        let edges: Vec<(Vec3, Vec3)> = match points {
            [] => Vec::new(),
            [p] => vec![(*p, *p)],
            _ => points.windows(2).map(|w| (w[0], w[1])).collect(),
        };
        edges
            .into_iter()
            .enumerate()
            .map(|(index, (a, b))| {
                let id = self.segments.len();
                self.segments.push(Segment {
                    strand,
                    a,
                    b,
                    index,
                });
                id
            })
            .collect()
    }

    /// Records a finished strand: one segment per edge, each occupying the
    /// voxels along it so later strands avoid them.
    ///
    /// In strict mode a strand with any point outside the grid is rejected
    /// before a segment or voxel is written.
    pub fn commit_strand(&mut self, strand: StrandId, points: &[Vec3]) -> Result<(), GridError> {
        self.check_points(points)?;
        for id in self.push_segments(strand, points) {
            let seg = self.segments[id];
            self.occupy_line(seg.a, seg.b, id)?;
        }
        Ok(())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id)
    }

    /// Registers `points` as a field source evaluated with `model`.
    ///
    /// Each edge is appended to the segment table and listed in the reach
    /// of every voxel whose sample position lies within the model cutoff.
    /// Values are not computed here; [`Grid::field_value`] does that lazily.
    /// A strand id can only carry one field source.
    pub fn add_field_source(&mut self, strand: StrandId, points: &[Vec3], model: ImplicitModel) {
        if points.is_empty() {
            return;
        }
        if self.sources.contains_key(&strand) {
            warn!(strand, "field source already registered; ignoring");
            return;
        }

        let cutoff = model.cutoff();
        let reach = Vec3::splat(cutoff);
        for id in self.push_segments(strand, points) {
            let Segment { a, b, .. } = self.segments[id];
            let lo = self.pos_to_grid(a.min(b) - reach).max(IVec3::ZERO);
            let hi = (self.pos_to_grid(a.max(b) + reach) + IVec3::ONE).min(self.dimensions - 1);
            for z in lo.z..=hi.z {
                for y in lo.y..=hi.y {
                    for x in lo.x..=hi.x {
                        let v = IVec3::new(x, y, z);
                        if distance_to_segment(self.grid_to_pos(v), a, b) >= cutoff {
                            continue;
                        }
                        if let Some(idx) = self.index(v) {
                            self.voxels[idx].reach.push(id);
                        }
                    }
                }
            }
        }

        self.sources.insert(
            strand,
            FieldSource {
                points: points.to_vec(),
                model,
                overshoot: self.path_overshoot,
            },
        );
        self.cache.invalidate();
    }

    /// Density at voxel `v`, evaluated on first use after any change.
    ///
    /// Each strand reaching the voxel contributes once, through the
    /// path form of its model with the first reaching segment as hint.
    /// Outside the grid the field is `0`.
    pub fn field_value(&mut self, v: VoxelCoord) -> f32 {
        let Some(idx) = self.index(v) else {
            return 0.0;
        };
        if self.cache.is_current(idx) {
            return self.cache.value(idx);
        }

        let pos = self.grid_to_pos(v);
        for &seg_id in &self.voxels[idx].reach {
            let seg = &self.segments[seg_id];
            if self.cache.contributed(idx, seg.strand) {
                continue;
            }
            let Some(source) = self.sources.get(&seg.strand) else {
                continue;
            };
            let contribution = source
                .model
                .eval_path(pos, &source.points, seg.index, source.overshoot);
            self.cache.add(idx, seg.strand, contribution);
        }
        self.cache.mark_checked(idx);
        self.cache.value(idx)
    }

    /// Drops every field source and cached value. Occupancy and the segment
    /// table are left intact.
    pub fn clear_field(&mut self) {
        for voxel in &mut self.voxels {
            voxel.reach.clear();
        }
        self.sources.clear();
        self.cache.clear();
    }

    /// Density sampled at the voxel containing `p`.
    pub fn field_value_at(&mut self, p: Vec3) -> f32 {
        self.field_value(self.pos_to_grid(p))
    }

    /// Brings every voxel of the field up to date.
    pub fn fill_field(&mut self) {
        for idx in 0..self.voxels.len() {
            let v = self.coord_of(idx);
            self.field_value(v);
        }
    }

    /// Non-empty voxels for external inspection.
    pub fn export_voxels(&mut self, mode: ExportMode) -> Vec<VoxelRecord> {
        self.fill_field();
        let mut out = Vec::new();
        for idx in 0..self.voxels.len() {
            let value = self.cache.value(idx);
            let occupancy = self.voxels[idx].occupancy.len();
            let keep = match mode {
                ExportMode::Field => value != 0.0,
                ExportMode::Occupancy => occupancy > 0,
                ExportMode::Both => value != 0.0 || occupancy > 0,
            };
            if keep {
                out.push(VoxelRecord {
                    coord: self.coord_of(idx).to_array(),
                    value,
                    occupancy,
                });
            }
        }
        out
    }

    /// Writes [`Grid::export_voxels`] as a JSON array.
    pub fn write_voxels_json<W: Write>(
        &mut self,
        writer: W,
        mode: ExportMode,
    ) -> Result<(), serde_json::Error> {
        let records = self.export_voxels(mode);
        serde_json::to_writer(writer, &records)
    }
}

#[inline]
fn axis_of(n: IVec3) -> usize {
    if n.x != 0 {
        0
    } else if n.y != 0 {
        1
    } else {
        2
    }
}
