use glam::IVec3;

/// Identifier for a node in a [`crate::skeleton::Tree`].
///
/// This is an index into `Tree::nodes`, and is only meaningful within
/// the lifetime of a given `Tree` instance.
pub type NodeId = usize;

/// Identifier of a polyline registered with a [`crate::grid::Grid`]
/// (a grown strand or a skeleton path used as a field source).
pub type StrandId = usize;

/// Index into the grid's append-only segment table.
pub type SegmentId = usize;

/// Integer voxel coordinate. Valid coordinates lie in `0..dimensions`
/// on every axis, but traversal code may produce out-of-grid values.
pub type VoxelCoord = IVec3;
