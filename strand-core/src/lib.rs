//! Strand growth along plant skeletons and implicit surfacing of the result.
//!
//! Main components:
//! - [`skeleton`]: bracket-notation parser, arena trees and skeleton paths.
//! - [`grid`]: voxel lattice with line traversal, occupancy and a lazily
//!   evaluated density field.
//! - [`strand`]: randomized strand growth that avoids occupied voxels.
//! - [`implicit`]: metaball, Blinn and convolution potentials.
//! - [`marching_cubes`]: iso-surface extraction from the grid's field.
//! - [`phases`]: high-level pipeline stages and a full [`phases::run`].
//! - [`config`], [`error`], [`mesh`], [`geometry`], [`field_cache`] and
//!   [`types`]: supporting pieces.

pub mod config;
pub mod error;
pub mod field_cache;
pub mod geometry;
pub mod grid;
pub mod implicit;
pub mod marching_cubes;
mod marching_cubes_tables;
pub mod mesh;
pub mod phases;
pub mod skeleton;
pub mod strand;
pub mod types;
