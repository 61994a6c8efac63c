//! Error types for strand-core.

use crate::types::VoxelCoord;
use thiserror::Error;

/// Malformed skeleton text. Fatal to the parse that produced it.
///
/// `offset` is the byte offset of the offending token in the input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("skeleton input is empty")]
    Empty,

    #[error("expected '(' to open the root point at offset {offset}")]
    MissingRootOpen { offset: usize },

    #[error("point opened at offset {offset} is missing its closing ')'")]
    UnclosedPoint { offset: usize },

    #[error("point at offset {offset} has {found} coordinates, expected 3")]
    WrongArity { offset: usize, found: usize },

    #[error("invalid number '{text}' at offset {offset}")]
    InvalidNumber { offset: usize, text: String },

    #[error("']' at offset {offset} has no matching '['")]
    UnbalancedClose { offset: usize },

    #[error("{open} branch(es) still open at end of input")]
    UnclosedBranch { open: usize },

    #[error("unexpected '{token}' at offset {offset}")]
    Unexpected { offset: usize, token: String },
}

/// Failure loading a skeleton from disk.
#[derive(Error, Debug)]
pub enum SkeletonError {
    #[error("failed to read skeleton file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed skeleton '{path}': {source}")]
    Format {
        path: String,
        #[source]
        source: FormatError,
    },
}

/// Voxel addressing failures. Only surfaced by grids in strict mode.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("voxel {voxel} lies outside the grid (dimensions {dimensions})")]
    OutOfGrid {
        voxel: VoxelCoord,
        dimensions: VoxelCoord,
    },
}

/// Invalid parameters or unreadable configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {section} configuration: {message}")]
    Invalid {
        section: &'static str,
        message: String,
    },

    #[error("failed to read configuration '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn invalid(section: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            section,
            message: message.into(),
        }
    }
}

/// Any failure of a full pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Grid(#[from] GridError),
}
