//! Run configuration for the growth and surfacing pipeline.
//!
//! Every section deserializes from JSON with per-field defaults, so a
//! configuration file only has to name the options it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, implicit::ImplicitModel};

/// Non-improving path segments tolerated when locating the nearest one.
pub const DEFAULT_PATH_OVERSHOOT: usize = 3;

/// Grid sizing and addressing policy.
///
/// When `dimensions` or `center` are absent the grid is fitted around the
/// skeleton bounds, padded by `margin` on every side.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub dimensions: Option<[i32; 3]>,
    pub scale: f32,
    pub center: Option<[f32; 3]>,
    pub margin: f32,
    /// Fail on out-of-grid writes instead of logging and ignoring them.
    pub strict: bool,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            dimensions: None,
            scale: 0.05,
            center: None,
            margin: 0.25,
            strict: false,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.scale > 0.0) {
            return Err(ConfigError::invalid("grid", "scale must be positive"));
        }
        if self.margin < 0.0 {
            return Err(ConfigError::invalid("grid", "margin must not be negative"));
        }
        if let Some(d) = self.dimensions
            && d.iter().any(|&n| n <= 0)
        {
            return Err(ConfigError::invalid("grid", "dimensions must be positive"));
        }
        Ok(())
    }
}

/// Parameters of the strand grower.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthConfig {
    /// Length of every committed strand step.
    pub segment_length: f32,
    /// Candidate directions sampled per step.
    pub num_trials: usize,
    /// Half-angle of the sampling cone around the canonical direction.
    pub max_angle_degrees: f32,
    /// Weight of the distance score against the angle score.
    pub alpha: f32,
    /// Strands grown per run.
    pub strand_count: usize,
    /// Hard cap on steps per strand.
    pub max_steps: usize,
    /// Radius of the random offset applied to a strand's starting point.
    pub start_spread: f32,
    /// Seed for the run's generator; entropy when absent.
    pub seed: Option<u64>,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            segment_length: 0.1,
            num_trials: 16,
            max_angle_degrees: 35.0,
            alpha: 0.6,
            strand_count: 64,
            max_steps: 4096,
            start_spread: 0.0,
            seed: None,
        }
    }
}

impl GrowthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.segment_length > 0.0) {
            return Err(ConfigError::invalid(
                "growth",
                "segment_length must be positive",
            ));
        }
        if self.num_trials == 0 {
            return Err(ConfigError::invalid("growth", "num_trials must be at least 1"));
        }
        if !(self.max_angle_degrees > 0.0 && self.max_angle_degrees <= 180.0) {
            return Err(ConfigError::invalid(
                "growth",
                "max_angle_degrees must lie in (0, 180]",
            ));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(ConfigError::invalid("growth", "alpha must lie in [0, 1]"));
        }
        if self.start_spread < 0.0 {
            return Err(ConfigError::invalid(
                "growth",
                "start_spread must not be negative",
            ));
        }
        Ok(())
    }
}

/// Named options of the implicit model used for the density field.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ModelConfig {
    Metaballs {
        max_val: f32,
        range: f32,
    },
    Blinn {
        radius: f32,
        blobiness: f32,
        cutoff_val: f32,
    },
    Convolution {
        sharpness: f32,
        cutoff: f32,
    },
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig::Metaballs {
            max_val: 1.0,
            range: 0.12,
        }
    }
}

impl ModelConfig {
    pub fn build(&self) -> Result<ImplicitModel, ConfigError> {
        match *self {
            ModelConfig::Metaballs { max_val, range } => ImplicitModel::metaballs(max_val, range),
            ModelConfig::Blinn {
                radius,
                blobiness,
                cutoff_val,
            } => ImplicitModel::blinn(radius, blobiness, cutoff_val),
            ModelConfig::Convolution { sharpness, cutoff } => {
                ImplicitModel::convolution(sharpness, cutoff)
            }
        }
    }
}

/// Density field and surface extraction options.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    pub model: ModelConfig,
    pub threshold: f32,
    /// Also splat the skeleton paths into the field.
    pub include_skeleton: bool,
    pub surface_color: [f32; 3],
    /// Non-improving segments tolerated by the nearest-segment search
    /// during field evaluation.
    pub overshoot: usize,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            threshold: 0.5,
            include_skeleton: false,
            surface_color: [0.85, 0.78, 0.62],
            overshoot: DEFAULT_PATH_OVERSHOOT,
        }
    }
}

/// Complete configuration of one pipeline run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub grid: GridConfig,
    pub growth: GrowthConfig,
    pub field: FieldConfig,
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: PipelineConfig = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        self.growth.validate()?;
        self.field.model.build()?;
        Ok(())
    }
}
