use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, types::SensorGeometry};

/// Which depth samples reach the point cloud.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionMode {
    /// Every sample, regardless of body tracking.
    #[default]
    Unfiltered,
    /// Only samples that pass the body filter.
    BodyFiltered,
}

/// How `ProjectionMode::BodyFiltered` decides that a pixel belongs to a person.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyFilter {
    /// Drop pixels whose body index is the no-body sentinel. Does not consult
    /// the per-body tracked flags, so a pixel tagged with a body slot that is
    /// currently untracked still passes.
    #[default]
    BodyIndexPresent,
    /// Keep a pixel only when its body index names a slot flagged tracked this tick.
    TrackedBodyOnly,
}

/// Row / column step of the projection loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleStride {
    pub rows: u32,
    pub cols: u32,
}

impl SampleStride {
    pub const FULL: SampleStride = SampleStride { rows: 1, cols: 1 };
    /// Every other row, every column.
    pub const PERFORMANCE: SampleStride = SampleStride { rows: 2, cols: 1 };
}

impl Default for SampleStride {
    fn default() -> Self {
        Self::FULL
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorizeMode {
    /// `depth mod 256`: keeps local detail, wraps globally.
    #[default]
    Wrap,
    /// Close is bright: `[min_reliable, max_distance / 80]` onto `[255, 0]`.
    LinearRamp,
    /// Turbo pseudo-color over the same span as `LinearRamp`.
    Turbo,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub geometry: SensorGeometry,
    pub projection: ProjectionMode,
    pub body_filter: BodyFilter,
    pub stride: SampleStride,
    pub colorize: ColorizeMode,
    /// Upper bound of the reliable depth range (mm). Deliberately wider than the
    /// sensor's own reliable maximum.
    pub max_distance_policy: u16,
    pub physics_step: f32,
    pub max_sub_steps: u32,
    pub joint_marker_color: [f32; 3],
    pub render_buffers: usize,
    /// Tick interval between summary log lines.
    pub log_every: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            geometry: SensorGeometry::KINECT_V2,
            projection: ProjectionMode::Unfiltered,
            body_filter: BodyFilter::BodyIndexPresent,
            stride: SampleStride::FULL,
            colorize: ColorizeMode::Wrap,
            max_distance_policy: u16::MAX,
            physics_step: 1.0 / 50.0,
            max_sub_steps: 1000,
            joint_marker_color: [1.0, 0.0, 0.0],
            render_buffers: 2,
            log_every: 120,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.geometry.depth.is_empty() || self.geometry.color.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "grid sizes must be non-empty (depth {}, color {})",
                self.geometry.depth, self.geometry.color
            )));
        }
        if self.stride.rows == 0 || self.stride.cols == 0 {
            return Err(ConfigError::Invalid("stride must be at least 1".into()));
        }
        if self.render_buffers < 2 {
            return Err(ConfigError::Invalid(format!(
                "need at least 2 render buffers, got {}",
                self.render_buffers
            )));
        }
        if !(self.physics_step.is_finite() && self.physics_step > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "physics step must be positive, got {}",
                self.physics_step
            )));
        }
        Ok(())
    }
}
