use std::path::PathBuf;

use thiserror::Error;

use crate::types::{GridSize, Modality};

/// Device-level failure reported by a sensor backend.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct DeviceError(pub String);

impl DeviceError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Fatal errors raised while bringing the sensor session up.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no depth sensor available")]
    DeviceUnavailable,
    #[error("failed to open depth sensor: {0}")]
    OpenFailed(#[source] DeviceError),
    #[error("coordinate mapper unavailable")]
    MappingUnavailable,
}

/// Why the multi-source reader could not hand out a snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReaderError {
    #[error("no new frame since the last acquisition")]
    NotReady,
    #[error("frame reader failed: {0}")]
    Failed(String),
}

/// Tick-level acquisition failure. Recoverable: the tick is skipped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcquireError {
    #[error("sensor session is not open")]
    NotInitialized,
    #[error("acquire latest frame failed: {0}")]
    AcquireFailed(#[from] ReaderError),
}

/// Per-modality failure. Only that modality degrades for the tick.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("{0} frame unavailable")]
    Unavailable(Modality),
    #[error("{modality} frame is {actual}, expected {expected}")]
    SizeMismatch {
        modality: Modality,
        expected: GridSize,
        actual: GridSize,
    },
    #[error("{modality} buffer too small: got {got}, expected {expected}")]
    Truncated {
        modality: Modality,
        got: usize,
        expected: usize,
    },
    #[error("{modality} frame reports {count} bodies, at most {max} supported")]
    TooManyBodies {
        modality: Modality,
        count: usize,
        max: usize,
    },
    #[error("color conversion failed: {0}")]
    Conversion(String),
}

impl FrameError {
    pub fn modality(&self) -> Modality {
        match self {
            FrameError::Unavailable(modality)
            | FrameError::SizeMismatch { modality, .. }
            | FrameError::Truncated { modality, .. }
            | FrameError::TooManyBodies { modality, .. } => *modality,
            FrameError::Conversion(_) => Modality::Color,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("point cloud capacity {capacity} is below the depth grid size {required}")]
    BufferTooSmall { capacity: usize, required: usize },
    #[error("{what} grid holds {got} samples, expected {expected}")]
    GridMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}
