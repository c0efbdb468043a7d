//! Depth-sensor point cloud pipeline.
//!
//! Acquires color, depth, body-index and skeleton streams from a depth sensor,
//! projects depth samples into colored camera-space vertices and hands the
//! result, together with tracked-joint physics proxies, to a renderer.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod scene;
pub mod sensor;
pub mod types;

pub use config::PipelineConfig;
pub use pipeline::{TickOutcome, TickRunner, TickStats};
