//! Depth-to-intensity mappings for the depth preview.

use rayon::prelude::*;

use crate::{
    config::ColorizeMode,
    error::ProjectionError,
    pipeline::acquire::DepthGrid,
    types::Bgra,
};

/// Divisor applied to the maximum distance policy to get the far end of the
/// linear ramp.
pub const RAMP_DIVISOR: u16 = 80;

#[derive(Clone, Copy, Debug)]
pub struct DepthColorizer {
    pub mode: ColorizeMode,
    pub max_distance_policy: u16,
}

impl Default for DepthColorizer {
    fn default() -> Self {
        Self {
            mode: ColorizeMode::Wrap,
            max_distance_policy: u16::MAX,
        }
    }
}

impl DepthColorizer {
    pub fn new(mode: ColorizeMode, max_distance_policy: u16) -> Self {
        Self {
            mode,
            max_distance_policy,
        }
    }

    /// Writes one opaque pixel per depth sample into `out`.
    pub fn colorize(&self, depth: &DepthGrid<'_>, out: &mut [Bgra]) -> Result<(), ProjectionError> {
        if out.len() != depth.data.len() {
            return Err(ProjectionError::GridMismatch {
                what: "depth preview",
                got: out.len(),
                expected: depth.data.len(),
            });
        }

        let min = depth.min_reliable;
        let max = self.max_distance_policy;
        let mode = self.mode;
        out.par_iter_mut()
            .zip(depth.data.par_iter().copied())
            .for_each(|(px, d)| {
                *px = if d < min || d > max {
                    Bgra::BLACK
                } else {
                    match mode {
                        ColorizeMode::Wrap => Bgra::gray(wrap_intensity(d)),
                        ColorizeMode::LinearRamp => Bgra::gray(ramp_intensity(d, min, max)),
                        ColorizeMode::Turbo => turbo(ramp_position(d, min, max)),
                    }
                };
            });
        Ok(())
    }
}

pub fn wrap_intensity(depth: u16) -> u8 {
    (depth % 256) as u8
}

/// Maps `[min_reliable, max_distance_policy / 80]` onto `[255, 0]`, clamping
/// anything farther to 0.
pub fn ramp_intensity(depth: u16, min_reliable: u16, max_distance_policy: u16) -> u8 {
    let end = max_distance_policy / RAMP_DIVISOR;
    if depth <= min_reliable {
        return 255;
    }
    if depth >= end {
        return 0;
    }
    let span = u32::from(end - min_reliable);
    let offset = u32::from(depth - min_reliable);
    (255 - offset * 255 / span) as u8
}

/// Position along the ramp span, `0.0` near and `1.0` at or beyond the far end.
fn ramp_position(depth: u16, min_reliable: u16, max_distance_policy: u16) -> f32 {
    1.0 - ramp_intensity(depth, min_reliable, max_distance_policy) as f32 / 255.0
}

/// Turbo colormap (blue near, red far), polynomial approximation.
#[inline]
fn turbo(t: f32) -> Bgra {
    let r = (0.13572138
        + t * (4.6153926 + t * (-42.66032 + t * (132.13108 + t * (-152.54825 + t * 59.28144)))))
        .clamp(0.0, 1.0);
    let g = (0.09140261
        + t * (2.19418 + t * (4.84296 + t * (-14.18503 + t * (4.27805 + t * 2.53377)))))
        .clamp(0.0, 1.0);
    let b = (0.1066733
        + t * (12.64194 + t * (-60.58204 + t * (109.99648 + t * (-82.52904 + t * 20.43388)))))
        .clamp(0.0, 1.0);
    Bgra::new((r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8)
}
