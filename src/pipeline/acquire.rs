//! Per-tick ingest of the four modalities into fixed scratch buffers.

use crate::{
    error::FrameError,
    pipeline::{color_converter, skeleton::SkeletonSet},
    sensor::{ColorFormat, Snapshot},
    types::{Bgra, GridSize, Modality, SensorGeometry},
};

#[derive(Clone, Copy, Debug)]
pub struct ColorGrid<'a> {
    pub size: GridSize,
    pub pixels: &'a [Bgra],
}

#[derive(Clone, Copy, Debug)]
pub struct DepthGrid<'a> {
    pub size: GridSize,
    pub min_reliable: u16,
    pub max_reliable: u16,
    pub data: &'a [u16],
}

#[derive(Clone, Copy, Debug)]
pub struct BodyIndexGrid<'a> {
    pub size: GridSize,
    pub data: &'a [u8],
}

/// What one tick managed to ingest. Each modality fails on its own.
pub struct TickFrames<'a> {
    pub color: Result<ColorGrid<'a>, FrameError>,
    pub depth: Result<DepthGrid<'a>, FrameError>,
    pub body_index: Result<BodyIndexGrid<'a>, FrameError>,
    pub skeleton: Result<&'a SkeletonSet, FrameError>,
}

/// Owns the scratch buffer of every modality. All buffers are sized once for
/// the native grids and never reallocated.
pub struct FrameAcquirer {
    geometry: SensorGeometry,
    color: Vec<Bgra>,
    depth: Vec<u16>,
    body_index: Vec<u8>,
    skeleton: SkeletonSet,
}

impl FrameAcquirer {
    pub fn new(geometry: SensorGeometry, marker_color: [f32; 3]) -> Self {
        Self {
            geometry,
            color: vec![Bgra::BLACK; geometry.color.len()],
            depth: vec![0; geometry.depth.len()],
            body_index: vec![0; geometry.depth.len()],
            skeleton: SkeletonSet::new(marker_color),
        }
    }

    pub fn geometry(&self) -> SensorGeometry {
        self.geometry
    }

    pub fn skeleton(&self) -> &SkeletonSet {
        &self.skeleton
    }

    /// Pulls every modality out of `snapshot` in parallel. The returned views
    /// borrow both the snapshot and the scratch buffers, so the snapshot stays
    /// alive until the caller is done with them.
    pub fn ingest<'a, S>(&'a mut self, snapshot: &'a S) -> TickFrames<'a>
    where
        S: Snapshot + ?Sized,
    {
        let geometry = self.geometry;
        let Self {
            color,
            depth,
            body_index,
            skeleton,
            ..
        } = self;

        let ((color, depth), (body_index, skeleton)) = rayon::join(
            move || {
                rayon::join(
                    move || acquire_color(snapshot, geometry.color, color),
                    move || acquire_depth(snapshot, geometry.depth, depth),
                )
            },
            move || {
                rayon::join(
                    move || acquire_body_index(snapshot, geometry.depth, body_index),
                    move || acquire_skeleton(snapshot, skeleton),
                )
            },
        );

        for err in [
            color.as_ref().err(),
            depth.as_ref().err(),
            body_index.as_ref().err(),
            skeleton.as_ref().err(),
        ]
        .into_iter()
        .flatten()
        {
            log::debug!("{} frame degraded this tick: {err}", err.modality());
        }

        TickFrames {
            color,
            depth,
            body_index,
            skeleton,
        }
    }
}

fn check_size(modality: Modality, expected: GridSize, actual: GridSize) -> Result<(), FrameError> {
    if expected != actual {
        return Err(FrameError::SizeMismatch {
            modality,
            expected,
            actual,
        });
    }
    Ok(())
}

fn check_len(modality: Modality, got: usize, expected: usize) -> Result<(), FrameError> {
    if got < expected {
        return Err(FrameError::Truncated {
            modality,
            got,
            expected,
        });
    }
    Ok(())
}

fn acquire_color<'a, S>(
    snapshot: &'a S,
    expected: GridSize,
    scratch: &'a mut Vec<Bgra>,
) -> Result<ColorGrid<'a>, FrameError>
where
    S: Snapshot + ?Sized,
{
    let frame = snapshot
        .color()
        .ok_or(FrameError::Unavailable(Modality::Color))?;
    check_size(Modality::Color, expected, frame.size)?;

    let pixels = match frame.format {
        ColorFormat::Bgra => color_converter::bgra_view(&frame)?,
        _ => {
            color_converter::convert_into(&frame, scratch)?;
            &scratch[..]
        }
    };
    Ok(ColorGrid {
        size: expected,
        pixels,
    })
}

fn acquire_depth<'a, S>(
    snapshot: &S,
    expected: GridSize,
    scratch: &'a mut Vec<u16>,
) -> Result<DepthGrid<'a>, FrameError>
where
    S: Snapshot + ?Sized,
{
    let frame = snapshot
        .depth()
        .ok_or(FrameError::Unavailable(Modality::Depth))?;
    check_size(Modality::Depth, expected, frame.size)?;
    check_len(Modality::Depth, frame.data.len(), scratch.len())?;

    let len = scratch.len();
    scratch.copy_from_slice(&frame.data[..len]);
    Ok(DepthGrid {
        size: expected,
        min_reliable: frame.min_reliable,
        max_reliable: frame.max_reliable,
        data: &scratch[..],
    })
}

fn acquire_body_index<'a, S>(
    snapshot: &S,
    expected: GridSize,
    scratch: &'a mut Vec<u8>,
) -> Result<BodyIndexGrid<'a>, FrameError>
where
    S: Snapshot + ?Sized,
{
    let frame = snapshot
        .body_index()
        .ok_or(FrameError::Unavailable(Modality::BodyIndex))?;
    check_size(Modality::BodyIndex, expected, frame.size)?;
    check_len(Modality::BodyIndex, frame.data.len(), scratch.len())?;

    let len = scratch.len();
    scratch.copy_from_slice(&frame.data[..len]);
    Ok(BodyIndexGrid {
        size: expected,
        data: &scratch[..],
    })
}

fn acquire_skeleton<'a, S>(
    snapshot: &S,
    skeleton: &'a mut SkeletonSet,
) -> Result<&'a SkeletonSet, FrameError>
where
    S: Snapshot + ?Sized,
{
    let bodies = snapshot
        .bodies()
        .ok_or(FrameError::Unavailable(Modality::Body))?;
    skeleton.refresh(&bodies)?;
    Ok(&*skeleton)
}
