use rayon::prelude::*;
use yuv::{YuvPackedImage, YuvRange, YuvStandardMatrix, yuyv422_to_bgra};

use crate::{
    error::FrameError,
    sensor::{ColorFormat, ColorFrameRef},
    types::{Bgra, Modality},
};

/// Reinterprets a native BGRA frame without copying.
pub fn bgra_view<'a>(frame: &ColorFrameRef<'a>) -> Result<&'a [Bgra], FrameError> {
    let data = checked_payload(frame)?;
    bytemuck::try_cast_slice(data).map_err(|err| FrameError::Conversion(format!("{err:?}")))
}

/// Converts any supported color format into `dst`, which must hold exactly one
/// pixel per grid cell.
pub fn convert_into(frame: &ColorFrameRef<'_>, dst: &mut [Bgra]) -> Result<(), FrameError> {
    if dst.len() != frame.size.len() {
        return Err(FrameError::Truncated {
            modality: Modality::Color,
            got: dst.len(),
            expected: frame.size.len(),
        });
    }
    let data = checked_payload(frame)?;

    match frame.format {
        ColorFormat::Bgra => dst.copy_from_slice(bytemuck::cast_slice(data)),
        ColorFormat::Rgba => rgba_to_bgra(data, dst),
        ColorFormat::Yuy2 => yuy2_to_bgra(data, frame, dst)?,
        ColorFormat::Gray => gray_to_bgra(data, dst),
    }
    Ok(())
}

fn checked_payload<'a>(frame: &ColorFrameRef<'a>) -> Result<&'a [u8], FrameError> {
    let expected_len = frame.size.len() * frame.format.bytes_per_pixel();
    if frame.data.len() < expected_len {
        return Err(FrameError::Truncated {
            modality: Modality::Color,
            got: frame.data.len(),
            expected: expected_len,
        });
    }
    Ok(&frame.data[..expected_len])
}

fn rgba_to_bgra(data: &[u8], dst: &mut [Bgra]) {
    dst.par_iter_mut()
        .zip(data.par_chunks_exact(4))
        .for_each(|(dst, src)| {
            *dst = Bgra {
                b: src[2],
                g: src[1],
                r: src[0],
                a: src[3],
            };
        });
}

fn yuy2_to_bgra(data: &[u8], frame: &ColorFrameRef<'_>, dst: &mut [Bgra]) -> Result<(), FrameError> {
    let width = frame.size.width;
    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height: frame.size.height,
    };

    yuyv422_to_bgra(
        &packed,
        bytemuck::cast_slice_mut(dst),
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| FrameError::Conversion(format!("YUY2→BGRA failed: {err:?}")))
}

fn gray_to_bgra(data: &[u8], dst: &mut [Bgra]) {
    dst.par_iter_mut()
        .zip(data.par_iter().copied())
        .for_each(|(dst, value)| *dst = Bgra::gray(value));
}
