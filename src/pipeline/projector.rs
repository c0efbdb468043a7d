//! Depth grid to colored point cloud.
//!
//! Each depth row is projected by its own rayon task into the row's slot of
//! the vertex buffer (`width` records, the row's maximum), then a sequential
//! pass compacts the rows to the front. Output order is row-major and does not
//! depend on scheduling.

use rayon::prelude::*;

use crate::{
    config::{BodyFilter, PipelineConfig, ProjectionMode, SampleStride},
    error::ProjectionError,
    pipeline::acquire::{BodyIndexGrid, ColorGrid, DepthGrid},
    sensor::CoordinateMapper,
    types::{BODY_COUNT, DepthSpacePoint, GridSize, NO_BODY, Vertex},
};

/// Fixed-capacity vertex storage with a separate logical length.
#[derive(Clone, Debug)]
pub struct PointCloudBuffer {
    vertices: Vec<Vertex>,
    len: usize,
}

impl PointCloudBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            vertices: vec![Vertex::default(); capacity],
            len: 0,
        }
    }

    pub fn for_grid(depth: GridSize) -> Self {
        Self::with_capacity(depth.len())
    }

    pub fn capacity(&self) -> usize {
        self.vertices.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn as_slice(&self) -> &[Vertex] {
        &self.vertices[..self.len]
    }

    /// Interleaved `x, y, z, r, g, b` floats, ready for upload.
    pub fn as_floats(&self) -> &[f32] {
        bytemuck::cast_slice(self.as_slice())
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_slice())
    }
}

pub struct ProjectionInput<'a> {
    pub depth: DepthGrid<'a>,
    pub color: ColorGrid<'a>,
    pub body_index: Option<BodyIndexGrid<'a>>,
    pub tracked: [bool; BODY_COUNT],
}

#[derive(Clone, Copy)]
enum Guard {
    None,
    BodyIndexPresent,
    TrackedBodyOnly([bool; BODY_COUNT]),
}

impl Guard {
    #[inline]
    fn keeps(&self, body_index: Option<&[u8]>, idx: usize) -> bool {
        let Some(index) = body_index else {
            return true;
        };
        match self {
            Guard::None => true,
            Guard::BodyIndexPresent => index[idx] != NO_BODY,
            Guard::TrackedBodyOnly(tracked) => tracked
                .get(index[idx] as usize)
                .copied()
                .unwrap_or(false),
        }
    }
}

pub struct PointCloudProjector {
    stride: SampleStride,
    mode: ProjectionMode,
    filter: BodyFilter,
    row_counts: Vec<usize>,
}

impl PointCloudProjector {
    pub fn new(depth: GridSize, stride: SampleStride, mode: ProjectionMode, filter: BodyFilter) -> Self {
        Self {
            stride,
            mode,
            filter,
            row_counts: vec![0; depth.height as usize],
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.geometry.depth,
            config.stride,
            config.projection,
            config.body_filter,
        )
    }

    pub fn mode(&self) -> ProjectionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ProjectionMode) {
        self.mode = mode;
    }

    /// Projects every surviving depth sample into `out` and returns the vertex
    /// count. Samples that map outside the color grid, or not at all, are
    /// dropped.
    pub fn project<M>(
        &mut self,
        input: &ProjectionInput<'_>,
        mapper: &M,
        out: &mut PointCloudBuffer,
    ) -> Result<usize, ProjectionError>
    where
        M: CoordinateMapper + ?Sized,
    {
        let depth = input.depth;
        let color = input.color;
        let width = depth.size.width as usize;
        let height = depth.size.height as usize;
        let grid_len = depth.size.len();

        check_grid("depth", depth.data.len(), grid_len)?;
        check_grid("color", color.pixels.len(), color.size.len())?;
        if let Some(body_index) = &input.body_index {
            check_grid("body-index", body_index.data.len(), grid_len)?;
        }
        if out.capacity() < grid_len {
            return Err(ProjectionError::BufferTooSmall {
                capacity: out.capacity(),
                required: grid_len,
            });
        }

        out.clear();
        if grid_len == 0 {
            return Ok(0);
        }

        let guard = match (self.mode, self.filter) {
            (ProjectionMode::Unfiltered, _) => Guard::None,
            (ProjectionMode::BodyFiltered, _) if input.body_index.is_none() => {
                log::debug!("body-index frame unavailable, projecting unfiltered");
                Guard::None
            }
            (ProjectionMode::BodyFiltered, BodyFilter::BodyIndexPresent) => Guard::BodyIndexPresent,
            (ProjectionMode::BodyFiltered, BodyFilter::TrackedBodyOnly) => {
                Guard::TrackedBodyOnly(input.tracked)
            }
        };
        let body_index = input.body_index.map(|grid| grid.data);
        let row_step = self.stride.rows.max(1) as usize;
        let col_step = self.stride.cols.max(1) as usize;

        self.row_counts.clear();
        self.row_counts.resize(height, 0);

        out.vertices[..grid_len]
            .par_chunks_mut(width)
            .zip(self.row_counts.par_iter_mut())
            .enumerate()
            .for_each(|(y, (row, count))| {
                *count = 0;
                if y % row_step != 0 {
                    return;
                }
                let base = y * width;
                for x in (0..width).step_by(col_step) {
                    let idx = base + x;
                    if !guard.keeps(body_index, idx) {
                        continue;
                    }
                    let d = depth.data[idx];
                    let point = DepthSpacePoint {
                        x: x as f32,
                        y: y as f32,
                    };
                    let Some((cx, cy)) = mapper
                        .map_depth_to_color(point, d)
                        .and_then(|p| p.nearest_pixel())
                    else {
                        continue;
                    };
                    if !color.size.contains(cx, cy) {
                        continue;
                    }
                    let Some(position) = mapper
                        .map_depth_to_camera(point, d)
                        .filter(|p| p.is_finite())
                    else {
                        continue;
                    };
                    let sample = color.pixels[cy as usize * color.size.width as usize + cx as usize];
                    row[*count] = Vertex {
                        position: position.to_array(),
                        color: sample.normalized_rgb(),
                    };
                    *count += 1;
                }
            });

        let mut len = 0;
        for (y, &count) in self.row_counts.iter().enumerate() {
            let start = y * width;
            if count > 0 && start != len {
                out.vertices.copy_within(start..start + count, len);
            }
            len += count;
        }
        out.len = len;
        Ok(len)
    }
}

fn check_grid(what: &'static str, got: usize, expected: usize) -> Result<(), ProjectionError> {
    if got != expected {
        return Err(ProjectionError::GridMismatch {
            what,
            got,
            expected,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bgra, CameraSpacePoint, ColorSpacePoint};

    /// Color pixel is the depth pixel times `scale`; zero depth fails.
    struct ScaleMapper {
        scale: f32,
    }

    impl CoordinateMapper for ScaleMapper {
        fn map_depth_to_color(&self, p: DepthSpacePoint, d: u16) -> Option<ColorSpacePoint> {
            (d != 0).then(|| ColorSpacePoint {
                x: p.x * self.scale,
                y: p.y * self.scale,
            })
        }

        fn map_depth_to_camera(&self, p: DepthSpacePoint, d: u16) -> Option<CameraSpacePoint> {
            (d != 0).then(|| CameraSpacePoint::new(p.x, p.y, d as f32 / 1000.0))
        }
    }

    fn color_pixels(size: GridSize) -> Vec<Bgra> {
        (0..size.len())
            .map(|i| Bgra::new((i % 256) as u8, 10, 20))
            .collect()
    }

    fn input<'a>(
        depth: &'a [u16],
        depth_size: GridSize,
        color: &'a [Bgra],
        color_size: GridSize,
        body_index: Option<&'a [u8]>,
    ) -> ProjectionInput<'a> {
        ProjectionInput {
            depth: DepthGrid {
                size: depth_size,
                min_reliable: 500,
                max_reliable: 4500,
                data: depth,
            },
            color: ColorGrid {
                size: color_size,
                pixels: color,
            },
            body_index: body_index.map(|data| BodyIndexGrid {
                size: depth_size,
                data,
            }),
            tracked: [false; BODY_COUNT],
        }
    }

    #[test]
    fn rows_are_compacted_in_order() {
        let size = GridSize::new(3, 3);
        let depth = [1000, 0, 1000, 0, 0, 0, 0, 1000, 1000];
        let color = color_pixels(size);
        let mut out = PointCloudBuffer::for_grid(size);
        let mut projector = PointCloudProjector::new(
            size,
            SampleStride::FULL,
            ProjectionMode::Unfiltered,
            BodyFilter::BodyIndexPresent,
        );

        let count = projector
            .project(
                &input(&depth, size, &color, size, None),
                &ScaleMapper { scale: 1.0 },
                &mut out,
            )
            .unwrap();

        assert_eq!(count, 4);
        let xy: Vec<_> = out
            .as_slice()
            .iter()
            .map(|v| (v.position[0], v.position[1]))
            .collect();
        assert_eq!(xy, vec![(0.0, 0.0), (2.0, 0.0), (1.0, 2.0), (2.0, 2.0)]);
        assert_eq!(out.as_floats().len(), 4 * 6);
    }

    #[test]
    fn stride_skips_rows_and_columns() {
        let size = GridSize::new(4, 4);
        let depth = [1000u16; 16];
        let color = color_pixels(size);
        let mut out = PointCloudBuffer::for_grid(size);
        let mut projector = PointCloudProjector::new(
            size,
            SampleStride { rows: 2, cols: 2 },
            ProjectionMode::Unfiltered,
            BodyFilter::BodyIndexPresent,
        );
        let count = projector
            .project(
                &input(&depth, size, &color, size, None),
                &ScaleMapper { scale: 1.0 },
                &mut out,
            )
            .unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn body_filter_policies() {
        let size = GridSize::new(4, 1);
        let depth = [1000u16; 4];
        let color = color_pixels(size);
        let index = [NO_BODY, 0, 1, 7];
        let mut out = PointCloudBuffer::for_grid(size);
        let mapper = ScaleMapper { scale: 1.0 };

        let mut present = PointCloudProjector::new(
            size,
            SampleStride::FULL,
            ProjectionMode::BodyFiltered,
            BodyFilter::BodyIndexPresent,
        );
        let frame = input(&depth, size, &color, size, Some(&index));
        assert_eq!(present.project(&frame, &mapper, &mut out).unwrap(), 3);

        let mut tracked_only = PointCloudProjector::new(
            size,
            SampleStride::FULL,
            ProjectionMode::BodyFiltered,
            BodyFilter::TrackedBodyOnly,
        );
        let mut frame = input(&depth, size, &color, size, Some(&index));
        frame.tracked[1] = true;
        assert_eq!(tracked_only.project(&frame, &mapper, &mut out).unwrap(), 1);
        assert_eq!(out.as_slice()[0].position[0], 2.0);
    }

    #[test]
    fn missing_body_index_falls_back_to_unfiltered() {
        let size = GridSize::new(2, 2);
        let depth = [1000u16; 4];
        let color = color_pixels(size);
        let mut out = PointCloudBuffer::for_grid(size);
        let mut projector = PointCloudProjector::new(
            size,
            SampleStride::FULL,
            ProjectionMode::BodyFiltered,
            BodyFilter::BodyIndexPresent,
        );
        let count = projector
            .project(
                &input(&depth, size, &color, size, None),
                &ScaleMapper { scale: 1.0 },
                &mut out,
            )
            .unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn undersized_buffer_is_rejected() {
        let size = GridSize::new(2, 2);
        let depth = [1000u16; 4];
        let color = color_pixels(size);
        let mut out = PointCloudBuffer::with_capacity(3);
        let mut projector = PointCloudProjector::new(
            size,
            SampleStride::FULL,
            ProjectionMode::Unfiltered,
            BodyFilter::BodyIndexPresent,
        );
        assert_eq!(
            projector.project(
                &input(&depth, size, &color, size, None),
                &ScaleMapper { scale: 1.0 },
                &mut out,
            ),
            Err(ProjectionError::BufferTooSmall {
                capacity: 3,
                required: 4
            })
        );
    }

    #[test]
    fn non_finite_color_coordinates_are_dropped() {
        struct NanMapper;
        impl CoordinateMapper for NanMapper {
            fn map_depth_to_color(&self, _: DepthSpacePoint, _: u16) -> Option<ColorSpacePoint> {
                Some(ColorSpacePoint {
                    x: f32::NAN,
                    y: f32::NEG_INFINITY,
                })
            }
            fn map_depth_to_camera(&self, p: DepthSpacePoint, _: u16) -> Option<CameraSpacePoint> {
                Some(CameraSpacePoint::new(p.x, p.y, 1.0))
            }
        }

        let size = GridSize::new(2, 2);
        let depth = [1000u16; 4];
        let color = color_pixels(size);
        let mut out = PointCloudBuffer::for_grid(size);
        let mut projector = PointCloudProjector::new(
            size,
            SampleStride::FULL,
            ProjectionMode::Unfiltered,
            BodyFilter::BodyIndexPresent,
        );
        let count = projector
            .project(&input(&depth, size, &color, size, None), &NanMapper, &mut out)
            .unwrap();
        assert_eq!(count, 0);
        assert!(out.is_empty());
    }
}
