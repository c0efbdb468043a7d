use crate::types::{
    CameraSpacePoint, ColorSpacePoint, DepthSpacePoint, GridSize, KINECT_COLOR_HEIGHT,
    KINECT_COLOR_WIDTH, KINECT_DEPTH_HEIGHT, KINECT_DEPTH_WIDTH, SensorGeometry,
};

/// Translates between depth-grid, color-grid and camera-space coordinates.
///
/// Both mappings can fail (`None`) or land outside the color grid; callers
/// check either outcome.
pub trait CoordinateMapper: Send + Sync {
    fn map_depth_to_color(&self, point: DepthSpacePoint, depth_mm: u16)
    -> Option<ColorSpacePoint>;

    fn map_depth_to_camera(
        &self,
        point: DepthSpacePoint,
        depth_mm: u16,
    ) -> Option<CameraSpacePoint>;
}

/// Pinhole camera intrinsics in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    /// Depth (IR) camera at 512x424.
    pub const KINECT_V2_DEPTH: Intrinsics = Intrinsics {
        fx: 365.456,
        fy: 365.456,
        cx: 254.878,
        cy: 205.395,
    };

    /// Color camera at 1920x1080.
    pub const KINECT_V2_COLOR: Intrinsics = Intrinsics {
        fx: 1081.372,
        fy: 1081.372,
        cx: 959.5,
        cy: 539.5,
    };

    /// Rescale intrinsics calibrated at `from` to a grid of size `to`.
    pub fn scaled(&self, from: GridSize, to: GridSize) -> Intrinsics {
        let sx = to.width as f32 / from.width as f32;
        let sy = to.height as f32 / from.height as f32;
        Intrinsics {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
        }
    }
}

/// Depth-to-color registration from two pinhole models and a horizontal
/// baseline between the cameras.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PinholeMapper {
    pub depth: Intrinsics,
    pub color: Intrinsics,
    /// Color camera offset along camera-space X, meters.
    pub baseline_m: f32,
}

impl PinholeMapper {
    pub const KINECT_V2_BASELINE_M: f32 = 0.052;

    pub fn for_geometry(geometry: SensorGeometry) -> Self {
        Self {
            depth: Intrinsics::KINECT_V2_DEPTH.scaled(
                GridSize::new(KINECT_DEPTH_WIDTH, KINECT_DEPTH_HEIGHT),
                geometry.depth,
            ),
            color: Intrinsics::KINECT_V2_COLOR.scaled(
                GridSize::new(KINECT_COLOR_WIDTH, KINECT_COLOR_HEIGHT),
                geometry.color,
            ),
            baseline_m: Self::KINECT_V2_BASELINE_M,
        }
    }

    /// Projects a camera-space point into the color grid.
    pub fn map_camera_to_color(&self, point: CameraSpacePoint) -> Option<ColorSpacePoint> {
        if !point.is_finite() || point.z <= 0.0 {
            return None;
        }
        let x = point.x + self.baseline_m;
        Some(ColorSpacePoint {
            x: x * self.color.fx / point.z + self.color.cx,
            y: -point.y * self.color.fy / point.z + self.color.cy,
        })
    }

    /// Projects a camera-space point back into the depth grid.
    pub fn map_camera_to_depth(&self, point: CameraSpacePoint) -> Option<DepthSpacePoint> {
        if !point.is_finite() || point.z <= 0.0 {
            return None;
        }
        Some(DepthSpacePoint {
            x: point.x * self.depth.fx / point.z + self.depth.cx,
            y: -point.y * self.depth.fy / point.z + self.depth.cy,
        })
    }
}

impl Default for PinholeMapper {
    fn default() -> Self {
        Self::for_geometry(SensorGeometry::KINECT_V2)
    }
}

impl CoordinateMapper for PinholeMapper {
    fn map_depth_to_color(
        &self,
        point: DepthSpacePoint,
        depth_mm: u16,
    ) -> Option<ColorSpacePoint> {
        let camera = self.map_depth_to_camera(point, depth_mm)?;
        self.map_camera_to_color(camera)
    }

    fn map_depth_to_camera(
        &self,
        point: DepthSpacePoint,
        depth_mm: u16,
    ) -> Option<CameraSpacePoint> {
        if depth_mm == 0 {
            return None;
        }
        let z = depth_mm as f32 / 1000.0;
        Some(CameraSpacePoint {
            x: (point.x - self.depth.cx) * z / self.depth.fx,
            y: -(point.y - self.depth.cy) * z / self.depth.fy,
            z,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_depth_does_not_map() {
        let mapper = PinholeMapper::default();
        let p = DepthSpacePoint { x: 10.0, y: 10.0 };
        assert!(mapper.map_depth_to_camera(p, 0).is_none());
        assert!(mapper.map_depth_to_color(p, 0).is_none());
    }

    #[test]
    fn principal_point_lies_on_the_optical_axis() {
        let mapper = PinholeMapper::default();
        let p = DepthSpacePoint {
            x: mapper.depth.cx,
            y: mapper.depth.cy,
        };
        let camera = mapper.map_depth_to_camera(p, 2000).unwrap();
        assert!(camera.x.abs() < 1e-6);
        assert!(camera.y.abs() < 1e-6);
        assert!((camera.z - 2.0).abs() < 1e-6);

        let color = mapper.map_depth_to_color(p, 2000).unwrap();
        // Baseline shifts the point right of the color principal point.
        assert!(color.x > mapper.color.cx);
        assert!((color.y - mapper.color.cy).abs() < 1e-3);
    }

    #[test]
    fn camera_round_trips_to_depth_pixel() {
        let mapper = PinholeMapper::default();
        let p = DepthSpacePoint { x: 100.0, y: 300.0 };
        let camera = mapper.map_depth_to_camera(p, 1500).unwrap();
        let back = mapper.map_camera_to_depth(camera).unwrap();
        assert!((back.x - p.x).abs() < 1e-3);
        assert!((back.y - p.y).abs() < 1e-3);
    }

    #[test]
    fn scaling_follows_grid_size() {
        let small = PinholeMapper::for_geometry(SensorGeometry {
            depth: GridSize::new(256, 212),
            color: GridSize::new(960, 540),
        });
        assert!((small.depth.fx - Intrinsics::KINECT_V2_DEPTH.fx / 2.0).abs() < 1e-3);
        assert!((small.color.cy - Intrinsics::KINECT_V2_COLOR.cy / 2.0).abs() < 1e-3);
    }
}
