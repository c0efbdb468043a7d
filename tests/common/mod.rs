//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use depth_cloud::{
    PipelineConfig, TickRunner,
    pipeline::{FrameSubscriber, RenderExchange},
    scene::{SceneBridge, SimpleWorld},
    sensor::{
        BodyData, BodyIndexImage, ColorFormat, ColorImage, CoordinateMapper, DepthImage, FrameSet,
        fixture::{FixtureProvider, FixtureSensorConfig},
    },
    types::{
        BODY_COUNT, Bgra, CameraSpacePoint, ColorSpacePoint, DepthSpacePoint, GridSize,
        JOINT_COUNT, Joint, JointType, NO_BODY, SensorGeometry,
    },
};

pub const MIN_RELIABLE: u16 = 500;

/// 4x4 depth grid, 8x8 color grid.
pub fn small_geometry() -> SensorGeometry {
    SensorGeometry {
        depth: GridSize::new(4, 4),
        color: GridSize::new(8, 8),
    }
}

/// Depth pixel `(x, y)` lands on color pixel `(2x, 2y)`; zero depth fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubMapper;

impl CoordinateMapper for StubMapper {
    fn map_depth_to_color(&self, p: DepthSpacePoint, depth_mm: u16) -> Option<ColorSpacePoint> {
        (depth_mm != 0).then(|| ColorSpacePoint {
            x: p.x * 2.0,
            y: p.y * 2.0,
        })
    }

    fn map_depth_to_camera(&self, p: DepthSpacePoint, depth_mm: u16) -> Option<CameraSpacePoint> {
        (depth_mm != 0).then(|| CameraSpacePoint::new(p.x, p.y, depth_mm as f32 / 1000.0))
    }
}

/// Color pixel `(x, y)` of the fixture color grid.
pub fn color_at(x: u32, y: u32) -> Bgra {
    Bgra::new((x * 30) as u8, (y * 30) as u8, 7)
}

pub fn color_image(size: GridSize) -> ColorImage {
    let data = (0..size.height)
        .flat_map(|y| (0..size.width).map(move |x| color_at(x, y)))
        .flat_map(|px| [px.b, px.g, px.r, px.a])
        .collect();
    ColorImage {
        size,
        format: ColorFormat::Bgra,
        data,
    }
}

pub fn tracked_body(x: f32) -> BodyData {
    let mut joints = [Joint {
        joint_type: JointType::SpineBase,
        position: CameraSpacePoint::default(),
    }; JOINT_COUNT];
    for (joint, joint_type) in joints.iter_mut().zip(JointType::ALL) {
        *joint = Joint {
            joint_type,
            position: CameraSpacePoint::new(x, joint_type.index() as f32 * 0.05, 2.0),
        };
    }
    BodyData {
        tracked: true,
        joints: Some(joints),
    }
}

pub fn frame_set(geometry: SensorGeometry, depth: Vec<u16>) -> FrameSet {
    FrameSet {
        color: Some(color_image(geometry.color)),
        depth: Some(DepthImage {
            size: geometry.depth,
            min_reliable: MIN_RELIABLE,
            max_reliable: 4500,
            data: depth,
        }),
        body_index: Some(BodyIndexImage {
            size: geometry.depth,
            data: vec![NO_BODY; geometry.depth.len()],
        }),
        bodies: Some(vec![BodyData::untracked(); BODY_COUNT]),
    }
}

pub fn small_config() -> PipelineConfig {
    PipelineConfig {
        geometry: small_geometry(),
        ..PipelineConfig::default()
    }
}

pub fn stub_provider() -> FixtureProvider<StubMapper> {
    FixtureProvider::with_mapper(FixtureSensorConfig::new(small_geometry()), StubMapper)
}

pub struct Harness {
    pub runner: TickRunner,
    pub subscriber: FrameSubscriber,
    pub world: SimpleWorld,
}

pub fn harness(config: &PipelineConfig) -> Harness {
    let mut world = SimpleWorld::default();
    let bridge = SceneBridge::from_config(&mut world, config);
    let (publisher, subscriber) =
        RenderExchange::new(config.render_buffers, config.geometry, config.joint_marker_color);
    Harness {
        runner: TickRunner::new(config, bridge, publisher),
        subscriber,
        world,
    }
}
