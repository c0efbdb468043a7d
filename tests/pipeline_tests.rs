//! End-to-end tick tests against the scripted fixture sensor.

mod common;

use common::{
    StubMapper, color_at, frame_set, harness, small_config, small_geometry, stub_provider,
    tracked_body,
};
use depth_cloud::{
    PipelineConfig, TickOutcome,
    config::{BodyFilter, ProjectionMode},
    error::{AcquireError, FrameError, ReaderError},
    pipeline::{FrameAcquirer, PointCloudBuffer, PointCloudProjector, ProjectionInput, SkipReason},
    scene::{BodyDesc, PhysicsWorld},
    sensor::{
        CoordinateMapper, SensorSession,
        fixture::{FixtureProvider, FixtureSensor, FixtureSensorConfig},
        synthetic::{SyntheticConfig, SyntheticScene},
    },
    types::{
        BODY_COUNT, Bgra, CameraSpacePoint, DepthSpacePoint, GridSize, JointType, Modality,
        SensorGeometry,
    },
};

fn single_sample_depth() -> Vec<u16> {
    let mut depth = vec![0u16; 16];
    depth[4 + 1] = 1000;
    depth
}

fn medium_geometry() -> SensorGeometry {
    SensorGeometry {
        depth: GridSize::new(64, 53),
        color: GridSize::new(240, 135),
    }
}

#[test]
fn single_in_range_sample_yields_one_vertex() {
    let provider = stub_provider();
    provider.push(frame_set(small_geometry(), single_sample_depth()));
    let mut session = SensorSession::new();
    session.open(&provider).unwrap();
    let mut h = harness(&small_config());

    let outcome = h.runner.tick(&mut session, &mut h.world);
    assert!(matches!(
        outcome,
        TickOutcome::Published {
            vertices: 1,
            tracked_bodies: 0,
            ..
        }
    ));

    let frame = h.subscriber.latest().unwrap();
    let vertices = frame.point_cloud.as_slice();
    assert_eq!(vertices.len(), 1);
    assert_eq!(vertices[0].position, [1.0, 1.0, 1.0]);
    assert_eq!(vertices[0].color, color_at(2, 2).normalized_rgb());
    assert_eq!(provider.live_snapshots(), 0);
}

#[test]
fn all_in_bounds_grid_projects_every_sample() {
    let provider = stub_provider();
    provider.push(frame_set(small_geometry(), vec![1000; 16]));
    let mut session = SensorSession::new();
    session.open(&provider).unwrap();
    let mut h = harness(&small_config());

    let outcome = h.runner.tick(&mut session, &mut h.world);
    assert!(matches!(outcome, TickOutcome::Published { vertices: 16, .. }));
    let frame = h.subscriber.latest().unwrap();
    assert_eq!(frame.point_cloud.len(), frame.point_cloud.capacity());
}

#[test]
fn vertices_map_back_inside_the_color_grid() {
    let geometry = medium_geometry();
    let scene = SyntheticScene::new(SyntheticConfig {
        geometry,
        color_format: depth_cloud::sensor::ColorFormat::Bgra,
        ..SyntheticConfig::default()
    });
    let mapper = scene.mapper();
    let frames = scene.render(0.5);
    let depth = frames.depth.clone().unwrap();

    let provider = FixtureProvider::with_mapper(FixtureSensorConfig::new(geometry), mapper);
    provider.push(frames);
    let mut session = SensorSession::new();
    session.open(&provider).unwrap();
    let config = PipelineConfig {
        geometry,
        ..PipelineConfig::default()
    };
    let mut h = harness(&config);

    let TickOutcome::Published { vertices, .. } = h.runner.tick(&mut session, &mut h.world) else {
        panic!("tick was skipped");
    };
    assert!(vertices > 0);
    assert!(vertices <= geometry.depth.len());

    let in_bounds = (0..geometry.depth.height)
        .flat_map(|y| (0..geometry.depth.width).map(move |x| (x, y)))
        .filter(|&(x, y)| {
            let d = depth.data[(y * geometry.depth.width + x) as usize];
            let p = DepthSpacePoint {
                x: x as f32,
                y: y as f32,
            };
            mapper
                .map_depth_to_color(p, d)
                .and_then(|c| c.nearest_pixel())
                .is_some_and(|(cx, cy)| geometry.color.contains(cx, cy))
        })
        .count();
    assert_eq!(vertices, in_bounds);

    let frame = h.subscriber.latest().unwrap();
    for v in frame.point_cloud.as_slice() {
        let [x, y, z] = v.position;
        let (cx, cy) = mapper
            .map_camera_to_color(CameraSpacePoint::new(x, y, z))
            .and_then(|c| c.nearest_pixel())
            .unwrap();
        assert!(geometry.color.contains(cx, cy), "({cx}, {cy}) out of bounds");
    }
}

#[test]
fn projection_is_idempotent_on_frozen_input() {
    let geometry = medium_geometry();
    let scene = SyntheticScene::new(SyntheticConfig {
        geometry,
        ..SyntheticConfig::default()
    });
    let mapper = scene.mapper();
    let frames = scene.render(1.0);

    let mut acquirer = FrameAcquirer::new(geometry, [1.0, 0.0, 0.0]);
    let ingested = acquirer.ingest(&frames);
    let input = ProjectionInput {
        depth: ingested.depth.unwrap(),
        color: ingested.color.unwrap(),
        body_index: ingested.body_index.ok(),
        tracked: [false; BODY_COUNT],
    };

    let config = PipelineConfig {
        geometry,
        ..PipelineConfig::default()
    };
    let mut projector = PointCloudProjector::from_config(&config);
    let mut first = PointCloudBuffer::for_grid(geometry.depth);
    let mut second = PointCloudBuffer::for_grid(geometry.depth);

    let n1 = projector.project(&input, &mapper, &mut first).unwrap();
    let n2 = projector.project(&input, &mapper, &mut second).unwrap();
    assert_eq!(n1, n2);
    assert_eq!(first.as_slice(), second.as_slice());

    let n3 = projector.project(&input, &mapper, &mut first).unwrap();
    assert_eq!(n1, n3);
    assert_eq!(first.as_slice(), second.as_slice());
}

#[test]
fn two_of_six_tracked_bodies_place_proxies() {
    let provider = stub_provider();
    let mut frames = frame_set(small_geometry(), vec![1000; 16]);
    if let Some(bodies) = frames.bodies.as_mut() {
        bodies[1] = tracked_body(0.3);
        bodies[4] = tracked_body(-0.3);
    }
    provider.push(frames.clone());
    let mut session = SensorSession::new();
    session.open(&provider).unwrap();
    let mut h = harness(&small_config());

    let outcome = h.runner.tick(&mut session, &mut h.world);
    assert!(matches!(
        outcome,
        TickOutcome::Published {
            tracked_bodies: 2,
            ..
        }
    ));

    let bridge = h.runner.bridge();
    for body in 0..BODY_COUNT {
        let expected = body == 1 || body == 4;
        assert_eq!(bridge.is_planted(body), expected, "body {body}");
        for joint in JointType::ALL {
            let id = bridge.proxy(body, joint).unwrap();
            assert_eq!(h.world.contains(id), expected);
        }
    }

    let skeleton = h.runner.skeleton();
    for body in [1, 4] {
        for joint in JointType::ALL {
            let id = bridge.proxy(body, joint).unwrap();
            let placed = h.world.world_transform(id).unwrap().position;
            assert_eq!(placed, skeleton.joint_position(body, joint).to_array());
        }
    }

    let frame = h.subscriber.latest().unwrap();
    assert_eq!(
        frame.skeleton.tracked(),
        [false, true, false, false, true, false]
    );

    // Body 4 walks away.
    if let Some(bodies) = frames.bodies.as_mut() {
        bodies[4] = depth_cloud::sensor::BodyData::untracked();
    }
    provider.push(frames);
    h.runner.tick(&mut session, &mut h.world);
    let bridge = h.runner.bridge();
    assert!(bridge.is_planted(1));
    assert!(!bridge.is_planted(4));
    let head = bridge.proxy(4, JointType::Head).unwrap();
    assert!(!h.world.contains(head));
}

#[test]
fn acquisition_failures_skip_and_missing_frames_degrade() {
    let provider = stub_provider();
    let mut session: SensorSession<FixtureSensor<StubMapper>> = SensorSession::new();
    let mut h = harness(&small_config());

    assert_eq!(
        h.runner.tick(&mut session, &mut h.world),
        TickOutcome::Skipped(SkipReason::Acquire(AcquireError::NotInitialized))
    );

    session.open(&provider).unwrap();
    assert_eq!(
        h.runner.tick(&mut session, &mut h.world),
        TickOutcome::Skipped(SkipReason::Acquire(AcquireError::AcquireFailed(
            ReaderError::NotReady
        )))
    );

    provider.push_failure(ReaderError::Failed("usb reset".into()));
    assert_eq!(
        h.runner.tick(&mut session, &mut h.world),
        TickOutcome::Skipped(SkipReason::Acquire(AcquireError::AcquireFailed(
            ReaderError::Failed("usb reset".into())
        )))
    );

    let mut no_depth = frame_set(small_geometry(), vec![1000; 16]);
    no_depth.depth = None;
    provider.push(no_depth);
    assert_eq!(
        h.runner.tick(&mut session, &mut h.world),
        TickOutcome::Degraded {
            tick: 4,
            tracked_bodies: 0,
            missing: FrameError::Unavailable(Modality::Depth),
        }
    );
    let frame = h.subscriber.latest().unwrap();
    assert!(!frame.cloud_valid);
    assert!(!frame.preview_valid);
    assert!(frame.point_cloud.is_empty());
    assert!(frame.depth_preview.iter().all(|&px| px == Bgra::BLACK));

    let mut no_color = frame_set(small_geometry(), vec![1000; 16]);
    no_color.color = None;
    provider.push(no_color);
    assert_eq!(
        h.runner.tick(&mut session, &mut h.world),
        TickOutcome::Degraded {
            tick: 5,
            tracked_bodies: 0,
            missing: FrameError::Unavailable(Modality::Color),
        }
    );
    let frame = h.subscriber.latest().unwrap();
    assert!(!frame.cloud_valid);
    assert!(frame.preview_valid);
    assert!(frame.point_cloud.is_empty());
    // 1000 mm wraps to gray 232.
    assert!(frame.depth_preview.iter().all(|&px| px == Bgra::gray(232)));

    provider.push(frame_set(small_geometry(), vec![1000; 16]));
    assert!(matches!(
        h.runner.tick(&mut session, &mut h.world),
        TickOutcome::Published { vertices: 16, .. }
    ));
    assert!(h.subscriber.latest().unwrap().cloud_valid);

    let stats = h.runner.stats();
    assert_eq!(stats.ticks, 6);
    assert_eq!(stats.published, 1);
    assert_eq!(stats.degraded, 2);
    assert_eq!(stats.acquire_failures, 3);
    assert_eq!(stats.depth_unavailable, 1);
    assert_eq!(stats.color_unavailable, 1);
    assert_eq!(stats.skipped(), 3);
    assert_eq!(provider.live_snapshots(), 0);
}

#[test]
fn missing_color_still_delivers_skeleton_and_scene() {
    let provider = stub_provider();
    let mut frames = frame_set(small_geometry(), vec![1000; 16]);
    frames.color = None;
    if let Some(bodies) = frames.bodies.as_mut() {
        bodies[0] = tracked_body(0.2);
    }
    provider.push(frames);
    let mut session = SensorSession::new();
    session.open(&provider).unwrap();
    let mut h = harness(&small_config());
    let ball = h
        .runner
        .bridge_mut()
        .spawn(&mut h.world, BodyDesc::dynamic_sphere([0.0, 2.0, 1.0], 0.15));

    assert_eq!(
        h.runner.tick(&mut session, &mut h.world),
        TickOutcome::Degraded {
            tick: 1,
            tracked_bodies: 1,
            missing: FrameError::Unavailable(Modality::Color),
        }
    );

    let frame = h.subscriber.latest().unwrap();
    assert_eq!(frame.tick, 1);
    assert!(frame.skeleton.is_tracked(0));
    assert_eq!(
        frame.skeleton.joint_position(0, JointType::Head),
        CameraSpacePoint::new(0.2, JointType::Head.index() as f32 * 0.05, 2.0)
    );
    assert!(frame.transforms.iter().any(|(id, _)| *id == ball));
    assert!(frame.preview_valid);
    assert!(!frame.cloud_valid);
    assert_eq!(provider.live_snapshots(), 0);
}

#[test]
fn missing_body_index_still_publishes() {
    let provider = stub_provider();
    let mut frames = frame_set(small_geometry(), vec![1000; 16]);
    frames.body_index = None;
    frames.bodies = None;
    provider.push(frames);
    let mut session = SensorSession::new();
    session.open(&provider).unwrap();
    let config = PipelineConfig {
        projection: ProjectionMode::BodyFiltered,
        ..small_config()
    };
    let mut h = harness(&config);

    assert!(matches!(
        h.runner.tick(&mut session, &mut h.world),
        TickOutcome::Published { vertices: 16, .. }
    ));
}

#[test]
fn body_filter_policies_end_to_end() {
    let mut frames = frame_set(small_geometry(), vec![1000; 16]);
    if let Some(index) = frames.body_index.as_mut() {
        index.data[0] = 0;
        index.data[5] = 2;
        index.data[6] = 2;
    }
    if let Some(bodies) = frames.bodies.as_mut() {
        bodies[2] = tracked_body(0.0);
    }

    for (filter, expected) in [
        (BodyFilter::BodyIndexPresent, 3),
        (BodyFilter::TrackedBodyOnly, 2),
    ] {
        let provider = stub_provider();
        provider.push(frames.clone());
        let mut session = SensorSession::new();
        session.open(&provider).unwrap();
        let config = PipelineConfig {
            projection: ProjectionMode::BodyFiltered,
            body_filter: filter,
            ..small_config()
        };
        let mut h = harness(&config);

        let outcome = h.runner.tick(&mut session, &mut h.world);
        let TickOutcome::Published { vertices, .. } = outcome else {
            panic!("tick was skipped: {outcome:?}");
        };
        assert_eq!(vertices, expected, "{filter:?}");
    }
}

#[test]
fn busy_renderer_skips_the_tick() {
    let provider = FixtureProvider::with_mapper(
        FixtureSensorConfig {
            repeat_last: true,
            ..FixtureSensorConfig::new(small_geometry())
        },
        StubMapper,
    );
    provider.push(frame_set(small_geometry(), vec![1000; 16]));
    let mut session = SensorSession::new();
    session.open(&provider).unwrap();
    let mut h = harness(&small_config());

    assert!(matches!(
        h.runner.tick(&mut session, &mut h.world),
        TickOutcome::Published { tick: 1, .. }
    ));
    assert!(h.subscriber.latest().is_some());
    // Keep frame 1 out of the pool for good.
    let kept = h.subscriber.take();
    assert!(kept.is_some());

    assert!(matches!(
        h.runner.tick(&mut session, &mut h.world),
        TickOutcome::Published { tick: 2, .. }
    ));
    assert_eq!(h.subscriber.latest().map(|f| f.tick), Some(2));

    assert_eq!(
        h.runner.tick(&mut session, &mut h.world),
        TickOutcome::Skipped(SkipReason::ConsumerBusy)
    );

    h.subscriber.release();
    assert!(matches!(
        h.runner.tick(&mut session, &mut h.world),
        TickOutcome::Published { tick: 4, .. }
    ));
    assert_eq!(provider.live_snapshots(), 0);
}
