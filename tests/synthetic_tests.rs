//! Runs the pipeline against the threaded synthetic sensor.

mod common;

use std::{
    thread,
    time::{Duration, Instant},
};

use common::harness;
use depth_cloud::{
    PipelineConfig, TickOutcome,
    config::ColorizeMode,
    sensor::{
        ColorFormat, SensorSession, SessionState,
        synthetic::{SyntheticConfig, SyntheticProvider},
    },
    types::{Bgra, GridSize, SensorGeometry},
};

#[test]
fn synthetic_sensor_feeds_the_pipeline() {
    let geometry = SensorGeometry {
        depth: GridSize::new(64, 53),
        color: GridSize::new(240, 135),
    };
    let provider = SyntheticProvider::new(SyntheticConfig {
        geometry,
        color_format: ColorFormat::Yuy2,
        fps: 100,
        ..SyntheticConfig::default()
    });
    let mut session = SensorSession::new();
    session.open(&provider).unwrap();
    let config = PipelineConfig {
        geometry,
        colorize: ColorizeMode::Turbo,
        ..PipelineConfig::default()
    };
    let mut h = harness(&config);

    let deadline = Instant::now() + Duration::from_secs(5);
    let (vertices, tracked_bodies) = loop {
        match h.runner.tick(&mut session, &mut h.world) {
            TickOutcome::Published {
                vertices,
                tracked_bodies,
                ..
            } => break (vertices, tracked_bodies),
            _ if Instant::now() < deadline => {
                thread::sleep(Duration::from_millis(5));
            }
            other => panic!("no full frame before deadline: {other:?}"),
        }
    };
    assert!(vertices > 0);
    assert!(vertices <= geometry.depth.len());
    assert_eq!(tracked_bodies, 1);
    assert!(h.runner.bridge().is_planted(0));

    let frame = h.subscriber.latest().unwrap();
    assert_eq!(frame.point_cloud.len(), vertices);
    assert!(frame.depth_preview.iter().any(|&px| px != Bgra::BLACK));

    session.close();
    assert_eq!(session.state(), SessionState::Closed);
}
