use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use depth_cloud::{
    PipelineConfig, TickOutcome, TickRunner,
    config::{ProjectionMode, SampleStride},
    pipeline::RenderExchange,
    scene::{SceneBridge, SimpleWorld},
    sensor::{
        ColorFormat, SensorSession,
        fixture::{FixtureProvider, FixtureSensorConfig},
        synthetic::{SyntheticConfig, SyntheticScene},
    },
};

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let duration_secs = args.next().and_then(|s| s.parse::<u64>().ok()).unwrap_or(3);
    let mode = args.next().unwrap_or_else(|| "full".to_string());

    let mut config = PipelineConfig::default();
    match mode.as_str() {
        "full" => {}
        "performance" => config.stride = SampleStride::PERFORMANCE,
        "filtered" => config.projection = ProjectionMode::BodyFiltered,
        other => bail!("unknown mode {other:?}, expected full, performance or filtered"),
    }

    // One frozen frame set replayed every tick.
    let scene = SyntheticScene::new(SyntheticConfig {
        geometry: config.geometry,
        color_format: ColorFormat::Bgra,
        ..SyntheticConfig::default()
    });
    let provider = FixtureProvider::with_mapper(
        FixtureSensorConfig {
            repeat_last: true,
            ..FixtureSensorConfig::new(config.geometry)
        },
        scene.mapper(),
    );
    provider.push(scene.render(0.0));

    let mut session = SensorSession::new();
    session
        .open(&provider)
        .context("failed to open fixture sensor")?;
    let mut world = SimpleWorld::default();
    let bridge = SceneBridge::from_config(&mut world, &config);
    let (publisher, _subscriber) = RenderExchange::new(
        config.render_buffers,
        config.geometry,
        config.joint_marker_color,
    );
    let mut runner = TickRunner::new(&config, bridge, publisher);

    println!(
        "Benchmarking {} projection of {} depth samples for {}s",
        mode,
        config.geometry.depth.len(),
        duration_secs
    );

    // Warm-up once to fault in every scratch buffer.
    let vertices = match runner.tick(&mut session, &mut world) {
        TickOutcome::Published { vertices, .. } => vertices,
        skipped => bail!("warm-up tick was skipped: {skipped:?}"),
    };
    println!("Warm-up done ({vertices} vertices)");

    let duration = Duration::from_secs(duration_secs.max(1));
    let start = Instant::now();
    let mut iterations: u64 = 0;
    let mut last_vertices = vertices;
    while start.elapsed() < duration {
        if let TickOutcome::Published { vertices, .. } = runner.tick(&mut session, &mut world) {
            last_vertices = vertices;
        }
        iterations += 1;
    }
    let elapsed = start.elapsed();
    let fps = iterations as f64 / elapsed.as_secs_f64();

    println!(
        "Ran {} ticks in {:.3}s -> {:.1} fps (last cloud {} vertices, {} skipped)",
        iterations,
        elapsed.as_secs_f64(),
        fps,
        last_vertices,
        runner.stats().skipped()
    );

    Ok(())
}
