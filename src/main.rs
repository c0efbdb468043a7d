use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use depth_cloud::{
    PipelineConfig, TickRunner,
    config::{BodyFilter, ColorizeMode, ProjectionMode, SampleStride},
    pipeline::{FrameSubscriber, RenderExchange, RenderFrame, skeleton},
    scene::{self, SceneBridge, SimpleWorld},
    sensor::{
        ColorFormat, PinholeMapper, SensorSession,
        synthetic::{SyntheticConfig, SyntheticProvider},
    },
    types::{BODY_COUNT, Bgra, JointType},
};

#[derive(Parser, Debug)]
#[command(name = "depth-cloud", about = "Depth sensor point cloud pipeline demo")]
struct Args {
    /// JSON pipeline configuration; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of ticks to run.
    #[arg(long, default_value_t = 300)]
    ticks: u64,
    /// Target tick rate (also the synthetic sensor's frame rate).
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Project every other depth row.
    #[arg(long)]
    performance: bool,
    /// Keep only samples that belong to a body.
    #[arg(long)]
    filter_bodies: bool,
    /// With --filter-bodies, require the body slot to be tracked.
    #[arg(long)]
    tracked_only: bool,
    #[arg(long, value_enum)]
    colorize: Option<ColorizeArg>,
    #[arg(long, value_enum, default_value_t = ColorFormatArg::Yuy2)]
    color_format: ColorFormatArg,
    /// Write the last depth preview (with skeleton overlay) to this PNG.
    #[arg(long)]
    preview: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ColorizeArg {
    Wrap,
    Ramp,
    Turbo,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ColorFormatArg {
    Bgra,
    Rgba,
    Yuy2,
    Gray,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args)?;

    let provider = SyntheticProvider::new(SyntheticConfig {
        geometry: config.geometry,
        color_format: match args.color_format {
            ColorFormatArg::Bgra => ColorFormat::Bgra,
            ColorFormatArg::Rgba => ColorFormat::Rgba,
            ColorFormatArg::Yuy2 => ColorFormat::Yuy2,
            ColorFormatArg::Gray => ColorFormat::Gray,
        },
        fps: args.fps,
        ..SyntheticConfig::default()
    });
    let mut session = SensorSession::new();
    session
        .open(&provider)
        .context("failed to open depth sensor")?;

    let mut world = SimpleWorld::default();
    let mut bridge = SceneBridge::from_config(&mut world, &config);
    scene::populate_demo_scene(&mut world, &mut bridge);

    let (publisher, subscriber) = RenderExchange::new(
        config.render_buffers,
        config.geometry,
        config.joint_marker_color,
    );
    let stop = Arc::new(AtomicBool::new(false));
    let renderer = {
        let stop = stop.clone();
        let preview = args.preview.clone();
        let mapper = PinholeMapper::for_geometry(config.geometry);
        thread::Builder::new()
            .name("render-consumer".into())
            .spawn(move || run_renderer(subscriber, &stop, preview.as_deref(), &mapper))
            .context("failed to spawn render thread")?
    };

    let mut runner = TickRunner::new(&config, bridge, publisher);
    let period = Duration::from_secs_f64(1.0 / args.fps.max(1) as f64);
    let started = Instant::now();
    for _ in 0..args.ticks {
        let tick_start = Instant::now();
        runner.tick(&mut session, &mut world);
        if let Some(rest) = period.checked_sub(tick_start.elapsed()) {
            thread::sleep(rest);
        }
    }
    let stats = runner.stats().clone();
    drop(runner);
    stop.store(true, Ordering::SeqCst);

    let rendered = renderer
        .join()
        .map_err(|_| anyhow!("render thread panicked"))??;
    session.close();

    let elapsed = started.elapsed();
    println!(
        "Ran {} ticks in {:.2}s -> {:.1} tps; published {}, degraded {}, rendered {}, skipped {}, last cloud {} vertices",
        stats.ticks,
        elapsed.as_secs_f64(),
        stats.ticks as f64 / elapsed.as_secs_f64(),
        stats.published,
        stats.degraded,
        rendered,
        stats.skipped(),
        stats.last_vertices
    );
    Ok(())
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if args.performance {
        config.stride = SampleStride::PERFORMANCE;
    }
    if args.filter_bodies {
        config.projection = ProjectionMode::BodyFiltered;
    }
    if args.tracked_only {
        config.body_filter = BodyFilter::TrackedBodyOnly;
    }
    if let Some(colorize) = args.colorize {
        config.colorize = match colorize {
            ColorizeArg::Wrap => ColorizeMode::Wrap,
            ColorizeArg::Ramp => ColorizeMode::LinearRamp,
            ColorizeArg::Turbo => ColorizeMode::Turbo,
        };
    }
    config.validate()?;
    Ok(config)
}

fn run_renderer(
    mut subscriber: FrameSubscriber,
    stop: &AtomicBool,
    preview: Option<&Path>,
    mapper: &PinholeMapper,
) -> Result<u64> {
    let mut rendered = 0u64;
    while !stop.load(Ordering::Relaxed) {
        let Some(frame) = subscriber.wait_newer(Duration::from_millis(100)) else {
            continue;
        };
        rendered += 1;
        if rendered % 60 == 0 {
            log::info!(
                "render frame {}: {} vertices, {} bodies, {} objects",
                frame.tick,
                frame.point_cloud.len(),
                frame.skeleton.tracked_count(),
                frame.transforms.len()
            );
        }
    }

    if let (Some(path), Some(frame)) = (preview, subscriber.latest()) {
        save_preview(frame, mapper, path)?;
        log::info!("saved depth preview of tick {} to {}", frame.tick, path.display());
    }
    Ok(rendered)
}

fn save_preview(frame: &RenderFrame, mapper: &PinholeMapper, path: &Path) -> Result<()> {
    let size = frame.geometry.depth;
    let mut pixels = frame.depth_preview.clone();
    for body in (0..BODY_COUNT).filter(|&b| frame.skeleton.is_tracked(b)) {
        let points: Vec<Option<(f32, f32)>> = JointType::ALL
            .iter()
            .map(|&joint| {
                mapper
                    .map_camera_to_depth(frame.skeleton.joint_position(body, joint))
                    .map(|p| (p.x, p.y))
            })
            .collect();
        skeleton::draw_skeleton(&mut pixels, size, &points);
    }

    let rgba: Vec<u8> = pixels
        .iter()
        .flat_map(|px: &Bgra| [px.r, px.g, px.b, px.a])
        .collect();
    let image = image::RgbaImage::from_raw(size.width, size.height, rgba)
        .ok_or_else(|| anyhow!("preview buffer does not match {size}"))?;
    image
        .save(path)
        .with_context(|| format!("failed to write preview {}", path.display()))?;
    Ok(())
}
