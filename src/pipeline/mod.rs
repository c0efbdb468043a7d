pub mod acquire;
pub mod color_converter;
pub mod colorize;
pub mod exchange;
pub mod projector;
pub mod skeleton;

// Re-exports for convenience
pub use acquire::{BodyIndexGrid, ColorGrid, DepthGrid, FrameAcquirer, TickFrames};
pub use colorize::DepthColorizer;
pub use exchange::{FramePublisher, FrameSubscriber, RenderExchange, RenderFrame};
pub use projector::{PointCloudBuffer, PointCloudProjector, ProjectionInput};
pub use skeleton::SkeletonSet;

use crate::{
    config::PipelineConfig,
    error::{AcquireError, FrameError, ProjectionError},
    scene::{PhysicsWorld, SceneBridge},
    sensor::{Sensor, SensorSession},
    types::{BODY_COUNT, Bgra, Modality},
};

/// Why a tick published nothing.
#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    Acquire(AcquireError),
    /// The renderer holds every render frame.
    ConsumerBusy,
    Projection(ProjectionError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    Published {
        tick: u64,
        vertices: usize,
        tracked_bodies: usize,
    },
    /// Depth or color was unavailable. The frame still went out with the
    /// skeleton, object transforms and (with depth present) the depth preview,
    /// but its point cloud is empty.
    Degraded {
        tick: u64,
        tracked_bodies: usize,
        missing: FrameError,
    },
    Skipped(SkipReason),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    pub published: u64,
    pub degraded: u64,
    pub acquire_failures: u64,
    pub depth_unavailable: u64,
    pub color_unavailable: u64,
    pub consumer_busy: u64,
    pub projection_failures: u64,
    pub last_vertices: usize,
}

impl TickStats {
    pub fn record(&mut self, outcome: &TickOutcome) {
        self.ticks += 1;
        match outcome {
            TickOutcome::Published { vertices, .. } => {
                self.published += 1;
                self.last_vertices = *vertices;
            }
            TickOutcome::Degraded { missing, .. } => {
                self.degraded += 1;
                match missing.modality() {
                    Modality::Depth => self.depth_unavailable += 1,
                    _ => self.color_unavailable += 1,
                }
            }
            TickOutcome::Skipped(SkipReason::Acquire(_)) => self.acquire_failures += 1,
            TickOutcome::Skipped(SkipReason::ConsumerBusy) => self.consumer_busy += 1,
            TickOutcome::Skipped(SkipReason::Projection(_)) => self.projection_failures += 1,
        }
    }

    /// Ticks that published no render frame at all.
    pub fn skipped(&self) -> u64 {
        self.ticks - self.published - self.degraded
    }

    fn log_summary(&self) {
        log::info!(
            "ticks {}: published {}, last cloud {} vertices",
            self.ticks,
            self.published,
            self.last_vertices
        );
        if self.degraded > 0 {
            log::warn!(
                "{} ticks without a point cloud (depth missing {}, color missing {})",
                self.degraded,
                self.depth_unavailable,
                self.color_unavailable
            );
        }
        if self.skipped() > 0 {
            log::warn!(
                "skipped {} ticks (acquire {}, busy {}, projection {})",
                self.skipped(),
                self.acquire_failures,
                self.consumer_busy,
                self.projection_failures
            );
        }
    }
}

/// Drives one host frame: physics step, acquisition, skeleton sync,
/// colorization, projection and hand-off.
pub struct TickRunner {
    acquirer: FrameAcquirer,
    colorizer: DepthColorizer,
    projector: PointCloudProjector,
    bridge: SceneBridge,
    publisher: FramePublisher,
    stats: TickStats,
    log_every: u64,
    tick: u64,
}

impl TickRunner {
    pub fn new(config: &PipelineConfig, bridge: SceneBridge, publisher: FramePublisher) -> Self {
        Self {
            acquirer: FrameAcquirer::new(config.geometry, config.joint_marker_color),
            colorizer: DepthColorizer::new(config.colorize, config.max_distance_policy),
            projector: PointCloudProjector::from_config(config),
            bridge,
            publisher,
            stats: TickStats::default(),
            log_every: config.log_every,
            tick: 0,
        }
    }

    pub fn stats(&self) -> &TickStats {
        &self.stats
    }

    pub fn bridge(&self) -> &SceneBridge {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut SceneBridge {
        &mut self.bridge
    }

    pub fn skeleton(&self) -> &SkeletonSet {
        self.acquirer.skeleton()
    }

    pub fn tick<S, W>(&mut self, session: &mut SensorSession<S>, world: &mut W) -> TickOutcome
    where
        S: Sensor,
        W: PhysicsWorld + ?Sized,
    {
        self.tick += 1;
        let outcome = self.run_tick(session, world);
        if let TickOutcome::Skipped(reason) = &outcome {
            log::debug!("tick {} skipped: {reason:?}", self.tick);
        }
        self.stats.record(&outcome);
        if self.log_every > 0 && self.tick % self.log_every == 0 {
            self.stats.log_summary();
        }
        outcome
    }

    fn run_tick<S, W>(&mut self, session: &mut SensorSession<S>, world: &mut W) -> TickOutcome
    where
        S: Sensor,
        W: PhysicsWorld + ?Sized,
    {
        self.bridge.step(world);

        let (frame, cloud) = {
            let acquired = match session.acquire() {
                Ok(acquired) => acquired,
                Err(err) => return TickOutcome::Skipped(SkipReason::Acquire(err)),
            };
            let frames = self.acquirer.ingest(&acquired.snapshot);

            if let Ok(skeleton) = &frames.skeleton {
                self.bridge.sync_skeleton(world, skeleton);
            }
            let Some(mut frame) = self.publisher.checkout() else {
                return TickOutcome::Skipped(SkipReason::ConsumerBusy);
            };

            let tracked = frames
                .skeleton
                .as_ref()
                .map(|skeleton| skeleton.tracked())
                .unwrap_or([false; BODY_COUNT]);
            let depth = match frames.depth {
                Ok(depth) => depth,
                Err(err) => {
                    frame.depth_preview.fill(Bgra::BLACK);
                    frame.preview_valid = false;
                    frame.point_cloud.clear();
                    return self.finish(frame, world, Err(err));
                }
            };

            frame.preview_valid = match self.colorizer.colorize(&depth, &mut frame.depth_preview) {
                Ok(()) => true,
                Err(err) => {
                    log::warn!("depth preview skipped: {err}");
                    false
                }
            };

            let color = match frames.color {
                Ok(color) => color,
                Err(err) => {
                    frame.point_cloud.clear();
                    return self.finish(frame, world, Err(err));
                }
            };
            let input = ProjectionInput {
                depth,
                color,
                body_index: frames.body_index.ok(),
                tracked,
            };
            match self
                .projector
                .project(&input, acquired.mapper, &mut frame.point_cloud)
            {
                Ok(vertices) => (frame, Ok(vertices)),
                Err(err) => {
                    self.publisher.discard(frame);
                    return TickOutcome::Skipped(SkipReason::Projection(err));
                }
            }
        };

        self.finish(frame, world, cloud)
    }

    /// Fills the parts of `frame` every published tick carries and hands it
    /// to the renderer.
    fn finish<W>(
        &self,
        mut frame: RenderFrame,
        world: &W,
        cloud: Result<usize, FrameError>,
    ) -> TickOutcome
    where
        W: PhysicsWorld + ?Sized,
    {
        frame.tick = self.tick;
        frame.cloud_valid = cloud.is_ok();
        frame.skeleton.copy_from(self.acquirer.skeleton());
        self.bridge.collect_transforms(world, &mut frame.transforms);
        let tracked_bodies = frame.skeleton.tracked_count();
        self.publisher.publish(frame);

        match cloud {
            Ok(vertices) => TickOutcome::Published {
                tick: self.tick,
                vertices,
                tracked_bodies,
            },
            Err(missing) => TickOutcome::Degraded {
                tick: self.tick,
                tracked_bodies,
                missing,
            },
        }
    }
}
