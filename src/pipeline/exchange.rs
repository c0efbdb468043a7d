//! Fixed pool of render frames shared between the pipeline and the renderer.
//!
//! Frames move by value through two channels, so a frame is either being
//! written by the pipeline, queued, or held by the renderer. Neither side ever
//! blocks the other.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

use crate::{
    pipeline::{projector::PointCloudBuffer, skeleton::SkeletonSet},
    scene::{BodyId, Transform},
    types::{Bgra, SensorGeometry},
};

/// Everything the renderer needs for one frame.
#[derive(Clone, Debug)]
pub struct RenderFrame {
    pub tick: u64,
    pub geometry: SensorGeometry,
    /// Empty and `cloud_valid == false` when depth or color was missing.
    pub point_cloud: PointCloudBuffer,
    pub cloud_valid: bool,
    /// Black and `preview_valid == false` when depth was missing.
    pub depth_preview: Vec<Bgra>,
    pub preview_valid: bool,
    pub skeleton: SkeletonSet,
    pub transforms: Vec<(BodyId, Transform)>,
}

impl RenderFrame {
    pub fn new(geometry: SensorGeometry, marker_color: [f32; 3]) -> Self {
        Self {
            tick: 0,
            geometry,
            point_cloud: PointCloudBuffer::for_grid(geometry.depth),
            cloud_valid: false,
            depth_preview: vec![Bgra::BLACK; geometry.depth.len()],
            preview_valid: false,
            skeleton: SkeletonSet::new(marker_color),
            transforms: Vec::new(),
        }
    }
}

pub struct RenderExchange;

impl RenderExchange {
    /// Builds a pool of `buffers` frames (at least 2).
    pub fn new(
        buffers: usize,
        geometry: SensorGeometry,
        marker_color: [f32; 3],
    ) -> (FramePublisher, FrameSubscriber) {
        let buffers = buffers.max(2);
        let (recycle_tx, recycle_rx) = bounded(buffers);
        let (publish_tx, publish_rx) = bounded(buffers);
        for _ in 0..buffers {
            let _ = recycle_tx.try_send(RenderFrame::new(geometry, marker_color));
        }
        (
            FramePublisher {
                recycle_rx,
                recycle_tx: recycle_tx.clone(),
                publish_tx,
                reclaim_rx: publish_rx.clone(),
            },
            FrameSubscriber {
                publish_rx,
                recycle_tx,
                current: None,
            },
        )
    }
}

pub struct FramePublisher {
    recycle_rx: Receiver<RenderFrame>,
    recycle_tx: Sender<RenderFrame>,
    publish_tx: Sender<RenderFrame>,
    reclaim_rx: Receiver<RenderFrame>,
}

impl FramePublisher {
    /// A free frame to write into: a recycled one, or the oldest published
    /// frame the renderer has not picked up. `None` when the renderer holds
    /// every frame.
    pub fn checkout(&self) -> Option<RenderFrame> {
        self.recycle_rx
            .try_recv()
            .ok()
            .or_else(|| self.reclaim_rx.try_recv().ok())
    }

    /// Returns a checked-out frame without publishing it.
    pub fn discard(&self, frame: RenderFrame) {
        let _ = self.recycle_tx.try_send(frame);
    }

    /// Hands a fully written frame to the renderer.
    pub fn publish(&self, frame: RenderFrame) {
        match self.publish_tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::warn!("render queue full, frame dropped"),
            Err(TrySendError::Disconnected(_)) => log::debug!("renderer gone, frame dropped"),
        }
    }
}

pub struct FrameSubscriber {
    publish_rx: Receiver<RenderFrame>,
    recycle_tx: Sender<RenderFrame>,
    current: Option<RenderFrame>,
}

impl FrameSubscriber {
    /// Swaps in the newest published frame, if any, and returns the frame the
    /// renderer should draw.
    pub fn latest(&mut self) -> Option<&RenderFrame> {
        while let Ok(frame) = self.publish_rx.try_recv() {
            self.swap_in(frame);
        }
        self.current.as_ref()
    }

    /// Like [`FrameSubscriber::latest`], but waits up to `timeout` for a new
    /// frame. Returns `None` on timeout or once the pipeline is gone.
    pub fn wait_newer(&mut self, timeout: Duration) -> Option<&RenderFrame> {
        match self.publish_rx.recv_timeout(timeout) {
            Ok(frame) => {
                self.swap_in(frame);
                self.latest()
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn current(&self) -> Option<&RenderFrame> {
        self.current.as_ref()
    }

    /// Returns the held frame to the pool.
    pub fn release(&mut self) {
        if let Some(frame) = self.current.take() {
            let _ = self.recycle_tx.try_send(frame);
        }
    }

    /// Takes the held frame out of the pool for good.
    pub fn take(&mut self) -> Option<RenderFrame> {
        self.current.take()
    }

    fn swap_in(&mut self, frame: RenderFrame) {
        if let Some(old) = self.current.replace(frame) {
            let _ = self.recycle_tx.try_send(old);
        }
    }
}
