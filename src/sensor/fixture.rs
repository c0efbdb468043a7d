//! Scripted in-memory sensor.
//!
//! Replays a queue of prepared frame sets (or reader failures), one per
//! acquisition. Used for deterministic runs such as the projection benchmark
//! and the integration tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use super::{
    BodyFrameRef, BodyIndexFrameRef, ColorFrameRef, CoordinateMapper, DepthFrameRef, FrameReader,
    FrameSet, FrameSources, PinholeMapper, Sensor, SensorProvider, Snapshot,
};
use crate::{
    error::{DeviceError, ReaderError},
    types::SensorGeometry,
};

type Script = Arc<Mutex<VecDeque<Result<FrameSet, ReaderError>>>>;

#[derive(Clone, Debug)]
pub struct FixtureSensorConfig {
    pub geometry: SensorGeometry,
    pub present: bool,
    pub fail_open: bool,
    pub fail_reader: bool,
    pub with_mapper: bool,
    /// Keep serving the last frame set once the script runs dry.
    pub repeat_last: bool,
}

impl FixtureSensorConfig {
    pub fn new(geometry: SensorGeometry) -> Self {
        Self {
            geometry,
            present: true,
            fail_open: false,
            fail_reader: false,
            with_mapper: true,
            repeat_last: false,
        }
    }
}

pub struct FixtureProvider<M = PinholeMapper> {
    config: FixtureSensorConfig,
    mapper: M,
    script: Script,
    live: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl FixtureProvider<PinholeMapper> {
    pub fn new(config: FixtureSensorConfig) -> Self {
        let mapper = PinholeMapper::for_geometry(config.geometry);
        Self::with_mapper(config, mapper)
    }
}

impl<M> FixtureProvider<M>
where
    M: CoordinateMapper + Clone,
{
    pub fn with_mapper(config: FixtureSensorConfig, mapper: M) -> Self {
        Self {
            config,
            mapper,
            script: Arc::new(Mutex::new(VecDeque::new())),
            live: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn push(&self, frames: FrameSet) {
        self.lock_script().push_back(Ok(frames));
    }

    pub fn push_failure(&self, err: ReaderError) {
        self.lock_script().push_back(Err(err));
    }

    /// Snapshots handed out and not yet dropped.
    pub fn live_snapshots(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock_script(&self) -> MutexGuard<'_, VecDeque<Result<FrameSet, ReaderError>>> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M> SensorProvider for FixtureProvider<M>
where
    M: CoordinateMapper + Clone,
{
    type Sensor = FixtureSensor<M>;

    fn default_sensor(&self) -> Option<Self::Sensor> {
        if !self.config.present {
            return None;
        }
        Some(FixtureSensor {
            config: self.config.clone(),
            mapper: self.mapper.clone(),
            script: self.script.clone(),
            live: self.live.clone(),
            closed: self.closed.clone(),
        })
    }
}

pub struct FixtureSensor<M> {
    config: FixtureSensorConfig,
    mapper: M,
    script: Script,
    live: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl<M> Sensor for FixtureSensor<M>
where
    M: CoordinateMapper + Clone,
{
    type Reader = FixtureReader;
    type Mapper = M;

    fn open(&mut self) -> Result<(), DeviceError> {
        if self.config.fail_open {
            return Err(DeviceError::new("fixture device refused to open"));
        }
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn open_reader(&mut self, _sources: FrameSources) -> Result<Self::Reader, DeviceError> {
        if self.config.fail_reader {
            return Err(DeviceError::new("fixture reader unavailable"));
        }
        Ok(FixtureReader {
            script: self.script.clone(),
            live: self.live.clone(),
            current: None,
            repeat_last: self.config.repeat_last,
        })
    }

    fn coordinate_mapper(&self) -> Option<Self::Mapper> {
        self.config.with_mapper.then(|| self.mapper.clone())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FixtureReader {
    script: Script,
    live: Arc<AtomicUsize>,
    current: Option<FrameSet>,
    repeat_last: bool,
}

impl FrameReader for FixtureReader {
    type Snapshot<'a> = FixtureSnapshot<'a>;

    fn acquire_latest(&mut self) -> Result<Self::Snapshot<'_>, ReaderError> {
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match next {
            Some(Ok(frames)) => self.current = Some(frames),
            Some(Err(err)) => return Err(err),
            None if self.repeat_last => {}
            None => return Err(ReaderError::NotReady),
        }

        let frames = self.current.as_ref().ok_or(ReaderError::NotReady)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(FixtureSnapshot {
            frames,
            live: &*self.live,
        })
    }
}

pub struct FixtureSnapshot<'a> {
    frames: &'a FrameSet,
    live: &'a AtomicUsize,
}

impl Snapshot for FixtureSnapshot<'_> {
    fn color(&self) -> Option<ColorFrameRef<'_>> {
        self.frames.color()
    }

    fn depth(&self) -> Option<DepthFrameRef<'_>> {
        self.frames.depth()
    }

    fn body_index(&self) -> Option<BodyIndexFrameRef<'_>> {
        self.frames.body_index()
    }

    fn bodies(&self) -> Option<BodyFrameRef<'_>> {
        self.frames.bodies()
    }
}

impl Drop for FixtureSnapshot<'_> {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
