//! Sensor-facing side of the pipeline.
//!
//! A backend exposes a [`SensorProvider`] that hands out the default device.
//! [`SensorSession`] drives it through open / close and owns the multi-source
//! reader plus the coordinate mapper. Snapshots returned by the reader borrow
//! it mutably, so a snapshot (and every frame reference taken from it) is
//! released before the next acquisition can even be requested.

pub mod fixture;
pub mod mapper;
pub mod synthetic;

pub use mapper::{CoordinateMapper, Intrinsics, PinholeMapper};

use crate::{
    error::{AcquireError, DeviceError, ReaderError, SessionError},
    types::{GridSize, JOINT_COUNT, Joint},
};

/// Streams requested from the multi-source reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSources {
    pub color: bool,
    pub depth: bool,
    pub body_index: bool,
    pub body: bool,
}

impl FrameSources {
    pub const ALL: FrameSources = FrameSources {
        color: true,
        depth: true,
        body_index: true,
        body: true,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorFormat {
    Bgra,
    Rgba,
    Yuy2,
    Gray,
}

impl ColorFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            ColorFormat::Bgra | ColorFormat::Rgba => 4,
            ColorFormat::Yuy2 => 2,
            ColorFormat::Gray => 1,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ColorFrameRef<'a> {
    pub size: GridSize,
    pub format: ColorFormat,
    pub data: &'a [u8],
}

#[derive(Clone, Copy, Debug)]
pub struct DepthFrameRef<'a> {
    pub size: GridSize,
    pub min_reliable: u16,
    /// Sensor's own (conservative) reliable maximum. Informational only.
    pub max_reliable: u16,
    pub data: &'a [u16],
}

#[derive(Clone, Copy, Debug)]
pub struct BodyIndexFrameRef<'a> {
    pub size: GridSize,
    pub data: &'a [u8],
}

#[derive(Clone, Copy, Debug)]
pub struct BodyFrameRef<'a> {
    pub bodies: &'a [BodyData],
}

/// One body slot as reported by the sensor.
#[derive(Clone, Debug, PartialEq)]
pub struct BodyData {
    pub tracked: bool,
    /// `None` when the joint query failed for this body.
    pub joints: Option<[Joint; JOINT_COUNT]>,
}

impl BodyData {
    pub fn untracked() -> Self {
        Self {
            tracked: false,
            joints: None,
        }
    }
}

/// The latest synchronized set of frames across all requested streams.
///
/// Dropping the value releases it back to the reader.
pub trait Snapshot: Sync {
    fn color(&self) -> Option<ColorFrameRef<'_>>;
    fn depth(&self) -> Option<DepthFrameRef<'_>>;
    fn body_index(&self) -> Option<BodyIndexFrameRef<'_>>;
    fn bodies(&self) -> Option<BodyFrameRef<'_>>;
}

pub trait FrameReader: Send {
    type Snapshot<'a>: Snapshot
    where
        Self: 'a;

    /// Never blocks: either the newest snapshot or an immediate error.
    fn acquire_latest(&mut self) -> Result<Self::Snapshot<'_>, ReaderError>;
}

pub trait Sensor: Send {
    type Reader: FrameReader;
    type Mapper: CoordinateMapper;

    fn open(&mut self) -> Result<(), DeviceError>;
    fn open_reader(&mut self, sources: FrameSources) -> Result<Self::Reader, DeviceError>;
    fn coordinate_mapper(&self) -> Option<Self::Mapper>;
    fn close(&mut self);
}

pub trait SensorProvider {
    type Sensor: Sensor;

    fn default_sensor(&self) -> Option<Self::Sensor>;
}

/// Owned frame set, used by the in-process backends.
#[derive(Clone, Debug, Default)]
pub struct FrameSet {
    pub color: Option<ColorImage>,
    pub depth: Option<DepthImage>,
    pub body_index: Option<BodyIndexImage>,
    pub bodies: Option<Vec<BodyData>>,
}

#[derive(Clone, Debug)]
pub struct ColorImage {
    pub size: GridSize,
    pub format: ColorFormat,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct DepthImage {
    pub size: GridSize,
    pub min_reliable: u16,
    pub max_reliable: u16,
    pub data: Vec<u16>,
}

#[derive(Clone, Debug)]
pub struct BodyIndexImage {
    pub size: GridSize,
    pub data: Vec<u8>,
}

impl<T: Snapshot + ?Sized> Snapshot for &T {
    fn color(&self) -> Option<ColorFrameRef<'_>> {
        (**self).color()
    }

    fn depth(&self) -> Option<DepthFrameRef<'_>> {
        (**self).depth()
    }

    fn body_index(&self) -> Option<BodyIndexFrameRef<'_>> {
        (**self).body_index()
    }

    fn bodies(&self) -> Option<BodyFrameRef<'_>> {
        (**self).bodies()
    }
}

impl Snapshot for FrameSet {
    fn color(&self) -> Option<ColorFrameRef<'_>> {
        self.color.as_ref().map(|img| ColorFrameRef {
            size: img.size,
            format: img.format,
            data: &img.data,
        })
    }

    fn depth(&self) -> Option<DepthFrameRef<'_>> {
        self.depth.as_ref().map(|img| DepthFrameRef {
            size: img.size,
            min_reliable: img.min_reliable,
            max_reliable: img.max_reliable,
            data: &img.data,
        })
    }

    fn body_index(&self) -> Option<BodyIndexFrameRef<'_>> {
        self.body_index.as_ref().map(|img| BodyIndexFrameRef {
            size: img.size,
            data: &img.data,
        })
    }

    fn bodies(&self) -> Option<BodyFrameRef<'_>> {
        self.bodies
            .as_ref()
            .map(|bodies| BodyFrameRef { bodies })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Open,
    Closed,
}

/// A snapshot together with the mapper needed to project it.
pub struct Acquired<'a, S: Sensor + 'a> {
    pub snapshot: <S::Reader as FrameReader>::Snapshot<'a>,
    pub mapper: &'a S::Mapper,
}

pub struct SensorSession<S: Sensor> {
    state: SessionState,
    sensor: Option<S>,
    reader: Option<S::Reader>,
    mapper: Option<S::Mapper>,
}

impl<S: Sensor> Default for SensorSession<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Sensor> SensorSession<S> {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            sensor: None,
            reader: None,
            mapper: None,
        }
    }

    /// Opens the provider's default sensor with all four streams.
    pub fn open<P>(&mut self, provider: &P) -> Result<(), SessionError>
    where
        P: SensorProvider<Sensor = S>,
    {
        if self.state == SessionState::Open {
            return Ok(());
        }

        let mut sensor = provider
            .default_sensor()
            .ok_or(SessionError::DeviceUnavailable)?;

        sensor.open().map_err(SessionError::OpenFailed)?;

        let reader = match sensor.open_reader(FrameSources::ALL) {
            Ok(reader) => reader,
            Err(err) => {
                sensor.close();
                return Err(SessionError::OpenFailed(err));
            }
        };

        let Some(mapper) = sensor.coordinate_mapper() else {
            drop(reader);
            sensor.close();
            return Err(SessionError::MappingUnavailable);
        };

        log::info!("depth sensor open, multi-source reader ready");

        self.sensor = Some(sensor);
        self.reader = Some(reader);
        self.mapper = Some(mapper);
        self.state = SessionState::Open;
        Ok(())
    }

    /// Releases the reader and the device. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.state != SessionState::Open {
            return;
        }
        self.reader = None;
        self.mapper = None;
        if let Some(mut sensor) = self.sensor.take() {
            sensor.close();
        }
        self.state = SessionState::Closed;
        log::info!("depth sensor closed");
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mapper(&self) -> Option<&S::Mapper> {
        self.mapper.as_ref()
    }

    pub fn acquire(&mut self) -> Result<Acquired<'_, S>, AcquireError> {
        let (Some(reader), Some(mapper)) = (self.reader.as_mut(), self.mapper.as_ref()) else {
            return Err(AcquireError::NotInitialized);
        };
        let snapshot = reader.acquire_latest()?;
        Ok(Acquired { snapshot, mapper })
    }
}

impl<S: Sensor> Drop for SensorSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::{FixtureProvider, FixtureSensorConfig};
    use super::*;
    use crate::types::SensorGeometry;

    fn geometry() -> SensorGeometry {
        SensorGeometry {
            depth: GridSize::new(4, 4),
            color: GridSize::new(8, 8),
        }
    }

    #[test]
    fn missing_device_is_reported() {
        let provider = FixtureProvider::new(FixtureSensorConfig {
            present: false,
            ..FixtureSensorConfig::new(geometry())
        });
        let mut session = SensorSession::new();
        assert!(matches!(
            session.open(&provider),
            Err(SessionError::DeviceUnavailable)
        ));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn open_and_reader_failures_are_open_failed() {
        for (fail_open, fail_reader) in [(true, false), (false, true)] {
            let provider = FixtureProvider::new(FixtureSensorConfig {
                fail_open,
                fail_reader,
                ..FixtureSensorConfig::new(geometry())
            });
            let mut session = SensorSession::new();
            assert!(matches!(
                session.open(&provider),
                Err(SessionError::OpenFailed(_))
            ));
            assert_eq!(session.state(), SessionState::Uninitialized);
        }
    }

    #[test]
    fn missing_mapper_is_reported() {
        let provider = FixtureProvider::new(FixtureSensorConfig {
            with_mapper: false,
            ..FixtureSensorConfig::new(geometry())
        });
        let mut session = SensorSession::new();
        assert!(matches!(
            session.open(&provider),
            Err(SessionError::MappingUnavailable)
        ));
    }

    #[test]
    fn acquire_before_open_and_after_close_is_not_initialized() {
        let provider = FixtureProvider::new(FixtureSensorConfig::new(geometry()));
        let mut session = SensorSession::new();
        assert!(matches!(
            session.acquire(),
            Err(AcquireError::NotInitialized)
        ));

        session.open(&provider).unwrap();
        assert_eq!(session.state(), SessionState::Open);

        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(provider.closed());
        assert!(matches!(
            session.acquire(),
            Err(AcquireError::NotInitialized)
        ));
    }

    #[test]
    fn empty_reader_fails_the_acquisition() {
        let provider = FixtureProvider::new(FixtureSensorConfig::new(geometry()));
        let mut session = SensorSession::new();
        session.open(&provider).unwrap();
        assert!(matches!(
            session.acquire(),
            Err(AcquireError::AcquireFailed(ReaderError::NotReady))
        ));
    }
}
