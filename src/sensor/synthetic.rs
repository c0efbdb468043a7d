//! Hardware-free sensor backend.
//!
//! A capture thread renders a moving scene (back wall, one person tagged with
//! body index 0 and a matching skeleton) and pushes frame sets through a
//! single-slot channel, replacing any set the reader has not picked up yet.
//! The reader drains the channel to the newest set.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use rayon::prelude::*;

use super::{
    BodyData, BodyIndexImage, ColorFormat, ColorImage, CoordinateMapper, DepthImage, FrameReader,
    FrameSet, FrameSources, PinholeMapper, Sensor, SensorProvider,
};
use crate::{
    error::{DeviceError, ReaderError},
    types::{
        BODY_COUNT, CameraSpacePoint, DepthSpacePoint, JOINT_COUNT, Joint, JointType, NO_BODY,
        SensorGeometry,
    },
};

const WALL_DEPTH_MM: f32 = 3000.0;
const PERSON_DEPTH_MM: f32 = 1800.0;

// Joint offsets from the person's center, meters.
const JOINT_OFFSETS: [[f32; 3]; JOINT_COUNT] = [
    [0.0, -0.10, 0.0],     // SpineBase
    [0.0, 0.15, 0.0],      // SpineMid
    [0.0, 0.45, 0.0],      // Neck
    [0.0, 0.60, 0.0],      // Head
    [-0.18, 0.38, 0.0],    // ShoulderLeft
    [-0.30, 0.15, 0.0],    // ElbowLeft
    [-0.35, -0.05, 0.0],   // WristLeft
    [-0.37, -0.12, 0.0],   // HandLeft
    [0.18, 0.38, 0.0],     // ShoulderRight
    [0.30, 0.15, 0.0],     // ElbowRight
    [0.35, -0.05, 0.0],    // WristRight
    [0.37, -0.12, 0.0],    // HandRight
    [-0.10, -0.15, 0.0],   // HipLeft
    [-0.11, -0.55, 0.0],   // KneeLeft
    [-0.12, -0.95, 0.0],   // AnkleLeft
    [-0.12, -1.00, -0.08], // FootLeft
    [0.10, -0.15, 0.0],    // HipRight
    [0.11, -0.55, 0.0],    // KneeRight
    [0.12, -0.95, 0.0],    // AnkleRight
    [0.12, -1.00, -0.08],  // FootRight
    [0.0, 0.38, 0.0],      // SpineShoulder
    [-0.38, -0.20, 0.0],   // HandTipLeft
    [-0.34, -0.14, -0.03], // ThumbLeft
    [0.38, -0.20, 0.0],    // HandTipRight
    [0.34, -0.14, -0.03],  // ThumbRight
];

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub geometry: SensorGeometry,
    pub color_format: ColorFormat,
    pub fps: u32,
    pub min_reliable: u16,
    pub max_reliable: u16,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            geometry: SensorGeometry::KINECT_V2,
            color_format: ColorFormat::Yuy2,
            fps: 30,
            min_reliable: 500,
            max_reliable: 4500,
        }
    }
}

/// Procedural scene shared by the capture thread and offline tools.
#[derive(Clone, Debug)]
pub struct SyntheticScene {
    config: SyntheticConfig,
    mapper: PinholeMapper,
}

impl SyntheticScene {
    pub fn new(config: SyntheticConfig) -> Self {
        let mapper = PinholeMapper::for_geometry(config.geometry);
        Self { config, mapper }
    }

    pub fn mapper(&self) -> PinholeMapper {
        self.mapper
    }

    /// Renders every stream at scene time `t` (seconds).
    pub fn render(&self, t: f32) -> FrameSet {
        let person = self.person_at(t);
        let (depth, body_index) = self.render_depth(&person);
        FrameSet {
            color: Some(self.render_color(&person)),
            depth: Some(depth),
            body_index: Some(body_index),
            bodies: Some(self.render_bodies(&person, t)),
        }
    }

    fn person_at(&self, t: f32) -> Person {
        let depth = self.config.geometry.depth;
        let center = DepthSpacePoint {
            x: depth.width as f32 * (0.5 + (t * 0.5).sin() / 6.0),
            y: depth.height as f32 * 0.55,
        };
        Person {
            center,
            radius_x: depth.width as f32 * 0.09,
            radius_y: depth.height as f32 * 0.35,
            camera: self
                .mapper
                .map_depth_to_camera(center, PERSON_DEPTH_MM as u16)
                .unwrap_or_default(),
        }
    }

    fn render_depth(&self, person: &Person) -> (DepthImage, BodyIndexImage) {
        let size = self.config.geometry.depth;
        let width = size.width as usize;
        let mut depth = vec![0u16; size.len()];
        let mut body_index = vec![NO_BODY; size.len()];

        depth
            .par_chunks_mut(width)
            .zip(body_index.par_chunks_mut(width))
            .enumerate()
            .for_each(|(y, (depth_row, index_row))| {
                for (x, (d, idx)) in depth_row.iter_mut().zip(index_row.iter_mut()).enumerate() {
                    if (x * 7 + y * 13) % 97 == 0 {
                        *d = 0;
                        continue;
                    }
                    let nx = (x as f32 - person.center.x) / person.radius_x;
                    let ny = (y as f32 - person.center.y) / person.radius_y;
                    let r2 = nx * nx + ny * ny;
                    if r2 <= 1.0 {
                        *d = (PERSON_DEPTH_MM - (1.0 - r2).sqrt() * 120.0) as u16;
                        *idx = 0;
                    } else {
                        *d = (WALL_DEPTH_MM + y as f32 * 2.0) as u16;
                    }
                }
            });

        (
            DepthImage {
                size,
                min_reliable: self.config.min_reliable,
                max_reliable: self.config.max_reliable,
                data: depth,
            },
            BodyIndexImage {
                size,
                data: body_index,
            },
        )
    }

    fn render_color(&self, person: &Person) -> ColorImage {
        let size = self.config.geometry.color;
        let format = self.config.color_format;
        let width = size.width as usize;
        let height = size.height as usize;
        let row_bytes = width * format.bytes_per_pixel();

        let center = self
            .mapper
            .map_camera_to_color(person.camera)
            .map(|p| (p.x, p.y))
            .unwrap_or((width as f32 / 2.0, height as f32 / 2.0));
        let scale = self.mapper.color.fx / self.mapper.depth.fx;
        let (rx, ry) = (person.radius_x * scale, person.radius_y * scale);

        let rgb_at = |x: usize, y: usize| -> [u8; 3] {
            let nx = (x as f32 - center.0) / rx;
            let ny = (y as f32 - center.1) / ry;
            if nx * nx + ny * ny <= 1.0 {
                return [230, 140, 60];
            }
            let checker = ((x / 64) + (y / 64)) % 2 == 0;
            let shade = if checker { 40 } else { 0 };
            [
                (x * 200 / width.max(1)) as u8 + shade,
                (y * 200 / height.max(1)) as u8 + shade,
                128,
            ]
        };

        let mut data = vec![0u8; row_bytes * height];
        data.par_chunks_mut(row_bytes)
            .enumerate()
            .for_each(|(y, row)| match format {
                ColorFormat::Bgra | ColorFormat::Rgba => {
                    for (x, px) in row.chunks_exact_mut(4).enumerate() {
                        let [r, g, b] = rgb_at(x, y);
                        if format == ColorFormat::Bgra {
                            px.copy_from_slice(&[b, g, r, 255]);
                        } else {
                            px.copy_from_slice(&[r, g, b, 255]);
                        }
                    }
                }
                ColorFormat::Gray => {
                    for (x, px) in row.iter_mut().enumerate() {
                        *px = luma(rgb_at(x, y));
                    }
                }
                ColorFormat::Yuy2 => {
                    for (pair, px) in row.chunks_exact_mut(4).enumerate() {
                        let left = rgb_at(pair * 2, y);
                        let right = rgb_at(pair * 2 + 1, y);
                        let (u, v) = chroma(left);
                        px.copy_from_slice(&[luma(left), u, luma(right), v]);
                    }
                }
            });

        ColorImage { size, format, data }
    }

    fn render_bodies(&self, person: &Person, t: f32) -> Vec<BodyData> {
        let mut joints = [Joint {
            joint_type: JointType::SpineBase,
            position: CameraSpacePoint::default(),
        }; JOINT_COUNT];

        let wave = (t * 3.0).sin() * 0.15;
        for (joint, (joint_type, offset)) in joints
            .iter_mut()
            .zip(JointType::ALL.iter().zip(JOINT_OFFSETS.iter()))
        {
            let lift = match joint_type {
                JointType::WristRight
                | JointType::HandRight
                | JointType::HandTipRight
                | JointType::ThumbRight => 0.45 + wave,
                _ => 0.0,
            };
            *joint = Joint {
                joint_type: *joint_type,
                position: CameraSpacePoint::new(
                    person.camera.x + offset[0],
                    person.camera.y + offset[1] + lift,
                    person.camera.z + offset[2],
                ),
            };
        }

        let mut bodies = vec![BodyData::untracked(); BODY_COUNT];
        bodies[0] = BodyData {
            tracked: true,
            joints: Some(joints),
        };
        bodies
    }
}

struct Person {
    center: DepthSpacePoint,
    radius_x: f32,
    radius_y: f32,
    camera: CameraSpacePoint,
}

// BT.709 full range.
fn luma([r, g, b]: [u8; 3]) -> u8 {
    (0.2126 * r as f32 + 0.7152 * g as f32 + 0.0722 * b as f32).round() as u8
}

fn chroma(rgb: [u8; 3]) -> (u8, u8) {
    let y = luma(rgb) as f32;
    let u = (rgb[2] as f32 - y) / 1.8556 + 128.0;
    let v = (rgb[0] as f32 - y) / 1.5748 + 128.0;
    (u.clamp(0.0, 255.0) as u8, v.clamp(0.0, 255.0) as u8)
}

pub struct SyntheticProvider {
    config: SyntheticConfig,
}

impl SyntheticProvider {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }
}

impl SensorProvider for SyntheticProvider {
    type Sensor = SyntheticSensor;

    fn default_sensor(&self) -> Option<Self::Sensor> {
        Some(SyntheticSensor {
            scene: SyntheticScene::new(self.config.clone()),
            fps: self.config.fps.max(1),
            opened: false,
        })
    }
}

pub struct SyntheticSensor {
    scene: SyntheticScene,
    fps: u32,
    opened: bool,
}

impl Sensor for SyntheticSensor {
    type Reader = SyntheticReader;
    type Mapper = PinholeMapper;

    fn open(&mut self) -> Result<(), DeviceError> {
        self.opened = true;
        Ok(())
    }

    fn open_reader(&mut self, sources: FrameSources) -> Result<Self::Reader, DeviceError> {
        if !self.opened {
            return Err(DeviceError::new("synthetic sensor is not open"));
        }
        let stream = CaptureStream::start(self.scene.clone(), self.fps)?;
        Ok(SyntheticReader {
            sources,
            stream,
            current: None,
        })
    }

    fn coordinate_mapper(&self) -> Option<Self::Mapper> {
        Some(self.scene.mapper())
    }

    fn close(&mut self) {
        self.opened = false;
    }
}

pub struct SyntheticReader {
    sources: FrameSources,
    stream: CaptureStream,
    current: Option<FrameSet>,
}

impl FrameReader for SyntheticReader {
    type Snapshot<'a> = &'a FrameSet;

    fn acquire_latest(&mut self) -> Result<Self::Snapshot<'_>, ReaderError> {
        let mut latest = None;
        loop {
            match self.stream.frame_rx.try_recv() {
                Ok(frames) => latest = Some(frames),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if latest.is_none() {
                        return Err(ReaderError::Failed("capture thread stopped".into()));
                    }
                    break;
                }
            }
        }

        let mut frames = latest.ok_or(ReaderError::NotReady)?;
        if !self.sources.color {
            frames.color = None;
        }
        if !self.sources.depth {
            frames.depth = None;
        }
        if !self.sources.body_index {
            frames.body_index = None;
        }
        if !self.sources.body {
            frames.bodies = None;
        }
        Ok(&*self.current.insert(frames))
    }
}

struct CaptureStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    frame_rx: Receiver<FrameSet>,
}

impl CaptureStream {
    fn start(scene: SyntheticScene, fps: u32) -> Result<Self, DeviceError> {
        let (frame_tx, frame_rx) = bounded(1);
        let stale_rx = frame_rx.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let period = Duration::from_secs_f64(1.0 / fps as f64);

        let handle = thread::Builder::new()
            .name("synthetic-capture".into())
            .spawn(move || {
                let started = Instant::now();
                while !stop_flag.load(Ordering::Relaxed) {
                    let frame_start = Instant::now();
                    let frames = scene.render(started.elapsed().as_secs_f32());

                    if !send_newest(&frame_tx, &stale_rx, frames) {
                        break;
                    }

                    if let Some(rest) = period.checked_sub(frame_start.elapsed()) {
                        thread::sleep(rest);
                    } else {
                        log::debug!(
                            "synthetic frame took {:?}, over the {:?} budget",
                            frame_start.elapsed(),
                            period
                        );
                    }
                }
            })
            .map_err(|err| DeviceError::new(format!("failed to spawn capture thread: {err}")))?;

        Ok(Self {
            stop,
            handle: Some(handle),
            frame_rx,
        })
    }
}

/// Sends `frames`, evicting the set still queued if the reader is behind.
/// Returns `false` once the channel is disconnected.
fn send_newest(tx: &Sender<FrameSet>, stale: &Receiver<FrameSet>, frames: FrameSet) -> bool {
    match tx.try_send(frames) {
        Ok(()) => true,
        Err(TrySendError::Full(frames)) => {
            let _ = stale.try_recv();
            !matches!(tx.try_send(frames), Err(TrySendError::Disconnected(_)))
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sensor::Snapshot, types::GridSize};

    fn small_config(format: ColorFormat) -> SyntheticConfig {
        SyntheticConfig {
            geometry: SensorGeometry {
                depth: GridSize::new(64, 53),
                color: GridSize::new(240, 135),
            },
            color_format: format,
            ..SyntheticConfig::default()
        }
    }

    #[test]
    fn scene_streams_have_native_sizes() {
        let scene = SyntheticScene::new(small_config(ColorFormat::Yuy2));
        let frames = scene.render(0.0);

        let depth = frames.depth().unwrap();
        assert_eq!(depth.data.len(), 64 * 53);
        let color = frames.color().unwrap();
        assert_eq!(color.data.len(), 240 * 135 * 2);
        assert_eq!(frames.body_index().unwrap().data.len(), 64 * 53);
        assert_eq!(frames.bodies().unwrap().bodies.len(), BODY_COUNT);
    }

    #[test]
    fn person_pixels_carry_body_index_zero() {
        let scene = SyntheticScene::new(small_config(ColorFormat::Bgra));
        let frames = scene.render(0.0);
        let depth = frames.depth().unwrap();
        let index = frames.body_index().unwrap();

        let tagged = index.data.iter().filter(|&&i| i == 0).count();
        assert!(tagged > 0);
        for (d, i) in depth.data.iter().zip(index.data) {
            if *i == 0 {
                assert!(*d == 0 || (*d as f32) < WALL_DEPTH_MM);
            }
        }
    }

    #[test]
    fn only_first_body_is_tracked() {
        let scene = SyntheticScene::new(small_config(ColorFormat::Bgra));
        let frames = scene.render(1.0);
        let bodies = frames.bodies().unwrap().bodies;
        assert!(bodies[0].tracked);
        assert!(bodies[0].joints.is_some());
        assert!(bodies[1..].iter().all(|b| !b.tracked));
    }

    fn tagged(tag: u8) -> FrameSet {
        FrameSet {
            body_index: Some(BodyIndexImage {
                size: GridSize::new(1, 1),
                data: vec![tag],
            }),
            ..FrameSet::default()
        }
    }

    #[test]
    fn queued_set_is_replaced_by_newer_one() {
        let (tx, rx) = bounded(1);
        let stale = rx.clone();
        assert!(send_newest(&tx, &stale, tagged(1)));
        assert!(send_newest(&tx, &stale, tagged(2)));
        assert!(send_newest(&tx, &stale, tagged(3)));

        let newest = rx.try_recv().unwrap();
        assert_eq!(newest.body_index.unwrap().data, vec![3]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reader_delivers_frames_from_capture_thread() {
        let provider = SyntheticProvider::new(SyntheticConfig {
            fps: 200,
            ..small_config(ColorFormat::Bgra)
        });
        let mut sensor = provider.default_sensor().unwrap();
        sensor.open().unwrap();
        let mut reader = sensor.open_reader(FrameSources::ALL).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match reader.acquire_latest() {
                Ok(snapshot) => {
                    assert!(snapshot.depth().is_some());
                    break;
                }
                Err(ReaderError::NotReady) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(2));
                }
                Err(err) => panic!("unexpected reader error: {err}"),
            }
        }
    }
}
