use std::fmt;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Maximum number of bodies the sensor tracks at once.
pub const BODY_COUNT: usize = 6;
/// Number of joints reported for every tracked body.
pub const JOINT_COUNT: usize = 25;
/// Body-index value meaning "no tracked body at this pixel".
pub const NO_BODY: u8 = 0xFF;

pub const KINECT_DEPTH_WIDTH: u32 = 512;
pub const KINECT_DEPTH_HEIGHT: u32 = 424;
pub const KINECT_COLOR_WIDTH: u32 = 1920;
pub const KINECT_COLOR_HEIGHT: u32 = 1080;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub width: u32,
    pub height: u32,
}

impl GridSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }
}

impl fmt::Display for GridSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Native resolutions of the depth and color streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorGeometry {
    pub depth: GridSize,
    pub color: GridSize,
}

impl SensorGeometry {
    pub const KINECT_V2: SensorGeometry = SensorGeometry {
        depth: GridSize::new(KINECT_DEPTH_WIDTH, KINECT_DEPTH_HEIGHT),
        color: GridSize::new(KINECT_COLOR_WIDTH, KINECT_COLOR_HEIGHT),
    };
}

impl Default for SensorGeometry {
    fn default() -> Self {
        Self::KINECT_V2
    }
}

/// One color sample in the rendering format (BGRA, 8 bits per channel).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Bgra {
    pub b: u8,
    pub g: u8,
    pub r: u8,
    pub a: u8,
}

impl Bgra {
    pub const BLACK: Bgra = Bgra::gray(0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { b, g, r, a: 255 }
    }

    pub const fn gray(value: u8) -> Self {
        Self::new(value, value, value)
    }

    /// Color channels scaled to `[0, 1]`, in RGB order.
    pub fn normalized_rgb(&self) -> [f32; 3] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        ]
    }
}

/// Pixel coordinate in the depth grid.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DepthSpacePoint {
    pub x: f32,
    pub y: f32,
}

/// Sub-pixel coordinate in the color grid.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ColorSpacePoint {
    pub x: f32,
    pub y: f32,
}

impl ColorSpacePoint {
    /// Nearest color pixel, `floor(v + 0.5)` on both axes. `None` for non-finite input.
    pub fn nearest_pixel(&self) -> Option<(i32, i32)> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return None;
        }
        Some((
            (self.x + 0.5).floor() as i32,
            (self.y + 0.5).floor() as i32,
        ))
    }
}

/// Position in camera space, meters, Y up.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraSpacePoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl CameraSpacePoint {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Interleaved point-cloud record handed to the renderer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

/// Number of `f32` values per vertex / joint record.
pub const FLOATS_PER_VERTEX: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Modality {
    Color,
    Depth,
    BodyIndex,
    Body,
}

impl Modality {
    pub fn label(&self) -> &'static str {
        match self {
            Modality::Color => "color",
            Modality::Depth => "depth",
            Modality::BodyIndex => "body-index",
            Modality::Body => "body",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JointType {
    SpineBase = 0,
    SpineMid,
    Neck,
    Head,
    ShoulderLeft,
    ElbowLeft,
    WristLeft,
    HandLeft,
    ShoulderRight,
    ElbowRight,
    WristRight,
    HandRight,
    HipLeft,
    KneeLeft,
    AnkleLeft,
    FootLeft,
    HipRight,
    KneeRight,
    AnkleRight,
    FootRight,
    SpineShoulder,
    HandTipLeft,
    ThumbLeft,
    HandTipRight,
    ThumbRight,
}

impl JointType {
    pub const ALL: [JointType; JOINT_COUNT] = [
        JointType::SpineBase,
        JointType::SpineMid,
        JointType::Neck,
        JointType::Head,
        JointType::ShoulderLeft,
        JointType::ElbowLeft,
        JointType::WristLeft,
        JointType::HandLeft,
        JointType::ShoulderRight,
        JointType::ElbowRight,
        JointType::WristRight,
        JointType::HandRight,
        JointType::HipLeft,
        JointType::KneeLeft,
        JointType::AnkleLeft,
        JointType::FootLeft,
        JointType::HipRight,
        JointType::KneeRight,
        JointType::AnkleRight,
        JointType::FootRight,
        JointType::SpineShoulder,
        JointType::HandTipLeft,
        JointType::ThumbLeft,
        JointType::HandTipRight,
        JointType::ThumbRight,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Joint {
    pub joint_type: JointType,
    pub position: CameraSpacePoint,
}
