use ndarray::{Array3, ArrayView2, s};

use crate::{
    error::FrameError,
    sensor::{BodyData, BodyFrameRef},
    types::{
        BODY_COUNT, Bgra, CameraSpacePoint, FLOATS_PER_VERTEX, GridSize, JOINT_COUNT, JointType,
        Modality,
    },
};

/// Head position reported for a body slot that has no tracked head this tick.
pub const DEFAULT_HEAD: CameraSpacePoint = CameraSpacePoint::new(0.0, 0.7, 0.0);

pub const BONES: &[(JointType, JointType)] = &[
    (JointType::Head, JointType::Neck),
    (JointType::Neck, JointType::SpineShoulder),
    (JointType::SpineShoulder, JointType::SpineMid),
    (JointType::SpineMid, JointType::SpineBase),
    (JointType::SpineShoulder, JointType::ShoulderRight),
    (JointType::SpineShoulder, JointType::ShoulderLeft),
    (JointType::SpineBase, JointType::HipRight),
    (JointType::SpineBase, JointType::HipLeft),
    (JointType::ShoulderRight, JointType::ElbowRight),
    (JointType::ElbowRight, JointType::WristRight),
    (JointType::WristRight, JointType::HandRight),
    (JointType::HandRight, JointType::HandTipRight),
    (JointType::WristRight, JointType::ThumbRight),
    (JointType::ShoulderLeft, JointType::ElbowLeft),
    (JointType::ElbowLeft, JointType::WristLeft),
    (JointType::WristLeft, JointType::HandLeft),
    (JointType::HandLeft, JointType::HandTipLeft),
    (JointType::WristLeft, JointType::ThumbLeft),
    (JointType::HipRight, JointType::KneeRight),
    (JointType::KneeRight, JointType::AnkleRight),
    (JointType::AnkleRight, JointType::FootRight),
    (JointType::HipLeft, JointType::KneeLeft),
    (JointType::KneeLeft, JointType::AnkleLeft),
    (JointType::AnkleLeft, JointType::FootLeft),
];

pub const BONE_THICKNESS: i32 = 3;
pub const BONE_COLOR: Bgra = Bgra::new(56, 189, 248);
pub const JOINT_COLOR: Bgra = Bgra::new(248, 113, 113);

/// Joint records for all body slots, laid out `[body][joint][x, y, z, r, g, b]`.
///
/// Slots that lose tracking keep their last joint data; only the tracked flag
/// changes, so readers must check [`SkeletonSet::is_tracked`] first.
#[derive(Clone, Debug)]
pub struct SkeletonSet {
    joints: Array3<f32>,
    tracked: [bool; BODY_COUNT],
    heads: [CameraSpacePoint; BODY_COUNT],
    marker_color: [f32; 3],
}

impl SkeletonSet {
    pub fn new(marker_color: [f32; 3]) -> Self {
        Self {
            joints: Array3::zeros((BODY_COUNT, JOINT_COUNT, FLOATS_PER_VERTEX)),
            tracked: [false; BODY_COUNT],
            heads: [DEFAULT_HEAD; BODY_COUNT],
            marker_color,
        }
    }

    /// Refreshes every slot from the latest body frame.
    pub fn refresh(&mut self, frame: &BodyFrameRef<'_>) -> Result<(), FrameError> {
        if frame.bodies.len() > BODY_COUNT {
            return Err(FrameError::TooManyBodies {
                modality: Modality::Body,
                count: frame.bodies.len(),
                max: BODY_COUNT,
            });
        }

        self.heads = [DEFAULT_HEAD; BODY_COUNT];
        for body in 0..BODY_COUNT {
            self.tracked[body] = match frame.bodies.get(body) {
                Some(BodyData {
                    tracked: true,
                    joints: Some(joints),
                }) => {
                    let [r, g, b] = self.marker_color;
                    let mut slot = self.joints.slice_mut(s![body, .., ..]);
                    for joint in joints {
                        let p = joint.position;
                        let mut record = slot.row_mut(joint.joint_type.index());
                        for (dst, value) in record.iter_mut().zip([p.x, p.y, p.z, r, g, b]) {
                            *dst = value;
                        }
                    }
                    if let Some(head) = joints.iter().find(|j| j.joint_type == JointType::Head) {
                        self.heads[body] = head.position;
                    }
                    true
                }
                Some(BodyData { tracked: true, .. }) => {
                    log::debug!("joint query failed for body {body}, treating as untracked");
                    false
                }
                _ => false,
            };
        }
        Ok(())
    }

    pub fn is_tracked(&self, body: usize) -> bool {
        self.tracked.get(body).copied().unwrap_or(false)
    }

    pub fn tracked(&self) -> [bool; BODY_COUNT] {
        self.tracked
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.iter().filter(|&&t| t).count()
    }

    pub fn head_position(&self, body: usize) -> CameraSpacePoint {
        self.heads.get(body).copied().unwrap_or(DEFAULT_HEAD)
    }

    pub fn joint_position(&self, body: usize, joint: JointType) -> CameraSpacePoint {
        let record = self.joints.slice(s![body, joint.index(), ..]);
        CameraSpacePoint::new(record[0], record[1], record[2])
    }

    /// `JOINT_COUNT x FLOATS_PER_VERTEX` view of one body slot.
    pub fn body_joints(&self, body: usize) -> ArrayView2<'_, f32> {
        self.joints.slice(s![body, .., ..])
    }

    /// Flat joint buffer for the renderer.
    pub fn as_slice(&self) -> &[f32] {
        self.joints.as_slice().unwrap_or_default()
    }

    pub fn copy_from(&mut self, other: &SkeletonSet) {
        self.joints.assign(&other.joints);
        self.tracked = other.tracked;
        self.heads = other.heads;
        self.marker_color = other.marker_color;
    }
}

/// Draws the bones and joints of one body over a BGRA image. `points` holds
/// one image position per joint, `None` where the joint does not project.
pub fn draw_skeleton(buffer: &mut [Bgra], size: GridSize, points: &[Option<(f32, f32)>]) {
    if points.len() < JOINT_COUNT {
        return;
    }

    for &(a, b) in BONES {
        let (Some(pa), Some(pb)) = (points[a.index()], points[b.index()]) else {
            continue;
        };
        if let Some((pa, pb)) = clip_segment(pa, pb, size) {
            draw_line(buffer, size, pa, pb, BONE_COLOR, BONE_THICKNESS);
        }
    }

    let point_radius = (BONE_THICKNESS / 2).max(1) + 1;
    let reach = point_radius as f32;
    for &(x, y) in points.iter().flatten() {
        let near = x.is_finite()
            && y.is_finite()
            && (-reach..size.width as f32 + reach).contains(&x)
            && (-reach..size.height as f32 + reach).contains(&y);
        if near {
            draw_circle(buffer, size, (x as i32, y as i32), point_radius, JOINT_COLOR);
        }
    }
}

/// Liang-Barsky clip of the segment `p0..p1` to the image rectangle. Joints
/// close to the camera plane project arbitrarily far off-screen, so lines are
/// only ever rasterized inside the image.
fn clip_segment(
    p0: (f32, f32),
    p1: (f32, f32),
    size: GridSize,
) -> Option<((f32, f32), (f32, f32))> {
    if size.is_empty() || ![p0.0, p0.1, p1.0, p1.1].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (x0, y0) = (f64::from(p0.0), f64::from(p0.1));
    let (dx, dy) = (f64::from(p1.0) - x0, f64::from(p1.1) - y0);
    let xmax = f64::from(size.width - 1);
    let ymax = f64::from(size.height - 1);

    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    for (p, q) in [(-dx, x0), (dx, xmax - x0), (-dy, y0), (dy, ymax - y0)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    let at = |t: f64| {
        (
            (x0 + t * dx).clamp(0.0, xmax) as f32,
            (y0 + t * dy).clamp(0.0, ymax) as f32,
        )
    };
    Some((at(t0), at(t1)))
}

fn draw_line(
    buffer: &mut [Bgra],
    size: GridSize,
    p0: (f32, f32),
    p1: (f32, f32),
    color: Bgra,
    thickness: i32,
) {
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        for ox in -radius..=radius {
            for oy in -radius..=radius {
                if ox.abs() + oy.abs() <= radius {
                    put_pixel_safe(buffer, size, x0 + ox, y0 + oy, color);
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(buffer: &mut [Bgra], size: GridSize, center: (i32, i32), radius: i32, color: Bgra) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(buffer, size, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel_safe(buffer: &mut [Bgra], size: GridSize, x: i32, y: i32, color: Bgra) {
    if !size.contains(x, y) {
        return;
    }
    let idx = y as usize * size.width as usize + x as usize;
    if let Some(px) = buffer.get_mut(idx) {
        *px = color;
    }
}
