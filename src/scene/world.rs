//! Rigid-body world seam.
//!
//! The pipeline only needs to add, remove, move and query bodies and to step
//! the simulation. [`SimpleWorld`] is a small in-process stand-in: gravity, a
//! ground plane and sphere-bound contacts with kinematic bodies.

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub u32);

/// Position plus rotation quaternion `[x, y, z, w]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: [f32; 3],
    pub rotation: [f32; 4],
}

impl Transform {
    pub const IDENTITY: Transform = Transform::at([0.0; 3]);

    pub const fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Shape {
    Sphere { radius: f32 },
    Box { half_extents: [f32; 3] },
    /// Infinite horizontal plane at height `y`, normal +Y.
    GroundPlane { y: f32 },
}

impl Shape {
    fn bounding_radius(&self) -> f32 {
        match *self {
            Shape::Sphere { radius } => radius,
            Shape::Box { half_extents } => half_extents.iter().copied().fold(0.0, f32::max),
            Shape::GroundPlane { .. } => 0.0,
        }
    }

    /// Distance from the body origin to its lowest point.
    fn bottom_extent(&self) -> f32 {
        match *self {
            Shape::Sphere { radius } => radius,
            Shape::Box { half_extents } => half_extents[1],
            Shape::GroundPlane { .. } => 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Motion {
    Static,
    Dynamic,
    /// Moved only through [`PhysicsWorld::set_world_transform`].
    Kinematic,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodyDesc {
    pub shape: Shape,
    pub motion: Motion,
    pub mass: f32,
    pub restitution: f32,
    pub friction: f32,
    pub transform: Transform,
}

impl BodyDesc {
    /// Marker sphere that follows one tracked joint.
    pub fn joint_proxy() -> Self {
        Self {
            shape: Shape::Sphere { radius: 0.01 },
            motion: Motion::Kinematic,
            mass: 0.1,
            restitution: 0.1,
            friction: 2.0,
            transform: Transform::IDENTITY,
        }
    }

    pub fn ground_plane(y: f32) -> Self {
        Self {
            shape: Shape::GroundPlane { y },
            motion: Motion::Static,
            mass: 0.0,
            restitution: 0.8,
            friction: 1.0,
            transform: Transform::at([0.0, y, 0.0]),
        }
    }

    pub fn dynamic_box(position: [f32; 3], half_extents: [f32; 3]) -> Self {
        Self {
            shape: Shape::Box { half_extents },
            motion: Motion::Dynamic,
            mass: 1.0,
            restitution: 0.7,
            friction: 0.9,
            transform: Transform::at(position),
        }
    }

    pub fn dynamic_sphere(position: [f32; 3], radius: f32) -> Self {
        Self {
            shape: Shape::Sphere { radius },
            motion: Motion::Dynamic,
            mass: 1.0,
            restitution: 0.9,
            friction: 0.9,
            transform: Transform::at(position),
        }
    }
}

pub trait PhysicsWorld {
    /// Registers a body without adding it to the simulation.
    fn create_body(&mut self, desc: BodyDesc) -> BodyId;
    fn add_body(&mut self, id: BodyId);
    fn remove_body(&mut self, id: BodyId);
    fn contains(&self, id: BodyId) -> bool;
    /// Advances by `dt` in fixed internal steps, at most `max_sub_steps` of
    /// them. Returns the number of steps taken.
    fn step_simulation(&mut self, dt: f32, max_sub_steps: u32) -> u32;
    fn world_transform(&self, id: BodyId) -> Option<Transform>;
    fn set_world_transform(&mut self, id: BodyId, position: [f32; 3]);
}

#[derive(Clone, Debug)]
struct SimBody {
    desc: BodyDesc,
    transform: Transform,
    velocity: [f32; 3],
    in_world: bool,
}

pub struct SimpleWorld {
    gravity: [f32; 3],
    fixed_step: f32,
    accumulator: f32,
    bodies: HashMap<BodyId, SimBody>,
    next_id: u32,
}

impl Default for SimpleWorld {
    fn default() -> Self {
        Self::new([0.0, -9.8, 0.0])
    }
}

impl SimpleWorld {
    pub const FIXED_STEP: f32 = 1.0 / 60.0;

    pub fn new(gravity: [f32; 3]) -> Self {
        Self {
            gravity,
            fixed_step: Self::FIXED_STEP,
            accumulator: 0.0,
            bodies: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.values().filter(|b| b.in_world).count()
    }

    pub fn velocity(&self, id: BodyId) -> Option<[f32; 3]> {
        self.bodies.get(&id).map(|b| b.velocity)
    }

    fn integrate(&mut self, h: f32) {
        let ground = self
            .bodies
            .values()
            .filter(|b| b.in_world)
            .find_map(|b| match b.desc.shape {
                Shape::GroundPlane { y } => Some((y, b.desc.restitution, b.desc.friction)),
                _ => None,
            });
        let movers: Vec<([f32; 3], f32)> = self
            .bodies
            .values()
            .filter(|b| b.in_world && b.desc.motion == Motion::Kinematic)
            .map(|b| (b.transform.position, b.desc.shape.bounding_radius()))
            .collect();

        for body in self.bodies.values_mut() {
            if !body.in_world || body.desc.motion != Motion::Dynamic {
                continue;
            }
            for axis in 0..3 {
                body.velocity[axis] += self.gravity[axis] * h;
                body.transform.position[axis] += body.velocity[axis] * h;
            }

            if let Some((ground_y, ground_restitution, ground_friction)) = ground {
                let floor = ground_y + body.desc.shape.bottom_extent();
                if body.transform.position[1] < floor {
                    body.transform.position[1] = floor;
                    if body.velocity[1] < 0.0 {
                        body.velocity[1] *= -body.desc.restitution * ground_restitution;
                    }
                    let damping = (1.0 - body.desc.friction * ground_friction * h).max(0.0);
                    body.velocity[0] *= damping;
                    body.velocity[2] *= damping;
                }
            }

            let radius = body.desc.shape.bounding_radius();
            for &(center, mover_radius) in &movers {
                let delta = sub(body.transform.position, center);
                let distance = norm(delta);
                let reach = radius + mover_radius;
                if distance >= reach || distance <= f32::EPSILON {
                    continue;
                }
                let normal = delta.map(|c| c / distance);
                for axis in 0..3 {
                    body.transform.position[axis] += normal[axis] * (reach - distance);
                }
                let approach = dot(body.velocity, normal);
                if approach < 0.0 {
                    for axis in 0..3 {
                        body.velocity[axis] -= (1.0 + body.desc.restitution) * approach * normal[axis];
                    }
                }
            }
        }
    }
}

impl PhysicsWorld for SimpleWorld {
    fn create_body(&mut self, desc: BodyDesc) -> BodyId {
        let id = BodyId(self.next_id);
        self.next_id += 1;
        self.bodies.insert(
            id,
            SimBody {
                desc,
                transform: desc.transform,
                velocity: [0.0; 3],
                in_world: false,
            },
        );
        id
    }

    fn add_body(&mut self, id: BodyId) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.in_world = true;
        }
    }

    fn remove_body(&mut self, id: BodyId) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.in_world = false;
        }
    }

    fn contains(&self, id: BodyId) -> bool {
        self.bodies.get(&id).is_some_and(|b| b.in_world)
    }

    fn step_simulation(&mut self, dt: f32, max_sub_steps: u32) -> u32 {
        if !(dt.is_finite() && dt > 0.0) {
            return 0;
        }
        self.accumulator += dt;
        let mut steps = 0;
        while self.accumulator >= self.fixed_step && steps < max_sub_steps {
            self.integrate(self.fixed_step);
            self.accumulator -= self.fixed_step;
            steps += 1;
        }
        if steps == max_sub_steps {
            // Drop time the step budget could not absorb.
            self.accumulator = self.accumulator.min(self.fixed_step);
        }
        steps
    }

    fn world_transform(&self, id: BodyId) -> Option<Transform> {
        self.bodies.get(&id).map(|b| b.transform)
    }

    fn set_world_transform(&mut self, id: BodyId, position: [f32; 3]) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.transform.position = position;
            if body.desc.motion == Motion::Dynamic {
                body.velocity = [0.0; 3];
            }
        }
    }
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm(a: [f32; 3]) -> f32 {
    dot(a, a).sqrt()
}
