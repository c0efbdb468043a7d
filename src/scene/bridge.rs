use crate::{
    config::PipelineConfig,
    pipeline::skeleton::SkeletonSet,
    scene::world::{BodyDesc, BodyId, PhysicsWorld, Transform},
    types::{BODY_COUNT, JOINT_COUNT, JointType},
};

/// Objects that fall below this height are put back at their home position.
pub const RESPAWN_HEIGHT: f32 = -5.0;

#[derive(Clone, Copy, Debug)]
pub struct SceneObject {
    pub id: BodyId,
    pub home: [f32; 3],
}

/// Keeps the physics world in step with the tracked skeletons.
///
/// Every body slot owns `JOINT_COUNT` kinematic proxies, created up front.
/// They join the world when the slot becomes tracked, follow the joints while
/// it stays tracked and leave when tracking is lost.
pub struct SceneBridge {
    proxies: Vec<BodyId>,
    planted: [bool; BODY_COUNT],
    objects: Vec<SceneObject>,
    physics_step: f32,
    max_sub_steps: u32,
    reset_requested: bool,
}

impl SceneBridge {
    pub fn new<W>(world: &mut W, physics_step: f32, max_sub_steps: u32) -> Self
    where
        W: PhysicsWorld + ?Sized,
    {
        let proxies = (0..BODY_COUNT * JOINT_COUNT)
            .map(|_| world.create_body(BodyDesc::joint_proxy()))
            .collect();
        Self {
            proxies,
            planted: [false; BODY_COUNT],
            objects: Vec::new(),
            physics_step,
            max_sub_steps,
            reset_requested: false,
        }
    }

    pub fn from_config<W>(world: &mut W, config: &PipelineConfig) -> Self
    where
        W: PhysicsWorld + ?Sized,
    {
        Self::new(world, config.physics_step, config.max_sub_steps)
    }

    /// Adds a dynamic object whose transform is reported every tick.
    pub fn spawn<W>(&mut self, world: &mut W, desc: BodyDesc) -> BodyId
    where
        W: PhysicsWorld + ?Sized,
    {
        let id = world.create_body(desc);
        world.add_body(id);
        self.objects.push(SceneObject {
            id,
            home: desc.transform.position,
        });
        id
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    /// Puts every object back at its home position before the next step.
    pub fn request_reset(&mut self) {
        self.reset_requested = true;
    }

    pub fn step<W>(&mut self, world: &mut W) -> u32
    where
        W: PhysicsWorld + ?Sized,
    {
        let reset_all = std::mem::take(&mut self.reset_requested);
        for object in &self.objects {
            let fell = world
                .world_transform(object.id)
                .is_some_and(|t| t.position[1] < RESPAWN_HEIGHT);
            if reset_all || fell {
                log::debug!("respawning scene object {:?}", object.id);
                world.set_world_transform(object.id, object.home);
            }
        }
        world.step_simulation(self.physics_step, self.max_sub_steps)
    }

    pub fn sync_skeleton<W>(&mut self, world: &mut W, skeleton: &SkeletonSet)
    where
        W: PhysicsWorld + ?Sized,
    {
        for body in 0..BODY_COUNT {
            let slot = &self.proxies[body * JOINT_COUNT..(body + 1) * JOINT_COUNT];
            if skeleton.is_tracked(body) {
                if !self.planted[body] {
                    for &id in slot {
                        world.add_body(id);
                    }
                    log::debug!("body {body} tracked, proxies added");
                }
                for (&id, joint) in slot.iter().zip(JointType::ALL) {
                    world.set_world_transform(id, skeleton.joint_position(body, joint).to_array());
                }
                self.planted[body] = true;
            } else if self.planted[body] {
                for &id in slot {
                    world.remove_body(id);
                }
                self.planted[body] = false;
                log::debug!("body {body} lost, proxies removed");
            }
        }
    }

    pub fn proxy(&self, body: usize, joint: JointType) -> Option<BodyId> {
        self.proxies.get(body * JOINT_COUNT + joint.index()).copied()
    }

    pub fn is_planted(&self, body: usize) -> bool {
        self.planted.get(body).copied().unwrap_or(false)
    }

    /// Replaces `out` with the current transform of every scene object.
    pub fn collect_transforms<W>(&self, world: &W, out: &mut Vec<(BodyId, Transform)>)
    where
        W: PhysicsWorld + ?Sized,
    {
        out.clear();
        out.extend(
            self.objects
                .iter()
                .filter_map(|object| Some((object.id, world.world_transform(object.id)?))),
        );
    }
}
