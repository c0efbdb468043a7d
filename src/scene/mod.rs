pub mod bridge;
pub mod world;

pub use bridge::{SceneBridge, SceneObject};
pub use world::{BodyDesc, BodyId, Motion, PhysicsWorld, Shape, SimpleWorld, Transform};

/// Ground plane, a tall box and a ball, as in the demo room.
pub fn populate_demo_scene<W>(world: &mut W, bridge: &mut SceneBridge)
where
    W: PhysicsWorld + ?Sized,
{
    let ground = world.create_body(BodyDesc::ground_plane(-1.0));
    world.add_body(ground);
    bridge.spawn(world, BodyDesc::dynamic_box([0.0, -0.9, 0.6], [0.1, 0.7, 0.1]));
    bridge.spawn(world, BodyDesc::dynamic_sphere([0.35, 2.0, 0.8], 0.15));
}
