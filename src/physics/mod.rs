//! Rigid-body simulation wrapper
//!
//! Owns all rapier3d state for one session. The rest of the crate never
//! touches rapier types directly; bodies are created from [`BodySpec`]
//! descriptions and referred to by opaque handles.

pub mod collision;

use rapier3d::parry::query::RayCast;
use rapier3d::parry::shape::TypedShape;
use rapier3d::prelude::*;
use tracing::warn;

use crate::util::time::tick_delta;

pub use collision::TagClass;

/// Opaque handle to a body registered in the world
pub type BodyHandle = RigidBodyHandle;

/// Physics-level failures
#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    #[error("invalid collider shape: {0}")]
    InvalidShape(String),

    #[error("simulation diverged: body {0:?} has a non-finite position")]
    Diverged(BodyHandle),
}

/// Collision shape description, validated before any body is built
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShapeDesc {
    Box { half_extents: [f32; 3] },
    Sphere { radius: f32 },
    Cylinder { half_height: f32, radius: f32 },
    Plane { normal: [f32; 3] },
}

impl ShapeDesc {
    /// Reject non-finite or non-positive dimensions before anything is
    /// handed to the engine.
    pub fn validate(&self) -> Result<(), PhysicsError> {
        let ok = match *self {
            ShapeDesc::Box { half_extents } => {
                half_extents.iter().all(|v| v.is_finite() && *v > 0.0)
            }
            ShapeDesc::Sphere { radius } => radius.is_finite() && radius > 0.0,
            ShapeDesc::Cylinder {
                half_height,
                radius,
            } => half_height.is_finite() && half_height > 0.0 && radius.is_finite() && radius > 0.0,
            ShapeDesc::Plane { normal } => {
                normal.iter().all(|v| v.is_finite())
                    && normal.iter().map(|v| v * v).sum::<f32>() > 0.0
            }
        };
        if ok {
            Ok(())
        } else {
            Err(PhysicsError::InvalidShape(format!("{:?}", self)))
        }
    }

    fn builder(&self) -> ColliderBuilder {
        match *self {
            ShapeDesc::Box { half_extents } => {
                ColliderBuilder::cuboid(half_extents[0], half_extents[1], half_extents[2])
            }
            ShapeDesc::Sphere { radius } => ColliderBuilder::ball(radius),
            ShapeDesc::Cylinder {
                half_height,
                radius,
            } => ColliderBuilder::cylinder(half_height, radius),
            ShapeDesc::Plane { normal } => ColliderBuilder::halfspace(UnitVector::new_normalize(
                vector![normal[0], normal[1], normal[2]],
            )),
        }
    }
}

/// One collider attached to a body, with its offset from the body origin
#[derive(Debug, Clone, Copy)]
pub struct ColliderSpec {
    pub shape: ShapeDesc,
    pub offset: [f32; 3],
    pub sensor: bool,
}

impl ColliderSpec {
    pub fn solid(shape: ShapeDesc) -> Self {
        Self {
            shape,
            offset: [0.0; 3],
            sensor: false,
        }
    }

    pub fn with_offset(mut self, offset: [f32; 3]) -> Self {
        self.offset = offset;
        self
    }
}

/// Motion class of a body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Fixed,
    Dynamic,
}

/// Full description of a body to register
#[derive(Debug, Clone)]
pub struct BodySpec {
    pub kind: BodyKind,
    pub position: [f32; 3],
    pub colliders: Vec<ColliderSpec>,
    pub tag: TagClass,
    /// Upright bodies (players, hero) never tumble
    pub lock_rotations: bool,
    pub linear_damping: f32,
}

impl BodySpec {
    pub fn fixed(position: [f32; 3], tag: TagClass, colliders: Vec<ColliderSpec>) -> Self {
        Self {
            kind: BodyKind::Fixed,
            position,
            colliders,
            tag,
            lock_rotations: false,
            linear_damping: 0.0,
        }
    }

    pub fn dynamic(position: [f32; 3], tag: TagClass, colliders: Vec<ColliderSpec>) -> Self {
        Self {
            kind: BodyKind::Dynamic,
            position,
            colliders,
            tag,
            lock_rotations: false,
            linear_damping: 0.0,
        }
    }

    pub fn upright(mut self) -> Self {
        self.lock_rotations = true;
        self
    }

    pub fn with_damping(mut self, damping: f32) -> Self {
        self.linear_damping = damping;
        self
    }
}

/// A single ray intersection. All fields are copied out of the engine's
/// scratch state before being returned; results stay valid across later
/// casts and steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub body: BodyHandle,
    pub distance: f32,
    pub point: [f32; 3],
    pub normal: [f32; 3],
}

/// Live pose + shape description of one body, read straight from the engine
#[derive(Debug, Clone)]
pub struct BodyFrame {
    pub body: BodyHandle,
    pub position: [f32; 3],
    pub quaternion: [f32; 4],
    pub colliders: Vec<(ShapeDesc, [f32; 3])>,
}

/// The rigid-body world for one session
pub struct PhysicsWorld {
    gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: BroadPhaseMultiSap,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
}

impl PhysicsWorld {
    pub fn new() -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        // One tick advances exactly one fixed time slice
        integration_parameters.dt = tick_delta();

        Self {
            gravity: vector![0.0, -9.81, 0.0],
            integration_parameters,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: BroadPhaseMultiSap::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
        }
    }

    /// Advance the simulation by one fixed time slice.
    ///
    /// A non-finite body position afterwards is a world-scoped fault; the
    /// caller must halt the loop.
    pub fn step(&mut self) -> Result<(), PhysicsError> {
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );

        for (handle, body) in self.bodies.iter() {
            let t = body.translation();
            if !(t.x.is_finite() && t.y.is_finite() && t.z.is_finite()) {
                return Err(PhysicsError::Diverged(handle));
            }
        }
        Ok(())
    }

    /// Register a body and its colliders. Shape validation happens before
    /// any engine state is touched, so a rejected spec leaves the world
    /// unchanged.
    pub fn add_body(&mut self, spec: &BodySpec) -> Result<BodyHandle, PhysicsError> {
        for collider in &spec.colliders {
            collider.shape.validate()?;
        }

        let mut builder = match spec.kind {
            BodyKind::Fixed => RigidBodyBuilder::fixed(),
            BodyKind::Dynamic => RigidBodyBuilder::dynamic(),
        }
        .translation(vector![
            spec.position[0],
            spec.position[1],
            spec.position[2]
        ])
        .linear_damping(spec.linear_damping);
        if spec.lock_rotations {
            builder = builder.lock_rotations();
        }
        let handle = self.bodies.insert(builder.build());

        let groups = spec.tag.interaction_groups();
        for collider in &spec.colliders {
            let built = collider
                .shape
                .builder()
                .translation(vector![
                    collider.offset[0],
                    collider.offset[1],
                    collider.offset[2]
                ])
                .sensor(collider.sensor)
                .collision_groups(groups)
                .build();
            self.colliders
                .insert_with_parent(built, handle, &mut self.bodies);
        }

        Ok(handle)
    }

    /// Remove a body and its colliders. Removing an unregistered body is a
    /// no-op; double-delete races resolve silently.
    pub fn remove_body(&mut self, handle: BodyHandle) {
        if self.bodies.get(handle).is_none() {
            return;
        }
        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    pub fn contains(&self, handle: BodyHandle) -> bool {
        self.bodies.get(handle).is_some()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn translation(&self, handle: BodyHandle) -> Option<[f32; 3]> {
        self.bodies.get(handle).map(|b| {
            let t = b.translation();
            [t.x, t.y, t.z]
        })
    }

    pub fn linvel(&self, handle: BodyHandle) -> Option<[f32; 3]> {
        self.bodies.get(handle).map(|b| {
            let v = b.linvel();
            [v.x, v.y, v.z]
        })
    }

    pub fn set_linvel(&mut self, handle: BodyHandle, vel: [f32; 3]) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_linvel(vector![vel[0], vel[1], vel[2]], true);
        }
    }

    pub fn apply_impulse(&mut self, handle: BodyHandle, impulse: [f32; 3]) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.apply_impulse(vector![impulse[0], impulse[1], impulse[2]], true);
        }
    }

    /// Cast a ray and return every intersection, closest first.
    ///
    /// The engine's ray-cast scratch buffers are reused across calls, so
    /// every hit is deep-copied into owned [`RayHit`] values here.
    pub fn raycast(
        &self,
        from: [f32; 3],
        dir: [f32; 3],
        max_len: f32,
        filter: Option<InteractionGroups>,
        ignore: Option<BodyHandle>,
    ) -> Vec<RayHit> {
        let ray = Ray::new(
            point![from[0], from[1], from[2]],
            vector![dir[0], dir[1], dir[2]],
        );

        let mut hits = Vec::new();
        for (_, collider) in self.colliders.iter() {
            let parent = collider.parent();
            if let (Some(ignored), Some(parent)) = (ignore, parent) {
                if parent == ignored {
                    continue;
                }
            }
            if let Some(groups) = filter {
                if !groups.test(collider.collision_groups()) {
                    continue;
                }
            }
            if let Some(hit) =
                collider
                    .shape()
                    .cast_ray_and_get_normal(collider.position(), &ray, max_len, true)
            {
                let point = ray.point_at(hit.time_of_impact);
                let Some(parent) = parent else { continue };
                hits.push(RayHit {
                    body: parent,
                    distance: hit.time_of_impact,
                    point: [point.x, point.y, point.z],
                    normal: [hit.normal.x, hit.normal.y, hit.normal.z],
                });
            }
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    /// Touching body pairs from the last step's narrow phase, including
    /// sensor intersections.
    pub fn contacts(&self) -> Vec<(BodyHandle, BodyHandle)> {
        let mut pairs = Vec::new();
        for pair in self.narrow_phase.contact_pairs() {
            if !pair.has_any_active_contact {
                continue;
            }
            if let Some(bodies) = self.pair_bodies(pair.collider1, pair.collider2) {
                pairs.push(bodies);
            }
        }
        for (c1, c2, intersecting) in self.narrow_phase.intersection_pairs() {
            if !intersecting {
                continue;
            }
            if let Some(bodies) = self.pair_bodies(c1, c2) {
                pairs.push(bodies);
            }
        }
        pairs
    }

    fn pair_bodies(
        &self,
        c1: ColliderHandle,
        c2: ColliderHandle,
    ) -> Option<(BodyHandle, BodyHandle)> {
        let b1 = self.colliders.get(c1)?.parent()?;
        let b2 = self.colliders.get(c2)?.parent()?;
        Some((b1, b2))
    }

    /// Snapshot every body's pose and shape description.
    ///
    /// Sourced directly from the live engine sets at call time, never from a
    /// cached copy, so the wire snapshot cannot silently diverge from the
    /// simulation. An unexpected shape variant is a programming error: it is
    /// logged and skipped, never dropped silently.
    pub fn serialize_all(&self) -> Vec<BodyFrame> {
        let mut frames = Vec::with_capacity(self.bodies.len());
        for (handle, body) in self.bodies.iter() {
            let t = body.translation();
            let r = body.rotation();

            let mut shapes = Vec::new();
            for collider_handle in body.colliders() {
                let Some(collider) = self.colliders.get(*collider_handle) else {
                    continue;
                };
                let offset = collider.position_wrt_parent().map_or([0.0; 3], |iso| {
                    [iso.translation.x, iso.translation.y, iso.translation.z]
                });
                match collider.shape().as_typed_shape() {
                    TypedShape::Cuboid(c) => shapes.push((
                        ShapeDesc::Box {
                            half_extents: [
                                c.half_extents.x,
                                c.half_extents.y,
                                c.half_extents.z,
                            ],
                        },
                        offset,
                    )),
                    TypedShape::Ball(b) => {
                        shapes.push((ShapeDesc::Sphere { radius: b.radius }, offset))
                    }
                    TypedShape::Cylinder(c) => shapes.push((
                        ShapeDesc::Cylinder {
                            half_height: c.half_height,
                            radius: c.radius,
                        },
                        offset,
                    )),
                    TypedShape::HalfSpace(h) => shapes.push((
                        ShapeDesc::Plane {
                            normal: [h.normal.x, h.normal.y, h.normal.z],
                        },
                        offset,
                    )),
                    _ => {
                        warn!(
                            body = ?handle,
                            shape = ?collider.shape().shape_type(),
                            "unserializable collider shape, skipping"
                        );
                    }
                }
            }

            frames.push(BodyFrame {
                body: handle,
                position: [t.x, t.y, t.z],
                quaternion: [r.i, r.j, r.k, r.w],
                colliders: shapes,
            });
        }
        frames
    }
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ball_spec(position: [f32; 3], tag: TagClass) -> BodySpec {
        BodySpec::dynamic(position, tag, vec![ColliderSpec::solid(ShapeDesc::Sphere { radius: 0.5 })])
    }

    fn ground_spec() -> BodySpec {
        BodySpec::fixed(
            [0.0, 0.0, 0.0],
            TagClass::Environment,
            vec![ColliderSpec::solid(ShapeDesc::Plane {
                normal: [0.0, 1.0, 0.0],
            })],
        )
    }

    #[test]
    fn step_moves_dynamic_body_down() {
        let mut world = PhysicsWorld::new();
        let handle = world.add_body(&ball_spec([0.0, 10.0, 0.0], TagClass::Item)).unwrap();

        let before = world.translation(handle).unwrap();
        for _ in 0..10 {
            world.step().unwrap();
        }
        let after = world.translation(handle).unwrap();
        assert!(after[1] < before[1]);
    }

    #[test]
    fn remove_body_is_idempotent() {
        let mut world = PhysicsWorld::new();
        let handle = world.add_body(&ball_spec([0.0, 1.0, 0.0], TagClass::Item)).unwrap();
        assert_eq!(world.body_count(), 1);

        world.remove_body(handle);
        assert_eq!(world.body_count(), 0);

        // Second removal of the same handle: no-op, no panic
        world.remove_body(handle);
        assert_eq!(world.body_count(), 0);
    }

    #[test]
    fn invalid_shape_is_rejected_without_mutation() {
        let mut world = PhysicsWorld::new();
        let spec = BodySpec::dynamic(
            [0.0, 0.0, 0.0],
            TagClass::Item,
            vec![ColliderSpec::solid(ShapeDesc::Sphere { radius: -1.0 })],
        );
        assert!(matches!(
            world.add_body(&spec),
            Err(PhysicsError::InvalidShape(_))
        ));
        assert_eq!(world.body_count(), 0);
    }

    #[test]
    fn serialize_all_matches_live_positions() {
        let mut world = PhysicsWorld::new();
        world.add_body(&ground_spec()).unwrap();
        let ball = world.add_body(&ball_spec([0.0, 5.0, 0.0], TagClass::Item)).unwrap();

        for _ in 0..20 {
            world.step().unwrap();
        }

        let frames = world.serialize_all();
        let frame = frames.iter().find(|f| f.body == ball).unwrap();
        let live = world.translation(ball).unwrap();
        assert_eq!(frame.position, live);
    }

    #[test]
    fn raycast_results_survive_a_second_cast() {
        let mut world = PhysicsWorld::new();
        let near = world.add_body(&ball_spec([0.0, 0.0, -5.0], TagClass::Item)).unwrap();
        let far = world
            .add_body(&BodySpec::fixed(
                [20.0, 0.0, 0.0],
                TagClass::Environment,
                vec![ColliderSpec::solid(ShapeDesc::Box {
                    half_extents: [1.0, 1.0, 1.0],
                })],
            ))
            .unwrap();

        let first = world.raycast([0.0, 0.0, 0.0], [0.0, 0.0, -1.0], 100.0, None, None);
        let second = world.raycast([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], 100.0, None, None);

        // The first result set must not be corrupted by the second cast
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].body, near);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].body, far);
        assert!(first[0].distance > 0.0 && first[0].distance < 5.0);
        assert!((second[0].distance - 19.0).abs() < 0.1);
    }

    #[test]
    fn raycast_orders_hits_by_distance() {
        let mut world = PhysicsWorld::new();
        let far = world.add_body(&ball_spec([0.0, 0.0, -10.0], TagClass::Item)).unwrap();
        let near = world.add_body(&ball_spec([0.0, 0.0, -3.0], TagClass::Item)).unwrap();

        let hits = world.raycast([0.0, 0.0, 0.0], [0.0, 0.0, -1.0], 100.0, None, None);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].body, near);
        assert_eq!(hits[1].body, far);
    }

    #[test]
    fn raycast_respects_ignore_handle() {
        let mut world = PhysicsWorld::new();
        let shooter = world.add_body(&ball_spec([0.0, 0.0, 0.0], TagClass::Player)).unwrap();
        let target = world.add_body(&ball_spec([0.0, 0.0, -4.0], TagClass::Player)).unwrap();

        let hits = world.raycast([0.0, 0.0, 0.0], [0.0, 0.0, -1.0], 100.0, None, Some(shooter));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].body, target);
    }

    #[test]
    fn environment_bodies_do_not_contact_each_other() {
        let mut world = PhysicsWorld::new();
        world.add_body(&ground_spec()).unwrap();
        // Overlapping fixed environment box sitting in the ground plane
        world
            .add_body(&BodySpec::fixed(
                [0.0, -0.5, 0.0],
                TagClass::Environment,
                vec![ColliderSpec::solid(ShapeDesc::Box {
                    half_extents: [1.0, 1.0, 1.0],
                })],
            ))
            .unwrap();

        world.step().unwrap();
        assert!(world.contacts().is_empty());
    }
}
