//! Snapshot building: live physics state joined with the entity registry

use tracing::warn;

use crate::physics::{PhysicsWorld, ShapeDesc};
use crate::ws::protocol::{EntityState, ServerMsg, WireCollider};

use super::registry::EntityRegistry;

fn wire_collider(shape: ShapeDesc, offset: [f32; 3]) -> WireCollider {
    let offset = if offset == [0.0; 3] {
        None
    } else {
        Some(offset)
    };
    match shape {
        ShapeDesc::Box { half_extents } => WireCollider::Box {
            half_extents,
            offset,
        },
        ShapeDesc::Sphere { radius } => WireCollider::Sphere { radius, offset },
        ShapeDesc::Cylinder {
            half_height,
            radius,
        } => WireCollider::Cylinder {
            half_height,
            radius,
            offset,
        },
        ShapeDesc::Plane { normal } => WireCollider::Plane { normal, offset },
    }
}

/// Build the full authoritative snapshot for one tick.
///
/// Poses come from `PhysicsWorld::serialize_all`, i.e. the live engine
/// state after this tick's flush; entity identity and model references come
/// from the registry. A body without a registry entry is a dual-ownership
/// drift and gets logged, never silently serialized.
pub fn build_snapshot(tick: u64, registry: &EntityRegistry, world: &PhysicsWorld) -> ServerMsg {
    let mut entities = Vec::with_capacity(registry.len());
    for frame in world.serialize_all() {
        let Some(id) = registry.id_for_body(frame.body) else {
            warn!(body = ?frame.body, "physics body has no registered entity, skipping");
            continue;
        };
        let Some(entity) = registry.get(id) else {
            continue;
        };
        entities.push(EntityState {
            id: entity.id.clone(),
            model_refs: entity.model_refs.clone(),
            position: frame.position,
            quaternion: frame.quaternion,
            colliders: frame
                .colliders
                .iter()
                .map(|(shape, offset)| wire_collider(*shape, *offset))
                .collect(),
        });
    }
    // Stable wire order regardless of engine-internal body order
    entities.sort_by(|a, b| a.id.cmp(&b.id));

    ServerMsg::EntireGameState { tick, entities }
}
