//! Entity model: identity, tags, physics body, and per-kind behavior

use uuid::Uuid;

use crate::physics::{BodyHandle, BodySpec, ColliderSpec, ShapeDesc, TagClass};
use crate::util::time::unix_millis;

use super::GameEvent;

pub const PLAYER_MAX_HEALTH: f32 = 100.0;
pub const HERO_MAX_HEALTH: f32 = 500.0;
pub const SABOTAGE_DAMAGE: f32 = 150.0;

/// Entity-scoped failure during action/collision resolution. Caught and
/// logged per entity; never aborts the tick for anyone else.
#[derive(Debug, thiserror::Error)]
pub enum EntityFault {
    #[error("entity is not interactable")]
    NotInteractable,

    #[error("entity cannot take damage")]
    Invulnerable,
}

/// Variant state per entity kind. Behavior is dispatched through
/// [`EntityLogic`] on the enum; no runtime type inspection anywhere.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Player {
        conn: Uuid,
        health: f32,
        alive: bool,
    },
    Item {
        item: String,
        picked: bool,
    },
    Lever {
        armed: bool,
    },
    Hero {
        health: f32,
        sabotaged: bool,
    },
    Environment,
}

/// What an entity wants done after reacting; structural changes are only
/// ever requested, never applied here.
#[derive(Debug, Default)]
pub struct Reaction {
    pub events: Vec<GameEvent>,
    pub despawn: bool,
}

impl Reaction {
    fn none() -> Self {
        Self::default()
    }
}

/// The explicit behavior interface for entity reactions
pub trait EntityLogic {
    fn on_collide(&mut self, other: TagClass, at: [f32; 3]) -> Result<Reaction, EntityFault>;
    fn interact(&mut self, at: [f32; 3]) -> Result<Reaction, EntityFault>;
    fn take_damage(&mut self, amount: f32, at: [f32; 3]) -> Result<Reaction, EntityFault>;
}

/// A live simulation entity. The registry owns the id mapping; the physics
/// world owns the body's presence in the simulation.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: String,
    pub model_refs: Vec<String>,
    pub kind: EntityKind,
    pub body: BodyHandle,
}

impl Entity {
    /// Tag class deriving collision filtering and dispatch
    pub fn tag(&self) -> TagClass {
        match &self.kind {
            EntityKind::Player { .. } => TagClass::Player,
            EntityKind::Item { .. } => TagClass::Item,
            EntityKind::Lever { .. } => TagClass::Interactable,
            EntityKind::Hero { .. } => TagClass::Hero,
            EntityKind::Environment => TagClass::Environment,
        }
    }

    pub fn is_alive_player(&self) -> bool {
        matches!(self.kind, EntityKind::Player { alive: true, .. })
    }
}

impl EntityLogic for Entity {
    fn on_collide(&mut self, other: TagClass, at: [f32; 3]) -> Result<Reaction, EntityFault> {
        match &mut self.kind {
            EntityKind::Item { item, picked } => {
                if other == TagClass::Player && !*picked {
                    *picked = true;
                    return Ok(Reaction {
                        events: vec![GameEvent::Sound {
                            sound: format!("pickup-{}", item),
                            position: at,
                        }],
                        despawn: true,
                    });
                }
                Ok(Reaction::none())
            }
            _ => Ok(Reaction::none()),
        }
    }

    fn interact(&mut self, at: [f32; 3]) -> Result<Reaction, EntityFault> {
        match &mut self.kind {
            EntityKind::Lever { armed } => {
                if *armed {
                    return Ok(Reaction::none());
                }
                *armed = true;
                Ok(Reaction {
                    events: vec![GameEvent::Sound {
                        sound: "lever".to_string(),
                        position: at,
                    }],
                    despawn: false,
                })
            }
            _ => Err(EntityFault::NotInteractable),
        }
    }

    fn take_damage(&mut self, amount: f32, at: [f32; 3]) -> Result<Reaction, EntityFault> {
        let id = self.id.clone();
        match &mut self.kind {
            EntityKind::Player { health, alive, .. } => {
                if !*alive {
                    return Ok(Reaction::none());
                }
                *health = (*health - amount).max(0.0);
                let mut events = vec![GameEvent::Damage {
                    entity_id: id,
                    amount,
                }];
                if *health <= 0.0 {
                    *alive = false;
                    events.push(GameEvent::Sound {
                        sound: "player-down".to_string(),
                        position: at,
                    });
                }
                Ok(Reaction {
                    events,
                    despawn: false,
                })
            }
            EntityKind::Hero { health, .. } => {
                *health = (*health - amount).max(0.0);
                Ok(Reaction {
                    events: vec![
                        GameEvent::Damage {
                            entity_id: id,
                            amount,
                        },
                        GameEvent::Particle {
                            effect: "hero-hit".to_string(),
                            position: at,
                        },
                    ],
                    despawn: false,
                })
            }
            _ => Err(EntityFault::Invulnerable),
        }
    }
}

/// An entity awaiting registration: everything but the body handle, which
/// the registry assigns atomically when it adds the body to the world.
#[derive(Debug, Clone)]
pub struct EntityDraft {
    pub id: String,
    pub model_refs: Vec<String>,
    pub kind: EntityKind,
    pub body: BodySpec,
}

impl EntityDraft {
    pub fn player(id: String, conn: Uuid, position: [f32; 3]) -> Self {
        Self {
            id,
            model_refs: vec!["player".to_string()],
            kind: EntityKind::Player {
                conn,
                health: PLAYER_MAX_HEALTH,
                alive: true,
            },
            body: BodySpec::dynamic(
                position,
                TagClass::Player,
                vec![ColliderSpec::solid(ShapeDesc::Cylinder {
                    half_height: 0.9,
                    radius: 0.4,
                })],
            )
            .upright()
            .with_damping(0.5),
        }
    }

    pub fn item(id: String, item: &str, position: [f32; 3]) -> Self {
        Self {
            id,
            model_refs: vec![item.to_string()],
            kind: EntityKind::Item {
                item: item.to_string(),
                picked: false,
            },
            body: BodySpec::dynamic(
                position,
                TagClass::Item,
                vec![ColliderSpec::solid(ShapeDesc::Sphere { radius: 0.3 })],
            ),
        }
    }

    pub fn lever(id: String, position: [f32; 3]) -> Self {
        Self {
            id,
            model_refs: vec!["lever".to_string()],
            kind: EntityKind::Lever { armed: false },
            body: BodySpec::fixed(
                position,
                TagClass::Interactable,
                vec![ColliderSpec::solid(ShapeDesc::Box {
                    half_extents: [0.2, 0.6, 0.2],
                })],
            ),
        }
    }

    pub fn hero(id: String, position: [f32; 3]) -> Self {
        Self {
            id,
            model_refs: vec!["hero".to_string()],
            kind: EntityKind::Hero {
                health: HERO_MAX_HEALTH,
                sabotaged: false,
            },
            body: BodySpec::dynamic(
                position,
                TagClass::Hero,
                vec![ColliderSpec::solid(ShapeDesc::Cylinder {
                    half_height: 1.4,
                    radius: 0.7,
                })],
            )
            .upright()
            .with_damping(1.0),
        }
    }

    pub fn ground(id: String) -> Self {
        Self {
            id,
            model_refs: vec!["arena-floor".to_string()],
            kind: EntityKind::Environment,
            body: BodySpec::fixed(
                [0.0, 0.0, 0.0],
                TagClass::Environment,
                vec![ColliderSpec::solid(ShapeDesc::Plane {
                    normal: [0.0, 1.0, 0.0],
                })],
            ),
        }
    }

    pub fn rock(id: String, position: [f32; 3], half_extents: [f32; 3]) -> Self {
        Self {
            id,
            model_refs: vec!["rock".to_string()],
            kind: EntityKind::Environment,
            body: BodySpec::fixed(
                position,
                TagClass::Environment,
                vec![ColliderSpec::solid(ShapeDesc::Box { half_extents })],
            ),
        }
    }
}

/// Timestamp helper for sabotage events
pub fn sabotage_event() -> GameEvent {
    GameEvent::SabotageHero {
        time: unix_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_entity() -> Entity {
        let draft = EntityDraft::item("item-0".to_string(), "medkit", [0.0, 1.0, 0.0]);
        Entity {
            id: draft.id,
            model_refs: draft.model_refs,
            kind: draft.kind,
            body: BodyHandle::invalid(),
        }
    }

    #[test]
    fn item_pickup_despawns_once() {
        let mut item = item_entity();
        let first = item.on_collide(TagClass::Player, [0.0; 3]).unwrap();
        assert!(first.despawn);
        assert_eq!(first.events.len(), 1);

        // Second contact in the same tick: already picked, no double pickup
        let second = item.on_collide(TagClass::Player, [0.0; 3]).unwrap();
        assert!(!second.despawn);
        assert!(second.events.is_empty());
    }

    #[test]
    fn item_ignores_environment_contact() {
        let mut item = item_entity();
        let reaction = item.on_collide(TagClass::Environment, [0.0; 3]).unwrap();
        assert!(!reaction.despawn);
    }

    #[test]
    fn lever_arms_exactly_once() {
        let draft = EntityDraft::lever("lever-0".to_string(), [0.0; 3]);
        let mut lever = Entity {
            id: draft.id,
            model_refs: draft.model_refs,
            kind: draft.kind,
            body: BodyHandle::invalid(),
        };
        assert_eq!(lever.interact([0.0; 3]).unwrap().events.len(), 1);
        assert!(lever.interact([0.0; 3]).unwrap().events.is_empty());
        assert_eq!(lever.kind, EntityKind::Lever { armed: true });
    }

    #[test]
    fn environment_reactions_are_faults_not_panics() {
        let draft = EntityDraft::rock("rock-0".to_string(), [0.0; 3], [1.0; 3]);
        let mut rock = Entity {
            id: draft.id,
            model_refs: draft.model_refs,
            kind: draft.kind,
            body: BodyHandle::invalid(),
        };
        assert!(matches!(
            rock.interact([0.0; 3]),
            Err(EntityFault::NotInteractable)
        ));
        assert!(matches!(
            rock.take_damage(10.0, [0.0; 3]),
            Err(EntityFault::Invulnerable)
        ));
    }

    #[test]
    fn player_death_at_zero_health() {
        let draft = EntityDraft::player("player-0".to_string(), Uuid::new_v4(), [0.0; 3]);
        let mut player = Entity {
            id: draft.id,
            model_refs: draft.model_refs,
            kind: draft.kind,
            body: BodyHandle::invalid(),
        };
        player.take_damage(PLAYER_MAX_HEALTH - 1.0, [0.0; 3]).unwrap();
        assert!(player.is_alive_player());

        let fatal = player.take_damage(10.0, [0.0; 3]).unwrap();
        assert!(!player.is_alive_player());
        assert_eq!(fatal.events.len(), 2);

        // Damage after death is a no-op
        assert!(player.take_damage(10.0, [0.0; 3]).unwrap().events.is_empty());
    }
}
