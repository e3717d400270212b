//! Game simulation: entities, tick loop, input aggregation, snapshots

pub mod entity;
pub mod input;
pub mod registry;
pub mod session;
pub mod snapshot;

use uuid::Uuid;

use crate::ws::protocol::{InputFields, ServerMsg};

pub use session::{GameSession, SessionHandle};

/// Gameplay side effect emitted during tick resolution. Converted to wire
/// messages and broadcast at the end of the tick, always before the
/// snapshot they precede causally.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    Sound { sound: String, position: [f32; 3] },
    Particle { effect: String, position: [f32; 3] },
    Damage { entity_id: String, amount: f32 },
    SabotageHero { time: u64 },
    StageTransition { stage: u32 },
    GameOver { winner: String },
}

impl From<GameEvent> for ServerMsg {
    fn from(event: GameEvent) -> Self {
        match event {
            GameEvent::Sound { sound, position } => ServerMsg::Sound { sound, position },
            GameEvent::Particle { effect, position } => ServerMsg::Particle { effect, position },
            GameEvent::Damage { entity_id, amount } => ServerMsg::Damage { entity_id, amount },
            GameEvent::SabotageHero { time } => ServerMsg::SabotageHero { time },
            GameEvent::StageTransition { stage } => ServerMsg::StageTransition { stage },
            GameEvent::GameOver { winner } => ServerMsg::GameOver { winner },
        }
    }
}

/// Commands from connection tasks into the session. Buffered on a channel
/// and drained at the top of each tick so the simulation only ever mutates
/// on the tick thread.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Joined {
        conn_id: Uuid,
        display_name: String,
    },
    Input {
        conn_id: Uuid,
        fields: InputFields,
        look_dir: [f32; 3],
    },
    Leave {
        conn_id: Uuid,
    },
    SkipStage {
        conn_id: Uuid,
    },
}
