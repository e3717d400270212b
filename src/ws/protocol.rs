//! Wire protocol message definitions
//! These are the transport-agnostic message types for client-server
//! communication; both the WebSocket and the fallback transport carry them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Camera point-of-view directives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraPov {
    FirstPerson,
    TopDown,
}

/// Named boolean input fields carried by every input message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFields {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub jump: bool,
    pub attack: bool,
    #[serde(rename = "use")]
    pub use_action: bool,
    pub emote: bool,
}

/// Collider description for debug wireframes in the snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireCollider {
    Box {
        half_extents: [f32; 3],
        #[serde(skip_serializing_if = "Option::is_none")]
        offset: Option<[f32; 3]>,
    },
    Sphere {
        radius: f32,
        #[serde(skip_serializing_if = "Option::is_none")]
        offset: Option<[f32; 3]>,
    },
    Cylinder {
        half_height: f32,
        radius: f32,
        #[serde(skip_serializing_if = "Option::is_none")]
        offset: Option<[f32; 3]>,
    },
    Plane {
        normal: [f32; 3],
        #[serde(skip_serializing_if = "Option::is_none")]
        offset: Option<[f32; 3]>,
    },
}

/// One entity's entry in the authoritative snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: String,
    pub model_refs: Vec<String>,
    pub position: [f32; 3],
    pub quaternion: [f32; 4],
    pub colliders: Vec<WireCollider>,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Join or rejoin the session
    Join {
        /// Rejoin identity from a previous session, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        rejoin_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },

    /// Latency probe. `sent_at` is echoed back verbatim so the sender can
    /// anchor the round trip to its own clock.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sent_at: Option<u64>,
    },

    /// Response to a server-initiated ping
    Pong {
        sent_at: u64,
    },

    /// Full input field set, sent on every client-visible change and at a
    /// fixed polling interval to guard against dropped deltas
    ClientInput {
        #[serde(flatten)]
        fields: InputFields,
        look_dir: [f32; 3],
    },

    /// Leave the session explicitly
    Leave {},

    /// Debug control: advance to the next stage
    DebugSkipStage {},
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Assigns or reaffirms the rejoin identity
    JoinAck {
        rejoin_id: Uuid,
    },

    /// Liveness probe while the connection is open
    Ping {
        sent_at: u64,
    },

    /// Response to a client ping
    Pong {
        sent_at: u64,
    },

    /// Full authoritative snapshot, once per tick
    EntireGameState {
        tick: u64,
        entities: Vec<EntityState>,
    },

    /// Lock the client camera to an entity
    CameraLock {
        entity_id: String,
        pov: CameraPov,
        free_rotation: bool,
    },

    /// One-shot sound trigger
    Sound {
        sound: String,
        position: [f32; 3],
    },

    /// One-shot particle trigger
    Particle {
        effect: String,
        position: [f32; 3],
    },

    /// Damage feedback
    Damage {
        entity_id: String,
        amount: f32,
    },

    /// The hero has been sabotaged
    SabotageHero {
        time: u64,
    },

    /// Stage transition
    StageTransition {
        stage: u32,
    },

    /// Session ended
    GameOver {
        winner: String,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_input_round_trips() {
        let msg = ClientMsg::ClientInput {
            fields: InputFields {
                forward: true,
                jump: true,
                use_action: true,
                ..Default::default()
            },
            look_dir: [0.0, 0.0, -1.0],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"client_input\""));
        assert!(json.contains("\"use\":true"));
        let back: ClientMsg = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn join_omits_absent_identity() {
        let json = serde_json::to_string(&ClientMsg::Join {
            rejoin_id: None,
            display_name: None,
        })
        .unwrap();
        assert_eq!(json, "{\"type\":\"join\"}");
    }

    #[test]
    fn snapshot_round_trips() {
        let msg = ServerMsg::EntireGameState {
            tick: 42,
            entities: vec![EntityState {
                id: "rock-0".to_string(),
                model_refs: vec!["rock".to_string()],
                position: [1.0, 2.0, 3.0],
                quaternion: [0.0, 0.0, 0.0, 1.0],
                colliders: vec![WireCollider::Box {
                    half_extents: [0.5, 0.5, 0.5],
                    offset: None,
                }],
            }],
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMsg = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn ping_timestamp_is_optional() {
        let bare: ClientMsg = serde_json::from_str("{\"type\":\"ping\"}").unwrap();
        assert_eq!(bare, ClientMsg::Ping { sent_at: None });

        let stamped: ClientMsg =
            serde_json::from_str("{\"type\":\"ping\",\"sent_at\":123}").unwrap();
        assert_eq!(stamped, ClientMsg::Ping { sent_at: Some(123) });
    }

    #[test]
    fn malformed_message_fails_to_parse() {
        assert!(serde_json::from_str::<ClientMsg>("{\"type\":\"warp_drive\"}").is_err());
    }
}
