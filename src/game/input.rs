//! Per-connection input aggregation with rising-edge latching
//!
//! Network arrival is not synchronized with the tick boundary: a key
//! pressed and released between two ticks would vanish if only the level
//! state were kept. Every false→true transition therefore sets a one-tick
//! edge latch that `consume` ORs back into the reported state.

use std::collections::HashMap;

use uuid::Uuid;

use crate::ws::protocol::InputFields;

impl InputFields {
    /// Fields that transitioned false→true from `old` to `self`
    pub fn rising_from(&self, old: &InputFields) -> InputFields {
        InputFields {
            forward: self.forward && !old.forward,
            backward: self.backward && !old.backward,
            left: self.left && !old.left,
            right: self.right && !old.right,
            jump: self.jump && !old.jump,
            attack: self.attack && !old.attack,
            use_action: self.use_action && !old.use_action,
            emote: self.emote && !old.emote,
        }
    }

    /// Per-field logical OR
    pub fn or(&self, other: &InputFields) -> InputFields {
        InputFields {
            forward: self.forward || other.forward,
            backward: self.backward || other.backward,
            left: self.left || other.left,
            right: self.right || other.right,
            jump: self.jump || other.jump,
            attack: self.attack || other.attack,
            use_action: self.use_action || other.use_action,
            emote: self.emote || other.emote,
        }
    }
}

/// Input to apply for one connection this tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickCommand {
    /// Held state: level OR pending edge per field
    pub fields: InputFields,
    /// Fresh presses only, true for one tick per false→true transition
    pub presses: InputFields,
    pub look_dir: [f32; 3],
}

#[derive(Debug, Default)]
struct ConnectionInputState {
    level: InputFields,
    edges: InputFields,
    look_dir: [f32; 3],
}

/// Buffers input per connection, decoupled from tick timing.
/// Written by network callbacks between ticks; read by Collect.
#[derive(Debug, Default)]
pub struct InputAggregator {
    states: HashMap<Uuid, ConnectionInputState>,
}

impl InputAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an inbound input message. Messages apply in arrival order.
    pub fn update(&mut self, conn: Uuid, fields: InputFields, look_dir: [f32; 3]) {
        let state = self.states.entry(conn).or_default();
        let rising = fields.rising_from(&state.level);
        state.edges = state.edges.or(&rising);
        state.level = fields;
        state.look_dir = look_dir;
    }

    /// State to apply this tick: level OR pending edge per field, so a
    /// press-and-release inside one tick interval is still observed. The
    /// raw edge set is reported separately for one-shot actions that must
    /// not repeat while a key is held.
    pub fn consume(&self, conn: Uuid) -> TickCommand {
        match self.states.get(&conn) {
            Some(state) => TickCommand {
                fields: state.level.or(&state.edges),
                presses: state.edges,
                look_dir: state.look_dir,
            },
            None => TickCommand::default(),
        }
    }

    /// Clear edge latches; called once per connection per tick, after the
    /// tick has consumed its input.
    pub fn end_tick(&mut self, conn: Uuid) {
        if let Some(state) = self.states.get_mut(&conn) {
            state.edges = InputFields::default();
        }
    }

    /// Release a connection's buffer when it is abandoned
    pub fn remove(&mut self, conn: Uuid) {
        self.states.remove(&conn);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pressed(jump: bool) -> InputFields {
        InputFields {
            jump,
            ..Default::default()
        }
    }

    #[test]
    fn press_and_release_between_ticks_is_not_lost() {
        let mut inputs = InputAggregator::new();
        let conn = Uuid::new_v4();

        // false -> true -> false, all strictly between two consumes
        inputs.update(conn, pressed(false), [0.0; 3]);
        inputs.update(conn, pressed(true), [0.0; 3]);
        inputs.update(conn, pressed(false), [0.0; 3]);

        // Level is false, but the edge latch reports the press
        let cmd = inputs.consume(conn);
        assert!(cmd.fields.jump);

        inputs.end_tick(conn);
        assert!(!inputs.consume(conn).fields.jump);
    }

    #[test]
    fn presses_report_only_fresh_transitions() {
        let mut inputs = InputAggregator::new();
        let conn = Uuid::new_v4();

        inputs.update(conn, pressed(true), [0.0; 3]);
        assert!(inputs.consume(conn).presses.jump);
        inputs.end_tick(conn);

        // Still held: the level persists but the press does not repeat
        let cmd = inputs.consume(conn);
        assert!(cmd.fields.jump);
        assert!(!cmd.presses.jump);
    }

    #[test]
    fn held_key_persists_across_ticks() {
        let mut inputs = InputAggregator::new();
        let conn = Uuid::new_v4();

        inputs.update(conn, pressed(true), [0.0; 3]);
        assert!(inputs.consume(conn).fields.jump);
        inputs.end_tick(conn);

        // No new message; level state still reports the hold
        assert!(inputs.consume(conn).fields.jump);
    }

    #[test]
    fn edge_survives_multiple_updates_in_one_interval() {
        let mut inputs = InputAggregator::new();
        let conn = Uuid::new_v4();

        inputs.update(conn, pressed(true), [0.0; 3]);
        inputs.update(conn, pressed(false), [0.0; 3]);
        inputs.update(conn, pressed(true), [0.0; 3]);
        inputs.update(conn, pressed(false), [0.0; 3]);

        assert!(inputs.consume(conn).fields.jump);
    }

    #[test]
    fn look_direction_passes_through() {
        let mut inputs = InputAggregator::new();
        let conn = Uuid::new_v4();

        inputs.update(conn, InputFields::default(), [0.0, 0.5, -1.0]);
        assert_eq!(inputs.consume(conn).look_dir, [0.0, 0.5, -1.0]);
    }

    #[test]
    fn connections_are_isolated() {
        let mut inputs = InputAggregator::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        inputs.update(a, pressed(true), [0.0; 3]);
        assert!(inputs.consume(a).fields.jump);
        assert!(!inputs.consume(b).fields.jump);
    }

    #[test]
    fn remove_releases_the_buffer() {
        let mut inputs = InputAggregator::new();
        let conn = Uuid::new_v4();
        inputs.update(conn, pressed(true), [0.0; 3]);
        inputs.remove(conn);
        assert!(inputs.is_empty());
        assert_eq!(inputs.consume(conn), TickCommand::default());
    }
}
