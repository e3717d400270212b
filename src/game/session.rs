//! Authoritative tick loop: Collect, Step, Resolve, Flush, Serialize, Broadcast

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::net::ConnectionRegistry;
use crate::physics::{PhysicsError, PhysicsWorld, TagClass};
use crate::util::time::{Timer, TICK_DURATION_MICROS};
use crate::ws::protocol::{CameraPov, InputFields, ServerMsg};

use super::entity::{sabotage_event, EntityDraft, EntityKind, EntityLogic, Reaction};
use super::input::InputAggregator;
use super::registry::{EntityRegistry, RegistryError};
use super::snapshot::build_snapshot;
use super::{GameEvent, SessionCommand};

const MOVE_SPEED: f32 = 5.0;
const JUMP_IMPULSE: f32 = 6.0;
const GROUND_PROBE: f32 = 1.2;
const ATTACK_RANGE: f32 = 3.0;
const ATTACK_DAMAGE: f32 = 25.0;
const USE_RANGE: f32 = 2.5;
const HERO_ATTACK_RANGE: f32 = 4.0;
const HERO_ATTACK_DAMAGE: f32 = 20.0;
const HERO_ATTACK_COOLDOWN_TICKS: u32 = 45;
const FINAL_STAGE: u32 = 3;
const COMMAND_BUFFER: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("physics error: {0}")]
    Physics(#[from] PhysicsError),

    #[error("level setup failed: {0}")]
    Setup(#[from] RegistryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePhase {
    /// No players yet
    Waiting,
    Stage(u32),
    Ended,
}

/// Handle held by connection tasks. Commands are buffered and drained at
/// the top of the next tick.
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) {
        if self.command_tx.send(command).await.is_err() {
            warn!("game session is gone, dropping command");
        }
    }
}

/// The authoritative simulation. Owns the physics world, the entity
/// registry, and the input aggregator; runs on a single task so entity
/// state is only ever touched between tick boundaries.
pub struct GameSession {
    tick: u64,
    stage: StagePhase,
    world: PhysicsWorld,
    registry: EntityRegistry,
    inputs: InputAggregator,
    connections: Arc<ConnectionRegistry>,
    command_rx: mpsc::Receiver<SessionCommand>,
    /// conn id -> player entity id
    players: HashMap<Uuid, String>,
    /// Connections already switched to the death camera
    spectators: HashSet<Uuid>,
    rng: ChaCha8Rng,
    pending_events: Vec<GameEvent>,
    hero_cooldown: u32,
}

impl GameSession {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        seed: u64,
    ) -> Result<(Self, SessionHandle), SessionError> {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let mut session = Self {
            tick: 0,
            stage: StagePhase::Waiting,
            world: PhysicsWorld::new(),
            registry: EntityRegistry::new(),
            inputs: InputAggregator::new(),
            connections,
            command_rx,
            players: HashMap::new(),
            spectators: HashSet::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            pending_events: Vec::new(),
            hero_cooldown: HERO_ATTACK_COOLDOWN_TICKS,
        };
        session.setup_world()?;
        Ok((session, SessionHandle { command_tx }))
    }

    /// Static level geometry and initial actors. Registered directly, not
    /// through the deferred queues, since no tick is in flight yet. A
    /// failure here is fatal; the level must be complete before the first
    /// tick.
    fn setup_world(&mut self) -> Result<(), SessionError> {
        let drafts = vec![
            EntityDraft::ground("ground".to_string()),
            EntityDraft::rock("rock-0".to_string(), [6.0, 1.0, 4.0], [1.0, 1.0, 1.0]),
            EntityDraft::rock("rock-1".to_string(), [-5.0, 0.75, -7.0], [0.75, 0.75, 1.5]),
            EntityDraft::rock("rock-2".to_string(), [10.0, 0.5, -3.0], [2.0, 0.5, 0.5]),
            EntityDraft::item("item-medkit-0".to_string(), "medkit", [3.0, 1.5, -2.0]),
            EntityDraft::item("item-medkit-1".to_string(), "medkit", [-8.0, 1.5, 5.0]),
            EntityDraft::lever("lever-0".to_string(), [12.0, 1.0, 12.0]),
            EntityDraft::lever("lever-1".to_string(), [-12.0, 1.0, 12.0]),
            EntityDraft::lever("lever-2".to_string(), [0.0, 1.0, -14.0]),
            EntityDraft::hero("hero".to_string(), [0.0, 2.0, 0.0]),
        ];
        for draft in drafts {
            self.registry.register(draft, &mut self.world)?;
        }
        Ok(())
    }

    /// Run the tick loop until the session ends or every handle is dropped.
    /// Late ticks stretch the schedule rather than skipping simulation.
    pub async fn run(mut self) {
        info!(tick_rate = crate::util::time::TICK_RATE, "game session started");

        let mut ticker = interval(Duration::from_micros(TICK_DURATION_MICROS));
        // A slow tick stretches the schedule; simulation time never skips
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut timer = Timer::new();
        loop {
            ticker.tick().await;
            timer.reset();

            if let Err(err) = self.tick_once() {
                warn!(tick = self.tick, error = %err, "tick failed, ending session");
                break;
            }

            let elapsed = timer.elapsed_micros();
            if elapsed > TICK_DURATION_MICROS {
                warn!(tick = self.tick, elapsed_micros = elapsed, "tick overran its budget");
            }

            if self.stage == StagePhase::Ended {
                info!(tick = self.tick, "game over, session ending");
                break;
            }
        }
    }

    /// One full simulation tick. Factored out of `run` so tests can drive
    /// the loop synchronously.
    pub fn tick_once(&mut self) -> Result<(), SessionError> {
        self.tick += 1;

        // Collect
        while let Ok(command) = self.command_rx.try_recv() {
            self.apply_command(command);
        }
        self.connections.expire_idle();
        self.prune_abandoned();
        let commands: Vec<(Uuid, crate::game::input::TickCommand)> = self
            .connections
            .ordered_ids()
            .into_iter()
            .map(|conn| (conn, self.inputs.consume(conn)))
            .collect();

        // Step
        for (conn, command) in &commands {
            self.apply_movement(*conn, command);
        }
        self.world.step()?;

        // Resolve
        self.resolve_collisions();
        for (conn, command) in &commands {
            self.resolve_actions(*conn, &command.presses, command.look_dir);
            self.inputs.end_tick(*conn);
        }
        self.resolve_sabotage();
        self.resolve_hero();
        self.resolve_deaths();
        self.resolve_outcome();

        // Flush
        self.registry.flush_queues(&mut self.world);

        // Serialize + Broadcast, events strictly before the snapshot
        for event in self.pending_events.drain(..) {
            self.connections.broadcast(&event.into());
        }
        let snapshot = build_snapshot(self.tick, &self.registry, &self.world);
        self.connections.broadcast(&snapshot);

        Ok(())
    }

    pub fn apply_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Joined {
                conn_id,
                display_name,
            } => self.handle_join(conn_id, display_name),
            SessionCommand::Input {
                conn_id,
                fields,
                look_dir,
            } => self.inputs.update(conn_id, fields, look_dir),
            SessionCommand::Leave { conn_id } => self.handle_leave(conn_id),
            SessionCommand::SkipStage { conn_id } => {
                debug!(conn = %conn_id, "debug stage skip requested");
                self.advance_stage();
            }
        }
    }

    fn handle_join(&mut self, conn_id: Uuid, display_name: String) {
        if self.players.contains_key(&conn_id) {
            // Rejoin after a transport drop; entity survived, re-lock camera
            let entity_id = self.players[&conn_id].clone();
            if self.spectators.contains(&conn_id) {
                self.send_death_camera(conn_id, entity_id);
            } else {
                self.send_camera_lock(conn_id, &entity_id);
            }
            return;
        }

        let entity_id = format!("player-{}", &conn_id.to_string()[..8]);
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let distance = self.rng.gen_range(8.0..14.0);
        let spawn = [angle.cos() * distance, 1.5, angle.sin() * distance];

        self.registry
            .enqueue_create(EntityDraft::player(entity_id.clone(), conn_id, spawn));
        self.players.insert(conn_id, entity_id.clone());
        self.send_camera_lock(conn_id, &entity_id);
        self.pending_events.push(GameEvent::Sound {
            sound: "player_spawn".to_string(),
            position: spawn,
        });
        info!(conn = %conn_id, player = %display_name, entity = %entity_id, "player joined");

        if self.stage == StagePhase::Waiting {
            self.stage = StagePhase::Stage(1);
            self.pending_events
                .push(GameEvent::StageTransition { stage: 1 });
        }
    }

    fn handle_leave(&mut self, conn_id: Uuid) {
        let Some(entity_id) = self.players.remove(&conn_id) else {
            return;
        };
        self.inputs.remove(conn_id);
        self.spectators.remove(&conn_id);
        self.registry.enqueue_delete(entity_id.clone());
        self.connections.remove(conn_id);
        info!(conn = %conn_id, entity = %entity_id, "player left");
    }

    /// A participant whose reconnection budget ran out is gone from the
    /// connection registry; reap its entity.
    fn prune_abandoned(&mut self) {
        let abandoned: Vec<Uuid> = self
            .players
            .keys()
            .filter(|conn| !self.connections.contains(**conn))
            .copied()
            .collect();
        for conn in abandoned {
            debug!(conn = %conn, "participant exhausted reconnection budget");
            self.handle_leave(conn);
        }
    }

    fn send_camera_lock(&self, conn_id: Uuid, entity_id: &str) {
        self.connections.send(
            conn_id,
            ServerMsg::CameraLock {
                entity_id: entity_id.to_string(),
                pov: CameraPov::FirstPerson,
                free_rotation: false,
            },
        );
    }

    fn advance_stage(&mut self) {
        let next = match self.stage {
            StagePhase::Waiting | StagePhase::Ended => return,
            StagePhase::Stage(n) if n >= FINAL_STAGE => {
                self.finish("hero".to_string());
                return;
            }
            StagePhase::Stage(n) => n + 1,
        };
        self.stage = StagePhase::Stage(next);
        self.pending_events
            .push(GameEvent::StageTransition { stage: next });
        info!(stage = next, "stage transition");
    }

    fn finish(&mut self, winner: String) {
        if self.stage == StagePhase::Ended {
            return;
        }
        self.stage = StagePhase::Ended;
        self.pending_events.push(GameEvent::GameOver { winner });
    }

    fn apply_movement(&mut self, conn: Uuid, command: &crate::game::input::TickCommand) {
        let Some(entity_id) = self.players.get(&conn) else {
            return;
        };
        let Some(entity) = self.registry.get(entity_id) else {
            return;
        };
        if !entity.is_alive_player() {
            return;
        }
        let body = entity.body;

        let fields = &command.fields;
        let look = command.look_dir;
        // Planar basis from the look direction, fallback to world forward
        // when the client looks straight down
        let mut forward = [look[0], 0.0, look[2]];
        let len = (forward[0] * forward[0] + forward[2] * forward[2]).sqrt();
        if len > 1e-4 {
            forward = [forward[0] / len, 0.0, forward[2] / len];
        } else {
            forward = [0.0, 0.0, -1.0];
        }
        let right = [-forward[2], 0.0, forward[0]];

        let mut dir = [0.0f32, 0.0, 0.0];
        if fields.forward {
            dir = [dir[0] + forward[0], 0.0, dir[2] + forward[2]];
        }
        if fields.backward {
            dir = [dir[0] - forward[0], 0.0, dir[2] - forward[2]];
        }
        if fields.right {
            dir = [dir[0] + right[0], 0.0, dir[2] + right[2]];
        }
        if fields.left {
            dir = [dir[0] - right[0], 0.0, dir[2] - right[2]];
        }
        let mag = (dir[0] * dir[0] + dir[2] * dir[2]).sqrt();
        if mag > 1e-4 {
            dir = [dir[0] / mag * MOVE_SPEED, 0.0, dir[2] / mag * MOVE_SPEED];
        }

        let vy = self.world.linvel(body).map(|v| v[1]).unwrap_or(0.0);
        self.world.set_linvel(body, [dir[0], vy, dir[2]]);

        if fields.jump && self.grounded(body) {
            self.world.apply_impulse(body, [0.0, JUMP_IMPULSE, 0.0]);
        }
    }

    fn grounded(&self, body: crate::physics::BodyHandle) -> bool {
        let Some(pos) = self.world.translation(body) else {
            return false;
        };
        !self
            .world
            .raycast(pos, [0.0, -1.0, 0.0], GROUND_PROBE, None, Some(body))
            .is_empty()
    }

    /// Attack and use are hitscan against whatever the look ray touches
    /// first, resolved on the edge-latched press. A held key does not
    /// repeat the action.
    fn resolve_actions(&mut self, conn: Uuid, presses: &InputFields, look_dir: [f32; 3]) {
        if !presses.attack && !presses.use_action {
            return;
        }
        let Some(entity_id) = self.players.get(&conn).cloned() else {
            return;
        };
        let Some(entity) = self.registry.get(&entity_id) else {
            return;
        };
        if !entity.is_alive_player() {
            return;
        }
        let body = entity.body;
        let Some(origin) = self.world.translation(body) else {
            return;
        };

        if presses.attack {
            if let Some(hit) = self
                .world
                .raycast(origin, look_dir, ATTACK_RANGE, None, Some(body))
                .into_iter()
                .next()
            {
                self.react_on(hit.body, |target| target.take_damage(ATTACK_DAMAGE, hit.point));
            }
        }
        if presses.use_action {
            if let Some(hit) = self
                .world
                .raycast(origin, look_dir, USE_RANGE, None, Some(body))
                .into_iter()
                .next()
            {
                self.react_on(hit.body, |target| target.interact(hit.point));
            }
        }
    }

    /// Run one entity reaction, queueing its events and despawn. Entity
    /// faults are per-entity conditions, logged and swallowed.
    fn react_on<F>(&mut self, body: crate::physics::BodyHandle, action: F)
    where
        F: FnOnce(&mut super::entity::Entity) -> Result<Reaction, super::entity::EntityFault>,
    {
        let Some(id) = self.registry.id_for_body(body).map(str::to_string) else {
            return;
        };
        let Some(target) = self.registry.get_mut(&id) else {
            return;
        };
        match action(target) {
            Ok(reaction) => self.queue_reaction(&id, reaction),
            Err(fault) => debug!(entity = %id, fault = %fault, "action had no effect"),
        }
    }

    fn queue_reaction(&mut self, id: &str, reaction: Reaction) {
        self.pending_events.extend(reaction.events);
        if reaction.despawn {
            self.registry.enqueue_delete(id);
        }
    }

    fn resolve_collisions(&mut self) {
        for (a, b) in self.world.contacts() {
            self.collide_one(a, b);
            self.collide_one(b, a);
        }
    }

    fn collide_one(&mut self, subject: crate::physics::BodyHandle, other: crate::physics::BodyHandle) {
        let Some(other_tag) = self
            .registry
            .id_for_body(other)
            .and_then(|id| self.registry.get(id))
            .map(|e| e.tag())
        else {
            return;
        };
        let at = self.world.translation(subject).unwrap_or([0.0; 3]);
        self.react_on(subject, |entity| entity.on_collide(other_tag, at));
    }

    /// All levers armed exactly once triggers the hero sabotage.
    fn resolve_sabotage(&mut self) {
        let all_armed = {
            let mut saw_lever = false;
            let mut armed = true;
            for entity in self.registry.iter() {
                if let EntityKind::Lever { armed: a } = entity.kind {
                    saw_lever = true;
                    armed &= a;
                }
            }
            saw_lever && armed
        };
        if !all_armed {
            return;
        }

        let Some(hero) = self.registry.get_mut("hero") else {
            return;
        };
        let EntityKind::Hero { sabotaged, .. } = &mut hero.kind else {
            return;
        };
        if *sabotaged {
            return;
        }
        *sabotaged = true;

        let at = self.world.translation(hero.body).unwrap_or([0.0; 3]);
        self.pending_events.push(sabotage_event());
        self.react_on_id("hero", |hero| {
            hero.take_damage(super::entity::SABOTAGE_DAMAGE, at)
        });
        info!("hero sabotaged");
    }

    fn react_on_id<F>(&mut self, id: &str, action: F)
    where
        F: FnOnce(&mut super::entity::Entity) -> Result<Reaction, super::entity::EntityFault>,
    {
        let Some(target) = self.registry.get_mut(id) else {
            return;
        };
        match action(target) {
            Ok(reaction) => {
                let id = id.to_string();
                self.queue_reaction(&id, reaction);
            }
            Err(fault) => debug!(entity = %id, fault = %fault, "action had no effect"),
        }
    }

    /// Hero server AI: swipe at the nearest living player on a cooldown.
    fn resolve_hero(&mut self) {
        if self.hero_cooldown > 0 {
            self.hero_cooldown -= 1;
            return;
        }
        let Some(hero) = self.registry.get("hero") else {
            return;
        };
        let Some(hero_pos) = self.world.translation(hero.body) else {
            return;
        };

        let mut nearest: Option<(String, [f32; 3], f32)> = None;
        for entity in self.registry.iter() {
            if !entity.is_alive_player() {
                continue;
            }
            let Some(pos) = self.world.translation(entity.body) else {
                continue;
            };
            let d2 = (pos[0] - hero_pos[0]).powi(2)
                + (pos[1] - hero_pos[1]).powi(2)
                + (pos[2] - hero_pos[2]).powi(2);
            if nearest.as_ref().map(|(_, _, best)| d2 < *best).unwrap_or(true) {
                nearest = Some((entity.id.clone(), pos, d2));
            }
        }

        if let Some((id, pos, d2)) = nearest {
            if d2 <= HERO_ATTACK_RANGE * HERO_ATTACK_RANGE {
                self.react_on_id(&id, |player| player.take_damage(HERO_ATTACK_DAMAGE, pos));
                self.hero_cooldown = HERO_ATTACK_COOLDOWN_TICKS;
            }
        }
    }

    /// Dead players switch to a free top-down spectator camera, issued
    /// once at the death transition.
    fn resolve_deaths(&mut self) {
        let dead: Vec<(Uuid, String)> = self
            .players
            .iter()
            .filter_map(|(conn, id)| {
                if self.spectators.contains(conn) {
                    return None;
                }
                let entity = self.registry.get(id)?;
                match entity.kind {
                    EntityKind::Player { alive: false, .. } => Some((*conn, id.clone())),
                    _ => None,
                }
            })
            .collect();
        for (conn, entity_id) in dead {
            self.spectators.insert(conn);
            self.send_death_camera(conn, entity_id);
        }
    }

    fn send_death_camera(&self, conn_id: Uuid, entity_id: String) {
        self.connections.send(
            conn_id,
            ServerMsg::CameraLock {
                entity_id,
                pov: CameraPov::TopDown,
                free_rotation: true,
            },
        );
    }

    fn resolve_outcome(&mut self) {
        if self.stage == StagePhase::Waiting || self.stage == StagePhase::Ended {
            return;
        }

        let hero_dead = matches!(
            self.registry.get("hero").map(|e| &e.kind),
            Some(EntityKind::Hero { health, .. }) if *health <= 0.0
        ) || !self.registry.contains("hero");
        if hero_dead {
            self.finish("players".to_string());
            return;
        }

        let any_player = !self.players.is_empty();
        let any_alive = self.registry.iter().any(|e| e.is_alive_player())
            || self.registry.pending_creates() > 0;
        if any_player && !any_alive {
            self.finish("hero".to_string());
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::ClientMsg;

    fn input(attack: bool, use_action: bool, forward: bool) -> InputFields {
        InputFields {
            forward,
            backward: false,
            left: false,
            right: false,
            jump: false,
            attack,
            use_action,
            emote: false,
        }
    }

    fn new_session() -> (GameSession, SessionHandle, Arc<ConnectionRegistry>, Uuid) {
        let connections = Arc::new(ConnectionRegistry::new());
        let outcome = connections.join(None, Some("tester".to_string()));
        let (session, handle) = GameSession::new(connections.clone(), 42).unwrap();
        (session, handle, connections, outcome.rejoin_id)
    }

    #[test]
    fn level_spawns_on_construction() {
        let (session, _handle, _conns, _id) = new_session();
        assert!(session.registry.contains("ground"));
        assert!(session.registry.contains("hero"));
        assert!(session.registry.contains("lever-0"));
        assert_eq!(session.registry.len(), 10);
    }

    #[test]
    fn join_spawns_player_next_tick() {
        let (mut session, _handle, _conns, conn) = new_session();
        session.apply_command(SessionCommand::Joined {
            conn_id: conn,
            display_name: "tester".to_string(),
        });
        // Deferred until the flush phase
        assert_eq!(session.registry.pending_creates(), 1);
        session.tick_once().unwrap();
        let entity_id = session.players[&conn].clone();
        assert!(session.registry.contains(&entity_id));
        assert_eq!(session.stage, StagePhase::Stage(1));
    }

    #[test]
    fn leave_despawns_player() {
        let (mut session, _handle, _conns, conn) = new_session();
        session.apply_command(SessionCommand::Joined {
            conn_id: conn,
            display_name: "tester".to_string(),
        });
        session.tick_once().unwrap();
        let entity_id = session.players[&conn].clone();

        session.apply_command(SessionCommand::Leave { conn_id: conn });
        session.tick_once().unwrap();
        assert!(!session.registry.contains(&entity_id));
        assert!(!session.players.contains_key(&conn));
    }

    #[test]
    fn skip_stage_advances_and_final_skip_ends() {
        let (mut session, _handle, _conns, conn) = new_session();
        session.apply_command(SessionCommand::Joined {
            conn_id: conn,
            display_name: "tester".to_string(),
        });
        session.tick_once().unwrap();
        assert_eq!(session.stage, StagePhase::Stage(1));

        session.apply_command(SessionCommand::SkipStage { conn_id: conn });
        assert_eq!(session.stage, StagePhase::Stage(2));
        session.apply_command(SessionCommand::SkipStage { conn_id: conn });
        assert_eq!(session.stage, StagePhase::Stage(3));
        session.apply_command(SessionCommand::SkipStage { conn_id: conn });
        assert_eq!(session.stage, StagePhase::Ended);
    }

    #[test]
    fn forward_input_moves_player() {
        let (mut session, _handle, _conns, conn) = new_session();
        // Spawn at a known clear spot instead of the random ring
        session
            .registry
            .register(
                EntityDraft::player("player-test".to_string(), conn, [30.0, 1.5, 30.0]),
                &mut session.world,
            )
            .unwrap();
        session.players.insert(conn, "player-test".to_string());

        session
            .inputs
            .update(conn, input(false, false, true), [0.0, 0.0, -1.0]);
        for _ in 0..10 {
            session.tick_once().unwrap();
        }

        let body = session.registry.get("player-test").unwrap().body;
        let pos = session.world.translation(body).unwrap();
        assert!(pos[2] < 29.5, "expected forward travel, got {:?}", pos);
        assert!((pos[0] - 30.0).abs() < 0.1);
    }

    #[test]
    fn sabotage_fires_once_when_all_levers_armed() {
        let (mut session, _handle, _conns, _conn) = new_session();
        for id in ["lever-0", "lever-1", "lever-2"] {
            session.react_on_id(id, |lever| lever.interact([0.0; 3]));
        }
        session.pending_events.clear();

        session.resolve_sabotage();
        assert!(session
            .pending_events
            .iter()
            .any(|e| matches!(e, GameEvent::SabotageHero { .. })));

        session.pending_events.clear();
        session.resolve_sabotage();
        assert!(session.pending_events.is_empty());

        let hero = session.registry.get("hero").unwrap();
        let EntityKind::Hero { health, sabotaged } = hero.kind else {
            panic!("hero lost its kind");
        };
        assert!(sabotaged);
        assert_eq!(
            health,
            super::super::entity::HERO_MAX_HEALTH - super::super::entity::SABOTAGE_DAMAGE
        );
    }

    #[test]
    fn hero_death_ends_game_for_players() {
        let (mut session, _handle, _conns, conn) = new_session();
        session.apply_command(SessionCommand::Joined {
            conn_id: conn,
            display_name: "tester".to_string(),
        });
        session.tick_once().unwrap();

        for _ in 0..30 {
            session.react_on_id("hero", |hero| hero.take_damage(100.0, [0.0; 3]));
        }
        session.tick_once().unwrap();
        assert_eq!(session.stage, StagePhase::Ended);
    }

    #[test]
    fn held_attack_only_strikes_on_the_press() {
        let (mut session, _handle, _conns, conn) = new_session();
        session
            .registry
            .register(
                EntityDraft::player("player-test".to_string(), conn, [30.0, 1.5, 30.0]),
                &mut session.world,
            )
            .unwrap();
        session.players.insert(conn, "player-test".to_string());
        session
            .registry
            .register(
                EntityDraft::player("player-target".to_string(), Uuid::new_v4(), [30.0, 1.5, 28.0]),
                &mut session.world,
            )
            .unwrap();

        // One input message, attack held from then on
        session
            .inputs
            .update(conn, input(true, false, false), [0.0, 0.0, -1.0]);
        for _ in 0..4 {
            session.tick_once().unwrap();
        }

        let target = session.registry.get("player-target").unwrap();
        let EntityKind::Player { health, .. } = target.kind else {
            panic!("target lost its kind");
        };
        assert_eq!(
            health,
            super::super::entity::PLAYER_MAX_HEALTH - ATTACK_DAMAGE
        );
    }

    #[test]
    fn death_camera_is_issued_once() {
        let (mut session, _handle, conns, conn) = new_session();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(conns.attach(conn, tx));
        session.apply_command(SessionCommand::Joined {
            conn_id: conn,
            display_name: "tester".to_string(),
        });
        session.tick_once().unwrap();

        let entity_id = session.players[&conn].clone();
        session.react_on_id(&entity_id, |player| {
            player.take_damage(super::super::entity::PLAYER_MAX_HEALTH, [0.0; 3])
        });
        for _ in 0..5 {
            session.tick_once().unwrap();
        }

        let locks = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|msg| {
                matches!(
                    msg,
                    ServerMsg::CameraLock {
                        pov: CameraPov::TopDown,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(locks, 1);
    }

    #[test]
    fn commands_arrive_through_the_handle() {
        let (mut session, handle, _conns, conn) = new_session();
        tokio_test::block_on(handle.send(SessionCommand::Joined {
            conn_id: conn,
            display_name: "tester".to_string(),
        }));
        session.tick_once().unwrap();
        assert!(session.players.contains_key(&conn));
    }

    #[test]
    fn debug_skip_message_parses() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"debug_skip_stage"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::DebugSkipStage {}));
    }
}
