//! Application state shared across routes

use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::game::{GameSession, SessionHandle};
use crate::net::ConnectionRegistry;
use crate::util::rate_limit::ConnectionRateLimiter;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub connections: Arc<ConnectionRegistry>,
    pub session: SessionHandle,
    /// Input budgets for fallback-transport participants, keyed by rejoin id
    pub fallback_limiters: Arc<DashMap<Uuid, ConnectionRateLimiter>>,
}

impl AppState {
    /// Build the state and the game session it fronts. The session is
    /// returned unspawned so `main` controls its task. Level setup failure
    /// is fatal here; there is nothing to serve without a world.
    pub fn new(config: Config) -> anyhow::Result<(Self, GameSession)> {
        let config = Arc::new(config);
        let connections = Arc::new(ConnectionRegistry::new());

        let seed = config
            .session_seed
            .unwrap_or_else(|| rand::thread_rng().gen());
        info!(seed, "seeding game session");

        let (session, handle) = GameSession::new(connections.clone(), seed)?;

        Ok((
            Self {
                config,
                connections,
                session: handle,
                fallback_limiters: Arc::new(DashMap::new()),
            },
            session,
        ))
    }
}
