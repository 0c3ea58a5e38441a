//! Application state shared across routes

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::config::Config;
use crate::game::{WorldConfig, WorldHandle};
use crate::store::{AccountStore, CharacterStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub accounts: AccountStore,
    pub characters: CharacterStore,
    pub world: WorldHandle,
    /// Logged-in username -> session id
    pub online: Arc<DashMap<String, Uuid>>,
}

impl AppState {
    pub fn new(config: Config, accounts: AccountStore, characters: CharacterStore, world: WorldHandle) -> Self {
        Self {
            config: Arc::new(config),
            accounts,
            characters,
            world,
            online: Arc::new(DashMap::new()),
        }
    }

    /// Claim a username for a session. Fails if it is already logged in.
    pub fn claim_username(&self, username: &str, session_id: Uuid) -> bool {
        match self.online.entry(username.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session_id);
                true
            }
        }
    }

    /// Release a username, only if this session holds it
    pub fn release_username(&self, username: &str, session_id: Uuid) {
        self.online.remove_if(username, |_, holder| *holder == session_id);
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }
}

impl From<&Config> for WorldConfig {
    fn from(config: &Config) -> Self {
        Self {
            seed: config.world_seed,
            max_cars_per_player: config.max_cars_per_player,
        }
    }
}
