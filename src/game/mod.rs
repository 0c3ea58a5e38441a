//! Relay-side world: registries, rules and the task that owns them

pub mod cars;
pub mod combat;
pub mod world;

pub use world::{CharacterSave, GameWorld, WorldConfig, WorldHandle, WorldState, WorldStats};

use uuid::Uuid;

use crate::store::characters::CharacterRecord;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Input received from a session, stamped on arrival
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub player_id: Uuid,
    pub input: WorldInput,
    pub received_at: u64,
}

#[derive(Debug, Clone)]
pub enum WorldInput {
    /// Session authenticated; the player enters the world on its first customization
    Join {
        username: String,
        is_admin: bool,
        is_guest: bool,
        character: Option<CharacterRecord>,
    },
    Client(ClientMsg),
    /// Connection closed
    Leave,
}

/// Which sessions receive an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    Others(Uuid),
    Only(Uuid),
}

impl Audience {
    pub fn includes(&self, player_id: Uuid) -> bool {
        match *self {
            Audience::All => true,
            Audience::Others(sender) => sender != player_id,
            Audience::Only(target) => target == player_id,
        }
    }
}

/// Message fanned out to sessions through the world broadcast
#[derive(Debug, Clone)]
pub struct Outbound {
    pub audience: Audience,
    pub msg: ServerMsg,
}

/// Side effect produced by the world state
#[derive(Debug, Clone)]
pub enum Effect {
    Send(Outbound),
    SaveCharacter(CharacterSave),
}

/// A value reported by a client that the relay cannot verify.
/// The only way to read it is through a plausibility check.
#[derive(Debug, Clone, Copy)]
pub struct Untrusted<T>(T);

impl<T> Untrusted<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn check(self, plausible: impl FnOnce(&T) -> bool) -> Option<T> {
        plausible(&self.0).then_some(self.0)
    }
}
