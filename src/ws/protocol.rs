//! WebSocket protocol message definitions
//! Every frame is `{"event": "<name>", "data": <payload>}`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sim::math::{opt_xyz, xyz, Vec3};
use crate::sim::ragdoll::RagdollSeed;
use crate::store::characters::CharacterRecord;
use crate::world::{Block, BlockCoord, BlockType};

/// Items a player can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Item {
    /// Flat melee damage
    Sword,
    /// Launches the target into a ragdoll, no damage
    Bat,
    /// Restores health when used
    HealthPack,
}

/// Why a ragdoll started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RagdollReason {
    Fall,
    Bat,
}

/// Cosmetic choices sent once after login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Customization {
    pub name: String,
    pub color: String,
    pub hat: String,
    pub cape: String,
}

impl Default for Customization {
    fn default() -> Self {
        Self {
            name: "Player".to_string(),
            color: "#3a7bd5".to_string(),
            hat: "none".to_string(),
            cape: "none".to_string(),
        }
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMsg {
    /// Log in or play as guest
    Authenticate {
        username: String,
        password: String,
        #[serde(default)]
        is_guest: bool,
    },

    /// Cosmetics; enters the world on first receipt
    PlayerCustomization(Customization),

    /// Locally simulated transform of the sender
    PlayerMove {
        #[serde(with = "xyz")]
        position: Vec3,
        #[serde(with = "xyz")]
        rotation: Vec3,
        #[serde(default)]
        #[serde(with = "opt_xyz")]
        head_rotation: Option<Vec3>,
        #[serde(default)]
        is_sprinting: bool,
    },

    PlaceBlock {
        x: i32,
        y: i32,
        z: i32,
        #[serde(rename = "type")]
        block_type: BlockType,
    },

    RemoveBlock {
        x: i32,
        y: i32,
        z: i32,
    },

    /// Door or sign state change
    BlockUpdate {
        x: i32,
        y: i32,
        z: i32,
        #[serde(rename = "type")]
        block_type: BlockType,
        #[serde(default)]
        is_open: Option<bool>,
        #[serde(default)]
        message: Option<String>,
    },

    /// Hit result computed by the attacker, or hazard damage to self
    PlayerDamage {
        target_id: Uuid,
        damage: f32,
        #[serde(default)]
        allow_self: bool,
    },

    PlayerHeal {
        heal_amount: f32,
        health: f32,
    },

    /// Bat hit with attacker-generated spin
    PlayerBatHit {
        target_id: Uuid,
        #[serde(with = "xyz")]
        launch_direction: Vec3,
        angular_velocities: RagdollSeed,
    },

    /// Sender entered a ragdoll on its own (fall)
    PlayerRagdoll {
        reason: RagdollReason,
        #[serde(default)]
        fall_distance: f32,
    },

    /// Spin values for a ragdoll announced earlier by the same sender
    PlayerRagdollSeed {
        angular_velocities: RagdollSeed,
    },

    PlayerEquipItem {
        item: Option<Item>,
    },

    CarSpawned {
        car_id: String,
        #[serde(with = "xyz")]
        position: Vec3,
        #[serde(default)]
        #[serde(with = "xyz")]
        rotation: Vec3,
    },

    /// Driver's locally simulated car transform
    CarUpdate {
        car_id: String,
        #[serde(with = "xyz")]
        position: Vec3,
        #[serde(with = "xyz")]
        rotation: Vec3,
        #[serde(default)]
        #[serde(with = "xyz")]
        velocity: Vec3,
        #[serde(default)]
        steering_angle: f32,
    },

    CarEntry {
        car_id: String,
        seat_index: usize,
    },

    CarExit {
        car_id: String,
    },

    ChatMessage(String),

    PlayerSwingArm,

    PlayerUseItemSwing {
        item: Option<Item>,
    },

    PlayerTyping {
        is_typing: bool,
    },

    /// Persist cosmetics and position for the logged-in account
    SaveCharacter,

    /// Latency probe
    Ping {
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMsg {
    /// First message on a new connection
    Connected {
        player_id: Uuid,
        server_time: u64,
    },

    AuthResponse {
        success: bool,
        username: Option<String>,
        is_admin: bool,
        message: Option<String>,
        character: Option<CharacterRecord>,
    },

    /// Full world state for a player entering the world
    GameState {
        self_id: Uuid,
        players: Vec<PlayerInfo>,
        blocks: Vec<BlockInfo>,
        cars: Vec<CarInfo>,
    },

    PlayerJoined(PlayerInfo),

    PlayerLeft {
        player_id: Uuid,
    },

    PlayerMoved {
        player_id: Uuid,
        #[serde(with = "xyz")]
        position: Vec3,
        #[serde(with = "xyz")]
        rotation: Vec3,
        #[serde(with = "opt_xyz")]
        head_rotation: Option<Vec3>,
        is_sprinting: bool,
    },

    BlockPlaced(BlockInfo),

    BlockRemoved {
        x: i32,
        y: i32,
        z: i32,
    },

    BlockUpdated(BlockInfo),

    PlayerHealthUpdate {
        player_id: Uuid,
        health: f32,
    },

    PlayerDied {
        player_id: Uuid,
        killer_id: Option<Uuid>,
        #[serde(with = "xyz")]
        position: Vec3,
        /// Generated once by the server, replayed verbatim by every client
        debris: Vec<DebrisPiece>,
    },

    PlayerRespawned {
        player_id: Uuid,
        #[serde(with = "xyz")]
        position: Vec3,
        health: f32,
    },

    PlayerBatHit {
        attacker_id: Uuid,
        target_id: Uuid,
        #[serde(with = "xyz")]
        launch_direction: Vec3,
        angular_velocities: RagdollSeed,
    },

    PlayerRagdoll {
        player_id: Uuid,
        reason: RagdollReason,
        fall_distance: f32,
    },

    PlayerRagdollSeed {
        player_id: Uuid,
        angular_velocities: RagdollSeed,
    },

    PlayerEquippedItem {
        player_id: Uuid,
        item: Option<Item>,
    },

    CarSpawned(CarInfo),

    CarUpdated {
        car_id: String,
        #[serde(with = "xyz")]
        position: Vec3,
        #[serde(with = "xyz")]
        rotation: Vec3,
        #[serde(with = "xyz")]
        velocity: Vec3,
        steering_angle: f32,
    },

    CarEntered {
        car_id: String,
        player_id: Uuid,
        seat_index: usize,
    },

    CarExited {
        car_id: String,
        player_id: Uuid,
        seat_index: usize,
    },

    CarRemoved {
        car_id: String,
    },

    ChatMessage {
        player_id: Uuid,
        name: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    PlayerSwingArm {
        player_id: Uuid,
    },

    PlayerUseItemSwing {
        player_id: Uuid,
        item: Option<Item>,
    },

    PlayerTyping {
        player_id: Uuid,
        is_typing: bool,
    },

    Error {
        code: String,
        message: String,
    },

    Pong {
        t: u64,
    },
}

/// Player as seen by other players
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: Uuid,
    #[serde(flatten)]
    pub customization: Customization,
    #[serde(with = "xyz")]
    pub position: Vec3,
    #[serde(with = "xyz")]
    pub rotation: Vec3,
    pub health: f32,
    pub equipped_item: Option<Item>,
    pub in_car: Option<String>,
    pub car_seat_index: Option<usize>,
}

/// Block with its type-specific state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_open: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BlockInfo {
    pub fn from_block(coord: BlockCoord, block: &Block) -> Self {
        Self {
            x: coord.x,
            y: coord.y,
            z: coord.z,
            block_type: block.block_type,
            is_open: block.is_open(),
            message: block.message().map(str::to_string),
        }
    }

    pub fn coord(&self) -> BlockCoord {
        BlockCoord::new(self.x, self.y, self.z)
    }
}

/// Car registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarInfo {
    pub car_id: String,
    pub owner_id: Uuid,
    #[serde(with = "xyz")]
    pub position: Vec3,
    #[serde(with = "xyz")]
    pub rotation: Vec3,
    #[serde(with = "xyz")]
    pub velocity: Vec3,
    pub seats: [Option<Uuid>; 4],
}

/// One cube of a death explosion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebrisPiece {
    /// Edge length
    pub size: f32,
    /// Offset from the player's position
    #[serde(with = "xyz")]
    pub offset: Vec3,
    #[serde(with = "xyz")]
    pub velocity: Vec3,
}
