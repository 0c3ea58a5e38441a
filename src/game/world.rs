//! Authoritative world state and the relay task loop
//!
//! One task owns every registry. Sessions feed it [`PlayerInput`]s over an
//! mpsc channel; it answers through a broadcast of [`Outbound`] messages that
//! each session filters by audience. Handlers are synchronous and take the
//! arrival time, so the whole state machine runs without a runtime in tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cars::CarRegistry;
use super::combat::{CombatSystem, RejectReason};
use super::{Audience, Effect, Outbound, PlayerInput, Untrusted, WorldInput};
use crate::sim::math::Vec3;
use crate::sim::ragdoll::RagdollSeed;
use crate::sim::tuning::{HEALTH_PACK_AMOUNT, MAX_HEALTH, RESPAWN_DELAY_MS, SPAWN_POINT};
use crate::store::characters::CharacterRecord;
use crate::util::time::unix_millis;
use crate::world::{BlockCoord, BlockGrid, BlockPatch, BlockType};
use crate::ws::protocol::{BlockInfo, ClientMsg, Customization, Item, PlayerInfo, ServerMsg};

const MAX_CHAT_CHARS: usize = 200;
const MAX_DISPLAY_NAME_CHARS: usize = 16;
const MAX_COSMETIC_CHARS: usize = 32;

#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Seed for server-side randomness (death debris)
    pub seed: u64,
    pub max_cars_per_player: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            max_cars_per_player: 3,
        }
    }
}

/// Character persistence request for the store task
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterSave {
    pub username: String,
    pub record: CharacterRecord,
}

/// Authenticated connection, possibly not yet in the world
#[derive(Debug, Clone)]
struct Session {
    username: String,
    is_admin: bool,
    is_guest: bool,
    character: Option<CharacterRecord>,
}

/// Player in the world (authoritative health, relayed transform)
#[derive(Debug, Clone)]
pub struct ServerPlayer {
    pub id: Uuid,
    pub customization: Customization,
    pub position: Vec3,
    pub rotation: Vec3,
    pub head_rotation: Option<Vec3>,
    pub is_sprinting: bool,
    pub health: f32,
    pub equipped_item: Option<Item>,
}

impl ServerPlayer {
    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }
}

/// Effects accumulated while handling one input
#[derive(Default)]
struct Outbox {
    effects: Vec<Effect>,
}

impl Outbox {
    fn push(&mut self, audience: Audience, msg: ServerMsg) {
        self.effects.push(Effect::Send(Outbound { audience, msg }));
    }

    fn all(&mut self, msg: ServerMsg) {
        self.push(Audience::All, msg);
    }

    fn others(&mut self, sender: Uuid, msg: ServerMsg) {
        self.push(Audience::Others(sender), msg);
    }

    fn to(&mut self, player_id: Uuid, msg: ServerMsg) {
        self.push(Audience::Only(player_id), msg);
    }
}

/// World state (owned by the world task)
pub struct WorldState {
    grid: BlockGrid,
    cars: CarRegistry,
    sessions: HashMap<Uuid, Session>,
    players: HashMap<Uuid, ServerPlayer>,
    /// Entry order, used for game state snapshots
    join_order: Vec<Uuid>,
    /// (due time ms, player)
    respawns: BTreeSet<(u64, Uuid)>,
    rng: ChaCha8Rng,
    max_cars_per_player: usize,
}

impl WorldState {
    pub fn new(config: &WorldConfig) -> Self {
        Self {
            grid: BlockGrid::new(),
            cars: CarRegistry::new(),
            sessions: HashMap::new(),
            players: HashMap::new(),
            join_order: Vec::new(),
            respawns: BTreeSet::new(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            max_cars_per_player: config.max_cars_per_player,
        }
    }

    pub fn grid(&self) -> &BlockGrid {
        &self.grid
    }

    pub fn cars(&self) -> &CarRegistry {
        &self.cars
    }

    pub fn player(&self, id: Uuid) -> Option<&ServerPlayer> {
        self.players.get(&id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Handle one input and return what should happen as a result
    pub fn handle(&mut self, input: PlayerInput) -> Vec<Effect> {
        let PlayerInput {
            player_id,
            input,
            received_at,
        } = input;
        let mut out = Outbox::default();

        let result = match input {
            WorldInput::Join {
                username,
                is_admin,
                is_guest,
                character,
            } => {
                self.sessions.insert(
                    player_id,
                    Session {
                        username,
                        is_admin,
                        is_guest,
                        character,
                    },
                );
                Ok(())
            }
            WorldInput::Leave => {
                self.handle_leave(player_id, &mut out);
                Ok(())
            }
            WorldInput::Client(msg) => self.handle_client(player_id, msg, received_at, &mut out),
        };

        if let Err(reason) = result {
            debug!(player_id = %player_id, reason = %reason, "Rejected client message");
            out.to(
                player_id,
                ServerMsg::Error {
                    code: reason.code().to_string(),
                    message: reason.to_string(),
                },
            );
        }
        out.effects
    }

    /// Unix millis of the earliest pending respawn
    pub fn next_due(&self) -> Option<u64> {
        self.respawns.first().map(|&(due, _)| due)
    }

    /// Fire due respawns
    pub fn poll_timers(&mut self, now_ms: u64) -> Vec<Effect> {
        let mut out = Outbox::default();
        while let Some(&(due, player_id)) = self.respawns.first() {
            if due > now_ms {
                break;
            }
            self.respawns.pop_first();
            let Some(player) = self.players.get_mut(&player_id) else {
                continue;
            };
            if player.is_alive() {
                continue;
            }
            player.health = MAX_HEALTH;
            player.position = SPAWN_POINT;
            player.rotation = Vec3::ZERO;
            info!(player_id = %player_id, "Player respawned");
            out.all(ServerMsg::PlayerRespawned {
                player_id,
                position: SPAWN_POINT,
                health: MAX_HEALTH,
            });
        }
        out.effects
    }

    fn handle_client(&mut self, id: Uuid, msg: ClientMsg, now: u64, out: &mut Outbox) -> Result<(), RejectReason> {
        if !self.sessions.contains_key(&id) {
            return Err(RejectReason::NotAuthenticated);
        }

        match msg {
            // Login is handled by the session before anything reaches the world
            ClientMsg::Authenticate { .. } => Ok(()),
            ClientMsg::Ping { t } => {
                out.to(id, ServerMsg::Pong { t });
                Ok(())
            }
            ClientMsg::PlayerCustomization(customization) => self.handle_customization(id, customization, out),
            msg => {
                if !self.players.contains_key(&id) {
                    return Err(RejectReason::NotInWorld);
                }
                self.handle_in_world(id, msg, now, out)
            }
        }
    }

    fn handle_in_world(&mut self, id: Uuid, msg: ClientMsg, now: u64, out: &mut Outbox) -> Result<(), RejectReason> {
        match msg {
            ClientMsg::PlayerMove {
                position,
                rotation,
                head_rotation,
                is_sprinting,
            } => {
                if !(position.is_finite() && rotation.is_finite() && head_rotation.map_or(true, Vec3::is_finite)) {
                    return Err(RejectReason::Implausible);
                }
                let player = self.alive_player_mut(id)?;
                player.position = position;
                player.rotation = rotation;
                player.head_rotation = head_rotation;
                player.is_sprinting = is_sprinting;
                out.others(
                    id,
                    ServerMsg::PlayerMoved {
                        player_id: id,
                        position,
                        rotation,
                        head_rotation,
                        is_sprinting,
                    },
                );
                Ok(())
            }

            ClientMsg::PlaceBlock { x, y, z, block_type } => {
                let coord = bounded(x, y, z)?;
                if !self.grid.place(coord, block_type) {
                    return Err(RejectReason::Occupied);
                }
                if let Some(block) = self.grid.get(coord) {
                    out.all(ServerMsg::BlockPlaced(BlockInfo::from_block(coord, block)));
                }
                Ok(())
            }

            ClientMsg::RemoveBlock { x, y, z } => {
                self.grid
                    .remove(bounded(x, y, z)?)
                    .ok_or(RejectReason::NoSuchBlock)?;
                out.all(ServerMsg::BlockRemoved { x, y, z });
                Ok(())
            }

            ClientMsg::BlockUpdate {
                x,
                y,
                z,
                block_type,
                is_open,
                message,
            } => self.handle_block_update(bounded(x, y, z)?, block_type, is_open, message, out),

            ClientMsg::PlayerDamage {
                target_id,
                damage,
                allow_self,
            } => self.handle_damage(id, target_id, Untrusted::new(damage), allow_self, now, out),

            ClientMsg::PlayerHeal { heal_amount, health } => {
                let amount = Untrusted::new(heal_amount)
                    .check(|a| a.is_finite() && *a > 0.0 && *a <= HEALTH_PACK_AMOUNT)
                    .ok_or(RejectReason::Implausible)?;
                let player = self.alive_player_mut(id)?;
                let healed = CombatSystem::apply_heal(player.health, amount);
                if (healed - health).abs() > 0.01 {
                    debug!(player_id = %id, reported = health, actual = healed, "Heal result differs from client");
                }
                player.health = healed;
                out.all(ServerMsg::PlayerHealthUpdate {
                    player_id: id,
                    health: healed,
                });
                Ok(())
            }

            ClientMsg::PlayerBatHit {
                target_id,
                launch_direction,
                angular_velocities,
            } => self.handle_bat_hit(
                id,
                target_id,
                Untrusted::new(launch_direction),
                Untrusted::new(angular_velocities),
                out,
            ),

            ClientMsg::PlayerRagdoll { reason, fall_distance } => {
                self.alive_player_mut(id)?;
                let fall_distance = Untrusted::new(fall_distance)
                    .check(|d| d.is_finite() && *d >= 0.0)
                    .ok_or(RejectReason::Implausible)?;
                out.others(
                    id,
                    ServerMsg::PlayerRagdoll {
                        player_id: id,
                        reason,
                        fall_distance,
                    },
                );
                Ok(())
            }

            ClientMsg::PlayerRagdollSeed { angular_velocities } => {
                let seed = Untrusted::new(angular_velocities)
                    .check(RagdollSeed::is_finite)
                    .ok_or(RejectReason::Implausible)?;
                out.others(
                    id,
                    ServerMsg::PlayerRagdollSeed {
                        player_id: id,
                        angular_velocities: seed,
                    },
                );
                Ok(())
            }

            ClientMsg::PlayerEquipItem { item } => {
                if let Some(player) = self.players.get_mut(&id) {
                    player.equipped_item = item;
                }
                out.others(id, ServerMsg::PlayerEquippedItem { player_id: id, item });
                Ok(())
            }

            ClientMsg::CarSpawned {
                car_id,
                position,
                rotation,
            } => {
                self.alive_player_mut(id)?;
                let (info, replaced) = self
                    .cars
                    .spawn(car_id, id, position, rotation, self.max_cars_per_player)?;
                for car_id in replaced {
                    debug!(car_id = %car_id, owner = %id, "Car replaced by newer spawn");
                    out.all(ServerMsg::CarRemoved { car_id });
                }
                out.all(ServerMsg::CarSpawned(info));
                Ok(())
            }

            ClientMsg::CarUpdate {
                car_id,
                position,
                rotation,
                velocity,
                steering_angle,
            } => {
                self.cars
                    .update(&car_id, id, position, rotation, velocity, steering_angle)?;
                out.others(
                    id,
                    ServerMsg::CarUpdated {
                        car_id,
                        position,
                        rotation,
                        velocity,
                        steering_angle,
                    },
                );
                Ok(())
            }

            ClientMsg::CarEntry { car_id, seat_index } => {
                self.alive_player_mut(id)?;
                self.cars.enter(&car_id, id, seat_index)?;
                out.all(ServerMsg::CarEntered {
                    car_id,
                    player_id: id,
                    seat_index,
                });
                Ok(())
            }

            ClientMsg::CarExit { car_id } => {
                let seat_index = self.cars.exit(&car_id, id)?;
                out.all(ServerMsg::CarExited {
                    car_id,
                    player_id: id,
                    seat_index,
                });
                Ok(())
            }

            ClientMsg::ChatMessage(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(());
                }
                let message: String = text.chars().take(MAX_CHAT_CHARS).collect();
                let name = self
                    .players
                    .get(&id)
                    .map(|p| p.customization.name.clone())
                    .unwrap_or_default();
                let timestamp = millis_to_utc(now);
                out.all(ServerMsg::ChatMessage {
                    player_id: id,
                    name,
                    message,
                    timestamp,
                });
                Ok(())
            }

            ClientMsg::PlayerSwingArm => {
                self.alive_player_mut(id)?;
                out.others(id, ServerMsg::PlayerSwingArm { player_id: id });
                Ok(())
            }

            ClientMsg::PlayerUseItemSwing { item } => {
                self.alive_player_mut(id)?;
                out.others(id, ServerMsg::PlayerUseItemSwing { player_id: id, item });
                Ok(())
            }

            ClientMsg::PlayerTyping { is_typing } => {
                out.others(id, ServerMsg::PlayerTyping { player_id: id, is_typing });
                Ok(())
            }

            ClientMsg::SaveCharacter => {
                let save = self.character_save(id, now)?;
                out.effects.push(Effect::SaveCharacter(save));
                Ok(())
            }

            ClientMsg::Authenticate { .. } | ClientMsg::PlayerCustomization(_) | ClientMsg::Ping { .. } => Ok(()),
        }
    }

    fn handle_customization(&mut self, id: Uuid, raw: Customization, out: &mut Outbox) -> Result<(), RejectReason> {
        let session = self.sessions.get(&id).ok_or(RejectReason::NotAuthenticated)?;
        let customization = sanitize_customization(raw, &session.username);

        if let Some(player) = self.players.get_mut(&id) {
            player.customization = customization;
            if let Some(info) = self.player_info(id) {
                out.others(id, ServerMsg::PlayerJoined(info));
            }
            return Ok(());
        }

        let position = session
            .character
            .as_ref()
            .map(|c| c.position)
            .filter(|p| p.is_finite())
            .unwrap_or(SPAWN_POINT);
        info!(
            player_id = %id,
            username = %session.username,
            admin = session.is_admin,
            "Player entered world"
        );

        self.players.insert(
            id,
            ServerPlayer {
                id,
                customization,
                position,
                rotation: Vec3::ZERO,
                head_rotation: None,
                is_sprinting: false,
                health: MAX_HEALTH,
                equipped_item: None,
            },
        );
        self.join_order.push(id);

        out.to(
            id,
            ServerMsg::GameState {
                self_id: id,
                players: self.join_order.iter().filter_map(|p| self.player_info(*p)).collect(),
                blocks: self.block_infos(),
                cars: self.cars.infos(),
            },
        );
        if let Some(info) = self.player_info(id) {
            out.others(id, ServerMsg::PlayerJoined(info));
        }
        Ok(())
    }

    fn handle_block_update(
        &mut self,
        coord: BlockCoord,
        block_type: BlockType,
        is_open: Option<bool>,
        message: Option<String>,
        out: &mut Outbox,
    ) -> Result<(), RejectReason> {
        let current = self.grid.get(coord).ok_or(RejectReason::NoSuchBlock)?;
        if current.block_type != block_type {
            return Err(RejectReason::NoSuchBlock);
        }

        let changed = match (block_type, is_open) {
            (BlockType::Door, Some(open)) => self.grid.set_door_group(coord, open),
            _ => {
                let patch = BlockPatch {
                    block_type,
                    is_open,
                    message,
                };
                if !self.grid.update_state(coord, &patch) {
                    return Err(RejectReason::Implausible);
                }
                vec![coord]
            }
        };

        for coord in changed {
            if let Some(block) = self.grid.get(coord) {
                out.all(ServerMsg::BlockUpdated(BlockInfo::from_block(coord, block)));
            }
        }
        Ok(())
    }

    fn handle_damage(
        &mut self,
        attacker_id: Uuid,
        target_id: Uuid,
        damage: Untrusted<f32>,
        allow_self: bool,
        now: u64,
        out: &mut Outbox,
    ) -> Result<(), RejectReason> {
        let attacker_alive = self
            .players
            .get(&attacker_id)
            .ok_or(RejectReason::NotInWorld)?
            .is_alive();
        if target_id == attacker_id {
            if !allow_self {
                return Err(RejectReason::SelfDamage);
            }
        } else if !attacker_alive {
            return Err(RejectReason::Dead);
        }
        let damage = damage
            .check(|d| d.is_finite() && *d >= 0.0)
            .ok_or(RejectReason::Implausible)?;

        let target = self.players.get_mut(&target_id).ok_or(RejectReason::UnknownTarget)?;
        if !target.is_alive() {
            return Err(RejectReason::TargetDead);
        }
        let outcome = CombatSystem::apply_damage(target.health, damage);
        target.health = outcome.health;
        let position = target.position;

        out.all(ServerMsg::PlayerHealthUpdate {
            player_id: target_id,
            health: outcome.health,
        });
        if outcome.killed {
            let killer = (target_id != attacker_id).then_some(attacker_id);
            self.kill(target_id, killer, position, now, out);
        }
        Ok(())
    }

    fn kill(&mut self, player_id: Uuid, killer_id: Option<Uuid>, position: Vec3, now: u64, out: &mut Outbox) {
        info!(player_id = %player_id, killer_id = ?killer_id, "Player died");
        let debris = CombatSystem::generate_debris(&mut self.rng);
        out.all(ServerMsg::PlayerDied {
            player_id,
            killer_id,
            position,
            debris,
        });
        for freed in self.cars.evict(player_id) {
            out.all(ServerMsg::CarExited {
                car_id: freed.car_id,
                player_id,
                seat_index: freed.seat_index,
            });
        }
        self.respawns.insert((now + RESPAWN_DELAY_MS, player_id));
    }

    fn handle_bat_hit(
        &mut self,
        attacker_id: Uuid,
        target_id: Uuid,
        launch_direction: Untrusted<Vec3>,
        seed: Untrusted<RagdollSeed>,
        out: &mut Outbox,
    ) -> Result<(), RejectReason> {
        self.alive_player_mut(attacker_id)?;
        if target_id == attacker_id {
            return Err(RejectReason::SelfDamage);
        }
        let target = self.players.get(&target_id).ok_or(RejectReason::UnknownTarget)?;
        if !target.is_alive() {
            return Err(RejectReason::TargetDead);
        }
        let launch_direction = launch_direction
            .check(|d| d.is_finite())
            .ok_or(RejectReason::Implausible)?;
        let angular_velocities = seed
            .check(RagdollSeed::is_finite)
            .ok_or(RejectReason::Implausible)?;

        out.all(ServerMsg::PlayerBatHit {
            attacker_id,
            target_id,
            launch_direction,
            angular_velocities,
        });
        Ok(())
    }

    fn handle_leave(&mut self, id: Uuid, out: &mut Outbox) {
        let Some(session) = self.sessions.remove(&id) else {
            return;
        };
        if self.players.remove(&id).is_none() {
            return;
        }
        self.join_order.retain(|p| *p != id);
        self.respawns.retain(|(_, p)| *p != id);

        for freed in self.cars.evict(id) {
            out.all(ServerMsg::CarExited {
                car_id: freed.car_id,
                player_id: id,
                seat_index: freed.seat_index,
            });
        }
        for car_id in self.cars.remove_abandoned(id) {
            out.all(ServerMsg::CarRemoved { car_id });
        }
        out.all(ServerMsg::PlayerLeft { player_id: id });
        info!(player_id = %id, username = %session.username, "Player left world");
    }

    fn character_save(&self, id: Uuid, now: u64) -> Result<CharacterSave, RejectReason> {
        let session = self.sessions.get(&id).ok_or(RejectReason::NotAuthenticated)?;
        if session.is_guest {
            return Err(RejectReason::GuestSave);
        }
        let player = self.players.get(&id).ok_or(RejectReason::NotInWorld)?;
        let saved_at = millis_to_utc(now);
        Ok(CharacterSave {
            username: session.username.clone(),
            record: CharacterRecord {
                customization: player.customization.clone(),
                position: player.position,
                saved_at,
            },
        })
    }

    fn alive_player_mut(&mut self, id: Uuid) -> Result<&mut ServerPlayer, RejectReason> {
        let player = self.players.get_mut(&id).ok_or(RejectReason::NotInWorld)?;
        if !player.is_alive() {
            return Err(RejectReason::Dead);
        }
        Ok(player)
    }

    fn player_info(&self, id: Uuid) -> Option<PlayerInfo> {
        let player = self.players.get(&id)?;
        let seat = self.cars.seat_of(id);
        Some(PlayerInfo {
            id,
            customization: player.customization.clone(),
            position: player.position,
            rotation: player.rotation,
            health: player.health,
            equipped_item: player.equipped_item,
            car_seat_index: seat.as_ref().map(|(_, s)| *s),
            in_car: seat.map(|(car, _)| car),
        })
    }

    fn block_infos(&self) -> Vec<BlockInfo> {
        let mut blocks: Vec<BlockInfo> = self
            .grid
            .iter()
            .map(|(coord, block)| BlockInfo::from_block(*coord, block))
            .collect();
        blocks.sort_by_key(BlockInfo::coord);
        blocks
    }
}

/// Trim and cap cosmetic strings; an empty name falls back to the account name
fn sanitize_customization(raw: Customization, username: &str) -> Customization {
    let clip = |s: &str, max: usize| -> String { s.trim().chars().take(max).collect() };
    let mut name = clip(&raw.name, MAX_DISPLAY_NAME_CHARS);
    if name.is_empty() {
        name = clip(username, MAX_DISPLAY_NAME_CHARS);
    }
    let defaults = Customization::default();
    let or_default = |value: String, fallback: String| if value.is_empty() { fallback } else { value };
    Customization {
        name,
        color: or_default(clip(&raw.color, MAX_COSMETIC_CHARS), defaults.color),
        hat: or_default(clip(&raw.hat, MAX_COSMETIC_CHARS), defaults.hat),
        cape: or_default(clip(&raw.cape, MAX_COSMETIC_CHARS), defaults.cape),
    }
}

/// Client-supplied block position, refused outside the world limit
fn bounded(x: i32, y: i32, z: i32) -> Result<BlockCoord, RejectReason> {
    let coord = BlockCoord::new(x, y, z);
    if coord.in_bounds() {
        Ok(coord)
    } else {
        Err(RejectReason::OutOfBounds)
    }
}

/// Monotonic instant for a unix-millis deadline; past deadlines map to now
fn instant_for(due_ms: u64) -> Instant {
    Instant::now() + Duration::from_millis(due_ms.saturating_sub(unix_millis()))
}

fn millis_to_utc(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

/// Counters readable outside the world task
#[derive(Debug, Default)]
pub struct WorldStats {
    pub players: AtomicUsize,
    pub blocks: AtomicUsize,
    pub cars: AtomicUsize,
}

impl WorldStats {
    pub fn players(&self) -> usize {
        self.players.load(Ordering::Relaxed)
    }

    pub fn blocks(&self) -> usize {
        self.blocks.load(Ordering::Relaxed)
    }

    pub fn cars(&self) -> usize {
        self.cars.load(Ordering::Relaxed)
    }
}

/// Handle for sessions to talk to the world task
#[derive(Clone)]
pub struct WorldHandle {
    pub input_tx: mpsc::Sender<PlayerInput>,
    pub outbound_tx: broadcast::Sender<Outbound>,
    pub stats: Arc<WorldStats>,
}

impl WorldHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound_tx.subscribe()
    }
}

/// The world task
pub struct GameWorld {
    state: WorldState,
    input_rx: mpsc::Receiver<PlayerInput>,
    outbound_tx: broadcast::Sender<Outbound>,
    save_tx: mpsc::UnboundedSender<CharacterSave>,
    stats: Arc<WorldStats>,
}

impl GameWorld {
    /// Create the world task plus its handle and the receiving end of
    /// character save requests
    pub fn new(config: WorldConfig) -> (Self, WorldHandle, mpsc::UnboundedReceiver<CharacterSave>) {
        let (input_tx, input_rx) = mpsc::channel(1024);
        let (outbound_tx, _) = broadcast::channel(1024);
        let (save_tx, save_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(WorldStats::default());

        let handle = WorldHandle {
            input_tx,
            outbound_tx: outbound_tx.clone(),
            stats: stats.clone(),
        };
        let world = Self {
            state: WorldState::new(&config),
            input_rx,
            outbound_tx,
            save_tx,
            stats,
        };
        (world, handle, save_rx)
    }

    /// Run until every input sender is dropped
    pub async fn run(mut self) {
        info!("World started");

        loop {
            let due = self.state.next_due();
            let wake = due.map(instant_for).unwrap_or_else(Instant::now);

            tokio::select! {
                input = self.input_rx.recv() => {
                    let Some(input) = input else { break };
                    let effects = self.state.handle(input);
                    self.dispatch(effects);
                    self.process_inputs();
                }
                _ = sleep_until(wake), if due.is_some() => {
                    let effects = self.state.poll_timers(unix_millis());
                    self.dispatch(effects);
                }
            }
            self.publish_stats();
        }

        info!("World stopped");
    }

    /// Drain whatever else is already queued
    fn process_inputs(&mut self) {
        while let Ok(input) = self.input_rx.try_recv() {
            let effects = self.state.handle(input);
            self.dispatch(effects);
        }
    }

    fn dispatch(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send(outbound) => {
                    // No receivers just means nobody is connected
                    let _ = self.outbound_tx.send(outbound);
                }
                Effect::SaveCharacter(save) => {
                    if self.save_tx.send(save).is_err() {
                        warn!("Character store task is gone, save dropped");
                    }
                }
            }
        }
    }

    fn publish_stats(&self) {
        self.stats.players.store(self.state.player_count(), Ordering::Relaxed);
        self.stats.blocks.store(self.state.grid().len(), Ordering::Relaxed);
        self.stats.cars.store(self.state.cars().len(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::grid::WORLD_LIMIT;

    const T0: u64 = 1_700_000_000_000;

    fn world() -> WorldState {
        WorldState::new(&WorldConfig {
            seed: 7,
            max_cars_per_player: 3,
        })
    }

    fn input(player_id: Uuid, input: WorldInput, at: u64) -> PlayerInput {
        PlayerInput {
            player_id,
            input,
            received_at: at,
        }
    }

    fn send(world: &mut WorldState, id: Uuid, msg: ClientMsg, at: u64) -> Vec<(Audience, ServerMsg)> {
        outbound(world.handle(input(id, WorldInput::Client(msg), at)))
    }

    fn outbound(effects: Vec<Effect>) -> Vec<(Audience, ServerMsg)> {
        effects
            .into_iter()
            .filter_map(|e| match e {
                Effect::Send(o) => Some((o.audience, o.msg)),
                Effect::SaveCharacter(_) => None,
            })
            .collect()
    }

    fn login(world: &mut WorldState, username: &str, is_guest: bool) -> Uuid {
        let id = Uuid::new_v4();
        world.handle(input(
            id,
            WorldInput::Join {
                username: username.to_string(),
                is_admin: false,
                is_guest,
                character: None,
            },
            T0,
        ));
        id
    }

    fn enter(world: &mut WorldState, username: &str) -> Uuid {
        let id = login(world, username, false);
        let customization = Customization {
            name: username.to_string(),
            ..Customization::default()
        };
        send(world, id, ClientMsg::PlayerCustomization(customization), T0);
        id
    }

    fn damage(target_id: Uuid, amount: f32) -> ClientMsg {
        ClientMsg::PlayerDamage {
            target_id,
            damage: amount,
            allow_self: false,
        }
    }

    fn error_code(msgs: &[(Audience, ServerMsg)]) -> Option<&str> {
        msgs.iter().find_map(|(_, m)| match m {
            ServerMsg::Error { code, .. } => Some(code.as_str()),
            _ => None,
        })
    }

    #[test]
    fn entering_sends_state_to_self_and_join_to_others() {
        let mut w = world();
        let alice = enter(&mut w, "alice");
        w.handle(input(
            alice,
            WorldInput::Client(ClientMsg::PlaceBlock {
                x: 0,
                y: 0,
                z: 0,
                block_type: BlockType::Stone,
            }),
            T0,
        ));

        let bob = login(&mut w, "bob", false);
        let msgs = send(&mut w, bob, ClientMsg::PlayerCustomization(Customization::default()), T0);

        match &msgs[0] {
            (Audience::Only(to), ServerMsg::GameState { self_id, players, blocks, .. }) => {
                assert_eq!(*to, bob);
                assert_eq!(*self_id, bob);
                let ids: Vec<Uuid> = players.iter().map(|p| p.id).collect();
                assert_eq!(ids, vec![alice, bob]);
                assert_eq!(blocks.len(), 1);
            }
            other => panic!("expected game state, got {other:?}"),
        }
        assert!(matches!(&msgs[1], (Audience::Others(from), ServerMsg::PlayerJoined(info)) if *from == bob && info.id == bob));
    }

    #[test]
    fn messages_before_login_are_rejected() {
        let mut w = world();
        let stranger = Uuid::new_v4();
        let msgs = send(&mut w, stranger, ClientMsg::PlayerSwingArm, T0);
        assert_eq!(error_code(&msgs), Some("not_authenticated"));
        assert!(matches!(msgs[0].0, Audience::Only(id) if id == stranger));

        let lobby = login(&mut w, "carol", false);
        let msgs = send(&mut w, lobby, ClientMsg::PlayerSwingArm, T0);
        assert_eq!(error_code(&msgs), Some("not_in_world"));
    }

    #[test]
    fn first_block_writer_wins() {
        let mut w = world();
        let a = enter(&mut w, "alice");
        let b = enter(&mut w, "bob");
        let place = |t| ClientMsg::PlaceBlock {
            x: 1,
            y: 0,
            z: 1,
            block_type: t,
        };

        let first = send(&mut w, a, place(BlockType::Dirt), T0);
        assert!(matches!(&first[0], (Audience::All, ServerMsg::BlockPlaced(b)) if b.block_type == BlockType::Dirt));

        let second = send(&mut w, b, place(BlockType::Stone), T0);
        assert_eq!(second.len(), 1);
        assert_eq!(error_code(&second), Some("occupied"));
        assert_eq!(
            w.grid().get(BlockCoord::new(1, 0, 1)).map(|b| b.block_type),
            Some(BlockType::Dirt)
        );
    }

    #[test]
    fn death_fires_once_and_respawn_is_exactly_five_seconds_later() {
        let mut w = world();
        let a = enter(&mut w, "alice");
        let b = enter(&mut w, "bob");
        assert_eq!(w.next_due(), None);

        for _ in 0..3 {
            send(&mut w, a, damage(b, 25.0), T0);
        }
        let fatal = send(&mut w, a, damage(b, 25.0), T0);
        let deaths: Vec<_> = fatal
            .iter()
            .filter(|(_, m)| matches!(m, ServerMsg::PlayerDied { .. }))
            .collect();
        assert_eq!(deaths.len(), 1);
        match deaths[0] {
            (Audience::All, ServerMsg::PlayerDied { killer_id, debris, .. }) => {
                assert_eq!(*killer_id, Some(a));
                assert_eq!(debris.len(), 30);
            }
            other => panic!("unexpected {other:?}"),
        }

        let again = send(&mut w, a, damage(b, 25.0), T0 + 10);
        assert_eq!(error_code(&again), Some("target_dead"));
        assert!(!again.iter().any(|(_, m)| matches!(m, ServerMsg::PlayerDied { .. })));

        // The world task sleeps until this deadline
        assert_eq!(w.next_due(), Some(T0 + RESPAWN_DELAY_MS));
        assert!(w.poll_timers(T0 + RESPAWN_DELAY_MS - 1).is_empty());
        let respawn = outbound(w.poll_timers(T0 + RESPAWN_DELAY_MS));
        assert!(matches!(
            &respawn[..],
            [(Audience::All, ServerMsg::PlayerRespawned { player_id, health, position })]
                if *player_id == b && *health == MAX_HEALTH && *position == SPAWN_POINT
        ));
        assert!(w.poll_timers(T0 + RESPAWN_DELAY_MS + 1000).is_empty());
        assert_eq!(w.next_due(), None);
    }

    #[test]
    fn self_damage_needs_hazard_flag() {
        let mut w = world();
        let a = enter(&mut w, "alice");

        let plain = send(&mut w, a, damage(a, 10.0), T0);
        assert_eq!(error_code(&plain), Some("self_damage"));

        let hazard = send(
            &mut w,
            a,
            ClientMsg::PlayerDamage {
                target_id: a,
                damage: 100.0,
                allow_self: true,
            },
            T0,
        );
        assert!(hazard
            .iter()
            .any(|(_, m)| matches!(m, ServerMsg::PlayerDied { killer_id: None, .. })));
    }

    #[test]
    fn implausible_damage_is_rejected() {
        let mut w = world();
        let a = enter(&mut w, "alice");
        let b = enter(&mut w, "bob");
        assert_eq!(error_code(&send(&mut w, a, damage(b, f32::NAN), T0)), Some("implausible"));
        assert_eq!(error_code(&send(&mut w, a, damage(b, -5.0), T0)), Some("implausible"));
        assert_eq!(w.player(b).map(|p| p.health), Some(MAX_HEALTH));
    }

    #[test]
    fn dead_players_cannot_move_or_attack() {
        let mut w = world();
        let a = enter(&mut w, "alice");
        let b = enter(&mut w, "bob");
        send(&mut w, a, damage(b, 100.0), T0);

        let moved = send(
            &mut w,
            b,
            ClientMsg::PlayerMove {
                position: Vec3::new(5.0, 1.0, 5.0),
                rotation: Vec3::ZERO,
                head_rotation: None,
                is_sprinting: false,
            },
            T0,
        );
        assert_eq!(error_code(&moved), Some("dead"));
        assert_eq!(error_code(&send(&mut w, b, damage(a, 25.0), T0)), Some("dead"));
    }

    #[test]
    fn heal_is_clamped_by_server() {
        let mut w = world();
        let a = enter(&mut w, "alice");
        let b = enter(&mut w, "bob");
        send(&mut w, a, damage(b, 10.0), T0);

        let healed = send(
            &mut w,
            b,
            ClientMsg::PlayerHeal {
                heal_amount: 30.0,
                health: 120.0,
            },
            T0,
        );
        assert!(matches!(
            &healed[..],
            [(Audience::All, ServerMsg::PlayerHealthUpdate { health, .. })] if *health == MAX_HEALTH
        ));

        let greedy = send(
            &mut w,
            b,
            ClientMsg::PlayerHeal {
                heal_amount: 1000.0,
                health: 100.0,
            },
            T0,
        );
        assert_eq!(error_code(&greedy), Some("implausible"));
    }

    #[test]
    fn far_away_block_positions_are_refused() {
        let mut w = world();
        let a = enter(&mut w, "alice");
        let door_at = |x: i32| ClientMsg::PlaceBlock {
            x,
            y: 0,
            z: 0,
            block_type: BlockType::Door,
        };
        let open_at = |x: i32| ClientMsg::BlockUpdate {
            x,
            y: 0,
            z: 0,
            block_type: BlockType::Door,
            is_open: Some(true),
            message: None,
        };

        let placed = send(&mut w, a, door_at(i32::MAX), T0);
        assert_eq!(error_code(&placed), Some("out_of_bounds"));
        let updated = send(&mut w, a, open_at(i32::MAX), T0);
        assert_eq!(error_code(&updated), Some("out_of_bounds"));
        let removed = send(&mut w, a, ClientMsg::RemoveBlock { x: 0, y: i32::MIN, z: 0 }, T0);
        assert_eq!(error_code(&removed), Some("out_of_bounds"));
        assert!(w.grid().is_empty());

        // The edge itself is still part of the world
        assert!(error_code(&send(&mut w, a, door_at(WORLD_LIMIT), T0)).is_none());
        let opened = send(&mut w, a, open_at(WORLD_LIMIT), T0);
        assert!(matches!(
            opened.as_slice(),
            [(Audience::All, ServerMsg::BlockUpdated(b))] if b.is_open == Some(true)
        ));
    }

    #[test]
    fn door_update_toggles_whole_group() {
        let mut w = world();
        let a = enter(&mut w, "alice");
        for y in 0..2 {
            send(
                &mut w,
                a,
                ClientMsg::PlaceBlock {
                    x: 0,
                    y,
                    z: 0,
                    block_type: BlockType::Door,
                },
                T0,
            );
        }

        let msgs = send(
            &mut w,
            a,
            ClientMsg::BlockUpdate {
                x: 0,
                y: 0,
                z: 0,
                block_type: BlockType::Door,
                is_open: Some(true),
                message: None,
            },
            T0,
        );
        let opened: Vec<_> = msgs
            .iter()
            .filter(|(aud, m)| *aud == Audience::All && matches!(m, ServerMsg::BlockUpdated(b) if b.is_open == Some(true)))
            .collect();
        assert_eq!(opened.len(), 2);

        let mismatch = send(
            &mut w,
            a,
            ClientMsg::BlockUpdate {
                x: 0,
                y: 0,
                z: 0,
                block_type: BlockType::Sign,
                is_open: None,
                message: Some("hi".into()),
            },
            T0,
        );
        assert_eq!(error_code(&mismatch), Some("no_such_block"));
    }

    #[test]
    fn relayed_events_skip_the_sender() {
        let mut w = world();
        let a = enter(&mut w, "alice");
        let moved = send(
            &mut w,
            a,
            ClientMsg::PlayerMove {
                position: Vec3::new(1.0, 1.0, 1.0),
                rotation: Vec3::ZERO,
                head_rotation: None,
                is_sprinting: true,
            },
            T0,
        );
        assert!(matches!(&moved[..], [(Audience::Others(from), ServerMsg::PlayerMoved { .. })] if *from == a));

        let typing = send(&mut w, a, ClientMsg::PlayerTyping { is_typing: true }, T0);
        assert!(matches!(typing[0].0, Audience::Others(_)));

        let equipped = send(&mut w, a, ClientMsg::PlayerEquipItem { item: Some(Item::Bat) }, T0);
        assert!(matches!(
            &equipped[..],
            [(Audience::Others(from), ServerMsg::PlayerEquippedItem { item: Some(Item::Bat), .. })] if *from == a
        ));
        assert_eq!(w.players[&a].equipped_item, Some(Item::Bat));
    }

    #[test]
    fn chat_is_trimmed_and_capped() {
        let mut w = world();
        let a = enter(&mut w, "alice");
        assert!(send(&mut w, a, ClientMsg::ChatMessage("   ".into()), T0).is_empty());

        let long = "x".repeat(500);
        let msgs = send(&mut w, a, ClientMsg::ChatMessage(format!("  {long}  ")), T0);
        match &msgs[0] {
            (Audience::All, ServerMsg::ChatMessage { message, name, timestamp, .. }) => {
                assert_eq!(message.chars().count(), MAX_CHAT_CHARS);
                assert_eq!(name, "alice");
                assert_eq!(timestamp.timestamp_millis(), T0 as i64);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn seats_and_driver_rules() {
        let mut w = world();
        let owner = enter(&mut w, "alice");
        let rider = enter(&mut w, "bob");
        // Car grants are echoed to the requester as confirmation
        let spawned = send(
            &mut w,
            owner,
            ClientMsg::CarSpawned {
                car_id: "car-1".into(),
                position: Vec3::new(4.0, 0.0, 4.0),
                rotation: Vec3::ZERO,
            },
            T0,
        );
        assert!(matches!(&spawned[..], [(Audience::All, ServerMsg::CarSpawned(info))] if info.owner_id == owner));

        let entered = send(
            &mut w,
            rider,
            ClientMsg::CarEntry {
                car_id: "car-1".into(),
                seat_index: 0,
            },
            T0,
        );
        assert!(matches!(&entered[0], (Audience::All, ServerMsg::CarEntered { seat_index: 0, .. })));

        let taken = send(
            &mut w,
            owner,
            ClientMsg::CarEntry {
                car_id: "car-1".into(),
                seat_index: 0,
            },
            T0,
        );
        assert_eq!(error_code(&taken), Some("seat_taken"));

        let update = |pos| ClientMsg::CarUpdate {
            car_id: "car-1".into(),
            position: pos,
            rotation: Vec3::ZERO,
            velocity: Vec3::ZERO,
            steering_angle: 0.0,
        };
        assert_eq!(
            error_code(&send(&mut w, owner, update(Vec3::new(9.0, 0.0, 9.0)), T0)),
            Some("not_driver")
        );
        let driven = send(&mut w, rider, update(Vec3::new(5.0, 0.0, 4.0)), T0);
        assert!(matches!(&driven[0], (Audience::Others(from), ServerMsg::CarUpdated { .. }) if *from == rider));

        let exited = send(&mut w, rider, ClientMsg::CarExit { car_id: "car-1".into() }, T0);
        assert!(matches!(
            &exited[..],
            [(Audience::All, ServerMsg::CarExited { seat_index: 0, player_id, .. })] if *player_id == rider
        ));
    }

    #[test]
    fn death_and_disconnect_free_seats() {
        let mut w = world();
        let owner = enter(&mut w, "alice");
        let rider = enter(&mut w, "bob");
        send(
            &mut w,
            owner,
            ClientMsg::CarSpawned {
                car_id: "car-1".into(),
                position: Vec3::ZERO,
                rotation: Vec3::ZERO,
            },
            T0,
        );
        send(
            &mut w,
            rider,
            ClientMsg::CarEntry {
                car_id: "car-1".into(),
                seat_index: 1,
            },
            T0,
        );

        let killed = send(&mut w, owner, damage(rider, 100.0), T0);
        assert!(killed
            .iter()
            .any(|(_, m)| matches!(m, ServerMsg::CarExited { seat_index: 1, player_id, .. } if *player_id == rider)));

        let left = outbound(w.handle(input(owner, WorldInput::Leave, T0)));
        assert!(left
            .iter()
            .any(|(_, m)| matches!(m, ServerMsg::CarRemoved { car_id } if car_id == "car-1")));
        assert!(matches!(left.last(), Some((Audience::All, ServerMsg::PlayerLeft { player_id })) if *player_id == owner));
        assert!(w.cars().is_empty());
        assert_eq!(w.player_count(), 1);
    }

    #[test]
    fn guests_cannot_save_characters() {
        let mut w = world();
        let guest = login(&mut w, "Guest_abcd", true);
        send(&mut w, guest, ClientMsg::PlayerCustomization(Customization::default()), T0);
        let msgs = send(&mut w, guest, ClientMsg::SaveCharacter, T0);
        assert_eq!(error_code(&msgs), Some("guest_save"));

        let member = enter(&mut w, "alice");
        let effects = w.handle(input(member, WorldInput::Client(ClientMsg::SaveCharacter), T0));
        match &effects[..] {
            [Effect::SaveCharacter(save)] => {
                assert_eq!(save.username, "alice");
                assert_eq!(save.record.position, SPAWN_POINT);
                assert_eq!(save.record.customization.name, "alice");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn saved_position_is_restored_on_entry() {
        let mut w = world();
        let id = Uuid::new_v4();
        let saved = CharacterRecord {
            customization: Customization::default(),
            position: Vec3::new(10.0, 3.0, -4.0),
            saved_at: Utc::now(),
        };
        w.handle(input(
            id,
            WorldInput::Join {
                username: "alice".into(),
                is_admin: false,
                is_guest: false,
                character: Some(saved),
            },
            T0,
        ));
        send(&mut w, id, ClientMsg::PlayerCustomization(Customization::default()), T0);
        assert_eq!(w.player(id).map(|p| p.position), Some(Vec3::new(10.0, 3.0, -4.0)));
    }

    #[test]
    fn blank_names_fall_back_to_username() {
        let raw = Customization {
            name: "   ".into(),
            color: String::new(),
            ..Customization::default()
        };
        let clean = sanitize_customization(raw, "alice");
        assert_eq!(clean.name, "alice");
        assert_eq!(clean.color, Customization::default().color);
    }

    #[test]
    fn bat_hits_are_relayed_to_everyone() {
        let mut w = world();
        let a = enter(&mut w, "alice");
        let b = enter(&mut w, "bob");
        let hit = |seed: RagdollSeed| ClientMsg::PlayerBatHit {
            target_id: b,
            launch_direction: Vec3::new(0.0, 0.7, 1.0),
            angular_velocities: seed,
        };

        let ok = send(&mut w, a, hit(RagdollSeed::default()), T0);
        assert!(matches!(&ok[..], [(Audience::All, ServerMsg::PlayerBatHit { attacker_id, .. })] if *attacker_id == a));

        let mut broken = RagdollSeed::default();
        broken.torso.x = f32::INFINITY;
        assert_eq!(error_code(&send(&mut w, a, hit(broken), T0)), Some("implausible"));
        assert_eq!(w.player(b).map(|p| p.health), Some(MAX_HEALTH));
    }

    #[tokio::test]
    async fn world_task_relays_over_channels() {
        let (world, handle, _saves) = GameWorld::new(WorldConfig::default());
        let mut rx = handle.subscribe();
        tokio::spawn(world.run());

        let id = Uuid::new_v4();
        let join = WorldInput::Join {
            username: "alice".into(),
            is_admin: false,
            is_guest: false,
            character: None,
        };
        let customize = WorldInput::Client(ClientMsg::PlayerCustomization(Customization::default()));
        for step in [join, customize] {
            handle.input_tx.send(input(id, step, unix_millis())).await.unwrap();
        }

        let first = rx.recv().await.unwrap();
        assert_eq!(first.audience, Audience::Only(id));
        assert!(matches!(first.msg, ServerMsg::GameState { self_id, .. } if self_id == id));
    }
}
