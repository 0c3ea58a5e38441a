//! Client simulation context
//!
//! Owns everything one client simulates: the block grid, the locally
//! authoritative player, shadow copies of peers and cars, and the random
//! source used for seeds this client is responsible for. Server messages
//! overwrite shadow state; [`SimContext::tick`] advances the local simulation
//! and returns the messages to send.

use std::collections::HashMap;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use super::locomotion::{LocomotionEvent, MoveIntent, PlayerBody};
use super::math::Vec3;
use super::melee::MeleeController;
use super::ragdoll::{BodyState, Pose, Ragdoll, RagdollSeed};
use super::tuning::{HEALTH_PACK_AMOUNT, MAX_HEALTH, SEAT_COUNT, SPAWN_POINT};
use super::vehicle::{DriveInput, Vehicle};
use crate::util::time::clamp_frame_delta;
use crate::world::{BlockCoord, BlockGrid, BlockPatch, HazardCooldowns};
use crate::ws::protocol::{
    BlockInfo, CarInfo, ClientMsg, Customization, DebrisPiece, Item, PlayerInfo, RagdollReason,
    ServerMsg,
};

/// Settings fixed for the lifetime of a context
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimConfig {
    /// Id the server assigned; replaced by `connected`/`gameState` if they differ
    pub self_id: Uuid,
    /// Seed for this client's random source
    pub seed: u64,
}

/// Per-frame input from the client
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameInput {
    pub now_ms: u64,
    pub movement: MoveIntent,
    pub drive: DriveInput,
    pub swing: bool,
    pub exit_car: bool,
}

/// The locally simulated player
#[derive(Debug, Clone)]
pub struct LocalPlayer {
    pub id: Uuid,
    pub body: PlayerBody,
    pub state: BodyState,
    pub pose: Pose,
    pub health: f32,
    pub equipped: Option<Item>,
    /// Car id and seat index while seated
    pub seat: Option<(String, usize)>,
}

impl LocalPlayer {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            body: PlayerBody::new(SPAWN_POINT, 0.0),
            state: BodyState::Normal,
            pose: Pose::standing(0.0),
            health: MAX_HEALTH,
            equipped: None,
            seat: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }
}

/// Shadow copy of another player
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: Uuid,
    pub customization: Customization,
    pub position: Vec3,
    pub rotation: Vec3,
    pub health: f32,
    pub equipped: Option<Item>,
    pub state: BodyState,
    pub pose: Pose,
    pub seat: Option<(String, usize)>,
}

impl Peer {
    fn from_info(info: PlayerInfo) -> Self {
        let seat = info.in_car.zip(info.car_seat_index);
        Self {
            id: info.id,
            customization: info.customization,
            position: info.position,
            rotation: info.rotation,
            health: info.health,
            equipped: info.equipped_item,
            state: BodyState::Normal,
            pose: Pose::standing(info.rotation.y),
            seat,
        }
    }

    /// Alive, on foot and not ragdolling
    pub fn is_hittable(&self) -> bool {
        self.health > 0.0 && self.seat.is_none() && !self.state.is_ragdoll()
    }
}

/// Shadow copy of a car
#[derive(Debug, Clone)]
pub struct CarShadow {
    pub owner_id: Uuid,
    pub vehicle: Vehicle,
    pub seats: [Option<Uuid>; SEAT_COUNT],
}

impl CarShadow {
    fn from_info(info: &CarInfo) -> Self {
        let mut vehicle = Vehicle::new(info.position, info.rotation.y);
        vehicle.rotation = info.rotation;
        vehicle.velocity = info.velocity;
        Self {
            owner_id: info.owner_id,
            vehicle,
            seats: info.seats,
        }
    }
}

/// Death explosion to replay, exactly as the server generated it
#[derive(Debug, Clone, PartialEq)]
pub struct DebrisBurst {
    pub player_id: Uuid,
    pub origin: Vec3,
    pub pieces: Vec<DebrisPiece>,
}

pub struct SimContext {
    grid: BlockGrid,
    local: LocalPlayer,
    peers: HashMap<Uuid, Peer>,
    /// Join order, used to pick the first melee target
    peer_order: Vec<Uuid>,
    cars: HashMap<String, CarShadow>,
    hazards: HazardCooldowns,
    melee: MeleeController,
    rng: ChaCha8Rng,
    debris: Vec<DebrisBurst>,
}

impl SimContext {
    pub fn init(config: SimConfig) -> Self {
        Self {
            grid: BlockGrid::new(),
            local: LocalPlayer::new(config.self_id),
            peers: HashMap::new(),
            peer_order: Vec::new(),
            cars: HashMap::new(),
            hazards: HazardCooldowns::new(),
            melee: MeleeController::new(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            debris: Vec::new(),
        }
    }

    /// Drop all world state; the context can be filled again by a new `gameState`
    pub fn teardown(&mut self) {
        self.grid = BlockGrid::new();
        self.peers.clear();
        self.peer_order.clear();
        self.cars.clear();
        self.hazards.clear();
        self.melee.cancel();
        self.debris.clear();
        self.local = LocalPlayer::new(self.local.id);
    }

    pub fn grid(&self) -> &BlockGrid {
        &self.grid
    }

    pub fn local(&self) -> &LocalPlayer {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut LocalPlayer {
        &mut self.local
    }

    pub fn peer(&self, id: Uuid) -> Option<&Peer> {
        self.peers.get(&id)
    }

    /// Peers in join order
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peer_order.iter().filter_map(|id| self.peers.get(id))
    }

    pub fn car(&self, id: &str) -> Option<&CarShadow> {
        self.cars.get(id)
    }

    /// Put `item` in hand and return the announcement for the peers. The
    /// relay does not echo it back.
    pub fn equip(&mut self, item: Option<Item>) -> ClientMsg {
        if self.local.equipped != item {
            self.melee.cancel();
        }
        self.local.equipped = item;
        ClientMsg::PlayerEquipItem { item }
    }

    /// Death explosions received since the last call
    pub fn take_debris(&mut self) -> Vec<DebrisBurst> {
        std::mem::take(&mut self.debris)
    }

    /// Advance the local simulation by one frame
    pub fn tick(&mut self, dt: f32, input: &FrameInput) -> Vec<ClientMsg> {
        let dt = clamp_frame_delta(dt);
        let mut out = Vec::new();
        self.hazards.maintain(input.now_ms);

        for peer in self.peers.values_mut() {
            if let Some((pose, position)) = peer.state.step(dt, &self.grid) {
                peer.pose = pose;
                peer.position = position;
            }
        }

        if !self.local.is_alive() {
            self.melee.cancel();
            return out;
        }

        if let Some((car_id, seat)) = self.local.seat.clone() {
            self.tick_in_car(dt, input, car_id, seat, &mut out);
        } else if self.local.state.is_ragdoll() {
            if let Some((pose, position)) = self.local.state.step(dt, &self.grid) {
                self.local.pose = pose;
                self.local.body.teleport(position);
                self.local.body.yaw = pose.torso.y;
            }
        } else {
            self.tick_on_foot(dt, input, &mut out);
        }

        out
    }

    fn tick_on_foot(&mut self, dt: f32, input: &FrameInput, out: &mut Vec<ClientMsg>) {
        let now = input.now_ms;
        let events = self
            .local
            .body
            .step(dt, &input.movement, &self.grid, &mut self.hazards, now);

        for event in events {
            match event {
                LocomotionEvent::FallRagdoll { distance } => {
                    let seed = RagdollSeed::random(&mut self.rng);
                    let body = &self.local.body;
                    let ragdoll = Ragdoll::falling(body.position, Pose::standing(body.yaw), body.velocity, &seed);
                    self.local.state = BodyState::Ragdoll(Box::new(ragdoll));
                    self.melee.cancel();
                    out.push(ClientMsg::PlayerRagdoll {
                        reason: RagdollReason::Fall,
                        fall_distance: distance,
                    });
                    out.push(ClientMsg::PlayerRagdollSeed {
                        angular_velocities: seed,
                    });
                }
                LocomotionEvent::HazardHit { damage, .. } => out.push(ClientMsg::PlayerDamage {
                    target_id: self.local.id,
                    damage,
                    allow_self: true,
                }),
            }
        }

        if self.local.state.is_ragdoll() {
            return;
        }

        for id in &self.peer_order {
            if let Some(peer) = self.peers.get(id) {
                if peer.health > 0.0 && peer.seat.is_none() && !peer.state.is_ragdoll() {
                    self.local.body.separate_from_player(peer.position);
                }
            }
        }
        for car in self.cars.values() {
            self.local.body.separate_from_car(car.vehicle.position, car.vehicle.yaw());
        }

        self.local.pose = Pose::standing(self.local.body.yaw);
        out.push(ClientMsg::PlayerMove {
            position: self.local.body.position,
            rotation: Vec3::new(0.0, self.local.body.yaw, 0.0),
            head_rotation: None,
            is_sprinting: input.movement.sprint,
        });

        if input.swing {
            if let Some(announce) = self.melee.begin_swing(self.local.equipped, now) {
                if self.local.equipped == Some(Item::HealthPack) && self.local.health < MAX_HEALTH {
                    out.push(ClientMsg::PlayerHeal {
                        heal_amount: HEALTH_PACK_AMOUNT,
                        health: (self.local.health + HEALTH_PACK_AMOUNT).min(MAX_HEALTH),
                    });
                }
                out.push(announce);
            }
        }

        let candidates: Vec<(Uuid, Vec3)> = self
            .peers()
            .filter(|peer| peer.is_hittable())
            .map(|peer| (peer.id, peer.position))
            .collect();
        let body = &self.local.body;
        if let Some(hit) = self
            .melee
            .poll(now, body.position, body.yaw, candidates, &mut self.rng)
        {
            out.push(hit.into_message());
        }
    }

    fn tick_in_car(&mut self, dt: f32, input: &FrameInput, car_id: String, seat: usize, out: &mut Vec<ClientMsg>) {
        let Some(car) = self.cars.get_mut(&car_id) else {
            self.local.seat = None;
            return;
        };

        if input.exit_car {
            out.push(ClientMsg::CarExit { car_id });
            return;
        }

        if seat == 0 {
            car.vehicle.step(dt, Some(&input.drive), &self.grid);
            out.push(ClientMsg::CarUpdate {
                car_id,
                position: car.vehicle.position,
                rotation: car.vehicle.rotation,
                velocity: car.vehicle.velocity,
                steering_angle: car.vehicle.steering_angle,
            });
        }

        if let Some((position, yaw)) = car.vehicle.seat_transform(seat) {
            self.local.body.position = position;
            self.local.body.velocity = Vec3::ZERO;
            self.local.body.yaw = yaw;
        }
    }

    /// Fold one server message into local and shadow state
    pub fn apply_server_msg(&mut self, msg: ServerMsg) {
        match msg {
            ServerMsg::Connected { player_id, .. } => self.local.id = player_id,
            ServerMsg::GameState {
                self_id,
                players,
                blocks,
                cars,
            } => self.load_snapshot(self_id, players, blocks, cars),
            ServerMsg::PlayerJoined(info) => {
                if info.id == self.local.id {
                    return;
                }
                match self.peers.get_mut(&info.id) {
                    Some(peer) => peer.customization = info.customization,
                    None => {
                        self.peer_order.push(info.id);
                        self.peers.insert(info.id, Peer::from_info(info));
                    }
                }
            }
            ServerMsg::PlayerLeft { player_id } => {
                self.peers.remove(&player_id);
                self.peer_order.retain(|id| *id != player_id);
                for car in self.cars.values_mut() {
                    for seat in car.seats.iter_mut() {
                        if *seat == Some(player_id) {
                            *seat = None;
                        }
                    }
                }
            }
            ServerMsg::PlayerMoved {
                player_id,
                position,
                rotation,
                ..
            } => {
                if let Some(peer) = self.peers.get_mut(&player_id) {
                    if !peer.state.is_ragdoll() {
                        peer.position = position;
                        peer.rotation = rotation;
                        peer.pose = Pose::standing(rotation.y);
                    }
                }
            }
            ServerMsg::BlockPlaced(info) => self.apply_block(&info),
            ServerMsg::BlockRemoved { x, y, z } => {
                self.grid.remove(BlockCoord::new(x, y, z));
            }
            ServerMsg::BlockUpdated(info) => {
                self.grid.update_state(info.coord(), &patch_of(&info));
            }
            ServerMsg::PlayerHealthUpdate { player_id, health } => self.set_health(player_id, health),
            ServerMsg::PlayerDied {
                player_id,
                position,
                debris,
                ..
            } => {
                self.set_health(player_id, 0.0);
                if player_id == self.local.id {
                    self.local.state = BodyState::Normal;
                    self.melee.cancel();
                } else if let Some(peer) = self.peers.get_mut(&player_id) {
                    peer.state = BodyState::Normal;
                }
                self.debris.push(DebrisBurst {
                    player_id,
                    origin: position,
                    pieces: debris,
                });
            }
            ServerMsg::PlayerRespawned {
                player_id,
                position,
                health,
            } => {
                if player_id == self.local.id {
                    self.local.health = health;
                    self.local.state = BodyState::Normal;
                    self.local.body.teleport(position);
                } else if let Some(peer) = self.peers.get_mut(&player_id) {
                    peer.health = health;
                    peer.position = position;
                    peer.state = BodyState::Normal;
                }
            }
            ServerMsg::PlayerBatHit {
                target_id,
                launch_direction,
                angular_velocities,
                ..
            } => self.start_bat_ragdoll(target_id, launch_direction, &angular_velocities),
            ServerMsg::PlayerRagdoll {
                player_id,
                reason: RagdollReason::Fall,
                ..
            } => {
                // The seed follows in its own message
                if let Some(peer) = self.peers.get_mut(&player_id) {
                    if peer.seat.is_none() {
                        let ragdoll = Ragdoll::falling(peer.position, peer.pose, Vec3::ZERO, &RagdollSeed::default());
                        peer.state = BodyState::Ragdoll(Box::new(ragdoll));
                    }
                }
            }
            ServerMsg::PlayerRagdollSeed {
                player_id,
                angular_velocities,
            } => {
                if let Some(ragdoll) = self
                    .peers
                    .get_mut(&player_id)
                    .and_then(|peer| peer.state.ragdoll_mut())
                {
                    ragdoll.apply_seed(&angular_velocities);
                }
            }
            ServerMsg::PlayerEquippedItem { player_id, item } => {
                if let Some(peer) = self.peers.get_mut(&player_id) {
                    peer.equipped = item;
                }
            }
            ServerMsg::CarSpawned(info) => {
                self.cars.insert(info.car_id.clone(), CarShadow::from_info(&info));
            }
            ServerMsg::CarUpdated {
                car_id,
                position,
                rotation,
                velocity,
                steering_angle,
            } => {
                let driving = self.local.seat.as_ref().is_some_and(|(id, seat)| *id == car_id && *seat == 0);
                if !driving {
                    if let Some(car) = self.cars.get_mut(&car_id) {
                        car.vehicle.apply_remote(position, rotation, velocity, steering_angle);
                    }
                }
            }
            ServerMsg::CarEntered {
                car_id,
                player_id,
                seat_index,
            } => self.seat_player(car_id, player_id, seat_index),
            ServerMsg::CarExited {
                car_id,
                player_id,
                seat_index,
            } => self.unseat_player(&car_id, player_id, seat_index),
            ServerMsg::CarRemoved { car_id } => {
                self.cars.remove(&car_id);
                if self.local.seat.as_ref().is_some_and(|(id, _)| *id == car_id) {
                    self.local.seat = None;
                }
                for peer in self.peers.values_mut() {
                    if peer.seat.as_ref().is_some_and(|(id, _)| *id == car_id) {
                        peer.seat = None;
                    }
                }
            }
            _ => {}
        }
    }

    fn load_snapshot(&mut self, self_id: Uuid, players: Vec<PlayerInfo>, blocks: Vec<BlockInfo>, cars: Vec<CarInfo>) {
        self.teardown();
        self.local.id = self_id;

        for info in &blocks {
            self.apply_block(info);
        }
        for info in &cars {
            self.cars.insert(info.car_id.clone(), CarShadow::from_info(info));
        }
        for info in players {
            if info.id == self_id {
                self.local.health = info.health;
                self.local.equipped = info.equipped_item;
                self.local.seat = info.in_car.zip(info.car_seat_index);
                self.local.body.teleport(info.position);
                self.local.body.yaw = info.rotation.y;
            } else if !self.peers.contains_key(&info.id) {
                self.peer_order.push(info.id);
                self.peers.insert(info.id, Peer::from_info(info));
            }
        }
    }

    fn apply_block(&mut self, info: &BlockInfo) {
        let coord = info.coord();
        if self.grid.place(coord, info.block_type) {
            self.grid.update_state(coord, &patch_of(info));
        }
    }

    fn set_health(&mut self, player_id: Uuid, health: f32) {
        if player_id == self.local.id {
            self.local.health = health;
        } else if let Some(peer) = self.peers.get_mut(&player_id) {
            peer.health = health;
        }
    }

    fn start_bat_ragdoll(&mut self, target_id: Uuid, launch_direction: Vec3, seed: &RagdollSeed) {
        if target_id == self.local.id {
            if self.local.seat.is_some() || !self.local.is_alive() {
                return;
            }
            let body = &self.local.body;
            let ragdoll = Ragdoll::launched(body.position, Pose::standing(body.yaw), launch_direction, body.yaw, seed);
            self.local.state = BodyState::Ragdoll(Box::new(ragdoll));
            self.melee.cancel();
        } else if let Some(peer) = self.peers.get_mut(&target_id) {
            if peer.seat.is_some() || peer.health <= 0.0 {
                return;
            }
            let ragdoll = Ragdoll::launched(peer.position, peer.pose, launch_direction, peer.rotation.y, seed);
            peer.state = BodyState::Ragdoll(Box::new(ragdoll));
        }
    }

    fn seat_player(&mut self, car_id: String, player_id: Uuid, seat_index: usize) {
        let Some(car) = self.cars.get_mut(&car_id) else {
            return;
        };
        let Some(slot) = car.seats.get_mut(seat_index) else {
            return;
        };
        *slot = Some(player_id);

        if player_id == self.local.id {
            self.local.seat = Some((car_id, seat_index));
            self.local.body.velocity = Vec3::ZERO;
            self.melee.cancel();
        } else if let Some(peer) = self.peers.get_mut(&player_id) {
            peer.seat = Some((car_id, seat_index));
        }
    }

    fn unseat_player(&mut self, car_id: &str, player_id: Uuid, seat_index: usize) {
        let exit = self.cars.get_mut(car_id).map(|car| {
            if let Some(slot) = car.seats.get_mut(seat_index) {
                *slot = None;
            }
            car.vehicle.exit_position(seat_index)
        });

        if player_id == self.local.id {
            self.local.seat = None;
            if let Some(position) = exit {
                self.local.body.teleport(position);
            }
        } else if let Some(peer) = self.peers.get_mut(&player_id) {
            peer.seat = None;
            if let Some(position) = exit {
                peer.position = position;
            }
        }
    }
}

fn patch_of(info: &BlockInfo) -> BlockPatch {
    BlockPatch {
        block_type: info.block_type,
        is_open: info.is_open,
        message: info.message.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::BlockType;

    fn player(id: Uuid, position: Vec3) -> PlayerInfo {
        PlayerInfo {
            id,
            customization: Customization::default(),
            position,
            rotation: Vec3::ZERO,
            health: MAX_HEALTH,
            equipped_item: None,
            in_car: None,
            car_seat_index: None,
        }
    }

    fn context_with(peers: &[(Uuid, Vec3)]) -> (SimContext, Uuid) {
        let me = Uuid::new_v4();
        let mut ctx = SimContext::init(SimConfig { self_id: me, seed: 9 });
        let mut players = vec![player(me, Vec3::ZERO)];
        players.extend(peers.iter().map(|(id, pos)| player(*id, *pos)));
        ctx.apply_server_msg(ServerMsg::GameState {
            self_id: me,
            players,
            blocks: vec![],
            cars: vec![],
        });
        (ctx, me)
    }

    #[test]
    fn game_state_splits_self_from_peers() {
        let other = Uuid::new_v4();
        let (ctx, me) = context_with(&[(other, Vec3::new(5.0, 0.0, 5.0))]);
        assert_eq!(ctx.local().id, me);
        assert!(ctx.peer(me).is_none());
        assert_eq!(ctx.peer(other).map(|p| p.position), Some(Vec3::new(5.0, 0.0, 5.0)));
    }

    #[test]
    fn door_state_survives_snapshot() {
        let me = Uuid::new_v4();
        let mut ctx = SimContext::init(SimConfig { self_id: me, seed: 1 });
        ctx.apply_server_msg(ServerMsg::GameState {
            self_id: me,
            players: vec![],
            blocks: vec![BlockInfo {
                x: 1,
                y: 0,
                z: 1,
                block_type: BlockType::Door,
                is_open: Some(true),
                message: None,
            }],
            cars: vec![],
        });
        let block = ctx.grid().get(BlockCoord::new(1, 0, 1)).unwrap();
        assert_eq!(block.is_open(), Some(true));
    }

    #[test]
    fn sword_swing_reports_damage_after_delay() {
        let target = Uuid::new_v4();
        let (mut ctx, _) = context_with(&[(target, Vec3::new(0.0, 0.0, 1.0))]);
        ctx.local_mut().equipped = Some(Item::Sword);
        // Put the local player exactly at the origin on the ground
        ctx.local_mut().body.teleport(Vec3::ZERO);

        let swing = FrameInput {
            now_ms: 1000,
            swing: true,
            ..Default::default()
        };
        let first = ctx.tick(1.0 / 60.0, &swing);
        assert!(first.contains(&ClientMsg::PlayerUseItemSwing { item: Some(Item::Sword) }));
        assert!(!first.iter().any(|m| matches!(m, ClientMsg::PlayerDamage { .. })));

        let later = FrameInput {
            now_ms: 1150,
            ..Default::default()
        };
        let second = ctx.tick(1.0 / 60.0, &later);
        assert!(second.contains(&ClientMsg::PlayerDamage {
            target_id: target,
            damage: 25.0,
            allow_self: false
        }));
    }

    #[test]
    fn equipping_is_local_and_announced() {
        let target = Uuid::new_v4();
        let (mut ctx, _) = context_with(&[(target, Vec3::new(0.0, 0.0, 1.0))]);
        ctx.local_mut().body.teleport(Vec3::ZERO);

        let msg = ctx.equip(Some(Item::Sword));
        assert_eq!(msg, ClientMsg::PlayerEquipItem { item: Some(Item::Sword) });
        assert_eq!(ctx.local().equipped, Some(Item::Sword));

        // Switching away mid-swing drops the pending hit
        let swing = FrameInput {
            now_ms: 1000,
            swing: true,
            ..Default::default()
        };
        ctx.tick(1.0 / 60.0, &swing);
        ctx.equip(None);
        let later = FrameInput {
            now_ms: 1150,
            ..Default::default()
        };
        let out = ctx.tick(1.0 / 60.0, &later);
        assert!(!out.iter().any(|m| matches!(m, ClientMsg::PlayerDamage { .. })));

        ctx.apply_server_msg(ServerMsg::PlayerEquippedItem {
            player_id: target,
            item: Some(Item::Bat),
        });
        assert_eq!(ctx.peer(target).and_then(|p| p.equipped), Some(Item::Bat));
    }

    #[test]
    fn remote_fall_ragdoll_starts_before_its_seed() {
        let other = Uuid::new_v4();
        let (mut ctx, _) = context_with(&[(other, Vec3::new(5.0, 0.0, 5.0))]);
        ctx.apply_server_msg(ServerMsg::PlayerRagdoll {
            player_id: other,
            reason: RagdollReason::Fall,
            fall_distance: 12.0,
        });
        let peer = ctx.peer(other).unwrap();
        let BodyState::Ragdoll(ragdoll) = &peer.state else {
            panic!("peer should be ragdolling");
        };
        assert_eq!(ragdoll.torso_spin, Vec3::ZERO);

        let seed = RagdollSeed {
            torso: Vec3::new(1.0, 2.0, 3.0),
            ..Default::default()
        };
        ctx.apply_server_msg(ServerMsg::PlayerRagdollSeed {
            player_id: other,
            angular_velocities: seed,
        });
        let BodyState::Ragdoll(ragdoll) = &ctx.peer(other).unwrap().state else {
            panic!("peer should still be ragdolling");
        };
        assert_eq!(ragdoll.torso_spin, seed.torso);
    }

    #[test]
    fn dead_player_does_not_move() {
        let (mut ctx, me) = context_with(&[]);
        ctx.apply_server_msg(ServerMsg::PlayerDied {
            player_id: me,
            killer_id: None,
            position: Vec3::ZERO,
            debris: vec![],
        });
        let input = FrameInput {
            now_ms: 0,
            movement: MoveIntent {
                forward: 1.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(ctx.tick(1.0 / 60.0, &input).is_empty());
        assert_eq!(ctx.take_debris().len(), 1);
        assert!(ctx.take_debris().is_empty());
    }

    #[test]
    fn hazard_cooldowns_expire_while_playing() {
        let (mut ctx, me) = context_with(&[]);
        ctx.apply_server_msg(ServerMsg::BlockPlaced(BlockInfo {
            x: 0,
            y: 0,
            z: 0,
            block_type: BlockType::Damage,
            is_open: None,
            message: None,
        }));
        ctx.local_mut().body.teleport(Vec3::new(0.5, 1.0, 0.5));

        let touch = ctx.tick(1.0 / 60.0, &FrameInput::default());
        assert!(touch.contains(&ClientMsg::PlayerDamage {
            target_id: me,
            damage: 10.0,
            allow_self: true
        }));
        assert_eq!(ctx.hazards.len(), 1);

        ctx.local_mut().body.teleport(Vec3::new(10.0, 0.0, 10.0));
        let later = FrameInput {
            now_ms: 3_000,
            ..Default::default()
        };
        ctx.tick(1.0 / 60.0, &later);
        assert!(ctx.hazards.is_empty());
    }

    #[test]
    fn teardown_clears_world() {
        let other = Uuid::new_v4();
        let (mut ctx, me) = context_with(&[(other, Vec3::ZERO)]);
        ctx.apply_server_msg(ServerMsg::BlockPlaced(BlockInfo {
            x: 0,
            y: 0,
            z: 0,
            block_type: BlockType::Stone,
            is_open: None,
            message: None,
        }));
        ctx.teardown();
        assert!(ctx.grid().is_empty());
        assert_eq!(ctx.peers().count(), 0);
        assert_eq!(ctx.local().id, me);
    }
}
