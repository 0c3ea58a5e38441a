//! Gameplay and physics constants shared by the relay and every client

use super::math::Vec3;

// World

/// Implicit ground plane under every column without blocks
pub const GROUND_Y: f32 = 0.0;
/// Where players spawn and respawn
pub const SPAWN_POINT: Vec3 = Vec3::new(0.0, 1.0, 0.0);
/// Gravity for players, ragdolls and airborne cars (units/s²)
pub const GRAVITY: f32 = -30.0;
/// Physics steps never integrate more than this many seconds at once
pub const MAX_FRAME_DELTA: f32 = 0.1;

// Health

pub const MAX_HEALTH: f32 = 100.0;
pub const RESPAWN_DELAY_MS: u64 = 5_000;
/// Pieces in the death debris field
pub const DEBRIS_PIECES: usize = 30;

// Hazard blocks

pub const KILL_BLOCK_DAMAGE: f32 = 100.0;
pub const KILL_BLOCK_COOLDOWN_MS: u64 = 2_000;
pub const DAMAGE_BLOCK_DAMAGE: f32 = 10.0;
pub const DAMAGE_BLOCK_COOLDOWN_MS: u64 = 1_000;

// Melee

/// Delay between the swing broadcast and the hit test
pub const SWING_HIT_DELAY_MS: u64 = 150;
/// Minimum time between two swings of the same player
pub const SWING_COOLDOWN_MS: u64 = 400;
pub const MELEE_REACH: f32 = 1.5;
pub const MELEE_HALF_WIDTH: f32 = 0.4;
pub const MELEE_HALF_HEIGHT: f32 = 0.5;
pub const SWORD_DAMAGE: f32 = 25.0;
pub const BAT_UPWARD_BIAS: f32 = 0.7;
pub const HEALTH_PACK_AMOUNT: f32 = 30.0;

// Player body

pub const PLAYER_HALF_WIDTH: f32 = 0.3;
pub const PLAYER_HEIGHT: f32 = 1.8;
/// Radius used for player/player push-apart
pub const PLAYER_PUSH_RADIUS: f32 = 0.5;
pub const WALK_SPEED: f32 = 5.0;
pub const SPRINT_SPEED: f32 = 8.0;
pub const JUMP_SPEED: f32 = 9.0;
/// How fast horizontal velocity approaches the input target (per second)
pub const MOVE_RESPONSE: f32 = 10.0;
pub const LADDER_CLIMB_SPEED: f32 = 4.0;
pub const LADDER_DRIFT_SPEED: f32 = -1.0;
/// Multiplier on the penetration-normal velocity component when hitting a wall
pub const WALL_BOUNCE: f32 = 1.2;
/// Net drop that turns a fall into a ragdoll
pub const FALL_RAGDOLL_DISTANCE: f32 = 10.0;
pub const PUSH_VELOCITY_DAMPING: f32 = 0.5;

// Ragdoll

pub const RAGDOLL_DURATION: f32 = 3.0;
pub const RAGDOLL_INITIAL_FORCE_WINDOW: f32 = 0.1;
pub const RAGDOLL_LAUNCH_SPEED: f32 = 12.0;
pub const TORSO_DAMPING: f32 = 0.99;
pub const LIMB_DAMPING: f32 = 0.98;
pub const GROUND_FRICTION: f32 = 0.92;
pub const TORSO_GRAVITY_TORQUE: f32 = 12.0;
pub const TORSO_ROLL_RESTORE: f32 = 6.0;
pub const LIMB_IMPACT_IMPULSE: f32 = 8.0;
pub const TORSO_IMPACT_IMPULSE: f32 = 3.0;
pub const BODY_PART_PUSH: f32 = 0.05;
pub const BODY_PART_RADIUS: f32 = 0.2;
pub const GROUND_VERTICAL_DAMPING: f32 = 0.1;
pub const GROUND_HORIZONTAL_DAMPING: f32 = 0.95;
/// Rest transitions after which every angular velocity is zeroed
pub const REST_TRANSITIONS_TO_SETTLE: u32 = 3;
/// |cos(tilt)| below this counts as lying flat
pub const REST_HORIZONTAL_COS: f32 = 0.3;
/// Largest random spin a seed assigns to the torso (rad/s)
pub const SEED_TORSO_SPIN: f32 = 10.0;
/// Largest random spin a seed assigns to a limb (rad/s)
pub const SEED_LIMB_SPIN: f32 = 15.0;

// Vehicle

pub const CAR_ACCELERATION: f32 = 25.0;
pub const CAR_DECELERATION: f32 = 35.0;
pub const CAR_BRAKING: f32 = 60.0;
pub const CAR_REVERSAL_SPEED: f32 = 0.5;
pub const CAR_MAX_FORWARD_SPEED: f32 = 20.0;
pub const CAR_MAX_REVERSE_SPEED: f32 = 8.0;
/// ±30° steering lock
pub const CAR_MAX_STEER: f32 = std::f32::consts::PI / 6.0;
pub const CAR_STEER_RESPONSE: f32 = 5.0;
pub const CAR_TURN_RATE_PER_SPEED: f32 = 0.15;
pub const CAR_MAX_TURN_RATE: f32 = 2.0;
/// Maximum rise of a wheel support in one tick
pub const WHEEL_CLIMB_CAP: f32 = 1.2;
pub const WHEEL_SMOOTHING: f32 = 12.0;
pub const WHEEL_RADIUS: f32 = 0.4;
pub const CAR_WHEELBASE: f32 = 2.8;
pub const CAR_TRACK: f32 = 1.8;
pub const CAR_HALF_WIDTH: f32 = 1.0;
pub const CAR_HALF_LENGTH: f32 = 2.0;
pub const CAR_BODY_HEIGHT: f32 = 1.4;
pub const AIRBORNE_THRESHOLD: f32 = 0.15;
/// Per-frame decay of the frozen airborne spin
pub const AIRBORNE_SPIN_DRAG: f32 = 0.98;
pub const TILT_SMOOTHING_BASE: f32 = 6.0;
pub const TILT_SMOOTHING_PER_SPEED: f32 = 0.4;
/// Tilt smoothing multiplier while a ramp is detected
pub const TILT_RAMP_FACTOR: f32 = 0.5;
/// Pitch magnitude that counts as climbing
pub const ASCENT_PITCH: f32 = 0.05;
/// Block stacks at least this tall are walls
pub const WALL_HEIGHT_BLOCKS: i32 = 2;
pub const SEAT_COUNT: usize = 4;
