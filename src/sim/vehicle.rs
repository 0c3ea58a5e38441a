//! Four-wheel car physics over the block grid
//!
//! There is no raycasting. Each wheel follows the highest reachable block top
//! under it, the body tilts from the differences between wheel heights, and a
//! coarse probe around the body keeps the car from accelerating into walls.

use super::math::{approach, facing, frame_damping, GroundPlane, Vec3};
use super::tuning::{
    AIRBORNE_SPIN_DRAG, AIRBORNE_THRESHOLD, ASCENT_PITCH, CAR_ACCELERATION, CAR_BRAKING,
    CAR_DECELERATION, CAR_HALF_LENGTH, CAR_HALF_WIDTH, CAR_MAX_FORWARD_SPEED,
    CAR_MAX_REVERSE_SPEED, CAR_MAX_STEER, CAR_MAX_TURN_RATE, CAR_REVERSAL_SPEED,
    CAR_STEER_RESPONSE, CAR_TRACK, CAR_TURN_RATE_PER_SPEED, CAR_WHEELBASE, GRAVITY, GROUND_Y,
    MAX_FRAME_DELTA, SEAT_COUNT, TILT_RAMP_FACTOR, TILT_SMOOTHING_BASE, TILT_SMOOTHING_PER_SPEED,
    WALL_HEIGHT_BLOCKS, WHEEL_CLIMB_CAP, WHEEL_RADIUS, WHEEL_SMOOTHING,
};
use crate::world::{BlockCoord, BlockGrid};

/// Wheel height differences below this count as level
const LEVEL_EPSILON: f32 = 0.05;
/// How far outside the body the wall probe samples
const PROBE_MARGIN: f32 = 0.3;

/// Driver controls for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriveInput {
    pub forward: bool,
    pub reverse: bool,
    /// -1.0 full right, 1.0 full left
    pub steer: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wheel {
    /// Mount point in the car frame (x left, z forward)
    pub offset: Vec3,
    /// Support height resolved last tick; `None` before the first tick
    pub target_height: Option<f32>,
    pub smoothed_height: f32,
}

/// Spin kept while airborne
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TiltRate {
    pub pitch: f32,
    pub roll: f32,
}

/// World axis directions the wall probe checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinal {
    East,
    West,
    South,
    North,
}

impl Cardinal {
    pub const ALL: [Cardinal; 4] = [Cardinal::East, Cardinal::West, Cardinal::South, Cardinal::North];

    pub fn vector(self) -> Vec3 {
        match self {
            Cardinal::East => Vec3::new(1.0, 0.0, 0.0),
            Cardinal::West => Vec3::new(-1.0, 0.0, 0.0),
            Cardinal::South => Vec3::new(0.0, 0.0, 1.0),
            Cardinal::North => Vec3::new(0.0, 0.0, -1.0),
        }
    }

    fn index(self) -> usize {
        match self {
            Cardinal::East => 0,
            Cardinal::West => 1,
            Cardinal::South => 2,
            Cardinal::North => 3,
        }
    }
}

/// Directions in which acceleration is disabled this tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WallProbe {
    blocked: [bool; 4],
}

impl WallProbe {
    pub fn is_blocked(&self, dir: Cardinal) -> bool {
        self.blocked[dir.index()]
    }

    /// Whether moving along `motion` would push into a blocked direction
    pub fn blocks_motion(&self, motion: Vec3) -> bool {
        Cardinal::ALL
            .iter()
            .any(|&dir| self.is_blocked(dir) && motion.dot(dir.vector()) > 0.3)
    }
}

/// Simulated car body
#[derive(Debug, Clone, PartialEq)]
pub struct Vehicle {
    /// Underside centre of the body
    pub position: Vec3,
    /// x pitch, y yaw, z roll
    pub rotation: Vec3,
    pub velocity: Vec3,
    /// Signed speed along the facing direction
    pub speed: f32,
    pub steering_angle: f32,
    pub angular_velocity: TiltRate,
    /// Front-left, front-right, rear-left, rear-right
    pub wheels: [Wheel; 4],
    pub airborne: bool,
}

impl Vehicle {
    pub fn new(position: Vec3, yaw: f32) -> Self {
        let half_track = CAR_TRACK / 2.0;
        let half_base = CAR_WHEELBASE / 2.0;
        let wheel = |x: f32, z: f32| Wheel {
            offset: Vec3::new(x, 0.0, z),
            target_height: None,
            smoothed_height: position.y,
        };
        Self {
            position,
            rotation: Vec3::new(0.0, yaw, 0.0),
            velocity: Vec3::ZERO,
            speed: 0.0,
            steering_angle: 0.0,
            angular_velocity: TiltRate::default(),
            wheels: [
                wheel(half_track, half_base),
                wheel(-half_track, half_base),
                wheel(half_track, -half_base),
                wheel(-half_track, -half_base),
            ],
            airborne: false,
        }
    }

    pub fn yaw(&self) -> f32 {
        self.rotation.y
    }

    pub fn pitch(&self) -> f32 {
        self.rotation.x
    }

    pub fn roll(&self) -> f32 {
        self.rotation.z
    }

    /// Overwrite with a transform received from the driving peer
    pub fn apply_remote(&mut self, position: Vec3, rotation: Vec3, velocity: Vec3, steering_angle: f32) {
        self.position = position;
        self.rotation = rotation;
        self.velocity = velocity;
        self.steering_angle = steering_angle;
        self.speed = velocity.horizontal().dot(facing(rotation.y));
    }

    pub fn wheel_world(&self, index: usize) -> Vec3 {
        self.position + self.wheels[index].offset.rotate_yaw(self.yaw())
    }

    /// Front wheels higher than rear (or rear higher when backing up)
    pub fn is_ascending(&self) -> bool {
        (self.pitch() < -ASCENT_PITCH && self.speed > 0.0)
            || (self.pitch() > ASCENT_PITCH && self.speed < 0.0)
    }

    /// Advance one tick. `input` is the driver's controls, `None` when the
    /// driver seat is empty.
    pub fn step(&mut self, dt: f32, input: Option<&DriveInput>, grid: &BlockGrid) {
        let dt = dt.clamp(0.0, MAX_FRAME_DELTA);
        if dt <= 0.0 {
            return;
        }
        let controls = input.copied().unwrap_or_default();

        self.update_steering(&controls, dt);
        if !self.airborne {
            let walls = self.probe_walls(grid);
            self.update_speed(&controls, &walls, dt);
            self.update_heading(dt);
            let forward = facing(self.yaw());
            self.velocity.x = forward.x * self.speed;
            self.velocity.z = forward.z * self.speed;
        }

        self.position.x += self.velocity.x * dt;
        self.position.z += self.velocity.z * dt;

        self.resolve_wheels(grid, dt);
        if self.airborne {
            self.fly(dt);
        } else {
            self.follow_ground(dt);
        }
    }

    fn update_steering(&mut self, controls: &DriveInput, dt: f32) {
        let target = controls.steer.clamp(-1.0, 1.0) * CAR_MAX_STEER;
        self.steering_angle += (target - self.steering_angle) * approach(CAR_STEER_RESPONSE, dt);
    }

    /// Throttle, coasting and the brake-before-reverse rule
    fn update_speed(&mut self, controls: &DriveInput, walls: &WallProbe, dt: f32) {
        let desired = match (controls.forward, controls.reverse) {
            (true, false) => 1.0,
            (false, true) => -1.0,
            _ => 0.0,
        };

        if desired == 0.0 {
            self.slow_down(CAR_DECELERATION * dt);
            return;
        }

        if self.speed * desired < 0.0 && self.speed.abs() > CAR_REVERSAL_SPEED {
            self.slow_down(CAR_BRAKING * dt);
            return;
        }

        if walls.blocks_motion(facing(self.yaw()) * desired) {
            self.slow_down(CAR_DECELERATION * dt);
            return;
        }

        self.speed = (self.speed + desired * CAR_ACCELERATION * dt)
            .clamp(-CAR_MAX_REVERSE_SPEED, CAR_MAX_FORWARD_SPEED);
    }

    fn slow_down(&mut self, amount: f32) {
        if self.speed.abs() <= amount {
            self.speed = 0.0;
        } else {
            self.speed -= self.speed.signum() * amount;
        }
    }

    fn update_heading(&mut self, dt: f32) {
        let mut turn_rate = (self.speed.abs() * CAR_TURN_RATE_PER_SPEED).min(CAR_MAX_TURN_RATE)
            * (self.steering_angle / CAR_MAX_STEER);
        if self.speed < 0.0 {
            turn_rate = -turn_rate;
        }
        self.rotation.y += turn_rate * dt;
    }

    /// Sample three points on each side of the body for walls at least
    /// [`WALL_HEIGHT_BLOCKS`] tall
    pub fn probe_walls(&self, grid: &BlockGrid) -> WallProbe {
        let mut probe = WallProbe::default();
        if self.is_ascending() {
            return probe;
        }

        let forward = facing(self.yaw());
        let left = forward.rotate_yaw(std::f32::consts::FRAC_PI_2);
        let extent = |dir: Vec3| dir.dot(forward).abs() * CAR_HALF_LENGTH + dir.dot(left).abs() * CAR_HALF_WIDTH;
        let base_y = (self.position.y + 0.01).floor() as i32;

        for dir in Cardinal::ALL {
            let d = dir.vector();
            let lateral = d.rotate_yaw(std::f32::consts::FRAC_PI_2);
            let reach = extent(d) + PROBE_MARGIN;
            let spread = extent(lateral) * 0.8;
            let center = self.position + d * reach;

            probe.blocked[dir.index()] = [-spread, 0.0, spread].iter().any(|&offset| {
                let sample = center + lateral * offset;
                let cell = BlockCoord::containing(Vec3::new(sample.x, base_y as f32, sample.z));
                let height = grid.stack_height_above(cell);
                height >= WALL_HEIGHT_BLOCKS && !self.resting_on_top_of(cell.y + height)
            });
        }
        probe
    }

    /// Any wheel already supported at or above a stack whose top is block layer `top_y`
    fn resting_on_top_of(&self, top_y: i32) -> bool {
        let top = top_y as f32;
        self.wheels
            .iter()
            .any(|w| w.target_height.is_some_and(|h| h >= top - 0.01))
    }

    fn resolve_wheels(&mut self, grid: &BlockGrid, dt: f32) {
        let ascending = self.is_ascending();
        for i in 0..self.wheels.len() {
            let target = self.wheel_support(i, grid, ascending);
            let wheel = &mut self.wheels[i];
            if wheel.target_height.is_none() {
                wheel.smoothed_height = target;
            }
            wheel.target_height = Some(target);
            wheel.smoothed_height += (target - wheel.smoothed_height) * approach(WHEEL_SMOOTHING, dt);
        }
    }

    /// Support height for one wheel: the highest climbable block top in the
    /// 3x3 columns under its footprint, never more than the climb cap above
    /// last tick's support
    pub fn wheel_support(&self, index: usize, grid: &BlockGrid, ascending: bool) -> f32 {
        let at = self.wheel_world(index);
        let previous = self.wheels[index].target_height.unwrap_or(self.position.y);
        let limit = previous + WHEEL_CLIMB_CAP;
        let cx = at.x.floor() as i32;
        let cz = at.z.floor() as i32;

        let mut best = GROUND_Y;
        for dx in -1..=1 {
            for dz in -1..=1 {
                let (x, z) = (cx + dx, cz + dz);
                if !footprint_touches_column(at, x, z) {
                    continue;
                }
                let Some(top) = grid.highest_top_at_or_below(x, z, limit) else {
                    continue;
                };
                let rise = top - previous;
                if rise > LEVEL_EPSILON && !ascending {
                    let top_block = BlockCoord::new(x, top as i32 - 1, z);
                    if grid.stack_height_below(top_block) >= WALL_HEIGHT_BLOCKS {
                        continue;
                    }
                }
                best = best.max(top);
            }
        }
        best.min(limit)
    }

    fn rest_height(&self) -> f32 {
        self.wheels.iter().map(|w| w.smoothed_height).sum::<f32>() / self.wheels.len() as f32
    }

    /// Lowest support target under any wheel
    fn lowest_support(&self) -> f32 {
        self.wheels
            .iter()
            .filter_map(|w| w.target_height)
            .fold(f32::INFINITY, f32::min)
    }

    /// Lowest point of the underside, measured over each wheel
    fn lowest_underside(&self) -> f32 {
        self.wheels
            .iter()
            .map(|w| w.smoothed_height)
            .fold(f32::INFINITY, f32::min)
    }

    fn follow_ground(&mut self, dt: f32) {
        if self.lowest_underside() - self.lowest_support() > AIRBORNE_THRESHOLD {
            // Leave the ground with whatever spin the body had
            self.airborne = true;
            return self.fly(dt);
        }

        let rest = self.rest_height();
        self.velocity.y = (rest - self.position.y) / dt;
        self.position.y = rest;

        let heights = self.wheel_heights();
        let (target_pitch, target_roll) = tilt_from_heights(heights);
        let on_ramp = (target_pitch.abs() > LEVEL_EPSILON) || (target_roll.abs() > LEVEL_EPSILON);
        let mut rate = TILT_SMOOTHING_BASE + self.speed.abs() * TILT_SMOOTHING_PER_SPEED;
        if on_ramp {
            rate *= TILT_RAMP_FACTOR;
        }
        let k = approach(rate, dt);
        let new_pitch = self.rotation.x + (target_pitch - self.rotation.x) * k;
        let new_roll = self.rotation.z + (target_roll - self.rotation.z) * k;

        self.angular_velocity = TiltRate {
            pitch: (new_pitch - self.rotation.x) / dt,
            roll: (new_roll - self.rotation.z) / dt,
        };
        self.rotation.x = new_pitch;
        self.rotation.z = new_roll;
    }

    /// Ballistic flight: gravity on the body, frozen spin that slowly decays
    fn fly(&mut self, dt: f32) {
        self.velocity.y += GRAVITY * dt;
        self.position.y += self.velocity.y * dt;
        self.rotation.x += self.angular_velocity.pitch * dt;
        self.rotation.z += self.angular_velocity.roll * dt;
        let drag = frame_damping(AIRBORNE_SPIN_DRAG, dt);
        self.angular_velocity.pitch *= drag;
        self.angular_velocity.roll *= drag;

        let rest = self.rest_height();
        if self.velocity.y <= 0.0 && self.position.y <= rest {
            self.position.y = rest;
            self.velocity.y = 0.0;
            self.angular_velocity = TiltRate::default();
            self.airborne = false;
        }
    }

    fn wheel_heights(&self) -> [f32; 4] {
        [
            self.wheels[0].smoothed_height,
            self.wheels[1].smoothed_height,
            self.wheels[2].smoothed_height,
            self.wheels[3].smoothed_height,
        ]
    }

    /// World position and yaw of a seat
    pub fn seat_transform(&self, seat: usize) -> Option<(Vec3, f32)> {
        let local = seat_offset(seat)?;
        Some((self.position + local.rotate_yaw(self.yaw()), self.yaw()))
    }

    /// Where a player leaving `seat` is placed
    pub fn exit_position(&self, seat: usize) -> Vec3 {
        let side = if seat % 2 == 0 { 1.0 } else { -1.0 };
        let local = Vec3::new(side * (CAR_HALF_WIDTH + 0.6), 0.0, 0.0);
        self.position + local.rotate_yaw(self.yaw())
    }
}

/// Body pitch and roll for wheel heights `[front-left, front-right, rear-left, rear-right]`.
/// Front higher than rear gives negative pitch; left higher than right gives positive roll.
pub fn tilt_from_heights(h: [f32; 4]) -> (f32, f32) {
    let front = (h[0] + h[1]) / 2.0;
    let rear = (h[2] + h[3]) / 2.0;
    let left = (h[0] + h[2]) / 2.0;
    let right = (h[1] + h[3]) / 2.0;
    let pitch = -(front - rear).atan2(CAR_WHEELBASE);
    let roll = (left - right).atan2(CAR_TRACK);
    (pitch, roll)
}

fn seat_offset(seat: usize) -> Option<Vec3> {
    if seat >= SEAT_COUNT {
        return None;
    }
    let x = if seat % 2 == 0 { 0.45 } else { -0.45 };
    let z = if seat < 2 { 0.3 } else { -0.7 };
    Some(Vec3::new(x, 0.6, z))
}

/// Whether a wheel's circular footprint reaches into column (x, z)
fn footprint_touches_column(at: Vec3, x: i32, z: i32) -> bool {
    let nearest_x = at.x.clamp(x as f32, x as f32 + 1.0);
    let nearest_z = at.z.clamp(z as f32, z as f32 + 1.0);
    let dx = at.x - nearest_x;
    let dz = at.z - nearest_z;
    dx * dx + dz * dz <= WHEEL_RADIUS * WHEEL_RADIUS
}
