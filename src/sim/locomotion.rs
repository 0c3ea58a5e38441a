//! Player movement and collision against blocks, peers and cars

use super::math::{approach, facing, GroundPlane, Vec3};
use super::tuning::{
    CAR_BODY_HEIGHT, CAR_HALF_LENGTH, CAR_HALF_WIDTH, FALL_RAGDOLL_DISTANCE, GRAVITY, GROUND_Y,
    JUMP_SPEED, LADDER_CLIMB_SPEED, LADDER_DRIFT_SPEED, MAX_FRAME_DELTA, MOVE_RESPONSE,
    PLAYER_HALF_WIDTH, PLAYER_HEIGHT, PLAYER_PUSH_RADIUS, PUSH_VELOCITY_DAMPING, SPRINT_SPEED,
    WALK_SPEED, WALL_BOUNCE,
};
use crate::world::{BlockCoord, BlockGrid, BlockType, HazardCooldowns};

/// Vertical slack when deciding whether a block was landed on or hit from below
const CONTACT_EPSILON: f32 = 0.05;
/// How far outside the body a hazard still counts as touched
const HAZARD_REACH: f32 = 0.05;

/// Movement controls for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveIntent {
    /// -1.0 back, 1.0 forward
    pub forward: f32,
    /// -1.0 right, 1.0 left
    pub strafe: f32,
    pub jump: bool,
    pub sprint: bool,
    pub yaw: f32,
}

/// Things that happened to the body during a step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocomotionEvent {
    /// Dropped far enough to fall over
    FallRagdoll { distance: f32 },
    /// Touched a kill or damage block whose cooldown had expired
    HazardHit {
        coord: BlockCoord,
        block_type: BlockType,
        damage: f32,
    },
}

/// Kinematic body of the local player
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerBody {
    /// Feet position
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f32,
    pub grounded: bool,
    pub on_ladder: bool,
    /// Feet height the last time the body stood on something or held a ladder
    last_ground_y: Option<f32>,
    fall_reported: bool,
}

impl PlayerBody {
    pub fn new(position: Vec3, yaw: f32) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            yaw,
            grounded: false,
            on_ladder: false,
            last_ground_y: None,
            fall_reported: false,
        }
    }

    /// Put the body somewhere new, at rest
    pub fn teleport(&mut self, position: Vec3) {
        self.position = position;
        self.velocity = Vec3::ZERO;
        self.grounded = false;
        self.last_ground_y = None;
        self.fall_reported = false;
    }

    pub fn bounds(&self) -> (Vec3, Vec3) {
        bounds_at(self.position)
    }

    pub fn step(
        &mut self,
        dt: f32,
        intent: &MoveIntent,
        grid: &BlockGrid,
        hazards: &mut HazardCooldowns,
        now_ms: u64,
    ) -> Vec<LocomotionEvent> {
        let mut events = Vec::new();
        let dt = dt.clamp(0.0, MAX_FRAME_DELTA);
        if dt <= 0.0 {
            return events;
        }

        self.yaw = intent.yaw;
        self.steer_horizontal(intent, dt);

        self.on_ladder = grid.ladder_near(self.position + Vec3::new(0.0, 0.1, 0.0));
        if self.on_ladder {
            self.velocity.y = if intent.forward > 0.0 {
                LADDER_CLIMB_SPEED
            } else {
                LADDER_DRIFT_SPEED
            };
        } else if self.grounded && intent.jump {
            self.velocity.y = JUMP_SPEED;
            self.grounded = false;
        } else {
            self.velocity.y += GRAVITY * dt;
        }

        let before = self.position.y;
        self.position.y += self.velocity.y * dt;
        self.resolve_vertical(grid, before);

        self.position.x += self.velocity.x * dt;
        self.position.z += self.velocity.z * dt;
        self.resolve_horizontal(grid);

        if let Some(distance) = self.track_fall(before) {
            events.push(LocomotionEvent::FallRagdoll { distance });
        }

        let (min, max) = self.bounds();
        let reach = Vec3::new(HAZARD_REACH, HAZARD_REACH, HAZARD_REACH);
        for (coord, block) in grid.blocks_overlapping(min - reach, max + reach) {
            if let Some(damage) = hazards.try_trigger(coord, block.block_type, now_ms) {
                events.push(LocomotionEvent::HazardHit {
                    coord,
                    block_type: block.block_type,
                    damage,
                });
            }
        }

        events
    }

    fn steer_horizontal(&mut self, intent: &MoveIntent, dt: f32) {
        let forward = facing(intent.yaw);
        let left = forward.rotate_yaw(std::f32::consts::FRAC_PI_2);
        let mut wish = forward * intent.forward.clamp(-1.0, 1.0) + left * intent.strafe.clamp(-1.0, 1.0);
        if wish.length_squared() > 1.0 {
            wish = wish.direction_or(Vec3::ZERO);
        }
        let speed = if intent.sprint { SPRINT_SPEED } else { WALK_SPEED };
        let target = wish * speed;
        let k = approach(MOVE_RESPONSE, dt);
        self.velocity.x += (target.x - self.velocity.x) * k;
        self.velocity.z += (target.z - self.velocity.z) * k;
    }

    /// Land on block tops crossed while falling, or stop under ceilings while rising
    fn resolve_vertical(&mut self, grid: &BlockGrid, before: f32) {
        let (min, max) = self.bounds();
        let hits = grid.solid_overlapping(min, max);
        self.grounded = false;

        if self.velocity.y <= 0.0 {
            let landing = hits
                .iter()
                .map(|c| c.top())
                .filter(|&top| top <= before + CONTACT_EPSILON)
                .fold(None, |best: Option<f32>, top| Some(best.map_or(top, |b| b.max(top))));
            if let Some(top) = landing {
                self.position.y = top;
                self.velocity.y = 0.0;
                self.grounded = true;
            }
        } else {
            let ceiling = hits
                .iter()
                .map(|c| c.y as f32)
                .filter(|&bottom| bottom >= before + PLAYER_HEIGHT - CONTACT_EPSILON)
                .fold(None, |best: Option<f32>, bottom| Some(best.map_or(bottom, |b| b.min(bottom))));
            if let Some(bottom) = ceiling {
                self.position.y = bottom - PLAYER_HEIGHT;
                self.velocity.y = 0.0;
            }
        }

        if self.position.y <= GROUND_Y {
            self.position.y = GROUND_Y;
            self.velocity.y = self.velocity.y.max(0.0);
            self.grounded = true;
        }
    }

    /// Push out of walls along the axis of least overlap
    fn resolve_horizontal(&mut self, grid: &BlockGrid) {
        let (min, max) = self.bounds();
        let shrink = Vec3::new(0.0, CONTACT_EPSILON, 0.0);
        for coord in grid.solid_overlapping(min + shrink, max - shrink) {
            let (min, max) = self.bounds();
            let (bx, bz) = (coord.x as f32, coord.z as f32);

            let (depth_x, sign_x) = axis_push(min.x, max.x, bx);
            let (depth_z, sign_z) = axis_push(min.z, max.z, bz);
            if depth_x <= 0.0 || depth_z <= 0.0 {
                continue;
            }

            let normal = if depth_x < depth_z {
                self.position.x += sign_x * depth_x;
                Vec3::new(sign_x, 0.0, 0.0)
            } else {
                self.position.z += sign_z * depth_z;
                Vec3::new(0.0, 0.0, sign_z)
            };

            let into = self.velocity.dot(normal);
            if into < 0.0 {
                self.velocity -= normal * (into * WALL_BOUNCE);
            }
        }
    }

    /// Report a fall once per airborne stretch, measured as net drop below the
    /// last ground contact. Jump height does not count.
    fn track_fall(&mut self, before: f32) -> Option<f32> {
        if self.grounded || self.on_ladder {
            self.last_ground_y = Some(self.position.y);
            self.fall_reported = false;
            return None;
        }

        // Spawned or teleported in mid-air: measure from where the fall began
        let ground = *self.last_ground_y.get_or_insert(before);
        let drop = ground - self.position.y;
        if drop > FALL_RAGDOLL_DISTANCE && !self.fall_reported {
            self.fall_reported = true;
            return Some(drop);
        }
        None
    }

    /// Keep a peer at arm's length. Returns whether the body moved.
    pub fn separate_from_player(&mut self, other: Vec3) -> bool {
        if (self.position.y - other.y).abs() >= PLAYER_HEIGHT {
            return false;
        }
        let delta = (self.position - other).horizontal();
        let distance = delta.length();
        let contact = PLAYER_PUSH_RADIUS * 2.0;
        if distance >= contact {
            return false;
        }

        let normal = delta.direction_or(Vec3::new(1.0, 0.0, 0.0));
        self.position += normal * (contact - distance);
        self.absorb_push(normal);
        true
    }

    /// Push the body out of a car's footprint. Returns whether the body moved.
    pub fn separate_from_car(&mut self, car_position: Vec3, car_yaw: f32) -> bool {
        if self.position.y >= car_position.y + CAR_BODY_HEIGHT
            || self.position.y + PLAYER_HEIGHT <= car_position.y
        {
            return false;
        }

        let local = (self.position - car_position).horizontal().rotate_yaw(-car_yaw);
        let half_x = CAR_HALF_WIDTH + PLAYER_HALF_WIDTH;
        let half_z = CAR_HALF_LENGTH + PLAYER_HALF_WIDTH;
        let depth_x = half_x - local.x.abs();
        let depth_z = half_z - local.z.abs();
        if depth_x <= 0.0 || depth_z <= 0.0 {
            return false;
        }

        let (pushed, local_normal) = if depth_x < depth_z {
            let side = local.x.signum();
            (Vec3::new(side * half_x, 0.0, local.z), Vec3::new(side, 0.0, 0.0))
        } else {
            let side = local.z.signum();
            (Vec3::new(local.x, 0.0, side * half_z), Vec3::new(0.0, 0.0, side))
        };

        let world = pushed.rotate_yaw(car_yaw);
        self.position.x = car_position.x + world.x;
        self.position.z = car_position.z + world.z;
        self.absorb_push(local_normal.rotate_yaw(car_yaw));
        true
    }

    fn absorb_push(&mut self, normal: Vec3) {
        let into = self.velocity.dot(normal);
        if into < 0.0 {
            self.velocity -= normal * into;
        }
        self.velocity.x *= PUSH_VELOCITY_DAMPING;
        self.velocity.z *= PUSH_VELOCITY_DAMPING;
    }
}

fn bounds_at(position: Vec3) -> (Vec3, Vec3) {
    (
        Vec3::new(position.x - PLAYER_HALF_WIDTH, position.y, position.z - PLAYER_HALF_WIDTH),
        Vec3::new(
            position.x + PLAYER_HALF_WIDTH,
            position.y + PLAYER_HEIGHT,
            position.z + PLAYER_HALF_WIDTH,
        ),
    )
}

/// Smallest push along one axis out of the unit interval starting at `cell_min`
fn axis_push(min: f32, max: f32, cell_min: f32) -> (f32, f32) {
    let toward_negative = max - cell_min;
    let toward_positive = cell_min + 1.0 - min;
    if toward_negative < toward_positive {
        (toward_negative, -1.0)
    } else {
        (toward_positive, 1.0)
    }
}
