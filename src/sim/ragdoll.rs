//! Articulated ragdoll: torso plus four two-axis limbs
//!
//! A ragdoll is started by a bat hit or a long fall and always ends after
//! [`RAGDOLL_DURATION`] simulated seconds, handing back the exact pose that was
//! active when it started. Random spins are not rolled here: the peer that
//! triggers the ragdoll rolls a [`RagdollSeed`] once and every peer replays it.

use std::f32::consts::FRAC_1_SQRT_2;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::math::{facing, frame_damping, xyz, GroundPlane, Vec3};
use super::tuning::{
    BODY_PART_PUSH, BODY_PART_RADIUS, GRAVITY, GROUND_FRICTION, GROUND_HORIZONTAL_DAMPING,
    GROUND_VERTICAL_DAMPING, LIMB_DAMPING, LIMB_IMPACT_IMPULSE, MAX_FRAME_DELTA,
    RAGDOLL_DURATION, RAGDOLL_INITIAL_FORCE_WINDOW, RAGDOLL_LAUNCH_SPEED, REST_HORIZONTAL_COS,
    REST_TRANSITIONS_TO_SETTLE, SEED_LIMB_SPIN, SEED_TORSO_SPIN, TORSO_DAMPING,
    TORSO_GRAVITY_TORQUE, TORSO_IMPACT_IMPULSE, TORSO_ROLL_RESTORE,
};
use crate::world::{BlockCoord, BlockGrid};

/// Height of the hip pivot above the feet
const HIP_HEIGHT: f32 = 0.9;
const ARM_LENGTH: f32 = 0.6;
const LEG_LENGTH: f32 = 0.9;
/// Elapsed-time slack so accumulated float steps still end on time
const DURATION_EPSILON: f32 = 1e-4;

/// Two-axis value for a limb (angles or angular velocities)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LimbAxes {
    pub x: f32,
    pub z: f32,
}

impl LimbAxes {
    pub const ZERO: LimbAxes = LimbAxes { x: 0.0, z: 0.0 };

    pub fn new(x: f32, z: f32) -> Self {
        Self { x, z }
    }

    fn scaled(self, k: f32) -> Self {
        Self::new(self.x * k, self.z * k)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limb {
    LeftArm,
    RightArm,
    LeftLeg,
    RightLeg,
}

impl Limb {
    pub const ALL: [Limb; 4] = [Limb::LeftArm, Limb::RightArm, Limb::LeftLeg, Limb::RightLeg];

    pub fn index(self) -> usize {
        match self {
            Limb::LeftArm => 0,
            Limb::RightArm => 1,
            Limb::LeftLeg => 2,
            Limb::RightLeg => 3,
        }
    }

    /// Joint position relative to the hip pivot, torso frame. Left is +X.
    fn joint(self) -> Vec3 {
        match self {
            Limb::LeftArm => Vec3::new(0.35, 0.55, 0.0),
            Limb::RightArm => Vec3::new(-0.35, 0.55, 0.0),
            Limb::LeftLeg => Vec3::new(0.15, 0.0, 0.0),
            Limb::RightLeg => Vec3::new(-0.15, 0.0, 0.0),
        }
    }

    fn length(self) -> f32 {
        match self {
            Limb::LeftArm | Limb::RightArm => ARM_LENGTH,
            Limb::LeftLeg | Limb::RightLeg => LEG_LENGTH,
        }
    }
}

/// Angular velocities rolled once by the triggering peer
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagdollSeed {
    #[serde(with = "xyz")]
    pub torso: Vec3,
    /// Left arm, right arm, left leg, right leg
    pub limbs: [LimbAxes; 4],
}

impl RagdollSeed {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut spin = |max: f32| rng.gen_range(-max..=max);
        let torso = Vec3::new(
            spin(SEED_TORSO_SPIN),
            spin(SEED_TORSO_SPIN),
            spin(SEED_TORSO_SPIN),
        );
        let mut limbs = [LimbAxes::ZERO; 4];
        for limb in &mut limbs {
            *limb = LimbAxes::new(spin(SEED_LIMB_SPIN), spin(SEED_LIMB_SPIN));
        }
        Self { torso, limbs }
    }

    pub fn is_finite(&self) -> bool {
        self.torso.is_finite() && self.limbs.iter().all(|l| l.x.is_finite() && l.z.is_finite())
    }
}

/// Joint rotations of the avatar skeleton
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    /// Euler angles; y is the facing yaw
    pub torso: Vec3,
    pub limbs: [LimbAxes; 4],
}

impl Pose {
    /// Standing pose facing `yaw`
    pub fn standing(yaw: f32) -> Self {
        Self {
            torso: Vec3::new(0.0, yaw, 0.0),
            limbs: [LimbAxes::ZERO; 4],
        }
    }

    /// Torso-frame vector to world frame
    fn torso_to_world(&self, v: Vec3) -> Vec3 {
        rotate_z(rotate_x(v, self.torso.x), self.torso.z).rotate_yaw(self.torso.y)
    }

    /// World-space direction a limb points in
    fn limb_direction(&self, limb: Limb) -> Vec3 {
        let angles = self.limbs[limb.index()];
        let local = rotate_z(rotate_x(Vec3::new(0.0, -1.0, 0.0), angles.x), angles.z);
        self.torso_to_world(local)
    }

    /// Vertical component of the torso's up axis
    fn uprightness(&self) -> f32 {
        self.torso_to_world(Vec3::Y).y
    }
}

fn rotate_x(v: Vec3, a: f32) -> Vec3 {
    let (s, c) = a.sin_cos();
    Vec3::new(v.x, v.y * c - v.z * s, v.y * s + v.z * c)
}

fn rotate_z(v: Vec3, a: f32) -> Vec3 {
    let (s, c) = a.sin_cos();
    Vec3::new(v.x * c - v.y * s, v.x * s + v.y * c, v.z)
}

/// A collision probe on the body
#[derive(Debug, Clone, Copy)]
struct BodyPart {
    center: Vec3,
    /// Limb whose end this part is, if any
    limb: Option<Limb>,
}

/// Angular impulse a limb receives from a collision normal
pub fn limb_impulse(normal: Vec3, limb_direction: Vec3) -> LimbAxes {
    let torque = normal.cross(limb_direction);
    LimbAxes::new(torque.x * LIMB_IMPACT_IMPULSE, torque.z * LIMB_IMPACT_IMPULSE)
}

/// Outcome of one ragdoll step
#[derive(Debug, Clone, PartialEq)]
pub enum RagdollStep {
    Active,
    /// Time is up; the body returns to normal with these values
    Finished { pose: Pose, position: Vec3 },
}

/// Live ragdoll simulation attached to a player
#[derive(Debug, Clone, PartialEq)]
pub struct Ragdoll {
    /// Feet position of the upright body; the hip pivot sits above it
    pub position: Vec3,
    pub velocity: Vec3,
    /// Velocity the ragdoll started with
    pub launch_velocity: Vec3,
    pub pose: Pose,
    snapshot: Pose,
    pub torso_spin: Vec3,
    pub limb_spin: [LimbAxes; 4],
    pub elapsed: f32,
    pub rest_transitions: u32,
    resting: bool,
    pub grounded: bool,
}

impl Ragdoll {
    /// Ragdoll launched by a hit. The trigger's horizontal direction is kept and
    /// lifted to 45° at the fixed launch speed; `facing_yaw` is used when the
    /// trigger has no horizontal component.
    pub fn launched(position: Vec3, pose: Pose, trigger: Vec3, facing_yaw: f32, seed: &RagdollSeed) -> Self {
        let dir = trigger.horizontal().direction_or(facing(facing_yaw));
        let component = RAGDOLL_LAUNCH_SPEED * FRAC_1_SQRT_2;
        let velocity = dir * component + Vec3::Y * component;
        Self::start(position, pose, velocity, seed)
    }

    /// Ragdoll from a fall; keeps the falling velocity
    pub fn falling(position: Vec3, pose: Pose, velocity: Vec3, seed: &RagdollSeed) -> Self {
        Self::start(position, pose, velocity, seed)
    }

    fn start(position: Vec3, pose: Pose, velocity: Vec3, seed: &RagdollSeed) -> Self {
        Self {
            position,
            velocity,
            launch_velocity: velocity,
            pose,
            snapshot: pose,
            torso_spin: seed.torso,
            limb_spin: seed.limbs,
            elapsed: 0.0,
            rest_transitions: 0,
            resting: false,
            grounded: false,
        }
    }

    /// Replace the spins with a seed that arrived after the ragdoll started
    pub fn apply_seed(&mut self, seed: &RagdollSeed) {
        if self.is_settled() {
            return;
        }
        self.torso_spin = seed.torso;
        self.limb_spin = seed.limbs;
    }

    /// Pose the body returns to when the ragdoll ends
    pub fn snapshot(&self) -> &Pose {
        &self.snapshot
    }

    pub fn is_settled(&self) -> bool {
        self.rest_transitions >= REST_TRANSITIONS_TO_SETTLE
    }

    /// Advance the simulation by `dt` seconds
    pub fn step(&mut self, dt: f32, grid: &BlockGrid) -> RagdollStep {
        let dt = dt.clamp(0.0, MAX_FRAME_DELTA);
        self.elapsed += dt;
        if self.elapsed >= RAGDOLL_DURATION - DURATION_EPSILON {
            self.elapsed = RAGDOLL_DURATION;
            return RagdollStep::Finished {
                pose: self.snapshot,
                position: self.position,
            };
        }

        self.integrate_linear(dt);
        self.resolve_ground(dt, grid);
        self.resolve_block_contacts(grid);
        self.integrate_angular(dt);

        let resting_now = self.grounded && self.pose.uprightness().abs() < REST_HORIZONTAL_COS;
        self.track_rest(resting_now);

        RagdollStep::Active
    }

    fn integrate_linear(&mut self, dt: f32) {
        self.velocity.y += GRAVITY * dt;
        self.position += self.velocity * dt;
    }

    /// Lift the body so its lowest part rests on the surface under it
    fn resolve_ground(&mut self, dt: f32, grid: &BlockGrid) {
        let penetration = self
            .body_parts()
            .iter()
            .map(|part| {
                let support = grid.ground_height(part.center, BODY_PART_RADIUS);
                support - (part.center.y - BODY_PART_RADIUS)
            })
            .fold(f32::NEG_INFINITY, f32::max);

        if penetration > 0.0 {
            self.position.y += penetration;
            if self.velocity.y < 0.0 {
                self.velocity.y = -self.velocity.y * GROUND_VERTICAL_DAMPING;
            }
            let keep = frame_damping(GROUND_HORIZONTAL_DAMPING, dt);
            self.velocity.x *= keep;
            self.velocity.z *= keep;
            self.grounded = true;
        } else {
            self.grounded = penetration > -0.05;
        }
    }

    /// Push body parts out of blocks they overlap from the side or below,
    /// turning each contact into torso and limb spin
    fn resolve_block_contacts(&mut self, grid: &BlockGrid) {
        for part in self.body_parts() {
            for coord in grid.solids_touching_sphere(part.center, BODY_PART_RADIUS) {
                let normal = contact_normal(part.center, coord);
                // Resting on top is handled by the ground pass
                if normal.y > 0.5 {
                    continue;
                }

                self.position += normal * BODY_PART_PUSH;
                self.torso_spin.x += normal.z * TORSO_IMPACT_IMPULSE;
                self.torso_spin.z -= normal.x * TORSO_IMPACT_IMPULSE;

                if let Some(limb) = part.limb {
                    let impulse = limb_impulse(normal, self.pose.limb_direction(limb));
                    let spin = &mut self.limb_spin[limb.index()];
                    spin.x += impulse.x;
                    spin.z += impulse.z;
                }
            }
        }
    }

    fn integrate_angular(&mut self, dt: f32) {
        if self.is_settled() {
            return;
        }

        self.torso_spin *= frame_damping(TORSO_DAMPING, dt);
        if self.elapsed > RAGDOLL_INITIAL_FORCE_WINDOW {
            // Gravity tips the torso toward lying flat
            let tilt = self.pose.torso.x;
            let mut torque = 0.5 * (2.0 * tilt).sin();
            if tilt.abs() < 0.05 {
                torque = 0.5 * if self.torso_spin.x < 0.0 { -1.0 } else { 1.0 };
            }
            self.torso_spin.x += TORSO_GRAVITY_TORQUE * torque * dt;
            self.torso_spin.z -= TORSO_ROLL_RESTORE * self.pose.torso.z.sin() * dt;
        }

        let limb_keep = frame_damping(LIMB_DAMPING, dt);
        for spin in &mut self.limb_spin {
            *spin = spin.scaled(limb_keep);
        }

        if self.grounded {
            let friction = frame_damping(GROUND_FRICTION, dt);
            self.torso_spin *= friction;
            for spin in &mut self.limb_spin {
                *spin = spin.scaled(friction);
            }
        }

        self.pose.torso += self.torso_spin * dt;
        for (angle, spin) in self.pose.limbs.iter_mut().zip(self.limb_spin.iter()) {
            angle.x = (angle.x + spin.x * dt).clamp(-std::f32::consts::PI, std::f32::consts::PI);
            angle.z = (angle.z + spin.z * dt).clamp(-std::f32::consts::PI, std::f32::consts::PI);
        }
    }

    /// Count entries into a grounded flat rest; the third one stops all spin
    fn track_rest(&mut self, resting_now: bool) {
        if resting_now && !self.resting && !self.is_settled() {
            self.rest_transitions += 1;
            if self.is_settled() {
                self.torso_spin = Vec3::ZERO;
                self.limb_spin = [LimbAxes::ZERO; 4];
            }
        }
        self.resting = resting_now;
    }

    fn hip(&self) -> Vec3 {
        self.position + Vec3::new(0.0, HIP_HEIGHT, 0.0)
    }

    fn body_parts(&self) -> [BodyPart; 7] {
        let hip = self.hip();
        let at = |local: Vec3| hip + self.pose.torso_to_world(local);
        let limb_end = |limb: Limb| BodyPart {
            center: at(limb.joint()) + self.pose.limb_direction(limb) * limb.length(),
            limb: Some(limb),
        };
        [
            BodyPart {
                center: at(Vec3::new(0.0, 0.75, 0.0)),
                limb: None,
            },
            BodyPart {
                center: at(Vec3::new(0.0, 0.4, 0.0)),
                limb: None,
            },
            BodyPart {
                center: hip,
                limb: None,
            },
            limb_end(Limb::LeftArm),
            limb_end(Limb::RightArm),
            limb_end(Limb::LeftLeg),
            limb_end(Limb::RightLeg),
        ]
    }
}

/// Axis-aligned normal pointing from a block toward a contact point
fn contact_normal(point: Vec3, coord: BlockCoord) -> Vec3 {
    let d = point - coord.center();
    let (ax, ay, az) = (d.x.abs(), d.y.abs(), d.z.abs());
    if ax >= ay && ax >= az {
        Vec3::new(d.x.signum(), 0.0, 0.0)
    } else if ay >= az {
        Vec3::new(0.0, d.y.signum(), 0.0)
    } else {
        Vec3::new(0.0, 0.0, d.z.signum())
    }
}

/// Normal animation or a running ragdoll
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BodyState {
    #[default]
    Normal,
    Ragdoll(Box<Ragdoll>),
}

impl BodyState {
    pub fn is_ragdoll(&self) -> bool {
        matches!(self, BodyState::Ragdoll(_))
    }

    pub fn ragdoll_mut(&mut self) -> Option<&mut Ragdoll> {
        match self {
            BodyState::Ragdoll(ragdoll) => Some(ragdoll),
            BodyState::Normal => None,
        }
    }

    /// Step a running ragdoll, switching back to normal when it finishes.
    /// Returns the restored pose and final position on that tick.
    pub fn step(&mut self, dt: f32, grid: &BlockGrid) -> Option<(Pose, Vec3)> {
        let BodyState::Ragdoll(ragdoll) = self else {
            return None;
        };
        match ragdoll.step(dt, grid) {
            RagdollStep::Active => None,
            RagdollStep::Finished { pose, position } => {
                *self = BodyState::Normal;
                Some((pose, position))
            }
        }
    }
}
