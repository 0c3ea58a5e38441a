//! Attacker-side melee: swing timing, hit box and hit payloads
//!
//! The attacker's client decides hits against its own view of its peers. The
//! swing is announced right away; the hit test runs [`SWING_HIT_DELAY_MS`]
//! later so it lines up with the animation.

use rand::Rng;
use uuid::Uuid;

use super::math::{facing, Vec3};
use super::ragdoll::RagdollSeed;
use super::tuning::{
    BAT_UPWARD_BIAS, MELEE_HALF_HEIGHT, MELEE_HALF_WIDTH, MELEE_REACH, SWING_COOLDOWN_MS,
    SWING_HIT_DELAY_MS, SWORD_DAMAGE,
};
use crate::ws::protocol::{ClientMsg, Item};

/// Whether `target` lies inside the box in front of an attacker at `attacker`
/// facing `yaw`. All bounds are inclusive.
pub fn in_hit_box(attacker: Vec3, yaw: f32, target: Vec3) -> bool {
    let delta = target - attacker;
    let (sin, cos) = yaw.sin_cos();
    let forward = delta.x * sin + delta.z * cos;
    let lateral = delta.x * cos - delta.z * sin;
    (0.0..=MELEE_REACH).contains(&forward)
        && lateral.abs() <= MELEE_HALF_WIDTH
        && delta.y.abs() <= MELEE_HALF_HEIGHT
}

/// First candidate inside the hit box, in the order given
pub fn find_target<I>(attacker: Vec3, yaw: f32, candidates: I) -> Option<Uuid>
where
    I: IntoIterator<Item = (Uuid, Vec3)>,
{
    candidates
        .into_iter()
        .find(|(_, position)| in_hit_box(attacker, yaw, *position))
        .map(|(id, _)| id)
}

/// Resolved hit, ready to send
#[derive(Debug, Clone, PartialEq)]
pub enum MeleeHit {
    Sword {
        target_id: Uuid,
        damage: f32,
    },
    Bat {
        target_id: Uuid,
        launch_direction: Vec3,
        seed: RagdollSeed,
    },
}

impl MeleeHit {
    pub fn into_message(self) -> ClientMsg {
        match self {
            MeleeHit::Sword { target_id, damage } => ClientMsg::PlayerDamage {
                target_id,
                damage,
                allow_self: false,
            },
            MeleeHit::Bat {
                target_id,
                launch_direction,
                seed,
            } => ClientMsg::PlayerBatHit {
                target_id,
                launch_direction,
                angular_velocities: seed,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingSwing {
    item: Item,
    due_ms: u64,
}

/// Swing state of the local player
#[derive(Debug, Clone, Default)]
pub struct MeleeController {
    pending: Option<PendingSwing>,
    last_swing_ms: Option<u64>,
}

impl MeleeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Start a swing with whatever is in hand. Returns the announcement to
    /// broadcast, or `None` while the previous swing is cooling down.
    pub fn begin_swing(&mut self, item: Option<Item>, now_ms: u64) -> Option<ClientMsg> {
        if let Some(last) = self.last_swing_ms {
            if now_ms.saturating_sub(last) < SWING_COOLDOWN_MS {
                return None;
            }
        }
        self.last_swing_ms = Some(now_ms);

        match item {
            None => Some(ClientMsg::PlayerSwingArm),
            Some(item @ (Item::Sword | Item::Bat)) => {
                self.pending = Some(PendingSwing {
                    item,
                    due_ms: now_ms + SWING_HIT_DELAY_MS,
                });
                Some(ClientMsg::PlayerUseItemSwing { item: Some(item) })
            }
            Some(Item::HealthPack) => Some(ClientMsg::PlayerUseItemSwing {
                item: Some(Item::HealthPack),
            }),
        }
    }

    /// Run the delayed hit test once it is due. `candidates` are the peers that
    /// can be hit, in insertion order.
    pub fn poll<I, R>(
        &mut self,
        now_ms: u64,
        attacker: Vec3,
        yaw: f32,
        candidates: I,
        rng: &mut R,
    ) -> Option<MeleeHit>
    where
        I: IntoIterator<Item = (Uuid, Vec3)>,
        R: Rng + ?Sized,
    {
        let swing = self.pending?;
        if now_ms < swing.due_ms {
            return None;
        }
        self.pending = None;

        let target_id = find_target(attacker, yaw, candidates)?;
        match swing.item {
            Item::Sword => Some(MeleeHit::Sword {
                target_id,
                damage: SWORD_DAMAGE,
            }),
            Item::Bat => {
                let forward = facing(yaw);
                Some(MeleeHit::Bat {
                    target_id,
                    launch_direction: Vec3::new(forward.x, BAT_UPWARD_BIAS, forward.z),
                    seed: RagdollSeed::random(rng),
                })
            }
            Item::HealthPack => None,
        }
    }

    /// Drop a swing that can no longer land (death, entering a car)
    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn hit_box_bounds_are_inclusive() {
        let origin = Vec3::ZERO;
        assert!(in_hit_box(origin, 0.0, Vec3::new(0.0, 0.0, 1.5)));
        assert!(in_hit_box(origin, 0.0, Vec3::new(0.4, 0.0, 1.0)));
        assert!(in_hit_box(origin, 0.0, Vec3::new(-0.4, 0.0, 1.0)));
        assert!(in_hit_box(origin, 0.0, Vec3::new(0.0, 0.5, 1.0)));
        assert!(in_hit_box(origin, 0.0, Vec3::new(0.0, 0.0, 0.0)));

        assert!(!in_hit_box(origin, 0.0, Vec3::new(0.0, 0.0, -0.01)));
        assert!(!in_hit_box(origin, 0.0, Vec3::new(0.0, 0.0, 1.51)));
        assert!(!in_hit_box(origin, 0.0, Vec3::new(0.41, 0.0, 1.0)));
        assert!(!in_hit_box(origin, 0.0, Vec3::new(0.0, 0.51, 1.0)));
    }

    #[test]
    fn hit_box_turns_with_facing() {
        let yaw = std::f32::consts::FRAC_PI_2;
        assert!(in_hit_box(Vec3::ZERO, yaw, Vec3::new(1.0, 0.0, 0.0)));
        assert!(!in_hit_box(Vec3::ZERO, yaw, Vec3::new(0.0, 0.0, 1.0)));
    }

    #[test]
    fn first_match_in_order_wins() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let candidates = vec![(a, Vec3::new(0.0, 0.0, 1.2)), (b, Vec3::new(0.0, 0.0, 0.5))];
        assert_eq!(find_target(Vec3::ZERO, 0.0, candidates), Some(a));
    }

    #[test]
    fn sword_hits_after_delay() {
        let target = Uuid::new_v4();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut melee = MeleeController::new();
        let peers = [(target, Vec3::new(0.0, 0.0, 1.0))];

        assert_eq!(
            melee.begin_swing(Some(Item::Sword), 1000),
            Some(ClientMsg::PlayerUseItemSwing { item: Some(Item::Sword) })
        );
        assert_eq!(melee.poll(1149, Vec3::ZERO, 0.0, peers, &mut rng), None);
        assert!(melee.has_pending());

        let hit = melee.poll(1150, Vec3::ZERO, 0.0, peers, &mut rng);
        assert_eq!(
            hit,
            Some(MeleeHit::Sword {
                target_id: target,
                damage: 25.0
            })
        );
        assert!(!melee.has_pending());
    }

    #[test]
    fn bat_launches_upward_along_facing() {
        let target = Uuid::new_v4();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut melee = MeleeController::new();
        melee.begin_swing(Some(Item::Bat), 0);
        let hit = melee
            .poll(200, Vec3::ZERO, 0.0, [(target, Vec3::new(0.0, 0.0, 1.0))], &mut rng)
            .unwrap();
        let MeleeHit::Bat {
            launch_direction, seed, ..
        } = &hit
        else {
            panic!("expected bat hit, got {hit:?}");
        };
        assert_eq!(*launch_direction, Vec3::new(0.0, BAT_UPWARD_BIAS, 1.0));
        assert!(seed.is_finite());
        assert!(matches!(hit.into_message(), ClientMsg::PlayerBatHit { .. }));
    }

    #[test]
    fn miss_clears_pending_swing() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut melee = MeleeController::new();
        melee.begin_swing(Some(Item::Sword), 0);
        let far = [(Uuid::new_v4(), Vec3::new(0.0, 0.0, 5.0))];
        assert_eq!(melee.poll(150, Vec3::ZERO, 0.0, far, &mut rng), None);
        assert!(!melee.has_pending());
    }

    #[test]
    fn swings_are_rate_limited() {
        let mut melee = MeleeController::new();
        assert!(melee.begin_swing(None, 0).is_some());
        assert!(melee.begin_swing(None, 399).is_none());
        assert_eq!(melee.begin_swing(None, 400), Some(ClientMsg::PlayerSwingArm));
    }
}
