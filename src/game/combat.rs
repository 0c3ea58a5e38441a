//! Server-side combat rules: health clamping, death debris, rejections

use rand::Rng;

use crate::sim::math::Vec3;
use crate::sim::tuning::{DEBRIS_PIECES, MAX_HEALTH};
use crate::ws::protocol::DebrisPiece;

/// Result of applying damage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageOutcome {
    pub health: f32,
    /// Health went from above zero to zero with this hit
    pub killed: bool,
}

/// Combat rules applied by the relay
pub struct CombatSystem;

impl CombatSystem {
    /// Subtract damage, clamped to `[0, MAX_HEALTH]`
    pub fn apply_damage(health: f32, damage: f32) -> DamageOutcome {
        let new_health = (health - damage).clamp(0.0, MAX_HEALTH);
        DamageOutcome {
            health: new_health,
            killed: health > 0.0 && new_health <= 0.0,
        }
    }

    /// Add healing, clamped to `[0, MAX_HEALTH]`
    pub fn apply_heal(health: f32, amount: f32) -> f32 {
        (health + amount).clamp(0.0, MAX_HEALTH)
    }

    /// Debris field for a death, generated once and replayed by every client
    pub fn generate_debris<R: Rng + ?Sized>(rng: &mut R) -> Vec<DebrisPiece> {
        (0..DEBRIS_PIECES)
            .map(|_| DebrisPiece {
                size: rng.gen_range(0.1..=0.3),
                offset: Vec3::new(
                    rng.gen_range(-0.5..=0.5),
                    rng.gen_range(0.0..=1.8),
                    rng.gen_range(-0.5..=0.5),
                ),
                velocity: Vec3::new(
                    rng.gen_range(-5.0..=5.0),
                    rng.gen_range(3.0..=10.0),
                    rng.gen_range(-5.0..=5.0),
                ),
            })
            .collect()
    }
}

/// Why the relay refused a client message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("Not logged in")]
    NotAuthenticated,

    #[error("Not in the world yet")]
    NotInWorld,

    #[error("Player is dead")]
    Dead,

    #[error("Unknown target")]
    UnknownTarget,

    #[error("Target is already dead")]
    TargetDead,

    #[error("Cannot damage yourself")]
    SelfDamage,

    #[error("Implausible value")]
    Implausible,

    #[error("Block position already occupied")]
    Occupied,

    #[error("No matching block")]
    NoSuchBlock,

    #[error("Block position outside the world")]
    OutOfBounds,

    #[error("Unknown car")]
    UnknownCar,

    #[error("Car id already in use")]
    DuplicateCar,

    #[error("Too many cars")]
    CarLimit,

    #[error("Invalid seat")]
    InvalidSeat,

    #[error("Seat is taken")]
    SeatTaken,

    #[error("Already in a car")]
    AlreadySeated,

    #[error("Not in that car")]
    NotSeated,

    #[error("Only the driver controls the car")]
    NotDriver,

    #[error("Guests cannot save")]
    GuestSave,
}

impl RejectReason {
    /// Machine readable code for `error` messages
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::NotAuthenticated => "not_authenticated",
            RejectReason::NotInWorld => "not_in_world",
            RejectReason::Dead => "dead",
            RejectReason::UnknownTarget => "unknown_target",
            RejectReason::TargetDead => "target_dead",
            RejectReason::SelfDamage => "self_damage",
            RejectReason::Implausible => "implausible",
            RejectReason::Occupied => "occupied",
            RejectReason::NoSuchBlock => "no_such_block",
            RejectReason::OutOfBounds => "out_of_bounds",
            RejectReason::UnknownCar => "unknown_car",
            RejectReason::DuplicateCar => "duplicate_car",
            RejectReason::CarLimit => "car_limit",
            RejectReason::InvalidSeat => "invalid_seat",
            RejectReason::SeatTaken => "seat_taken",
            RejectReason::AlreadySeated => "already_seated",
            RejectReason::NotSeated => "not_seated",
            RejectReason::NotDriver => "not_driver",
            RejectReason::GuestSave => "guest_save",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn damage_clamps_at_zero_and_kills_once() {
        let hit = CombatSystem::apply_damage(20.0, 25.0);
        assert_eq!(hit.health, 0.0);
        assert!(hit.killed);

        let again = CombatSystem::apply_damage(0.0, 25.0);
        assert_eq!(again.health, 0.0);
        assert!(!again.killed);

        let graze = CombatSystem::apply_damage(100.0, 25.0);
        assert_eq!(graze.health, 75.0);
        assert!(!graze.killed);
    }

    #[test]
    fn negative_damage_cannot_overheal() {
        assert_eq!(CombatSystem::apply_damage(90.0, -50.0).health, MAX_HEALTH);
    }

    #[test]
    fn heal_clamps_at_max() {
        assert_eq!(CombatSystem::apply_heal(90.0, 30.0), MAX_HEALTH);
        assert_eq!(CombatSystem::apply_heal(40.0, 30.0), 70.0);
    }

    #[test]
    fn debris_field_has_thirty_pieces_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let debris = CombatSystem::generate_debris(&mut rng);
        assert_eq!(debris.len(), 30);
        for piece in &debris {
            assert!((0.1..=0.3).contains(&piece.size));
            assert!(piece.offset.x.abs() <= 0.5 && piece.offset.z.abs() <= 0.5);
            assert!((0.0..=1.8).contains(&piece.offset.y));
            assert!((3.0..=10.0).contains(&piece.velocity.y));
        }
    }

    #[test]
    fn same_seed_same_debris() {
        let a = CombatSystem::generate_debris(&mut ChaCha8Rng::seed_from_u64(11));
        let b = CombatSystem::generate_debris(&mut ChaCha8Rng::seed_from_u64(11));
        assert_eq!(a, b);
    }
}
