//! Cooldown-gated damage from kill and damage blocks

use std::collections::HashMap;

use super::grid::{BlockCoord, BlockType};
use crate::sim::tuning::{
    DAMAGE_BLOCK_COOLDOWN_MS, DAMAGE_BLOCK_DAMAGE, KILL_BLOCK_COOLDOWN_MS, KILL_BLOCK_DAMAGE,
};

/// Spacing between sweeps of expired cooldown entries
const PRUNE_INTERVAL_MS: u64 = 1_000;

/// Hazard behaviour of a block type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hazard {
    pub damage: f32,
    pub cooldown_ms: u64,
}

impl Hazard {
    pub fn for_type(block_type: BlockType) -> Option<Self> {
        match block_type {
            BlockType::Kill => Some(Self {
                damage: KILL_BLOCK_DAMAGE,
                cooldown_ms: KILL_BLOCK_COOLDOWN_MS,
            }),
            BlockType::Damage => Some(Self {
                damage: DAMAGE_BLOCK_DAMAGE,
                cooldown_ms: DAMAGE_BLOCK_COOLDOWN_MS,
            }),
            _ => None,
        }
    }
}

/// Last trigger time per hazard block
#[derive(Debug, Default, Clone)]
pub struct HazardCooldowns {
    last_trigger: HashMap<BlockCoord, u64>,
    next_prune_ms: u64,
}

impl HazardCooldowns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Damage to apply for touching `coord` at `now_ms`, or `None` while the
    /// block's cooldown is still running or the block is not a hazard
    pub fn try_trigger(&mut self, coord: BlockCoord, block_type: BlockType, now_ms: u64) -> Option<f32> {
        let hazard = Hazard::for_type(block_type)?;
        if let Some(&last) = self.last_trigger.get(&coord) {
            if now_ms.saturating_sub(last) < hazard.cooldown_ms {
                return None;
            }
        }
        self.last_trigger.insert(coord, now_ms);
        Some(hazard.damage)
    }

    /// Drop expired entries, at most once per [`PRUNE_INTERVAL_MS`]. Called every frame.
    pub fn maintain(&mut self, now_ms: u64) {
        if now_ms < self.next_prune_ms {
            return;
        }
        self.next_prune_ms = now_ms + PRUNE_INTERVAL_MS;
        // Kill blocks have the longest cooldown
        self.last_trigger
            .retain(|_, last| now_ms.saturating_sub(*last) < KILL_BLOCK_COOLDOWN_MS);
    }

    pub fn len(&self) -> usize {
        self.last_trigger.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_trigger.is_empty()
    }

    pub fn clear(&mut self) {
        self.last_trigger.clear();
        self.next_prune_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damage_block_fires_once_per_second() {
        let mut cooldowns = HazardCooldowns::new();
        let c = BlockCoord::new(0, 0, 0);
        assert_eq!(cooldowns.try_trigger(c, BlockType::Damage, 0), Some(DAMAGE_BLOCK_DAMAGE));
        assert_eq!(cooldowns.try_trigger(c, BlockType::Damage, 16), None);
        assert_eq!(cooldowns.try_trigger(c, BlockType::Damage, 999), None);
        assert!(cooldowns.try_trigger(c, BlockType::Damage, 1000).is_some());
    }

    #[test]
    fn kill_block_cooldown_is_two_seconds() {
        let mut cooldowns = HazardCooldowns::new();
        let c = BlockCoord::new(4, 0, 4);
        assert_eq!(cooldowns.try_trigger(c, BlockType::Kill, 10), Some(KILL_BLOCK_DAMAGE));
        assert_eq!(cooldowns.try_trigger(c, BlockType::Kill, 1500), None);
        assert!(cooldowns.try_trigger(c, BlockType::Kill, 2010).is_some());
    }

    #[test]
    fn cooldowns_are_per_block() {
        let mut cooldowns = HazardCooldowns::new();
        assert!(cooldowns.try_trigger(BlockCoord::new(0, 0, 0), BlockType::Damage, 0).is_some());
        assert!(cooldowns.try_trigger(BlockCoord::new(1, 0, 0), BlockType::Damage, 0).is_some());
    }

    #[test]
    fn expired_entries_are_swept() {
        let mut cooldowns = HazardCooldowns::new();
        let c = BlockCoord::new(2, 0, 2);
        assert!(cooldowns.try_trigger(c, BlockType::Kill, 0).is_some());
        cooldowns.maintain(500);
        assert_eq!(cooldowns.len(), 1);
        // Still cooling down, so the sweep keeps it
        cooldowns.maintain(1_600);
        assert_eq!(cooldowns.try_trigger(c, BlockType::Kill, 1_700), None);

        cooldowns.maintain(2_600);
        assert!(cooldowns.is_empty());
        assert!(cooldowns.try_trigger(c, BlockType::Kill, 2_700).is_some());
    }

    #[test]
    fn sweeps_are_spaced_out() {
        let mut cooldowns = HazardCooldowns::new();
        assert!(cooldowns.try_trigger(BlockCoord::new(0, 0, 0), BlockType::Kill, 0).is_some());
        cooldowns.maintain(1_500);
        // Expired, but the next sweep is not due before 2500
        cooldowns.maintain(2_200);
        assert_eq!(cooldowns.len(), 1);
        cooldowns.maintain(2_500);
        assert!(cooldowns.is_empty());
    }

    #[test]
    fn plain_blocks_never_trigger() {
        let mut cooldowns = HazardCooldowns::new();
        assert!(cooldowns.try_trigger(BlockCoord::new(0, 0, 0), BlockType::Stone, 0).is_none());
    }
}
