//! Sparse block registry keyed by integer coordinate

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sim::math::Vec3;

/// Longest sign text kept after trimming
pub const MAX_SIGN_MESSAGE_CHARS: usize = 120;

/// Block types available to builders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Grass,
    Stone,
    Wood,
    Brick,
    Dirt,
    /// Kills on touch
    Kill,
    /// Hurts on touch
    Damage,
    /// Can be opened; open doors are walk-through
    Door,
    /// Carries a text message
    Sign,
    /// Climbable
    Ladder,
}

/// Largest absolute coordinate a block may have on any axis
pub const WORLD_LIMIT: i32 = 1 << 20;

/// Integer grid coordinate of a block's minimum corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockCoord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Cell containing a world-space point
    pub fn containing(p: Vec3) -> Self {
        Self::new(p.x.floor() as i32, p.y.floor() as i32, p.z.floor() as i32)
    }

    /// Wire key, `"x,y,z"`
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Neighbouring cell; clamps at the edge of the `i32` range
    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.z.saturating_add(dz),
        )
    }

    /// Whether every axis is within [`WORLD_LIMIT`]
    pub fn in_bounds(&self) -> bool {
        [self.x, self.y, self.z]
            .iter()
            .all(|c| (-WORLD_LIMIT..=WORLD_LIMIT).contains(c))
    }

    /// The six face-adjacent cells
    pub fn neighbours(&self) -> [BlockCoord; 6] {
        [
            self.offset(1, 0, 0),
            self.offset(-1, 0, 0),
            self.offset(0, 1, 0),
            self.offset(0, -1, 0),
            self.offset(0, 0, 1),
            self.offset(0, 0, -1),
        ]
    }

    /// World-space centre of the unit cube
    pub fn center(&self) -> Vec3 {
        Vec3::new(self.x as f32 + 0.5, self.y as f32 + 0.5, self.z as f32 + 0.5)
    }

    /// Top face height
    pub fn top(&self) -> f32 {
        self.y as f32 + 1.0
    }
}

impl fmt::Display for BlockCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// Type-specific mutable state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockState {
    Plain,
    Door { is_open: bool },
    Sign { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub block_type: BlockType,
    pub state: BlockState,
}

impl Block {
    pub fn new(block_type: BlockType) -> Self {
        let state = match block_type {
            BlockType::Door => BlockState::Door { is_open: false },
            BlockType::Sign => BlockState::Sign {
                message: String::new(),
            },
            _ => BlockState::Plain,
        };
        Self { block_type, state }
    }

    /// Participates in solid collision
    pub fn is_solid(&self) -> bool {
        !matches!(self.state, BlockState::Door { is_open: true })
    }

    pub fn is_open(&self) -> Option<bool> {
        match self.state {
            BlockState::Door { is_open } => Some(is_open),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match &self.state {
            BlockState::Sign { message } => Some(message),
            _ => None,
        }
    }
}

/// A requested change to a block's mutable state
#[derive(Debug, Clone, PartialEq)]
pub struct BlockPatch {
    /// Type the sender believes the block has
    pub block_type: BlockType,
    pub is_open: Option<bool>,
    pub message: Option<String>,
}

/// The world's block store
#[derive(Debug, Default, Clone)]
pub struct BlockGrid {
    blocks: HashMap<BlockCoord, Block>,
    /// (x, z) -> occupied y values
    columns: HashMap<(i32, i32), BTreeSet<i32>>,
}

impl BlockGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, coord: BlockCoord) -> Option<&Block> {
        self.blocks.get(&coord)
    }

    pub fn contains(&self, coord: BlockCoord) -> bool {
        self.blocks.contains_key(&coord)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BlockCoord, &Block)> {
        self.blocks.iter()
    }

    /// Place a block. Occupied cells are left untouched (first writer wins) and
    /// cells outside [`WORLD_LIMIT`] are refused. Returns whether the block was inserted.
    pub fn place(&mut self, coord: BlockCoord, block_type: BlockType) -> bool {
        if !coord.in_bounds() || self.blocks.contains_key(&coord) {
            return false;
        }
        self.blocks.insert(coord, Block::new(block_type));
        self.columns
            .entry((coord.x, coord.z))
            .or_default()
            .insert(coord.y);
        true
    }

    /// Remove a block, returning it if one was there
    pub fn remove(&mut self, coord: BlockCoord) -> Option<Block> {
        let removed = self.blocks.remove(&coord)?;
        if let Some(column) = self.columns.get_mut(&(coord.x, coord.z)) {
            column.remove(&coord.y);
            if column.is_empty() {
                self.columns.remove(&(coord.x, coord.z));
            }
        }
        Some(removed)
    }

    /// Apply a state patch if the block exists and the patch fits its type.
    /// Returns whether anything was applied.
    pub fn update_state(&mut self, coord: BlockCoord, patch: &BlockPatch) -> bool {
        let Some(block) = self.blocks.get_mut(&coord) else {
            return false;
        };
        if block.block_type != patch.block_type {
            return false;
        }
        match (&mut block.state, patch) {
            (
                BlockState::Door { is_open },
                BlockPatch {
                    is_open: Some(open), ..
                },
            ) => {
                *is_open = *open;
                true
            }
            (
                BlockState::Sign { message },
                BlockPatch {
                    message: Some(text),
                    ..
                },
            ) => {
                *message = sanitize_sign_message(text);
                true
            }
            _ => false,
        }
    }

    pub fn is_solid(&self, coord: BlockCoord) -> bool {
        self.blocks.get(&coord).is_some_and(Block::is_solid)
    }

    /// Every block whose unit cube strictly overlaps the box `[min, max]`
    pub fn blocks_overlapping(&self, min: Vec3, max: Vec3) -> Vec<(BlockCoord, &Block)> {
        let mut found = Vec::new();
        if !(min.is_finite() && max.is_finite()) {
            return found;
        }
        let (x0, x1) = cell_span(min.x, max.x);
        let (y0, y1) = cell_span(min.y, max.y);
        let (z0, z1) = cell_span(min.z, max.z);
        for x in x0..=x1 {
            for z in z0..=z1 {
                let Some(column) = self.columns.get(&(x, z)) else {
                    continue;
                };
                for &y in column.range(y0..=y1) {
                    let coord = BlockCoord::new(x, y, z);
                    if let Some(block) = self.blocks.get(&coord) {
                        found.push((coord, block));
                    }
                }
            }
        }
        found
    }

    /// Solid blocks overlapping the box `[min, max]`
    pub fn solid_overlapping(&self, min: Vec3, max: Vec3) -> Vec<BlockCoord> {
        self.blocks_overlapping(min, max)
            .into_iter()
            .filter(|(_, block)| block.is_solid())
            .map(|(coord, _)| coord)
            .collect()
    }

    /// Solid blocks touched by a sphere
    pub fn solids_touching_sphere(&self, center: Vec3, radius: f32) -> Vec<BlockCoord> {
        let r = Vec3::new(radius, radius, radius);
        self.solid_overlapping(center - r, center + r)
            .into_iter()
            .filter(|coord| {
                let closest = Vec3::new(
                    center.x.clamp(coord.x as f32, coord.x as f32 + 1.0),
                    center.y.clamp(coord.y as f32, coord.y as f32 + 1.0),
                    center.z.clamp(coord.z as f32, coord.z as f32 + 1.0),
                );
                (closest - center).length_squared() <= radius * radius
            })
            .collect()
    }

    /// All doors reachable from `start` through face-adjacent doors, including `start`.
    /// Empty if `start` is not a door.
    pub fn connected_doors(&self, start: BlockCoord) -> Vec<BlockCoord> {
        let is_door = |c: &BlockCoord| {
            self.blocks
                .get(c)
                .is_some_and(|b| b.block_type == BlockType::Door)
        };
        if !is_door(&start) {
            return Vec::new();
        }

        let mut visited: HashSet<BlockCoord> = HashSet::new();
        let mut stack = vec![start];
        let mut group = Vec::new();
        visited.insert(start);

        while let Some(current) = stack.pop() {
            group.push(current);
            for next in current.neighbours() {
                if is_door(&next) && visited.insert(next) {
                    stack.push(next);
                }
            }
        }

        group.sort();
        group
    }

    /// Open or close every door connected to `start`. Returns the doors that were set.
    pub fn set_door_group(&mut self, start: BlockCoord, open: bool) -> Vec<BlockCoord> {
        let group = self.connected_doors(start);
        for coord in &group {
            if let Some(block) = self.blocks.get_mut(coord) {
                block.state = BlockState::Door { is_open: open };
            }
        }
        group
    }

    /// A ladder within one cell horizontally, on the same level as `pos`
    pub fn ladder_near(&self, pos: Vec3) -> bool {
        let cell = BlockCoord::containing(pos);
        (-1..=1).any(|dx| {
            (-1..=1).any(|dz| {
                self.blocks
                    .get(&cell.offset(dx, 0, dz))
                    .is_some_and(|b| b.block_type == BlockType::Ladder)
            })
        })
    }

    /// Highest solid block top in column (x, z) that is at or below `limit`
    pub fn highest_top_at_or_below(&self, x: i32, z: i32, limit: f32) -> Option<f32> {
        let column = self.columns.get(&(x, z))?;
        column
            .iter()
            .rev()
            .map(|&y| BlockCoord::new(x, y, z))
            .filter(|c| c.top() <= limit + 1e-4)
            .find(|c| self.is_solid(*c))
            .map(|c| c.top())
    }

    /// Number of contiguous solid blocks in a column ending at (and including) `top_block`
    pub fn stack_height_below(&self, top_block: BlockCoord) -> i32 {
        let mut height = 0;
        let mut cursor = top_block;
        while self.is_solid(cursor) {
            height += 1;
            cursor = cursor.offset(0, -1, 0);
        }
        height
    }

    /// Number of contiguous solid blocks in a column starting at `base` and going up
    pub fn stack_height_above(&self, base: BlockCoord) -> i32 {
        let mut height = 0;
        let mut cursor = base;
        while self.is_solid(cursor) {
            height += 1;
            cursor = cursor.offset(0, 1, 0);
        }
        height
    }

    /// Height a body at `pos` would rest on: the highest solid top at or
    /// slightly above its feet in the containing column, or the ground plane
    pub fn ground_height(&self, pos: Vec3, step_tolerance: f32) -> f32 {
        let cell = BlockCoord::containing(pos);
        self.highest_top_at_or_below(cell.x, cell.z, pos.y + step_tolerance)
            .unwrap_or(crate::sim::tuning::GROUND_Y)
            .max(crate::sim::tuning::GROUND_Y)
    }
}

/// Inclusive range of cells whose unit interval overlaps `(min, max)`
fn cell_span(min: f32, max: f32) -> (i32, i32) {
    let lo = min.floor() as i32;
    let hi = (max.ceil() as i32 - 1).max(lo);
    (lo, hi)
}

/// Trim and cap sign text
pub fn sanitize_sign_message(text: &str) -> String {
    text.trim().chars().take(MAX_SIGN_MESSAGE_CHARS).collect()
}
