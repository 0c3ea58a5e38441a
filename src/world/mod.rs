//! Voxel world storage

pub mod grid;
pub mod hazards;

pub use grid::{Block, BlockCoord, BlockGrid, BlockPatch, BlockState, BlockType};
pub use hazards::HazardCooldowns;
