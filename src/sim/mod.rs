//! Client-side simulation core shared by every peer
//!
//! Each client runs these systems locally for its own player and for shadows
//! of everyone else; the relay only forwards results. Everything here is
//! deterministic given the same inputs, seeds and block grid.

pub mod context;
pub mod locomotion;
pub mod math;
pub mod melee;
pub mod ragdoll;
pub mod tuning;
pub mod vehicle;

pub use context::{FrameInput, SimConfig, SimContext};
pub use math::Vec3;
