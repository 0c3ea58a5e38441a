//! Blockyard - relay server and shared simulation core for a multiplayer
//! voxel sandbox
//!
//! The server keeps the authoritative block grid, player registry and car
//! registry, and relays everything else between clients. Movement, ragdolls,
//! vehicles and melee hit detection run client-side in [`sim`].

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod sim;
pub mod store;
pub mod util;
pub mod world;
pub mod ws;
