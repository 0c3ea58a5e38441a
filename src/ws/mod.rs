//! WebSocket transport: wire protocol and session handler

pub mod handler;
pub mod protocol;
