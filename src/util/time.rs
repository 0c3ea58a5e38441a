//! Time utilities for the relay and the client simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::sim::tuning::MAX_FRAME_DELTA;

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Frame delta in seconds, clamped so a stalled frame never steps physics too far
pub fn clamp_frame_delta(dt: f32) -> f32 {
    if dt.is_finite() {
        dt.clamp(0.0, MAX_FRAME_DELTA)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_delta_is_clamped() {
        assert_eq!(clamp_frame_delta(0.016), 0.016);
        assert_eq!(clamp_frame_delta(2.0), MAX_FRAME_DELTA);
        assert_eq!(clamp_frame_delta(-1.0), 0.0);
        assert_eq!(clamp_frame_delta(f32::NAN), 0.0);
    }
}
