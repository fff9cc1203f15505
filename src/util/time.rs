//! Time utilities for the session simulation

use chrono::{DateTime, Utc};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Server start time for uptime tracking
static SERVER_START: OnceLock<Instant> = OnceLock::new();
static STARTED_AT: OnceLock<DateTime<Utc>> = OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
    STARTED_AT.get_or_init(Utc::now);
}

/// Wall-clock start time, if initialized
pub fn started_at() -> Option<DateTime<Utc>> {
    STARTED_AT.get().copied()
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Simulation tick rate
pub const SIMULATION_TPS: u32 = 10; // 10 ticks per second
pub const TICK_DURATION: Duration = Duration::from_millis(1000 / SIMULATION_TPS as u64);

/// Pause after a failed tick before trying again
pub const TICK_FAILURE_BACKOFF: Duration = Duration::from_secs(1);
