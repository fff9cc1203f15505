//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS ("*" for any)
    pub client_origin: String,
    /// Shared secret for the admin routes (open when unset)
    pub admin_token: Option<String>,

    /// Registry and connection rules
    pub session: SessionConfig,
    /// Simulated population tuning
    pub simulation: SimulationConfig,
}

/// Rules for one game session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Participants required before the session may start
    pub min_players: usize,
    /// Human cap, `None` for unlimited
    pub max_players: Option<usize>,
    /// How long a dropped connection may take to come back
    pub grace_period: Duration,
    /// Seed for the session RNG (random when unset)
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            max_players: Some(16),
            grace_period: Duration::from_millis(5000),
            seed: None,
        }
    }
}

/// Tuning for simulated participants, adjustable at runtime
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Population created on the first human connection
    pub bot_count: usize,
    /// Whether simulated participants may draw light trails
    pub enable_light_trails: bool,
    /// Id prefix for simulated participants
    pub prefix: String,
    /// Multiplier applied to each participant's base speed
    pub speed_multiplier: f64,
    /// Per-update chance of an unscheduled small turn
    pub turn_probability: f64,
    /// Minimum time between applied motion updates
    pub update_interval_ms: u64,
    /// Activation stagger between consecutive participants
    pub spawn_interval_secs: f64,
    /// Upper bound on participants carrying trails
    pub max_trail_bots: usize,
    /// Activations allowed within one second before postponing
    pub max_concurrent_spawns: usize,
}

/// Largest accepted activation stagger between consecutive participants
pub const MAX_SPAWN_INTERVAL_SECS: f64 = 300.0;

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            bot_count: 0,
            enable_light_trails: true,
            prefix: "bot_".to_string(),
            speed_multiplier: 1.0,
            turn_probability: 0.01,
            update_interval_ms: 100,
            spawn_interval_secs: 5.0,
            max_trail_bots: 2,
            max_concurrent_spawns: 3,
        }
    }
}

impl SimulationConfig {
    /// Throttle interval as a duration
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Apply partial overrides, rejecting values the motion engine can't use.
    /// Nothing is changed when any override is invalid.
    pub fn apply(&mut self, overrides: &TuningOverrides) -> Result<(), TuningError> {
        let mut next = self.clone();

        if let Some(prefix) = &overrides.prefix {
            if prefix.is_empty() {
                return Err(TuningError::Invalid("prefix"));
            }
            next.prefix = prefix.clone();
        }
        if let Some(multiplier) = overrides.speed_multiplier {
            if !multiplier.is_finite() || multiplier <= 0.0 {
                return Err(TuningError::Invalid("speed_multiplier"));
            }
            next.speed_multiplier = multiplier;
        }
        if let Some(probability) = overrides.turn_probability {
            if !(0.0..=1.0).contains(&probability) {
                return Err(TuningError::Invalid("turn_probability"));
            }
            next.turn_probability = probability;
        }
        if let Some(interval) = overrides.update_interval_ms {
            if interval == 0 {
                return Err(TuningError::Invalid("update_interval_ms"));
            }
            next.update_interval_ms = interval;
        }
        if let Some(spawn_interval) = overrides.spawn_interval_secs {
            if !(0.0..=MAX_SPAWN_INTERVAL_SECS).contains(&spawn_interval) {
                return Err(TuningError::Invalid("spawn_interval_secs"));
            }
            next.spawn_interval_secs = spawn_interval;
        }
        if let Some(max_trails) = overrides.max_trail_bots {
            next.max_trail_bots = max_trails;
        }
        if let Some(max_spawns) = overrides.max_concurrent_spawns {
            if max_spawns == 0 {
                return Err(TuningError::Invalid("max_concurrent_spawns"));
            }
            next.max_concurrent_spawns = max_spawns;
        }

        *self = next;
        Ok(())
    }
}

/// Partial tuning update, every field optional
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TuningOverrides {
    pub prefix: Option<String>,
    pub speed_multiplier: Option<f64>,
    pub turn_probability: Option<f64>,
    pub update_interval_ms: Option<u64>,
    pub spawn_interval_secs: Option<f64>,
    pub max_trail_bots: Option<usize>,
    pub max_concurrent_spawns: Option<usize>,
}

/// Rejected tuning value
#[derive(Debug, thiserror::Error)]
pub enum TuningError {
    #[error("Invalid value for tuning parameter: {0}")]
    Invalid(&'static str),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string())
        };

        let session_defaults = SessionConfig::default();
        let simulation_defaults = SimulationConfig::default();

        let max_players: usize = parse_var("MAX_PLAYERS", 16)?;
        let grace_ms: u64 = parse_var(
            "RECONNECT_GRACE_MS",
            session_defaults.grace_period.as_millis() as u64,
        )?;
        let seed = match env::var("SIM_SEED") {
            Ok(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid("SIM_SEED"))?),
            Err(_) => None,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            admin_token: env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),

            session: SessionConfig {
                min_players: parse_var("MIN_PLAYERS", session_defaults.min_players)?,
                max_players: (max_players > 0).then_some(max_players),
                grace_period: Duration::from_millis(grace_ms),
                seed,
            },
            simulation: SimulationConfig {
                bot_count: parse_var("BOT_COUNT", simulation_defaults.bot_count)?,
                enable_light_trails: parse_var(
                    "ENABLE_BOT_LIGHT_TRAILS",
                    simulation_defaults.enable_light_trails,
                )?,
                ..simulation_defaults
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            log_level: "info".to_string(),
            client_origin: "*".to_string(),
            admin_token: None,
            session: SessionConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

/// Parse an optional environment variable, using `default` when unset
fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_overrides() {
        let mut config = SimulationConfig::default();
        let overrides = TuningOverrides {
            speed_multiplier: Some(2.5),
            turn_probability: Some(0.2),
            ..Default::default()
        };

        config.apply(&overrides).unwrap();

        assert_eq!(config.speed_multiplier, 2.5);
        assert_eq!(config.turn_probability, 0.2);
        assert_eq!(config.update_interval_ms, 100);
    }

    #[test]
    fn test_invalid_override_leaves_config_untouched() {
        let mut config = SimulationConfig::default();
        let overrides = TuningOverrides {
            speed_multiplier: Some(3.0),
            turn_probability: Some(1.5),
            ..Default::default()
        };

        let result = config.apply(&overrides);

        assert!(matches!(result, Err(TuningError::Invalid("turn_probability"))));
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn test_zero_update_interval_rejected() {
        let mut config = SimulationConfig::default();
        let overrides = TuningOverrides {
            update_interval_ms: Some(0),
            ..Default::default()
        };

        assert!(config.apply(&overrides).is_err());
    }

    #[test]
    fn test_spawn_interval_bounded() {
        let mut config = SimulationConfig::default();

        for bad in [1e19, f64::INFINITY, f64::NAN, -1.0] {
            let overrides = TuningOverrides {
                spawn_interval_secs: Some(bad),
                ..Default::default()
            };
            assert!(matches!(
                config.apply(&overrides),
                Err(TuningError::Invalid("spawn_interval_secs"))
            ));
        }

        let overrides = TuningOverrides {
            spawn_interval_secs: Some(MAX_SPAWN_INTERVAL_SECS),
            ..Default::default()
        };
        config.apply(&overrides).unwrap();
        assert_eq!(config.spawn_interval_secs, MAX_SPAWN_INTERVAL_SECS);
    }
}
