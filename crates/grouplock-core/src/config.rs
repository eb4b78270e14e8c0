//! Configuration types for the grouplock system
//!
//! This module defines all configuration structures used throughout the crate.
//! Defaults mirror the knobs the agent has historically run with in
//! production: a 15s name sweep with a 47s debounce, 6-7s jittered spacing
//! between corrections, and a 60-correction burst limit with a 3 minute
//! cooldown.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main grouplock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Remote gateway configuration
    pub gateway: GatewayConfig,

    /// Lock store configuration
    pub store: StoreConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl GuardConfig {
    /// Create a new configuration with defaults
    pub fn new(gateway: GatewayConfig, store: StoreConfig) -> Self {
        Self {
            gateway,
            store,
            engine: EngineConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.gateway.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// Remote gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayConfig {
    /// HTTP bridge gateway
    Http {
        /// Base URL of the normalizing bridge service
        base_url: String,
        /// Bearer token for the bridge
        auth_token: String,
        /// Event poll interval in seconds
        #[serde(default = "default_event_poll_secs")]
        event_poll_secs: u64,
    },

    /// Custom gateway (registered through the adapter registry)
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl GatewayConfig {
    /// Validate the gateway configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            GatewayConfig::Http {
                base_url,
                auth_token,
                event_poll_secs,
            } => {
                if base_url.is_empty() {
                    return Err(crate::Error::config("gateway base URL cannot be empty"));
                }
                if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                    return Err(crate::Error::config(format!(
                        "gateway base URL must be http(s), got: {}",
                        base_url
                    )));
                }
                if auth_token.is_empty() {
                    return Err(crate::Error::config("gateway auth token cannot be empty"));
                }
                if *event_poll_secs == 0 {
                    return Err(crate::Error::config("gateway event poll interval must be > 0"));
                }
                Ok(())
            }
            GatewayConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("custom gateway factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("custom gateway config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Get the gateway type name
    pub fn type_name(&self) -> &str {
        match self {
            GatewayConfig::Http { .. } => "http",
            GatewayConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Lock store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// File-based lock store
    File {
        /// Path to the state file
        path: String,
    },

    /// In-memory lock store (not persistent)
    #[default]
    Memory,

    /// Custom lock store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StoreConfig {
    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::File { .. } => "file",
            StoreConfig::Memory => "memory",
            StoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Period of the group-name drift sweep (seconds)
    #[serde(default = "default_name_check_interval_secs")]
    pub name_check_interval_secs: u64,

    /// How long a name drift must persist before a correction fires (seconds)
    #[serde(default = "default_name_debounce_secs")]
    pub name_debounce_secs: u64,

    /// Lower bound of the jittered delay between corrective actions (ms)
    #[serde(default = "default_nickname_delay_min_ms")]
    pub nickname_delay_min_ms: u64,

    /// Upper bound of the jittered delay between corrective actions (ms)
    #[serde(default = "default_nickname_delay_max_ms")]
    pub nickname_delay_max_ms: u64,

    /// Consecutive corrections on one entity before its cooldown trips
    #[serde(default = "default_correction_burst_limit")]
    pub correction_burst_limit: u32,

    /// Duration of a tripped cooldown (seconds)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Global cap on concurrently in-flight remote mutations
    #[serde(default = "default_max_concurrent_mutations")]
    pub max_concurrent_mutations: usize,

    /// Period of the nickname reconciliation sweep (seconds)
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    /// Period of the anti-idle keepalive signal (seconds)
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// Period of the periodic state backup flush (seconds)
    #[serde(default = "default_backup_interval_secs")]
    pub backup_interval_secs: u64,

    /// Maximum entities examined per name-sweep tick
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,

    /// How long the whole throttle pauses after a rate-limit reply, when
    /// the platform gave no hint of its own (seconds)
    #[serde(default = "default_rate_limit_backoff_secs")]
    pub rate_limit_backoff_secs: u64,

    /// Consecutive permanent fetch failures before an entity is dropped
    /// from the watch set
    #[serde(default = "default_removal_failure_threshold")]
    pub removal_failure_threshold: u32,

    /// Capacity of the internal event channel
    ///
    /// When full, new engine events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_concurrent_mutations == 0 {
            return Err(crate::Error::config("max_concurrent_mutations must be > 0"));
        }
        if self.correction_burst_limit == 0 {
            return Err(crate::Error::config("correction_burst_limit must be > 0"));
        }
        if self.nickname_delay_min_ms > self.nickname_delay_max_ms {
            return Err(crate::Error::config(format!(
                "nickname delay range is inverted: [{}, {}] ms",
                self.nickname_delay_min_ms, self.nickname_delay_max_ms
            )));
        }
        if self.name_check_interval_secs == 0 {
            return Err(crate::Error::config("name_check_interval_secs must be > 0"));
        }
        if self.sweep_batch_size == 0 {
            return Err(crate::Error::config("sweep_batch_size must be > 0"));
        }
        if self.removal_failure_threshold == 0 {
            return Err(crate::Error::config("removal_failure_threshold must be > 0"));
        }
        Ok(())
    }

    pub fn name_check_interval(&self) -> Duration {
        Duration::from_secs(self.name_check_interval_secs)
    }

    pub fn name_debounce(&self) -> Duration {
        Duration::from_secs(self.name_debounce_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup_interval_secs)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name_check_interval_secs: default_name_check_interval_secs(),
            name_debounce_secs: default_name_debounce_secs(),
            nickname_delay_min_ms: default_nickname_delay_min_ms(),
            nickname_delay_max_ms: default_nickname_delay_max_ms(),
            correction_burst_limit: default_correction_burst_limit(),
            cooldown_secs: default_cooldown_secs(),
            max_concurrent_mutations: default_max_concurrent_mutations(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            backup_interval_secs: default_backup_interval_secs(),
            sweep_batch_size: default_sweep_batch_size(),
            rate_limit_backoff_secs: default_rate_limit_backoff_secs(),
            removal_failure_threshold: default_removal_failure_threshold(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_name_check_interval_secs() -> u64 {
    15
}

fn default_name_debounce_secs() -> u64 {
    47
}

fn default_nickname_delay_min_ms() -> u64 {
    6000
}

fn default_nickname_delay_max_ms() -> u64 {
    7000
}

fn default_correction_burst_limit() -> u32 {
    60
}

fn default_cooldown_secs() -> u64 {
    180
}

fn default_max_concurrent_mutations() -> usize {
    3
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_keepalive_interval_secs() -> u64 {
    300
}

fn default_backup_interval_secs() -> u64 {
    600
}

fn default_sweep_batch_size() -> usize {
    20
}

fn default_rate_limit_backoff_secs() -> u64 {
    90
}

fn default_removal_failure_threshold() -> u32 {
    3
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_event_poll_secs() -> u64 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GuardConfig::new(
            GatewayConfig::Http {
                base_url: "https://bridge.example".to_string(),
                auth_token: "token".to_string(),
                event_poll_secs: 2,
            },
            StoreConfig::Memory,
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_delay_range_is_rejected() {
        let mut engine = EngineConfig::default();
        engine.nickname_delay_min_ms = 9000;
        engine.nickname_delay_max_ms = 6000;
        assert!(engine.validate().is_err());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut engine = EngineConfig::default();
        engine.max_concurrent_mutations = 0;
        assert!(engine.validate().is_err());
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let gateway = GatewayConfig::Http {
            base_url: String::new(),
            auth_token: "token".to_string(),
            event_poll_secs: 2,
        };
        assert!(gateway.validate().is_err());
    }
}
