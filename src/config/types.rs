//! Engine settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rules::GoverningPolicy;

/// Routing engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound for any single rule store call, in seconds
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,

    /// How long a routed connection waits for host key verification
    #[serde(default = "default_connection_idle_secs")]
    pub connection_idle_secs: u64,

    /// Expiry sweep period, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Which rule document governs a session
    #[serde(default)]
    pub governing: GoverningPolicy,
}

fn default_store_timeout_secs() -> u64 {
    10
}

fn default_connection_idle_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    600
}

impl EngineConfig {
    pub fn store_timeout(&self) -> Duration {
        // Zero would fail every store call before it starts
        Duration::from_secs(self.store_timeout_secs.max(1))
    }

    pub fn connection_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_idle_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        // tokio intervals panic on zero
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout_secs: default_store_timeout_secs(),
            connection_idle_secs: default_connection_idle_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            governing: GoverningPolicy::default(),
        }
    }
}
