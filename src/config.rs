//! Configuration for all mesh components.
//!
//! Every tunable defaults to the values the protocol was designed around, so
//! `MeshConfig::default()` is a fully working configuration. A TOML file can
//! override any subset of fields.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MeshError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub bus: BusConfig,
    pub knowledge: KnowledgeConfig,
    pub session: SessionConfig,
    pub registry: RegistryConfig,
    pub graph: GraphConfig,
}

impl MeshConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content =
            toml::to_string_pretty(self).map_err(|e| MeshError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration values, collecting every problem at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.bus.max_queue_size == 0 {
            errors.push("bus.max_queue_size must be greater than 0");
        }
        if self.bus.sweep_interval_secs == 0 {
            errors.push("bus.sweep_interval_secs must be greater than 0");
        }
        if self.bus.history_limit == 0 {
            errors.push("bus.history_limit must be greater than 0");
        }
        if self.knowledge.retention_days == 0 {
            errors.push("knowledge.retention_days must be greater than 0");
        }
        if self.session.timeout_secs == 0 {
            errors.push("session.timeout_secs must be greater than 0");
        }
        if self.session.sweep_interval_secs == 0 {
            errors.push("session.sweep_interval_secs must be greater than 0");
        }
        if self.registry.sync_interval_secs == 0 {
            errors.push("registry.sync_interval_secs must be greater than 0");
        }
        if self.graph.batch_size == 0 {
            errors.push("graph.batch_size must be greater than 0");
        }
        if self.graph.propagation_interval_secs == 0 {
            errors.push("graph.propagation_interval_secs must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MeshError::Config(errors.join("; ")))
        }
    }
}

/// Message bus tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-agent mailbox bound; oldest messages are dropped beyond this.
    pub max_queue_size: usize,
    /// Bounded send-history length.
    pub history_limit: usize,
    /// Interval for the expired-ack / queue-trim sweep.
    pub sweep_interval_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            history_limit: 1000,
            sweep_interval_secs: 5,
        }
    }
}

impl BusConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Items untouched for this long become eviction candidates.
    pub retention_days: i64,
    /// Items accessed at least this often are retained regardless of age.
    pub min_access_count: u32,
    /// Interval for the retention sweep.
    pub sweep_interval_secs: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            min_access_count: 5,
            sweep_interval_secs: 3600,
        }
    }
}

impl KnowledgeConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Active sessions older than this are force-ended.
    pub timeout_secs: i64,
    /// Interval for the stale-session sweep.
    pub sweep_interval_secs: u64,
    /// Bounded session-history length.
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 7200,
            sweep_interval_secs: 60,
            history_limit: 500,
        }
    }
}

impl SessionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Interval between periodic sync passes (Periodic and Smart strategies).
    pub sync_interval_secs: u64,
    /// Smart sync only re-shares branches updated within this window.
    pub activity_window_secs: i64,
    /// Bounded sync-event history length.
    pub history_limit: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 300,
            activity_window_secs: 300,
            history_limit: 1000,
        }
    }
}

impl RegistryConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Maximum queued changes processed per propagation tick.
    pub batch_size: usize,
    /// Interval between propagation ticks.
    pub propagation_interval_secs: u64,
    /// Interval between full graph rebuilds.
    pub rebuild_interval_secs: u64,
    /// Whether critical changes propagate synchronously from `track_change`.
    pub auto_propagate: bool,
    /// Bounded change-history length.
    pub history_limit: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            propagation_interval_secs: 5,
            rebuild_interval_secs: 3600,
            auto_propagate: true,
            history_limit: 1000,
        }
    }
}

impl GraphConfig {
    pub fn propagation_interval(&self) -> Duration {
        Duration::from_secs(self.propagation_interval_secs)
    }

    pub fn rebuild_interval(&self) -> Duration {
        Duration::from_secs(self.rebuild_interval_secs)
    }
}
