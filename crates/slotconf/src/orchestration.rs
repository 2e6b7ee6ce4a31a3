//! Orchestration tunables - grid sizing, inbox depths and teardown deadlines.
//!
//! The teardown deadlines are deliberately plain numbers: graceful SDK close
//! is raced against `close_timeout_ms`, and pool-wide teardown gives up on
//! stragglers after `teardown_timeout_ms` and force-resets them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Slot count used when no explicit layout is requested.
    /// Default: 4
    #[serde(default = "OrchestrationConfig::default_default_slots")]
    pub default_slots: usize,

    /// Upper bound accepted by `SlotPool::build`.
    /// Default: 64
    #[serde(default = "OrchestrationConfig::default_max_slots")]
    pub max_slots: usize,

    /// How long a single graceful SDK close may take before the handle is
    /// abandoned.
    /// Default: 250
    #[serde(default = "OrchestrationConfig::default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// How long pool-wide teardown waits before force-resetting slots.
    /// Default: 400
    #[serde(default = "OrchestrationConfig::default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,

    /// Requests a slot may have queued before new ones are refused.
    /// Default: 8
    #[serde(default = "OrchestrationConfig::default_inbox_capacity")]
    pub inbox_capacity: usize,

    /// Buffered station events per subscriber.
    /// Default: 256
    #[serde(default = "OrchestrationConfig::default_event_capacity")]
    pub event_capacity: usize,
}

impl OrchestrationConfig {
    fn default_default_slots() -> usize {
        4
    }

    fn default_max_slots() -> usize {
        64
    }

    fn default_close_timeout_ms() -> u64 {
        250
    }

    fn default_teardown_timeout_ms() -> u64 {
        400
    }

    fn default_inbox_capacity() -> usize {
        8
    }

    fn default_event_capacity() -> usize {
        256
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            default_slots: Self::default_default_slots(),
            max_slots: Self::default_max_slots(),
            close_timeout_ms: Self::default_close_timeout_ms(),
            teardown_timeout_ms: Self::default_teardown_timeout_ms(),
            inbox_capacity: Self::default_inbox_capacity(),
            event_capacity: Self::default_event_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations() {
        let config = OrchestrationConfig {
            close_timeout_ms: 50,
            teardown_timeout_ms: 120,
            ..Default::default()
        };
        assert_eq!(config.close_timeout(), Duration::from_millis(50));
        assert_eq!(config.teardown_timeout(), Duration::from_millis(120));
    }

    #[test]
    fn test_serde_fills_missing_fields() {
        let config: OrchestrationConfig = toml::from_str("max_slots = 16").unwrap();
        assert_eq!(config.max_slots, 16);
        assert_eq!(config.default_slots, 4);
        assert_eq!(config.inbox_capacity, 8);
    }
}
