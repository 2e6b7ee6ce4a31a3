//! Configuration loading for the slotwatch viewing station.
//!
//! Kept dependency-light so every slotwatch crate can import it.
//!
//! # Configuration Philosophy
//!
//! - **Infrastructure** (`InfraConfig`): fixed for the process lifetime -
//!   log filter and the display area the grid is laid out in.
//! - **Orchestration** (`OrchestrationConfig`): tunables of the session layer -
//!   slot limits, inbox depth and the bounded-teardown deadlines.
//!
//! # Usage
//!
//! ```rust,no_run
//! use slotconf::SlotwatchConfig;
//!
//! let config = SlotwatchConfig::load().expect("Failed to load config");
//! println!("close timeout: {:?}", config.orchestration.close_timeout());
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/slotwatch/config.toml` (system)
//! 2. `~/.config/slotwatch/config.toml` (user)
//! 3. `./slotwatch.toml` (local override, or the `--config` path)
//! 4. Environment variables (`SLOTWATCH_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [telemetry]
//! log_level = "info,slotwatch=debug"
//!
//! [display]
//! width = 1920
//! height = 1080
//!
//! [orchestration]
//! default_slots = 4
//! max_slots = 64
//! close_timeout_ms = 250
//! teardown_timeout_ms = 400
//! inbox_capacity = 8
//! event_capacity = 256
//! ```

pub mod infra;
pub mod loader;
pub mod orchestration;

pub use infra::{DisplayConfig, InfraConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use orchestration::OrchestrationConfig;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete slotwatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SlotwatchConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(default)]
    pub orchestration: OrchestrationConfig,
}

impl SlotwatchConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with a specific file taking the place of the local
    /// override, then apply env overrides.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = SlotwatchConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# slotwatch configuration\n\n");

        output.push_str("[telemetry]\n");
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.infra.telemetry.log_level
        ));

        output.push_str("\n[display]\n");
        output.push_str(&format!("width = {}\n", self.infra.display.width));
        output.push_str(&format!("height = {}\n", self.infra.display.height));

        let orch = &self.orchestration;
        output.push_str("\n[orchestration]\n");
        output.push_str(&format!("default_slots = {}\n", orch.default_slots));
        output.push_str(&format!("max_slots = {}\n", orch.max_slots));
        output.push_str(&format!("close_timeout_ms = {}\n", orch.close_timeout_ms));
        output.push_str(&format!("teardown_timeout_ms = {}\n", orch.teardown_timeout_ms));
        output.push_str(&format!("inbox_capacity = {}\n", orch.inbox_capacity));
        output.push_str(&format!("event_capacity = {}\n", orch.event_capacity));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SlotwatchConfig::default();
        assert_eq!(config.orchestration.default_slots, 4);
        assert_eq!(config.infra.telemetry.log_level, "info");
    }

    #[test]
    fn test_to_toml_roundtrips_through_parser() {
        let mut config = SlotwatchConfig::default();
        config.orchestration.max_slots = 25;
        config.infra.display.height = 720;

        let rendered = config.to_toml();
        assert!(rendered.contains("[orchestration]"));

        let parsed: SlotwatchConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.orchestration.max_slots, 25);
        assert_eq!(parsed.infra.display.height, 720);
    }

    #[test]
    fn test_cli_path_is_loaded_last() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[orchestration]\nteardown_timeout_ms = 777").unwrap();

        let (config, sources) = SlotwatchConfig::load_with_sources_from(Some(file.path())).unwrap();
        assert_eq!(sources.files.last().map(|p| p.as_path()), Some(file.path()));
        if !sources.env_overrides.iter().any(|k| k == "SLOTWATCH_TEARDOWN_TIMEOUT_MS") {
            assert_eq!(config.orchestration.teardown_timeout_ms, 777);
        }
    }
}
