//! Config file discovery, loading, and environment variable overlay.

use crate::infra::{DisplayConfig, TelemetryConfig};
use crate::{ConfigError, InfraConfig, OrchestrationConfig, SlotwatchConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in load order (system, user, local), keeping only
/// files that exist.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/slotwatch/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("slotwatch/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        let path = expand_path(&path.to_string_lossy());
        if path.exists() {
            files.push(path);
            return files;
        }
    }

    let local = PathBuf::from("slotwatch.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<SlotwatchConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from a TOML string. Missing sections and keys take defaults.
pub(crate) fn parse_toml(contents: &str, path: &Path) -> Result<SlotwatchConfig, ConfigError> {
    toml::from_str(contents).map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn pick<T: PartialEq>(base: T, overlay: T, default: T) -> T {
    if overlay != default {
        overlay
    } else {
        base
    }
}

/// Merge two configs, with `overlay` taking precedence.
///
/// A field in `overlay` wins only when it differs from the compiled default,
/// so a later file that omits a key does not reset an earlier file's value.
pub fn merge_configs(base: SlotwatchConfig, overlay: SlotwatchConfig) -> SlotwatchConfig {
    let telemetry = TelemetryConfig::default();
    let display = DisplayConfig::default();
    let orch = OrchestrationConfig::default();

    SlotwatchConfig {
        infra: InfraConfig {
            telemetry: TelemetryConfig {
                log_level: pick(
                    base.infra.telemetry.log_level,
                    overlay.infra.telemetry.log_level,
                    telemetry.log_level,
                ),
            },
            display: DisplayConfig {
                width: pick(base.infra.display.width, overlay.infra.display.width, display.width),
                height: pick(
                    base.infra.display.height,
                    overlay.infra.display.height,
                    display.height,
                ),
            },
        },
        orchestration: OrchestrationConfig {
            default_slots: pick(
                base.orchestration.default_slots,
                overlay.orchestration.default_slots,
                orch.default_slots,
            ),
            max_slots: pick(
                base.orchestration.max_slots,
                overlay.orchestration.max_slots,
                orch.max_slots,
            ),
            close_timeout_ms: pick(
                base.orchestration.close_timeout_ms,
                overlay.orchestration.close_timeout_ms,
                orch.close_timeout_ms,
            ),
            teardown_timeout_ms: pick(
                base.orchestration.teardown_timeout_ms,
                overlay.orchestration.teardown_timeout_ms,
                orch.teardown_timeout_ms,
            ),
            inbox_capacity: pick(
                base.orchestration.inbox_capacity,
                overlay.orchestration.inbox_capacity,
                orch.inbox_capacity,
            ),
            event_capacity: pick(
                base.orchestration.event_capacity,
                overlay.orchestration.event_capacity,
                orch.event_capacity,
            ),
        },
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut SlotwatchConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Unparseable numeric values are ignored rather than treated as errors.
pub fn apply_overrides_from<F>(config: &mut SlotwatchConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("SLOTWATCH_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("SLOTWATCH_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Some(v) = lookup("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    fn numeric<T: std::str::FromStr>(
        key: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
        sources: &mut ConfigSources,
        target: &mut T,
    ) {
        if let Some(parsed) = lookup(key).and_then(|v| v.trim().parse().ok()) {
            *target = parsed;
            sources.env_overrides.push(key.to_string());
        }
    }

    let lookup: &dyn Fn(&str) -> Option<String> = &lookup;
    numeric("SLOTWATCH_DISPLAY_WIDTH", lookup, sources, &mut config.infra.display.width);
    numeric("SLOTWATCH_DISPLAY_HEIGHT", lookup, sources, &mut config.infra.display.height);

    let orch = &mut config.orchestration;
    numeric("SLOTWATCH_DEFAULT_SLOTS", lookup, sources, &mut orch.default_slots);
    numeric("SLOTWATCH_MAX_SLOTS", lookup, sources, &mut orch.max_slots);
    numeric("SLOTWATCH_CLOSE_TIMEOUT_MS", lookup, sources, &mut orch.close_timeout_ms);
    numeric("SLOTWATCH_TEARDOWN_TIMEOUT_MS", lookup, sources, &mut orch.teardown_timeout_ms);
    numeric("SLOTWATCH_INBOX_CAPACITY", lookup, sources, &mut orch.inbox_capacity);
    numeric("SLOTWATCH_EVENT_CAPACITY", lookup, sources, &mut orch.event_capacity);
}

/// Expand `~/` and a leading `$VAR/` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                return PathBuf::from(var_value).join(&stripped[slash_pos + 1..]);
            }
        } else if let Ok(var_value) = env::var(stripped) {
            return PathBuf::from(var_value);
        }
    }

    PathBuf::from(path)
}
