//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};

/// Telemetry and logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Size of the display area the slot grid is laid out in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Display area width in pixels.
    /// Default: 1920
    #[serde(default = "DisplayConfig::default_width")]
    pub width: u32,

    /// Display area height in pixels.
    /// Default: 1080
    #[serde(default = "DisplayConfig::default_height")]
    pub height: u32,
}

impl DisplayConfig {
    fn default_width() -> u32 {
        1920
    }

    fn default_height() -> u32 {
        1080
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: Self::default_width(),
            height: Self::default_height(),
        }
    }
}

/// Infrastructure configuration container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub display: DisplayConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_defaults() {
        let display = DisplayConfig::default();
        assert_eq!(display.width, 1920);
        assert_eq!(display.height, 1080);
    }

    #[test]
    fn test_partial_telemetry_section() {
        let telemetry: TelemetryConfig = toml::from_str("").unwrap();
        assert_eq!(telemetry.log_level, "info");
    }
}
