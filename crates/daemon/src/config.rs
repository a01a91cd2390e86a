//! Configuration management for the notifyd daemon.
//!
//! Configuration is loaded from TOML files in the following locations (in order):
//! 1. `$XDG_CONFIG_HOME/notifyd/config.toml` (via `ProjectDirs`)
//! 2. `~/.config/notifyd/config.toml`
//! 3. `./config.toml` (current directory, for development)

use anyhow::{Context, Result};
use directories::ProjectDirs;
use notifyd_core::{EngineSettings, StackLocation, DEFAULT_TIMEOUT, MAX_NOTIFICATIONS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for notifyd.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Popup placement and timing.
    pub popup: PopupConfig,
    /// Notification sounds.
    pub sound: SoundConfig,
    /// Daemon behavior.
    pub behavior: BehaviorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopupConfig {
    /// Stack corner: `top_left`, `top_right`, `bottom_left` or `bottom_right`.
    #[serde(default = "default_location")]
    pub location: String,

    /// Place stacked popups on the monitor under the pointer.
    #[serde(default = "default_false")]
    pub use_active_monitor: bool,

    /// Monitor used when `use_active_monitor` is off.
    #[serde(default)]
    pub monitor_number: i32,

    /// Timeout for notifications that ask for the server default.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: i64,
}

impl Default for PopupConfig {
    fn default() -> Self {
        Self {
            location: default_location(),
            use_active_monitor: false,
            monitor_number: 0,
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Player invoked as `<command> <file>`.
    #[serde(default = "default_sound_command")]
    pub command: String,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_sound_command(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Exit after a period with nothing on screen.
    #[serde(default = "default_true")]
    pub idle_exit: bool,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            idle_exit: true,
            log_level: default_log_level(),
        }
    }
}

// Default value functions for serde
fn default_location() -> String {
    StackLocation::default().identifier().to_string()
}

fn default_timeout_ms() -> i64 {
    DEFAULT_TIMEOUT.as_millis() as i64
}

fn default_sound_command() -> String {
    "paplay".to_string()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A problem found (and corrected) by [`Config::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub field: &'static str,
    pub message: String,
}

impl Config {
    /// Load configuration from standard locations.
    ///
    /// Returns default config if no file is found.
    pub fn load() -> Result<Self> {
        let paths = config_paths();

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Clamp out-of-range values, returning one warning per correction.
    pub fn validate(&mut self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.popup.monitor_number < 0 {
            warnings.push(ConfigWarning {
                field: "popup.monitor_number",
                message: format!("{} is negative, using 0", self.popup.monitor_number),
            });
            self.popup.monitor_number = 0;
        }

        if self.popup.default_timeout_ms <= 0 {
            warnings.push(ConfigWarning {
                field: "popup.default_timeout_ms",
                message: format!(
                    "{} is not positive, using {}",
                    self.popup.default_timeout_ms,
                    default_timeout_ms()
                ),
            });
            self.popup.default_timeout_ms = default_timeout_ms();
        }

        let location = self.popup.location.trim().to_lowercase();
        if !StackLocation::ALL.iter().any(|l| l.identifier() == location) {
            warnings.push(ConfigWarning {
                field: "popup.location",
                message: format!("unknown location '{}', using {}", self.popup.location, default_location()),
            });
            self.popup.location = default_location();
        }

        if self.sound.enabled && self.sound.command.trim().is_empty() {
            warnings.push(ConfigWarning {
                field: "sound.command",
                message: "empty command, sounds disabled".to_string(),
            });
            self.sound.enabled = false;
        }

        if !matches!(
            self.behavior.log_level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            warnings.push(ConfigWarning {
                field: "behavior.log_level",
                message: format!("unknown level '{}', using info", self.behavior.log_level),
            });
            self.behavior.log_level = default_log_level();
        }

        warnings
    }

    /// Engine preferences derived from this config.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            location: StackLocation::from_identifier(&self.popup.location.trim().to_lowercase()),
            use_active_monitor: self.popup.use_active_monitor,
            monitor_number: usize::try_from(self.popup.monitor_number).unwrap_or(0),
            sound_enabled: self.sound.enabled,
            default_timeout: u64::try_from(self.popup.default_timeout_ms)
                .ok()
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_TIMEOUT),
            max_notifications: MAX_NOTIFICATIONS,
        }
    }
}

/// Get all possible config file paths in priority order.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. Platform standard: $XDG_CONFIG_HOME/notifyd/config.toml
    if let Some(proj_dirs) = ProjectDirs::from("org", "notifyd", "notifyd") {
        paths.push(proj_dirs.config_dir().join("config.toml"));
    }

    // 2. ~/.config/notifyd/config.toml, for when XDG_CONFIG_HOME points elsewhere
    if let Some(home) = dirs_home() {
        let path = home.join(".config").join("notifyd").join("config.toml");
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    // 3. Current directory: ./config.toml
    paths.push(PathBuf::from("config.toml"));

    paths
}

/// Get the user's home directory.
fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.popup.location, "bottom_right");
        assert!(!config.popup.use_active_monitor);
        assert_eq!(config.popup.monitor_number, 0);
        assert_eq!(config.popup.default_timeout_ms, 7000);
        assert!(config.sound.enabled);
        assert_eq!(config.sound.command, "paplay");
        assert!(config.behavior.idle_exit);
        assert_eq!(config.behavior.log_level, "info");
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.popup.location, config.popup.location);
        assert_eq!(parsed.sound.command, config.sound.command);
    }

    #[test]
    fn test_config_partial_parse() {
        // Config with only some fields should use defaults for the rest
        let toml_str = r#"
            [popup]
            location = "top_left"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.popup.location, "top_left");
        assert_eq!(config.popup.default_timeout_ms, 7000); // default
        assert!(config.sound.enabled); // default
    }

    #[test]
    fn test_engine_settings() {
        let toml_str = r#"
            [popup]
            location = "top_right"
            use_active_monitor = true
            monitor_number = 2
            default_timeout_ms = 3000

            [sound]
            enabled = false
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let settings = config.engine_settings();
        assert_eq!(settings.location, StackLocation::TopRight);
        assert!(settings.use_active_monitor);
        assert_eq!(settings.monitor_number, 2);
        assert_eq!(settings.default_timeout, Duration::from_millis(3000));
        assert!(!settings.sound_enabled);
        assert_eq!(settings.max_notifications, MAX_NOTIFICATIONS);
    }

    #[test]
    fn test_validate_clamps() {
        let mut config = Config::default();
        config.popup.monitor_number = -1;
        config.popup.default_timeout_ms = 0;
        config.popup.location = "middle".to_string();
        config.behavior.log_level = "loud".to_string();

        let warnings = config.validate();
        let fields: Vec<&str> = warnings.iter().map(|w| w.field).collect();
        assert_eq!(
            fields,
            vec![
                "popup.monitor_number",
                "popup.default_timeout_ms",
                "popup.location",
                "behavior.log_level"
            ]
        );
        assert_eq!(config.popup.monitor_number, 0);
        assert_eq!(config.popup.default_timeout_ms, 7000);
        assert_eq!(config.popup.location, "bottom_right");
        assert_eq!(config.behavior.log_level, "info");
    }

    #[test]
    fn test_validate_default_is_clean() {
        let mut config = Config::default();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_empty_sound_command_disables_sound() {
        let mut config = Config::default();
        config.sound.command = "  ".to_string();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(!config.sound.enabled);
    }

    #[test]
    fn test_load_from_path() {
        let path = std::env::temp_dir().join(format!("notifyd-config-{}.toml", std::process::id()));
        fs::write(&path, "[behavior]\nidle_exit = false\n").unwrap();
        let config = Config::load_from_path(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(!config.behavior.idle_exit);
    }

    #[test]
    fn test_load_from_missing_path_fails() {
        let path = PathBuf::from("/nonexistent/notifyd/config.toml");
        let err = Config::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_config_paths_not_empty() {
        let paths = config_paths();
        assert!(!paths.is_empty());
        assert_eq!(paths.last(), Some(&PathBuf::from("config.toml")));
    }
}
