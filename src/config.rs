//! Engine configuration and its on-disk form.
//!
//! The engine itself only ever reads an [`EngineConfig`] snapshot; loading,
//! saving and command-line overrides live here so the pipeline stays free
//! of filesystem concerns.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EngineError;

/// Runtime configuration snapshot consumed by the scroll engine.
///
/// Re-read on every motion sample, so changes through
/// [`EngineSession::set_config`](crate::session::EngineSession::set_config)
/// take effect without restarting the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Scales every accumulated scroll delta. Must be > 0.
    pub scroll_speed_multiplier: f64,
    /// Speed-proportional acceleration gain. 0 disables acceleration
    /// (linear passthrough). Must be >= 0.
    pub scroll_acceleration: f64,
    /// Flips the vertical scroll direction.
    pub natural_scrolling: bool,
    /// Flips the horizontal axis.
    pub invert_x: bool,
    /// Flips the vertical axis (applied before natural scrolling).
    pub invert_y: bool,
    /// Maximum press-time distance between left and right for the chord
    /// to register, boundary inclusive.
    pub chord_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scroll_speed_multiplier: 1.0,
            scroll_acceleration: 1.0,
            natural_scrolling: true,
            invert_x: false,
            invert_y: false,
            chord_window: Duration::from_millis(300),
        }
    }
}

impl EngineConfig {
    /// Check value ranges. Called by the session before start and on every
    /// hot reload.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.scroll_speed_multiplier > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "scroll_speed_multiplier must be > 0 (got {})",
                self.scroll_speed_multiplier
            )));
        }
        if !(self.scroll_acceleration >= 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "scroll_acceleration must be >= 0 (got {})",
                self.scroll_acceleration
            )));
        }
        if self.chord_window.is_zero() {
            return Err(EngineError::InvalidConfig(
                "chord_window must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Persisted application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_scroll_speed")]
    pub scroll_speed: f64,

    #[serde(default = "default_acceleration")]
    pub acceleration: f64,

    #[serde(default = "default_natural_scrolling")]
    pub natural_scrolling: bool,

    #[serde(default)]
    pub invert_x: bool,

    #[serde(default)]
    pub invert_y: bool,

    /// Chord window in milliseconds.
    #[serde(default = "default_chord_window_ms")]
    pub chord_window_ms: u64,

    /// Extra vendor IDs to match in addition to the built-in presets.
    #[serde(default)]
    pub extra_vendor_ids: Vec<u16>,
}

fn default_scroll_speed() -> f64 {
    1.0
}

fn default_acceleration() -> f64 {
    1.0
}

fn default_natural_scrolling() -> bool {
    true
}

fn default_chord_window_ms() -> u64 {
    300
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            scroll_speed: 1.0,
            acceleration: 1.0,
            natural_scrolling: true,
            invert_x: false,
            invert_y: false,
            chord_window_ms: 300,
            extra_vendor_ids: Vec::new(),
        }
    }
}

impl AppSettings {
    /// Get the settings file path
    fn settings_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("midscroll");

        fs::create_dir_all(&config_dir)?;
        Ok(config_dir.join("settings.toml"))
    }

    /// Load settings from file (or create defaults)
    pub fn load() -> Result<Self> {
        let path = Self::settings_path()?;

        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let settings: AppSettings = toml::from_str(&content)?;
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            info!("No settings file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save settings to file
    pub fn save(&self) -> Result<()> {
        let path = Self::settings_path()?;
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Apply command-line overrides of the form `--flag value`.
    ///
    /// Unknown flags are ignored so the binary can grow options without
    /// breaking older launcher scripts.
    pub fn apply_cli_overrides(&mut self, args: &[String]) {
        let mut iter = args.iter().peekable();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--scroll-speed" => {
                    if let Some(v) = iter.peek().and_then(|s| s.parse::<f64>().ok()) {
                        self.scroll_speed = v;
                        iter.next();
                    }
                }
                "--acceleration" => {
                    if let Some(v) = iter.peek().and_then(|s| s.parse::<f64>().ok()) {
                        self.acceleration = v;
                        iter.next();
                    }
                }
                "--natural-scrolling" => {
                    if let Some(v) = iter.peek().and_then(|s| s.parse::<bool>().ok()) {
                        self.natural_scrolling = v;
                        iter.next();
                    }
                }
                "--invert-x" => self.invert_x = true,
                "--invert-y" => self.invert_y = true,
                "--chord-window-ms" => {
                    if let Some(v) = iter.peek().and_then(|s| s.parse::<u64>().ok()) {
                        self.chord_window_ms = v;
                        iter.next();
                    }
                }
                _ => {}
            }
        }
    }

    /// Produce the runtime snapshot for the engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            scroll_speed_multiplier: self.scroll_speed,
            scroll_acceleration: self.acceleration,
            natural_scrolling: self.natural_scrolling,
            invert_x: self.invert_x,
            invert_y: self.invert_y,
            chord_window: Duration::from_millis(self.chord_window_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = AppSettings::default();
        assert_eq!(settings.scroll_speed, 1.0);
        assert!(settings.natural_scrolling);
        assert_eq!(settings.chord_window_ms, 300);
    }

    #[test]
    fn test_settings_deserialization_fills_defaults() {
        let toml = r#"
scroll_speed = 2.5
invert_y = true
"#;
        let settings: AppSettings = toml::from_str(toml).unwrap();
        assert_eq!(settings.scroll_speed, 2.5);
        assert!(settings.invert_y);
        assert_eq!(settings.chord_window_ms, 300);
        assert!(settings.natural_scrolling);
    }

    #[test]
    fn test_settings_round_trip() {
        let mut settings = AppSettings::default();
        settings.scroll_speed = 0.5;
        settings.extra_vendor_ids = vec![0x17EF];

        let toml = toml::to_string(&settings).unwrap();
        let back: AppSettings = toml::from_str(&toml).unwrap();
        assert_eq!(back.scroll_speed, 0.5);
        assert_eq!(back.extra_vendor_ids, vec![0x17EF]);
    }

    #[test]
    fn test_cli_overrides() {
        let mut settings = AppSettings::default();
        let args: Vec<String> = [
            "--scroll-speed",
            "3.0",
            "--invert-x",
            "--chord-window-ms",
            "150",
            "--unknown-flag",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        settings.apply_cli_overrides(&args);
        assert_eq!(settings.scroll_speed, 3.0);
        assert!(settings.invert_x);
        assert_eq!(settings.chord_window_ms, 150);
    }

    #[test]
    fn test_engine_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());

        config.scroll_speed_multiplier = 0.0;
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.scroll_acceleration = -1.0;
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.chord_window = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
