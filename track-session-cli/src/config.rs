//! Configuration loading and parsing

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use track_session::{DisplaySize, FrameNumber, SessionConfig};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9000
}

/// Size of the review display area each stream is shown in
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct DisplayConfig {
    #[serde(default = "default_display_width")]
    pub width: f32,
    #[serde(default = "default_display_height")]
    pub height: f32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: default_display_width(),
            height: default_display_height(),
        }
    }
}

impl DisplayConfig {
    pub fn size(&self) -> DisplaySize {
        DisplaySize::new(self.width, self.height)
    }
}

fn default_display_width() -> f32 {
    960.0
}

fn default_display_height() -> f32 {
    540.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackConfig {
    /// Number of simulated video streams
    #[serde(default = "default_streams")]
    pub streams: usize,
    /// Frame every stream is positioned at on startup
    #[serde(default)]
    pub start_frame: FrameNumber,
    /// Interval between automatic playback ticks (0 = tick from the console only)
    #[serde(default)]
    pub tick_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            streams: default_streams(),
            start_frame: 0,
            tick_ms: 0,
        }
    }
}

fn default_streams() -> usize {
    2
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .display
        .size()
        .validate()
        .with_context(|| format!("Invalid [display] section in {:?}", path))?;

    Ok(config)
}
