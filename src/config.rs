use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::audio::buffer::DEFAULT_WINDOW_SIZE;
use crate::audio::pitch::DEFAULT_VOLUME_THRESHOLD;
use crate::game::scoring::{Difficulty, GameMode};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub record: RecordConfig,
    #[serde(default)]
    pub game: GameConfig,
}

#[derive(Debug, Deserialize)]
pub struct RecordConfig {
    #[serde(default = "default_mic_delay_ms")]
    pub mic_delay_ms: u32,
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold: f32,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Samples per capture push
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct GameConfig {
    #[serde(default)]
    pub mode: GameMode,
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,
    #[serde(default)]
    pub difficulty: Vec<Difficulty>,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            mic_delay_ms: default_mic_delay_ms(),
            volume_threshold: default_volume_threshold(),
            window_size: default_window_size(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            mode: GameMode::default(),
            tick_rate: default_tick_rate(),
            difficulty: Vec::new(),
        }
    }
}

impl RecordConfig {
    /// Clamp values to what the recorder supports
    pub fn sanitized(mut self) -> Self {
        self.mic_delay_ms = clamp_mic_delay(self.mic_delay_ms);
        self.volume_threshold = self.volume_threshold.clamp(0.0, 1.0);
        self.window_size = self.window_size.clamp(256, 16384);
        self.chunk_size = self.chunk_size.max(1);
        self
    }
}

pub fn default_mic_delay_ms() -> u32 { 300 }
fn default_volume_threshold() -> f32 { DEFAULT_VOLUME_THRESHOLD }
fn default_window_size() -> usize { DEFAULT_WINDOW_SIZE }
fn default_chunk_size() -> usize { 1024 }
fn default_tick_rate() -> u32 { 60 }

/// Microphone delay in 20 ms steps between 0 and 500 ms
pub fn clamp_mic_delay(ms: u32) -> u32 {
    let ms = ms.min(500);
    (ms + 10) / 20 * 20
}

/// Explicit path, else `vocalscore.toml` in the working directory, else the user config
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("vocalscore.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("vocalscore").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("vocalscore").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    let mut config: Config = toml::from_str(&content).ok()?;
    config.record = config.record.sanitized();
    Some(config)
}
