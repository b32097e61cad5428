//! Bridge configuration (config.toml)
//!
//! Handles loading, saving, validating and providing defaults for the
//! bridge's tuning knobs. Every section is optional in the file; missing
//! keys take their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Bridge configuration.
///
/// Contains all tunables organized into sections.
/// Serialized to/from TOML format for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    /// Output stream and buffering settings
    #[serde(default)]
    pub audio: AudioConfig,
    /// Clock driver cadence and drift limits
    #[serde(default)]
    pub clock: ClockConfig,
    /// Save-state settings
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// What the audio source plays when the core is not running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdleAudio {
    #[default]
    Silence,
    /// Low-level static, like a console with no cartridge
    WhiteNoise,
}

/// Audio configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Initial mixer sample rate (default: 48000)
    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,
    /// Ring buffer length (default: 150ms)
    #[serde(default = "default_ring_capacity_ms")]
    pub ring_capacity_ms: u32,
    /// Audio kept queued ahead of the render callback (default: 50ms)
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u32,
    /// Largest chunk the render callback reads at once (default: 4096)
    #[serde(default = "default_max_render_frames")]
    pub max_render_frames: usize,
    /// Frames used to ramp to silence on underrun (default: 64)
    #[serde(default = "default_fade_frames")]
    pub fade_frames: usize,
    /// Output while powered off or stopped (default: silence)
    #[serde(default)]
    pub idle: IdleAudio,
    /// White noise amplitude (default: 0.15, range: 0.0-1.0)
    #[serde(default = "default_noise_volume")]
    pub noise_volume: f32,
}

/// Clock driver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Worker tick rate (default: 60)
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Longest slice of emulated time run in one tick (default: 50ms)
    #[serde(default = "default_max_step_ms")]
    pub max_step_ms: u32,
    /// Drift that triggers a resync (default: one ring buffer)
    #[serde(default)]
    pub drift_threshold_ms: Option<u32>,
    /// Worst scheduling jitter the ring must absorb (default: 40ms)
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u32,
}

/// Snapshot configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Largest serialized core state accepted (default: 16 MiB)
    #[serde(default = "default_max_state_size")]
    pub max_state_size: usize,
    /// How long capture/restore wait for the worker to pause (default: 250ms)
    #[serde(default = "default_pause_timeout_ms")]
    pub pause_timeout_ms: u32,
}

fn default_output_sample_rate() -> u32 {
    48_000
}
fn default_ring_capacity_ms() -> u32 {
    150
}
fn default_latency_ms() -> u32 {
    50
}
fn default_max_render_frames() -> usize {
    4096
}
fn default_fade_frames() -> usize {
    64
}
fn default_noise_volume() -> f32 {
    0.15
}

fn default_tick_hz() -> u32 {
    60
}
fn default_max_step_ms() -> u32 {
    50
}
fn default_max_jitter_ms() -> u32 {
    40
}

fn default_max_state_size() -> usize {
    crate::snapshot::MAX_STATE_SIZE
}
fn default_pause_timeout_ms() -> u32 {
    250
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: default_output_sample_rate(),
            ring_capacity_ms: default_ring_capacity_ms(),
            latency_ms: default_latency_ms(),
            max_render_frames: default_max_render_frames(),
            fade_frames: default_fade_frames(),
            idle: IdleAudio::default(),
            noise_volume: default_noise_volume(),
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
            max_step_ms: default_max_step_ms(),
            drift_threshold_ms: None,
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_state_size: default_max_state_size(),
            pause_timeout_ms: default_pause_timeout_ms(),
        }
    }
}

/// Configuration loading/validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\emubridge\config`
/// On macOS: `~/Library/Application Support/io.emubridge.emubridge`
/// On Linux: `~/.config/emubridge`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.emubridge", "", "emubridge")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

fn ms(value: u32) -> Duration {
    Duration::from_millis(value as u64)
}

fn frames_for(duration_ms: u32, sample_rate: u32) -> usize {
    (duration_ms as u64 * sample_rate as u64 / 1000) as usize
}

impl BridgeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Loads `config.toml` from the platform configuration directory.
    ///
    /// Falls back to defaults if the file doesn't exist. A file that exists
    /// but cannot be parsed or fails validation is logged and ignored.
    pub fn load() -> Self {
        let Some(path) = config_dir().map(|dir| dir.join("config.toml")) else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Writes the configuration as pretty TOML, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Saves to the platform configuration directory.
    ///
    /// Fails with a `NotFound` I/O error when the platform has none.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_in(config_dir())
    }

    fn save_in(&self, dir: Option<PathBuf>) -> Result<(), ConfigError> {
        let Some(dir) = dir else {
            warn!("No platform config directory, config not saved");
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no platform config directory",
            )));
        };
        self.save_to(&dir.join("config.toml"))
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;
        let clock = &self.clock;

        if audio.output_sample_rate == 0 {
            return Err(ConfigError::Invalid("audio.output_sample_rate must be > 0".into()));
        }
        if audio.ring_capacity_ms == 0 {
            return Err(ConfigError::Invalid("audio.ring_capacity_ms must be > 0".into()));
        }
        if audio.max_render_frames == 0 {
            return Err(ConfigError::Invalid("audio.max_render_frames must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&audio.noise_volume) {
            return Err(ConfigError::Invalid(format!(
                "audio.noise_volume {} outside 0.0-1.0",
                audio.noise_volume
            )));
        }
        if clock.tick_hz == 0 {
            return Err(ConfigError::Invalid("clock.tick_hz must be > 0".into()));
        }
        if clock.max_step_ms == 0 {
            return Err(ConfigError::Invalid("clock.max_step_ms must be > 0".into()));
        }
        // The ring has to ride out the worst scheduling gap
        if audio.ring_capacity_ms < clock.max_jitter_ms {
            return Err(ConfigError::Invalid(format!(
                "audio.ring_capacity_ms ({}) is below clock.max_jitter_ms ({})",
                audio.ring_capacity_ms, clock.max_jitter_ms
            )));
        }
        if audio.latency_ms >= audio.ring_capacity_ms {
            return Err(ConfigError::Invalid(format!(
                "audio.latency_ms ({}) must be below audio.ring_capacity_ms ({})",
                audio.latency_ms, audio.ring_capacity_ms
            )));
        }
        if audio.latency_ms >= self.drift_threshold_ms() {
            return Err(ConfigError::Invalid(format!(
                "audio.latency_ms ({}) must be below the drift threshold ({}ms)",
                audio.latency_ms,
                self.drift_threshold_ms()
            )));
        }
        if self.snapshot.max_state_size == 0 {
            return Err(ConfigError::Invalid("snapshot.max_state_size must be > 0".into()));
        }
        Ok(())
    }

    /// Ring capacity in frames at the given output rate
    pub fn ring_capacity_frames(&self, sample_rate: u32) -> usize {
        frames_for(self.audio.ring_capacity_ms, sample_rate).max(1)
    }

    /// Frames produced per tick at the given rate, rounded
    pub fn frames_per_tick(&self, sample_rate: u32) -> usize {
        let hz = self.clock.tick_hz.max(1) as u64;
        ((sample_rate as u64 + hz / 2) / hz) as usize
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.clock.tick_hz.max(1)
    }

    fn drift_threshold_ms(&self) -> u32 {
        self.clock
            .drift_threshold_ms
            .unwrap_or(self.audio.ring_capacity_ms)
    }

    pub fn drift_threshold(&self) -> Duration {
        ms(self.drift_threshold_ms())
    }

    pub fn max_step(&self) -> Duration {
        ms(self.clock.max_step_ms)
    }

    pub fn latency(&self) -> Duration {
        ms(self.audio.latency_ms)
    }

    pub fn pause_timeout(&self) -> Duration {
        ms(self.snapshot.pause_timeout_ms)
    }
}
