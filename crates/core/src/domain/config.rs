//! Configuration management for Reverie
//!
//! This module provides:
//! - The effects configuration snapshot read by the chain once per pull
//! - A wait-free shared snapshot that UI/control threads publish into
//! - Named reverb presets
//! - Engine configuration with TOML serialization
//! - Hot-reload support via file system watcher

use crate::domain::audio::AudioError;
use crate::domain::chain::Stage;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),
}

/// Legal ranges for user-facing parameters
pub mod limits {
    pub const CUTOFF_MIN_HZ: f32 = 10.0;
    pub const CUTOFF_MAX_HZ: f32 = 20000.0;
    pub const PRE_DELAY_MAX_MS: f32 = 200.0;
    pub const GAIN_MIN_DB: f32 = -60.0;
    pub const GAIN_MAX_DB: f32 = 24.0;
}

// ============================================================================
// EFFECTS SNAPSHOT
// ============================================================================

/// Enable flag + cutoff for one of the biquad stages
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterSettings {
    #[serde(default)]
    pub enabled: bool,
    pub cutoff_hz: f32,
}

impl FilterSettings {
    pub const fn disabled(cutoff_hz: f32) -> Self {
        Self {
            enabled: false,
            cutoff_hz,
        }
    }
}

/// Reverb parameters
///
/// Percentages are 0..=100. `damping_min`/`damping_max` bound the
/// high-frequency damping factor the `damping` percentage maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbSettings {
    pub room_size: f32,
    pub pre_delay_ms: f32,
    pub reverberance: f32,
    pub damping: f32,
    pub tone_low: f32,
    pub tone_high: f32,
    pub wet_gain_db: f32,
    pub dry_gain_db: f32,
    pub stereo_width: f32,
    pub damping_min: f32,
    pub damping_max: f32,
    /// Extra linear scale on the wet signal; eight parallel combs sum loud
    pub wet_scale: f32,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        Self {
            room_size: 75.0,
            pre_delay_ms: 20.0,
            reverberance: 50.0,
            damping: 50.0,
            tone_low: 100.0,
            tone_high: 100.0,
            wet_gain_db: 0.0,
            dry_gain_db: 0.0,
            stereo_width: 100.0,
            damping_min: 0.2,
            damping_max: 0.5,
            wet_scale: 0.03,
        }
    }
}

impl ReverbSettings {
    /// Normalize every field into its legal range
    pub fn clamped(mut self) -> Self {
        let pct = |v: f32| v.clamp(0.0, 100.0);
        self.room_size = pct(self.room_size);
        self.pre_delay_ms = self.pre_delay_ms.clamp(0.0, limits::PRE_DELAY_MAX_MS);
        self.reverberance = pct(self.reverberance);
        self.damping = pct(self.damping);
        self.tone_low = pct(self.tone_low);
        self.tone_high = pct(self.tone_high);
        self.wet_gain_db = self
            .wet_gain_db
            .clamp(limits::GAIN_MIN_DB, limits::GAIN_MAX_DB);
        self.dry_gain_db = self
            .dry_gain_db
            .clamp(limits::GAIN_MIN_DB, limits::GAIN_MAX_DB);
        self.stereo_width = pct(self.stereo_width);
        self.damping_min = self.damping_min.clamp(0.0, 1.0);
        self.damping_max = self.damping_max.clamp(self.damping_min, 1.0);
        self.wet_scale = self.wet_scale.clamp(0.0, 1.0);
        self
    }
}

/// Makeup gain applied after the effect stages, before the limiter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct GainSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub gain_db: f32,
}

/// Slow-down (time-stretch by resampling) settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlowSettings {
    #[serde(default)]
    pub enabled: bool,
    /// 0 = normal speed, 50 or more = half speed
    pub amount: f32,
}

impl Default for SlowSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            amount: 20.0,
        }
    }
}

/// Fixed orderings of the three per-sample stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainOrder {
    #[default]
    HighPassLowPassReverb,
    HighPassReverbLowPass,
    LowPassHighPassReverb,
    LowPassReverbHighPass,
    ReverbHighPassLowPass,
    ReverbLowPassHighPass,
}

impl ChainOrder {
    pub const ALL: [ChainOrder; 6] = [
        ChainOrder::HighPassLowPassReverb,
        ChainOrder::HighPassReverbLowPass,
        ChainOrder::LowPassHighPassReverb,
        ChainOrder::LowPassReverbHighPass,
        ChainOrder::ReverbHighPassLowPass,
        ChainOrder::ReverbLowPassHighPass,
    ];

    /// Stages in processing order
    pub const fn stages(self) -> [Stage; 3] {
        use Stage::{HighPass, LowPass, Reverb};
        match self {
            ChainOrder::HighPassLowPassReverb => [HighPass, LowPass, Reverb],
            ChainOrder::HighPassReverbLowPass => [HighPass, Reverb, LowPass],
            ChainOrder::LowPassHighPassReverb => [LowPass, HighPass, Reverb],
            ChainOrder::LowPassReverbHighPass => [LowPass, Reverb, HighPass],
            ChainOrder::ReverbHighPassLowPass => [Reverb, HighPass, LowPass],
            ChainOrder::ReverbLowPassHighPass => [Reverb, LowPass, HighPass],
        }
    }
}

/// Complete effects configuration, copied once per pull by the chain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    pub high_pass: FilterSettings,
    pub low_pass: FilterSettings,
    pub reverb_enabled: bool,
    pub reverb: ReverbSettings,
    pub makeup_gain: GainSettings,
    pub slow: SlowSettings,
    pub order: ChainOrder,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            high_pass: FilterSettings::disabled(80.0),
            low_pass: FilterSettings::disabled(8000.0),
            reverb_enabled: false,
            reverb: ReverbSettings::default(),
            makeup_gain: GainSettings::default(),
            slow: SlowSettings::default(),
            order: ChainOrder::default(),
        }
    }
}

impl EffectsConfig {
    /// Everything off: the chain passes samples through untouched
    pub fn bypass() -> Self {
        Self::default()
    }

    /// Any per-sample stage or makeup gain enabled
    pub fn any_stage_enabled(&self) -> bool {
        self.high_pass.enabled
            || self.low_pass.enabled
            || self.reverb_enabled
            || self.makeup_gain.enabled
    }

    /// Normalize every field into its legal range
    pub fn clamped(mut self) -> Self {
        let cutoff = |v: f32| v.clamp(limits::CUTOFF_MIN_HZ, limits::CUTOFF_MAX_HZ);
        self.high_pass.cutoff_hz = cutoff(self.high_pass.cutoff_hz);
        self.low_pass.cutoff_hz = cutoff(self.low_pass.cutoff_hz);
        self.reverb = self.reverb.clamped();
        self.makeup_gain.gain_db = self
            .makeup_gain
            .gain_db
            .clamp(limits::GAIN_MIN_DB, limits::GAIN_MAX_DB);
        self.slow.amount = self.slow.amount.clamp(0.0, 100.0);
        self
    }
}

// ============================================================================
// REVERB PRESETS
// ============================================================================

/// Named reverb voicings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReverbPreset {
    #[default]
    Default,
    SmallRoom,
    Hall,
    Cathedral,
    Bedroom,
}

impl ReverbPreset {
    pub const ALL: [ReverbPreset; 5] = [
        ReverbPreset::Default,
        ReverbPreset::SmallRoom,
        ReverbPreset::Hall,
        ReverbPreset::Cathedral,
        ReverbPreset::Bedroom,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ReverbPreset::Default => "default",
            ReverbPreset::SmallRoom => "small_room",
            ReverbPreset::Hall => "hall",
            ReverbPreset::Cathedral => "cathedral",
            ReverbPreset::Bedroom => "bedroom",
        }
    }

    pub fn settings(self) -> ReverbSettings {
        let base = ReverbSettings::default();
        match self {
            ReverbPreset::Default => base,
            ReverbPreset::SmallRoom => ReverbSettings {
                room_size: 30.0,
                pre_delay_ms: 5.0,
                reverberance: 40.0,
                damping: 60.0,
                tone_high: 80.0,
                wet_gain_db: -3.0,
                stereo_width: 80.0,
                ..base
            },
            ReverbPreset::Hall => ReverbSettings {
                room_size: 85.0,
                pre_delay_ms: 25.0,
                reverberance: 70.0,
                damping: 40.0,
                ..base
            },
            ReverbPreset::Cathedral => ReverbSettings {
                room_size: 100.0,
                pre_delay_ms: 60.0,
                reverberance: 90.0,
                damping: 30.0,
                tone_low: 80.0,
                wet_gain_db: 2.0,
                ..base
            },
            ReverbPreset::Bedroom => ReverbSettings {
                room_size: 20.0,
                pre_delay_ms: 0.0,
                reverberance: 30.0,
                damping: 70.0,
                tone_high: 60.0,
                wet_gain_db: -6.0,
                stereo_width: 60.0,
                ..base
            },
        }
    }
}

impl FromStr for ReverbPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|p| p.name() == normalized)
            .ok_or_else(|| ConfigError::PresetNotFound(s.to_string()))
    }
}

impl From<ReverbPreset> for ReverbSettings {
    fn from(preset: ReverbPreset) -> Self {
        preset.settings()
    }
}

// ============================================================================
// SHARED SNAPSHOT
// ============================================================================

/// Source of configuration snapshots for the effects chain
///
/// Called once per pull on the audio thread: must not block.
pub trait ConfigProvider: Send + Sync {
    fn snapshot(&self) -> EffectsConfig;
}

/// Wait-free configuration snapshot
///
/// Writers publish a whole new `EffectsConfig`; readers load the current
/// pointer and copy it, so the audio thread never spins and never sees a
/// half-written update. Writers are serialized among themselves.
pub struct SharedConfig {
    current: ArcSwap<EffectsConfig>,
    writer: Mutex<()>,
}

impl SharedConfig {
    pub fn new(config: EffectsConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            writer: Mutex::new(()),
        }
    }

    /// Replace the whole configuration
    pub fn store(&self, config: EffectsConfig) {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.current.store(Arc::new(config));
    }

    /// Read-modify-write under the writer lock
    pub fn update<F: FnOnce(&mut EffectsConfig)>(&self, f: F) {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let mut config = **self.current.load();
        f(&mut config);
        self.current.store(Arc::new(config));
    }

    pub fn load(&self) -> EffectsConfig {
        **self.current.load()
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(EffectsConfig::default())
    }
}

impl std::fmt::Debug for SharedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConfig")
            .field("config", &self.load())
            .finish()
    }
}

impl ConfigProvider for SharedConfig {
    fn snapshot(&self) -> EffectsConfig {
        self.load()
    }
}

/// A fixed configuration, handy for offline rendering
impl ConfigProvider for EffectsConfig {
    fn snapshot(&self) -> EffectsConfig {
        *self
    }
}

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

/// Tuning for the spectrum/level analysis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizerSettings {
    /// Transform size, power of two
    pub fft_size: usize,
    /// Scope history in mono samples; rounded up to a power of two
    pub capacity: usize,
    pub db_floor: f32,
    pub db_ceiling: f32,
    /// Fall-off factor for decreasing bins (0 = instant, towards 1 = slow)
    pub release: f32,
    /// Longest the analysis thread sleeps between wake checks
    pub wait_timeout_ms: u64,
}

impl Default for VisualizerSettings {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            capacity: 4096,
            db_floor: -45.0,
            db_ceiling: 0.0,
            release: 0.8,
            wait_timeout_ms: 50,
        }
    }
}

impl VisualizerSettings {
    /// Number of spectrum bins published (`fft_size / 2`)
    pub fn bins(&self) -> usize {
        self.fft_size / 2
    }

    pub fn validate(&self) -> crate::domain::audio::Result<()> {
        if self.fft_size < 2 || !self.fft_size.is_power_of_two() {
            return Err(AudioError::InvalidConfiguration(format!(
                "FFT size must be a power of two >= 2, got {}",
                self.fft_size
            )));
        }
        if self.capacity < self.fft_size {
            return Err(AudioError::InvalidConfiguration(format!(
                "Scope capacity {} is smaller than FFT size {}",
                self.capacity, self.fft_size
            )));
        }
        if !(self.db_floor < self.db_ceiling) {
            return Err(AudioError::InvalidConfiguration(format!(
                "dB floor {} must be below ceiling {}",
                self.db_floor, self.db_ceiling
            )));
        }
        if !(0.0..1.0).contains(&self.release) {
            return Err(AudioError::InvalidConfiguration(format!(
                "Release must be in [0, 1), got {}",
                self.release
            )));
        }
        if self.wait_timeout_ms == 0 {
            return Err(AudioError::InvalidConfiguration(
                "Wait timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Offline render parameters for the CLI
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per pull
    pub block_frames: usize,
    pub seconds: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            block_frames: 512,
            seconds: 5.0,
        }
    }
}

/// Root configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Applied over `effects.reverb` when set
    pub preset: Option<ReverbPreset>,
    pub effects: EffectsConfig,
    pub visualizer: VisualizerSettings,
    pub render: RenderSettings,
}

impl EngineConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Factory default: reverb and slow-down on, the usual "slowed + reverb" voicing
    pub fn factory_default() -> Self {
        let mut config = Self::default();
        config.effects.reverb_enabled = true;
        config.effects.slow.enabled = true;
        config.effects.high_pass.enabled = true;
        config
    }

    /// Reject settings no stage can run with
    pub fn validate(&self) -> Result<()> {
        self.visualizer
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.render.sample_rate == 0 {
            return Err(ConfigError::Invalid("Sample rate must be non-zero".to_string()));
        }
        if !(1..=2).contains(&self.render.channels) {
            return Err(ConfigError::Invalid(format!(
                "Render supports 1 or 2 channels, got {}",
                self.render.channels
            )));
        }
        if self.render.block_frames == 0 {
            return Err(ConfigError::Invalid("Block size must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Effects section with the preset applied and every field clamped
    pub fn effective_effects(&self) -> EffectsConfig {
        let mut effects = self.effects;
        if let Some(preset) = self.preset {
            let tuning = effects.reverb;
            effects.reverb = ReverbSettings {
                damping_min: tuning.damping_min,
                damping_max: tuning.damping_max,
                wet_scale: tuning.wet_scale,
                ..preset.settings()
            };
        }
        effects.clamped()
    }
}

/// File system watcher for hot-reload
pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
    config_tx: broadcast::Sender<PathBuf>,
}

impl ConfigWatcher {
    /// Watch `config_dir` for created or modified `.toml` files
    pub async fn new(config_dir: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let (config_tx, _config_rx) = broadcast::channel(32);

        fs::create_dir_all(&config_dir).await?;

        let tx_clone = config_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                    ) {
                        for path in event.paths {
                            if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                                // No subscribers is fine
                                if tx_clone.send(path).is_err() {
                                    debug!("Config change with no subscribers");
                                }
                            }
                        }
                    }
                }
                Err(e) => error!(error = %e, "Config watch error"),
            }
        })?;

        watcher.watch(&config_dir, notify::RecursiveMode::NonRecursive)?;

        info!(
            path = %config_dir.display(),
            "Config watcher started"
        );

        Ok(Self {
            _watcher: watcher,
            config_tx,
        })
    }

    /// Subscribe to config change events
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.config_tx.subscribe()
    }
}

/// Configuration manager for the main Reverie config
///
/// Manages the main configuration file at `~/.config/reverie/config.toml`.
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");
        Self {
            config_dir,
            config_path,
        }
    }

    /// Get the default config directory path
    ///
    /// Returns `~/.config/reverie` on Linux, the platform equivalent elsewhere
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("reverie"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// If the config file doesn't exist, writes and returns the factory default.
    /// If the config file is corrupt, backs it up and returns the factory default.
    #[instrument(skip(self))]
    pub async fn load(&self) -> EngineConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = EngineConfig::factory_default();
            if let Err(e) = config.save_to_file(&self.config_path).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }
            return config;
        }

        match EngineConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                EngineConfig::factory_default()
            }
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &EngineConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
