use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{assets::validate_subdirectory, MetronomeError, Result};

/// Lowest tempo accepted by the default configuration.
pub const MIN_BPM: u32 = 40;
/// Highest tempo accepted by the default configuration.
pub const MAX_BPM: u32 = 240;
/// Tempo a fresh engine starts at.
pub const DEFAULT_BPM: u32 = 120;
/// Highest sample rate accepted for synthesized clicks.
pub const MAX_SAMPLE_RATE: u32 = 384_000;
/// Longest click accepted, in milliseconds.
pub const MAX_CLICK_DURATION_MS: u64 = 10_000;

/// Top-level configuration structure for the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tempo: TempoConfig,
    pub sound: SoundConfig,
    pub cache: CacheConfig,
}

impl EngineConfig {
    /// Parses a JSON configuration document. Missing fields fall back to
    /// their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.tempo.validate()?;
        self.sound.validate()?;
        self.cache.validate()
    }
}

/// Tempo bounds and the initial tempo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    pub min_bpm: u32,
    pub max_bpm: u32,
    pub default_bpm: u32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            min_bpm: MIN_BPM,
            max_bpm: MAX_BPM,
            default_bpm: DEFAULT_BPM,
        }
    }
}

impl TempoConfig {
    /// Clamps an arbitrary requested tempo into `[min_bpm, max_bpm]`.
    pub fn clamp(&self, bpm: i64) -> u32 {
        let clamped = bpm.clamp(i64::from(self.min_bpm), i64::from(self.max_bpm));
        // Bounds are u32 so the clamped value always fits.
        u32::try_from(clamped).unwrap_or(self.max_bpm)
    }

    fn validate(&self) -> Result<()> {
        if self.min_bpm == 0 {
            return Err(MetronomeError::invalid("min_bpm must be at least 1"));
        }
        if self.min_bpm > self.max_bpm {
            return Err(MetronomeError::invalid(format!(
                "min_bpm ({}) exceeds max_bpm ({})",
                self.min_bpm, self.max_bpm
            )));
        }
        if !(self.min_bpm..=self.max_bpm).contains(&self.default_bpm) {
            return Err(MetronomeError::invalid(format!(
                "default_bpm ({}) is outside {}..={}",
                self.default_bpm, self.min_bpm, self.max_bpm
            )));
        }
        Ok(())
    }
}

/// Parameters of the synthesized click sounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    pub sample_rate: u32,
    pub click_duration_ms: u64,
    pub click_frequency_hz: f64,
    pub accent_frequency_hz: f64,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            click_duration_ms: 50,
            click_frequency_hz: 1_000.0,
            accent_frequency_hz: 1_500.0,
        }
    }
}

impl SoundConfig {
    pub fn click_duration(&self) -> Duration {
        Duration::from_millis(self.click_duration_ms)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(MetronomeError::invalid(format!(
                "sample_rate must be within 1..={MAX_SAMPLE_RATE}, got {}",
                self.sample_rate
            )));
        }
        if !(1..=MAX_CLICK_DURATION_MS).contains(&self.click_duration_ms) {
            return Err(MetronomeError::invalid(format!(
                "click_duration_ms must be within 1..={MAX_CLICK_DURATION_MS}, got {}",
                self.click_duration_ms
            )));
        }
        for (label, hz) in [
            ("click_frequency_hz", self.click_frequency_hz),
            ("accent_frequency_hz", self.accent_frequency_hz),
        ] {
            if !hz.is_finite() || hz <= 0.0 {
                return Err(MetronomeError::invalid(format!(
                    "{label} must be a positive frequency, got {hz}"
                )));
            }
        }
        Ok(())
    }
}

/// Where and under which names the click assets are cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Path below the platform cache directory. Everything inside it belongs
    /// to the engine and is removed by a cache clear.
    pub subdirectory: String,
    pub click_asset: String,
    pub accent_asset: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            subdirectory: "metronome/sounds".to_string(),
            click_asset: "click".to_string(),
            accent_asset: "accent".to_string(),
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<()> {
        validate_subdirectory(&self.subdirectory)?;
        if self.click_asset == self.accent_asset {
            return Err(MetronomeError::invalid(
                "click and accent assets need distinct names",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tempo.min_bpm, 40);
        assert_eq!(config.tempo.max_bpm, 240);
        assert_eq!(config.sound.click_duration(), Duration::from_millis(50));
    }

    #[test]
    fn clamps_into_tempo_range() {
        let tempo = TempoConfig::default();
        assert_eq!(tempo.clamp(-5), 40);
        assert_eq!(tempo.clamp(39), 40);
        assert_eq!(tempo.clamp(40), 40);
        assert_eq!(tempo.clamp(133), 133);
        assert_eq!(tempo.clamp(240), 240);
        assert_eq!(tempo.clamp(i64::MAX), 240);
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{ "tempo": { "default_bpm": 90 } }"#).unwrap();
        assert_eq!(config.tempo.default_bpm, 90);
        assert_eq!(config.tempo.max_bpm, 240);
        assert_eq!(config.sound, SoundConfig::default());
    }

    #[test]
    fn rejects_inverted_tempo_range() {
        let err = EngineConfig::from_json_str(
            r#"{ "tempo": { "min_bpm": 200, "max_bpm": 100, "default_bpm": 150 } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn rejects_non_positive_frequencies() {
        let mut config = EngineConfig::default();
        config.sound.accent_frequency_hz = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_sound_parameters() {
        let mut config = EngineConfig::default();
        config.sound.sample_rate = 3_000_000_000;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.sound.click_duration_ms = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.sound.sample_rate = MAX_SAMPLE_RATE;
        config.sound.click_duration_ms = MAX_CLICK_DURATION_MS;
        config.validate().unwrap();
    }

    #[test]
    fn rejects_cache_subdirectory_outside_the_base() {
        for subdirectory in ["", "..", "../elsewhere", "/tmp/metronome", "sounds/../.."] {
            let mut config = EngineConfig::default();
            config.cache.subdirectory = subdirectory.to_string();
            assert!(config.validate().is_err(), "{subdirectory:?}");
        }

        let err = EngineConfig::from_json_str(r#"{ "cache": { "subdirectory": ".." } }"#)
            .unwrap_err();
        assert!(err.to_string().contains("subdirectory"));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metronome.json");
        std::fs::write(&path, r#"{ "cache": { "subdirectory": "custom" } }"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.cache.subdirectory, "custom");
        assert_eq!(config.cache.click_asset, "click");
    }
}
