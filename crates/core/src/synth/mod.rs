//! Click synthesis.
//!
//! A click is a sine burst shaped by an exponential decay envelope
//! (`e^(-50 t)`, time constant of 20 ms), quantised to signed 16-bit PCM.

use std::{f64::consts::PI, time::Duration};

use serde::{Deserialize, Serialize};

use crate::config::{CacheConfig, SoundConfig};

/// Decay rate of the click envelope in 1/s.
const DECAY_RATE: f64 = 50.0;

/// The two click voices the metronome plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickKind {
    /// Any beat other than the first of a measure.
    Regular,
    /// First beat of a measure.
    Accent,
}

impl ClickKind {
    pub fn for_accent(accent: bool) -> Self {
        if accent {
            Self::Accent
        } else {
            Self::Regular
        }
    }

    pub fn frequency(self, sound: &SoundConfig) -> f64 {
        match self {
            Self::Regular => sound.click_frequency_hz,
            Self::Accent => sound.accent_frequency_hz,
        }
    }

    /// Logical cache name of this voice.
    pub fn asset_name(self, cache: &CacheConfig) -> &str {
        match self {
            Self::Regular => &cache.click_asset,
            Self::Accent => &cache.accent_asset,
        }
    }
}

/// Number of samples a click of `duration` occupies at `sample_rate`.
pub fn sample_count(sample_rate: u32, duration: Duration) -> usize {
    (f64::from(sample_rate) * duration.as_secs_f64()).round() as usize
}

/// Generates a decaying sine click at `frequency` Hz.
///
/// Pure function of its inputs; the output length is
/// `round(sample_rate * duration)`.
pub fn synthesize_click(frequency: f64, sample_rate: u32, duration: Duration) -> Vec<i16> {
    let rate = f64::from(sample_rate);
    (0..sample_count(sample_rate, duration))
        .map(|i| {
            let t = i as f64 / rate;
            let amplitude = (-DECAY_RATE * t).exp();
            let value = amplitude * (2.0 * PI * frequency * t).sin() * f64::from(i16::MAX);
            value.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
        })
        .collect()
}

/// Synthesizes the click for `kind` using the configured sound parameters.
pub fn synthesize(kind: ClickKind, sound: &SoundConfig) -> Vec<i16> {
    synthesize_click(kind.frequency(sound), sound.sample_rate, sound.click_duration())
}
