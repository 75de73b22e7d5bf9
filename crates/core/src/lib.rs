//! Core library for the metronome.
//!
//! The crate holds the timing and playback engine: click synthesis, a
//! minimal WAVE encoder, the on-disk sound cache, beat-cycle bookkeeping, the
//! single repeating beat timer and the [`MetronomeEngine`] façade that a
//! presentation layer drives and observes.

pub mod assets;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod synth;
pub mod timeline;
pub mod timer;
pub mod wav;

pub use assets::{AssetCache, CacheLocation, ClipHandle, FixedCacheLocation, SystemCacheLocation};
pub use audio::{AudioOutput, ClickSounds, SilentOutput};
pub use config::{CacheConfig, EngineConfig, SoundConfig, TempoConfig, MAX_BPM, MIN_BPM};
pub use engine::{EngineBuilder, EngineSnapshot, MetronomeEngine, BPM_STEP};
pub use error::{MetronomeError, Result};
pub use events::{EngineEvent, SubscriptionId};
pub use scheduler::{tick_period, Click, PlaybackScheduler};
pub use synth::{synthesize_click, ClickKind};
pub use timeline::{catalog, BeatCycle, TimeSignature};
pub use timer::{ManualTimer, ThreadTimer, TickFn, TimerHandle, TimerHost};
pub use wav::encode_wav;
