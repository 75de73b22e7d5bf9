use std::sync::RwLock;

use tracing::warn;

use crate::{
    assets::{AssetCache, ClipHandle},
    config::EngineConfig,
    synth::{self, ClickKind},
    wav, Result,
};

/// Host audio output the engine hands loaded clips to.
///
/// Implementations must return quickly from [`AudioOutput::play`]: it is
/// called on the tick path.
pub trait AudioOutput: Send + Sync {
    /// Prepares the host audio subsystem. Called once when the engine is
    /// built; a failure leaves the engine ticking silently.
    fn activate(&self) -> Result<()> {
        Ok(())
    }

    /// Starts playing `clip` from its beginning.
    fn play(&self, clip: &ClipHandle) -> Result<()>;
}

/// Output that discards every clip.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentOutput;

impl AudioOutput for SilentOutput {
    fn play(&self, _clip: &ClipHandle) -> Result<()> {
        Ok(())
    }
}

/// The two loaded click clips. A missing clip means that voice is silent.
#[derive(Debug, Default)]
pub struct ClickSounds {
    regular: RwLock<Option<ClipHandle>>,
    accent: RwLock<Option<ClipHandle>>,
}

impl ClickSounds {
    /// Resolves both voices through `cache`, synthesizing them on a miss.
    pub fn load(cache: &AssetCache, config: &EngineConfig) -> Self {
        let sounds = Self::default();
        sounds.reload(cache, config);
        sounds
    }

    /// Re-resolves both voices, replacing the loaded handles.
    pub fn reload(&self, cache: &AssetCache, config: &EngineConfig) {
        for kind in [ClickKind::Regular, ClickKind::Accent] {
            let handle = resolve_voice(cache, config, kind);
            *self.slot(kind).write().unwrap_or_else(|e| e.into_inner()) = handle;
        }
    }

    pub fn get(&self, kind: ClickKind) -> Option<ClipHandle> {
        self.slot(kind)
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn slot(&self, kind: ClickKind) -> &RwLock<Option<ClipHandle>> {
        match kind {
            ClickKind::Regular => &self.regular,
            ClickKind::Accent => &self.accent,
        }
    }
}

fn resolve_voice(cache: &AssetCache, config: &EngineConfig, kind: ClickKind) -> Option<ClipHandle> {
    let name = kind.asset_name(&config.cache);
    let generate = || wav::encode_wav(&synth::synthesize(kind, &config.sound), config.sound.sample_rate);
    match cache.resolve(name, generate) {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(asset = name, %err, "click sound unavailable, voice will be silent");
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::FixedCacheLocation;

    #[test]
    fn loads_both_voices_into_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::default();
        let cache = AssetCache::at_location(
            &FixedCacheLocation(dir.path().to_path_buf()),
            &config.cache.subdirectory,
        )
        .unwrap();

        let sounds = ClickSounds::load(&cache, &config);
        let regular = sounds.get(ClickKind::Regular).unwrap();
        let accent = sounds.get(ClickKind::Accent).unwrap();

        assert_eq!(regular.name(), "click");
        assert_eq!(accent.name(), "accent");
        assert_eq!(regular.samples().len(), 2_205);
        assert_ne!(regular.samples(), accent.samples());
        assert_eq!(cache.size(), 2 * (wav::HEADER_LEN as u64 + 2 * 2_205));
    }

    #[test]
    fn cached_clip_matches_fresh_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::default();
        let cache = AssetCache::new(dir.path());

        ClickSounds::load(&cache, &config);
        let reloaded = ClickSounds::load(&cache, &config);

        assert_eq!(
            reloaded.get(ClickKind::Accent).unwrap().samples(),
            synth::synthesize(ClickKind::Accent, &config.sound).as_slice()
        );
    }

    #[test]
    fn silent_output_accepts_anything() {
        let dir = tempfile::tempdir().unwrap();
        let sounds = ClickSounds::load(&AssetCache::new(dir.path()), &EngineConfig::default());
        let clip = sounds.get(ClickKind::Regular).unwrap();
        SilentOutput.activate().unwrap();
        SilentOutput.play(&clip).unwrap();
    }
}
