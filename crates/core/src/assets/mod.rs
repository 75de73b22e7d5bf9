//! On-disk cache for the synthesized click clips.
//!
//! Each asset is stored as `<root>/<name>.wav`. The root is a dedicated
//! subdirectory of a [`CacheLocation`], so clearing the cache never touches
//! anything the engine did not write.

use std::{
    fmt,
    fs,
    io::Cursor,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{MetronomeError, Result};

const ASSET_EXTENSION: &str = "wav";

/// Provides the base directory under which the engine keeps its cache.
pub trait CacheLocation: Send + Sync {
    /// Returns the base directory, or `None` when the platform has none.
    fn base_dir(&self) -> Option<PathBuf>;
}

/// Per-user cache directory reported by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCacheLocation;

impl CacheLocation for SystemCacheLocation {
    fn base_dir(&self) -> Option<PathBuf> {
        dirs::cache_dir()
    }
}

/// A fixed directory, typically an ephemeral one in tests.
#[derive(Debug, Clone)]
pub struct FixedCacheLocation(pub PathBuf);

impl CacheLocation for FixedCacheLocation {
    fn base_dir(&self) -> Option<PathBuf> {
        Some(self.0.clone())
    }
}

/// A decoded clip that is ready to hand to an audio output.
#[derive(Clone, PartialEq, Eq)]
pub struct ClipHandle {
    name: Arc<str>,
    sample_rate: u32,
    samples: Arc<[i16]>,
}

impl ClipHandle {
    /// Decodes a mono 16-bit PCM WAVE image.
    pub fn decode(name: &str, bytes: &[u8]) -> Result<Self> {
        let reader = hound::WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        if spec.channels != 1
            || spec.bits_per_sample != 16
            || spec.sample_format != hound::SampleFormat::Int
        {
            return Err(MetronomeError::invalid(format!(
                "asset `{name}` is not mono 16-bit PCM ({} ch, {} bit)",
                spec.channels, spec.bits_per_sample
            )));
        }
        let samples = reader
            .into_samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            name: name.into(),
            sample_rate: spec.sample_rate,
            samples: samples.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }
}

impl fmt::Debug for ClipHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClipHandle")
            .field("name", &self.name)
            .field("sample_rate", &self.sample_rate)
            .field("samples", &self.samples.len())
            .finish()
    }
}

/// Maps logical asset names to durable encoded bytes, generating lazily.
#[derive(Debug, Clone)]
pub struct AssetCache {
    root: PathBuf,
}

impl AssetCache {
    /// Creates a cache rooted at `root`. Nothing is touched on disk until the
    /// first asset is resolved.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Roots the cache at `subdirectory` below the location's base directory,
    /// falling back to the OS temp directory when the platform has no cache
    /// directory.
    ///
    /// `subdirectory` must be a relative path made only of plain names so the
    /// root always stays inside the base directory.
    pub fn at_location(location: &dyn CacheLocation, subdirectory: &str) -> Result<Self> {
        validate_subdirectory(subdirectory)?;
        let base = location.base_dir().unwrap_or_else(|| {
            let fallback = std::env::temp_dir();
            warn!(
                fallback = %fallback.display(),
                "no platform cache directory, using temp dir"
            );
            fallback
        });
        Ok(Self::new(base.join(subdirectory)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn asset_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(format!("{name}.{ASSET_EXTENSION}")))
    }

    /// Returns a handle for `name`, loading it from disk when cached and
    /// otherwise encoding it with `generator` and writing it through.
    ///
    /// A cached file that cannot be decoded is regenerated. When the write
    /// fails the generated bytes are still decoded, so the caller gets a
    /// usable handle and the next resolve simply regenerates again.
    pub fn resolve<F>(&self, name: &str, generator: F) -> Result<ClipHandle>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let path = self.asset_path(name)?;

        if path.is_file() {
            let cached = fs::read(&path)
                .map_err(|source| MetronomeError::cache_io(&path, source))
                .and_then(|bytes| ClipHandle::decode(name, &bytes));
            match cached {
                Ok(handle) => {
                    debug!(asset = name, path = %path.display(), "loaded cached asset");
                    return Ok(handle);
                }
                Err(err) => warn!(asset = name, %err, "cached asset unreadable, regenerating"),
            }
        }

        let bytes = generator().map_err(|err| MetronomeError::AssetGenerationFailed {
            name: name.to_string(),
            reason: err.to_string(),
        })?;

        match self.store(&path, &bytes) {
            Ok(()) => info!(asset = name, bytes = bytes.len(), path = %path.display(), "cached asset"),
            Err(err) => warn!(asset = name, %err, "could not cache asset, keeping it in memory"),
        }

        ClipHandle::decode(name, &bytes)
    }

    /// Removes the whole cache directory. A missing directory is not an error.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                info!(path = %self.root.display(), "cleared audio cache");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(MetronomeError::cache_io(&self.root, err)),
        }
    }

    /// Total bytes of every file under the cache directory; 0 when the
    /// directory is missing or unreadable.
    pub fn size(&self) -> u64 {
        if !self.root.is_dir() {
            return 0;
        }
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.metadata().ok())
            .map(|meta| meta.len())
            .sum()
    }

    fn store(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root)
            .map_err(|source| MetronomeError::cache_io(&self.root, source))?;

        let staging = path.with_extension(format!("{ASSET_EXTENSION}.tmp"));
        fs::write(&staging, bytes).map_err(|source| MetronomeError::cache_io(&staging, source))?;
        fs::rename(&staging, path).map_err(|source| {
            let _ = fs::remove_file(&staging);
            MetronomeError::cache_io(path, source)
        })
    }
}

/// Accepts `a`, `a/b` and so on; rejects empty paths, `.`, `..`, and
/// absolute or prefixed paths.
pub fn validate_subdirectory(subdirectory: &str) -> Result<()> {
    let path = Path::new(subdirectory);
    let mut components = path.components().peekable();
    let valid = components.peek().is_some()
        && components.all(|component| matches!(component, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(MetronomeError::invalid(format!(
            "cache subdirectory `{subdirectory}` must be a relative path of plain names"
        )))
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(MetronomeError::invalid(format!(
            "asset name `{name}` may only contain letters, digits, `-` and `_`"
        )))
    }
}
