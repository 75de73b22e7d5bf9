use std::path::PathBuf;

/// Result alias that carries the custom [`MetronomeError`] type.
pub type Result<T> = std::result::Result<T, MetronomeError>;

/// Common error type for the core crate.
///
/// Failures on the audio path (session, generation, cache, playback) are
/// caught where they happen and downgraded to log records by the engine; the
/// variants exist so the primitives can still report precisely what failed.
#[derive(Debug, thiserror::Error)]
pub enum MetronomeError {
    /// The host audio output could not be activated.
    #[error("audio session could not be configured: {0}")]
    AudioSessionConfigurationFailed(String),
    /// Synthesis or encoding of a named asset failed.
    #[error("failed to generate asset `{name}`: {reason}")]
    AssetGenerationFailed { name: String, reason: String },
    /// Directory creation, write, read or delete inside the cache failed.
    #[error("cache I/O failed at {}: {source}", path.display())]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A loaded clip could not be handed to the audio output.
    #[error("playback failed: {0}")]
    PlaybackFailed(String),
    /// Encoded bytes are not a readable mono 16-bit PCM clip.
    #[error("invalid audio clip: {0}")]
    Decode(#[from] hound::Error),
    /// Caller supplied a value outside what the engine accepts.
    #[error("{0}")]
    InvalidInput(String),
    /// Configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl MetronomeError {
    /// Creates an [`MetronomeError::InvalidInput`] from any message.
    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub(crate) fn cache_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CacheIo {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_errors_name_the_path() {
        let err = MetronomeError::cache_io(
            "/tmp/sounds/click.wav",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let text = err.to_string();
        assert!(text.contains("/tmp/sounds/click.wav"));
        assert!(text.contains("denied"));
    }
}
