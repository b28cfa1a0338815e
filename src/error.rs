use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Error codes recorded in telemetry.
///
/// Every failure the engine sees maps onto one of these so later analysis can tell
/// which fallback tier fired and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    AssetNotFound,
    DecodeFailure,
    NetworkTimeout,
    SynthesisUnavailable,
    AutoplayBlocked,
    ManifestInvalid,
    PlaybackError,
}

impl ErrorKind {
    /// Stable telemetry code
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::AssetNotFound => "asset-not-found",
            ErrorKind::DecodeFailure => "decode-failure",
            ErrorKind::NetworkTimeout => "network-timeout",
            ErrorKind::SynthesisUnavailable => "synthesis-unavailable",
            ErrorKind::AutoplayBlocked => "autoplay-blocked",
            ErrorKind::ManifestInvalid => "manifest-invalid",
            ErrorKind::PlaybackError => "playback-error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Engine-level errors using thiserror for structured error handling.
///
/// These never cross the public façade: the loader and everything above it turn them
/// into `None` or a [`TierOutcome`] after logging.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio asset not found: {0}")]
    NotFound(String),

    #[error("Failed to decode audio: {0}")]
    DecodeFailed(String),

    #[error("Network request failed: {0}")]
    Network(String),

    #[error("Network request timed out: {0}")]
    Timeout(String),

    #[error("Speech synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    #[error("Audio context is not available")]
    ContextUnavailable,

    #[error("Audio output is waiting for a user gesture")]
    AutoplayBlocked,

    #[error("Invalid sprite manifest: {0}")]
    ManifestInvalid(String),

    #[error("Audio playback failed: {0}")]
    PlaybackFailed(String),

    #[error("Voice already stopped")]
    AlreadyStopped,
}

impl AudioError {
    /// Telemetry classification for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AudioError::NotFound(_) => ErrorKind::AssetNotFound,
            AudioError::DecodeFailed(_) => ErrorKind::DecodeFailure,
            AudioError::Network(_) | AudioError::Timeout(_) => ErrorKind::NetworkTimeout,
            AudioError::SynthesisUnavailable(_) => ErrorKind::SynthesisUnavailable,
            AudioError::AutoplayBlocked => ErrorKind::AutoplayBlocked,
            AudioError::ManifestInvalid(_) => ErrorKind::ManifestInvalid,
            AudioError::ContextUnavailable
            | AudioError::PlaybackFailed(_)
            | AudioError::AlreadyStopped => ErrorKind::PlaybackError,
        }
    }
}

/// Cloud text-to-speech failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TtsError {
    #[error("TTS credential rejected (HTTP {0})")]
    Unauthorized(u16),

    #[error("TTS provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("TTS provider unreachable: {0}")]
    Unreachable(String),

    #[error("Cloud TTS is not configured")]
    NotConfigured,
}

impl TtsError {
    /// Whether the cloud path should be skipped for the rest of the session
    pub fn disables_session(&self) -> bool {
        matches!(
            self,
            TtsError::Unauthorized(_) | TtsError::Unreachable(_) | TtsError::NotConfigured
        )
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from {path}")]
    LoadFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to save configuration to {path}")]
    SaveFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to create config directory: {path}")]
    DirectoryCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a single fallback tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierOutcome {
    Success,
    NotFound,
    Error(ErrorKind),
}

impl TierOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TierOutcome::Success)
    }

    /// Error code for telemetry, `None` on success
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            TierOutcome::Success => None,
            TierOutcome::NotFound => Some(ErrorKind::AssetNotFound),
            TierOutcome::Error(kind) => Some(*kind),
        }
    }
}

impl From<&AudioError> for TierOutcome {
    fn from(err: &AudioError) -> Self {
        match err {
            AudioError::NotFound(_) => TierOutcome::NotFound,
            other => TierOutcome::Error(other.kind()),
        }
    }
}

/// Type alias for application Results using anyhow for context chaining
pub type AppResult<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_display() {
        let err = AudioError::NotFound("apple".to_string());
        assert_eq!(err.to_string(), "Audio asset not found: apple");

        let err = AudioError::AlreadyStopped;
        assert_eq!(err.to_string(), "Voice already stopped");
    }

    #[test]
    fn test_error_kind_codes() {
        assert_eq!(AudioError::Timeout("x".into()).kind().code(), "network-timeout");
        assert_eq!(AudioError::AutoplayBlocked.kind(), ErrorKind::AutoplayBlocked);
        assert_eq!(
            AudioError::ManifestInvalid("empty".into()).kind().to_string(),
            "manifest-invalid"
        );
    }

    #[test]
    fn test_tier_outcome_from_error() {
        assert_eq!(
            TierOutcome::from(&AudioError::NotFound("k".into())),
            TierOutcome::NotFound
        );
        assert_eq!(
            TierOutcome::from(&AudioError::DecodeFailed("bad".into())),
            TierOutcome::Error(ErrorKind::DecodeFailure)
        );
        assert_eq!(TierOutcome::Success.error_kind(), None);
    }

    #[test]
    fn test_tts_error_session_policy() {
        assert!(TtsError::Unauthorized(401).disables_session());
        assert!(TtsError::Unreachable("dns".into()).disables_session());
        assert!(!TtsError::Http {
            status: 500,
            message: "busy".into()
        }
        .disables_session());
    }

    #[test]
    fn test_error_source_chain() {
        use std::io;

        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let config_err = ConfigError::LoadFailed {
            path: "/test/config.json".to_string(),
            source: Box::new(io_err),
        };

        assert!(config_err.source().is_some());
        assert_eq!(
            config_err.to_string(),
            "Failed to load configuration from /test/config.json"
        );
    }
}
