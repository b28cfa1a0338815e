/// Event types emitted by the engine
///
/// Events represent things that have happened (past tense).
/// They are broadcast to all subscribers; the engine never waits on a subscriber.
use std::fmt;

use serde::Serialize;

use crate::audio_system::context::ContextState;
use crate::audio_system::preloader::Tier;
use crate::audio_system::source::Channel;
use crate::error::ErrorKind;

/// Strategy that produced (or failed to produce) audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaybackMethod {
    /// Language-specific full sentence spoken by a voice
    SentenceTemplate,
    /// Cloud or on-device text-to-speech
    SpeechSynthesis,
    /// Decoded buffer from the asset cache
    AudioBuffer,
    /// Named sub-range of the sprite resource
    Sprite,
    /// Per-word buffers joined with short gaps
    WordConcatenation,
    /// Streaming decode of the encoded asset
    StreamFallback,
    /// Every strategy failed
    Exhausted,
}

impl PlaybackMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackMethod::SentenceTemplate => "sentence-template",
            PlaybackMethod::SpeechSynthesis => "speech-synthesis",
            PlaybackMethod::AudioBuffer => "audio-buffer",
            PlaybackMethod::Sprite => "sprite",
            PlaybackMethod::WordConcatenation => "word-concatenation",
            PlaybackMethod::StreamFallback => "stream-fallback",
            PlaybackMethod::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for PlaybackMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One playback attempt, successful or not
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackTelemetry {
    pub method: PlaybackMethod,
    pub key: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<ErrorKind>,
}

impl PlaybackTelemetry {
    pub fn success(method: PlaybackMethod, key: &str, duration_ms: u64) -> Self {
        Self {
            method,
            key: key.to_string(),
            success: true,
            duration_ms,
            error: None,
        }
    }

    pub fn failure(method: PlaybackMethod, key: &str, duration_ms: u64, error: ErrorKind) -> Self {
        Self {
            method,
            key: key.to_string(),
            success: false,
            duration_ms,
            error: Some(error),
        }
    }
}

/// Engine events
#[derive(Debug, Clone)]
pub enum Event {
    /// A playback strategy finished its attempt
    PlaybackAttempt(PlaybackTelemetry),

    /// Text for assistive technology when nothing audible could be produced
    Announcement { text: String },

    /// A managed request lost arbitration and was not played
    RequestDropped {
        key: String,
        channel: Channel,
        priority: i32,
    },

    /// An active channel was faded out for a higher (or equal) priority request
    ChannelPreempted {
        channel: Channel,
        key: String,
        by: Channel,
    },

    /// The audio context moved between lifecycle states
    ContextStateChanged {
        old_state: ContextState,
        new_state: ContextState,
    },

    /// A preload tier finished (best effort)
    TierLoaded {
        tier: Tier,
        loaded: usize,
        failed: usize,
    },

    /// The engine was disposed
    Shutdown,
}

impl Event {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            Event::PlaybackAttempt(t) => match t.error {
                None => format!("{} played {} in {}ms", t.method, t.key, t.duration_ms),
                Some(kind) => format!("{} failed for {} ({})", t.method, t.key, kind),
            },
            Event::Announcement { text } => format!("Announcement: {}", text),
            Event::RequestDropped {
                key,
                channel,
                priority,
            } => format!("Dropped {} on {} at priority {}", key, channel, priority),
            Event::ChannelPreempted { channel, key, by } => {
                format!("{} ({}) preempted by {}", channel, key, by)
            }
            Event::ContextStateChanged { new_state, .. } => {
                format!("Audio context: {}", new_state.description())
            }
            Event::TierLoaded {
                tier,
                loaded,
                failed,
            } => format!("{:?} tier loaded ({} ok, {} failed)", tier, loaded, failed),
            Event::Shutdown => "Shutting down".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_description() {
        let event = Event::PlaybackAttempt(PlaybackTelemetry::success(
            PlaybackMethod::AudioBuffer,
            "dog",
            12,
        ));
        assert_eq!(event.description(), "audio-buffer played dog in 12ms");

        let event = Event::PlaybackAttempt(PlaybackTelemetry::failure(
            PlaybackMethod::Sprite,
            "cat",
            3,
            ErrorKind::ManifestInvalid,
        ));
        assert_eq!(event.description(), "sprite failed for cat (manifest-invalid)");
    }

    #[test]
    fn test_telemetry_serializes_codes() {
        let t = PlaybackTelemetry::failure(
            PlaybackMethod::SpeechSynthesis,
            "apple",
            40,
            ErrorKind::SynthesisUnavailable,
        );
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"method\":\"speech-synthesis\""));
        assert!(json.contains("\"error\":\"synthesis-unavailable\""));
    }
}
