//! Audio engine for a children's vocabulary game.
//!
//! Plays vocabulary words, sentences and UI cues when assets may be missing, misnamed,
//! slow, or blocked until the first user interaction. Words degrade through sentence
//! templates, recorded assets, sprite clips, cloud and on-device speech, and finally an
//! accessibility announcement.
//!
//! ```rust,ignore
//! use vocab_audio::{AudioEngine, EngineConfig, HostServices};
//!
//! let config = EngineConfig::load()?;
//! let engine = AudioEngine::new(config.clone(), HostServices::native(&config))?;
//! engine.initialize();
//! engine.play_word("apple", None);
//! ```
pub mod audio_system;
pub mod config;
pub mod engine;
pub mod error;
pub mod i18n;
pub mod messaging;
pub mod orchestrator;
pub mod slug;
pub mod speech;
pub mod utils;

#[cfg(test)]
mod testing;

pub use audio_system::{Channel, ContextState, PlaybackRequest};
pub use config::EngineConfig;
pub use engine::{AudioEngine, DebugInfo, HostServices};
pub use error::{AudioError, ErrorKind, TierOutcome};
pub use i18n::Language;
pub use messaging::{Event, EventBus, PlaybackMethod, PlaybackTelemetry};
pub use speech::SpeakOptions;
