pub mod cache;
pub mod context;
pub mod decode;
pub mod effects;
pub mod fetch;
pub mod loader;
pub mod manager;
pub mod output;
pub mod player;
pub mod preloader;
pub mod registry;
/// Audio system module
///
/// Everything between a sound name and a sounding voice:
/// - Key resolution against the asset manifest, buffer loading and LRU caching
/// - Tiered preloading on a bounded pool
/// - Voice playback with fades, master volume and a stream fallback
/// - Sprite sub-clips and per-channel priority arbitration
///
/// ## Architecture
///
/// ```text
/// ChannelArbiter (welcome / menu / gameplay / system)
///   └── BufferLoader ── BufferCache (LRU)
///         │    └── AssetFetcher (http / file)
///         └── Preloader (critical → common → rare)
///
/// PlaybackEngine (one voice per key)
///   ├── buffer voices  ─┐
///   ├── stream voices  ─┤ AudioOutput (rodio)
///   └── SpritePlayer   ─┘
///
/// ContextManager gates every start on the output lifecycle.
/// ```
///
/// ## Usage
///
/// ```rust,ignore
/// use audio_system::{ChannelArbiter, Channel, PlaybackRequest};
///
/// let request = PlaybackRequest::new("correct", Channel::Gameplay)
///     .with_fade_in(50)
///     .with_volume(0.8);
///
/// match arbiter.play_managed(&request) {
///     ManagedOutcome::Started => {}
///     outcome => tracing::debug!("not played: {:?}", outcome),
/// }
/// ```
pub mod source;
pub mod sprite;

// Re-export commonly used types
pub use context::{ContextManager, ContextState};
pub use decode::DecodedBuffer;
pub use effects::{GainRamp, MasterVolume, PlayOptions};
pub use fetch::{AssetFetcher, HttpFetcher};
pub use loader::{BufferLoader, LoadResult};
pub use manager::{ChannelArbiter, ManagedOutcome, PlaybackRequest};
pub use output::{AudioOutput, RodioOutput, Voice, VoiceParams};
pub use player::{PlaybackEnd, PlaybackEngine, PlaybackHandle};
pub use preloader::{Preloader, Tier};
pub use registry::{AssetRegistry, AudioAsset};
pub use source::Channel;
pub use sprite::{SpriteConfig, SpriteManifest, SpritePlayer};
