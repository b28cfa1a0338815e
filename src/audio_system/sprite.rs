/// Sprite playback
///
/// A sprite is one audio resource holding many short clips, described by a JSON
/// manifest:
///
/// ```text
/// {"spriteUrl": "sounds/sprite.mp3", "clips": {"apple": {"start": 1.2, "end": 1.9}}}
/// ```
///
/// The manifest is fetched once per session with bounded retries; a failure is
/// remembered until [`SpritePlayer::reset`]. The whole sprite is decoded on first use
/// and clips are played as slices of that buffer. When the sprite cannot be decoded
/// into memory, the encoded bytes are streamed from the clip start with a force-stop
/// just after its end.
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::decode::{self, DecodedBuffer};
use super::effects::PlayOptions;
use super::fetch::{extension_of, AssetFetcher};
use super::player::PlaybackEngine;
use crate::config::SpriteSettings;
use crate::error::AudioError;
use crate::slug;

/// Extra playing time allowed past a streamed clip's end
const STREAM_GRACE: Duration = Duration::from_millis(100);

/// Base delay between manifest attempts, multiplied by the attempt number
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Start and end of a clip, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpriteClip {
    pub start: f64,
    pub end: f64,
}

impl SpriteClip {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64((self.end - self.start).max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpriteManifest {
    #[serde(rename = "spriteUrl", default, skip_serializing_if = "Option::is_none")]
    pub sprite_url: Option<String>,
    pub clips: HashMap<String, SpriteClip>,
}

impl SpriteManifest {
    pub fn from_json(json: &[u8]) -> Result<Self, AudioError> {
        let manifest: SpriteManifest = serde_json::from_slice(json)
            .map_err(|e| AudioError::ManifestInvalid(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), AudioError> {
        if self.clips.is_empty() {
            return Err(AudioError::ManifestInvalid("no clips".to_string()));
        }
        for (name, clip) in &self.clips {
            if !clip.start.is_finite() || !clip.end.is_finite() || clip.end <= clip.start {
                return Err(AudioError::ManifestInvalid(format!(
                    "clip {} has end {} not after start {}",
                    name, clip.end, clip.start
                )));
            }
        }
        Ok(())
    }

    /// Clip by exact name, then by normalized key
    pub fn clip(&self, name: &str) -> Option<(&str, &SpriteClip)> {
        if let Some((key, clip)) = self.clips.get_key_value(name) {
            return Some((key.as_str(), clip));
        }
        let wanted = slug::normalize(name);
        self.clips
            .iter()
            .find(|(key, _)| slug::normalize(key) == wanted)
            .map(|(key, clip)| (key.as_str(), clip))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpriteConfig {
    pub sprite_url: String,
    pub manifest_url: String,
    pub retries: u32,
    pub timeout: Duration,
}

impl From<&SpriteSettings> for SpriteConfig {
    fn from(settings: &SpriteSettings) -> Self {
        Self {
            sprite_url: settings.sprite_url.clone(),
            manifest_url: settings.manifest_url.clone(),
            retries: settings.retries.max(1),
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }
}

#[derive(Debug, Clone)]
enum ManifestState {
    NotLoaded,
    Loaded(Arc<SpriteManifest>),
    Failed(String),
}

/// Loaded sprite resource
#[derive(Default)]
struct SpriteResource {
    bytes: Option<Arc<Vec<u8>>>,
    buffer: Option<DecodedBuffer>,
    /// Decoding was attempted and failed; use the stream path
    undecodable: bool,
}

pub struct SpritePlayer {
    fetcher: Arc<dyn AssetFetcher>,
    player: Arc<PlaybackEngine>,
    config: RwLock<Option<SpriteConfig>>,
    /// Held for the whole load so concurrent callers share one attempt
    manifest: Mutex<ManifestState>,
    resource: Mutex<SpriteResource>,
    backoff: Duration,
}

impl SpritePlayer {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, player: Arc<PlaybackEngine>) -> Self {
        Self {
            fetcher,
            player,
            config: RwLock::new(None),
            manifest: Mutex::new(ManifestState::NotLoaded),
            resource: Mutex::new(SpriteResource::default()),
            backoff: RETRY_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Point the player at a sprite; previous state is dropped
    pub fn configure(&self, config: SpriteConfig) {
        tracing::info!("Sprite configured: {}", config.manifest_url);
        *self.config.write() = Some(config);
        self.reset();
    }

    pub fn is_configured(&self) -> bool {
        self.config.read().is_some()
    }

    /// Forget the manifest (including a cached failure) and the sprite resource
    pub fn reset(&self) {
        *self.manifest.lock() = ManifestState::NotLoaded;
        *self.resource.lock() = SpriteResource::default();
    }

    /// Manifest for this session, fetching it on first call
    pub fn load_manifest(&self) -> Option<Arc<SpriteManifest>> {
        let config = self.config.read().clone()?;
        let mut state = self.manifest.lock();
        match &*state {
            ManifestState::Loaded(manifest) => return Some(manifest.clone()),
            ManifestState::Failed(_) => return None,
            ManifestState::NotLoaded => {}
        }

        match self.fetch_manifest(&config) {
            Ok(manifest) => {
                tracing::info!("Sprite manifest loaded: {} clips", manifest.clips.len());
                let manifest = Arc::new(manifest);
                *state = ManifestState::Loaded(manifest.clone());
                Some(manifest)
            }
            Err(e) => {
                tracing::warn!("Sprite disabled for this session: {}", e);
                *state = ManifestState::Failed(e.to_string());
                None
            }
        }
    }

    fn fetch_manifest(&self, config: &SpriteConfig) -> Result<SpriteManifest, AudioError> {
        let mut last_error = AudioError::ManifestInvalid("no attempt made".to_string());
        for attempt in 1..=config.retries {
            match self.fetcher.fetch(&config.manifest_url, config.timeout) {
                Ok(bytes) => return SpriteManifest::from_json(&bytes),
                Err(e) => {
                    tracing::debug!(
                        "Sprite manifest attempt {}/{} failed: {}",
                        attempt,
                        config.retries,
                        e
                    );
                    last_error = e;
                }
            }
            if attempt < config.retries {
                thread::sleep(self.backoff * attempt);
            }
        }
        Err(last_error)
    }

    /// Reason the manifest is disabled for this session, if it is
    pub fn manifest_error(&self) -> Option<String> {
        match &*self.manifest.lock() {
            ManifestState::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    pub fn has_clip(&self, name: &str) -> bool {
        self.load_manifest()
            .is_some_and(|manifest| manifest.clip(name).is_some())
    }

    /// Play one clip. False when the sprite is unavailable, the clip is unknown, or
    /// nothing could be started.
    pub fn play_clip(&self, name: &str, opts: &PlayOptions) -> bool {
        let Some(config) = self.config.read().clone() else {
            return false;
        };
        let Some(manifest) = self.load_manifest() else {
            return false;
        };
        let Some((clip_name, clip)) = manifest.clip(name) else {
            tracing::debug!("No sprite clip for {}", name);
            return false;
        };
        let clip = *clip;
        let key = format!("sprite:{}", clip_name);
        let sprite_url = manifest
            .sprite_url
            .clone()
            .unwrap_or_else(|| config.sprite_url.clone());

        let (buffer, bytes) = match self.load_resource(&sprite_url, config.timeout) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!("Sprite resource unavailable: {}", e);
                return false;
            }
        };

        if let Some(buffer) = buffer {
            let Some(slice) = buffer.slice(clip.start, clip.end) else {
                tracing::warn!("Sprite clip {} lies outside the resource", clip_name);
                return false;
            };
            return match self.player.start_buffer_with(&slice, &key, opts) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!("Sprite clip {} failed to start: {}", clip_name, e);
                    false
                }
            };
        }

        let stream_opts = opts
            .clone()
            .with_offset((clip.start * 1000.0).round() as u64)
            .with_limit(clip.duration().as_millis() as u64);
        let max_duration = clip.duration() + STREAM_GRACE + opts.delay();
        match self
            .player
            .play_stream(bytes.to_vec(), &key, &stream_opts, Some(max_duration))
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Sprite clip {} failed to stream: {}", clip_name, e);
                false
            }
        }
    }

    /// Sprite bytes, plus the decoded buffer when decoding succeeded
    fn load_resource(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<(Option<DecodedBuffer>, Arc<Vec<u8>>), AudioError> {
        let mut resource = self.resource.lock();
        let bytes = match &resource.bytes {
            Some(bytes) => bytes.clone(),
            None => {
                let bytes = Arc::new(self.fetcher.fetch(url, timeout)?);
                resource.bytes = Some(bytes.clone());
                bytes
            }
        };

        if resource.buffer.is_none() && !resource.undecodable {
            match decode::decode(&bytes, extension_of(url)) {
                Ok(buffer) => {
                    tracing::debug!("Sprite decoded: {:?}", buffer);
                    resource.buffer = Some(buffer);
                }
                Err(e) => {
                    tracing::warn!("Sprite not decodable, streaming clips: {}", e);
                    resource.undecodable = true;
                }
            }
        }
        Ok((resource.buffer.clone(), bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_system::effects::MasterVolume;
    use crate::messaging::EventBus;
    use crate::testing::{running_context, wav_bytes, FakeOutput, MemoryFetcher};

    const MANIFEST: &str = r#"{"clips":{
        "apple": {"start": 0.5, "end": 1.0},
        "ice cream": {"start": 1.0, "end": 1.8}
    }}"#;

    fn setup(fetcher: Arc<MemoryFetcher>) -> (SpritePlayer, Arc<FakeOutput>) {
        let bus = EventBus::new();
        let (context, output) = running_context(bus.clone());
        let player = Arc::new(PlaybackEngine::new(context, Arc::new(MasterVolume::default()), bus));
        let sprite = SpritePlayer::new(fetcher, player).with_backoff(Duration::from_millis(1));
        sprite.configure(SpriteConfig {
            sprite_url: "sounds/sprite.wav".into(),
            manifest_url: "sounds/sprite.json".into(),
            retries: 3,
            timeout: Duration::from_secs(1),
        });
        (sprite, output)
    }

    fn approx(a: Duration, b: Duration) -> bool {
        let diff = if a > b { a - b } else { b - a };
        diff < Duration::from_millis(5)
    }

    #[test]
    fn test_unconfigured_is_noop() {
        let bus = EventBus::new();
        let (context, _) = running_context(bus.clone());
        let player = Arc::new(PlaybackEngine::new(context, Arc::new(MasterVolume::default()), bus));
        let sprite = SpritePlayer::new(Arc::new(MemoryFetcher::new()), player);
        assert!(!sprite.is_configured());
        assert!(!sprite.play_clip("apple", &PlayOptions::default()));
    }

    #[test]
    fn test_play_clip_slices_buffer() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert("sounds/sprite.json", MANIFEST.as_bytes().to_vec());
        fetcher.insert("sounds/sprite.wav", wav_bytes(2_000, 8_000, 1));
        let (sprite, output) = setup(fetcher.clone());

        assert!(sprite.play_clip("apple", &PlayOptions::default()));
        assert!(sprite.play_clip("Ice-Cream", &PlayOptions::default()));
        assert!(!sprite.play_clip("zebra", &PlayOptions::default()));

        let plays = output.plays();
        assert_eq!(plays.len(), 2);
        assert!(approx(plays[0].duration, Duration::from_millis(500)));
        assert!(approx(plays[1].duration, Duration::from_millis(800)));

        // Manifest and sprite fetched once
        assert_eq!(fetcher.fetch_count("sounds/sprite.json"), 1);
        assert_eq!(fetcher.fetch_count("sounds/sprite.wav"), 1);
    }

    #[test]
    fn test_manifest_failure_is_cached() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let (sprite, _) = setup(fetcher.clone());

        assert!(!sprite.play_clip("apple", &PlayOptions::default()));
        assert_eq!(fetcher.fetch_count("sounds/sprite.json"), 3);
        assert!(!sprite.play_clip("apple", &PlayOptions::default()));
        assert_eq!(fetcher.fetch_count("sounds/sprite.json"), 3);
        assert!(sprite.manifest_error().is_some());

        fetcher.insert("sounds/sprite.json", MANIFEST.as_bytes().to_vec());
        fetcher.insert("sounds/sprite.wav", wav_bytes(2_000, 8_000, 1));
        sprite.reset();
        assert!(sprite.play_clip("apple", &PlayOptions::default()));
    }

    #[test]
    fn test_manifest_validation() {
        assert!(matches!(
            SpriteManifest::from_json(br#"{"clips":{}}"#),
            Err(AudioError::ManifestInvalid(_))
        ));
        assert!(matches!(
            SpriteManifest::from_json(br#"{"clips":{"a":{"start":2.0,"end":1.0}}}"#),
            Err(AudioError::ManifestInvalid(_))
        ));
        assert!(SpriteManifest::from_json(MANIFEST.as_bytes()).is_ok());
    }

    #[test]
    fn test_manifest_sprite_url_override() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(
            "sounds/sprite.json",
            br#"{"spriteUrl":"cdn/words.wav","clips":{"dog":{"start":0.0,"end":0.3}}}"#.to_vec(),
        );
        fetcher.insert("cdn/words.wav", wav_bytes(1_000, 8_000, 1));
        let (sprite, _) = setup(fetcher.clone());

        assert!(sprite.play_clip("dog", &PlayOptions::default()));
        assert_eq!(fetcher.fetch_count("cdn/words.wav"), 1);
        assert_eq!(fetcher.fetch_count("sounds/sprite.wav"), 0);
    }

    #[test]
    fn test_garbage_sprite_plays_nothing() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert("sounds/sprite.json", MANIFEST.as_bytes().to_vec());
        // Neither the buffer nor the stream path can decode this
        fetcher.insert("sounds/sprite.wav", b"not audio".to_vec());
        let (sprite, output) = setup(fetcher);

        assert!(!sprite.play_clip("apple", &PlayOptions::default()));
        assert!(output.plays().is_empty());
    }
}
