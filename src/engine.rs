/// Public audio façade
///
/// `AudioEngine` owns every long-lived service (context, loader, preloader, player,
/// speech, sprite player, arbiter, orchestrator) and exposes the handful of calls a
/// game screen needs. Every call is best effort: failures are logged and published as
/// telemetry, never returned as errors.
///
/// Platform access is injected through [`HostServices`] so the same engine runs against
/// the real rodio output or against test doubles.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use serde::Serialize;

use crate::audio_system::context::{ContextManager, ContextState, OutputFactory};
use crate::audio_system::effects::MasterVolume;
use crate::audio_system::fetch::{AssetFetcher, HttpFetcher};
use crate::audio_system::loader::{BufferLoader, SpeechFallback};
use crate::audio_system::manager::{
    ChannelArbiter, ChannelSnapshot, ManagedOutcome, PlaybackRequest,
};
use crate::audio_system::output::{AudioOutput, RodioOutput};
use crate::audio_system::player::PlaybackEngine;
use crate::audio_system::preloader::{Preloader, Tier};
use crate::audio_system::registry::AssetRegistry;
use crate::audio_system::source::Channel;
use crate::audio_system::sprite::{SpriteConfig, SpritePlayer};
use crate::config::EngineConfig;
use crate::error::{AudioError, ErrorKind, TierOutcome};
use crate::i18n::Language;
use crate::messaging::{Event, EventBus, PlaybackMethod, PlaybackTelemetry, SubscriberId};
use crate::orchestrator::WordOrchestrator;
use crate::slug::{self, KeyResolver};
use crate::speech::cloud::{CloudTts, ElevenLabsClient};
use crate::speech::device::{CommandSpeech, DeviceSpeech, NoDeviceSpeech};
use crate::speech::{CloudStatus, SpeakOptions, SpeechSynthesizer};
use crate::utils::MethodSummary;

/// Platform services the engine runs on
pub struct HostServices {
    pub output: OutputFactory,
    pub fetcher: Arc<dyn AssetFetcher>,
    pub device_speech: Arc<dyn DeviceSpeech>,
    pub cloud_tts: Option<Arc<dyn CloudTts>>,
}

impl HostServices {
    /// Default output device, HTTP/file assets, installed speech command and the
    /// configured cloud provider
    pub fn native(config: &EngineConfig) -> Self {
        let output: OutputFactory = Box::new(|| {
            RodioOutput::open_default().map(|output| Arc::new(output) as Arc<dyn AudioOutput>)
        });

        let device_speech: Arc<dyn DeviceSpeech> = match CommandSpeech::detect() {
            Some(speech) => Arc::new(speech),
            None => {
                tracing::info!("No on-device speech engine found");
                Arc::new(NoDeviceSpeech)
            }
        };

        let cloud_tts = ElevenLabsClient::from_settings(&config.tts)
            .map(|client| Arc::new(client) as Arc<dyn CloudTts>);

        Self {
            output,
            fetcher: Arc::new(HttpFetcher::new()),
            device_speech,
            cloud_tts,
        }
    }
}

/// Point-in-time engine state for diagnostics screens and logs
#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub context_state: ContextState,
    pub language: String,
    pub master_volume: f32,
    pub cached_buffers: usize,
    pub cache_capacity: usize,
    pub loads_in_flight: usize,
    pub fetches: u64,
    pub registered_assets: usize,
    pub loaded_tiers: Vec<Tier>,
    pub active_voices: Vec<String>,
    pub channels: Vec<ChannelSnapshot>,
    pub cloud_tts: String,
    pub cached_phrases: usize,
    pub sprite_configured: bool,
    pub sprite_error: Option<String>,
    pub playback: Vec<MethodSummary>,
}

pub struct AudioEngine {
    config: EngineConfig,
    bus: EventBus,
    context: Arc<ContextManager>,
    loader: Arc<BufferLoader>,
    preloader: Arc<Preloader>,
    player: Arc<PlaybackEngine>,
    speech: Arc<SpeechSynthesizer>,
    sprite: Arc<SpritePlayer>,
    arbiter: Arc<ChannelArbiter>,
    words: Arc<WordOrchestrator>,
    fetcher: Arc<dyn AssetFetcher>,
    initialized: AtomicBool,
}

impl AudioEngine {
    /// Wire the services. Nothing touches the output or the network until
    /// [`initialize`](Self::initialize).
    pub fn new(config: EngineConfig, host: HostServices) -> Result<Self, AudioError> {
        let bus = EventBus::new();
        let language = Language::from_code(&config.language).unwrap_or_else(|| {
            tracing::warn!("Unknown language {:?}, using English", config.language);
            Language::default()
        });

        let context = Arc::new(ContextManager::new(
            host.output,
            config.require_user_gesture,
            bus.clone(),
        ));
        let master = Arc::new(MasterVolume::new(config.volume));
        let player = Arc::new(PlaybackEngine::new(context.clone(), master, bus.clone()));

        let loader = Arc::new(BufferLoader::new(
            host.fetcher.clone(),
            Arc::new(KeyResolver::new()),
            &config.asset_base,
            config.cache_capacity,
            Duration::from_millis(config.fetch_timeout_ms),
        ));
        let preloader = Arc::new(Preloader::new(
            loader.clone(),
            config.preload_concurrency,
            bus.clone(),
        )?);

        let speech = Arc::new(SpeechSynthesizer::new(
            player.clone(),
            host.cloud_tts,
            host.device_speech,
            config.tts.clone(),
            config.voice_cache_capacity,
            language,
        ));
        loader.set_speech_fallback(speech.clone() as Arc<dyn SpeechFallback>);

        let sprite = Arc::new(SpritePlayer::new(host.fetcher.clone(), player.clone()));
        let arbiter = Arc::new(ChannelArbiter::new(
            loader.clone(),
            player.clone(),
            config.fade_out_ms,
            config.preempt_equal_priority,
            Duration::from_millis(config.stream_max_duration_ms),
            bus.clone(),
        ));
        let words = Arc::new(WordOrchestrator::new(
            loader.clone(),
            player.clone(),
            speech.clone(),
            sprite.clone(),
            arbiter.clone(),
            language,
            Duration::from_millis(config.word_gap_ms),
            bus.clone(),
        ));

        Ok(Self {
            config,
            bus,
            context,
            loader,
            preloader,
            player,
            speech,
            sprite,
            arbiter,
            words,
            fetcher: host.fetcher,
            initialized: AtomicBool::new(false),
        })
    }

    /// Create the output, load the asset manifest, probe the cloud voice and start
    /// preloading. Calling it again before `dispose` does nothing.
    pub fn initialize(&self) -> ContextState {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return self.context.state();
        }
        let state = self.context.initialize();
        tracing::info!("Audio engine initializing ({})", state.description());

        if let Some(location) = &self.config.manifest_path {
            let timeout = Duration::from_millis(self.config.fetch_timeout_ms);
            match AssetRegistry::load(self.fetcher.as_ref(), location, timeout) {
                Ok(registry) => self.loader.set_registry(registry),
                Err(e) => tracing::warn!("Asset manifest unavailable, probing formats: {}", e),
            }
        }

        if self.config.sprite.enabled {
            self.sprite.configure(SpriteConfig::from(&self.config.sprite));
        }

        if self.config.cloud_tts_enabled() {
            let speech = self.speech.clone();
            let spawned = thread::Builder::new()
                .name("tts-probe".to_string())
                .spawn(move || {
                    speech.probe_cloud();
                });
            if let Err(e) = spawned {
                tracing::warn!("Failed to start TTS probe: {}", e);
            }
        }

        self.preloader.start(&self.context);
        state
    }

    /// Stop everything and release the output. `initialize` may be called again.
    pub fn dispose(&self) {
        self.words.stop();
        self.context.dispose();
        self.sprite.reset();
        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!("Audio engine disposed");
        self.bus.publish(Event::Shutdown);
    }

    /// Forward the host's first click, touch or key press
    pub fn notify_user_interaction(&self) {
        self.context.notify_user_interaction();
    }

    pub fn context_state(&self) -> ContextState {
        self.context.state()
    }

    pub fn subscribe(&self) -> (Receiver<Event>, SubscriberId) {
        self.bus.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.bus.unsubscribe(id);
    }

    /// Play a vocabulary word or phrase, superseding any word still playing
    pub fn play_word(&self, phrase: &str, volume: Option<f32>) -> Option<PlaybackMethod> {
        self.words.play_word(phrase, volume.unwrap_or(1.0))
    }

    /// Play a named UI or gameplay sound on the gameplay channel.
    ///
    /// Speaks the name with the on-device voice when no asset can be played.
    pub fn play_sound(&self, name: &str, rate: Option<f32>, volume: Option<f32>) -> bool {
        let mut request = PlaybackRequest::new(name, Channel::Gameplay);
        if let Some(rate) = rate {
            request = request.with_rate(rate);
        }
        if let Some(volume) = volume {
            request = request.with_volume(volume);
        }
        self.play_request(&request)
    }

    /// Arbitrated playback on any channel, with the spoken fallback
    pub fn play_managed(&self, request: &PlaybackRequest) -> bool {
        self.play_request(request)
    }

    fn play_request(&self, request: &PlaybackRequest) -> bool {
        let started = Instant::now();
        match self.arbiter.play_managed(request) {
            ManagedOutcome::Started => true,
            ManagedOutcome::Dropped | ManagedOutcome::Stale => false,
            ManagedOutcome::Failed(ErrorKind::AutoplayBlocked) => false,
            ManagedOutcome::Failed(kind) => {
                tracing::debug!("No asset for {:?} ({}), speaking it", request.key, kind);
                let spoken = self.loader.speak_fallback(&request.key);
                let key = slug::normalize(&request.key);
                let elapsed = started.elapsed().as_millis() as u64;
                let telemetry = if spoken {
                    PlaybackTelemetry::success(PlaybackMethod::SpeechSynthesis, &key, elapsed)
                } else {
                    PlaybackTelemetry::failure(
                        PlaybackMethod::SpeechSynthesis,
                        &key,
                        elapsed,
                        ErrorKind::SynthesisUnavailable,
                    )
                };
                self.bus.playback(telemetry);
                spoken
            }
        }
    }

    /// Speak arbitrary text, blocking until it finishes
    pub fn play_speech(&self, text: &str, options: SpeakOptions) -> TierOutcome {
        let started = Instant::now();
        let outcome = self.speech.speak_async(text, &options);
        let key = slug::normalize(text);
        let elapsed = started.elapsed().as_millis() as u64;
        let telemetry = match outcome.error_kind() {
            None => PlaybackTelemetry::success(PlaybackMethod::SpeechSynthesis, &key, elapsed),
            Some(kind) => {
                PlaybackTelemetry::failure(PlaybackMethod::SpeechSynthesis, &key, elapsed, kind)
            }
        };
        self.bus.playback(telemetry);
        outcome
    }

    /// Fade out and clear one channel
    pub fn stop_channel(&self, channel: Channel) {
        self.arbiter.stop_channel(channel);
    }

    pub fn stop_all_audio(&self) {
        self.words.stop();
    }

    /// Warm the buffer cache. Returns how many keys ended up cached.
    pub fn prefetch_audio_keys(&self, keys: &[String]) -> usize {
        self.preloader.prefetch(keys)
    }

    /// Switch the spoken language by ISO 639-1 code. False for unknown codes.
    pub fn set_language(&self, code: &str) -> bool {
        match Language::from_code(code) {
            Some(language) => {
                self.speech.set_language(language);
                self.words.set_language(language);
                tracing::info!("Language set to {}", language.name());
                true
            }
            None => {
                tracing::warn!("Ignoring unknown language code {:?}", code);
                false
            }
        }
    }

    pub fn language(&self) -> Language {
        self.words.language()
    }

    /// Master volume for new and sounding voices, clamped to 0.0-1.0
    pub fn set_volume(&self, volume: f32) {
        self.player.set_master_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.player.master_volume()
    }

    pub fn debug_info(&self) -> DebugInfo {
        let cloud_tts = match self.speech.cloud_status() {
            CloudStatus::Unknown if !self.speech.cloud_enabled() => "not configured".to_string(),
            CloudStatus::Unknown => "unknown".to_string(),
            CloudStatus::Available => "available".to_string(),
            CloudStatus::Disabled(reason) => format!("disabled: {}", reason),
        };

        DebugInfo {
            context_state: self.context.state(),
            language: self.language().code().to_string(),
            master_volume: self.player.master_volume(),
            cached_buffers: self.loader.cached_count(),
            cache_capacity: self.loader.cache_capacity(),
            loads_in_flight: self.loader.in_flight_count(),
            fetches: self.loader.fetch_count(),
            registered_assets: self.loader.registry().len(),
            loaded_tiers: self.preloader.loaded_tiers(),
            active_voices: self.player.active_keys(),
            channels: self.arbiter.channel_snapshot(),
            cloud_tts,
            cached_phrases: self.speech.cached_count(),
            sprite_configured: self.sprite.is_configured(),
            sprite_error: self.sprite.manifest_error(),
            playback: self.bus.playback_summary(),
        }
    }
}
