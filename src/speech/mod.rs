/// Speech synthesis
///
/// Text is spoken through the cloud provider when a credential is configured and the
/// provider has not failed this session, otherwise through the on-device voice.
/// Cloud audio is cached by (language, text) and played through the playback engine
/// under the [`SPEECH_KEY`] key, so a new utterance always replaces the previous one.
///
/// ```text
/// speak_async(text)
///   ├── voice cache hit ──────────────┐
///   ├── cloud provider ──> cache ─────┴──> decode ──> PlaybackEngine("speech")
///   └── on-device voice (10 s guard)
/// ```
pub mod cache;
pub mod cloud;
pub mod device;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::{Mutex, RwLock};

use crate::audio_system::decode;
use crate::audio_system::loader::SpeechFallback;
use crate::audio_system::player::{PlaybackEnd, PlaybackEngine};
use crate::config::TtsSettings;
use crate::error::{ErrorKind, TierOutcome, TtsError};
use crate::i18n::{Language, SentenceTemplates};

pub use cache::VoiceCache;
pub use cloud::{CloudTts, ElevenLabsClient, SynthesisRequest, VoiceSettings};
pub use device::{select_voice, CommandSpeech, DeviceSpeech, DeviceVoice, NoDeviceSpeech, Utterance};

/// Playback key used for synthesized audio
pub const SPEECH_KEY: &str = "speech";

/// Guard for on-device utterances that never report completion
pub const DEVICE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct SpeakOptions {
    /// Overrides the synthesizer's current language
    pub language: Option<Language>,
    pub volume: f32,
    pub rate: f32,
    pub pitch: f32,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            language: None,
            volume: 1.0,
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

impl SpeakOptions {
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }
}

/// Session state of the cloud path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudStatus {
    Unknown,
    Available,
    Disabled(String),
}

pub struct SpeechSynthesizer {
    player: Arc<PlaybackEngine>,
    cloud: Option<Arc<dyn CloudTts>>,
    device: Arc<dyn DeviceSpeech>,
    settings: TtsSettings,
    cache: Mutex<VoiceCache>,
    cloud_status: Mutex<CloudStatus>,
    language: RwLock<Language>,
    locales: Mutex<HashMap<Language, String>>,
    device_timeout: Duration,
    generation: AtomicU64,
    /// Held by `stop` and around every start, so nothing starts after a stop
    start_gate: Mutex<()>,
}

impl SpeechSynthesizer {
    pub fn new(
        player: Arc<PlaybackEngine>,
        cloud: Option<Arc<dyn CloudTts>>,
        device: Arc<dyn DeviceSpeech>,
        settings: TtsSettings,
        cache_capacity: usize,
        language: Language,
    ) -> Self {
        let status = if cloud.is_some() {
            CloudStatus::Unknown
        } else {
            CloudStatus::Disabled("no credential configured".to_string())
        };
        Self {
            player,
            cloud,
            device,
            settings,
            cache: Mutex::new(VoiceCache::new(cache_capacity)),
            cloud_status: Mutex::new(status),
            language: RwLock::new(language),
            locales: Mutex::new(HashMap::new()),
            device_timeout: DEVICE_TIMEOUT,
            generation: AtomicU64::new(0),
            start_gate: Mutex::new(()),
        }
    }

    /// Shorten the on-device guard (tests, slow hosts)
    pub fn with_device_timeout(mut self, timeout: Duration) -> Self {
        self.device_timeout = timeout;
        self
    }

    pub fn language(&self) -> Language {
        *self.language.read()
    }

    pub fn set_language(&self, language: Language) {
        *self.language.write() = language;
    }

    pub fn cloud_status(&self) -> CloudStatus {
        self.cloud_status.lock().clone()
    }

    /// True unless the cloud path is missing or disabled for the session
    pub fn cloud_enabled(&self) -> bool {
        self.cloud.is_some() && !matches!(*self.cloud_status.lock(), CloudStatus::Disabled(_))
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    fn disable_cloud(&self, reason: &TtsError) {
        tracing::warn!("Cloud TTS disabled for this session: {}", reason);
        *self.cloud_status.lock() = CloudStatus::Disabled(reason.to_string());
    }

    /// Connectivity check against the provider's voice list
    pub fn probe_cloud(&self) -> bool {
        let Some(cloud) = &self.cloud else {
            return false;
        };
        match cloud.probe() {
            Ok(()) => {
                tracing::info!("Cloud TTS reachable");
                *self.cloud_status.lock() = CloudStatus::Available;
                true
            }
            Err(e) if e.disables_session() => {
                self.disable_cloud(&e);
                false
            }
            Err(e) => {
                tracing::warn!("Cloud TTS probe failed: {}", e);
                false
            }
        }
    }

    /// Allow the cloud path again, e.g. after the credential changed
    pub fn reset_cloud(&self) {
        if self.cloud.is_some() {
            *self.cloud_status.lock() = CloudStatus::Unknown;
        }
    }

    fn locale_for(&self, language: Language) -> String {
        self.locales
            .lock()
            .entry(language)
            .or_insert_with(|| SentenceTemplates::new(language).locale)
            .clone()
    }

    fn superseded(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    /// Speak `text` and block until it finishes
    pub fn speak_async(&self, text: &str, opts: &SpeakOptions) -> TierOutcome {
        let text = text.trim();
        if text.is_empty() {
            return TierOutcome::NotFound;
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let language = opts.language.unwrap_or_else(|| self.language());

        if let Some(outcome) = self.speak_cloud(text, language, opts, generation) {
            return outcome;
        }
        if self.superseded(generation) {
            return TierOutcome::Error(ErrorKind::PlaybackError);
        }
        self.speak_device(text, language, opts, generation)
    }

    /// Speak on a worker thread; the receiver resolves with the outcome
    pub fn speak(self: &Arc<Self>, text: &str, opts: SpeakOptions) -> Receiver<TierOutcome> {
        let (tx, rx) = bounded(1);
        let synthesizer = Arc::clone(self);
        let text = text.to_string();
        let spawned = thread::Builder::new()
            .name("speech".to_string())
            .spawn(move || {
                let _ = tx.send(synthesizer.speak_async(&text, &opts));
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn speech worker: {}", e);
        }
        rx
    }

    /// `None` when the cloud path is unavailable and the device voice should be tried
    fn speak_cloud(
        &self,
        text: &str,
        language: Language,
        opts: &SpeakOptions,
        generation: u64,
    ) -> Option<TierOutcome> {
        let key = VoiceCache::key(language.code(), text);
        let cached = self.cache.lock().get(&key);

        let bytes = match cached {
            Some(bytes) => bytes,
            None => {
                if !self.cloud_enabled() {
                    return None;
                }
                let cloud = self.cloud.as_ref()?;
                let voice_id = self.settings.voice_for(language.code())?;
                let request = SynthesisRequest {
                    voice_id: voice_id.to_string(),
                    text: text.to_string(),
                    model_id: self.settings.model_id.clone(),
                    voice_settings: VoiceSettings::from(&self.settings),
                };

                match cloud.synthesize(&request) {
                    Ok(bytes) => {
                        *self.cloud_status.lock() = CloudStatus::Available;
                        let mut cache = self.cache.lock();
                        cache.insert(key.clone(), bytes);
                        cache.get(&key)?
                    }
                    Err(e) => {
                        if e.disables_session() {
                            self.disable_cloud(&e);
                        } else {
                            tracing::warn!("Cloud synthesis failed for {:?}: {}", text, e);
                        }
                        return None;
                    }
                }
            }
        };

        if self.superseded(generation) {
            return Some(TierOutcome::Error(ErrorKind::PlaybackError));
        }

        let buffer = match decode::decode(&bytes, None) {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!("Synthesized audio for {:?} did not decode: {}", text, e);
                self.cache.lock().remove(&key);
                return None;
            }
        };

        let started = {
            let _gate = self.start_gate.lock();
            if self.superseded(generation) {
                return Some(TierOutcome::Error(ErrorKind::PlaybackError));
            }
            self.player
                .start_buffer(&buffer, Duration::ZERO, SPEECH_KEY, opts.rate, opts.volume)
        };
        let handle = match started {
            Ok(handle) => handle,
            Err(e) => return Some(TierOutcome::from(&e)),
        };

        Some(match handle.wait() {
            PlaybackEnd::Completed | PlaybackEnd::Stopped => TierOutcome::Success,
            PlaybackEnd::TimedOut => TierOutcome::Error(ErrorKind::PlaybackError),
        })
    }

    fn speak_device(
        &self,
        text: &str,
        language: Language,
        opts: &SpeakOptions,
        generation: u64,
    ) -> TierOutcome {
        let voices = self.device.voices();
        if voices.is_empty() {
            return TierOutcome::Error(ErrorKind::SynthesisUnavailable);
        }
        let voice = select_voice(&voices, &self.locale_for(language));

        let utterance = Utterance {
            text: text.to_string(),
            voice,
            rate: opts.rate,
            pitch: opts.pitch,
            volume: (opts.volume * self.player.master_volume()).clamp(0.0, 1.0),
        };

        let (done_tx, done_rx) = bounded(1);
        {
            let _gate = self.start_gate.lock();
            if self.superseded(generation) {
                return TierOutcome::Error(ErrorKind::PlaybackError);
            }
            if let Err(e) = self.device.speak(utterance, done_tx) {
                tracing::warn!("On-device speech failed for {:?}: {}", text, e);
                return TierOutcome::Error(e.kind());
            }
        }

        match done_rx.recv_timeout(self.device_timeout) {
            Ok(Ok(())) => TierOutcome::Success,
            Ok(Err(_)) if self.superseded(generation) => TierOutcome::Success,
            Ok(Err(message)) => {
                tracing::warn!("On-device speech error for {:?}: {}", text, message);
                TierOutcome::Error(ErrorKind::SynthesisUnavailable)
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("On-device speech timed out for {:?}", text);
                self.device.cancel();
                TierOutcome::Error(ErrorKind::SynthesisUnavailable)
            }
            Err(RecvTimeoutError::Disconnected) => {
                TierOutcome::Error(ErrorKind::SynthesisUnavailable)
            }
        }
    }

    /// Cancel cloud playback and any on-device utterance
    pub fn stop(&self) {
        let _gate = self.start_gate.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.player.stop_key(SPEECH_KEY);
        self.device.cancel();
    }
}

impl SpeechFallback for SpeechSynthesizer {
    fn speak_name(&self, text: &str) -> bool {
        let generation = self.generation.load(Ordering::SeqCst);
        self.speak_device(text, self.language(), &SpeakOptions::default(), generation)
            .is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_system::effects::MasterVolume;
    use crate::messaging::EventBus;
    use crate::testing::{running_context, wav_bytes, FakeCloud, FakeDeviceSpeech, FakeOutput};
    use std::time::Instant;

    struct Rig {
        speech: Arc<SpeechSynthesizer>,
        output: Arc<FakeOutput>,
        cloud: Arc<FakeCloud>,
        device: Arc<FakeDeviceSpeech>,
    }

    fn rig(cloud: FakeCloud, device: FakeDeviceSpeech) -> Rig {
        let bus = EventBus::new();
        let (context, output) = running_context(bus.clone());
        let player = Arc::new(PlaybackEngine::new(context, Arc::new(MasterVolume::default()), bus));
        let cloud = Arc::new(cloud);
        let device = Arc::new(device);
        let speech = SpeechSynthesizer::new(
            player,
            Some(cloud.clone() as Arc<dyn CloudTts>),
            device.clone(),
            TtsSettings::default(),
            50,
            Language::English,
        )
        .with_device_timeout(Duration::from_millis(300));
        Rig {
            speech: Arc::new(speech),
            output,
            cloud,
            device,
        }
    }

    #[test]
    fn test_cloud_result_is_cached() {
        let rig = rig(FakeCloud::ok(wav_bytes(40, 8_000, 1)), FakeDeviceSpeech::new());
        let opts = SpeakOptions::default();

        assert_eq!(rig.speech.speak_async("dog", &opts), TierOutcome::Success);
        assert_eq!(rig.speech.speak_async("dog", &opts), TierOutcome::Success);
        assert_eq!(rig.cloud.calls(), 1);
        assert_eq!(rig.output.plays().len(), 2);
        assert_eq!(rig.speech.cached_count(), 1);

        // Different language, different cache entry
        let spanish = SpeakOptions::default().with_language(Language::Spanish);
        rig.speech.speak_async("dog", &spanish);
        assert_eq!(rig.cloud.calls(), 2);
    }

    #[test]
    fn test_unauthorized_disables_cloud_for_session() {
        let rig = rig(FakeCloud::failing(TtsError::Unauthorized(401)), FakeDeviceSpeech::new());
        let opts = SpeakOptions::default();

        assert_eq!(rig.speech.speak_async("apple", &opts), TierOutcome::Success);
        assert_eq!(rig.speech.speak_async("banana", &opts), TierOutcome::Success);
        assert_eq!(rig.cloud.calls(), 1);
        assert_eq!(rig.device.spoken(), vec!["apple", "banana"]);
        assert!(matches!(rig.speech.cloud_status(), CloudStatus::Disabled(_)));

        rig.speech.reset_cloud();
        assert!(rig.speech.cloud_enabled());
    }

    #[test]
    fn test_server_error_keeps_cloud_enabled() {
        let rig = rig(
            FakeCloud::failing(TtsError::Http {
                status: 503,
                message: "busy".into(),
            }),
            FakeDeviceSpeech::new(),
        );
        rig.speech.speak_async("one", &SpeakOptions::default());
        rig.speech.speak_async("two", &SpeakOptions::default());
        assert_eq!(rig.cloud.calls(), 2);
        assert!(rig.speech.cloud_enabled());
    }

    #[test]
    fn test_device_voice_matches_locale() {
        let rig = rig(
            FakeCloud::failing(TtsError::NotConfigured),
            FakeDeviceSpeech::new().with_voices(vec![
                DeviceVoice::new("Thomas", "fr-FR"),
                DeviceVoice::new("Samantha", "en-US"),
            ]),
        );
        rig.speech.set_language(Language::French);
        rig.speech.speak_async("chat", &SpeakOptions::default());
        assert_eq!(rig.device.last_voice().unwrap().name, "Thomas");
    }

    #[test]
    fn test_device_timeout_resolves_as_failure() {
        let rig = rig(
            FakeCloud::failing(TtsError::NotConfigured),
            FakeDeviceSpeech::new().never_finishes(),
        );
        let outcome = rig.speech.speak_async("hello", &SpeakOptions::default());
        assert_eq!(outcome, TierOutcome::Error(ErrorKind::SynthesisUnavailable));
        assert!(rig.device.cancelled() >= 1);
    }

    #[test]
    fn test_probe_cloud() {
        let reachable = rig(FakeCloud::ok(Vec::new()), FakeDeviceSpeech::new());
        assert!(reachable.speech.probe_cloud());
        assert_eq!(reachable.speech.cloud_status(), CloudStatus::Available);

        let offline = rig(
            FakeCloud::failing(TtsError::Unreachable("dns".into())),
            FakeDeviceSpeech::new(),
        );
        assert!(!offline.speech.probe_cloud());
        assert!(!offline.speech.cloud_enabled());
    }

    #[test]
    fn test_stop_cancels_cloud_playback() {
        let rig = rig(FakeCloud::ok(wav_bytes(3_000, 8_000, 1)), FakeDeviceSpeech::new());
        let pending = rig.speech.speak("long sentence", SpeakOptions::default());
        thread::sleep(Duration::from_millis(150));
        rig.speech.stop();

        let outcome = pending.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(outcome, TierOutcome::Success);
        assert_eq!(rig.output.sounding_count(), 0);
        assert!(rig.device.cancelled() >= 1);
    }

    #[test]
    fn test_stop_during_decode_keeps_speech_silent() {
        // Two minutes of stereo audio decodes slowly enough to stop mid-decode
        let rig = rig(FakeCloud::ok(wav_bytes(120_000, 44_100, 2)), FakeDeviceSpeech::new());
        let pending = rig.speech.speak("dog sentence", SpeakOptions::default());

        let deadline = Instant::now() + Duration::from_secs(10);
        while rig.cloud.calls() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(150));
        rig.speech.stop();

        pending.recv_timeout(Duration::from_secs(30)).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(rig.output.sounding_count(), 0);
        assert!(rig.device.spoken().is_empty());
    }

    #[test]
    fn test_undecodable_cloud_audio_is_evicted() {
        let rig = rig(FakeCloud::ok(b"not audio".to_vec()), FakeDeviceSpeech::new());
        let opts = SpeakOptions::default();

        assert_eq!(rig.speech.speak_async("owl", &opts), TierOutcome::Success);
        assert_eq!(rig.speech.cached_count(), 0);
        assert_eq!(rig.device.spoken(), vec!["owl"]);

        rig.speech.speak_async("owl", &opts);
        assert_eq!(rig.cloud.calls(), 2);
    }

    #[test]
    fn test_empty_text_is_not_found() {
        let rig = rig(FakeCloud::ok(Vec::new()), FakeDeviceSpeech::new());
        assert_eq!(rig.speech.speak_async("  ", &SpeakOptions::default()), TierOutcome::NotFound);
        assert_eq!(rig.cloud.calls(), 0);
    }
}
