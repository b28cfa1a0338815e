/// Word and sentence playback
///
/// `play_word` tries each strategy in turn and stops at the first that produces sound:
///
/// ```text
/// sentence template (speech) ─> exact asset ─> sprite clip
///   ─> multi-word: phrase speech ─> per-word concatenation
///   ─> single word: word speech
///   ─> accessibility announcement + failure telemetry
/// ```
///
/// A newer call supersedes an older one still in flight. Each call takes a fresh word
/// token; starts happen under a gate that re-checks the token, so a superseded call
/// never starts audio.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::audio_system::decode::DecodedBuffer;
use crate::audio_system::effects::PlayOptions;
use crate::audio_system::loader::{BufferLoader, LoadResult};
use crate::audio_system::manager::ChannelArbiter;
use crate::audio_system::player::{PlaybackEngine, PlaybackHandle};
use crate::audio_system::sprite::SpritePlayer;
use crate::error::{AudioError, ErrorKind, TierOutcome};
use crate::i18n::{Language, SentenceTemplates};
use crate::messaging::{Event, EventBus, PlaybackMethod, PlaybackTelemetry};
use crate::slug;
use crate::speech::{SpeakOptions, SpeechSynthesizer};

/// Playback key for word audio
pub const WORD_KEY: &str = "word";

pub struct WordOrchestrator {
    loader: Arc<BufferLoader>,
    player: Arc<PlaybackEngine>,
    speech: Arc<SpeechSynthesizer>,
    sprite: Arc<SpritePlayer>,
    arbiter: Arc<ChannelArbiter>,
    templates: RwLock<SentenceTemplates>,
    word_gap: Duration,
    token: AtomicU64,
    /// Serializes "stop everything" against token-checked starts
    gate: Mutex<()>,
    bus: EventBus,
}

impl WordOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        loader: Arc<BufferLoader>,
        player: Arc<PlaybackEngine>,
        speech: Arc<SpeechSynthesizer>,
        sprite: Arc<SpritePlayer>,
        arbiter: Arc<ChannelArbiter>,
        language: Language,
        word_gap: Duration,
        bus: EventBus,
    ) -> Self {
        Self {
            loader,
            player,
            speech,
            sprite,
            arbiter,
            templates: RwLock::new(SentenceTemplates::new(language)),
            word_gap,
            token: AtomicU64::new(0),
            gate: Mutex::new(()),
            bus,
        }
    }

    pub fn set_language(&self, language: Language) {
        *self.templates.write() = SentenceTemplates::new(language);
    }

    pub fn language(&self) -> Language {
        self.templates.read().language
    }

    fn is_current(&self, token: u64) -> bool {
        self.token.load(Ordering::SeqCst) == token
    }

    /// Supersede any call in flight and silence everything
    fn begin(&self) -> u64 {
        let _gate = self.gate.lock();
        let token = self.token.fetch_add(1, Ordering::SeqCst) + 1;
        self.arbiter.stop_all_managed();
        self.player.stop_all();
        self.speech.stop();
        token
    }

    /// Silence everything and cancel any word still resolving
    pub fn stop(&self) {
        let token = self.begin();
        tracing::debug!("Stopped all audio (token {})", token);
    }

    /// Run `start` only if `token` is still the newest word
    fn start_gated<T, F>(&self, token: u64, start: F) -> Option<T>
    where
        F: FnOnce() -> T,
    {
        let _gate = self.gate.lock();
        if !self.is_current(token) {
            return None;
        }
        Some(start())
    }

    fn record(&self, method: PlaybackMethod, key: &str, started: Instant, outcome: TierOutcome) {
        let elapsed = started.elapsed().as_millis() as u64;
        let telemetry = match outcome.error_kind() {
            None => PlaybackTelemetry::success(method, key, elapsed),
            Some(kind) => PlaybackTelemetry::failure(method, key, elapsed, kind),
        };
        self.bus.playback(telemetry);
    }

    /// Play a word or phrase with the best available strategy.
    ///
    /// Returns the strategy that produced sound, or `None` when every strategy failed
    /// or a newer call superseded this one.
    pub fn play_word(&self, phrase: &str, volume: f32) -> Option<PlaybackMethod> {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return None;
        }
        let started = Instant::now();
        let token = self.begin();
        let key = slug::normalize(phrase);
        let speak_opts = SpeakOptions::default().with_volume(volume);
        let play_opts = PlayOptions::default().with_volume(volume);
        let mut last_error = ErrorKind::AssetNotFound;

        tracing::debug!("play_word {:?} (token {})", phrase, token);

        let sentence = self
            .templates
            .read()
            .sentence_for(phrase)
            .map(str::to_string);
        if let Some(sentence) = sentence {
            let outcome = self.speech.speak_async(&sentence, &speak_opts);
            if !self.is_current(token) {
                return None;
            }
            self.record(PlaybackMethod::SentenceTemplate, &key, started, outcome);
            if outcome.is_success() {
                return Some(PlaybackMethod::SentenceTemplate);
            }
            last_error = outcome.error_kind().unwrap_or(last_error);
        }

        match self.loader.load_buffer_for_name(phrase, false) {
            LoadResult::Buffer { key: asset, buffer } => {
                let outcome = self.start_buffer(token, &buffer, WORD_KEY, &play_opts)?;
                self.record(PlaybackMethod::AudioBuffer, &asset, started, outcome);
                if outcome.is_success() {
                    return Some(PlaybackMethod::AudioBuffer);
                }
                last_error = outcome.error_kind().unwrap_or(last_error);
            }
            LoadResult::Missing(ErrorKind::AssetNotFound) | LoadResult::Spoken => {}
            LoadResult::Missing(kind) => {
                self.record(PlaybackMethod::AudioBuffer, &key, started, TierOutcome::Error(kind));
                last_error = kind;
            }
        }
        if !self.is_current(token) {
            return None;
        }

        if self.sprite.is_configured() && self.sprite.has_clip(phrase) {
            let played = self.start_gated(token, || self.sprite.play_clip(phrase, &play_opts))?;
            let outcome = if played {
                TierOutcome::Success
            } else {
                TierOutcome::Error(ErrorKind::PlaybackError)
            };
            self.record(PlaybackMethod::Sprite, &key, started, outcome);
            if played {
                return Some(PlaybackMethod::Sprite);
            }
            last_error = ErrorKind::PlaybackError;
        }

        let words: Vec<&str> = phrase.split_whitespace().collect();
        if words.len() > 1 {
            let outcome = self.speak(token, phrase, &speak_opts, &key, started)?;
            if outcome.is_success() {
                return Some(PlaybackMethod::SpeechSynthesis);
            }
            last_error = outcome.error_kind().unwrap_or(last_error);

            let outcome = self.play_concatenated(token, &words, &play_opts)?;
            self.record(PlaybackMethod::WordConcatenation, &key, started, outcome);
            if outcome.is_success() {
                return Some(PlaybackMethod::WordConcatenation);
            }
            last_error = outcome.error_kind().unwrap_or(last_error);
        } else {
            let outcome = self.speak(token, phrase, &speak_opts, &key, started)?;
            if outcome.is_success() {
                return Some(PlaybackMethod::SpeechSynthesis);
            }
            last_error = outcome.error_kind().unwrap_or(last_error);
        }

        if !self.is_current(token) {
            return None;
        }
        let text = self.templates.read().unavailable_announcement(phrase);
        tracing::warn!("No audio for {:?}, announcing", phrase);
        self.bus.publish(Event::Announcement { text });
        self.record(
            PlaybackMethod::Exhausted,
            &key,
            started,
            TierOutcome::Error(last_error),
        );
        None
    }

    /// Speech tier; `None` when superseded
    fn speak(
        &self,
        token: u64,
        text: &str,
        opts: &SpeakOptions,
        key: &str,
        started: Instant,
    ) -> Option<TierOutcome> {
        if !self.is_current(token) {
            return None;
        }
        let outcome = self.speech.speak_async(text, opts);
        if !self.is_current(token) {
            return None;
        }
        self.record(PlaybackMethod::SpeechSynthesis, key, started, outcome);
        Some(outcome)
    }

    fn start_buffer(
        &self,
        token: u64,
        buffer: &DecodedBuffer,
        key: &str,
        opts: &PlayOptions,
    ) -> Option<TierOutcome> {
        let started = self.start_gated(token, || self.player.start_buffer_with(buffer, key, opts))?;
        Some(outcome_of(&started))
    }

    /// Per-word buffers joined with short gaps, or started back to back with delays
    /// when their formats differ
    fn play_concatenated(
        &self,
        token: u64,
        words: &[&str],
        opts: &PlayOptions,
    ) -> Option<TierOutcome> {
        let mut parts = Vec::with_capacity(words.len());
        for word in words {
            match self.loader.load_buffer_for_name(word, false) {
                LoadResult::Buffer { buffer, .. } => parts.push(buffer),
                LoadResult::Missing(kind) => {
                    tracing::debug!("No buffer for word {:?}", word);
                    return Some(TierOutcome::Error(kind));
                }
                LoadResult::Spoken => return Some(TierOutcome::NotFound),
            }
            if !self.is_current(token) {
                return None;
            }
        }

        if let Some(joined) = DecodedBuffer::concat(&parts, self.word_gap) {
            return self.start_buffer(token, &joined, WORD_KEY, opts);
        }

        tracing::debug!("Word formats differ, scheduling {} starts", parts.len());
        self.start_gated(token, || {
            let mut delay = opts.delay();
            for (i, part) in parts.iter().enumerate() {
                let part_opts = opts.clone().with_delay(delay.as_millis() as u64);
                let key = format!("{}:{}", WORD_KEY, i);
                if let Err(e) = self.player.start_buffer_with(part, &key, &part_opts) {
                    return TierOutcome::from(&e);
                }
                delay += part.duration() + self.word_gap;
            }
            TierOutcome::Success
        })
    }
}

fn outcome_of(started: &Result<PlaybackHandle, AudioError>) -> TierOutcome {
    match started {
        Ok(_) => TierOutcome::Success,
        Err(e) => TierOutcome::from(e),
    }
}
