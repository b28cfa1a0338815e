//! Test doubles shared by the unit tests

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::audio_system::context::{ContextManager, OutputFactory};
use crate::audio_system::decode::{self, DecodedBuffer};
use crate::audio_system::fetch::AssetFetcher;
use crate::audio_system::output::{AudioOutput, Voice, VoiceParams};
use crate::error::{AudioError, TtsError};
use crate::messaging::EventBus;
use crate::speech::cloud::{CloudTts, SynthesisRequest};
use crate::speech::device::{DeviceSpeech, DeviceVoice, Utterance};

/// 16-bit PCM WAV containing a quiet 440 Hz tone
pub fn wav_bytes(ms: u64, sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let frames = (sample_rate as u64 * ms / 1000).max(1);
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for frame in 0..frames {
            let t = frame as f32 / sample_rate as f32;
            let sample = ((t * 440.0 * std::f32::consts::TAU).sin() * 3_000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Voice that "plays" for a fixed wall-clock duration
pub struct FakeVoice {
    gain: Mutex<f32>,
    stopped: AtomicBool,
    ends_at: Instant,
}

impl FakeVoice {
    pub fn with_duration(duration: Duration) -> Self {
        Self::new(duration, 1.0)
    }

    fn new(duration: Duration, gain: f32) -> Self {
        Self {
            gain: Mutex::new(gain),
            stopped: AtomicBool::new(false),
            ends_at: Instant::now() + duration,
        }
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Voice for FakeVoice {
    fn set_gain(&self, gain: f32) {
        *self.gain.lock() = gain;
    }

    fn gain(&self) -> f32 {
        *self.gain.lock()
    }

    fn stop(&self) -> Result<(), AudioError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(AudioError::AlreadyStopped);
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.was_stopped() || Instant::now() >= self.ends_at
    }
}

#[derive(Clone)]
pub struct PlayRecord {
    pub params: VoiceParams,
    pub duration: Duration,
    /// Whether the voice came from encoded bytes
    pub streamed: bool,
    pub voice: Arc<FakeVoice>,
}

/// Output that records every start instead of making sound
#[derive(Default)]
pub struct FakeOutput {
    plays: Mutex<Vec<PlayRecord>>,
    suspended: AtomicBool,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn plays(&self) -> Vec<PlayRecord> {
        self.plays.lock().clone()
    }

    /// Voices neither finished nor stopped
    pub fn sounding_count(&self) -> usize {
        self.plays
            .lock()
            .iter()
            .filter(|p| !p.voice.is_finished())
            .count()
    }

    pub fn last_voice(&self) -> Option<Arc<FakeVoice>> {
        self.plays.lock().last().map(|p| p.voice.clone())
    }

    fn start(&self, length: Duration, params: VoiceParams, streamed: bool) -> Arc<dyn Voice> {
        let playable = length.saturating_sub(params.offset);
        let playable = params.limit.map_or(playable, |limit| playable.min(limit));
        let duration = playable.div_f32(params.rate.max(0.01)) + params.delay;

        let voice = Arc::new(FakeVoice::new(duration, params.gain));
        self.plays.lock().push(PlayRecord {
            params,
            duration,
            streamed,
            voice: voice.clone(),
        });
        voice
    }
}

impl AudioOutput for FakeOutput {
    fn play_buffer(
        &self,
        buffer: &DecodedBuffer,
        params: VoiceParams,
    ) -> Result<Arc<dyn Voice>, AudioError> {
        Ok(self.start(buffer.duration(), params, false))
    }

    fn play_encoded(
        &self,
        bytes: Vec<u8>,
        params: VoiceParams,
    ) -> Result<Arc<dyn Voice>, AudioError> {
        let decoded = decode::decode(&bytes, None)?;
        Ok(self.start(decoded.duration(), params, true))
    }

    fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
    }
}

/// Initialized context over a fresh [`FakeOutput`]
pub fn running_context(bus: EventBus) -> (Arc<ContextManager>, Arc<FakeOutput>) {
    let output = Arc::new(FakeOutput::new());
    let shared = output.clone();
    let factory: OutputFactory = Box::new(move || Ok(shared.clone() as Arc<dyn AudioOutput>));
    let context = Arc::new(ContextManager::new(factory, false, bus));
    context.initialize();
    (context, output)
}

/// In-memory asset store keyed by location
#[derive(Default)]
pub struct MemoryFetcher {
    files: Mutex<HashMap<String, Vec<u8>>>,
    counts: Mutex<HashMap<String, usize>>,
    unreachable: AtomicBool,
    delay: Duration,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn insert(&self, location: &str, bytes: Vec<u8>) {
        self.files.lock().insert(location.to_string(), bytes);
    }

    /// Every fetch times out while set
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn fetch_count(&self, location: &str) -> usize {
        self.counts.lock().get(location).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.counts.lock().values().sum()
    }
}

impl AssetFetcher for MemoryFetcher {
    fn fetch(&self, location: &str, _timeout: Duration) -> Result<Vec<u8>, AudioError> {
        *self.counts.lock().entry(location.to_string()).or_insert(0) += 1;
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AudioError::Timeout(location.to_string()));
        }
        self.files
            .lock()
            .get(location)
            .cloned()
            .ok_or_else(|| AudioError::NotFound(location.to_string()))
    }
}

/// Cloud provider returning a fixed result
pub struct FakeCloud {
    result: Result<Vec<u8>, TtsError>,
    calls: AtomicUsize,
}

impl FakeCloud {
    pub fn ok(bytes: Vec<u8>) -> Self {
        Self {
            result: Ok(bytes),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: TtsError) -> Self {
        Self {
            result: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    /// Synthesis requests seen, probes excluded
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CloudTts for FakeCloud {
    fn synthesize(&self, _request: &SynthesisRequest) -> Result<Vec<u8>, TtsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }

    fn probe(&self) -> Result<(), TtsError> {
        self.result.clone().map(|_| ())
    }
}

/// On-device voice that finishes each utterance after a short delay
pub struct FakeDeviceSpeech {
    voices: Vec<DeviceVoice>,
    hang: bool,
    utterances: Mutex<Vec<Utterance>>,
    pending: Arc<Mutex<Vec<Sender<Result<(), String>>>>>,
    cancelled: AtomicUsize,
}

impl FakeDeviceSpeech {
    pub fn new() -> Self {
        Self {
            voices: vec![DeviceVoice::new("Samantha", "en-US")],
            hang: false,
            utterances: Mutex::new(Vec::new()),
            pending: Arc::new(Mutex::new(Vec::new())),
            cancelled: AtomicUsize::new(0),
        }
    }

    pub fn with_voices(mut self, voices: Vec<DeviceVoice>) -> Self {
        self.voices = voices;
        self
    }

    /// Utterances never report completion
    pub fn never_finishes(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn spoken(&self) -> Vec<String> {
        self.utterances.lock().iter().map(|u| u.text.clone()).collect()
    }

    pub fn last_voice(&self) -> Option<DeviceVoice> {
        self.utterances.lock().last().and_then(|u| u.voice.clone())
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl DeviceSpeech for FakeDeviceSpeech {
    fn voices(&self) -> Vec<DeviceVoice> {
        self.voices.clone()
    }

    fn speak(
        &self,
        utterance: Utterance,
        done: Sender<Result<(), String>>,
    ) -> Result<(), AudioError> {
        self.utterances.lock().push(utterance);
        if self.hang {
            self.pending.lock().push(done);
            return Ok(());
        }
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            let _ = done.send(Ok(()));
        });
        Ok(())
    }

    fn cancel(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        for done in self.pending.lock().drain(..) {
            let _ = done.send(Err("cancelled".to_string()));
        }
    }
}
