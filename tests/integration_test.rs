// Integration tests for vocab-audio
// These run the public engine against local asset files, a silent output and a
// scripted on-device voice

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use vocab_audio::audio_system::decode::DecodedBuffer;
use vocab_audio::audio_system::fetch::HttpFetcher;
use vocab_audio::audio_system::output::{AudioOutput, Voice, VoiceParams};
use vocab_audio::speech::device::{DeviceSpeech, DeviceVoice, Utterance};
use vocab_audio::{
    AudioEngine, AudioError, Channel, EngineConfig, Event, HostServices, PlaybackMethod,
    PlaybackRequest,
};

struct SilentVoice {
    gain: Mutex<f32>,
    stopped: AtomicBool,
    ends_at: Instant,
}

impl Voice for SilentVoice {
    fn set_gain(&self, gain: f32) {
        *self.gain.lock().unwrap() = gain;
    }

    fn gain(&self) -> f32 {
        *self.gain.lock().unwrap()
    }

    fn stop(&self) -> Result<(), AudioError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(AudioError::AlreadyStopped);
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || Instant::now() >= self.ends_at
    }
}

#[derive(Default)]
struct SilentOutput {
    voices: Mutex<Vec<Arc<SilentVoice>>>,
}

impl SilentOutput {
    fn start(&self, duration: Duration, params: VoiceParams) -> Arc<dyn Voice> {
        let voice = Arc::new(SilentVoice {
            gain: Mutex::new(params.gain),
            stopped: AtomicBool::new(false),
            ends_at: Instant::now() + params.delay + duration,
        });
        self.voices.lock().unwrap().push(voice.clone());
        voice
    }

    fn started(&self) -> usize {
        self.voices.lock().unwrap().len()
    }

    fn sounding(&self) -> usize {
        self.voices
            .lock()
            .unwrap()
            .iter()
            .filter(|v| !v.is_finished())
            .count()
    }
}

impl AudioOutput for SilentOutput {
    fn play_buffer(
        &self,
        buffer: &DecodedBuffer,
        params: VoiceParams,
    ) -> Result<Arc<dyn Voice>, AudioError> {
        Ok(self.start(buffer.duration(), params))
    }

    fn play_encoded(
        &self,
        _bytes: Vec<u8>,
        params: VoiceParams,
    ) -> Result<Arc<dyn Voice>, AudioError> {
        Ok(self.start(Duration::from_millis(500), params))
    }

    fn suspend(&self) {}

    fn resume(&self) {}
}

#[derive(Default)]
struct ScriptedSpeech {
    spoken: Mutex<Vec<String>>,
}

impl DeviceSpeech for ScriptedSpeech {
    fn voices(&self) -> Vec<DeviceVoice> {
        vec![DeviceVoice::new("Test", "en-US")]
    }

    fn speak(
        &self,
        utterance: Utterance,
        done: Sender<Result<(), String>>,
    ) -> Result<(), AudioError> {
        self.spoken.lock().unwrap().push(utterance.text);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            let _ = done.send(Ok(()));
        });
        Ok(())
    }

    fn cancel(&self) {}
}

/// Asset directory removed when the test ends
struct AssetDir(PathBuf);

impl AssetDir {
    fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "vocab-audio-{}-{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    fn write_wav(&self, key: &str, ms: u64) {
        std::fs::write(self.0.join(format!("{}.wav", key)), wav_bytes(ms)).unwrap();
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for AssetDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn wav_bytes(ms: u64) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..(8 * ms) {
            writer.write_sample(((i % 40) as i16 - 20) * 100).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn engine(dir: &AssetDir) -> (AudioEngine, Arc<SilentOutput>, Arc<ScriptedSpeech>) {
    let config = EngineConfig {
        asset_base: dir.path().display().to_string(),
        ..EngineConfig::default()
    };
    let output = Arc::new(SilentOutput::default());
    let shared = output.clone();
    let speech = Arc::new(ScriptedSpeech::default());
    let host = HostServices {
        output: Box::new(move || Ok(shared.clone() as Arc<dyn AudioOutput>)),
        fetcher: Arc::new(HttpFetcher::new()),
        device_speech: speech.clone(),
        cloud_tts: None,
    };
    let engine = AudioEngine::new(config, host).unwrap();
    engine.initialize();
    (engine, output, speech)
}

#[test]
fn test_word_from_local_asset() {
    let dir = AssetDir::new("word");
    dir.write_wav("giraffe", 300);
    let (engine, output, speech) = engine(&dir);

    assert_eq!(
        engine.play_word("Giraffe", None),
        Some(PlaybackMethod::AudioBuffer)
    );
    assert_eq!(output.started(), 1);
    assert!(speech.spoken.lock().unwrap().is_empty());
}

#[test]
fn test_number_word_finds_digit_asset() {
    let dir = AssetDir::new("number");
    dir.write_wav("7", 200);
    let (engine, output, _) = engine(&dir);

    assert!(engine.play_sound("seven", None, None));
    assert_eq!(output.started(), 1);
}

#[test]
fn test_missing_sound_is_spoken() {
    let dir = AssetDir::new("spoken");
    let (engine, output, speech) = engine(&dir);
    let (events, _) = engine.subscribe();

    assert!(engine.play_sound("🍎 apple", None, None));
    assert_eq!(output.started(), 0);
    assert_eq!(*speech.spoken.lock().unwrap(), vec!["apple"]);

    let spoken = events.try_iter().any(|e| {
        matches!(e, Event::PlaybackAttempt(t)
            if t.method == PlaybackMethod::SpeechSynthesis && t.success)
    });
    assert!(spoken);
}

#[test]
fn test_higher_priority_preempts_lower() {
    let dir = AssetDir::new("priority");
    dir.write_wav("music", 2_000);
    dir.write_wav("welcome", 500);
    let (engine, output, _) = engine(&dir);
    let (events, _) = engine.subscribe();

    assert!(engine.play_managed(&PlaybackRequest::new("music", Channel::Menu)));
    assert!(engine.play_managed(&PlaybackRequest::new("welcome", Channel::Welcome)));
    assert!(!engine.play_managed(&PlaybackRequest::new("music", Channel::System)));

    let events: Vec<Event> = events.try_iter().collect();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ChannelPreempted { channel: Channel::Menu, by: Channel::Welcome, .. }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::RequestDropped { channel: Channel::System, .. }
    )));

    // The menu voice is silenced once its fade completes
    thread::sleep(Duration::from_millis(400));
    assert_eq!(output.sounding(), 1);
}

#[test]
fn test_empty_prefetch_and_stop() {
    let dir = AssetDir::new("prefetch");
    dir.write_wav("ball", 1_000);
    let (engine, output, _) = engine(&dir);

    assert_eq!(engine.prefetch_audio_keys(&[]), 0);
    assert_eq!(engine.debug_info().fetches, 0);

    assert_eq!(engine.prefetch_audio_keys(&["ball".to_string()]), 1);
    engine.play_sound("ball", None, None);
    engine.stop_all_audio();
    assert_eq!(output.sounding(), 0);
}
