/// Platform audio output
///
/// The engine never talks to a device directly: it asks an [`AudioOutput`] for a new
/// [`Voice`] per playback and controls gain and stopping through that handle. The
/// rodio implementation keeps the device stream on its own thread and gives every
/// voice a dedicated `Sink`.
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use rodio::buffer::SamplesBuffer;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};

use super::decode::DecodedBuffer;
use crate::error::AudioError;

/// Per-voice start parameters
#[derive(Debug, Clone, Copy)]
pub struct VoiceParams {
    /// Silence before the first sample
    pub delay: Duration,
    /// Playback rate multiplier (1.0 = normal)
    pub rate: f32,
    /// Initial gain (0.0-1.0)
    pub gain: f32,
    /// Position in the source to start from
    pub offset: Duration,
    /// Maximum playing time after `offset`
    pub limit: Option<Duration>,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            rate: 1.0,
            gain: 1.0,
            offset: Duration::ZERO,
            limit: None,
        }
    }
}

/// One sounding instance
pub trait Voice: Send + Sync {
    fn set_gain(&self, gain: f32);

    fn gain(&self) -> f32;

    /// Stop immediately. A second stop reports [`AudioError::AlreadyStopped`].
    fn stop(&self) -> Result<(), AudioError>;

    /// True once the voice played to the end or was stopped
    fn is_finished(&self) -> bool;
}

/// The single platform audio context
pub trait AudioOutput: Send + Sync {
    /// Start a decoded buffer
    fn play_buffer(
        &self,
        buffer: &DecodedBuffer,
        params: VoiceParams,
    ) -> Result<Arc<dyn Voice>, AudioError>;

    /// Start encoded bytes, decoding while playing
    fn play_encoded(&self, bytes: Vec<u8>, params: VoiceParams)
        -> Result<Arc<dyn Voice>, AudioError>;

    /// Pause every voice (and start new ones paused)
    fn suspend(&self);

    fn resume(&self);
}

struct RodioVoice {
    sink: Sink,
    stopped: AtomicBool,
}

impl Voice for RodioVoice {
    fn set_gain(&self, gain: f32) {
        self.sink.set_volume(gain.clamp(0.0, 1.0));
    }

    fn gain(&self) -> f32 {
        self.sink.volume()
    }

    fn stop(&self) -> Result<(), AudioError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(AudioError::AlreadyStopped);
        }
        self.sink.stop();
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.sink.empty()
    }
}

/// Default-device output backed by rodio
pub struct RodioOutput {
    handle: OutputStreamHandle,
    voices: Mutex<Vec<Weak<RodioVoice>>>,
    suspended: AtomicBool,
    // Dropping this sender ends the thread that owns the OutputStream
    _keepalive: Sender<()>,
}

impl RodioOutput {
    /// Open the default output device.
    ///
    /// `OutputStream` is not `Send` on every platform, so it lives on a dedicated
    /// thread for as long as this value exists.
    pub fn open_default() -> Result<Self, AudioError> {
        let (handle_tx, handle_rx) = bounded(1);
        let (keepalive_tx, keepalive_rx) = bounded::<()>(0);

        thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((_stream, handle)) => {
                    if handle_tx.send(Ok(handle)).is_ok() {
                        // Blocks until the RodioOutput is dropped
                        let _ = keepalive_rx.recv();
                    }
                }
                Err(e) => {
                    let _ = handle_tx.send(Err(e.to_string()));
                }
            })
            .map_err(|e| AudioError::PlaybackFailed(format!("output thread: {}", e)))?;

        let handle = handle_rx
            .recv()
            .map_err(|_| AudioError::ContextUnavailable)?
            .map_err(AudioError::PlaybackFailed)?;

        tracing::info!("Audio output opened on default device");
        Ok(Self {
            handle,
            voices: Mutex::new(Vec::new()),
            suspended: AtomicBool::new(false),
            _keepalive: keepalive_tx,
        })
    }

    fn start(
        &self,
        source: Box<dyn Source<Item = f32> + Send>,
        params: VoiceParams,
    ) -> Result<Arc<dyn Voice>, AudioError> {
        let sink = Sink::try_new(&self.handle)
            .map_err(|e| AudioError::PlaybackFailed(e.to_string()))?;
        if self.suspended.load(Ordering::SeqCst) {
            sink.pause();
        }
        sink.set_volume(params.gain.clamp(0.0, 1.0));
        if params.rate > 0.0 && (params.rate - 1.0).abs() > f32::EPSILON {
            sink.set_speed(params.rate);
        }
        sink.append(shape(source, params));

        let voice = Arc::new(RodioVoice {
            sink,
            stopped: AtomicBool::new(false),
        });

        let mut voices = self.voices.lock();
        voices.retain(|v| v.strong_count() > 0);
        voices.push(Arc::downgrade(&voice));

        Ok(voice)
    }

    fn live_voices(&self) -> Vec<Arc<RodioVoice>> {
        self.voices.lock().iter().filter_map(Weak::upgrade).collect()
    }
}

/// Apply offset, limit and delay to a source
fn shape(
    source: Box<dyn Source<Item = f32> + Send>,
    params: VoiceParams,
) -> Box<dyn Source<Item = f32> + Send> {
    let mut source = source;
    if !params.offset.is_zero() {
        source = Box::new(source.skip_duration(params.offset));
    }
    if let Some(limit) = params.limit {
        source = Box::new(source.take_duration(limit));
    }
    if !params.delay.is_zero() {
        source = Box::new(source.delay(params.delay));
    }
    source
}

impl AudioOutput for RodioOutput {
    fn play_buffer(
        &self,
        buffer: &DecodedBuffer,
        params: VoiceParams,
    ) -> Result<Arc<dyn Voice>, AudioError> {
        let source = SamplesBuffer::new(
            buffer.channels(),
            buffer.sample_rate(),
            buffer.samples().to_vec(),
        );
        self.start(Box::new(source), params)
    }

    fn play_encoded(
        &self,
        bytes: Vec<u8>,
        params: VoiceParams,
    ) -> Result<Arc<dyn Voice>, AudioError> {
        let decoder = Decoder::new(Cursor::new(bytes))
            .map_err(|e| AudioError::DecodeFailed(e.to_string()))?;
        self.start(Box::new(decoder.convert_samples::<f32>()), params)
    }

    fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
        for voice in self.live_voices() {
            voice.sink.pause();
        }
        tracing::debug!("Audio output suspended");
    }

    fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
        for voice in self.live_voices() {
            voice.sink.play();
        }
        tracing::debug!("Audio output resumed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // rodio needs a real device; the engine is exercised against FakeOutput instead

    #[test]
    fn test_default_params() {
        let params = VoiceParams::default();
        assert_eq!(params.rate, 1.0);
        assert_eq!(params.gain, 1.0);
        assert!(params.delay.is_zero());
        assert!(params.limit.is_none());
    }

    #[test]
    fn test_shape_limits_duration() {
        let buffer = SamplesBuffer::new(1, 1_000, vec![0.25f32; 1_000]);
        let params = VoiceParams {
            offset: Duration::from_millis(200),
            limit: Some(Duration::from_millis(300)),
            ..VoiceParams::default()
        };
        let shaped = shape(Box::new(buffer), params);
        assert_eq!(shaped.count(), 300);
    }
}
