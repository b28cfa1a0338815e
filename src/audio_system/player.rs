/// Playback engine
///
/// Starts decoded buffers and encoded streams on the audio output while keeping at
/// most one sounding instance per key. Each start gets a fresh instance id; a watcher
/// thread clears the registration on natural completion only if that id is still the
/// registered one, so a superseded voice can never remove its successor.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;

use super::context::ContextManager;
use super::decode::DecodedBuffer;
use super::effects::{GainRamp, MasterVolume, PlayOptions};
use super::output::{Voice, VoiceParams};
use crate::error::{AudioError, ErrorKind};
use crate::messaging::{EventBus, PlaybackMethod, PlaybackTelemetry};

/// Interval between completion checks
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Hard stop after a fade-out ramp completes
const HARD_STOP_DELAY: Duration = Duration::from_millis(50);

/// Why a playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// Played to the end
    Completed,
    /// Stopped, faded out, or superseded by a newer start of the same key
    Stopped,
    /// Force-stopped by the safety limit
    TimedOut,
}

/// Awaitable handle for one started voice
#[derive(Debug)]
pub struct PlaybackHandle {
    key: String,
    instance: u64,
    expected: Option<Duration>,
    done: Receiver<PlaybackEnd>,
}

impl PlaybackHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Expected playing time including any start delay, when known
    pub fn expected_duration(&self) -> Option<Duration> {
        self.expected
    }

    /// Block until the voice ends
    pub fn wait(&self) -> PlaybackEnd {
        self.done.recv().unwrap_or(PlaybackEnd::Stopped)
    }

    /// Block until the voice ends or `timeout` passes
    pub fn wait_timeout(&self, timeout: Duration) -> Option<PlaybackEnd> {
        match self.done.recv_timeout(timeout) {
            Ok(end) => Some(end),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(PlaybackEnd::Stopped),
        }
    }

    /// Receiver that resolves once with the end reason
    pub fn receiver(&self) -> Receiver<PlaybackEnd> {
        self.done.clone()
    }
}

#[derive(Clone)]
struct ActiveVoice {
    instance: u64,
    voice: Arc<dyn Voice>,
    /// Gain before master volume
    gain: f32,
}

type VoiceMap = Arc<Mutex<HashMap<String, ActiveVoice>>>;

type EndHook = Box<dyn FnOnce(PlaybackEnd) + Send>;

fn stop_quietly(key: &str, voice: &dyn Voice) {
    match voice.stop() {
        Ok(()) | Err(AudioError::AlreadyStopped) => {}
        Err(e) => tracing::debug!("Stopping {} failed: {}", key, e),
    }
}

fn is_current(map: &VoiceMap, key: &str, instance: u64) -> bool {
    map.lock().get(key).is_some_and(|a| a.instance == instance)
}

pub struct PlaybackEngine {
    context: Arc<ContextManager>,
    active: VoiceMap,
    streams: VoiceMap,
    next_instance: AtomicU64,
    master: Arc<MasterVolume>,
    bus: EventBus,
}

impl PlaybackEngine {
    pub fn new(context: Arc<ContextManager>, master: Arc<MasterVolume>, bus: EventBus) -> Self {
        Self {
            context,
            active: Arc::new(Mutex::new(HashMap::new())),
            streams: Arc::new(Mutex::new(HashMap::new())),
            next_instance: AtomicU64::new(1),
            master,
            bus,
        }
    }

    /// Start `buffer` under `key`, stopping any voice already playing that key
    pub fn start_buffer(
        &self,
        buffer: &DecodedBuffer,
        delay: Duration,
        key: &str,
        rate: f32,
        volume: f32,
    ) -> Result<PlaybackHandle, AudioError> {
        let opts = PlayOptions::default()
            .with_delay(delay.as_millis() as u64)
            .with_rate(rate)
            .with_volume(volume);
        self.start_buffer_with(buffer, key, &opts)
    }

    /// Like [`start_buffer`](Self::start_buffer) with a linear ramp from silence
    pub fn start_buffer_with_fade_in(
        &self,
        buffer: &DecodedBuffer,
        delay: Duration,
        key: &str,
        rate: f32,
        volume: f32,
        fade_in_ms: u64,
    ) -> Result<PlaybackHandle, AudioError> {
        let opts = PlayOptions::default()
            .with_delay(delay.as_millis() as u64)
            .with_rate(rate)
            .with_volume(volume)
            .with_fade_in(fade_in_ms);
        self.start_buffer_with(buffer, key, &opts)
    }

    /// Start a buffer with the full option set
    pub fn start_buffer_with(
        &self,
        buffer: &DecodedBuffer,
        key: &str,
        opts: &PlayOptions,
    ) -> Result<PlaybackHandle, AudioError> {
        let output = self.context.playable_output()?;
        let params = self.voice_params(opts);
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);

        let voice = {
            let mut active = self.active.lock();
            if let Some(previous) = active.remove(key) {
                stop_quietly(key, previous.voice.as_ref());
            }
            let voice = output.play_buffer(buffer, params)?;
            active.insert(
                key.to_string(),
                ActiveVoice {
                    instance,
                    voice: voice.clone(),
                    gain: opts.volume,
                },
            );
            voice
        };

        tracing::debug!("Started {} (instance {})", key, instance);
        self.spawn_fade_in(&self.active, key, instance, &voice, opts);

        let playable = buffer.duration().saturating_sub(opts.offset());
        let playable = opts.limit().map_or(playable, |limit| playable.min(limit));
        let expected = playable.div_f32(opts.rate.max(0.01)) + opts.delay();

        Ok(PlaybackHandle {
            key: key.to_string(),
            instance,
            expected: Some(expected),
            done: self.watch(&self.active, key, instance, voice, None, None),
        })
    }

    /// Stream encoded bytes under `key`, decoding while playing.
    ///
    /// Streams keep the same one-instance-per-key rule in their own map. A stream still
    /// playing after `max_duration` is force-stopped; the outcome is reported as
    /// stream-fallback telemetry.
    pub fn play_stream(
        &self,
        bytes: Vec<u8>,
        key: &str,
        opts: &PlayOptions,
        max_duration: Option<Duration>,
    ) -> Result<PlaybackHandle, AudioError> {
        let started = Instant::now();
        let fail = |e: AudioError| {
            self.bus.playback(PlaybackTelemetry::failure(
                PlaybackMethod::StreamFallback,
                key,
                started.elapsed().as_millis() as u64,
                e.kind(),
            ));
            e
        };

        let output = self.context.playable_output().map_err(fail)?;
        let params = self.voice_params(opts);
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);

        let voice = {
            let mut streams = self.streams.lock();
            if let Some(previous) = streams.remove(key) {
                stop_quietly(key, previous.voice.as_ref());
            }
            let voice = output.play_encoded(bytes, params).map_err(fail)?;
            streams.insert(
                key.to_string(),
                ActiveVoice {
                    instance,
                    voice: voice.clone(),
                    gain: opts.volume,
                },
            );
            voice
        };

        tracing::debug!("Streaming {} (instance {})", key, instance);
        self.spawn_fade_in(&self.streams, key, instance, &voice, opts);

        let bus = self.bus.clone();
        let telemetry_key = key.to_string();
        let on_end: EndHook = Box::new(move |end| {
            let elapsed = started.elapsed().as_millis() as u64;
            let telemetry = match end {
                PlaybackEnd::TimedOut => PlaybackTelemetry::failure(
                    PlaybackMethod::StreamFallback,
                    &telemetry_key,
                    elapsed,
                    ErrorKind::PlaybackError,
                ),
                _ => PlaybackTelemetry::success(PlaybackMethod::StreamFallback, &telemetry_key, elapsed),
            };
            bus.playback(telemetry);
        });

        let expected = match (opts.limit(), max_duration) {
            (Some(limit), Some(max)) => Some(limit.min(max)),
            (limit, max) => limit.or(max),
        };

        Ok(PlaybackHandle {
            key: key.to_string(),
            instance,
            expected: expected.map(|d| d + opts.delay()),
            done: self.watch(&self.streams, key, instance, voice, max_duration, Some(on_end)),
        })
    }

    fn voice_params(&self, opts: &PlayOptions) -> VoiceParams {
        let initial_gain = if opts.fade_in_ms.is_some_and(|ms| ms > 0) {
            0.0
        } else {
            self.master.apply(opts.volume)
        };
        VoiceParams {
            delay: opts.delay(),
            rate: opts.rate,
            gain: initial_gain,
            offset: opts.offset(),
            limit: opts.limit(),
        }
    }

    fn spawn_fade_in(
        &self,
        map: &VoiceMap,
        key: &str,
        instance: u64,
        voice: &Arc<dyn Voice>,
        opts: &PlayOptions,
    ) {
        let Some(fade_ms) = opts.fade_in_ms.filter(|ms| *ms > 0) else {
            return;
        };
        let ramp = GainRamp::fade_in(self.master.apply(opts.volume), Duration::from_millis(fade_ms));
        let (map, key, voice) = (map.clone(), key.to_string(), voice.clone());
        crate::utils::spawn_after("fade-in", opts.delay(), move || {
            ramp.run(voice.as_ref(), || is_current(&map, &key, instance));
        });
    }

    fn watch(
        &self,
        map: &VoiceMap,
        key: &str,
        instance: u64,
        voice: Arc<dyn Voice>,
        max_duration: Option<Duration>,
        on_end: Option<EndHook>,
    ) -> Receiver<PlaybackEnd> {
        let (done_tx, done_rx) = bounded(1);
        let (map, key) = (map.clone(), key.to_string());

        let spawned = thread::Builder::new()
            .name("voice-watch".to_string())
            .spawn(move || {
                let started = Instant::now();
                let end = loop {
                    if voice.is_finished() {
                        let mut voices = map.lock();
                        let ours = voices.get(&key).is_some_and(|a| a.instance == instance);
                        if ours {
                            voices.remove(&key);
                            break PlaybackEnd::Completed;
                        }
                        break PlaybackEnd::Stopped;
                    }
                    if max_duration.is_some_and(|max| started.elapsed() >= max) {
                        let mut voices = map.lock();
                        if voices.get(&key).is_some_and(|a| a.instance == instance) {
                            voices.remove(&key);
                        }
                        stop_quietly(&key, voice.as_ref());
                        tracing::warn!("{} exceeded its playback limit, stopped", key);
                        break PlaybackEnd::TimedOut;
                    }
                    thread::sleep(POLL_INTERVAL);
                };

                if let Some(hook) = on_end {
                    hook(end);
                }
                let _ = done_tx.send(end);
            });

        if let Err(e) = spawned {
            tracing::error!("Failed to spawn playback watcher: {}", e);
        }
        done_rx
    }

    /// Ramp the voice for `key` to silence and stop it shortly after.
    ///
    /// Returns false when nothing is playing under `key`.
    pub fn fade_out_key(&self, key: &str, duration_ms: u64) -> bool {
        let found = [&self.active, &self.streams].into_iter().find_map(|map| {
            map.lock()
                .get(key)
                .map(|a| (map.clone(), a.instance, a.voice.clone()))
        });
        let Some((map, instance, voice)) = found else {
            return false;
        };

        let ramp = GainRamp::fade_out(voice.gain(), Duration::from_millis(duration_ms));
        let key = key.to_string();
        crate::utils::spawn_after("fade-out", Duration::ZERO, move || {
            ramp.run(voice.as_ref(), || is_current(&map, &key, instance));
            thread::sleep(HARD_STOP_DELAY);

            let mut voices = map.lock();
            if voices.get(&key).is_some_and(|a| a.instance == instance) {
                voices.remove(&key);
                stop_quietly(&key, voice.as_ref());
                tracing::debug!("Faded out {}", key);
            }
        });
        true
    }

    /// Stop `key` immediately. Returns false when nothing was playing.
    pub fn stop_key(&self, key: &str) -> bool {
        let mut stopped = false;
        for map in [&self.active, &self.streams] {
            let mut voices = map.lock();
            if let Some(entry) = voices.remove(key) {
                stop_quietly(key, entry.voice.as_ref());
                stopped = true;
            }
        }
        stopped
    }

    /// Stop every voice at once, without waiting for pending fades
    pub fn stop_all(&self) {
        let mut count = 0;
        for map in [&self.active, &self.streams] {
            let mut voices = map.lock();
            for (key, entry) in voices.drain() {
                stop_quietly(&key, entry.voice.as_ref());
                count += 1;
            }
        }
        if count > 0 {
            tracing::debug!("Stopped {} voices", count);
        }
    }

    /// Set master volume and apply it to every active voice
    pub fn set_master_volume(&self, level: f32) {
        self.master.set_level(level);
        for map in [&self.active, &self.streams] {
            for entry in map.lock().values() {
                entry.voice.set_gain(self.master.apply(entry.gain));
            }
        }
    }

    pub fn master_volume(&self) -> f32 {
        self.master.level()
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.active.lock().contains_key(key) || self.streams.lock().contains_key(key)
    }

    /// Number of registered buffer and stream voices
    pub fn active_count(&self) -> usize {
        self.active.lock().len() + self.streams.lock().len()
    }

    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .active
            .lock()
            .keys()
            .chain(self.streams.lock().keys())
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}
