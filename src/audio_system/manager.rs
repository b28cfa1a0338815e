/// Channel arbiter
///
/// Decides which managed request may sound. Each [`Channel`] holds at most one active
/// request; a request is dropped while any channel with strictly higher priority is
/// active, and otherwise fades out the channels it outranks.
///
/// Every request bumps its channel's token. Loading, completion and timed clearing run
/// off the caller's lock and only touch the channel again if their token is still the
/// current one, so a late completion can never clear a newer request.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use super::effects::PlayOptions;
use super::loader::{BufferLoader, LoadResult};
use super::player::{PlaybackEngine, PlaybackHandle};
use super::source::Channel;
use crate::error::{AudioError, ErrorKind};
use crate::messaging::{Event, EventBus, PlaybackMethod, PlaybackTelemetry};

/// A sound to play through the arbiter
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackRequest {
    pub key: String,
    pub channel: Channel,
    pub priority: i32,
    pub playback_rate: f32,
    pub volume_override: Option<f32>,
    pub fade_in_ms: Option<u64>,
    /// Clear the channel after this long even if the sound is still reported playing
    pub expected_duration_ms: Option<u64>,
}

impl PlaybackRequest {
    /// Request at the channel's default priority
    pub fn new(key: &str, channel: Channel) -> Self {
        Self {
            key: key.to_string(),
            channel,
            priority: channel.default_priority(),
            playback_rate: 1.0,
            volume_override: None,
            fade_in_ms: None,
            expected_duration_ms: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_rate(mut self, rate: f32) -> Self {
        self.playback_rate = rate;
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume_override = Some(volume);
        self
    }

    pub fn with_fade_in(mut self, ms: u64) -> Self {
        self.fade_in_ms = Some(ms);
        self
    }

    pub fn with_expected_duration(mut self, ms: u64) -> Self {
        self.expected_duration_ms = Some(ms);
        self
    }

    fn play_options(&self) -> PlayOptions {
        let mut opts = PlayOptions::default()
            .with_rate(self.playback_rate)
            .with_volume(self.volume_override.unwrap_or(1.0));
        if let Some(ms) = self.fade_in_ms {
            opts = opts.with_fade_in(ms);
        }
        opts
    }
}

/// Result of a managed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedOutcome {
    Started,
    /// A higher-priority channel is active
    Dropped,
    /// Superseded by a newer request on the same channel before it could start
    Stale,
    Failed(ErrorKind),
}

impl ManagedOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, ManagedOutcome::Started)
    }
}

#[derive(Debug, Clone, Default)]
struct ChannelState {
    /// Playback key of the active request
    active_key: Option<String>,
    priority: i32,
    token: u64,
}

/// Per-channel view for debug output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub channel: Channel,
    pub active_key: Option<String>,
    pub priority: i32,
    pub token: u64,
}

type ChannelMap = Arc<Mutex<HashMap<Channel, ChannelState>>>;

fn clear_if_current(channels: &ChannelMap, channel: Channel, token: u64) -> bool {
    let mut channels = channels.lock();
    match channels.get_mut(&channel) {
        Some(state) if state.token == token && state.active_key.is_some() => {
            state.active_key = None;
            true
        }
        _ => false,
    }
}

pub struct ChannelArbiter {
    loader: Arc<BufferLoader>,
    player: Arc<PlaybackEngine>,
    channels: ChannelMap,
    fade_out_ms: u64,
    preempt_equal_priority: bool,
    stream_max_duration: Duration,
    bus: EventBus,
}

impl ChannelArbiter {
    pub fn new(
        loader: Arc<BufferLoader>,
        player: Arc<PlaybackEngine>,
        fade_out_ms: u64,
        preempt_equal_priority: bool,
        stream_max_duration: Duration,
        bus: EventBus,
    ) -> Self {
        Self {
            loader,
            player,
            channels: Arc::new(Mutex::new(HashMap::new())),
            fade_out_ms,
            preempt_equal_priority,
            stream_max_duration,
            bus,
        }
    }

    /// Key a channel's sound is registered under in the playback engine
    fn playback_key(channel: Channel, key: &str) -> String {
        format!("{}:{}", channel, key)
    }

    /// True iff no active channel has strictly greater priority
    pub fn can_play(&self, priority: i32) -> bool {
        Self::can_play_locked(&self.channels.lock(), priority)
    }

    fn can_play_locked(channels: &HashMap<Channel, ChannelState>, priority: i32) -> bool {
        !channels
            .values()
            .any(|state| state.active_key.is_some() && state.priority > priority)
    }

    fn outranks(&self, request: &PlaybackRequest, channel: Channel, state: &ChannelState) -> bool {
        channel == request.channel
            || state.priority < request.priority
            || (self.preempt_equal_priority && state.priority == request.priority)
    }

    /// Arbitrate, load and start a request
    pub fn play_managed(&self, request: &PlaybackRequest) -> ManagedOutcome {
        let started = Instant::now();
        let canonical = self.loader.canonical_key(&request.key);
        let playback_key = Self::playback_key(request.channel, &canonical);

        let (token, preempted) = {
            let mut channels = self.channels.lock();
            if !Self::can_play_locked(&channels, request.priority) {
                drop(channels);
                tracing::info!(
                    "Dropped {} on {} (priority {})",
                    request.key,
                    request.channel,
                    request.priority
                );
                self.bus.publish(Event::RequestDropped {
                    key: request.key.clone(),
                    channel: request.channel,
                    priority: request.priority,
                });
                return ManagedOutcome::Dropped;
            }

            let mut preempted = Vec::new();
            for (&channel, state) in channels.iter_mut() {
                if state.active_key.is_none() || !self.outranks(request, channel, state) {
                    continue;
                }
                if let Some(key) = state.active_key.take() {
                    state.token += 1;
                    preempted.push((channel, key));
                }
            }

            let state = channels.entry(request.channel).or_default();
            state.token += 1;
            state.active_key = Some(playback_key.clone());
            state.priority = request.priority;
            (state.token, preempted)
        };

        for (channel, key) in preempted {
            tracing::debug!("{} ({}) preempted by {}", channel, key, request.channel);
            self.player.fade_out_key(&key, self.fade_out_ms);
            self.bus.publish(Event::ChannelPreempted {
                channel,
                key,
                by: request.channel,
            });
        }

        let opts = request.play_options();
        let attempt = match self.loader.load_buffer_for_name(&request.key, false) {
            LoadResult::Buffer { buffer, .. } => {
                self.start_if_current(request.channel, token, || {
                    self.player.start_buffer_with(&buffer, &playback_key, &opts)
                })
            }
            LoadResult::Missing(ErrorKind::DecodeFailure) => {
                // The asset exists but cannot be decoded into memory: stream it instead
                match self.loader.fetch_raw(&canonical) {
                    Ok(bytes) => self.start_if_current(request.channel, token, || {
                        self.player.play_stream(
                            bytes,
                            &playback_key,
                            &opts,
                            Some(self.stream_max_duration),
                        )
                    }),
                    Err(e) => Some(Err(e.kind())),
                }
            }
            LoadResult::Missing(kind) => Some(Err(kind)),
            // Not requested: the arbiter never asks for the spoken fallback
            LoadResult::Spoken => Some(Err(ErrorKind::AssetNotFound)),
        };

        let elapsed = started.elapsed().as_millis() as u64;
        match attempt {
            None => {
                tracing::debug!("{} superseded before it started", request.key);
                ManagedOutcome::Stale
            }
            Some(Ok(handle)) => {
                self.bus.playback(PlaybackTelemetry::success(
                    PlaybackMethod::AudioBuffer,
                    &canonical,
                    elapsed,
                ));
                self.watch_channel(request, token, handle);
                ManagedOutcome::Started
            }
            Some(Err(kind)) => {
                clear_if_current(&self.channels, request.channel, token);
                tracing::warn!("Managed playback of {} failed ({})", request.key, kind);
                self.bus.playback(PlaybackTelemetry::failure(
                    PlaybackMethod::AudioBuffer,
                    &canonical,
                    elapsed,
                    kind,
                ));
                ManagedOutcome::Failed(kind)
            }
        }
    }

    /// Run `start` while holding the channel lock, only if `token` is still current
    fn start_if_current<F>(
        &self,
        channel: Channel,
        token: u64,
        start: F,
    ) -> Option<Result<PlaybackHandle, ErrorKind>>
    where
        F: FnOnce() -> Result<PlaybackHandle, AudioError>,
    {
        let channels = self.channels.lock();
        let current = channels.get(&channel).is_some_and(|s| s.token == token);
        if !current {
            return None;
        }
        Some(start().map_err(|e| e.kind()))
    }

    /// Clear the channel on natural end or once the expected duration passes
    fn watch_channel(&self, request: &PlaybackRequest, token: u64, handle: PlaybackHandle) {
        let channels = self.channels.clone();
        let channel = request.channel;
        let limit = request
            .expected_duration_ms
            .map(Duration::from_millis)
            .or(handle.expected_duration());
        let done = handle.receiver();

        crate::utils::spawn_after("channel-watch", Duration::ZERO, move || {
            match limit {
                Some(limit) => {
                    let _ = done.recv_timeout(limit);
                }
                None => {
                    let _ = done.recv();
                }
            }
            if clear_if_current(&channels, channel, token) {
                tracing::trace!("Channel {} cleared (token {})", channel, token);
            }
        });
    }

    /// Fade out and clear one channel
    pub fn stop_channel(&self, channel: Channel) {
        let key = {
            let mut channels = self.channels.lock();
            channels.get_mut(&channel).and_then(|state| {
                state.token += 1;
                state.active_key.take()
            })
        };
        if let Some(key) = key {
            self.player.fade_out_key(&key, self.fade_out_ms);
            tracing::debug!("Stopped channel {}", channel);
        }
    }

    /// Fade out and clear every channel
    pub fn stop_all_managed(&self) {
        let keys: Vec<String> = {
            let mut channels = self.channels.lock();
            channels
                .values_mut()
                .filter_map(|state| {
                    state.token += 1;
                    state.active_key.take()
                })
                .collect()
        };
        for key in &keys {
            self.player.fade_out_key(key, self.fade_out_ms);
        }
        if !keys.is_empty() {
            tracing::debug!("Stopped {} managed channels", keys.len());
        }
    }

    pub fn channel_snapshot(&self) -> Vec<ChannelSnapshot> {
        let channels = self.channels.lock();
        let mut snapshot: Vec<ChannelSnapshot> = channels
            .iter()
            .map(|(&channel, state)| ChannelSnapshot {
                channel,
                active_key: state.active_key.clone(),
                priority: state.priority,
                token: state.token,
            })
            .collect();
        snapshot.sort_by_key(|s| s.channel);
        snapshot
    }

    /// Playback key active on `channel`, if any
    pub fn active_key(&self, channel: Channel) -> Option<String> {
        self.channels
            .lock()
            .get(&channel)
            .and_then(|state| state.active_key.clone())
    }
}
