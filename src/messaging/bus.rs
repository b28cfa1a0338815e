/// Event bus for pub/sub messaging
///
/// Telemetry and lifecycle events are broadcast to every subscriber without blocking
/// the publishing thread.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};

use super::events::{Event, PlaybackTelemetry};
use crate::utils::{MethodSummary, PlaybackStats};

/// Events buffered per subscriber before new ones are dropped
const SUBSCRIBER_BACKLOG: usize = 256;

/// Subscriber ID for tracking subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(usize);

struct Subscriber {
    id: SubscriberId,
    sender: Sender<Event>,
}

/// Event bus for broadcasting events to subscribers
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    next_id: Arc<AtomicUsize>,
    stats: Arc<Mutex<PlaybackStats>>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events, returns a receiver and subscription ID
    pub fn subscribe(&self) -> (Receiver<Event>, SubscriberId) {
        let (tx, rx) = bounded(SUBSCRIBER_BACKLOG);
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber { id, sender: tx });
        (rx, id)
    }

    /// Unsubscribe from events
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().retain(|s| s.id != id);
    }

    /// Publish an event to all subscribers.
    ///
    /// A full subscriber misses the event; a disconnected one is removed.
    pub fn publish(&self, event: Event) {
        let mut disconnected = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for subscriber in subscribers.iter() {
                match subscriber.sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::trace!("Subscriber {:?} backlog full", subscriber.id);
                    }
                    Err(TrySendError::Disconnected(_)) => disconnected.push(subscriber.id),
                }
            }
        }

        if !disconnected.is_empty() {
            self.subscribers
                .write()
                .retain(|s| !disconnected.contains(&s.id));
        }
    }

    /// Publish a playback attempt, record it in the stats and log it
    pub fn playback(&self, telemetry: PlaybackTelemetry) {
        self.stats.lock().record(&telemetry);
        if telemetry.success {
            tracing::debug!(
                method = %telemetry.method,
                key = %telemetry.key,
                duration_ms = telemetry.duration_ms,
                "Playback succeeded"
            );
        } else {
            tracing::debug!(
                method = %telemetry.method,
                key = %telemetry.key,
                error = ?telemetry.error,
                "Playback attempt failed"
            );
        }
        self.publish(Event::PlaybackAttempt(telemetry));
    }

    /// Per-method playback counters and latency percentiles
    pub fn playback_summary(&self) -> Vec<MethodSummary> {
        self.stats.lock().summary()
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Clear all subscribers
    pub fn clear(&self) {
        self.subscribers.write().clear();
    }
}
