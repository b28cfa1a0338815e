use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::error::ErrorKind;
use crate::messaging::events::{PlaybackMethod, PlaybackTelemetry};

/// Latency samples kept per method for percentile reporting
const MAX_SAMPLES: usize = 256;

/// Run `f` on a short-lived named thread after `delay`.
///
/// Used for delayed hard-stops, duration-based channel clearing and other timed
/// cleanup that must not block the caller.
pub fn spawn_after<F>(name: &str, delay: Duration, f: F)
where
    F: FnOnce() + Send + 'static,
{
    let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        f();
    });
    if let Err(e) = spawned {
        tracing::error!("Failed to spawn {} timer thread: {}", name, e);
    }
}

/// Counters and latency samples for one playback method
#[derive(Debug, Clone, Default)]
struct MethodStats {
    attempts: u64,
    successes: u64,
    errors: HashMap<ErrorKind, u64>,
    latencies_ms: Vec<u64>,
}

/// Summary row for one playback method
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MethodSummary {
    pub method: PlaybackMethod,
    pub attempts: u64,
    pub successes: u64,
    pub errors: HashMap<ErrorKind, u64>,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

/// Statistics collector for playback telemetry
#[derive(Debug, Default)]
pub struct PlaybackStats {
    methods: HashMap<PlaybackMethod, MethodStats>,
}

impl PlaybackStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one playback attempt
    pub fn record(&mut self, telemetry: &PlaybackTelemetry) {
        let stats = self.methods.entry(telemetry.method).or_default();
        stats.attempts += 1;
        if telemetry.success {
            stats.successes += 1;
        }
        if let Some(kind) = telemetry.error {
            *stats.errors.entry(kind).or_default() += 1;
        }
        if stats.latencies_ms.len() == MAX_SAMPLES {
            stats.latencies_ms.remove(0);
        }
        stats.latencies_ms.push(telemetry.duration_ms);
    }

    pub fn attempts(&self, method: PlaybackMethod) -> u64 {
        self.methods.get(&method).map(|s| s.attempts).unwrap_or(0)
    }

    pub fn successes(&self, method: PlaybackMethod) -> u64 {
        self.methods.get(&method).map(|s| s.successes).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Calculate percentile from sorted data
    fn percentile(sorted: &[u64], p: f64) -> u64 {
        if sorted.is_empty() {
            return 0;
        }

        let idx = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
        sorted[idx]
    }

    /// Per-method summaries, ordered by attempt count (busiest first)
    pub fn summary(&self) -> Vec<MethodSummary> {
        let mut rows: Vec<MethodSummary> = self
            .methods
            .iter()
            .map(|(method, stats)| {
                let mut sorted = stats.latencies_ms.clone();
                sorted.sort_unstable();
                MethodSummary {
                    method: *method,
                    attempts: stats.attempts,
                    successes: stats.successes,
                    errors: stats.errors.clone(),
                    p50_ms: Self::percentile(&sorted, 50.0),
                    p95_ms: Self::percentile(&sorted, 95.0),
                }
            })
            .collect();
        rows.sort_by(|a, b| b.attempts.cmp(&a.attempts).then(a.method.as_str().cmp(b.method.as_str())));
        rows
    }
}
