/// Buffer loader
///
/// Resolves keys to decoded buffers: cache first, then a shared in-flight load, then
/// fetch and decode. Concurrent requests for one key wait on the same pending slot so
/// the asset is fetched once. Failures are reported as [`ErrorKind`] and never leave
/// this layer as errors.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use super::cache::BufferCache;
use super::decode::{self, DecodedBuffer};
use super::fetch::{asset_url, AssetFetcher};
use super::registry::AssetRegistry;
use crate::error::{AudioError, ErrorKind};
use crate::slug::{self, KeyResolver};

/// Last-resort voice used when no asset exists for a name
pub trait SpeechFallback: Send + Sync {
    /// Speak `text` with an on-device voice, blocking until done. True on success.
    fn speak_name(&self, text: &str) -> bool;
}

/// Result of loading by sound name
#[derive(Debug, Clone)]
pub enum LoadResult {
    /// A candidate key resolved to a buffer
    Buffer { key: String, buffer: DecodedBuffer },
    /// No asset; the cleaned name was spoken instead
    Spoken,
    /// Nothing played
    Missing(ErrorKind),
}

type LoadOutcome = Result<DecodedBuffer, ErrorKind>;

/// One load that other callers can wait on
struct PendingLoad {
    result: Mutex<Option<LoadOutcome>>,
    ready: Condvar,
}

impl PendingLoad {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, outcome: LoadOutcome) {
        *self.result.lock() = Some(outcome);
        self.ready.notify_all();
    }

    fn wait(&self) -> LoadOutcome {
        let mut result = self.result.lock();
        loop {
            if let Some(outcome) = result.as_ref() {
                return outcome.clone();
            }
            self.ready.wait(&mut result);
        }
    }
}

/// Finishes the leader's slot even if the load unwinds, so waiters always wake
struct LeaderSlot<'a> {
    in_flight: &'a Mutex<HashMap<String, Arc<PendingLoad>>>,
    key: &'a str,
    pending: Arc<PendingLoad>,
    outcome: Option<LoadOutcome>,
}

impl Drop for LeaderSlot<'_> {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or_else(|| {
            tracing::error!("Load of {} aborted", self.key);
            Err(ErrorKind::DecodeFailure)
        });
        self.in_flight.lock().remove(self.key);
        self.pending.complete(outcome);
    }
}

pub struct BufferLoader {
    cache: Mutex<BufferCache>,
    in_flight: Mutex<HashMap<String, Arc<PendingLoad>>>,
    fetcher: Arc<dyn AssetFetcher>,
    registry: RwLock<Arc<AssetRegistry>>,
    resolver: Arc<KeyResolver>,
    fallback: RwLock<Option<Arc<dyn SpeechFallback>>>,
    asset_base: String,
    timeout: Duration,
    fetches: AtomicU64,
}

impl BufferLoader {
    pub fn new(
        fetcher: Arc<dyn AssetFetcher>,
        resolver: Arc<KeyResolver>,
        asset_base: &str,
        capacity: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            cache: Mutex::new(BufferCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
            fetcher,
            registry: RwLock::new(Arc::new(AssetRegistry::empty())),
            resolver,
            fallback: RwLock::new(None),
            asset_base: asset_base.to_string(),
            timeout,
            fetches: AtomicU64::new(0),
        }
    }

    pub fn set_registry(&self, registry: AssetRegistry) {
        *self.registry.write() = Arc::new(registry);
    }

    pub fn registry(&self) -> Arc<AssetRegistry> {
        self.registry.read().clone()
    }

    pub fn set_speech_fallback(&self, fallback: Arc<dyn SpeechFallback>) {
        *self.fallback.write() = Some(fallback);
    }

    pub fn fetcher(&self) -> Arc<dyn AssetFetcher> {
        self.fetcher.clone()
    }

    /// Canonical key for a name: the registered asset if any, else the normalized name
    pub fn canonical_key(&self, name: &str) -> String {
        match self.registry().lookup(name) {
            Some(asset) => asset.key.clone(),
            None => slug::normalize(name),
        }
    }

    /// Decoded buffer for an exact key, or `None` after logging the failure
    pub fn load_from_index(&self, key: &str) -> Option<DecodedBuffer> {
        self.load_with_outcome(key).ok()
    }

    /// Decoded buffer for an exact key, deduplicating concurrent loads
    pub fn load_with_outcome(&self, key: &str) -> LoadOutcome {
        if let Some(buffer) = self.cache.lock().get(key) {
            return Ok(buffer);
        }

        let (pending, leader) = {
            let mut in_flight = self.in_flight.lock();
            // A load may have finished between the first check and taking this lock
            if let Some(buffer) = self.cache.lock().get(key) {
                return Ok(buffer);
            }
            match in_flight.get(key) {
                Some(pending) => (pending.clone(), false),
                None => {
                    let pending = Arc::new(PendingLoad::new());
                    in_flight.insert(key.to_string(), pending.clone());
                    (pending, true)
                }
            }
        };

        if !leader {
            tracing::trace!("Joining in-flight load for {}", key);
            return pending.wait();
        }

        let mut slot = LeaderSlot {
            in_flight: &self.in_flight,
            key,
            pending,
            outcome: None,
        };
        let outcome = self.fetch_and_decode(key);
        if let Ok(buffer) = &outcome {
            self.cache.lock().insert(key, buffer.clone());
        }
        slot.outcome = Some(outcome.clone());
        outcome
    }

    fn extensions_for(&self, key: &str) -> Vec<String> {
        let published = self.registry().formats_for(key);
        if published.is_empty() {
            decode::supported_formats()
                .into_iter()
                .map(str::to_string)
                .collect()
        } else {
            published
        }
    }

    /// Keys absent from a non-empty manifest are never fetched
    fn is_known(&self, key: &str) -> bool {
        let registry = self.registry();
        registry.is_empty() || registry.lookup(key).is_some_and(|asset| asset.key == key)
    }

    fn fetch_and_decode(&self, key: &str) -> LoadOutcome {
        if key.is_empty() || !self.is_known(key) {
            return Err(ErrorKind::AssetNotFound);
        }

        let mut last = ErrorKind::AssetNotFound;
        for ext in self.extensions_for(key) {
            let url = asset_url(&self.asset_base, key, &ext);
            self.fetches.fetch_add(1, Ordering::Relaxed);
            match self.fetcher.fetch(&url, self.timeout) {
                Ok(bytes) => match decode::decode(&bytes, Some(&ext)) {
                    Ok(buffer) => {
                        tracing::debug!("Loaded {} ({:?})", url, buffer.duration());
                        return Ok(buffer);
                    }
                    Err(e) => {
                        tracing::warn!("Could not decode {}: {}", url, e);
                        last = ErrorKind::DecodeFailure;
                    }
                },
                Err(AudioError::NotFound(_)) => continue,
                Err(e) => {
                    tracing::warn!("Fetch failed for {}: {}", url, e);
                    return Err(e.kind());
                }
            }
        }
        Err(last)
    }

    /// Encoded bytes for the first available encoding of `key`, for streaming playback
    pub fn fetch_raw(&self, key: &str) -> Result<Vec<u8>, AudioError> {
        if !self.is_known(key) {
            return Err(AudioError::NotFound(key.to_string()));
        }
        for ext in self.extensions_for(key) {
            let url = asset_url(&self.asset_base, key, &ext);
            self.fetches.fetch_add(1, Ordering::Relaxed);
            match self.fetcher.fetch(&url, self.timeout) {
                Ok(bytes) => return Ok(bytes),
                Err(AudioError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(AudioError::NotFound(key.to_string()))
    }

    /// Walk the name's candidate keys and return the first buffer that loads.
    ///
    /// With `allow_fallback`, a name with no asset is spoken by the on-device voice.
    pub fn load_buffer_for_name(&self, name: &str, allow_fallback: bool) -> LoadResult {
        let mut keys: Vec<String> = Vec::new();
        if let Some(asset) = self.registry().lookup(name) {
            keys.push(asset.key.clone());
        }
        for candidate in self.resolver.resolve_candidates(name).iter() {
            if !keys.contains(candidate) {
                keys.push(candidate.clone());
            }
        }

        let mut last = ErrorKind::AssetNotFound;
        for key in keys {
            match self.load_with_outcome(&key) {
                Ok(buffer) => return LoadResult::Buffer { key, buffer },
                Err(ErrorKind::AssetNotFound) => {}
                Err(kind) => last = kind,
            }
        }

        if allow_fallback && self.speak_fallback(name) {
            return LoadResult::Spoken;
        }
        tracing::debug!("No audio for {:?} ({})", name, last);
        LoadResult::Missing(last)
    }

    /// Speak a cleaned-up version of `name` with the fallback voice
    pub fn speak_fallback(&self, name: &str) -> bool {
        let text = slug::spoken_text(name);
        if text.is_empty() {
            return false;
        }
        let fallback = self.fallback.read().clone();
        match fallback {
            Some(voice) => voice.speak_name(&text),
            None => false,
        }
    }

    pub fn is_cached(&self, key: &str) -> bool {
        self.cache.lock().contains(key)
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.lock().capacity()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Total fetch requests issued
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}
