/// Priority-tiered progressive preloading
///
/// Critical assets load as soon as the engine starts. Common and then Rare wait for
/// the audio context to report ready (first user interaction on gesture-gated
/// platforms). Every tier runs on a bounded rayon pool and is marked loaded exactly
/// once, even when some of its keys fail.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::bounded;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::context::ContextManager;
use super::loader::BufferLoader;
use crate::error::AudioError;
use crate::messaging::{Event, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Needed for first-paint audio
    Critical,
    #[default]
    Common,
    /// Loaded opportunistically
    Rare,
}

impl Tier {
    /// Load order
    pub const ORDER: [Tier; 3] = [Tier::Critical, Tier::Common, Tier::Rare];

    fn slot(self) -> usize {
        match self {
            Tier::Critical => 0,
            Tier::Common => 1,
            Tier::Rare => 2,
        }
    }
}

pub struct Preloader {
    loader: Arc<BufferLoader>,
    pool: rayon::ThreadPool,
    loaded: [AtomicBool; 3],
    bus: EventBus,
}

impl Preloader {
    pub fn new(
        loader: Arc<BufferLoader>,
        concurrency: usize,
        bus: EventBus,
    ) -> Result<Self, AudioError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency.max(1))
            .thread_name(|i| format!("preload-{}", i))
            .build()
            .map_err(|e| AudioError::PlaybackFailed(format!("preload pool: {}", e)))?;

        Ok(Self {
            loader,
            pool,
            loaded: [
                AtomicBool::new(false),
                AtomicBool::new(false),
                AtomicBool::new(false),
            ],
            bus,
        })
    }

    pub fn is_tier_loaded(&self, tier: Tier) -> bool {
        self.loaded[tier.slot()].load(Ordering::SeqCst)
    }

    /// Loaded tiers in load order
    pub fn loaded_tiers(&self) -> Vec<Tier> {
        Tier::ORDER
            .into_iter()
            .filter(|t| self.is_tier_loaded(*t))
            .collect()
    }

    /// Load every registered key of `tier`.
    ///
    /// Returns `(loaded, failed)`, or `None` when the tier was already claimed.
    pub fn load_tier(&self, tier: Tier) -> Option<(usize, usize)> {
        if self.loaded[tier.slot()].swap(true, Ordering::SeqCst) {
            return None;
        }

        let keys = self.loader.registry().keys_in_tier(tier);
        let (loaded, failed) = self.load_keys(&keys);

        tracing::info!(
            "Preloaded {:?} tier: {} loaded, {} failed",
            tier,
            loaded,
            failed
        );
        self.bus.publish(Event::TierLoaded {
            tier,
            loaded,
            failed,
        });
        Some((loaded, failed))
    }

    fn load_keys(&self, keys: &[String]) -> (usize, usize) {
        if keys.is_empty() {
            return (0, 0);
        }
        let loader = &self.loader;
        let loaded = self.pool.install(|| {
            keys.par_iter()
                .filter(|key| loader.load_from_index(key).is_some())
                .count()
        });
        (loaded, keys.len() - loaded)
    }

    /// Load Critical now, then Common and Rare once the context is ready.
    ///
    /// Runs on a background thread; returns immediately.
    pub fn start(self: &Arc<Self>, context: &ContextManager) {
        let (ready_tx, ready_rx) = bounded::<()>(1);
        context.on_ready(move || {
            let _ = ready_tx.send(());
        });

        let preloader = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("preloader".to_string())
            .spawn(move || {
                preloader.load_tier(Tier::Critical);
                // Disconnects without a message when audio is disabled
                if ready_rx.recv().is_ok() {
                    preloader.load_tier(Tier::Common);
                    preloader.load_tier(Tier::Rare);
                }
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to start preloader: {}", e);
        }
    }

    /// Warm the cache for arbitrary names with the same bounded concurrency.
    ///
    /// An empty list returns immediately without touching the network.
    pub fn prefetch(&self, names: &[String]) -> usize {
        if names.is_empty() {
            return 0;
        }
        let keys: Vec<String> = names
            .iter()
            .map(|name| self.loader.canonical_key(name))
            .filter(|key| !key.is_empty())
            .collect();
        let (loaded, failed) = self.load_keys(&keys);
        tracing::debug!("Prefetched {} keys ({} failed)", loaded, failed);
        loaded
    }
}
