/// Asset registry built from the static manifest
///
/// ```json
/// {"assets": [{"key": "apple", "formats": ["mp3", "ogg"], "tier": "critical",
///              "aliases": ["🍎 apple"]}]}
/// ```
///
/// Every asset is indexed under all of its candidate keys so a lookup by any alias
/// lands on the canonical entry.
use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use super::decode;
use super::fetch::AssetFetcher;
use super::preloader::Tier;
use crate::error::AudioError;
use crate::slug::{candidates_for, normalize};

#[derive(Debug, Clone, PartialEq)]
pub struct AudioAsset {
    pub key: String,
    pub candidate_keys: Vec<String>,
    pub formats_available: Vec<String>,
    pub tier: Tier,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    key: String,
    #[serde(default)]
    formats: Vec<String>,
    #[serde(default)]
    tier: Tier,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    assets: Vec<ManifestEntry>,
}

#[derive(Debug, Default)]
pub struct AssetRegistry {
    assets: Vec<AudioAsset>,
    index: HashMap<String, usize>,
}

impl AssetRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a manifest document
    pub fn from_json(json: &str) -> Result<Self, AudioError> {
        let manifest: Manifest = serde_json::from_str(json)
            .map_err(|e| AudioError::ManifestInvalid(format!("asset manifest: {}", e)))?;

        let mut registry = Self::default();
        for entry in manifest.assets {
            let key = normalize(&entry.key);
            if key.is_empty() {
                tracing::warn!("Skipping manifest entry with empty key: {:?}", entry.key);
                continue;
            }

            let mut candidate_keys = candidates_for(&key);
            for alias in &entry.aliases {
                for candidate in candidates_for(alias) {
                    if !candidate_keys.contains(&candidate) {
                        candidate_keys.push(candidate);
                    }
                }
            }

            let formats_available = entry
                .formats
                .iter()
                .map(|f| f.trim_start_matches('.').to_ascii_lowercase())
                .filter(|f| decode::is_supported(f))
                .collect();

            registry.register(AudioAsset {
                key,
                candidate_keys,
                formats_available,
                tier: entry.tier,
            });
        }

        tracing::info!("Asset registry loaded: {} assets", registry.len());
        Ok(registry)
    }

    /// Fetch and parse the manifest at `location`
    pub fn load(
        fetcher: &dyn AssetFetcher,
        location: &str,
        timeout: Duration,
    ) -> Result<Self, AudioError> {
        let bytes = fetcher.fetch(location, timeout)?;
        let json = String::from_utf8(bytes)
            .map_err(|e| AudioError::ManifestInvalid(format!("asset manifest: {}", e)))?;
        Self::from_json(&json)
    }

    fn register(&mut self, asset: AudioAsset) {
        let slot = self.assets.len();
        for candidate in &asset.candidate_keys {
            // First registration of a candidate wins
            self.index.entry(candidate.clone()).or_insert(slot);
        }
        self.assets.push(asset);
    }

    /// Find the asset for any spelling of a name
    pub fn lookup(&self, name: &str) -> Option<&AudioAsset> {
        if let Some(&slot) = self.index.get(name) {
            return self.assets.get(slot);
        }
        candidates_for(name)
            .iter()
            .find_map(|candidate| self.index.get(candidate))
            .and_then(|&slot| self.assets.get(slot))
    }

    /// Encodings published for `key`, empty when unknown
    pub fn formats_for(&self, key: &str) -> Vec<String> {
        self.lookup(key)
            .map(|asset| asset.formats_available.clone())
            .unwrap_or_default()
    }

    pub fn keys_in_tier(&self, tier: Tier) -> Vec<String> {
        self.assets
            .iter()
            .filter(|asset| asset.tier == tier)
            .map(|asset| asset.key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}
