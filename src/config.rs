use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Environment variable holding the cloud TTS credential (never persisted)
pub const TTS_KEY_ENV: &str = "VOCAB_AUDIO_TTS_KEY";

/// Sprite playback feature block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpriteSettings {
    /// Feature flag: sprite playback is skipped entirely when false
    pub enabled: bool,
    pub sprite_url: String,
    pub manifest_url: String,
    /// Manifest fetch attempts before giving up for the session
    pub retries: u32,
    pub timeout_ms: u64,
}

impl Default for SpriteSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            sprite_url: "sounds/sprite.mp3".to_string(),
            manifest_url: "sounds/sprite.json".to_string(),
            retries: 3,
            timeout_ms: 5_000,
        }
    }
}

/// Cloud text-to-speech settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsSettings {
    pub api_base: String,
    pub model_id: String,
    /// Voice identifier per ISO 639-1 language code
    pub voice_ids: HashMap<String, String>,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
    pub timeout_ms: u64,

    /// Provider credential, read from the environment only
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for TtsSettings {
    fn default() -> Self {
        let voice_ids = [
            ("en", "21m00Tcm4TlvDq8ikWAM"),
            ("es", "EXAVITQu4vr4xnSDxMaL"),
            ("fr", "MF3mGyEYCl7XYWbV9V6O"),
            ("de", "TxGEqnHWrfWFTfGW9XjX"),
            ("tr", "ErXwobaYiN019PkySvjV"),
        ]
        .into_iter()
        .map(|(lang, id)| (lang.to_string(), id.to_string()))
        .collect();

        Self {
            api_base: "https://api.elevenlabs.io".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            voice_ids,
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.0,
            use_speaker_boost: true,
            timeout_ms: 8_000,
            api_key: None,
        }
    }
}

impl TtsSettings {
    /// Voice for a language, falling back to the English voice
    pub fn voice_for(&self, language_code: &str) -> Option<&str> {
        self.voice_ids
            .get(language_code)
            .or_else(|| self.voice_ids.get("en"))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base path or URL that asset keys are resolved against
    pub asset_base: String,

    /// Optional asset manifest (keys, formats, tiers)
    pub manifest_path: Option<String>,

    /// Maximum decoded buffers kept in memory
    pub cache_capacity: usize,

    /// Loads in flight per preload tier
    pub preload_concurrency: usize,

    /// Maximum synthesized phrases kept in memory
    pub voice_cache_capacity: usize,

    /// Fade used when a channel is preempted or stopped
    pub fade_out_ms: u64,

    /// Silence between words when concatenating a phrase
    pub word_gap_ms: u64,

    /// Safety limit for stream (non-buffer) playback
    pub stream_max_duration_ms: u64,

    /// Per-request fetch timeout
    pub fetch_timeout_ms: u64,

    /// Keep the output suspended until the host reports a user gesture
    pub require_user_gesture: bool,

    /// ISO 639-1 code of the active language
    pub language: String,

    /// Master volume (0.0-1.0)
    pub volume: f32,

    /// Whether a request preempts channels at exactly its own priority
    pub preempt_equal_priority: bool,

    pub sprite: SpriteSettings,

    pub tts: TtsSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            asset_base: "sounds".to_string(),
            manifest_path: None,
            cache_capacity: 50,
            preload_concurrency: 4,
            voice_cache_capacity: 50,
            fade_out_ms: 150,
            word_gap_ms: 120,
            stream_max_duration_ms: 10_000,
            fetch_timeout_ms: 8_000,
            require_user_gesture: false,
            language: "en".to_string(),
            volume: 1.0,
            preempt_equal_priority: true,
            sprite: SpriteSettings::default(),
            tts: TtsSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the platform-specific config directory.
    /// Creates default config if file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, writing defaults when missing
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                source: Box::new(e),
            })?;
            let config: EngineConfig =
                serde_json::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.display().to_string(),
                    source: Box::new(e),
                })?;
            tracing::info!("Loaded config from: {}", path.display());
            config
        } else {
            let config = EngineConfig::default();
            config.save_to(path)?;
            tracing::info!("Created default config at: {}", path.display());
            config
        };

        config.validate()?;
        config.tts.api_key = env::var(TTS_KEY_ENV).ok().filter(|k| !k.trim().is_empty());
        if config.tts.api_key.is_none() {
            tracing::info!("No TTS credential set, on-device voices only");
        }
        Ok(config)
    }

    /// Save configuration to the platform-specific config directory
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::DirectoryCreationFailed {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.display().to_string(),
            source: Box::new(e),
        })?;
        fs::write(path, json).map_err(|e| ConfigError::SaveFailed {
            path: path.display().to_string(),
            source: Box::new(e),
        })?;

        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid("cache_capacity must be at least 1".into()));
        }
        if self.preload_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "preload_concurrency must be at least 1".into(),
            ));
        }
        if self.voice_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "voice_cache_capacity must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(ConfigError::Invalid(format!(
                "volume {} outside 0.0-1.0",
                self.volume
            )));
        }
        Ok(())
    }

    /// Whether the cloud TTS path can be attempted at all
    pub fn cloud_tts_enabled(&self) -> bool {
        self.tts.api_key.is_some()
    }

    /// Get the config file path (in the user config folder)
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("VocabAudio").join("config.json"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".into()))
    }

    /// Get the config directory path (for display purposes)
    pub fn config_dir_display() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.cache_capacity, 50);
        assert_eq!(config.voice_cache_capacity, 50);
        assert_eq!(config.preload_concurrency, 4);
        assert_eq!(config.language, "en");
        assert!(!config.sprite.enabled);
        assert!(config.tts.api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_skips_credential() {
        let mut config = EngineConfig::default();
        config.tts.api_key = Some("secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));

        let deserialized: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.cache_capacity, deserialized.cache_capacity);
        assert!(deserialized.tts.api_key.is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"language":"fr","sprite":{"enabled":true}}"#).unwrap();
        assert_eq!(config.language, "fr");
        assert!(config.sprite.enabled);
        assert_eq!(config.sprite.retries, 3);
        assert_eq!(config.cache_capacity, 50);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = EngineConfig {
            cache_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_creates_default() {
        let dir = std::env::temp_dir().join(format!("vocab-audio-config-{}", std::process::id()));
        let path = dir.join("config.json");
        let _ = fs::remove_file(&path);

        let config = EngineConfig::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.fade_out_ms, 150);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_voice_for_falls_back_to_english() {
        let tts = TtsSettings::default();
        assert_eq!(tts.voice_for("xx"), tts.voice_for("en"));
        assert!(tts.voice_for("es").is_some());
    }
}
