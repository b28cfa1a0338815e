/// Cloud text-to-speech
///
/// ElevenLabs-style HTTP API:
///
/// ```text
/// POST {api_base}/v1/text-to-speech/{voice_id}   xi-api-key: <key>
///      {"text", "model_id", "voice_settings": {...}}  -> audio/mpeg bytes
/// GET  {api_base}/v1/voices                           -> connectivity probe
/// ```
use std::io::Read;
use std::time::Duration;

use serde::Serialize;

use crate::config::TtsSettings;
use crate::error::TtsError;

/// Upper bound on one synthesized clip
const MAX_AUDIO_BYTES: u64 = 8 * 1024 * 1024;

/// Voice-quality knobs sent with every request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl From<&TtsSettings> for VoiceSettings {
    fn from(settings: &TtsSettings) -> Self {
        Self {
            stability: settings.stability,
            similarity_boost: settings.similarity_boost,
            style: settings.style,
            use_speaker_boost: settings.use_speaker_boost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    #[serde(skip)]
    pub voice_id: String,
    pub text: String,
    pub model_id: String,
    pub voice_settings: VoiceSettings,
}

/// Remote synthesis provider
pub trait CloudTts: Send + Sync {
    /// Encoded audio for the request
    fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, TtsError>;

    /// Cheap authenticated call used only to check connectivity
    fn probe(&self) -> Result<(), TtsError>;
}

pub struct ElevenLabsClient {
    agent: ureq::Agent,
    api_base: String,
    api_key: String,
    timeout: Duration,
}

impl ElevenLabsClient {
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Self {
        let user_agent = format!("vocab-audio/{}", env!("CARGO_PKG_VERSION"));
        Self {
            agent: ureq::AgentBuilder::new().user_agent(&user_agent).build(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            timeout,
        }
    }

    /// Client for the configured provider, `None` without a credential
    pub fn from_settings(settings: &TtsSettings) -> Option<Self> {
        let key = settings.api_key.as_deref()?;
        Some(Self::new(
            &settings.api_base,
            key,
            Duration::from_millis(settings.timeout_ms),
        ))
    }
}

fn map_error(error: ureq::Error) -> TtsError {
    match error {
        ureq::Error::Status(status @ (401 | 403), _) => TtsError::Unauthorized(status),
        ureq::Error::Status(status, response) => {
            let message = response
                .into_string()
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            TtsError::Http { status, message }
        }
        ureq::Error::Transport(transport) => TtsError::Unreachable(transport.to_string()),
    }
}

impl CloudTts for ElevenLabsClient {
    fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, TtsError> {
        let url = format!("{}/v1/text-to-speech/{}", self.api_base, request.voice_id);
        let response = self
            .agent
            .post(&url)
            .set("xi-api-key", &self.api_key)
            .set("Accept", "audio/mpeg")
            .timeout(self.timeout)
            .send_json(request)
            .map_err(map_error)?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_AUDIO_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| TtsError::Unreachable(e.to_string()))?;

        if bytes.is_empty() {
            return Err(TtsError::Http {
                status: 200,
                message: "empty audio".to_string(),
            });
        }
        tracing::debug!("Synthesized {} bytes for {:?}", bytes.len(), request.text);
        Ok(bytes)
    }

    fn probe(&self) -> Result<(), TtsError> {
        let url = format!("{}/v1/voices", self.api_base);
        self.agent
            .get(&url)
            .set("xi-api-key", &self.api_key)
            .timeout(self.timeout)
            .call()
            .map_err(map_error)?;
        Ok(())
    }
}
