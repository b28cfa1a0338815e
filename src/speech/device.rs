/// On-device speech
///
/// The platform voice sits behind [`DeviceSpeech`]. Desktop builds use a local
/// command-line engine (`say` on macOS, `espeak-ng`/`espeak` elsewhere) when one is
/// installed; hosts embedding the engine can provide their own implementation.
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::error::AudioError;
use crate::i18n::Language;

/// One installed voice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceVoice {
    pub name: String,
    /// BCP 47 locale, e.g. `en-US`
    pub locale: String,
}

impl DeviceVoice {
    pub fn new(name: &str, locale: &str) -> Self {
        Self {
            name: name.to_string(),
            locale: locale.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    pub voice: Option<DeviceVoice>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

/// Platform text-to-speech
pub trait DeviceSpeech: Send + Sync {
    fn voices(&self) -> Vec<DeviceVoice>;

    /// Start speaking. Exactly one result is sent on `done` when the utterance ends,
    /// fails or is cancelled.
    fn speak(
        &self,
        utterance: Utterance,
        done: Sender<Result<(), String>>,
    ) -> Result<(), AudioError>;

    /// Cancel the utterance in progress, if any
    fn cancel(&self);
}

fn base_language(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Pick a voice for `locale`: exact locale, then same base language, then any voice
pub fn select_voice(voices: &[DeviceVoice], locale: &str) -> Option<DeviceVoice> {
    let wanted = locale.replace('_', "-");
    let base = base_language(locale);

    voices
        .iter()
        .find(|v| v.locale.replace('_', "-").eq_ignore_ascii_case(&wanted))
        .or_else(|| voices.iter().find(|v| base_language(&v.locale) == base))
        .or_else(|| voices.first())
        .cloned()
}

/// No on-device voice available
#[derive(Debug, Default)]
pub struct NoDeviceSpeech;

impl DeviceSpeech for NoDeviceSpeech {
    fn voices(&self) -> Vec<DeviceVoice> {
        Vec::new()
    }

    fn speak(&self, _utterance: Utterance, _done: Sender<Result<(), String>>) -> Result<(), AudioError> {
        Err(AudioError::SynthesisUnavailable(
            "no on-device voice".to_string(),
        ))
    }

    fn cancel(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Engine {
    Say,
    Espeak(&'static str),
}

/// Speech through a locally installed command-line synthesizer
pub struct CommandSpeech {
    engine: Engine,
    current: Arc<Mutex<Option<Child>>>,
}

impl CommandSpeech {
    /// Find an installed engine, `None` if there is none
    pub fn detect() -> Option<Self> {
        let candidates: &[Engine] = if cfg!(target_os = "macos") {
            &[Engine::Say]
        } else {
            &[Engine::Espeak("espeak-ng"), Engine::Espeak("espeak")]
        };

        let engine = candidates.iter().copied().find(|engine| {
            let (program, probe) = match engine {
                Engine::Say => ("say", "-v?"),
                Engine::Espeak(bin) => (*bin, "--version"),
            };
            Command::new(program)
                .arg(probe)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false)
        })?;

        tracing::info!("On-device speech via {:?}", engine);
        Some(Self {
            engine,
            current: Arc::new(Mutex::new(None)),
        })
    }

    fn command(&self, utterance: &Utterance) -> Command {
        let words_per_minute = (175.0 * utterance.rate.clamp(0.5, 2.0)).round() as u32;
        match self.engine {
            Engine::Say => {
                let mut cmd = Command::new("say");
                if let Some(voice) = &utterance.voice {
                    cmd.arg("-v").arg(&voice.name);
                }
                cmd.arg("-r").arg(words_per_minute.to_string());
                cmd.arg("--").arg(&utterance.text);
                cmd
            }
            Engine::Espeak(bin) => {
                let mut cmd = Command::new(bin);
                if let Some(voice) = &utterance.voice {
                    cmd.arg("-v").arg(&voice.name);
                }
                let amplitude = (100.0 * utterance.volume.clamp(0.0, 2.0)).round() as u32;
                let pitch = (50.0 * utterance.pitch.clamp(0.0, 2.0)).round() as u32;
                cmd.arg("-s").arg(words_per_minute.to_string());
                cmd.arg("-a").arg(amplitude.to_string());
                cmd.arg("-p").arg(pitch.to_string());
                cmd.arg("--").arg(&utterance.text);
                cmd
            }
        }
    }
}

impl DeviceSpeech for CommandSpeech {
    fn voices(&self) -> Vec<DeviceVoice> {
        // Both engines name their voices after the language
        Language::ALL
            .into_iter()
            .map(|lang| {
                let name = match self.engine {
                    Engine::Say => default_say_voice(lang),
                    Engine::Espeak(_) => lang.code(),
                };
                DeviceVoice::new(name, lang.code())
            })
            .collect()
    }

    fn speak(
        &self,
        utterance: Utterance,
        done: Sender<Result<(), String>>,
    ) -> Result<(), AudioError> {
        self.cancel();

        let child = self
            .command(&utterance)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AudioError::SynthesisUnavailable(e.to_string()))?;
        let pid = child.id();
        *self.current.lock() = Some(child);

        let current = Arc::clone(&self.current);
        thread::Builder::new()
            .name("device-speech".to_string())
            .spawn(move || loop {
                let mut slot = current.lock();
                let status = match slot.as_mut() {
                    Some(child) if child.id() == pid => child.try_wait(),
                    // Replaced or cancelled
                    _ => {
                        let _ = done.send(Err("cancelled".to_string()));
                        return;
                    }
                };
                match status {
                    Ok(Some(status)) => {
                        *slot = None;
                        let result = if status.success() {
                            Ok(())
                        } else {
                            Err(format!("speech engine exited with {}", status))
                        };
                        let _ = done.send(result);
                        return;
                    }
                    Ok(None) => {
                        drop(slot);
                        thread::sleep(std::time::Duration::from_millis(25));
                    }
                    Err(e) => {
                        *slot = None;
                        let _ = done.send(Err(e.to_string()));
                        return;
                    }
                }
            })
            .map_err(|e| AudioError::SynthesisUnavailable(e.to_string()))?;
        Ok(())
    }

    fn cancel(&self) {
        if let Some(mut child) = self.current.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn default_say_voice(language: Language) -> &'static str {
    match language {
        Language::English => "Samantha",
        Language::Turkish => "Yelda",
        Language::Spanish => "Monica",
        Language::French => "Thomas",
        Language::German => "Anna",
        Language::Italian => "Alice",
        Language::Portuguese => "Luciana",
    }
}
