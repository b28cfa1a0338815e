/// Internationalization support for spoken sentences
///
/// Provides language metadata and the sentence templates the word orchestrator speaks
/// before trying single-word assets. Templates live in embedded JSON assets keyed by
/// canonical sound key.
use std::collections::HashMap;

use serde::Deserialize;

use crate::slug;

/// Supported languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    English,
    Turkish,
    Spanish,
    French,
    German,
    Italian,
    Portuguese,
}

impl Language {
    pub const ALL: [Language; 7] = [
        Language::English,
        Language::Turkish,
        Language::Spanish,
        Language::French,
        Language::German,
        Language::Italian,
        Language::Portuguese,
    ];

    /// Get language name
    pub fn name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Turkish => "Türkçe",
            Language::Spanish => "Español",
            Language::French => "Français",
            Language::German => "Deutsch",
            Language::Italian => "Italiano",
            Language::Portuguese => "Português",
        }
    }

    /// Get language code (ISO 639-1)
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Turkish => "tr",
            Language::Spanish => "es",
            Language::French => "fr",
            Language::German => "de",
            Language::Italian => "it",
            Language::Portuguese => "pt",
        }
    }

    /// Parse an ISO 639-1 code or a locale such as `pt-BR`
    pub fn from_code(code: &str) -> Option<Self> {
        let base = code
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        Self::ALL.into_iter().find(|lang| lang.code() == base)
    }

    fn json(&self) -> &'static str {
        match self {
            Language::English => EN_JSON,
            Language::Turkish => TR_JSON,
            Language::Spanish => ES_JSON,
            Language::French => FR_JSON,
            Language::German => DE_JSON,
            Language::Italian => IT_JSON,
            Language::Portuguese => PT_JSON,
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::English
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Embedded language files
const EN_JSON: &str = include_str!("../assets/i18n/en.json");
const TR_JSON: &str = include_str!("../assets/i18n/tr.json");
const ES_JSON: &str = include_str!("../assets/i18n/es.json");
const FR_JSON: &str = include_str!("../assets/i18n/fr.json");
const DE_JSON: &str = include_str!("../assets/i18n/de.json");
const IT_JSON: &str = include_str!("../assets/i18n/it.json");
const PT_JSON: &str = include_str!("../assets/i18n/pt.json");

#[derive(Debug, Deserialize)]
struct I18nJson {
    locale: String,
    #[serde(default)]
    sentences: HashMap<String, String>,
    #[serde(default)]
    announcements: Announcements,
}

#[derive(Debug, Default, Deserialize)]
struct Announcements {
    #[serde(default)]
    unavailable: Option<String>,
}

/// Sentence templates for one language
#[derive(Debug, Clone)]
pub struct SentenceTemplates {
    pub language: Language,
    /// BCP 47 locale used to pick an on-device voice (e.g. `en-US`)
    pub locale: String,
    sentences: HashMap<String, String>,
    unavailable_prefix: String,
}

impl SentenceTemplates {
    /// Load templates for a language from embedded JSON.
    ///
    /// Falls back to an empty template table if the asset is malformed, which only
    /// disables the sentence tier.
    pub fn new(language: Language) -> Self {
        match Self::load(language) {
            Ok(templates) => templates,
            Err(e) => {
                tracing::warn!("Failed to load sentence templates for {:?}: {}", language, e);
                Self {
                    language,
                    locale: language.code().to_string(),
                    sentences: HashMap::new(),
                    unavailable_prefix: "Sound is not available for".to_string(),
                }
            }
        }
    }

    fn load(language: Language) -> Result<Self, serde_json::Error> {
        let parsed: I18nJson = serde_json::from_str(language.json())?;
        let sentences = parsed
            .sentences
            .into_iter()
            .map(|(key, sentence)| (slug::normalize(&key), sentence))
            .collect();

        Ok(Self {
            language,
            locale: parsed.locale,
            sentences,
            unavailable_prefix: parsed
                .announcements
                .unavailable
                .unwrap_or_else(|| "Sound is not available for".to_string()),
        })
    }

    /// Full sentence for a phrase, looked up by canonical key
    pub fn sentence_for(&self, phrase: &str) -> Option<&str> {
        self.sentences
            .get(&slug::normalize(phrase))
            .map(String::as_str)
    }

    /// Accessibility text announced when nothing could be played
    pub fn unavailable_announcement(&self, phrase: &str) -> String {
        format!("{} {}", self.unavailable_prefix, phrase.trim())
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_english() {
        let templates = SentenceTemplates::new(Language::English);
        assert_eq!(templates.locale, "en-US");
        assert_eq!(templates.sentence_for("Apple"), Some("A is for apple."));
        assert_eq!(templates.sentence_for("🍎 apple"), Some("A is for apple."));
        assert_eq!(templates.sentence_for("zebra"), None);
    }

    #[test]
    fn test_keys_are_normalized() {
        let pt = SentenceTemplates::new(Language::Portuguese);
        assert!(pt.sentence_for("maçã").is_some());

        let tr = SentenceTemplates::new(Language::Turkish);
        assert!(tr.sentence_for("köpek").is_some());
    }

    #[test]
    fn test_load_all_languages() {
        for lang in Language::ALL {
            let parsed: Result<I18nJson, _> = serde_json::from_str(lang.json());
            assert!(parsed.is_ok(), "Invalid JSON for {}: {:?}", lang.code(), parsed.err());

            let templates = SentenceTemplates::new(lang);
            assert!(!templates.is_empty(), "No sentences for {:?}", lang);
            assert!(templates.locale.starts_with(lang.code()));
        }
    }

    #[test]
    fn test_from_code() {
        assert_eq!(Language::from_code("fr"), Some(Language::French));
        assert_eq!(Language::from_code("pt-BR"), Some(Language::Portuguese));
        assert_eq!(Language::from_code("DE_at"), Some(Language::German));
        assert_eq!(Language::from_code("xx"), None);
    }

    #[test]
    fn test_unavailable_announcement() {
        let templates = SentenceTemplates::new(Language::English);
        assert_eq!(
            templates.unavailable_announcement(" zebra "),
            "Sound is not available for zebra"
        );
    }
}
