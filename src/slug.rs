use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Separator used inside canonical keys
pub const SEPARATOR: char = '_';

const NUMBER_WORDS: [&str; 21] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen", "twenty",
];

/// Convert a logical sound name into its canonical key
/// - Strips diacritics via Unicode NFD decomposition
/// - Maps Turkish letters that have no decomposition: ı→i, ğ→g, ş→s
/// - Lowercases
/// - Replaces every run of non-alphanumeric characters (spaces, punctuation, emoji)
///   with a single underscore
/// - Trims leading/trailing underscores
pub fn normalize(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut pending_separator = false;

    for ch in input.nfd() {
        if is_combining_mark(ch) {
            continue;
        }

        let mapped = match ch {
            'ğ' | 'Ğ' => 'g',
            'ı' | 'İ' => 'i',
            'ş' | 'Ş' => 's',
            _ => ch,
        };

        if mapped.is_alphanumeric() {
            if pending_separator && !result.is_empty() {
                result.push(SEPARATOR);
            }
            pending_separator = false;
            result.extend(mapped.to_lowercase());
        } else {
            pending_separator = true;
        }
    }

    result
}

/// Digit-for-word or word-for-digit counterpart of a canonical key
pub fn number_counterpart(key: &str) -> Option<String> {
    if !key.is_empty() && key.chars().all(|c| c.is_ascii_digit()) {
        let value: usize = key.parse().ok()?;
        return NUMBER_WORDS.get(value).map(|w| w.to_string());
    }
    NUMBER_WORDS
        .iter()
        .position(|w| *w == key)
        .map(|value| value.to_string())
}

/// Ordered alias candidates for a sound name, without memoization.
///
/// Order: canonical key, key without separators, hyphenated key, number
/// counterpart, upper-case bare letter.
pub fn candidates_for(name: &str) -> Vec<String> {
    let key = normalize(name);
    if key.is_empty() {
        return Vec::new();
    }

    let mut out = vec![key.clone()];
    let mut push = |candidate: String| {
        if !candidate.is_empty() && !out.contains(&candidate) {
            out.push(candidate);
        }
    };

    push(key.replace(SEPARATOR, ""));
    push(key.replace(SEPARATOR, "-"));
    if let Some(counterpart) = number_counterpart(&key) {
        push(counterpart);
    }
    if key.chars().count() == 1 {
        push(key.to_uppercase());
    }

    out
}

/// Turn a sound name into something a voice can read aloud: separators become
/// spaces, anything that is not a letter, digit or apostrophe is dropped.
pub fn spoken_text(name: &str) -> String {
    static NOISE: OnceLock<Option<Regex>> = OnceLock::new();
    let noise = NOISE.get_or_init(|| Regex::new(r"[^\p{L}\p{N}'\s]+").ok());

    let replaced = name.replace(['_', '-'], " ");
    let stripped = match noise {
        Some(noise) => noise.replace_all(&replaced, " ").into_owned(),
        None => replaced,
    };
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Memoizing candidate resolver.
///
/// Resolution is a pure function of the input string, so results are cached for the
/// lifetime of the resolver.
#[derive(Default)]
pub struct KeyResolver {
    memo: Mutex<HashMap<String, Arc<[String]>>>,
}

impl KeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidates for `name`, computed once per distinct input
    pub fn resolve_candidates(&self, name: &str) -> Arc<[String]> {
        if let Some(hit) = self.memo.lock().get(name) {
            return Arc::clone(hit);
        }

        let resolved: Arc<[String]> = candidates_for(name).into();
        self.memo
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&resolved))
            .clone()
    }

    /// Number of memoized inputs
    pub fn memoized(&self) -> usize {
        self.memo.lock().len()
    }
}
