//! Display name -> comparison key.
//!
//! Lower-cases, turns punctuation into separators, splits letter/digit runs
//! ("30X" -> "30", "x") so that "FP-30X" and "FP 30 X" compare equal, then
//! drops the collection's noise words. Pure; no I/O.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::config::UnifyConfig;
use crate::model::{ComparisonKey, InvalidRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Alpha,
    Digit,
}

/// Split text into lowercase alphanumeric tokens, breaking at punctuation,
/// whitespace and letter/digit boundaries.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut class: Option<CharClass> = None;

    for c in text.chars() {
        let next = if c.is_alphabetic() {
            Some(CharClass::Alpha)
        } else if c.is_numeric() {
            Some(CharClass::Digit)
        } else {
            None
        };

        if next != class && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        if next.is_some() {
            current.extend(c.to_lowercase());
        }
        class = next;
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Noise-word aware normalizer. Read-only once built; safe to share across
/// collection workers.
#[derive(Debug, Clone)]
pub struct Normalizer {
    min_length: usize,
    max_length: usize,
    global_noise: HashSet<String>,
    collection_noise: HashMap<String, HashSet<String>>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(3, 200)
    }
}

impl Normalizer {
    pub fn new(min_length: usize, max_length: usize) -> Self {
        Self {
            min_length,
            max_length,
            global_noise: HashSet::new(),
            collection_noise: HashMap::new(),
        }
    }

    pub fn from_config(config: &UnifyConfig) -> Self {
        let mut normalizer = Self::new(config.normalize.min_length, config.normalize.max_length)
            .with_global_noise(&config.normalize.noise_words);
        for (collection_id, overrides) in &config.collections {
            normalizer = normalizer.with_collection_noise(collection_id, &overrides.noise_words);
        }
        normalizer
    }

    /// Noise words removed in every collection. Multi-word entries contribute
    /// each of their tokens.
    pub fn with_global_noise<S: AsRef<str>>(mut self, words: &[S]) -> Self {
        self.global_noise
            .extend(words.iter().flat_map(|w| tokenize(w.as_ref())));
        self
    }

    pub fn with_collection_noise<S: AsRef<str>>(mut self, collection_id: &str, words: &[S]) -> Self {
        self.collection_noise
            .entry(collection_id.to_string())
            .or_default()
            .extend(words.iter().flat_map(|w| tokenize(w.as_ref())));
        self
    }

    fn is_noise(&self, token: &str, collection_id: &str) -> bool {
        self.global_noise.contains(token)
            || self
                .collection_noise
                .get(collection_id)
                .is_some_and(|words| words.contains(token))
    }

    /// Normalize a display name for one collection. Names outside the length
    /// bounds, or with nothing left after noise removal, are rejected.
    pub fn normalize(
        &self,
        display_name: &str,
        collection_id: &str,
    ) -> Result<ComparisonKey, InvalidRecord> {
        let length = display_name.trim().chars().count();
        if length < self.min_length {
            return Err(InvalidRecord::TooShort { length });
        }
        if length > self.max_length {
            return Err(InvalidRecord::TooLong { length });
        }

        let tokens: Vec<String> = tokenize(display_name)
            .into_iter()
            .filter(|t| !self.is_noise(t, collection_id))
            .collect();
        if tokens.is_empty() {
            return Err(InvalidRecord::NoTokens);
        }

        Ok(ComparisonKey {
            normalized_string: tokens.join(" "),
            normalized_tokens: tokens.into_iter().collect::<BTreeSet<_>>(),
        })
    }
}
