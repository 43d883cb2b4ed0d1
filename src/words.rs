//! Match dictionary and translation fetching.
//!
//! The word pool is a plain text file, one word per line, read once per
//! match. Translations come from the MyMemory API; the `Translator` trait is
//! the seam a match session sees, so the service can be swapped (tests use a
//! fixed map). A fetch error is surfaced as-is and the match session turns
//! it into the service-unavailable path.

use std::fs;
use std::path::Path;

use rand::Rng;
use serde_json::Value;
use tracing::debug;

use crate::error::{QuizzleError, Result};

/// The word pool a match draws from.
pub struct WordList {
    words: Vec<String>,
}

impl WordList {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let words: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        if words.is_empty() {
            return Err(QuizzleError::config(format!(
                "dictionary {} is empty",
                path.display()
            )));
        }
        Ok(Self { words })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Pick up to `count` distinct words uniformly at random. A word picked
    /// once is never picked again for the same match.
    pub fn pick(&self, count: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let target = count.min(self.words.len());
        let mut picked: Vec<String> = Vec::with_capacity(target);
        while picked.len() < target {
            let word = &self.words[rng.gen_range(0..self.words.len())];
            if !picked.iter().any(|p| p == word) {
                picked.push(word.clone());
            }
        }
        picked
    }
}

/// Produces the acceptable translations for one source word.
pub trait Translator: Send + Sync {
    fn translate(&self, word: &str) -> Result<Vec<String>>;
}

/// Normalise a candidate translation: lowercase, then keep only `[a-z ]`.
pub fn normalize(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| matches!(c, 'a'..='z' | ' '))
        .collect()
}

/// MyMemory-backed Italian-to-English translator.
pub struct MyMemoryTranslator {
    client: reqwest::blocking::Client,
}

const MYMEMORY_URL: &str = "https://api.mymemory.translated.net/get";

impl MyMemoryTranslator {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for MyMemoryTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl Translator for MyMemoryTranslator {
    fn translate(&self, word: &str) -> Result<Vec<String>> {
        let body: Value = self
            .client
            .get(MYMEMORY_URL)
            .query(&[("q", word), ("langpair", "it|en")])
            .send()
            .map_err(|e| QuizzleError::translation(e.to_string()))?
            .json()
            .map_err(|e| QuizzleError::translation(e.to_string()))?;

        let translations = parse_translations(&body)?;
        debug!("{} -> {} acceptable translations", word, translations.len());
        Ok(translations)
    }
}

/// Pull every `matches[].translation` string out of a MyMemory response
/// body, normalised.
fn parse_translations(body: &Value) -> Result<Vec<String>> {
    let matches = body
        .get("matches")
        .and_then(Value::as_array)
        .ok_or_else(|| QuizzleError::translation("malformed MyMemory response"))?;
    Ok(matches
        .iter()
        .filter_map(|m| m.get("translation").and_then(Value::as_str))
        .map(normalize)
        .collect())
}

/// Draw `count` words from the dictionary at `path` and translate each.
/// Any single translation failure fails the whole fetch.
pub fn match_words(
    path: &Path,
    translator: &dyn Translator,
    count: usize,
) -> Result<Vec<(String, Vec<String>)>> {
    let list = WordList::load(path)?;
    let mut out = Vec::with_capacity(count);
    for word in list.pick(count) {
        let translations = translator.translate(&word)?;
        out.push((word, translations));
    }
    Ok(out)
}
