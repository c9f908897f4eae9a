//! Text tokenization bridge.
//!
//! Wraps the HuggingFace `tokenizers` BPE tokenizer. The embedding model
//! treats the final two input positions as speech-token placeholders, so
//! `encode` always appends two end-of-text sentinels after the subword ids.

use std::path::Path;

use crate::error::TtsError;

pub struct TextTokenizer {
    inner: tokenizers::Tokenizer,
    end_of_text: i64,
}

impl TextTokenizer {
    pub fn from_file(path: &Path, end_of_text: i64) -> Result<Self, TtsError> {
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            TtsError::Tokenizer(format!("failed to load {}: {}", path.display(), e))
        })?;
        log::info!(
            "Loaded tokenizer from {} (vocab_size={})",
            path.display(),
            inner.get_vocab_size(true)
        );
        Ok(Self { inner, end_of_text })
    }

    /// Encode text into int64 token ids with the two trailing end-of-text
    /// sentinels the embedding model requires.
    pub fn encode(&self, text: &str) -> Result<Vec<i64>, TtsError> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| TtsError::Tokenizer(e.to_string()))?;

        let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        ids.push(self.end_of_text);
        ids.push(self.end_of_text);
        Ok(ids)
    }

    pub fn decode(&self, ids: &[i64]) -> Result<String, TtsError> {
        let ids32: Vec<u32> = ids
            .iter()
            .filter(|&&id| id >= 0)
            .map(|&id| id as u32)
            .collect();
        self.inner
            .decode(&ids32, true)
            .map_err(|e| TtsError::Tokenizer(e.to_string()))
    }
}

/// Clean text for synthesis: capitalize the first letter, replace punctuation
/// the model was not trained on, and guarantee a sentence-final mark. Empty
/// input becomes a stock sentence rather than an error.
pub fn normalize_text(text: &str) -> String {
    if text.is_empty() {
        return "You need to add some text for me to talk.".to_string();
    }

    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    if let Some(first) = chars.next() {
        if first.is_lowercase() {
            result.extend(first.to_uppercase());
        } else {
            result.push(first);
        }
    }
    result.push_str(chars.as_str());

    for (from, to) in [
        ("\u{2026}", ", "), // ellipsis
        (":", ","),
        ("\u{2014}", "-"), // em dash
        ("\u{2013}", "-"), // en dash
        (" ,", ","),
        ("\u{201C}", "\""), // left double quote
        ("\u{201D}", "\""), // right double quote
        ("\u{2018}", "'"), // left single quote
        ("\u{2019}", "'"), // right single quote
    ] {
        result = result.replace(from, to);
    }

    let mut result = result.trim_end().to_string();

    if let Some(last) = result.chars().last() {
        if !matches!(last, '.' | '!' | '?' | '-' | ',') {
            result.push('.');
        }
    }

    result
}
