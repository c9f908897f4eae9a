use std::fs;
use std::path::Path;

use serde::Deserialize;

/// Sampling and loop parameters for a single `generate` call.
///
/// Passed by value; the engine never shares or mutates it.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Maximum speech tokens to generate.
    pub max_new_tokens: usize,
    /// Penalty for already-generated tokens (>1 reduces repetition).
    pub repetition_penalty: f32,
    /// Sampling temperature (higher = more random).
    pub temperature: f32,
    /// Top-k sampling cutoff (0 disables).
    pub top_k: usize,
    /// Top-p (nucleus) sampling cutoff (>= 1.0 disables).
    pub top_p: f32,
    /// Whether to amplitude-normalize reference audio.
    pub normalize_audio: bool,
    /// Random seed; 0 draws a fresh seed from the OS.
    pub seed: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 1024,
            repetition_penalty: 1.2,
            temperature: 0.8,
            top_k: 1000,
            top_p: 0.95,
            normalize_audio: true,
            seed: 0,
        }
    }
}

/// Constants tied to the exact pretrained weights.
///
/// Swapping in different weights can silently change token ids and cache
/// geometry, so these load from a JSON file next to the models when one is
/// present instead of being baked into the code. Defaults match the
/// Chatterbox Turbo ONNX export.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Output (and reference-input) sample rate in Hz.
    pub sample_rate: u32,
    /// Sentinel prepended to every generated token sequence.
    pub start_speech_token: i64,
    /// Sentinel that terminates generation.
    pub stop_speech_token: i64,
    /// Token appended three times before decoding, trailing silence.
    pub silence_token: i64,
    /// Text-side end-of-text sentinel appended twice by the tokenizer.
    pub end_of_text_token: i64,
    /// KV-cache head count for the language model.
    pub num_kv_heads: i64,
    /// KV-cache head dimension for the language model.
    pub head_dim: i64,
    /// Minimum reference-clip duration accepted by the speech encoder.
    pub min_reference_secs: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            start_speech_token: 6561,
            stop_speech_token: 6562,
            silence_token: 4299,
            end_of_text_token: 50_256,
            num_kv_heads: 16,
            head_dim: 64,
            min_reference_secs: 5.0,
        }
    }
}

impl ModelConfig {
    pub const FILE_NAME: &'static str = "tts_config.json";

    /// Load from `dir/tts_config.json`, falling back to defaults when the
    /// file is absent. A malformed file is ignored with a warning rather
    /// than aborting the load.
    pub fn load_or_default(dir: &Path) -> Self {
        let path = dir.join(Self::FILE_NAME);
        match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(config) => {
                    log::info!("Loaded model constants from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Ignoring malformed {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_defaults() {
        let config = GenerationConfig::default();
        assert_eq!(config.max_new_tokens, 1024);
        assert_eq!(config.top_k, 1000);
        assert_eq!(config.seed, 0);
    }

    #[test]
    fn model_config_partial_json_keeps_defaults() {
        let config: ModelConfig =
            serde_json::from_str(r#"{"stop_speech_token": 9999}"#).unwrap();
        assert_eq!(config.stop_speech_token, 9999);
        assert_eq!(config.start_speech_token, 6561);
        assert_eq!(config.num_kv_heads, 16);
    }

    #[test]
    fn load_or_default_on_missing_dir() {
        let config = ModelConfig::load_or_default(Path::new("/nonexistent"));
        assert_eq!(config.sample_rate, 24_000);
        assert_eq!(config.silence_token, 4299);
    }
}
