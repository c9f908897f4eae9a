//! The Chatterbox TTS engine: four chained ONNX models driven by an
//! autoregressive sampling loop.
//!
//! Pipeline:
//!   reference audio -> speech_encoder -> voice conditionals
//!   text -> tokenizer -> embed_tokens ->
//!   language_model (autoregressive, KV cache) -> speech tokens ->
//!   conditional_decoder -> waveform

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ort::session::SessionInputValue;
use ort::tensor::TensorElementType;
use ort::value::{DynValue, ValueType};

use crate::audio;
use crate::conditioning::VoiceConditionals;
use crate::config::{GenerationConfig, ModelConfig};
use crate::error::TtsError;
use crate::sampling::{self, Sampler};
use crate::session::{ExecutionProvider, SessionRegistry};
use crate::tensor;
use crate::tokenizer::{normalize_text, TextTokenizer};

pub const SPEECH_ENCODER: &str = "speech_encoder";
pub const EMBED_TOKENS: &str = "embed_tokens";
pub const LANGUAGE_MODEL: &str = "language_model";
pub const COND_DECODER: &str = "conditional_decoder";

/// Reference clips longer than this are truncated before encoding.
const MAX_REFERENCE_SECS: f32 = 60.0;

/// KV-cache element type, resolved once when the language model loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericMode {
    Fp32,
    Fp16,
}

pub struct ChatterboxTts {
    registry: SessionRegistry,
    model_config: ModelConfig,
    tokenizer: Option<TextTokenizer>,
    conds: VoiceConditionals,
    numeric_mode: NumericMode,
    sampler: Sampler,
    models_loaded: bool,
}

impl ChatterboxTts {
    pub fn new(provider: ExecutionProvider) -> Result<Self, TtsError> {
        Ok(Self {
            registry: SessionRegistry::new(provider)?,
            model_config: ModelConfig::default(),
            tokenizer: None,
            conds: VoiceConditionals::default(),
            numeric_mode: NumericMode::Fp32,
            sampler: Sampler::new(),
            models_loaded: false,
        })
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    pub fn sample_rate(&self) -> u32 {
        self.model_config.sample_rate
    }

    pub fn numeric_mode(&self) -> NumericMode {
        self.numeric_mode
    }

    /// Load the four ONNX graphs from `model_dir`.
    ///
    /// `dtype` selects the export variant by filename suffix. Profiling must
    /// be requested here because it is a session-creation option.
    pub fn load_models(
        &mut self,
        model_dir: &Path,
        dtype: &str,
        enable_profiling: bool,
    ) -> Result<(), TtsError> {
        self.models_loaded = false;

        let onnx_dir = resolve_model_dir(model_dir)?;
        log::info!(
            "Loading ONNX models from {} (dtype={})",
            onnx_dir.display(),
            dtype
        );

        self.model_config = ModelConfig::load_or_default(&onnx_dir);

        if enable_profiling {
            self.registry.enable_profiling("onnx_profile");
        }

        for name in [SPEECH_ENCODER, EMBED_TOKENS, LANGUAGE_MODEL, COND_DECODER] {
            let path = onnx_dir.join(model_filename(name, dtype));
            self.registry.load_model(&path, name)?;
        }

        self.inspect_language_model();
        self.models_loaded = true;
        log::info!("All ONNX models loaded");
        Ok(())
    }

    /// Resolve the KV-cache numeric mode and geometry from the loaded
    /// language model, overriding the configured head count/dimension when
    /// the graph declares them.
    fn inspect_language_model(&mut self) {
        self.numeric_mode = NumericMode::Fp32;

        let session = match self.registry.session(LANGUAGE_MODEL) {
            Some(session) => session,
            None => return,
        };

        for input in session.inputs.iter() {
            if !input.name.contains("past_key_values") {
                continue;
            }
            if let ValueType::Tensor { ty, shape, .. } = &input.input_type {
                if matches!(ty, TensorElementType::Float16) {
                    self.numeric_mode = NumericMode::Fp16;
                }
                let dims: Vec<i64> = shape.iter().copied().collect();
                if dims.len() == 4 {
                    if dims[1] > 0 && dims[1] != self.model_config.num_kv_heads {
                        log::info!("KV head count from model: {}", dims[1]);
                        self.model_config.num_kv_heads = dims[1];
                    }
                    if dims[3] > 0 && dims[3] != self.model_config.head_dim {
                        log::info!("KV head dim from model: {}", dims[3]);
                        self.model_config.head_dim = dims[3];
                    }
                }
            }
            break;
        }

        if self.numeric_mode == NumericMode::Fp16 {
            log::info!("Language model uses an fp16 KV cache");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.models_loaded
            && self.registry.is_loaded(SPEECH_ENCODER)
            && self.registry.is_loaded(EMBED_TOKENS)
            && self.registry.is_loaded(LANGUAGE_MODEL)
            && self.registry.is_loaded(COND_DECODER)
    }

    /// Release all sessions, the tokenizer, and the voice conditionals.
    pub fn unload_models(&mut self) {
        self.registry.unload_all();
        self.tokenizer = None;
        self.conds = VoiceConditionals::default();
        self.models_loaded = false;
    }

    pub fn load_tokenizer(&mut self, path: &Path) -> Result<(), TtsError> {
        let tokenizer = TextTokenizer::from_file(path, self.model_config.end_of_text_token)?;
        self.tokenizer = Some(tokenizer);
        Ok(())
    }

    pub fn has_tokenizer(&self) -> bool {
        self.tokenizer.is_some()
    }

    /// Normalize and tokenize text for `generate`.
    pub fn tokenize(&self, text: &str) -> Result<Vec<i64>, TtsError> {
        let tokenizer = self
            .tokenizer
            .as_ref()
            .ok_or_else(|| TtsError::Tokenizer("tokenizer not loaded".into()))?;
        tokenizer.encode(&normalize_text(text))
    }

    // ── Voice conditioning ──────────────────────────────────────

    /// Compute voice conditionals from a reference clip.
    ///
    /// The clip must be longer than the configured minimum; on any failure
    /// the previously prepared conditionals are left untouched.
    pub fn prepare_conditionals(
        &mut self,
        audio_path: &Path,
        normalize: bool,
    ) -> Result<(), TtsError> {
        if !self.is_ready() {
            return Err(TtsError::ModelsNotLoaded);
        }

        let sample_rate = self.model_config.sample_rate;
        let min_secs = self.model_config.min_reference_secs;
        let audio = audio::load_audio(audio_path, sample_rate, normalize, MAX_REFERENCE_SECS)?;

        let duration = audio.duration_secs();
        if duration < min_secs {
            return Err(TtsError::ReferenceTooShort {
                got: duration,
                need: min_secs,
            });
        }

        log::info!("Running speech encoder on {:.2}s of reference audio", duration);

        let out_names = self.registry.output_names(SPEECH_ENCODER)?;
        if out_names.len() < 4 {
            return Err(TtsError::EncoderOutputMismatch {
                got: out_names.len(),
            });
        }

        let in_names = self.registry.input_names(SPEECH_ENCODER)?;
        let audio_input = in_names
            .first()
            .ok_or_else(|| TtsError::Tensor("speech encoder declares no inputs".into()))?
            .clone();

        let num_samples = audio.samples.len() as i64;
        let audio_value = tensor::own_f32(&[1, num_samples], audio.samples)?;
        let feed: Vec<(Cow<str>, SessionInputValue)> =
            vec![(Cow::Owned(audio_input), audio_value.into())];

        let (session, run_options) = self
            .registry
            .session_with_options(SPEECH_ENCODER)
            .ok_or(TtsError::ModelsNotLoaded)?;
        let outputs = session
            .run_with_options(feed, run_options)
            .map_err(|e| TtsError::InferenceError {
                stage: "speech_encoder",
                source: e,
            })?;

        // Fixed output order: cond_emb, prompt_token, speaker_embeddings,
        // speaker_features.
        let mut conds = VoiceConditionals::default();
        let (shape, values) = tensor::extract_f32(&outputs[0])?;
        conds.cond_emb = values;
        conds.cond_emb_shape = shape;

        let (shape, values) = tensor::extract_i64(&outputs[1])?;
        conds.prompt_token = values;
        conds.prompt_token_shape = shape;

        let (shape, values) = tensor::extract_f32(&outputs[2])?;
        conds.speaker_embeddings = values;
        conds.speaker_embeddings_shape = shape;

        let (shape, values) = tensor::extract_f32(&outputs[3])?;
        conds.speaker_features = values;
        conds.speaker_features_shape = shape;

        log::info!(
            "Voice conditionals prepared: cond_emb={:?}, prompt_token={:?}, speaker_emb={:?}, speaker_feat={:?}",
            conds.cond_emb_shape,
            conds.prompt_token_shape,
            conds.speaker_embeddings_shape,
            conds.speaker_features_shape
        );

        self.conds = conds;
        Ok(())
    }

    pub fn set_conditionals(&mut self, conds: VoiceConditionals) {
        self.conds = conds;
    }

    pub fn conditionals(&self) -> &VoiceConditionals {
        &self.conds
    }

    pub fn has_conditionals(&self) -> bool {
        self.conds.is_valid()
    }

    pub fn load_conditionals(&mut self, path: &Path) -> Result<(), TtsError> {
        self.conds = VoiceConditionals::load(path)?;
        Ok(())
    }

    // ── Generation ──────────────────────────────────────────────

    /// Generate audio samples from pre-tokenized text.
    pub fn generate(
        &mut self,
        token_ids: &[i64],
        config: &GenerationConfig,
    ) -> Result<Vec<f32>, TtsError> {
        self.generate_with_progress(token_ids, config, None)
    }

    /// Like `generate`, with a per-step progress observer. The callback sees
    /// `(step, max_steps)` but cannot abort the loop.
    pub fn generate_with_progress(
        &mut self,
        token_ids: &[i64],
        config: &GenerationConfig,
        mut progress: Option<&mut dyn FnMut(usize, usize)>,
    ) -> Result<Vec<f32>, TtsError> {
        if !self.is_ready() {
            return Err(TtsError::ModelsNotLoaded);
        }
        if !self.conds.is_valid() {
            return Err(TtsError::ConditioningInvalid);
        }
        if token_ids.is_empty() {
            return Err(TtsError::EmptyInput);
        }

        if config.seed != 0 {
            self.sampler.reseed(config.seed);
        }

        let cfg = self.model_config.clone();

        let lm_input_names = self.registry.input_names(LANGUAGE_MODEL)?;
        let lm_output_names = self.registry.output_names(LANGUAGE_MODEL)?;
        let past_names: Vec<String> = lm_input_names
            .iter()
            .filter(|n| n.contains("past_key_values"))
            .cloned()
            .collect();
        let present_to_past = map_present_to_past(&lm_output_names, &past_names);

        log::info!(
            "Starting generation with {} input tokens, max {} new tokens",
            token_ids.len(),
            config.max_new_tokens
        );

        // cond_emb geometry drives the step-0 input shape.
        let cond_seq_len = self.conds.cond_emb_shape.get(1).copied().unwrap_or(0);
        let hidden_size = self.conds.cond_emb_shape.get(2).copied().unwrap_or(0);

        // One embed_tokens call for the whole text, before the loop.
        let mut text_embeddings = Some(self.run_embed_tokens(token_ids)?);

        let mut generated: Vec<i64> = vec![cfg.start_speech_token];
        let mut kv_slots: HashMap<String, Option<DynValue>> =
            past_names.iter().map(|n| (n.clone(), None)).collect();
        let mut attention_mask: Vec<i64> = Vec::new();
        let mut current_position: i64 = 0;

        for step in 0..config.max_new_tokens {
            if let Some(callback) = progress.as_mut() {
                callback(step, config.max_new_tokens);
            }

            // 1. Embed. Step 0 is the conditioning prefix plus the whole
            // text; every later step embeds just the last sampled token.
            // Embeddings are always fp32, even in fp16 KV-cache mode.
            let (inputs_embeds, seq_len) = if step == 0 {
                let text = text_embeddings.take().unwrap_or_default();
                let mut embeds =
                    Vec::with_capacity(self.conds.cond_emb.len() + text.len());
                embeds.extend_from_slice(&self.conds.cond_emb);
                embeds.extend(text);
                (embeds, cond_seq_len + token_ids.len() as i64)
            } else {
                let last = generated[generated.len() - 1];
                (self.run_embed_tokens(&[last])?, 1)
            };

            // 2. Build inputs. The attention mask only ever grows; position
            // ids cover [current_position, current_position + seq_len).
            let total_seq_len = if step == 0 {
                seq_len
            } else {
                current_position + seq_len
            };
            attention_mask.resize(total_seq_len as usize, 1);
            let position_ids: Vec<i64> =
                (current_position..current_position + seq_len).collect();

            let mut embeds_value =
                Some(tensor::own_f32(&[1, seq_len, hidden_size], inputs_embeds)?);
            let mut mask_value =
                Some(tensor::own_i64(&[1, total_seq_len], attention_mask.clone())?);
            let mut pos_value = Some(tensor::own_i64(&[1, seq_len], position_ids)?);

            let mut feed: Vec<(Cow<str>, SessionInputValue)> =
                Vec::with_capacity(lm_input_names.len());
            for name in &lm_input_names {
                let value: DynValue = match name.as_str() {
                    "inputs_embeds" => match embeds_value.take() {
                        Some(v) => v,
                        None => continue,
                    },
                    "attention_mask" => match mask_value.take() {
                        Some(v) => v,
                        None => continue,
                    },
                    "position_ids" => match pos_value.take() {
                        Some(v) => v,
                        None => continue,
                    },
                    other => match kv_slots.get_mut(other) {
                        // Zero-copy handoff: the previous step's present
                        // tensor moves in as this step's past tensor. Step 0
                        // feeds an empty [1, heads, 0, head_dim] tensor.
                        Some(slot) => match slot.take() {
                            Some(v) => v,
                            None => self.empty_kv_value(&cfg)?,
                        },
                        None => continue,
                    },
                };
                feed.push((Cow::Owned(name.clone()), value.into()));
            }

            // 3. Run the language model.
            let (session, run_options) = self
                .registry
                .session_with_options(LANGUAGE_MODEL)
                .ok_or(TtsError::ModelsNotLoaded)?;
            let mut outputs = session
                .run_with_options(feed, run_options)
                .map_err(|e| TtsError::InferenceError {
                    stage: "language_model",
                    source: e,
                })?;

            // Only the last position's logits are needed; slice extraction
            // avoids copying the whole [1, seq, vocab] tensor every step.
            let logits_value = outputs.get("logits").unwrap_or(&outputs[0]);
            let logits_shape = tensor::shape_of(logits_value)?;
            let vocab_size = *logits_shape.last().ok_or_else(|| {
                TtsError::Tensor("language model logits have no shape".into())
            })? as usize;
            let seq_positions = logits_shape
                .get(logits_shape.len().wrapping_sub(2))
                .copied()
                .unwrap_or(1);
            let last_offset = (seq_positions.max(1) as usize - 1) * vocab_size;
            let mut next_logits =
                tensor::extract_f32_slice(logits_value, last_offset, vocab_size)?;

            // 4. Post-process logits in fixed order, then sample.
            sampling::apply_repetition_penalty(
                &mut next_logits,
                &generated,
                config.repetition_penalty,
            );
            sampling::apply_temperature(&mut next_logits, config.temperature);
            if config.top_k > 0 && config.top_k < vocab_size {
                sampling::apply_top_k(&mut next_logits, config.top_k);
            }
            if config.top_p < 1.0 {
                sampling::apply_top_p(&mut next_logits, config.top_p);
            }
            sampling::softmax(&mut next_logits);
            let next_token = self.sampler.sample(&next_logits);

            // 5. Append, stop or advance.
            generated.push(next_token);
            if next_token == cfg.stop_speech_token {
                log::info!("Stop token detected at step {}", step + 1);
                break;
            }

            current_position += seq_len;
            for (present, past) in &present_to_past {
                if let Some(value) = outputs.remove(present.as_str()) {
                    if let Some(slot) = kv_slots.get_mut(past.as_str()) {
                        *slot = Some(value);
                    }
                }
            }

            if (step + 1) % 100 == 0 {
                log::debug!("Generated {} tokens...", step + 1);
            }
        }

        log::info!("Generated {} speech tokens", generated.len());

        let decoder_tokens =
            assemble_decoder_tokens(&generated, &self.conds.prompt_token, &cfg);
        self.run_conditional_decoder(&decoder_tokens, &cfg)
    }

    // ── Model calls ─────────────────────────────────────────────

    fn run_embed_tokens(&mut self, token_ids: &[i64]) -> Result<Vec<f32>, TtsError> {
        let in_names = self.registry.input_names(EMBED_TOKENS)?;
        let ids_input = in_names
            .first()
            .ok_or_else(|| TtsError::Tensor("embed_tokens declares no inputs".into()))?
            .clone();

        let value = tensor::own_i64(&[1, token_ids.len() as i64], token_ids.to_vec())?;
        let feed: Vec<(Cow<str>, SessionInputValue)> =
            vec![(Cow::Owned(ids_input), value.into())];

        let (session, run_options) = self
            .registry
            .session_with_options(EMBED_TOKENS)
            .ok_or(TtsError::ModelsNotLoaded)?;
        let outputs = session
            .run_with_options(feed, run_options)
            .map_err(|e| TtsError::InferenceError {
                stage: "embed_tokens",
                source: e,
            })?;

        let (_, embeddings) = tensor::extract_f32(&outputs[0])?;
        if embeddings.is_empty() {
            return Err(TtsError::EmptyModelOutput {
                stage: "embed_tokens",
            });
        }
        Ok(embeddings)
    }

    fn run_conditional_decoder(
        &mut self,
        decoder_tokens: &[i64],
        cfg: &ModelConfig,
    ) -> Result<Vec<f32>, TtsError> {
        log::info!(
            "Running conditional decoder with {} tokens",
            decoder_tokens.len()
        );

        let in_names = self.registry.input_names(COND_DECODER)?;
        let mut feed: Vec<(Cow<str>, SessionInputValue)> =
            Vec::with_capacity(in_names.len());

        for name in &in_names {
            let value = match name.as_str() {
                "speech_tokens" => tensor::own_i64(
                    &[1, decoder_tokens.len() as i64],
                    decoder_tokens.to_vec(),
                )?,
                "speaker_embeddings" => tensor::own_f32(
                    &self.conds.speaker_embeddings_shape,
                    self.conds.speaker_embeddings.clone(),
                )?,
                "speaker_features" => tensor::own_f32(
                    &self.conds.speaker_features_shape,
                    self.conds.speaker_features.clone(),
                )?,
                other => return Err(TtsError::DecoderInputUnknown(other.to_string())),
            };
            feed.push((Cow::Owned(name.clone()), value.into()));
        }

        let (session, run_options) = self
            .registry
            .session_with_options(COND_DECODER)
            .ok_or(TtsError::ModelsNotLoaded)?;
        let outputs = session
            .run_with_options(feed, run_options)
            .map_err(|e| TtsError::InferenceError {
                stage: "conditional_decoder",
                source: e,
            })?;

        let (_, samples) = tensor::extract_f32(&outputs[0])?;
        if samples.is_empty() {
            return Err(TtsError::EmptyModelOutput {
                stage: "conditional_decoder",
            });
        }

        log::info!(
            "Generated {:.2}s of audio",
            samples.len() as f32 / cfg.sample_rate as f32
        );
        Ok(samples)
    }

    fn empty_kv_value(&self, cfg: &ModelConfig) -> Result<DynValue, TtsError> {
        let shape = [1, cfg.num_kv_heads, 0, cfg.head_dim];
        match self.numeric_mode {
            NumericMode::Fp32 => tensor::own_f32(&shape, Vec::new()),
            NumericMode::Fp16 => tensor::own_f16(&shape, Vec::new()),
        }
    }
}

/// Map present-KV output names onto past-KV input names. Falls back to
/// positional pairing (output k+1 feeds past slot k) when the export uses
/// names this doesn't recognize.
fn map_present_to_past(
    output_names: &[String],
    past_names: &[String],
) -> Vec<(String, String)> {
    let mut mapping = Vec::with_capacity(past_names.len());
    for name in output_names {
        let candidate = if name.starts_with("present.") {
            name.replacen("present.", "past_key_values.", 1)
        } else if name.contains("present_key_values") {
            name.replace("present_key_values", "past_key_values")
        } else {
            continue;
        };
        if past_names.iter().any(|p| p == &candidate) {
            mapping.push((name.clone(), candidate));
        }
    }

    if mapping.is_empty() && !past_names.is_empty() {
        mapping = output_names
            .iter()
            .skip(1)
            .zip(past_names.iter())
            .map(|(o, p)| (o.clone(), p.clone()))
            .collect();
    }
    mapping
}

/// Post-loop token assembly: strip the start sentinel and any trailing stop
/// sentinel, append three silence tokens, and prepend the voice prompt.
fn assemble_decoder_tokens(
    generated: &[i64],
    prompt_token: &[i64],
    cfg: &ModelConfig,
) -> Vec<i64> {
    let mut end = generated.len();
    if end > 0 && generated[end - 1] == cfg.stop_speech_token {
        end -= 1;
    }
    let speech_tokens = &generated[1.min(end)..end];

    let mut decoder_tokens =
        Vec::with_capacity(prompt_token.len() + speech_tokens.len() + 3);
    decoder_tokens.extend_from_slice(prompt_token);
    decoder_tokens.extend_from_slice(speech_tokens);
    decoder_tokens.extend(std::iter::repeat(cfg.silence_token).take(3));
    decoder_tokens
}

/// Filename for a model under a given dtype export variant.
fn model_filename(name: &str, dtype: &str) -> String {
    match dtype {
        "fp32" => format!("{}.onnx", name),
        "q8" => format!("{}_quantized.onnx", name),
        "q4" => format!("{}_q4.onnx", name),
        "q4f16" => format!("{}_q4f16.onnx", name),
        other => format!("{}_{}.onnx", name, other),
    }
}

/// Locate the directory that actually holds the .onnx files: a direct
/// `onnx/` subfolder, a HuggingFace snapshot layout, or `model_dir` itself.
fn resolve_model_dir(model_dir: &Path) -> Result<PathBuf, TtsError> {
    let direct = model_dir.join("onnx");
    if direct.is_dir() {
        return Ok(direct);
    }

    // HuggingFace cache: models--<org>--<repo>/snapshots/<hash>/onnx
    if let Ok(entries) = std::fs::read_dir(model_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with("models--") {
                continue;
            }
            let snapshots = entry.path().join("snapshots");
            if let Ok(hashes) = std::fs::read_dir(&snapshots) {
                for hash in hashes.flatten() {
                    let onnx = hash.path().join("onnx");
                    if onnx.is_dir() {
                        return Ok(onnx);
                    }
                }
            }
        }
    }

    if model_dir.is_dir() {
        return Ok(model_dir.to_path_buf());
    }

    Err(TtsError::ModelNotFound(model_dir.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_filenames_follow_dtype_suffixes() {
        assert_eq!(model_filename("language_model", "fp32"), "language_model.onnx");
        assert_eq!(
            model_filename("language_model", "q8"),
            "language_model_quantized.onnx"
        );
        assert_eq!(model_filename("embed_tokens", "q4"), "embed_tokens_q4.onnx");
        assert_eq!(
            model_filename("speech_encoder", "q4f16"),
            "speech_encoder_q4f16.onnx"
        );
        assert_eq!(model_filename("speech_encoder", "fp16"), "speech_encoder_fp16.onnx");
    }

    #[test]
    fn assembly_after_stop_at_first_step_is_prompt_plus_silence() {
        let cfg = ModelConfig::default();
        // The sampler picked the stop token immediately: only the start and
        // stop sentinels are present.
        let generated = vec![cfg.start_speech_token, cfg.stop_speech_token];
        let prompt = vec![10, 11, 12];

        let tokens = assemble_decoder_tokens(&generated, &prompt, &cfg);
        assert_eq!(
            tokens,
            vec![10, 11, 12, cfg.silence_token, cfg.silence_token, cfg.silence_token]
        );
    }

    #[test]
    fn assembly_strips_sentinels_and_appends_silence() {
        let cfg = ModelConfig::default();
        let generated = vec![
            cfg.start_speech_token,
            100,
            200,
            300,
            cfg.stop_speech_token,
        ];
        let prompt = vec![1, 2];

        let tokens = assemble_decoder_tokens(&generated, &prompt, &cfg);
        assert_eq!(
            tokens,
            vec![
                1,
                2,
                100,
                200,
                300,
                cfg.silence_token,
                cfg.silence_token,
                cfg.silence_token
            ]
        );
    }

    #[test]
    fn assembly_without_stop_token_keeps_every_generated_token() {
        let cfg = ModelConfig::default();
        // Max-steps exhaustion: the loop ended without the stop sentinel, so
        // everything after the start token is speech.
        let mut generated = vec![cfg.start_speech_token];
        generated.extend(0..8);

        let tokens = assemble_decoder_tokens(&generated, &[], &cfg);
        assert_eq!(tokens.len(), 8 + 3);
        assert_eq!(tokens[..8], [0, 1, 2, 3, 4, 5, 6, 7]);
        assert!(tokens[8..].iter().all(|&t| t == cfg.silence_token));
    }

    #[test]
    fn present_names_map_onto_past_names() {
        let outputs = vec![
            "logits".to_string(),
            "present.0.key".to_string(),
            "present.0.value".to_string(),
        ];
        let pasts = vec![
            "past_key_values.0.key".to_string(),
            "past_key_values.0.value".to_string(),
        ];
        let mapping = map_present_to_past(&outputs, &pasts);
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping[0].0, "present.0.key");
        assert_eq!(mapping[0].1, "past_key_values.0.key");
    }

    #[test]
    fn unrecognized_present_names_fall_back_to_positional_pairing() {
        let outputs = vec![
            "logits".to_string(),
            "cache_out_0".to_string(),
            "cache_out_1".to_string(),
        ];
        let pasts = vec![
            "past_key_values_a".to_string(),
            "past_key_values_b".to_string(),
        ];
        let mapping = map_present_to_past(&outputs, &pasts);
        assert_eq!(
            mapping,
            vec![
                ("cache_out_0".to_string(), "past_key_values_a".to_string()),
                ("cache_out_1".to_string(), "past_key_values_b".to_string()),
            ]
        );
    }

    #[test]
    fn generate_without_models_fails_fast() {
        let mut tts = ChatterboxTts::new(ExecutionProvider::Cpu).unwrap();
        let err = tts
            .generate(&[1, 2, 3], &GenerationConfig::default())
            .unwrap_err();
        assert!(matches!(err, TtsError::ModelsNotLoaded));
    }
}
