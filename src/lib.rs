//! Chatterbox text-to-speech inference on ONNX Runtime.
//!
//! Drives four chained ONNX models (speech encoder, token embedder, causal
//! language model, conditional decoder) through an autoregressive sampling
//! loop to synthesize speech in a cloned voice.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use chatterbox_tts::{ChatterboxTts, ExecutionProvider, GenerationConfig};
//!
//! fn main() -> Result<(), chatterbox_tts::TtsError> {
//!     let mut tts = ChatterboxTts::new(ExecutionProvider::Auto)?;
//!     tts.load_models(Path::new("models"), "fp32", false)?;
//!     tts.load_tokenizer(Path::new("models/tokenizer.json"))?;
//!     tts.prepare_conditionals(Path::new("reference.wav"), true)?;
//!
//!     let tokens = tts.tokenize("Hello from Rust!")?;
//!     let samples = tts.generate(&tokens, &GenerationConfig::default())?;
//!     chatterbox_tts::audio::write_wav(Path::new("output.wav"), &samples, tts.sample_rate())?;
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod conditioning;
pub mod config;
pub mod engine;
pub mod error;
pub mod sampling;
pub mod session;
pub mod tensor;
pub mod tokenizer;

pub use conditioning::VoiceConditionals;
pub use config::{GenerationConfig, ModelConfig};
pub use engine::{ChatterboxTts, NumericMode};
pub use error::TtsError;
pub use session::{ExecutionProvider, SessionRegistry};
pub use tokenizer::{normalize_text, TextTokenizer};
