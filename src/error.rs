use std::path::PathBuf;

/// Errors surfaced by the TTS pipeline.
///
/// Every error is terminal for the call that produced it: nothing in this
/// crate retries, and no partial audio is ever returned.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("models not loaded")]
    ModelsNotLoaded,

    #[error("model file not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("failed to load model '{name}': {source}")]
    LoadFailure {
        name: String,
        #[source]
        source: ort::Error,
    },

    #[error("reference audio must be longer than {need:.1}s (got {got:.2}s)")]
    ReferenceTooShort { got: f32, need: f32 },

    #[error("speech encoder returned {got} outputs, expected 4")]
    EncoderOutputMismatch { got: usize },

    #[error("voice conditionals not prepared")]
    ConditioningInvalid,

    #[error("no input tokens")]
    EmptyInput,

    #[error("inference failed in {stage}: {source}")]
    InferenceError {
        stage: &'static str,
        #[source]
        source: ort::Error,
    },

    #[error("{stage} produced an empty result")]
    EmptyModelOutput { stage: &'static str },

    #[error("unknown decoder input: {0}")]
    DecoderInputUnknown(String),

    #[error("tensor: {0}")]
    Tensor(String),

    #[error("audio: {0}")]
    Audio(String),

    #[error("tokenizer: {0}")]
    Tokenizer(String),

    #[error("voice conditionals file: {0}")]
    VoiceBlob(String),

    #[error(transparent)]
    Ort(#[from] ort::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
