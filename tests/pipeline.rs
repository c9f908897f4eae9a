//! Pipeline-level tests that need no model weights.

use std::path::Path;

use chatterbox_tts::{
    ChatterboxTts, ExecutionProvider, GenerationConfig, TtsError, VoiceConditionals,
};

fn example_voice() -> VoiceConditionals {
    VoiceConditionals {
        cond_emb: (0..32).map(|i| i as f32 * 0.125 - 2.0).collect(),
        cond_emb_shape: vec![1, 4, 8],
        prompt_token: vec![100, 200, 300, 4299],
        prompt_token_shape: vec![1, 4],
        speaker_embeddings: vec![0.1, -0.2, 0.3],
        speaker_embeddings_shape: vec![1, 3],
        speaker_features: vec![0.5; 8],
        speaker_features_shape: vec![1, 2, 4],
    }
}

#[test]
fn voice_blob_round_trips_through_the_public_api() {
    let path = std::env::temp_dir().join("chatterbox_pipeline_voice.bin");
    let original = example_voice();
    original.save(&path).unwrap();

    let loaded = VoiceConditionals::load(&path).unwrap();
    assert!(loaded.is_valid());
    assert_eq!(loaded, original);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn engine_fails_fast_without_models() {
    let mut tts = ChatterboxTts::new(ExecutionProvider::Cpu).unwrap();
    assert!(!tts.is_ready());

    let err = tts
        .generate(&[1, 2, 3], &GenerationConfig::default())
        .unwrap_err();
    assert!(matches!(err, TtsError::ModelsNotLoaded));

    let err = tts
        .prepare_conditionals(Path::new("missing.wav"), true)
        .unwrap_err();
    assert!(matches!(err, TtsError::ModelsNotLoaded));
}

#[test]
fn loading_a_missing_model_dir_is_model_not_found() {
    let mut tts = ChatterboxTts::new(ExecutionProvider::Cpu).unwrap();
    let err = tts
        .load_models(Path::new("/nonexistent/models"), "fp32", false)
        .unwrap_err();
    assert!(matches!(err, TtsError::ModelNotFound(_)));
    assert!(!tts.is_ready());
}

#[test]
fn set_conditionals_controls_validity() {
    let mut tts = ChatterboxTts::new(ExecutionProvider::Cpu).unwrap();
    assert!(!tts.has_conditionals());

    tts.set_conditionals(example_voice());
    assert!(tts.has_conditionals());

    tts.set_conditionals(VoiceConditionals::default());
    assert!(!tts.has_conditionals());
}

#[test]
fn tokenize_without_tokenizer_is_an_error() {
    let tts = ChatterboxTts::new(ExecutionProvider::Cpu).unwrap();
    let err = tts.tokenize("hello").unwrap_err();
    assert!(matches!(err, TtsError::Tokenizer(_)));
}
