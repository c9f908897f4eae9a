use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;

use chatterbox_tts::{audio, ChatterboxTts, ExecutionProvider, GenerationConfig};

#[derive(Parser, Debug)]
#[command(
    name = "chatterbox",
    version,
    about = "Chatterbox text-to-speech on ONNX Runtime",
    long_about = "Generate speech from text with voice cloning.\n\n\
                  Voice identity comes either from a reference audio clip \
                  (5+ seconds) or from a previously saved voice file."
)]
struct Args {
    /// Text to synthesize
    #[arg(short, long)]
    text: String,

    /// Directory containing the ONNX models (and tokenizer.json)
    #[arg(short, long)]
    model_dir: PathBuf,

    /// Reference audio clip for voice cloning (any common format, 5+ seconds)
    #[arg(short, long)]
    ref_audio: Option<PathBuf>,

    /// Previously saved voice conditionals file (alternative to --ref-audio)
    #[arg(long)]
    voice: Option<PathBuf>,

    /// Save the computed voice conditionals here for reuse
    #[arg(long)]
    save_voice: Option<PathBuf>,

    /// Output WAV path
    #[arg(short, long, default_value = "output.wav")]
    output: PathBuf,

    /// Model dtype variant (fp32, q8, q4, q4f16, ...)
    #[arg(long, default_value = "fp32")]
    dtype: String,

    /// Execution provider
    #[arg(long, default_value = "auto", value_parser = ["auto", "cpu", "cuda", "rocm"])]
    provider: String,

    /// Path to tokenizer.json (defaults to <model-dir>/tokenizer.json)
    #[arg(long)]
    tokenizer: Option<PathBuf>,

    /// Maximum speech tokens to generate
    #[arg(long, default_value_t = 1024)]
    max_new_tokens: usize,

    /// Penalty for repeated tokens (>1 reduces repetition)
    #[arg(long, default_value_t = 1.2)]
    repetition_penalty: f32,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.8)]
    temperature: f32,

    /// Top-k sampling cutoff (0 disables)
    #[arg(long, default_value_t = 1000)]
    top_k: usize,

    /// Top-p (nucleus) sampling cutoff
    #[arg(long, default_value_t = 0.95)]
    top_p: f32,

    /// Random seed (0 = nondeterministic)
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Skip amplitude normalization of the reference audio
    #[arg(long)]
    no_normalize: bool,

    /// Enable ONNX Runtime profiling (writes onnx_profile_*.json)
    #[arg(long)]
    profile: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let provider = match args.provider.as_str() {
        "cpu" => ExecutionProvider::Cpu,
        "cuda" => ExecutionProvider::Cuda,
        "rocm" => ExecutionProvider::Rocm,
        _ => ExecutionProvider::Auto,
    };

    let mut tts = ChatterboxTts::new(provider)?;
    tts.load_models(&args.model_dir, &args.dtype, args.profile)
        .context("loading models")?;

    let tokenizer_path = args
        .tokenizer
        .unwrap_or_else(|| args.model_dir.join("tokenizer.json"));
    tts.load_tokenizer(&tokenizer_path).context("loading tokenizer")?;

    match (&args.voice, &args.ref_audio) {
        (Some(voice), _) => {
            tts.load_conditionals(voice)
                .with_context(|| format!("loading voice from {}", voice.display()))?;
        }
        (None, Some(ref_audio)) => {
            let started = Instant::now();
            tts.prepare_conditionals(ref_audio, !args.no_normalize)
                .context("preparing voice conditionals")?;
            log::info!(
                "Voice conditionals computed in {:.1}s",
                started.elapsed().as_secs_f32()
            );
        }
        (None, None) => bail!("either --ref-audio or --voice is required"),
    }

    if let Some(path) = &args.save_voice {
        tts.conditionals().save(path)?;
        println!("Saved voice conditionals to {}", path.display());
    }

    let config = GenerationConfig {
        max_new_tokens: args.max_new_tokens,
        repetition_penalty: args.repetition_penalty,
        temperature: args.temperature,
        top_k: args.top_k,
        top_p: args.top_p,
        normalize_audio: !args.no_normalize,
        seed: args.seed,
    };

    let tokens = tts.tokenize(&args.text).context("tokenizing text")?;
    let started = Instant::now();
    let samples = tts.generate(&tokens, &config).context("generating speech")?;
    let elapsed = started.elapsed().as_secs_f32();

    audio::write_wav(&args.output, &samples, tts.sample_rate())?;
    let duration = samples.len() as f32 / tts.sample_rate() as f32;
    println!(
        "Wrote {:.2}s of audio to {} ({:.1}s, {:.2}x real-time)",
        duration,
        args.output.display(),
        elapsed,
        duration / elapsed.max(f32::EPSILON)
    );

    Ok(())
}
