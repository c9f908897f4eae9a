//! ONNX Runtime session registry.
//!
//! Owns every session in the pipeline plus the shared run state (allocator,
//! reusable run options). Sessions are keyed by name; loading the same name
//! twice is a no-op success.

use std::collections::HashMap;
use std::path::Path;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::{RunOptions, Session};

use crate::error::TtsError;

/// Execution device for ONNX Runtime sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    /// Detect the best available accelerator: CUDA, then ROCm, then CPU.
    Auto,
    Cpu,
    Cuda,
    Rocm,
}

pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    /// Resolved provider; never `Auto` after construction.
    provider: ExecutionProvider,
    run_options: RunOptions,
    allocator: ort::memory::Allocator,
    profile_prefix: Option<String>,
}

impl SessionRegistry {
    pub fn new(provider: ExecutionProvider) -> Result<Self, TtsError> {
        let resolved = match provider {
            ExecutionProvider::Auto => detect_best_provider(),
            other => other,
        };
        log::info!("Session registry using {:?} execution provider", resolved);

        Ok(Self {
            sessions: HashMap::new(),
            provider: resolved,
            run_options: RunOptions::new()?,
            allocator: ort::memory::Allocator::default(),
            profile_prefix: None,
        })
    }

    /// Enable ONNX Runtime profiling for sessions loaded after this call.
    ///
    /// Profiling is a session-creation option: calling this once models are
    /// already loaded cannot affect them, so that case only logs a warning.
    pub fn enable_profiling(&mut self, prefix: &str) {
        if !self.sessions.is_empty() {
            log::warn!(
                "enable_profiling called after {} session(s) were loaded; \
                 only later loads will be profiled",
                self.sessions.len()
            );
        }
        self.profile_prefix = Some(prefix.to_string());
    }

    /// Load an ONNX graph from `path` under `name`. Loading an already-loaded
    /// name is a no-op success.
    pub fn load_model(&mut self, path: &Path, name: &str) -> Result<(), TtsError> {
        if self.sessions.contains_key(name) {
            log::debug!("Model '{}' already loaded", name);
            return Ok(());
        }
        if !path.exists() {
            return Err(TtsError::ModelNotFound(path.to_path_buf()));
        }

        let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        log::debug!(
            "Loading ONNX session: {} from {} ({:.1} MB)",
            name,
            path.display(),
            file_size as f64 / 1_048_576.0
        );

        // intra_threads: parallelism within a single op (e.g. matmul);
        // inter_threads: parallelism across independent graph nodes.
        let num_cpus = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);
        let intra = (num_cpus / 2).max(2);

        let mut builder = Session::builder()
            .map_err(|e| TtsError::LoadFailure {
                name: name.to_string(),
                source: e,
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra)?
            .with_inter_threads(2)?;

        if let Some(prefix) = &self.profile_prefix {
            builder = builder.with_profiling(prefix)?;
        }

        builder = self.append_execution_providers(builder)?;

        let session = builder
            .commit_from_file(path)
            .map_err(|e| TtsError::LoadFailure {
                name: name.to_string(),
                source: e,
            })?;

        log::info!(
            "Loaded '{}': {} inputs, {} outputs",
            name,
            session.inputs.len(),
            session.outputs.len()
        );
        self.sessions.insert(name.to_string(), session);
        Ok(())
    }

    fn append_execution_providers(
        &self,
        builder: ort::session::builder::SessionBuilder,
    ) -> Result<ort::session::builder::SessionBuilder, TtsError> {
        let mut eps: Vec<ort::execution_providers::ExecutionProviderDispatch> = Vec::new();

        if self.provider == ExecutionProvider::Cuda {
            #[cfg(feature = "cuda")]
            eps.push(ort::execution_providers::CUDAExecutionProvider::default().build());
            #[cfg(not(feature = "cuda"))]
            log::warn!("CUDA requested but this build lacks the `cuda` feature; using CPU");
        }
        if self.provider == ExecutionProvider::Rocm {
            #[cfg(feature = "rocm")]
            eps.push(ort::execution_providers::ROCmExecutionProvider::default().build());
            #[cfg(not(feature = "rocm"))]
            log::warn!("ROCm requested but this build lacks the `rocm` feature; using CPU");
        }

        eps.push(ort::execution_providers::CPUExecutionProvider::default().build());
        Ok(builder.with_execution_providers(eps)?)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    pub fn session(&self, name: &str) -> Option<&Session> {
        self.sessions.get(name)
    }

    /// A session together with the registry's reusable run options, for
    /// `run_with_options` calls that skip per-run allocation.
    pub fn session_with_options(&mut self, name: &str) -> Option<(&mut Session, &RunOptions)> {
        let run_options = &self.run_options;
        self.sessions.get_mut(name).map(|s| (s, run_options))
    }

    /// Ordered input names of a loaded model. Order matters: callers build
    /// input tensors in exactly this order and name-to-role mapping.
    pub fn input_names(&self, name: &str) -> Result<Vec<String>, TtsError> {
        let session = self.sessions.get(name).ok_or(TtsError::ModelsNotLoaded)?;
        Ok(session.inputs.iter().map(|i| i.name.to_string()).collect())
    }

    /// Ordered output names of a loaded model.
    pub fn output_names(&self, name: &str) -> Result<Vec<String>, TtsError> {
        let session = self.sessions.get(name).ok_or(TtsError::ModelsNotLoaded)?;
        Ok(session.outputs.iter().map(|o| o.name.to_string()).collect())
    }

    /// Shared CPU allocator for callers that need one.
    pub fn allocator(&self) -> &ort::memory::Allocator {
        &self.allocator
    }

    pub fn active_provider(&self) -> ExecutionProvider {
        self.provider
    }

    pub fn unload_all(&mut self) {
        if !self.sessions.is_empty() {
            log::info!("Unloading {} session(s)", self.sessions.len());
            self.sessions.clear();
        }
    }
}

fn detect_best_provider() -> ExecutionProvider {
    #[cfg(feature = "cuda")]
    {
        use ort::execution_providers::ExecutionProvider as _;
        if ort::execution_providers::CUDAExecutionProvider::default()
            .is_available()
            .unwrap_or(false)
        {
            log::info!("Auto-detected CUDA execution provider");
            return ExecutionProvider::Cuda;
        }
    }
    #[cfg(feature = "rocm")]
    {
        use ort::execution_providers::ExecutionProvider as _;
        if ort::execution_providers::ROCmExecutionProvider::default()
            .is_available()
            .unwrap_or(false)
        {
            log::info!("Auto-detected ROCm execution provider");
            return ExecutionProvider::Rocm;
        }
    }
    log::info!("Using CPU execution provider");
    ExecutionProvider::Cpu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_file_is_model_not_found() {
        let mut registry = SessionRegistry::new(ExecutionProvider::Cpu).unwrap();
        let err = registry
            .load_model(Path::new("/nonexistent/model.onnx"), "speech_encoder")
            .unwrap_err();
        assert!(matches!(err, TtsError::ModelNotFound(_)));
        assert!(!registry.is_loaded("speech_encoder"));
    }

    #[test]
    fn names_of_unloaded_model_error() {
        let registry = SessionRegistry::new(ExecutionProvider::Cpu).unwrap();
        assert!(matches!(
            registry.input_names("language_model"),
            Err(TtsError::ModelsNotLoaded)
        ));
    }
}
