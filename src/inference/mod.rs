//! Inference sessions
//!
//! Seam over the ONNX runtime. The embedder and reranker talk to a
//! [`InferenceSession`] trait object; the runtime-backed implementation is
//! feature-gated so the default build carries no native dependency.

use crate::tokenizer::Encoding;
use anyhow::Result;
use ndarray::ArrayD;

/// A loaded model session accepting one encoded example per call.
///
/// Inputs are the three named tensors `input_ids`, `attention_mask`, and
/// `token_type_ids`, each of shape `[1, max_seq_len]` and 64-bit integer
/// element type. The return value is the model's first output tensor.
pub trait InferenceSession: Send + Sync {
    fn run(&self, encoding: &Encoding) -> Result<ArrayD<f32>>;
}

#[cfg(feature = "onnx")]
pub use onnx::{load_session, OnnxSession};

#[cfg(all(feature = "onnx", feature = "cuda"))]
pub use onnx::probe_cuda_session;

#[cfg(not(feature = "onnx"))]
/// Stub used when the crate is built without the `onnx` feature.
pub fn load_session(
    model_dir: &std::path::Path,
    _provider: crate::runtime::ProviderStatus,
) -> Result<std::sync::Arc<dyn InferenceSession>> {
    anyhow::bail!(crate::error::RagError::Config(format!(
        "model {:?} requires the onnx feature; rebuild with --features onnx",
        model_dir
    )))
}

#[cfg(feature = "onnx")]
mod onnx {
    use super::InferenceSession;
    use crate::error::RagError;
    use crate::runtime::{ExecutionProvider, ProviderStatus};
    use crate::tokenizer::Encoding;
    use anyhow::{Context, Result};
    use ndarray::{Array2, ArrayD};
    use once_cell::sync::Lazy;
    use onnxruntime::{
        environment::Environment, session::Session, GraphOptimizationLevel, LoggingLevel,
    };
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    /// Global ONNX environment (lazy initialized).
    static ONNX_ENVIRONMENT: Lazy<Environment> = Lazy::new(|| {
        Environment::builder()
            .with_name("ragline")
            .with_log_level(LoggingLevel::Warning)
            .build()
            .expect("Failed to create ONNX environment")
    });

    /// ONNX-runtime backed session.
    ///
    /// The runtime serializes calls internally; the mutex keeps the handle
    /// shareable across pool workers.
    pub struct OnnxSession {
        session: Mutex<Session<'static>>,
    }

    impl OnnxSession {
        /// Load `model.onnx` from a model directory.
        pub fn from_dir(model_dir: &Path, provider: ProviderStatus) -> Result<Self> {
            let model_path = model_dir.join("model.onnx");
            if !model_path.exists() {
                return Err(
                    RagError::Resource(format!("model file not found: {:?}", model_path)).into(),
                );
            }

            tracing::info!("Loading ONNX model from {:?}", model_path);

            let mut session_builder = ONNX_ENVIRONMENT
                .new_session_builder()?
                .with_optimization_level(GraphOptimizationLevel::All)?
                .with_number_threads(4)?;

            session_builder = match provider.provider {
                #[cfg(feature = "cuda")]
                ExecutionProvider::Cuda => {
                    tracing::info!(
                        "Enabling CUDA execution provider on device {}",
                        provider.device_id
                    );
                    session_builder.with_cuda(provider.device_id as u32)?
                }
                #[cfg(not(feature = "cuda"))]
                ExecutionProvider::Cuda => {
                    return Err(RagError::AcceleratorUnavailable(
                        "CUDA provider selected but the cuda feature is not compiled in".into(),
                    )
                    .into());
                }
                ExecutionProvider::Cpu => session_builder,
            };

            let session = session_builder
                .with_model_from_file(&model_path)
                .context(format!("Failed to load ONNX model {:?}", model_path))?;

            Ok(Self {
                session: Mutex::new(session),
            })
        }
    }

    impl InferenceSession for OnnxSession {
        fn run(&self, encoding: &Encoding) -> Result<ArrayD<f32>> {
            let seq_len = encoding.input_ids.len();

            let input_ids =
                Array2::from_shape_vec((1, seq_len), encoding.input_ids.clone())?;
            let attention_mask =
                Array2::from_shape_vec((1, seq_len), encoding.attention_mask.clone())?;
            let token_type_ids =
                Array2::from_shape_vec((1, seq_len), encoding.token_type_ids.clone())?;

            let mut session = self.session.lock().expect("onnx session mutex poisoned");
            let outputs = session.run(vec![
                input_ids.into_dyn().into(),
                attention_mask.into_dyn().into(),
                token_type_ids.into_dyn().into(),
            ])?;

            if outputs.is_empty() {
                return Err(
                    RagError::DataIntegrity("model produced no output tensor".into()).into(),
                );
            }
            let tensor: ArrayD<f32> = outputs[0].view().to_owned();
            Ok(tensor)
        }
    }

    /// Load a shared session for the given model directory.
    pub fn load_session(
        model_dir: &Path,
        provider: ProviderStatus,
    ) -> Result<Arc<dyn InferenceSession>> {
        Ok(Arc::new(OnnxSession::from_dir(model_dir, provider)?))
    }

    /// Minimal accelerated-session initialization used by the provider probe.
    #[cfg(feature = "cuda")]
    pub fn probe_cuda_session(device_id: i32) -> Result<()> {
        ONNX_ENVIRONMENT
            .new_session_builder()?
            .with_cuda(device_id as u32)?;
        Ok(())
    }
}
