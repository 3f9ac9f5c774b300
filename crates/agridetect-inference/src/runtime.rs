//! Backend runtimes and the forward pass

use crate::architecture::Architecture;
use crate::backend::{Backend, OutputKind, TensorLayout};
use crate::cache::LoadedModel;
use crate::checkpoint::StateDict;
use crate::preprocess::InputTensor;
use agridetect_core::{BoxError, Error, Result};
use candle_core::{DType, Device, Shape, Tensor, D};
use candle_nn::var_builder::SimpleBackend;
use candle_nn::{Init, Module, VarBuilder};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tract_onnx::prelude::*;

/// A model ready to run a single-image forward pass
pub trait ModelHandle: Send + Sync {
    /// Raw output vector for a batch of one: probabilities or logits,
    /// depending on the backend
    fn forward(&self, input: &InputTensor) -> std::result::Result<Vec<f32>, BoxError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("model produced {actual} outputs, expected {expected} classes")]
    OutputLength { expected: usize, actual: usize },

    #[error("{backend} models take {expected:?} input, got {actual:?}")]
    LayoutMismatch {
        backend: Backend,
        expected: TensorLayout,
        actual: TensorLayout,
    },

    #[error("forward pass failed: {0}")]
    Forward(BoxError),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

/// Self-contained ONNX graph executed with tract
pub struct OnnxModel {
    plan: TypedRunnableModel<TypedModel>,
}

impl OnnxModel {
    /// Load and optimize the graph for a fixed `[1, size, size, 3]` input
    pub fn load(path: &Path, size: u32) -> std::result::Result<Self, BoxError> {
        let size = size as usize;
        let plan = tract_onnx::onnx()
            .model_for_path(path)?
            .with_input_fact(0, f32::fact([1, size, size, 3]).into())?
            .into_optimized()?
            .into_runnable()?;
        Ok(Self { plan })
    }
}

impl ModelHandle for OnnxModel {
    fn forward(&self, input: &InputTensor) -> std::result::Result<Vec<f32>, BoxError> {
        let tensor = tract_onnx::prelude::Tensor::from_shape(&input.shape(), input.data())?;
        let outputs = self.plan.run(tvec!(tensor.into()))?;
        let output = outputs
            .first()
            .ok_or_else(|| BoxError::from("graph produced no outputs"))?;
        Ok(output.as_slice::<f32>()?.to_vec())
    }
}

/// Architecture rebuilt with candle and bound to checkpoint weights
pub struct TorchModel {
    model: Box<dyn Module + Send + Sync>,
    device: Device,
}

impl TorchModel {
    /// Bind `state` onto a freshly built `architecture`.
    ///
    /// Binding is strict: missing or misshapen tensors fail the build, and
    /// tensors the architecture never asks for are rejected.
    pub fn from_state_dict(
        state: StateDict,
        architecture: Architecture,
        num_classes: usize,
        device: &Device,
    ) -> std::result::Result<Self, BoxError> {
        let mut unexpected: BTreeSet<String> = state
            .keys()
            .filter(|name| !name.ends_with(NUM_BATCHES_TRACKED))
            .cloned()
            .collect();

        let requested = Arc::new(Mutex::new(HashSet::new()));
        let backend = RecordingBackend {
            tensors: state,
            requested: Arc::clone(&requested),
        };
        let vb = VarBuilder::from_backend(Box::new(backend), DType::F32, device.clone());
        let model = architecture.build(vb, num_classes)?;

        let requested = requested.lock().unwrap_or_else(PoisonError::into_inner);
        unexpected.retain(|name| !requested.contains(name));
        if !unexpected.is_empty() {
            tracing::warn!(
                %architecture,
                count = unexpected.len(),
                tensors = ?unexpected,
                "Checkpoint has tensors the architecture does not use"
            );
            return Err(format!(
                "unexpected tensors in checkpoint for {}: {}",
                architecture,
                summarize(&unexpected)
            )
            .into());
        }

        Ok(Self {
            model,
            device: device.clone(),
        })
    }
}

/// BatchNorm bookkeeping that torch saves and candle has no slot for
const NUM_BATCHES_TRACKED: &str = "num_batches_tracked";

/// State-dict backend that remembers every tensor name requested from it
struct RecordingBackend {
    tensors: StateDict,
    requested: Arc<Mutex<HashSet<String>>>,
}

impl SimpleBackend for RecordingBackend {
    fn get(
        &self,
        shape: Shape,
        name: &str,
        hints: Init,
        dtype: DType,
        device: &Device,
    ) -> candle_core::Result<Tensor> {
        self.requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
        SimpleBackend::get(&self.tensors, shape, name, hints, dtype, device)
    }

    fn contains_tensor(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }
}

fn summarize(names: &BTreeSet<String>) -> String {
    const SHOWN: usize = 8;
    let listed: Vec<&str> = names.iter().take(SHOWN).map(String::as_str).collect();
    match names.len().saturating_sub(SHOWN) {
        0 => listed.join(", "),
        more => format!("{} and {} more", listed.join(", "), more),
    }
}

impl ModelHandle for TorchModel {
    fn forward(&self, input: &InputTensor) -> std::result::Result<Vec<f32>, BoxError> {
        let xs = Tensor::from_slice(input.data(), input.shape().to_vec(), &self.device)?;
        let logits = self.model.forward(&xs)?;
        Ok(logits.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }
}

/// Run the forward pass and return a probability vector of `class_count` entries
pub fn infer(model: &LoadedModel, input: &InputTensor) -> std::result::Result<Vec<f32>, RuntimeError> {
    let backend = model.backend();
    let expected = backend.layout();
    if input.layout() != expected {
        return Err(RuntimeError::LayoutMismatch {
            backend,
            expected,
            actual: input.layout(),
        });
    }

    let raw = model.handle().forward(input).map_err(RuntimeError::Forward)?;
    if raw.len() != model.class_count() {
        return Err(RuntimeError::OutputLength {
            expected: model.class_count(),
            actual: raw.len(),
        });
    }

    match backend.output_kind() {
        OutputKind::Probabilities => Ok(raw),
        OutputKind::Logits => Ok(softmax(&raw)?),
    }
}

/// Softmax over a flat logit vector
pub fn softmax(logits: &[f32]) -> std::result::Result<Vec<f32>, candle_core::Error> {
    let logits = Tensor::from_slice(logits, logits.len(), &Device::Cpu)?;
    candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec1::<f32>()
}

/// Device for the Torch backend
pub fn get_device(device: &str) -> Result<Device> {
    match device.trim().to_lowercase().as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "cuda:0" => Device::new_cuda(0)
            .map_err(|e| Error::config(format!("Failed to initialize CUDA: {}", e))),
        "mps" | "metal" => Device::new_metal(0)
            .map_err(|e| Error::config(format!("Failed to initialize Metal: {}", e))),
        other => Err(Error::config(format!(
            "unknown device '{}' (expected cpu, cuda or metal)",
            other
        ))),
    }
}
