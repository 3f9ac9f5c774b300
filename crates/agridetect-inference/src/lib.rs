//! AgriDetect Inference
//!
//! Per-category model dispatch for leaf-disease classifiers.
//!
//! A diagnosis request names a crop category. The [`Dispatcher`] resolves that
//! category's model configuration, loads the model once into a shared
//! [`ModelCache`], preprocesses the image the way that model was trained, runs
//! the forward pass and maps the output onto a labeled [`InferenceResult`].
//!
//! Two backends are supported:
//! - `onnx`: self-contained graphs (exported Keras models), run with tract
//! - `torch`: weights-only checkpoints rebuilt onto a known architecture with candle
//!
//! [`InferenceResult`]: agridetect_core::InferenceResult

pub mod architecture;
pub mod backend;
pub mod cache;
pub mod checkpoint;
pub mod dispatcher;
pub mod labels;
pub mod loader;
pub mod model_config;
pub mod normalize;
pub mod preprocess;
pub mod runtime;

pub use architecture::Architecture;
pub use backend::{Backend, OutputKind, TensorLayout};
pub use cache::{LoadedModel, ModelCache};
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use labels::ClassLabels;
pub use loader::{ModelLoader, RuntimeLoader};
pub use model_config::{HubSource, ModelConfig, ModelRegistry};
pub use normalize::{normalize_result, NormalizeError};
pub use preprocess::{preprocess_image, ConventionTable, InputTensor, Normalization};
pub use runtime::{ModelHandle, RuntimeError};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::backend::Backend;
    pub use crate::cache::{LoadedModel, ModelCache};
    pub use crate::dispatcher::Dispatcher;
    pub use crate::loader::{ModelLoader, RuntimeLoader};
    pub use crate::model_config::{ModelConfig, ModelRegistry};
    pub use crate::preprocess::Normalization;
    pub use crate::runtime::ModelHandle;
    pub use agridetect_core::prelude::*;
}
