//! Inference backends and the conventions each one implies

use crate::preprocess::Normalization;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime a model was serialized for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Self-contained graph with the architecture embedded (exported Keras models)
    #[serde(alias = "tensorflow", alias = "keras", alias = "tf")]
    Onnx,

    /// Weights-only checkpoint rebuilt onto a known architecture
    #[serde(alias = "pytorch", alias = "pt")]
    Torch,
}

/// Memory layout of the single-image batch fed to a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[1, height, width, 3]`
    Nhwc,
    /// `[1, 3, height, width]`
    Nchw,
}

/// What the final layer of a backend's models emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Already normalized by a final softmax layer
    Probabilities,
    /// Raw scores that still need a softmax
    Logits,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Onnx => "onnx",
            Self::Torch => "torch",
        }
    }

    /// Tensor layout the backend's models expect
    pub fn layout(&self) -> TensorLayout {
        match self {
            Self::Onnx => TensorLayout::Nhwc,
            Self::Torch => TensorLayout::Nchw,
        }
    }

    /// Kind of output the backend's models produce
    pub fn output_kind(&self) -> OutputKind {
        match self {
            Self::Onnx => OutputKind::Probabilities,
            Self::Torch => OutputKind::Logits,
        }
    }

    /// Normalization used when no per-category convention is configured
    pub fn default_normalization(&self) -> Normalization {
        match self {
            Self::Onnx => Normalization::Caffe,
            Self::Torch => Normalization::Torch,
        }
    }

    /// Whether the category key may choose the normalization.
    ///
    /// Torch models all share the ImageNet mean/std pipeline.
    pub fn accepts_category_conventions(&self) -> bool {
        matches!(self, Self::Onnx)
    }

    /// Resampling filter for the resize step.
    ///
    /// Both backends resize with PIL bicubic before any tensor transform,
    /// so the filter does not depend on the backend.
    pub fn resize_filter(&self) -> FilterType {
        FilterType::CatmullRom
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
