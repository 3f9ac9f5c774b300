//! Model configuration and registry structures

use crate::architecture::Architecture;
use crate::backend::Backend;
use crate::labels::ClassLabels;
use crate::preprocess::{Normalization, DEFAULT_INPUT_SIZE};
use agridetect_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Model registry containing one model per crop category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRegistry {
    #[serde(default = "default_version")]
    pub version: String,

    /// Base directory for relative weight paths
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    /// Square input size used when an entry does not set its own
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    /// Device for the Torch backend (cpu, cuda, metal)
    #[serde(default = "default_device")]
    pub device: String,

    pub models: BTreeMap<String, ModelConfig>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_input_size() -> u32 {
    DEFAULT_INPUT_SIZE
}

fn default_device() -> String {
    "cpu".to_string()
}

/// Configuration for a single category's model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Registry key, filled in from the map key on load
    #[serde(skip)]
    pub category_key: String,

    /// Human-readable category name
    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(alias = "type")]
    pub backend: Backend,

    /// Local weights file, relative to `models_dir` unless absolute
    #[serde(default, alias = "file", alias = "weights_path")]
    pub weights: Option<PathBuf>,

    /// Hugging Face Hub source, used when `weights` is not set
    #[serde(default)]
    pub hub: Option<HubSource>,

    /// Architecture to rebuild (Torch only)
    #[serde(default)]
    pub architecture: Option<String>,

    #[serde(alias = "class_count")]
    pub num_classes: usize,

    #[serde(default, alias = "class_labels", alias = "labels")]
    pub classes: ClassLabels,

    /// Normalization override for this category
    #[serde(default)]
    pub preprocessing: Option<Normalization>,

    /// Square input size override
    #[serde(default)]
    pub input_size: Option<u32>,

    /// Sub-entry holding the weights in wrapped checkpoints
    #[serde(default = "default_checkpoint_key")]
    pub checkpoint_key: String,
}

fn default_checkpoint_key() -> String {
    "model_state_dict".to_string()
}

/// Weights hosted on the Hugging Face Hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSource {
    pub repo: String,
    pub filename: String,
    #[serde(default = "default_revision")]
    pub revision: String,
}

fn default_revision() -> String {
    "main".to_string()
}

impl ModelRegistry {
    /// Parse and validate a registry document (YAML or JSON)
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let mut registry: ModelRegistry = serde_yaml::from_str(contents)?;
        for (key, model) in registry.models.iter_mut() {
            model.category_key = key.clone();
        }
        registry.validate()?;
        Ok(registry)
    }

    /// Load model registry from a YAML or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read model config {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&contents)
    }

    /// Get a model configuration by category key
    pub fn get_model(&self, category: &str) -> Option<&ModelConfig> {
        self.models.get(category)
    }

    /// Configured category keys in sorted order
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Input size for a model, falling back to the registry default
    pub fn input_size_for(&self, model: &ModelConfig) -> u32 {
        model.input_size.unwrap_or(self.input_size)
    }

    /// Reject documents that would only fail later, at first request
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(Error::config("model config defines no models"));
        }
        if self.input_size == 0 {
            return Err(Error::config("input_size must be greater than 0"));
        }
        for (key, model) in &self.models {
            model
                .validate()
                .map_err(|reason| Error::config(format!("model '{}': {}", key, reason)))?;
        }
        Ok(())
    }
}

impl ModelConfig {
    /// Display name, or the category key when none is set
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.category_key)
    }

    /// Parsed architecture; `None` for self-contained graphs
    pub fn architecture(&self) -> std::result::Result<Option<Architecture>, String> {
        match (&self.backend, &self.architecture) {
            (Backend::Torch, Some(id)) => id.parse::<Architecture>().map(Some).map_err(|e| format!("{}", e)),
            (Backend::Torch, None) => Err(format!(
                "torch models need an architecture (supported: {})",
                Architecture::supported_ids().join(", ")
            )),
            (Backend::Onnx, _) => Ok(None),
        }
    }

    /// Weights path resolved against `models_dir`
    pub fn weights_path(&self, models_dir: &Path) -> Option<PathBuf> {
        self.weights.as_ref().map(|path| {
            if path.is_absolute() {
                path.clone()
            } else {
                models_dir.join(path)
            }
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.num_classes == 0 {
            return Err("num_classes must be greater than 0".to_string());
        }
        if let Some(max) = self.classes.max_index() {
            if max >= self.num_classes {
                return Err(format!(
                    "class index {} is out of range for {} classes",
                    max, self.num_classes
                ));
            }
        }
        if self.weights.is_none() && self.hub.is_none() {
            return Err("either `weights` or `hub` must be set".to_string());
        }
        if self.input_size == Some(0) {
            return Err("input_size must be greater than 0".to_string());
        }
        self.architecture()?;

        if let Some(normalization) = self.preprocessing {
            if !self.backend.accepts_category_conventions()
                && normalization != self.backend.default_normalization()
            {
                return Err(format!(
                    "{} models always use '{}' preprocessing, got '{}'",
                    self.backend,
                    self.backend.default_normalization().as_str(),
                    normalization.as_str()
                ));
            }
        }
        if self.checkpoint_key.trim().is_empty() {
            return Err("checkpoint_key must not be empty".to_string());
        }
        Ok(())
    }
}
