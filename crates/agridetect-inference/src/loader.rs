//! Loading models from configuration onto a backend runtime

use crate::backend::Backend;
use crate::cache::LoadedModel;
use crate::checkpoint::read_state_dict;
use crate::model_config::{ModelConfig, ModelRegistry};
use crate::runtime::{get_device, OnnxModel, TorchModel};
use agridetect_core::{Error, Result};
use candle_core::Device;
use std::io;
use std::path::{Path, PathBuf};

/// Pluggable model loading.
///
/// The dispatcher calls this on a cache miss. Tests substitute counting
/// stubs; [`RuntimeLoader`] is the real implementation.
#[async_trait::async_trait]
pub trait ModelLoader: Send + Sync {
    /// Load the model described by `config`
    async fn load(&self, config: &ModelConfig) -> Result<LoadedModel>;
}

/// Loads ONNX graphs with tract and Torch checkpoints with candle
#[derive(Debug, Clone)]
pub struct RuntimeLoader {
    models_dir: PathBuf,
    input_size: u32,
    device: Device,
}

impl RuntimeLoader {
    pub fn new(models_dir: impl Into<PathBuf>, input_size: u32, device: Device) -> Self {
        Self {
            models_dir: models_dir.into(),
            input_size,
            device,
        }
    }

    /// Loader using the registry's models directory, input size and device
    pub fn from_registry(registry: &ModelRegistry) -> Result<Self> {
        let device = get_device(&registry.device)?;
        Ok(Self::new(&registry.models_dir, registry.input_size, device))
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Local weights file for `config`, downloading Hub sources when needed
    pub fn resolve_weights_path(&self, config: &ModelConfig) -> Result<PathBuf> {
        if let Some(path) = config.weights_path(&self.models_dir) {
            if !path.exists() {
                return Err(Error::model_load(
                    &config.category_key,
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("weights file not found: {}", path.display()),
                    ),
                ));
            }
            return Ok(path);
        }

        match &config.hub {
            Some(hub) => download_from_hub(config, hub),
            None => Err(Error::config(format!(
                "model '{}' has no weights source",
                config.category_key
            ))),
        }
    }

    fn load_blocking(&self, config: &ModelConfig) -> Result<LoadedModel> {
        let category = config.category_key.as_str();
        let path = self.resolve_weights_path(config)?;

        match config.backend {
            Backend::Onnx => {
                let size = config.input_size.unwrap_or(self.input_size);
                let model =
                    OnnxModel::load(&path, size).map_err(|e| Error::model_load(category, e))?;
                tracing::info!(
                    category,
                    backend = %config.backend,
                    path = %path.display(),
                    size,
                    "Loaded ONNX model"
                );
                Ok(LoadedModel::new(category, config.backend, config.num_classes, model))
            }
            Backend::Torch => {
                let architecture = config
                    .architecture()
                    .map_err(|reason| Error::config(format!("model '{}': {}", category, reason)))?
                    .ok_or_else(|| {
                        Error::config(format!("model '{}' has no architecture", category))
                    })?;

                let (state, layout) = read_state_dict(&path, &config.checkpoint_key, &self.device)
                    .map_err(|e| Error::model_load(category, e))?;
                let model =
                    TorchModel::from_state_dict(state, architecture, config.num_classes, &self.device)
                        .map_err(|e| Error::model_load(category, e))?;

                tracing::info!(
                    category,
                    backend = %config.backend,
                    path = %path.display(),
                    %architecture,
                    ?layout,
                    "Loaded Torch model"
                );
                Ok(LoadedModel::new(category, config.backend, config.num_classes, model))
            }
        }
    }
}

#[async_trait::async_trait]
impl ModelLoader for RuntimeLoader {
    async fn load(&self, config: &ModelConfig) -> Result<LoadedModel> {
        let loader = self.clone();
        let config = config.clone();
        let category = config.category_key.clone();
        on_blocking_pool(category, move || loader.load_blocking(&config)).await
    }
}

/// Run `work` on the blocking pool; a panic there is a load failure for `category`
async fn on_blocking_pool<T, F>(category: String, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::model_load(category, e))?
}

#[cfg(feature = "hf-hub")]
fn download_from_hub(config: &ModelConfig, hub: &crate::model_config::HubSource) -> Result<PathBuf> {
    tracing::info!(
        category = %config.category_key,
        "Downloading weights from HuggingFace: {} @ {}",
        hub.repo,
        hub.revision
    );

    let api = hf_hub::api::sync::Api::new()
        .map_err(|e| Error::model_load(&config.category_key, e))?;
    let repo = api.repo(hf_hub::Repo::with_revision(
        hub.repo.clone(),
        hf_hub::RepoType::Model,
        hub.revision.clone(),
    ));
    repo.get(&hub.filename)
        .map_err(|e| Error::model_load(&config.category_key, e))
}

#[cfg(not(feature = "hf-hub"))]
fn download_from_hub(config: &ModelConfig, _hub: &crate::model_config::HubSource) -> Result<PathBuf> {
    Err(Error::config(format!(
        "model '{}' uses a hub source but the hf-hub feature is disabled",
        config.category_key
    )))
}
