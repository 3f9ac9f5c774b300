//! Category-keyed dispatch: configuration lookup, cached loading,
//! preprocessing, inference and result normalization

use crate::backend::Backend;
use crate::cache::{LoadedModel, ModelCache};
use crate::loader::{ModelLoader, RuntimeLoader};
use crate::model_config::{ModelConfig, ModelRegistry};
use crate::normalize;
use crate::preprocess::{preprocess_image, ConventionTable, InputTensor, Normalization};
use crate::runtime;
use agridetect_core::{Error, InferenceResult, Result};
use image::DynamicImage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Routes diagnosis requests to the model configured for each crop category
pub struct Dispatcher {
    registry: Arc<ModelRegistry>,
    conventions: ConventionTable,
    loader: Arc<dyn ModelLoader>,
    cache: Arc<ModelCache>,
}

impl Dispatcher {
    /// Create a dispatcher over `registry`, loading through `loader` into `cache`
    pub fn new(
        registry: ModelRegistry,
        loader: Arc<dyn ModelLoader>,
        cache: Arc<ModelCache>,
    ) -> Self {
        let conventions = ConventionTable::from_registry(&registry);
        Self {
            registry: Arc::new(registry),
            conventions,
            loader,
            cache,
        }
    }

    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    pub fn conventions(&self) -> &ConventionTable {
        &self.conventions
    }

    /// Configured category keys in sorted order
    pub fn categories(&self) -> Vec<String> {
        self.registry.categories().map(str::to_string).collect()
    }

    /// Configuration for `category`; unknown keys are a configuration error
    pub fn resolve_config(&self, category: &str) -> Result<&ModelConfig> {
        self.registry.get_model(category).ok_or_else(|| {
            Error::config(format!(
                "unknown category '{}' (configured: {})",
                category,
                self.categories().join(", ")
            ))
        })
    }

    /// Cached model for `category`, loading it on first use
    pub async fn get_or_load_model(&self, category: &str) -> Result<Arc<LoadedModel>> {
        let config = self.resolve_config(category)?;

        self.cache
            .get_or_try_load(category, || async move {
                let started = Instant::now();
                let outcome = self.loader.load(config).await;
                let status = if outcome.is_ok() { "success" } else { "failure" };
                metrics::counter!(
                    "agridetect_model_loads_total",
                    "backend" => config.backend.as_str(),
                    "status" => status
                )
                .increment(1);

                if outcome.is_ok() {
                    tracing::info!(
                        category,
                        backend = %config.backend,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Model ready"
                    );
                }
                outcome
            })
            .await
    }

    /// Normalization that `category` uses on `backend`
    pub fn normalization_for(&self, category: &str, backend: Backend) -> Normalization {
        self.conventions.resolve(category, backend)
    }

    /// Resize, coerce and normalize `image` for `category` on `backend`.
    ///
    /// Unknown categories are a configuration error.
    pub fn preprocess(
        &self,
        image: &DynamicImage,
        backend: Backend,
        category: &str,
    ) -> Result<InputTensor> {
        let config = self.resolve_config(category)?;
        let normalization = self.normalization_for(category, backend);
        let size = self.registry.input_size_for(config);
        preprocess_image(image, backend, normalization, size)
    }

    /// Forward pass on a blocking thread; returns class probabilities
    pub async fn infer(&self, model: &Arc<LoadedModel>, input: InputTensor) -> Result<Vec<f32>> {
        let model = Arc::clone(model);
        let category = model.category().to_string();

        // A panicking runtime surfaces as a join error
        tokio::task::spawn_blocking(move || runtime::infer(&model, &input))
            .await
            .map_err(|e| Error::inference(&category, e))?
            .map_err(|e| Error::inference(&category, e))
    }

    /// Label a probability vector with `category`'s classes
    pub fn normalize_result(&self, probabilities: &[f32], category: &str) -> Result<InferenceResult> {
        let config = self.resolve_config(category)?;
        normalize::normalize_result(probabilities, &config.classes)
            .map_err(|e| Error::inference(category, e))
    }

    /// Full pipeline for one image. Failures are logged before being returned.
    pub async fn diagnose(&self, category: &str, image: &DynamicImage) -> Result<InferenceResult> {
        let started = Instant::now();
        match self.run_pipeline(category, image).await {
            Ok(result) => {
                let elapsed = started.elapsed();
                metrics::counter!("agridetect_inference_total", "category" => category.to_string())
                    .increment(1);
                metrics::histogram!("agridetect_inference_latency_us", "category" => category.to_string())
                    .record(elapsed.as_micros() as f64);
                tracing::info!(
                    category,
                    label = %result.predicted_label,
                    confidence = result.confidence,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Diagnosis complete"
                );
                Ok(result)
            }
            Err(e) => {
                metrics::counter!("agridetect_errors_total", "kind" => e.kind()).increment(1);
                tracing::error!(category, kind = e.kind(), error = %e, "Diagnosis failed");
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, category: &str, image: &DynamicImage) -> Result<InferenceResult> {
        let model = self.get_or_load_model(category).await?;
        let input = self.preprocess(image, model.backend(), category)?;
        tracing::debug!(category, shape = ?input.shape(), "Running inference");
        let probabilities = self.infer(&model, input).await?;
        self.normalize_result(&probabilities, category)
    }

    /// Load the given categories concurrently, failing on the first error
    pub async fn preload(&self, categories: &[String]) -> Result<()> {
        let loads = categories
            .iter()
            .map(|category| self.get_or_load_model(category));
        let models = futures::future::try_join_all(loads).await?;
        tracing::info!(count = models.len(), "Preloaded models");
        Ok(())
    }

    /// Load every configured category
    pub async fn preload_all(&self) -> Result<()> {
        self.preload(&self.categories()).await
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("categories", &self.categories())
            .field("conventions", &self.conventions)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Dispatcher`]
pub struct DispatcherBuilder {
    registry: Option<ModelRegistry>,
    registry_path: Option<PathBuf>,
    loader: Option<Arc<dyn ModelLoader>>,
    cache: Option<Arc<ModelCache>>,
    conventions: Vec<(String, Normalization)>,
    preload: Vec<String>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            registry: None,
            registry_path: None,
            loader: None,
            cache: None,
            conventions: Vec::new(),
            preload: Vec::new(),
        }
    }

    /// Use an already parsed registry
    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Read the registry from a file at build time
    pub fn with_registry_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_path = Some(path.into());
        self
    }

    /// Replace the default [`RuntimeLoader`]
    pub fn with_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Share an existing cache instead of starting empty
    pub fn with_cache(mut self, cache: Arc<ModelCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Override the normalization for one category
    pub fn with_convention(mut self, category: impl Into<String>, normalization: Normalization) -> Self {
        self.conventions.push((category.into(), normalization));
        self
    }

    /// Load a category during build
    pub fn preload(mut self, category: impl Into<String>) -> Self {
        self.preload.push(category.into());
        self
    }

    pub async fn build(self) -> Result<Dispatcher> {
        let registry = match (self.registry, self.registry_path) {
            (Some(registry), _) => registry,
            (None, Some(path)) => ModelRegistry::from_file(path)?,
            (None, None) => ModelRegistry::from_file("config/model_config.yaml")?,
        };

        let loader: Arc<dyn ModelLoader> = match self.loader {
            Some(loader) => loader,
            None => Arc::new(RuntimeLoader::from_registry(&registry)?),
        };
        let cache = self.cache.unwrap_or_default();

        let mut dispatcher = Dispatcher::new(registry, loader, cache);
        for (category, normalization) in self.conventions {
            if !dispatcher.registry.get_model(&category).is_some_and(|config| {
                config.backend.accepts_category_conventions()
            }) {
                return Err(Error::config(format!(
                    "cannot set a preprocessing convention for '{}'",
                    category
                )));
            }
            dispatcher.conventions.insert(category, normalization);
        }

        if !self.preload.is_empty() {
            dispatcher.preload(&self.preload).await?;
        }

        Ok(dispatcher)
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"
models:
  rice_potato:
    type: onnx
    file: rice_potato.onnx
    num_classes: 5
    classes: {"2": Healthy}
  corn_blackgram:
    type: onnx
    file: corn_blackgram.onnx
    num_classes: 3
    preprocessing: tf
    input_size: 128
  cotton_tomato:
    type: torch
    file: cotton_tomato.pth
    architecture: efficientnet_b0
    num_classes: 17
"#;

    struct NeverLoads;

    #[async_trait::async_trait]
    impl ModelLoader for NeverLoads {
        async fn load(&self, config: &ModelConfig) -> Result<LoadedModel> {
            Err(Error::model_load(&config.category_key, "no weights in unit tests"))
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            ModelRegistry::from_yaml(REGISTRY).unwrap(),
            Arc::new(NeverLoads),
            Arc::new(ModelCache::new()),
        )
    }

    #[test]
    fn test_resolve_config() {
        let dispatcher = dispatcher();
        let config = dispatcher.resolve_config("rice_potato").unwrap();
        assert_eq!(config.category_key, "rice_potato");
        assert_eq!(config.num_classes, 5);

        let err = dispatcher.resolve_config("durian_kiwi").unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("durian_kiwi"));
    }

    #[test]
    fn test_conventions_from_registry() {
        let dispatcher = dispatcher();
        assert_eq!(
            dispatcher.normalization_for("corn_blackgram", Backend::Onnx),
            Normalization::Tf
        );
        assert_eq!(
            dispatcher.normalization_for("rice_potato", Backend::Onnx),
            Normalization::Caffe
        );
        assert_eq!(
            dispatcher.normalization_for("cotton_tomato", Backend::Torch),
            Normalization::Torch
        );
    }

    #[test]
    fn test_preprocess_uses_per_model_size() {
        let dispatcher = dispatcher();
        let image = DynamicImage::new_rgb8(50, 40);

        let input = dispatcher.preprocess(&image, Backend::Onnx, "corn_blackgram").unwrap();
        assert_eq!(input.shape(), [1, 128, 128, 3]);

        let input = dispatcher.preprocess(&image, Backend::Torch, "cotton_tomato").unwrap();
        assert_eq!(input.shape(), [1, 3, 224, 224]);
    }

    #[test]
    fn test_preprocess_unknown_category() {
        let dispatcher = dispatcher();
        let image = DynamicImage::new_rgb8(50, 40);

        let err = dispatcher
            .preprocess(&image, Backend::Onnx, "durian_kiwi")
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    struct PanicsOnForward;

    impl crate::runtime::ModelHandle for PanicsOnForward {
        fn forward(
            &self,
            _input: &InputTensor,
        ) -> std::result::Result<Vec<f32>, agridetect_core::BoxError> {
            panic!("kernel fault");
        }
    }

    #[tokio::test]
    async fn test_panicking_forward_is_inference_error() {
        let dispatcher = dispatcher();
        let model = Arc::new(LoadedModel::new("rice_potato", Backend::Onnx, 5, PanicsOnForward));
        let input = dispatcher
            .preprocess(&DynamicImage::new_rgb8(8, 8), Backend::Onnx, "rice_potato")
            .unwrap();

        let err = dispatcher.infer(&model, input).await.unwrap_err();
        assert_eq!(err.kind(), "inference");
        assert!(err.to_string().contains("rice_potato"));
    }

    #[tokio::test]
    async fn test_builder_rejects_torch_convention() {
        let result = Dispatcher::builder()
            .with_registry(ModelRegistry::from_yaml(REGISTRY).unwrap())
            .with_loader(Arc::new(NeverLoads))
            .with_convention("cotton_tomato", Normalization::Caffe)
            .build()
            .await;
        assert_eq!(result.unwrap_err().kind(), "configuration");
    }

    #[tokio::test]
    async fn test_builder_convention_override() {
        let dispatcher = Dispatcher::builder()
            .with_registry(ModelRegistry::from_yaml(REGISTRY).unwrap())
            .with_loader(Arc::new(NeverLoads))
            .with_convention("rice_potato", Normalization::Raw)
            .build()
            .await
            .unwrap();
        assert_eq!(
            dispatcher.normalization_for("rice_potato", Backend::Onnx),
            Normalization::Raw
        );
    }

    #[tokio::test]
    async fn test_normalize_unknown_category() {
        let err = dispatcher().normalize_result(&[1.0], "durian_kiwi").unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[tokio::test]
    async fn test_normalize_empty_is_inference_error() {
        let err = dispatcher().normalize_result(&[], "rice_potato").unwrap_err();
        assert_eq!(err.kind(), "inference");
    }
}
