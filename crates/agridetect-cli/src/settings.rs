//! Registry and image loading with command-line overrides applied

use crate::cli::Cli;
use agridetect_core::{Error, Result};
use agridetect_inference::ModelRegistry;
use image::DynamicImage;
use std::path::Path;

/// Load the model registry, then apply `--models-dir` and `--device`
pub fn load_registry(cli: &Cli) -> Result<ModelRegistry> {
    let mut registry = ModelRegistry::from_file(&cli.config)?;

    if let Some(dir) = &cli.models_dir {
        registry.models_dir = dir.clone();
    }
    if let Some(device) = &cli.device {
        registry.device = device.clone();
    }

    tracing::debug!(
        config = %cli.config.display(),
        models_dir = %registry.models_dir.display(),
        device = %registry.device,
        categories = registry.models.len(),
        "Loaded model registry"
    );
    Ok(registry)
}

/// Read and decode an image file no larger than `max_bytes`
pub fn load_image(path: &Path, max_bytes: u64) -> Result<DynamicImage> {
    let size = std::fs::metadata(path)
        .map_err(|e| Error::image(format!("cannot read {}: {}", path.display(), e)))?
        .len();
    if size > max_bytes {
        return Err(Error::image(format!(
            "{} is {} bytes, the limit is {} bytes",
            path.display(),
            size,
            max_bytes
        )));
    }

    let image = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| Error::image(format!("cannot decode {}: {}", path.display(), e)))?;

    tracing::debug!(
        path = %path.display(),
        bytes = size,
        width = image.width(),
        height = image.height(),
        color = ?image.color(),
        "Decoded image"
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use image::{ImageBuffer, Rgb};

    const REGISTRY: &str = "models_dir: models\nmodels:\n  rice_potato:\n    type: onnx\n    file: rice_potato.onnx\n    num_classes: 2\n";

    #[test]
    fn test_overrides_applied() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("model_config.yaml");
        std::fs::write(&config, REGISTRY).unwrap();

        let cli = Cli::parse_from([
            "agridetect",
            "--config",
            config.to_str().unwrap(),
            "--models-dir",
            "/opt/models",
            "--device",
            "cuda",
            "categories",
        ]);
        let registry = load_registry(&cli).unwrap();
        assert_eq!(registry.models_dir, Path::new("/opt/models"));
        assert_eq!(registry.device, "cuda");
    }

    #[test]
    fn test_load_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaf.png");
        ImageBuffer::from_pixel(40, 30, Rgb([20u8, 150, 40])).save(&path).unwrap();

        let image = load_image(&path, 5 * 1024 * 1024).unwrap();
        assert_eq!((image.width(), image.height()), (40, 30));
    }

    #[test]
    fn test_oversized_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaf.png");
        ImageBuffer::from_pixel(40, 30, Rgb([20u8, 150, 40])).save(&path).unwrap();

        let err = load_image(&path, 16).unwrap_err();
        assert_eq!(err.kind(), "image");
        assert!(err.to_string().contains("limit"));
    }

    #[test]
    fn test_undecodable_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaf.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let err = load_image(&path, 1024).unwrap_err();
        assert_eq!(err.kind(), "image");
    }
}
