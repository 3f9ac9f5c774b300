//! Image preprocessing: square resize, RGB coercion and numeric normalization
//!
//! Models were trained with different upstream tooling, so the numbers fed to
//! them differ per backend and, for exported graphs, per crop category. The
//! category-to-convention mapping is data ([`ConventionTable`]) built from the
//! model configuration; the only hard-coded choices are the backend defaults.

use crate::backend::{Backend, TensorLayout};
use crate::model_config::ModelRegistry;
use agridetect_core::{Error, Result};
use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default square input size
pub const DEFAULT_INPUT_SIZE: u32 = 224;

/// Per-channel dataset means in BGR order, subtracted by the `caffe` convention
pub const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

/// ImageNet per-channel mean (RGB, unit range)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet per-channel standard deviation (RGB, unit range)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Numeric normalization applied to resized 8-bit RGB pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Reverse to BGR and subtract [`CAFFE_MEAN_BGR`] (ResNet50-style)
    Caffe,
    /// Scale to `[-1, 1]` via `x / 127.5 - 1`
    Tf,
    /// `x / 255`, then ImageNet mean/std
    #[serde(alias = "imagenet")]
    Torch,
    /// Pixels as floats in `0..=255`, for graphs that rescale internally
    Raw,
}

impl Normalization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Caffe => "caffe",
            Self::Tf => "tf",
            Self::Torch => "torch",
            Self::Raw => "raw",
        }
    }

    /// Normalize one RGB pixel, returning channels in model order
    #[inline]
    pub fn apply(&self, [r, g, b]: [u8; 3]) -> [f32; 3] {
        let (r, g, b) = (r as f32, g as f32, b as f32);
        match self {
            Self::Caffe => [
                b - CAFFE_MEAN_BGR[0],
                g - CAFFE_MEAN_BGR[1],
                r - CAFFE_MEAN_BGR[2],
            ],
            Self::Tf => [r / 127.5 - 1.0, g / 127.5 - 1.0, b / 127.5 - 1.0],
            Self::Torch => [
                (r / 255.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0],
                (g / 255.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1],
                (b / 255.0 - IMAGENET_MEAN[2]) / IMAGENET_STD[2],
            ],
            Self::Raw => [r, g, b],
        }
    }
}

/// Category-specific normalization overrides
#[derive(Debug, Clone, Default)]
pub struct ConventionTable {
    entries: HashMap<String, Normalization>,
}

impl ConventionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the `preprocessing` entries of every configured model
    pub fn from_registry(registry: &ModelRegistry) -> Self {
        registry
            .models
            .iter()
            .filter_map(|(key, config)| config.preprocessing.map(|n| (key.clone(), n)))
            .collect()
    }

    /// Add or replace the convention for a category
    pub fn with(mut self, category: impl Into<String>, normalization: Normalization) -> Self {
        self.insert(category, normalization);
        self
    }

    pub fn insert(&mut self, category: impl Into<String>, normalization: Normalization) {
        self.entries.insert(category.into(), normalization);
    }

    /// Configured override for a category, if any
    pub fn get(&self, category: &str) -> Option<Normalization> {
        self.entries.get(category).copied()
    }

    /// Convention to apply for `category` on `backend`
    pub fn resolve(&self, category: &str, backend: Backend) -> Normalization {
        if !backend.accepts_category_conventions() {
            return backend.default_normalization();
        }
        self.get(category)
            .unwrap_or_else(|| backend.default_normalization())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Normalization)> for ConventionTable {
    fn from_iter<I: IntoIterator<Item = (String, Normalization)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Single-image batch ready for a backend
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    layout: TensorLayout,
    shape: [usize; 4],
    data: Vec<f32>,
}

impl InputTensor {
    /// Wrap an already-normalized buffer; `data` must match `shape`
    pub fn new(layout: TensorLayout, shape: [usize; 4], data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(Error::internal(format!(
                "tensor data has {} values, shape {:?} needs {}",
                data.len(),
                shape,
                expected
            )));
        }
        Ok(Self { layout, shape, data })
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Number of color channels
    pub fn channels(&self) -> usize {
        match self.layout {
            TensorLayout::Nhwc => self.shape[3],
            TensorLayout::Nchw => self.shape[1],
        }
    }

    /// `(height, width)`
    pub fn spatial(&self) -> (usize, usize) {
        match self.layout {
            TensorLayout::Nhwc => (self.shape[1], self.shape[2]),
            TensorLayout::Nchw => (self.shape[2], self.shape[3]),
        }
    }
}

/// Resize, coerce to RGB and normalize `image` for `backend`
pub fn preprocess_image(
    image: &DynamicImage,
    backend: Backend,
    normalization: Normalization,
    size: u32,
) -> Result<InputTensor> {
    if size == 0 {
        return Err(Error::config("input size must be greater than 0"));
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(Error::image(format!(
            "image has no pixels ({}x{})",
            image.width(),
            image.height()
        )));
    }

    // Alpha is dropped, grayscale is replicated, 16-bit is scaled to 8-bit
    let rgb = image.to_rgb8();
    let resized = image::imageops::resize(&rgb, size, size, backend.resize_filter());

    let tensor = to_tensor(&resized, backend.layout(), normalization);
    tracing::debug!(
        backend = %backend,
        normalization = normalization.as_str(),
        source_width = image.width(),
        source_height = image.height(),
        size,
        "Preprocessed image"
    );
    Ok(tensor)
}

fn to_tensor(image: &RgbImage, layout: TensorLayout, normalization: Normalization) -> InputTensor {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let plane = width * height;
    let mut data = vec![0f32; plane * 3];

    for (x, y, pixel) in image.enumerate_pixels() {
        let values = normalization.apply(pixel.0);
        let offset = y as usize * width + x as usize;
        match layout {
            TensorLayout::Nhwc => {
                data[offset * 3..offset * 3 + 3].copy_from_slice(&values);
            }
            TensorLayout::Nchw => {
                for (channel, value) in values.into_iter().enumerate() {
                    data[channel * plane + offset] = value;
                }
            }
        }
    }

    let shape = match layout {
        TensorLayout::Nhwc => [1, height, width, 3],
        TensorLayout::Nchw => [1, 3, height, width],
    };
    InputTensor { layout, shape, data }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayAlphaImage, GrayImage, ImageBuffer, LumaA, Rgb, Rgba, RgbaImage};

    fn solid_rgb(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn test_every_color_mode_yields_three_channels() {
        let inputs = vec![
            solid_rgb(640, 480, [10, 200, 30]),
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(31, 17, Rgba([1, 2, 3, 0]))),
            DynamicImage::ImageLuma8(GrayImage::from_pixel(1000, 3, image::Luma([128]))),
            DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(5, 5, LumaA([90, 255]))),
            DynamicImage::ImageRgb16(ImageBuffer::from_pixel(8, 12, Rgb([65535u16, 0, 300]))),
        ];

        for image in &inputs {
            for backend in [Backend::Onnx, Backend::Torch] {
                let tensor =
                    preprocess_image(image, backend, backend.default_normalization(), 224)
                        .unwrap();
                assert_eq!(tensor.channels(), 3);
                assert_eq!(tensor.spatial(), (224, 224));
                assert_eq!(tensor.data().len(), 3 * 224 * 224);
            }
        }
    }

    #[test]
    fn test_layout_shapes() {
        let image = solid_rgb(10, 20, [0, 0, 0]);
        let nhwc = preprocess_image(&image, Backend::Onnx, Normalization::Raw, 32).unwrap();
        assert_eq!(nhwc.shape(), [1, 32, 32, 3]);

        let nchw = preprocess_image(&image, Backend::Torch, Normalization::Torch, 32).unwrap();
        assert_eq!(nchw.shape(), [1, 3, 32, 32]);
    }

    #[test]
    fn test_caffe_reverses_channels_and_centers() {
        let image = solid_rgb(4, 4, [255, 0, 0]);
        let tensor = preprocess_image(&image, Backend::Onnx, Normalization::Caffe, 4).unwrap();

        let first = &tensor.data()[..3];
        assert!((first[0] - (0.0 - 103.939)).abs() < 1e-3);
        assert!((first[1] - (0.0 - 116.779)).abs() < 1e-3);
        assert!((first[2] - (255.0 - 123.68)).abs() < 1e-3);
    }

    #[test]
    fn test_tf_scales_to_unit_range() {
        assert_eq!(Normalization::Tf.apply([255, 0, 255]), [1.0, -1.0, 1.0]);
    }

    #[test]
    fn test_torch_uses_planar_imagenet_stats() {
        let image = solid_rgb(2, 2, [255, 0, 0]);
        let tensor = preprocess_image(&image, Backend::Torch, Normalization::Torch, 2).unwrap();
        let data = tensor.data();

        let red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let green = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        // Planes: R for all 4 pixels, then G, then B
        assert!(data[..4].iter().all(|v| (v - red).abs() < 1e-5));
        assert!(data[4..8].iter().all(|v| (v - green).abs() < 1e-5));
    }

    #[test]
    fn test_backends_resample_identically() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_fn(97, 61, |x, y| {
            Rgb([(x * 5 % 256) as u8, (y * 11 % 256) as u8, ((x + y) * 3 % 256) as u8])
        }));
        let size = 16usize;
        let nhwc = preprocess_image(&image, Backend::Onnx, Normalization::Raw, size as u32).unwrap();
        let nchw = preprocess_image(&image, Backend::Torch, Normalization::Raw, size as u32).unwrap();

        let expected = image::imageops::resize(
            &image.to_rgb8(),
            size as u32,
            size as u32,
            image::imageops::FilterType::CatmullRom,
        );
        let plane = size * size;
        for (x, y, pixel) in expected.enumerate_pixels() {
            let offset = y as usize * size + x as usize;
            for channel in 0..3 {
                let want = pixel.0[channel] as f32;
                assert_eq!(nhwc.data()[offset * 3 + channel], want);
                assert_eq!(nchw.data()[channel * plane + offset], want);
            }
        }
    }

    #[test]
    fn test_empty_image_rejected() {
        let image = DynamicImage::new_rgb8(0, 0);
        let err = preprocess_image(&image, Backend::Onnx, Normalization::Caffe, 224).unwrap_err();
        assert_eq!(err.kind(), "image");
    }

    #[test]
    fn test_convention_table_resolution() {
        let table = ConventionTable::new()
            .with("corn_blackgram", Normalization::Tf)
            .with("cotton_tomato", Normalization::Raw);

        assert_eq!(table.resolve("corn_blackgram", Backend::Onnx), Normalization::Tf);
        assert_eq!(table.resolve("rice_potato", Backend::Onnx), Normalization::Caffe);
        // Torch ignores category overrides
        assert_eq!(table.resolve("cotton_tomato", Backend::Torch), Normalization::Torch);
    }

    #[test]
    fn test_repeat_preprocess_is_identical() {
        let image = solid_rgb(300, 200, [12, 140, 60]);
        let a = preprocess_image(&image, Backend::Onnx, Normalization::Tf, 224).unwrap();
        let b = preprocess_image(&image, Backend::Onnx, Normalization::Tf, 224).unwrap();
        assert_eq!(a, b);
    }
}
