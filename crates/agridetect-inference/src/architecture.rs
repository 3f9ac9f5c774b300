//! Architectures that weights-only checkpoints can be rebuilt onto

use candle_core::Result as CandleResult;
use candle_nn::{Module, VarBuilder};
use candle_transformers::models::{efficientnet, resnet};
use std::fmt;
use std::str::FromStr;

/// Known image-classification architectures.
///
/// Parameter names follow torchvision (`conv1`, `layer1.0.bn1`, `features.0.0`,
/// `classifier.1`), which timm's ResNets share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    ResNet18,
    ResNet34,
    ResNet50,
    ResNet101,
    ResNet152,
    EfficientNetB0,
    EfficientNetB1,
    EfficientNetB2,
    EfficientNetB3,
    EfficientNetB4,
    EfficientNetB5,
    EfficientNetB6,
    EfficientNetB7,
}

const SUPPORTED: &[(&str, Architecture)] = &[
    ("resnet18", Architecture::ResNet18),
    ("resnet34", Architecture::ResNet34),
    ("resnet50", Architecture::ResNet50),
    ("resnet101", Architecture::ResNet101),
    ("resnet152", Architecture::ResNet152),
    ("efficientnet_b0", Architecture::EfficientNetB0),
    ("efficientnet_b1", Architecture::EfficientNetB1),
    ("efficientnet_b2", Architecture::EfficientNetB2),
    ("efficientnet_b3", Architecture::EfficientNetB3),
    ("efficientnet_b4", Architecture::EfficientNetB4),
    ("efficientnet_b5", Architecture::EfficientNetB5),
    ("efficientnet_b6", Architecture::EfficientNetB6),
    ("efficientnet_b7", Architecture::EfficientNetB7),
];

impl Architecture {
    /// Canonical identifier as written in model configuration
    pub fn id(&self) -> &'static str {
        SUPPORTED
            .iter()
            .find(|(_, arch)| arch == self)
            .map(|(id, _)| *id)
            .unwrap_or("unknown")
    }

    /// All identifiers accepted by [`FromStr`]
    pub fn supported_ids() -> Vec<&'static str> {
        SUPPORTED.iter().map(|(id, _)| *id).collect()
    }

    /// Build the network with a `num_classes`-wide head, binding weights from `vb`
    pub fn build(
        &self,
        vb: VarBuilder<'static>,
        num_classes: usize,
    ) -> CandleResult<Box<dyn Module + Send + Sync>> {
        let model: Box<dyn Module + Send + Sync> = match self {
            Self::ResNet18 => Box::new(resnet::resnet18(num_classes, vb)?),
            Self::ResNet34 => Box::new(resnet::resnet34(num_classes, vb)?),
            Self::ResNet50 => Box::new(resnet::resnet50(num_classes, vb)?),
            Self::ResNet101 => Box::new(resnet::resnet101(num_classes, vb)?),
            Self::ResNet152 => Box::new(resnet::resnet152(num_classes, vb)?),
            Self::EfficientNetB0 => efficientnet_with(efficientnet::MBConvConfig::b0(), vb, num_classes)?,
            Self::EfficientNetB1 => efficientnet_with(efficientnet::MBConvConfig::b1(), vb, num_classes)?,
            Self::EfficientNetB2 => efficientnet_with(efficientnet::MBConvConfig::b2(), vb, num_classes)?,
            Self::EfficientNetB3 => efficientnet_with(efficientnet::MBConvConfig::b3(), vb, num_classes)?,
            Self::EfficientNetB4 => efficientnet_with(efficientnet::MBConvConfig::b4(), vb, num_classes)?,
            Self::EfficientNetB5 => efficientnet_with(efficientnet::MBConvConfig::b5(), vb, num_classes)?,
            Self::EfficientNetB6 => efficientnet_with(efficientnet::MBConvConfig::b6(), vb, num_classes)?,
            Self::EfficientNetB7 => efficientnet_with(efficientnet::MBConvConfig::b7(), vb, num_classes)?,
        };
        Ok(model)
    }
}

fn efficientnet_with(
    configs: Vec<efficientnet::MBConvConfig>,
    vb: VarBuilder<'static>,
    num_classes: usize,
) -> CandleResult<Box<dyn Module + Send + Sync>> {
    Ok(Box::new(efficientnet::EfficientNet::new(vb, configs, num_classes)?))
}

/// Unknown architecture identifier
#[derive(Debug, Clone, thiserror::Error)]
#[error("unsupported architecture '{id}' (supported: {supported})")]
pub struct UnknownArchitecture {
    pub id: String,
    pub supported: String,
}

impl FromStr for Architecture {
    type Err = UnknownArchitecture;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        SUPPORTED
            .iter()
            .find(|(id, _)| *id == normalized)
            .map(|(_, arch)| *arch)
            .ok_or_else(|| UnknownArchitecture {
                id: s.to_string(),
                supported: Architecture::supported_ids().join(", "),
            })
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids() {
        assert_eq!("resnet50".parse::<Architecture>().unwrap(), Architecture::ResNet50);
        assert_eq!(
            "EfficientNet-B3".parse::<Architecture>().unwrap(),
            Architecture::EfficientNetB3
        );
    }

    #[test]
    fn test_unknown_lists_supported() {
        let err = "vit_base_patch16".parse::<Architecture>().unwrap_err();
        assert_eq!(err.id, "vit_base_patch16");
        assert!(err.to_string().contains("efficientnet_b0"));
    }

    #[test]
    fn test_id_round_trips() {
        for id in Architecture::supported_ids() {
            assert_eq!(id.parse::<Architecture>().unwrap().id(), id);
        }
    }
}
