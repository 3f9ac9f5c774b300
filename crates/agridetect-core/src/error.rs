//! Error types for AgriDetect

/// Result type alias using AgriDetect's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed underlying cause carried by load and inference errors
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core error type for AgriDetect operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown category key or malformed model configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Model weights could not be read, parsed, or bound to an architecture
    #[error("failed to load model for category '{category}': {source}")]
    ModelLoad {
        category: String,
        #[source]
        source: BoxError,
    },

    /// Forward pass or output-shape failure
    #[error("inference failed for category '{category}': {source}")]
    Inference {
        category: String,
        #[source]
        source: BoxError,
    },

    /// Undecodable or unusable input image
    #[error("image error: {0}")]
    Image(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML/JSON configuration parse errors
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new model load error wrapping its cause
    pub fn model_load(category: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ModelLoad {
            category: category.into(),
            source: source.into(),
        }
    }

    /// Create a new inference error wrapping its cause
    pub fn inference(category: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Inference {
            category: category.into(),
            source: source.into(),
        }
    }

    /// Create a new image error
    pub fn image(msg: impl Into<String>) -> Self {
        Self::Image(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short stable name, used as a log field and metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) | Self::ConfigParse(_) => "configuration",
            Self::ModelLoad { .. } => "model_load",
            Self::Inference { .. } => "inference",
            Self::Image(_) => "image",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }

    /// Generic message suitable for end users.
    ///
    /// Detail stays in the `Display` output, which callers log.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Configuration(_) | Self::ConfigParse(_) => {
                "This crop category is not available right now."
            }
            Self::ModelLoad { .. } => "The diagnosis model could not be loaded. Please try again.",
            Self::Inference { .. } => "The image could not be analyzed. Please try again.",
            Self::Image(_) => "The uploaded file is not a usable leaf image.",
            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => {
                "Something went wrong while analyzing the image."
            }
        }
    }
}
