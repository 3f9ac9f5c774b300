//! AgriDetect Core
//!
//! Types and errors shared by the inference library and the command-line tool.
//!
//! This crate provides:
//! - The error taxonomy (configuration, model load, inference) and `Result` alias
//! - The normalized `InferenceResult` contract returned for every diagnosis

pub mod error;
pub mod types;

pub use error::{BoxError, Error, Result};
pub use types::{ClassScore, InferenceResult};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{ClassScore, InferenceResult};
}
