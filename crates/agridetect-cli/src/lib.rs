//! AgriDetect command-line tool
//!
//! Composition root for the inference library: loads the model configuration,
//! owns the model cache, decodes uploads and renders diagnoses.

pub mod cli;
pub mod render;
pub mod settings;

pub use cli::{Cli, Command};
