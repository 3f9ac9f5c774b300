//! Command-line arguments

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Uploads larger than this are rejected before decoding
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "agridetect")]
#[command(about = "Diagnose leaf diseases with per-crop classifier models", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Model configuration file (YAML or JSON)
    #[arg(
        short,
        long,
        env = "AGRIDETECT_CONFIG",
        default_value = "config/model_config.yaml",
        global = true
    )]
    pub config: PathBuf,

    /// Directory that relative weight paths are resolved against
    #[arg(long, env = "AGRIDETECT_MODELS_DIR", global = true)]
    pub models_dir: Option<PathBuf>,

    /// Device for Torch models (cpu, cuda, metal)
    #[arg(long, env = "AGRIDETECT_DEVICE", global = true)]
    pub device: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a leaf image through the model for a crop category
    Diagnose {
        /// Crop category key, e.g. rice_potato
        category: String,

        /// Leaf image (JPEG or PNG)
        image: PathBuf,

        /// Number of classes to show
        #[arg(short = 'n', long, default_value_t = 3)]
        top: usize,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Maximum image file size in bytes
        #[arg(long, default_value_t = DEFAULT_MAX_IMAGE_BYTES)]
        max_image_bytes: u64,
    },

    /// List configured crop categories
    Categories {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the model configuration
    Check {
        /// Also load every model
        #[arg(long)]
        preload: bool,
    },
}
