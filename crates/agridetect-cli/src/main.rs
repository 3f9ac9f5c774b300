//! AgriDetect
//!
//! Leaf-disease diagnosis from the command line. Each crop category maps to
//! its own classifier model; models load on first use and stay cached for the
//! life of the process.

use agridetect_cli::render::{categories_json, categories_text, DiagnosisReport};
use agridetect_cli::settings::{load_image, load_registry};
use agridetect_cli::{Cli, Command};
use agridetect_inference::{Dispatcher, ModelCache, RuntimeLoader};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose);
    describe_metrics();

    let registry = load_registry(&cli)
        .with_context(|| format!("loading model configuration {}", cli.config.display()))?;
    info!(
        categories = registry.models.len(),
        models_dir = %registry.models_dir.display(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Categories { json } => {
            if json {
                println!("{}", categories_json(&registry)?);
            } else {
                print!("{}", categories_text(&registry));
            }
            Ok(())
        }
        Command::Check { preload } => {
            let count = registry.models.len();
            let dispatcher = build_dispatcher(registry)?;
            if preload {
                dispatcher.preload_all().await?;
                println!("{} categories configured, all models loaded", count);
            } else {
                println!("{} categories configured", count);
            }
            Ok(())
        }
        Command::Diagnose {
            category,
            image,
            top,
            json,
            max_image_bytes,
        } => {
            let dispatcher = build_dispatcher(registry)?;
            diagnose(&dispatcher, &category, &image, top, json, max_image_bytes).await
        }
    }
}

/// Dispatcher over a fresh cache owned by this process
fn build_dispatcher(registry: agridetect_inference::ModelRegistry) -> Result<Dispatcher> {
    let loader = RuntimeLoader::from_registry(&registry)?;
    Ok(Dispatcher::new(
        registry,
        Arc::new(loader),
        Arc::new(ModelCache::new()),
    ))
}

async fn diagnose(
    dispatcher: &Dispatcher,
    category: &str,
    image: &Path,
    top: usize,
    json: bool,
    max_image_bytes: u64,
) -> Result<()> {
    let display_name = match dispatcher.resolve_config(category) {
        Ok(config) => config.display_name().to_string(),
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Err(e.into());
        }
    };

    let outcome = match load_image(image, max_image_bytes) {
        Ok(image) => dispatcher.diagnose(category, &image).await,
        Err(e) => Err(e),
    };
    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Err(e.into());
        }
    };

    let report = DiagnosisReport::new(category, &display_name, &result, top);
    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.to_text());
    }
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("agridetect=debug,agridetect_inference=debug,agridetect_cli=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("agridetect=info,agridetect_inference=info,agridetect_cli=info")
        })
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Register metric descriptions with whatever recorder is installed
fn describe_metrics() {
    metrics::describe_counter!(
        "agridetect_model_loads_total",
        "Model loads by backend and status"
    );
    metrics::describe_counter!(
        "agridetect_inference_total",
        "Successful diagnoses by category"
    );
    metrics::describe_histogram!(
        "agridetect_inference_latency_us",
        metrics::Unit::Microseconds,
        "End-to-end diagnosis latency in microseconds by category"
    );
    metrics::describe_counter!("agridetect_errors_total", "Diagnosis failures by error kind");
}
