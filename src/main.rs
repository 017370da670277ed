mod analyzer;
mod config;
mod linker;
mod model;
mod normalizer;
mod parser;
mod pipeline;
mod report;
mod scraper;
mod storage;
mod utils;

use crate::parser::{RegistryParser, write_markers};
use crate::scraper::{ScraperImpl, scrape_registry};
use config::{AppConfig, load_config};
use model::PipelineError;
use pipeline::PipelineOutput;
use std::path::Path;
use storage::{ArtifactCache, SqliteStorage};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Set panic hook to log details about any panic
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Panic occurred: {:?}", panic_info);
    }));

    // Load configuration from file
    let config: AppConfig = match load_config("config.json") {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Config load error: {}", e);
            return;
        }
    };

    if !Path::new(&config.markers_path).exists() {
        let Some(url) = config.registry_url.as_deref() else {
            error!(
                "Marker file {} not found and no registry_url configured",
                config.markers_path
            );
            return;
        };
        match fetch_markers(url, &config.markers_path).await {
            Ok(count) => info!("Wrote {} markers to {}", count, config.markers_path),
            Err(e) => {
                error!("Registry scrape failed: {}", e);
                return;
            }
        }
    }

    // The pipeline is synchronous file and SQLite work; keep it off the runtime threads.
    let pipeline_config = config.clone();
    let result = tokio::task::spawn_blocking(move || run_pipeline(&pipeline_config)).await;

    match result {
        Ok(Ok(output)) => log_datasets(&output),
        Ok(Err(e)) => error!("Pipeline failed: {}", e),
        Err(e) => error!("Pipeline task failed: {}", e),
    }
}

/// Scrapes the registry and saves it as the marker file.
async fn fetch_markers(url: &str, path: &str) -> Result<usize, Box<dyn std::error::Error>> {
    let fetcher = ScraperImpl::new()?;
    let markers = scrape_registry(&fetcher, &RegistryParser::new(), url).await?;
    write_markers(path, &markers)?;
    Ok(markers.len())
}

fn run_pipeline(config: &AppConfig) -> Result<PipelineOutput, PipelineError> {
    info!("Opening artifact cache {}", config.cache_path);
    let cache = ArtifactCache::new(SqliteStorage::open(&config.cache_path)?);
    let output = pipeline::run(config, &cache)?;

    if let Some(path) = &config.report_path {
        let rows = report::write_report(path, &output.extraction, &output.markers)?;
        info!("Wrote {} report rows to {}", rows, path);
    }
    Ok(output)
}

fn log_datasets(output: &PipelineOutput) {
    let datasets = &output.datasets;
    info!("Repeated-measures pairs: {}", datasets.repeated.before.len());
    info!("Single-sample observations: {}", datasets.single.sample.len());
    match datasets.single.population {
        Some(p) => info!(
            "Population: mean = {:.4}, variance = {:.4}, n = {}",
            p.mean, p.variance, p.count
        ),
        None => warn!("No population parameters: baseline table is empty"),
    }
    info!(
        "Independent samples: {} marker sales, {} controls",
        datasets.independent.markers.len(),
        datasets.independent.controls.len()
    );

    for (name, check) in datasets.checks() {
        if check.is_sufficient() {
            info!("{} dataset: {}", name, check);
        } else {
            warn!("{} dataset: {}", name, check);
        }
    }
}
