//! Batch pipeline: baselines, normalized markers, link tables and extraction,
//! each read from the artifact cache when fresh and rebuilt from the source
//! files otherwise. The price-paid file is streamed in chunks for every pass.

use crate::analyzer::assembler::{Datasets, assemble};
use crate::analyzer::baseline::{BaselineAccumulator, BaselineTable};
use crate::analyzer::extractor::{Extraction, ExtractionSummary, Extractor};
use crate::config::AppConfig;
use crate::linker::{AreaLinker, ExactLinker, LinkTable};
use crate::model::{NormalizedMarker, PipelineError, Transaction};
use crate::normalizer::{KnownAddresses, extract_postal_code, normalize_all};
use crate::parser::{TransactionReader, load_markers};
use crate::storage::{ArtifactCache, SourceFingerprint};
use tracing::{debug, info, warn};

const BASELINES: &str = "baselines";
const MARKERS: &str = "markers";
const EXACT_LINKS: &str = "exact_links";
const AREA_LINKS: &str = "area_links";
const EXTRACTION: &str = "extraction";

/// Everything a run produces, intermediate tables included.
#[derive(Debug)]
pub struct PipelineOutput {
    pub markers: Vec<NormalizedMarker>,
    pub baselines: BaselineTable,
    pub exact: LinkTable,
    pub area: LinkTable,
    pub extraction: Extraction,
    pub summary: ExtractionSummary,
    pub datasets: Datasets,
}

pub fn run(config: &AppConfig, cache: &ArtifactCache) -> Result<PipelineOutput, PipelineError> {
    if config.rebuild {
        cache.rebuild()?;
    }

    let transactions_only = SourceFingerprint::of_files(&[&config.transactions_path])?;
    let both_sources =
        SourceFingerprint::of_files(&[&config.transactions_path, &config.markers_path])?;

    let baselines = cache.get_or_build(BASELINES, &transactions_only, || build_baselines(config))?;
    info!("Baselines cover {} area/year buckets", baselines.len());

    let markers = cache.get_or_build(MARKERS, &both_sources, || build_markers(config))?;
    let linkable = markers.iter().filter(|m| m.is_linkable()).count();
    info!("{} markers, {} linkable", markers.len(), linkable);

    let exact = cache.get_or_build(EXACT_LINKS, &both_sources, || {
        let linker = ExactLinker::new(&markers);
        let mut table = linker.empty_table();
        for_each_chunk(config, |chunk| {
            table.merge(linker.link_chunk(&chunk));
            Ok(())
        })?;
        if linker.unmatchable() > 0 {
            warn!("{} markers have no postal code or house identifier", linker.unmatchable());
        }
        Ok::<_, PipelineError>(table)
    })?;

    let area = cache.get_or_build(AREA_LINKS, &both_sources, || {
        let linker = AreaLinker::new(&markers);
        let mut table = linker.empty_table();
        for_each_chunk(config, |chunk| {
            table.merge(linker.link_chunk(&chunk));
            Ok(())
        })?;
        Ok::<_, PipelineError>(table)
    })?;
    info!(
        "Linked {} transactions to {} addresses, {} to {} areas",
        exact.ids().len(),
        exact.len(),
        area.ids().len(),
        area.len()
    );
    if exact.is_empty() {
        warn!("No marker has a postal code and house identifier; nothing can be linked");
    }

    let extractor = Extractor::new(
        &exact,
        &area,
        &markers,
        &baselines,
        config.average_type,
        config.coverage_policy,
    );
    let summary = extractor.summary().clone();
    info!(
        "Markers: {} linked, {} unlinked, {} unmatchable, {} duplicates, {} without install year",
        summary.linked,
        summary.unlinked,
        summary.unmatchable,
        summary.duplicates,
        summary.skipped_install_year
    );

    let extraction_fingerprint = both_sources
        .clone()
        .with("average", config.average_type.as_str())
        .with("coverage", config.coverage_policy.as_str());
    let extraction = cache.get_or_build(EXTRACTION, &extraction_fingerprint, || {
        let mut extraction = Extraction::default();
        for_each_chunk(config, |chunk| {
            extraction.merge(extractor.extract_chunk(&chunk)?);
            Ok(())
        })?;
        Ok::<_, PipelineError>(extraction.finish())
    })?;
    if !extraction.coverage_gaps().is_empty() {
        warn!(
            "{} markers dropped for missing baseline coverage",
            extraction.coverage_gaps().len()
        );
    }
    info!(
        "Extracted {} series and {} controls",
        extraction.series_count(),
        extraction.controls().len()
    );

    let datasets = assemble(
        &extraction,
        config.measurement,
        baselines.population(config.average_type),
    );

    Ok(PipelineOutput {
        markers,
        baselines,
        exact,
        area,
        extraction,
        summary,
        datasets,
    })
}

fn build_baselines(config: &AppConfig) -> Result<BaselineTable, PipelineError> {
    let mut accumulator = BaselineAccumulator::new();
    for_each_chunk(config, |chunk| {
        let mut partial = BaselineAccumulator::new();
        partial.record_chunk(&chunk);
        accumulator.merge(partial);
        Ok(())
    })?;
    Ok(accumulator.finish())
}

/// Normalizes markers against the houses and streets recorded for their postal codes.
fn build_markers(config: &AppConfig) -> Result<Vec<NormalizedMarker>, PipelineError> {
    let markers = load_markers(&config.markers_path)?;
    info!("Loaded {} markers from {}", markers.len(), config.markers_path);

    let mut known = KnownAddresses::watching(
        markers
            .iter()
            .filter_map(|marker| extract_postal_code(&marker.raw_address)),
    );
    for_each_chunk(config, |chunk| {
        for tx in &chunk {
            known.record(tx);
        }
        Ok(())
    })?;
    Ok(normalize_all(markers, &known))
}

fn for_each_chunk<F>(config: &AppConfig, mut process: F) -> Result<(), PipelineError>
where
    F: FnMut(Vec<Transaction>) -> Result<(), PipelineError>,
{
    let mut reader = TransactionReader::open(&config.transactions_path, config.chunk_size)?;
    while let Some(chunk) = reader.next_chunk()? {
        process(chunk)?;
    }
    debug!(
        "Read {} rows from {}, dropped {}",
        reader.rows_read(),
        config.transactions_path,
        reader.dropped()
    );
    Ok(())
}
