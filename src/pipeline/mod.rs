//! Pipeline orchestrator: harvesters → cleaner → aggregator.
//!
//! ## Run modes
//!
//! `run()`, live mode:
//!   1. Harvest every enabled source concurrently (one task per source,
//!      bounded fetch concurrency inside each).
//!   2. Clean each source's raw listings independently.
//!   3. Combine and summarize.
//!   A cancelled run still cleans and summarizes whatever was collected.
//!
//! `analyze()`, offline mode: steps 2 and 3 over raw listings loaded from
//!   disk or generated by the demo.

use crate::analysis::{combine, summarize};
use crate::config::AppConfig;
use crate::models::{CombinedDataset, Dataset, HarvestResult, RawListing, SourceKind, StatisticsSummary};
use crate::scraper::SourceHarvester;
use crate::scraper::cleaner::Cleaner;
use crate::scraper::http_client::PageSource;
use anyhow::{Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Raw listings of one source, ready for cleaning.
#[derive(Debug, Clone)]
pub struct RawBatch {
    pub source: String,
    pub kind: SourceKind,
    pub listings: Vec<RawListing>,
}

impl From<HarvestResult> for RawBatch {
    fn from(r: HarvestResult) -> Self {
        Self {
            source: r.source,
            kind: r.kind,
            listings: r.listings,
        }
    }
}

/// Coverage of one harvesting run, e.g. "41 of 50 listings extracted".
#[derive(Debug, Clone, PartialEq)]
pub struct Coverage {
    pub source: String,
    pub attempted: usize,
    pub extracted: usize,
    pub fetch_failures: usize,
    pub extraction_failures: usize,
    pub cancelled: bool,
}

impl From<&HarvestResult> for Coverage {
    fn from(r: &HarvestResult) -> Self {
        Self {
            source: r.source.clone(),
            attempted: r.attempted,
            extracted: r.listings.len(),
            fetch_failures: r.fetch_failures,
            extraction_failures: r.extraction_failures,
            cancelled: r.cancelled,
        }
    }
}

#[derive(Debug)]
pub struct PipelineReport {
    pub datasets: Vec<Dataset>,
    /// Sources that produced nothing usable, with the reason.
    pub skipped: Vec<(String, String)>,
    pub combined: CombinedDataset,
    pub summary: StatisticsSummary,
}

/// Everything a live run collected. The raw batches and coverage survive
/// even when no source yields statistically usable listings.
#[derive(Debug)]
pub struct HarvestRun {
    pub batches: Vec<RawBatch>,
    pub coverage: Vec<Coverage>,
    pub analysis: Result<PipelineReport>,
}

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Harvest the enabled sources (restricted to `only` when non-empty).
    pub async fn run(&self, only: &[String], cancel: &CancellationToken) -> Result<HarvestRun> {
        let mut harvesters = Vec::new();
        for source in self.config.sources.iter().filter(|s| s.enabled) {
            if !only.is_empty() && !only.contains(&source.name) {
                continue;
            }
            harvesters.push(SourceHarvester::from_config(
                source,
                &self.config.fetch,
                self.config.pipeline.concurrency,
            )?);
        }

        if harvesters.is_empty() {
            bail!("No enabled source matches {:?}", only);
        }

        Ok(self.harvest(harvesters, cancel).await)
    }

    /// Run the given harvesters in parallel, then analyze what they collected.
    pub async fn harvest<S: PageSource + 'static>(
        &self,
        harvesters: Vec<SourceHarvester<S>>,
        cancel: &CancellationToken,
    ) -> HarvestRun {
        let results = harvest_all(harvesters, cancel).await;
        let coverage: Vec<Coverage> = results.iter().map(Coverage::from).collect();
        let batches: Vec<RawBatch> = results.into_iter().map(RawBatch::from).collect();
        let analysis = self.analyze(batches.clone());

        HarvestRun {
            batches,
            coverage,
            analysis,
        }
    }

    /// Clean each batch on its own, then combine and summarize.
    pub fn analyze(&self, batches: Vec<RawBatch>) -> Result<PipelineReport> {
        let cleaner = Cleaner::new(&self.config.cleaning);
        let mut datasets = Vec::new();
        let mut skipped = Vec::new();

        for batch in batches {
            match cleaner.clean(batch.listings, &batch.source, batch.kind) {
                Ok(ds) => datasets.push(ds),
                Err(e) => {
                    warn!("{:#}", e);
                    skipped.push((batch.source, e.to_string()));
                }
            }
        }

        if datasets.is_empty() {
            bail!("No source produced statistically usable listings");
        }

        let combined = combine(datasets.clone());
        let summary = summarize(&combined);

        Ok(PipelineReport {
            datasets,
            skipped,
            combined,
            summary,
        })
    }
}

/// One task per source. Sources share nothing mutable, so they run in
/// parallel; results come back in the order the harvesters were given.
pub async fn harvest_all<S: PageSource + 'static>(
    harvesters: Vec<SourceHarvester<S>>,
    cancel: &CancellationToken,
) -> Vec<HarvestResult> {
    let mut handles = Vec::with_capacity(harvesters.len());

    for harvester in harvesters {
        let cancel = cancel.clone();
        let name = harvester.name().to_string();
        let handle = tokio::spawn(async move { harvester.harvest(&cancel).await });
        handles.push((name, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        match handle.await {
            Ok(result) => {
                info!(
                    "{}: {} of {} listings extracted, {} failed{}",
                    name,
                    result.listings.len(),
                    result.attempted,
                    result.failures(),
                    if result.cancelled { " (cancelled)" } else { "" }
                );
                results.push(result);
            }
            Err(e) => error!("Harvest task panic for {}: {}", name, e),
        }
    }
    results
}
