//! Merging cleaned datasets and computing comparative statistics.
//!
//! All statistics are computed over sorted values, so they do not depend on
//! listing order. The comparison section only exists when exactly two
//! sources are present.

use crate::models::{CleanListing, CombinedDataset, Comparison, Dataset, SourceKind, SourceStats, StatisticsSummary};
use rust_decimal::prelude::ToPrimitive;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Concatenate datasets in the given order. Listings are moved, not altered.
pub fn combine(datasets: Vec<Dataset>) -> CombinedDataset {
    let mut sources = Vec::with_capacity(datasets.len());
    let mut listings = Vec::with_capacity(datasets.iter().map(Dataset::count).sum());

    for ds in datasets {
        debug!("combining {} listings from {}", ds.count(), ds.source);
        if !sources.contains(&ds.source) {
            sources.push(ds.source);
        }
        listings.extend(ds.listings);
    }

    info!("Combined dataset: {} listings from {} sources", listings.len(), sources.len());
    CombinedDataset { sources, listings }
}

/// Fresh summary of a dataset or combined dataset.
pub fn summarize(data: &impl AsRef<[CleanListing]>) -> StatisticsSummary {
    let mut groups: BTreeMap<&str, Vec<&CleanListing>> = BTreeMap::new();
    for l in data.as_ref() {
        groups.entry(l.source.as_str()).or_default().push(l);
    }

    let sources: BTreeMap<String, SourceStats> = groups
        .into_iter()
        .map(|(name, listings)| (name.to_string(), source_stats(&listings)))
        .collect();

    let comparison = compare(&sources);
    StatisticsSummary { sources, comparison }
}

fn source_stats(listings: &[&CleanListing]) -> SourceStats {
    let prices = sorted(listings.iter().filter_map(|l| l.price.and_then(|p| p.to_f64())));
    let per_m2 = sorted(listings.iter().filter_map(|l| l.price_per_m2));
    let areas = sorted(listings.iter().filter_map(|l| l.area));

    SourceStats {
        kind: listings.first().map(|l| l.source_kind).unwrap_or(SourceKind::Market),
        count: listings.len(),
        mean_price: mean(&prices),
        median_price: median(&prices),
        mean_price_per_m2: mean(&per_m2),
        median_price_per_m2: median(&per_m2),
        mean_area: mean(&areas),
    }
}

/// Percentage differences relative to the baseline source: the market-kind
/// one when the kinds differ, otherwise the one whose name sorts last.
fn compare(sources: &BTreeMap<String, SourceStats>) -> Option<Comparison> {
    if sources.len() != 2 {
        debug!("{} sources present, skipping comparison", sources.len());
        return None;
    }

    let mut pair: Vec<(&String, &SourceStats)> = sources.iter().collect();
    let (first, second) = (pair[0], pair[1]);
    if first.1.kind == SourceKind::Market && second.1.kind != SourceKind::Market {
        pair.swap(0, 1);
    }
    let (other, baseline) = (pair[0], pair[1]);

    Some(Comparison {
        baseline: baseline.0.clone(),
        other: other.0.clone(),
        mean_price_diff_pct: pct_diff(baseline.1.mean_price, other.1.mean_price),
        mean_price_per_m2_diff_pct: pct_diff(baseline.1.mean_price_per_m2, other.1.mean_price_per_m2),
    })
}

/// `(baseline − other) / baseline × 100`
pub fn pct_diff(baseline: Option<f64>, other: Option<f64>) -> Option<f64> {
    let (b, o) = (baseline?, other?);
    if b == 0.0 {
        return None;
    }
    Some((b - o) / b * 100.0)
}

fn sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.collect();
    v.sort_by(f64::total_cmp);
    v
}

fn mean(sorted: &[f64]) -> Option<f64> {
    if sorted.is_empty() {
        None
    } else {
        Some(sorted.iter().sum::<f64>() / sorted.len() as f64)
    }
}

fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}
