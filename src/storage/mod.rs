//! Artifact export: datasets as CSV + JSON, summaries as JSON.
//!
//! This is the only place that touches the filesystem on the output side.
//! File names carry one timestamp per exporter so a run's artifacts group
//! together.

use crate::models::{CleanListing, PropertyType, RawListing, SourceKind, StatisticsSummary};
use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Flat CSV row for one listing.
#[derive(Debug, Serialize)]
struct ListingRow<'a> {
    source: &'a str,
    source_kind: SourceKind,
    url: &'a str,
    collected_at: String,
    title: Option<&'a str>,
    property_type: PropertyType,
    price: Option<Decimal>,
    initial_price: Option<Decimal>,
    current_price: Option<Decimal>,
    area: Option<f64>,
    price_per_m2: Option<f64>,
    bedrooms: Option<u32>,
    bathrooms: Option<u32>,
    parking: Option<u32>,
    address: Option<&'a str>,
    neighborhood: Option<&'a str>,
    city: Option<&'a str>,
    auction_date: Option<&'a str>,
    status: Option<&'a str>,
    description: Option<&'a str>,
    features: String,
}

impl<'a> From<&'a CleanListing> for ListingRow<'a> {
    fn from(l: &'a CleanListing) -> Self {
        Self {
            source: &l.source,
            source_kind: l.source_kind,
            url: &l.url,
            collected_at: l.collected_at.to_rfc3339(),
            title: l.title.as_deref(),
            property_type: l.property_type,
            price: l.price,
            initial_price: l.initial_price,
            current_price: l.current_price,
            area: l.area,
            price_per_m2: l.price_per_m2,
            bedrooms: l.bedrooms,
            bathrooms: l.bathrooms,
            parking: l.parking,
            address: l.address.as_deref(),
            neighborhood: l.neighborhood.as_deref(),
            city: l.city.as_deref(),
            auction_date: l.auction_date.as_deref(),
            status: l.status.as_deref(),
            description: l.description.as_deref(),
            features: l.features.join("; "),
        }
    }
}

pub struct Exporter {
    dir: PathBuf,
    stamp: String,
}

impl Exporter {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {:?}", dir))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            stamp: Utc::now().format("%Y%m%d_%H%M%S").to_string(),
        })
    }

    fn path(&self, name: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.{}", name, self.stamp, ext))
    }

    /// `<name>_<stamp>.csv` and `<name>_<stamp>.json`
    pub fn write_listings(&self, name: &str, listings: &[CleanListing]) -> Result<(PathBuf, PathBuf)> {
        let csv_path = self.path(name, "csv");
        let mut wtr = csv::Writer::from_path(&csv_path)
            .with_context(|| format!("Failed to create {:?}", csv_path))?;
        for l in listings {
            wtr.serialize(ListingRow::from(l))?;
        }
        wtr.flush()?;

        let json_path = self.write_json(name, listings)?;
        info!("{}: {} listings → {:?}, {:?}", name, listings.len(), csv_path, json_path);
        Ok((csv_path, json_path))
    }

    /// Raw listings as JSON, loadable again by `loader::load_raw`.
    pub fn write_raw(&self, name: &str, listings: &[RawListing]) -> Result<PathBuf> {
        let path = self.write_json(&format!("{}_raw", name), listings)?;
        info!("{}: {} raw listings → {:?}", name, listings.len(), path);
        Ok(path)
    }

    pub fn write_summary(&self, summary: &StatisticsSummary) -> Result<PathBuf> {
        let path = self.write_json("estatisticas", summary)?;
        info!("Statistics → {:?}", path);
        Ok(path)
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.path(name, "json");
        let file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)
            .with_context(|| format!("Failed to write {:?}", path))?;
        writer.flush()?;
        Ok(path)
    }
}
