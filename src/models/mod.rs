use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Source kinds ──────────────────────────────────────────────────────────────

/// Which listing population a source belongs to. Drives the canonical price
/// precedence used by the cleaner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Auction,
    Market,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Auction => "auction",
            SourceKind::Market => "market",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Property types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Apartment,
    House,
    Commercial,
    Land,
    #[default]
    Unknown,
}

// ── Raw listings ──────────────────────────────────────────────────────────────

/// A loosely typed value as pulled off a page (or out of a stored file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

/// One page's worth of extracted fields. Every schema field is present as a
/// key; `None` means the extractor could not find it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    pub source: String,
    pub url: String,
    pub collected_at: DateTime<Utc>,
    pub fields: BTreeMap<String, Option<RawValue>>,
}

impl RawListing {
    pub fn new(source: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            url: url.into(),
            collected_at: Utc::now(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: Option<RawValue>) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// Field value, flattening "not in schema" and "not extracted" together.
    pub fn field(&self, name: &str) -> Option<&RawValue> {
        self.fields.get(name).and_then(|v| v.as_ref())
    }

    /// True when the extractor came back empty-handed for every field.
    pub fn is_empty(&self) -> bool {
        self.fields.values().all(|v| v.is_none())
    }
}

/// Outcome of one harvesting run for one source.
#[derive(Debug, Clone)]
pub struct HarvestResult {
    pub source: String,
    pub kind: SourceKind,
    pub listings: Vec<RawListing>,
    pub attempted: usize,
    pub fetch_failures: usize,
    pub extraction_failures: usize,
    pub cancelled: bool,
}

impl HarvestResult {
    pub fn failures(&self) -> usize {
        self.fetch_failures + self.extraction_failures
    }
}

// ── Clean listings ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanListing {
    pub source: String,
    pub source_kind: SourceKind,
    pub url: String,
    pub collected_at: DateTime<Utc>,
    pub title: Option<String>,
    pub price: Option<Decimal>,
    pub initial_price: Option<Decimal>,
    pub current_price: Option<Decimal>,
    /// Square meters, strictly positive when present.
    pub area: Option<f64>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub parking: Option<u32>,
    pub property_type: PropertyType,
    /// `price / area`; only set when both are present and `area > 0`.
    pub price_per_m2: Option<f64>,
    pub address: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<String>,
    pub auction_date: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
    pub features: Vec<String>,
}

// ── Datasets ──────────────────────────────────────────────────────────────────

/// Cleaned listings of a single source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub source: String,
    pub kind: SourceKind,
    pub collected_at: DateTime<Utc>,
    pub listings: Vec<CleanListing>,
}

impl Dataset {
    pub fn count(&self) -> usize {
        self.listings.len()
    }
}

impl AsRef<[CleanListing]> for Dataset {
    fn as_ref(&self) -> &[CleanListing] {
        &self.listings
    }
}

/// Concatenation of several datasets. Each listing keeps its own source tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedDataset {
    pub sources: Vec<String>,
    pub listings: Vec<CleanListing>,
}

impl CombinedDataset {
    pub fn count(&self) -> usize {
        self.listings.len()
    }
}

impl AsRef<[CleanListing]> for CombinedDataset {
    fn as_ref(&self) -> &[CleanListing] {
        &self.listings
    }
}

// ── Statistics ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStats {
    #[serde(skip)]
    pub kind: SourceKind,
    #[serde(rename = "total_imoveis")]
    pub count: usize,
    #[serde(rename = "preco_medio")]
    pub mean_price: Option<f64>,
    #[serde(rename = "preco_mediano")]
    pub median_price: Option<f64>,
    #[serde(rename = "preco_m2_medio")]
    pub mean_price_per_m2: Option<f64>,
    #[serde(rename = "preco_m2_mediano")]
    pub median_price_per_m2: Option<f64>,
    #[serde(rename = "area_media")]
    pub mean_area: Option<f64>,
}

/// Percentage differences between the two sources, relative to `baseline`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub baseline: String,
    pub other: String,
    #[serde(rename = "diferenca_preco_medio")]
    pub mean_price_diff_pct: Option<f64>,
    #[serde(rename = "diferenca_preco_m2_medio")]
    pub mean_price_per_m2_diff_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSummary {
    #[serde(flatten)]
    pub sources: BTreeMap<String, SourceStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
}
