use crate::config::CleaningConfig;
use crate::models::{CleanListing, Dataset, PropertyType, RawListing, RawValue, SourceKind};
use crate::scraper::parsers::{parse_count, sanitize_number};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Nothing left to compute statistics over.
#[derive(Debug, Error)]
#[error("source `{source_name}`: none of {total} listings has both a usable price and area")]
pub struct InsufficientDataError {
    pub source_name: String,
    pub total: usize,
}

// ── Coercion ──────────────────────────────────────────────────────────────────

/// Number or nothing. Never fails.
pub fn coerce_number(v: Option<&RawValue>) -> Option<f64> {
    match v? {
        RawValue::Number(n) => Some(*n).filter(|n| n.is_finite()),
        RawValue::Text(s) => sanitize_number(s),
        RawValue::List(_) => None,
    }
}

pub fn coerce_count(v: Option<&RawValue>) -> Option<u32> {
    match v? {
        RawValue::Number(n) if n.is_finite() && *n >= 0.0 && n.fract() == 0.0 => n.to_u32(),
        RawValue::Number(_) => None,
        RawValue::Text(s) => parse_count(s),
        RawValue::List(_) => None,
    }
}

/// Non-negative amount rounded to cents.
pub fn coerce_money(v: Option<&RawValue>) -> Option<Decimal> {
    let n = coerce_number(v).filter(|n| *n >= 0.0)?;
    Decimal::from_f64(n).map(|d| d.round_dp(2))
}

fn coerce_text(v: Option<&RawValue>) -> Option<String> {
    let s = match v? {
        RawValue::Text(s) => s.trim().to_string(),
        RawValue::Number(n) => n.to_string(),
        RawValue::List(items) => items.join("; "),
    };
    if s.is_empty() { None } else { Some(s) }
}

fn coerce_list(v: Option<&RawValue>) -> Vec<String> {
    match v {
        Some(RawValue::List(items)) => items.clone(),
        Some(RawValue::Text(s)) => s
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

// ── Percentiles ───────────────────────────────────────────────────────────────

/// Linear-interpolation percentile of an ascending slice, `q` in [0, 1].
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    Some(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}

/// Inclusive price-per-area acceptance range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierBounds {
    pub low: f64,
    pub high: f64,
}

impl OutlierBounds {
    pub fn from_values(values: &[f64], lower_q: f64, upper_q: f64) -> Option<Self> {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Some(Self {
            low: percentile(&sorted, lower_q)?,
            high: percentile(&sorted, upper_q)?,
        })
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.low && v <= self.high
    }
}

/// Drop listings whose price per m² falls outside `bounds`. Listings without
/// a price per m² are kept.
pub fn reject_outliers(listings: Vec<CleanListing>, bounds: &OutlierBounds) -> (Vec<CleanListing>, usize) {
    let before = listings.len();
    let kept: Vec<CleanListing> = listings
        .into_iter()
        .filter(|l| l.price_per_m2.is_none_or(|v| bounds.contains(v)))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

// ── Cleaner ───────────────────────────────────────────────────────────────────

pub struct Cleaner {
    lower_percentile: f64,
    upper_percentile: f64,
    synonyms: BTreeMap<String, PropertyType>,
}

impl Cleaner {
    pub fn new(config: &CleaningConfig) -> Self {
        Self {
            lower_percentile: config.lower_percentile,
            upper_percentile: config.upper_percentile,
            synonyms: config
                .synonyms
                .iter()
                .map(|(k, v)| (normalise_label(k), *v))
                .collect(),
        }
    }

    pub fn canonical_property_type(&self, label: &str) -> PropertyType {
        self.synonyms
            .get(&normalise_label(label))
            .copied()
            .unwrap_or(PropertyType::Unknown)
    }

    /// Coerce, derive price per m² and reject outliers for one source.
    /// Percentile bounds come from this batch alone.
    pub fn clean(
        &self,
        raw: Vec<RawListing>,
        source: &str,
        kind: SourceKind,
    ) -> Result<Dataset, InsufficientDataError> {
        let total = raw.len();
        let collected_at = raw.iter().map(|r| r.collected_at).min().unwrap_or_else(Utc::now);

        let listings: Vec<CleanListing> = raw.iter().map(|r| self.coerce(r, source, kind)).collect();

        let per_m2: Vec<f64> = listings.iter().filter_map(|l| l.price_per_m2).collect();
        if per_m2.is_empty() {
            warn!("{}: no usable price/area pairs in {} listings", source, total);
            return Err(InsufficientDataError {
                source_name: source.to_string(),
                total,
            });
        }

        let listings = match OutlierBounds::from_values(&per_m2, self.lower_percentile, self.upper_percentile) {
            Some(bounds) => {
                let (kept, dropped) = reject_outliers(listings, &bounds);
                debug!(
                    "{}: price/m² bounds [{:.2}, {:.2}], {} outliers dropped",
                    source, bounds.low, bounds.high, dropped
                );
                kept
            }
            None => listings,
        };

        info!(
            "{}: {} raw → {} clean listings ({} with price/m²)",
            source,
            total,
            listings.len(),
            listings.iter().filter(|l| l.price_per_m2.is_some()).count()
        );

        Ok(Dataset {
            source: source.to_string(),
            kind,
            collected_at,
            listings,
        })
    }

    fn coerce(&self, raw: &RawListing, source: &str, kind: SourceKind) -> CleanListing {
        let f = |name: &str| raw.field(name);

        let initial_price = coerce_money(f("initial_price"));
        let current_price = coerce_money(f("current_price"));
        let listed_price = coerce_money(f("price"));
        let price = match kind {
            SourceKind::Auction => current_price.or(initial_price).or(listed_price),
            SourceKind::Market => listed_price,
        };

        let area = coerce_number(f("area")).filter(|a| *a > 0.0);
        let price_per_m2 = match (price.and_then(|p| p.to_f64()), area) {
            (Some(p), Some(a)) => Some(p / a),
            _ => None,
        };

        CleanListing {
            source: source.to_string(),
            source_kind: kind,
            url: raw.url.clone(),
            collected_at: raw.collected_at,
            title: coerce_text(f("title")),
            price,
            initial_price,
            current_price,
            area,
            bedrooms: coerce_count(f("bedrooms")),
            bathrooms: coerce_count(f("bathrooms")),
            parking: coerce_count(f("parking")),
            property_type: coerce_text(f("property_type"))
                .map(|t| self.canonical_property_type(&t))
                .unwrap_or_default(),
            price_per_m2,
            address: coerce_text(f("address")),
            neighborhood: coerce_text(f("neighborhood")),
            city: coerce_text(f("city")),
            auction_date: coerce_text(f("auction_date")),
            status: coerce_text(f("status")),
            description: coerce_text(f("description")),
            features: coerce_list(f("features")),
        }
    }
}

/// Lowercase, trim, collapse inner whitespace.
fn normalise_label(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cleaner() -> Cleaner {
        Cleaner::new(&CleaningConfig::default())
    }

    fn listing(i: usize, price: Option<RawValue>, area: Option<RawValue>) -> RawListing {
        RawListing::new("market", format!("https://x.test/imovel/{:03}", i))
            .with_field("price", price)
            .with_field("area", area)
    }

    fn num(n: f64) -> Option<RawValue> {
        Some(RawValue::Number(n))
    }

    fn text(s: &str) -> Option<RawValue> {
        Some(RawValue::Text(s.to_string()))
    }

    #[test]
    fn test_percentile_matches_linear_interpolation() {
        let v: Vec<f64> = (1..=100).map(f64::from).collect();
        assert!((percentile(&v, 0.01).unwrap() - 1.99).abs() < 1e-9);
        assert!((percentile(&v, 0.99).unwrap() - 99.01).abs() < 1e-9);
        assert_eq!(percentile(&[5.0], 0.99), Some(5.0));
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn test_no_price_per_m2_without_positive_area() {
        let raw = vec![
            listing(0, num(100_000.0), num(50.0)),
            listing(1, num(100_000.0), num(0.0)),
            listing(2, num(100_000.0), num(-4.0)),
            listing(3, num(100_000.0), None),
            listing(4, num(100_000.0), text("área não informada")),
        ];
        let ds = cleaner().clean(raw, "market", SourceKind::Market).unwrap();
        assert_eq!(ds.count(), 5);
        for l in &ds.listings {
            if l.price_per_m2.is_some() {
                assert!(l.area.is_some_and(|a| a > 0.0));
            }
        }
        assert_eq!(ds.listings.iter().filter(|l| l.price_per_m2.is_some()).count(), 1);
        assert_eq!(ds.listings[0].price_per_m2, Some(2000.0));
    }

    #[test]
    fn test_outliers_rejected_per_source() {
        let mut raw: Vec<RawListing> = (0..100)
            .map(|i| listing(i, num(100_000.0 + 1_000.0 * i as f64), num(100.0)))
            .collect();
        raw.push(listing(100, num(90_000_000.0), num(10.0)));
        raw.push(listing(101, num(1_000.0), num(500.0)));

        let ppa: Vec<f64> = raw
            .iter()
            .map(|r| coerce_number(r.field("price")).unwrap() / coerce_number(r.field("area")).unwrap())
            .collect();
        let bounds = OutlierBounds::from_values(&ppa, 0.01, 0.99).unwrap();

        let ds = cleaner().clean(raw, "market", SourceKind::Market).unwrap();
        assert!(!ds.listings.iter().any(|l| l.url.ends_with("/100") || l.url.ends_with("/101")));
        for l in &ds.listings {
            assert!(bounds.contains(l.price_per_m2.unwrap()));
        }

        let before = ds.listings.len();
        let (again, dropped) = reject_outliers(ds.listings, &bounds);
        assert_eq!(dropped, 0);
        assert_eq!(again.len(), before);
    }

    #[test]
    fn test_listing_without_area_survives_rejection() {
        let mut raw: Vec<RawListing> = (0..10)
            .map(|i| listing(i, num(200_000.0 + i as f64), num(80.0)))
            .collect();
        raw.push(listing(10, num(999_999_999.0), None));
        let ds = cleaner().clean(raw, "market", SourceKind::Market).unwrap();
        let kept = ds.listings.iter().find(|l| l.url.ends_with("/010")).unwrap();
        assert!(kept.price_per_m2.is_none());
        assert!(kept.price.is_some());
    }

    #[test]
    fn test_insufficient_data() {
        let raw = vec![listing(0, None, num(50.0)), listing(1, num(10.0), None)];
        let err = cleaner().clean(raw, "market", SourceKind::Market).unwrap_err();
        assert_eq!(err.source_name, "market");
        assert_eq!(err.total, 2);
        assert!(cleaner().clean(vec![], "market", SourceKind::Market).is_err());
    }

    #[test]
    fn test_auction_price_precedence() {
        let both = RawListing::new("auction", "u1")
            .with_field("initial_price", text("R$ 200.000,00"))
            .with_field("current_price", text("R$ 150.000,00"))
            .with_field("area", num(50.0));
        let initial_only = RawListing::new("auction", "u2")
            .with_field("initial_price", text("R$ 200.000,00"))
            .with_field("current_price", None)
            .with_field("area", num(50.0));

        let ds = Cleaner::new(&CleaningConfig {
            lower_percentile: 0.0,
            upper_percentile: 1.0,
            ..CleaningConfig::default()
        })
        .clean(vec![both, initial_only], "auction", SourceKind::Auction)
        .unwrap();

        assert_eq!(ds.listings[0].price, Some(Decimal::new(150_000, 0)));
        assert_eq!(ds.listings[0].price_per_m2, Some(3000.0));
        assert_eq!(ds.listings[1].price, Some(Decimal::new(200_000, 0)));
    }

    #[test]
    fn test_property_type_canonicalisation() {
        let c = cleaner();
        assert_eq!(c.canonical_property_type("  Apartamento "), PropertyType::Apartment);
        assert_eq!(c.canonical_property_type("CASA"), PropertyType::House);
        assert_eq!(c.canonical_property_type("Sala   Comercial"), PropertyType::Commercial);
        assert_eq!(c.canonical_property_type("Terreno"), PropertyType::Land);
        assert_eq!(c.canonical_property_type("fazenda"), PropertyType::Unknown);
    }

    #[test]
    fn test_unrecognised_type_is_kept_as_unknown() {
        let raw = vec![
            listing(0, num(100_000.0), num(50.0)).with_field("property_type", text("Chácara")),
            listing(1, num(100_000.0), num(50.0)),
        ];
        let ds = cleaner().clean(raw, "market", SourceKind::Market).unwrap();
        assert_eq!(ds.count(), 2);
        assert!(ds.listings.iter().all(|l| l.property_type == PropertyType::Unknown));
    }

    #[test]
    fn test_coercion_never_panics_on_junk() {
        assert_eq!(coerce_number(Some(&RawValue::List(vec!["1".into()]))), None);
        assert_eq!(coerce_number(Some(&RawValue::Number(f64::NAN))), None);
        assert_eq!(coerce_count(Some(&RawValue::Number(2.5))), None);
        assert_eq!(coerce_count(Some(&RawValue::Number(3.0))), Some(3));
        assert_eq!(coerce_count(text("2 banheiros").as_ref()), Some(2));
        assert_eq!(coerce_money(num(-5.0).as_ref()), None);
        assert_eq!(coerce_money(text("R$ 1.234,567").as_ref()), Some(Decimal::new(123457, 2)));
    }
}
