//! Synthetic listings for running the offline path without a network.
//!
//! Values are rendered as text the way listing pages print them
//! ("R$ 312.450,00", "78 m²"), so the demo exercises the same coercion as a
//! live harvest.

use crate::models::{RawListing, RawValue, SourceKind};
use crate::pipeline::RawBatch;
use crate::utils::fmt_brl;
use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const PROPERTY_TYPES: [&str; 3] = ["Apartamento", "Casa", "Comercial"];
const CITIES: [&str; 4] = ["São Paulo", "Rio de Janeiro", "Goiânia", "Brasília"];

/// Mean and standard deviation of one generated quantity.
#[derive(Debug, Clone, Copy)]
struct Spread {
    mean: f64,
    std_dev: f64,
}

struct Profile {
    source: &'static str,
    kind: SourceKind,
    host: &'static str,
    price: Spread,
    area: Spread,
}

const AUCTION: Profile = Profile {
    source: "auction",
    kind: SourceKind::Auction,
    host: "leilao.demo",
    price: Spread { mean: 300_000.0, std_dev: 100_000.0 },
    area: Spread { mean: 80.0, std_dev: 30.0 },
};

const MARKET: Profile = Profile {
    source: "market",
    kind: SourceKind::Market,
    host: "mercado.demo",
    price: Spread { mean: 500_000.0, std_dev: 150_000.0 },
    area: Spread { mean: 85.0, std_dev: 35.0 },
};

/// Standard normal sample (Box–Muller).
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Normal sample, redrawn until it is at least `floor`.
fn sample_above(rng: &mut StdRng, spread: Spread, floor: f64) -> f64 {
    loop {
        let v = spread.mean + spread.std_dev * standard_normal(rng);
        if v >= floor {
            return v;
        }
    }
}

fn listing(rng: &mut StdRng, profile: &Profile, i: usize) -> RawListing {
    let price = sample_above(rng, profile.price, 20_000.0);
    let area = sample_above(rng, profile.area, 15.0).round();
    let kind = PROPERTY_TYPES[rng.random_range(0..PROPERTY_TYPES.len())];
    let city = CITIES[rng.random_range(0..CITIES.len())];
    let text = |s: String| Some(RawValue::Text(s));

    let mut raw = RawListing::new(profile.source, format!("https://{}/imovel/{}", profile.host, i + 1))
        .with_field("title", text(format!("{} {} m² em {}", kind, area, city)))
        .with_field("area", text(format!("{} m²", area)))
        .with_field("property_type", text(kind.to_string()))
        .with_field("city", text(city.to_string()));

    match profile.kind {
        SourceKind::Auction => {
            let initial = price / rng.random_range(0.6..0.9);
            raw = raw.with_field("initial_price", text(fmt_brl(initial)));
            // Some lots have no second call yet.
            if rng.random_bool(0.7) {
                raw = raw.with_field("current_price", text(fmt_brl(price)));
            }
            let days: i64 = rng.random_range(1..60);
            raw = raw.with_field(
                "auction_date",
                text((Utc::now() + Duration::days(days)).format("%d/%m/%Y").to_string()),
            );
        }
        SourceKind::Market => {
            let bedrooms: u32 = rng.random_range(1..5);
            let parking: u32 = rng.random_range(0..3);
            raw = raw
                .with_field("price", text(fmt_brl(price)))
                .with_field("bedrooms", text(format!("{} quartos", bedrooms)))
                .with_field("parking", Some(RawValue::Number(f64::from(parking))));
        }
    }
    raw
}

fn batch(rng: &mut StdRng, profile: &Profile, count: usize) -> RawBatch {
    RawBatch {
        source: profile.source.to_string(),
        kind: profile.kind,
        listings: (0..count).map(|i| listing(rng, profile, i)).collect(),
    }
}

/// One auction and one market batch of `count` listings each. The same seed
/// always yields the same listing values.
pub fn generate(count: usize, seed: u64) -> Vec<RawBatch> {
    let mut rng = StdRng::seed_from_u64(seed);
    vec![batch(&mut rng, &AUCTION, count), batch(&mut rng, &MARKET, count)]
}
