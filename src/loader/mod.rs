//! Loader for previously harvested raw listings (JSON or CSV).
//!
//! Accepts this tool's own raw exports as well as flat records keyed by the
//! Portuguese column names older harvests used (`preco_atual`, `quartos`, ...).

use crate::models::{RawListing, RawValue};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Portuguese column → schema field name.
fn canonical_field(key: &str) -> &str {
    match key {
        "titulo" => "title",
        "preco" => "price",
        "preco_inicial" => "initial_price",
        "preco_atual" => "current_price",
        "endereco" => "address",
        "bairro" => "neighborhood",
        "cidade" => "city",
        "quartos" => "bedrooms",
        "banheiros" => "bathrooms",
        "vagas" => "parking",
        "tipo_imovel" => "property_type",
        "data_leilao" => "auction_date",
        "situacao" => "status",
        "descricao" => "description",
        "caracteristicas" => "features",
        "preco_m2" => "price_per_m2",
        other => other,
    }
}

const URL_KEYS: [&str; 1] = ["url"];
const TIME_KEYS: [&str; 2] = ["collected_at", "data_coleta"];
const SOURCE_KEYS: [&str; 2] = ["source", "fonte"];

/// Parse "2024-03-01T10:15:00Z" or the naive "2024-03-01T10:15:00.123456".
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|dt| dt.and_utc())
}

fn json_to_raw(v: &Value) -> Option<RawValue> {
    match v {
        Value::Number(n) => n.as_f64().map(RawValue::Number),
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(RawValue::Text(s.clone())),
        Value::Array(items) => {
            let items: Vec<String> = items
                .iter()
                .filter_map(|i| match i {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect();
            if items.is_empty() { None } else { Some(RawValue::List(items)) }
        }
        _ => None,
    }
}

fn record_to_listing(source: &str, fallback_url: String, record: &Map<String, Value>) -> RawListing {
    let url = URL_KEYS
        .iter()
        .find_map(|k| record.get(*k).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or(fallback_url);

    let mut listing = RawListing::new(source, url);
    if let Some(ts) = TIME_KEYS
        .iter()
        .find_map(|k| record.get(*k).and_then(Value::as_str))
        .and_then(parse_timestamp)
    {
        listing.collected_at = ts;
    }

    for (key, value) in record {
        let key = key.as_str();
        if URL_KEYS.contains(&key) || TIME_KEYS.contains(&key) || SOURCE_KEYS.contains(&key) {
            continue;
        }
        listing.fields.insert(canonical_field(key).to_string(), json_to_raw(value));
    }
    listing
}

/// Load raw listings from a `.json` or `.csv` file and tag them with `source`.
pub fn load_raw(path: &Path, source: &str) -> Result<Vec<RawListing>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let listings = match ext.as_str() {
        "json" => load_json(path, source)?,
        "csv" => load_csv(path, source)?,
        _ => bail!("Unsupported file type {:?} (expected .json or .csv)", path),
    };

    info!("{}: {} raw listings loaded from {:?}", source, listings.len(), path);
    debug!("{}: field coverage {:?}", source, field_coverage(&listings));
    Ok(listings)
}

fn load_json(path: &Path, source: &str) -> Result<Vec<RawListing>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let records: Vec<Map<String, Value>> =
        serde_json::from_str(&text).with_context(|| format!("Expected a JSON array of objects in {:?}", path))?;

    let mut listings = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        // Our own raw exports nest the extracted values under `fields`.
        if let Some(Value::Object(_)) = record.get("fields") {
            match serde_json::from_value::<RawListing>(Value::Object(record.clone())) {
                Ok(mut raw) => {
                    raw.source = source.to_string();
                    listings.push(raw);
                }
                Err(e) => warn!("Record {} in {:?}: {}", i + 1, path, e),
            }
            continue;
        }
        listings.push(record_to_listing(source, format!("{}#{}", path.display(), i + 1), record));
    }
    Ok(listings)
}

fn load_csv(path: &Path, source: &str) -> Result<Vec<RawListing>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut listings = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };

        let map: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.trim().to_string(), Value::String(v.to_string())))
            .collect();
        debug!("Row {}: {} columns", i + 1, map.len());
        listings.push(record_to_listing(source, format!("{}#{}", path.display(), i + 1), &map));
    }
    Ok(listings)
}

/// Field names present across a batch, for diagnostics.
pub fn field_coverage(listings: &[RawListing]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for l in listings {
        for (name, value) in &l.fields {
            if value.is_some() {
                *counts.entry(name.clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let dir = std::env::temp_dir().join(format!("imovel-load-{}-{}", std::process::id(), nanos));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_parse_timestamp() {
        assert!(parse_timestamp("2024-03-01T10:15:00Z").is_some());
        assert!(parse_timestamp("2024-03-01T10:15:00.123456").is_some());
        assert!(parse_timestamp("ontem").is_none());
    }

    #[test]
    fn test_load_portuguese_json() {
        let path = write_temp(
            "leiloes.json",
            r#"[
                {"url": "https://l.test/imovel/1", "titulo": "Casa", "preco_inicial": 200000.0,
                 "preco_atual": null, "area": 80, "tipo_imovel": "Casa",
                 "data_coleta": "2024-03-01T10:15:00.5", "fonte": "leilao"},
                {"titulo": "Apto", "preco_atual": "R$ 150.000,00", "caracteristicas": ["Piscina"]}
            ]"#,
        );
        let raw = load_raw(&path, "auction").unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].url, "https://l.test/imovel/1");
        assert_eq!(raw[0].field("initial_price"), Some(&RawValue::Number(200_000.0)));
        assert_eq!(raw[0].fields.get("current_price"), Some(&None));
        assert!(!raw[0].fields.contains_key("fonte"));
        assert_eq!(raw[1].field("features"), Some(&RawValue::List(vec!["Piscina".into()])));
        assert!(raw[1].url.ends_with("#2"));
    }

    #[test]
    fn test_load_own_raw_export() {
        let original = RawListing::new("market", "https://m.test/imovel/9")
            .with_field("price", Some(RawValue::Number(1.0)))
            .with_field("area", None);
        let path = write_temp("raw.json", &serde_json::to_string(&vec![original.clone()]).unwrap());
        let raw = load_raw(&path, "market").unwrap();
        assert_eq!(raw, vec![original]);
    }

    #[test]
    fn test_load_csv() {
        let path = write_temp(
            "vivareal.csv",
            "url,preco,area,quartos,tipo_imovel\nhttps://m.test/imovel/1,R$ 500.000,72,3,Apartamento\nhttps://m.test/imovel/2,,,,\n",
        );
        let raw = load_raw(&path, "market").unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].field("price"), Some(&RawValue::Text("R$ 500.000".into())));
        assert_eq!(raw[0].field("bedrooms"), Some(&RawValue::Text("3".into())));
        assert!(raw[1].is_empty());

        let coverage = field_coverage(&raw);
        assert_eq!(coverage.get("price"), Some(&1));
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let path = write_temp("dados.xlsx", "");
        assert!(load_raw(&path, "market").is_err());
    }
}
