//! Field extraction: selector-fallback chains evaluated over a parsed page.
//!
//! A schema maps each field name to an ordered chain of rules. The first rule
//! that yields a non-empty, successfully parsed value wins; when none does the
//! field is recorded as absent. Nothing in here returns an error once the
//! schema has compiled.

use crate::config::{ConfigurationError, FieldKind, FieldSpec, RuleSpec};
use crate::models::{RawListing, RawValue};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

// ── Sanitizers ────────────────────────────────────────────────────────────────

/// Parse a price or area as printed on a listing page.
///
/// Keeps digits plus `.`/`,`. With both separators present the last one is
/// the decimal point; a separator repeated, or a single one followed by
/// exactly three digits, is a thousands separator.
/// "R$ 1.234.567,89" → 1234567.89 | "450.000" → 450000 | "72,5" → 72.5
pub fn sanitize_number(s: &str) -> Option<f64> {
    let kept: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let kept = kept.trim_matches(|c| c == '.' || c == ',');
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalised = match (kept.rfind('.'), kept.rfind(',')) {
        (Some(dot), Some(comma)) => {
            let (decimal, thousands) = if dot > comma { ('.', ',') } else { (',', '.') };
            kept.replace(thousands, "").replace(decimal, ".")
        }
        (Some(_), None) => single_separator(kept, '.'),
        (None, Some(_)) => single_separator(kept, ','),
        (None, None) => kept.to_string(),
    };

    normalised.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn single_separator(s: &str, sep: char) -> String {
    let parts: Vec<&str> = s.split(sep).collect();
    if parts.len() > 2 || parts[1].len() == 3 {
        parts.concat()
    } else {
        parts.join(".")
    }
}

/// First run of digits. "3 quartos" → 3 | "Vagas: 2" → 2
pub fn parse_count(s: &str) -> Option<u32> {
    s.split(|c: char| !c.is_ascii_digit())
        .find(|part| !part.is_empty())?
        .parse()
        .ok()
}

// ── Compiled schema ───────────────────────────────────────────────────────────

/// One extraction rule with its selector (and pattern) already compiled.
#[derive(Debug, Clone)]
pub enum Rule {
    /// Text of the element at the selector.
    Text(Selector),
    /// First capture group of the pattern over the element's text; the whole
    /// match when the pattern has no groups.
    Capture(Selector, Regex),
}

impl Rule {
    fn selector(&self) -> &Selector {
        match self {
            Rule::Text(sel) | Rule::Capture(sel, _) => sel,
        }
    }

    /// Apply the rule's text transform to one element.
    fn read(&self, el: ElementRef<'_>) -> Option<String> {
        let text = element_text(el);
        let out = match self {
            Rule::Text(_) => text,
            Rule::Capture(_, re) => {
                let caps = re.captures(&text)?;
                caps.get(1).or_else(|| caps.get(0))?.as_str().trim().to_string()
            }
        };
        if out.is_empty() { None } else { Some(out) }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledField {
    pub kind: FieldKind,
    pub rules: Vec<Rule>,
}

/// A validated field → selector-chain mapping, ready to run against pages.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    fields: Vec<(String, CompiledField)>,
}

impl CompiledSchema {
    pub fn compile(specs: &BTreeMap<String, FieldSpec>) -> Result<Self, ConfigurationError> {
        let mut fields = Vec::with_capacity(specs.len());

        for (name, spec) in specs {
            if spec.rules.is_empty() {
                return Err(ConfigurationError::EmptyChain(name.clone()));
            }
            let rules = spec
                .rules
                .iter()
                .map(|rule| compile_rule(name, rule))
                .collect::<Result<Vec<_>, _>>()?;
            fields.push((name.clone(), CompiledField { kind: spec.kind, rules }));
        }

        Ok(Self { fields })
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Extract every schema field from a parsed document.
    pub fn extract(&self, doc: &Html, source: &str, url: &str) -> RawListing {
        let mut listing = RawListing::new(source, url);
        for (name, field) in &self.fields {
            listing.fields.insert(name.clone(), resolve(doc, field));
        }
        listing
    }

    /// Parse `html` and extract. The parsed tree never outlives this call.
    pub fn extract_html(&self, html: &str, source: &str, url: &str) -> RawListing {
        let doc = Html::parse_document(html);
        self.extract(&doc, source, url)
    }
}

fn compile_rule(field: &str, rule: &RuleSpec) -> Result<Rule, ConfigurationError> {
    let parse_selector = |selector: &str| {
        Selector::parse(selector).map_err(|e| ConfigurationError::InvalidSelector {
            field: field.to_string(),
            selector: selector.to_string(),
            reason: format!("{:?}", e),
        })
    };

    match rule {
        RuleSpec::Text { selector } => Ok(Rule::Text(parse_selector(selector)?)),
        RuleSpec::Regex { selector, pattern } => {
            let re = Regex::new(pattern).map_err(|cause| ConfigurationError::InvalidPattern {
                field: field.to_string(),
                pattern: pattern.clone(),
                cause,
            })?;
            Ok(Rule::Capture(parse_selector(selector)?, re))
        }
    }
}

// ── Resolver ──────────────────────────────────────────────────────────────────

/// Walk the chain; commit to the first rule that produces a usable value.
fn resolve(doc: &Html, field: &CompiledField) -> Option<RawValue> {
    field.rules.iter().find_map(|rule| apply(doc, rule, field.kind))
}

fn apply(doc: &Html, rule: &Rule, kind: FieldKind) -> Option<RawValue> {
    if kind == FieldKind::List {
        let items: Vec<String> = doc
            .select(rule.selector())
            .filter_map(|el| rule.read(el))
            .collect();
        return if items.is_empty() { None } else { Some(RawValue::List(items)) };
    }

    let text = rule.read(doc.select(rule.selector()).next()?)?;
    match kind {
        FieldKind::Text => Some(RawValue::Text(text)),
        FieldKind::Number => sanitize_number(&text).map(RawValue::Number),
        FieldKind::Count => parse_count(&text).map(|n| RawValue::Number(f64::from(n))),
        FieldKind::List => None,
    }
}

/// Element text with runs of whitespace collapsed.
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
