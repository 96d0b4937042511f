pub mod cleaner;
pub mod frontier;
pub mod http_client;
pub mod parsers;

use crate::config::{FetchConfig, SourceConfig};
use crate::models::{HarvestResult, RawListing, SourceKind};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use self::frontier::{Frontier, IndexSpec, index_specs};
use self::http_client::{FetchClass, HttpClient, PageSource, Politeness};
use self::parsers::CompiledSchema;

/// Outcome of fetching and extracting one listing page.
enum Visit {
    Listing(RawListing),
    FetchFailed,
    NothingExtracted,
}

/// Frontier → fetch → extract for one source.
pub struct SourceHarvester<S: PageSource + 'static> {
    name: String,
    kind: SourceKind,
    pages: Arc<S>,
    schema: Arc<CompiledSchema>,
    specs: Vec<IndexSpec>,
    marker: String,
    pagination_params: Vec<String>,
    max_listings: usize,
    concurrency: usize,
}

impl SourceHarvester<HttpClient> {
    /// Harvester backed by a real HTTP client paced with the source's delays.
    pub fn from_config(source: &SourceConfig, fetch: &FetchConfig, concurrency: usize) -> Result<Self> {
        let politeness = Politeness {
            index: source.index_delay,
            detail: source.detail_delay,
        };
        let client = HttpClient::new(fetch, politeness)
            .with_context(|| format!("Failed to build HTTP client for {}", source.name))?;
        Self::new(source, Arc::new(client), concurrency)
    }
}

impl<S: PageSource + 'static> SourceHarvester<S> {
    pub fn new(source: &SourceConfig, pages: Arc<S>, concurrency: usize) -> Result<Self> {
        let schema = CompiledSchema::compile(&source.fields)
            .with_context(|| format!("Invalid extraction schema for {}", source.name))?;

        Ok(Self {
            name: source.name.clone(),
            kind: source.kind,
            pages,
            schema: Arc::new(schema),
            specs: index_specs(source),
            marker: source.listing_marker.clone(),
            pagination_params: source.pagination_params.clone(),
            max_listings: source.max_listings,
            concurrency: concurrency.max(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Discover, cap, then fetch and extract with at most `concurrency`
    /// requests in flight. Failures are counted, never fatal. On cancellation
    /// no new fetch starts; whatever finished is returned. Listings come back
    /// sorted by URL.
    pub async fn harvest(&self, cancel: &CancellationToken) -> HarvestResult {
        info!("[{}] Discovering listing URLs ({} index searches)", self.name, self.specs.len());
        let frontier = Frontier::new(self.pages.as_ref(), &self.marker, &self.pagination_params);
        let mut urls = frontier.discover(&self.specs, cancel).await;

        if urls.len() > self.max_listings {
            info!("[{}] Capping {} URLs to {}", self.name, urls.len(), self.max_listings);
            urls.truncate(self.max_listings);
        }

        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(urls.len());
        let total = urls.len();

        for (i, url) in urls.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("[{}] Cancelled after issuing {}/{} fetches", self.name, i, total);
                    break;
                }
                permit = Arc::clone(&sem).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let pages = Arc::clone(&self.pages);
            let schema = Arc::clone(&self.schema);
            let source = self.name.clone();
            let url = url.to_string();
            debug!("[{}] Listing {}/{}: {}", source, i + 1, total, url);

            let handle = tokio::spawn(async move {
                let _permit = permit;
                visit(pages.as_ref(), &schema, &source, &url).await
            });
            handles.push(handle);
        }

        let attempted = handles.len();
        let mut listings = Vec::with_capacity(attempted);
        let mut fetch_failures = 0usize;
        let mut extraction_failures = 0usize;

        for handle in handles {
            match handle.await {
                Ok(Visit::Listing(raw)) => listings.push(raw),
                Ok(Visit::FetchFailed) => fetch_failures += 1,
                Ok(Visit::NothingExtracted) => extraction_failures += 1,
                Err(e) => {
                    error!("[{}] Task panic: {}", self.name, e);
                    extraction_failures += 1;
                }
            }
        }

        listings.sort_by(|a, b| a.url.cmp(&b.url));

        info!(
            "[{}] {} of {} listings extracted ({} fetch failures, {} empty pages)",
            self.name,
            listings.len(),
            attempted,
            fetch_failures,
            extraction_failures
        );

        HarvestResult {
            source: self.name.clone(),
            kind: self.kind,
            listings,
            attempted,
            fetch_failures,
            extraction_failures,
            cancelled: cancel.is_cancelled(),
        }
    }
}

async fn visit<S: PageSource + ?Sized>(pages: &S, schema: &CompiledSchema, source: &str, url: &str) -> Visit {
    let html = match pages.fetch(url, FetchClass::Detail).await {
        Ok(html) => html,
        Err(e) => {
            warn!("[{}] {}", source, e);
            return Visit::FetchFailed;
        }
    };

    let raw = schema.extract_html(&html, source, url);
    if raw.is_empty() {
        warn!("[{}] Nothing extracted from {}", source, url);
        Visit::NothingExtracted
    } else {
        Visit::Listing(raw)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::http_client::{FailureKind, FetchClass, FetchError, PageSource};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory site: canned pages, everything else is a 404.
    pub struct FakeSite {
        pages: HashMap<String, String>,
        pub requested: Mutex<Vec<String>>,
    }

    impl FakeSite {
        pub fn new(pages: &[(&str, &str)]) -> Self {
            Self::from_pages(pages.iter().map(|(u, h)| (u.to_string(), h.to_string())))
        }

        pub fn from_pages(pages: impl IntoIterator<Item = (String, String)>) -> Self {
            Self {
                pages: pages.into_iter().collect(),
                requested: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageSource for FakeSite {
        async fn fetch(&self, url: &str, _class: FetchClass) -> Result<String, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::new(url, FailureKind::Permanent, "HTTP 404"))
        }
    }
}
