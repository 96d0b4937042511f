//! Listing-URL discovery over paginated index pages.
//!
//! Each `IndexSpec` is visited from page 1 up to its pagination cap. A page
//! that contributes no new listing links ends that spec early. Failed index
//! fetches are logged and skipped.

use super::http_client::{FetchClass, PageSource};
use crate::config::SourceConfig;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// One search to paginate: a URL template with a `{page}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub template: String,
    pub max_pages: u32,
}

impl IndexSpec {
    pub fn page_url(&self, page: u32) -> String {
        self.template.replace("{page}", &page.to_string())
    }
}

/// Expand a source's templates over its city × property-type dimensions.
pub fn index_specs(source: &SourceConfig) -> Vec<IndexSpec> {
    let base = source.base_url.trim_end_matches('/');
    let mut specs = Vec::new();

    for template in &source.index_templates {
        let absolute = if template.starts_with("http://") || template.starts_with("https://") {
            template.clone()
        } else {
            format!("{}/{}", base, template.trim_start_matches('/'))
        };

        let cities = dimension(&absolute, "{city}", &source.cities);
        let types = dimension(&absolute, "{property_type}", &source.property_types);

        for city in &cities {
            for ptype in &types {
                let mut t = absolute.clone();
                if let Some(city) = city {
                    t = t.replace("{city}", city);
                }
                if let Some(ptype) = ptype {
                    t = t.replace("{property_type}", ptype);
                }
                specs.push(IndexSpec {
                    template: t,
                    max_pages: source.max_pages,
                });
            }
        }
    }

    specs
}

/// Values to substitute for `placeholder`, or a single no-op when the
/// template does not use it (or no values are configured).
fn dimension<'a>(template: &str, placeholder: &str, values: &'a [String]) -> Vec<Option<&'a str>> {
    if template.contains(placeholder) && !values.is_empty() {
        values.iter().map(|v| Some(v.as_str())).collect()
    } else {
        vec![None]
    }
}

/// Absolute URL with the fragment and any pagination parameters dropped.
/// Other query parameters are kept in their original order.
pub fn normalise_url(base: &Url, href: &str, pagination_params: &[String]) -> Option<Url> {
    let mut url = base.join(href.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !pagination_params.iter().any(|p| *p == *k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Some(url)
}

/// Candidate listing links on one index page, in document order.
pub fn listing_links(html: &str, page_url: &Url, marker: &str, pagination_params: &[String]) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let Ok(a_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    doc.select(&a_sel)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| href.contains(marker))
        .filter_map(|href| normalise_url(page_url, href, pagination_params))
        .filter(|url| url.path().contains(marker))
        .collect()
}

pub struct Frontier<'a, S: PageSource + ?Sized> {
    source: &'a S,
    marker: &'a str,
    pagination_params: &'a [String],
}

impl<'a, S: PageSource + ?Sized> Frontier<'a, S> {
    pub fn new(source: &'a S, marker: &'a str, pagination_params: &'a [String]) -> Self {
        Self {
            source,
            marker,
            pagination_params,
        }
    }

    /// Discover listing URLs, deduplicated and in first-seen order.
    pub async fn discover(&self, specs: &[IndexSpec], cancel: &CancellationToken) -> Vec<Url> {
        let mut seen: HashSet<Url> = HashSet::new();
        let mut urls = Vec::new();

        'specs: for spec in specs {
            for page in 1..=spec.max_pages {
                if cancel.is_cancelled() {
                    info!("Discovery cancelled");
                    break 'specs;
                }

                let page_url = spec.page_url(page);
                info!("Fetching index page {} ({})", page, page_url);

                let Ok(parsed) = Url::parse(&page_url) else {
                    warn!("Skipping malformed index URL {}", page_url);
                    break;
                };

                let html = match self.source.fetch(&page_url, FetchClass::Index).await {
                    Ok(html) => html,
                    Err(e) => {
                        warn!("Index page {} failed: {}", page_url, e);
                        continue;
                    }
                };

                let mut new_links = 0usize;
                for url in listing_links(&html, &parsed, self.marker, self.pagination_params) {
                    if seen.insert(url.clone()) {
                        urls.push(url);
                        new_links += 1;
                    }
                }

                debug!("  Page {}: {} new listing links", page, new_links);
                if new_links == 0 {
                    debug!("No new links on page {}, stopping pagination", page);
                    break;
                }
            }
        }

        info!("Total listing URLs discovered: {}", urls.len());
        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::scraper::fake::FakeSite;

    fn params() -> Vec<String> {
        vec!["page".to_string(), "pagina".to_string()]
    }

    fn spec(max_pages: u32) -> IndexSpec {
        IndexSpec {
            template: "https://x.test/imoveis?page={page}".to_string(),
            max_pages,
        }
    }

    #[test]
    fn test_normalise_url() {
        let base = Url::parse("https://x.test/imoveis?page=2").unwrap();
        let p = params();
        assert_eq!(
            normalise_url(&base, "/imovel/10?page=3#fotos", &p).unwrap().as_str(),
            "https://x.test/imovel/10"
        );
        assert_eq!(
            normalise_url(&base, "/imovel/10?id=7&page=3", &p).unwrap().as_str(),
            "https://x.test/imovel/10?id=7"
        );
        assert_eq!(
            normalise_url(&base, "/imovel/10?pagina=2&id=7&ordem=preco", &p).unwrap().as_str(),
            "https://x.test/imovel/10?id=7&ordem=preco"
        );
        assert!(normalise_url(&base, "mailto:a@b.c", &p).is_none());
    }

    #[test]
    fn test_index_specs_expand_dimensions() {
        let cfg = AppConfig::default();
        let market = cfg.source("market").unwrap();
        let specs = index_specs(market);
        assert_eq!(specs.len(), 8);
        assert_eq!(
            specs[0].page_url(2),
            "https://www.vivareal.com.br/venda/sao-paulo/apartamento/?pagina=2"
        );

        let auction = cfg.source("auction").unwrap();
        let specs = index_specs(auction);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].page_url(1), "https://www.leiloesjudiciais.com.br/imoveis?page=1");
    }

    #[tokio::test]
    async fn test_discover_dedups_and_stops_when_exhausted() {
        let site = FakeSite::new(&[
            (
                "https://x.test/imoveis?page=1",
                r#"<a href="/imovel/1">1</a><a href="/imovel/2#top">2</a><a href="/sobre">x</a>"#,
            ),
            (
                "https://x.test/imoveis?page=2",
                r#"<a href="/imovel/2">2</a><a href="https://x.test/imovel/3?page=2">3</a>"#,
            ),
            ("https://x.test/imoveis?page=3", r#"<a href="/imovel/3">3</a>"#),
            ("https://x.test/imoveis?page=4", r#"<a href="/imovel/4">4</a>"#),
        ]);
        let p = params();
        let frontier = Frontier::new(&site, "/imovel/", &p);
        let urls = frontier.discover(&[spec(10)], &CancellationToken::new()).await;

        let urls: Vec<&str> = urls.iter().map(|u| u.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://x.test/imovel/1", "https://x.test/imovel/2", "https://x.test/imovel/3"]
        );
        // page 3 added nothing new, so page 4 is never requested
        assert_eq!(site.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_same_listing_on_two_pages_is_discovered_once() {
        let site = FakeSite::new(&[
            (
                "https://x.test/imoveis?page=1",
                r#"<a href="/imovel/10?id=7&page=1">10</a><a href="/imovel/11">11</a>"#,
            ),
            (
                "https://x.test/imoveis?page=2",
                r#"<a href="/imovel/10?id=7&page=2">10</a><a href="/imovel/12">12</a>"#,
            ),
        ]);
        let p = params();
        let urls = Frontier::new(&site, "/imovel/", &p)
            .discover(&[spec(2)], &CancellationToken::new())
            .await;

        let urls: Vec<&str> = urls.iter().map(|u| u.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://x.test/imovel/10?id=7",
                "https://x.test/imovel/11",
                "https://x.test/imovel/12"
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_page_is_skipped() {
        let site = FakeSite::new(&[
            ("https://x.test/imoveis?page=1", r#"<a href="/imovel/1">1</a>"#),
            ("https://x.test/imoveis?page=3", r#"<a href="/imovel/3">3</a>"#),
        ]);
        let p = params();
        let frontier = Frontier::new(&site, "/imovel/", &p);
        let urls = frontier.discover(&[spec(3)], &CancellationToken::new()).await;
        assert_eq!(urls.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_discovery_fetches_nothing() {
        let site = FakeSite::new(&[("https://x.test/imoveis?page=1", r#"<a href="/imovel/1">1</a>"#)]);
        let p = params();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let urls = Frontier::new(&site, "/imovel/", &p).discover(&[spec(3)], &cancel).await;
        assert!(urls.is_empty());
        assert!(site.requests().is_empty());
    }
}
