use crate::config::{DelayWindow, FetchConfig, RetryPolicy};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 5xx, 429, connection reset. Worth retrying.
    Transient,
    /// 4xx, malformed URL. Retrying will not help.
    Permanent,
    Timeout,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?} failure fetching {url}: {cause}")]
pub struct FetchError {
    pub url: String,
    pub kind: FailureKind,
    pub cause: String,
}

impl FetchError {
    pub fn new(url: &str, kind: FailureKind, cause: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            kind,
            cause: cause.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, FailureKind::Transient | FailureKind::Timeout)
    }
}

pub fn classify_status(status: StatusCode) -> Option<FailureKind> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Some(FailureKind::Transient)
    } else {
        Some(FailureKind::Permanent)
    }
}

fn classify_reqwest(e: &reqwest::Error) -> FailureKind {
    if e.is_timeout() {
        FailureKind::Timeout
    } else if e.is_builder() || e.is_redirect() {
        FailureKind::Permanent
    } else {
        FailureKind::Transient
    }
}

// ── Page source seam ──────────────────────────────────────────────────────────

/// Index pages and listing pages can be paced differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchClass {
    Index,
    Detail,
}

/// Anything that can hand back the HTML of a URL.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str, class: FetchClass) -> Result<String, FetchError>;
}

// ── Politeness & retry ────────────────────────────────────────────────────────

/// Delay windows for one source, per fetch class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Politeness {
    pub index: DelayWindow,
    pub detail: DelayWindow,
}

impl Politeness {
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            index: DelayWindow::none(),
            detail: DelayWindow::none(),
        }
    }

    pub fn window(&self, class: FetchClass) -> DelayWindow {
        match class {
            FetchClass::Index => self.index,
            FetchClass::Detail => self.detail,
        }
    }
}

impl DelayWindow {
    /// Uniformly random duration within the window.
    pub fn sample(&self) -> Duration {
        if self.max_secs <= self.min_secs {
            return Duration::from_secs_f64(self.min_secs.max(0.0));
        }
        Duration::from_secs_f64(rand::random_range(self.min_secs..=self.max_secs))
    }
}

impl RetryPolicy {
    /// Backoff delays between attempts: one entry per retry.
    pub fn schedule(&self) -> Vec<Duration> {
        ExponentialBackoff::from_millis(2)
            .factor(self.base_delay_ms / 2)
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .map(jitter)
            .take(self.max_retries)
            .collect()
    }
}

/// Run `attempt` until it succeeds, fails permanently, or the policy's
/// retries are spent.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, url: &str, mut attempt: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut n = 0u32;
    RetryIf::start(
        policy.schedule(),
        || {
            n += 1;
            debug!("GET {} (attempt {})", url, n);
            attempt()
        },
        |e: &FetchError| {
            if e.is_retryable() {
                warn!("{}; retrying", e);
                true
            } else {
                false
            }
        },
    )
    .await
}

// ── HTTP client ───────────────────────────────────────────────────────────────

pub struct HttpClient {
    inner: reqwest::Client,
    politeness: Politeness,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(config: &FetchConfig, politeness: Politeness) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_str(&config.accept).context("Invalid Accept header")?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language)
                .context("Invalid Accept-Language header")?,
        );

        let mut builder = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true);

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("Invalid proxy URL")?);
        }

        Ok(Self {
            inner: builder.build().context("Failed to build HTTP client")?,
            politeness,
            retry: config.retry.clone(),
        })
    }

    async fn get_once(&self, url: &url::Url) -> Result<String, FetchError> {
        let resp = self
            .inner
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| FetchError::new(url.as_str(), classify_reqwest(&e), e.to_string()))?;

        let status = resp.status();
        if let Some(kind) = classify_status(status) {
            return Err(FetchError::new(url.as_str(), kind, format!("HTTP {}", status)));
        }

        resp.text()
            .await
            .map_err(|e| FetchError::new(url.as_str(), classify_reqwest(&e), e.to_string()))
    }
}

#[async_trait]
impl PageSource for HttpClient {
    /// Polite delay, then GET with bounded retry on transient failures.
    async fn fetch(&self, url: &str, class: FetchClass) -> Result<String, FetchError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| FetchError::new(url, FailureKind::Permanent, e.to_string()))?;

        sleep(self.politeness.window(class).sample()).await;

        with_retry(&self.retry, url, || self.get_once(&parsed)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK), None);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), Some(FailureKind::Transient));
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), Some(FailureKind::Transient));
        assert_eq!(classify_status(StatusCode::NOT_FOUND), Some(FailureKind::Permanent));
        assert_eq!(classify_status(StatusCode::FORBIDDEN), Some(FailureKind::Permanent));
    }

    #[test]
    fn test_delay_window_sampling() {
        assert_eq!(DelayWindow::none().sample(), Duration::ZERO);
        let w = DelayWindow::new(0.01, 0.02);
        for _ in 0..50 {
            let d = w.sample();
            assert!(d >= Duration::from_secs_f64(0.01) && d <= Duration::from_secs_f64(0.02));
        }
    }

    #[test]
    fn test_schedule_is_bounded() {
        let policy = RetryPolicy {
            max_retries: 4,
            base_delay_ms: 100,
            max_delay_ms: 300,
        };
        let schedule = policy.schedule();
        assert_eq!(schedule.len(), 4);
        assert!(schedule.iter().all(|d| *d <= Duration::from_millis(300)));
        assert!(RetryPolicy::none().schedule().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = with_retry(&policy, "https://x/imovel/1", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FetchError::new("https://x/imovel/1", FailureKind::Transient, "HTTP 503"))
                } else {
                    Ok("<html></html>".to_string())
                }
            }
        })
        .await;

        tokio_test::assert_ok!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<String, FetchError> = with_retry(&policy, "u", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::new("u", FailureKind::Permanent, "HTTP 404"))
            }
        })
        .await;

        let err = tokio_test::assert_err!(result);
        assert_eq!(err.kind, FailureKind::Permanent);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay_ms: 0,
            max_delay_ms: 0,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<String, FetchError> = with_retry(&policy, "u", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::new("u", FailureKind::Timeout, "timed out"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_malformed_url_fails_permanently() {
        let client = HttpClient::new(&FetchConfig::default(), Politeness::none()).unwrap();
        let err = client.fetch("not a url", FetchClass::Detail).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Permanent);
    }
}
