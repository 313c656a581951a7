use crate::config::Settings;
use crate::domain::stock::StockRecord;
use crate::ingest::types::RatingsPage;
use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PATH: &str = "/production/swechallenge/list";

/// Pause between consecutive page requests.
pub const PAGE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,
    #[error("upstream returned HTTP {status}")]
    Status { status: u16 },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A single page request against upstream.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<RatingsPage, FetchError>;
}

/// Everything the sync orchestrator needs from upstream.
#[async_trait::async_trait]
pub trait RatingsSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn fetch_all(&self, cancel: &CancellationToken) -> Result<Vec<StockRecord>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpRatingsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    path: String,
    page_delay: Duration,
}

impl HttpRatingsClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(settings.require_api_base_url()?, settings.api_key.clone())
    }

    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build upstream http client")?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            api_key,
            path: DEFAULT_PATH.to_string(),
            page_delay: PAGE_DELAY,
        })
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.path)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }
}

#[async_trait::async_trait]
impl PageSource for HttpRatingsClient {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<RatingsPage, FetchError> {
        let mut req = self.http.get(self.url()).headers(self.headers());
        if let Some(token) = &self.api_key {
            req = req.bearer_auth(token);
        }
        if let Some(cursor) = cursor {
            req = req.query(&[("next_page", cursor)]);
        }

        let res = req.send().await.context("upstream request failed")?;

        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let page = res
            .json::<RatingsPage>()
            .await
            .context("failed to decode upstream response")?;
        Ok(page)
    }
}

#[async_trait::async_trait]
impl RatingsSource for HttpRatingsClient {
    fn source_name(&self) -> &'static str {
        "swechallenge"
    }

    async fn fetch_all(&self, cancel: &CancellationToken) -> Result<Vec<StockRecord>, FetchError> {
        fetch_all_pages(self, self.page_delay, cancel).await
    }
}

/// Walks the cursor chain until upstream hands back an empty cursor or an
/// empty page. Items on the final page are kept. Records with unparsable
/// targets or no identity are skipped; any request failure discards
/// everything collected.
pub async fn fetch_all_pages<S>(
    source: &S,
    page_delay: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<StockRecord>, FetchError>
where
    S: PageSource + ?Sized,
{
    let mut records = Vec::new();
    let mut skipped: usize = 0;
    let mut cursor: Option<String> = None;
    let mut pages: usize = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let page = source.fetch_page(cursor.as_deref()).await?;
        pages += 1;

        let fetched_at = Utc::now();
        let page_len = page.items.len();
        let next = page.cursor().map(str::to_string);

        for event in page.items {
            let ticker = event.ticker.clone();
            match event.into_record(fetched_at) {
                Ok(record) => records.push(record),
                Err(err) => {
                    skipped += 1;
                    let reason = format!("{err:#}");
                    tracing::warn!(%ticker, error = %reason, "skipping malformed rating");
                }
            }
        }

        let Some(next) = next else { break };
        if page_len == 0 {
            break;
        }

        tracing::debug!(page = pages, items = page_len, next_page = %next, "fetched ratings page");
        cursor = Some(next);

        tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = tokio::time::sleep(page_delay) => {}
        }
    }

    tracing::info!(pages, records = records.len(), skipped, "fetched all ratings");
    Ok(records)
}
