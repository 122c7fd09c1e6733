use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::retry::RetryPolicy;
use crate::types::Region;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Connection failures, timeouts, throttling and server errors are worth
    /// another attempt. Anything else will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::HttpError(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_body()
                    || e.status().is_some_and(is_transient_status)
            }
            FetchError::Status { status, .. } => StatusCode::from_u16(*status)
                .map(is_transient_status)
                .unwrap_or(false),
            FetchError::Timeout(_) => true,
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Where notices come from. The pipeline only talks to this trait so runs
/// can be replayed against recorded pages.
#[async_trait]
pub trait SourceSite: Send + Sync {
    /// The URL of a region's listing page, used to resolve relative links.
    fn listing_url(&self, region: Region) -> String;

    async fn listing_page(&self, region: Region) -> Result<String, FetchError>;

    async fn detail_page(&self, url: &str) -> Result<String, FetchError>;

    /// Raw bytes of an attached document.
    async fn document(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct EdikteClient {
    client: Client,
    base_url: String,
    page_retry: RetryPolicy,
    document_retry: RetryPolicy,
}

impl EdikteClient {
    pub fn new(page_retry: RetryPolicy, document_retry: RetryPolicy) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(page_retry.timeout.max(document_retry.timeout))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self {
            client,
            base_url: crate::BASE_URL.to_string(),
            page_retry,
            document_retry,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .inspect_err(|e| log::error!("HTTP error: {e:?}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_html(&self, url: &str) -> Result<String, FetchError> {
        let this = self;
        self.page_retry
            .run(url, || async move {
                Ok(this
                    .get(url)
                    .await?
                    .text()
                    .await
                    .inspect_err(|e| log::error!("Decode error: {e:?}"))?)
            })
            .await
    }
}

#[async_trait]
impl SourceSite for EdikteClient {
    fn listing_url(&self, region: Region) -> String {
        let code = region.code();
        format!(
            "{}/edikte/ex/exedi3.nsf/suchedi?SearchView&subf=eex&SearchOrder=4&SearchMax=4999&retfields=~BL={}&ftquery=&query=([BL]=({}))",
            self.base_url, code, code
        )
    }

    async fn listing_page(&self, region: Region) -> Result<String, FetchError> {
        let url = self.listing_url(region);
        log::info!("Fetching listing for {}...", region);
        self.get_html(&url).await
    }

    async fn detail_page(&self, url: &str) -> Result<String, FetchError> {
        log::debug!("Fetching notice: {}", url);
        self.get_html(url).await
    }

    async fn document(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        log::debug!("Downloading document: {}", url);
        let this = self;
        self.document_retry
            .run(url, || async move { Ok(this.get(url).await?.bytes().await?.to_vec()) })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_url_carries_region_code() {
        let client = EdikteClient::new(RetryPolicy::default(), RetryPolicy::for_documents())
            .unwrap()
            .with_base_url("https://edikte.example/");
        let url = client.listing_url(Region::Steiermark);
        assert!(url.starts_with("https://edikte.example/edikte/ex/exedi3.nsf/suchedi?"));
        assert!(url.contains("retfields=~BL=5"));
        assert!(url.ends_with("query=([BL]=(5))"));
    }

    #[test]
    fn test_status_retryability() {
        let status = |status| FetchError::Status {
            url: String::new(),
            status,
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(408).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_retryable());
    }
}
