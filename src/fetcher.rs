use crate::config::PreviewConfig;
use crate::protocol::{FetchResponse, OutboundMessage};
use crate::{PreviewData, PreviewError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};
use url::Url;

const USER_AGENT: &str = "link_preview/0.1.0";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Image or icon as produced by a fetcher: either already addressable, or raw
/// bytes that still need embedding before they can live in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaPayload {
    Url(String),
    Bytes { content_type: String, bytes: Vec<u8> },
}

/// Raw result of a metadata fetch, before media is made document-renderable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPreview {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<MediaPayload>,
    pub icon: Option<MediaPayload>,
    pub site_name: Option<String>,
}

impl FetchedPreview {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            description: None,
            image: None,
            icon: None,
            site_name: None,
        }
    }
}

impl From<PreviewData> for FetchedPreview {
    fn from(data: PreviewData) -> Self {
        Self {
            url: data.url,
            title: data.title,
            description: data.description,
            image: data.image_url.map(MediaPayload::Url),
            icon: data.icon_url.map(MediaPayload::Url),
            site_name: data.site_name,
        }
    }
}

/// Resolves a URL into preview fields.
///
/// Failures must be one of [`PreviewError::InvalidUrl`],
/// [`PreviewError::FetchFailed`] or [`PreviewError::NoMetadata`]; anything
/// else is reported across the boundary as a fetch failure.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, request_id: &str, url: &str) -> Result<FetchedPreview, PreviewError>;
}

/// Talks to an out-of-process fetch backend by POSTing the
/// `fetchLinkPreview` record and decoding the response record.
#[derive(Clone)]
pub struct RemoteFetcher {
    client: Client,
    endpoint: Url,
}

impl RemoteFetcher {
    pub fn new(endpoint: &str) -> Result<Self, PreviewError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| {
                error!(error = %e, "Failed to create HTTP client");
                PreviewError::ConfigError(format!("HTTP client: {e}"))
            })?;
        Self::with_client(client, endpoint)
    }

    pub fn with_client(client: Client, endpoint: &str) -> Result<Self, PreviewError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| PreviewError::ConfigError(format!("remote endpoint {endpoint}: {e}")))?;
        debug!(endpoint = %endpoint, "Remote fetcher configured");
        Ok(Self { client, endpoint })
    }

    pub fn from_config(config: &PreviewConfig) -> Result<Self, PreviewError> {
        let endpoint = config
            .remote_endpoint
            .as_deref()
            .ok_or_else(|| PreviewError::ConfigError("remote_endpoint is not set".into()))?;
        Self::new(endpoint)
    }
}

#[async_trait]
impl MetadataFetcher for RemoteFetcher {
    #[instrument(level = "debug", skip(self), err)]
    async fn fetch(&self, request_id: &str, url: &str) -> Result<FetchedPreview, PreviewError> {
        let message = OutboundMessage::fetch(request_id, url);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&message)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, url = %url, "Failed to reach fetch backend");
                PreviewError::FetchFailed(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(status = %status, url = %url, "Fetch backend rejected request");
            return Err(PreviewError::FetchFailed(format!(
                "backend returned status {status}"
            )));
        }

        let body: FetchResponse = response.json().await.map_err(|e| {
            error!(error = %e, url = %url, "Failed to decode fetch backend response");
            PreviewError::FetchFailed(e.to_string())
        })?;

        if body.request_id != request_id {
            return Err(PreviewError::FetchFailed(format!(
                "backend answered {} for request {request_id}",
                body.request_id
            )));
        }

        let data = body.into_result()?;
        debug!(url = %url, "Fetch backend resolved preview");
        Ok(FetchedPreview::from(data))
    }
}
