mod cache;
mod config;
mod coordinator;
mod detector;
mod document;
mod error;
mod fetcher;
#[cfg(feature = "logging")]
mod logging;
mod lru;
mod protocol;
mod session;
mod store;
mod utils;
mod validate;

pub use cache::{CacheEntry, PreviewCache, DEFAULT_TTL};
pub use config::PreviewConfig;
pub use coordinator::{generate_request_id, PendingRequest, RequestCoordinator, ResponseOutcome};
pub use detector::{PasteTarget, ScanCandidate, UrlDetector};
pub use document::{
    descendants, CardAttrs, CardState, Descendants, DocumentPatcher, MemoryDocument, Node,
    NodeKind, Selection, TreeNode,
};
pub use error::PreviewError;
pub use fetcher::{FetchedPreview, MediaPayload, MetadataFetcher, RemoteFetcher};
#[cfg(feature = "logging")]
pub use logging::{log_error_card, log_preview_card, setup_logging, LogConfig, LogLevelGuard};
pub use lru::MemoryCache;
pub use protocol::{FetchResponse, OutboundMessage};
pub use session::LinkPreviewSession;
pub use store::DiskStore;
pub use utils::{cache_key, data_uri, truncate_str};
pub use validate::{UrlValidationConfig, UrlValidator};

/// Resolved preview metadata for one URL.
///
/// Every field besides `url` is optional; `None` means "unknown", never an
/// empty string.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewData {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
}

impl PreviewData {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            description: None,
            image_url: None,
            icon_url: None,
            site_name: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn with_icon_url(mut self, icon_url: impl Into<String>) -> Self {
        self.icon_url = Some(icon_url.into());
        self
    }

    pub fn with_site_name(mut self, site_name: impl Into<String>) -> Self {
        self.site_name = Some(site_name.into());
        self
    }

    /// True when nothing beyond the URL is known.
    pub fn has_no_metadata(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.image_url.is_none()
            && self.icon_url.is_none()
            && self.site_name.is_none()
    }

    /// Rough heap footprint, used to bound the memory tier.
    pub fn approximate_size(&self) -> usize {
        let optional = [
            &self.title,
            &self.description,
            &self.image_url,
            &self.icon_url,
            &self.site_name,
        ];
        self.url.len()
            + optional
                .iter()
                .map(|field| field.as_ref().map_or(0, String::len))
                .sum::<usize>()
    }
}
