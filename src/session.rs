use crate::cache::PreviewCache;
use crate::config::PreviewConfig;
use crate::coordinator::{RequestCoordinator, ResponseOutcome};
use crate::detector::UrlDetector;
use crate::document::DocumentPatcher;
use crate::fetcher::MetadataFetcher;
use crate::protocol::FetchResponse;
use crate::PreviewError;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Link previews for one open document.
///
/// Construct it when the document opens, feed it paste events, bulk loads
/// and responses from the document's own context, and call
/// [`shutdown`](LinkPreviewSession::shutdown) when the document closes.
pub struct LinkPreviewSession<D: DocumentPatcher> {
    document: D,
    detector: UrlDetector,
    coordinator: RequestCoordinator,
    cache: Arc<PreviewCache>,
}

impl<D: DocumentPatcher> LinkPreviewSession<D> {
    /// Opens the cache, sweeps its expired records and wires up the
    /// coordinator. Fetches are spawned on the runtime this is awaited on;
    /// the other methods may then be called from any thread.
    pub async fn start(
        document: D,
        config: PreviewConfig,
        fetcher: Arc<dyn MetadataFetcher>,
    ) -> Result<Self, PreviewError> {
        config.validate()?;
        let cache = Arc::new(PreviewCache::open(&config).await?);

        match cache.remove_expired().await {
            Ok(removed) => debug!(removed, "Startup cache sweep done"),
            Err(e) => e.log(),
        }

        let coordinator =
            RequestCoordinator::new(Arc::clone(&cache), fetcher, &config, Handle::current());
        info!(cache_dir = %config.cache_dir.display(), "Link preview session started");
        Ok(Self::with_parts(document, UrlDetector::default(), coordinator, cache))
    }

    pub fn with_parts(
        document: D,
        detector: UrlDetector,
        coordinator: RequestCoordinator,
        cache: Arc<PreviewCache>,
    ) -> Self {
        Self {
            document,
            detector,
            coordinator,
            cache,
        }
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut D {
        &mut self.document
    }

    pub fn cache(&self) -> &Arc<PreviewCache> {
        &self.cache
    }

    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    /// Handles a paste of `text`. Returns the request id when the paste
    /// became a link card, `None` when the editor should paste normally.
    pub fn paste(&mut self, text: &str) -> Option<String> {
        let target = self.detector.detect_paste(&self.document, text)?;
        match self.coordinator.insert_pasted(&mut self.document, &target) {
            Ok(request_id) => Some(request_id),
            Err(e) => {
                e.log();
                None
            }
        }
    }

    /// `true` when the paste was consumed.
    pub fn handle_paste(&mut self, text: &str) -> bool {
        self.paste(text).is_some()
    }

    /// Adds loading cards after every link line that lacks one. Returns how
    /// many were inserted.
    pub fn scan_document(&mut self) -> usize {
        let candidates = self.detector.scan(&self.document);
        if candidates.is_empty() {
            return 0;
        }
        self.coordinator
            .insert_scanned(&mut self.document, &candidates)
            .len()
    }

    /// Applies a bulk content change and scans the result.
    pub fn load_content<F>(&mut self, replace: F) -> usize
    where
        F: FnOnce(&mut D),
    {
        replace(&mut self.document);
        self.scan_document()
    }

    /// Applies a response delivered from outside the session's own fetch pipeline.
    pub fn deliver(&mut self, response: FetchResponse) -> ResponseOutcome {
        self.coordinator.on_response(&mut self.document, response)
    }

    /// Applies every response that has already arrived. Never waits.
    pub fn process_responses(&mut self) -> Vec<ResponseOutcome> {
        let mut outcomes = Vec::new();
        while let Some(response) = self.coordinator.try_next_response() {
            outcomes.push(self.coordinator.on_response(&mut self.document, response));
        }
        outcomes
    }

    /// Waits for the next response and applies it. `None` when nothing is
    /// pending.
    pub async fn next_response(&mut self) -> Option<ResponseOutcome> {
        if self.coordinator.pending_count() == 0 {
            return None;
        }
        let response = self.coordinator.next_response().await?;
        Some(self.coordinator.on_response(&mut self.document, response))
    }

    /// Applies responses until no request is pending. Requests that stay
    /// unanswered past the configured timeout are expired.
    pub async fn settle(&mut self) -> Vec<ResponseOutcome> {
        let timeout = self.coordinator.request_timeout();
        let mut outcomes = Vec::new();
        while self.coordinator.pending_count() > 0 {
            match tokio::time::timeout(timeout, self.coordinator.next_response()).await {
                Ok(Some(response)) => {
                    outcomes.push(self.coordinator.on_response(&mut self.document, response));
                }
                Ok(None) => break,
                Err(_) => {
                    self.expire_stale();
                }
            }
        }
        outcomes
    }

    /// Expires requests past the timeout. Returns how many were expired.
    pub fn expire_stale(&mut self) -> usize {
        self.coordinator.expire_stale(&mut self.document).len()
    }

    /// Ends the session and hands the document back. Fetches still running
    /// complete, but their responses are discarded.
    pub fn shutdown(self) -> D {
        debug!(
            pending = self.coordinator.pending_count(),
            "Link preview session closed"
        );
        self.document
    }
}
