use crate::cache::PreviewCache;
use crate::config::PreviewConfig;
use crate::detector::{PasteTarget, ScanCandidate};
use crate::document::{CardAttrs, DocumentPatcher, Node, TreeNode};
use crate::fetcher::{FetchedPreview, MediaPayload, MetadataFetcher};
use crate::protocol::FetchResponse;
use crate::utils::data_uri;
use crate::{PreviewData, PreviewError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// A dispatched request waiting for its response.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: String,
    pub url: String,
    pub dispatched_at: Instant,
}

/// What applying a response did to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The request id was unknown or already settled; nothing changed.
    Dropped,
    /// The request was settled but no loading card for its URL remains.
    NoCard,
    Resolved { pos: usize },
    ErrorResolved { pos: usize },
    /// The document refused the replacement.
    Rejected,
}

/// Correlation id: milliseconds since the epoch in hex, then a random
/// 128-bit suffix.
pub fn generate_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("{millis:x}-{}", Uuid::new_v4().simple())
}

/// Owns the pending-request map and the fetch pipeline for one session.
///
/// Fetch tasks run on the runtime handle given at construction, so
/// `dispatch` may be called from any thread. Responses are
/// queued on an internal channel and only touch the document when the owner
/// passes them to [`RequestCoordinator::on_response`].
pub struct RequestCoordinator {
    cache: Arc<PreviewCache>,
    fetcher: Arc<dyn MetadataFetcher>,
    pending: Arc<DashMap<String, PendingRequest>>,
    // url -> request ids waiting on the fetch already running for it
    in_flight: Arc<DashMap<String, Vec<String>>>,
    semaphore: Arc<Semaphore>,
    responses_tx: UnboundedSender<FetchResponse>,
    responses_rx: UnboundedReceiver<FetchResponse>,
    request_timeout: Duration,
    runtime: Handle,
}

impl RequestCoordinator {
    pub fn new(
        cache: Arc<PreviewCache>,
        fetcher: Arc<dyn MetadataFetcher>,
        config: &PreviewConfig,
        runtime: Handle,
    ) -> Self {
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        Self {
            cache,
            fetcher,
            pending: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1))),
            responses_tx,
            responses_rx,
            request_timeout: config.request_timeout(),
            runtime,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }

    /// Number of distinct URLs with a fetch currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Sender for responses produced outside this coordinator, e.g. by a
    /// host bridge relaying a native backend.
    pub fn response_sender(&self) -> UnboundedSender<FetchResponse> {
        self.responses_tx.clone()
    }

    fn allocate_request(&self, url: &str) -> String {
        loop {
            let request_id = generate_request_id();
            if let Entry::Vacant(slot) = self.pending.entry(request_id.clone()) {
                slot.insert(PendingRequest {
                    request_id: request_id.clone(),
                    url: url.to_string(),
                    dispatched_at: Instant::now(),
                });
                return request_id;
            }
            warn!(request_id = %request_id, "Request id collision, drawing again");
        }
    }

    /// Registers a request for `url` and starts resolving it without waiting.
    ///
    /// A memory-tier hit queues its response immediately. A URL that already
    /// has a fetch running joins it instead of starting another.
    #[instrument(level = "debug", skip(self))]
    pub fn dispatch(&self, url: &str) -> String {
        let request_id = self.allocate_request(url);

        if let Some(data) = self.cache.get_from_memory(url) {
            debug!(request_id = %request_id, "Resolved from memory cache");
            let _ = self
                .responses_tx
                .send(FetchResponse::success(request_id.clone(), data));
            return request_id;
        }

        let start_fetch = match self.in_flight.entry(url.to_string()) {
            Entry::Occupied(mut waiting) => {
                waiting.get_mut().push(request_id.clone());
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(vec![request_id.clone()]);
                true
            }
        };

        if start_fetch {
            let task = FetchTask {
                request_id: request_id.clone(),
                url: url.to_string(),
                cache: Arc::clone(&self.cache),
                fetcher: Arc::clone(&self.fetcher),
                in_flight: Arc::clone(&self.in_flight),
                semaphore: Arc::clone(&self.semaphore),
                responses: self.responses_tx.clone(),
            };
            self.runtime.spawn(task.run());
        } else {
            debug!(request_id = %request_id, "Joined in-flight fetch");
        }

        request_id
    }

    /// Replaces the empty paragraph at the paste target with a link line and
    /// a loading card in one patch, then dispatches.
    pub fn insert_pasted<D: DocumentPatcher>(
        &self,
        doc: &mut D,
        target: &PasteTarget,
    ) -> Result<String, PreviewError> {
        let start = target.paragraph_pos;
        let end = start + Node::empty_paragraph().node_size();
        doc.replace_node_range(
            start,
            end,
            vec![
                Node::link_paragraph(&target.url),
                Node::link_preview(CardAttrs::loading(&target.url)),
            ],
        )?;
        Ok(self.dispatch(&target.url))
    }

    /// Inserts a loading card after each candidate paragraph and dispatches
    /// it. Candidates must be ordered from the highest position down, as
    /// [`UrlDetector::scan`](crate::UrlDetector::scan) returns them.
    pub fn insert_scanned<D: DocumentPatcher>(
        &self,
        doc: &mut D,
        candidates: &[ScanCandidate],
    ) -> Vec<String> {
        let mut request_ids = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let card = Node::link_preview(CardAttrs::loading(&candidate.url));
            match doc.insert_node_after(candidate.paragraph_pos, card) {
                Ok(_) => request_ids.push(self.dispatch(&candidate.url)),
                Err(e) => e.log(),
            }
        }
        request_ids
    }

    /// Settles a response. Unknown request ids are dropped silently.
    ///
    /// The first loading card in document order with the request's URL is
    /// replaced; when several share a URL there is no attempt to find the
    /// one that triggered this request.
    pub fn on_response<D: DocumentPatcher>(
        &self,
        doc: &mut D,
        response: FetchResponse,
    ) -> ResponseOutcome {
        let Some((_, pending)) = self.pending.remove(&response.request_id) else {
            debug!(request_id = %response.request_id, "Dropping response for unknown request");
            return ResponseOutcome::Dropped;
        };

        let result = response.into_result().and_then(|data| {
            if data.has_no_metadata() {
                Err(PreviewError::NoMetadata)
            } else {
                Ok(data)
            }
        });

        match &result {
            #[cfg(feature = "logging")]
            Ok(data) => crate::logging::log_preview_card(data, &pending.url),
            #[cfg(feature = "logging")]
            Err(e) => crate::logging::log_error_card(&pending.url, e),
            #[cfg(not(feature = "logging"))]
            Ok(_) => debug!(url = %pending.url, "Preview resolved"),
            #[cfg(not(feature = "logging"))]
            Err(e) => debug!(url = %pending.url, error = %e, "Preview failed"),
        }

        let replacement = |card: &CardAttrs| match &result {
            Ok(data) => CardAttrs::resolved(card.url.clone(), data),
            Err(_) => card.error_resolved(),
        };
        match settle_first_loading_card(doc, &pending.url, replacement) {
            Some(Ok(pos)) if result.is_ok() => ResponseOutcome::Resolved { pos },
            Some(Ok(pos)) => ResponseOutcome::ErrorResolved { pos },
            Some(Err(e)) => {
                e.log();
                ResponseOutcome::Rejected
            }
            None => {
                debug!(url = %pending.url, "No loading card left for response");
                ResponseOutcome::NoCard
            }
        }
    }

    /// Drops requests older than the configured timeout and error-resolves
    /// their cards. Returns the expired requests.
    pub fn expire_stale<D: DocumentPatcher>(&self, doc: &mut D) -> Vec<PendingRequest> {
        let now = Instant::now();
        let stale_ids: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| now.duration_since(entry.dispatched_at) >= self.request_timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut expired = Vec::with_capacity(stale_ids.len());
        for request_id in stale_ids {
            let Some((_, pending)) = self.pending.remove(&request_id) else {
                continue;
            };
            warn!(request_id = %request_id, url = %pending.url, "Request timed out");

            if let Some(mut waiting) = self.in_flight.get_mut(&pending.url) {
                waiting.retain(|id| id != &request_id);
            }
            self.in_flight
                .remove_if(&pending.url, |_, waiting| waiting.is_empty());

            if let Some(Err(e)) =
                settle_first_loading_card(doc, &pending.url, CardAttrs::error_resolved)
            {
                e.log();
            }
            expired.push(pending);
        }
        expired
    }

    pub fn try_next_response(&mut self) -> Option<FetchResponse> {
        self.responses_rx.try_recv().ok()
    }

    pub async fn next_response(&mut self) -> Option<FetchResponse> {
        self.responses_rx.recv().await
    }
}

/// Replaces the first loading card for `url`. `None` when there is none.
fn settle_first_loading_card<D, F>(
    doc: &mut D,
    url: &str,
    replacement: F,
) -> Option<Result<usize, PreviewError>>
where
    D: DocumentPatcher,
    F: FnOnce(&CardAttrs) -> CardAttrs,
{
    let (pos, card) = doc.walk().find_map(|(pos, node)| {
        node.card()
            .filter(|card| card.loading && card.url == url)
            .map(|card| (pos, card.clone()))
    })?;
    let attrs = replacement(&card);
    Some(
        doc.replace_node_range(pos, pos + 1, vec![Node::link_preview(attrs)])
            .map(|()| pos),
    )
}

/// Turns fetched media into strings a document attribute can hold.
pub(crate) fn render_preview(fetched: FetchedPreview, requested_url: &str) -> PreviewData {
    let url = if fetched.url.is_empty() {
        requested_url.to_string()
    } else {
        fetched.url
    };
    PreviewData {
        url,
        title: fetched.title,
        description: fetched.description,
        image_url: fetched.image.and_then(render_media),
        icon_url: fetched.icon.and_then(render_media),
        site_name: fetched.site_name,
    }
}

fn render_media(media: MediaPayload) -> Option<String> {
    match media {
        MediaPayload::Url(url) if url.trim().is_empty() => None,
        MediaPayload::Url(url) => Some(url),
        MediaPayload::Bytes { bytes, .. } if bytes.is_empty() => None,
        MediaPayload::Bytes {
            content_type,
            bytes,
        } => Some(data_uri(&content_type, &bytes)),
    }
}

struct FetchTask {
    request_id: String,
    url: String,
    cache: Arc<PreviewCache>,
    fetcher: Arc<dyn MetadataFetcher>,
    in_flight: Arc<DashMap<String, Vec<String>>>,
    semaphore: Arc<Semaphore>,
    responses: UnboundedSender<FetchResponse>,
}

impl FetchTask {
    async fn run(self) {
        let result = self.resolve().await;

        let waiting = self
            .in_flight
            .remove(&self.url)
            .map(|(_, ids)| ids)
            .unwrap_or_default();
        debug!(url = %self.url, waiting = waiting.len(), ok = result.is_ok(), "Fetch settled");

        for request_id in waiting {
            if self
                .responses
                .send(FetchResponse::from_result(request_id, &result))
                .is_err()
            {
                debug!("Session closed before response delivery");
                break;
            }
        }
    }

    async fn resolve(&self) -> Result<PreviewData, PreviewError> {
        if let Some(data) = self.cache.get(&self.url).await {
            return Ok(data);
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| PreviewError::FetchFailed("fetch limiter closed".into()))?;

        let fetched = self.fetcher.fetch(&self.request_id, &self.url).await?;
        let data = render_preview(fetched, &self.url);
        if data.has_no_metadata() {
            return Err(PreviewError::NoMetadata);
        }

        if let Err(e) = self.cache.set(&self.url, data.clone()).await {
            warn!(url = %self.url, "Preview not persisted");
            e.log();
        }
        Ok(data)
    }
}
