//! Page Agent
//!
//! Runs inside one page. It turns the reader's selection into a visual marker and a
//! durable record, and answers requests from the popup over a message channel.
//!
//! Writes are local-first: a highlight is durable once the local cache append returns.
//! Replication to the Sync API happens afterwards on a detached task with a bounded
//! timeout, and its failure is logged and otherwise ignored.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cache::{HighlightKey, LocalCache, Storage};
use crate::error::HighlightError;
use crate::model::{Color, Highlight, now_millis};
use crate::remote::SyncClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn is_collapsed(&self) -> bool {
        self.start >= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub range: TextRange,
    pub text: String,
}

/// A visual highlight wrapped around part of the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub id: String,
    pub range: TextRange,
    pub color: Color,
}

/// The part of the DOM the agent needs.
pub trait Document: Send {
    fn selection(&self) -> Option<Selection>;
    fn wrap(&mut self, range: TextRange, color: Color, marker_id: &str);
    /// Changes a marker's identifier. Returns false when no marker has `from`.
    fn retag(&mut self, from: &str, to: &str) -> bool;
    fn remove_marker(&mut self, marker_id: &str) -> bool;
}

/// A page reduced to its text content, with byte-offset selections.
#[derive(Debug, Default, Clone)]
pub struct TextDocument {
    content: String,
    selection: Option<TextRange>,
    markers: Vec<Marker>,
}

impl TextDocument {
    pub fn new(content: impl Into<String>) -> Self {
        TextDocument {
            content: content.into(),
            selection: None,
            markers: Vec::new(),
        }
    }

    pub fn select(&mut self, start: usize, end: usize) -> bool {
        let valid = start <= end
            && end <= self.content.len()
            && self.content.is_char_boundary(start)
            && self.content.is_char_boundary(end);
        if valid {
            self.selection = Some(TextRange { start, end });
        }
        valid
    }

    /// Selects the first occurrence of `needle`.
    pub fn select_text(&mut self, needle: &str) -> bool {
        match self.content.find(needle) {
            Some(start) => self.select(start, start + needle.len()),
            None => false,
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }
}

impl Document for TextDocument {
    fn selection(&self) -> Option<Selection> {
        let range = self.selection?;
        if range.is_collapsed() {
            return None;
        }
        Some(Selection {
            range,
            text: self.content[range.start..range.end].to_string(),
        })
    }

    fn wrap(&mut self, range: TextRange, color: Color, marker_id: &str) {
        self.markers.push(Marker {
            id: marker_id.to_string(),
            range,
            color,
        });
    }

    fn retag(&mut self, from: &str, to: &str) -> bool {
        match self.markers.iter_mut().find(|m| m.id == from) {
            Some(marker) => {
                marker.id = to.to_string();
                true
            }
            None => false,
        }
    }

    fn remove_marker(&mut self, marker_id: &str) -> bool {
        let before = self.markers.len();
        self.markers.retain(|m| m.id != marker_id);
        self.markers.len() != before
    }
}

static LAST_LOCAL_ID: AtomicI64 = AtomicI64::new(0);

/// Millisecond timestamp ids, strictly increasing within the process.
pub fn next_local_id() -> String {
    let now = now_millis().timestamp_millis();
    let mut last = LAST_LOCAL_ID.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_LOCAL_ID.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next.to_string(),
            Err(actual) => last = actual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationOutcome {
    Replicated { local_id: String, store_id: String },
    Failed { local_id: String, reason: String },
    /// Created on the server after the local record was deleted, then deleted there too.
    Discarded { local_id: String, store_id: String },
    /// No Sync API configured.
    Skipped { local_id: String },
}

#[derive(Debug)]
pub struct Applied {
    pub highlight: Highlight,
    /// The detached replication task. Dropping the handle does not cancel it.
    pub replication: JoinHandle<ReplicationOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingSource {
    Remote,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageListing {
    pub highlights: Vec<Highlight>,
    pub source: ListingSource,
}

pub struct PageAgent<S, D> {
    user_id: String,
    url: String,
    document: Arc<Mutex<D>>,
    cache: Arc<LocalCache<S>>,
    remote: Option<SyncClient>,
}

impl<S, D> PageAgent<S, D>
where
    S: Storage + 'static,
    D: Document + 'static,
{
    pub fn new(
        user_id: impl Into<String>,
        url: impl Into<String>,
        document: D,
        cache: Arc<LocalCache<S>>,
        remote: Option<SyncClient>,
    ) -> Self {
        PageAgent {
            user_id: user_id.into(),
            url: url.into(),
            document: Arc::new(Mutex::new(document)),
            cache,
            remote,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn document(&self) -> Arc<Mutex<D>> {
        self.document.clone()
    }

    fn lock_document(&self) -> MutexGuard<'_, D> {
        self.document.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn apply_highlight(&self, color: Color) -> Result<Applied, HighlightError> {
        let local_id = next_local_id();
        let pending_id = format!("pending-{}", local_id);

        let selection = {
            let mut doc = self.lock_document();
            let selection = doc
                .selection()
                .filter(|s| !s.text.trim().is_empty())
                .ok_or(HighlightError::NoSelection)?;
            doc.wrap(selection.range, color, &pending_id);
            selection
        };

        let highlight = Highlight {
            id: local_id,
            user_id: self.user_id.clone(),
            url: self.url.clone(),
            text: selection.text,
            color,
            created_at: now_millis(),
        };

        if let Err(e) = self.cache.append(highlight.clone()) {
            tracing::error!(id = %highlight.id, "failed to save highlight: {}", crate::unpack_error(&e));
            self.lock_document().remove_marker(&pending_id);
            return Err(e.into());
        }
        self.lock_document().retag(&pending_id, &highlight.id);
        tracing::info!(id = %highlight.id, url = %highlight.url, "highlight saved to local storage");

        let replication = self.spawn_replication(highlight.clone());
        Ok(Applied {
            highlight,
            replication,
        })
    }

    fn spawn_replication(&self, highlight: Highlight) -> JoinHandle<ReplicationOutcome> {
        let remote = self.remote.clone();
        let cache = self.cache.clone();
        let document = self.document.clone();

        tokio::spawn(async move {
            let local_id = highlight.id.clone();
            let Some(remote) = remote else {
                return ReplicationOutcome::Skipped { local_id };
            };

            match remote.create(&highlight).await {
                Ok(stored) => {
                    if let Err(e) = cache.link(&local_id, &stored.id) {
                        tracing::warn!(id = %local_id, "failed to record store id: {}", e);
                    }

                    // Deleted locally while the create was in flight; the server copy goes too.
                    let still_cached = cache
                        .all()
                        .map(|all| all.iter().any(|h| h.id == local_id))
                        .unwrap_or(true);
                    if !still_cached {
                        if let Err(e) = cache.remove(&HighlightKey::Local(local_id.clone())) {
                            tracing::warn!(id = %local_id, "failed to drop store id: {}", e);
                        }
                        if let Err(e) = remote.delete(&stored.id).await {
                            if !e.is_not_found() {
                                tracing::warn!(store_id = %stored.id, "API delete failed (not critical): {}", e);
                            }
                        }
                        tracing::info!(id = %local_id, store_id = %stored.id, "discarded highlight deleted during sync");
                        return ReplicationOutcome::Discarded {
                            local_id,
                            store_id: stored.id,
                        };
                    }

                    document
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .retag(&local_id, &stored.id);
                    tracing::info!(id = %local_id, store_id = %stored.id, "synced highlight with API");
                    ReplicationOutcome::Replicated {
                        local_id,
                        store_id: stored.id,
                    }
                }
                Err(e) => {
                    tracing::warn!(id = %local_id, "API sync failed (not critical): {}", e);
                    ReplicationOutcome::Failed {
                        local_id,
                        reason: e.to_string(),
                    }
                }
            }
        })
    }

    /// Highlights for this page and user. Never fails: the local cache, and finally an
    /// empty list, stand in for an unreachable API.
    pub async fn list_page_highlights(&self) -> PageListing {
        if let Some(remote) = &self.remote {
            match remote.list(&self.user_id, &self.url).await {
                Ok(listed) => {
                    let highlights = match self.cache.reconcile(&self.url, listed.clone()) {
                        Ok(merged) => merged,
                        Err(e) => {
                            tracing::warn!("failed to reconcile with local storage: {}", e);
                            listed
                        }
                    };
                    return PageListing {
                        highlights,
                        source: ListingSource::Remote,
                    };
                }
                Err(e) => tracing::warn!("API unavailable, using local storage: {}", e),
            }
        }

        let highlights = match self.cache.for_page(&self.url) {
            Ok(mut cached) => {
                cached.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                cached
            }
            Err(e) => {
                tracing::error!("failed to read local storage: {}", crate::unpack_error(&e));
                Vec::new()
            }
        };

        PageListing {
            highlights,
            source: ListingSource::Offline,
        }
    }

    /// Serves requests until every [`PageHandle`] is dropped.
    pub async fn run(self, mut requests: mpsc::Receiver<Envelope>) {
        tracing::info!(url = %self.url, "page agent listening");
        while let Some((request, reply)) = requests.recv().await {
            let response = match request {
                PageRequest::Highlight { color } => self
                    .apply_highlight(color)
                    .map(|applied| PageReply::Highlighted(applied.highlight)),
                PageRequest::LoadHighlights => Ok(PageReply::Highlights(self.list_page_highlights().await)),
            };
            if reply.send(response).is_err() {
                tracing::debug!("requester went away before the reply");
            }
        }
    }

    pub fn spawn(self) -> PageHandle {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(self.run(rx));
        PageHandle { tx }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRequest {
    Highlight { color: Color },
    LoadHighlights,
}

#[derive(Debug)]
pub enum PageReply {
    Highlighted(Highlight),
    Highlights(PageListing),
}

pub type Envelope = (PageRequest, oneshot::Sender<Result<PageReply, HighlightError>>);

/// The caller side of the agent's channel. Each request keeps its reply channel open
/// until the agent answers.
#[derive(Debug, Clone)]
pub struct PageHandle {
    tx: mpsc::Sender<Envelope>,
}

impl PageHandle {
    pub fn new(tx: mpsc::Sender<Envelope>) -> Self {
        PageHandle { tx }
    }

    async fn request(&self, request: PageRequest) -> Result<PageReply, HighlightError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| HighlightError::AgentUnavailable("page agent is not running".to_string()))?;
        reply_rx
            .await
            .map_err(|_| HighlightError::AgentUnavailable("page agent dropped the request".to_string()))?
    }

    pub async fn highlight(&self, color: Color) -> Result<Highlight, HighlightError> {
        match self.request(PageRequest::Highlight { color }).await? {
            PageReply::Highlighted(highlight) => Ok(highlight),
            PageReply::Highlights(_) => Err(HighlightError::AgentUnavailable("unexpected reply".to_string())),
        }
    }

    pub async fn load_highlights(&self) -> Result<PageListing, HighlightError> {
        match self.request(PageRequest::LoadHighlights).await? {
            PageReply::Highlights(listing) => Ok(listing),
            PageReply::Highlighted(_) => Err(HighlightError::AgentUnavailable("unexpected reply".to_string())),
        }
    }
}
