//! Control Surface
//!
//! One [`PopupSession`] lives for as long as the popup is open. It fetches the active
//! tab's highlights once, owns the multi-select state and the status banner, and
//! issues commands to the page agent, the local cache and the Sync API.

use chrono::{DateTime, TimeZone};
use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::cache::{HighlightKey, LocalCache, Storage};
use crate::error::HighlightError;
use crate::export::{self, ExportFile};
use crate::model::{Color, Highlight};
use crate::page::{ListingSource, PageHandle};
use crate::remote::SyncClient;

pub const STATUS_TTL: Duration = Duration::from_secs(3);
pub const PREVIEW_CHARS: usize = 50;

const RESTRICTED_SCHEMES: &[&str] = &["chrome://", "chrome-extension://", "edge://", "about:"];

pub fn is_restricted_url(url: &str) -> bool {
    RESTRICTED_SCHEMES.iter().any(|scheme| url.starts_with(scheme))
}

/// The list-row rendering of a highlight's text.
pub fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

pub trait Clipboard {
    fn set_text(&mut self, text: &str) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBanner {
    pub message: String,
    pub kind: StatusKind,
    shown_at: Instant,
}

impl StatusBanner {
    pub fn is_visible_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.shown_at) < STATUS_TTL
    }
}

/// A highlight removed locally; `remote` resolves once the best-effort server delete
/// finishes, with `true` when the server no longer has the record.
#[derive(Debug)]
pub struct Deletion {
    pub id: String,
    pub remote: Option<JoinHandle<bool>>,
}

pub struct PopupSession<S> {
    tab_url: String,
    agent: PageHandle,
    cache: Arc<LocalCache<S>>,
    remote: Option<SyncClient>,
    entries: Vec<Highlight>,
    source: ListingSource,
    selected: HashSet<String>,
    status: Option<StatusBanner>,
}

impl<S: Storage> PopupSession<S> {
    /// Opens a session for the active tab and loads its highlights.
    pub async fn open(
        tab_url: impl Into<String>,
        agent: PageHandle,
        cache: Arc<LocalCache<S>>,
        remote: Option<SyncClient>,
    ) -> Self {
        let mut session = PopupSession {
            tab_url: tab_url.into(),
            agent,
            cache,
            remote,
            entries: Vec::new(),
            source: ListingSource::Offline,
            selected: HashSet::new(),
            status: None,
        };
        session.refresh().await;
        session
    }

    pub fn tab_url(&self) -> &str {
        &self.tab_url
    }

    /// Highlights in display order.
    pub fn entries(&self) -> &[Highlight] {
        &self.entries
    }

    pub fn source(&self) -> ListingSource {
        self.source
    }

    pub fn status(&self) -> Option<&StatusBanner> {
        self.status.as_ref().filter(|s| s.is_visible_at(Instant::now()))
    }

    fn show_status(&mut self, message: impl Into<String>, kind: StatusKind) {
        let message = message.into();
        tracing::debug!(?kind, "{}", message);
        self.status = Some(StatusBanner {
            message,
            kind,
            shown_at: Instant::now(),
        });
    }

    pub async fn refresh(&mut self) {
        match self.agent.load_highlights().await {
            Ok(listing) => {
                self.entries = listing.highlights;
                self.source = listing.source;
                if listing.source == ListingSource::Offline {
                    self.show_status("Using offline highlights", StatusKind::Warning);
                }
            }
            Err(e) => {
                tracing::warn!("page agent unavailable, reading local storage: {}", e);
                self.entries = match self.cache.for_page(&self.tab_url) {
                    Ok(mut cached) => {
                        cached.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                        cached
                    }
                    Err(e) => {
                        tracing::error!("failed to read local storage: {}", e);
                        self.show_status("Error loading highlights", StatusKind::Error);
                        Vec::new()
                    }
                };
                self.source = ListingSource::Offline;
            }
        }

        let present: HashSet<&str> = self.entries.iter().map(|h| h.id.as_str()).collect();
        self.selected.retain(|id| present.contains(id.as_str()));
    }

    pub async fn highlight(&mut self, color: Color) -> Result<Highlight, HighlightError> {
        if is_restricted_url(&self.tab_url) {
            self.show_status("Cannot highlight on this page", StatusKind::Warning);
            return Err(HighlightError::Validation("Cannot highlight on this page".to_string()));
        }

        match self.agent.highlight(color).await {
            Ok(highlight) => {
                self.refresh().await;
                self.show_status("Highlight saved!", StatusKind::Success);
                Ok(highlight)
            }
            Err(e @ HighlightError::NoSelection) => {
                self.show_status("Please select text to highlight", StatusKind::Warning);
                Err(e)
            }
            Err(e) => {
                self.show_status("Failed to highlight", StatusKind::Error);
                Err(e)
            }
        }
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    /// Flips one row's selection; returns whether it is now selected.
    pub fn toggle(&mut self, id: &str) -> bool {
        if !self.entries.iter().any(|h| h.id == id) {
            return false;
        }
        if self.selected.remove(id) {
            false
        } else {
            self.selected.insert(id.to_string());
            true
        }
    }

    pub fn select_all(&mut self) {
        self.selected = self.entries.iter().map(|h| h.id.clone()).collect();
    }

    pub fn deselect_all(&mut self) {
        self.selected.clear();
    }

    /// Selected highlights in display order.
    pub fn selected(&self) -> Vec<&Highlight> {
        self.entries
            .iter()
            .filter(|h| self.selected.contains(&h.id))
            .collect()
    }

    // A displayed id is local when the mapping table or the cache knows it as one.
    fn key_for(&self, id: &str) -> Result<HighlightKey, HighlightError> {
        if self.cache.store_id_of(id)?.is_some() {
            return Ok(HighlightKey::Local(id.to_string()));
        }
        let cached = self.cache.all()?;
        if cached.iter().any(|h| h.id == id) {
            Ok(HighlightKey::Local(id.to_string()))
        } else {
            Ok(HighlightKey::Remote(id.to_string()))
        }
    }

    /// Removes a highlight from the cache and the list right away, then asks the server
    /// to delete it on a detached task.
    pub fn delete(&mut self, id: &str) -> Result<Deletion, HighlightError> {
        match self.delete_locally(id) {
            Ok(deletion) => {
                self.show_status("Highlight deleted!", StatusKind::Success);
                Ok(deletion)
            }
            Err(e) => {
                self.show_status("Failed to delete highlight", StatusKind::Error);
                Err(e)
            }
        }
    }

    fn delete_locally(&mut self, id: &str) -> Result<Deletion, HighlightError> {
        let key = self.key_for(id)?;
        let store_id = match &key {
            HighlightKey::Local(local) => self.cache.store_id_of(local)?,
            HighlightKey::Remote(remote) => Some(remote.clone()),
        };

        self.cache.remove(&key)?;
        self.entries.retain(|h| h.id != id);
        self.selected.remove(id);

        let remote = match (&self.remote, store_id) {
            (Some(client), Some(store_id)) => Some(spawn_remote_delete(client.clone(), store_id)),
            _ => None,
        };

        Ok(Deletion {
            id: id.to_string(),
            remote,
        })
    }

    /// Deletes every selected highlight once `confirm` agrees to the count.
    pub fn delete_selected(&mut self, confirm: impl FnOnce(usize) -> bool) -> Result<Vec<Deletion>, HighlightError> {
        let ids: Vec<String> = self.selected().into_iter().map(|h| h.id.clone()).collect();
        if ids.is_empty() {
            self.show_status("No highlights selected", StatusKind::Warning);
            return Ok(Vec::new());
        }
        if !confirm(ids.len()) {
            return Ok(Vec::new());
        }

        let mut deletions = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.delete_locally(id) {
                Ok(deletion) => deletions.push(deletion),
                Err(e) => {
                    self.show_status("Failed to delete highlight", StatusKind::Error);
                    return Err(e);
                }
            }
        }

        self.show_status(format!("Deleted {} highlights", deletions.len()), StatusKind::Success);
        Ok(deletions)
    }

    /// Copies a highlight's text. `Ok(false)` means the clipboard refused it.
    pub fn copy_text(&mut self, id: &str, clipboard: &mut impl Clipboard) -> Result<bool, HighlightError> {
        let text = match self.entries.iter().find(|h| h.id == id) {
            Some(h) => h.text.clone(),
            None => return Err(HighlightError::NotFound(format!("highlight {}", id))),
        };

        match clipboard.set_text(&text) {
            Ok(()) => {
                self.show_status("Copied to clipboard!", StatusKind::Success);
                Ok(true)
            }
            Err(e) => {
                tracing::warn!("clipboard write failed: {}", e);
                self.show_status("Failed to copy text", StatusKind::Error);
                Ok(false)
            }
        }
    }

    /// Exports the selection, or every highlight when nothing is selected.
    pub fn export<Tz>(&mut self, exported_at: &DateTime<Tz>) -> Option<ExportFile>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        if self.entries.is_empty() {
            self.show_status("No highlights to export", StatusKind::Warning);
            return None;
        }

        let file = if self.selected.is_empty() {
            export::render(&self.entries, exported_at)
        } else {
            export::render(self.selected(), exported_at)
        };
        self.show_status("Highlights exported!", StatusKind::Success);
        Some(file)
    }
}

fn spawn_remote_delete(client: SyncClient, store_id: String) -> JoinHandle<bool> {
    tokio::spawn(async move {
        match client.delete(&store_id).await {
            Ok(_) => {
                tracing::info!(store_id = %store_id, "deleted highlight from API");
                true
            }
            Err(e) if e.is_not_found() => {
                tracing::info!(store_id = %store_id, "highlight already gone from API");
                true
            }
            Err(e) => {
                tracing::warn!(store_id = %store_id, "API delete failed (not critical): {}", e);
                false
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::page::{PageAgent, ReplicationOutcome, TextDocument, next_local_id};
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const URL: &str = "https://blog.test/post";

    struct RecordingClipboard(Vec<String>);

    impl Clipboard for RecordingClipboard {
        fn set_text(&mut self, text: &str) -> Result<(), String> {
            self.0.push(text.to_string());
            Ok(())
        }
    }

    struct DeniedClipboard;

    impl Clipboard for DeniedClipboard {
        fn set_text(&mut self, _text: &str) -> Result<(), String> {
            Err("permission denied".to_string())
        }
    }

    /// Seeds the cache with one highlight per phrase, oldest first.
    async fn seeded(
        phrases: &[&str],
        remote: Option<SyncClient>,
    ) -> (PopupSession<MemoryStorage>, Arc<LocalCache<MemoryStorage>>, Vec<Highlight>) {
        let cache = Arc::new(LocalCache::new(MemoryStorage::new()));
        let start = Utc::now() - chrono::Duration::minutes(10);
        let mut created = Vec::new();
        for (n, phrase) in phrases.iter().enumerate() {
            let highlight = Highlight {
                id: next_local_id(),
                user_id: "u".to_string(),
                url: URL.to_string(),
                text: phrase.to_string(),
                color: Color::Yellow,
                created_at: start + chrono::Duration::seconds(n as i64),
            };
            cache.append(highlight.clone()).unwrap();
            created.push(highlight);
        }

        let handle = PageAgent::new("u", URL, TextDocument::new(phrases.join(" ")), cache.clone(), remote.clone()).spawn();
        let session = PopupSession::open(URL, handle, cache.clone(), remote).await;
        (session, cache, created)
    }

    #[test]
    fn test_preview_and_restricted_urls() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(60);
        assert_eq!(preview(&long), format!("{}...", "x".repeat(50)));

        assert!(is_restricted_url("chrome://extensions"));
        assert!(is_restricted_url("about:blank"));
        assert!(!is_restricted_url("https://chrome.test"));
    }

    #[tokio::test]
    async fn test_open_lists_newest_first_with_offline_notice() {
        let (session, _, created) = seeded(&["alpha", "beta", "gamma"], None).await;

        let texts: Vec<_> = session.entries().iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["gamma", "beta", "alpha"]);
        assert_eq!(session.source(), ListingSource::Offline);
        let status = session.status().unwrap();
        assert_eq!(status.kind, StatusKind::Warning);
        assert_eq!(status.message, "Using offline highlights");
        assert_eq!(created.len(), 3);
    }

    #[tokio::test]
    async fn test_export_all_or_selected_in_display_order() {
        let (mut session, _, created) = seeded(&["alpha", "beta", "gamma", "delta"], None).await;
        let now = Utc::now();

        let all = session.export(&now).unwrap();
        assert_eq!(all.contents.matches("   Date: ").count(), 4);
        assert!(all.contents.contains("1. delta\n"));
        assert!(all.contents.contains("4. alpha\n"));

        // Selected out of display order; export follows display order.
        session.toggle(&created[0].id);
        session.toggle(&created[2].id);
        let some = session.export(&now).unwrap();
        assert_eq!(some.contents.matches("   Date: ").count(), 2);
        let gamma = some.contents.find("1. gamma\n").unwrap();
        let alpha = some.contents.find("2. alpha\n").unwrap();
        assert!(gamma < alpha);
    }

    #[tokio::test]
    async fn test_select_all_and_deselect_all() {
        let (mut session, _, created) = seeded(&["one", "two"], None).await;

        session.select_all();
        assert_eq!(session.selected().len(), 2);
        assert!(session.is_selected(&created[1].id));

        assert!(!session.toggle(&created[1].id));
        assert_eq!(session.selected().len(), 1);

        session.deselect_all();
        assert!(session.selected().is_empty());
        assert!(!session.toggle("not-listed"));
    }

    #[tokio::test]
    async fn test_delete_is_immediate_locally() {
        let (mut session, cache, created) = seeded(&["keep", "drop"], None).await;

        let deletion = session.delete(&created[1].id).unwrap();
        assert!(deletion.remote.is_none());
        assert_eq!(session.entries().len(), 1);
        let cached: Vec<_> = cache.all().unwrap().into_iter().map(|h| h.text).collect();
        assert_eq!(cached, vec!["keep"]);
        assert_eq!(session.status().unwrap().message, "Highlight deleted!");
    }

    #[tokio::test]
    async fn test_delete_selected_requires_confirmation() {
        let (mut session, cache, _) = seeded(&["a1", "b2", "c3"], None).await;

        assert!(session.delete_selected(|_| true).unwrap().is_empty());
        assert_eq!(session.status().unwrap().message, "No highlights selected");

        session.select_all();
        assert!(session.delete_selected(|_| false).unwrap().is_empty());
        assert_eq!(cache.all().unwrap().len(), 3);

        let mut asked = 0;
        let deleted = session
            .delete_selected(|n| {
                asked = n;
                true
            })
            .unwrap();
        assert_eq!(asked, 3);
        assert_eq!(deleted.len(), 3);
        assert!(session.entries().is_empty());
        assert!(cache.all().unwrap().is_empty());
        assert!(session.export(&Utc::now()).is_none());
    }

    #[tokio::test]
    async fn test_copy_text() {
        let (mut session, _, created) = seeded(&["copy me"], None).await;

        let mut clipboard = RecordingClipboard(Vec::new());
        assert!(session.copy_text(&created[0].id, &mut clipboard).unwrap());
        assert_eq!(clipboard.0, vec!["copy me"]);

        assert!(!session.copy_text(&created[0].id, &mut DeniedClipboard).unwrap());
        assert_eq!(session.status().unwrap().kind, StatusKind::Error);

        assert!(matches!(
            session.copy_text("missing", &mut clipboard),
            Err(HighlightError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_highlight_through_agent() {
        let cache = Arc::new(LocalCache::new(MemoryStorage::new()));
        let mut doc = TextDocument::new("Selected words live here.");
        doc.select_text("words");
        let handle = PageAgent::new("u", URL, doc, cache.clone(), None).spawn();
        let mut session = PopupSession::open(URL, handle, cache.clone(), None).await;
        assert!(session.entries().is_empty());

        let highlight = session.highlight(Color::LightGreen).await.unwrap();
        assert_eq!(highlight.text, "words");
        assert_eq!(session.entries(), &[highlight]);
        assert_eq!(session.status().unwrap().message, "Highlight saved!");

        let handle = PageAgent::new("u", URL, TextDocument::new("nothing"), cache.clone(), None).spawn();
        let mut session = PopupSession::open(URL, handle, cache.clone(), None).await;
        assert!(matches!(
            session.highlight(Color::Yellow).await,
            Err(HighlightError::NoSelection)
        ));
        assert_eq!(session.status().unwrap().message, "Please select text to highlight");

        let handle = PageAgent::new("u", "chrome://settings", TextDocument::new("x"), cache.clone(), None).spawn();
        let mut session = PopupSession::open("chrome://settings", handle, cache, None).await;
        assert!(session.highlight(Color::Yellow).await.is_err());
        assert_eq!(session.status().unwrap().message, "Cannot highlight on this page");
    }

    #[tokio::test]
    async fn test_delete_propagates_to_remote_store() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/highlights"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "store-9",
                "userId": "u",
                "url": URL,
                "text": "synced",
                "color": "yellow",
                "createdAt": "2024-05-29T16:26:40.000Z"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/highlights"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "store-9",
                "userId": "u",
                "url": URL,
                "text": "synced",
                "color": "yellow",
                "createdAt": "2024-05-29T16:26:40.000Z"
            }])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/highlights/store-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Deleted", "id": "store-9"})))
            .expect(1)
            .mount(&server)
            .await;

        let remote = SyncClient::new(&server.uri(), Duration::from_secs(2), Duration::from_secs(2));
        let cache = Arc::new(LocalCache::new(MemoryStorage::new()));
        let mut doc = TextDocument::new("a synced phrase");
        doc.select_text("synced");
        let agent = PageAgent::new("u", URL, doc, cache.clone(), Some(remote.clone()));
        let applied = agent.apply_highlight(Color::Yellow).unwrap();
        applied.replication.await.unwrap();
        let handle = agent.spawn();

        let mut session = PopupSession::open(URL, handle, cache.clone(), Some(remote)).await;
        assert_eq!(session.source(), ListingSource::Remote);
        // Replicated record is listed under its local id.
        assert_eq!(session.entries().len(), 1);
        assert_eq!(session.entries()[0].id, applied.highlight.id);

        let deletion = session.delete(&applied.highlight.id).unwrap();
        assert!(cache.all().unwrap().is_empty());
        assert_eq!(cache.store_id_of(&applied.highlight.id).unwrap(), None);
        assert!(deletion.remote.unwrap().await.unwrap());
    }

    fn stored_json(id: &str, text: &str) -> serde_json::Value {
        json!({
            "id": id,
            "userId": "u",
            "url": URL,
            "text": text,
            "color": "yellow",
            "createdAt": "2024-05-29T16:26:40.000Z"
        })
    }

    async fn delete_paths(server: &MockServer) -> Vec<String> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == "DELETE")
            .map(|r| r.url.path().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_delete_during_replication_removes_server_copy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/highlights"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(stored_json("store-9", "in flight"))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/highlights"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/highlights/store-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Deleted", "id": "store-9"})))
            .mount(&server)
            .await;

        let remote = SyncClient::new(&server.uri(), Duration::from_secs(2), Duration::from_secs(2));
        let cache = Arc::new(LocalCache::new(MemoryStorage::new()));
        let mut doc = TextDocument::new("text still in flight");
        doc.select_text("in flight");
        let agent = PageAgent::new("u", URL, doc, cache.clone(), Some(remote.clone()));
        let applied = agent.apply_highlight(Color::Yellow).unwrap();
        let local_id = applied.highlight.id.clone();

        let mut session = PopupSession::open(URL, agent.spawn(), cache.clone(), Some(remote)).await;
        assert_eq!(session.entries().len(), 1);

        // No store id yet, so nothing to delete remotely.
        let deletion = session.delete(&local_id).unwrap();
        assert!(deletion.remote.is_none());

        let outcome = applied.replication.await.unwrap();
        assert_eq!(
            outcome,
            ReplicationOutcome::Discarded {
                local_id: local_id.clone(),
                store_id: "store-9".to_string()
            }
        );
        assert_eq!(cache.store_id_of(&local_id).unwrap(), None);

        session.refresh().await;
        assert!(session.entries().is_empty());
        assert_eq!(delete_paths(&server).await, vec!["/highlights/store-9"]);
    }

    #[tokio::test]
    async fn test_delete_resolves_mapped_id_without_cached_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/highlights"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([stored_json("store-7", "mapped")])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/highlights/store-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Deleted", "id": "store-7"})))
            .mount(&server)
            .await;

        let remote = SyncClient::new(&server.uri(), Duration::from_secs(2), Duration::from_secs(2));
        let cache = Arc::new(LocalCache::new(MemoryStorage::new()));
        cache.link("1700000000000", "store-7").unwrap();

        let handle = PageAgent::new("u", URL, TextDocument::default(), cache.clone(), Some(remote.clone())).spawn();
        let mut session = PopupSession::open(URL, handle, cache.clone(), Some(remote)).await;
        assert_eq!(session.entries()[0].id, "1700000000000");

        let deletion = session.delete("1700000000000").unwrap();
        assert!(deletion.remote.unwrap().await.unwrap());
        assert_eq!(cache.store_id_of("1700000000000").unwrap(), None);
        assert_eq!(delete_paths(&server).await, vec!["/highlights/store-7"]);
    }
}
