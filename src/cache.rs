//! Local Cache
//!
//! The extension's on-device store and the offline source of truth. Two keys live in one
//! [`Storage`]: `highlights`, the full array of records in wire shape, and `remoteIds`,
//! the table mapping local ids to the ids the record store assigned on replication.
//!
//! Every mutation reads the whole value, changes it and writes it back. Writers are not
//! coordinated across processes; the last writer wins.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::StorageError;
use crate::model::Highlight;

pub const HIGHLIGHTS_KEY: &str = "highlights";
pub const REMOTE_IDS_KEY: &str = "remoteIds";

/// Key-value persistence in the shape of `chrome.storage.local`.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let items = self
            .items
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(items.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut items = self
            .items
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        items.insert(key.to_string(), value);
        Ok(())
    }
}

/// A single JSON object on disk. Writes go through a temp file and a rename so a crash
/// never leaves a truncated file behind.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStorage {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<BTreeMap<String, Value>, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|source| StorageError::Malformed {
            key: self.path.display().to_string(),
            source,
        })
    }

    fn write_all(&self, items: &BTreeMap<String, Value>) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let bytes = serde_json::to_vec_pretty(items).map_err(StorageError::Encode)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let mut items = self.read_all()?;
        items.insert(key.to_string(), value);
        self.write_all(&items)
    }
}

/// Which id space an id belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HighlightKey {
    /// Client-generated timestamp id, the primary key in the cache.
    Local(String),
    /// Id assigned by the record store.
    Remote(String),
}

pub struct LocalCache<S> {
    storage: S,
}

impl<S: Storage> LocalCache<S> {
    pub fn new(storage: S) -> Self {
        LocalCache { storage }
    }

    fn read<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, StorageError> {
        match self.storage.get(key)? {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value).map_err(|source| StorageError::Malformed {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(value).map_err(StorageError::Encode)?;
        self.storage.set(key, value)
    }

    fn mapping(&self) -> Result<BTreeMap<String, String>, StorageError> {
        self.read(REMOTE_IDS_KEY)
    }

    pub fn all(&self) -> Result<Vec<Highlight>, StorageError> {
        self.read(HIGHLIGHTS_KEY)
    }

    /// Cached highlights whose url is exactly `url`, in storage order.
    pub fn for_page(&self, url: &str) -> Result<Vec<Highlight>, StorageError> {
        Ok(self.all()?.into_iter().filter(|h| h.url == url).collect())
    }

    pub fn append(&self, highlight: Highlight) -> Result<(), StorageError> {
        let mut highlights = self.all()?;
        highlights.push(highlight);
        self.write(HIGHLIGHTS_KEY, &highlights)
    }

    /// Records the store id a local highlight was replicated under.
    pub fn link(&self, local_id: &str, store_id: &str) -> Result<(), StorageError> {
        let mut mapping = self.mapping()?;
        mapping.insert(local_id.to_string(), store_id.to_string());
        self.write(REMOTE_IDS_KEY, &mapping)
    }

    pub fn store_id_of(&self, local_id: &str) -> Result<Option<String>, StorageError> {
        Ok(self.mapping()?.remove(local_id))
    }

    pub fn local_id_of(&self, store_id: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .mapping()?
            .into_iter()
            .find(|(_, remote)| remote == store_id)
            .map(|(local, _)| local))
    }

    /// Removes every cached entry the key resolves to, plus its mapping row.
    /// Returns the number of highlights removed.
    pub fn remove(&self, key: &HighlightKey) -> Result<usize, StorageError> {
        let mut mapping = self.mapping()?;
        let local_ids: Vec<String> = match key {
            HighlightKey::Local(id) => vec![id.clone()],
            HighlightKey::Remote(id) => mapping
                .iter()
                .filter(|(_, remote)| *remote == id)
                .map(|(local, _)| local.clone())
                .collect(),
        };

        let mut highlights = self.all()?;
        let before = highlights.len();
        highlights.retain(|h| !local_ids.contains(&h.id));
        let removed = before - highlights.len();

        let before_mapping = mapping.len();
        mapping.retain(|local, _| !local_ids.contains(local));

        if removed > 0 {
            self.write(HIGHLIGHTS_KEY, &highlights)?;
        }
        if mapping.len() != before_mapping {
            self.write(REMOTE_IDS_KEY, &mapping)?;
        }
        Ok(removed)
    }

    /// Merges a listing fetched from the record store with what the cache knows.
    ///
    /// Remote records that were replicated from this cache come back under their local
    /// id, so that the rest of the extension keeps addressing them by one key. Cached
    /// records for the page with no store id yet are appended. The result is newest first.
    pub fn reconcile(&self, url: &str, remote: Vec<Highlight>) -> Result<Vec<Highlight>, StorageError> {
        let mapping = self.mapping()?;
        let by_store_id: HashMap<&str, &str> = mapping
            .iter()
            .map(|(local, remote)| (remote.as_str(), local.as_str()))
            .collect();

        let mut merged: Vec<Highlight> = remote
            .into_iter()
            .map(|mut h| {
                if let Some(local) = by_store_id.get(h.id.as_str()) {
                    h.id = local.to_string();
                }
                h
            })
            .collect();

        for cached in self.for_page(url)? {
            let synced = mapping.contains_key(&cached.id);
            let present = merged.iter().any(|h| h.id == cached.id);
            if !synced && !present {
                merged.push(cached);
            }
        }

        merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Color, now_millis};
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    fn highlight(id: &str, url: &str, text: &str, age_secs: i64) -> Highlight {
        Highlight {
            id: id.to_string(),
            user_id: "u".to_string(),
            url: url.to_string(),
            text: text.to_string(),
            color: Color::Yellow,
            created_at: now_millis() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_append_and_filter_by_page() {
        let cache = LocalCache::new(MemoryStorage::new());
        assert!(cache.all().unwrap().is_empty());

        cache.append(highlight("1", "https://a.test", "a", 2)).unwrap();
        cache.append(highlight("2", "https://b.test", "b", 1)).unwrap();
        cache.append(highlight("3", "https://a.test/", "trailing slash", 0)).unwrap();

        let page = cache.for_page("https://a.test").unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "1");
        assert_eq!(cache.all().unwrap().len(), 3);
    }

    #[test]
    fn test_remove_by_local_and_remote_key() {
        let cache = LocalCache::new(MemoryStorage::new());
        cache.append(highlight("100", "https://a.test", "local one", 2)).unwrap();
        cache.append(highlight("200", "https://a.test", "local two", 1)).unwrap();
        cache.link("200", "abc123").unwrap();

        assert_eq!(cache.remove(&HighlightKey::Remote("abc123".into())).unwrap(), 1);
        assert_eq!(cache.store_id_of("200").unwrap(), None);
        let left: Vec<_> = cache.all().unwrap().into_iter().map(|h| h.id).collect();
        assert_eq!(left, vec!["100"]);

        assert_eq!(cache.remove(&HighlightKey::Local("100".into())).unwrap(), 1);
        assert_eq!(cache.remove(&HighlightKey::Local("100".into())).unwrap(), 0);
        assert!(cache.all().unwrap().is_empty());
    }

    #[test]
    fn test_key_spaces_do_not_collide() {
        // A store id that happens to look like another record's local id.
        let cache = LocalCache::new(MemoryStorage::new());
        cache.append(highlight("111", "https://a.test", "first", 2)).unwrap();
        cache.append(highlight("222", "https://a.test", "second", 1)).unwrap();
        cache.link("222", "111").unwrap();

        assert_eq!(cache.local_id_of("111").unwrap(), Some("222".to_string()));
        assert_eq!(cache.store_id_of("111").unwrap(), None);

        assert_eq!(cache.remove(&HighlightKey::Remote("111".into())).unwrap(), 1);
        let left: Vec<_> = cache.all().unwrap().into_iter().map(|h| h.id).collect();
        assert_eq!(left, vec!["111"]);
        assert_eq!(cache.local_id_of("111").unwrap(), None);
    }

    #[test]
    fn test_reconcile_merges_unsynced_and_maps_ids() {
        let cache = LocalCache::new(MemoryStorage::new());
        let url = "https://a.test";
        cache.append(highlight("10", url, "synced", 30)).unwrap();
        cache.append(highlight("20", url, "never replicated", 5)).unwrap();
        cache.append(highlight("30", "https://other.test", "elsewhere", 1)).unwrap();
        cache.link("10", "store-a").unwrap();

        let mut remote_synced = highlight("store-a", url, "synced", 30);
        remote_synced.created_at = Utc::now() - Duration::seconds(29);
        let remote_only = highlight("store-b", url, "from another device", 10);

        let merged = cache
            .reconcile(url, vec![remote_only.clone(), remote_synced])
            .unwrap();
        let ids: Vec<_> = merged.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["20", "store-b", "10"]);
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("highlights.json");

        let cache = LocalCache::new(FileStorage::new(&path));
        cache.append(highlight("1", "https://a.test", "durable", 0)).unwrap();
        cache.link("1", "s1").unwrap();
        drop(cache);

        let reopened = LocalCache::new(FileStorage::new(&path));
        let all = reopened.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].text, "durable");
        assert_eq!(reopened.store_id_of("1").unwrap(), Some("s1".to_string()));

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[HIGHLIGHTS_KEY][0]["userId"], "u");
    }

    #[test]
    fn test_malformed_file_is_a_storage_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("highlights.json");
        fs::write(&path, "{ not json").unwrap();

        let cache = LocalCache::new(FileStorage::new(&path));
        assert!(matches!(cache.all(), Err(StorageError::Malformed { .. })));
    }
}
