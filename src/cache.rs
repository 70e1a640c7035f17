//! Write-through JSON caches for title lookups and media formats.
//!
//! Each cache is one JSON object on disk, loaded fully at startup and rewritten
//! fully after every insert. Entries never expire; `clear` is the only way out.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const SEARCH_CACHE_FILE: &str = "title_ids.json";
pub const FORMAT_CACHE_FILE: &str = "media_formats.json";

/// Title -> resolved candidate ids.
pub type SearchCache = JsonCache<Vec<u64>>;
/// Media id (as a string key) -> media format.
pub type FormatCache = JsonCache<String>;

pub struct JsonCache<V> {
    path: PathBuf,
    entries: BTreeMap<String, V>,
}

impl<V> JsonCache<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Loads the cache at `path`. A missing or unreadable file yields an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, V>>(&content) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(
                        "Ignoring corrupt cache file {}: {}",
                        path.display(),
                        err
                    );
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                warn!("Failed to read cache file {}: {}", path.display(), err);
                BTreeMap::new()
            }
        };
        debug!("Loaded {} cache entries from {}", entries.len(), path.display());
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores `value` under `key` and rewrites the backing file.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> io::Result<()> {
        self.entries.insert(key.into(), value);
        self.persist()
    }

    /// Drops every entry and deletes the backing file.
    pub fn clear(&mut self) -> io::Result<()> {
        self.entries.clear();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn persist(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, content)
    }
}

pub fn open_search_cache(cache_dir: &Path) -> SearchCache {
    JsonCache::load(cache_dir.join(SEARCH_CACHE_FILE))
}

pub fn open_format_cache(cache_dir: &Path) -> FormatCache {
    JsonCache::load(cache_dir.join(FORMAT_CACHE_FILE))
}

#[cfg(test)]
mod tests {
    use super::{open_format_cache, open_search_cache, SearchCache};

    #[test]
    fn test_insert_is_persisted_immediately() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut cache = open_search_cache(dir.path());
        cache
            .insert("Berserk", vec![30002])
            .expect("insert should persist");

        let reloaded = open_search_cache(dir.path());
        assert_eq!(reloaded.get("Berserk"), Some(&vec![30002]));
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_namespaces_are_independent_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut search = open_search_cache(dir.path());
        let mut formats = open_format_cache(dir.path());
        search.insert("Berserk", vec![1]).expect("insert");
        formats.insert("1", "MANGA".to_string()).expect("insert");

        assert_ne!(search.path(), formats.path());
        assert!(open_search_cache(dir.path()).get("1").is_none());
        assert_eq!(
            open_format_cache(dir.path()).get("1").map(String::as_str),
            Some("MANGA")
        );
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").expect("write");

        let cache = SearchCache::load(&path);

        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_removes_file_and_entries() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut cache = open_search_cache(dir.path());
        cache.insert("Berserk", vec![1]).expect("insert");

        cache.clear().expect("clear");
        cache.clear().expect("clearing twice is fine");

        assert!(cache.is_empty());
        assert!(!cache.path().exists());
    }
}
