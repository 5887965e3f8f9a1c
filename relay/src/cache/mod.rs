//! C6 — Static-content file cache (§3 "File-cache entry", §4.6).
//!
//! Mirrors a directory tree into memory, keeps a reverse index from root
//! path to the cache keys it produced, and watches the filesystem for
//! changes so the cache stays live without a restart. One lock guards the
//! whole mutable structure; readers never block other readers. Built on
//! `notify`/`glob`/`mime_guess` for filesystem watching and content-type
//! inference.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use percent_encoding::percent_decode_str;

/// Callback invoked once per file during `insert_path` (and again for every
/// watcher-observed change) that decides how to encode the cache entry. The
/// HTTP layer uses this to prebuild a 200 response with content-type and
/// `Cache-Control` instead of caching raw bytes (§4.6).
pub type InsertHandler = Arc<dyn Fn(&FileCache, &str, Vec<u8>, Option<Duration>) + Send + Sync>;

struct CacheEntry {
    value: Vec<u8>,
    inserted_at: Instant,
    ttl: Option<Duration>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.inserted_at.elapsed() >= ttl,
            None => false,
        }
    }
}

struct PathEntry {
    prefix: String,
    filter: Option<glob::Pattern>,
    ttl: Option<Duration>,
    handler: InsertHandler,
    _watcher: Option<RecommendedWatcher>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    reverse_index: HashMap<PathBuf, HashSet<String>>,
    paths: HashMap<PathBuf, PathEntry>,
}

pub struct FileCache {
    inner: RwLock<Inner>,
    log: slog::Logger,
}

impl FileCache {
    pub fn new(log: slog::Logger) -> Arc<FileCache> {
        Arc::new(FileCache {
            inner: RwLock::new(Inner::default()),
            log,
        })
    }

    // --- plain key/value entries --------------------------------------

    pub fn add(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        self.inner.write().entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    pub fn find(&self, key: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read();
        inner.entries.get(key).filter(|e| !e.is_expired()).map(|e| e.value.clone())
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.write().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.reverse_index.clear();
        inner.paths.clear();
    }

    // --- directory import ------------------------------------------------

    /// Keys derived from `root` are returned as they'd appear in the reverse
    /// index: every path segment percent-decoded, joined with `/`, rooted at
    /// `prefix`.
    fn path_to_key(root: &Path, file: &Path, prefix: &str) -> String {
        let relative = file.strip_prefix(root).unwrap_or(file);
        let mut key = prefix.trim_end_matches('/').to_string();
        for component in relative.components() {
            let raw = component.as_os_str().to_string_lossy();
            let decoded = percent_decode_str(&raw).decode_utf8_lossy();
            key.push('/');
            key.push_str(&decoded);
        }
        if key.is_empty() {
            "/".to_string()
        } else {
            key
        }
    }

    fn walk_files(root: &Path, filter: &Option<glob::Pattern>, out: &mut Vec<PathBuf>) {
        let entries = match std::fs::read_dir(root) {
            Ok(e) => e,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                Self::walk_files(&path, filter, out);
            } else if filter.as_ref().map_or(true, |f| f.matches_path(&path)) {
                out.push(path);
            }
        }
    }

    /// Walks `root`, inserting every matching file via `handler`, and attaches
    /// a filesystem watcher that keeps the cache in sync afterwards (§4.6).
    /// Returns `false` if the initial walk failed outright.
    pub fn insert_path(
        self: &Arc<Self>,
        root: &Path,
        prefix: &str,
        filter: Option<&str>,
        ttl: Option<Duration>,
        handler: InsertHandler,
    ) -> bool {
        let pattern = match filter.map(glob::Pattern::new) {
            Some(Ok(p)) => Some(p),
            Some(Err(_)) => return false,
            None => None,
        };

        let mut files = Vec::new();
        Self::walk_files(root, &pattern, &mut files);

        let mut keys = HashSet::new();
        for file in &files {
            let bytes = match std::fs::read(file) {
                Ok(b) => b,
                Err(_) => continue,
            };
            let key = Self::path_to_key(root, file, prefix);
            handler(self, &key, bytes, ttl);
            keys.insert(key);
        }

        {
            let mut inner = self.inner.write();
            inner.reverse_index.insert(root.to_path_buf(), keys);
            inner.paths.insert(
                root.to_path_buf(),
                PathEntry {
                    prefix: prefix.to_string(),
                    filter: pattern.clone(),
                    ttl,
                    handler: handler.clone(),
                    _watcher: None,
                },
            );
        }

        // Spawned only after the initial keys are visible, so a watch event
        // racing with this call can only add to `reverse_index`, never lose
        // keys the initial walk already recorded.
        let watcher = self.clone().spawn_watcher(root.to_path_buf(), prefix.to_string(), pattern, ttl, handler);
        if let Some(entry) = self.inner.write().paths.get_mut(root) {
            entry._watcher = watcher;
        }

        true
    }

    fn spawn_watcher(
        self: Arc<Self>,
        root: PathBuf,
        prefix: String,
        filter: Option<glob::Pattern>,
        ttl: Option<Duration>,
        handler: InsertHandler,
    ) -> Option<RecommendedWatcher> {
        let cache = self;
        let watch_root = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<NotifyEvent>| {
            let event = match res {
                Ok(e) => e,
                Err(_) => return,
            };
            cache.handle_watch_event(&root, &prefix, &filter, ttl, &handler, event);
        })
        .ok()?;

        watcher.watch(&watch_root, RecursiveMode::Recursive).ok()?;
        Some(watcher)
    }

    fn handle_watch_event(
        &self,
        root: &Path,
        prefix: &str,
        filter: &Option<glob::Pattern>,
        ttl: Option<Duration>,
        handler: &InsertHandler,
        event: NotifyEvent,
    ) {
        let matches_filter = |p: &Path| filter.as_ref().map_or(true, |f| f.matches_path(p));

        match event.kind {
            EventKind::Remove(_) => {
                for path in &event.paths {
                    let key = Self::path_to_key(root, path, prefix);
                    self.remove(&key);
                    let mut inner = self.inner.write();
                    if let Some(keys) = inner.reverse_index.get_mut(root) {
                        keys.remove(&key);
                    }
                }
            }
            // A directory rename surfaces as a Modify(Name) event; per the
            // redesign note this is handled as an unconditional remove+insert
            // over every affected path rather than trying to patch the key.
            EventKind::Create(_) | EventKind::Modify(_) => {
                for path in &event.paths {
                    if path.is_dir() || !matches_filter(path) {
                        continue;
                    }
                    let key = Self::path_to_key(root, path, prefix);
                    self.remove(&key);
                    if let Ok(bytes) = std::fs::read(path) {
                        handler(self, &key, bytes, ttl);
                        let mut inner = self.inner.write();
                        inner.reverse_index.entry(root.to_path_buf()).or_default().insert(key);
                    }
                }
            }
            _ => {}
        }
    }

    pub fn remove_path(&self, root: &Path) {
        let mut inner = self.inner.write();
        if let Some(keys) = inner.reverse_index.remove(root) {
            for key in keys {
                inner.entries.remove(&key);
            }
        }
        inner.paths.remove(root);
    }

    /// Looks up the cache entry for a filesystem path by finding which
    /// imported root it falls under and reconstructing its key.
    pub fn find_path(&self, path: &Path) -> Option<Vec<u8>> {
        let (root, prefix) = {
            let inner = self.inner.read();
            inner
                .paths
                .iter()
                .find(|(root, _)| path.starts_with(root))
                .map(|(root, entry)| (root.clone(), entry.prefix.clone()))?
        };
        let key = Self::path_to_key(&root, path, &prefix);
        self.find(&key)
    }

    /// Keys currently recorded in the reverse index for `root` (§8 property
    /// 9). Exposed for callers (and tests) that want to verify cache/reverse
    /// index agreement.
    pub fn keys_for_root(&self, root: &Path) -> HashSet<String> {
        self.inner.read().reverse_index.get(root).cloned().unwrap_or_default()
    }
}

/// Infers a `Content-Type` value from a file's extension (§6 "content-type
/// inferred from file extension for static content").
pub fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn handler() -> InsertHandler {
        Arc::new(|cache: &FileCache, key: &str, bytes: Vec<u8>, ttl: Option<Duration>| {
            cache.add(key, bytes, ttl);
        })
    }

    #[test]
    fn insert_path_populates_cache_and_reverse_index_consistently() {
        let dir = std::env::temp_dir().join(format!("relay-cache-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::File::create(dir.join("index.html")).unwrap().write_all(b"<html/>").unwrap();

        let cache = FileCache::new(flux::logging::null_logger());
        assert!(cache.insert_path(&dir, "/", None, None, handler()));

        let keys = cache.keys_for_root(&dir);
        assert_eq!(keys.len(), 1);
        for key in &keys {
            assert!(cache.find(key).is_some());
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn remove_path_drops_every_key_from_that_root() {
        let dir = std::env::temp_dir().join(format!("relay-cache-test-remove-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::File::create(dir.join("a.txt")).unwrap().write_all(b"a").unwrap();

        let cache = FileCache::new(flux::logging::null_logger());
        cache.insert_path(&dir, "/", None, None, handler());
        assert!(!cache.keys_for_root(&dir).is_empty());

        cache.remove_path(&dir);
        assert!(cache.keys_for_root(&dir).is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn content_type_is_inferred_from_extension() {
        assert_eq!(content_type_for(Path::new("index.html")), "text/html");
    }
}
