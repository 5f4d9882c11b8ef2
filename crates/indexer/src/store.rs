use crate::fingerprint::Fingerprint;
use crate::result::AnalysisResult;
use crate::stats::StoreStats;
use crate::{IndexerConfig, IndexerError, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// One cached analysis
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub result: Arc<AnalysisResult>,
    pub fingerprint: Fingerprint,
    pub last_access: Instant,
    size: usize,
}

impl IndexEntry {
    fn is_consistent(&self) -> bool {
        self.result.fingerprint == self.fingerprint
    }
}

struct StoreInner {
    entries: LruCache<PathBuf, IndexEntry>,
    bytes: usize,
    hits: u64,
    misses: u64,
    stale_misses: u64,
    evictions: u64,
}

impl StoreInner {
    fn remove(&mut self, path: &Path) -> Option<IndexEntry> {
        let entry = self.entries.pop(path)?;
        self.bytes = self.bytes.saturating_sub(entry.size);
        Some(entry)
    }
}

/// Path → analysis cache bounded by entry count and approximate byte size.
///
/// Lookups are keyed by the caller's current fingerprint: an entry computed
/// from other content is a miss. The store performs no I/O. Eviction is
/// least-recently-used and reported through the return value of [`put`].
///
/// [`put`]: IndexStore::put
pub struct IndexStore {
    inner: Mutex<StoreInner>,
    max_bytes: usize,
}

impl IndexStore {
    #[must_use]
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(StoreInner {
                entries: LruCache::new(capacity),
                bytes: 0,
                hits: 0,
                misses: 0,
                stale_misses: 0,
                evictions: 0,
            }),
            max_bytes,
        }
    }

    #[must_use]
    pub fn from_config(config: &IndexerConfig) -> Self {
        Self::new(config.max_entries, config.max_bytes)
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // Mutations never panic midway; a poisoned guard still holds a consistent cache
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached result for `path`, only if it was computed from `fingerprint`
    pub fn get(&self, path: &Path, fingerprint: &Fingerprint) -> Option<Arc<AnalysisResult>> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(entry) = inner.entries.get_mut(path) else {
            inner.misses += 1;
            return None;
        };

        if !entry.is_consistent() {
            log::warn!(
                "dropping inconsistent index entry for {} ({} vs {})",
                path.display(),
                entry.fingerprint,
                entry.result.fingerprint
            );
            inner.remove(path);
            inner.misses += 1;
            return None;
        }

        if entry.fingerprint != *fingerprint {
            log::debug!(
                "stale entry for {}: cached {}, current {}",
                path.display(),
                entry.fingerprint,
                fingerprint
            );
            inner.stale_misses += 1;
            return None;
        }

        entry.last_access = Instant::now();
        let result = Arc::clone(&entry.result);
        inner.hits += 1;
        Some(result)
    }

    /// True when an entry for `path` matches `fingerprint`; does not touch recency or counters
    pub fn holds(&self, path: &Path, fingerprint: &Fingerprint) -> bool {
        self.peek(path, fingerprint).is_some()
    }

    /// Like [`get`](Self::get) but leaves recency and counters untouched
    pub fn peek(&self, path: &Path, fingerprint: &Fingerprint) -> Option<Arc<AnalysisResult>> {
        self.lock()
            .entries
            .peek(path)
            .filter(|entry| entry.is_consistent() && entry.fingerprint == *fingerprint)
            .map(|entry| Arc::clone(&entry.result))
    }

    /// Store `result` under `path`, replacing any previous entry.
    ///
    /// Returns the paths evicted to stay within the ceilings. The newest entry
    /// is never evicted by its own insertion, even when it alone exceeds the
    /// byte ceiling.
    pub fn put(
        &self,
        path: impl Into<PathBuf>,
        result: Arc<AnalysisResult>,
        fingerprint: Fingerprint,
    ) -> Result<Vec<PathBuf>> {
        let path = path.into();
        if result.fingerprint != fingerprint {
            return Err(IndexerError::FingerprintMismatch(path));
        }

        let size = result.approx_size_bytes();
        let entry = IndexEntry {
            result,
            fingerprint,
            last_access: Instant::now(),
            size,
        };

        let mut inner = self.lock();
        let mut evicted = Vec::new();
        if let Some((old_path, old)) = inner.entries.push(path.clone(), entry) {
            inner.bytes = inner.bytes.saturating_sub(old.size);
            if old_path != path {
                evicted.push(old_path);
            }
        }
        inner.bytes += size;

        while inner.bytes > self.max_bytes && inner.entries.len() > 1 {
            let Some((old_path, old)) = inner.entries.pop_lru() else {
                break;
            };
            inner.bytes = inner.bytes.saturating_sub(old.size);
            evicted.push(old_path);
        }

        inner.evictions += evicted.len() as u64;
        drop(inner);

        for old_path in &evicted {
            log::debug!("evicted {} from the index", old_path.display());
        }
        Ok(evicted)
    }

    /// Drop the entry for `path`; true if one existed
    pub fn invalidate(&self, path: &Path) -> bool {
        self.lock().remove(path).is_some()
    }

    /// Drop every entry; returns how many were dropped
    pub fn invalidate_all(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.bytes = 0;
        count
    }

    /// Drop the entry for `path` unless it was computed from `fingerprint`.
    ///
    /// Returns true if an entry was dropped.
    pub fn invalidate_if_changed(&self, path: &Path, fingerprint: &Fingerprint) -> bool {
        let mut inner = self.lock();
        let unchanged = inner
            .entries
            .peek(path)
            .map(|entry| entry.is_consistent() && entry.fingerprint == *fingerprint);
        match unchanged {
            Some(false) => inner.remove(path).is_some(),
            Some(true) | None => false,
        }
    }

    /// Drop every entry located inside `dir`; returns the dropped paths
    pub fn invalidate_under(&self, dir: &Path) -> Vec<PathBuf> {
        let mut inner = self.lock();
        let doomed: Vec<PathBuf> = inner
            .entries
            .iter()
            .filter(|(path, _)| path.starts_with(dir))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &doomed {
            inner.remove(path);
        }
        doomed
    }

    /// Last time the entry for `path` was served or stored
    pub fn last_access(&self, path: &Path) -> Option<Instant> {
        self.lock().entries.peek(path).map(|entry| entry.last_access)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.lock();
        StoreStats {
            entries: inner.entries.len(),
            bytes: inner.bytes,
            hits: inner.hits,
            misses: inner.misses,
            stale_misses: inner.stale_misses,
            evictions: inner.evictions,
        }
    }
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("stats", &self.stats())
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::AnalysisResult;
    use pretty_assertions::assert_eq;

    fn result_for(path: &str, content: &str) -> (PathBuf, Arc<AnalysisResult>, Fingerprint) {
        let fingerprint = Fingerprint::of(content.as_bytes());
        let result = AnalysisResult::unsupported(path, fingerprint.clone());
        (PathBuf::from(path), Arc::new(result), fingerprint)
    }

    #[test]
    fn hit_requires_matching_fingerprint() {
        let store = IndexStore::new(8, usize::MAX);
        let (path, result, fp) = result_for("/repo/a.txt", "one");
        store.put(&path, result, fp.clone()).unwrap();

        assert!(store.get(&path, &fp).is_some());
        assert!(store.get(&path, &Fingerprint::of(b"two")).is_none());

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.stale_misses, 1);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn peek_leaves_counters_alone() {
        let store = IndexStore::new(8, usize::MAX);
        let (path, result, fp) = result_for("/repo/a.txt", "one");
        store.put(&path, result, fp.clone()).unwrap();

        assert!(store.peek(&path, &fp).is_some());
        assert!(store.peek(&path, &Fingerprint::of(b"two")).is_none());
        assert!(store.peek(Path::new("/repo/b.txt"), &fp).is_none());

        let stats = store.stats();
        assert_eq!((stats.hits, stats.misses, stats.stale_misses), (0, 0, 0));
    }

    #[test]
    fn put_rejects_mismatched_pairing() {
        let store = IndexStore::new(8, usize::MAX);
        let (path, result, _) = result_for("/repo/a.txt", "one");
        let err = store.put(&path, result, Fingerprint::of(b"other")).unwrap_err();
        assert!(matches!(err, IndexerError::FingerprintMismatch(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn entry_ceiling_evicts_least_recently_used() {
        let store = IndexStore::new(2, usize::MAX);
        let (a, ra, fa) = result_for("/repo/a", "a");
        let (b, rb, fb) = result_for("/repo/b", "b");
        let (c, rc, fc) = result_for("/repo/c", "c");

        store.put(&a, ra, fa.clone()).unwrap();
        store.put(&b, rb, fb).unwrap();
        // touch a so b becomes the oldest
        assert!(store.get(&a, &fa).is_some());
        let evicted = store.put(&c, rc, fc).unwrap();

        assert_eq!(evicted, vec![b]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn replacing_an_entry_is_not_an_eviction() {
        let store = IndexStore::new(2, usize::MAX);
        let (a, r1, f1) = result_for("/repo/a", "v1");
        let (_, r2, f2) = result_for("/repo/a", "v2");
        store.put(&a, r1, f1).unwrap();
        let evicted = store.put(&a, r2, f2.clone()).unwrap();

        assert!(evicted.is_empty());
        assert_eq!(store.len(), 1);
        assert!(store.get(&a, &f2).is_some());
    }

    #[test]
    fn byte_ceiling_keeps_newest_entry() {
        let (a, ra, fa) = result_for("/repo/a", "a");
        let (b, rb, fb) = result_for("/repo/b", "b");
        let one_entry = ra.approx_size_bytes();
        let store = IndexStore::new(16, one_entry + one_entry / 2);

        store.put(&a, ra, fa).unwrap();
        let evicted = store.put(&b, rb, fb.clone()).unwrap();

        assert_eq!(evicted, vec![a]);
        assert!(store.get(&b, &fb).is_some());
        assert!(store.stats().bytes <= one_entry + one_entry / 2);
    }

    #[test]
    fn invalidate_if_changed_keeps_matching_entry() {
        let store = IndexStore::new(8, usize::MAX);
        let (path, result, fp) = result_for("/repo/a", "same");
        store.put(&path, result, fp.clone()).unwrap();

        assert!(!store.invalidate_if_changed(&path, &fp));
        assert_eq!(store.len(), 1);
        assert!(store.invalidate_if_changed(&path, &Fingerprint::of(b"edited")));
        assert!(store.is_empty());
        assert!(!store.invalidate_if_changed(&path, &fp));
    }

    #[test]
    fn invalidate_under_drops_subtree_only() {
        let store = IndexStore::new(8, usize::MAX);
        for (path, content) in [
            ("/repo/src/a.py", "a"),
            ("/repo/src/pkg/b.py", "b"),
            ("/repo/srcx/c.py", "c"),
            ("/repo/d.py", "d"),
        ] {
            let (path, result, fp) = result_for(path, content);
            store.put(&path, result, fp).unwrap();
        }

        let mut dropped = store.invalidate_under(Path::new("/repo/src"));
        dropped.sort();
        assert_eq!(
            dropped,
            vec![PathBuf::from("/repo/src/a.py"), PathBuf::from("/repo/src/pkg/b.py")]
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn invalidate_and_clear() {
        let store = IndexStore::new(8, usize::MAX);
        let (a, ra, fa) = result_for("/repo/a", "a");
        let (b, rb, fb) = result_for("/repo/b", "b");
        store.put(&a, ra, fa).unwrap();
        store.put(&b, rb, fb).unwrap();

        assert!(store.invalidate(&a));
        assert!(!store.invalidate(&a));
        assert_eq!(store.invalidate_all(), 1);
        assert_eq!(store.stats().bytes, 0);
    }

    #[test]
    fn hit_refreshes_last_access() {
        let store = IndexStore::new(8, usize::MAX);
        let (path, result, fp) = result_for("/repo/a", "a");
        store.put(&path, result, fp.clone()).unwrap();
        let stored = store.last_access(&path).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        store.get(&path, &fp).unwrap();
        assert!(store.last_access(&path).unwrap() > stored);
    }
}
