use crate::fingerprint::Fingerprint;
use crate::result::AnalysisResult;
use crate::scanner::FileScanner;
use crate::stats::{ServiceStats, WarmStats};
use crate::store::IndexStore;
use crate::watcher::{ChangeWatcher, ChangeWatcherConfig, Invalidation, WatchEvent, WatcherHealth};
use crate::{IndexerConfig, IndexerError, Result};
use context_syntax::{GrammarRegistry, LanguageId, ParseError, Position};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;

/// Notifications about index changes, for observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IndexEvent {
    /// A cached entry no longer matched the file
    Invalidated { path: PathBuf },
    Removed { path: PathBuf },
    RemovedTree { dir: PathBuf, entries: usize },
    Reindexed {
        path: PathBuf,
        fingerprint: Fingerprint,
        symbols: usize,
    },
    Evicted { path: PathBuf },
    WatchDegraded { path: PathBuf, reason: String },
}

/// Result of one path in a batch
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub path: PathBuf,
    pub result: Result<Arc<AnalysisResult>>,
}

/// Entry point for file analysis.
///
/// Reads fresh bytes on every call, serves the cached result when the
/// fingerprint still matches and parses otherwise. At most one parse per path
/// is in flight; concurrent callers for the same path wait for it and share
/// its result. Cheap to clone.
#[derive(Clone)]
pub struct AnalysisService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: IndexerConfig,
    registry: Arc<GrammarRegistry>,
    store: IndexStore,
    in_flight: StdMutex<HashMap<PathBuf, Arc<TokioMutex<()>>>>,
    parses: AtomicU64,
    events: broadcast::Sender<IndexEvent>,
}

impl AnalysisService {
    pub fn new(config: IndexerConfig, registry: Arc<GrammarRegistry>) -> Result<Self> {
        let store = IndexStore::from_config(&config);
        Self::with_store(config, registry, store)
    }

    /// Service over every built-in grammar
    pub fn with_builtins(config: IndexerConfig) -> Result<Self> {
        Self::new(config, Arc::new(GrammarRegistry::with_builtins()))
    }

    pub fn with_store(
        config: IndexerConfig,
        registry: Arc<GrammarRegistry>,
        store: IndexStore,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(256);
        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                registry,
                store,
                in_flight: StdMutex::new(HashMap::new()),
                parses: AtomicU64::new(0),
                events,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &IndexerConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn registry(&self) -> &GrammarRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn store(&self) -> &IndexStore {
        &self.inner.store
    }

    /// Analyze one file.
    ///
    /// A missing, unreadable or oversized file is an error and drops any
    /// cached entry for the path. A file without a grammar yields an
    /// `Unsupported` result, not an error.
    pub async fn analyze(&self, path: impl AsRef<Path>) -> Result<Arc<AnalysisResult>> {
        let key = canonical_key(path.as_ref()).await;

        let (bytes, fingerprint) = match self.read(&key).await {
            Ok(read) => read,
            Err(err) => {
                self.inner.drop_unreadable(&key, &err);
                return Err(err);
            }
        };

        if let Some(hit) = self.inner.store.get(&key, &fingerprint) {
            debug!("cache hit for {} ({fingerprint})", key.display());
            return Ok(hit);
        }
        debug!("cache miss for {} ({fingerprint})", key.display());

        // The parse runs on its own task so an abandoned call still finishes and caches
        let lock = self.inner.path_lock(&key);
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let guard = lock.lock_owned().await;
            // Another caller may have stored it while we waited; the outer lookup already counted
            let outcome = match inner.store.peek(&task_key, &fingerprint) {
                Some(hit) => Ok(hit),
                None => inner.parse_and_store(&task_key, bytes, fingerprint).await,
            };
            drop(guard);
            inner.release_path_lock(&task_key);
            outcome
        });

        task.await
            .map_err(|e| IndexerError::Other(format!("analysis of {} failed: {e}", key.display())))?
    }

    /// Analyze many files concurrently; one outcome per input, in input order
    pub async fn analyze_many<I, P>(&self, paths: I) -> Vec<AnalysisOutcome>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let tasks: Vec<(PathBuf, JoinHandle<Result<Arc<AnalysisResult>>>)> = paths
            .into_iter()
            .map(|path| {
                let path = path.into();
                let service = self.clone();
                let task_path = path.clone();
                (path, tokio::spawn(async move { service.analyze(&task_path).await }))
            })
            .collect();

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (path, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(IndexerError::Other(format!(
                    "analysis of {} failed: {e}",
                    path.display()
                ))),
            };
            outcomes.push(AnalysisOutcome { path, result });
        }
        outcomes
    }

    /// Scan `roots` for supported files and analyze them all
    pub async fn warm(&self, roots: &[PathBuf]) -> Result<WarmStats> {
        let started = Instant::now();
        let max_file_size = self.inner.config.max_source_bytes;
        let scan_roots = roots.to_vec();
        let files = tokio::task::spawn_blocking(move || {
            scan_roots
                .iter()
                .flat_map(|root| FileScanner::new(root).with_max_file_size(max_file_size).scan())
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| IndexerError::Other(format!("scan failed: {e}")))?;

        let mut stats = WarmStats::new();
        for outcome in self.analyze_many(files).await {
            match outcome.result {
                Ok(result) if result.is_unsupported() => stats.add_unsupported(),
                Ok(result) => stats.add_file(
                    result.language.as_str(),
                    result.symbols.len(),
                    result.errors.len(),
                ),
                Err(err) => {
                    warn!("Failed to analyze {}: {err}", outcome.path.display());
                    stats.add_error(format!("{}: {err}", outcome.path.display()));
                }
            }
        }

        stats.time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            "Warmed {} files ({} parsed, {} symbols) in {}ms",
            stats.files, stats.parsed, stats.symbols, stats.time_ms
        );
        Ok(stats)
    }

    /// Watch `roots` (or the configured roots when empty) and apply
    /// invalidations to the store as they arrive
    pub fn start_watching(&self, roots: &[PathBuf]) -> Result<WatchHandle> {
        let roots = if roots.is_empty() {
            self.inner.config.watch_roots.clone()
        } else {
            roots.to_vec()
        };

        let (sink, mut events) = mpsc::channel(1024);
        let watcher = ChangeWatcher::start(&roots, ChangeWatcherConfig::from(&self.inner.config), sink)?;

        let service = self.clone();
        let consumer = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                service.apply(event).await;
            }
            debug!("invalidation consumer finished");
        });

        Ok(WatchHandle { watcher, consumer })
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.inner.events.subscribe()
    }

    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            store: self.inner.store.stats(),
            parses: self.inner.parses.load(Ordering::Relaxed),
            in_flight: lock(&self.inner.in_flight).len(),
        }
    }

    async fn read(&self, key: &Path) -> Result<(Vec<u8>, Fingerprint)> {
        let timeout = self.inner.config.read_timeout();
        let limit = self.inner.config.max_source_bytes;
        let read_key = key.to_path_buf();
        let task = tokio::task::spawn_blocking(move || read_source(&read_key, limit));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(read)) => read,
            Ok(Err(e)) => Err(IndexerError::Other(format!("read of {} failed: {e}", key.display()))),
            Err(_) => Err(IndexerError::ReadTimeout {
                path: key.to_path_buf(),
                timeout_ms: self.inner.config.read_timeout_ms,
            }),
        }
    }

    async fn apply(&self, event: WatchEvent) {
        let store = &self.inner.store;
        match event {
            WatchEvent::Invalidate(Invalidation::Changed { path, fingerprint }) => {
                let dropped = match &fingerprint {
                    Some(fp) => store.invalidate_if_changed(&path, fp),
                    None => store.invalidate(&path),
                };
                if dropped {
                    debug!("invalidated {}", path.display());
                    self.inner.notify(IndexEvent::Invalidated { path: path.clone() });
                }

                let Some(fingerprint) = fingerprint else {
                    return;
                };
                if self.inner.config.eager_reindex
                    && !store.holds(&path, &fingerprint)
                    && self.inner.registry.supports(LanguageId::detect(&path))
                {
                    self.reindex(path).await;
                }
            }
            WatchEvent::Invalidate(Invalidation::Removed { path }) => {
                if store.invalidate(&path) {
                    debug!("removed {}", path.display());
                    self.inner.notify(IndexEvent::Removed { path });
                }
            }
            WatchEvent::Invalidate(Invalidation::RemovedTree { dir }) => {
                let entries = store.invalidate_under(&dir).len();
                debug!("removed {entries} entries under {}", dir.display());
                self.inner.notify(IndexEvent::RemovedTree { dir, entries });
            }
            WatchEvent::Degraded { path, reason } => {
                self.inner.notify(IndexEvent::WatchDegraded { path, reason });
            }
        }
    }

    async fn reindex(&self, path: PathBuf) {
        match self.analyze(&path).await {
            Ok(result) => {
                info!("Reindexed {} ({} symbols)", path.display(), result.symbols.len());
                self.inner.notify(IndexEvent::Reindexed {
                    fingerprint: result.fingerprint.clone(),
                    symbols: result.symbols.len(),
                    path,
                });
            }
            Err(err) => warn!("Eager reindex of {} failed: {err}", path.display()),
        }
    }
}

impl std::fmt::Debug for AnalysisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisService")
            .field("languages", &self.inner.registry.languages())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ServiceInner {
    fn notify(&self, event: IndexEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn path_lock(&self, key: &Path) -> Arc<TokioMutex<()>> {
        Arc::clone(lock(&self.in_flight).entry(key.to_path_buf()).or_default())
    }

    fn release_path_lock(&self, key: &Path) {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            in_flight.remove(key);
        }
    }

    fn drop_unreadable(&self, key: &Path, err: &IndexerError) {
        let event = match err {
            IndexerError::NotFound(_) => IndexEvent::Removed {
                path: key.to_path_buf(),
            },
            IndexerError::Unreadable { .. } | IndexerError::TooLarge { .. } => IndexEvent::Invalidated {
                path: key.to_path_buf(),
            },
            _ => return,
        };
        if self.store.invalidate(key) {
            debug!("dropped cached entry for {}: {err}", key.display());
            self.notify(event);
        }
    }

    async fn parse_and_store(
        &self,
        key: &Path,
        bytes: Vec<u8>,
        fingerprint: Fingerprint,
    ) -> Result<Arc<AnalysisResult>> {
        let language = LanguageId::detect_with_content(key, &bytes);
        let result = match self.registry.resolve(language) {
            None => {
                debug!("no grammar for {} ({language})", key.display());
                AnalysisResult::unsupported(key, fingerprint.clone())
            }
            Some(grammar) => {
                self.parses.fetch_add(1, Ordering::Relaxed);
                let extraction = tokio::task::spawn_blocking(move || {
                    let source = String::from_utf8_lossy(&bytes);
                    let mut extraction = grammar.analyze(&source)?;
                    if let Some(err) = invalid_utf8_error(&bytes) {
                        let at = extraction.errors.partition_point(|e| e.start <= err.start);
                        extraction.errors.insert(at, err);
                    }
                    Ok::<_, IndexerError>(extraction)
                })
                .await
                .map_err(|e| IndexerError::Other(format!("parse of {} failed: {e}", key.display())))??;
                if !extraction.errors.is_empty() {
                    debug!(
                        "{} parsed with {} error location(s)",
                        key.display(),
                        extraction.errors.len()
                    );
                }
                AnalysisResult::parsed(key, fingerprint.clone(), extraction)
            }
        };

        let result = Arc::new(result);
        for path in self.store.put(key, Arc::clone(&result), fingerprint)? {
            self.notify(IndexEvent::Evicted { path });
        }
        Ok(result)
    }
}

/// Running watch session; dropping it stops the watcher and its consumer
pub struct WatchHandle {
    watcher: ChangeWatcher,
    consumer: JoinHandle<()>,
}

impl WatchHandle {
    #[must_use]
    pub fn watcher(&self) -> &ChangeWatcher {
        &self.watcher
    }

    #[must_use]
    pub fn health(&self) -> WatcherHealth {
        self.watcher.health_snapshot()
    }

    /// Emit pending invalidations without waiting for the debounce window
    pub async fn flush(&self) -> Result<()> {
        self.watcher.flush().await
    }

    /// Stop watching and wait for queued invalidations to be applied
    pub async fn stop(self) {
        let Self { watcher, consumer } = self;
        drop(watcher);
        if let Err(e) = consumer.await {
            error!("invalidation consumer ended abnormally: {e}");
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Canonical absolute path; for a missing file the parent is canonicalized
/// so the key matches the one used while the file existed
async fn canonical_key(path: &Path) -> PathBuf {
    if let Ok(canonical) = tokio::fs::canonicalize(path).await {
        return canonical;
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => match tokio::fs::canonicalize(parent).await {
            Ok(parent) => parent.join(name),
            Err(_) => absolute,
        },
        _ => absolute,
    }
}

/// Location of the first invalid UTF-8 sequence.
///
/// Sources are decoded lossily, so positions after this point count the
/// replacement character rather than the raw bytes.
fn invalid_utf8_error(bytes: &[u8]) -> Option<ParseError> {
    let valid_up_to = std::str::from_utf8(bytes).err()?.valid_up_to();
    let prefix = &bytes[..valid_up_to];
    let line = prefix.iter().filter(|&&b| b == b'\n').count() + 1;
    let column = prefix
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(valid_up_to, |newline| valid_up_to - newline - 1);
    let at = Position::new(line, column);
    Some(ParseError {
        start: at,
        end: Position::new(line, column + 1),
        message: "invalid UTF-8; later columns on this line count U+FFFD, not raw bytes".to_string(),
    })
}

fn read_source(path: &Path, limit: u64) -> Result<(Vec<u8>, Fingerprint)> {
    let meta = std::fs::metadata(path).map_err(|e| IndexerError::from_read(path.to_path_buf(), e))?;
    if meta.is_dir() {
        return Err(IndexerError::Unreadable {
            path: path.to_path_buf(),
            source: std::io::Error::other("is a directory"),
        });
    }
    if meta.len() > limit {
        return Err(IndexerError::TooLarge {
            path: path.to_path_buf(),
            size: meta.len(),
            limit,
        });
    }

    let bytes = std::fs::read(path).map_err(|e| IndexerError::from_read(path.to_path_buf(), e))?;
    // The file may have grown since the metadata call
    if bytes.len() as u64 > limit {
        return Err(IndexerError::TooLarge {
            path: path.to_path_buf(),
            size: bytes.len() as u64,
            limit,
        });
    }
    let fingerprint = Fingerprint::of(&bytes);
    Ok((bytes, fingerprint))
}
