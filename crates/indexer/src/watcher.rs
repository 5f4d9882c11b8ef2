use crate::fingerprint::Fingerprint;
use crate::scanner::is_ignored_scope;
use crate::{IndexerConfig, IndexerError, Result};
use ignore::WalkBuilder;
use log::{debug, info, warn};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio::time;

/// A cache entry that may no longer describe the file system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// File was created or written; `fingerprint` is `None` when it could not be read
    Changed {
        path: PathBuf,
        fingerprint: Option<Fingerprint>,
    },
    Removed {
        path: PathBuf,
    },
    /// A watched directory disappeared with everything below it
    RemovedTree {
        dir: PathBuf,
    },
}

impl Invalidation {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Changed { path, .. } | Self::Removed { path } => path,
            Self::RemovedTree { dir } => dir,
        }
    }
}

/// Messages the watcher pushes to its consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Invalidate(Invalidation),
    /// A subtree is no longer observed
    Degraded { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy)]
pub struct ChangeWatcherConfig {
    /// Quiet period per path before an invalidation is emitted
    pub debounce: Duration,
    pub notify_poll_interval: Duration,
    /// Files above this size are reported without a fingerprint
    pub max_source_bytes: u64,
    /// Bound on stat plus read while fingerprinting a changed file
    pub read_timeout: Duration,
}

impl Default for ChangeWatcherConfig {
    fn default() -> Self {
        Self::from(&IndexerConfig::default())
    }
}

impl From<&IndexerConfig> for ChangeWatcherConfig {
    fn from(config: &IndexerConfig) -> Self {
        Self {
            debounce: config.debounce(),
            notify_poll_interval: config.notify_poll_interval(),
            max_source_bytes: config.max_source_bytes,
            read_timeout: config.read_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WatcherHealth {
    pub roots: Vec<PathBuf>,
    pub watched_dirs: usize,
    pub degraded: Vec<PathBuf>,
    pub pending_paths: usize,
    pub invalidations_sent: u64,
    pub last_event: Option<SystemTime>,
    pub last_error: Option<String>,
}

type SharedWatcher = Arc<Mutex<Option<RecommendedWatcher>>>;
type WatchState = Arc<Mutex<HashSet<PathBuf>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Background observer of a set of root directories.
///
/// Every directory of a root that is not an ignored scope carries a
/// non-recursive watch; directories created later are picked up as they
/// appear. Events are debounced per path and turned into [`WatchEvent`]s on
/// the sink channel. The watcher stops when the last handle is dropped or the
/// sink is closed.
#[derive(Clone)]
pub struct ChangeWatcher {
    inner: Arc<ChangeWatcherInner>,
}

struct ChangeWatcherInner {
    command_tx: mpsc::Sender<WatcherCommand>,
    health_tx: watch::Sender<WatcherHealth>,
    watch_state: WatchState,
    _watcher: SharedWatcher,
}

enum WatcherCommand {
    Flush,
    Shutdown,
}

impl ChangeWatcher {
    /// Start watching `roots`; must be called inside a tokio runtime.
    ///
    /// Roots that cannot be watched are reported as [`WatchEvent::Degraded`];
    /// start fails only when none can.
    pub fn start(
        roots: &[PathBuf],
        config: ChangeWatcherConfig,
        sink: mpsc::Sender<WatchEvent>,
    ) -> Result<Self> {
        if roots.is_empty() {
            return Err(IndexerError::InvalidConfig("no watch roots configured".to_string()));
        }

        let mut degraded = Vec::new();
        let mut canonical_roots = Vec::new();
        for root in roots {
            match std::fs::canonicalize(root) {
                Ok(path) if path.is_dir() => canonical_roots.push(path),
                Ok(path) => degraded.push((path, "not a directory".to_string())),
                Err(err) => degraded.push((root.clone(), err.to_string())),
            }
        }
        canonical_roots.sort();
        canonical_roots.dedup();

        if canonical_roots.is_empty() {
            let (path, reason) = degraded
                .into_iter()
                .next()
                .unwrap_or_else(|| (PathBuf::new(), "no watchable roots".to_string()));
            return Err(IndexerError::WatchDegraded { path, reason });
        }

        let (event_tx, event_rx) = mpsc::channel(1024);
        let (command_tx, command_rx) = mpsc::channel(16);

        let (watcher, watch_state, failures) =
            create_fs_watcher(&canonical_roots, event_tx, config.notify_poll_interval)?;
        degraded.extend(failures);
        let watcher = Arc::new(Mutex::new(Some(watcher)));

        let watched_dirs = lock(&watch_state).len();
        let (health_tx, _) = watch::channel(WatcherHealth {
            roots: canonical_roots.clone(),
            watched_dirs,
            ..WatcherHealth::default()
        });
        info!(
            "watching {} directories under {} root(s)",
            watched_dirs,
            canonical_roots.len()
        );

        let watch_loop = WatchLoop {
            roots: canonical_roots,
            config,
            sink,
            watcher: watcher.clone(),
            watch_state: watch_state.clone(),
            health_tx: health_tx.clone(),
        };
        for (path, reason) in degraded {
            watch_loop.mark_degraded_now(path, reason);
        }
        spawn_watch_loop(watch_loop, event_rx, command_rx);

        Ok(Self {
            inner: Arc::new(ChangeWatcherInner {
                command_tx,
                health_tx,
                watch_state,
                _watcher: watcher,
            }),
        })
    }

    /// Number of directories currently carrying a watch
    #[must_use]
    pub fn watch_count(&self) -> usize {
        lock(&self.inner.watch_state).len()
    }

    /// Emit every pending path now instead of waiting for its quiet period
    pub async fn flush(&self) -> Result<()> {
        self.inner
            .command_tx
            .send(WatcherCommand::Flush)
            .await
            .map_err(|e| IndexerError::Other(format!("failed to send flush: {e}")))
    }

    #[must_use]
    pub fn health_snapshot(&self) -> WatcherHealth {
        self.inner.health_tx.borrow().clone()
    }

    #[must_use]
    pub fn health_stream(&self) -> watch::Receiver<WatcherHealth> {
        self.inner.health_tx.subscribe()
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            let _ = self.inner.command_tx.try_send(WatcherCommand::Shutdown);
        }
    }
}

fn create_fs_watcher(
    roots: &[PathBuf],
    sender: mpsc::Sender<notify::Result<Event>>,
    poll_interval: Duration,
) -> Result<(RecommendedWatcher, WatchState, Vec<(PathBuf, String)>)> {
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = sender.blocking_send(res);
        },
        NotifyConfig::default().with_poll_interval(poll_interval),
    )
    .map_err(|e| IndexerError::Other(format!("watcher init failed: {e}")))?;

    let mut watched = HashSet::new();
    let mut failures = Vec::new();
    for root in roots {
        for dir in build_watch_list(root, root) {
            if let Err(err) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                failures.push((dir, err.to_string()));
                continue;
            }
            watched.insert(dir);
        }
    }
    Ok((watcher, Arc::new(Mutex::new(watched)), failures))
}

/// Watchable directories at or below `start`
fn build_watch_list(root: &Path, start: &Path) -> Vec<PathBuf> {
    let root_owned = root.to_path_buf();
    let mut builder = WalkBuilder::new(start);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true);
    builder.filter_entry(move |entry| is_watchable_dir(&root_owned, entry.path()));

    let mut out = Vec::new();
    for entry in builder.build() {
        let Ok(entry) = entry else {
            continue;
        };
        if entry.file_type().is_some_and(|ft| ft.is_dir()) && is_watchable_dir(root, entry.path()) {
            out.push(entry.path().to_path_buf());
        }
    }
    out
}

fn is_watchable_dir(root: &Path, path: &Path) -> bool {
    if path == root {
        return true;
    }
    path.starts_with(root) && !is_ignored_scope(root, path) && !has_hidden_component(root, path)
}

fn has_hidden_component(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    relative.components().any(|component| match component {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

/// True for paths inside a root that are neither hidden nor in an ignored scope
fn is_relevant_path(roots: &[PathBuf], path: &Path) -> bool {
    roots
        .iter()
        .find(|root| path.starts_with(root))
        .is_some_and(|root| !is_ignored_scope(root, path) && !has_hidden_component(root, path))
}

struct WatchLoop {
    roots: Vec<PathBuf>,
    config: ChangeWatcherConfig,
    sink: mpsc::Sender<WatchEvent>,
    watcher: SharedWatcher,
    watch_state: WatchState,
    health_tx: watch::Sender<WatcherHealth>,
}

fn spawn_watch_loop(
    ctx: WatchLoop,
    mut event_rx: mpsc::Receiver<notify::Result<Event>>,
    mut command_rx: mpsc::Receiver<WatcherCommand>,
) {
    tokio::spawn(async move {
        let mut debouncer = PathDebouncer::new(ctx.config.debounce);

        loop {
            let next_deadline = debouncer.next_deadline();

            tokio::select! {
                Some(event) = event_rx.recv() => {
                    if !ctx.handle_event(event, &mut debouncer).await {
                        break;
                    }
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(WatcherCommand::Flush) => {
                            let due = debouncer.drain();
                            if !ctx.emit(due, &debouncer).await {
                                break;
                            }
                        }
                        Some(WatcherCommand::Shutdown) | None => break,
                    }
                }
                () = async {
                    if let Some(deadline) = next_deadline {
                        time::sleep_until(time::Instant::from_std(deadline)).await;
                    }
                }, if next_deadline.is_some() => {
                    let due = debouncer.take_due(Instant::now());
                    if !ctx.emit(due, &debouncer).await {
                        break;
                    }
                }
            }
        }

        ctx.shutdown();
    });
}

impl WatchLoop {
    /// Returns false once the consumer is gone
    async fn handle_event(
        &self,
        event: notify::Result<Event>,
        debouncer: &mut PathDebouncer,
    ) -> bool {
        match event {
            Ok(evt) => {
                // Our own reads generate access events
                if matches!(evt.kind, EventKind::Access(_)) {
                    return true;
                }

                let mut alive = true;
                for dir in self.new_watchable_dirs(&evt) {
                    alive &= self.add_watch_tree(&dir).await;
                }

                let now = Instant::now();
                let mut recorded = false;
                for path in evt.paths {
                    if is_relevant_path(&self.roots, &path) {
                        if debouncer.record(path.clone(), now) {
                            debug!("superseded pending invalidation for {}", path.display());
                        }
                        recorded = true;
                    }
                }
                if recorded {
                    let pending = debouncer.pending();
                    self.health_tx.send_modify(|h| {
                        h.pending_paths = pending;
                        h.last_event = Some(SystemTime::now());
                    });
                }
                alive
            }
            Err(err) => {
                warn!("Watcher error: {err}");
                let reason = err.to_string();
                self.health_tx
                    .send_modify(|h| h.last_error = Some(reason.clone()));
                let mut alive = true;
                for path in err.paths {
                    alive &= self.mark_degraded(path, reason.clone()).await;
                }
                alive
            }
        }
    }

    fn new_watchable_dirs(&self, evt: &Event) -> Vec<PathBuf> {
        if !matches!(evt.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any) {
            return Vec::new();
        }
        let watched = lock(&self.watch_state);
        evt.paths
            .iter()
            .filter(|path| !watched.contains(*path))
            .filter(|path| std::fs::metadata(path).is_ok_and(|meta| meta.is_dir()))
            .filter(|path| {
                self.roots
                    .iter()
                    .any(|root| path.starts_with(root) && is_watchable_dir(root, path))
            })
            .cloned()
            .collect()
    }

    async fn add_watch_tree(&self, start: &Path) -> bool {
        let Some(root) = self.roots.iter().find(|root| start.starts_with(root)) else {
            return true;
        };

        let new_dirs: Vec<PathBuf> = {
            let mut watched = lock(&self.watch_state);
            build_watch_list(root, start)
                .into_iter()
                .filter(|dir| watched.insert(dir.clone()))
                .collect()
        };
        if new_dirs.is_empty() {
            return true;
        }

        let mut failures = Vec::new();
        {
            let mut guard = lock(&self.watcher);
            let Some(watcher) = guard.as_mut() else {
                return true;
            };
            for dir in &new_dirs {
                match watcher.watch(dir, RecursiveMode::NonRecursive) {
                    Ok(()) => debug!("watching new directory {}", dir.display()),
                    Err(err) => failures.push((dir.clone(), err.to_string())),
                }
            }
        }

        let watched_dirs = {
            let mut watched = lock(&self.watch_state);
            for (dir, _) in &failures {
                watched.remove(dir);
            }
            watched.len()
        };
        self.health_tx.send_modify(|h| h.watched_dirs = watched_dirs);

        let mut alive = true;
        for (dir, reason) in failures {
            alive &= self.mark_degraded(dir, reason).await;
        }
        alive
    }

    /// Forget `dir` and every watched directory below it; true if any was watched
    fn forget_watch_tree(&self, dir: &Path) -> bool {
        let removed: Vec<PathBuf> = {
            let mut watched = lock(&self.watch_state);
            let removed: Vec<PathBuf> = watched
                .iter()
                .filter(|watched_dir| watched_dir.starts_with(dir))
                .cloned()
                .collect();
            for path in &removed {
                watched.remove(path);
            }
            removed
        };
        if removed.is_empty() {
            return false;
        }

        if let Some(watcher) = lock(&self.watcher).as_mut() {
            for path in &removed {
                // The backend usually drops the watch itself once the directory is gone
                let _ = watcher.unwatch(path);
            }
        }
        let watched_dirs = lock(&self.watch_state).len();
        self.health_tx.send_modify(|h| h.watched_dirs = watched_dirs);
        true
    }

    fn record_degraded(&self, path: &Path, reason: &str) {
        let err = IndexerError::WatchDegraded {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        warn!("{err}");
        self.health_tx.send_modify(|h| {
            if !h.degraded.iter().any(|p| p == path) {
                h.degraded.push(path.to_path_buf());
            }
            h.last_error = Some(err.to_string());
        });
    }

    fn mark_degraded_now(&self, path: PathBuf, reason: String) {
        self.record_degraded(&path, &reason);
        let _ = self.sink.try_send(WatchEvent::Degraded { path, reason });
    }

    async fn mark_degraded(&self, path: PathBuf, reason: String) -> bool {
        self.record_degraded(&path, &reason);
        self.sink
            .send(WatchEvent::Degraded { path, reason })
            .await
            .is_ok()
    }

    async fn resolve(&self, path: PathBuf) -> Option<Invalidation> {
        let Ok(meta) = time::timeout(self.config.read_timeout, tokio::fs::metadata(&path)).await else {
            warn!("timed out reading metadata of {}", path.display());
            return Some(Invalidation::Changed {
                path,
                fingerprint: None,
            });
        };
        match meta {
            // New directories are handled by watch registration
            Ok(meta) if meta.is_dir() => None,
            Ok(meta) if meta.len() > self.config.max_source_bytes => Some(Invalidation::Changed {
                path,
                fingerprint: None,
            }),
            Ok(_) => Some(fingerprint_file(path, &self.config).await),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if !self.forget_watch_tree(&path) {
                    return Some(Invalidation::Removed { path });
                }
                if self.roots.contains(&path) {
                    self.record_degraded(&path, "watched root was removed");
                    let _ = self
                        .sink
                        .send(WatchEvent::Degraded {
                            path: path.clone(),
                            reason: "watched root was removed".to_string(),
                        })
                        .await;
                } else {
                    info!("stopped watching removed directory {}", path.display());
                }
                Some(Invalidation::RemovedTree { dir: path })
            }
            Err(err) => {
                debug!("cannot stat {}: {err}", path.display());
                Some(Invalidation::Changed {
                    path,
                    fingerprint: None,
                })
            }
        }
    }

    /// Send invalidations for `paths`; returns false once the consumer is gone
    async fn emit(&self, paths: Vec<PathBuf>, debouncer: &PathDebouncer) -> bool {
        let mut sent = 0u64;
        let mut alive = true;
        for path in paths {
            let Some(invalidation) = self.resolve(path).await else {
                continue;
            };
            debug!("invalidation: {invalidation:?}");
            if self.sink.send(WatchEvent::Invalidate(invalidation)).await.is_err() {
                alive = false;
                break;
            }
            sent += 1;
        }

        let pending = debouncer.pending();
        self.health_tx.send_modify(|h| {
            h.invalidations_sent += sent;
            h.pending_paths = pending;
        });
        alive
    }

    fn shutdown(&self) {
        lock(&self.watcher).take();
        lock(&self.watch_state).clear();
        self.health_tx.send_modify(|h| {
            h.watched_dirs = 0;
            h.pending_paths = 0;
        });
        info!("change watcher stopped");
    }
}

/// Invalidation for a file that existed when it was stat'ed
async fn fingerprint_file(path: PathBuf, config: &ChangeWatcherConfig) -> Invalidation {
    let unreadable = |path| Invalidation::Changed {
        path,
        fingerprint: None,
    };
    match time::timeout(config.read_timeout, tokio::fs::read(&path)).await {
        Err(_) => {
            warn!(
                "timed out after {}ms fingerprinting {}",
                config.read_timeout.as_millis(),
                path.display()
            );
            unreadable(path)
        }
        // Grew past the ceiling between stat and read
        Ok(Ok(bytes)) if bytes.len() as u64 > config.max_source_bytes => unreadable(path),
        Ok(Ok(bytes)) => Invalidation::Changed {
            fingerprint: Some(Fingerprint::of(&bytes)),
            path,
        },
        Ok(Err(err)) if err.kind() == ErrorKind::NotFound => Invalidation::Removed { path },
        Ok(Err(err)) => {
            debug!("cannot fingerprint {}: {err}", path.display());
            unreadable(path)
        }
    }
}

/// Per-path quiet-period timers.
///
/// Recording a path that already has a pending timer replaces that timer, so
/// a burst of writes yields one due path once the burst has been quiet for
/// the whole window.
#[derive(Debug)]
pub(crate) struct PathDebouncer {
    window: Duration,
    deadlines: HashMap<PathBuf, Instant>,
}

impl PathDebouncer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            deadlines: HashMap::new(),
        }
    }

    /// Returns true if a pending timer for `path` was superseded
    pub(crate) fn record(&mut self, path: PathBuf, now: Instant) -> bool {
        self.deadlines.insert(path, now + self.window).is_some()
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return the paths whose quiet period has elapsed, sorted
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut due: Vec<PathBuf> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &due {
            self.deadlines.remove(path);
        }
        due.sort();
        due
    }

    pub(crate) fn drain(&mut self) -> Vec<PathBuf> {
        let mut all: Vec<PathBuf> = self.deadlines.drain().map(|(path, _)| path).collect();
        all.sort();
        all
    }

    pub(crate) fn pending(&self) -> usize {
        self.deadlines.len()
    }
}
