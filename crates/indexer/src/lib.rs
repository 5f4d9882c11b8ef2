//! # Context Indexer
//!
//! Fingerprinted, watch-invalidated symbol index over [`context_syntax`].
//!
//! ## Pipeline
//!
//! ```text
//! analyze(path)
//!     │
//!     ├──> read bytes (timeout, size ceiling) → Fingerprint
//!     │
//!     ├──> IndexStore::get(path, fingerprint) ──> hit: cached result
//!     │
//!     └──> per-path lock → parse + extract → IndexStore::put
//!
//! ChangeWatcher (notify, debounced per path)
//!     └─> Invalidation queue ──> store mutation ──> IndexEvent broadcast
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use context_indexer::{AnalysisService, IndexerConfig};
//!
//! #[tokio::main]
//! async fn main() -> context_indexer::Result<()> {
//!     let service = AnalysisService::with_builtins(IndexerConfig::default())?;
//!     let result = service.analyze("src/app.py").await?;
//!
//!     for function in result.functions() {
//!         println!("{} at line {}", function.name, function.start.line);
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod fingerprint;
mod result;
mod scanner;
mod service;
mod stats;
mod store;
mod watcher;

pub use config::IndexerConfig;
pub use error::{IndexerError, Result};
pub use fingerprint::Fingerprint;
pub use result::{AnalysisResult, AnalysisStatus, AnalysisSummary, SymbolSummary};
pub use scanner::FileScanner;
pub use service::{AnalysisOutcome, AnalysisService, IndexEvent, WatchHandle};
pub use stats::{ServiceStats, StoreStats, WarmStats};
pub use store::{IndexEntry, IndexStore};
pub use watcher::{ChangeWatcher, ChangeWatcherConfig, Invalidation, WatchEvent, WatcherHealth};
