//! Concurrent batch uploads over a bounded worker pool.
//!
//! Each item runs as its own tokio task, gated by a semaphore with
//! `workers` permits. A failed (or panicked) item is recorded and never
//! affects its siblings. With a deadline, items still running when it
//! elapses are aborted and reported as [`MimirError::Timeout`]; results
//! that finished in time are kept.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::providers::{StorageProvider, UploadSource};
use crate::{MimirError, Result};

/// Upper bound for the default worker count.
const MAX_DEFAULT_WORKERS: usize = 32;

/// One unit of batch work.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub source: UploadSource,
    /// Logical name; key of the result map and of the cache entry.
    pub name: String,
}

impl BatchItem {
    pub fn new(source: UploadSource, name: impl Into<String>) -> Self {
        Self {
            source,
            name: name.into(),
        }
    }

    /// A file item named after the file's own name.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::new(UploadSource::File(path), name)
    }
}

/// Per-item outcomes of a batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Logical name → identifier or error.
    pub results: HashMap<String, Result<String>>,
    pub elapsed: Duration,
}

impl BatchReport {
    /// Successful items as `(name, identifier)`.
    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &str)> {
        self.results
            .iter()
            .filter_map(|(name, r)| r.as_ref().ok().map(|id| (name.as_str(), id.as_str())))
    }

    /// Failed items as `(name, error)`.
    pub fn failed(&self) -> impl Iterator<Item = (&str, &MimirError)> {
        self.results
            .iter()
            .filter_map(|(name, r)| r.as_ref().err().map(|e| (name.as_str(), e)))
    }

    pub fn success_count(&self) -> usize {
        self.results.values().filter(|r| r.is_ok()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Fans uploads out to one provider.
pub struct BatchUploader {
    provider: Arc<dyn StorageProvider>,
    workers: usize,
    deadline: Option<Duration>,
}

impl BatchUploader {
    pub fn new(provider: Arc<dyn StorageProvider>) -> Self {
        Self {
            provider,
            workers: default_workers(),
            deadline: None,
        }
    }

    /// Maximum concurrent uploads (minimum 1).
    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n.max(1);
        self
    }

    /// Bound the whole batch.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Upload every item and collect per-item results.
    ///
    /// Never fails as a whole. Items sharing a name collapse into one
    /// result (the last to finish wins, like the cache).
    pub async fn upload_all(&self, items: Vec<BatchItem>) -> BatchReport {
        let started = Instant::now();
        let deadline = self.deadline.map(|d| started + d);
        let provider_name = self.provider.name().to_owned();
        let semaphore = Arc::new(Semaphore::new(self.workers));

        let mut pending: HashSet<String> = HashSet::with_capacity(items.len());
        let mut tasks = JoinSet::new();
        for item in items {
            pending.insert(item.name.clone());
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // The semaphore is never closed, so acquiring only waits.
                let _permit = semaphore.acquire_owned().await;
                let result = provider.upload(item.source, Some(&item.name)).await;
                (item.name, result)
            });
        }
        debug!(provider = %provider_name, items = pending.len(), workers = self.workers, "batch started");

        let mut results = HashMap::with_capacity(pending.len());
        let mut timed_out = false;
        loop {
            let joined = match deadline {
                Some(at) => match tokio::time::timeout_at(at, tasks.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                },
                None => tasks.join_next().await,
            };
            match joined {
                Some(Ok((name, result))) => {
                    pending.remove(&name);
                    results.insert(name, result);
                }
                Some(Err(e)) => warn!(provider = %provider_name, error = %e, "batch task failed"),
                None => break,
            }
        }
        tasks.abort_all();

        for name in pending {
            let err = if timed_out {
                MimirError::Timeout {
                    provider: provider_name.clone(),
                    elapsed: self.deadline,
                }
            } else {
                MimirError::Provider {
                    provider: provider_name.clone(),
                    status: None,
                    message: "upload task aborted".into(),
                }
            };
            results.entry(name).or_insert(Err(err));
        }

        let report = BatchReport {
            results,
            elapsed: started.elapsed(),
        };
        info!(
            provider = %provider_name,
            succeeded = report.success_count(),
            failed = report.failure_count(),
            timed_out,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "batch finished"
        );
        report
    }
}

/// Default pool size: available parallelism + 4, capped at 32.
pub fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus + 4).min(MAX_DEFAULT_WORKERS)
}
