//! Worker pool manager: shared task queue, worker spawning, progress
//! accounting, and single-shot finalization.
//!
//! The queue and the resume cache are the only state shared across workers;
//! everything else (browser session, working directory, proxy identity) is
//! exclusively owned by one worker for its lifetime.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use indicatif::ProgressBar;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cache::ResumeCache;
use crate::driver::DriverFactory;
use crate::models::{Address, Outcome, ProxyRecord};
use crate::session::{ScrapeSession, SiteConfig};
use crate::store::RemoteStore;

/// FIFO queue of pending addresses, deduplicated at seed time.
///
/// `pop` is a single atomic operation under the lock; there is deliberately
/// no separate emptiness check for callers to race on.
pub struct TaskQueue {
    inner: Mutex<VecDeque<Address>>,
}

impl TaskQueue {
    pub fn new(addresses: impl IntoIterator<Item = Address>) -> Self {
        let mut seen = HashSet::new();
        let queue: VecDeque<Address> = addresses
            .into_iter()
            .filter(|a| seen.insert(a.clone()))
            .collect();
        TaskQueue {
            inner: Mutex::new(queue),
        }
    }

    pub async fn pop(&self) -> Option<Address> {
        self.inner.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Owns the shared queue and cache, spawns one scrape session per worker,
/// and guarantees the finalize step runs exactly once.
pub struct Orchestrator {
    factory: Arc<dyn DriverFactory>,
    store: Arc<dyn RemoteStore>,
    cache: Arc<ResumeCache>,
    cache_path: PathBuf,
    site: SiteConfig,
    work_root: PathBuf,
    completed: Arc<AtomicUsize>,
    finalized: AtomicBool,
    progress: Option<ProgressBar>,
}

impl Orchestrator {
    pub fn new(
        factory: Arc<dyn DriverFactory>,
        store: Arc<dyn RemoteStore>,
        cache: Arc<ResumeCache>,
        cache_path: PathBuf,
        site: SiteConfig,
        work_root: PathBuf,
    ) -> Self {
        Orchestrator {
            factory,
            store,
            cache,
            cache_path,
            site,
            work_root,
            completed: Arc::new(AtomicUsize::new(0)),
            finalized: AtomicBool::new(false),
            progress: None,
        }
    }

    /// Attach a progress bar ticked once per completed address.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Completed (success, already-exists, or failed) address count so far.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Drain `addresses` through a pool of workers and return one outcome
    /// per unique address.
    ///
    /// When proxies are supplied the effective worker count is
    /// `min(proxies.len(), worker_count)`; without proxies every worker runs
    /// unproxied. All browser sessions are created before the queue starts
    /// draining, so a launch failure aborts the run with no address consumed.
    pub async fn run(
        &self,
        addresses: Vec<Address>,
        worker_count: usize,
        proxies: Vec<ProxyRecord>,
    ) -> anyhow::Result<Vec<Outcome>> {
        anyhow::ensure!(worker_count >= 1, "worker_count must be at least 1");

        let effective = if proxies.is_empty() {
            worker_count
        } else {
            worker_count.min(proxies.len())
        };

        let queue = Arc::new(TaskQueue::new(addresses));
        let total = queue.len().await;
        info!(addresses = total, workers = effective, "seeding worker pool");
        if let Some(progress) = &self.progress {
            progress.set_length(total as u64);
        }

        // Bind every worker's session up front: proxy identity, private
        // working directory, owned browser.
        let mut sessions = Vec::with_capacity(effective);
        for worker_id in 0..effective {
            let workdir = self.work_root.join(format!("worker-{worker_id}"));
            std::fs::create_dir_all(&workdir)
                .with_context(|| format!("creating working directory for worker {worker_id}"))?;
            let proxy = proxies.get(worker_id);
            let driver = self
                .factory
                .create(proxy, &workdir)
                .await
                .with_context(|| format!("launching browser for worker {worker_id}"))?;
            sessions.push(ScrapeSession::new(
                worker_id,
                driver,
                self.store.clone(),
                self.cache.clone(),
                self.site.clone(),
                workdir,
            ));
        }

        let mut workers = JoinSet::new();
        for session in sessions {
            let queue = queue.clone();
            let completed = self.completed.clone();
            let progress = self.progress.clone();
            workers.spawn(async move {
                let mut outcomes = Vec::new();
                while let Some(address) = queue.pop().await {
                    let outcome = session.process(&address).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    if let Some(progress) = &progress {
                        progress.inc(1);
                    }
                    outcomes.push(outcome);
                }
                outcomes
            });
        }

        let mut all = Vec::with_capacity(total);
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcomes) => all.extend(outcomes),
                Err(error) => warn!(%error, "worker task panicked"),
            }
        }
        Ok(all)
    }

    /// Persist the resume cache and remove the per-worker workspaces.
    ///
    /// Idempotent: effects run once no matter how many exit paths reach it
    /// (normal completion, run error, interrupt).
    pub fn finalize(&self) -> anyhow::Result<()> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }
        self.cache
            .persist(&self.cache_path)
            .context("persisting resume cache")?;
        info!(entries = self.cache.len(), path = %self.cache_path.display(), "resume cache persisted");
        if self.work_root.exists() {
            std::fs::remove_dir_all(&self.work_root).context("removing worker workspaces")?;
        }
        Ok(())
    }
}
