//! End-to-end pool behavior through mock browser drivers and a local store.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Barrier;

use txharvest::cache::ResumeCache;
use txharvest::driver::{BrowserDriver, DriverError, DriverFactory, PageElement};
use txharvest::models::{Address, OutcomeStatus, ProxyRecord};
use txharvest::orchestrator::Orchestrator;
use txharvest::session::SiteConfig;
use txharvest::store::DiskStore;

/// Factory producing drivers that serve a one-page listing and simulate the
/// export download. Counts sessions created, and can rendezvous all drivers
/// on a barrier to prove the pool really runs concurrently.
struct MockFactory {
    created: AtomicUsize,
    navigations: Arc<AtomicU32>,
    rendezvous: Option<Arc<Barrier>>,
    fail_launch: bool,
}

impl MockFactory {
    fn new() -> Self {
        MockFactory {
            created: AtomicUsize::new(0),
            navigations: Arc::new(AtomicU32::new(0)),
            rendezvous: None,
            fail_launch: false,
        }
    }

    fn with_rendezvous(mut self, barrier: Arc<Barrier>) -> Self {
        self.rendezvous = Some(barrier);
        self
    }

    fn failing() -> Self {
        MockFactory {
            fail_launch: true,
            ..MockFactory::new()
        }
    }
}

#[async_trait]
impl DriverFactory for MockFactory {
    async fn create(
        &self,
        _proxy: Option<&ProxyRecord>,
        download_dir: &Path,
    ) -> Result<Box<dyn BrowserDriver>, DriverError> {
        if self.fail_launch {
            return Err(DriverError::Launch("no browser available".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockDriver {
            workdir: download_dir.to_path_buf(),
            navigations: self.navigations.clone(),
            rendezvous: self.rendezvous.clone(),
        }))
    }
}

struct MockDriver {
    workdir: PathBuf,
    navigations: Arc<AtomicU32>,
    rendezvous: Option<Arc<Barrier>>,
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn navigate(&self, _url: &str) -> Result<(), DriverError> {
        self.navigations.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.rendezvous {
            barrier.wait().await;
        }
        Ok(())
    }

    async fn wait_for_element(
        &self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<Box<dyn PageElement>, DriverError> {
        Ok(Box::new(MockElement {
            is_pagination: selector.contains("pagination"),
            download: self.workdir.join("export.csv"),
        }))
    }
}

struct MockElement {
    is_pagination: bool,
    download: PathBuf,
}

#[async_trait]
impl PageElement for MockElement {
    async fn attribute(&self, _name: &str) -> Result<Option<String>, DriverError> {
        Ok(self
            .is_pagination
            .then(|| "https://example.test/txs?p=1".to_string()))
    }

    async fn text(&self) -> Result<String, DriverError> {
        Ok(String::new())
    }

    async fn click(&self) -> Result<(), DriverError> {
        std::fs::write(&self.download, "Txhash,Value\nrow,1\n")
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        Ok(())
    }
}

fn orchestrator(
    factory: MockFactory,
    remote: &Path,
    cache: Arc<ResumeCache>,
    data_dir: &Path,
) -> Orchestrator {
    Orchestrator::new(
        Arc::new(factory),
        Arc::new(DiskStore::new(remote)),
        cache,
        data_dir.join("resume_cache.json"),
        SiteConfig::default(),
        data_dir.join("work"),
    )
}

fn addresses(n: usize) -> Vec<Address> {
    (0..n).map(|i| Address::new(&format!("0xa{i}"))).collect()
}

#[tokio::test]
async fn pool_drains_every_address_concurrently() {
    let remote = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();

    // Four workers, four addresses: every driver blocks on its first
    // navigation until all four have arrived. The run can only finish if
    // the pool is genuinely concurrent.
    let barrier = Arc::new(Barrier::new(4));
    let factory = MockFactory::new().with_rendezvous(barrier);
    let cache = Arc::new(ResumeCache::new());
    let orch = orchestrator(factory, remote.path(), cache.clone(), data.path());

    let outcomes = tokio::time::timeout(
        Duration::from_secs(20),
        orch.run(addresses(4), 4, Vec::new()),
    )
    .await
    .expect("pool deadlocked on the rendezvous")
    .unwrap();

    assert_eq!(outcomes.len(), 4);
    assert!(outcomes.iter().all(|o| o.status == OutcomeStatus::Success));
    assert_eq!(cache.len(), 4);
    for i in 0..4 {
        assert!(remote
            .path()
            .join(format!("exports/0xa{i}_transactions.csv"))
            .exists());
    }
    orch.finalize().unwrap();
    assert!(data.path().join("resume_cache.json").exists());
    assert!(!data.path().join("work").exists());
}

#[tokio::test]
async fn second_run_is_idempotent() {
    let remote = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let cache_path = data.path().join("resume_cache.json");

    let first = orchestrator(
        MockFactory::new(),
        remote.path(),
        Arc::new(ResumeCache::new()),
        data.path(),
    );
    let outcomes = first.run(addresses(3), 2, Vec::new()).await.unwrap();
    assert!(outcomes.iter().all(|o| o.status == OutcomeStatus::Success));
    first.finalize().unwrap();

    // The second run loads the persisted cache and never opens a page.
    let factory = MockFactory::new();
    let navigations = factory.navigations.clone();
    let second = orchestrator(
        factory,
        remote.path(),
        Arc::new(ResumeCache::load(&cache_path).unwrap()),
        data.path(),
    );
    let outcomes = second.run(addresses(3), 2, Vec::new()).await.unwrap();
    second.finalize().unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes
        .iter()
        .all(|o| o.status == OutcomeStatus::AlreadyExists));
    assert_eq!(navigations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn proxy_count_caps_the_pool() {
    let remote = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();

    let factory = Arc::new(MockFactory::new());
    let proxies = vec![
        ProxyRecord {
            endpoint: "127.0.0.1:9001".to_string(),
            latency: Duration::from_millis(10),
        },
        ProxyRecord {
            endpoint: "127.0.0.1:9002".to_string(),
            latency: Duration::from_millis(20),
        },
    ];

    let orch = Orchestrator::new(
        factory.clone(),
        Arc::new(DiskStore::new(remote.path())),
        Arc::new(ResumeCache::new()),
        data.path().join("resume_cache.json"),
        SiteConfig::default(),
        data.path().join("work"),
    );
    let outcomes = orch.run(addresses(4), 8, proxies).await.unwrap();
    orch.finalize().unwrap();

    assert_eq!(outcomes.len(), 4);
    // Only two proxy identities exist, so only two sessions were launched.
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn launch_failure_aborts_before_consuming_addresses() {
    let remote = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();

    let cache = Arc::new(ResumeCache::new());
    let orch = orchestrator(MockFactory::failing(), remote.path(), cache.clone(), data.path());

    let result = orch.run(addresses(3), 2, Vec::new()).await;
    assert!(result.is_err());
    assert_eq!(orch.completed(), 0);
    assert!(cache.is_empty());
    orch.finalize().unwrap();
}

#[tokio::test]
async fn finalize_runs_once() {
    let remote = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();

    let cache = Arc::new(ResumeCache::new());
    let orch = orchestrator(MockFactory::new(), remote.path(), cache.clone(), data.path());
    orch.run(addresses(1), 1, Vec::new()).await.unwrap();

    orch.finalize().unwrap();
    let persisted = std::fs::read_to_string(data.path().join("resume_cache.json")).unwrap();
    // Mutating the in-memory cache after finalize must not reach disk.
    cache.insert(Address::new("0xlate"));
    orch.finalize().unwrap();
    assert_eq!(
        std::fs::read_to_string(data.path().join("resume_cache.json")).unwrap(),
        persisted
    );
}
