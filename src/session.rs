//! Per-worker scrape session: drives one address through its paginated
//! export flow, applying the failure-threshold policy.
//!
//! Per-page errors are swallowed into a counter and logged; only a threshold
//! breach (strictly more than `total_pages / 3` failed pages) escalates to
//! an address-level `failed`. Every address ends in exactly one outcome;
//! nothing escapes `process`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::ResumeCache;
use crate::download::{self, DetectError};
use crate::driver::{BrowserDriver, DriverError};
use crate::models::{Address, Outcome, PageArtifact};
use crate::store::RemoteStore;
use crate::{merge, merge::MergeError};

/// Data-source specifics: URL templates and the selectors the export flow
/// depends on. Defaults target Etherscan's transaction listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// First listing page; `{address}` is substituted.
    pub listing_url: String,
    /// One listing page; `{address}` and `{page}` are substituted.
    pub page_url: String,
    /// Element whose `href` carries the total page count as a `p=` suffix.
    pub pagination_selector: String,
    /// The per-page CSV export trigger.
    pub export_selector: String,
    /// Bound on every element wait.
    pub element_timeout_secs: u64,
    /// Bound on the download-completion wait per page.
    pub download_timeout_secs: u64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        SiteConfig {
            listing_url: "https://etherscan.io/txs?a={address}".to_string(),
            page_url: "https://etherscan.io/txs?a={address}&p={page}".to_string(),
            pagination_selector: "ul.pagination > li:last-child > a".to_string(),
            export_selector: "#btnExportQuickTransactionListCSV".to_string(),
            element_timeout_secs: 10,
            download_timeout_secs: 30,
        }
    }
}

impl SiteConfig {
    fn listing_url_for(&self, address: &Address) -> String {
        self.listing_url.replace("{address}", address.as_str())
    }

    fn page_url_for(&self, address: &Address, page: u32) -> String {
        self.page_url
            .replace("{address}", address.as_str())
            .replace("{page}", &page.to_string())
    }

    fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// One page's navigate/export/detect failed. Recoverable: counted against
/// the address's threshold, never propagated past the loop.
#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Detect(#[from] DetectError),
}

/// Could not determine the total page count; the address fails immediately
/// with zero pages attempted.
#[derive(Debug, Error)]
pub enum PaginationError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("pagination control has no href attribute")]
    MissingHref,
    #[error("could not parse page count from {0:?}")]
    Unparsable(String),
}

/// Extract the total page count from the pagination control's `href`
/// (`...&p=42` on the "last page" link).
fn parse_total_pages(href: &str) -> Result<u32, PaginationError> {
    let tail = href
        .rsplit("p=")
        .next()
        .ok_or_else(|| PaginationError::Unparsable(href.to_string()))?;
    tail.parse::<u32>()
        .map_err(|_| PaginationError::Unparsable(href.to_string()))
}

/// One worker's scrape session. Owns its browser driver and its private
/// working directory; shares only the resume cache and the remote store.
pub struct ScrapeSession {
    worker_id: usize,
    driver: Box<dyn BrowserDriver>,
    store: Arc<dyn RemoteStore>,
    cache: Arc<ResumeCache>,
    site: SiteConfig,
    workdir: PathBuf,
}

impl ScrapeSession {
    pub fn new(
        worker_id: usize,
        driver: Box<dyn BrowserDriver>,
        store: Arc<dyn RemoteStore>,
        cache: Arc<ResumeCache>,
        site: SiteConfig,
        workdir: PathBuf,
    ) -> Self {
        ScrapeSession {
            worker_id,
            driver,
            store,
            cache,
            site,
            workdir,
        }
    }

    /// Process one address to a terminal outcome.
    pub async fn process(&self, address: &Address) -> Outcome {
        // Fast skip: completed in this or an earlier run, no browser use.
        if self.cache.contains(address) {
            debug!(worker = self.worker_id, %address, "resume cache hit");
            return Outcome::already_exists(address.clone());
        }

        // A prior run may have uploaded the artifact but lost its cache
        // write; the remote store is the source of truth.
        match self.store.exists(&address.remote_path()).await {
            Ok(true) => {
                info!(worker = self.worker_id, %address, "artifact already in remote store");
                self.cache.insert(address.clone());
                return Outcome::already_exists(address.clone());
            }
            Ok(false) => {}
            Err(error) => {
                warn!(worker = self.worker_id, %address, %error, "remote existence check failed");
                return Outcome::failed(address.clone(), 0);
            }
        }

        let total_pages = match self.read_total_pages(address).await {
            Ok(total) => total,
            Err(error) => {
                warn!(worker = self.worker_id, %address, %error, "could not read page count");
                return Outcome::failed(address.clone(), 0);
            }
        };
        let threshold = total_pages / 3;
        info!(
            worker = self.worker_id,
            %address,
            total_pages,
            threshold,
            "starting paginated export"
        );

        let mut errors = 0u32;
        for page in 1..=total_pages {
            match self.export_page(address, page).await {
                Ok(artifact) => {
                    debug!(worker = self.worker_id, %address, page, path = %artifact.path.display(), "page exported");
                }
                Err(error) => {
                    errors += 1;
                    warn!(worker = self.worker_id, %address, page, errors, %error, "page export failed");
                    if errors > threshold {
                        warn!(
                            worker = self.worker_id,
                            %address,
                            errors,
                            threshold,
                            "error threshold exceeded, aborting address"
                        );
                        return Outcome::failed(address.clone(), errors);
                    }
                }
            }
        }

        match merge::merge_and_upload(&self.workdir, address, self.store.as_ref()).await {
            Ok(()) => {
                self.cache.insert(address.clone());
                info!(worker = self.worker_id, %address, errors, "address complete");
                Outcome::success(address.clone(), errors)
            }
            Err(error @ MergeError::Upload(_)) => {
                warn!(worker = self.worker_id, %address, %error, "upload failed, artifacts kept for retry");
                Outcome::failed(address.clone(), errors)
            }
            Err(error) => {
                warn!(worker = self.worker_id, %address, %error, "merge failed");
                Outcome::failed(address.clone(), errors)
            }
        }
    }

    async fn read_total_pages(&self, address: &Address) -> Result<u32, PaginationError> {
        self.driver
            .navigate(&self.site.listing_url_for(address))
            .await?;
        let control = self
            .driver
            .wait_for_element(&self.site.pagination_selector, self.site.element_timeout())
            .await?;
        let href = control
            .attribute("href")
            .await?
            .ok_or(PaginationError::MissingHref)?;
        parse_total_pages(&href)
    }

    async fn export_page(&self, address: &Address, page: u32) -> Result<PageArtifact, PageError> {
        self.driver
            .navigate(&self.site.page_url_for(address, page))
            .await?;
        let button = self
            .driver
            .wait_for_element(&self.site.export_selector, self.site.element_timeout())
            .await?;
        button.click().await?;
        let artifact = download::await_artifact(
            &self.workdir,
            address,
            page,
            self.site.download_timeout(),
        )
        .await?;
        Ok(artifact)
    }
}
