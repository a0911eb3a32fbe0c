//! Download-completion detection.
//!
//! The browser writes exports into the worker's private directory under a
//! name we do not control, with an in-progress suffix while the transfer is
//! running. The detector polls the directory on a deadline for the newest
//! completed file, then renames it to the deterministic per-page artifact
//! name so the merge step can enumerate exactly one address's pages.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::models::{Address, PageArtifact};

/// Poll cadence while waiting for the browser to finish writing.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Delay before the first check and after detection, to avoid racing the
/// browser's own rename of the finished file.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Suffix Chromium gives in-progress downloads.
const IN_PROGRESS_SUFFIX: &str = ".crdownload";

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("no completed download appeared within {timeout:?} for {address} page {page}")]
    Timeout {
        address: Address,
        page: u32,
        timeout: Duration,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Wait for a freshly completed download in `dir` and claim it as the
/// artifact for (`address`, `page`).
///
/// Fails with [`DetectError::Timeout`] if no qualifying file appears within
/// `timeout`. Files already carrying one of our deterministic artifact names
/// are never re-detected, so a previously claimed page cannot be stolen by a
/// later page whose export silently failed.
pub async fn await_artifact(
    dir: &Path,
    address: &Address,
    page: u32,
    timeout: Duration,
) -> Result<PageArtifact, DetectError> {
    tokio::time::sleep(SETTLE_DELAY).await;

    let deadline = Instant::now() + timeout;
    let downloaded = loop {
        if let Some(path) = latest_completed_download(dir)? {
            break path;
        }
        if Instant::now() >= deadline {
            return Err(DetectError::Timeout {
                address: address.clone(),
                page,
                timeout,
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    // Let the browser finish any metadata updates on the final file.
    tokio::time::sleep(SETTLE_DELAY).await;

    let target = dir.join(address.page_artifact_name(page));
    std::fs::rename(&downloaded, &target)?;
    debug!(
        %address,
        page,
        artifact = %target.display(),
        "claimed completed download"
    );

    Ok(PageArtifact {
        address: address.clone(),
        page,
        path: target,
    })
}

/// Newest entry in `dir`, if it qualifies as a completed export.
///
/// Qualifying means: a `.csv` file without an in-progress suffix that is not
/// one of our own renamed artifacts. Returns `None` while the newest entry is
/// still partial, so a half-written file is never claimed.
fn latest_completed_download(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.contains("_transactions") {
            // Already claimed by a previous page, or the merged output.
            continue;
        }
        let metadata = entry.metadata()?;
        let stamp = metadata.created().or_else(|_| metadata.modified())?;
        if newest.as_ref().map(|(t, _)| stamp > *t).unwrap_or(true) {
            newest = Some((stamp, path));
        }
    }

    Ok(newest.and_then(|(_, path)| {
        let name = path.file_name()?.to_string_lossy().into_owned();
        let completed =
            name.ends_with(".csv") && !name.contains(IN_PROGRESS_SUFFIX);
        completed.then_some(path)
    }))
}
