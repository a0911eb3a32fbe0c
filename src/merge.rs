//! Merge & archive pipeline.
//!
//! Combines one address's page artifacts into a single CSV (header taken
//! once, rows appended in page order), uploads it to the canonical remote
//! path, then deletes the local intermediates. On upload failure nothing is
//! deleted, so the page artifacts remain as evidence for a retry.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::models::Address;
use crate::store::{RemoteStore, StoreError};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no page artifacts found for {0}")]
    NoArtifacts(Address),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("upload failed: {0}")]
    Upload(#[from] StoreError),
}

/// Page artifacts for `address` in `dir`, sorted ascending by page number.
///
/// Gaps are expected: a page whose export failed within the error threshold
/// simply has no artifact.
pub fn page_artifacts(dir: &Path, address: &Address) -> std::io::Result<Vec<(u32, PathBuf)>> {
    let prefix = format!("{}_transactions_", address.as_str());
    let mut pages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        let Some(number) = rest.strip_suffix(".csv") else {
            continue;
        };
        if let Ok(page) = number.parse::<u32>() {
            pages.push((page, entry.path()));
        }
    }
    pages.sort_by_key(|(page, _)| *page);
    Ok(pages)
}

/// Concatenate `pages` into `output`, keeping the tabular schema: the header
/// of the first file once, then every row in page order.
fn merge_files(pages: &[(u32, PathBuf)], output: &Path) -> Result<(), MergeError> {
    let mut writer = csv::Writer::from_path(output)?;
    let mut wrote_header = false;
    for (_, path) in pages {
        let mut reader = csv::Reader::from_path(path)?;
        if !wrote_header {
            writer.write_record(reader.headers()?)?;
            wrote_header = true;
        }
        for record in reader.records() {
            writer.write_record(&record?)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Merge all of `address`'s page artifacts in `dir` and upload the result.
///
/// The merged file is fully materialized locally before the single upload
/// call; the store's own interface makes the upload atomic. Local cleanup is
/// best-effort once the upload has succeeded.
pub async fn merge_and_upload(
    dir: &Path,
    address: &Address,
    store: &dyn RemoteStore,
) -> Result<(), MergeError> {
    let pages = page_artifacts(dir, address)?;
    if pages.is_empty() {
        warn!(%address, "no page artifacts to merge");
        return Err(MergeError::NoArtifacts(address.clone()));
    }
    info!(%address, pages = pages.len(), "merging page artifacts");

    let merged = dir.join(address.merged_artifact_name());
    merge_files(&pages, &merged)?;

    store.upload(&merged, &address.remote_path()).await?;

    remove_quietly(&merged);
    for (_, path) in &pages {
        remove_quietly(path);
    }
    Ok(())
}

fn remove_quietly(path: &Path) {
    if let Err(error) = std::fs::remove_file(path) {
        warn!(path = %path.display(), %error, "could not remove local artifact");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DiskStore;
    use async_trait::async_trait;
    use std::fs;

    struct FailingStore;

    #[async_trait]
    impl RemoteStore for FailingStore {
        async fn exists(&self, _remote_path: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn upload(&self, _local: &Path, remote_path: &str) -> Result<(), StoreError> {
            Err(StoreError::Unexpected {
                status: 503,
                path: remote_path.to_string(),
            })
        }
    }

    fn write_page(dir: &Path, address: &Address, page: u32, rows: &[&str]) {
        let mut content = String::from("Txhash,Value\n");
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }
        fs::write(dir.join(address.page_artifact_name(page)), content).unwrap();
    }

    #[tokio::test]
    async fn merges_in_numeric_page_order_with_single_header() {
        let work = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let address = Address::new("0xabc");

        // Page 10 written before page 2: ordering must be numeric, not
        // lexicographic or by file age.
        write_page(work.path(), &address, 10, &["j,10"]);
        write_page(work.path(), &address, 2, &["b,2", "c,2"]);
        write_page(work.path(), &address, 1, &["a,1"]);

        let store = DiskStore::new(remote.path());
        merge_and_upload(work.path(), &address, &store).await.unwrap();

        let uploaded = remote.path().join("exports/0xabc_transactions.csv");
        let content = fs::read_to_string(uploaded).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["Txhash,Value", "a,1", "b,2", "c,2", "j,10"]);
    }

    #[tokio::test]
    async fn merged_row_count_is_sum_of_pages_minus_headers() {
        let work = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let address = Address::new("0xdef");

        write_page(work.path(), &address, 1, &["a,1", "b,1"]);
        // Page 2 missing: export failed within threshold, merge tolerates it.
        write_page(work.path(), &address, 3, &["c,3"]);

        let store = DiskStore::new(remote.path());
        merge_and_upload(work.path(), &address, &store).await.unwrap();

        let uploaded = remote.path().join("exports/0xdef_transactions.csv");
        let content = fs::read_to_string(uploaded).unwrap();
        assert_eq!(content.lines().count(), 1 + 3);
    }

    #[tokio::test]
    async fn cleans_up_local_artifacts_after_upload() {
        let work = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let address = Address::new("0xabc");
        write_page(work.path(), &address, 1, &["a,1"]);

        let store = DiskStore::new(remote.path());
        merge_and_upload(work.path(), &address, &store).await.unwrap();

        assert!(!work.path().join(address.page_artifact_name(1)).exists());
        assert!(!work.path().join(address.merged_artifact_name()).exists());
    }

    #[tokio::test]
    async fn no_artifacts_fails_fast() {
        let work = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let address = Address::new("0xempty");

        let store = DiskStore::new(remote.path());
        let err = merge_and_upload(work.path(), &address, &store)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::NoArtifacts(_)));
    }

    #[tokio::test]
    async fn upload_failure_preserves_evidence() {
        let work = tempfile::tempdir().unwrap();
        let address = Address::new("0xabc");
        write_page(work.path(), &address, 1, &["a,1"]);
        write_page(work.path(), &address, 2, &["b,2"]);

        let err = merge_and_upload(work.path(), &address, &FailingStore)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::Upload(_)));
        assert!(work.path().join(address.page_artifact_name(1)).exists());
        assert!(work.path().join(address.page_artifact_name(2)).exists());
    }

    #[test]
    fn enumeration_ignores_other_addresses_and_merged_output() {
        let work = tempfile::tempdir().unwrap();
        let address = Address::new("0xabc");
        let other = Address::new("0xother");
        write_page(work.path(), &address, 1, &["a,1"]);
        write_page(work.path(), &other, 1, &["z,1"]);
        fs::write(work.path().join(address.merged_artifact_name()), "x\n").unwrap();

        let pages = page_artifacts(work.path(), &address).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].0, 1);
    }
}
