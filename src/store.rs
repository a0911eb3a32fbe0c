//! Remote object storage for merged artifacts.
//!
//! The orchestrator only needs existence checks and whole-file uploads, so
//! the surface is a small trait. Two backends ship: a local directory store
//! (development and tests) and Yandex Disk over its REST API.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("remote store returned {status} for {path}")]
    Unexpected { status: u16, path: String },
}

/// Consumed storage capability: existence and atomic whole-file upload.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn exists(&self, remote_path: &str) -> Result<bool, StoreError>;

    /// Upload `local` to `remote_path`, overwriting any prior object.
    async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), StoreError>;
}

/// Local directory pretending to be remote storage.
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DiskStore { root: root.into() }
    }

    fn resolve(&self, remote_path: &str) -> PathBuf {
        self.root.join(remote_path.trim_start_matches('/'))
    }
}

#[async_trait]
impl RemoteStore for DiskStore {
    async fn exists(&self, remote_path: &str) -> Result<bool, StoreError> {
        Ok(self.resolve(remote_path).exists())
    }

    async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), StoreError> {
        let target = self.resolve(remote_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &target).await?;
        debug!(target = %target.display(), "stored artifact locally");
        Ok(())
    }
}

/// Yandex Disk REST backend.
///
/// `exists` is a resource metadata lookup; `upload` asks the API for an
/// upload href and PUTs the file body to it in one call.
pub struct YandexDiskStore {
    client: reqwest::Client,
    token: String,
    api_base: String,
}

const YANDEX_API_BASE: &str = "https://cloud-api.yandex.net/v1/disk";

impl YandexDiskStore {
    pub fn new(token: String) -> Self {
        Self::with_api_base(token, YANDEX_API_BASE.to_string())
    }

    pub fn with_api_base(token: String, api_base: String) -> Self {
        YandexDiskStore {
            client: reqwest::Client::new(),
            token,
            api_base,
        }
    }

    fn auth(&self) -> String {
        format!("OAuth {}", self.token)
    }
}

#[derive(serde::Deserialize)]
struct UploadLink {
    href: String,
}

#[async_trait]
impl RemoteStore for YandexDiskStore {
    async fn exists(&self, remote_path: &str) -> Result<bool, StoreError> {
        let url = format!(
            "{}/resources?path={}&fields=path",
            self.api_base,
            urlencoding::encode(remote_path)
        );
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await?;
        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(StoreError::Unexpected {
                status,
                path: remote_path.to_string(),
            }),
        }
    }

    async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), StoreError> {
        let url = format!(
            "{}/resources/upload?path={}&overwrite=true",
            self.api_base,
            urlencoding::encode(remote_path)
        );
        let link: UploadLink = self
            .client
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let body = tokio::fs::read(local).await?;
        let response = self
            .client
            .put(&link.href)
            .header("Authorization", self.auth())
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Unexpected {
                status: response.status().as_u16(),
                path: remote_path.to_string(),
            });
        }
        info!(path = remote_path, "uploaded merged artifact");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn disk_store_round_trip() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let store = DiskStore::new(remote.path());

        let source = local.path().join("merged.csv");
        std::fs::write(&source, "Txhash\na\n").unwrap();

        assert!(!store.exists("/exports/x_transactions.csv").await.unwrap());
        store
            .upload(&source, "/exports/x_transactions.csv")
            .await
            .unwrap();
        assert!(store.exists("/exports/x_transactions.csv").await.unwrap());
        let stored = remote.path().join("exports/x_transactions.csv");
        assert_eq!(std::fs::read_to_string(stored).unwrap(), "Txhash\na\n");
    }

    #[tokio::test]
    async fn yandex_exists_maps_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources"))
            .and(query_param("path", "/exports/there.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "path": "disk:/exports/there.csv"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resources"))
            .and(query_param("path", "/exports/missing.csv"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = YandexDiskStore::with_api_base("t".into(), server.uri());
        assert!(store.exists("/exports/there.csv").await.unwrap());
        assert!(!store.exists("/exports/missing.csv").await.unwrap());
    }

    #[tokio::test]
    async fn yandex_upload_follows_href() {
        let server = MockServer::start().await;
        let upload_href = format!("{}/upload-target", server.uri());
        Mock::given(method("GET"))
            .and(path("/resources/upload"))
            .and(query_param("overwrite", "true"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "href": upload_href })),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload-target"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("merged.csv");
        std::fs::write(&local, "Txhash\na\n").unwrap();

        let store = YandexDiskStore::with_api_base("t".into(), server.uri());
        store
            .upload(&local, "/exports/x_transactions.csv")
            .await
            .unwrap();
    }
}
