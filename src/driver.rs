//! Browser automation capability, consumed as traits.
//!
//! The orchestrator core never depends on a specific automation product; it
//! drives whatever implements [`BrowserDriver`]. Each worker slot owns one
//! driver for its lifetime, created through a [`DriverFactory`] so the pool
//! can bind a proxy and a private download directory per worker.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::ProxyRecord;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("timed out waiting for element {selector:?}")]
    Timeout { selector: String },
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("browser protocol error: {0}")]
    Protocol(String),
    #[error("browser launch failed: {0}")]
    Launch(String),
}

/// A located element on the current page.
#[async_trait]
pub trait PageElement: Send + Sync {
    async fn attribute(&self, name: &str) -> Result<Option<String>, DriverError>;
    async fn text(&self) -> Result<String, DriverError>;
    async fn click(&self) -> Result<(), DriverError>;
}

/// One owned browser session.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Wait up to `timeout` for `selector` to appear.
    ///
    /// Implementations fail with [`DriverError::Timeout`]; callers count that
    /// like any other page error, never propagate it raw.
    async fn wait_for_element(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Box<dyn PageElement>, DriverError>;
}

/// Creates one browser session per worker slot, bound to that worker's proxy
/// identity and private download directory.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn create(
        &self,
        proxy: Option<&ProxyRecord>,
        download_dir: &Path,
    ) -> Result<Box<dyn BrowserDriver>, DriverError>;
}
