//! Core domain types: addresses, per-address outcomes, and artifact naming.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A subject identifier driving one unit of work.
///
/// Addresses are compared case-insensitively on the source site, so the
/// canonical form is lowercase. Construction is the only place the string
/// is normalized; everything downstream relies on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    pub fn new(raw: &str) -> Self {
        Address(raw.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local filename for one page's exported file.
    pub fn page_artifact_name(&self, page: u32) -> String {
        format!("{}_transactions_{}.csv", self.0, page)
    }

    /// Local filename for the combined per-address export.
    pub fn merged_artifact_name(&self) -> String {
        format!("{}_transactions.csv", self.0)
    }

    /// Canonical path of the merged artifact in remote storage.
    pub fn remote_path(&self) -> String {
        format!("/exports/{}_transactions.csv", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page's exported file, transient inside its owning worker's directory.
#[derive(Debug, Clone)]
pub struct PageArtifact {
    pub address: Address,
    pub page: u32,
    pub path: PathBuf,
}

/// Terminal status for one address, recorded exactly once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// All pages within the error threshold and the merged artifact uploaded.
    Success,
    /// Skipped: the address was already complete (cache hit or remote artifact).
    AlreadyExists,
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Success => f.write_str("success"),
            OutcomeStatus::AlreadyExists => f.write_str("already_exists"),
            OutcomeStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Terminal result for one address.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub address: Address,
    pub status: OutcomeStatus,
    /// Accumulated per-page error count at the time the outcome was recorded.
    pub errors: u32,
}

impl Outcome {
    pub fn success(address: Address, errors: u32) -> Self {
        Outcome {
            address,
            status: OutcomeStatus::Success,
            errors,
        }
    }

    pub fn already_exists(address: Address) -> Self {
        Outcome {
            address,
            status: OutcomeStatus::AlreadyExists,
            errors: 0,
        }
    }

    pub fn failed(address: Address, errors: u32) -> Self {
        Outcome {
            address,
            status: OutcomeStatus::Failed,
            errors,
        }
    }
}

/// A vetted outbound endpoint, eligible only after a successful live probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRecord {
    pub endpoint: String,
    pub latency: Duration,
}
