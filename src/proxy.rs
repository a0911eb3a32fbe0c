//! Proxy vetting and allocation.
//!
//! Candidates come from a newline-delimited file. Each one gets a single
//! bounded-timeout probe against a live URL; anything that errors or returns
//! a non-success status is excluded. Survivors are ranked ascending by
//! measured latency (stable sort, so ties keep input order) and the fastest
//! `count` are handed to the worker pool.

use std::path::Path;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::models::ProxyRecord;

/// Fewer viable proxies than this starves the worker pool; callers treat the
/// shortfall as fatal for the run.
pub const MIN_VIABLE_PROXIES: usize = 8;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("only {viable} of {candidates} proxy candidates passed the probe (minimum {required})")]
    Shortfall {
        viable: usize,
        candidates: usize,
        required: usize,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read candidate endpoints, one per line. Blank lines and `#` comments are
/// skipped.
pub fn load_candidates(path: &Path) -> Result<Vec<String>, ProxyError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Vet `candidates` against `probe_url` and return the fastest `count`.
///
/// Fails with [`ProxyError::Shortfall`] when fewer than
/// [`MIN_VIABLE_PROXIES`] candidates pass the probe.
pub async fn select(
    candidates: &[String],
    probe_url: &str,
    count: usize,
) -> Result<Vec<ProxyRecord>, ProxyError> {
    let probes = candidates.iter().map(|c| probe(c, probe_url));
    let results = futures::future::join_all(probes).await;

    let mut viable: Vec<ProxyRecord> = results.into_iter().flatten().collect();
    if viable.len() < MIN_VIABLE_PROXIES {
        return Err(ProxyError::Shortfall {
            viable: viable.len(),
            candidates: candidates.len(),
            required: MIN_VIABLE_PROXIES,
        });
    }

    // Stable: candidates with equal latency keep their input order.
    viable.sort_by_key(|record| record.latency);
    viable.truncate(count);
    debug!(selected = viable.len(), "proxy allocation complete");
    Ok(viable)
}

async fn probe(endpoint: &str, probe_url: &str) -> Option<ProxyRecord> {
    let proxy = match reqwest::Proxy::all(endpoint) {
        Ok(proxy) => proxy,
        Err(error) => {
            warn!(endpoint, %error, "invalid proxy endpoint");
            return None;
        }
    };
    let client = match reqwest::Client::builder()
        .proxy(proxy)
        .timeout(PROBE_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(error) => {
            warn!(endpoint, %error, "could not build probe client");
            return None;
        }
    };

    let started = Instant::now();
    match client.get(probe_url).send().await {
        Ok(response) if response.status().is_success() => {
            let latency = started.elapsed();
            debug!(endpoint, ?latency, "proxy probe succeeded");
            Some(ProxyRecord {
                endpoint: endpoint.to_string(),
                latency,
            })
        }
        Ok(response) => {
            warn!(endpoint, status = %response.status(), "proxy probe rejected");
            None
        }
        Err(error) => {
            warn!(endpoint, %error, "proxy probe failed");
            None
        }
    }
}
