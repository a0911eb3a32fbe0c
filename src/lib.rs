//! txharvest - per-address transaction export harvesting.
//!
//! Drives a pool of browser sessions that walk each address's paginated
//! transaction listing, export every page as CSV, merge the pages into one
//! artifact, and upload it to a remote store. A durable resume cache makes
//! repeated runs over the same address list idempotent.

pub mod addresses;
#[cfg(feature = "browser")]
pub mod browser;
pub mod cache;
pub mod cli;
pub mod config;
pub mod download;
pub mod driver;
pub mod merge;
pub mod models;
pub mod orchestrator;
pub mod proxy;
pub mod session;
pub mod store;
