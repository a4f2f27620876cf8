//! Query gateway for a university and city ranking site.
//!
//! A [`Gateway`] answers listing, metadata and vote requests against a shared
//! [`DocumentStore`]. The bundled [`MemoryStore`] evaluates match documents and aggregation
//! pipelines in process and can be seeded from NDJSON files.

pub mod cli;
pub mod config;
pub mod connection;
pub mod errors;
pub mod gateway;
pub mod query;
pub mod schema;
pub mod store;
pub mod utils;

use std::path::PathBuf;
use std::sync::Arc;

pub use config::{ConfigLayer, GatewayConfig, LogSettings};
pub use connection::Connection;
pub use errors::{GatewayError, Result};
pub use gateway::{BatchEntry, Gateway, GraphResponse, ListRequest, Operation, SearchSpec, VoteRequest};
pub use store::{DocumentStore, MemoryStore};

/// Build a gateway whose store is loaded lazily from `config.data_dir` (the current
/// directory when unset) on first use.
///
/// # Errors
/// Returns `Config` when the configuration does not validate.
pub fn open(config: GatewayConfig) -> Result<Gateway> {
    let dir = config.data_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    Gateway::new(Arc::new(Connection::memory_from_dir(dir)), config)
}

/// Install the log4rs configuration described by `settings`.
///
/// # Errors
/// Returns `Config` when the appenders cannot be built or a logger is already installed.
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    utils::logger::configure_logging(
        settings.dir.as_deref(),
        settings.level.as_deref(),
        settings.retention,
        settings.qtrace,
    )
    .map_err(|e| GatewayError::Config(format!("logging: {e}")))
}
