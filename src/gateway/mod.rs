//! The query gateway: inbound operations over a shared document store.

pub mod batch;
pub mod filter;
pub mod listing;
pub mod meta;
pub mod mutation;
pub mod normalize;
pub mod pagination;

use std::sync::Arc;
use std::time::Instant;

use crate::config::GatewayConfig;
use crate::connection::Connection;
use crate::errors::{GatewayError, Result};
use crate::schema::Schema;
use crate::store::DocumentStore;
use crate::utils::logger::METRICS_TARGET;
use crate::utils::num::u128_to_u64_saturating;

pub use batch::{BatchEntry, GraphError, GraphResponse, Operation};
pub use filter::{Condition, ConditionOp, SearchSpec};
pub use listing::ListRequest;
pub use mutation::VoteRequest;

/// Shared, thread-safe entry point for every inbound operation.
#[derive(Debug)]
pub struct Gateway {
    connection: Arc<Connection>,
    config: GatewayConfig,
    schema: Schema,
}

impl Gateway {
    /// # Errors
    /// Returns `Config` when the configuration does not validate.
    pub fn new(connection: Arc<Connection>, config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let schema = config.schema();
        Ok(Self { connection, config, schema })
    }

    /// Gateway over an already-open store.
    ///
    /// # Errors
    /// Returns `Config` when the configuration does not validate.
    pub fn with_store(store: Arc<dyn DocumentStore>, config: GatewayConfig) -> Result<Self> {
        Self::new(Arc::new(Connection::from_store(store)), config)
    }

    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    fn store(&self) -> Result<Arc<dyn DocumentStore>> {
        self.connection.get()
    }

    /// The named collection, or the configured default.
    fn target_collection(&self, collection: Option<&str>) -> Result<&'static str> {
        self.schema.resolve_collection(collection.unwrap_or(&self.config.entity_collection))
    }

    fn check_raw_pipelines(&self) -> Result<()> {
        if self.config.allow_raw_pipelines {
            Ok(())
        } else {
            Err(GatewayError::MalformedSpecification("raw pipelines are disabled".into()))
        }
    }
}

/// Log one metrics line for a finished operation.
fn record_metric<T>(op: &str, collection: &str, start: Instant, result: &Result<T>) {
    let ms = u128_to_u64_saturating(start.elapsed().as_millis());
    match result {
        Ok(_) => log::info!(target: METRICS_TARGET, "op={op} collection={collection} status=ok duration_ms={ms}"),
        Err(e) => log::info!(
            target: METRICS_TARGET,
            "op={op} collection={collection} status=error kind={} duration_ms={ms}",
            e.kind()
        ),
    }
}
