//! Document store seam: the operations the gateway needs from a document database, and an
//! embedded in-memory implementation.

pub mod collection;
pub mod document;
pub mod memory;

use bson::{Bson, Document as BsonDocument};

use crate::errors::Result;
use crate::query::{Filter, FindOptions, UpdateDoc, UpdateReport};

pub use memory::MemoryStore;

/// Operations consumed by the gateway. Implementations must be shareable across request
/// threads.
///
/// Reads against a collection that does not exist return empty results.
pub trait DocumentStore: Send + Sync {
    /// # Errors
    /// `StoreUnavailable` when the store cannot be reached, `QueryRejected` for a bad filter.
    fn find(&self, collection: &str, filter: &Filter, opts: &FindOptions) -> Result<Vec<BsonDocument>>;

    /// # Errors
    /// `StoreUnavailable` when the store cannot be reached, `QueryRejected` for a bad stage.
    fn aggregate(&self, collection: &str, pipeline: &[BsonDocument]) -> Result<Vec<BsonDocument>>;

    /// # Errors
    /// `StoreUnavailable` when the store cannot be reached, `QueryRejected` for a bad filter.
    fn distinct(&self, collection: &str, path: &str, filter: &Filter) -> Result<Vec<Bson>>;

    /// # Errors
    /// `StoreUnavailable` when the store cannot be reached, `QueryRejected` for a bad filter.
    fn count(&self, collection: &str, filter: &Filter) -> Result<u64>;

    /// Update the first matching document. `$` path segments address the array element the
    /// filter matched.
    ///
    /// # Errors
    /// `StoreUnavailable` when the store cannot be reached, `QueryRejected` when the update
    /// cannot be applied.
    fn update_one(&self, collection: &str, filter: &Filter, update: &UpdateDoc) -> Result<UpdateReport>;

    /// Insert a document and return its `_id`.
    ///
    /// # Errors
    /// `StoreUnavailable` when the store cannot be reached, `QueryRejected` on a duplicate key.
    fn insert_one(&self, collection: &str, doc: BsonDocument) -> Result<Bson>;
}
