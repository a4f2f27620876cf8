use bson::{Bson, Document as BsonDocument, oid::ObjectId};
use parking_lot::RwLock;

use crate::errors::{GatewayError, Result};
use crate::query::bson_equal;

use super::document::Document;

/// A named, insertion-ordered set of documents guarded by one lock.
///
/// The write lock is the unit of atomicity: every single-document update runs entirely
/// under it.
#[derive(Debug)]
pub struct Collection {
    name: String,
    docs: RwLock<Vec<Document>>,
}

impl Collection {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), docs: RwLock::new(Vec::new()) }
    }

    #[must_use]
    pub fn name_str(&self) -> String {
        self.name.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    pub fn with_documents<R>(&self, f: impl FnOnce(&[Document]) -> R) -> R {
        f(&self.docs.read())
    }

    pub fn with_documents_mut<R>(&self, f: impl FnOnce(&mut Vec<Document>) -> R) -> R {
        f(&mut self.docs.write())
    }

    /// Clones of every document body, in store order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BsonDocument> {
        self.with_documents(|all| all.iter().map(|d| d.data.clone()).collect())
    }

    /// Insert a document, assigning an `ObjectId` `_id` when none is present.
    ///
    /// # Errors
    /// Returns `QueryRejected` when a document with an equal `_id` already exists.
    pub fn insert(&self, mut data: BsonDocument) -> Result<Bson> {
        let id = match data.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                let mut with_id = BsonDocument::new();
                with_id.insert("_id", id.clone());
                with_id.extend(data);
                data = with_id;
                id
            }
        };
        let mut docs = self.docs.write();
        if docs.iter().any(|d| d.data.get("_id").is_some_and(|existing| bson_equal(existing, &id))) {
            return Err(GatewayError::QueryRejected(format!(
                "duplicate key in '{}': _id {id}",
                self.name
            )));
        }
        docs.push(Document::new(data));
        Ok(id)
    }
}
