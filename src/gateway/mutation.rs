use bson::oid::ObjectId;
use bson::{Bson, doc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::errors::{GatewayError, Result};
use crate::query::{Filter, UpdateDoc};
use crate::schema::{EntityKind, FEEDBACK, FeedbackAck, REVIEWS, ReviewLayout, VoteAck};
use crate::utils::logger::AUDIT_TARGET;

use super::normalize::id_string;
use super::{Gateway, record_metric};

/// Set the vote total of an entity, or of one of its reviews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    #[serde(rename = "_id")]
    pub entity_id: String,
    #[serde(default)]
    pub sub_review_id: Option<String>,
    pub votes: i64,
    pub collection_type: EntityKind,
}

impl VoteRequest {
    #[must_use]
    pub fn new(collection_type: EntityKind, entity_id: &str, sub_review_id: Option<&str>, votes: i64) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            sub_review_id: sub_review_id.map(str::to_string),
            votes,
            collection_type,
        }
    }
}

/// Exact match on an identifier stored either as a string or as an `ObjectId`.
fn id_match(path: &str, id: &str) -> Filter {
    match ObjectId::parse_str(id) {
        Ok(oid) => Filter::In { path: path.to_string(), values: vec![Bson::ObjectId(oid), Bson::String(id.to_string())] },
        Err(_) => Filter::eq(path, id),
    }
}

fn require_non_empty(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GatewayError::MalformedSpecification(format!("{what} must not be empty")));
    }
    Ok(())
}

impl Gateway {
    /// Overwrite `votes` on the addressed entity or review. Applying the same request twice
    /// leaves the store as after the first.
    ///
    /// # Errors
    /// `MalformedSpecification` for empty ids, `NotFound` when nothing matches,
    /// `StoreUnavailable` or `QueryRejected` from the store.
    pub fn update_vote(&self, req: &VoteRequest) -> Result<VoteAck> {
        let start = Instant::now();
        let collection = match (&req.sub_review_id, self.schema.review_layout) {
            (Some(_), ReviewLayout::Standalone) => REVIEWS,
            _ => req.collection_type.collection(),
        };
        let result = self.update_vote_in(collection, req);
        record_metric("update_vote", collection, start, &result);
        result
    }

    fn update_vote_in(&self, collection: &str, req: &VoteRequest) -> Result<VoteAck> {
        require_non_empty("entity id", &req.entity_id)?;
        let (filter, update) = match req.sub_review_id.as_deref() {
            None => (id_match("_id", &req.entity_id), UpdateDoc::set("votes", req.votes)),
            Some(sub) => {
                require_non_empty("sub-review id", sub)?;
                match self.schema.review_layout {
                    ReviewLayout::Embedded => (
                        Filter::all(vec![id_match("_id", &req.entity_id), id_match("reviews._id", sub)]),
                        UpdateDoc::set("reviews.$.votes", req.votes),
                    ),
                    ReviewLayout::Standalone => (
                        Filter::all(vec![id_match("_id", sub), id_match("university_id", &req.entity_id)]),
                        UpdateDoc::set("votes", req.votes),
                    ),
                }
            }
        };

        let report = self.store()?.update_one(collection, &filter, &update)?;
        if report.matched == 0 {
            let target = req.sub_review_id.as_ref().map_or_else(
                || req.entity_id.clone(),
                |sub| format!("{}/{sub}", req.entity_id),
            );
            return Err(GatewayError::NotFound(format!("{collection}: no record '{target}'")));
        }
        log::info!(
            target: AUDIT_TARGET,
            "update_vote collection={collection} id={} sub_review={} votes={} modified={}",
            req.entity_id,
            req.sub_review_id.as_deref().unwrap_or("-"),
            req.votes,
            report.modified
        );
        Ok(VoteAck {
            entity_id: req.entity_id.clone(),
            sub_review_id: req.sub_review_id.clone(),
            votes: req.votes,
            collection_type: req.collection_type,
        })
    }

    /// Store a feedback message.
    ///
    /// # Errors
    /// `MalformedSpecification` for an empty contact or message, `StoreUnavailable` or
    /// `QueryRejected` from the store.
    pub fn submit_feedback(&self, contact: &str, message: &str) -> Result<FeedbackAck> {
        let start = Instant::now();
        let result = (|| -> Result<FeedbackAck> {
            require_non_empty("contact", contact)?;
            require_non_empty("message", message)?;
            let record = doc! {
                "contact": contact,
                "message": message,
                "created_at": bson::DateTime::now(),
            };
            let id = self.store()?.insert_one(FEEDBACK, record)?;
            log::info!(
                target: AUDIT_TARGET,
                "submit_feedback id={} message_len={}",
                id_string(&id).unwrap_or_default(),
                message.len()
            );
            Ok(FeedbackAck { ok: true })
        })();
        record_metric("submit_feedback", FEEDBACK, start, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::store::{DocumentStore, MemoryStore};
    use crate::query::FindOptions;
    use std::sync::Arc;

    fn gateway(layout: ReviewLayout) -> (Arc<MemoryStore>, Gateway) {
        let store = Arc::new(MemoryStore::new());
        store
            .seed(
                "universities",
                vec![
                    doc! { "_id": "u1", "name": "Uni Wien", "votes": 1_i64, "reviews": [
                        { "_id": "r1", "votes": 2_i64 },
                        { "_id": "r2", "votes": 4_i64 },
                    ] },
                    doc! { "_id": "u2", "name": "TU Berlin", "votes": 0_i64 },
                ],
            )
            .unwrap();
        store
            .seed("reviews", vec![doc! { "_id": "r9", "university_id": "u2", "votes": 0_i64 }])
            .unwrap();
        let config = GatewayConfig { review_layout: layout, ..GatewayConfig::default() };
        let gw = Gateway::with_store(store.clone(), config).unwrap();
        (store, gw)
    }

    fn get(store: &MemoryStore, coll: &str, id: &str) -> bson::Document {
        store.find(coll, &Filter::eq("_id", id), &FindOptions::default()).unwrap().remove(0)
    }

    #[test]
    fn id_match_accepts_both_representations() {
        let hex = "65a1b2c3d4e5f60718293a4b";
        match id_match("_id", hex) {
            Filter::In { values, .. } => assert_eq!(values.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(id_match("_id", "u1"), Filter::eq("_id", "u1"));
    }

    #[test]
    fn embedded_review_vote_changes_only_that_review() {
        let (store, gw) = gateway(ReviewLayout::Embedded);
        let ack = gw.update_vote(&VoteRequest::new(EntityKind::University, "u1", Some("r1"), 7)).unwrap();
        assert_eq!(ack.votes, 7);
        assert_eq!(ack.sub_review_id.as_deref(), Some("r1"));
        let doc = get(&store, "universities", "u1");
        let reviews = doc.get_array("reviews").unwrap();
        assert_eq!(reviews[0].as_document().unwrap().get_i64("votes").unwrap(), 7);
        assert_eq!(reviews[1].as_document().unwrap().get_i64("votes").unwrap(), 4);
        assert_eq!(doc.get_i64("votes").unwrap(), 1);
    }

    #[test]
    fn standalone_review_vote_targets_reviews_collection() {
        let (store, gw) = gateway(ReviewLayout::Standalone);
        gw.update_vote(&VoteRequest::new(EntityKind::University, "u2", Some("r9"), 3)).unwrap();
        assert_eq!(get(&store, "reviews", "r9").get_i64("votes").unwrap(), 3);
        let wrong_parent = gw.update_vote(&VoteRequest::new(EntityKind::University, "u1", Some("r9"), 5));
        assert!(matches!(wrong_parent, Err(GatewayError::NotFound(_))));
    }

    #[test]
    fn missing_entity_is_not_found() {
        let (store, gw) = gateway(ReviewLayout::Embedded);
        let err = gw.update_vote(&VoteRequest::new(EntityKind::University, "nope", None, 9)).unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
        assert_eq!(get(&store, "universities", "u2").get_i64("votes").unwrap(), 0);
    }

    #[test]
    fn empty_ids_are_rejected() {
        let (_, gw) = gateway(ReviewLayout::Embedded);
        let err = gw.update_vote(&VoteRequest::new(EntityKind::University, " ", None, 1)).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedSpecification(_)));
        let err = gw.update_vote(&VoteRequest::new(EntityKind::University, "u1", Some(""), 1)).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedSpecification(_)));
    }

    #[test]
    fn feedback_is_inserted() {
        let (store, gw) = gateway(ReviewLayout::Embedded);
        assert!(gw.submit_feedback("me@example.org", "great site").unwrap().ok);
        assert_eq!(store.count(FEEDBACK, &Filter::True).unwrap(), 1);
        assert!(gw.submit_feedback("", "x").is_err());
        assert!(gw.submit_feedback("me", "   ").is_err());
        assert_eq!(store.count(FEEDBACK, &Filter::True).unwrap(), 1);
    }
}
