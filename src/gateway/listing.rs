use bson::Document as BsonDocument;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::errors::{GatewayError, Result};
use crate::query::SortSpec;
use crate::schema::{EntityRecord, ListedRecord, REVIEWS, ReviewRecord};

use super::filter::{SearchSpec, conditions_match, parse_stages, text_filter};
use super::normalize::normalize_record;
use super::pagination::{Page, projection_stage, sort_stage};
use super::{Gateway, record_metric};

/// A paginated listing request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListRequest {
    /// Maximum number of records.
    pub first: Option<i64>,
    pub skip: Option<i64>,
    pub search: SearchSpec,
    pub collection: Option<String>,
    pub projection: Option<Vec<String>>,
    /// `field[:asc|desc]`.
    pub sort: Option<String>,
}

impl ListRequest {
    #[must_use]
    pub fn new(first: Option<i64>, skip: Option<i64>, search: SearchSpec) -> Self {
        Self { first, skip, search, ..Self::default() }
    }
}

fn check_projection(fields: &[String]) -> Result<()> {
    if fields.is_empty() {
        return Err(GatewayError::MalformedSpecification("projection must name at least one field".into()));
    }
    if let Some(bad) = fields.iter().find(|f| f.is_empty() || f.starts_with('$')) {
        return Err(GatewayError::MalformedSpecification(format!("invalid projection field '{bad}'")));
    }
    Ok(())
}

/// Normalise ids, then decode into the record type of `collection`.
fn decode(collection: &str, doc: BsonDocument) -> Result<ListedRecord> {
    let doc = normalize_record(doc);
    if collection == REVIEWS {
        Ok(ListedRecord::Review(bson::from_document::<ReviewRecord>(doc)?))
    } else {
        Ok(ListedRecord::Entity(Box::new(bson::from_document::<EntityRecord>(doc)?)))
    }
}

impl Gateway {
    /// List records of one collection, filtered, ordered and paginated.
    ///
    /// Free-text and condition searches sort by the request's sort or the collection's
    /// configured default; a pipeline is sorted only when the request declares a sort.
    ///
    /// # Errors
    /// `MalformedSpecification`, `InvalidPagination`, `StoreUnavailable`, `QueryRejected` or
    /// `Decode`.
    pub fn list_entities(&self, req: &ListRequest) -> Result<Vec<ListedRecord>> {
        let start = Instant::now();
        let collection = self.target_collection(req.collection.as_deref())?;
        let result = self.list_in(collection, req);
        record_metric("list_entities", collection, start, &result);
        result
    }

    fn list_in(&self, collection: &'static str, req: &ListRequest) -> Result<Vec<ListedRecord>> {
        let page = Page::new(req.skip, req.first)?;
        let requested_sort = req.sort.as_deref().map(SortSpec::parse).transpose()?;
        if let Some(fields) = &req.projection {
            check_projection(fields)?;
        }
        let sort_or_default = || requested_sort.clone().or_else(|| self.config.sort_for(collection).cloned());

        let raw = match &req.search {
            SearchSpec::Text(token) => {
                let filter = text_filter(token.as_deref());
                let opts = page.find_options(sort_or_default(), req.projection.clone());
                self.store()?.find(collection, &filter, &opts)?
            }
            SearchSpec::Conditions(conds) => {
                let mut stages = vec![match_stage(conditions_match(conds)?)];
                if let Some(s) = sort_or_default() {
                    stages.push(sort_stage(&s));
                }
                page.append_bounds(&mut stages);
                if let Some(fields) = &req.projection {
                    stages.push(projection_stage(fields));
                }
                self.store()?.aggregate(collection, &stages)?
            }
            SearchSpec::Pipeline(json) => {
                self.check_raw_pipelines()?;
                let mut stages = page.append_to(parse_stages(json)?, requested_sort.as_ref())?;
                if let Some(fields) = &req.projection {
                    stages.push(projection_stage(fields));
                }
                self.store()?.aggregate(collection, &stages)?
            }
        };
        log::debug!("list_entities: {} raw records from '{collection}'", raw.len());
        raw.into_iter().map(|d| decode(collection, d)).collect()
    }
}

pub(crate) fn match_stage(body: BsonDocument) -> BsonDocument {
    let mut d = BsonDocument::new();
    d.insert("$match", body);
    d
}
