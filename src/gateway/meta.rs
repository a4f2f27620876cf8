use bson::{Bson, doc};
use std::time::Instant;

use crate::errors::Result;
use crate::query::{Filter, parse_match_document};
use crate::schema::{DistinctField, Meta, ReviewSummary};
use crate::utils::num::{bson_as_i64, i64_to_usize, usize_to_u64};

use super::filter::{SearchSpec, conditions_match, parse_stages, text_filter};
use super::normalize::id_string;
use super::{Gateway, record_metric};

/// Field name of the `$count` stage appended to pipeline counts.
const COUNT_FIELD: &str = "count";

impl Gateway {
    /// Number of documents matching `search` (all documents when `None`). Never paginated.
    ///
    /// # Errors
    /// `MalformedSpecification`, `StoreUnavailable` or `QueryRejected`.
    pub fn entity_count(&self, collection: Option<&str>, search: Option<&SearchSpec>) -> Result<Meta> {
        let start = Instant::now();
        let collection = self.target_collection(collection)?;
        let result = self.count_in(collection, search);
        record_metric("entity_count", collection, start, &result);
        result
    }

    fn count_in(&self, collection: &str, search: Option<&SearchSpec>) -> Result<Meta> {
        let count = match search {
            None => self.store()?.count(collection, &Filter::True)?,
            Some(SearchSpec::Text(token)) => self.store()?.count(collection, &text_filter(token.as_deref()))?,
            Some(SearchSpec::Conditions(conds)) => {
                let filter = parse_match_document(&conditions_match(conds)?)?;
                self.store()?.count(collection, &filter)?
            }
            Some(SearchSpec::Pipeline(json)) => {
                self.check_raw_pipelines()?;
                let mut stages = parse_stages(json)?;
                stages.push(doc! { "$count": COUNT_FIELD });
                let out = self.store()?.aggregate(collection, &stages)?;
                out.first()
                    .and_then(|d| d.get(COUNT_FIELD))
                    .and_then(bson_as_i64)
                    .and_then(i64_to_usize)
                    .map_or(0, usize_to_u64)
            }
        };
        Ok(Meta { count })
    }

    /// Number of entities with reviews and the total of their review counts.
    ///
    /// # Errors
    /// `StoreUnavailable` or `QueryRejected`.
    pub fn review_summary(&self, collection: Option<&str>) -> Result<ReviewSummary> {
        let start = Instant::now();
        let collection = self.target_collection(collection)?;
        let pipeline = [
            doc! { "$match": { "review_count": { "$gt": 0 } } },
            doc! { "$group": {
                "_id": Bson::Null,
                "unisCount": { "$sum": 1 },
                "reviewCount": { "$sum": "$review_count" },
            } },
        ];
        let result = self.store().and_then(|s| s.aggregate(collection, &pipeline)).map(|out| {
            out.first().map_or_else(ReviewSummary::default, |d| ReviewSummary {
                unis_count: d.get("unisCount").and_then(bson_as_i64).unwrap_or(0),
                review_count: d.get("reviewCount").and_then(bson_as_i64).unwrap_or(0),
            })
        });
        record_metric("review_summary", collection, start, &result);
        result
    }

    /// Distinct values of a facet across the whole collection, rendered as strings.
    ///
    /// # Errors
    /// `StoreUnavailable` or `QueryRejected`.
    pub fn distinct_values(&self, field: DistinctField, collection: Option<&str>) -> Result<Vec<String>> {
        let start = Instant::now();
        let collection = self.target_collection(collection)?;
        let result = self.store().and_then(|s| s.distinct(collection, field.path(), &Filter::True)).map(|vals| {
            let mut out: Vec<String> = Vec::with_capacity(vals.len());
            for v in vals.iter().filter_map(render_scalar) {
                if !out.contains(&v) {
                    out.push(v);
                }
            }
            out
        });
        record_metric("distinct_values", collection, start, &result);
        result
    }
}

fn render_scalar(v: &Bson) -> Option<String> {
    match v {
        Bson::Null | Bson::Undefined | Bson::Document(_) | Bson::Array(_) => None,
        Bson::Double(f) => Some(f.to_string()),
        Bson::Boolean(b) => Some(b.to_string()),
        other => id_string(other).or_else(|| Some(other.to_string())),
    }
}
