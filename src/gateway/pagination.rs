use bson::{Bson, Document as BsonDocument};

use crate::errors::{GatewayError, Result};
use crate::query::{FindOptions, SortSpec};
use crate::utils::num::{i64_to_bson, i64_to_usize, u64_to_i64_saturating, usize_to_u64};

/// Validated skip/limit. A missing limit means "unbounded" for free-text reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub skip: usize,
    pub limit: Option<usize>,
}

impl Page {
    /// # Errors
    /// Returns `InvalidPagination` for a negative skip or limit.
    pub fn new(skip: Option<i64>, limit: Option<i64>) -> Result<Self> {
        let skip = match skip {
            None => 0,
            Some(s) => i64_to_usize(s)
                .ok_or_else(|| GatewayError::InvalidPagination(format!("skip must be >= 0, got {s}")))?,
        };
        let limit = match limit {
            None => None,
            Some(l) => Some(
                i64_to_usize(l)
                    .ok_or_else(|| GatewayError::InvalidPagination(format!("limit must be >= 0, got {l}")))?,
            ),
        };
        Ok(Self { skip, limit })
    }

    /// Find options for free-text and condition reads.
    #[must_use]
    pub fn find_options(&self, sort: Option<SortSpec>, projection: Option<Vec<String>>) -> FindOptions {
        FindOptions { projection, sort: sort.map(|s| vec![s]), limit: self.limit, skip: Some(self.skip) }
    }

    /// Append `$sort` (when declared), `$skip` and `$limit` to caller stages.
    ///
    /// # Errors
    /// Returns `InvalidPagination` when no limit was given.
    pub fn append_to(&self, mut stages: Vec<BsonDocument>, sort: Option<&SortSpec>) -> Result<Vec<BsonDocument>> {
        let limit = self
            .limit
            .ok_or_else(|| GatewayError::InvalidPagination("a limit is required with a pipeline".into()))?;
        if let Some(s) = sort {
            stages.push(sort_stage(s));
        }
        stages.push(count_stage("$skip", self.skip));
        stages.push(count_stage("$limit", limit));
        Ok(stages)
    }

    /// Append `$skip` (when non-zero) and `$limit` (when given) for reads where the limit
    /// is optional.
    pub fn append_bounds(&self, stages: &mut Vec<BsonDocument>) {
        if self.skip > 0 {
            stages.push(count_stage("$skip", self.skip));
        }
        if let Some(limit) = self.limit {
            stages.push(count_stage("$limit", limit));
        }
    }
}

fn count_stage(name: &str, n: usize) -> BsonDocument {
    let mut d = BsonDocument::new();
    d.insert(name, i64_to_bson(u64_to_i64_saturating(usize_to_u64(n))));
    d
}

#[must_use]
pub fn sort_stage(s: &SortSpec) -> BsonDocument {
    let mut spec = BsonDocument::new();
    spec.insert(s.field.clone(), Bson::Int32(s.order.direction()));
    let mut d = BsonDocument::new();
    d.insert("$sort", spec);
    d
}

/// `$project` stage including `fields` (and implicitly `_id`).
#[must_use]
pub fn projection_stage(fields: &[String]) -> BsonDocument {
    let mut spec = BsonDocument::new();
    for f in fields {
        spec.insert(f.clone(), 1);
    }
    let mut d = BsonDocument::new();
    d.insert("$project", spec);
    d
}
