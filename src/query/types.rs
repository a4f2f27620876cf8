use bson::Bson;
use serde::{Deserialize, Serialize};

use crate::errors::{GatewayError, Result};

// Safety limits to prevent resource abuse
pub(crate) const MAX_PATH_DEPTH: usize = 32;
pub(crate) const MAX_IN_SET: usize = 1000;
pub(crate) const MAX_SORT_FIELDS: usize = 8;
pub(crate) const MAX_PROJECTION_FIELDS: usize = 64;
pub(crate) const MAX_PATTERN_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    /// The `1` / `-1` direction used in `$sort` stages.
    #[must_use]
    pub const fn direction(self) -> i32 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: Order,
}

impl SortSpec {
    #[must_use]
    pub fn asc(field: &str) -> Self {
        Self { field: field.to_string(), order: Order::Asc }
    }

    #[must_use]
    pub fn desc(field: &str) -> Self {
        Self { field: field.to_string(), order: Order::Desc }
    }

    /// Parse `field`, `field:asc` or `field:desc`.
    ///
    /// # Errors
    /// Returns `MalformedSpecification` for an empty field or an unknown direction.
    pub fn parse(s: &str) -> Result<Self> {
        let (field, dir) = s.split_once(':').unwrap_or((s, "asc"));
        let field = field.trim();
        if field.is_empty() {
            return Err(GatewayError::MalformedSpecification(format!("empty sort field in '{s}'")));
        }
        match dir.trim().to_ascii_lowercase().as_str() {
            "asc" | "1" => Ok(Self::asc(field)),
            "desc" | "-1" => Ok(Self::desc(field)),
            other => Err(GatewayError::MalformedSpecification(format!("unknown sort order '{other}'"))),
        }
    }
}

/// Options for `find_docs`.
///
/// Semantics:
/// - Sorting is applied first, then `skip`/`limit`, then projection.
/// - A missing `limit` is unbounded; a missing `skip` is zero.
/// - When `projection` is `Some(fields)`, returned documents hold `_id` plus those fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindOptions {
    pub projection: Option<Vec<String>>,
    pub sort: Option<Vec<SortSpec>>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    True,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Exists { path: String, exists: bool },
    In { path: String, values: Vec<Bson> },
    Nin { path: String, values: Vec<Bson> },
    Cmp { path: String, op: CmpOp, value: Bson },
    Regex { path: String, pattern: String, case_insensitive: bool },
    /// Matches when at least one element of the array at `path` satisfies `filter`.
    ElemMatch { path: String, filter: Box<Filter> },
}

impl Filter {
    #[must_use]
    pub fn eq(path: &str, value: impl Into<Bson>) -> Self {
        Self::Cmp { path: path.to_string(), op: CmpOp::Eq, value: value.into() }
    }

    #[must_use]
    pub fn gt(path: &str, value: impl Into<Bson>) -> Self {
        Self::Cmp { path: path.to_string(), op: CmpOp::Gt, value: value.into() }
    }

    #[must_use]
    pub fn regex_ci(path: &str, pattern: &str) -> Self {
        Self::Regex { path: path.to_string(), pattern: pattern.to_string(), case_insensitive: true }
    }

    /// Conjunction that collapses the trivial cases.
    #[must_use]
    pub fn all(mut filters: Vec<Self>) -> Self {
        filters.retain(|f| *f != Self::True);
        match filters.len() {
            0 => Self::True,
            1 => filters.remove(0),
            _ => Self::And(filters),
        }
    }

    /// Operator name used in trace lines.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::True => "true",
            Self::And(_) => "$and",
            Self::Or(_) => "$or",
            Self::Not(_) => "$not",
            Self::Exists { .. } => "$exists",
            Self::In { .. } => "$in",
            Self::Nin { .. } => "$nin",
            Self::Cmp { op, .. } => match op {
                CmpOp::Eq => "$eq",
                CmpOp::Gt => "$gt",
                CmpOp::Gte => "$gte",
                CmpOp::Lt => "$lt",
                CmpOp::Lte => "$lte",
            },
            Self::Regex { .. } => "$regex",
            Self::ElemMatch { .. } => "$elemMatch",
        }
    }
}

/// Field assignments applied by `update_one`.
///
/// A path segment `$` is the positional operator: it is replaced by the index of the first
/// array element matched by the update's filter.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpdateDoc {
    pub set: Vec<(String, Bson)>,
}

impl UpdateDoc {
    #[must_use]
    pub fn set(path: &str, value: impl Into<Bson>) -> Self {
        Self { set: vec![(path.to_string(), value.into())] }
    }

    /// The array path in front of the first positional `$` segment, if any.
    #[must_use]
    pub fn positional_array(&self) -> Option<String> {
        self.set.iter().find_map(|(path, _)| {
            let parts: Vec<&str> = path.split('.').collect();
            let pos = parts.iter().position(|p| *p == "$")?;
            (pos > 0).then(|| parts[..pos].join("."))
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateReport {
    pub matched: u64,
    pub modified: u64,
}
