use bson::{Bson, Document as BsonDocument};
use std::time::Instant;

use crate::errors::{GatewayError, Result};
use crate::store::collection::Collection;
use crate::utils::num::usize_to_u64;
use crate::utils::qtrace::{QueryOp, QueryTrace};

use super::eval::{ELEM_KEY, Matcher, bson_equal, compare_docs, project_fields};
use super::path::{first_value, resolve_values, set_path};
use super::types::{
    Filter, FindOptions, MAX_PROJECTION_FIELDS, MAX_SORT_FIELDS, UpdateDoc, UpdateReport,
};

/// Run a filtered, sorted, paginated read. Sorting happens before skip/limit, projection last.
///
/// # Errors
/// Returns `QueryRejected` when the filter does not compile.
pub fn find_docs(col: &Collection, filter: &Filter, opts: &FindOptions) -> Result<Vec<BsonDocument>> {
    let start = Instant::now();
    let matcher = Matcher::compile(filter)?;
    let mut docs: Vec<BsonDocument> = col.with_documents(|all| {
        all.iter().filter(|d| matcher.matches(&d.data)).map(|d| d.data.clone()).collect()
    });

    if let Some(sort) = &opts.sort {
        if sort.len() > MAX_SORT_FIELDS {
            log::warn!("sort spec too long: {} (only the first {MAX_SORT_FIELDS} apply)", sort.len());
        }
        docs.sort_by(|a, b| compare_docs(a, b, sort));
    }

    let skip = opts.skip.unwrap_or(0);
    let limit = opts.limit.unwrap_or(usize::MAX);
    let mut docs: Vec<BsonDocument> = docs.into_iter().skip(skip).take(limit).collect();

    if let Some(fields) = &opts.projection {
        let fields: Vec<String> = fields.iter().take(MAX_PROJECTION_FIELDS).cloned().collect();
        for d in &mut docs {
            *d = project_fields(d, &fields);
        }
    }

    QueryTrace::new(QueryOp::Find, &col.name_str(), start)
        .target(filter.type_name())
        .bounds(opts.skip, opts.limit)
        .results(docs.len())
        .emit();
    Ok(docs)
}

/// # Errors
/// Returns `QueryRejected` when the filter does not compile.
pub fn count_docs(col: &Collection, filter: &Filter) -> Result<u64> {
    let start = Instant::now();
    let matcher = Matcher::compile(filter)?;
    let n = col.with_documents(|all| all.iter().filter(|d| matcher.matches(&d.data)).count());
    QueryTrace::new(QueryOp::Count, &col.name_str(), start).target(filter.type_name()).results(n).emit();
    Ok(usize_to_u64(n))
}

/// Distinct values at `path` over matching documents, in first-seen order.
///
/// Arrays are flattened one level and nulls are dropped.
///
/// # Errors
/// Returns `QueryRejected` when the filter does not compile.
pub fn distinct_values(col: &Collection, path: &str, filter: &Filter) -> Result<Vec<Bson>> {
    let start = Instant::now();
    let matcher = Matcher::compile(filter)?;
    let mut out: Vec<Bson> = Vec::new();
    col.with_documents(|all| {
        for d in all.iter().filter(|d| matcher.matches(&d.data)) {
            for v in resolve_values(&d.data, path) {
                let flat: Vec<&Bson> = match v {
                    Bson::Array(items) => items.iter().collect(),
                    other => vec![other],
                };
                for item in flat {
                    if matches!(item, Bson::Null | Bson::Undefined) {
                        continue;
                    }
                    if !out.iter().any(|seen| bson_equal(seen, item)) {
                        out.push(item.clone());
                    }
                }
            }
        }
    });
    QueryTrace::new(QueryOp::Distinct, &col.name_str(), start).target(path).results(out.len()).emit();
    Ok(out)
}

/// Update the first document matching `filter`. A positional `$` segment resolves to the
/// first array element satisfied by the filter's conditions on that array.
///
/// The update is applied to a copy and swapped in, so a failing assignment leaves the
/// stored document untouched.
///
/// # Errors
/// Returns `QueryRejected` for a bad filter, an unresolvable positional operator or an
/// assignment that cannot be applied.
pub fn update_one(col: &Collection, filter: &Filter, update: &UpdateDoc) -> Result<UpdateReport> {
    let start = Instant::now();
    let matcher = Matcher::compile(filter)?;
    let positional = update.positional_array();
    let report = col.with_documents_mut(|all| -> Result<UpdateReport> {
        let Some(doc) = all.iter_mut().find(|d| matcher.matches(&d.data)) else {
            return Ok(UpdateReport::default());
        };
        let position = match &positional {
            Some(array_path) => Some(positional_index(filter, array_path, &doc.data)?.ok_or_else(
                || {
                    GatewayError::QueryRejected(format!(
                        "positional operator found no matching element in '{array_path}'"
                    ))
                },
            )?),
            None => None,
        };
        let mut updated = doc.data.clone();
        let changed = apply_update(&mut updated, update, position)?;
        if changed {
            doc.update(updated);
        }
        Ok(UpdateReport { matched: 1, modified: u64::from(changed) })
    })?;
    QueryTrace::new(QueryOp::UpdateOne, &col.name_str(), start)
        .target(filter.type_name())
        .results(usize::from(report.matched > 0))
        .modified(report.modified)
        .emit();
    Ok(report)
}

/// Apply `$set` assignments, substituting `position` for `$` segments.
///
/// # Errors
/// Returns `QueryRejected` when a path contains `$` but no position is known, or when an
/// assignment cannot be applied.
pub fn apply_update(doc: &mut BsonDocument, update: &UpdateDoc, position: Option<usize>) -> Result<bool> {
    let mut changed = false;
    for (path, value) in &update.set {
        let resolved = if path.split('.').any(|seg| seg == "$") {
            let idx = position.ok_or_else(|| {
                GatewayError::QueryRejected(format!("positional path '{path}' needs a matching array filter"))
            })?;
            path.split('.')
                .map(|seg| if seg == "$" { idx.to_string() } else { seg.to_string() })
                .collect::<Vec<_>>()
                .join(".")
        } else {
            path.clone()
        };
        changed |= set_path(doc, &resolved, value.clone())?;
    }
    Ok(changed)
}

/// Index of the first element of `array_path` satisfying every condition the filter places on
/// that array. `None` when the filter has no such conditions or no element qualifies.
fn positional_index(filter: &Filter, array_path: &str, doc: &BsonDocument) -> Result<Option<usize>> {
    let mut conditions = Vec::new();
    collect_element_conditions(filter, array_path, &mut conditions);
    if conditions.is_empty() {
        return Ok(None);
    }
    let matchers = conditions.iter().map(Matcher::compile).collect::<Result<Vec<_>>>()?;
    let Some(Bson::Array(items)) = first_value(doc, array_path) else {
        return Ok(None);
    };
    Ok(items.iter().position(|item| {
        let elem = match item {
            Bson::Document(d) => d.clone(),
            scalar => {
                let mut wrapped = BsonDocument::new();
                wrapped.insert(ELEM_KEY, scalar.clone());
                wrapped
            }
        };
        matchers.iter().all(|m| m.matches(&elem))
    }))
}

fn collect_element_conditions(filter: &Filter, array_path: &str, out: &mut Vec<Filter>) {
    let prefix = format!("{array_path}.");
    match filter {
        Filter::And(fs) => {
            for f in fs {
                collect_element_conditions(f, array_path, out);
            }
        }
        Filter::ElemMatch { path, filter: inner } if path == array_path => out.push((**inner).clone()),
        leaf => {
            if let Some(path) = leaf_path(leaf) {
                if let Some(rest) = path.strip_prefix(&prefix) {
                    out.push(with_path(leaf, rest));
                } else if path == array_path {
                    out.push(with_path(leaf, ELEM_KEY));
                }
            }
        }
    }
}

fn leaf_path(f: &Filter) -> Option<&str> {
    match f {
        Filter::Exists { path, .. }
        | Filter::In { path, .. }
        | Filter::Nin { path, .. }
        | Filter::Cmp { path, .. }
        | Filter::Regex { path, .. } => Some(path.as_str()),
        _ => None,
    }
}

fn with_path(f: &Filter, new_path: &str) -> Filter {
    let mut out = f.clone();
    match &mut out {
        Filter::Exists { path, .. }
        | Filter::In { path, .. }
        | Filter::Nin { path, .. }
        | Filter::Cmp { path, .. }
        | Filter::Regex { path, .. } => *path = new_path.to_string(),
        _ => {}
    }
    out
}
