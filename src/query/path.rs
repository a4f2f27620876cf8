use bson::{Bson, Document as BsonDocument};

use crate::errors::{GatewayError, Result};

use super::types::MAX_PATH_DEPTH;

/// Split a dotted path, rejecting empty segments and paths deeper than `MAX_PATH_DEPTH`.
///
/// # Errors
/// Returns `QueryRejected` for an invalid path.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Err(GatewayError::QueryRejected("empty field path".into()));
    }
    let parts: Vec<&str> = path.split('.').collect();
    if parts.len() > MAX_PATH_DEPTH {
        return Err(GatewayError::QueryRejected(format!("field path too deep: {path}")));
    }
    if parts.iter().any(|p| p.is_empty()) {
        return Err(GatewayError::QueryRejected(format!("empty segment in field path: {path}")));
    }
    Ok(parts)
}

/// Every value reachable at `path`.
///
/// Arrays fan out: a segment applied to an array is applied to each embedded document, and a
/// numeric segment also selects the element at that index. So `reviews._id` yields the `_id`
/// of every review.
#[must_use]
pub fn resolve_values<'a>(doc: &'a BsonDocument, path: &str) -> Vec<&'a Bson> {
    let Ok(parts) = split_path(path) else {
        return Vec::new();
    };
    let Some((head, rest)) = parts.split_first() else {
        return Vec::new();
    };
    let mut current: Vec<&Bson> = doc.get(*head).into_iter().collect();
    for seg in rest {
        let mut next = Vec::new();
        for value in current {
            match value {
                Bson::Document(d) => next.extend(d.get(*seg)),
                Bson::Array(items) => {
                    if let Ok(idx) = seg.parse::<usize>() {
                        next.extend(items.get(idx));
                    }
                    for item in items {
                        if let Bson::Document(d) = item {
                            next.extend(d.get(*seg));
                        }
                    }
                }
                _ => {}
            }
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }
    current
}

/// The first value at `path`, used as a sort key.
#[must_use]
pub fn first_value<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    resolve_values(doc, path).into_iter().next()
}

/// Assign `value` at `path`, creating intermediate documents. Numeric segments index into
/// existing arrays. Returns whether the document changed.
///
/// # Errors
/// Returns `QueryRejected` when the path crosses a scalar or an out-of-range array index.
pub fn set_path(doc: &mut BsonDocument, path: &str, value: Bson) -> Result<bool> {
    let parts = split_path(path)?;
    set_in_doc(doc, &parts, value)
}

fn set_in_doc(doc: &mut BsonDocument, parts: &[&str], value: Bson) -> Result<bool> {
    let Some((head, rest)) = parts.split_first() else {
        return Ok(false);
    };
    if rest.is_empty() {
        let changed = doc.get(*head) != Some(&value);
        doc.insert(*head, value);
        return Ok(changed);
    }
    if !doc.contains_key(*head) {
        doc.insert(*head, BsonDocument::new());
    }
    match doc.get_mut(*head) {
        Some(child) => set_in_value(child, rest, value),
        None => Ok(false),
    }
}

fn set_in_value(target: &mut Bson, parts: &[&str], value: Bson) -> Result<bool> {
    match target {
        Bson::Document(d) => set_in_doc(d, parts, value),
        Bson::Array(items) => {
            let Some((head, rest)) = parts.split_first() else {
                return Ok(false);
            };
            let idx: usize = head.parse().map_err(|_| {
                GatewayError::QueryRejected(format!("cannot address array element with '{head}'"))
            })?;
            let len = items.len();
            let slot = items.get_mut(idx).ok_or_else(|| {
                GatewayError::QueryRejected(format!("array index {idx} out of range ({len})"))
            })?;
            if rest.is_empty() {
                let changed = *slot != value;
                *slot = value;
                Ok(changed)
            } else {
                set_in_value(slot, rest, value)
            }
        }
        _ => Err(GatewayError::QueryRejected(format!(
            "cannot create field '{}' inside a non-document value",
            parts.first().copied().unwrap_or_default()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn resolve_fans_out_over_arrays() {
        let d = doc! { "languages": [ { "name": "German" }, { "name": "English" } ] };
        let vals = resolve_values(&d, "languages.name");
        assert_eq!(vals, vec![&Bson::from("German"), &Bson::from("English")]);
    }

    #[test]
    fn resolve_numeric_index() {
        let d = doc! { "reviews": [ { "votes": 1 }, { "votes": 2 } ] };
        assert_eq!(resolve_values(&d, "reviews.1.votes"), vec![&Bson::Int32(2)]);
        assert!(resolve_values(&d, "reviews.7.votes").is_empty());
    }

    #[test]
    fn resolve_missing_and_scalar() {
        let d = doc! { "a": 1 };
        assert!(resolve_values(&d, "a.b").is_empty());
        assert!(resolve_values(&d, "zzz").is_empty());
        assert!(resolve_values(&d, "").is_empty());
    }

    #[test]
    fn set_path_creates_and_reports_change() {
        let mut d = doc! { "votes": 3 };
        assert!(set_path(&mut d, "votes", Bson::Int32(4)).unwrap());
        assert!(!set_path(&mut d, "votes", Bson::Int32(4)).unwrap());
        assert!(set_path(&mut d, "meta.flag", Bson::Boolean(true)).unwrap());
        assert_eq!(d.get_document("meta").unwrap().get_bool("flag").unwrap(), true);
    }

    #[test]
    fn set_path_into_array_element() {
        let mut d = doc! { "reviews": [ { "votes": 1 }, { "votes": 2 } ] };
        assert!(set_path(&mut d, "reviews.1.votes", Bson::Int32(9)).unwrap());
        let reviews = d.get_array("reviews").unwrap();
        assert_eq!(reviews[0].as_document().unwrap().get_i32("votes").unwrap(), 1);
        assert_eq!(reviews[1].as_document().unwrap().get_i32("votes").unwrap(), 9);
        assert!(set_path(&mut d, "reviews.5.votes", Bson::Int32(1)).is_err());
        assert!(set_path(&mut d, "reviews.x.votes", Bson::Int32(1)).is_err());
    }

    #[test]
    fn set_path_rejects_scalar_parent() {
        let mut d = doc! { "name": "x" };
        assert!(set_path(&mut d, "name.first", Bson::Int32(1)).is_err());
    }
}
