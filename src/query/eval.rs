use bson::{Bson, Document as BsonDocument};
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;

use crate::errors::{GatewayError, Result};
use crate::utils::num::bson_as_f64;

use super::path::{first_value, resolve_values, split_path};
use super::types::{CmpOp, Filter, MAX_IN_SET, MAX_PATTERN_LEN, MAX_SORT_FIELDS, Order, SortSpec};

/// Field name scalar array elements are wrapped under when an `$elemMatch` is evaluated.
pub(crate) const ELEM_KEY: &str = "__elem";

#[derive(Debug)]
enum Node {
    True,
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Exists { path: String, exists: bool },
    In { path: String, values: Vec<Bson> },
    Cmp { path: String, op: CmpOp, value: Bson },
    Regex { path: String, re: Regex },
    ElemMatch { path: String, inner: Box<Node> },
}

/// A filter with its regular expressions compiled once.
#[derive(Debug)]
pub struct Matcher {
    root: Node,
}

impl Matcher {
    /// # Errors
    /// Returns `QueryRejected` for an invalid or oversized pattern, an oversized `$in` set or
    /// an invalid field path.
    pub fn compile(filter: &Filter) -> Result<Self> {
        Ok(Self { root: compile_node(filter)? })
    }

    #[must_use]
    pub fn matches(&self, doc: &BsonDocument) -> bool {
        eval_node(&self.root, doc)
    }
}

fn compile_node(filter: &Filter) -> Result<Node> {
    Ok(match filter {
        Filter::True => Node::True,
        Filter::And(fs) => Node::And(fs.iter().map(compile_node).collect::<Result<_>>()?),
        Filter::Or(fs) => Node::Or(fs.iter().map(compile_node).collect::<Result<_>>()?),
        Filter::Not(f) => Node::Not(Box::new(compile_node(f)?)),
        Filter::Exists { path, exists } => {
            split_path(path)?;
            Node::Exists { path: path.clone(), exists: *exists }
        }
        Filter::In { path, values } => {
            split_path(path)?;
            check_in_set(values)?;
            Node::In { path: path.clone(), values: values.clone() }
        }
        Filter::Nin { path, values } => {
            split_path(path)?;
            check_in_set(values)?;
            Node::Not(Box::new(Node::In { path: path.clone(), values: values.clone() }))
        }
        Filter::Cmp { path, op, value } => {
            split_path(path)?;
            Node::Cmp { path: path.clone(), op: *op, value: value.clone() }
        }
        Filter::Regex { path, pattern, case_insensitive } => {
            split_path(path)?;
            Node::Regex { path: path.clone(), re: compile_regex(pattern, *case_insensitive)? }
        }
        Filter::ElemMatch { path, filter } => {
            split_path(path)?;
            Node::ElemMatch { path: path.clone(), inner: Box::new(compile_node(filter)?) }
        }
    })
}

fn check_in_set(values: &[Bson]) -> Result<()> {
    if values.len() > MAX_IN_SET {
        return Err(GatewayError::QueryRejected(format!(
            "$in/$nin set too large: {} > {MAX_IN_SET}",
            values.len()
        )));
    }
    Ok(())
}

/// # Errors
/// Returns `QueryRejected` when the pattern is too long or does not compile.
pub fn compile_regex(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(GatewayError::QueryRejected(format!(
            "regex pattern too long: {} > {MAX_PATTERN_LEN}",
            pattern.len()
        )));
    }
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| GatewayError::QueryRejected(format!("invalid regex '{pattern}': {e}")))
}

/// Values at `path` plus the elements of any arrays found there.
fn candidates<'a>(doc: &'a BsonDocument, path: &str) -> Vec<&'a Bson> {
    let mut out = Vec::new();
    for v in resolve_values(doc, path) {
        out.push(v);
        if let Bson::Array(items) = v {
            out.extend(items.iter());
        }
    }
    out
}

fn eval_node(node: &Node, doc: &BsonDocument) -> bool {
    match node {
        Node::True => true,
        Node::And(ns) => ns.iter().all(|n| eval_node(n, doc)),
        Node::Or(ns) => ns.iter().any(|n| eval_node(n, doc)),
        Node::Not(n) => !eval_node(n, doc),
        Node::Exists { path, exists } => resolve_values(doc, path).is_empty() != *exists,
        Node::In { path, values } => {
            let cands = candidates(doc, path);
            if cands.is_empty() {
                return values.iter().any(|v| matches!(v, Bson::Null));
            }
            cands.iter().any(|c| values.iter().any(|v| bson_equal(c, v)))
        }
        Node::Cmp { path, op, value } => {
            let cands = candidates(doc, path);
            if cands.is_empty() {
                // A missing field equals null.
                return *op == CmpOp::Eq && matches!(value, Bson::Null);
            }
            cands.iter().any(|c| cmp_matches(c, *op, value))
        }
        Node::Regex { path, re } => candidates(doc, path)
            .iter()
            .any(|c| matches!(c, Bson::String(s) if re.is_match(s))),
        Node::ElemMatch { path, inner } => resolve_values(doc, path).iter().any(|v| match v {
            Bson::Array(items) => items.iter().any(|item| match item {
                Bson::Document(d) => eval_node(inner, d),
                scalar => {
                    let mut wrapped = BsonDocument::new();
                    wrapped.insert(ELEM_KEY, (*scalar).clone());
                    eval_node(inner, &wrapped)
                }
            }),
            _ => false,
        }),
    }
}

fn cmp_matches(candidate: &Bson, op: CmpOp, value: &Bson) -> bool {
    if op == CmpOp::Eq {
        return bson_equal(candidate, value);
    }
    match compare_same_class(candidate, value) {
        Some(ord) => match op {
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Gte => ord != Ordering::Less,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Lte => ord != Ordering::Greater,
            CmpOp::Eq => ord == Ordering::Equal,
        },
        None => false,
    }
}

const fn is_number(v: &Bson) -> bool {
    matches!(v, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_))
}

/// Equality with numbers compared by value across integer and double representations.
#[must_use]
pub fn bson_equal(a: &Bson, b: &Bson) -> bool {
    if is_number(a) && is_number(b) {
        return match (bson_as_f64(a), bson_as_f64(b)) {
            (Some(x), Some(y)) => x.total_cmp(&y) == Ordering::Equal,
            _ => false,
        };
    }
    match (a, b) {
        (Bson::Array(x), Bson::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| bson_equal(p, q))
        }
        (Bson::Document(x), Bson::Document(y)) => {
            x.len() == y.len()
                && x.iter().zip(y.iter()).all(|((ka, va), (kb, vb))| ka == kb && bson_equal(va, vb))
        }
        _ => a == b,
    }
}

/// Ordering for range operators: only values of the same kind compare.
fn compare_same_class(a: &Bson, b: &Bson) -> Option<Ordering> {
    if is_number(a) && is_number(b) {
        return Some(bson_as_f64(a)?.total_cmp(&bson_as_f64(b)?));
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => Some((x.time, x.increment).cmp(&(y.time, y.increment))),
        _ => None,
    }
}

/// Total order over BSON values used for sorting and `$min`/`$max`.
///
/// Kinds are ranked null < numbers < strings < documents < arrays < object ids < booleans <
/// dates; values of the same kind compare naturally.
#[must_use]
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    if let Some(ord) = compare_same_class(a, b) {
        return ord;
    }
    match (a, b) {
        (Bson::Array(x), Bson::Array(y)) => {
            for (p, q) in x.iter().zip(y) {
                let ord = compare_bson(p, q);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::Document(x), Bson::Document(y)) => {
            for ((ka, va), (kb, vb)) in x.iter().zip(y.iter()) {
                let ord = ka.cmp(kb).then_with(|| compare_bson(va, vb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

const fn type_rank(v: &Bson) -> u8 {
    match v {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::DbPointer(_) | Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => 12,
        Bson::MaxKey => 13,
    }
}

/// Compare two documents by a sort specification. Missing fields sort as null.
#[must_use]
pub fn compare_docs(a: &BsonDocument, b: &BsonDocument, sort: &[SortSpec]) -> Ordering {
    for s in sort.iter().take(MAX_SORT_FIELDS) {
        let va = first_value(a, &s.field).unwrap_or(&Bson::Null);
        let vb = first_value(b, &s.field).unwrap_or(&Bson::Null);
        let ord = compare_bson(va, vb);
        if ord != Ordering::Equal {
            return match s.order {
                Order::Asc => ord,
                Order::Desc => ord.reverse(),
            };
        }
    }
    Ordering::Equal
}

/// Keep `_id` plus the listed (possibly dotted) fields.
#[must_use]
pub fn project_fields(doc: &BsonDocument, fields: &[String]) -> BsonDocument {
    let mut out = BsonDocument::new();
    if let Some(id) = doc.get("_id") {
        out.insert("_id", id.clone());
    }
    for f in fields {
        if let Ok(parts) = split_path(f) {
            project_into(&mut out, doc, &parts);
        }
    }
    out
}

fn project_into(out: &mut BsonDocument, src: &BsonDocument, parts: &[&str]) {
    let Some((head, rest)) = parts.split_first() else {
        return;
    };
    let Some(value) = src.get(*head) else {
        return;
    };
    if rest.is_empty() {
        out.insert(*head, value.clone());
        return;
    }
    match value {
        Bson::Document(sub) => {
            let mut child = match out.remove(*head) {
                Some(Bson::Document(d)) => d,
                _ => BsonDocument::new(),
            };
            project_into(&mut child, sub, rest);
            if !child.is_empty() {
                out.insert(*head, child);
            }
        }
        Bson::Array(items) => {
            let mut existing = match out.remove(*head) {
                Some(Bson::Array(a)) if a.len() == items.len() => a,
                _ => vec![Bson::Document(BsonDocument::new()); items.len()],
            };
            for (slot, item) in existing.iter_mut().zip(items) {
                if let (Bson::Document(dst), Bson::Document(sub)) = (slot, item) {
                    project_into(dst, sub, rest);
                }
            }
            out.insert(*head, existing);
        }
        _ => {}
    }
}

/// One-shot evaluation; an invalid filter matches nothing.
#[must_use]
pub fn eval_filter(doc: &BsonDocument, filter: &Filter) -> bool {
    Matcher::compile(filter).is_ok_and(|m| m.matches(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    #[test]
    fn equality_is_numeric_aware() {
        let d = doc! { "votes": 5_i64 };
        assert!(eval_filter(&d, &Filter::eq("votes", 5)));
        assert!(eval_filter(&d, &Filter::eq("votes", 5.0)));
        assert!(!eval_filter(&d, &Filter::eq("votes", "5")));
    }

    #[test]
    fn equality_reaches_into_arrays() {
        let d = doc! { "reviews": [ { "_id": "r1" }, { "_id": "r2" } ] };
        assert!(eval_filter(&d, &Filter::eq("reviews._id", "r2")));
        assert!(!eval_filter(&d, &Filter::eq("reviews._id", "r3")));
    }

    #[test]
    fn range_only_within_same_kind() {
        let d = doc! { "review_count": 3, "name": "x" };
        assert!(eval_filter(&d, &Filter::gt("review_count", 0)));
        assert!(!eval_filter(&d, &Filter::gt("review_count", "0")));
        assert!(!eval_filter(&d, &Filter::gt("missing", 0)));
    }

    #[test]
    fn missing_field_equals_null() {
        let d = doc! { "a": 1 };
        assert!(eval_filter(&d, &Filter::eq("b", Bson::Null)));
        assert!(!eval_filter(&d, &Filter::eq("a", Bson::Null)));
    }

    #[test]
    fn regex_case_insensitive() {
        let d = doc! { "country": "Austria" };
        assert!(eval_filter(&d, &Filter::regex_ci("country", "aus")));
        assert!(!eval_filter(&d, &Filter::regex_ci("country", "^ger")));
    }

    #[test]
    fn invalid_regex_is_rejected_at_compile() {
        let e = Matcher::compile(&Filter::regex_ci("name", "(unclosed")).unwrap_err();
        assert!(matches!(e, GatewayError::QueryRejected(_)));
        let long = "a".repeat(MAX_PATTERN_LEN + 1);
        assert!(Matcher::compile(&Filter::regex_ci("name", &long)).is_err());
    }

    #[test]
    fn elem_match_on_documents_and_scalars() {
        let d = doc! { "reviews": [ { "_id": "r1", "votes": 2 } ], "tags": [1, 9] };
        let f = Filter::ElemMatch { path: "reviews".into(), filter: Box::new(Filter::eq("_id", "r1")) };
        assert!(eval_filter(&d, &f));
        let f = Filter::ElemMatch { path: "tags".into(), filter: Box::new(Filter::gt(ELEM_KEY, 5)) };
        assert!(eval_filter(&d, &f));
        let f = Filter::ElemMatch { path: "tags".into(), filter: Box::new(Filter::gt(ELEM_KEY, 50)) };
        assert!(!eval_filter(&d, &f));
    }

    #[test]
    fn in_and_nin() {
        let oid = ObjectId::new();
        let d = doc! { "_id": oid };
        let f = Filter::In { path: "_id".into(), values: vec![Bson::ObjectId(oid), Bson::String(oid.to_hex())] };
        assert!(eval_filter(&d, &f));
        let f = Filter::Nin { path: "_id".into(), values: vec![Bson::ObjectId(oid)] };
        assert!(!eval_filter(&d, &f));
    }

    #[test]
    fn compare_bson_ranks_kinds() {
        assert_eq!(compare_bson(&Bson::Null, &Bson::Int32(0)), Ordering::Less);
        assert_eq!(compare_bson(&Bson::Int32(2), &Bson::Double(1.5)), Ordering::Greater);
        assert_eq!(compare_bson(&Bson::Int32(9), &Bson::String("a".into())), Ordering::Less);
    }

    #[test]
    fn compare_docs_sorts_missing_first_ascending() {
        let a = doc! { "experience_rating": { "value": 4.5 } };
        let b = doc! { "name": "no rating" };
        let sort = vec![SortSpec::desc("experience_rating.value")];
        assert_eq!(compare_docs(&a, &b, &sort), Ordering::Less);
    }

    #[test]
    fn projection_keeps_id_and_nested_paths() {
        let d = doc! { "_id": "u1", "name": "TU", "experience_rating": { "value": 4, "count": 2 }, "x": 1 };
        let p = project_fields(&d, &["name".into(), "experience_rating.value".into()]);
        assert_eq!(p, doc! { "_id": "u1", "name": "TU", "experience_rating": { "value": 4 } });
    }
}
