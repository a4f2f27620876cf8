use bson::{Bson, Document as BsonDocument};

use crate::errors::{GatewayError, Result};
use crate::utils::json::parse_json_to_bson_document;

use super::eval::{ELEM_KEY, compile_regex};
use super::path::split_path;
use super::types::{CmpOp, Filter, MAX_IN_SET};

fn rejected(msg: impl Into<String>) -> GatewayError {
    GatewayError::QueryRejected(msg.into())
}

/// Parse a `$match`-style document into a [`Filter`].
///
/// Supported: field equality, `$and`/`$or`/`$nor`, and per-field `$eq`, `$ne`, `$gt`, `$gte`,
/// `$lt`, `$lte`, `$in`, `$nin`, `$exists`, `$regex` (with `$options`), `$not`, `$elemMatch`.
///
/// # Errors
/// Returns `QueryRejected` for unknown operators or badly shaped operands.
pub fn parse_match_document(doc: &BsonDocument) -> Result<Filter> {
    let mut parts = Vec::with_capacity(doc.len());
    for (key, value) in doc {
        let f = match key.as_str() {
            "$and" => Filter::And(parse_clause_list(key, value)?),
            "$or" => Filter::Or(parse_clause_list(key, value)?),
            "$nor" => Filter::Not(Box::new(Filter::Or(parse_clause_list(key, value)?))),
            k if k.starts_with('$') => return Err(rejected(format!("unknown top-level operator {k}"))),
            path => {
                split_path(path)?;
                parse_field(path, value)?
            }
        };
        parts.push(f);
    }
    Ok(Filter::all(parts))
}

fn parse_clause_list(op: &str, value: &Bson) -> Result<Vec<Filter>> {
    let Bson::Array(items) = value else {
        return Err(rejected(format!("{op} requires an array")));
    };
    if items.is_empty() {
        return Err(rejected(format!("{op} requires a non-empty array")));
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => parse_match_document(d),
            _ => Err(rejected(format!("{op} entries must be documents"))),
        })
        .collect()
}

fn is_operator_doc(d: &BsonDocument) -> bool {
    d.keys().next().is_some_and(|k| k.starts_with('$'))
}

fn parse_field(path: &str, value: &Bson) -> Result<Filter> {
    match value {
        Bson::Document(ops) if is_operator_doc(ops) => parse_operators(path, ops),
        Bson::RegularExpression(re) => Ok(Filter::Regex {
            path: path.to_string(),
            pattern: re.pattern.clone(),
            case_insensitive: re.options.contains('i'),
        }),
        other => Ok(Filter::Cmp { path: path.to_string(), op: CmpOp::Eq, value: other.clone() }),
    }
}

fn parse_operators(path: &str, ops: &BsonDocument) -> Result<Filter> {
    let options = match ops.get("$options") {
        None => None,
        Some(Bson::String(s)) => Some(s.as_str()),
        Some(_) => return Err(rejected("$options must be a string")),
    };
    if options.is_some() && !ops.contains_key("$regex") {
        return Err(rejected("$options requires $regex"));
    }
    let mut parts = Vec::with_capacity(ops.len());
    for (op, operand) in ops {
        let cmp = |op: CmpOp| Filter::Cmp { path: path.to_string(), op, value: operand.clone() };
        let f = match op.as_str() {
            "$eq" => cmp(CmpOp::Eq),
            "$ne" => Filter::Not(Box::new(cmp(CmpOp::Eq))),
            "$gt" => cmp(CmpOp::Gt),
            "$gte" => cmp(CmpOp::Gte),
            "$lt" => cmp(CmpOp::Lt),
            "$lte" => cmp(CmpOp::Lte),
            "$in" => Filter::In { path: path.to_string(), values: parse_set(op, operand)? },
            "$nin" => Filter::Nin { path: path.to_string(), values: parse_set(op, operand)? },
            "$exists" => Filter::Exists { path: path.to_string(), exists: truthy(operand) },
            "$regex" => parse_regex(path, operand, options)?,
            "$options" => continue,
            "$not" => Filter::Not(Box::new(match operand {
                Bson::Document(d) if is_operator_doc(d) => parse_operators(path, d)?,
                Bson::RegularExpression(_) => parse_field(path, operand)?,
                _ => return Err(rejected("$not requires an operator document or a regex")),
            })),
            "$elemMatch" => {
                let Bson::Document(d) = operand else {
                    return Err(rejected("$elemMatch requires a document"));
                };
                let logical = ["$and", "$or", "$nor"].iter().any(|k| d.contains_key(k));
                let inner = if is_operator_doc(d) && !logical {
                    parse_operators(ELEM_KEY, d)?
                } else {
                    parse_match_document(d)?
                };
                Filter::ElemMatch { path: path.to_string(), filter: Box::new(inner) }
            }
            other => return Err(rejected(format!("unknown operator {other}"))),
        };
        parts.push(f);
    }
    Ok(Filter::all(parts))
}

fn parse_set(op: &str, operand: &Bson) -> Result<Vec<Bson>> {
    let Bson::Array(values) = operand else {
        return Err(rejected(format!("{op} requires an array")));
    };
    if values.len() > MAX_IN_SET {
        return Err(rejected(format!("{op} set too large: {} > {MAX_IN_SET}", values.len())));
    }
    Ok(values.clone())
}

fn parse_regex(path: &str, operand: &Bson, options: Option<&str>) -> Result<Filter> {
    let (pattern, inline_opts) = match operand {
        Bson::String(s) => (s.clone(), String::new()),
        Bson::RegularExpression(re) => (re.pattern.clone(), re.options.clone()),
        _ => return Err(rejected("$regex requires a string")),
    };
    let opts = options.unwrap_or(inline_opts.as_str());
    if let Some(bad) = opts.chars().find(|c| !matches!(c, 'i' | 'm' | 's' | 'x' | 'u')) {
        return Err(rejected(format!("unsupported regex option '{bad}'")));
    }
    let case_insensitive = opts.contains('i');
    compile_regex(&pattern, case_insensitive)?;
    Ok(Filter::Regex { path: path.to_string(), pattern, case_insensitive })
}

fn truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0,
        _ => true,
    }
}

/// Parse a JSON match document (extended JSON accepted) into a [`Filter`].
///
/// # Errors
/// Returns a JSON or `MalformedSpecification` error for bad JSON and `QueryRejected` for bad operators.
pub fn parse_filter_json(json: &str) -> Result<Filter> {
    let doc = parse_json_to_bson_document(json)?;
    parse_match_document(&doc)
}
