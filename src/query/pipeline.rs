//! Aggregation pipeline: stage parsing and in-memory execution.

use bson::{Bson, Document as BsonDocument};
use std::time::Instant;

use crate::errors::{GatewayError, Result};
use crate::utils::num::{
    bson_as_f64, bson_as_i64, i64_to_bson, i64_to_usize, u64_to_i64_saturating, usize_to_u64,
};
use crate::utils::qtrace::{QueryOp, QueryTrace};

use super::eval::{Matcher, bson_equal, compare_bson, compare_docs};
use super::parse::parse_match_document;
use super::path::{first_value, resolve_values, set_path, split_path};
use super::types::{MAX_PROJECTION_FIELDS, MAX_SORT_FIELDS, Order, SortSpec};

fn rejected(msg: impl Into<String>) -> GatewayError {
    GatewayError::QueryRejected(msg.into())
}

/// Value expression used by `$group` keys, accumulators and computed `$project` fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Bson),
    FieldRef(String),
    Object(Vec<(String, Expression)>),
    Add(Vec<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
    Multiply(Vec<Expression>),
    Divide(Box<Expression>, Box<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Sum(Expression),
    Avg(Expression),
    Min(Expression),
    Max(Expression),
    First(Expression),
    Last(Expression),
    Push(Expression),
    AddToSet(Expression),
}

#[derive(Debug)]
enum AccumulatorState {
    Sum { int: i64, float: f64, all_int: bool },
    Avg { sum: f64, count: u64 },
    Min(Option<Bson>),
    Max(Option<Bson>),
    First(Option<Bson>),
    Last(Option<Bson>),
    Push(Vec<Bson>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionField {
    Include,
    Exclude,
    Compute(Expression),
}

/// A parsed pipeline stage.
#[derive(Debug)]
pub enum Stage {
    Match(Matcher),
    Sort(Vec<SortSpec>),
    Skip(usize),
    Limit(usize),
    Project(Vec<(String, ProjectionField)>),
    Group { key: Expression, accumulators: Vec<(String, Accumulator)> },
    Count(String),
    Unwind { path: String, preserve_null: bool },
}

impl Stage {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Match(_) => "$match",
            Self::Sort(_) => "$sort",
            Self::Skip(_) => "$skip",
            Self::Limit(_) => "$limit",
            Self::Project(_) => "$project",
            Self::Group { .. } => "$group",
            Self::Count(_) => "$count",
            Self::Unwind { .. } => "$unwind",
        }
    }
}

/// Parse and validate every stage before anything runs.
///
/// # Errors
/// Returns `QueryRejected` for a stage document without exactly one key, an unknown stage, or
/// a bad stage argument.
pub fn parse_pipeline(stages: &[BsonDocument]) -> Result<Vec<Stage>> {
    stages.iter().map(parse_stage).collect()
}

fn parse_stage(stage: &BsonDocument) -> Result<Stage> {
    let mut entries = stage.iter();
    let (Some((name, arg)), None) = (entries.next(), entries.next()) else {
        return Err(rejected("a pipeline stage must have exactly one field"));
    };
    match name.as_str() {
        "$match" => {
            let Bson::Document(d) = arg else {
                return Err(rejected("$match requires a document"));
            };
            Ok(Stage::Match(Matcher::compile(&parse_match_document(d)?)?))
        }
        "$sort" => parse_sort(arg).map(Stage::Sort),
        "$skip" => parse_count_arg("$skip", arg).map(Stage::Skip),
        "$limit" => parse_count_arg("$limit", arg).map(Stage::Limit),
        "$project" => parse_project(arg).map(Stage::Project),
        "$group" => parse_group(arg),
        "$count" => match arg {
            Bson::String(s) if !s.is_empty() && !s.starts_with('$') && !s.contains('.') => {
                Ok(Stage::Count(s.clone()))
            }
            _ => Err(rejected("$count requires a non-empty field name without '$' or '.'")),
        },
        "$unwind" => parse_unwind(arg),
        other => Err(rejected(format!("unrecognized pipeline stage name: '{other}'"))),
    }
}

fn parse_count_arg(stage: &str, arg: &Bson) -> Result<usize> {
    let n = bson_as_i64(arg).ok_or_else(|| rejected(format!("{stage} requires an integer")))?;
    i64_to_usize(n).ok_or_else(|| rejected(format!("{stage} must be non-negative, got {n}")))
}

fn parse_sort(arg: &Bson) -> Result<Vec<SortSpec>> {
    let Bson::Document(d) = arg else {
        return Err(rejected("$sort requires a document"));
    };
    if d.is_empty() || d.len() > MAX_SORT_FIELDS {
        return Err(rejected(format!("$sort requires 1..={MAX_SORT_FIELDS} keys")));
    }
    d.iter()
        .map(|(field, dir)| {
            split_path(field)?;
            let order = match bson_as_i64(dir) {
                Some(1) => Order::Asc,
                Some(-1) => Order::Desc,
                _ => return Err(rejected(format!("$sort direction for '{field}' must be 1 or -1"))),
            };
            Ok(SortSpec { field: field.clone(), order })
        })
        .collect()
}

fn parse_expression(val: &Bson) -> Result<Expression> {
    match val {
        Bson::String(s) if s.starts_with('$') => {
            let path = &s[1..];
            split_path(path)?;
            Ok(Expression::FieldRef(path.to_string()))
        }
        Bson::Document(d) => match d.keys().next().map(String::as_str) {
            Some(op) if op.starts_with('$') => {
                if d.len() != 1 {
                    return Err(rejected("an expression object must have exactly one operator"));
                }
                let arg = d.get(op).unwrap_or(&Bson::Null);
                parse_operator_expression(op, arg)
            }
            _ => d
                .iter()
                .map(|(k, v)| Ok((k.clone(), parse_expression(v)?)))
                .collect::<Result<_>>()
                .map(Expression::Object),
        },
        other => Ok(Expression::Literal(other.clone())),
    }
}

fn parse_operator_expression(op: &str, arg: &Bson) -> Result<Expression> {
    let list = |arg: &Bson| -> Result<Vec<Expression>> {
        match arg {
            Bson::Array(items) => items.iter().map(parse_expression).collect(),
            _ => Err(rejected(format!("{op} requires an array"))),
        }
    };
    let pair = |arg: &Bson| -> Result<(Box<Expression>, Box<Expression>)> {
        let mut items = list(arg)?;
        if items.len() != 2 {
            return Err(rejected(format!("{op} requires exactly two arguments")));
        }
        let b = items.remove(1);
        let a = items.remove(0);
        Ok((Box::new(a), Box::new(b)))
    };
    match op {
        "$literal" => Ok(Expression::Literal(arg.clone())),
        "$add" => list(arg).map(Expression::Add),
        "$multiply" => list(arg).map(Expression::Multiply),
        "$subtract" => pair(arg).map(|(a, b)| Expression::Subtract(a, b)),
        "$divide" => pair(arg).map(|(a, b)| Expression::Divide(a, b)),
        other => Err(rejected(format!("unrecognized expression operator '{other}'"))),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn number(v: f64) -> Bson {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 {
        return i64_to_bson(v as i64);
    }
    Bson::Double(v)
}

impl Expression {
    fn eval(&self, doc: &BsonDocument) -> Bson {
        match self {
            Self::Literal(v) => v.clone(),
            Self::FieldRef(path) => field_value(doc, path),
            Self::Object(fields) => {
                let mut out = BsonDocument::new();
                for (k, e) in fields {
                    out.insert(k.clone(), e.eval(doc));
                }
                Bson::Document(out)
            }
            Self::Add(items) => fold_numbers(items, doc, 0.0, |a, b| a + b),
            Self::Multiply(items) => fold_numbers(items, doc, 1.0, |a, b| a * b),
            Self::Subtract(a, b) => match (bson_as_f64(&a.eval(doc)), bson_as_f64(&b.eval(doc))) {
                (Some(x), Some(y)) => number(x - y),
                _ => Bson::Null,
            },
            Self::Divide(a, b) => match (bson_as_f64(&a.eval(doc)), bson_as_f64(&b.eval(doc))) {
                (Some(_), Some(y)) if y == 0.0 => Bson::Null,
                (Some(x), Some(y)) => Bson::Double(x / y),
                _ => Bson::Null,
            },
        }
    }
}

fn fold_numbers(items: &[Expression], doc: &BsonDocument, init: f64, f: impl Fn(f64, f64) -> f64) -> Bson {
    let mut acc = init;
    for e in items {
        match bson_as_f64(&e.eval(doc)) {
            Some(n) => acc = f(acc, n),
            None => return Bson::Null,
        }
    }
    number(acc)
}

/// A field reference: the single value at `path`, or an array when the path fans out.
fn field_value(doc: &BsonDocument, path: &str) -> Bson {
    let values = resolve_values(doc, path);
    match values.len() {
        0 => Bson::Null,
        1 => values[0].clone(),
        _ => Bson::Array(values.into_iter().cloned().collect()),
    }
}

fn parse_accumulator(name: &str, val: &Bson) -> Result<Accumulator> {
    let Bson::Document(d) = val else {
        return Err(rejected(format!("group field '{name}' must be an accumulator object")));
    };
    let mut entries = d.iter();
    let (Some((op, arg)), None) = (entries.next(), entries.next()) else {
        return Err(rejected(format!("group field '{name}' must have exactly one accumulator")));
    };
    let expr = parse_expression(arg)?;
    Ok(match op.as_str() {
        "$sum" => Accumulator::Sum(expr),
        "$avg" => Accumulator::Avg(expr),
        "$min" => Accumulator::Min(expr),
        "$max" => Accumulator::Max(expr),
        "$first" => Accumulator::First(expr),
        "$last" => Accumulator::Last(expr),
        "$push" => Accumulator::Push(expr),
        "$addToSet" => Accumulator::AddToSet(expr),
        other => return Err(rejected(format!("unknown group operator '{other}'"))),
    })
}

fn parse_group(arg: &Bson) -> Result<Stage> {
    let Bson::Document(d) = arg else {
        return Err(rejected("$group requires a document"));
    };
    let key = d.get("_id").ok_or_else(|| rejected("$group requires an _id"))?;
    let key = parse_expression(key)?;
    let accumulators = d
        .iter()
        .filter(|(k, _)| k.as_str() != "_id")
        .map(|(k, v)| {
            if k.contains('.') || k.starts_with('$') {
                return Err(rejected(format!("invalid group field name '{k}'")));
            }
            Ok((k.clone(), parse_accumulator(k, v)?))
        })
        .collect::<Result<_>>()?;
    Ok(Stage::Group { key, accumulators })
}

fn parse_project(arg: &Bson) -> Result<Vec<(String, ProjectionField)>> {
    let Bson::Document(d) = arg else {
        return Err(rejected("$project requires a document"));
    };
    if d.is_empty() || d.len() > MAX_PROJECTION_FIELDS {
        return Err(rejected(format!("$project requires 1..={MAX_PROJECTION_FIELDS} fields")));
    }
    let fields = d
        .iter()
        .map(|(k, v)| {
            split_path(k)?;
            let pf = match v {
                Bson::Boolean(true) => ProjectionField::Include,
                Bson::Boolean(false) => ProjectionField::Exclude,
                Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => {
                    if bson_as_f64(v).is_some_and(|n| n != 0.0) {
                        ProjectionField::Include
                    } else {
                        ProjectionField::Exclude
                    }
                }
                other => ProjectionField::Compute(parse_expression(other)?),
            };
            Ok((k.clone(), pf))
        })
        .collect::<Result<Vec<_>>>()?;
    for (i, (a, _)) in fields.iter().enumerate() {
        if let Some((b, _)) = fields[i + 1..].iter().find(|(b, _)| path_collides(a, b)) {
            return Err(rejected(format!("$project path collision between '{a}' and '{b}'")));
        }
    }
    let includes = fields.iter().any(|(k, pf)| k != "_id" && !matches!(pf, ProjectionField::Exclude));
    let excludes = fields.iter().any(|(k, pf)| k != "_id" && matches!(pf, ProjectionField::Exclude));
    if includes && excludes {
        return Err(rejected("$project cannot mix inclusion and exclusion"));
    }
    Ok(fields)
}

fn parse_unwind(arg: &Bson) -> Result<Stage> {
    let (path, preserve_null) = match arg {
        Bson::String(s) => (s.clone(), false),
        Bson::Document(d) => {
            let path = match d.get("path") {
                Some(Bson::String(s)) => s.clone(),
                _ => return Err(rejected("$unwind requires a path string")),
            };
            let preserve = match d.get("preserveNullAndEmptyArrays") {
                None => false,
                Some(Bson::Boolean(b)) => *b,
                Some(_) => return Err(rejected("preserveNullAndEmptyArrays must be a boolean")),
            };
            (path, preserve)
        }
        _ => return Err(rejected("$unwind requires a string or document")),
    };
    let Some(path) = path.strip_prefix('$') else {
        return Err(rejected("$unwind path must start with '$'"));
    };
    split_path(path)?;
    Ok(Stage::Unwind { path: path.to_string(), preserve_null })
}

/// Run parsed stages over `docs` in order.
///
/// # Errors
/// Returns `QueryRejected` when an `$unwind` or `$project` cannot rewrite a document.
pub fn run_stages(collection: &str, docs: Vec<BsonDocument>, stages: &[Stage]) -> Result<Vec<BsonDocument>> {
    let start = Instant::now();
    let mut docs = docs;
    for stage in stages {
        docs = match stage {
            Stage::Match(m) => docs.into_iter().filter(|d| m.matches(d)).collect(),
            Stage::Sort(spec) => {
                docs.sort_by(|a, b| compare_docs(a, b, spec));
                docs
            }
            Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
            Stage::Limit(n) => docs.into_iter().take(*n).collect(),
            Stage::Project(fields) => docs.iter().map(|d| exec_project(d, fields)).collect::<Result<_>>()?,
            Stage::Group { key, accumulators } => exec_group(&docs, key, accumulators),
            Stage::Count(name) => {
                if docs.is_empty() {
                    Vec::new()
                } else {
                    let mut out = BsonDocument::new();
                    let n = u64_to_i64_saturating(usize_to_u64(docs.len()));
                    out.insert(name.clone(), i64_to_bson(n));
                    vec![out]
                }
            }
            Stage::Unwind { path, preserve_null } => exec_unwind(docs, path, *preserve_null)?,
        };
    }
    QueryTrace::new(QueryOp::Aggregate, collection, start)
        .stages(stages.iter().map(Stage::name).collect())
        .results(docs.len())
        .emit();
    Ok(docs)
}

/// Parse then run a pipeline.
///
/// # Errors
/// See [`parse_pipeline`] and [`run_stages`].
pub fn run_pipeline(collection: &str, docs: Vec<BsonDocument>, pipeline: &[BsonDocument]) -> Result<Vec<BsonDocument>> {
    let stages = parse_pipeline(pipeline)?;
    run_stages(collection, docs, &stages)
}

fn initial_state(acc: &Accumulator) -> AccumulatorState {
    match acc {
        Accumulator::Sum(_) => AccumulatorState::Sum { int: 0, float: 0.0, all_int: true },
        Accumulator::Avg(_) => AccumulatorState::Avg { sum: 0.0, count: 0 },
        Accumulator::Min(_) => AccumulatorState::Min(None),
        Accumulator::Max(_) => AccumulatorState::Max(None),
        Accumulator::First(_) => AccumulatorState::First(None),
        Accumulator::Last(_) => AccumulatorState::Last(None),
        Accumulator::Push(_) | Accumulator::AddToSet(_) => AccumulatorState::Push(Vec::new()),
    }
}

fn accumulate(acc: &Accumulator, state: &mut AccumulatorState, doc: &BsonDocument) {
    match (acc, state) {
        (Accumulator::Sum(e), AccumulatorState::Sum { int, float, all_int }) => {
            let v = e.eval(doc);
            // Non-numeric values are ignored.
            if let Some(f) = bson_as_f64(&v) {
                *float += f;
                match (matches!(v, Bson::Int32(_) | Bson::Int64(_)), bson_as_i64(&v)) {
                    (true, Some(i)) => match int.checked_add(i) {
                        Some(s) => *int = s,
                        None => *all_int = false,
                    },
                    _ => *all_int = false,
                }
            }
        }
        (Accumulator::Avg(e), AccumulatorState::Avg { sum, count }) => {
            if let Some(f) = bson_as_f64(&e.eval(doc)) {
                *sum += f;
                *count += 1;
            }
        }
        (Accumulator::Min(e), AccumulatorState::Min(cur)) => {
            let v = e.eval(doc);
            if !matches!(v, Bson::Null) && cur.as_ref().is_none_or(|c| compare_bson(&v, c).is_lt()) {
                *cur = Some(v);
            }
        }
        (Accumulator::Max(e), AccumulatorState::Max(cur)) => {
            let v = e.eval(doc);
            if !matches!(v, Bson::Null) && cur.as_ref().is_none_or(|c| compare_bson(&v, c).is_gt()) {
                *cur = Some(v);
            }
        }
        (Accumulator::First(e), AccumulatorState::First(cur)) => {
            if cur.is_none() {
                *cur = Some(e.eval(doc));
            }
        }
        (Accumulator::Last(e), AccumulatorState::Last(cur)) => *cur = Some(e.eval(doc)),
        (Accumulator::Push(e), AccumulatorState::Push(items)) => items.push(e.eval(doc)),
        (Accumulator::AddToSet(e), AccumulatorState::Push(items)) => {
            let v = e.eval(doc);
            if !items.iter().any(|x| bson_equal(x, &v)) {
                items.push(v);
            }
        }
        _ => {}
    }
}

#[allow(clippy::cast_precision_loss)]
fn finish(state: AccumulatorState) -> Bson {
    match state {
        AccumulatorState::Sum { int, float, all_int } => {
            if all_int {
                i64_to_bson(int)
            } else {
                Bson::Double(float)
            }
        }
        AccumulatorState::Avg { sum, count } => {
            if count == 0 {
                Bson::Null
            } else {
                Bson::Double(sum / count as f64)
            }
        }
        AccumulatorState::Min(v)
        | AccumulatorState::Max(v)
        | AccumulatorState::First(v)
        | AccumulatorState::Last(v) => v.unwrap_or(Bson::Null),
        AccumulatorState::Push(items) => Bson::Array(items),
    }
}

fn exec_group(docs: &[BsonDocument], key: &Expression, accumulators: &[(String, Accumulator)]) -> Vec<BsonDocument> {
    // Groups keep first-seen order.
    let mut groups: Vec<(Bson, Vec<AccumulatorState>)> = Vec::new();
    for doc in docs {
        let k = key.eval(doc);
        let idx = match groups.iter().position(|(g, _)| bson_equal(g, &k)) {
            Some(i) => i,
            None => {
                groups.push((k, accumulators.iter().map(|(_, a)| initial_state(a)).collect()));
                groups.len() - 1
            }
        };
        let states = &mut groups[idx].1;
        for ((_, acc), state) in accumulators.iter().zip(states.iter_mut()) {
            accumulate(acc, state, doc);
        }
    }
    groups
        .into_iter()
        .map(|(k, states)| {
            let mut out = BsonDocument::new();
            out.insert("_id", k);
            for ((name, _), state) in accumulators.iter().zip(states) {
                out.insert(name.clone(), finish(state));
            }
            out
        })
        .collect()
}

/// One path is the other, or an ancestor of it.
fn path_collides(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    long.strip_prefix(short).is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

fn exec_project(doc: &BsonDocument, fields: &[(String, ProjectionField)]) -> Result<BsonDocument> {
    let only_id = fields.iter().all(|(k, pf)| k == "_id" && *pf == ProjectionField::Include);
    let inclusion =
        only_id || fields.iter().any(|(k, pf)| k != "_id" && !matches!(pf, ProjectionField::Exclude));
    let id_excluded = fields.iter().any(|(k, pf)| k == "_id" && matches!(pf, ProjectionField::Exclude));
    if !inclusion {
        let mut out = doc.clone();
        for (k, pf) in fields {
            if matches!(pf, ProjectionField::Exclude) {
                remove_path(&mut out, k);
            }
        }
        return Ok(out);
    }
    let mut out = BsonDocument::new();
    if !id_excluded {
        if let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
    }
    for (k, pf) in fields {
        match pf {
            ProjectionField::Include => {
                if k != "_id"
                    && let Some(v) = first_value(doc, k)
                {
                    // Nested includes land at the same dotted location.
                    set_path(&mut out, k, v.clone())?;
                }
            }
            ProjectionField::Compute(e) => {
                set_path(&mut out, k, e.eval(doc))?;
            }
            ProjectionField::Exclude => {}
        }
    }
    Ok(out)
}

fn remove_path(doc: &mut BsonDocument, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(sub)) = doc.get_mut(head) {
                remove_path(sub, rest);
            }
        }
    }
}

fn exec_unwind(docs: Vec<BsonDocument>, path: &str, preserve_null: bool) -> Result<Vec<BsonDocument>> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match first_value(&doc, path).cloned() {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut d = doc.clone();
                    set_path(&mut d, path, item)?;
                    out.push(d);
                }
            }
            Some(Bson::Array(_) | Bson::Null) | None => {
                if preserve_null {
                    out.push(doc);
                }
            }
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}
