//! Per-query trace records.
//!
//! Each store operation builds one [`QueryTrace`] and emits it: the record is written as a
//! JSON line to the `unirank::qtrace` log target and, inside [`capture`], collected on the
//! current thread so callers can inspect exactly what was executed.

use serde::Serialize;
use std::cell::RefCell;
use std::time::Instant;

use crate::utils::logger::QTRACE_TARGET;
use crate::utils::num::{u128_to_u64_saturating, usize_to_u64};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOp {
    Find,
    Count,
    Distinct,
    UpdateOne,
    Aggregate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryTrace {
    pub op: QueryOp,
    pub collection: String,
    /// Top-level filter operator, or the path for `distinct`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    pub result_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
    pub duration_ms: u64,
}

impl QueryTrace {
    #[must_use]
    pub fn new(op: QueryOp, collection: &str, started: Instant) -> Self {
        Self {
            op,
            collection: collection.to_string(),
            target: None,
            stages: Vec::new(),
            skip: None,
            limit: None,
            result_count: 0,
            modified: None,
            duration_ms: u128_to_u64_saturating(started.elapsed().as_millis()),
        }
    }

    #[must_use]
    pub fn target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    #[must_use]
    pub fn stages(mut self, stages: Vec<&'static str>) -> Self {
        self.stages = stages;
        self
    }

    #[must_use]
    pub fn bounds(mut self, skip: Option<usize>, limit: Option<usize>) -> Self {
        self.skip = skip.map(usize_to_u64);
        self.limit = limit.map(usize_to_u64);
        self
    }

    #[must_use]
    pub fn results(mut self, n: usize) -> Self {
        self.result_count = usize_to_u64(n);
        self
    }

    #[must_use]
    pub fn modified(mut self, n: u64) -> Self {
        self.modified = Some(n);
        self
    }

    /// True when the query was paginated, either by options or by `$skip`/`$limit` stages.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.skip.is_some()
            || self.limit.is_some()
            || self.stages.iter().any(|s| matches!(*s, "$skip" | "$limit"))
    }

    /// Log the record and hand it to the active [`capture`] on this thread, if any.
    pub fn emit(self) {
        if log::log_enabled!(target: QTRACE_TARGET, log::Level::Trace) {
            match serde_json::to_string(&self) {
                Ok(line) => log::trace!(target: QTRACE_TARGET, "{line}"),
                Err(e) => log::warn!("query trace not serializable: {e}"),
            }
        }
        CAPTURED.with(|c| {
            if let Some(buf) = c.borrow_mut().as_mut() {
                buf.push(self);
            }
        });
    }
}

thread_local! {
    static CAPTURED: RefCell<Option<Vec<QueryTrace>>> = const { RefCell::new(None) };
}

/// Run `f` and return its result with the traces it emitted on this thread.
///
/// Captures nest: an inner capture sees only its own traces, and the outer one resumes
/// afterwards without them.
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, Vec<QueryTrace>) {
    let outer = CAPTURED.with(|c| c.replace(Some(Vec::new())));
    let result = f();
    let traces = CAPTURED.with(|c| c.replace(outer)).unwrap_or_default();
    (result, traces)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(op: QueryOp) -> QueryTrace {
        QueryTrace::new(op, "universities", Instant::now())
    }

    #[test]
    fn records_outside_capture_are_dropped() {
        trace(QueryOp::Count).emit();
        let ((), traces) = capture(|| trace(QueryOp::Find).results(2).emit());
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].op, QueryOp::Find);
        assert_eq!(traces[0].result_count, 2);
    }

    #[test]
    fn nested_capture_keeps_traces_apart() {
        let (inner, outer) = capture(|| {
            trace(QueryOp::Count).emit();
            let ((), inner) = capture(|| trace(QueryOp::Distinct).target("languages.name").emit());
            trace(QueryOp::UpdateOne).modified(1).emit();
            inner
        });
        assert_eq!(inner.iter().map(|t| t.op).collect::<Vec<_>>(), vec![QueryOp::Distinct]);
        assert_eq!(outer.iter().map(|t| t.op).collect::<Vec<_>>(), vec![QueryOp::Count, QueryOp::UpdateOne]);
    }

    #[test]
    fn bounds_come_from_options_or_stages() {
        assert!(!trace(QueryOp::Count).is_bounded());
        assert!(trace(QueryOp::Find).bounds(None, Some(10)).is_bounded());
        assert!(trace(QueryOp::Aggregate).stages(vec!["$match", "$limit"]).is_bounded());
        assert!(!trace(QueryOp::Aggregate).stages(vec!["$match", "$group"]).is_bounded());
    }

    #[test]
    fn serialized_record_omits_absent_fields() {
        let v = serde_json::to_value(trace(QueryOp::Count).target("$or").results(3)).unwrap();
        assert_eq!(v["op"], "count");
        assert_eq!(v["target"], "$or");
        assert_eq!(v["result_count"], 3);
        assert!(v.get("skip").is_none() && v.get("limit").is_none() && v.get("stages").is_none());
    }
}
