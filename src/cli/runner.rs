use serde::Serialize;
use serde_json::Value;
use std::io::Write;

use crate::gateway::{BatchEntry, Gateway};

use super::command::Command;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputMode {
    /// Indented JSON.
    Human,
    /// Arrays one element per line, scalars bare.
    Plain,
    /// One line of JSON.
    Json,
}

fn emit<T: Serialize>(out: &mut impl Write, mode: OutputMode, value: &T) -> Result<(), Box<dyn std::error::Error>> {
    let value = serde_json::to_value(value)?;
    match mode {
        OutputMode::Json => writeln!(out, "{value}")?,
        OutputMode::Human => writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?,
        OutputMode::Plain => match value {
            Value::Array(items) => {
                for item in items {
                    plain_line(out, &item)?;
                }
            }
            other => plain_line(out, &other)?,
        },
    }
    Ok(())
}

fn plain_line(out: &mut impl Write, value: &Value) -> std::io::Result<()> {
    match value {
        Value::String(s) => writeln!(out, "{s}"),
        Value::Object(map) if map.len() == 1 => match map.iter().next() {
            Some((k, v)) if !(v.is_object() || v.is_array()) => writeln!(out, "{k}={v}"),
            _ => writeln!(out, "{value}"),
        },
        other => writeln!(out, "{other}"),
    }
}

/// Run `cmd` and write its result to `out`.
///
/// # Errors
/// Returns the gateway error of a failed command, an I/O error from `out`, or, for a batch,
/// an error naming how many fields failed after the response has been written.
pub fn run_with_format(
    gateway: &Gateway,
    cmd: Command,
    mode: OutputMode,
    out: &mut impl Write,
) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        Command::Collections => emit(out, mode, &gateway.schema().listable_collections()),
        Command::List(req) => emit(out, mode, &gateway.list_entities(&req)?),
        Command::Count { collection, search } => {
            emit(out, mode, &gateway.entity_count(collection.as_deref(), search.as_ref())?)
        }
        Command::Summary { collection } => emit(out, mode, &gateway.review_summary(collection.as_deref())?),
        Command::Distinct { field, collection } => {
            emit(out, mode, &gateway.distinct_values(field, collection.as_deref())?)
        }
        Command::Vote(req) => emit(out, mode, &gateway.update_vote(&req)?),
        Command::Feedback { contact, message } => emit(out, mode, &gateway.submit_feedback(&contact, &message)?),
        Command::Batch { file } => {
            let text = std::fs::read_to_string(&file)
                .map_err(|e| format!("cannot read batch file {}: {e}", file.display()))?;
            let entries: Vec<BatchEntry> = serde_json::from_str(&text)?;
            let response = gateway.execute_batch(entries);
            emit(out, mode, &response)?;
            if response.is_ok() {
                Ok(())
            } else {
                Err(format!("{} batch field(s) failed", response.errors.len()).into())
            }
        }
    }
}
