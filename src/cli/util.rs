use crate::errors::{GatewayError, Result};
use crate::gateway::{Condition, SearchSpec};

/// Combine the mutually exclusive search flags into one specification.
///
/// # Errors
/// Returns `MalformedSpecification` when more than one kind is given or a condition does
/// not parse.
pub fn search_from_args(
    text: Option<String>,
    pipeline: Option<String>,
    conditions: &[String],
) -> Result<Option<SearchSpec>> {
    let given = usize::from(text.is_some()) + usize::from(pipeline.is_some()) + usize::from(!conditions.is_empty());
    if given > 1 {
        return Err(GatewayError::MalformedSpecification(
            "--search, --pipeline and --where are mutually exclusive".into(),
        ));
    }
    if let Some(t) = text {
        return Ok(Some(SearchSpec::Text(Some(t))));
    }
    if let Some(p) = pipeline {
        return Ok(Some(SearchSpec::Pipeline(p)));
    }
    if conditions.is_empty() {
        return Ok(None);
    }
    let parsed = conditions.iter().map(|c| Condition::parse(c)).collect::<Result<Vec<_>>>()?;
    Ok(Some(SearchSpec::Conditions(parsed)))
}

/// Split a comma-separated field list, dropping blanks.
#[must_use]
pub fn parse_fields(s: &str) -> Vec<String> {
    s.split(',').map(str::trim).filter(|f| !f.is_empty()).map(str::to_string).collect()
}
