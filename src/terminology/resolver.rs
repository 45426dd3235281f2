//! Per-field terminology resolution

use super::{TerminologyClient, TerminologyError};
use crate::mapping::FieldTerminology;
use crate::tree::{normalize, Value};
use thiserror::Error;

/// A field whose values could not be resolved. Never swallowed: the caller
/// decides how the failure shows up on the record.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    #[error("field '{field}': element {index} carries no code")]
    MissingCode { field: String, index: usize },

    #[error("field '{field}': code '{code}' not resolved: {source}")]
    Miss {
        field: String,
        code: String,
        #[source]
        source: TerminologyError,
    },
}

impl ResolutionError {
    pub fn field(&self) -> &str {
        match self {
            Self::MissingCode { field, .. } | Self::Miss { field, .. } => field,
        }
    }
}

/// The code of an element: the string itself, or the `code` sub-key of a map.
fn element_code(element: &Value) -> Option<String> {
    match element {
        Value::Map(map) => map.get("code").and_then(Value::scalar_text),
        Value::Scalar(_) => element.scalar_text(),
        Value::Sequence(_) => None,
    }
}

/// The version used for a direct lookup: the map's `version` sub-key for
/// structured elements, the declared version otherwise.
fn element_version(element: &Value, declared: Option<&str>) -> Option<String> {
    match element {
        Value::Map(map) => map.get("version").and_then(Value::scalar_text),
        _ => declared.map(str::to_string),
    }
}

/// Resolve every element of a field's values, preserving order.
///
/// - no attributes, or attributes declaring neither system nor concept map:
///   values pass through unchanged
/// - a concept map: each code is translated; direct lookup is never used
/// - only a code system: each code is looked up by (system, version, code)
pub async fn resolve_field(
    client: &dyn TerminologyClient,
    terminology: Option<&FieldTerminology>,
    field: &str,
    values: Value,
) -> Result<Value, ResolutionError> {
    let Some(terminology) = terminology.filter(|t| !t.is_passthrough()) else {
        return Ok(values);
    };

    let elements = match normalize(values) {
        Value::Sequence(items) => items,
        other => vec![other],
    };

    let mut resolved = Vec::with_capacity(elements.len());
    for (index, element) in elements.iter().enumerate() {
        let code = element_code(element).ok_or_else(|| ResolutionError::MissingCode {
            field: field.to_string(),
            index,
        })?;

        let result = if let Some(map) = &terminology.concept_map {
            client.translate(map, &code).await
        } else if let Some(system) = &terminology.system {
            let version = element_version(element, terminology.version.as_deref());
            client.lookup(system, version.as_deref(), &code).await
        } else {
            Ok(element.clone())
        };

        let value = result.map_err(|source| ResolutionError::Miss {
            field: field.to_string(),
            code: code.clone(),
            source,
        })?;
        resolved.push(value);
    }

    Ok(Value::Sequence(resolved))
}
