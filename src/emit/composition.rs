//! Composition builder: turns a finished record into a template-bound artifact

use crate::tree::Record;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// Errors from building a composition.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unknown template: {0}")]
    UnknownTemplate(String),
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A built composition, ready for delivery.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Composition {
    pub uid: Uuid,
    pub template_id: String,
    pub composed_at: DateTime<Utc>,
    pub content: serde_json::Value,
}

impl Composition {
    pub fn to_json(&self) -> Result<String, BuildError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Builds compositions from nested records.
pub trait CompositionBuilder: Send + Sync {
    fn build(&self, template_id: &str, record: &Record) -> Result<Composition, BuildError>;
}

/// Builder for a fixed set of templates that embeds the record as the
/// composition content.
///
/// Top-level fields must be non-empty; a field that ended up as an empty
/// sequence cannot be placed in a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateBuilder {
    templates: BTreeSet<String>,
}

impl TemplateBuilder {
    pub fn new(templates: impl IntoIterator<Item = String>) -> Self {
        Self {
            templates: templates.into_iter().collect(),
        }
    }

    pub fn knows(&self, template_id: &str) -> bool {
        self.templates.contains(template_id)
    }
}

impl CompositionBuilder for TemplateBuilder {
    fn build(&self, template_id: &str, record: &Record) -> Result<Composition, BuildError> {
        if !self.knows(template_id) {
            return Err(BuildError::UnknownTemplate(template_id.to_string()));
        }
        if let Some((field, _)) = record
            .iter()
            .find(|(_, v)| v.as_sequence().is_some_and(|items| items.is_empty()))
        {
            return Err(BuildError::InvalidField {
                field: field.clone(),
                reason: "empty value list".to_string(),
            });
        }

        Ok(Composition {
            uid: Uuid::new_v4(),
            template_id: template_id.to_string(),
            composed_at: Utc::now(),
            content: serde_json::to_value(record)?,
        })
    }
}
