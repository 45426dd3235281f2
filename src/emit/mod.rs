//! Emission sink: where finished records leave the engine
//!
//! The walker calls `emit()` once per split boundary with the record and the
//! rule's template id. `CompositionSink` builds a composition from it and
//! hands it to the configured delivery backend. A failed emission is
//! reported to the walker, which logs it and keeps traversing.

pub mod composition;
pub mod delivery;

use crate::tree::{Record, Value};
use async_trait::async_trait;
use composition::{BuildError, CompositionBuilder};
use delivery::{Archive, Delivery, DeliveryError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from a single emission.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("build failed: {0}")]
    Build(#[from] BuildError),
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("record has no subject in field '{0}'")]
    MissingSubject(String),
    #[error("archive write failed: {0}")]
    Archive(#[from] std::io::Error),
}

/// What one successful emission produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitOutcome {
    pub template_id: String,
    pub subject_id: Option<String>,
    /// Reference returned by the delivery backend, if one ran
    pub reference: Option<String>,
}

/// The interface through which the walker hands off finished records.
#[async_trait]
pub trait EmissionSink: Send + Sync {
    async fn emit(&self, template_id: &str, record: &Record) -> Result<EmitOutcome, EmitError>;
}

/// First value of the subject field, as text. Accepts a scalar or a
/// sequence whose first element is a scalar.
pub fn subject_of(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::Sequence(items) => items.first().and_then(Value::scalar_text),
        other => other.scalar_text(),
    }
}

/// Builds a composition per record and delivers it.
pub struct CompositionSink {
    builder: Arc<dyn CompositionBuilder>,
    delivery: Option<Arc<dyn Delivery>>,
    archive: Option<Arc<Archive>>,
    subject_field: String,
}

impl CompositionSink {
    pub fn new(builder: Arc<dyn CompositionBuilder>, subject_field: impl Into<String>) -> Self {
        Self {
            builder,
            delivery: None,
            archive: None,
            subject_field: subject_field.into(),
        }
    }

    pub fn with_delivery(mut self, delivery: Arc<dyn Delivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Write every built composition to the archive.
    pub fn with_archive(mut self, archive: Arc<Archive>) -> Self {
        self.archive = Some(archive);
        self
    }
}

#[async_trait]
impl EmissionSink for CompositionSink {
    async fn emit(&self, template_id: &str, record: &Record) -> Result<EmitOutcome, EmitError> {
        let composition = self.builder.build(template_id, record)?;
        let subject_id = subject_of(record, &self.subject_field);

        if let Some(archive) = &self.archive {
            let path = archive.write(
                subject_id.as_deref().unwrap_or("anonymous"),
                "json",
                &composition.to_json()?,
            )?;
            debug!(path = %path.display(), "archived composition");
        }

        let reference = match &self.delivery {
            Some(delivery) => {
                let subject = subject_id
                    .as_deref()
                    .ok_or_else(|| EmitError::MissingSubject(self.subject_field.clone()))?;
                let reference = delivery.deliver(subject, &composition).await?;
                info!(template = %template_id, subject = %subject, reference = %reference, "delivered composition");
                Some(reference)
            }
            None => None,
        };

        Ok(EmitOutcome {
            template_id: template_id.to_string(),
            subject_id,
            reference,
        })
    }
}

/// Sink for testing: records every emission, optionally failing for
/// selected templates.
#[derive(Default)]
pub struct RecordingSink {
    emitted: Mutex<Vec<(String, Record)>>,
    failing: HashSet<String>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every emission for this template.
    pub fn failing_for(mut self, template_id: impl Into<String>) -> Self {
        self.failing.insert(template_id.into());
        self
    }

    /// Emissions so far, in order.
    pub fn emitted(&self) -> Vec<(String, Record)> {
        self.emitted.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Records emitted for one template, in order.
    pub fn records_for(&self, template_id: &str) -> Vec<Record> {
        self.emitted()
            .into_iter()
            .filter(|(t, _)| t == template_id)
            .map(|(_, r)| r)
            .collect()
    }
}

#[async_trait]
impl EmissionSink for RecordingSink {
    async fn emit(&self, template_id: &str, record: &Record) -> Result<EmitOutcome, EmitError> {
        if self.failing.contains(template_id) {
            return Err(BuildError::UnknownTemplate(template_id.to_string()).into());
        }
        if let Ok(mut emitted) = self.emitted.lock() {
            emitted.push((template_id.to_string(), record.clone()));
        }
        Ok(EmitOutcome {
            template_id: template_id.to_string(),
            subject_id: None,
            reference: None,
        })
    }
}
