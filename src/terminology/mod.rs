//! Terminology collaborator and the per-field resolver
//!
//! Coded values are resolved either by direct code system lookup or by
//! concept map translation, depending on the field's declared attributes.
//! Two client implementations:
//! - `FhirTerminologyClient`: a FHIR terminology server (production)
//! - `MockTerminology`: fixed lookup and translation tables (testing)

mod fhir;
mod resolver;

pub use fhir::{FhirTerminologyClient, TerminologySettings};
pub use resolver::{resolve_field, ResolutionError};

use crate::mapping::ConceptMapRef;
use crate::tree::{record_from_json, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Errors from terminology client operations.
#[derive(Debug, Clone, Error)]
pub enum TerminologyError {
    #[error("no match for '{0}'")]
    NotFound(String),
    #[error("terminology service not available: {0}")]
    Unavailable(String),
    #[error("malformed terminology response: {0}")]
    Malformed(String),
}

/// Client trait for the terminology collaborator.
#[async_trait]
pub trait TerminologyClient: Send + Sync {
    /// Resolve a code directly against a code system.
    async fn lookup(
        &self,
        system: &str,
        version: Option<&str>,
        code: &str,
    ) -> Result<Value, TerminologyError>;

    /// Translate a code through a concept map.
    async fn translate(&self, map: &ConceptMapRef, code: &str) -> Result<Value, TerminologyError>;
}

/// A resolved coding as a record value: `{system, code[, display]}`.
pub fn coding(system: &str, code: &str, display: Option<&str>) -> Value {
    let mut json = serde_json::json!({ "system": system, "code": code });
    if let Some(display) = display {
        json["display"] = serde_json::Value::String(display.to_string());
    }
    record_from_json(json).map(Value::Map).unwrap_or_else(Value::null)
}

/// Mock terminology for testing: fixed tables, counts calls per operation.
#[derive(Default)]
pub struct MockTerminology {
    lookups: HashMap<(String, String), Value>,
    translations: HashMap<(String, String), Value>,
    lookup_calls: AtomicUsize,
    translate_calls: AtomicUsize,
}

impl MockTerminology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lookup(
        mut self,
        system: impl Into<String>,
        code: impl Into<String>,
        resolved: Value,
    ) -> Self {
        self.lookups.insert((system.into(), code.into()), resolved);
        self
    }

    pub fn with_translation(
        mut self,
        map_id: impl Into<String>,
        code: impl Into<String>,
        resolved: Value,
    ) -> Self {
        self.translations.insert((map_id.into(), code.into()), resolved);
        self
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn translate_calls(&self) -> usize {
        self.translate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TerminologyClient for MockTerminology {
    async fn lookup(
        &self,
        system: &str,
        _version: Option<&str>,
        code: &str,
    ) -> Result<Value, TerminologyError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.lookups
            .get(&(system.to_string(), code.to_string()))
            .cloned()
            .ok_or_else(|| TerminologyError::NotFound(format!("{system}|{code}")))
    }

    async fn translate(&self, map: &ConceptMapRef, code: &str) -> Result<Value, TerminologyError> {
        self.translate_calls.fetch_add(1, Ordering::SeqCst);
        self.translations
            .get(&(map.map_id.clone(), code.to_string()))
            .cloned()
            .ok_or_else(|| TerminologyError::NotFound(format!("{}:{code}", map.map_id)))
    }
}
