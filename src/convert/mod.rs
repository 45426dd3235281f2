//! Conversion collaborator: turns a matched subtree into a flat result map
//!
//! The engine hands the matched node-set plus the rule's source and target
//! profiles to a [`ConversionClient`] and receives a flat, path-keyed map.
//! Two implementations:
//! - `MdrClient`: the metadata repository's convert endpoint (production)
//! - `MockConverter`: preconfigured responses per target profile (testing)

mod mdr;

pub use mdr::{MdrClient, MdrSettings};

use crate::mapping::Conversion;
use crate::tree::Record;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// A conversion request: which profiles to convert between, and the raw
/// field values of the matched subtree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    pub source_profile_code: String,
    pub source_profile_version: Option<String>,
    pub target_profile_code: String,
    pub target_profile_version: Option<String>,
    pub values: Record,
}

impl ConversionRequest {
    pub fn new(conversion: &Conversion, values: Record) -> Self {
        Self {
            source_profile_code: conversion.source.code.clone(),
            source_profile_version: conversion.source.version.clone(),
            target_profile_code: conversion.target.code.clone(),
            target_profile_version: conversion.target.version.clone(),
            values,
        }
    }
}

/// A conversion response. Values are keyed by target field path.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConversionResponse {
    #[serde(default)]
    pub values: Record,
}

/// Errors from conversion client operations.
#[derive(Debug, Clone, Error)]
pub enum ConversionError {
    #[error("conversion service not available: {0}")]
    Unavailable(String),
    #[error("conversion rejected: {0}")]
    Rejected(String),
    #[error("malformed conversion response: {0}")]
    Malformed(String),
}

/// Client trait for the conversion collaborator.
#[async_trait]
pub trait ConversionClient: Send + Sync {
    async fn convert(&self, request: ConversionRequest) -> Result<Record, ConversionError>;
}

/// Convert the node-set under a matched path.
pub async fn convert_subtree(
    client: &dyn ConversionClient,
    conversion: &Conversion,
    nodes: &Record,
) -> Result<Record, ConversionError> {
    client
        .convert(ConversionRequest::new(conversion, nodes.clone()))
        .await
}

/// Mock converter for testing: returns preconfigured flat maps keyed by
/// target profile code and records every request it sees.
#[derive(Default)]
pub struct MockConverter {
    responses: HashMap<String, Result<Record, ConversionError>>,
    requests: Mutex<Vec<ConversionRequest>>,
}

impl MockConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the flat map returned for a target profile.
    pub fn with_response(mut self, target: impl Into<String>, values: Record) -> Self {
        self.responses.insert(target.into(), Ok(values));
        self
    }

    /// Register a failure for a target profile.
    pub fn with_failure(mut self, target: impl Into<String>, reason: impl Into<String>) -> Self {
        self.responses
            .insert(target.into(), Err(ConversionError::Rejected(reason.into())));
        self
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<ConversionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConversionClient for MockConverter {
    async fn convert(&self, request: ConversionRequest) -> Result<Record, ConversionError> {
        let target = request.target_profile_code.clone();
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request);
        }
        match self.responses.get(&target) {
            Some(result) => result.clone(),
            None => Err(ConversionError::Rejected(format!(
                "no mock response for target profile '{}'",
                target
            ))),
        }
    }
}
