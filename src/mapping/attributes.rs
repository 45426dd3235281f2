//! Per-field terminology attributes, keyed by (target profile, field id)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, info};

/// Concept map declared for a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptMapRef {
    pub map_id: String,
    /// Entry (group element) id inside the map
    pub entry_id: String,
    pub source: String,
    pub target: String,
}

/// Terminology attributes of one target field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTerminology {
    pub system: Option<String>,
    pub version: Option<String>,
    pub concept_map: Option<ConceptMapRef>,
}

impl FieldTerminology {
    pub fn system(system: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_concept_map(mut self, concept_map: ConceptMapRef) -> Self {
        self.concept_map = Some(concept_map);
        self
    }

    /// True if the field needs no resolution at all.
    pub fn is_passthrough(&self) -> bool {
        self.system.is_none() && self.concept_map.is_none()
    }
}

/// Errors from fetching field attributes.
#[derive(Debug, Error)]
pub enum AttributeError {
    #[error("attribute source unavailable: {0}")]
    Unavailable(String),
    #[error("profile not found: {0}")]
    ProfileNotFound(String),
    #[error("malformed attribute response: {0}")]
    Malformed(String),
}

/// Where field attributes come from (the metadata repository in production).
#[async_trait]
pub trait AttributeSource: Send + Sync {
    /// Field ids declared by a target profile.
    async fn profile_fields(&self, profile: &str) -> Result<Vec<String>, AttributeError>;

    /// Terminology attributes of a single field, if it declares any.
    async fn field_terminology(
        &self,
        profile: &str,
        field_id: &str,
    ) -> Result<Option<FieldTerminology>, AttributeError>;
}

/// Immutable lookup of field attributes, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct AttributeCatalog {
    profiles: HashMap<String, HashMap<String, FieldTerminology>>,
}

impl AttributeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(
        mut self,
        profile: impl Into<String>,
        field_id: impl Into<String>,
        terminology: FieldTerminology,
    ) -> Self {
        self.profiles
            .entry(profile.into())
            .or_default()
            .insert(field_id.into(), terminology);
        self
    }

    /// Fetch the attributes of every field of every listed profile.
    pub async fn load(
        source: &dyn AttributeSource,
        profiles: &BTreeSet<String>,
    ) -> Result<Self, AttributeError> {
        let mut catalog = Self::new();
        for profile in profiles {
            let fields = source.profile_fields(profile).await?;
            let entry = catalog.profiles.entry(profile.clone()).or_default();
            for field_id in fields {
                if let Some(terminology) = source.field_terminology(profile, &field_id).await? {
                    debug!(profile = %profile, field = %field_id, "field declares terminology");
                    entry.insert(field_id, terminology);
                }
            }
            info!(profile = %profile, coded_fields = entry.len(), "loaded field attributes");
        }
        Ok(catalog)
    }

    pub fn field(&self, profile: &str, field_id: &str) -> Option<&FieldTerminology> {
        self.profiles.get(profile)?.get(field_id)
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }
}

/// Fixed in-memory attribute source for tests.
#[derive(Debug, Default)]
pub struct StaticAttributes {
    fields: HashMap<String, Vec<(String, Option<FieldTerminology>)>>,
}

impl StaticAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(
        mut self,
        profile: impl Into<String>,
        field_id: impl Into<String>,
        terminology: Option<FieldTerminology>,
    ) -> Self {
        self.fields
            .entry(profile.into())
            .or_default()
            .push((field_id.into(), terminology));
        self
    }
}

#[async_trait]
impl AttributeSource for StaticAttributes {
    async fn profile_fields(&self, profile: &str) -> Result<Vec<String>, AttributeError> {
        self.fields
            .get(profile)
            .map(|fs| fs.iter().map(|(id, _)| id.clone()).collect())
            .ok_or_else(|| AttributeError::ProfileNotFound(profile.to_string()))
    }

    async fn field_terminology(
        &self,
        profile: &str,
        field_id: &str,
    ) -> Result<Option<FieldTerminology>, AttributeError> {
        Ok(self
            .fields
            .get(profile)
            .and_then(|fs| fs.iter().find(|(id, _)| id == field_id))
            .and_then(|(_, t)| t.clone()))
    }
}
