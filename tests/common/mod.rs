//! Common test utilities for engine scenarios
//!
//! Builds an engine from settings text with mock collaborators, plus a
//! small oncology-style source document.

#![allow(dead_code)]

use async_trait::async_trait;
use ehrflow::config;
use ehrflow::convert::{ConversionClient, ConversionError, ConversionRequest};
use ehrflow::emit::{EmissionSink, RecordingSink};
use ehrflow::mapping::AttributeCatalog;
use ehrflow::terminology::MockTerminology;
use ehrflow::tree::record_from_json;
use ehrflow::{Collaborators, Engine, EngineConfig, Record, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub fn record(json: serde_json::Value) -> Record {
    record_from_json(json).expect("fixture must be a JSON object")
}

/// Converter that copies scalar source fields to target field paths,
/// configured per target profile. Unknown targets are rejected.
#[derive(Default)]
pub struct FieldConverter {
    fields: HashMap<String, Vec<(String, String)>>,
}

impl FieldConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, target: &str, from: &str, to: &str) -> Self {
        self.fields
            .entry(target.to_string())
            .or_default()
            .push((from.to_string(), to.to_string()));
        self
    }
}

#[async_trait]
impl ConversionClient for FieldConverter {
    async fn convert(&self, request: ConversionRequest) -> Result<Record, ConversionError> {
        let fields = self
            .fields
            .get(&request.target_profile_code)
            .ok_or_else(|| ConversionError::Rejected(request.target_profile_code.clone()))?;
        let mut out = Record::new();
        for (from, to) in fields {
            if let Some(value @ Value::Scalar(_)) = request.values.get(from) {
                out.insert(to.clone(), value.clone());
            }
        }
        Ok(out)
    }
}

/// Field mapping for the oncology fixture.
pub fn oncology_converter() -> FieldConverter {
    FieldConverter::new()
        .with_field("patient", "id", "ehr_id")
        .with_field("patient", "birthDate", "patient/birth_date")
        .with_field("diagnosis", "icd", "diagnosis/code")
        .with_field("therapy", "kind", "therapy/kind")
        .with_field("therapy", "date", "therapy/date")
}

/// Engine from settings YAML (no placeholders) and the given collaborators.
pub fn engine_from_settings(
    settings: &str,
    attributes: AttributeCatalog,
    converter: Arc<dyn ConversionClient>,
    terminology: Arc<MockTerminology>,
    sink: Arc<dyn EmissionSink>,
) -> Engine {
    let settings = config::parse_with(settings, |_| None).expect("settings must be valid");
    Engine::new(
        EngineConfig {
            rules: Arc::new(settings.rule_table()),
            attributes: Arc::new(attributes),
            depth_limit: settings.depth_limit,
        },
        Collaborators {
            converter,
            terminology,
            sink,
        },
    )
}

/// Oncology engine recording into `sink`.
pub fn oncology_engine(
    settings: &str,
    converter: FieldConverter,
    terminology: Arc<MockTerminology>,
    sink: Arc<RecordingSink>,
) -> Engine {
    engine_from_settings(
        settings,
        oncology_attributes(),
        Arc::new(converter),
        terminology,
        sink,
    )
}

pub const ICD: &str = "http://fhir.de/CodeSystem/bfarm/icd-10-gm";

pub fn oncology_attributes() -> AttributeCatalog {
    AttributeCatalog::new().with_field(
        "diagnosis",
        "diagnosis/code",
        ehrflow::mapping::FieldTerminology::system(ICD),
    )
}

/// Settings for the oncology fixture: patient master data at the top, one
/// composition per diagnosis and per therapy.
pub const ONCOLOGY_SETTINGS: &str = r#"
depthLimit: 5
mapping:
  /patient:
    source: obds_patient
    sourceVersion: 3
    target: patient
  /patient/diagnoses:
    source: obds_diagnosis
    target: diagnosis
    templateId: Diagnose
    split: true
  /patient/diagnoses/therapies:
    source: obds_therapy
    target: therapy
    templateId: Therapie
    split: true
mdr:
  url: http://mdr.invalid
  clientId: test
  clientSecret: test
terminology:
  url: http://tx.invalid/fhir
"#;

pub fn oncology_document() -> Record {
    record(serde_json::json!({
        "header": {"sender": "registry"},
        "patient": {
            "id": "P-17",
            "birthDate": "1950-02-01",
            "diagnoses": [
                {
                    "icd": "C50.9",
                    "therapies": [
                        {"kind": "OP", "date": "2024-01-10"},
                        {"kind": "ST", "date": "2024-02-01"}
                    ]
                },
                {
                    "icd": "C61",
                    "therapies": []
                }
            ]
        }
    }))
}
