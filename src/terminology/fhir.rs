//! FHIR terminology server client (`CodeSystem/$lookup`, `ConceptMap/$translate`)

use super::{coding, TerminologyClient, TerminologyError};
use crate::mapping::ConceptMapRef;
use crate::tree::Value;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Connection settings for the terminology server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminologySettings {
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

pub struct FhirTerminologyClient {
    client: Client,
    base: String,
}

impl FhirTerminologyClient {
    pub fn new(settings: &TerminologySettings) -> Result<Self, TerminologyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| TerminologyError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base: settings.url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_parameters(
        &self,
        url: String,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<JsonValue, TerminologyError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/fhir+json")
            .query(query)
            .send()
            .await
            .map_err(|e| TerminologyError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
                Err(TerminologyError::NotFound(what.to_string()))
            }
            status if !status.is_success() => Err(TerminologyError::Unavailable(format!(
                "status {status} for {what}"
            ))),
            _ => response
                .json()
                .await
                .map_err(|e| TerminologyError::Malformed(e.to_string())),
        }
    }
}

/// Find a named parameter in a FHIR `Parameters` resource.
fn parameter<'a>(parameters: &'a JsonValue, name: &str) -> Option<&'a JsonValue> {
    parameters
        .get("parameter")?
        .as_array()?
        .iter()
        .find(|p| p.get("name").and_then(JsonValue::as_str) == Some(name))
}

fn string_parameter<'a>(parameters: &'a JsonValue, name: &str) -> Option<&'a str> {
    parameter(parameters, name)?
        .get("valueString")
        .and_then(JsonValue::as_str)
}

/// First matched concept of a `$translate` response.
fn translated_concept(parameters: &JsonValue) -> Option<&JsonValue> {
    let matched = parameter(parameters, "result")?
        .get("valueBoolean")
        .and_then(JsonValue::as_bool)?;
    if !matched {
        return None;
    }
    parameters
        .get("parameter")?
        .as_array()?
        .iter()
        .filter(|p| p.get("name").and_then(JsonValue::as_str) == Some("match"))
        .filter_map(|m| m.get("part")?.as_array())
        .flatten()
        .find(|part| part.get("name").and_then(JsonValue::as_str) == Some("concept"))
        .and_then(|part| part.get("valueCoding"))
}

#[async_trait]
impl TerminologyClient for FhirTerminologyClient {
    async fn lookup(
        &self,
        system: &str,
        version: Option<&str>,
        code: &str,
    ) -> Result<Value, TerminologyError> {
        let mut query = vec![("system", system), ("code", code)];
        if let Some(version) = version {
            query.push(("version", version));
        }
        let what = format!("{system}|{code}");
        let parameters = self
            .get_parameters(format!("{}/CodeSystem/$lookup", self.base), &query, &what)
            .await?;

        let mut resolved = coding(system, code, string_parameter(&parameters, "display"));
        if let (Value::Map(map), Some(v)) = (&mut resolved, string_parameter(&parameters, "version")) {
            map.insert("version".to_string(), Value::from(v));
        }
        Ok(resolved)
    }

    async fn translate(&self, map: &ConceptMapRef, code: &str) -> Result<Value, TerminologyError> {
        let query = [
            ("code", code),
            ("system", map.entry_id.as_str()),
            ("source", map.source.as_str()),
            ("target", map.target.as_str()),
        ];
        let what = format!("{}:{code}", map.map_id);
        let parameters = self
            .get_parameters(
                format!("{}/ConceptMap/{}/$translate", self.base, map.map_id),
                &query,
                &what,
            )
            .await?;

        let concept = translated_concept(&parameters)
            .ok_or_else(|| TerminologyError::NotFound(what.clone()))?;
        let system = concept.get("system").and_then(JsonValue::as_str).unwrap_or_default();
        let target_code = concept
            .get("code")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| TerminologyError::Malformed(format!("match without code for {what}")))?;
        let display = concept.get("display").and_then(JsonValue::as_str);
        Ok(coding(system, target_code, display))
    }
}
