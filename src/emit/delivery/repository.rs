//! Record repository delivery over the openEHR REST API

use super::{Delivery, DeliveryError};
use crate::emit::composition::Composition;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::{debug, info};

const SUBJECT_QUERY: &str = "SELECT e/ehr_id/value FROM EHR e \
     WHERE e/ehr_status/subject/external_ref/id/value = $subject";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySettings {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

/// Upserts compositions into the subject's EHR, creating the EHR on first
/// contact.
pub struct RepositoryDelivery {
    client: Client,
    settings: RepositorySettings,
}

impl RepositoryDelivery {
    pub fn new(settings: RepositorySettings) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;
        Ok(Self { client, settings })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/openehr/v1{}", self.settings.url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.settings.user, &self.settings.password) {
            (Some(user), Some(password)) => request.basic_auth(user, Some(password)),
            _ => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<JsonValue, DeliveryError> {
        let response = self
            .authorized(request)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(DeliveryError::Rejected(format!("status {status}: {text}")));
        }
        if text.trim().is_empty() {
            return Ok(JsonValue::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// EHR id whose status subject is `subject_id`, if one exists.
    async fn find_ehr(&self, subject_id: &str) -> Result<Option<String>, DeliveryError> {
        let body = json!({
            "q": SUBJECT_QUERY,
            "query_parameters": { "subject": subject_id },
        });
        let result = self
            .send(self.client.post(self.url("/query/aql")).json(&body))
            .await?;
        ehr_id_from_rows(&result, subject_id)
    }

    /// Whether the repository knows an operational template.
    pub async fn template_exists(&self, template_id: &str) -> Result<bool, DeliveryError> {
        let path = format!("/definition/template/adl1.4/{template_id}");
        let response = self
            .authorized(self.client.get(self.url(&path)))
            .header("Accept", "application/xml")
            .send()
            .await
            .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;
        template_found(response.status(), template_id)
    }

    /// Template ids from `template_ids` the repository does not know, in order.
    pub async fn missing_templates(
        &self,
        template_ids: &[String],
    ) -> Result<Vec<String>, DeliveryError> {
        let mut missing = Vec::new();
        for id in template_ids {
            if self.template_exists(id).await? {
                debug!(template = %id, "template present in repository");
            } else {
                missing.push(id.clone());
            }
        }
        Ok(missing)
    }

    async fn create_ehr(&self, subject_id: &str) -> Result<String, DeliveryError> {
        let result = self
            .send(
                self.client
                    .post(self.url("/ehr"))
                    .header("Prefer", "return=representation")
                    .json(&ehr_status(subject_id)),
            )
            .await?;
        let ehr_id = result
            .pointer("/ehr_id/value")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| DeliveryError::Malformed("created EHR has no ehr_id".to_string()))?;
        info!(subject = %subject_id, ehr_id = %ehr_id, "created EHR");
        Ok(ehr_id.to_string())
    }
}

/// A generic EHR status whose subject refers to the external person id.
fn ehr_status(subject_id: &str) -> JsonValue {
    json!({
        "_type": "EHR_STATUS",
        "archetype_node_id": "openEHR-EHR-EHR_STATUS.generic.v1",
        "name": { "value": "EHR status" },
        "subject": {
            "_type": "PARTY_SELF",
            "external_ref": {
                "id": { "_type": "HIER_OBJECT_ID", "value": subject_id },
                "namespace": "DEMOGRAPHIC",
                "type": "PERSON",
            },
        },
        "is_queryable": true,
        "is_modifiable": true,
    })
}

fn template_found(status: StatusCode, template_id: &str) -> Result<bool, DeliveryError> {
    match status {
        s if s.is_success() => Ok(true),
        StatusCode::NOT_FOUND => Ok(false),
        s => Err(DeliveryError::Rejected(format!(
            "template '{template_id}' lookup failed with status {s}"
        ))),
    }
}

fn ehr_id_from_rows(result: &JsonValue, subject_id: &str) -> Result<Option<String>, DeliveryError> {
    let rows = result
        .get("rows")
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    match rows {
        [] => Ok(None),
        [row] => row
            .get(0)
            .and_then(JsonValue::as_str)
            .map(|id| Some(id.to_string()))
            .ok_or_else(|| DeliveryError::Malformed("AQL row without ehr id".to_string())),
        _ => Err(DeliveryError::AmbiguousSubject(subject_id.to_string())),
    }
}

#[async_trait]
impl Delivery for RepositoryDelivery {
    async fn deliver(
        &self,
        subject_id: &str,
        composition: &Composition,
    ) -> Result<String, DeliveryError> {
        let ehr_id = match self.find_ehr(subject_id).await? {
            Some(id) => id,
            None => self.create_ehr(subject_id).await?,
        };

        let path = format!("/ehr/{ehr_id}/composition");
        let result = self
            .send(
                self.client
                    .post(self.url(&path))
                    .query(&[("templateId", composition.template_id.as_str())])
                    .header("Prefer", "return=minimal")
                    .json(composition),
            )
            .await?;
        debug!(ehr_id = %ehr_id, template = %composition.template_id, "stored composition");

        let reference = result
            .pointer("/uid/value")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{ehr_id}/{}", composition.uid));
        Ok(reference)
    }
}
