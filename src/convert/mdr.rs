//! Metadata repository client
//!
//! Logs in once with client credentials and reuses the bearer token for
//! conversion and attribute calls. No retry; the HTTP client owns the
//! timeout.

use super::{ConversionClient, ConversionError, ConversionRequest, ConversionResponse};
use crate::mapping::{AttributeError, AttributeSource, ConceptMapRef, FieldTerminology};
use crate::tree::Record;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const TOKEN_PATH: &str = "/oauth/token";
const CONVERT_PATH: &str = "/rest/v1/itemsets/convert";
const ITEMSET_PATH: &str = "/rest/v1/itemsets/itemset";
const ATTRIBUTES_PATH: &str = "/rest/v1/itemsets/attributes/item";

/// Connection settings for the metadata repository.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MdrSettings {
    pub url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Attribute domain holding terminology bindings
    #[serde(default = "default_attribute_domain")]
    pub attribute_domain: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_attribute_domain() -> String {
    "fhir".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ItemSet {
    #[serde(default)]
    items: Vec<ItemSetEntry>,
}

#[derive(Deserialize)]
struct ItemSetEntry {
    id: String,
}

/// Terminology binding of one item, as the repository returns it.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemAttributes {
    system: Option<String>,
    version: Option<String>,
    concept_map: Option<String>,
    id: Option<String>,
    source: Option<String>,
    target: Option<String>,
}

impl ItemAttributes {
    fn into_terminology(self, field_id: &str) -> Option<FieldTerminology> {
        let concept_map = self.concept_map.map(|map_id| ConceptMapRef {
            map_id,
            entry_id: self.id.unwrap_or_else(|| field_id.to_string()),
            source: self.source.unwrap_or_default(),
            target: self.target.unwrap_or_default(),
        });
        let terminology = FieldTerminology {
            system: self.system,
            version: self.version,
            concept_map,
        };
        (!terminology.is_passthrough()).then_some(terminology)
    }
}

/// Authenticated metadata repository client.
pub struct MdrClient {
    client: Client,
    settings: MdrSettings,
    token: String,
}

impl MdrClient {
    /// Log in and return a ready client.
    pub async fn connect(settings: MdrSettings) -> Result<Self, ConversionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ConversionError::Unavailable(e.to_string()))?;

        let response = client
            .post(endpoint(&settings.url, TOKEN_PATH))
            .basic_auth(&settings.client_id, Some(&settings.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ConversionError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ConversionError::Unavailable(format!(
                "login failed with status {status}: {text}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ConversionError::Malformed(e.to_string()))?;

        info!(url = %settings.url, "logged in to metadata repository");
        Ok(Self {
            client,
            settings,
            token: token.access_token,
        })
    }

    fn url(&self, path: &str) -> String {
        endpoint(&self.settings.url, path)
    }
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[async_trait]
impl ConversionClient for MdrClient {
    async fn convert(&self, request: ConversionRequest) -> Result<Record, ConversionError> {
        debug!(
            source = %request.source_profile_code,
            target = %request.target_profile_code,
            "converting subtree"
        );
        let response = self
            .client
            .post(self.url(CONVERT_PATH))
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| ConversionError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ConversionError::Rejected(format!("status {status}: {text}")));
        }

        let converted: ConversionResponse = response
            .json()
            .await
            .map_err(|e| ConversionError::Malformed(e.to_string()))?;
        Ok(converted.values)
    }
}

#[async_trait]
impl AttributeSource for MdrClient {
    async fn profile_fields(&self, profile: &str) -> Result<Vec<String>, AttributeError> {
        let response = self
            .client
            .get(self.url(ITEMSET_PATH))
            .bearer_auth(&self.token)
            .query(&[("itemSet", profile)])
            .send()
            .await
            .map_err(|e| AttributeError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(AttributeError::ProfileNotFound(profile.to_string())),
            status if !status.is_success() => Err(AttributeError::Unavailable(format!(
                "item set '{profile}' returned status {status}"
            ))),
            _ => {
                let set: ItemSet = response
                    .json()
                    .await
                    .map_err(|e| AttributeError::Malformed(e.to_string()))?;
                Ok(set.items.into_iter().map(|i| i.id).collect())
            }
        }
    }

    async fn field_terminology(
        &self,
        profile: &str,
        field_id: &str,
    ) -> Result<Option<FieldTerminology>, AttributeError> {
        let response = self
            .client
            .get(self.url(ATTRIBUTES_PATH))
            .bearer_auth(&self.token)
            .query(&[
                ("itemSet", profile),
                ("item", field_id),
                ("attributeDomain", self.settings.attribute_domain.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AttributeError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            status if !status.is_success() => Err(AttributeError::Unavailable(format!(
                "attributes of '{profile}/{field_id}' returned status {status}"
            ))),
            _ => {
                let attrs: ItemAttributes = response
                    .json()
                    .await
                    .map_err(|e| AttributeError::Malformed(e.to_string()))?;
                Ok(attrs.into_terminology(field_id))
            }
        }
    }
}
