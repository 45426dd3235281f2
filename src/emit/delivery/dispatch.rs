//! Packaged envelope dispatch
//!
//! The envelope is an XML template with placeholders:
//! `MPIID` (subject id), `EHRCONTENT` (base64 composition JSON),
//! `UUID1`/`UUID2` (fresh ids), `TIMESTAMP` (epoch millis) and
//! `DATETIME` (`yyyyMMddHHmmss`, local time).

use super::{Archive, Delivery, DeliveryError};
use crate::emit::composition::Composition;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Local};
use reqwest::Client;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSettings {
    pub url: String,
    /// Envelope template file
    pub envelope: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

/// Values substituted into one envelope.
#[derive(Debug, Clone)]
struct EnvelopeFields<'a> {
    subject_id: &'a str,
    content: String,
    document_id: Uuid,
    submission_id: Uuid,
    now: DateTime<Local>,
}

fn fill_envelope(template: &str, fields: &EnvelopeFields<'_>) -> String {
    // Subject and content go in last; they are never rescanned.
    template
        .replace("UUID1", &fields.document_id.to_string())
        .replace("UUID2", &fields.submission_id.to_string())
        .replace("TIMESTAMP", &fields.now.timestamp_millis().to_string())
        .replace("DATETIME", &fields.now.format("%Y%m%d%H%M%S").to_string())
        .replace("MPIID", fields.subject_id)
        .replace("EHRCONTENT", &fields.content)
}

pub struct DispatchDelivery {
    client: Client,
    url: String,
    template: String,
    archive: Option<Arc<Archive>>,
}

impl DispatchDelivery {
    /// Read the envelope template and prepare the HTTP client.
    pub fn new(settings: &DispatchSettings) -> Result<Self, DeliveryError> {
        let template = std::fs::read_to_string(&settings.envelope)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: settings.url.clone(),
            template,
            archive: None,
        })
    }

    /// Keep a copy of every envelope sent.
    pub fn with_archive(mut self, archive: Arc<Archive>) -> Self {
        self.archive = Some(archive);
        self
    }

    fn envelope(&self, subject_id: &str, composition: &Composition) -> Result<String, DeliveryError> {
        let json = serde_json::to_string(composition)?;
        let fields = EnvelopeFields {
            subject_id,
            content: STANDARD.encode(json.as_bytes()),
            document_id: Uuid::new_v4(),
            submission_id: Uuid::new_v4(),
            now: Local::now(),
        };
        Ok(fill_envelope(&self.template, &fields))
    }
}

#[async_trait]
impl Delivery for DispatchDelivery {
    async fn deliver(
        &self,
        subject_id: &str,
        composition: &Composition,
    ) -> Result<String, DeliveryError> {
        let envelope = self.envelope(subject_id, composition)?;
        if let Some(archive) = &self.archive {
            archive.write(subject_id, "xml", &envelope)?;
        }

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/xml")
            .header("Accept", "application/xml")
            .body(envelope)
            .send()
            .await
            .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(DeliveryError::Rejected(format!("status {status}: {text}")));
        }
        debug!(subject = %subject_id, response = %text, "envelope dispatched");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TEMPLATE: &str = "<env pid=\"MPIID\" doc=\"UUID1\" sub=\"UUID2\" \
        ts=\"TIMESTAMP\" dt=\"DATETIME\">EHRCONTENT</env>";

    #[test]
    fn fills_every_placeholder() {
        let now = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let fields = EnvelopeFields {
            subject_id: "P-1",
            content: STANDARD.encode(b"{}"),
            document_id: Uuid::nil(),
            submission_id: Uuid::from_u128(u128::MAX),
            now,
        };

        let filled = fill_envelope(TEMPLATE, &fields);

        assert!(filled.contains("pid=\"P-1\""));
        assert!(filled.contains("doc=\"00000000-0000-0000-0000-000000000000\""));
        assert!(filled.contains("sub=\"ffffffff-ffff-ffff-ffff-ffffffffffff\""));
        assert!(filled.contains(&format!("ts=\"{}\"", now.timestamp_millis())));
        assert!(filled.contains("dt=\"20240305140709\""));
        assert!(filled.contains(">e30=<"));
    }

    #[test]
    fn envelope_embeds_base64_composition() {
        let dir = tempfile::tempdir().unwrap();
        let envelope_path = dir.path().join("envelope.xml");
        std::fs::write(&envelope_path, "<doc>EHRCONTENT</doc>").unwrap();

        let delivery = DispatchDelivery::new(&DispatchSettings {
            url: "http://localhost:1/xds".to_string(),
            envelope: envelope_path,
            timeout_secs: 1,
        })
        .unwrap();

        let composition = Composition {
            uid: Uuid::nil(),
            template_id: "T1".to_string(),
            composed_at: chrono::Utc::now(),
            content: serde_json::json!({"x": ["1"]}),
        };
        let envelope = delivery.envelope("P-1", &composition).unwrap();
        let encoded = envelope
            .trim_start_matches("<doc>")
            .trim_end_matches("</doc>");
        let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&decoded).unwrap();
        assert_eq!(json["templateId"], "T1");
        assert_eq!(json["content"]["x"][0], "1");
    }

    #[test]
    fn missing_envelope_template_is_an_io_error() {
        let err = DispatchDelivery::new(&DispatchSettings {
            url: "http://localhost:1/xds".to_string(),
            envelope: PathBuf::from("/nonexistent/envelope.xml"),
            timeout_secs: 1,
        });
        assert!(matches!(err, Err(DeliveryError::Io(_))));
    }
}
