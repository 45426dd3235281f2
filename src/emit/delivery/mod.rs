//! Delivery backends for built compositions
//!
//! - `RepositoryDelivery`: looks up or creates the subject's EHR, then
//!   stores the composition in it
//! - `DispatchDelivery`: wraps the composition in an envelope and posts it
//! - `Archive`: local copies of everything built or sent

mod archive;
mod dispatch;
mod repository;

pub use archive::Archive;
pub use dispatch::{DispatchDelivery, DispatchSettings};
pub use repository::{RepositoryDelivery, RepositorySettings};

use super::composition::Composition;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Which backend receives compositions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Build only, deliver nowhere
    #[default]
    None,
    /// Repository upsert
    Raw,
    /// Packaged envelope dispatch
    Xds,
}

/// Errors from delivering a composition.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery endpoint not available: {0}")]
    Unavailable(String),
    #[error("delivery rejected: {0}")]
    Rejected(String),
    #[error("subject '{0}' matches more than one record container")]
    AmbiguousSubject(String),
    #[error("malformed delivery response: {0}")]
    Malformed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A delivery backend.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Deliver a composition for a subject. Returns a reference to what was
    /// stored or sent.
    async fn deliver(
        &self,
        subject_id: &str,
        composition: &Composition,
    ) -> Result<String, DeliveryError>;
}
