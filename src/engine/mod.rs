//! Mapping engine: walks a document, applies matching rules and emits
//! records at split boundaries

mod report;
mod walker;

#[cfg(test)]
mod tests;

pub use report::{FailureKind, WalkFailure, WalkReport};
pub use walker::{Collaborators, Engine, EngineConfig};
