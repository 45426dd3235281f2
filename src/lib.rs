//! ehrflow: hierarchical mapping and merge engine
//!
//! Walks a tree-shaped source document depth-first. At every path that a
//! mapping rule names, the subtree is sent to a conversion service, the
//! resulting flat field map is normalized, coded values are resolved against
//! a terminology service, and the fields are folded into a nested record on
//! top of the context inherited from the ancestors. Rules marked as split
//! boundaries hand the record at that point to an emission sink, which builds
//! a composition and delivers it.
//!
//! # Core Concepts
//!
//! - **Record**: an ordered field map ([`Record`]); order drives traversal,
//!   output and merge precedence
//! - **Rule table**: path-keyed rules naming source and target profiles
//! - **Context**: the nested record accumulated from the root down; each
//!   subtree gets its own copy
//!
//! # Example
//!
//! ```
//! use ehrflow::nested;
//! use ehrflow::{Record, Value};
//!
//! let mut flat = Record::new();
//! flat.insert("patient/name".to_string(), Value::from(vec![Value::from("Ada")]));
//! let nested = nested::build(flat).unwrap();
//! assert!(nested["patient"].as_map().is_some());
//! ```

pub mod config;
pub mod convert;
pub mod document;
pub mod emit;
pub mod engine;
pub mod mapping;
pub mod nested;
pub mod terminology;
pub mod tree;

pub use config::{ConfigError, Settings};
pub use convert::{ConversionClient, ConversionError, MdrClient};
pub use document::{load_document, DocumentError};
pub use emit::{CompositionSink, EmissionSink, EmitError, EmitOutcome};
pub use engine::{Collaborators, Engine, EngineConfig, FailureKind, WalkFailure, WalkReport};
pub use mapping::{AttributeCatalog, MappingRule, ProfileRef, RuleTable};
pub use nested::{MergeError, NestedBuilder};
pub use terminology::{FhirTerminologyClient, ResolutionError, TerminologyClient, TerminologyError};
pub use tree::{Record, Scalar, Value};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
