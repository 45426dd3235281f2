//! Mapping configuration: path-keyed rules and field terminology attributes
//!
//! Both are loaded once at startup and shared read-only afterwards.

mod attributes;
mod rules;

pub use attributes::{
    AttributeCatalog, AttributeError, AttributeSource, ConceptMapRef, FieldTerminology,
    StaticAttributes,
};
pub use rules::{Conversion, MappingRule, ProfileRef, RuleTable};
