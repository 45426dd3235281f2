//! Source and output tree data structures

pub mod path;
mod value;

pub use value::{normalize, normalize_record, record_from_json, Record, Scalar, Value};
