//! Nested builder: folds flat, path-keyed results into a nested record
//!
//! Each flat key is split on `/`. Intermediate segments create or descend
//! into maps; the final segment is merged into whatever the accumulator
//! already holds there:
//!
//! | existing  | incoming  | result                                                        |
//! |-----------|-----------|---------------------------------------------------------------|
//! | sequence  | sequence  | existing ++ incoming                                          |
//! | map       | sequence  | every incoming element receives existing's fields (existing wins); slot holds the elements |
//! | map       | map       | shallow union, incoming wins                                  |
//! | sequence  | map       | every existing element receives incoming's fields (incoming wins); slot keeps the sequence |
//! | absent    | any       | inserted as is                                                |
//!
//! A scalar on either side is treated as a one-element sequence before the
//! table applies. Distributing a map over a sequence that holds anything but
//! maps, or descending through a non-map intermediate segment, is a
//! [`MergeError::Conflict`].

use crate::tree::{path, Record, Value};
use thiserror::Error;

/// A collision the merge table does not cover.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergeError {
    #[error("field path is empty")]
    EmptyPath,

    #[error("cannot merge {incoming} into {existing} at '{path}'")]
    Conflict {
        path: String,
        existing: &'static str,
        incoming: &'static str,
    },
}

/// Accumulates nested output from flat `(path, value)` pairs.
///
/// After an error the accumulated contents are unspecified; callers discard
/// the builder.
#[derive(Debug, Clone, Default)]
pub struct NestedBuilder {
    root: Record,
}

impl NestedBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing record; inserted values are merged on top of it.
    pub fn on_top_of(base: Record) -> Self {
        Self { root: base }
    }

    /// Merge `value` at the location named by `key`.
    pub fn insert(&mut self, key: &str, value: Value) -> Result<(), MergeError> {
        let segments = path::segments(key);
        let Some((last, parents)) = segments.split_last() else {
            return Err(MergeError::EmptyPath);
        };

        let mut current = &mut self.root;
        for (depth, segment) in parents.iter().enumerate() {
            let entry = current
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Map(Record::new()));
            current = match entry {
                Value::Map(map) => map,
                other => {
                    return Err(MergeError::Conflict {
                        path: parents[..=depth].join("/"),
                        existing: other.kind(),
                        incoming: "map",
                    })
                }
            };
        }

        match current.get_mut(*last) {
            Some(slot) => merge_slot(slot, value, key),
            None => {
                current.insert((*last).to_string(), value);
                Ok(())
            }
        }
    }

    pub fn finish(self) -> Record {
        self.root
    }
}

/// Build a nested record from a flat map.
pub fn build(flat: Record) -> Result<Record, MergeError> {
    build_on(Record::new(), flat)
}

/// Build a nested record from a flat map, merged on top of `base`.
pub fn build_on(base: Record, flat: Record) -> Result<Record, MergeError> {
    let mut builder = NestedBuilder::on_top_of(base);
    for (key, value) in flat {
        builder.insert(&key, value)?;
    }
    Ok(builder.finish())
}

fn as_sequence(value: Value) -> Value {
    match value {
        Value::Scalar(_) => Value::Sequence(vec![value]),
        other => other,
    }
}

fn conflict(path: &str, existing: &Value, incoming: &Value) -> MergeError {
    MergeError::Conflict {
        path: path.to_string(),
        existing: existing.kind(),
        incoming: incoming.kind(),
    }
}

/// Merge `incoming` into an occupied slot. The slot is left untouched on error.
fn merge_slot(slot: &mut Value, incoming: Value, path: &str) -> Result<(), MergeError> {
    if matches!(slot, Value::Scalar(_)) {
        let scalar = std::mem::replace(slot, Value::Sequence(Vec::new()));
        *slot = Value::Sequence(vec![scalar]);
        if let Err(e) = merge_slot(slot, incoming, path) {
            if let Value::Sequence(items) = slot {
                if let Some(original) = items.pop() {
                    *slot = original;
                }
            }
            return Err(e);
        }
        return Ok(());
    }

    let incoming = as_sequence(incoming);

    match (&mut *slot, incoming) {
        (Value::Sequence(existing), Value::Sequence(items)) => {
            existing.extend(items);
            Ok(())
        }
        (Value::Map(existing), Value::Sequence(mut items)) => {
            if let Some(bad) = items.iter().find(|i| !matches!(i, Value::Map(_))) {
                return Err(MergeError::Conflict {
                    path: path.to_string(),
                    existing: "map",
                    incoming: bad.kind(),
                });
            }
            for item in &mut items {
                if let Value::Map(fields) = item {
                    for (k, v) in existing.iter() {
                        fields.insert(k.clone(), v.clone());
                    }
                }
            }
            *slot = Value::Sequence(items);
            Ok(())
        }
        (Value::Map(existing), Value::Map(fields)) => {
            existing.extend(fields);
            Ok(())
        }
        (Value::Sequence(existing), Value::Map(fields)) => {
            if let Some(bad) = existing.iter().find(|i| !matches!(i, Value::Map(_))) {
                return Err(MergeError::Conflict {
                    path: path.to_string(),
                    existing: bad.kind(),
                    incoming: "map",
                });
            }
            for item in existing.iter_mut() {
                if let Value::Map(target) = item {
                    target.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            Ok(())
        }
        (existing, incoming) => Err(conflict(path, existing, &incoming)),
    }
}
