//! What a document walk did, including every isolated failure

use crate::convert::ConversionError;
use crate::emit::EmitOutcome;
use crate::nested::MergeError;
use crate::terminology::ResolutionError;

/// Why a rule application or emission at one path produced nothing.
#[derive(Debug)]
pub enum FailureKind {
    Conversion(ConversionError),
    Resolution(ResolutionError),
    Merge(MergeError),
    /// Build or delivery of a split record; the message of the `EmitError`
    Emission { template_id: String, message: String },
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conversion(e) => write!(f, "conversion: {}", e),
            Self::Resolution(e) => write!(f, "resolution: {}", e),
            Self::Merge(e) => write!(f, "merge: {}", e),
            Self::Emission { template_id, message } => {
                write!(f, "emission of {}: {}", template_id, message)
            }
        }
    }
}

/// A failure isolated to the subtree at `path`.
#[derive(Debug)]
pub struct WalkFailure {
    pub path: String,
    pub kind: FailureKind,
}

impl WalkFailure {
    pub fn new(path: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Summary of one document walk.
#[derive(Debug, Default)]
pub struct WalkReport {
    /// Node-sets visited within the depth limit
    pub visited: usize,
    /// Node-sets skipped because they lay beyond the depth limit
    pub truncated: usize,
    /// Paths where a rule was applied successfully, in visit order
    pub applied: Vec<String>,
    /// Successful emissions, in order
    pub emitted: Vec<EmitOutcome>,
    pub failures: Vec<WalkFailure>,
}

impl WalkReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn conversion_failures(&self) -> impl Iterator<Item = &WalkFailure> {
        self.failures
            .iter()
            .filter(|f| matches!(f.kind, FailureKind::Conversion(_)))
    }

    pub fn resolution_misses(&self) -> impl Iterator<Item = &WalkFailure> {
        self.failures
            .iter()
            .filter(|f| matches!(f.kind, FailureKind::Resolution(_)))
    }

    pub fn merge_conflicts(&self) -> impl Iterator<Item = &WalkFailure> {
        self.failures
            .iter()
            .filter(|f| matches!(f.kind, FailureKind::Merge(_)))
    }

    pub fn emission_failures(&self) -> impl Iterator<Item = &WalkFailure> {
        self.failures
            .iter()
            .filter(|f| matches!(f.kind, FailureKind::Emission { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_is_clean() {
        let report = WalkReport::new();
        assert!(report.is_clean());
        assert_eq!(report.conversion_failures().count(), 0);
    }

    #[test]
    fn failures_are_filtered_by_kind() {
        let mut report = WalkReport::new();
        report.failures.push(WalkFailure::new(
            "/a",
            FailureKind::Conversion(ConversionError::Rejected("x".to_string())),
        ));
        report.failures.push(WalkFailure::new("/b", FailureKind::Merge(MergeError::EmptyPath)));

        assert!(!report.is_clean());
        assert_eq!(report.conversion_failures().count(), 1);
        assert_eq!(report.merge_conflicts().next().unwrap().path, "/b");
        assert_eq!(report.resolution_misses().count(), 0);
        assert_eq!(
            report.failures[0].kind.to_string(),
            "conversion: conversion rejected: x"
        );
    }
}
