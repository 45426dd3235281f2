//! Mapping rules and the path-keyed rule table

use indexmap::IndexMap;
use std::collections::BTreeSet;

/// A profile in the metadata repository, pinned to an optional version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileRef {
    pub code: String,
    pub version: Option<String>,
}

impl ProfileRef {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

impl std::fmt::Display for ProfileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}@{}", self.code, v),
            None => write!(f, "{}", self.code),
        }
    }
}

/// Source and target profile of a conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    pub source: ProfileRef,
    pub target: ProfileRef,
}

/// A configured mapping rule, keyed by its exact traversal path.
///
/// A rule without a conversion never fires during traversal; it only
/// contributes its template id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRule {
    pub path: String,
    pub conversion: Option<Conversion>,
    pub template_id: Option<String>,
    pub split: bool,
}

impl MappingRule {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            conversion: None,
            template_id: None,
            split: false,
        }
    }

    pub fn converting(mut self, source: ProfileRef, target: ProfileRef) -> Self {
        self.conversion = Some(Conversion { source, target });
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn split(mut self) -> Self {
        self.split = true;
        self
    }
}

/// Immutable rule table, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: IndexMap<String, MappingRule>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from rules. A later rule for the same path replaces the
    /// earlier one.
    pub fn from_rules(rules: impl IntoIterator<Item = MappingRule>) -> Self {
        let mut table = Self::new();
        for rule in rules {
            table.rules.insert(rule.path.clone(), rule);
        }
        table
    }

    pub fn get(&self, path: &str) -> Option<&MappingRule> {
        self.rules.get(path)
    }

    /// The rule that fires at `path`: an exact match that carries a
    /// conversion.
    pub fn matching(&self, path: &str) -> Option<(&MappingRule, &Conversion)> {
        let rule = self.rules.get(path)?;
        rule.conversion.as_ref().map(|c| (rule, c))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingRule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Distinct target profile codes of converting rules, sorted.
    pub fn target_profiles(&self) -> BTreeSet<String> {
        self.rules
            .values()
            .filter_map(|r| r.conversion.as_ref())
            .map(|c| c.target.code.clone())
            .collect()
    }

    /// Distinct template ids, in first-seen order.
    pub fn template_ids(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for id in self.rules.values().filter_map(|r| r.template_id.as_ref()) {
            if !seen.contains(id) {
                seen.push(id.clone());
            }
        }
        seen
    }
}
