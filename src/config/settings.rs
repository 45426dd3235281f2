//! Settings file layout and validation

use super::{ConfigError, ConfigResult};
use crate::convert::MdrSettings;
use crate::emit::delivery::{DeliveryMode, DispatchSettings, RepositorySettings};
use crate::mapping::{MappingRule, ProfileRef, RuleTable};
use crate::terminology::TerminologySettings;
use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;

/// One entry of the `mapping` section, keyed by path.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleSettings {
    pub source: Option<String>,
    #[serde(default, deserialize_with = "version_text")]
    pub source_version: Option<String>,
    pub target: Option<String>,
    #[serde(default, deserialize_with = "version_text")]
    pub target_version: Option<String>,
    pub template_id: Option<String>,
    #[serde(default)]
    pub split: bool,
}

/// Versions are often written unquoted (`1.0`), so numbers are accepted too.
fn version_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<serde_yaml::Value>::deserialize(deserializer)? {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a version string, found {:?}",
            other
        ))),
    }
}

fn default_subject_field() -> String {
    "ehr_id".to_string()
}

/// The whole settings file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub depth_limit: usize,
    #[serde(default)]
    pub mapping: IndexMap<String, RuleSettings>,
    pub mdr: Option<MdrSettings>,
    pub terminology: Option<TerminologySettings>,
    pub open_ehr: Option<RepositorySettings>,
    #[serde(default)]
    pub delivery: DeliveryMode,
    pub xds: Option<DispatchSettings>,
    #[serde(default = "default_subject_field")]
    pub subject_field: String,
    /// Archive directory for built compositions and sent envelopes
    pub output_dir: Option<PathBuf>,
}

impl Settings {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.depth_limit < 1 {
            return Err(ConfigError::Invalid(
                "depthLimit must be at least 1".to_string(),
            ));
        }

        for (path, rule) in &self.mapping {
            let invalid = |reason: &str| ConfigError::InvalidRule {
                path: path.clone(),
                reason: reason.to_string(),
            };
            if !path.is_empty() && !path.starts_with('/') {
                return Err(invalid("path must be empty or start with '/'"));
            }
            if rule.split && rule.template_id.is_none() {
                return Err(invalid("split requires a templateId"));
            }
            if rule.source.is_some() && rule.target.is_none() {
                return Err(invalid("source requires a target"));
            }
        }

        let converting = self.mapping.values().any(|r| r.source.is_some());
        if converting && self.mdr.is_none() {
            return Err(ConfigError::Invalid(
                "converting rules require the mdr section".to_string(),
            ));
        }
        if converting && self.terminology.is_none() {
            return Err(ConfigError::Invalid(
                "converting rules require the terminology section".to_string(),
            ));
        }

        match self.delivery {
            DeliveryMode::Raw if self.open_ehr.is_none() => Err(ConfigError::Invalid(
                "raw delivery requires the openEhr section".to_string(),
            )),
            DeliveryMode::Xds if self.xds.is_none() => Err(ConfigError::Invalid(
                "xds delivery requires the xds section".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// The rule table, in file order.
    pub fn rule_table(&self) -> RuleTable {
        RuleTable::from_rules(self.mapping.iter().map(|(path, r)| to_rule(path, r)))
    }
}

fn profile(code: &str, version: Option<&String>) -> ProfileRef {
    match version {
        Some(v) => ProfileRef::new(code).with_version(v.clone()),
        None => ProfileRef::new(code),
    }
}

fn to_rule(path: &str, settings: &RuleSettings) -> MappingRule {
    let mut rule = MappingRule::new(path);
    if let (Some(source), Some(target)) = (&settings.source, &settings.target) {
        rule = rule.converting(
            profile(source, settings.source_version.as_ref()),
            profile(target, settings.target_version.as_ref()),
        );
    }
    if let Some(template_id) = &settings.template_id {
        rule = rule.with_template(template_id.clone());
    }
    if settings.split {
        rule = rule.split();
    }
    rule
}
