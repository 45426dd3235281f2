//! Settings loading
//!
//! The settings file is YAML. `${VAR}` placeholders are replaced from the
//! environment before parsing, so secrets can stay out of the file.

mod settings;

pub use settings::{RuleSettings, Settings};

use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("environment variable '{0}' is not set")]
    MissingVariable(String),

    #[error("malformed settings: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("mapping '{path}': {reason}")]
    InvalidRule { path: String, reason: String },

    #[error("invalid settings: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

const PLACEHOLDER: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// Replace every `${NAME}` with `lookup(NAME)`. An unknown name is an error.
pub fn substitute(text: &str, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<String> {
    let pattern = Regex::new(PLACEHOLDER).map_err(|e| ConfigError::Invalid(e.to_string()))?;

    let mut missing = None;
    let replaced = pattern.replace_all(text, |caps: &Captures<'_>| {
        let name = &caps[1];
        match lookup(name) {
            Some(value) => value,
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ConfigError::MissingVariable(name)),
        None => Ok(replaced.into_owned()),
    }
}

/// Parse and validate settings text, resolving placeholders with `lookup`.
pub fn parse_with(
    text: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> ConfigResult<Settings> {
    let text = substitute(text, lookup)?;
    let settings: Settings = serde_yaml::from_str(&text)?;
    settings.validate()?;
    Ok(settings)
}

/// Parse and validate settings text against the process environment.
pub fn parse(text: &str) -> ConfigResult<Settings> {
    parse_with(text, |name| std::env::var(name).ok())
}

/// Read, parse and validate a settings file.
pub fn load(path: impl AsRef<Path>) -> ConfigResult<Settings> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::delivery::DeliveryMode;
    use std::collections::HashMap;

    const SETTINGS: &str = r#"
depthLimit: 6
mapping:
  "":
    templateId: Stammdaten
  /patient:
    source: obds
    sourceVersion: 2.2
    target: patient
    targetVersion: "1"
  /patient/diagnosis:
    source: obds_diagnosis
    target: diagnosis
    templateId: Diagnose
    split: true
mdr:
  url: https://mdr.example.org
  clientId: ehrflow
  clientSecret: ${MDR_SECRET}
terminology:
  url: https://tx.example.org/fhir
openEhr:
  url: https://ehr.example.org/ehrbase
  user: ${EHR_USER}
  password: secret
delivery: raw
"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn substitutes_placeholders() {
        let text = substitute("a: ${ONE}, b: ${TWO}, c: $NOPE", env(&[("ONE", "1"), ("TWO", "2")]));
        assert_eq!(text.unwrap(), "a: 1, b: 2, c: $NOPE");
    }

    #[test]
    fn unset_placeholder_is_an_error() {
        let err = substitute("x: ${UNSET_VAR}", env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVariable(name) if name == "UNSET_VAR"));
    }

    #[test]
    fn parses_full_settings() {
        let settings = parse_with(SETTINGS, env(&[("MDR_SECRET", "s3cret"), ("EHR_USER", "etl")])).unwrap();

        assert_eq!(settings.depth_limit, 6);
        assert_eq!(settings.delivery, DeliveryMode::Raw);
        assert_eq!(settings.subject_field, "ehr_id");
        assert_eq!(settings.mdr.as_ref().unwrap().client_secret, "s3cret");
        assert_eq!(settings.mdr.as_ref().unwrap().attribute_domain, "fhir");
        assert_eq!(settings.open_ehr.as_ref().unwrap().user.as_deref(), Some("etl"));

        let paths: Vec<_> = settings.mapping.keys().cloned().collect();
        assert_eq!(paths, vec!["", "/patient", "/patient/diagnosis"]);
        assert_eq!(settings.mapping["/patient"].source_version.as_deref(), Some("2.2"));
        assert_eq!(settings.mapping["/patient"].target_version.as_deref(), Some("1"));
    }

    #[test]
    fn rule_table_follows_the_file() {
        let settings = parse_with(SETTINGS, env(&[("MDR_SECRET", "s"), ("EHR_USER", "u")])).unwrap();
        let rules = settings.rule_table();

        assert_eq!(rules.len(), 3);
        assert!(rules.matching("").is_none());
        let (_, conversion) = rules.matching("/patient").unwrap();
        assert_eq!(conversion.source.to_string(), "obds@2.2");
        let (rule, _) = rules.matching("/patient/diagnosis").unwrap();
        assert!(rule.split);
        assert_eq!(rules.template_ids(), vec!["Stammdaten", "Diagnose"]);
    }

    #[test]
    fn split_without_template_is_rejected() {
        let text = "depthLimit: 3\nmapping:\n  /a:\n    split: true\n";
        let err = parse_with(text, env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRule { path, .. } if path == "/a"));
    }

    #[test]
    fn source_without_target_is_rejected() {
        let text = "depthLimit: 3\nmapping:\n  /a:\n    source: x\n";
        assert!(matches!(
            parse_with(text, env(&[])),
            Err(ConfigError::InvalidRule { .. })
        ));
    }

    #[test]
    fn misspelled_rule_key_is_rejected() {
        let text = "depthLimit: 3\nmapping:\n  /a:\n    templateId: T\n    spilt: true\n";
        let err = parse_with(text, env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref e) if e.to_string().contains("spilt")));
    }

    #[test]
    fn relative_paths_are_rejected() {
        let text = "depthLimit: 3\nmapping:\n  a/b:\n    templateId: T\n";
        assert!(matches!(
            parse_with(text, env(&[])),
            Err(ConfigError::InvalidRule { path, .. }) if path == "a/b"
        ));
    }

    #[test]
    fn zero_depth_limit_is_rejected() {
        assert!(matches!(
            parse_with("depthLimit: 0\n", env(&[])),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn xds_delivery_requires_its_section() {
        let text = "depthLimit: 3\ndelivery: xds\n";
        assert!(matches!(
            parse_with(text, env(&[])),
            Err(ConfigError::Invalid(reason)) if reason.contains("xds")
        ));
    }

    #[test]
    fn converting_rules_require_collaborators() {
        let text = "depthLimit: 3\nmapping:\n  /a:\n    source: s\n    target: t\n";
        assert!(matches!(
            parse_with(text, env(&[])),
            Err(ConfigError::Invalid(reason)) if reason.contains("mdr")
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load("/nonexistent/settings.yml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yml");
        std::fs::write(&path, "depthLimit: 4\nsubjectField: pid\noutputDir: out\n").unwrap();

        let settings = load(&path).unwrap();
        assert_eq!(settings.depth_limit, 4);
        assert_eq!(settings.subject_field, "pid");
        assert_eq!(settings.output_dir, Some(PathBuf::from("out")));
        assert!(settings.rule_table().is_empty());
    }
}
