//! Label selectors, annotation filters and object name validation

use k8s_openapi::api::core::v1::ConfigMap;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::store::StoreError;

static DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));

static DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("valid regex")
});

static QUALIFIED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("valid regex")
});

/// Namespaces are RFC 1123 labels
pub fn validate_namespace(namespace: &str) -> Result<(), StoreError> {
    if namespace.len() > 63 || !DNS_LABEL.is_match(namespace) {
        return Err(StoreError::Validation(format!(
            "Invalid namespace '{}': must be an RFC 1123 label",
            namespace
        )));
    }
    Ok(())
}

/// ConfigMap names are RFC 1123 subdomains
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.len() > 253 || !DNS_SUBDOMAIN.is_match(name) {
        return Err(StoreError::Validation(format!(
            "Invalid ConfigMap name '{}': must be an RFC 1123 subdomain",
            name
        )));
    }
    Ok(())
}

/// Label keys are `[prefix/]name`
pub fn validate_label_key(key: &str) -> Result<(), StoreError> {
    let invalid = || StoreError::Validation(format!("Invalid label key '{}'", key));

    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.len() > 253 || !DNS_SUBDOMAIN.is_match(prefix) {
                return Err(invalid());
            }
            name
        }
        None => key,
    };

    if name.len() > 63 || !QUALIFIED_NAME.is_match(name) {
        return Err(invalid());
    }
    Ok(())
}

pub fn validate_label_value(value: &str) -> Result<(), StoreError> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > 63 || !QUALIFIED_NAME.is_match(value) {
        return Err(StoreError::Validation(format!(
            "Invalid label value '{}'",
            value
        )));
    }
    Ok(())
}

/// Render an equality selector (`a=1,b=2`) from a label map
pub fn equality_selector(labels: &BTreeMap<String, String>) -> Result<String, StoreError> {
    let mut terms = Vec::with_capacity(labels.len());
    for (key, value) in labels {
        validate_label_key(key)?;
        validate_label_value(value)?;
        terms.push(format!("{}={}", key, value));
    }
    Ok(terms.join(","))
}

/// One requirement of a label selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Exists(String),
    NotExists(String),
    Equals(String, String),
    NotEquals(String, String),
}

impl Requirement {
    fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let lookup = |key: &str| labels.and_then(|l| l.get(key));
        match self {
            Requirement::Exists(key) => lookup(key).is_some(),
            Requirement::NotExists(key) => lookup(key).is_none(),
            Requirement::Equals(key, value) => lookup(key) == Some(value),
            Requirement::NotEquals(key, value) => lookup(key) != Some(value),
        }
    }
}

/// Parsed label selector supporting the equality-based subset of the Kubernetes grammar
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn parse(selector: &str) -> Result<Self, StoreError> {
        let mut requirements = Vec::new();

        for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let requirement = if let Some((key, value)) = term.split_once("!=") {
                Requirement::NotEquals(key.trim().to_string(), value.trim().to_string())
            } else if let Some((key, value)) = term.split_once("==") {
                Requirement::Equals(key.trim().to_string(), value.trim().to_string())
            } else if let Some((key, value)) = term.split_once('=') {
                Requirement::Equals(key.trim().to_string(), value.trim().to_string())
            } else if let Some(key) = term.strip_prefix('!') {
                Requirement::NotExists(key.trim().to_string())
            } else {
                Requirement::Exists(term.to_string())
            };

            let (key, value) = match &requirement {
                Requirement::Exists(k) | Requirement::NotExists(k) => (k, None),
                Requirement::Equals(k, v) | Requirement::NotEquals(k, v) => (k, Some(v)),
            };
            validate_label_key(key)?;
            if let Some(value) = value {
                validate_label_value(value)?;
            }

            requirements.push(requirement);
        }

        Ok(Self { requirements })
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Empty selectors match everything
    pub fn matches(&self, config_map: &ConfigMap) -> bool {
        let labels = config_map.metadata.labels.as_ref();
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

/// Keep ConfigMaps that carry the annotation `key`, optionally with exactly `value`
pub fn filter_by_annotation(
    config_maps: Vec<ConfigMap>,
    key: &str,
    value: Option<&str>,
) -> Vec<ConfigMap> {
    config_maps
        .into_iter()
        .filter(|cm| {
            let found = cm
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(key));
            match (found, value) {
                (Some(_), None) => true,
                (Some(actual), Some(expected)) => actual == expected,
                (None, _) => false,
            }
        })
        .collect()
}

/// Keep annotated ConfigMaps carrying every annotation in `wanted` with an equal value.
///
/// A ConfigMap without annotations never matches, not even an empty `wanted`.
pub fn filter_by_annotations(
    config_maps: Vec<ConfigMap>,
    wanted: &BTreeMap<String, String>,
) -> Vec<ConfigMap> {
    config_maps
        .into_iter()
        .filter(|cm| {
            cm.metadata.annotations.as_ref().is_some_and(|annotations| {
                wanted
                    .iter()
                    .all(|(key, value)| annotations.get(key) == Some(value))
            })
        })
        .collect()
}
