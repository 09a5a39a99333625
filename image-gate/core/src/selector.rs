use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Gating mode applied to every image of a matched workload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Mode {
    /// Admit only images that pass the backend's policy evaluation.
    #[serde(rename = "policy")]
    PolicyGate,

    /// Admit any image the backend has a record of.
    #[serde(rename = "analysis")]
    AnalysisGate,

    /// Admit everything, evaluating only for side effects.
    #[serde(rename = "breakglass")]
    BreakGlass,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PolicyGate => "policy".fmt(f),
            Self::AnalysisGate => "analysis".fmt(f),
            Self::BreakGlass => "breakglass".fmt(f),
        }
    }
}

/// Names the backend account to authenticate as and, optionally, the policy
/// bundle to evaluate against.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyReference {
    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_bundle_id: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum ResourceSelectorType {
    #[serde(alias = "image")]
    Image,
    #[serde(alias = "pod")]
    Pod,
    #[serde(alias = "namespace")]
    Namespace,
}

/// Matches a workload by its image references or by the labels and
/// annotations of the object or its namespace.
///
/// Both regexes have substring semantics: a pattern matches anywhere in the
/// candidate string unless it is explicitly anchored.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    #[serde(rename = "type")]
    pub kind: ResourceSelectorType,

    #[serde(default)]
    pub selector_key_regex: String,

    #[serde(default)]
    pub selector_value_regex: String,
}

/// One entry of the ordered policy selector list. The first entry whose
/// resource selector matches an incoming workload governs that workload.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySelector {
    pub resource_selector: ResourceSelector,
    pub mode: Mode,
    pub policy_reference: PolicyReference,
}

/// Labels and annotations of a workload or namespace, as matched by pod and
/// namespace selectors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl Metadata {
    fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels
            .iter()
            .chain(self.annotations.iter())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Returns the lowest-indexed selector matching the workload, if any.
pub fn select<'s>(
    selectors: &'s [PolicySelector],
    images: &[String],
    metadata: &Metadata,
    namespace: Option<&Metadata>,
) -> Option<(usize, &'s PolicySelector)> {
    selectors
        .iter()
        .enumerate()
        .find(|(_, selector)| matches(&selector.resource_selector, images, metadata, namespace))
}

fn matches(
    selector: &ResourceSelector,
    images: &[String],
    metadata: &Metadata,
    namespace: Option<&Metadata>,
) -> bool {
    match selector.kind {
        // The key regex is ignored for image selectors.
        ResourceSelectorType::Image => {
            let value = match compile(&selector.selector_value_regex) {
                Some(re) => re,
                None => return false,
            };
            images.iter().any(|image| value.is_match(image))
        }
        ResourceSelectorType::Pod => pairs_match(selector, metadata),
        ResourceSelectorType::Namespace => namespace.is_some_and(|ns| pairs_match(selector, ns)),
    }
}

fn pairs_match(selector: &ResourceSelector, metadata: &Metadata) -> bool {
    let key = match compile(&selector.selector_key_regex) {
        Some(re) => re,
        None => return false,
    };
    let value = match compile(&selector.selector_value_regex) {
        Some(re) => re,
        None => return false,
    };
    metadata
        .pairs()
        .any(|(k, v)| key.is_match(k) && value.is_match(v))
}

// An invalid configured pattern never matches anything.
fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(error) => {
            tracing::warn!(%error, pattern, "invalid selector regex");
            None
        }
    }
}
