//! # Custom resource module
//!
//! This module provides the custom resources and their definitions for the
//! installed-features catalogue: [`InstalledFeature`] and
//! [`InstalledFeatureGroup`].

use std::fmt::{self, Display, Formatter};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// constants

/// finalizer owned by this controller, written onto both custom resources.
pub const FINALIZER: &str = "features.kaiserpfalz-edv.de/installedfeature-controller";

// -----------------------------------------------------------------------------
// FeatureRef structure

/// cluster-wide identity of a feature: a namespace/name pair.
#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
pub struct FeatureRef {
    #[serde(rename = "namespace")]
    pub namespace: String,
    #[serde(rename = "name")]
    pub name: String,
}

impl FeatureRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for FeatureRef {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// -----------------------------------------------------------------------------
// Phase enumeration

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Pending,
    Initializing,
    Failed,
    Provisioned,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Initializing => write!(f, "initializing"),
            Self::Failed => write!(f, "failed"),
            Self::Provisioned => write!(f, "provisioned"),
        }
    }
}

// -----------------------------------------------------------------------------
// InstalledFeatureSpec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "features.kaiserpfalz-edv.de")]
#[kube(version = "v1alpha1")]
#[kube(kind = "InstalledFeature")]
#[kube(singular = "installedfeature")]
#[kube(plural = "installedfeatures")]
#[kube(shortname = "ift")]
#[kube(status = "InstalledFeatureStatus")]
#[kube(namespaced)]
#[kube(apiextensions = "v1")]
#[kube(derive = "PartialEq")]
#[kube(printcolumn = r#"{"name":"Group", "type":"string", "jsonPath":".spec.group.name"}"#)]
#[kube(printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#)]
#[kube(printcolumn = r#"{"name":"Documentation", "type":"string", "jsonPath":".spec.uri"}"#)]
#[kube(printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.phase"}"#)]
pub struct InstalledFeatureSpec {
    #[serde(rename = "group", skip_serializing_if = "Option::is_none")]
    pub group: Option<FeatureRef>,
    #[serde(rename = "kind")]
    pub kind: String,
    #[serde(rename = "version")]
    pub version: String,
    #[serde(rename = "provider")]
    pub provider: String,
    #[serde(rename = "description")]
    pub description: String,
    #[serde(rename = "uri")]
    pub uri: String,
    #[serde(rename = "depends", default)]
    pub depends: Vec<FeatureRef>,
    #[serde(rename = "conflicts", default)]
    pub conflicts: Vec<FeatureRef>,
}

// -----------------------------------------------------------------------------
// InstalledFeatureStatus structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct InstalledFeatureStatus {
    #[serde(rename = "phase", default)]
    pub phase: Phase,
    #[serde(rename = "message", default)]
    pub message: String,
    #[serde(rename = "missing-dependencies", default)]
    pub missing_dependencies: Vec<FeatureRef>,
    #[serde(rename = "conflicting-features", default)]
    pub conflicting_features: Vec<FeatureRef>,
    #[serde(rename = "depending-features", default)]
    pub depending_features: Vec<FeatureRef>,
}

// -----------------------------------------------------------------------------
// InstalledFeatureGroupSpec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "features.kaiserpfalz-edv.de")]
#[kube(version = "v1alpha1")]
#[kube(kind = "InstalledFeatureGroup")]
#[kube(singular = "installedfeaturegroup")]
#[kube(plural = "installedfeaturegroups")]
#[kube(shortname = "iftg")]
#[kube(status = "InstalledFeatureGroupStatus")]
#[kube(namespaced)]
#[kube(apiextensions = "v1")]
#[kube(derive = "PartialEq")]
#[kube(printcolumn = r#"{"name":"Group", "type":"string", "jsonPath":".metadata.name"}"#)]
#[kube(printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#)]
#[kube(printcolumn = r#"{"name":"Documentation", "type":"string", "jsonPath":".spec.uri"}"#)]
pub struct InstalledFeatureGroupSpec {
    #[serde(rename = "provider")]
    pub provider: String,
    #[serde(rename = "description")]
    pub description: String,
    #[serde(rename = "uri")]
    pub uri: String,
}

// -----------------------------------------------------------------------------
// InstalledFeatureGroupStatus structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct InstalledFeatureGroupStatus {
    #[serde(rename = "phase", default)]
    pub phase: Phase,
    #[serde(rename = "message", default)]
    pub message: String,
    #[serde(rename = "features", default)]
    pub features: Vec<FeatureRef>,
}
