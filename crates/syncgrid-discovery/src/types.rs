//! Discovery document types, serialized in the Kubernetes wire shape.

use serde::{Deserialize, Serialize};

pub const RESOURCE_VERBS: [&str; 5] = ["get", "list", "patch", "update", "watch"];
pub const SUBRESOURCE_VERBS: [&str; 3] = ["get", "patch", "update"];

/// One group-version and the resources served under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResourceList {
    pub kind: String,
    pub group_version: String,
    pub resources: Vec<ApiResource>,
}

impl ApiResourceList {
    pub fn new(group_version: &str) -> Self {
        Self {
            kind: "APIResourceList".to_string(),
            group_version: group_version.to_string(),
            resources: Vec::new(),
        }
    }

    pub fn resource(&self, name: &str) -> Option<&ApiResource> {
        self.resources.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResource {
    /// Plural name, or `<plural>/<subresource>`.
    pub name: String,
    /// Empty for subresources.
    #[serde(default)]
    pub singular_name: String,
    pub namespaced: bool,
    pub kind: String,
    pub verbs: Vec<String>,
    /// Empty for subresources.
    #[serde(default)]
    pub storage_version_hash: String,
}

impl ApiResource {
    pub fn resource(plural: &str, singular: &str, kind: &str, namespaced: bool, hash: String) -> Self {
        Self {
            name: plural.to_string(),
            singular_name: singular.to_string(),
            namespaced,
            kind: kind.to_string(),
            verbs: RESOURCE_VERBS.iter().map(|v| v.to_string()).collect(),
            storage_version_hash: hash,
        }
    }

    pub fn status_subresource(plural: &str, kind: &str, namespaced: bool) -> Self {
        Self {
            name: format!("{plural}/status"),
            singular_name: String::new(),
            namespaced,
            kind: kind.to_string(),
            verbs: SUBRESOURCE_VERBS.iter().map(|v| v.to_string()).collect(),
            storage_version_hash: String::new(),
        }
    }
}
