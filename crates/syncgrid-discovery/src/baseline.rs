//! Core resources every syncer sees regardless of its exports.

use crate::hash::storage_version_hash;
use crate::types::ApiResource;

/// (plural, singular, kind, namespaced, has status subresource)
const BASELINE: [(&str, &str, &str, bool, bool); 4] = [
    ("configmaps", "configmap", "ConfigMap", true, false),
    ("namespaces", "namespace", "Namespace", false, true),
    ("secrets", "secret", "Secret", true, false),
    ("serviceaccounts", "serviceaccount", "ServiceAccount", true, false),
];

/// Group-version of every baseline resource.
pub const BASELINE_GROUP_VERSION: &str = "v1";

/// Baseline resources, hashed against the queried workspace.
pub fn resources(workspace: &str) -> Vec<ApiResource> {
    let mut out = Vec::new();
    for (plural, singular, kind, namespaced, status) in BASELINE {
        let hash = storage_version_hash(workspace, "", "v1", kind);
        out.push(ApiResource::resource(plural, singular, kind, namespaced, hash));
        if status {
            out.push(ApiResource::status_subresource(plural, kind, namespaced));
        }
    }
    out
}
