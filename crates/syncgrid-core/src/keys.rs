//! Per-sync-target label and annotation keys on upstream objects.
//!
//! Every key is suffixed with the sync target UID so that several sync
//! targets can carry state on the same object without colliding, and so
//! that a re-registered sync target with a reused name never inherits a
//! predecessor's stale keys.
//!
//! | Key | Kind | Written by |
//! |---|---|---|
//! | `state.sync.syncgrid.dev/<uid>` | label | control plane, cleared by syncer |
//! | `deletion.internal.sync.syncgrid.dev/<uid>` | annotation (RFC3339) | control plane |
//! | `finalizers.sync.syncgrid.dev/<uid>` | annotation (comma list) | external controllers |
//! | `v1alpha1.status.sync.syncgrid.dev/<uid>` | annotation (JSON) | syncer |
//! | `v1alpha1.spec-diff.sync.syncgrid.dev/<uid>` | annotation (JSON Patch) | scheduling controllers |

/// Label holding the per-sync-target sync state.
pub const STATE_LABEL_PREFIX: &str = "state.sync.syncgrid.dev/";

/// Annotation holding the RFC3339 deletion timestamp seen by the syncer.
pub const DELETION_ANNOTATION_PREFIX: &str = "deletion.internal.sync.syncgrid.dev/";

/// Annotation holding a comma-separated finalizer list.
pub const FINALIZERS_ANNOTATION_PREFIX: &str = "finalizers.sync.syncgrid.dev/";

/// Annotation holding the last observed downstream status (JSON).
pub const STATUS_ANNOTATION_PREFIX: &str = "v1alpha1.status.sync.syncgrid.dev/";

/// Annotation holding a JSON Patch applied to the spec before syncing down.
pub const SPEC_DIFF_ANNOTATION_PREFIX: &str = "v1alpha1.spec-diff.sync.syncgrid.dev/";

/// Label value for an object the syncer actively manages.
pub const STATE_SYNC: &str = "Sync";

/// Label value for an assigned object the syncer still ignores.
pub const STATE_PENDING: &str = "";

/// The full set of keys owned by one sync target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTargetKeys {
    pub state_label: String,
    pub deletion: String,
    pub finalizers: String,
    pub status: String,
    pub spec_diff: String,
}

impl SyncTargetKeys {
    /// Keys for the sync target with the given UID.
    pub fn for_uid(uid: &str) -> Self {
        Self {
            state_label: format!("{STATE_LABEL_PREFIX}{uid}"),
            deletion: format!("{DELETION_ANNOTATION_PREFIX}{uid}"),
            finalizers: format!("{FINALIZERS_ANNOTATION_PREFIX}{uid}"),
            status: format!("{STATUS_ANNOTATION_PREFIX}{uid}"),
            spec_diff: format!("{SPEC_DIFF_ANNOTATION_PREFIX}{uid}"),
        }
    }

    /// All annotation keys, in a fixed order.
    pub fn annotations(&self) -> [&str; 4] {
        [&self.deletion, &self.finalizers, &self.status, &self.spec_diff]
    }
}

/// Split a finalizer annotation value into its entries.
///
/// Whitespace around entries is ignored, as are empty entries.
pub fn parse_finalizers(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

/// Join finalizer entries back into an annotation value.
pub fn join_finalizers(finalizers: &[String]) -> String {
    finalizers.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_by_uid() {
        let a = SyncTargetKeys::for_uid("uid-a");
        let b = SyncTargetKeys::for_uid("uid-b");
        assert_eq!(a.state_label, "state.sync.syncgrid.dev/uid-a");
        assert_ne!(a.finalizers, b.finalizers);
        assert!(a.annotations().iter().all(|k| k.ends_with("/uid-a")));
    }

    #[test]
    fn finalizer_list_parsing() {
        assert!(parse_finalizers("").is_empty());
        assert!(parse_finalizers(" , ,").is_empty());
        assert_eq!(
            parse_finalizers("example.com/cleanup, other.io/hold"),
            vec!["example.com/cleanup".to_string(), "other.io/hold".to_string()]
        );
    }

    #[test]
    fn finalizer_list_joining() {
        let list = vec!["a".to_string(), "b".to_string()];
        assert_eq!(join_finalizers(&list), "a,b");
        assert_eq!(parse_finalizers(&join_finalizers(&list)), list);
    }
}
