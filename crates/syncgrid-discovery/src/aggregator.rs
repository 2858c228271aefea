//! Merge of the baseline with a sync target's accepted resources.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use syncgrid_core::{group_version, ExportReference};
use syncgrid_state::{
    sync_target_key, CompatibilityState, LatestSchemas, ResourceSchema, ResourceScope,
    ResourceToSync, SchemaCatalog, StateStore, SyncTarget,
};

use crate::baseline::{self, BASELINE_GROUP_VERSION};
use crate::error::DiscoveryError;
use crate::hash::storage_version_hash;
use crate::types::{ApiResource, ApiResourceList};

/// Serves discovery documents scoped to one sync target.
#[derive(Clone)]
pub struct DiscoveryAggregator {
    store: StateStore,
}

impl DiscoveryAggregator {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Discovery for the sync target `name` in `workspace`.
    pub fn discover(&self, workspace: &str, name: &str) -> Result<Vec<ApiResourceList>, DiscoveryError> {
        let key = sync_target_key(workspace, name);
        let target = self
            .store
            .get_sync_target(&key)?
            .ok_or(DiscoveryError::SyncTargetNotFound(key))?;
        self.discover_target(&target)
    }

    /// Like [`discover`](Self::discover), but only for the registration
    /// with `uid`; an older or newer registration of the same name is
    /// treated as not found.
    pub fn discover_for_uid(
        &self,
        workspace: &str,
        name: &str,
        uid: &str,
    ) -> Result<Vec<ApiResourceList>, DiscoveryError> {
        let key = sync_target_key(workspace, name);
        let target = self
            .store
            .get_sync_target(&key)?
            .filter(|t| t.uid == uid)
            .ok_or_else(|| DiscoveryError::SyncTargetNotFound(format!("{key} ({uid})")))?;
        self.discover_target(&target)
    }

    /// Build the discovery document from the target's committed status.
    pub fn discover_target(&self, target: &SyncTarget) -> Result<Vec<ApiResourceList>, DiscoveryError> {
        let mut groups: BTreeMap<String, Vec<ApiResource>> = BTreeMap::new();
        groups
            .entry(BASELINE_GROUP_VERSION.to_string())
            .or_default()
            .extend(baseline::resources(&target.workspace));

        let exports = target.effective_exports();
        let mut cache: HashMap<ExportReference, Option<LatestSchemas>> = HashMap::new();

        let accepted = target
            .status
            .synced_resources
            .iter()
            .filter(|r| r.state == CompatibilityState::Accepted);

        for entry in accepted {
            let Some((workspace, schema)) = self.locate_schema(entry, &exports, &mut cache)? else {
                debug!(sync_target = %target.table_key(), resource = %entry.group_resource, "no schema for accepted resource");
                continue;
            };
            let namespaced = schema.scope == ResourceScope::Namespaced;
            let plural = &schema.names.plural;

            for version in &entry.versions {
                let gv = group_version(&entry.group_resource.group, version);
                let resources = groups.entry(gv).or_default();
                if resources.iter().any(|r| &r.name == plural) {
                    debug!(resource = %entry.group_resource, %version, "baseline resource takes precedence");
                    continue;
                }

                let hash = storage_version_hash(&workspace, &schema.group, version, &schema.names.kind);
                resources.push(ApiResource::resource(
                    plural,
                    &schema.names.singular,
                    &schema.names.kind,
                    namespaced,
                    hash,
                ));
                if schema.version(version).is_some_and(|v| v.status_subresource) {
                    resources.push(ApiResource::status_subresource(plural, &schema.names.kind, namespaced));
                }
            }
        }

        Ok(groups
            .into_iter()
            .map(|(gv, mut resources)| {
                resources.sort_by(|a, b| a.name.cmp(&b.name));
                let mut list = ApiResourceList::new(&gv);
                list.resources = resources;
                list
            })
            .collect())
    }

    /// Find the schema behind an accepted entry and the workspace that
    /// exports it. Custom types are found through their identity hash,
    /// built-in types through the first export in spec order carrying them.
    fn locate_schema(
        &self,
        entry: &ResourceToSync,
        exports: &[ExportReference],
        cache: &mut HashMap<ExportReference, Option<LatestSchemas>>,
    ) -> Result<Option<(String, ResourceSchema)>, DiscoveryError> {
        if !entry.identity_hash.is_empty() {
            if let Some(export) = self.store.find_export_by_identity(&entry.identity_hash)? {
                let reference = export.reference();
                if let Some(found) = self.schema_in(&reference, entry, cache)? {
                    return Ok(Some(found));
                }
            }
        }

        for export in exports {
            if let Some(found) = self.schema_in(export, entry, cache)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn schema_in(
        &self,
        export: &ExportReference,
        entry: &ResourceToSync,
        cache: &mut HashMap<ExportReference, Option<LatestSchemas>>,
    ) -> Result<Option<(String, ResourceSchema)>, DiscoveryError> {
        if !cache.contains_key(export) {
            let latest = match self.store.get_latest_schemas(export) {
                Ok(latest) => Some(latest),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            };
            cache.insert(export.clone(), latest);
        }

        Ok(cache
            .get(export)
            .and_then(Option::as_ref)
            .and_then(|latest| {
                latest
                    .schemas
                    .iter()
                    .find(|s| s.group_resource() == entry.group_resource)
            })
            .map(|s| (export.workspace.clone(), s.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use syncgrid_core::GroupResource;
    use syncgrid_state::*;

    fn schema(ws: &str, name: &str, kind: &str, version: &str, status: bool) -> ResourceSchema {
        let gr = GroupResource::from_schema_name(name).unwrap();
        ResourceSchema {
            workspace: ws.to_string(),
            name: name.to_string(),
            group: gr.group.clone(),
            names: SchemaNames {
                plural: gr.resource.clone(),
                singular: kind.to_lowercase(),
                kind: kind.to_string(),
            },
            scope: ResourceScope::Namespaced,
            versions: vec![SchemaVersion {
                name: version.to_string(),
                served: true,
                storage: true,
                status_subresource: status,
            }],
            updated_at: Utc::now(),
        }
    }

    fn entry(group: &str, resource: &str, version: &str, identity: &str, state: CompatibilityState) -> ResourceToSync {
        ResourceToSync {
            group_resource: GroupResource::new(group, resource),
            versions: vec![version.to_string()],
            identity_hash: identity.to_string(),
            state,
        }
    }

    /// Schemas in root:schemas, target in root:compute with the given status.
    fn setup(resources: Vec<ResourceToSync>) -> (StateStore, SyncTarget) {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_resource_schema(&schema("root:schemas", "test.services.core", "Service", "v1", true))
            .unwrap();
        store
            .put_resource_schema(&schema("root:schemas", "today.cowboys.wildwest.dev", "Cowboy", "v1alpha1", true))
            .unwrap();
        store
            .put_resource_schema(&schema("root:schemas", "test.configmaps.core", "ConfigMap", "v1", false))
            .unwrap();
        store
            .put_api_export(&ApiExport {
                workspace: "root:schemas".to_string(),
                name: "services".to_string(),
                identity_hash: "abc123".to_string(),
                latest_resource_schemas: vec![
                    "test.services.core".to_string(),
                    "today.cowboys.wildwest.dev".to_string(),
                    "test.configmaps.core".to_string(),
                ],
            })
            .unwrap();

        let mut target = store
            .create_sync_target(
                "root:compute",
                "east",
                SyncTargetSpec {
                    supported_api_exports: vec![ExportReference::new("root:schemas", "services")],
                    ..Default::default()
                },
            )
            .unwrap();
        target.status.synced_resources = resources;
        let target = store.update_sync_target(&target).unwrap();
        (store, target)
    }

    #[test]
    fn baseline_plus_accepted_services() {
        let (store, _) = setup(vec![
            entry("wildwest.dev", "cowboys", "v1alpha1", "abc123", CompatibilityState::Incompatible),
            entry("", "services", "v1", "", CompatibilityState::Accepted),
        ]);
        let lists = DiscoveryAggregator::new(store).discover("root:compute", "east").unwrap();

        assert_eq!(lists.len(), 1);
        let core = &lists[0];
        assert_eq!(core.kind, "APIResourceList");
        assert_eq!(core.group_version, "v1");
        let names: Vec<_> = core.resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "configmaps",
                "namespaces",
                "namespaces/status",
                "secrets",
                "serviceaccounts",
                "services",
                "services/status",
            ]
        );

        let services = core.resource("services").unwrap();
        assert_eq!(services.kind, "Service");
        assert_eq!(services.singular_name, "service");
        assert!(services.namespaced);
        assert_eq!(services.storage_version_hash, storage_version_hash("root:schemas", "", "v1", "Service"));

        let configmaps = core.resource("configmaps").unwrap();
        assert_eq!(
            configmaps.storage_version_hash,
            storage_version_hash("root:compute", "", "v1", "ConfigMap")
        );

        let status = core.resource("services/status").unwrap();
        assert_eq!(status.verbs, vec!["get", "patch", "update"]);
        assert!(status.storage_version_hash.is_empty());
    }

    #[test]
    fn pending_and_incompatible_are_absent() {
        let (store, _) = setup(vec![
            entry("wildwest.dev", "cowboys", "v1alpha1", "abc123", CompatibilityState::Pending),
            entry("", "services", "v1", "", CompatibilityState::Incompatible),
        ]);
        let lists = DiscoveryAggregator::new(store).discover("root:compute", "east").unwrap();
        assert_eq!(lists.len(), 1);
        assert!(lists[0].resource("services").is_none());
        assert_eq!(lists[0].resources.len(), 5);
    }

    #[test]
    fn custom_group_gets_its_own_list() {
        let (store, _) = setup(vec![entry(
            "wildwest.dev",
            "cowboys",
            "v1alpha1",
            "abc123",
            CompatibilityState::Accepted,
        )]);
        let lists = DiscoveryAggregator::new(store).discover("root:compute", "east").unwrap();
        let gvs: Vec<_> = lists.iter().map(|l| l.group_version.as_str()).collect();
        assert_eq!(gvs, vec!["v1", "wildwest.dev/v1alpha1"]);

        let cowboys = lists[1].resource("cowboys").unwrap();
        assert_eq!(
            cowboys.storage_version_hash,
            storage_version_hash("root:schemas", "wildwest.dev", "v1alpha1", "Cowboy")
        );
        assert!(lists[1].resource("cowboys/status").is_some());
    }

    #[test]
    fn baseline_wins_over_exported_duplicate() {
        let (store, _) = setup(vec![entry("", "configmaps", "v1", "", CompatibilityState::Accepted)]);
        let lists = DiscoveryAggregator::new(store).discover("root:compute", "east").unwrap();
        let configmaps: Vec<_> = lists[0].resources.iter().filter(|r| r.name == "configmaps").collect();
        assert_eq!(configmaps.len(), 1);
        assert_eq!(
            configmaps[0].storage_version_hash,
            storage_version_hash("root:compute", "", "v1", "ConfigMap")
        );
    }

    #[test]
    fn scopes_see_different_hashes() {
        let (store, _) = setup(vec![]);
        store.create_sync_target("root:other", "west", SyncTargetSpec::default()).unwrap();
        let aggregator = DiscoveryAggregator::new(store);

        let east = aggregator.discover("root:compute", "east").unwrap();
        let west = aggregator.discover("root:other", "west").unwrap();
        assert_ne!(
            east[0].resource("secrets").unwrap().storage_version_hash,
            west[0].resource("secrets").unwrap().storage_version_hash
        );
        // Same scope, same answer.
        assert_eq!(east, aggregator.discover("root:compute", "east").unwrap());
    }

    #[test]
    fn uid_must_match_registration() {
        let (store, target) = setup(vec![]);
        let aggregator = DiscoveryAggregator::new(store);
        assert!(aggregator.discover_for_uid("root:compute", "east", &target.uid).is_ok());
        assert!(matches!(
            aggregator.discover_for_uid("root:compute", "east", "stale-uid"),
            Err(DiscoveryError::SyncTargetNotFound(_))
        ));
        assert!(matches!(
            aggregator.discover("root:compute", "nope"),
            Err(DiscoveryError::SyncTargetNotFound(_))
        ));
    }

    #[test]
    fn wire_shape() {
        let (store, _) = setup(vec![]);
        let lists = DiscoveryAggregator::new(store).discover("root:compute", "east").unwrap();
        let json = serde_json::to_value(&lists[0]).unwrap();
        assert_eq!(json["groupVersion"], "v1");
        assert_eq!(json["resources"][0]["singularName"], "configmap");
        assert!(json["resources"][0]["storageVersionHash"].is_string());
    }
}
