//! Kubernetes Adapters
//!
//! Class watchers feeding the registry, plus the `StatusWriter` and
//! `Materializer` ports implemented against the API server.

use crate::classes::{ClassKey, ClassKind, ClassRegistry, ClassScope, ResourceClass};
use crate::crd::{
    AppInstance, AppInstanceStatus, ClusterComputeClass, ClusterVolumeClass, ProjectComputeClass,
    ProjectVolumeClass,
};
use crate::domain::ports::{MaterializeOutcome, Materializer, StatusWriter};
use crate::error::{Error, Result};
use crate::resolver::ResolvedVolumeSpec;
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::WatchStreamExt;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "resource-class-operator";

/// Label naming the owning application instance
pub const LABEL_APP: &str = "platform.billyronks.io/app";
/// Label naming the project of the owning instance
pub const LABEL_PROJECT: &str = "platform.billyronks.io/project";
/// Label naming the declared volume
pub const LABEL_VOLUME: &str = "platform.billyronks.io/volume";
/// Label naming the volume class the size was resolved against
pub const LABEL_VOLUME_CLASS: &str = "platform.billyronks.io/volume-class";
const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

const WATCH_TIMEOUT_SECS: u32 = 25;

// =============================================================================
// Class Watchers
// =============================================================================

/// A class custom resource the registry is fed from
pub trait WatchedClass:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
    const CLASS_KIND: ClassKind;
    const PROJECT_SCOPED: bool;

    fn scope(&self) -> ClassScope;

    fn to_class(&self) -> Result<ResourceClass>;

    fn key(&self) -> ClassKey {
        ClassKey::new(Self::CLASS_KIND, self.scope(), self.name_any())
    }
}

impl WatchedClass for ClusterVolumeClass {
    const CLASS_KIND: ClassKind = ClassKind::Volume;
    const PROJECT_SCOPED: bool = false;

    fn scope(&self) -> ClassScope {
        ClassScope::Cluster
    }

    fn to_class(&self) -> Result<ResourceClass> {
        ResourceClass::try_from(self)
    }
}

impl WatchedClass for ProjectVolumeClass {
    const CLASS_KIND: ClassKind = ClassKind::Volume;
    const PROJECT_SCOPED: bool = true;

    fn scope(&self) -> ClassScope {
        ClassScope::Project(self.project().to_string())
    }

    fn to_class(&self) -> Result<ResourceClass> {
        ResourceClass::try_from(self)
    }
}

impl WatchedClass for ClusterComputeClass {
    const CLASS_KIND: ClassKind = ClassKind::Compute;
    const PROJECT_SCOPED: bool = false;

    fn scope(&self) -> ClassScope {
        ClassScope::Cluster
    }

    fn to_class(&self) -> Result<ResourceClass> {
        ResourceClass::try_from(self)
    }
}

impl WatchedClass for ProjectComputeClass {
    const CLASS_KIND: ClassKind = ClassKind::Compute;
    const PROJECT_SCOPED: bool = true;

    fn scope(&self) -> ClassScope {
        ClassScope::Project(self.project().to_string())
    }

    fn to_class(&self) -> Result<ResourceClass> {
        ResourceClass::try_from(self)
    }
}

/// Apply one watch event to the registry
pub fn apply_watch_event<K: WatchedClass>(registry: &ClassRegistry, event: watcher::Event<K>) {
    match event {
        watcher::Event::Applied(obj) => registry.observe(obj.key(), obj.to_class()),
        watcher::Event::Deleted(obj) => registry.delete(&obj.key()),
        watcher::Event::Restarted(objs) => {
            debug!(kind = %K::CLASS_KIND, project_scoped = K::PROJECT_SCOPED, count = objs.len(), "Class relist");
            let entries = objs.iter().map(|obj| (obj.key(), obj.to_class())).collect();
            registry.resync(K::CLASS_KIND, K::PROJECT_SCOPED, entries);
        }
    }
}

async fn watch_classes<K: WatchedClass>(api: Api<K>, registry: Arc<ClassRegistry>) {
    let mut events = watcher::watcher(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .default_backoff()
        .boxed();

    while let Some(event) = events.next().await {
        match event {
            Ok(event) => apply_watch_event(&registry, event),
            Err(e) => warn!(
                kind = %K::CLASS_KIND,
                project_scoped = K::PROJECT_SCOPED,
                error = %e,
                "Class watch error"
            ),
        }
    }
}

/// Run all four class watchers until their streams end
///
/// Project classes are only watched in `namespace` when one is given.
pub async fn run_class_watchers(
    client: Client,
    registry: Arc<ClassRegistry>,
    namespace: Option<String>,
) {
    let (project_volumes, project_computes): (Api<ProjectVolumeClass>, Api<ProjectComputeClass>) =
        match &namespace {
            Some(ns) => (
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client.clone(), ns),
            ),
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };
    let cluster_volumes: Api<ClusterVolumeClass> = Api::all(client.clone());
    let cluster_computes: Api<ClusterComputeClass> = Api::all(client);

    info!("Starting class watchers");
    tokio::join!(
        watch_classes(cluster_volumes, registry.clone()),
        watch_classes(project_volumes, registry.clone()),
        watch_classes(cluster_computes, registry.clone()),
        watch_classes(project_computes, registry),
    );
}

// =============================================================================
// Status Writer
// =============================================================================

/// Writes AppInstance status with server-side apply
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn write_status(&self, app: &AppInstance, status: &AppInstanceStatus) -> Result<()> {
        let api: Api<AppInstance> = Api::namespaced(self.client.clone(), app.project());
        let patch = json!({
            "apiVersion": AppInstance::api_version(&()),
            "kind": AppInstance::kind(&()),
            "status": status,
        });

        api.patch_status(
            app.name(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&patch),
        )
        .await
        .map_err(|e| Error::StatusWrite {
            name: format!("{}/{}", app.project(), app.name()),
            reason: e.to_string(),
        })?;

        Ok(())
    }
}

// =============================================================================
// PVC Materializer
// =============================================================================

/// Name of the claim backing a declared volume
pub fn pvc_name(app: &AppInstance, volume: &str) -> String {
    format!("{}-{}", app.name(), volume)
}

/// Labels selecting every claim owned by an instance
pub fn owner_selector(app: &AppInstance) -> String {
    format!(
        "{}={},{}={}",
        LABEL_APP,
        app.name(),
        LABEL_MANAGED_BY,
        FIELD_MANAGER
    )
}

/// Server-side apply body for one resolved volume
pub fn pvc_manifest(app: &AppInstance, volume: &str, spec: &ResolvedVolumeSpec) -> Value {
    let mut labels = BTreeMap::from([
        (LABEL_APP.to_string(), app.name().to_string()),
        (LABEL_PROJECT.to_string(), app.project().to_string()),
        (LABEL_VOLUME.to_string(), volume.to_string()),
        (LABEL_MANAGED_BY.to_string(), FIELD_MANAGER.to_string()),
    ]);
    if let Some(class) = &spec.class {
        labels.insert(LABEL_VOLUME_CLASS.to_string(), class.clone());
    }

    let mut claim = json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {
            "name": pvc_name(app, volume),
            "namespace": app.project(),
            "labels": labels,
        },
        "spec": {
            "accessModes": [spec.access_mode.to_string()],
            "resources": {
                "requests": { "storage": spec.size.to_k8s() },
            },
        },
    });

    if let Some(owner) = app.controller_owner_ref(&()) {
        claim["metadata"]["ownerReferences"] = json!([owner]);
    }
    if let Some(storage_class) = &spec.storage_class_name {
        claim["spec"]["storageClassName"] = json!(storage_class);
    }
    claim
}

/// Materializes resolved volumes as PersistentVolumeClaims
pub struct KubePvcMaterializer {
    client: Client,
}

impl KubePvcMaterializer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn prune(
        &self,
        api: &Api<PersistentVolumeClaim>,
        app: &AppInstance,
        keep: &BTreeSet<&str>,
    ) -> Result<usize> {
        let claims = api
            .list(&ListParams::default().labels(&owner_selector(app)))
            .await?;

        let mut pruned = 0;
        for claim in claims.items {
            let volume = claim.labels().get(LABEL_VOLUME).map(String::as_str);
            if volume.is_some_and(|v| keep.contains(v)) {
                continue;
            }
            let name = claim.name_any();
            api.delete(&name, &DeleteParams::default())
                .await
                .map_err(|e| Error::Materialization {
                    resource: format!("claim {name}"),
                    reason: e.to_string(),
                })?;
            info!(app = %app.name(), namespace = %app.project(), claim = %name, "Pruned stale claim");
            pruned += 1;
        }
        Ok(pruned)
    }
}

#[async_trait]
impl Materializer for KubePvcMaterializer {
    async fn apply_volumes(
        &self,
        app: &AppInstance,
        volumes: &BTreeMap<String, ResolvedVolumeSpec>,
        prune: bool,
    ) -> Result<MaterializeOutcome> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), app.project());
        let params = PatchParams::apply(FIELD_MANAGER).force();

        for (volume, spec) in volumes {
            let name = pvc_name(app, volume);
            api.patch(&name, &params, &Patch::Apply(&pvc_manifest(app, volume, spec)))
                .await
                .map_err(|e| Error::Materialization {
                    resource: format!("volume {volume}"),
                    reason: e.to_string(),
                })?;
            debug!(app = %app.name(), volume = %volume, size = %spec.size, "Claim applied");
        }

        let pruned = if prune {
            let keep = volumes.keys().map(String::as_str).collect();
            self.prune(&api, app, &keep).await?
        } else {
            0
        };

        Ok(MaterializeOutcome {
            applied: volumes.len(),
            pruned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{AccessMode, ClassLookup, Quantity};
    use crate::crd::{
        AppInstanceSpec, ProjectVolumeClassSpec, QuantityBoundsSpec, VolumeClassParameters,
    };

    fn app() -> AppInstance {
        let mut app = AppInstance::new("web-app", AppInstanceSpec::default());
        app.metadata.namespace = Some("team-a".into());
        app
    }

    fn project_class(name: &str, min: &str, max: &str) -> ProjectVolumeClass {
        let mut class = ProjectVolumeClass::new(
            name,
            ProjectVolumeClassSpec {
                class: VolumeClassParameters {
                    size: Some(QuantityBoundsSpec {
                        min: Some(min.into()),
                        max: Some(max.into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            },
        );
        class.metadata.namespace = Some("team-a".into());
        class
    }

    #[test]
    fn test_pvc_manifest() {
        let spec = ResolvedVolumeSpec {
            class: Some("fast".into()),
            size: Quantity::parse("10Gi").unwrap(),
            access_mode: AccessMode::ReadWriteMany,
            storage_class_name: Some("ssd".into()),
        };
        let claim = pvc_manifest(&app(), "data", &spec);

        assert_eq!(claim["metadata"]["name"], "web-app-data");
        assert_eq!(claim["metadata"]["namespace"], "team-a");
        assert_eq!(claim["metadata"]["labels"][LABEL_VOLUME], "data");
        assert_eq!(claim["metadata"]["labels"][LABEL_VOLUME_CLASS], "fast");
        assert_eq!(claim["metadata"]["labels"][LABEL_PROJECT], "team-a");
        assert_eq!(claim["spec"]["accessModes"][0], "ReadWriteMany");
        assert_eq!(claim["spec"]["resources"]["requests"]["storage"], "10Gi");
        assert_eq!(claim["spec"]["storageClassName"], "ssd");
    }

    #[test]
    fn test_unclassed_manifest_uses_platform_storage() {
        let spec = ResolvedVolumeSpec {
            class: None,
            size: Quantity::parse("1500K").unwrap(),
            access_mode: AccessMode::ReadWriteOnce,
            storage_class_name: None,
        };
        let claim = pvc_manifest(&app(), "cache", &spec);
        assert!(claim["metadata"]["labels"].get(LABEL_VOLUME_CLASS).is_none());
        assert!(claim["spec"].get("storageClassName").is_none());
        assert_eq!(claim["spec"]["resources"]["requests"]["storage"], "1500k");
    }

    #[test]
    fn test_owner_selector() {
        assert_eq!(
            owner_selector(&app()),
            "platform.billyronks.io/app=web-app,app.kubernetes.io/managed-by=resource-class-operator"
        );
    }

    #[test]
    fn test_watch_events_feed_registry() {
        let registry = ClassRegistry::new();
        let fast = project_class("fast", "1Gi", "10Gi");

        apply_watch_event(&registry, watcher::Event::Restarted(vec![fast.clone()]));
        apply_watch_event(
            &registry,
            watcher::Event::Applied(project_class("broken", "10Gi", "1Gi")),
        );

        let snapshot = registry.current();
        assert!(matches!(
            snapshot.lookup("team-a", ClassKind::Volume, "fast"),
            ClassLookup::Active(_)
        ));
        assert_eq!(
            snapshot.lookup("team-a", ClassKind::Volume, "broken"),
            ClassLookup::Missing
        );
        assert_eq!(registry.stats().rejected, 1);

        apply_watch_event(&registry, watcher::Event::Deleted(fast));
        assert_eq!(
            registry.current().lookup("team-a", ClassKind::Volume, "fast"),
            ClassLookup::Missing
        );
    }
}
