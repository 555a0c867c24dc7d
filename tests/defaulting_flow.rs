//! End-to-end defaulting flow through the reconciler with in-memory ports

use assert_matches::assert_matches;
use async_trait::async_trait;
use parking_lot::Mutex;
use resource_class_operator::controller::{reconcile, Context, DefaultingCoordinator};
use resource_class_operator::crd::{
    ComputeClassParameters, DeclaredContainer, DeclaredVolume, QuantityBoundsSpec,
    VolumeBinding, VolumeClassParameters,
};
use resource_class_operator::domain::ports::{MaterializeOutcome, Materializer, StatusWriter};
use resource_class_operator::{
    AccessMode, AppInstance, AppInstanceSpec, AppInstanceStatus, ClassKey, ClassKind,
    ClassRegistry, ClassScope, ConditionType, Error, Metrics, Quantity, ResolvedVolumeSpec,
    ResolverConfig, ResourceClass, Result,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// In-memory ports
// =============================================================================

#[derive(Default)]
struct MemoryStatusWriter {
    writes: Mutex<Vec<AppInstanceStatus>>,
}

impl MemoryStatusWriter {
    fn count(&self) -> usize {
        self.writes.lock().len()
    }

    fn last(&self) -> Option<AppInstanceStatus> {
        self.writes.lock().last().cloned()
    }
}

#[async_trait]
impl StatusWriter for MemoryStatusWriter {
    async fn write_status(&self, _app: &AppInstance, status: &AppInstanceStatus) -> Result<()> {
        self.writes.lock().push(status.clone());
        Ok(())
    }
}

#[derive(Default)]
struct MemoryMaterializer {
    claims: Mutex<BTreeMap<String, ResolvedVolumeSpec>>,
    calls: Mutex<Vec<bool>>,
    fail: Mutex<bool>,
}

impl MemoryMaterializer {
    fn calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Materializer for MemoryMaterializer {
    async fn apply_volumes(
        &self,
        _app: &AppInstance,
        volumes: &BTreeMap<String, ResolvedVolumeSpec>,
        prune: bool,
    ) -> Result<MaterializeOutcome> {
        self.calls.lock().push(prune);
        if *self.fail.lock() {
            return Err(Error::Materialization {
                resource: "volume data".into(),
                reason: "quota exceeded".into(),
            });
        }

        let mut claims = self.claims.lock();
        let mut pruned = 0;
        if prune {
            let before = claims.len();
            claims.retain(|name, _| volumes.contains_key(name));
            pruned = before - claims.len();
        }
        for (name, spec) in volumes {
            claims.insert(name.clone(), spec.clone());
        }
        Ok(MaterializeOutcome {
            applied: volumes.len(),
            pruned,
        })
    }
}

// =============================================================================
// Fixtures
// =============================================================================

struct Harness {
    registry: Arc<ClassRegistry>,
    writer: Arc<MemoryStatusWriter>,
    materializer: Arc<MemoryMaterializer>,
    ctx: Arc<Context>,
}

impl Harness {
    fn new(classes: Vec<ResourceClass>) -> Self {
        let registry = ClassRegistry::with_classes(classes);
        let writer = Arc::new(MemoryStatusWriter::default());
        let materializer = Arc::new(MemoryMaterializer::default());
        let ctx = Context::new(
            DefaultingCoordinator::new(
                registry.clone(),
                ResolverConfig::default(),
                Arc::new(Metrics::new().unwrap()),
            ),
            writer.clone(),
            materializer.clone(),
            Duration::from_secs(300),
        );
        Self {
            registry,
            writer,
            materializer,
            ctx,
        }
    }

    /// Reconcile and persist the written status back onto the instance
    async fn reconcile(&self, app: &mut AppInstance) -> Result<()> {
        let result = reconcile(Arc::new(app.clone()), self.ctx.clone()).await;
        if let Some(status) = self.writer.last() {
            app.status = Some(status);
        }
        result.map(|_| ())
    }
}

fn q(s: &str) -> Quantity {
    Quantity::parse(s).unwrap()
}

fn bounds(min: &str, max: &str, default: Option<&str>) -> Option<QuantityBoundsSpec> {
    Some(QuantityBoundsSpec {
        min: Some(min.into()),
        max: Some(max.into()),
        default: default.map(Into::into),
        ..Default::default()
    })
}

fn fast_volumes() -> ResourceClass {
    ResourceClass::volume(
        "fast",
        ClassScope::Cluster,
        &VolumeClassParameters {
            default: true,
            storage_class_name: Some("ssd".into()),
            allowed_access_modes: vec![AccessMode::ReadWriteOnce, AccessMode::ReadWriteMany],
            size: bounds("1Gi", "100Gi", Some("10Gi")),
            ..Default::default()
        },
    )
    .unwrap()
}

fn small_compute() -> ResourceClass {
    ResourceClass::compute(
        "small",
        ClassScope::Cluster,
        &ComputeClassParameters {
            default: true,
            cpu_scaler: Some(0.25),
            memory: bounds("256Mi", "1Gi", Some("512Mi")),
            ..Default::default()
        },
    )
    .unwrap()
}

fn app(generation: i64, spec: AppInstanceSpec) -> AppInstance {
    let mut app = AppInstance::new("shop", spec);
    app.metadata.namespace = Some("team-a".into());
    app.metadata.generation = Some(generation);
    app
}

fn spec() -> AppInstanceSpec {
    AppInstanceSpec {
        volumes: vec![DeclaredVolume {
            name: "data".into(),
            ..Default::default()
        }],
        containers: vec![
            DeclaredContainer {
                name: "web".into(),
                ..Default::default()
            },
            DeclaredContainer {
                name: "worker".into(),
                memory: Some("1Gi".into()),
                ..Default::default()
            },
        ],
        ..Default::default()
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_defaults_resolved_and_materialized() {
    let harness = Harness::new(vec![fast_volumes(), small_compute()]);
    let mut app = app(1, spec());

    harness.reconcile(&mut app).await.unwrap();

    let status = app.status.clone().unwrap();
    for stage in [
        ConditionType::Parsed,
        ConditionType::Defaults,
        ConditionType::Defined,
        ConditionType::Volumes,
        ConditionType::Scheduling,
    ] {
        assert!(status.is_success(stage), "{stage} should succeed");
    }

    let data = &status.volumes["data"];
    assert_eq!(data.class.as_deref(), Some("fast"));
    assert_eq!(data.size, q("10Gi"));
    assert_eq!(data.access_mode, AccessMode::ReadWriteOnce);
    assert_eq!(data.storage_class_name.as_deref(), Some("ssd"));

    let web = &status.scheduling["web"];
    assert_eq!(web.memory_request, Some(q("512Mi")));
    assert_eq!(web.memory_limit, Some(q("512Mi")));
    assert_eq!(web.cpu_request, Some(q("125m")));
    assert_eq!(status.scheduling["worker"].cpu_request, Some(q("250m")));

    assert_eq!(harness.materializer.calls.lock().as_slice(), &[true]);
    assert_eq!(harness.materializer.claims.lock()["data"].size, q("10Gi"));
}

#[tokio::test]
async fn test_repeated_reconcile_is_idempotent() {
    let harness = Harness::new(vec![fast_volumes(), small_compute()]);
    let mut app = app(1, spec());

    harness.reconcile(&mut app).await.unwrap();
    let first = app.status.clone();
    let writes = harness.writer.count();

    harness.reconcile(&mut app).await.unwrap();
    harness.reconcile(&mut app).await.unwrap();

    assert_eq!(app.status, first);
    assert_eq!(harness.writer.count(), writes);
}

#[tokio::test]
async fn test_override_wins_over_declaration() {
    let harness = Harness::new(vec![fast_volumes(), small_compute()]);
    let mut spec = spec();
    spec.volume_bindings.push(VolumeBinding {
        target: "data".into(),
        size: Some("50Gi".into()),
        access_mode: Some(AccessMode::ReadWriteMany),
        ..Default::default()
    });
    spec.memory.insert("".into(), "768Mi".into());
    let mut app = app(1, spec);

    harness.reconcile(&mut app).await.unwrap();

    let status = app.status.unwrap();
    assert_eq!(status.volumes["data"].size, q("50Gi"));
    assert_eq!(status.volumes["data"].access_mode, AccessMode::ReadWriteMany);
    assert_eq!(status.scheduling["web"].memory_request, Some(q("768Mi")));
    assert_eq!(status.scheduling["worker"].memory_request, Some(q("768Mi")));
}

#[tokio::test]
async fn test_deleted_class_keeps_materialized_volume() {
    let harness = Harness::new(vec![fast_volumes(), small_compute()]);
    let mut app = app(1, spec());
    harness.reconcile(&mut app).await.unwrap();
    assert_eq!(harness.materializer.calls(), 1);

    harness
        .registry
        .delete(&ClassKey::new(ClassKind::Volume, ClassScope::Cluster, "fast"));
    harness.reconcile(&mut app).await.unwrap();

    let status = app.status.unwrap();
    let defined = status.condition(ConditionType::Defined).unwrap();
    assert!(defined.error);
    assert!(defined.message.as_deref().unwrap().contains("fast"));
    assert_eq!(status.volumes["data"].class.as_deref(), Some("fast"));

    // Gated: no further apply and nothing pruned
    assert_eq!(harness.materializer.calls(), 1);
    assert!(harness.materializer.claims.lock().contains_key("data"));
}

#[tokio::test]
async fn test_new_generation_supersedes() {
    let harness = Harness::new(vec![fast_volumes(), small_compute()]);
    let mut app = app(1, spec());
    harness.reconcile(&mut app).await.unwrap();

    app.spec.volumes[0].size = Some("20Gi".into());
    app.metadata.generation = Some(2);
    harness.reconcile(&mut app).await.unwrap();

    let status = app.status.unwrap();
    assert_eq!(status.observed_generation, Some(2));
    assert_eq!(status.volumes["data"].size, q("20Gi"));
    assert_eq!(
        status.condition(ConditionType::Defaults).unwrap().observed_generation,
        Some(2)
    );
    assert_eq!(harness.materializer.claims.lock()["data"].size, q("20Gi"));
}

#[tokio::test]
async fn test_volume_error_leaves_no_partial_scheduling() {
    let harness = Harness::new(vec![fast_volumes(), small_compute()]);
    let mut spec = spec();
    spec.volumes[0].size = Some("500Gi".into());
    let mut app = app(1, spec);

    harness.reconcile(&mut app).await.unwrap();

    let status = app.status.unwrap();
    let defaults = status.condition(ConditionType::Defaults).unwrap();
    assert!(defaults.error);
    assert_eq!(defaults.reason.as_deref(), Some("SizeOutOfRange"));
    assert!(status.scheduling.is_empty());
    assert!(status.volumes.is_empty());
    assert!(status.condition(ConditionType::Volumes).is_none());
    assert!(status.condition(ConditionType::Scheduling).is_none());
    assert_eq!(harness.materializer.calls(), 0);
}

#[tokio::test]
async fn test_failed_generation_keeps_previous_volumes() {
    let harness = Harness::new(vec![fast_volumes(), small_compute()]);
    let mut app = app(1, spec());
    harness.reconcile(&mut app).await.unwrap();

    app.spec.volumes[0].access_mode = Some(AccessMode::ReadOnlyMany);
    app.metadata.generation = Some(2);
    harness.reconcile(&mut app).await.unwrap();

    let status = app.status.unwrap();
    assert_eq!(
        status.condition(ConditionType::Defaults).unwrap().reason.as_deref(),
        Some("AccessModeNotAllowed")
    );
    assert_eq!(status.volumes["data"].access_mode, AccessMode::ReadWriteOnce);
    assert_eq!(status.observed_generation, Some(1));
    // Volumes condition still reports the last materialization
    assert!(status.is_success(ConditionType::Volumes));
    assert_eq!(harness.materializer.calls(), 1);
}

#[tokio::test]
async fn test_materialization_failure_is_recorded_and_retried() {
    let harness = Harness::new(vec![fast_volumes(), small_compute()]);
    *harness.materializer.fail.lock() = true;
    let mut app = app(1, spec());

    let err = harness.reconcile(&mut app).await.unwrap_err();
    assert_matches!(err, Error::Materialization { .. });
    assert!(err.is_retryable());

    let status = app.status.unwrap();
    assert!(status.is_success(ConditionType::Defaults));
    assert!(status.is_error(ConditionType::Volumes));
}

#[tokio::test]
async fn test_project_class_shadows_cluster_class() {
    let project_fast = ResourceClass::volume(
        "fast",
        ClassScope::Project("team-a".into()),
        &VolumeClassParameters {
            size: bounds("1Gi", "5Gi", None),
            ..Default::default()
        },
    )
    .unwrap();
    let harness = Harness::new(vec![fast_volumes(), small_compute(), project_fast]);
    let mut spec = spec();
    spec.volumes[0].class = Some("fast".into());
    let mut app = app(1, spec);

    harness.reconcile(&mut app).await.unwrap();

    let data = &app.status.unwrap().volumes["data"];
    assert_eq!(data.size, q("5Gi"));
    assert_eq!(data.storage_class_name, None);
}
