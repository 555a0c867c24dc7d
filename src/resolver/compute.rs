//! Compute Class Resolver
//!
//! Sizes one container: memory comes from the request or the compute class,
//! CPU is derived from memory through the class's CPU scaler, and every
//! workload gets the fixed toleration for nodes reserved to managed
//! workloads.

use crate::classes::{
    BoundsViolation, ClassKind, ClassLookup, ClassSnapshot, ComputePolicy, Quantity,
    ResourceClass,
};
use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{ResourceRequirements, Toleration};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

// =============================================================================
// Constants
// =============================================================================

/// Taint key of nodes reserved for managed workloads
pub const WORKLOAD_TOLERATION_KEY: &str = "platform.billyronks.io/workload";

/// Toleration operator matching any taint value
const TOLERATION_OPERATOR_EXISTS: &str = "Exists";

// =============================================================================
// Request / Result
// =============================================================================

/// A container's scheduling intent, after overrides were applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSchedulingRequest {
    pub container: String,
    pub compute_class: Option<String>,
    /// Unparsed memory literal
    pub memory: Option<String>,
}

impl ContainerSchedulingRequest {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            ..Default::default()
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.compute_class = Some(class.into());
        self
    }

    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = Some(memory.into());
        self
    }

    fn resource(&self) -> String {
        format!("container {}", self.container)
    }
}

/// Toleration attached to every managed workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadToleration {
    pub key: String,
    pub operator: String,
}

impl WorkloadToleration {
    /// The fixed managed-workload toleration
    pub fn workload() -> Self {
        Self {
            key: WORKLOAD_TOLERATION_KEY.to_string(),
            operator: TOLERATION_OPERATOR_EXISTS.to_string(),
        }
    }

    pub fn to_k8s(&self) -> Toleration {
        Toleration {
            key: Some(self.key.clone()),
            operator: Some(self.operator.clone()),
            ..Default::default()
        }
    }
}

/// Resolved resources for one container, recorded in the application instance status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSchedulingSpec {
    /// Compute class the container was resolved against; None when unclassed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<Quantity>,

    /// Always equal to the memory request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<Quantity>,

    /// Derived from memory; no CPU limit is ever set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<Quantity>,

    #[serde(default)]
    pub tolerations: Vec<WorkloadToleration>,
}

impl ResolvedSchedulingSpec {
    /// Kubernetes resource requirements for the container
    pub fn requirements(&self) -> ResourceRequirements {
        let mut requests = BTreeMap::new();
        let mut limits = BTreeMap::new();
        if let Some(memory) = &self.memory_request {
            requests.insert("memory".to_string(), memory.to_k8s());
        }
        if let Some(cpu) = &self.cpu_request {
            requests.insert("cpu".to_string(), cpu.to_k8s());
        }
        if let Some(memory) = &self.memory_limit {
            limits.insert("memory".to_string(), memory.to_k8s());
        }
        ResourceRequirements {
            requests: (!requests.is_empty()).then_some(requests),
            limits: (!limits.is_empty()).then_some(limits),
            ..Default::default()
        }
    }

    /// Kubernetes tolerations for the pod
    pub fn k8s_tolerations(&self) -> Vec<Toleration> {
        self.tolerations.iter().map(WorkloadToleration::to_k8s).collect()
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// CPU request derived from memory
///
/// `cpu_scaler` is CPU cores per GiB of memory, so 512Mi at 0.25 is 125m.
/// A zero result means no CPU request.
pub fn cpu_for_memory(memory: &Quantity, cpu_scaler: f64) -> Option<Quantity> {
    let millis = (memory.as_gib() * cpu_scaler * 1000.0).round();
    if millis >= 1.0 {
        Some(Quantity::from_millis(millis as i128))
    } else {
        None
    }
}

/// Resolve one container's scheduling against a class snapshot
pub fn resolve_compute(
    request: &ContainerSchedulingRequest,
    snapshot: &ClassSnapshot,
    project: &str,
    config: &ResolverConfig,
) -> Result<ResolvedSchedulingSpec> {
    let explicit_memory = request
        .memory
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .map(|m| parse_memory(request, m))
        .transpose()?;

    match effective_class(request, snapshot, project)? {
        Some(class) => resolve_with_class(request, class, explicit_memory, config),
        None if config.allow_unclassed => resolve_unclassed(request, explicit_memory, config),
        None => Err(Error::ClassNotFound {
            kind: ClassKind::Compute,
            resource: request.resource(),
            class: None,
        }),
    }
}

fn effective_class<'a>(
    request: &ContainerSchedulingRequest,
    snapshot: &'a ClassSnapshot,
    project: &str,
) -> Result<Option<&'a ResourceClass>> {
    let Some(name) = request.compute_class.as_deref().filter(|c| !c.is_empty()) else {
        return snapshot.default_for(project, ClassKind::Compute);
    };

    match snapshot.lookup(project, ClassKind::Compute, name) {
        ClassLookup::Active(class) => Ok(Some(class)),
        ClassLookup::Inactive(_) => Err(Error::ClassInactiveOrMissing {
            kind: ClassKind::Compute,
            resource: request.resource(),
            class: name.to_string(),
        }),
        ClassLookup::Missing => Err(Error::ClassNotFound {
            kind: ClassKind::Compute,
            resource: request.resource(),
            class: Some(name.to_string()),
        }),
    }
}

fn resolve_with_class(
    request: &ContainerSchedulingRequest,
    class: &ResourceClass,
    explicit_memory: Option<Quantity>,
    config: &ResolverConfig,
) -> Result<ResolvedSchedulingSpec> {
    let ComputePolicy { cpu_scaler, memory: policy } = class.as_compute().ok_or_else(|| {
        Error::Internal(format!("class {} is not a compute class", class.name))
    })?;

    let memory = explicit_memory
        .or_else(|| policy.effective_default().cloned())
        .or_else(|| config.workload_memory_default.clone());

    if let Some(memory) = &memory {
        match policy.bounds.check(memory) {
            Ok(()) => {}
            Err(BoundsViolation::OutOfRange) => {
                return Err(Error::MemoryOutOfRange {
                    container: request.container.clone(),
                    class: class.name.clone(),
                    memory: memory.to_string(),
                    bounds: policy.bounds.describe(),
                })
            }
            Err(BoundsViolation::NotAllowed) => {
                return Err(Error::MemoryNotAllowed {
                    container: request.container.clone(),
                    class: class.name.clone(),
                    memory: memory.to_string(),
                    allowed: policy.bounds.describe(),
                })
            }
        }
    }

    let cpu_request = memory
        .as_ref()
        .and_then(|m| cpu_for_memory(m, *cpu_scaler));

    debug!(
        container = %request.container,
        class = %class.name,
        memory = ?memory.as_ref().map(Quantity::as_str),
        cpu = ?cpu_request.as_ref().map(Quantity::as_str),
        "Resolved compute"
    );

    Ok(ResolvedSchedulingSpec {
        compute_class: Some(class.name.clone()),
        memory_request: memory.clone(),
        memory_limit: memory,
        cpu_request,
        tolerations: vec![WorkloadToleration::workload()],
    })
}

fn parse_memory(request: &ContainerSchedulingRequest, literal: &str) -> Result<Quantity> {
    let memory = Quantity::parse(literal).map_err(|e| Error::InvalidRequest {
        resource: request.resource(),
        reason: e.to_string(),
    })?;
    if memory.is_zero() {
        return Err(Error::InvalidRequest {
            resource: request.resource(),
            reason: "memory must be greater than zero".to_string(),
        });
    }
    Ok(memory)
}

fn resolve_unclassed(
    request: &ContainerSchedulingRequest,
    explicit_memory: Option<Quantity>,
    config: &ResolverConfig,
) -> Result<ResolvedSchedulingSpec> {
    let memory = explicit_memory.or_else(|| config.workload_memory_default.clone());

    if let (Some(memory), Some(maximum)) = (&memory, &config.workload_memory_maximum) {
        if memory > maximum {
            return Err(Error::MemoryExceedsMaximum {
                container: request.container.clone(),
                memory: memory.to_string(),
                maximum: maximum.to_string(),
            });
        }
    }

    debug!(
        container = %request.container,
        memory = ?memory.as_ref().map(Quantity::as_str),
        "Resolved unclassed compute"
    );

    Ok(ResolvedSchedulingSpec {
        compute_class: None,
        memory_request: memory.clone(),
        memory_limit: memory,
        cpu_request: None,
        tolerations: vec![WorkloadToleration::workload()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::ClassScope;
    use crate::crd::{ComputeClassParameters, QuantityBoundsSpec};
    use assert_matches::assert_matches;

    fn q(s: &str) -> Quantity {
        Quantity::parse(s).unwrap()
    }

    fn class(
        name: &str,
        cpu_scaler: f64,
        min: Option<&str>,
        max: Option<&str>,
        default: Option<&str>,
    ) -> ResourceClass {
        ResourceClass::compute(
            name,
            ClassScope::Cluster,
            &ComputeClassParameters {
                cpu_scaler: Some(cpu_scaler),
                memory: Some(QuantityBoundsSpec {
                    min: min.map(String::from),
                    max: max.map(String::from),
                    default: default.map(String::from),
                    values: vec![],
                }),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn resolve(request: ContainerSchedulingRequest, snapshot: &ClassSnapshot) -> Result<ResolvedSchedulingSpec> {
        resolve_compute(&request, snapshot, "team-a", &ResolverConfig::default())
    }

    #[test]
    fn test_class_default_scenario() {
        let snap = ClassSnapshot::new(
            1,
            vec![class("small", 0.25, Some("512Mi"), Some("1Gi"), Some("512Mi"))],
        );
        let spec = resolve(ContainerSchedulingRequest::new("web").with_class("small"), &snap).unwrap();
        assert_eq!(spec.memory_request, Some(q("512Mi")));
        assert_eq!(spec.memory_limit, Some(q("512Mi")));
        assert_eq!(spec.cpu_request, Some(q("125m")));
        assert_eq!(spec.tolerations, vec![WorkloadToleration::workload()]);
    }

    #[test]
    fn test_cpu_scales_with_memory() {
        let snap = ClassSnapshot::new(
            1,
            vec![class("small", 0.25, Some("512Mi"), Some("1Gi"), Some("512Mi"))],
        );
        let spec = resolve(
            ContainerSchedulingRequest::new("web")
                .with_class("small")
                .with_memory("1Gi"),
            &snap,
        )
        .unwrap();
        assert_eq!(spec.cpu_request, Some(q("250m")));
    }

    #[test]
    fn test_changing_scaler_only_changes_cpu() {
        let low = ClassSnapshot::new(1, vec![class("c", 0.25, None, None, Some("2Gi"))]);
        let high = ClassSnapshot::new(2, vec![class("c", 1.5, None, None, Some("2Gi"))]);
        let request = ContainerSchedulingRequest::new("web").with_class("c");

        let a = resolve(request.clone(), &low).unwrap();
        let b = resolve(request, &high).unwrap();
        assert_eq!(a.memory_request, b.memory_request);
        assert_eq!(a.cpu_request, Some(q("500m")));
        assert_eq!(b.cpu_request, Some(q("3")));
    }

    #[test]
    fn test_cpu_for_memory() {
        assert_eq!(cpu_for_memory(&q("512Mi"), 0.25), Some(q("125m")));
        assert_eq!(cpu_for_memory(&q("1Gi"), 1.0), Some(q("1")));
        assert_eq!(cpu_for_memory(&q("1Gi"), 0.0), None);
        assert_eq!(cpu_for_memory(&q("1Ki"), 0.25), None);
    }

    #[test]
    fn test_memory_bounds() {
        let snap = ClassSnapshot::new(
            1,
            vec![class("small", 0.25, Some("512Mi"), Some("1Gi"), None)],
        );
        let base = ContainerSchedulingRequest::new("web").with_class("small");

        let err = resolve(base.clone().with_memory("2Gi"), &snap).unwrap_err();
        assert_matches!(err, Error::MemoryOutOfRange { .. });
        assert!(err.to_string().contains("web"));
        assert!(err.to_string().contains("small"));

        assert_matches!(
            resolve(base.clone().with_memory("256Mi"), &snap),
            Err(Error::MemoryOutOfRange { .. })
        );

        // No default: the maximum is used
        assert_eq!(resolve(base, &snap).unwrap().memory_request, Some(q("1Gi")));
    }

    #[test]
    fn test_zero_memory_rejected() {
        let snap = ClassSnapshot::new(1, vec![class("open", 0.25, None, None, None)]);
        let config = ResolverConfig {
            allow_unclassed: true,
            ..Default::default()
        };

        for request in [
            ContainerSchedulingRequest::new("web").with_class("open").with_memory("0"),
            ContainerSchedulingRequest::new("web").with_memory("0Mi"),
        ] {
            let err = resolve_compute(&request, &snap, "team-a", &config).unwrap_err();
            assert_matches!(err, Error::InvalidRequest { ref resource, .. } if resource.contains("web"));
            assert!(err.to_string().contains("greater than zero"));
        }
    }

    #[test]
    fn test_enumerated_memory() {
        let class = ResourceClass::compute(
            "fixed",
            ClassScope::Cluster,
            &ComputeClassParameters {
                memory: Some(QuantityBoundsSpec {
                    values: vec!["1Gi".into(), "2Gi".into()],
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .unwrap();
        let snap = ClassSnapshot::new(1, vec![class]);
        let base = ContainerSchedulingRequest::new("web").with_class("fixed");

        assert_matches!(
            resolve(base.clone().with_memory("1.5Gi"), &snap),
            Err(Error::MemoryNotAllowed { .. })
        );
        let spec = resolve(base.with_memory("2Gi"), &snap).unwrap();
        assert_eq!(spec.memory_request, Some(q("2Gi")));
        assert_eq!(spec.cpu_request, None);
    }

    #[test]
    fn test_unbounded_class_uses_workload_default() {
        let snap = ClassSnapshot::new(1, vec![class("open", 1.0, None, None, None)]);
        let config = ResolverConfig {
            workload_memory_default: Some(q("256Mi")),
            ..Default::default()
        };
        let spec = resolve_compute(
            &ContainerSchedulingRequest::new("web").with_class("open"),
            &snap,
            "team-a",
            &config,
        )
        .unwrap();
        assert_eq!(spec.memory_request, Some(q("256Mi")));
        assert_eq!(spec.cpu_request, Some(q("250m")));

        // Nothing to go on: no resources at all
        let spec = resolve(ContainerSchedulingRequest::new("web").with_class("open"), &snap).unwrap();
        assert_eq!(spec.memory_request, None);
        assert_eq!(spec.cpu_request, None);
        assert_eq!(spec.requirements(), ResourceRequirements::default());
    }

    #[test]
    fn test_unclassed_container() {
        let snap = ClassSnapshot::new(1, vec![]);
        let config = ResolverConfig {
            allow_unclassed: true,
            workload_memory_default: Some(q("512Mi")),
            workload_memory_maximum: Some(q("1Gi")),
            ..Default::default()
        };

        let spec = resolve_compute(&ContainerSchedulingRequest::new("web"), &snap, "team-a", &config)
            .unwrap();
        assert_eq!(spec.compute_class, None);
        assert_eq!(spec.memory_request, Some(q("512Mi")));
        assert_eq!(spec.cpu_request, None);
        assert_eq!(spec.tolerations.len(), 1);

        assert_matches!(
            resolve_compute(
                &ContainerSchedulingRequest::new("web").with_memory("2Gi"),
                &snap,
                "team-a",
                &config
            ),
            Err(Error::MemoryExceedsMaximum { .. })
        );

        assert_matches!(
            resolve(ContainerSchedulingRequest::new("web"), &snap),
            Err(Error::ClassNotFound { kind: ClassKind::Compute, class: None, .. })
        );
    }

    #[test]
    fn test_inactive_class() {
        let mut retired = class("retired", 1.0, None, None, None);
        retired.active = false;
        let snap = ClassSnapshot::new(1, vec![retired]);
        let err = resolve(ContainerSchedulingRequest::new("web").with_class("retired"), &snap)
            .unwrap_err();
        assert_matches!(err, Error::ClassInactiveOrMissing { kind: ClassKind::Compute, .. });
    }

    #[test]
    fn test_requirements_and_tolerations() {
        let snap = ClassSnapshot::new(
            1,
            vec![class("small", 0.25, Some("512Mi"), Some("1Gi"), Some("512Mi"))],
        );
        let spec = resolve(ContainerSchedulingRequest::new("web").with_class("small"), &snap).unwrap();

        let requirements = spec.requirements();
        let requests = requirements.requests.unwrap();
        assert_eq!(requests["memory"].0, "512Mi");
        assert_eq!(requests["cpu"].0, "125m");
        let limits = requirements.limits.unwrap();
        assert_eq!(limits["memory"].0, "512Mi");
        assert!(!limits.contains_key("cpu"));

        let tolerations = spec.k8s_tolerations();
        assert_eq!(tolerations[0].key.as_deref(), Some(WORKLOAD_TOLERATION_KEY));
        assert_eq!(tolerations[0].operator.as_deref(), Some("Exists"));
    }
}
