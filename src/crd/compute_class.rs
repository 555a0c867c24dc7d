//! Compute Class CRDs
//!
//! Compute classes bound the memory of a workload container and derive its
//! CPU request from that memory.

use super::QuantityBoundsSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// ClusterComputeClass CRD
// =============================================================================

/// ClusterComputeClass sizes containers of every application instance in
/// the cluster.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "platform.billyronks.io",
    version = "v1",
    kind = "ClusterComputeClass",
    plural = "clustercomputeclasses",
    shortname = "ccc",
    printcolumn = r#"{"name": "Default", "type": "boolean", "jsonPath": ".spec.default"}"#,
    printcolumn = r#"{"name": "Inactive", "type": "boolean", "jsonPath": ".spec.inactive"}"#,
    printcolumn = r#"{"name": "CpuScaler", "type": "number", "jsonPath": ".spec.cpuScaler"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterComputeClassSpec {
    #[serde(flatten)]
    pub class: ComputeClassParameters,
}

// =============================================================================
// ProjectComputeClass CRD
// =============================================================================

/// ProjectComputeClass sizes containers of application instances in its own
/// namespace.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "platform.billyronks.io",
    version = "v1",
    kind = "ProjectComputeClass",
    plural = "projectcomputeclasses",
    shortname = "pcc",
    printcolumn = r#"{"name": "Default", "type": "boolean", "jsonPath": ".spec.default"}"#,
    printcolumn = r#"{"name": "Inactive", "type": "boolean", "jsonPath": ".spec.inactive"}"#,
    printcolumn = r#"{"name": "CpuScaler", "type": "number", "jsonPath": ".spec.cpuScaler"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectComputeClassSpec {
    #[serde(flatten)]
    pub class: ComputeClassParameters,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Fields shared by both compute class scopes
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComputeClassParameters {
    /// Use this class when a container names no class
    #[serde(default)]
    pub default: bool,

    /// Hide this class from new resolutions
    #[serde(default)]
    pub inactive: bool,

    /// Free-form description shown to users
    #[serde(default)]
    pub description: Option<String>,

    /// CPU cores requested per GiB of memory
    #[serde(default)]
    pub cpu_scaler: Option<f64>,

    /// Memory bounds
    #[serde(default)]
    pub memory: Option<QuantityBoundsSpec>,
}

impl ClusterComputeClass {
    /// Get the name of this class
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }
}

impl ProjectComputeClass {
    /// Get the name of this class
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Project (namespace) owning this class
    pub fn project(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }
}
