//! AppInstance CRD
//!
//! An application instance carries the volumes and containers declared by
//! its parsed application definition, the caller's overrides, and a status
//! holding the staged conditions plus the resolved volume and scheduling
//! specs consumed by materialization.

use crate::classes::AccessMode;
use crate::resolver::{ResolvedSchedulingSpec, ResolvedVolumeSpec};
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// AppInstance CRD
// =============================================================================

/// AppInstance is one deployed copy of an application in a project.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "platform.billyronks.io",
    version = "v1",
    kind = "AppInstance",
    plural = "appinstances",
    shortname = "app",
    status = "AppInstanceStatus",
    printcolumn = r#"{"name": "Defaults", "type": "boolean", "jsonPath": ".status.conditions[?(@.type==\"Defaults\")].success"}"#,
    printcolumn = r#"{"name": "Defined", "type": "boolean", "jsonPath": ".status.conditions[?(@.type==\"Defined\")].success"}"#,
    printcolumn = r#"{"name": "Generation", "type": "integer", "jsonPath": ".status.observedGeneration"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AppInstanceSpec {
    /// Volumes declared by the application definition
    #[serde(default)]
    pub volumes: Vec<DeclaredVolume>,

    /// Containers declared by the application definition
    #[serde(default)]
    pub containers: Vec<DeclaredContainer>,

    /// Caller-supplied volume bindings, matched to volumes by target
    #[serde(default)]
    pub volume_bindings: Vec<VolumeBinding>,

    /// Compute class per container; the "" key applies to all containers
    #[serde(default)]
    pub compute_classes: BTreeMap<String, String>,

    /// Memory per container; the "" key applies to all containers
    #[serde(default)]
    pub memory: BTreeMap<String, String>,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// A volume as declared in the application definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredVolume {
    /// Volume name
    pub name: String,

    /// Volume class
    #[serde(default)]
    pub class: Option<String>,

    /// Requested size, e.g. "10Gi"
    #[serde(default)]
    pub size: Option<String>,

    /// Requested access mode
    #[serde(default)]
    pub access_mode: Option<AccessMode>,
}

/// A container as declared in the application definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredContainer {
    /// Container name
    pub name: String,

    /// Compute class
    #[serde(default)]
    pub class: Option<String>,

    /// Requested memory, e.g. "512Mi"
    #[serde(default)]
    pub memory: Option<String>,
}

/// Caller override for one declared volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeBinding {
    /// Name of the declared volume this binding applies to
    pub target: String,

    #[serde(default)]
    pub class: Option<String>,

    #[serde(default)]
    pub size: Option<String>,

    #[serde(default)]
    pub access_mode: Option<AccessMode>,
}

// =============================================================================
// Status
// =============================================================================

/// Status of an application instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppInstanceStatus {
    /// Generation the resolved specs were computed for
    #[serde(default)]
    pub observed_generation: Option<i64>,

    /// One condition per pipeline stage
    #[serde(default)]
    pub conditions: Vec<AppCondition>,

    /// Resolved volumes keyed by volume name
    #[serde(default)]
    pub volumes: BTreeMap<String, ResolvedVolumeSpec>,

    /// Resolved scheduling keyed by container name
    #[serde(default)]
    pub scheduling: BTreeMap<String, ResolvedSchedulingSpec>,
}

/// Pipeline stage a condition reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    /// Application definition parsed and overrides assembled
    Parsed,
    /// Class defaults resolved for every volume and container
    Defaults,
    /// Every class referenced by the resolved specs still exists
    Defined,
    /// Volumes materialized
    Volumes,
    /// Scheduling specs available
    Scheduling,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionType::Parsed => write!(f, "Parsed"),
            ConditionType::Defaults => write!(f, "Defaults"),
            ConditionType::Defined => write!(f, "Defined"),
            ConditionType::Volumes => write!(f, "Volumes"),
            ConditionType::Scheduling => write!(f, "Scheduling"),
        }
    }
}

/// Condition for application instance status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppCondition {
    /// Stage this condition reports on
    pub r#type: ConditionType,

    /// Stage completed successfully
    #[serde(default)]
    pub success: bool,

    /// Stage failed
    #[serde(default)]
    pub error: bool,

    /// Human-readable message; names the failing resource and class on error
    #[serde(default)]
    pub message: Option<String>,

    /// Machine-readable reason
    #[serde(default)]
    pub reason: Option<String>,

    /// Generation this condition was computed for
    #[serde(default)]
    pub observed_generation: Option<i64>,

    /// Last time success/error flipped
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl AppInstance {
    /// Get the name of this instance
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Project (namespace) of this instance
    pub fn project(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// Current metadata generation
    pub fn generation(&self) -> Option<i64> {
        self.metadata.generation
    }

    /// Generation recorded in status, if any
    pub fn observed_generation(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.observed_generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_type_display() {
        assert_eq!(ConditionType::Defaults.to_string(), "Defaults");
        assert_eq!(ConditionType::Defined.to_string(), "Defined");
    }

    #[test]
    fn test_spec_wire_format() {
        let json = serde_json::json!({
            "volumes": [{"name": "data", "size": "10Gi", "accessMode": "ReadWriteMany"}],
            "containers": [{"name": "web", "memory": "512Mi"}],
            "volumeBindings": [{"target": "data", "class": "fast"}],
            "computeClasses": {"": "small"},
            "memory": {"web": "1Gi"}
        });
        let spec: AppInstanceSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec.volumes[0].access_mode, Some(AccessMode::ReadWriteMany));
        assert_eq!(spec.volume_bindings[0].class.as_deref(), Some("fast"));
        assert_eq!(spec.compute_classes.get(""), Some(&"small".to_string()));
        assert_eq!(spec.memory.get("web"), Some(&"1Gi".to_string()));
    }

    #[test]
    fn test_observed_generation() {
        let mut app = AppInstance::new("app", AppInstanceSpec::default());
        app.metadata.generation = Some(3);
        assert_eq!(app.generation(), Some(3));
        assert_eq!(app.observed_generation(), None);

        app.status = Some(AppInstanceStatus {
            observed_generation: Some(2),
            ..Default::default()
        });
        assert_eq!(app.observed_generation(), Some(2));
    }
}
