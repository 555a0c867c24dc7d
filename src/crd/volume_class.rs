//! Volume Class CRDs
//!
//! ClusterVolumeClass applies to every project; ProjectVolumeClass lives in
//! a project namespace and shadows a cluster class of the same name.

use crate::classes::AccessMode;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// ClusterVolumeClass CRD
// =============================================================================

/// ClusterVolumeClass bounds and defaults the volumes of every application
/// instance in the cluster.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "platform.billyronks.io",
    version = "v1",
    kind = "ClusterVolumeClass",
    plural = "clustervolumeclasses",
    shortname = "cvc",
    printcolumn = r#"{"name": "Default", "type": "boolean", "jsonPath": ".spec.default"}"#,
    printcolumn = r#"{"name": "Inactive", "type": "boolean", "jsonPath": ".spec.inactive"}"#,
    printcolumn = r#"{"name": "StorageClass", "type": "string", "jsonPath": ".spec.storageClassName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterVolumeClassSpec {
    #[serde(flatten)]
    pub class: VolumeClassParameters,
}

// =============================================================================
// ProjectVolumeClass CRD
// =============================================================================

/// ProjectVolumeClass bounds and defaults the volumes of application
/// instances in its own namespace.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "platform.billyronks.io",
    version = "v1",
    kind = "ProjectVolumeClass",
    plural = "projectvolumeclasses",
    shortname = "pvolc",
    printcolumn = r#"{"name": "Default", "type": "boolean", "jsonPath": ".spec.default"}"#,
    printcolumn = r#"{"name": "Inactive", "type": "boolean", "jsonPath": ".spec.inactive"}"#,
    printcolumn = r#"{"name": "StorageClass", "type": "string", "jsonPath": ".spec.storageClassName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectVolumeClassSpec {
    #[serde(flatten)]
    pub class: VolumeClassParameters,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Fields shared by both volume class scopes
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClassParameters {
    /// Use this class when a volume names no class
    #[serde(default)]
    pub default: bool,

    /// Hide this class from new resolutions
    #[serde(default)]
    pub inactive: bool,

    /// Free-form description shown to users
    #[serde(default)]
    pub description: Option<String>,

    /// Kubernetes StorageClass backing volumes of this class
    #[serde(default)]
    pub storage_class_name: Option<String>,

    /// Allowed access modes; the first entry is the default
    #[serde(default)]
    pub allowed_access_modes: Vec<AccessMode>,

    /// Size bounds
    #[serde(default)]
    pub size: Option<QuantityBoundsSpec>,
}

/// Raw quantity bounds as written by an administrator
///
/// Either `min`/`max` or `values` may be set, not both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuantityBoundsSpec {
    /// Smallest allowed quantity (inclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,

    /// Largest allowed quantity (inclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,

    /// Quantity used when the request omits one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Exhaustive list of allowed quantities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl ClusterVolumeClass {
    /// Get the name of this class
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }
}

impl ProjectVolumeClass {
    /// Get the name of this class
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Project (namespace) owning this class
    pub fn project(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_parameters_wire_format() {
        let json = serde_json::json!({
            "default": true,
            "storageClassName": "fast-ssd",
            "allowedAccessModes": ["ReadWriteOnce", "ReadOnlyMany"],
            "size": {"min": "1Gi", "max": "100Gi", "default": "10Gi"}
        });
        let spec: ClusterVolumeClassSpec = serde_json::from_value(json).unwrap();
        assert!(spec.class.default);
        assert!(!spec.class.inactive);
        assert_eq!(spec.class.storage_class_name.as_deref(), Some("fast-ssd"));
        assert_eq!(
            spec.class.allowed_access_modes,
            vec![AccessMode::ReadWriteOnce, AccessMode::ReadOnlyMany]
        );
        let size = spec.class.size.unwrap();
        assert_eq!(size.max.as_deref(), Some("100Gi"));
        assert!(size.values.is_empty());
    }

    #[test]
    fn test_crd_scopes() {
        assert_eq!(ClusterVolumeClass::crd().spec.scope, "Cluster");
        assert_eq!(ProjectVolumeClass::crd().spec.scope, "Namespaced");
    }
}
