//! Resource Class Model
//!
//! The validated, scope-aware form of a class. Conversion from the CRD
//! types enforces every creation-time invariant, so resolvers never see a
//! class with unparseable or contradictory bounds.

use super::policy::{AccessMode, QuantityPolicy};
use crate::crd::{
    ClusterComputeClass, ClusterVolumeClass, ComputeClassParameters, ProjectComputeClass,
    ProjectVolumeClass, VolumeClassParameters,
};
use crate::error::{Error, Result};
use serde::Serialize;

// =============================================================================
// Kind and Scope
// =============================================================================

/// Kind of resource a class governs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassKind {
    Volume,
    Compute,
}

impl std::fmt::Display for ClassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassKind::Volume => write!(f, "volume"),
            ClassKind::Compute => write!(f, "compute"),
        }
    }
}

/// Visibility of a class
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClassScope {
    /// Visible to every project
    Cluster,
    /// Visible only inside one project
    Project(String),
}

impl ClassScope {
    /// Whether this scope is visible from the given project
    pub fn is_visible_from(&self, project: &str) -> bool {
        match self {
            ClassScope::Cluster => true,
            ClassScope::Project(p) => p == project,
        }
    }

    pub fn is_project(&self) -> bool {
        matches!(self, ClassScope::Project(_))
    }

    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            ClassScope::Cluster => "cluster",
            ClassScope::Project(_) => "project",
        }
    }
}

impl std::fmt::Display for ClassScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassScope::Cluster => write!(f, "cluster"),
            ClassScope::Project(p) => write!(f, "project {}", p),
        }
    }
}

// =============================================================================
// Class Policies
// =============================================================================

/// Volume class policy
#[derive(Debug, Clone, PartialEq)]
pub struct VolumePolicy {
    /// Storage class backing volumes of this class; None means the cluster default
    pub backing_store: Option<String>,
    /// Allowed access modes in declaration order, never empty
    pub access_modes: Vec<AccessMode>,
    pub size: QuantityPolicy,
}

/// Compute class policy
#[derive(Debug, Clone, PartialEq)]
pub struct ComputePolicy {
    /// CPU cores per GiB of memory
    pub cpu_scaler: f64,
    pub memory: QuantityPolicy,
}

/// Kind-specific part of a class
#[derive(Debug, Clone, PartialEq)]
pub enum ClassSpec {
    Volume(VolumePolicy),
    Compute(ComputePolicy),
}

// =============================================================================
// Resource Class
// =============================================================================

/// A validated resource class
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceClass {
    pub name: String,
    pub scope: ClassScope,
    /// Inactive classes are diagnosable but never used for new resolutions
    pub active: bool,
    pub is_default: bool,
    pub description: Option<String>,
    pub spec: ClassSpec,
}

impl ResourceClass {
    pub fn kind(&self) -> ClassKind {
        match self.spec {
            ClassSpec::Volume(_) => ClassKind::Volume,
            ClassSpec::Compute(_) => ClassKind::Compute,
        }
    }

    pub fn as_volume(&self) -> Option<&VolumePolicy> {
        match &self.spec {
            ClassSpec::Volume(policy) => Some(policy),
            ClassSpec::Compute(_) => None,
        }
    }

    pub fn as_compute(&self) -> Option<&ComputePolicy> {
        match &self.spec {
            ClassSpec::Compute(policy) => Some(policy),
            ClassSpec::Volume(_) => None,
        }
    }

    /// Build a volume class, enforcing creation-time invariants
    pub fn volume(name: &str, scope: ClassScope, params: &VolumeClassParameters) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidClass {
            kind: ClassKind::Volume,
            name: name.to_string(),
            reason,
        };

        let mut access_modes = Vec::with_capacity(params.allowed_access_modes.len());
        for mode in &params.allowed_access_modes {
            if access_modes.contains(mode) {
                return Err(invalid(format!("access mode {mode} is listed more than once")));
            }
            access_modes.push(*mode);
        }
        if access_modes.is_empty() {
            access_modes.push(AccessMode::ReadWriteOnce);
        }

        let size = match &params.size {
            Some(spec) => QuantityPolicy::from_spec(spec).map_err(|e| invalid(format!("size {e}")))?,
            None => QuantityPolicy::default(),
        };

        Ok(Self {
            name: name.to_string(),
            scope,
            active: !params.inactive,
            is_default: params.default,
            description: params.description.clone(),
            spec: ClassSpec::Volume(VolumePolicy {
                backing_store: params
                    .storage_class_name
                    .clone()
                    .filter(|s| !s.is_empty()),
                access_modes,
                size,
            }),
        })
    }

    /// Build a compute class, enforcing creation-time invariants
    pub fn compute(name: &str, scope: ClassScope, params: &ComputeClassParameters) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidClass {
            kind: ClassKind::Compute,
            name: name.to_string(),
            reason,
        };

        let cpu_scaler = params.cpu_scaler.unwrap_or(0.0);
        if !cpu_scaler.is_finite() || cpu_scaler < 0.0 {
            return Err(invalid(format!(
                "cpuScaler {cpu_scaler} must be a finite number >= 0"
            )));
        }

        let memory = match &params.memory {
            Some(spec) => {
                QuantityPolicy::from_spec(spec).map_err(|e| invalid(format!("memory {e}")))?
            }
            None => QuantityPolicy::default(),
        };

        Ok(Self {
            name: name.to_string(),
            scope,
            active: !params.inactive,
            is_default: params.default,
            description: params.description.clone(),
            spec: ClassSpec::Compute(ComputePolicy { cpu_scaler, memory }),
        })
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl TryFrom<&ClusterVolumeClass> for ResourceClass {
    type Error = Error;

    fn try_from(crd: &ClusterVolumeClass) -> Result<Self> {
        ResourceClass::volume(crd.name(), ClassScope::Cluster, &crd.spec.class)
    }
}

impl TryFrom<&ProjectVolumeClass> for ResourceClass {
    type Error = Error;

    fn try_from(crd: &ProjectVolumeClass) -> Result<Self> {
        ResourceClass::volume(
            crd.name(),
            ClassScope::Project(crd.project().to_string()),
            &crd.spec.class,
        )
    }
}

impl TryFrom<&ClusterComputeClass> for ResourceClass {
    type Error = Error;

    fn try_from(crd: &ClusterComputeClass) -> Result<Self> {
        ResourceClass::compute(crd.name(), ClassScope::Cluster, &crd.spec.class)
    }
}

impl TryFrom<&ProjectComputeClass> for ResourceClass {
    type Error = Error;

    fn try_from(crd: &ProjectComputeClass) -> Result<Self> {
        ResourceClass::compute(
            crd.name(),
            ClassScope::Project(crd.project().to_string()),
            &crd.spec.class,
        )
    }
}
