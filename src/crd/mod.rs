//! Custom Resource Definitions for the Resource Class Operator
//!
//! This module contains all CRD types:
//! - ClusterVolumeClass / ProjectVolumeClass: volume size and access policy
//! - ClusterComputeClass / ProjectComputeClass: container memory and CPU policy
//! - AppInstance: application instance with resolved specs and staged conditions

pub mod app_instance;
pub mod compute_class;
pub mod volume_class;

pub use app_instance::*;
pub use compute_class::*;
pub use volume_class::*;

use kube::CustomResourceExt;

/// All CRDs served by the operator, rendered as one multi-document YAML stream
pub fn crds_yaml() -> crate::error::Result<String> {
    let crds = [
        ClusterVolumeClass::crd(),
        ProjectVolumeClass::crd(),
        ClusterComputeClass::crd(),
        ProjectComputeClass::crd(),
        AppInstance::crd(),
    ];
    let mut out = String::new();
    for crd in &crds {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(crd)?);
    }
    Ok(out)
}
