//! Controller Module
//!
//! Reconciles `AppInstance` resources: runs the defaulting coordinator,
//! records conditions and gates volume materialization on them.

pub mod conditions;
pub mod defaults;
pub mod kube;
pub mod reconciler;

pub use conditions::{SCHEDULING_PREREQUISITES, VOLUME_PREREQUISITES};
pub use defaults::{
    assemble_requests, resolve_all, verify_bound_classes, DefaultingCoordinator, PassOutcome,
    ResolutionRequests, ResolvedSpecs,
};
pub use self::kube::{run_class_watchers, KubePvcMaterializer, KubeStatusWriter, WatchedClass};
pub use reconciler::{affected_apps, error_policy, reconcile, Context};
