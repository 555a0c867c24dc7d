//! Domain Ports - Collaborator boundaries of the defaulting engine
//!
//! The resolvers and the coordinator only talk to the outside world through
//! these traits: a source of class snapshots, a sink for instance status and
//! the stage that materializes resolved volumes. Adapters in
//! `controller::kube` implement them against the Kubernetes API; tests use
//! in-memory implementations.

use crate::classes::ClassSnapshot;
use crate::crd::{AppInstance, AppInstanceStatus};
use crate::error::Result;
use crate::resolver::ResolvedVolumeSpec;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Class Source Port
// =============================================================================

/// Port for reading the cached class set
///
/// Returns a snapshot that stays consistent for the whole resolution pass.
/// Fails only when the cache cannot serve (e.g. not yet synced).
pub trait ClassSource: Send + Sync {
    fn snapshot(&self) -> Result<Arc<ClassSnapshot>>;
}

// =============================================================================
// Status Writer Port
// =============================================================================

/// Port for persisting application instance status
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Replace the status of an instance
    async fn write_status(&self, app: &AppInstance, status: &AppInstanceStatus) -> Result<()>;
}

// =============================================================================
// Materializer Port
// =============================================================================

/// What one materialization call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeOutcome {
    /// Volumes created or updated
    pub applied: usize,
    /// Stale volumes removed
    pub pruned: usize,
}

/// Port for provisioning resolved volumes
#[async_trait]
pub trait Materializer: Send + Sync {
    /// Create or update the volumes of an instance
    ///
    /// Volumes that belong to the instance but are absent from `volumes` are
    /// removed only when `prune` is set.
    async fn apply_volumes(
        &self,
        app: &AppInstance,
        volumes: &BTreeMap<String, ResolvedVolumeSpec>,
        prune: bool,
    ) -> Result<MaterializeOutcome>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClassSourceRef = Arc<dyn ClassSource>;
pub type StatusWriterRef = Arc<dyn StatusWriter>;
pub type MaterializerRef = Arc<dyn Materializer>;
