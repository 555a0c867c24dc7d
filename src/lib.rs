//! Resource Class Operator
//!
//! A Kubernetes operator that resolves the abstract resource requests of
//! application instances (volumes and containers) into concrete, validated
//! specs using administrator-defined resource classes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                     AppInstance Reconciler                           │
//! │   generation change / class event ──► Defaulting Coordinator         │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐   ┌──────────────────┐   ┌──────────────────┐   │
//! │  │ Volume Binding  │   │  Compute Class   │   │    Condition     │   │
//! │  │    Resolver     │   │    Resolver      │   │  State Machine   │   │
//! │  └────────┬────────┘   └────────┬─────────┘   └────────┬─────────┘   │
//! │           └──────────┬──────────┘                      │             │
//! │            ┌─────────┴──────────┐          ┌───────────┴──────────┐  │
//! │            │   Class Registry   │          │  Materialization     │  │
//! │            │ (versioned snapshot)│         │  gate (PVC apply)    │  │
//! │            └─────────┬──────────┘          └──────────────────────┘  │
//! ├──────────────────────┴───────────────────────────────────────────────┤
//! │  Cluster/Project Volume and Compute Class watchers                   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`classes`]: Quantities, class policies, class model and registry
//! - [`resolver`]: Volume and compute resolvers
//! - [`controller`]: Defaulting coordinator, conditions and reconciler
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Collaborator ports
//! - [`api`]: Probes, metrics, diagnostics and admission webhook
//! - [`error`]: Error types and handling

pub mod api;
pub mod classes;
pub mod config;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod resolver;

// Re-export commonly used types
pub use api::{ApiServer, RestRouter};

pub use classes::{
    AccessMode, ClassEvent, ClassKey, ClassKind, ClassRegistry, ClassScope, ClassSnapshot,
    Quantity, QuantityBounds, QuantityPolicy, ResourceClass,
};

pub use config::{OperatorConfig, ResolverConfig};

pub use controller::{Context, DefaultingCoordinator, PassOutcome};

pub use crd::{
    AppInstance, AppInstanceSpec, AppInstanceStatus, ClusterComputeClass, ClusterVolumeClass,
    ConditionType, ProjectComputeClass, ProjectVolumeClass,
};

pub use domain::ports::{ClassSource, Materializer, StatusWriter};

pub use error::{Error, ErrorAction, Result};

pub use metrics::Metrics;

pub use resolver::{
    resolve_compute, resolve_volume, ContainerSchedulingRequest, ResolvedSchedulingSpec,
    ResolvedVolumeSpec, VolumeBindingRequest,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
