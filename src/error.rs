//! Error types for the Resource Class Operator
//!
//! Validation errors produced by the resolvers are terminal until the
//! application's declared request (or the class set) changes. Collaborator
//! errors (class store, status writes, materialization) are transient and
//! handed back to the controller runtime for retry with backoff.

use crate::classes::ClassKind;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Resolution (validation) Errors
    // =========================================================================
    #[error("{kind} class {} for {resource} was not found", .class.as_deref().unwrap_or("<default>"))]
    ClassNotFound {
        kind: ClassKind,
        resource: String,
        class: Option<String>,
    },

    #[error("{kind} class {class} referenced by {resource} is inactive or no longer exists")]
    ClassInactiveOrMissing {
        kind: ClassKind,
        resource: String,
        class: String,
    },

    #[error("volume {volume}: size {size} is outside {bounds} allowed by volume class {class}")]
    SizeOutOfRange {
        volume: String,
        class: String,
        size: String,
        bounds: String,
    },

    #[error("volume {volume}: size {size} is not one of {allowed} allowed by volume class {class}")]
    SizeNotAllowed {
        volume: String,
        class: String,
        size: String,
        allowed: String,
    },

    #[error("container {container}: memory {memory} is outside {bounds} allowed by compute class {class}")]
    MemoryOutOfRange {
        container: String,
        class: String,
        memory: String,
        bounds: String,
    },

    #[error("container {container}: memory {memory} is not one of {allowed} allowed by compute class {class}")]
    MemoryNotAllowed {
        container: String,
        class: String,
        memory: String,
        allowed: String,
    },

    #[error("container {container}: memory {memory} exceeds the workload maximum {maximum}")]
    MemoryExceedsMaximum {
        container: String,
        memory: String,
        maximum: String,
    },

    #[error("volume {volume}: access mode {mode} is not one of {allowed} allowed by volume class {class}")]
    AccessModeNotAllowed {
        volume: String,
        class: String,
        mode: String,
        allowed: String,
    },

    #[error("multiple default {kind} classes visible in {scope}: {}", .classes.join(", "))]
    AmbiguousDefault {
        kind: ClassKind,
        scope: String,
        classes: Vec<String>,
    },

    #[error("{resource}: {reason}")]
    InvalidRequest { resource: String, reason: String },

    #[error("{kind} {name} is declared more than once")]
    DuplicateResource { kind: &'static str, name: String },

    // =========================================================================
    // Class Definition Errors
    // =========================================================================
    #[error("invalid quantity {value:?}: {reason}")]
    InvalidQuantity { value: String, reason: String },

    #[error("invalid {kind} class {name}: {reason}")]
    InvalidClass {
        kind: ClassKind,
        name: String,
        reason: String,
    },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Class store unavailable: {0}")]
    ClassStoreUnavailable(String),

    #[error("Status write failed for {name}: {reason}")]
    StatusWrite { name: String, reason: String },

    #[error("Materialization failed for {resource}: {reason}")]
    Materialization { resource: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Collaborators - retry with backoff
            Error::Kube(_)
            | Error::ClassStoreUnavailable(_)
            | Error::StatusWrite { .. }
            | Error::Materialization { .. } => ErrorAction::RequeueWithBackoff,

            // Two defaults can only be fixed by an administrator
            Error::AmbiguousDefault { .. } => ErrorAction::RequeueAfter(Duration::from_secs(300)),

            Error::Internal(_) => ErrorAction::RequeueWithBackoff,

            // Validation and configuration - wait for a change
            _ => ErrorAction::NoRequeue,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is a local validation failure
    ///
    /// Validation failures are recorded on the Defaults condition and never
    /// surface to the controller runtime.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::ClassNotFound { .. }
                | Error::ClassInactiveOrMissing { .. }
                | Error::SizeOutOfRange { .. }
                | Error::SizeNotAllowed { .. }
                | Error::MemoryOutOfRange { .. }
                | Error::MemoryNotAllowed { .. }
                | Error::MemoryExceedsMaximum { .. }
                | Error::AccessModeNotAllowed { .. }
                | Error::AmbiguousDefault { .. }
                | Error::InvalidRequest { .. }
                | Error::DuplicateResource { .. }
                | Error::InvalidQuantity { .. }
                | Error::InvalidClass { .. }
        )
    }

    /// Short machine-readable reason, used for condition reasons and metric labels
    pub fn reason(&self) -> &'static str {
        match self {
            Error::ClassNotFound { .. } => "ClassNotFound",
            Error::ClassInactiveOrMissing { .. } => "ClassInactiveOrMissing",
            Error::SizeOutOfRange { .. } => "SizeOutOfRange",
            Error::SizeNotAllowed { .. } => "SizeNotAllowed",
            Error::MemoryOutOfRange { .. } => "MemoryOutOfRange",
            Error::MemoryNotAllowed { .. } => "MemoryNotAllowed",
            Error::MemoryExceedsMaximum { .. } => "MemoryExceedsMaximum",
            Error::AccessModeNotAllowed { .. } => "AccessModeNotAllowed",
            Error::AmbiguousDefault { .. } => "AmbiguousDefault",
            Error::InvalidRequest { .. } => "InvalidRequest",
            Error::DuplicateResource { .. } => "DuplicateResource",
            Error::InvalidQuantity { .. } => "InvalidQuantity",
            Error::InvalidClass { .. } => "InvalidClass",
            Error::Kube(_) => "KubeError",
            Error::ClassStoreUnavailable(_) => "ClassStoreUnavailable",
            Error::StatusWrite { .. } => "StatusWriteFailed",
            Error::Materialization { .. } => "MaterializationFailed",
            Error::Configuration(_) => "Configuration",
            Error::Internal(_) => "Internal",
            Error::JsonParse(_) | Error::YamlParse(_) => "Serialization",
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
