//! Volume Binding Resolver
//!
//! Turns one volume request into a concrete size, access mode and backing
//! storage class, validated against the volume class that applies to it.

use crate::classes::{
    format_access_modes, AccessMode, BoundsViolation, ClassKind, ClassLookup, ClassSnapshot,
    Quantity, ResourceClass,
};
use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

// =============================================================================
// Request / Result
// =============================================================================

/// A volume as requested by the application, after overrides were applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeBindingRequest {
    /// Name of the declared volume
    pub target: String,
    pub class: Option<String>,
    /// Unparsed size literal
    pub size: Option<String>,
    pub access_mode: Option<AccessMode>,
}

impl VolumeBindingRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = Some(mode);
        self
    }

    fn resource(&self) -> String {
        format!("volume {}", self.target)
    }
}

/// A resolved volume, recorded in the application instance status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedVolumeSpec {
    /// Volume class the volume was resolved against; None when unclassed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,

    pub size: Quantity,

    pub access_mode: AccessMode,

    /// Kubernetes StorageClass to provision from; None means the cluster default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolve one volume request against a class snapshot
pub fn resolve_volume(
    request: &VolumeBindingRequest,
    snapshot: &ClassSnapshot,
    project: &str,
    config: &ResolverConfig,
) -> Result<ResolvedVolumeSpec> {
    let explicit_size = request
        .size
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_size(request, s))
        .transpose()?;

    match effective_class(request, snapshot, project)? {
        Some(class) => resolve_with_class(request, class, explicit_size, config),
        None if config.allow_unclassed => {
            let spec = ResolvedVolumeSpec {
                class: None,
                size: explicit_size.unwrap_or_else(|| config.default_volume_size.clone()),
                access_mode: request.access_mode.unwrap_or(AccessMode::ReadWriteOnce),
                storage_class_name: None,
            };
            debug!(volume = %request.target, size = %spec.size, "Resolved unclassed volume");
            Ok(spec)
        }
        None => Err(Error::ClassNotFound {
            kind: ClassKind::Volume,
            resource: request.resource(),
            class: None,
        }),
    }
}

/// Explicit class if named, otherwise the effective default
fn effective_class<'a>(
    request: &VolumeBindingRequest,
    snapshot: &'a ClassSnapshot,
    project: &str,
) -> Result<Option<&'a ResourceClass>> {
    let Some(name) = request.class.as_deref().filter(|c| !c.is_empty()) else {
        return snapshot.default_for(project, ClassKind::Volume);
    };

    match snapshot.lookup(project, ClassKind::Volume, name) {
        ClassLookup::Active(class) => Ok(Some(class)),
        ClassLookup::Inactive(_) => Err(Error::ClassInactiveOrMissing {
            kind: ClassKind::Volume,
            resource: request.resource(),
            class: name.to_string(),
        }),
        ClassLookup::Missing => Err(Error::ClassNotFound {
            kind: ClassKind::Volume,
            resource: request.resource(),
            class: Some(name.to_string()),
        }),
    }
}

fn resolve_with_class(
    request: &VolumeBindingRequest,
    class: &ResourceClass,
    explicit_size: Option<Quantity>,
    config: &ResolverConfig,
) -> Result<ResolvedVolumeSpec> {
    let policy = class.as_volume().ok_or_else(|| {
        Error::Internal(format!("class {} is not a volume class", class.name))
    })?;

    let size = explicit_size
        .or_else(|| policy.size.effective_default().cloned())
        .unwrap_or_else(|| config.default_volume_size.clone());

    match policy.size.bounds.check(&size) {
        Ok(()) => {}
        Err(BoundsViolation::OutOfRange) => {
            return Err(Error::SizeOutOfRange {
                volume: request.target.clone(),
                class: class.name.clone(),
                size: size.to_string(),
                bounds: policy.size.bounds.describe(),
            })
        }
        Err(BoundsViolation::NotAllowed) => {
            return Err(Error::SizeNotAllowed {
                volume: request.target.clone(),
                class: class.name.clone(),
                size: size.to_string(),
                allowed: policy.size.bounds.describe(),
            })
        }
    }

    let access_mode = match request.access_mode {
        Some(mode) if policy.access_modes.contains(&mode) => mode,
        Some(mode) => {
            return Err(Error::AccessModeNotAllowed {
                volume: request.target.clone(),
                class: class.name.clone(),
                mode: mode.to_string(),
                allowed: format_access_modes(&policy.access_modes),
            })
        }
        // Declaration order decides the default
        None => policy
            .access_modes
            .first()
            .copied()
            .unwrap_or(AccessMode::ReadWriteOnce),
    };

    debug!(
        volume = %request.target,
        class = %class.name,
        size = %size,
        access_mode = %access_mode,
        "Resolved volume"
    );

    Ok(ResolvedVolumeSpec {
        class: Some(class.name.clone()),
        size,
        access_mode,
        storage_class_name: policy.backing_store.clone(),
    })
}

fn parse_size(request: &VolumeBindingRequest, literal: &str) -> Result<Quantity> {
    let size = Quantity::parse(literal).map_err(|e| Error::InvalidRequest {
        resource: request.resource(),
        reason: e.to_string(),
    })?;
    if size.is_zero() {
        return Err(Error::InvalidRequest {
            resource: request.resource(),
            reason: "size must be greater than zero".to_string(),
        });
    }
    Ok(size)
}
