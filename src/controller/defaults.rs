//! Defaulting Coordinator
//!
//! Runs the volume and compute resolvers for every volume and container of
//! an application instance against one class snapshot, and records the
//! outcome on the instance's conditions.
//!
//! A resolver failure never escapes the pass: it becomes the Defaults
//! condition, sibling stages are left alone, and pruning is disabled so
//! previously materialized volumes survive a validation error. Only
//! collaborator failures (class store, internal faults) are returned to the
//! caller for retry.

use crate::classes::{ClassKind, ClassLookup, ClassSnapshot};
use crate::config::ResolverConfig;
use crate::crd::{AppInstance, AppInstanceSpec, AppInstanceStatus, ConditionType};
use crate::domain::ports::ClassSourceRef;
use crate::error::{Error, ErrorAction, Result};
use crate::metrics::{Metrics, PassResult};
use crate::resolver::{
    resolve_compute, resolve_volume, ContainerSchedulingRequest, ResolvedSchedulingSpec,
    ResolvedVolumeSpec, VolumeBindingRequest,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// =============================================================================
// Request Assembly
// =============================================================================

/// Override key applying to every container
const ALL_CONTAINERS: &str = "";

/// Every request of one instance, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionRequests {
    pub volumes: Vec<VolumeBindingRequest>,
    pub containers: Vec<ContainerSchedulingRequest>,
}

/// Build resolver requests from declared resources and caller overrides
///
/// Override values win over declared values. A per-container override wins
/// over the all-containers ("") override.
pub fn assemble_requests(spec: &AppInstanceSpec) -> Result<ResolutionRequests> {
    let mut bindings = BTreeMap::new();
    for binding in &spec.volume_bindings {
        if bindings.insert(binding.target.as_str(), binding).is_some() {
            return Err(Error::DuplicateResource {
                kind: "volume binding",
                name: binding.target.clone(),
            });
        }
    }

    let mut seen = BTreeSet::new();
    let mut volumes = Vec::with_capacity(spec.volumes.len());
    for declared in &spec.volumes {
        if !seen.insert(declared.name.as_str()) {
            return Err(Error::DuplicateResource {
                kind: "volume",
                name: declared.name.clone(),
            });
        }
        let binding = bindings.get(declared.name.as_str());
        volumes.push(VolumeBindingRequest {
            target: declared.name.clone(),
            class: binding
                .and_then(|b| b.class.clone())
                .or_else(|| declared.class.clone()),
            size: binding
                .and_then(|b| b.size.clone())
                .or_else(|| declared.size.clone()),
            access_mode: binding
                .and_then(|b| b.access_mode)
                .or(declared.access_mode),
        });
    }

    if let Some(target) = bindings.keys().find(|t| !seen.contains(*t)) {
        return Err(Error::InvalidRequest {
            resource: format!("volume binding {target}"),
            reason: format!("no volume named {target} is declared"),
        });
    }

    let mut seen = BTreeSet::new();
    let mut containers = Vec::with_capacity(spec.containers.len());
    for declared in &spec.containers {
        if !seen.insert(declared.name.as_str()) {
            return Err(Error::DuplicateResource {
                kind: "container",
                name: declared.name.clone(),
            });
        }
        let pick = |overrides: &BTreeMap<String, String>| {
            overrides
                .get(&declared.name)
                .or_else(|| overrides.get(ALL_CONTAINERS))
                .cloned()
        };
        containers.push(ContainerSchedulingRequest {
            container: declared.name.clone(),
            compute_class: pick(&spec.compute_classes).or_else(|| declared.class.clone()),
            memory: pick(&spec.memory).or_else(|| declared.memory.clone()),
        });
    }

    Ok(ResolutionRequests {
        volumes,
        containers,
    })
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolved specs of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSpecs {
    pub volumes: BTreeMap<String, ResolvedVolumeSpec>,
    pub scheduling: BTreeMap<String, ResolvedSchedulingSpec>,
}

/// Resolve every request against one snapshot
///
/// Volumes are resolved before containers; the first error aborts the pass.
pub fn resolve_all(
    requests: &ResolutionRequests,
    snapshot: &ClassSnapshot,
    project: &str,
    config: &ResolverConfig,
) -> Result<ResolvedSpecs> {
    let mut specs = ResolvedSpecs::default();
    for request in &requests.volumes {
        let spec = resolve_volume(request, snapshot, project, config)?;
        specs.volumes.insert(request.target.clone(), spec);
    }
    for request in &requests.containers {
        let spec = resolve_compute(request, snapshot, project, config)?;
        specs.scheduling.insert(request.container.clone(), spec);
    }
    Ok(specs)
}

/// Check that every class named by resolved specs is still usable
pub fn verify_bound_classes(
    status: &AppInstanceStatus,
    snapshot: &ClassSnapshot,
    project: &str,
) -> Result<()> {
    let volume_refs = status
        .volumes
        .iter()
        .filter_map(|(name, spec)| Some((ClassKind::Volume, format!("volume {name}"), spec.class.as_deref()?)));
    let compute_refs = status.scheduling.iter().filter_map(|(name, spec)| {
        Some((
            ClassKind::Compute,
            format!("container {name}"),
            spec.compute_class.as_deref()?,
        ))
    });

    for (kind, resource, class) in volume_refs.chain(compute_refs) {
        match snapshot.lookup(project, kind, class) {
            ClassLookup::Active(_) => {}
            ClassLookup::Inactive(_) | ClassLookup::Missing => {
                return Err(Error::ClassInactiveOrMissing {
                    kind,
                    resource,
                    class: class.to_string(),
                })
            }
        }
    }
    Ok(())
}

// =============================================================================
// Coordinator
// =============================================================================

/// What a pass decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassOutcome {
    /// Resolution ran (generation was not yet observed)
    pub ran: bool,
    /// Resolution and the defined check both succeeded on the current state
    pub converged: bool,
    /// Stale materialized resources may be removed
    pub prune_allowed: bool,
    /// Retry the instance after this delay even without a change
    pub retry_after: Option<Duration>,
}

/// Coordinates resolution passes for application instances
pub struct DefaultingCoordinator {
    classes: ClassSourceRef,
    config: ResolverConfig,
    metrics: Arc<Metrics>,
}

impl DefaultingCoordinator {
    pub fn new(classes: ClassSourceRef, config: ResolverConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            classes,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Run one pass for an instance, updating `status` in place
    ///
    /// Resolution only runs when the instance generation differs from the
    /// observed generation. The defined check runs on every pass that did
    /// not just record a resolution failure. Both use the same snapshot.
    pub fn run_pass(&self, app: &AppInstance, status: &mut AppInstanceStatus) -> Result<PassOutcome> {
        let snapshot = self.classes.snapshot()?;
        self.metrics.observe_classes(&snapshot);

        let mut outcome = self.calculate(app, status, &snapshot)?;
        if outcome.ran && !outcome.converged {
            // The failing stage already names the cause
            return Ok(outcome);
        }

        if let Err(e) = verify_bound_classes(status, &snapshot, app.project()) {
            warn!(
                app = %app.name(),
                namespace = %app.project(),
                error = %e,
                "Resolved specs reference an unusable class"
            );
            self.metrics.record_defined_failure();
            status.set_error(ConditionType::Defined, app.generation(), &e);
            outcome.prune_allowed = false;
            outcome.converged = false;
        } else {
            status.set_success(ConditionType::Defined, app.generation());
        }

        Ok(outcome)
    }

    /// Resolve defaults for an instance against a snapshot
    ///
    /// Validation failures are recorded on the Parsed or Defaults condition
    /// and reported through the outcome, never returned as errors.
    pub fn calculate(
        &self,
        app: &AppInstance,
        status: &mut AppInstanceStatus,
        snapshot: &ClassSnapshot,
    ) -> Result<PassOutcome> {
        let started = Instant::now();
        let generation = app.generation();

        if generation.is_some() && generation == status.observed_generation {
            debug!(app = %app.name(), generation = ?generation, "Generation already resolved");
            self.metrics.record_pass(PassResult::Skipped, started.elapsed());
            let converged = status.is_success(ConditionType::Defaults);
            return Ok(PassOutcome {
                ran: false,
                converged,
                prune_allowed: converged,
                retry_after: None,
            });
        }

        let requests = match assemble_requests(&app.spec) {
            Ok(requests) => {
                status.set_success(ConditionType::Parsed, generation);
                requests
            }
            Err(e) => return Ok(self.record_failure(app, status, ConditionType::Parsed, e, started)),
        };

        match resolve_all(&requests, snapshot, app.project(), &self.config) {
            Ok(specs) => {
                status.volumes = specs.volumes;
                status.scheduling = specs.scheduling;
                status.observed_generation = generation;
                status.set_success(ConditionType::Defaults, generation);

                info!(
                    app = %app.name(),
                    namespace = %app.project(),
                    generation = ?generation,
                    snapshot = snapshot.version(),
                    volumes = status.volumes.len(),
                    containers = status.scheduling.len(),
                    "Resolved defaults"
                );
                self.metrics.record_pass(PassResult::Resolved, started.elapsed());

                Ok(PassOutcome {
                    ran: true,
                    converged: true,
                    prune_allowed: true,
                    retry_after: None,
                })
            }
            Err(e) if e.is_validation() => {
                Ok(self.record_failure(app, status, ConditionType::Defaults, e, started))
            }
            Err(e) => Err(e),
        }
    }

    /// Record a validation failure on one stage and disable pruning
    ///
    /// Previously resolved specs are left as they were.
    fn record_failure(
        &self,
        app: &AppInstance,
        status: &mut AppInstanceStatus,
        stage: ConditionType,
        err: Error,
        started: Instant,
    ) -> PassOutcome {
        warn!(
            app = %app.name(),
            namespace = %app.project(),
            generation = ?app.generation(),
            stage = %stage,
            error = %err,
            "Resolution failed"
        );
        status.set_error(stage, app.generation(), &err);
        self.metrics.record_error(err.reason());
        self.metrics.record_pass(PassResult::Failed, started.elapsed());

        let retry_after = match err.action() {
            ErrorAction::RequeueAfter(delay) => Some(delay),
            _ => None,
        };
        PassOutcome {
            ran: true,
            converged: false,
            prune_allowed: false,
            retry_after,
        }
    }
}
