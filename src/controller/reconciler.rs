//! AppInstance Reconciler
//!
//! Drives one defaulting pass per reconcile, gates volume materialization
//! on the instance's conditions and persists the resulting status.

use crate::classes::{ClassEvent, ClassRegistry};
use crate::controller::conditions::{SCHEDULING_PREREQUISITES, VOLUME_PREREQUISITES};
use crate::controller::defaults::{DefaultingCoordinator, PassOutcome};
use crate::crd::{AppInstance, AppInstanceStatus, ConditionType};
use crate::domain::ports::{MaterializerRef, StatusWriterRef};
use crate::error::{Error, ErrorAction, Result};
use futures::stream::{self, Stream, StreamExt};
use kube::runtime::controller::Action;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::Api;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

/// Watch timeout, kept below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Delay before retrying a collaborator failure
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

// =============================================================================
// Context
// =============================================================================

/// Shared state for reconciles
pub struct Context {
    pub coordinator: DefaultingCoordinator,
    pub status_writer: StatusWriterRef,
    pub materializer: MaterializerRef,
    /// Periodic requeue for converged instances
    pub resync_interval: Duration,
}

impl Context {
    pub fn new(
        coordinator: DefaultingCoordinator,
        status_writer: StatusWriterRef,
        materializer: MaterializerRef,
        resync_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            status_writer,
            materializer,
            resync_interval,
        })
    }
}

// =============================================================================
// Reconcile
// =============================================================================

/// Reconcile one application instance
pub async fn reconcile(app: Arc<AppInstance>, ctx: Arc<Context>) -> Result<Action> {
    let previous = app.status.clone().unwrap_or_default();
    let mut status = previous.clone();

    let outcome = ctx.coordinator.run_pass(&app, &mut status)?;
    let materialized = materialize_volumes(&app, &mut status, &outcome, &ctx).await;
    record_scheduling(&app, &mut status);

    if status != previous {
        ctx.status_writer.write_status(&app, &status).await?;
        debug!(app = %app.name(), namespace = %app.project(), "Status written");
    }
    materialized?;

    Ok(next_action(&outcome, ctx.resync_interval))
}

/// Hand resolved volumes to the materializer once every prerequisite holds
///
/// A blocked stage leaves the Volumes condition untouched.
async fn materialize_volumes(
    app: &AppInstance,
    status: &mut AppInstanceStatus,
    outcome: &PassOutcome,
    ctx: &Context,
) -> Result<()> {
    if !status.prerequisites_met(VOLUME_PREREQUISITES) {
        debug!(
            app = %app.name(),
            namespace = %app.project(),
            blocked_by = ?status.first_failure(VOLUME_PREREQUISITES).map(|c| c.r#type),
            "Volume materialization gated"
        );
        return Ok(());
    }

    match ctx
        .materializer
        .apply_volumes(app, &status.volumes, outcome.prune_allowed)
        .await
    {
        Ok(result) => {
            if result.applied > 0 || result.pruned > 0 {
                info!(
                    app = %app.name(),
                    namespace = %app.project(),
                    applied = result.applied,
                    pruned = result.pruned,
                    "Volumes materialized"
                );
            }
            status.set_success(ConditionType::Volumes, app.generation());
            Ok(())
        }
        Err(e) => {
            warn!(app = %app.name(), namespace = %app.project(), error = %e, "Volume materialization failed");
            status.set_error(ConditionType::Volumes, app.generation(), &e);
            Err(e)
        }
    }
}

/// Mark scheduling specs available once every prerequisite holds
fn record_scheduling(app: &AppInstance, status: &mut AppInstanceStatus) {
    if status.prerequisites_met(SCHEDULING_PREREQUISITES) {
        status.set_success(ConditionType::Scheduling, app.generation());
    }
}

/// Requeue policy after a pass that did not fail
pub fn next_action(outcome: &PassOutcome, resync_interval: Duration) -> Action {
    match outcome.retry_after {
        Some(delay) => Action::requeue(delay),
        None => Action::requeue(resync_interval),
    }
}

/// Map a reconcile failure to a requeue policy
pub fn error_policy(app: Arc<AppInstance>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        app = %app.name(),
        namespace = %app.project(),
        error = %error,
        "Reconciliation failed"
    );

    match error.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(ERROR_REQUEUE),
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

// =============================================================================
// Class Change Fan-out
// =============================================================================

/// Instances to reconcile again after a class change
///
/// A project class only affects instances in its own project.
pub fn affected_apps(event: &ClassEvent, apps: &[Arc<AppInstance>]) -> Vec<ObjectRef<AppInstance>> {
    apps.iter()
        .filter(|app| event.affected_project().map_or(true, |p| app.project() == p))
        .map(|app| ObjectRef::from_obj(app.as_ref()))
        .collect()
}

/// Stream of instances to requeue, fed by registry events
///
/// Lagging behind the registry requeues every instance.
fn class_triggers(
    events: broadcast::Receiver<ClassEvent>,
    store: Store<AppInstance>,
) -> impl Stream<Item = ObjectRef<AppInstance>> + Send + 'static {
    stream::unfold(events, |mut events| async move {
        match events.recv().await {
            Ok(event) => Some((Some(event), events)),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Class events lagged, requeueing every instance");
                Some((None, events))
            }
            Err(RecvError::Closed) => None,
        }
    })
    .flat_map(move |event| {
        let apps = store.state();
        let refs = match event {
            Some(event) => {
                let refs = affected_apps(&event, &apps);
                debug!(
                    kind = %event.kind(),
                    class = ?event.class_name(),
                    affected = refs.len(),
                    "Class change fan-out"
                );
                refs
            }
            None => apps.iter().map(|app| ObjectRef::from_obj(app.as_ref())).collect(),
        };
        stream::iter(refs)
    })
}

// =============================================================================
// Runner
// =============================================================================

/// Run the AppInstance controller until shutdown
pub async fn run(apps: Api<AppInstance>, registry: Arc<ClassRegistry>, ctx: Arc<Context>) {
    let controller = Controller::new(apps, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS));
    let triggers = class_triggers(registry.subscribe(), controller.store());

    info!("Starting AppInstance controller");
    controller
        .reconcile_on(triggers)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            match result {
                Ok((obj, action)) => debug!(app = %obj.name, ?action, "Reconciled"),
                Err(e) => debug!(error = ?e, "Reconcile dispatch failed"),
            }
            futures::future::ready(())
        })
        .await;
    info!("AppInstance controller stopped");
}
