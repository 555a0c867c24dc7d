//! Admission Webhook
//!
//! Validating webhook for the four class kinds and for application
//! instances. A class that breaks a creation-time invariant, or that would
//! become a second default at its scope, is denied with the same message
//! the registry would report. An application instance is denied when its
//! requests do not resolve against the current classes.

use super::rest::AppState;
use crate::classes::{ClassSnapshot, ResourceClass};
use crate::config::ResolverConfig;
use crate::controller::defaults::{assemble_requests, resolve_all};
use crate::crd::{
    AppInstance, ClusterComputeClass, ClusterVolumeClass, ProjectComputeClass, ProjectVolumeClass,
};
use crate::domain::ports::ClassSource;
use crate::error::{Error, Result};
use axum::extract::State;
use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info};

/// Handle a validating admission review
pub async fn validate_handler(
    State(state): State<AppState>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let snapshot = match state.registry.snapshot() {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            debug!(uid = %req.uid, error = %e, "Class cache not ready, checking objects alone");
            None
        }
    };

    Json(review(&req, snapshot.as_deref(), &state.config).into_review())
}

/// Decide one admission request
fn review(
    req: &AdmissionRequest<DynamicObject>,
    snapshot: Option<&ClassSnapshot>,
    config: &ResolverConfig,
) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);

    let Some(obj) = &req.object else {
        debug!(uid = %req.uid, "No object in request, allowing");
        return response;
    };

    let object = match serde_json::to_value(obj) {
        Ok(object) => object,
        Err(e) => return response.deny(format!("unreadable object: {e}")),
    };

    let check = Admission { snapshot, config };
    match check.validate(&req.kind.kind, req.namespace.as_deref(), object) {
        Ok(()) => response,
        Err(e) => {
            info!(
                uid = %req.uid,
                kind = %req.kind.kind,
                name = %req.name,
                error = %e,
                "Denying object"
            );
            response.deny(e.to_string())
        }
    }
}

/// Admission checks against the class cache
///
/// Without a snapshot only the checks that need no other object run.
pub struct Admission<'a> {
    pub snapshot: Option<&'a ClassSnapshot>,
    pub config: &'a ResolverConfig,
}

impl Admission<'_> {
    /// Validate an object by kind; other kinds pass through
    pub fn validate(&self, kind: &str, namespace: Option<&str>, object: Value) -> Result<()> {
        match kind {
            "ClusterVolumeClass" => self.class::<ClusterVolumeClass>(object),
            "ProjectVolumeClass" => self.class::<ProjectVolumeClass>(object),
            "ClusterComputeClass" => self.class::<ClusterComputeClass>(object),
            "ProjectComputeClass" => self.class::<ProjectComputeClass>(object),
            "AppInstance" => self.app(namespace, object),
            _ => Ok(()),
        }
    }

    fn class<K>(&self, object: Value) -> Result<()>
    where
        K: DeserializeOwned,
        for<'a> ResourceClass: TryFrom<&'a K, Error = Error>,
    {
        let crd: K = serde_json::from_value(object)?;
        let class = ResourceClass::try_from(&crd)?;

        let Some(snapshot) = self.snapshot else {
            return Ok(());
        };
        match snapshot.conflicting_default(&class) {
            Some(existing) => Err(Error::AmbiguousDefault {
                kind: class.kind(),
                scope: class.scope.to_string(),
                classes: vec![existing.name.clone(), class.name],
            }),
            None => Ok(()),
        }
    }

    fn app(&self, namespace: Option<&str>, object: Value) -> Result<()> {
        let mut app: AppInstance = serde_json::from_value(object)?;
        if app.metadata.namespace.is_none() {
            app.metadata.namespace = namespace.map(String::from);
        }

        let requests = assemble_requests(&app.spec)?;
        let Some(snapshot) = self.snapshot else {
            return Ok(());
        };
        resolve_all(&requests, snapshot, app.project(), self.config).map(|_| ())
    }
}
