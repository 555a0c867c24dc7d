//! REST API Handlers
//!
//! Health and readiness probes, Prometheus exposition and class
//! diagnostics for a project.

use super::webhook::validate_handler;
use crate::classes::{
    format_access_modes, ClassKind, ClassRegistry, ClassSnapshot, ClassSpec, ResourceClass,
};
use crate::config::ResolverConfig;
use crate::domain::ports::ClassSource;
use crate::metrics::Metrics;
use axum::{
    extract::{Json, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

// =============================================================================
// Response Types
// =============================================================================

/// One class as seen from a project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub name: String,
    /// "cluster" or "project"
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Size or memory bounds
    pub bounds: String,
    /// Value used when a request omits the quantity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_modes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_scaler: Option<f64>,
}

impl From<&ResourceClass> for ClassSummary {
    fn from(class: &ResourceClass) -> Self {
        let (policy, access_modes, cpu_scaler) = match &class.spec {
            ClassSpec::Volume(v) => (&v.size, Some(format_access_modes(&v.access_modes)), None),
            ClassSpec::Compute(c) => (&c.memory, None, Some(c.cpu_scaler)),
        };
        Self {
            name: class.name.clone(),
            scope: class.scope.label().to_string(),
            description: class.description.clone(),
            bounds: policy.bounds.describe(),
            effective_default: policy.effective_default().map(ToString::to_string),
            access_modes,
            cpu_scaler,
        }
    }
}

/// Classes of one kind visible from a project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindClassesResponse {
    /// Active classes, project classes shadowing cluster ones
    pub visible: Vec<ClassSummary>,
    /// Class used when a request names none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Set when more than one default is visible
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_error: Option<String>,
    /// Classes that exist but cannot be used
    pub inactive: Vec<ClassSummary>,
}

/// Class diagnostics for one project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectClassesResponse {
    pub namespace: String,
    pub snapshot_version: u64,
    pub volume: KindClassesResponse,
    pub compute: KindClassesResponse,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

/// Build the diagnostics of one kind from a snapshot
pub fn kind_classes(snapshot: &ClassSnapshot, project: &str, kind: ClassKind) -> KindClassesResponse {
    let (default, default_error) = match snapshot.default_for(project, kind) {
        Ok(class) => (class.map(|c| c.name.clone()), None),
        Err(e) => (None, Some(e.to_string())),
    };
    KindClassesResponse {
        visible: snapshot
            .visible(project, kind)
            .values()
            .map(|c| ClassSummary::from(*c))
            .collect(),
        default,
        default_error,
        inactive: snapshot
            .inactive(project, kind)
            .into_iter()
            .map(ClassSummary::from)
            .collect(),
    }
}

// =============================================================================
// REST Router
// =============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClassRegistry>,
    pub metrics: Arc<Metrics>,
    /// Platform defaults used when admitting application instances
    pub config: ResolverConfig,
}

/// REST API router builder
pub struct RestRouter {
    state: AppState,
}

impl RestRouter {
    pub fn new(registry: Arc<ClassRegistry>, metrics: Arc<Metrics>, config: ResolverConfig) -> Self {
        Self {
            state: AppState {
                registry,
                metrics,
                config,
            },
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        Router::new()
            // Diagnostics
            .route("/v1/classes/:namespace", get(project_classes))
            // Admission
            .route("/validate", post(validate_handler))
            // Probes and metrics
            .route("/healthz", get(health_check))
            .route("/readyz", get(readiness_check))
            .route("/metrics", get(metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state)
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn project_classes(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> impl IntoResponse {
    let snapshot = match state.registry.snapshot() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiErrorResponse {
                    error: "not_ready".into(),
                    message: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    (
        StatusCode::OK,
        Json(ProjectClassesResponse {
            snapshot_version: snapshot.version(),
            volume: kind_classes(&snapshot, &namespace, ClassKind::Volume),
            compute: kind_classes(&snapshot, &namespace, ClassKind::Compute),
            namespace,
        }),
    )
        .into_response()
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.registry.is_synced() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "class cache not synced")
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
