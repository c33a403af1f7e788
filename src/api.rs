// src/api.rs
//! HTTP surface: health, the dashboard query and Prometheus metrics.

use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::query::{dashboard_data, DashboardData, DashboardQuery, QueryError};
use crate::store::MentionStore;

#[derive(Clone)]
pub struct AppState {
    pub store: MentionStore,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(store: MentionStore) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = match &self {
            QueryError::Invalid(_) => StatusCode::BAD_REQUEST,
            QueryError::Store(e) => {
                tracing::error!(error = %e, "dashboard query failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Empty list or `*` allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::very_permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([axum::http::Method::GET])
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/dashboard_data", get(get_dashboard_data))
        .route("/metrics", get(get_metrics))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

async fn get_dashboard_data(
    State(state): State<AppState>,
    Query(q): Query<DashboardQuery>,
) -> Result<Json<DashboardData>, QueryError> {
    let data = dashboard_data(&state.store, &q, Utc::now()).await?;
    Ok(Json(data))
}

async fn get_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(h) => h.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
