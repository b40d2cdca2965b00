//! HTTP surface: the risk analysis endpoint plus the reads a dashboard
//! needs, all behind bearer authentication and permissive CORS.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::error::Error;
use crate::{HealthPulse, Identity, NewHealthMetric, DEFAULT_TREND_DAYS};

type AppState = Arc<HealthPulse>;

/// An [`Error`] rendered as `{"error": ..}` with a matching status.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::QuotaExhausted => StatusCode::PAYMENT_REQUIRED,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Upstream { .. }
            | Error::Persistence(_)
            | Error::FetchMetrics(_)
            | Error::Database(_)
            | Error::Migration(_)
            | Error::Config(_)
            | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match &self.0 {
            Error::Persistence(_) => "Failed to store assessments".to_string(),
            Error::FetchMetrics(_) => "Failed to fetch metrics".to_string(),
            Error::Database(_) | Error::Migration(_) | Error::Config(_) | Error::Other(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        } else {
            log::debug!("Request rejected ({status}): {}", self.0);
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// A header that is present but not visible ASCII counts as a bad token,
/// not a missing one.
fn authorization(headers: &HeaderMap) -> crate::Result<Option<&str>> {
    headers
        .get(AUTHORIZATION)
        .map(|v| v.to_str().map_err(|_| Error::invalid_token()))
        .transpose()
}

async fn caller(app: &HealthPulse, headers: &HeaderMap) -> ApiResult<Identity> {
    Ok(app.authenticate(authorization(headers)?).await?)
}

// ── Router ─────────────────────────────────────────────────────────

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/calculate-risk", post(calculate_risk))
        .route("/api/metrics", get(list_metrics).post(log_metric))
        .route("/api/metrics/latest", get(latest_metric))
        .route("/api/assessments", get(list_assessments))
        .route("/api/assessments/current", get(current_assessments))
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/:id/read", post(mark_alert_read))
        .route("/api/dashboard", get(dashboard))
        .route("/api/changes", get(changes))
        .with_state(app)
        .layer(cors())
}

/// Every `OPTIONS` request is answered here with an empty 200.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            CONTENT_TYPE,
        ])
}

/// Bind and serve until Ctrl-C.
pub async fn serve(app: AppState, addr: SocketAddr) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("cannot bind {addr}: {e}")))?;
    log::info!("Listening on http://{addr}");
    axum::serve(listener, router(app))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Shutting down");
        })
        .await
        .map_err(|e| Error::Other(format!("server error: {e}")))
}

// ── Handlers ───────────────────────────────────────────────────────

async fn calculate_risk(State(app): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let report = app.calculate_risk(authorization(&headers)?).await?;
    let body = if report.is_no_data() {
        json!({
            "message": report.message,
            "assessments": [],
        })
    } else {
        json!({
            "success": true,
            "assessments": report.assessments,
            "message": report.message,
            "metrics_analyzed": report.metrics_analyzed,
            "assessments_created": report.assessments_created,
        })
    };
    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
struct MetricsQuery {
    days: Option<u32>,
}

async fn list_metrics(
    State(app): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<MetricsQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let identity = caller(&app, &headers).await?;
    let Query(query) = query.map_err(|e| Error::Validation(e.body_text()))?;
    let metrics = app
        .recent_metrics(&identity.user_id, query.days.unwrap_or(DEFAULT_TREND_DAYS))
        .await?;
    Ok(Json(metrics).into_response())
}

async fn log_metric(
    State(app): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NewHealthMetric>, JsonRejection>,
) -> ApiResult<Response> {
    let identity = caller(&app, &headers).await?;
    let Json(new) = payload.map_err(|e| Error::Validation(e.body_text()))?;
    let metric = app.log_metric(&identity.user_id, new).await?;
    Ok((StatusCode::CREATED, Json(metric)).into_response())
}

async fn latest_metric(State(app): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let identity = caller(&app, &headers).await?;
    Ok(Json(app.latest_metric(&identity.user_id).await?).into_response())
}

async fn list_assessments(State(app): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let identity = caller(&app, &headers).await?;
    Ok(Json(app.assessments(&identity.user_id).await?).into_response())
}

async fn current_assessments(
    State(app): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let identity = caller(&app, &headers).await?;
    Ok(Json(app.current_assessments(&identity.user_id).await?).into_response())
}

async fn list_alerts(State(app): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let identity = caller(&app, &headers).await?;
    Ok(Json(app.alerts(&identity.user_id).await?).into_response())
}

async fn mark_alert_read(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let identity = caller(&app, &headers).await?;
    app.mark_alert_read(&identity.user_id, &id).await?;
    Ok(Json(json!({ "success": true })).into_response())
}

async fn dashboard(State(app): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let identity = caller(&app, &headers).await?;
    Ok(Json(app.dashboard(&identity.user_id).await?).into_response())
}

/// Server-sent events for the caller's committed writes.
async fn changes(
    State(app): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let identity = caller(&app, &headers).await?;
    let subscription = app.subscribe(&identity.user_id);
    log::debug!("Change stream opened for user {}", identity.user_id);

    let events = stream::unfold(subscription, |mut sub| async move {
        let change = sub.next().await?;
        let event = match serde_json::to_string(&change) {
            Ok(data) => Event::default().event("change").data(data),
            Err(e) => Event::default().event("error").data(e.to_string()),
        };
        Some((Ok(event), sub))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
