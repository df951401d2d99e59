//! HTTP server.
//!
//! Exposes the [`AppContext`] operations as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/targets` | List watch targets |
//! | `POST` | `/targets` | Register a watch target |
//! | `GET`  | `/targets/{id}` | Show one target |
//! | `PATCH` | `/targets/{id}` | Partial update |
//! | `DELETE` | `/targets/{id}` | Remove a target and its chunks |
//! | `POST` | `/targets/{id}/index` | Start a manual run (202) |
//! | `GET`  | `/targets/{id}/status` | Current run status |
//! | `POST` | `/targets/{id}/clear` | Close an orphaned run |
//! | `GET`  | `/schedule/config` | Current schedule |
//! | `PUT`  | `/schedule/config` | Partial schedule update |
//! | `GET`  | `/schedule/status` | Schedule plus live load and verdict |
//! | `POST` | `/schedule/pause` | Disable scheduled indexing |
//! | `POST` | `/schedule/resume` | Enable scheduled indexing |
//! | `POST` | `/schedule/run` | Run one window-gated cycle now (202) |
//! | `GET`  | `/system` | Live load sample |
//! | `GET`  | `/stats` | Target, run and chunk counts |
//! | `POST` | `/search` | Semantic search |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "watch target not found: 42" } }
//! ```
//!
//! Status codes: `not_found` (404), `duplicate_path`, `overlapping_path` and
//! `already_running` (409), `bad_request` and `path_not_found` (400), `embeddings_unavailable`
//! (503), `timeout` (504), `internal` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::context::{AppContext, ScheduleStatus};
use crate::error::IndexError;
use crate::models::{
    NewWatchTarget, RunReport, ScheduleConfig, ScheduleConfigUpdate, SystemStatus, WatchTarget,
    WatchTargetUpdate,
};
use crate::search::{SearchHit, SearchRequest};
use crate::stats::IndexStats;

type AppState = Arc<AppContext>;

/// Build the router over a shared context.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/targets", get(list_targets).post(create_target))
        .route(
            "/targets/{id}",
            get(show_target).patch(update_target).delete(delete_target),
        )
        .route("/targets/{id}/index", post(trigger_index))
        .route("/targets/{id}/status", get(run_status))
        .route("/targets/{id}/clear", post(clear_run))
        .route("/schedule/config", get(get_schedule).put(update_schedule))
        .route("/schedule/status", get(schedule_status))
        .route("/schedule/pause", post(pause))
        .route("/schedule/resume", post(resume))
        .route("/schedule/run", post(run_cycle))
        .route("/system", get(system_status))
        .route("/stats", get(stats))
        .route("/search", post(search))
        .route("/health", get(health))
        .layer(cors)
        .with_state(ctx)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    ctx: Arc<AppContext>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let bind_addr = ctx.config().server.bind.clone();
    let app = router(ctx);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "http server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError(IndexError);

impl From<IndexError> for AppError {
    fn from(e: IndexError) -> Self {
        AppError(e)
    }
}

fn status_for(err: &IndexError) -> StatusCode {
    match err.code() {
        "not_found" => StatusCode::NOT_FOUND,
        "duplicate_path" | "overlapping_path" | "already_running" => StatusCode::CONFLICT,
        "bad_request" | "path_not_found" => StatusCode::BAD_REQUEST,
        "embeddings_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        "timeout" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.code().to_string(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;

// ============ /targets ============

async fn list_targets(State(ctx): State<AppState>) -> ApiResult<Json<Vec<WatchTarget>>> {
    Ok(Json(ctx.list_targets().await?))
}

async fn create_target(
    State(ctx): State<AppState>,
    Json(new): Json<NewWatchTarget>,
) -> ApiResult<(StatusCode, Json<WatchTarget>)> {
    let target = ctx.add_target(new).await?;
    Ok((StatusCode::CREATED, Json(target)))
}

async fn show_target(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WatchTarget>> {
    Ok(Json(ctx.get_target(&id).await?))
}

async fn update_target(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<WatchTargetUpdate>,
) -> ApiResult<Json<WatchTarget>> {
    Ok(Json(ctx.update_target(&id, update).await?))
}

async fn delete_target(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WatchTarget>> {
    Ok(Json(ctx.remove_target(&id).await?))
}

async fn trigger_index(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<RunReport>)> {
    let report = ctx.trigger_index(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

async fn run_status(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunReport>> {
    Ok(Json(ctx.run_status(&id).await?))
}

async fn clear_run(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunReport>> {
    Ok(Json(ctx.clear_run(&id).await?))
}

// ============ /schedule ============

async fn get_schedule(State(ctx): State<AppState>) -> Json<ScheduleConfig> {
    Json(ctx.get_schedule().await)
}

async fn update_schedule(
    State(ctx): State<AppState>,
    Json(update): Json<ScheduleConfigUpdate>,
) -> ApiResult<Json<ScheduleConfig>> {
    Ok(Json(ctx.update_schedule(update).await?))
}

async fn schedule_status(State(ctx): State<AppState>) -> Json<ScheduleStatus> {
    Json(ctx.schedule_status().await)
}

async fn pause(State(ctx): State<AppState>) -> ApiResult<Json<ScheduleConfig>> {
    Ok(Json(ctx.pause().await?))
}

async fn resume(State(ctx): State<AppState>) -> ApiResult<Json<ScheduleConfig>> {
    Ok(Json(ctx.resume().await?))
}

async fn run_cycle(State(ctx): State<AppState>) -> StatusCode {
    ctx.run_cycle();
    StatusCode::ACCEPTED
}

// ============ /system, /stats, /search, /health ============

async fn system_status(State(ctx): State<AppState>) -> ApiResult<Json<SystemStatus>> {
    Ok(Json(ctx.system_status().await?))
}

async fn stats(State(ctx): State<AppState>) -> ApiResult<Json<IndexStats>> {
    Ok(Json(ctx.stats().await?))
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

async fn search(
    State(ctx): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let results = ctx.search(&req.query, req.limit, &req.filter()).await?;
    Ok(Json(SearchResponse { results }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_for(&IndexError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&IndexError::AlreadyRunning("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&IndexError::DuplicatePath("/x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&IndexError::OverlappingPath {
                path: "/x/y".into(),
                existing: "/x".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&IndexError::InvalidInput("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&IndexError::Deadline(5)), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(&IndexError::Store("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
