//! Read-only web API over the store.
//!
//! Serves the graph document plus task and feature list views. Write
//! operations stay on the tool surface; this server exists for dashboards
//! and the graph visualizer.

use crate::models::{Feature, Task, TaskStatus};
use crate::store::graph::Graph;
use crate::store::Store;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Default port for the web API.
pub const DEFAULT_PORT: u16 = 8000;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn internal_error(e: crate::Error) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
}

/// Build the API router.
pub fn router(store: Arc<Store>) -> Router {
    Router::new()
        .route("/api/graph", get(get_graph))
        .route("/api/tasks", get(get_tasks))
        .route("/api/features", get(get_features))
        .with_state(store)
}

/// Serve until the process exits.
pub async fn serve(store: Arc<Store>, port: u16) -> crate::Result<()> {
    serve_with_shutdown(store, port, CancellationToken::new()).await
}

/// Serve until the token is cancelled.
pub async fn serve_with_shutdown(
    store: Arc<Store>,
    port: u16,
    shutdown: CancellationToken,
) -> crate::Result<()> {
    let app = router(store);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("serving graph API at http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn get_graph(State(store): State<Arc<Store>>) -> Result<Json<Graph>, ApiError> {
    store.graph().map(Json).map_err(internal_error)
}

#[derive(Debug, Default, Deserialize)]
struct TaskQuery {
    status: Option<String>,
    feature: Option<String>,
}

async fn get_tasks(
    State(store): State<Arc<Store>>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let status = match query.status.as_deref() {
        Some(s) => Some(TaskStatus::parse(s).ok_or_else(|| bad_request(format!("invalid status '{s}'")))?),
        None => None,
    };
    store
        .list_tasks(status, query.feature.as_deref())
        .map(Json)
        .map_err(internal_error)
}

async fn get_features(State(store): State<Arc<Store>>) -> Result<Json<Vec<Feature>>, ApiError> {
    store.list_features().map(Json).map_err(internal_error)
}
