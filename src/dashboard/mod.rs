//! Read-only view over the run history.
//!
//! Nothing here mutates coordinator state. In particular the parameter
//! endpoint peeks at the store without clearing the `changed` indicator
//! nodes rely on.

use axum::extract::State;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::coordinator::{CoordinatorState, LatestRun, ParameterSet, RunTotals};
use crate::error::Result;

#[derive(Serialize)]
pub struct RunsResponse {
    pub runs: Vec<LatestRun>,
    pub totals: RunTotals,
}

#[derive(Serialize)]
struct NodeResponse {
    id: String,
    name: String,
    address: Option<String>,
    status: String,
    last_seen: DateTime<Utc>,
}

#[derive(Serialize)]
struct ParametersResponse {
    parameters: ParameterSet,
    version: u64,
}

pub fn routes() -> Router<CoordinatorState> {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/runs", get(runs_handler))
        .route("/api/nodes", get(nodes_handler))
        .route("/api/parameters", get(parameters_handler))
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

async fn runs_handler(State(state): State<CoordinatorState>) -> Result<Json<RunsResponse>> {
    let (runs, totals) = state.latest_runs().await?;
    Ok(Json(RunsResponse { runs, totals }))
}

async fn nodes_handler(State(state): State<CoordinatorState>) -> impl IntoResponse {
    let registry = state.nodes.read().await;
    let nodes: Vec<NodeResponse> = registry
        .all()
        .into_iter()
        .map(|node| NodeResponse {
            id: node.id.to_string(),
            name: node.name.clone(),
            address: node.address.clone(),
            status: node.status.clone(),
            last_seen: node.last_seen,
        })
        .collect();
    Json(nodes)
}

async fn parameters_handler(State(state): State<CoordinatorState>) -> impl IntoResponse {
    let store = state.params.read().await;
    Json(ParametersResponse {
        parameters: store.current().clone(),
        version: store.version(),
    })
}
