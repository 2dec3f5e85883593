//! HTTP API
//!
//! REST endpoints for querying and administering the router

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use qnode_core::{
    DeployRequest, DeploymentsStatus, PartitionId, QNodeStatus, QueryStatus, SwitchVersionRequest,
    Tablespace,
};

use crate::QNode;

/// HTTP API service
pub struct HttpApi {
    qnode: Arc<QNode>,
}

impl HttpApi {
    pub fn new(qnode: Arc<QNode>) -> Self {
        Self { qnode }
    }

    /// Build the router
    pub fn router(self) -> Router {
        Router::new()
            // Queries
            .route("/api/query/:tablespace", get(query))
            .route("/api/multiquery/:tablespace", post(multi_query))
            // Deployments
            .route("/api/deploy", post(deploy))
            .route("/api/rollback", post(rollback))
            .route("/api/canceldeployment", post(cancel_deployment))
            .route("/api/cleanoldversions", post(clean_old_versions))
            .route("/api/deploymentsstatus", get(deployments_status))
            // Cluster
            .route("/api/overview", get(overview))
            .route("/api/tablespaces", get(tablespaces))
            .route("/api/tablespace/:name", get(tablespace))
            .route("/api/alltablespaceversions/:name", get(all_tablespace_versions))
            .route("/api/dnode/:address/status", get(dnode_status))
            .route("/api/dnodelist", get(dnode_list))
            .route("/api/metrics", get(metrics))
            .with_state(self.qnode)
    }
}

// ==================== Response types ====================

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    fn err(msg: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        })
    }
}

// ==================== Request types ====================

#[derive(Deserialize)]
struct QueryParams {
    key: Option<String>,
    sql: Option<String>,
    partition: Option<PartitionId>,
}

#[derive(Deserialize)]
struct MultiQueryRequest {
    sql: Option<String>,
    #[serde(default)]
    key_mins: Vec<Option<String>>,
    #[serde(default)]
    key_maxs: Vec<Option<String>>,
}

#[derive(Deserialize)]
struct CancelParams {
    version: String,
}

// ==================== Handlers ====================

async fn query(
    State(qnode): State<Arc<QNode>>,
    Path(tablespace): Path<String>,
    Query(params): Query<QueryParams>,
) -> impl IntoResponse {
    let status = qnode
        .query(
            &tablespace,
            params.key.as_deref(),
            params.sql.as_deref(),
            params.partition,
        )
        .await;
    ApiResponse::ok(status)
}

async fn multi_query(
    State(qnode): State<Arc<QNode>>,
    Path(tablespace): Path<String>,
    Json(req): Json<MultiQueryRequest>,
) -> impl IntoResponse {
    // Unequal range lists are a caller bug inside the router; reject them here
    if req.key_mins.len() != req.key_maxs.len() {
        return (
            StatusCode::BAD_REQUEST,
            ApiResponse::<Vec<QueryStatus>>::err(format!(
                "key_mins ({}) and key_maxs ({}) must have the same length",
                req.key_mins.len(),
                req.key_maxs.len()
            )),
        );
    }
    let results = qnode
        .multi_query(&tablespace, &req.key_mins, &req.key_maxs, req.sql.as_deref())
        .await;
    (StatusCode::OK, ApiResponse::ok(results))
}

async fn deploy(
    State(qnode): State<Arc<QNode>>,
    Json(requests): Json<Vec<DeployRequest>>,
) -> impl IntoResponse {
    info!("Deploy requested for {} tablespaces via HTTP API", requests.len());
    ApiResponse::ok(qnode.deploy(&requests).await)
}

async fn rollback(
    State(qnode): State<Arc<QNode>>,
    Json(requests): Json<Vec<SwitchVersionRequest>>,
) -> impl IntoResponse {
    info!("Rollback requested via HTTP API: {:?}", requests);
    ApiResponse::ok(qnode.rollback(&requests).await)
}

async fn cancel_deployment(
    State(qnode): State<Arc<QNode>>,
    Query(params): Query<CancelParams>,
) -> impl IntoResponse {
    ApiResponse::ok(qnode.cancel_deployment(&params.version).await)
}

async fn clean_old_versions(State(qnode): State<Arc<QNode>>) -> impl IntoResponse {
    ApiResponse::ok(qnode.clean_old_versions().await)
}

async fn deployments_status(State(qnode): State<Arc<QNode>>) -> impl IntoResponse {
    match qnode.deployments_status().await {
        Ok(status) => (StatusCode::OK, ApiResponse::ok(status)),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            ApiResponse::<DeploymentsStatus>::err(e.to_string()),
        ),
    }
}

async fn overview(State(qnode): State<Arc<QNode>>) -> impl IntoResponse {
    match qnode.overview().await {
        Ok(status) => (StatusCode::OK, ApiResponse::ok(status)),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            ApiResponse::<QNodeStatus>::err(e.to_string()),
        ),
    }
}

async fn tablespaces(State(qnode): State<Arc<QNode>>) -> impl IntoResponse {
    ApiResponse::ok(qnode.tablespaces())
}

async fn tablespace(
    State(qnode): State<Arc<QNode>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match qnode.tablespace(&name) {
        Some(tablespace) => (StatusCode::OK, ApiResponse::ok(tablespace)),
        None => (
            StatusCode::NOT_FOUND,
            ApiResponse::<Tablespace>::err(format!("Tablespace {} not being served", name)),
        ),
    }
}

async fn all_tablespace_versions(
    State(qnode): State<Arc<QNode>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    ApiResponse::ok(qnode.all_tablespace_versions(&name))
}

async fn dnode_status(
    State(qnode): State<Arc<QNode>>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    ApiResponse::ok(qnode.dnode_status(&address).await)
}

async fn dnode_list(State(qnode): State<Arc<QNode>>) -> impl IntoResponse {
    ApiResponse::ok(qnode.dnode_list())
}

async fn metrics(State(qnode): State<Arc<QNode>>) -> impl IntoResponse {
    ApiResponse::ok(qnode.metrics())
}
