//! REST API handlers.
//!
//! Each handler goes through the `CloudProvider` and returns JSON in the
//! `{success, data, error}` envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fleetscale_provider::{ErrorKind, NodeGroup, ProviderError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
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
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// HTTP status for each provider error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation | ErrorKind::Capacity => StatusCode::BAD_REQUEST,
        ErrorKind::GroupNotFound => StatusCode::NOT_FOUND,
        ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        ErrorKind::AutoscalerDisabled => StatusCode::CONFLICT,
        ErrorKind::Remote | ErrorKind::Credential => StatusCode::BAD_GATEWAY,
        ErrorKind::Template => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn provider_error(e: &ProviderError) -> Response {
    let status = status_for(e.kind());
    if status.is_server_error() {
        warn!(error = %e, status = status.as_u16(), "request failed");
    }
    error_response(&e.to_string(), status)
}

/// A node group as listed by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: String,
    pub min_size: u32,
    pub max_size: u32,
    pub target_size: usize,
    pub debug: String,
}

impl From<&NodeGroup> for GroupSummary {
    fn from(group: &NodeGroup) -> Self {
        Self {
            id: group.id().to_string(),
            min_size: group.min_size(),
            max_size: group.max_size(),
            target_size: group.target_size(),
            debug: group.debug(),
        }
    }
}

// ── Groups ─────────────────────────────────────────────────────

/// GET /api/v1/groups
pub async fn list_groups(State(state): State<ApiState>) -> impl IntoResponse {
    let groups: Vec<GroupSummary> = state
        .provider
        .node_groups()
        .iter()
        .map(GroupSummary::from)
        .collect();
    ApiResponse::ok(groups)
}

/// GET /api/v1/groups/{id}/nodes
pub async fn list_group_nodes(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.provider.node_group(&id) {
        Ok(group) => ApiResponse::ok(group.nodes()).into_response(),
        Err(e) => provider_error(&e),
    }
}

/// GET /api/v1/groups/{id}/template
pub async fn group_template(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state
        .provider
        .node_group(&id)
        .and_then(|group| group.template_node_info())
    {
        Ok(template) => ApiResponse::ok(template).into_response(),
        Err(e) => provider_error(&e),
    }
}

// ── Scaling ────────────────────────────────────────────────────

/// Increase request body.
#[derive(Debug, Deserialize)]
pub struct IncreaseRequest {
    pub delta: i64,
}

/// POST /api/v1/groups/{id}/increase
pub async fn increase_size(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<IncreaseRequest>,
) -> impl IntoResponse {
    let group = match state.provider.node_group(&id) {
        Ok(group) => group,
        Err(e) => return provider_error(&e),
    };
    match group.increase_size(req.delta).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({
            "group": id,
            "delta": req.delta,
            "target_size": group.target_size(),
        }))
        .into_response(),
        Err(e) => provider_error(&e),
    }
}

/// Delete request body.
#[derive(Debug, Deserialize)]
pub struct DeleteNodesRequest {
    pub provider_ids: Vec<String>,
}

/// POST /api/v1/groups/{id}/delete-nodes
pub async fn delete_nodes(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<DeleteNodesRequest>,
) -> impl IntoResponse {
    let group = match state.provider.node_group(&id) {
        Ok(group) => group,
        Err(e) => return provider_error(&e),
    };
    match group.delete_nodes(&req.provider_ids).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({
            "group": id,
            "deleted": req.provider_ids.len(),
            "target_size": group.target_size(),
        }))
        .into_response(),
        Err(e) => provider_error(&e),
    }
}

// ── Lookup / refresh ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NodeGroupQuery {
    #[serde(default)]
    pub provider_id: String,
}

/// GET /api/v1/node-group?provider_id=
///
/// A node no group claims is not an error; `data` is `null`.
pub async fn node_group_for_node(
    State(state): State<ApiState>,
    Query(query): Query<NodeGroupQuery>,
) -> impl IntoResponse {
    let group = state
        .provider
        .node_group_for_node(&query.provider_id)
        .as_ref()
        .map(GroupSummary::from);
    ApiResponse::ok(group)
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    #[serde(default)]
    pub force: bool,
}

/// POST /api/v1/refresh
pub async fn refresh(
    State(state): State<ApiState>,
    Query(query): Query<RefreshQuery>,
) -> impl IntoResponse {
    let result = if query.force {
        state.provider.force_refresh().await
    } else {
        state.provider.refresh().await
    };
    match result {
        Ok(()) => ApiResponse::ok(serde_json::json!({
            "groups": state.provider.node_groups().len(),
            "forced": query.force,
        }))
        .into_response(),
        Err(e) => provider_error(&e),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.collector.render_prometheus(),
    )
}
