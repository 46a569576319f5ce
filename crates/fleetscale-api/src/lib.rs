//! fleetscale-api — REST API over the cloud provider.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/groups` | List node groups |
//! | GET | `/api/v1/groups/{id}/nodes` | Nodes of a group |
//! | GET | `/api/v1/groups/{id}/template` | Template node of a group |
//! | POST | `/api/v1/groups/{id}/increase` | Grow a group by `delta` |
//! | POST | `/api/v1/groups/{id}/delete-nodes` | Delete nodes by provider id |
//! | GET | `/api/v1/node-group?provider_id=` | Group owning a node |
//! | POST | `/api/v1/refresh` | Refresh (`?force=true` skips the cadence gate) |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use fleetscale_metrics::ApiCallCollector;
use fleetscale_provider::CloudProvider;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub provider: Arc<CloudProvider>,
    pub collector: ApiCallCollector,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(provider: Arc<CloudProvider>, collector: ApiCallCollector) -> Router {
    let api_state = ApiState {
        provider,
        collector,
    };

    let api_routes = Router::new()
        .route("/groups", get(handlers::list_groups))
        .route("/groups/{id}/nodes", get(handlers::list_group_nodes))
        .route("/groups/{id}/template", get(handlers::group_template))
        .route("/groups/{id}/increase", post(handlers::increase_size))
        .route("/groups/{id}/delete-nodes", post(handlers::delete_nodes))
        .route("/node-group", get(handlers::node_group_for_node))
        .route("/refresh", post(handlers::refresh))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(api_state))
}
