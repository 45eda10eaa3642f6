//! REST API handlers.
//!
//! Row handlers are generic over [`TableRow`], so each table gets the same
//! list/get/insert/update/delete surface. Writes go through `StateStore`
//! and reach live views through the change feed.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use guardian_live::map::MapLayers;
use guardian_live::{LoadState, Toast};
use guardian_state::*;
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

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn state_error(e: StateError) -> Response {
    let status = match &e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::Conflict(_) | StateError::ChannelInUse(_) => StatusCode::CONFLICT,
        StateError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => {
            warn!(error = %e, "store error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(&e.to_string(), status).into_response()
}

// ── Rows ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Newest `limit` rows only, newest first.
    pub limit: Option<usize>,
}

/// GET /api/v1/{table}
pub async fn list_rows<R: TableRow>(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let rows = match query.limit {
        Some(limit) => state.store.list_recent::<R>(limit),
        None => state.store.list::<R>(),
    };
    match rows {
        Ok(rows) => ApiResponse::ok(rows).into_response(),
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/{table}/{id}
pub async fn get_row<R: TableRow>(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get::<R>(&id) {
        Ok(Some(row)) => ApiResponse::ok(row).into_response(),
        Ok(None) => {
            error_response(&format!("{} {id} not found", R::TABLE), StatusCode::NOT_FOUND)
                .into_response()
        }
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/{table}
pub async fn insert_row<R: TableRow>(
    State(state): State<ApiState>,
    Json(row): Json<R>,
) -> Response {
    match state.store.insert(&row) {
        Ok(event) => (StatusCode::CREATED, ApiResponse::ok(event)).into_response(),
        Err(e) => state_error(e),
    }
}

/// PUT /api/v1/{table}/{id}
pub async fn update_row<R: TableRow>(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(row): Json<R>,
) -> Response {
    if row.id() != id {
        return error_response("row id does not match path", StatusCode::BAD_REQUEST)
            .into_response();
    }
    match state.store.update(&row) {
        Ok(event) => ApiResponse::ok(event).into_response(),
        Err(e) => state_error(e),
    }
}

/// DELETE /api/v1/{table}/{id}
pub async fn delete_row<R: TableRow>(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.delete::<R>(&id) {
        Ok(Some(event)) => ApiResponse::ok(event).into_response(),
        Ok(None) => {
            error_response(&format!("{} {id} not found", R::TABLE), StatusCode::NOT_FOUND)
                .into_response()
        }
        Err(e) => state_error(e),
    }
}

// ── Live view ──────────────────────────────────────────────────

/// GET /api/v1/map/layers
///
/// Plain GeoJSON (no envelope) so map clients can use it as a source URL.
pub async fn map_layers(State(state): State<ApiState>) -> Response {
    let layers = state
        .live
        .as_ref()
        .map(|live| live.snapshot().layers)
        .unwrap_or_else(MapLayers::default);
    Json(layers.to_geojson()).into_response()
}

#[derive(Debug, Serialize)]
pub struct LiveStatus {
    pub mounted: bool,
    pub generation: u64,
    pub load_state: LoadState,
    pub metrics: usize,
    pub zones: usize,
    pub nodes: usize,
    pub markers: usize,
    pub routes: usize,
    pub heat_points: usize,
    pub map_error: Option<String>,
    pub feed_errors: Vec<String>,
    pub dropped_rows: u64,
    pub recent_toasts: Vec<Toast>,
}

/// GET /api/v1/live
pub async fn live_status(State(state): State<ApiState>) -> Response {
    let Some(live) = state.live.as_ref() else {
        return error_response("live view is not mounted", StatusCode::SERVICE_UNAVAILABLE)
            .into_response();
    };
    let snapshot = live.snapshot();
    ApiResponse::ok(LiveStatus {
        mounted: snapshot.mounted,
        generation: snapshot.generation,
        load_state: snapshot.load_state,
        metrics: snapshot.metrics.len(),
        zones: snapshot.zones.len(),
        nodes: snapshot.nodes.len(),
        markers: snapshot.layers.markers.len(),
        routes: snapshot.layers.routes.len(),
        heat_points: snapshot.layers.heatmap.len(),
        map_error: snapshot.map_error,
        feed_errors: snapshot.feed_errors,
        dropped_rows: snapshot.dropped_rows,
        recent_toasts: live.notifier().recent(),
    })
    .into_response()
}
