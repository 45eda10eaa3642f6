//! guardian-api — REST API for Guardian-IO.
//!
//! Provides axum route handlers over the four tables, the live map's
//! layers, and a websocket change stream. Mounts the dashboard under
//! `/dashboard`.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET/POST | `/api/v1/metrics` | List / record ESG metrics |
//! | GET/PUT/DELETE | `/api/v1/metrics/{id}` | One metric |
//! | GET/POST | `/api/v1/risk-zones` | List / report risk zones |
//! | GET/PUT/DELETE | `/api/v1/risk-zones/{id}` | One risk zone |
//! | GET/POST | `/api/v1/nodes` | List / register supply-chain nodes |
//! | GET/PUT/DELETE | `/api/v1/nodes/{id}` | One node |
//! | GET/POST | `/api/v1/routes` | List / register supply-chain routes |
//! | GET/PUT/DELETE | `/api/v1/routes/{id}` | One route |
//! | GET | `/api/v1/map/layers` | Live map layers as GeoJSON |
//! | GET | `/api/v1/live` | Live view status |
//! | GET | `/api/v1/realtime?table=&event=&after=` | Websocket change stream |

pub mod handlers;
pub mod realtime;

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use axum::Router;
use axum::routing::get;
use guardian_live::{MapStyle, MountedView};
use guardian_state::{MetricRecord, RiskZone, StateStore, SupplyChainNode, SupplyChainRoute};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub live: Option<Arc<MountedView>>,
    /// Suffix for process-unique realtime channel names.
    pub next_channel: Arc<AtomicU64>,
}

/// Build the complete router (REST + realtime + dashboard).
pub fn build_router(
    store: StateStore,
    live: Option<Arc<MountedView>>,
    map_style: MapStyle,
) -> Router {
    let api_state = ApiState {
        store: store.clone(),
        live: live.clone(),
        next_channel: Arc::new(AtomicU64::new(0)),
    };

    let dashboard_state = guardian_dashboard::DashboardState {
        store,
        live,
        map_style,
    };

    let api_routes = Router::new()
        .route(
            "/metrics",
            get(handlers::list_rows::<MetricRecord>).post(handlers::insert_row::<MetricRecord>),
        )
        .route(
            "/metrics/{id}",
            get(handlers::get_row::<MetricRecord>)
                .put(handlers::update_row::<MetricRecord>)
                .delete(handlers::delete_row::<MetricRecord>),
        )
        .route(
            "/risk-zones",
            get(handlers::list_rows::<RiskZone>).post(handlers::insert_row::<RiskZone>),
        )
        .route(
            "/risk-zones/{id}",
            get(handlers::get_row::<RiskZone>)
                .put(handlers::update_row::<RiskZone>)
                .delete(handlers::delete_row::<RiskZone>),
        )
        .route(
            "/nodes",
            get(handlers::list_rows::<SupplyChainNode>).post(handlers::insert_row::<SupplyChainNode>),
        )
        .route(
            "/nodes/{id}",
            get(handlers::get_row::<SupplyChainNode>)
                .put(handlers::update_row::<SupplyChainNode>)
                .delete(handlers::delete_row::<SupplyChainNode>),
        )
        .route(
            "/routes",
            get(handlers::list_rows::<SupplyChainRoute>)
                .post(handlers::insert_row::<SupplyChainRoute>),
        )
        .route(
            "/routes/{id}",
            get(handlers::get_row::<SupplyChainRoute>)
                .put(handlers::update_row::<SupplyChainRoute>)
                .delete(handlers::delete_row::<SupplyChainRoute>),
        )
        .route("/map/layers", get(handlers::map_layers))
        .route("/live", get(handlers::live_status))
        .route("/realtime", get(realtime::websocket_handler))
        .with_state(api_state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/dashboard", guardian_dashboard::dashboard_router(dashboard_state))
}
