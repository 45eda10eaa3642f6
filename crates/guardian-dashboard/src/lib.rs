//! guardian-dashboard — server-rendered web UI for Guardian-IO.
//!
//! Pages read from the mounted live view when one is present (so tables
//! show exactly what the live buffers hold) and fall back to the store.
//! HTMX partials poll for fresh rows and toasts.
//!
//! # Routes
//!
//! | Route | Handler |
//! |---|---|
//! | `/dashboard/` | ESG overview |
//! | `/dashboard/map` | Live risk map |
//! | `/dashboard/supply-chain` | Nodes and routes |
//! | `/dashboard/partials/metrics` | Metric table rows |
//! | `/dashboard/partials/toasts` | Recent notifications |

pub mod pages;
pub mod partials;
pub mod views;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use guardian_live::{MapStyle, MountedView};
use guardian_state::StateStore;

/// Shared state for dashboard handlers.
#[derive(Clone)]
pub struct DashboardState {
    pub store: StateStore,
    pub live: Option<Arc<MountedView>>,
    pub map_style: MapStyle,
}

/// Build the dashboard router.
pub fn dashboard_router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(pages::overview))
        .route("/map", get(pages::map))
        .route("/supply-chain", get(pages::supply_chain))
        .route("/partials/metrics", get(partials::metric_rows))
        .route("/partials/toasts", get(partials::toasts))
        .with_state(state)
}
