//! Dashboard page handlers.
//!
//! Each handler gathers rows, builds view types, and renders an Askama
//! template. HTMX partials are in `partials.rs`.

use askama::Template;
use axum::extract::State;
use axum::response::Html;
use guardian_live::{LoadState, ViewSnapshot};
use guardian_state::{MetricRecord, RiskZone, SupplyChainNode, SupplyChainRoute};

use crate::DashboardState;
use crate::views::*;

/// Rows shown in the overview metric table.
pub const METRIC_ROWS: usize = 25;

/// Metrics read from the store when no live view is ready.
const STORE_METRIC_LIMIT: usize = 500;

pub(crate) fn render<T: Template>(tmpl: T) -> Html<String> {
    Html(tmpl.render().unwrap_or_else(|e| {
        format!("<pre>Template error: {e}</pre>")
    }))
}

/// Rows behind a page: the live view's buffers once its initial load is
/// done, otherwise straight from the store.
pub(crate) struct PageData {
    pub snapshot: Option<ViewSnapshot>,
    pub metrics: Vec<MetricRecord>,
    pub zones: Vec<RiskZone>,
    pub nodes: Vec<SupplyChainNode>,
    pub routes: Vec<SupplyChainRoute>,
}

pub(crate) fn page_data(state: &DashboardState) -> PageData {
    let snapshot = state.live.as_ref().map(|live| live.snapshot());
    if let Some(s) = snapshot.as_ref().filter(|s| s.load_state == LoadState::Ready) {
        return PageData {
            metrics: s.metrics.clone(),
            zones: s.zones.clone(),
            nodes: s.nodes.clone(),
            routes: s.routes.clone(),
            snapshot,
        };
    }

    let mut metrics = state
        .store
        .list_recent::<MetricRecord>(STORE_METRIC_LIMIT)
        .unwrap_or_default();
    // list_recent is newest first; views expect receipt order.
    metrics.reverse();
    PageData {
        metrics,
        zones: state.store.list::<RiskZone>().unwrap_or_default(),
        nodes: state.store.list::<SupplyChainNode>().unwrap_or_default(),
        routes: state.store.list::<SupplyChainRoute>().unwrap_or_default(),
        snapshot,
    }
}

// ── Overview ────────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "overview.html")]
struct OverviewTemplate {
    active_page: &'static str,
    summary: OverviewSummary,
    metrics: Vec<MetricView>,
    zones: Vec<ZoneView>,
    toasts: Vec<ToastView>,
}

pub async fn overview(State(state): State<DashboardState>) -> Html<String> {
    let data = page_data(&state);
    let summary = build_summary(
        &data.metrics,
        &data.zones,
        data.nodes.len(),
        data.snapshot.as_ref(),
    );

    let mut zones: Vec<ZoneView> = data.zones.iter().rev().map(ZoneView::from_zone).collect();
    zones.truncate(10);

    let toasts = recent_toasts(&state, 5);

    render(OverviewTemplate {
        active_page: "overview",
        summary,
        metrics: build_metric_views(&data.metrics, METRIC_ROWS),
        zones,
        toasts,
    })
}

pub(crate) fn recent_toasts(state: &DashboardState, limit: usize) -> Vec<ToastView> {
    state
        .live
        .as_ref()
        .map(|live| {
            live.notifier()
                .recent()
                .iter()
                .rev()
                .take(limit)
                .map(ToastView::from_toast)
                .collect()
        })
        .unwrap_or_default()
}

// ── Map ─────────────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "map.html")]
struct MapTemplate {
    active_page: &'static str,
    access_token: String,
    style_url: String,
    center_lng: f64,
    center_lat: f64,
    zoom: f64,
    map_error: Option<String>,
    live: LiveBadge,
    marker_count: usize,
    zones_unmapped: usize,
}

pub async fn map(State(state): State<DashboardState>) -> Html<String> {
    let data = page_data(&state);
    let style = &state.map_style;

    let map_error = match (&style.access_token, &data.snapshot) {
        (None, _) => Some("Map access token is not configured".to_string()),
        (Some(_), Some(s)) => s.map_error.clone(),
        (Some(_), None) => None,
    };
    let marker_count = data
        .snapshot
        .as_ref()
        .map(|s| s.layers.markers.len())
        .unwrap_or(0);
    let zones_unmapped = data
        .zones
        .iter()
        .filter(|z| z.latitude.is_none() || z.longitude.is_none())
        .count();

    render(MapTemplate {
        active_page: "map",
        access_token: style.access_token.clone().unwrap_or_default(),
        style_url: style.style_url.clone(),
        center_lng: style.center[0],
        center_lat: style.center[1],
        zoom: style.zoom,
        map_error,
        live: LiveBadge::from_snapshot(data.snapshot.as_ref()),
        marker_count,
        zones_unmapped,
    })
}

// ── Supply chain ────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "supply_chain.html")]
struct SupplyChainTemplate {
    active_page: &'static str,
    nodes: Vec<NodeView>,
    routes: Vec<RouteView>,
}

pub async fn supply_chain(State(state): State<DashboardState>) -> Html<String> {
    let data = page_data(&state);
    let nodes = data.nodes.iter().map(NodeView::from_node).collect();
    let routes = data
        .routes
        .iter()
        .map(|r| RouteView::from_route(r, &data.nodes))
        .collect();

    render(SupplyChainTemplate {
        active_page: "supply_chain",
        nodes,
        routes,
    })
}
