//! HTMX partial endpoints.
//!
//! These return HTML fragments (not full pages) for HTMX to swap into
//! specific DOM sections.

use askama::Template;
use axum::extract::State;
use axum::response::Html;

use crate::DashboardState;
use crate::pages::{METRIC_ROWS, page_data, recent_toasts, render};
use crate::views::*;

#[derive(Template)]
#[template(path = "_partials/metric_rows.html")]
struct MetricRowsPartial {
    metrics: Vec<MetricView>,
}

pub async fn metric_rows(State(state): State<DashboardState>) -> Html<String> {
    let data = page_data(&state);
    render(MetricRowsPartial {
        metrics: build_metric_views(&data.metrics, METRIC_ROWS),
    })
}

#[derive(Template)]
#[template(path = "_partials/toasts.html")]
struct ToastsPartial {
    toasts: Vec<ToastView>,
}

pub async fn toasts(State(state): State<DashboardState>) -> Html<String> {
    render(ToastsPartial {
        toasts: recent_toasts(&state, 5),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::response::IntoResponse;
    use chrono::Utc;
    use guardian_live::map::{LayerEngine, MapEngine};
    use guardian_live::view::{LiveMapView, ViewConfig};
    use guardian_live::{Container, MapStyle, ReconnectPolicy};
    use guardian_state::*;

    fn style() -> MapStyle {
        MapStyle {
            access_token: Some("pk.test".to_string()),
            style_url: "mapbox://styles/mapbox/light-v11".to_string(),
            center: [100.5018, 13.7563],
            zoom: 2.0,
        }
    }

    fn metric(id: &str, value: f64) -> MetricRecord {
        MetricRecord {
            id: id.to_string(),
            metric_name: format!("Water Intensity {id}"),
            metric_value: value,
            metric_type: "water".to_string(),
            timestamp: Utc::now(),
            unit: "%".to_string(),
        }
    }

    #[tokio::test]
    async fn metric_rows_render_from_store() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert(&metric("m1", 81.0)).unwrap();
        let state = DashboardState {
            store,
            live: None,
            map_style: style(),
        };
        let resp = metric_rows(State(state)).await;
        assert!(resp.0.contains("Water Intensity m1"));
        assert!(resp.0.contains("#22c55e"));
    }

    #[tokio::test]
    async fn toasts_render_empty_without_live_view() {
        let state = DashboardState {
            store: StateStore::open_in_memory().unwrap(),
            live: None,
            map_style: style(),
        };
        let resp = toasts(State(state)).await.into_response();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn metric_rows_follow_live_view() {
        let store = StateStore::open_in_memory().unwrap();
        let engine = LayerEngine::new();
        let view = LiveMapView::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(move || Box::new(engine.clone()) as Box<dyn MapEngine>),
            ViewConfig {
                schema: "public".to_string(),
                channel_prefix: "dash".to_string(),
                buffer_capacity: 10,
                buffer_window: None,
                reconnect: ReconnectPolicy::default(),
                style: style(),
                container: Container::new("guardian-map", 800, 600),
            },
        );
        let live = Arc::new(view.mount());
        let state = DashboardState {
            store: store.clone(),
            live: Some(live.clone()),
            map_style: style(),
        };

        for _ in 0..200 {
            if live.snapshot().load_state == guardian_live::LoadState::Ready {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        store.insert(&metric("live-1", 55.0)).unwrap();
        for _ in 0..200 {
            if !live.snapshot().metrics.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let rows = metric_rows(State(state.clone())).await;
        assert!(rows.0.contains("Water Intensity live-1"));

        let toasts = toasts(State(state)).await;
        assert!(toasts.0.contains("New ESG metric"));
    }
}
