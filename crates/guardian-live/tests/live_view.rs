//! End-to-end behaviour of a mounted live view against an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use guardian_core::{LocationType, RiskLevel};
use guardian_live::map::{Container, LayerEngine, MapEngine, MapStyle};
use guardian_live::view::{BoxFuture, EngineFactory, InitialData, InitialLoader, LiveMapView, LoadState, ViewConfig};
use guardian_live::{LiveError, LiveResult, ReconnectPolicy};
use guardian_state::{ChangeEvent, EventKind, MetricRecord, RiskZone, StateStore, SupplyChainNode, Table};
use tokio::sync::Notify;

fn config() -> ViewConfig {
    ViewConfig {
        schema: "public".to_string(),
        channel_prefix: "test".to_string(),
        buffer_capacity: 100,
        buffer_window: None,
        reconnect: ReconnectPolicy {
            base: Duration::from_millis(10),
            max: Duration::from_millis(50),
            max_attempts: None,
        },
        style: MapStyle {
            access_token: Some("pk.test".to_string()),
            style_url: "mapbox://styles/mapbox/light-v11".to_string(),
            center: [100.5, 13.75],
            zoom: 2.0,
        },
        container: Container::new("guardian-map", 1024, 640),
    }
}

fn engine_factory(engine: &LayerEngine) -> EngineFactory {
    let engine = engine.clone();
    Arc::new(move || Box::new(engine.clone()) as Box<dyn MapEngine>)
}

fn node(id: &str, name: &str, lat: f64, lng: f64) -> SupplyChainNode {
    SupplyChainNode {
        id: id.to_string(),
        name: name.to_string(),
        location_type: LocationType::Distribution,
        latitude: lat,
        longitude: lng,
        status: "active".to_string(),
        capacity: Some(1000.0),
        inventory_level: Some(640.0),
        metadata: Default::default(),
    }
}

fn metric(id: &str, value: f64) -> MetricRecord {
    MetricRecord {
        id: id.to_string(),
        metric_name: "Renewable Energy Share".to_string(),
        metric_value: value,
        metric_type: "energy".to_string(),
        timestamp: Utc::now(),
        unit: "%".to_string(),
    }
}

/// Loader that reads the store only once `gate` is opened.
struct GatedLoader {
    store: StateStore,
    gate: Arc<Notify>,
}

impl InitialLoader for GatedLoader {
    fn load(&self) -> BoxFuture<'static, LiveResult<InitialData>> {
        let store = self.store.clone();
        let gate = self.gate.clone();
        Box::pin(async move {
            gate.notified().await;
            store.load().await
        })
    }
}

/// Loader that reads nodes when the load starts but resolves only once
/// `gate` is opened.
struct SnapshotLoader {
    store: StateStore,
    gate: Arc<Notify>,
}

impl InitialLoader for SnapshotLoader {
    fn load(&self) -> BoxFuture<'static, LiveResult<InitialData>> {
        let nodes = self
            .store
            .list::<SupplyChainNode>()
            .map_err(LiveError::from);
        let gate = self.gate.clone();
        Box::pin(async move {
            gate.notified().await;
            Ok(InitialData {
                nodes: nodes?,
                ..Default::default()
            })
        })
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn mount_loads_rows_and_follows_inserts() {
    let store = StateStore::open_in_memory().unwrap();
    store.insert(&node("la", "Los Angeles DC", 34.05, -118.24)).unwrap();
    store.insert(&metric("m1", 91.0)).unwrap();

    let engine = LayerEngine::new();
    let view = LiveMapView::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        engine_factory(&engine),
        config(),
    );
    let mounted = view.mount();
    eventually(|| mounted.snapshot().load_state == LoadState::Ready).await;

    store.insert(&metric("m2", 42.0)).unwrap();
    eventually(|| mounted.snapshot().metrics.len() == 2).await;

    let snapshot = mounted.snapshot();
    assert_eq!(snapshot.metrics[0].id, "m1");
    assert_eq!(snapshot.metrics[1].id, "m2");
    assert_eq!(snapshot.layers.markers.len(), 1);
    assert!(
        view.notifier()
            .recent()
            .iter()
            .any(|t| t.title == "New ESG metric")
    );
}

#[tokio::test]
async fn insert_during_initial_load_is_placed_once() {
    let store = StateStore::open_in_memory().unwrap();
    store.insert(&node("la", "Los Angeles DC", 34.05, -118.24)).unwrap();
    store.insert(&node("sh", "Shanghai Plant", 31.23, 121.47)).unwrap();

    let engine = LayerEngine::new();
    let gate = Arc::new(Notify::new());
    let view = LiveMapView::new(
        Arc::new(store.clone()),
        Arc::new(GatedLoader {
            store: store.clone(),
            gate: gate.clone(),
        }),
        engine_factory(&engine),
        config(),
    );
    let mounted = view.mount();

    // Bangkok commits after the subscription opened, before the load resolves.
    store.insert(&node("bkk", "Bangkok Hub", 13.75, 100.5)).unwrap();
    eventually(|| mounted.snapshot().pending_rows == 1).await;
    gate.notify_one();
    eventually(|| mounted.snapshot().load_state == LoadState::Ready).await;

    let snapshot = mounted.snapshot();
    let bangkok = snapshot.layers.markers.iter().filter(|m| m.id == "bkk").count();
    assert_eq!(bangkok, 1);
    assert_eq!(snapshot.layers.markers.len(), 3);
    assert_eq!(snapshot.nodes.len(), 3);
    assert_eq!(snapshot.pending_rows, 0);
}

#[tokio::test]
async fn insert_missed_by_initial_load_arrives_live() {
    let store = StateStore::open_in_memory().unwrap();
    store.insert(&node("la", "Los Angeles DC", 34.05, -118.24)).unwrap();
    store.insert(&node("sh", "Shanghai Plant", 31.23, 121.47)).unwrap();

    let engine = LayerEngine::new();
    let gate = Arc::new(Notify::new());
    let view = LiveMapView::new(
        Arc::new(store.clone()),
        Arc::new(SnapshotLoader {
            store: store.clone(),
            gate: gate.clone(),
        }),
        engine_factory(&engine),
        config(),
    );
    let mounted = view.mount();

    store.insert(&node("bkk", "Bangkok Hub", 13.75, 100.5)).unwrap();
    eventually(|| mounted.snapshot().pending_rows == 1).await;
    gate.notify_one();
    eventually(|| mounted.snapshot().load_state == LoadState::Ready).await;

    let ids: Vec<String> = mounted
        .snapshot()
        .layers
        .markers
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["la", "sh", "bkk"]);
}

#[tokio::test]
async fn unmount_before_load_resolves_ignores_result() {
    let store = StateStore::open_in_memory().unwrap();
    store.insert(&metric("m1", 70.0)).unwrap();

    let engine = LayerEngine::new();
    let gate = Arc::new(Notify::new());
    let view = LiveMapView::new(
        Arc::new(store.clone()),
        Arc::new(GatedLoader {
            store: store.clone(),
            gate: gate.clone(),
        }),
        engine_factory(&engine),
        config(),
    );
    let mounted = view.mount();
    assert_eq!(engine.live_maps(), 1);

    mounted.unmount();
    mounted.unmount();
    assert_eq!(engine.release_count(), 1);
    assert_eq!(engine.live_maps(), 0);

    gate.notify_one();
    store.insert(&metric("m2", 71.0)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = mounted.snapshot();
    assert!(!snapshot.mounted);
    assert_eq!(snapshot.load_state, LoadState::Loading);
    assert!(snapshot.metrics.is_empty());
    assert_eq!(snapshot.pending_rows, 0);
    assert!(store.feed().open_channels().is_empty());
}

#[tokio::test]
async fn dropping_the_view_releases_everything() {
    let store = StateStore::open_in_memory().unwrap();
    let engine = LayerEngine::new();
    let view = LiveMapView::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        engine_factory(&engine),
        config(),
    );
    let mounted = view.mount();
    assert_eq!(store.feed().open_channels().len(), 3);

    drop(mounted);
    assert_eq!(engine.release_count(), 1);
    eventually(|| store.feed().open_channels().is_empty()).await;
}

#[tokio::test]
async fn remount_starts_empty_with_fresh_channels() {
    let store = StateStore::open_in_memory().unwrap();
    let engine = LayerEngine::new();
    let view = LiveMapView::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        engine_factory(&engine),
        config(),
    );

    let first = view.mount();
    eventually(|| first.snapshot().load_state == LoadState::Ready).await;
    store.insert(&metric("m1", 88.0)).unwrap();
    eventually(|| first.snapshot().metrics.len() == 1).await;
    first.unmount();

    let second = view.mount();
    assert_eq!(second.generation(), first.generation() + 1);
    assert!(second.snapshot().metrics.is_empty());
    eventually(|| second.snapshot().load_state == LoadState::Ready).await;
    assert_eq!(second.snapshot().metrics.len(), 1);
}

#[tokio::test]
async fn zone_without_coordinates_is_listed_not_mapped() {
    let store = StateStore::open_in_memory().unwrap();
    let engine = LayerEngine::new();
    let view = LiveMapView::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        engine_factory(&engine),
        config(),
    );
    let mounted = view.mount();
    eventually(|| mounted.snapshot().load_state == LoadState::Ready).await;

    store
        .insert(&RiskZone {
            id: "rz-1".to_string(),
            location: "Unmapped Port".to_string(),
            risk_level: RiskLevel::High,
            description: "Labour strike".to_string(),
            timestamp: Utc::now(),
            latitude: None,
            longitude: None,
        })
        .unwrap();
    store
        .insert(&RiskZone {
            id: "rz-2".to_string(),
            location: "Red Sea".to_string(),
            risk_level: RiskLevel::Medium,
            description: String::new(),
            timestamp: Utc::now(),
            latitude: Some(20.0),
            longitude: Some(38.0),
        })
        .unwrap();
    eventually(|| mounted.snapshot().zones.len() == 2).await;

    let snapshot = mounted.snapshot();
    assert_eq!(snapshot.layers.markers.len(), 1);
    assert_eq!(snapshot.layers.markers[0].id, "rz-2");
    assert_eq!(snapshot.layers.heatmap.len(), 1);
}

#[tokio::test]
async fn malformed_node_row_is_dropped() {
    let store = StateStore::open_in_memory().unwrap();
    let engine = LayerEngine::new();
    let view = LiveMapView::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        engine_factory(&engine),
        config(),
    );
    let mounted = view.mount();
    eventually(|| mounted.snapshot().load_state == LoadState::Ready).await;

    store.insert(&node("bkk", "Bangkok Hub", 13.75, 100.5)).unwrap();
    eventually(|| mounted.snapshot().nodes.len() == 1).await;

    // A writer that bypasses validation publishes a node with no latitude.
    store.feed().publish(ChangeEvent {
        seq: store.last_seq().unwrap() + 1,
        schema: "public".to_string(),
        table: Table::SupplyChainNodes,
        kind: EventKind::Insert,
        record: serde_json::json!({
            "id": "broken",
            "name": "Nowhere",
            "location_type": "warehouse",
            "latitude": null,
            "longitude": 100.0,
            "status": "active"
        }),
        old_record: None,
        committed_at: Utc::now(),
    });
    eventually(|| mounted.snapshot().dropped_rows == 1).await;

    assert_eq!(mounted.snapshot().nodes.len(), 1);
    assert_eq!(mounted.snapshot().layers.markers.len(), 1);
}

#[tokio::test]
async fn missing_token_keeps_tables_live() {
    let store = StateStore::open_in_memory().unwrap();
    let engine = LayerEngine::new();
    let mut cfg = config();
    cfg.style.access_token = None;
    let view = LiveMapView::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        engine_factory(&engine),
        cfg,
    );
    let mounted = view.mount();
    eventually(|| mounted.snapshot().load_state == LoadState::Ready).await;

    store.insert(&metric("m1", 55.0)).unwrap();
    eventually(|| mounted.snapshot().metrics.len() == 1).await;

    let snapshot = mounted.snapshot();
    assert!(snapshot.map_error.unwrap().contains("access token"));
    assert!(snapshot.layers.markers.is_empty());
    assert_eq!(engine.live_maps(), 0);
}

fn zone_at(id: &str, lat: f64, timestamp: chrono::DateTime<Utc>) -> RiskZone {
    RiskZone {
        id: id.to_string(),
        location: format!("Zone {id}"),
        risk_level: RiskLevel::Medium,
        description: String::new(),
        timestamp,
        latitude: Some(lat),
        longitude: Some(100.0),
    }
}

#[tokio::test]
async fn evicted_zones_leave_the_map() {
    let store = StateStore::open_in_memory().unwrap();
    let engine = LayerEngine::new();
    let view = LiveMapView::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        engine_factory(&engine),
        ViewConfig {
            buffer_capacity: 1,
            ..config()
        },
    );
    let mounted = view.mount();
    eventually(|| mounted.snapshot().load_state == LoadState::Ready).await;

    for n in 0..5 {
        store
            .insert(&zone_at(&format!("rz-{n}"), 10.0 + n as f64, Utc::now()))
            .unwrap();
    }
    eventually(|| mounted.snapshot().zones.iter().any(|z| z.id == "rz-4")).await;

    let snapshot = mounted.snapshot();
    assert_eq!(snapshot.zones.len(), 1);
    let markers: Vec<&str> = snapshot.layers.markers.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(markers, vec!["rz-4"]);
    assert_eq!(snapshot.layers.heatmap.len(), 1);
}

#[tokio::test]
async fn zone_older_than_window_is_never_mapped() {
    let store = StateStore::open_in_memory().unwrap();
    let engine = LayerEngine::new();
    let view = LiveMapView::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        engine_factory(&engine),
        ViewConfig {
            buffer_window: Some(Duration::from_secs(10 * 60)),
            ..config()
        },
    );
    let mounted = view.mount();
    eventually(|| mounted.snapshot().load_state == LoadState::Ready).await;

    let now = Utc::now();
    store.insert(&zone_at("fresh-a", 10.0, now)).unwrap();
    store
        .insert(&zone_at("stale", 11.0, now - chrono::Duration::hours(1)))
        .unwrap();
    store.insert(&zone_at("fresh-b", 12.0, now)).unwrap();
    eventually(|| mounted.snapshot().zones.iter().any(|z| z.id == "fresh-b")).await;

    let snapshot = mounted.snapshot();
    let zones: Vec<&str> = snapshot.zones.iter().map(|z| z.id.as_str()).collect();
    assert_eq!(zones, vec!["fresh-a", "fresh-b"]);
    let markers: Vec<&str> = snapshot.layers.markers.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(markers, vec!["fresh-a", "fresh-b"]);
}
