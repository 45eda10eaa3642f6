//! Live map view — mount/unmount composition of feeds, buffers and map.
//!
//! Mount order: map, then one insert subscription per live table, then the
//! one-shot initial load. Unmount releases in reverse: the `active` guard
//! first, subscriptions newest first, the map last. Rows that arrive while
//! the initial load is outstanding are held and applied after it, so a
//! record present in both is placed once.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use guardian_core::GuardianConfig;
use guardian_state::{
    ChangeFilter, MetricRecord, RiskZone, StateStore, SupplyChainNode, SupplyChainRoute, Table,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::buffer::MetricBuffer;
use crate::error::LiveResult;
use crate::feed::{ChangeFeedSubscriber, ChangeSource, FeedStatus, ReconnectPolicy, Subscription};
use crate::map::{Container, HeatPoint, MapEngine, MapFeature, MapLayers, MapRenderer, MapStyle, RouteLine};
use crate::notify::{Notifier, ToastLevel};
use crate::projector::project;

/// Boxed future returned by [`InitialLoader::load`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Creates one engine instance per mount.
pub type EngineFactory = Arc<dyn Fn() -> Box<dyn MapEngine> + Send + Sync>;

/// Tables the view follows live.
pub const LIVE_TABLES: [Table; 3] = [Table::EsgMetrics, Table::RiskZones, Table::SupplyChainNodes];

#[derive(Debug, Clone, Default)]
pub struct InitialData {
    pub metrics: Vec<MetricRecord>,
    pub zones: Vec<RiskZone>,
    pub nodes: Vec<SupplyChainNode>,
    pub routes: Vec<SupplyChainRoute>,
}

/// One-shot fetch of the rows a view starts from.
pub trait InitialLoader: Send + Sync + 'static {
    fn load(&self) -> BoxFuture<'static, LiveResult<InitialData>>;
}

impl InitialLoader for StateStore {
    fn load(&self) -> BoxFuture<'static, LiveResult<InitialData>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(InitialData {
                metrics: store.list::<MetricRecord>()?,
                zones: store.list::<RiskZone>()?,
                nodes: store.list::<SupplyChainNode>()?,
                routes: store.list::<SupplyChainRoute>()?,
            })
        })
    }
}

#[derive(Debug, Clone)]
pub struct ViewConfig {
    pub schema: String,
    pub channel_prefix: String,
    pub buffer_capacity: usize,
    pub buffer_window: Option<Duration>,
    pub reconnect: ReconnectPolicy,
    pub style: MapStyle,
    pub container: Container,
}

impl ViewConfig {
    pub fn from_config(config: &GuardianConfig) -> Self {
        let rt = &config.realtime;
        Self {
            schema: rt.schema.clone(),
            channel_prefix: rt.channel_prefix.clone(),
            buffer_capacity: rt.buffer_capacity,
            buffer_window: rt.buffer_window(),
            reconnect: ReconnectPolicy::from(rt),
            style: MapStyle::from_config(&config.map, config.map_token()),
            container: Container::new(
                "guardian-map",
                config.map.container_width,
                config.map.container_height,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "lowercase")]
pub enum LoadState {
    Loading,
    Ready,
    Failed(String),
}

/// Point-in-time copy of a mounted view.
#[derive(Debug, Clone, Serialize)]
pub struct ViewSnapshot {
    pub generation: u64,
    pub mounted: bool,
    pub load_state: LoadState,
    pub metrics: Vec<MetricRecord>,
    pub zones: Vec<RiskZone>,
    pub nodes: Vec<SupplyChainNode>,
    pub routes: Vec<SupplyChainRoute>,
    pub layers: MapLayers,
    pub map_error: Option<String>,
    pub feed_errors: Vec<String>,
    /// Live rows discarded because they could not be parsed.
    pub dropped_rows: u64,
    /// Live rows held until the initial load completes.
    pub pending_rows: usize,
}

pub struct LiveMapView {
    source: Arc<dyn ChangeSource>,
    loader: Arc<dyn InitialLoader>,
    engine: EngineFactory,
    notifier: Notifier,
    config: ViewConfig,
    generation: AtomicU64,
}

impl LiveMapView {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        loader: Arc<dyn InitialLoader>,
        engine: EngineFactory,
        config: ViewConfig,
    ) -> Self {
        Self {
            source,
            loader,
            engine,
            notifier: Notifier::default(),
            config,
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Mount a fresh view instance. Must be called inside a Tokio runtime.
    ///
    /// Never fails: a map or feed that cannot be brought up is reported
    /// through the snapshot and a toast, and the rest of the view still runs.
    pub fn mount(&self) -> MountedView {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let state = Arc::new(Mutex::new(ViewState::new(generation, &self.config)));

        match MapRenderer::init::<SupplyChainNode>(
            (self.engine)(),
            &self.config.container,
            &self.config.style,
            &[],
        ) {
            Ok(map) => lock(&state).map = Some(map),
            Err(e) => {
                lock(&state).map_error = Some(e.to_string());
                self.notifier
                    .notify(ToastLevel::Error, "Map unavailable", e.to_string());
            }
        }

        let status_notifier = self.notifier.clone();
        let subscriber =
            ChangeFeedSubscriber::new(self.source.clone(), self.config.reconnect.clone())
                .with_status_callback(Arc::new(move |status| {
                    report_feed_status(&status_notifier, status)
                }));

        let mut subscriptions = Vec::with_capacity(LIVE_TABLES.len());
        for table in LIVE_TABLES {
            let channel = format!("{}:{}:{}", self.config.channel_prefix, table, generation);
            let filter = ChangeFilter::inserts(self.config.schema.clone(), table);
            let row_state = state.clone();
            let row_notifier = self.notifier.clone();
            let on_row = move |row| on_live_row(&row_state, &row_notifier, table, row);

            match subscriber.subscribe(&channel, filter, on_row) {
                Ok(sub) => subscriptions.push(sub),
                Err(e) => {
                    lock(&state).feed_errors.push(e.to_string());
                    self.notifier.notify(
                        ToastLevel::Error,
                        "Live updates unavailable",
                        format!("{table}: {e}"),
                    );
                }
            }
        }

        let load = self.loader.load();
        let load_state = state.clone();
        let load_notifier = self.notifier.clone();
        let loader_task = tokio::spawn(async move {
            let result = load.await;
            on_initial_load(&load_state, &load_notifier, generation, result);
        });

        info!(generation, subscriptions = subscriptions.len(), "live view mounted");
        MountedView {
            generation,
            state,
            subscriptions: Mutex::new(subscriptions),
            loader_task: Mutex::new(Some(loader_task)),
            mounted: AtomicBool::new(true),
            notifier: self.notifier.clone(),
        }
    }
}

/// A mounted view instance. Dropping it unmounts.
pub struct MountedView {
    generation: u64,
    state: Arc<Mutex<ViewState>>,
    subscriptions: Mutex<Vec<Subscription>>,
    loader_task: Mutex<Option<JoinHandle<()>>>,
    mounted: AtomicBool,
    notifier: Notifier,
}

impl MountedView {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let view = lock(&self.state);
        ViewSnapshot {
            generation: self.generation,
            mounted: self.is_mounted(),
            load_state: view.load_state.clone(),
            metrics: view.metrics.snapshot(),
            zones: view.zones.snapshot(),
            nodes: view.nodes.clone(),
            routes: view.routes.clone(),
            layers: view.map.as_ref().map(|m| m.layers()).unwrap_or_default(),
            map_error: view.map_error.clone(),
            feed_errors: view.feed_errors.clone(),
            dropped_rows: view.dropped_rows,
            pending_rows: view.pending.len(),
        }
    }

    /// Tear the view down. Safe to call more than once.
    ///
    /// An initial load still in flight is left to finish; its result is
    /// discarded.
    pub fn unmount(&self) {
        if !self.mounted.swap(false, Ordering::SeqCst) {
            return;
        }
        lock(&self.state).active = false;

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock().unwrap_or_else(|e| e.into_inner()));
        for sub in subscriptions.into_iter().rev() {
            sub.unsubscribe();
        }

        if let Some(map) = lock(&self.state).map.as_mut() {
            map.destroy();
        }
        // Detach; the task observes `active == false`.
        self.loader_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        info!(generation = self.generation, "live view unmounted");
    }
}

impl Drop for MountedView {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn lock(state: &Mutex<ViewState>) -> MutexGuard<'_, ViewState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn report_feed_status(notifier: &Notifier, status: FeedStatus) {
    match status {
        FeedStatus::Interrupted { channel, reason } => notifier.notify(
            ToastLevel::Warning,
            "Live updates interrupted",
            format!("{channel}: {reason}, reconnecting"),
        ),
        FeedStatus::Reconnected { channel, .. } => {
            notifier.notify(ToastLevel::Info, "Live updates restored", channel)
        }
        FeedStatus::GaveUp { channel, attempts } => notifier.notify(
            ToastLevel::Error,
            "Live updates stopped",
            format!("{channel}: gave up after {attempts} attempts"),
        ),
    }
}

fn on_live_row(state: &Mutex<ViewState>, notifier: &Notifier, table: Table, row: serde_json::Value) {
    let mut view = lock(state);
    if !view.active {
        return;
    }
    if view.load_state == LoadState::Loading {
        view.pending.push((table, row));
        return;
    }
    view.apply_row(table, row, Some(notifier));
}

fn on_initial_load(
    state: &Mutex<ViewState>,
    notifier: &Notifier,
    generation: u64,
    result: LiveResult<InitialData>,
) {
    let mut view = lock(state);
    if !view.active || view.generation != generation {
        debug!(generation, "initial load finished after unmount, ignored");
        return;
    }

    match result {
        Ok(data) => {
            info!(
                metrics = data.metrics.len(),
                zones = data.zones.len(),
                nodes = data.nodes.len(),
                routes = data.routes.len(),
                "initial load complete"
            );
            for metric in data.metrics {
                view.add_metric(metric);
            }
            for zone in data.zones {
                view.add_zone(zone);
            }
            for node in data.nodes {
                view.add_node(node);
            }
            view.routes = data.routes;
            view.load_state = LoadState::Ready;
        }
        Err(e) => {
            view.load_state = LoadState::Failed(e.to_string());
            notifier.notify(ToastLevel::Error, "Failed to load data", e.to_string());
        }
    }

    let pending = std::mem::take(&mut view.pending);
    for (table, row) in pending {
        view.apply_row(table, row, Some(notifier));
    }
    view.connect_routes();
    view.refresh_heatmap();
}

struct ViewState {
    generation: u64,
    active: bool,
    load_state: LoadState,
    pending: Vec<(Table, serde_json::Value)>,
    metrics: MetricBuffer<MetricRecord>,
    zones: MetricBuffer<RiskZone>,
    nodes: Vec<SupplyChainNode>,
    routes: Vec<SupplyChainRoute>,
    map: Option<MapRenderer>,
    map_error: Option<String>,
    feed_errors: Vec<String>,
    dropped_rows: u64,
}

impl ViewState {
    fn new(generation: u64, config: &ViewConfig) -> Self {
        Self {
            generation,
            active: true,
            load_state: LoadState::Loading,
            pending: Vec::new(),
            metrics: MetricBuffer::new(config.buffer_capacity, config.buffer_window),
            zones: MetricBuffer::new(config.buffer_capacity, config.buffer_window),
            nodes: Vec::new(),
            routes: Vec::new(),
            map: None,
            map_error: None,
            feed_errors: Vec::new(),
            dropped_rows: 0,
        }
    }

    /// Parse and apply one live row. Unparseable rows are counted and dropped.
    fn apply_row(&mut self, table: Table, row: serde_json::Value, notifier: Option<&Notifier>) {
        match table {
            Table::EsgMetrics => match serde_json::from_value::<MetricRecord>(row) {
                Ok(metric) => {
                    let message = format!(
                        "{}: {}{}",
                        metric.metric_name, metric.metric_value, metric.unit
                    );
                    if self.add_metric(metric)
                        && let Some(n) = notifier
                    {
                        n.notify(ToastLevel::Info, "New ESG metric", message);
                    }
                }
                Err(e) => self.drop_row(table, e),
            },
            Table::RiskZones => match serde_json::from_value::<RiskZone>(row) {
                Ok(zone) => {
                    let level = if zone.risk_level == guardian_core::RiskLevel::High {
                        ToastLevel::Warning
                    } else {
                        ToastLevel::Info
                    };
                    let message = format!("{}: {} risk", zone.location, zone.risk_level);
                    if self.add_zone(zone) {
                        self.refresh_heatmap();
                        if let Some(n) = notifier {
                            n.notify(level, "Risk zone reported", message);
                        }
                    }
                }
                Err(e) => self.drop_row(table, e),
            },
            Table::SupplyChainNodes => match serde_json::from_value::<SupplyChainNode>(row) {
                Ok(node) => {
                    let name = node.name.clone();
                    if self.add_node(node) {
                        self.connect_routes();
                        if let Some(n) = notifier {
                            n.notify(ToastLevel::Success, "Supply chain node added", name);
                        }
                    }
                }
                Err(e) => self.drop_row(table, e),
            },
            Table::SupplyChainRoutes => {
                debug!("route rows are not followed live");
            }
        }
    }

    fn drop_row(&mut self, table: Table, error: serde_json::Error) {
        self.dropped_rows += 1;
        warn!(%table, %error, "malformed live row dropped");
    }

    fn add_metric(&mut self, metric: MetricRecord) -> bool {
        if self.metrics.iter().any(|m| m.id == metric.id) {
            return false;
        }
        self.metrics.append(metric);
        true
    }

    /// Zones without coordinates are listed but not mapped. Zones the
    /// buffer evicts are taken off the map; a zone already outside the
    /// window on arrival is never placed.
    fn add_zone(&mut self, zone: RiskZone) -> bool {
        if self.zones.iter().any(|z| z.id == zone.id) {
            return false;
        }
        let evicted = self.zones.append(zone.clone());
        let mut kept = true;
        for old in evicted {
            if old.id == zone.id {
                kept = false;
            } else {
                self.unplace(&old.id);
            }
        }
        if kept {
            self.place(&zone);
        } else {
            debug!(id = %zone.id, "zone outside the buffer window, not mapped");
        }
        kept
    }

    fn add_node(&mut self, node: SupplyChainNode) -> bool {
        if self.nodes.iter().any(|n| n.id == node.id) {
            return false;
        }
        self.place(&node);
        self.nodes.push(node);
        true
    }

    fn place<R: MapFeature>(&mut self, record: &R) {
        let Some(map) = self.map.as_mut() else {
            return;
        };
        if map.is_destroyed() {
            return;
        }
        if let Err(e) = map.place(record) {
            warn!(id = record.feature_id(), error = %e, "marker not placed");
            self.map_error = Some(e.to_string());
        }
    }

    fn unplace(&mut self, id: &str) {
        let Some(map) = self.map.as_mut() else {
            return;
        };
        if map.is_destroyed() {
            return;
        }
        if let Err(e) = map.remove_marker(id) {
            warn!(%id, error = %e, "marker not removed");
        }
    }

    /// Draw every route whose endpoints are both placed.
    fn connect_routes(&mut self) {
        let Some(map) = self.map.as_mut() else {
            return;
        };
        if map.is_destroyed() {
            return;
        }
        for route in &self.routes {
            let position = |id: &str| {
                self.nodes
                    .iter()
                    .find(|n| n.id == id)
                    .and_then(|n| n.coordinate())
            };
            let (Some(from), Some(to)) = (
                position(&route.origin_node_id),
                position(&route.destination_node_id),
            ) else {
                continue;
            };
            let projection = project(route);
            let line = RouteLine {
                id: route.id.clone(),
                from,
                to,
                transport_mode: route.transport_mode.clone(),
                bucket: projection.bucket,
                color: projection.color,
            };
            if let Err(e) = map.add_route(line) {
                warn!(route = %route.id, error = %e, "route not drawn");
            }
        }
    }

    fn refresh_heatmap(&mut self) {
        let points: Vec<HeatPoint> = self
            .zones
            .iter()
            .filter_map(|z| {
                z.coordinate().map(|coordinate| HeatPoint {
                    coordinate,
                    weight: z.risk_level.weight(),
                })
            })
            .collect();
        let Some(map) = self.map.as_mut() else {
            return;
        };
        if map.is_destroyed() {
            return;
        }
        if let Err(e) = map.set_heatmap(points) {
            warn!(error = %e, "heatmap not updated");
        }
    }
}
