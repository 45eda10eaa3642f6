//! Map rendering — marker, route and heatmap layers over a pluggable engine.
//!
//! A [`MapRenderer`] owns exactly one engine instance from `init` until
//! `destroy` (or drop). Markers are keyed by record id, so placing the same
//! record twice leaves one marker.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use guardian_core::Category;
use guardian_core::config::MapConfig;
use guardian_state::{RiskZone, SupplyChainNode, valid_coordinate};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{LiveError, LiveResult};
use crate::projector::{Projectable, RiskBucket, RiskProjection, project};

// ── Geometry ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> LiveResult<Self> {
        if !valid_coordinate(latitude, longitude) {
            return Err(LiveError::InvalidCoordinate {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// `[longitude, latitude]`, the GeoJSON position order.
    pub fn position(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }
}

/// The surface a map is drawn into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub attached: bool,
}

impl Container {
    pub fn new(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            attached: true,
        }
    }

    fn check(&self) -> LiveResult<()> {
        if !self.attached {
            return Err(LiveError::ContainerDetached(self.id.clone()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(LiveError::ContainerEmpty {
                id: self.id.clone(),
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapStyle {
    pub access_token: Option<String>,
    pub style_url: String,
    /// `[longitude, latitude]`.
    pub center: [f64; 2],
    pub zoom: f64,
}

impl MapStyle {
    pub fn from_config(config: &MapConfig, access_token: Option<String>) -> Self {
        Self {
            access_token,
            style_url: config.style_url.clone(),
            center: config.center,
            zoom: config.zoom,
        }
    }
}

// ── Layers ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub id: String,
    pub label: String,
    pub coordinate: Coordinate,
    pub category: Category,
    pub icon: &'static str,
    pub bucket: RiskBucket,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteLine {
    pub id: String,
    pub from: Coordinate,
    pub to: Coordinate,
    pub transport_mode: String,
    pub bucket: RiskBucket,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatPoint {
    pub coordinate: Coordinate,
    /// Intensity in `0.0..=1.0`.
    pub weight: f64,
}

/// A record that can be placed on the map as a marker.
pub trait MapFeature: Projectable {
    fn feature_id(&self) -> &str;
    fn label(&self) -> String;
    fn category(&self) -> Category;
    /// `None` when the record has no usable position.
    fn coordinate(&self) -> Option<Coordinate>;
}

impl MapFeature for SupplyChainNode {
    fn feature_id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> String {
        format!("{} ({})", self.name, self.location_type)
    }

    fn category(&self) -> Category {
        self.location_type.category()
    }

    fn coordinate(&self) -> Option<Coordinate> {
        Coordinate::new(self.latitude, self.longitude).ok()
    }
}

impl MapFeature for RiskZone {
    fn feature_id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> String {
        format!("{}: {} risk", self.location, self.risk_level)
    }

    fn category(&self) -> Category {
        Category::RiskAlert
    }

    fn coordinate(&self) -> Option<Coordinate> {
        Coordinate::new(self.latitude?, self.longitude?).ok()
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// Identifies one map instance inside an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EngineHandle(pub u64);

/// Backend that actually draws maps.
pub trait MapEngine: Send {
    fn create(&mut self, container: &Container, style: &MapStyle) -> LiveResult<EngineHandle>;
    fn add_marker(&mut self, handle: EngineHandle, marker: &Marker) -> LiveResult<()>;
    fn remove_marker(&mut self, handle: EngineHandle, id: &str) -> LiveResult<()>;
    fn add_route(&mut self, handle: EngineHandle, route: &RouteLine) -> LiveResult<()>;
    fn set_heatmap(&mut self, handle: EngineHandle, points: &[HeatPoint]) -> LiveResult<()>;
    fn release(&mut self, handle: EngineHandle);
}

// ── Renderer ───────────────────────────────────────────────────────

pub struct MapRenderer {
    engine: Box<dyn MapEngine>,
    handle: Option<EngineHandle>,
    container: String,
    markers: Vec<Marker>,
    marker_ids: HashSet<String>,
    routes: Vec<RouteLine>,
    heatmap: Vec<HeatPoint>,
}

impl std::fmt::Debug for MapRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapRenderer")
            .field("container", &self.container)
            .field("handle", &self.handle)
            .field("markers", &self.markers.len())
            .field("routes", &self.routes.len())
            .finish()
    }
}

impl MapRenderer {
    /// Create a map in `container` and place `initial` records on it.
    ///
    /// Fails before touching the engine when the access token is missing
    /// or the container cannot be drawn into. Records without a usable
    /// position are skipped.
    pub fn init<R: MapFeature>(
        mut engine: Box<dyn MapEngine>,
        container: &Container,
        style: &MapStyle,
        initial: &[R],
    ) -> LiveResult<Self> {
        if style
            .access_token
            .as_deref()
            .is_none_or(|t| t.trim().is_empty())
        {
            return Err(LiveError::MissingAccessToken);
        }
        container.check()?;

        let handle = engine.create(container, style)?;
        info!(container = %container.id, "map initialized");

        let mut renderer = Self {
            engine,
            handle: Some(handle),
            container: container.id.clone(),
            markers: Vec::new(),
            marker_ids: HashSet::new(),
            routes: Vec::new(),
            heatmap: Vec::new(),
        };
        for record in initial {
            renderer.place(record)?;
        }
        Ok(renderer)
    }

    /// Add one marker styled by `style`. Returns `false` if a marker with
    /// this record's id is already on the map.
    pub fn add_marker<R, S>(&mut self, coordinate: Coordinate, record: &R, style: S) -> LiveResult<bool>
    where
        R: MapFeature + ?Sized,
        S: FnOnce(&R) -> RiskProjection,
    {
        let handle = self.handle.ok_or(LiveError::MapDestroyed)?;
        let id = record.feature_id();
        if self.marker_ids.contains(id) {
            debug!(%id, "marker already placed");
            return Ok(false);
        }

        let projection = style(record);
        let category = record.category();
        let marker = Marker {
            id: id.to_string(),
            label: record.label(),
            coordinate,
            category,
            icon: category.icon(),
            bucket: projection.bucket,
            color: projection.color,
        };
        self.engine.add_marker(handle, &marker)?;
        self.marker_ids.insert(marker.id.clone());
        self.markers.push(marker);
        Ok(true)
    }

    /// Take a marker off the map. Returns `false` if no marker has this id.
    pub fn remove_marker(&mut self, id: &str) -> LiveResult<bool> {
        let handle = self.handle.ok_or(LiveError::MapDestroyed)?;
        if !self.marker_ids.contains(id) {
            return Ok(false);
        }
        self.engine.remove_marker(handle, id)?;
        self.marker_ids.remove(id);
        self.markers.retain(|m| m.id != id);
        debug!(%id, "marker removed");
        Ok(true)
    }

    /// Place a record at its own position, coloured by the risk projector.
    /// Returns `false` when it has no usable position or is already placed.
    pub fn place<R: MapFeature + ?Sized>(&mut self, record: &R) -> LiveResult<bool> {
        match record.coordinate() {
            Some(coordinate) => self.add_marker(coordinate, record, |r| project(r)),
            None => {
                if self.handle.is_none() {
                    return Err(LiveError::MapDestroyed);
                }
                warn!(id = record.feature_id(), "record has no usable position, not mapped");
                Ok(false)
            }
        }
    }

    /// Draw a route between two placed positions.
    pub fn add_route(&mut self, route: RouteLine) -> LiveResult<()> {
        let handle = self.handle.ok_or(LiveError::MapDestroyed)?;
        if self.routes.iter().any(|r| r.id == route.id) {
            return Ok(());
        }
        self.engine.add_route(handle, &route)?;
        self.routes.push(route);
        Ok(())
    }

    /// Replace the heatmap layer.
    pub fn set_heatmap(&mut self, points: Vec<HeatPoint>) -> LiveResult<()> {
        let handle = self.handle.ok_or(LiveError::MapDestroyed)?;
        self.engine.set_heatmap(handle, &points)?;
        self.heatmap = points;
        Ok(())
    }

    /// Release the engine instance. Safe to call more than once.
    pub fn destroy(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                self.engine.release(handle);
                info!(container = %self.container, "map destroyed");
                true
            }
            None => false,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.handle.is_none()
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn routes(&self) -> &[RouteLine] {
        &self.routes
    }

    pub fn heatmap(&self) -> &[HeatPoint] {
        &self.heatmap
    }

    pub fn layers(&self) -> MapLayers {
        MapLayers {
            markers: self.markers.clone(),
            routes: self.routes.clone(),
            heatmap: self.heatmap.clone(),
        }
    }
}

impl Drop for MapRenderer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Point-in-time copy of a renderer's layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MapLayers {
    pub markers: Vec<Marker>,
    pub routes: Vec<RouteLine>,
    pub heatmap: Vec<HeatPoint>,
}

impl MapLayers {
    /// One GeoJSON `FeatureCollection` holding every layer, each feature
    /// tagged with a `layer` property.
    pub fn to_geojson(&self) -> Value {
        let markers = self.markers.iter().map(|m| {
            json!({
                "type": "Feature",
                "id": m.id,
                "geometry": { "type": "Point", "coordinates": m.coordinate.position() },
                "properties": {
                    "layer": "markers",
                    "label": m.label,
                    "category": m.category,
                    "icon": m.icon,
                    "risk": m.bucket,
                    "color": m.color,
                }
            })
        });
        let routes = self.routes.iter().map(|r| {
            json!({
                "type": "Feature",
                "id": r.id,
                "geometry": {
                    "type": "LineString",
                    "coordinates": [r.from.position(), r.to.position()],
                },
                "properties": {
                    "layer": "routes",
                    "transport_mode": r.transport_mode,
                    "risk": r.bucket,
                    "color": r.color,
                }
            })
        });
        let heat = self.heatmap.iter().map(|p| {
            json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": p.coordinate.position() },
                "properties": { "layer": "heatmap", "weight": p.weight }
            })
        });
        json!({
            "type": "FeatureCollection",
            "features": markers.chain(routes).chain(heat).collect::<Vec<_>>(),
        })
    }
}

// ── In-memory engine ───────────────────────────────────────────────

/// Engine that keeps layer state in memory. Clones share state, so the
/// daemon can hand one clone to each mount and inspect them all.
#[derive(Clone, Default)]
pub struct LayerEngine {
    inner: Arc<Mutex<LayerEngineState>>,
}

#[derive(Default)]
struct LayerEngineState {
    next_handle: u64,
    maps: HashMap<EngineHandle, EngineMap>,
    released: u64,
}

struct EngineMap {
    container: String,
    layers: MapLayers,
}

impl LayerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map instances created and not yet released.
    pub fn live_maps(&self) -> usize {
        self.lock().maps.len()
    }

    /// Total releases performed.
    pub fn release_count(&self) -> u64 {
        self.lock().released
    }

    pub fn layers(&self, handle: EngineHandle) -> Option<MapLayers> {
        self.lock().maps.get(&handle).map(|m| m.layers.clone())
    }

    pub fn containers(&self) -> Vec<String> {
        let mut containers: Vec<String> =
            self.lock().maps.values().map(|m| m.container.clone()).collect();
        containers.sort();
        containers
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LayerEngineState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_map<T>(
        &self,
        handle: EngineHandle,
        f: impl FnOnce(&mut EngineMap) -> T,
    ) -> LiveResult<T> {
        let mut state = self.lock();
        state
            .maps
            .get_mut(&handle)
            .map(f)
            .ok_or_else(|| LiveError::Engine(format!("unknown map handle {}", handle.0)))
    }
}

impl MapEngine for LayerEngine {
    fn create(&mut self, container: &Container, _style: &MapStyle) -> LiveResult<EngineHandle> {
        let mut state = self.lock();
        state.next_handle += 1;
        let handle = EngineHandle(state.next_handle);
        state.maps.insert(
            handle,
            EngineMap {
                container: container.id.clone(),
                layers: MapLayers::default(),
            },
        );
        Ok(handle)
    }

    fn add_marker(&mut self, handle: EngineHandle, marker: &Marker) -> LiveResult<()> {
        self.with_map(handle, |m| m.layers.markers.push(marker.clone()))
    }

    fn remove_marker(&mut self, handle: EngineHandle, id: &str) -> LiveResult<()> {
        self.with_map(handle, |m| m.layers.markers.retain(|marker| marker.id != id))
    }

    fn add_route(&mut self, handle: EngineHandle, route: &RouteLine) -> LiveResult<()> {
        self.with_map(handle, |m| m.layers.routes.push(route.clone()))
    }

    fn set_heatmap(&mut self, handle: EngineHandle, points: &[HeatPoint]) -> LiveResult<()> {
        self.with_map(handle, |m| m.layers.heatmap = points.to_vec())
    }

    fn release(&mut self, handle: EngineHandle) {
        let mut state = self.lock();
        if state.maps.remove(&handle).is_some() {
            state.released += 1;
        }
    }
}
