//! Demo data for a fresh store.

use chrono::{Duration, Utc};
use guardian_core::{LocationType, RiskLevel};
use guardian_state::{
    MetricRecord, RiskZone, StateError, StateResult, StateStore, SupplyChainNode,
    SupplyChainRoute, TableRow,
};
use tracing::debug;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub inserted: usize,
    pub skipped: usize,
}

/// Insert the demo rows. Rows that already exist are skipped, so seeding
/// twice is harmless.
pub fn seed_demo_data(store: &StateStore) -> StateResult<SeedReport> {
    let mut report = SeedReport::default();

    for node in nodes() {
        insert(store, &node, &mut report)?;
    }
    for route in routes() {
        insert(store, &route, &mut report)?;
    }
    for metric in metrics() {
        insert(store, &metric, &mut report)?;
    }
    for zone in zones() {
        insert(store, &zone, &mut report)?;
    }
    Ok(report)
}

fn insert<R: TableRow>(store: &StateStore, row: &R, report: &mut SeedReport) -> StateResult<()> {
    match store.insert(row) {
        Ok(_) => report.inserted += 1,
        Err(StateError::Conflict(_)) => {
            debug!(table = %R::TABLE, id = row.id(), "already present, skipped");
            report.skipped += 1;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn node(
    id: &str,
    name: &str,
    location_type: LocationType,
    latitude: f64,
    longitude: f64,
    status: &str,
    capacity: f64,
    inventory: f64,
) -> SupplyChainNode {
    SupplyChainNode {
        id: id.to_string(),
        name: name.to_string(),
        location_type,
        latitude,
        longitude,
        status: status.to_string(),
        capacity: Some(capacity),
        inventory_level: Some(inventory),
        metadata: Default::default(),
    }
}

fn nodes() -> Vec<SupplyChainNode> {
    vec![
        node("bangkok-hub", "Bangkok Hub", LocationType::Warehouse, 13.7563, 100.5018, "active", 12_000.0, 8_400.0),
        node("la-distribution", "Los Angeles Distribution", LocationType::Distribution, 34.0522, -118.2437, "delayed", 20_000.0, 17_500.0),
        node("shanghai-plant", "Shanghai Plant", LocationType::Manufacturing, 31.2304, 121.4737, "active", 50_000.0, 21_000.0),
    ]
}

fn routes() -> Vec<SupplyChainRoute> {
    let route = |id: &str, from: &str, to: &str, mode: &str, level: RiskLevel| SupplyChainRoute {
        id: id.to_string(),
        origin_node_id: from.to_string(),
        destination_node_id: to.to_string(),
        transport_mode: mode.to_string(),
        status: "active".to_string(),
        risk_level: level,
    };
    vec![
        route("shanghai-bangkok", "shanghai-plant", "bangkok-hub", "sea", RiskLevel::Low),
        route("shanghai-la", "shanghai-plant", "la-distribution", "sea", RiskLevel::Medium),
        route("bangkok-la", "bangkok-hub", "la-distribution", "air", RiskLevel::High),
    ]
}

fn metrics() -> Vec<MetricRecord> {
    let now = Utc::now();
    let metric = |id: &str, name: &str, value: f64, kind: &str, minutes_ago: i64| MetricRecord {
        id: id.to_string(),
        metric_name: name.to_string(),
        metric_value: value,
        metric_type: kind.to_string(),
        timestamp: now - Duration::minutes(minutes_ago),
        unit: "%".to_string(),
    };
    vec![
        metric("carbon-reduction", "Carbon Reduction Target", 86.0, "emissions", 25),
        metric("renewable-share", "Renewable Energy Share", 64.0, "energy", 20),
        metric("water-recycling", "Water Recycling Rate", 41.5, "water", 15),
        metric("supplier-compliance", "Supplier Code Compliance", 92.0, "compliance", 10),
        metric("waste-diversion", "Waste Diversion Rate", 73.0, "waste", 5),
    ]
}

fn zones() -> Vec<RiskZone> {
    let now = Utc::now();
    vec![
        RiskZone {
            id: "red-sea".to_string(),
            location: "Red Sea Corridor".to_string(),
            risk_level: RiskLevel::High,
            description: "Shipping diversions around the Cape".to_string(),
            timestamp: now - Duration::hours(2),
            latitude: Some(20.0),
            longitude: Some(38.5),
        },
        RiskZone {
            id: "chao-phraya".to_string(),
            location: "Chao Phraya Basin".to_string(),
            risk_level: RiskLevel::Medium,
            description: "Seasonal flood watch".to_string(),
            timestamp: now - Duration::hours(1),
            latitude: Some(14.0),
            longitude: Some(100.6),
        },
        RiskZone {
            id: "tier2-audit".to_string(),
            location: "Tier-2 supplier audit backlog".to_string(),
            risk_level: RiskLevel::Low,
            description: String::new(),
            timestamp: now,
            latitude: None,
            longitude: None,
        },
    ]
}
