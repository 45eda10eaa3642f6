//! Domain types for the Guardian-IO state store.
//!
//! Rows are authored by external writers (forms, ingestion jobs, other
//! clients) and read by the live views. All types serialize to the JSON
//! shape the workspace front end consumes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use guardian_core::{LocationType, RiskLevel};

use crate::error::{StateError, StateResult};

/// Unique identifier for a row within its table.
pub type RowId = String;

/// Commit sequence number assigned by the store.
pub type Seq = u64;

// ── Tables ─────────────────────────────────────────────────────────

/// Named tables exposed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    EsgMetrics,
    RiskZones,
    SupplyChainNodes,
    SupplyChainRoutes,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::EsgMetrics,
        Table::RiskZones,
        Table::SupplyChainNodes,
        Table::SupplyChainRoutes,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::EsgMetrics => "esg_metrics",
            Table::RiskZones => "risk_zones",
            Table::SupplyChainNodes => "supply_chain_nodes",
            Table::SupplyChainRoutes => "supply_chain_routes",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| StateError::NotFound(format!("table {s}")))
    }
}

/// A row type stored in one of the named tables.
pub trait TableRow: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: Table;

    fn id(&self) -> &str;

    /// Reject rows the store must never hold.
    fn validate(&self) -> StateResult<()> {
        if self.id().trim().is_empty() {
            return Err(StateError::Invalid(format!("{}: empty id", Self::TABLE)));
        }
        Ok(())
    }
}

// ── ESG metrics ────────────────────────────────────────────────────

/// One ESG metric observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    pub id: RowId,
    pub metric_name: String,
    pub metric_value: f64,
    /// Free-form tag: "emissions", "energy", "compliance", ...
    pub metric_type: String,
    pub timestamp: DateTime<Utc>,
    /// Unit of `metric_value`; "%" marks a percentage-scale score.
    pub unit: String,
}

impl TableRow for MetricRecord {
    const TABLE: Table = Table::EsgMetrics;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> StateResult<()> {
        if self.id.trim().is_empty() {
            return Err(StateError::Invalid("esg_metrics: empty id".to_string()));
        }
        if !self.metric_value.is_finite() {
            return Err(StateError::Invalid(format!(
                "esg_metrics/{}: metric_value is not finite",
                self.id
            )));
        }
        Ok(())
    }
}

// ── Risk zones ─────────────────────────────────────────────────────

/// A region flagged with a categorical risk level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskZone {
    pub id: RowId,
    pub location: String,
    #[serde(alias = "riskLevel")]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub description: String,
    pub timestamp: DateTime<Utc>,
    /// Optional coordinates; zones without them are listed but not mapped.
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl TableRow for RiskZone {
    const TABLE: Table = Table::RiskZones;

    fn id(&self) -> &str {
        &self.id
    }
}

// ── Supply chain ───────────────────────────────────────────────────

/// A facility in the supply-chain map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupplyChainNode {
    pub id: RowId,
    pub name: String,
    pub location_type: LocationType,
    pub latitude: f64,
    pub longitude: f64,
    /// "active", "delayed", "disrupted", ...
    pub status: String,
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub inventory_level: Option<f64>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl TableRow for SupplyChainNode {
    const TABLE: Table = Table::SupplyChainNodes;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> StateResult<()> {
        if self.id.trim().is_empty() {
            return Err(StateError::Invalid("supply_chain_nodes: empty id".to_string()));
        }
        if !valid_coordinate(self.latitude, self.longitude) {
            return Err(StateError::Invalid(format!(
                "supply_chain_nodes/{}: coordinates out of range ({}, {})",
                self.id, self.latitude, self.longitude
            )));
        }
        Ok(())
    }
}

/// A transport link between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupplyChainRoute {
    pub id: RowId,
    pub origin_node_id: RowId,
    pub destination_node_id: RowId,
    /// "sea", "air", "rail", "road".
    pub transport_mode: String,
    pub status: String,
    pub risk_level: RiskLevel,
}

impl TableRow for SupplyChainRoute {
    const TABLE: Table = Table::SupplyChainRoutes;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> StateResult<()> {
        if self.id.trim().is_empty() {
            return Err(StateError::Invalid("supply_chain_routes: empty id".to_string()));
        }
        if self.origin_node_id == self.destination_node_id {
            return Err(StateError::Invalid(format!(
                "supply_chain_routes/{}: origin and destination are the same node",
                self.id
            )));
        }
        Ok(())
    }
}

/// Whether a latitude/longitude pair is a real position on the map.
pub fn valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

// ── Change events ──────────────────────────────────────────────────

/// Kind of committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Insert => "INSERT",
            EventKind::Update => "UPDATE",
            EventKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(EventKind::Insert),
            "UPDATE" => Ok(EventKind::Update),
            "DELETE" => Ok(EventKind::Delete),
            other => Err(StateError::Invalid(format!("unknown event kind {other}"))),
        }
    }
}

/// A committed row change, as delivered on the change feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    pub seq: Seq,
    pub schema: String,
    pub table: Table,
    pub kind: EventKind,
    /// New row for inserts and updates; the removed row for deletes.
    pub record: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<serde_json::Value>,
    pub committed_at: DateTime<Utc>,
}

/// On-disk value envelope.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredRow<R> {
    pub seq: Seq,
    pub row: R,
}
