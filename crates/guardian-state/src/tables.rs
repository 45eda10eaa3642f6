//! redb table definitions for the Guardian-IO state store.
//!
//! Row tables use `&str` keys (row id) and `&[u8]` values holding a JSON
//! envelope `{ "seq": u64, "row": {...} }`.

use redb::TableDefinition;

use crate::types::Table;

/// ESG metric records keyed by `{id}`.
pub const ESG_METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("esg_metrics");

/// Risk zones keyed by `{id}`.
pub const RISK_ZONES: TableDefinition<&str, &[u8]> = TableDefinition::new("risk_zones");

/// Supply-chain nodes keyed by `{id}`.
pub const SUPPLY_CHAIN_NODES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("supply_chain_nodes");

/// Supply-chain routes keyed by `{id}`.
pub const SUPPLY_CHAIN_ROUTES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("supply_chain_routes");

/// Store bookkeeping (`last_seq`).
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

pub const LAST_SEQ_KEY: &str = "last_seq";

pub(crate) fn definition(table: Table) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match table {
        Table::EsgMetrics => ESG_METRICS,
        Table::RiskZones => RISK_ZONES,
        Table::SupplyChainNodes => SUPPLY_CHAIN_NODES,
        Table::SupplyChainRoutes => SUPPLY_CHAIN_ROUTES,
    }
}
