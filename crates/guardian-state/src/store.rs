//! StateStore — redb-backed row persistence for Guardian-IO.
//!
//! Provides typed CRUD over the named tables. Values are JSON envelopes
//! carrying the commit sequence that last wrote the row. Every committed
//! mutation is published on the store's [`ChangeFeed`] in sequence order.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::feed::ChangeFeed;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Schema every table lives in.
pub const DEFAULT_SCHEMA: &str = "public";

const FEED_CAPACITY: usize = 1024;
const FEED_BACKLOG: usize = 1024;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    feed: ChangeFeed,
    /// Held across commit + publish so events leave in sequence order.
    commit_lock: Arc<Mutex<()>>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            feed: ChangeFeed::new(FEED_CAPACITY, FEED_BACKLOG),
            commit_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in Table::ALL {
            txn.open_table(definition(table)).map_err(map_err!(Table))?;
        }
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// The store's change feed.
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Sequence of the most recent commit (0 for an empty store).
    pub fn last_seq(&self) -> StateResult<Seq> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let meta = txn.open_table(META).map_err(map_err!(Table))?;
        let seq = meta
            .get(LAST_SEQ_KEY)
            .map_err(map_err!(Read))?
            .map(|g| g.value())
            .unwrap_or(0);
        Ok(seq)
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Insert a new row. Fails with `Conflict` if the id is taken.
    pub fn insert<R: TableRow>(&self, row: &R) -> StateResult<ChangeEvent> {
        row.validate()?;
        let record = serde_json::to_value(row).map_err(map_err!(Serialize))?;
        self.commit(R::TABLE, EventKind::Insert, row.id(), Some(row), |existing| {
            if existing.is_some() {
                return Err(StateError::Conflict(format!("{}/{}", R::TABLE, row.id())));
            }
            Ok((record, None))
        })
    }

    /// Replace an existing row. Fails with `NotFound` if absent.
    pub fn update<R: TableRow>(&self, row: &R) -> StateResult<ChangeEvent> {
        row.validate()?;
        let record = serde_json::to_value(row).map_err(map_err!(Serialize))?;
        self.commit(R::TABLE, EventKind::Update, row.id(), Some(row), |existing| {
            match existing {
                Some(old) => Ok((record, Some(old))),
                None => Err(StateError::NotFound(format!("{}/{}", R::TABLE, row.id()))),
            }
        })
    }

    /// Delete a row by id. Returns the change event if it existed.
    pub fn delete<R: TableRow>(&self, id: &str) -> StateResult<Option<ChangeEvent>> {
        let result = self.commit::<R>(R::TABLE, EventKind::Delete, id, None, |existing| {
            match existing {
                Some(old) => Ok((old, None)),
                None => Err(StateError::NotFound(format!("{}/{id}", R::TABLE))),
            }
        });
        match result {
            Ok(event) => Ok(Some(event)),
            Err(StateError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write one row change, bump the sequence, commit, then publish.
    ///
    /// `decide` sees the current row (as JSON) and returns the event's
    /// `(record, old_record)` or an error that aborts the transaction.
    fn commit<R: TableRow>(
        &self,
        table: Table,
        kind: EventKind,
        id: &str,
        row: Option<&R>,
        decide: impl FnOnce(
            Option<serde_json::Value>,
        ) -> StateResult<(serde_json::Value, Option<serde_json::Value>)>,
    ) -> StateResult<ChangeEvent> {
        let _ordered = self.commit_lock.lock().unwrap_or_else(|e| e.into_inner());

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let event;
        {
            let mut rows = txn.open_table(definition(table)).map_err(map_err!(Table))?;
            let existing = match rows.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    let stored: StoredRow<serde_json::Value> =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    Some(stored.row)
                }
                None => None,
            };
            let (record, old_record) = decide(existing)?;

            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            let seq = meta
                .get(LAST_SEQ_KEY)
                .map_err(map_err!(Read))?
                .map(|g| g.value())
                .unwrap_or(0)
                + 1;
            meta.insert(LAST_SEQ_KEY, seq).map_err(map_err!(Write))?;

            match row {
                Some(row) => {
                    let value = serde_json::to_vec(&StoredRow { seq, row })
                        .map_err(map_err!(Serialize))?;
                    rows.insert(id, value.as_slice()).map_err(map_err!(Write))?;
                }
                None => {
                    rows.remove(id).map_err(map_err!(Write))?;
                }
            }

            event = ChangeEvent {
                seq,
                schema: DEFAULT_SCHEMA.to_string(),
                table,
                kind,
                record,
                old_record,
                committed_at: Utc::now(),
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%table, %kind, %id, seq = event.seq, "row committed");

        self.feed.publish(event.clone());
        Ok(event)
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Get one row by id.
    pub fn get<R: TableRow>(&self, id: &str) -> StateResult<Option<R>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn
            .open_table(definition(R::TABLE))
            .map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let stored: StoredRow<R> =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(stored.row))
            }
            None => Ok(None),
        }
    }

    /// List all rows of a table in commit order (oldest write first).
    pub fn list<R: TableRow>(&self) -> StateResult<Vec<R>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn
            .open_table(definition(R::TABLE))
            .map_err(map_err!(Table))?;
        let mut results: Vec<StoredRow<R>> = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let stored: StoredRow<R> =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(stored);
        }
        results.sort_by_key(|s| s.seq);
        Ok(results.into_iter().map(|s| s.row).collect())
    }

    /// The `limit` most recent rows of a table, newest first.
    pub fn list_recent<R: TableRow>(&self, limit: usize) -> StateResult<Vec<R>> {
        let mut rows = self.list::<R>()?;
        rows.reverse();
        rows.truncate(limit);
        Ok(rows)
    }

    /// Number of rows in a table.
    pub fn count(&self, table: Table) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let rows = txn.open_table(definition(table)).map_err(map_err!(Table))?;
        let count = rows.iter().map_err(map_err!(Read))?.count();
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ChangeFilter;
    use chrono::TimeZone;

    fn test_metric(id: &str, value: f64) -> MetricRecord {
        MetricRecord {
            id: id.to_string(),
            metric_name: "Renewable energy share".to_string(),
            metric_value: value,
            metric_type: "energy".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            unit: "%".to_string(),
        }
    }

    fn test_node(id: &str, name: &str, lat: f64, lng: f64) -> SupplyChainNode {
        SupplyChainNode {
            id: id.to_string(),
            name: name.to_string(),
            location_type: LocationType::Warehouse,
            latitude: lat,
            longitude: lng,
            status: "active".to_string(),
            capacity: Some(10_000.0),
            inventory_level: None,
            metadata: serde_json::Map::new(),
        }
    }

    // ── CRUD ───────────────────────────────────────────────────────

    #[test]
    fn insert_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let metric = test_metric("m-1", 82.0);

        let event = store.insert(&metric).unwrap();
        assert_eq!(event.kind, EventKind::Insert);
        assert_eq!(event.table, Table::EsgMetrics);
        assert_eq!(event.seq, 1);

        assert_eq!(store.get::<MetricRecord>("m-1").unwrap(), Some(metric));
    }

    #[test]
    fn get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get::<RiskZone>("nope").unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_conflicts_without_bumping_sequence() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert(&test_metric("m-1", 50.0)).unwrap();

        let err = store.insert(&test_metric("m-1", 60.0)).unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
        assert_eq!(store.last_seq().unwrap(), 1);
        assert_eq!(store.get::<MetricRecord>("m-1").unwrap().unwrap().metric_value, 50.0);
    }

    #[test]
    fn update_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        let mut node = test_node("n-1", "Bangkok DC", 13.7563, 100.5018);
        store.insert(&node).unwrap();

        node.status = "delayed".to_string();
        let event = store.update(&node).unwrap();
        assert_eq!(event.kind, EventKind::Update);
        assert_eq!(event.old_record.unwrap()["status"], "active");

        let stored = store.get::<SupplyChainNode>("n-1").unwrap().unwrap();
        assert_eq!(stored.status, "delayed");
    }

    #[test]
    fn update_missing_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.update(&test_metric("ghost", 1.0)).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn delete_existing_and_missing() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert(&test_metric("m-1", 50.0)).unwrap();

        let event = store.delete::<MetricRecord>("m-1").unwrap().unwrap();
        assert_eq!(event.kind, EventKind::Delete);
        assert_eq!(event.record["id"], "m-1");

        assert!(store.delete::<MetricRecord>("m-1").unwrap().is_none());
        assert!(store.get::<MetricRecord>("m-1").unwrap().is_none());
    }

    #[test]
    fn list_is_in_commit_order() {
        let store = StateStore::open_in_memory().unwrap();
        // Ids deliberately sort differently from insertion order.
        for id in ["zz", "aa", "mm"] {
            store.insert(&test_metric(id, 70.0)).unwrap();
        }
        let ids: Vec<String> = store
            .list::<MetricRecord>()
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["zz", "aa", "mm"]);

        let recent = store.list_recent::<MetricRecord>(2).unwrap();
        assert_eq!(recent[0].id, "mm");
        assert_eq!(recent.len(), 2);
        assert_eq!(store.count(Table::EsgMetrics).unwrap(), 3);
    }

    #[test]
    fn invalid_rows_are_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .insert(&test_node("n-1", "Nowhere", 123.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, StateError::Invalid(_)));

        let err = store.insert(&test_metric("m-nan", f64::NAN)).unwrap_err();
        assert!(matches!(err, StateError::Invalid(_)));
        assert_eq!(store.last_seq().unwrap(), 0);
    }

    // ── Change feed ────────────────────────────────────────────────

    #[tokio::test]
    async fn committed_inserts_are_published_in_order() {
        let store = StateStore::open_in_memory().unwrap();
        let mut rx = store
            .feed()
            .open(
                "test-metrics",
                ChangeFilter::inserts(DEFAULT_SCHEMA, Table::EsgMetrics),
                None,
            )
            .unwrap();

        store.insert(&test_metric("m-1", 10.0)).unwrap();
        store
            .insert(&test_node("n-1", "Bangkok DC", 13.7563, 100.5018))
            .unwrap();
        store.insert(&test_metric("m-2", 20.0)).unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.record["id"], "m-1");
        assert_eq!(second.record["id"], "m-2");
        assert!(first.seq < second.seq);
    }

    #[test]
    fn failed_writes_publish_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert(&test_metric("m-1", 10.0)).unwrap();
        let _ = store.insert(&test_metric("m-1", 10.0));
        let _ = store.delete::<MetricRecord>("missing");
        assert_eq!(store.last_seq().unwrap(), 1);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store
                .insert(&test_node("n-1", "Shanghai Plant", 31.2304, 121.4737))
                .unwrap();
        }

        // Reopen the same database file; sequence continues.
        let store = StateStore::open(&db_path).unwrap();
        let node = store.get::<SupplyChainNode>("n-1").unwrap();
        assert_eq!(node.unwrap().name, "Shanghai Plant");
        assert_eq!(store.last_seq().unwrap(), 1);
        let event = store.insert(&test_metric("m-1", 1.0)).unwrap();
        assert_eq!(event.seq, 2);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.list::<MetricRecord>().unwrap().is_empty());
        assert!(store.list::<SupplyChainRoute>().unwrap().is_empty());
        assert_eq!(store.last_seq().unwrap(), 0);
        assert!(store.delete::<RiskZone>("nope").unwrap().is_none());
    }
}
