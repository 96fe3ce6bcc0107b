//! Cache Writer and its durable store.
//!
//! The store keeps exactly one "latest" snapshot, replaced atomically each
//! cycle, plus an append-only history of every observation written.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::StoreError;
use crate::model::AggregationSnapshot;

/// Durable home of aggregation outcomes.
pub trait SnapshotStore: Send + Sync {
    /// Replace the previous latest record.
    fn write_latest(&self, snapshot: &AggregationSnapshot) -> Result<(), StoreError>;

    /// Append one row per observation in the snapshot.
    fn append_history(&self, snapshot: &AggregationSnapshot) -> Result<(), StoreError>;

    fn read_latest(&self) -> Result<Option<AggregationSnapshot>, StoreError>;

    /// Both writes for one cycle. Stores that can should make this atomic.
    fn persist(&self, snapshot: &AggregationSnapshot) -> Result<(), StoreError> {
        self.write_latest(snapshot)?;
        self.append_history(snapshot)
    }
}

/// One row of `indicator_history`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRow {
    pub indicator_name: String,
    pub value: f64,
    pub unit: Option<String>,
    pub source: String,
    pub origin: String,
    pub period: Option<String>,
    pub cycle_ts: String,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS latest_snapshot (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    cycle_ts    TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    payload     TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS indicator_history (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    indicator_name TEXT NOT NULL,
    value          REAL NOT NULL,
    unit           TEXT,
    source         TEXT NOT NULL,
    origin         TEXT NOT NULL,
    period         TEXT,
    cycle_ts       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_indicator
    ON indicator_history (indicator_name, id);
";

/// SQLite-backed store. One connection behind a mutex, so a write never
/// interleaves with a read of "latest".
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Open(format!("{}: {e}", path.display())))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| StoreError::Open(e.to_string()))?;
        let _mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::Open(e.to_string()))?;
        tracing::debug!(target: "store", path = %path.display(), "sqlite store opened");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::Open(format!("schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Newest first.
    pub fn history_for(&self, indicator: &str, limit: usize) -> Result<Vec<HistoryRow>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT indicator_name, value, unit, source, origin, period, cycle_ts
                 FROM indicator_history
                 WHERE indicator_name = ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )
            .map_err(StoreError::Read)?;
        let rows = stmt
            .query_map(params![indicator, limit as i64], |row| {
                Ok(HistoryRow {
                    indicator_name: row.get(0)?,
                    value: row.get(1)?,
                    unit: row.get(2)?,
                    source: row.get(3)?,
                    origin: row.get(4)?,
                    period: row.get(5)?,
                    cycle_ts: row.get(6)?,
                })
            })
            .map_err(StoreError::Read)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::Read)
    }

    pub fn history_len(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM indicator_history", [], |row| row.get(0))
            .map_err(StoreError::Read)?;
        Ok(n as usize)
    }
}

fn replace_latest(conn: &Connection, snapshot: &AggregationSnapshot) -> Result<(), StoreError> {
    let payload = serde_json::to_string(snapshot)?;
    conn.execute(
        "INSERT INTO latest_snapshot (id, cycle_ts, fingerprint, payload)
         VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
            cycle_ts = excluded.cycle_ts,
            fingerprint = excluded.fingerprint,
            payload = excluded.payload",
        params![snapshot.timestamp.to_rfc3339(), snapshot.fingerprint, payload],
    )
    .map_err(StoreError::Write)?;
    Ok(())
}

fn insert_history(conn: &Connection, snapshot: &AggregationSnapshot) -> Result<usize, StoreError> {
    let cycle_ts = snapshot.timestamp.to_rfc3339();
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO indicator_history
                (indicator_name, value, unit, source, origin, period, cycle_ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .map_err(StoreError::Write)?;
    let mut n = 0;
    for (name, indicator) in &snapshot.indicators {
        for o in &indicator.observations {
            stmt.execute(params![
                name,
                o.value,
                o.unit,
                o.source_id,
                o.origin.as_str(),
                o.period,
                cycle_ts,
            ])
            .map_err(StoreError::Write)?;
            n += 1;
        }
    }
    Ok(n)
}

impl SnapshotStore for SqliteStore {
    fn write_latest(&self, snapshot: &AggregationSnapshot) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::Write)?;
        replace_latest(&tx, snapshot)?;
        tx.commit().map_err(StoreError::Write)
    }

    fn append_history(&self, snapshot: &AggregationSnapshot) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::Write)?;
        insert_history(&tx, snapshot)?;
        tx.commit().map_err(StoreError::Write)
    }

    fn read_latest(&self) -> Result<Option<AggregationSnapshot>, StoreError> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row("SELECT payload FROM latest_snapshot WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(StoreError::Read)?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    fn persist(&self, snapshot: &AggregationSnapshot) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::Write)?;
        replace_latest(&tx, snapshot)?;
        let rows = insert_history(&tx, snapshot)?;
        tx.commit().map_err(StoreError::Write)?;
        tracing::debug!(target: "store", rows, fingerprint = %snapshot.fingerprint, "snapshot persisted");
        Ok(())
    }
}

/// In-memory store for tests and dry runs. `failing()` rejects every write.
#[derive(Default)]
pub struct MemoryStore {
    pub latest: Mutex<Option<AggregationSnapshot>>,
    pub history: Mutex<Vec<AggregationSnapshot>>,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }
}

impl SnapshotStore for MemoryStore {
    fn write_latest(&self, snapshot: &AggregationSnapshot) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Write(rusqlite::Error::InvalidQuery));
        }
        *self.latest.lock().map_err(|_| StoreError::Poisoned)? = Some(snapshot.clone());
        Ok(())
    }

    fn append_history(&self, snapshot: &AggregationSnapshot) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Write(rusqlite::Error::InvalidQuery));
        }
        self.history
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .push(snapshot.clone());
        Ok(())
    }

    fn read_latest(&self) -> Result<Option<AggregationSnapshot>, StoreError> {
        Ok(self.latest.lock().map_err(|_| StoreError::Poisoned)?.clone())
    }
}

/// Persists each cycle's snapshot; failures are reported, never fatal.
#[derive(Clone)]
pub struct CacheWriter {
    store: Arc<dyn SnapshotStore>,
}

impl CacheWriter {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn persist(&self, snapshot: &AggregationSnapshot) -> Result<(), StoreError> {
        match self.store.persist(snapshot) {
            Ok(()) => Ok(()),
            Err(e) => {
                counter!("aggregation_store_errors_total").increment(1);
                tracing::error!(target: "store", error = %e, "snapshot persistence failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConsolidatedIndicator, ObservationRecord, Origin};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn snapshot(value: f64, secs: i64) -> AggregationSnapshot {
        let mut indicators = BTreeMap::new();
        indicators.insert(
            "gdp_growth".to_string(),
            ConsolidatedIndicator {
                value,
                unit: Some("%".into()),
                contributing_sources: vec!["wb".into(), "imf".into()],
                sample_count: 2,
                observations: vec![
                    ObservationRecord {
                        source_id: "wb".into(),
                        value,
                        unit: Some("%".into()),
                        period: Some("2023".into()),
                        origin: Origin::Live,
                    },
                    ObservationRecord {
                        source_id: "imf".into(),
                        value,
                        unit: Some("%".into()),
                        period: None,
                        origin: Origin::Fallback,
                    },
                ],
            },
        );
        AggregationSnapshot {
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            fingerprint: crate::consolidate::fingerprint(&indicators),
            indicators,
            sources_used: vec!["wb".into(), "imf".into()],
            provenance: vec![],
        }
    }

    #[test]
    fn latest_is_replaced_and_history_appended() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.read_latest().unwrap().is_none());

        store.persist(&snapshot(3.0, 0)).unwrap();
        store.persist(&snapshot(4.0, 60)).unwrap();

        let latest = store.read_latest().unwrap().unwrap();
        assert_eq!(latest.indicators["gdp_growth"].value, 4.0);
        assert_eq!(store.history_len().unwrap(), 4);

        let rows = store.history_for("gdp_growth", 3).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].value, 4.0);
        assert_eq!(rows[0].source, "imf");
        assert_eq!(rows[0].origin, "FALLBACK");
        assert_eq!(rows[1].origin, "LIVE");
        assert_eq!(rows[1].period.as_deref(), Some("2023"));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("indicators.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.persist(&snapshot(3.5, 0)).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let latest = store.read_latest().unwrap().unwrap();
        assert_eq!(latest.indicators["gdp_growth"].value, 3.5);
        assert_eq!(latest, snapshot(3.5, 0));
    }

    #[test]
    fn cache_writer_reports_failures() {
        let writer = CacheWriter::new(Arc::new(MemoryStore::failing()));
        let err = writer.persist(&snapshot(1.0, 0)).unwrap_err();
        assert!(matches!(err, StoreError::Write(_)));

        let mem = Arc::new(MemoryStore::new());
        let writer = CacheWriter::new(mem.clone());
        writer.persist(&snapshot(1.0, 0)).unwrap();
        assert_eq!(mem.history.lock().unwrap().len(), 1);
        assert!(mem.read_latest().unwrap().is_some());
    }
}
