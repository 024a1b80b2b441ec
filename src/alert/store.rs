//! SQLite archive of emitted alerts.

use std::path::Path;

use rusqlite::{params, Connection};
use tracing::debug;

use super::sink::{AlertSink, PersistenceError};
use super::Alert;

pub struct AlertStore {
    conn: Connection,
}

impl AlertStore {
    /// Open (or create) the archive at `path`.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Archive one alert. Re-recording the same alert id is a no-op.
    pub fn record(&self, alert: &Alert) -> Result<(), PersistenceError> {
        let alert_json = serde_json::to_string(alert)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO alerts (alert_id, window_start, score, alert_json, recorded_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))",
            params![
                alert.alert_id.to_string(),
                alert.epoch_secs(),
                alert.score,
                alert_json
            ],
        )?;
        Ok(())
    }

    /// Archive a batch in one transaction.
    pub fn record_all(&mut self, alerts: &[Alert]) -> Result<usize, PersistenceError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO alerts (alert_id, window_start, score, alert_json, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, datetime('now'))",
            )?;
            for alert in alerts {
                let alert_json = serde_json::to_string(alert)?;
                stmt.execute(params![
                    alert.alert_id.to_string(),
                    alert.epoch_secs(),
                    alert.score,
                    alert_json
                ])?;
            }
        }
        tx.commit()?;
        debug!(alerts = alerts.len(), "archived alerts");
        Ok(alerts.len())
    }

    /// Most recent alerts by window start, newest first.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<Alert>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT alert_json FROM alerts ORDER BY window_start DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| row.get::<_, String>(0))?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(serde_json::from_str(&row?)?);
        }
        Ok(alerts)
    }

    pub fn count(&self) -> Result<usize, PersistenceError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

impl AlertSink for AlertStore {
    fn append(&mut self, alert: &Alert) -> Result<(), PersistenceError> {
        self.record(alert)
    }

    fn flush(&mut self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

fn migrate(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS alerts (
            id INTEGER PRIMARY KEY,
            alert_id TEXT NOT NULL UNIQUE,
            window_start REAL NOT NULL,
            score REAL NOT NULL,
            alert_json TEXT NOT NULL,
            recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_alerts_window ON alerts(window_start);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{emit, MemorySink, DEFAULT_EXPLANATION};
    use crate::detect::testutil::flood_vector;
    use crate::detect::WindowScore;

    fn alerts(n: usize) -> Vec<Alert> {
        let v: Vec<_> = (0..n).map(|i| flood_vector(1_700_000_000.0 + i as f64)).collect();
        let s = vec![WindowScore::from_score(-0.3); n];
        emit(&v, &s, DEFAULT_EXPLANATION, &mut MemorySink::default())
            .unwrap()
            .alerts
    }

    #[test]
    fn test_record_and_list_recent() {
        let mut store = AlertStore::open_in_memory().unwrap();
        let batch = alerts(5);
        assert_eq!(store.record_all(&batch).unwrap(), 5);

        let recent = store.list_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0], batch[4]);
        assert_eq!(recent[1], batch[3]);
    }

    #[test]
    fn test_duplicate_alert_ignored() {
        let store = AlertStore::open_in_memory().unwrap();
        let batch = alerts(1);
        store.record(&batch[0]).unwrap();
        store.record(&batch[0]).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_store_as_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.db");
        let v = [flood_vector(5.0), flood_vector(6.0)];
        let s = [WindowScore::from_score(-1.0); 2];
        {
            let mut store = AlertStore::open(&path).unwrap();
            let emission = emit(&v, &s, DEFAULT_EXPLANATION, &mut store).unwrap();
            assert_eq!(emission.persisted.unwrap(), 2);
        }
        let reopened = AlertStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 2);
    }
}
