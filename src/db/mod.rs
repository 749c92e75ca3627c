pub mod schema;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rusqlite::types::Type;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::{DetectionKind, PatternSignature, ViolationReport};
use crate::response::ledger::{BlacklistEntry, Incident, PauseState, ResponseAction, ThreatIntelEntry};

pub struct Database {
    conn: Connection,
}

/// Thread-safe wrapper around Database.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let db = Database::open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(db)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an incident to the history.
    pub fn insert_incident(&self, incident: &Incident) -> Result<(), rusqlite::Error> {
        self.lock().insert_incident(incident)
    }

    /// Total persisted incidents.
    pub fn get_incident_count(&self) -> Result<u64, rusqlite::Error> {
        self.lock().get_incident_count()
    }

    /// Look up a single incident by index.
    pub fn get_incident(&self, index: u64) -> Result<Option<Incident>, rusqlite::Error> {
        self.lock().get_incident(index)
    }

    /// Most recent incidents, newest first.
    pub fn get_recent_incidents(&self, limit: usize) -> Result<Vec<Incident>, rusqlite::Error> {
        self.lock().get_recent_incidents(limit)
    }

    pub fn get_incidents_by_kind(&self, kind: DetectionKind, limit: usize) -> Result<Vec<Incident>, rusqlite::Error> {
        self.lock().get_incidents_by_kind(kind, limit)
    }

    /// Incidents recorded (wall clock) within a time range.
    pub fn get_incidents_by_timerange(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Incident>, rusqlite::Error> {
        self.lock().get_incidents_by_timerange(from, to)
    }

    /// Highest sequence number among persisted incidents.
    pub fn last_handled_sequence(&self) -> Result<Option<u64>, rusqlite::Error> {
        self.lock().last_handled_sequence()
    }

    pub fn insert_blacklist(&self, entry: &BlacklistEntry) -> Result<(), rusqlite::Error> {
        self.lock().insert_blacklist(entry)
    }

    pub fn delete_blacklist(&self, address: &str) -> Result<(), rusqlite::Error> {
        self.lock().delete_blacklist(address)
    }

    pub fn load_blacklist(&self) -> Result<Vec<BlacklistEntry>, rusqlite::Error> {
        self.lock().load_blacklist()
    }

    pub fn upsert_threat(&self, entry: &ThreatIntelEntry) -> Result<(), rusqlite::Error> {
        self.lock().upsert_threat(entry)
    }

    pub fn load_threat_intel(&self) -> Result<Vec<ThreatIntelEntry>, rusqlite::Error> {
        self.lock().load_threat_intel()
    }

    pub fn save_pause_state(&self, state: &PauseState) -> Result<(), rusqlite::Error> {
        self.lock().save_pause_state(state)
    }

    pub fn load_pause_state(&self) -> Result<PauseState, rusqlite::Error> {
        self.lock().load_pause_state()
    }
}

const INCIDENT_COLUMNS: &str = "idx, action, report";

/// SQLite integers are signed; values past `i64::MAX` are refused, not wrapped.
fn to_sql_int(value: u64) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn column_u64(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn insert_incident(&self, incident: &Incident) -> Result<(), rusqlite::Error> {
        let report = &incident.report;
        let json = serde_json::to_string(report)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        self.conn.execute(
            "INSERT INTO incidents (idx, detection_kind, violator, sequence_number, severity, confidence, pattern_signature, action, report, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))",
            rusqlite::params![
                to_sql_int(incident.index)?,
                report.detection_kind.as_str(),
                report.violator,
                to_sql_int(report.sequence_number)?,
                report.severity,
                report.confidence,
                report.pattern_signature.to_hex(),
                incident.action.as_str(),
                json,
            ],
        )?;
        Ok(())
    }

    fn row_to_incident(row: &rusqlite::Row) -> rusqlite::Result<Incident> {
        let action: String = row.get(1)?;
        let json: String = row.get(2)?;
        let report: ViolationReport = serde_json::from_str(&json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
        Ok(Incident {
            index: column_u64(row, 0)?,
            report,
            action: ResponseAction::from(action.as_str()),
        })
    }

    pub fn get_incident_count(&self) -> Result<u64, rusqlite::Error> {
        self.conn
            .query_row("SELECT COUNT(*) FROM incidents", [], |row| column_u64(row, 0))
    }

    pub fn get_incident(&self, index: u64) -> Result<Option<Incident>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE idx = ?1"
        ))?;
        let mut rows = stmt.query_map(rusqlite::params![to_sql_int(index)?], Self::row_to_incident)?;
        rows.next().transpose()
    }

    pub fn get_recent_incidents(&self, limit: usize) -> Result<Vec<Incident>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents ORDER BY idx DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(rusqlite::params![sql_limit(limit)], Self::row_to_incident)?;
        rows.collect()
    }

    pub fn get_incidents_by_kind(&self, kind: DetectionKind, limit: usize) -> Result<Vec<Incident>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE detection_kind = ?1 ORDER BY idx DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(rusqlite::params![kind.as_str(), sql_limit(limit)], Self::row_to_incident)?;
        rows.collect()
    }

    pub fn get_incidents_by_timerange(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Incident>, rusqlite::Error> {
        let from_str = from.format("%Y-%m-%d %H:%M:%S").to_string();
        let to_str = to.format("%Y-%m-%d %H:%M:%S").to_string();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE created_at >= ?1 AND created_at <= ?2 ORDER BY idx DESC"
        ))?;
        let rows = stmt.query_map(rusqlite::params![from_str, to_str], Self::row_to_incident)?;
        rows.collect()
    }

    pub fn last_handled_sequence(&self) -> Result<Option<u64>, rusqlite::Error> {
        self.conn.query_row("SELECT MAX(sequence_number) FROM incidents", [], |row| {
            match row.get::<_, Option<i64>>(0)? {
                Some(_) => column_u64(row, 0).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Insert a blacklist entry; an existing entry for the address is kept.
    pub fn insert_blacklist(&self, entry: &BlacklistEntry) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR IGNORE INTO blacklist (address, timestamp, reason_kind, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))",
            rusqlite::params![entry.address, to_sql_int(entry.timestamp)?, entry.reason_kind.as_str(), entry.confidence],
        )?;
        Ok(())
    }

    pub fn delete_blacklist(&self, address: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute("DELETE FROM blacklist WHERE address = ?1", rusqlite::params![address])?;
        Ok(())
    }

    pub fn load_blacklist(&self) -> Result<Vec<BlacklistEntry>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT address, timestamp, reason_kind, confidence FROM blacklist ORDER BY address",
        )?;
        let rows = stmt.query_map([], |row| {
            let kind: String = row.get(2)?;
            Ok(BlacklistEntry {
                address: row.get(0)?,
                timestamp: column_u64(row, 1)?,
                reason_kind: DetectionKind::from(kind.as_str()),
                confidence: row.get(3)?,
            })
        })?;
        rows.collect()
    }

    pub fn upsert_threat(&self, entry: &ThreatIntelEntry) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR REPLACE INTO threat_intel (pattern_signature, first_seen, last_seen, occurrence_count, detection_kind, resolved)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                entry.pattern_signature.to_hex(),
                to_sql_int(entry.first_seen)?,
                to_sql_int(entry.last_seen)?,
                to_sql_int(entry.occurrence_count)?,
                entry.detection_kind.as_str(),
                entry.resolved as i32,
            ],
        )?;
        Ok(())
    }

    pub fn load_threat_intel(&self) -> Result<Vec<ThreatIntelEntry>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT pattern_signature, first_seen, last_seen, occurrence_count, detection_kind, resolved
             FROM threat_intel ORDER BY pattern_signature",
        )?;
        let rows = stmt.query_map([], |row| {
            let sig: String = row.get(0)?;
            let pattern_signature = PatternSignature::from_hex(&sig).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(0, Type::Text, format!("bad signature {sig}").into())
            })?;
            let kind: String = row.get(4)?;
            let resolved: i32 = row.get(5)?;
            Ok(ThreatIntelEntry {
                pattern_signature,
                first_seen: column_u64(row, 1)?,
                last_seen: column_u64(row, 2)?,
                occurrence_count: column_u64(row, 3)?,
                detection_kind: DetectionKind::from(kind.as_str()),
                resolved: resolved != 0,
            })
        })?;
        rows.collect()
    }

    pub fn save_pause_state(&self, state: &PauseState) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR REPLACE INTO pause_state (id, is_paused, timestamp, reason_kind) VALUES (1, ?1, ?2, ?3)",
            rusqlite::params![
                state.is_paused as i32,
                to_sql_int(state.timestamp)?,
                state.reason_kind.map(|k| k.as_str()),
            ],
        )?;
        Ok(())
    }

    /// Stored pause state, or the unpaused default when none was saved.
    pub fn load_pause_state(&self) -> Result<PauseState, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT is_paused, timestamp, reason_kind FROM pause_state WHERE id = 1")?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            let paused: i32 = row.get(0)?;
            let kind: Option<String> = row.get(2)?;
            Ok(PauseState {
                is_paused: paused != 0,
                timestamp: column_u64(row, 1)?,
                reason_kind: kind.as_deref().map(DetectionKind::from),
            })
        } else {
            Ok(PauseState::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SignatureSubject;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn open_temp_db() -> SharedDatabase {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "launchguard_test_{}_{}.db",
            std::process::id(),
            id
        ));
        // Remove if leftover from previous run
        let _ = std::fs::remove_file(&path);
        SharedDatabase::open(&path).unwrap()
    }

    fn incident(index: u64, kind: DetectionKind, seq: u64) -> Incident {
        Incident {
            index,
            report: ViolationReport {
                violator: Some("0xdead".to_string()),
                related_addresses: vec!["0xbeef".to_string()],
                accumulated_basis_points: u128::from(u64::MAX) * 4,
                detection_kind: kind,
                sequence_number: seq,
                observed_at: 1_700_000_000,
                severity: 80,
                confidence: 90,
                pattern_signature: PatternSignature::compute(kind, SignatureSubject::Sequence(seq)),
            },
            action: ResponseAction::Blacklisted,
        }
    }

    #[test]
    fn incident_roundtrip() {
        let db = open_temp_db();
        let stored = incident(0, DetectionKind::LiquidityDrain, 42);
        db.insert_incident(&stored).unwrap();
        assert_eq!(db.get_incident(0).unwrap(), Some(stored));
        assert!(db.get_incident(1).unwrap().is_none());
    }

    #[test]
    fn incident_queries() {
        let db = open_temp_db();
        db.insert_incident(&incident(0, DetectionKind::LiquidityDrain, 10)).unwrap();
        db.insert_incident(&incident(1, DetectionKind::WashTrading, 30)).unwrap();
        db.insert_incident(&incident(2, DetectionKind::WashTrading, 20)).unwrap();

        assert_eq!(db.get_incident_count().unwrap(), 3);
        let recent = db.get_recent_incidents(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].index, 2);

        let wash = db.get_incidents_by_kind(DetectionKind::WashTrading, 10).unwrap();
        assert_eq!(wash.len(), 2);
        assert_eq!(db.last_handled_sequence().unwrap(), Some(30));
    }

    #[test]
    fn empty_history() {
        let db = open_temp_db();
        assert_eq!(db.get_incident_count().unwrap(), 0);
        assert_eq!(db.last_handled_sequence().unwrap(), None);
        assert_eq!(db.load_pause_state().unwrap(), PauseState::default());
    }

    #[test]
    fn incidents_by_timerange() {
        let db = open_temp_db();
        db.insert_incident(&incident(0, DetectionKind::TrendDrain, 1)).unwrap();
        let from = Utc::now() - chrono::Duration::hours(1);
        let to = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(db.get_incidents_by_timerange(from, to).unwrap().len(), 1);
    }

    #[test]
    fn blacklist_insert_keeps_first() {
        let db = open_temp_db();
        let first = BlacklistEntry {
            address: "0xabc".into(),
            timestamp: 100,
            reason_kind: DetectionKind::GasFrontRunning,
            confidence: 85,
        };
        let later = BlacklistEntry { timestamp: 999, confidence: 99, ..first.clone() };
        db.insert_blacklist(&first).unwrap();
        db.insert_blacklist(&later).unwrap();
        assert_eq!(db.load_blacklist().unwrap(), vec![first]);

        db.delete_blacklist("0xabc").unwrap();
        assert!(db.load_blacklist().unwrap().is_empty());
    }

    #[test]
    fn threat_upsert_overwrites() {
        let db = open_temp_db();
        let mut entry = ThreatIntelEntry {
            pattern_signature: PatternSignature::compute(DetectionKind::WashTrading, SignatureSubject::Wallet("w")),
            first_seen: 1,
            last_seen: 1,
            occurrence_count: 1,
            detection_kind: DetectionKind::WashTrading,
            resolved: false,
        };
        db.upsert_threat(&entry).unwrap();
        entry.occurrence_count = 2;
        entry.last_seen = 5;
        entry.resolved = true;
        db.upsert_threat(&entry).unwrap();
        assert_eq!(db.load_threat_intel().unwrap(), vec![entry]);
    }

    #[test]
    fn duplicate_incident_index_is_refused() {
        let db = open_temp_db();
        db.insert_incident(&incident(0, DetectionKind::LiquidityDrain, 10)).unwrap();
        assert!(db.insert_incident(&incident(0, DetectionKind::WashTrading, 20)).is_err());
        let kept = db.get_incident(0).unwrap().unwrap();
        assert_eq!(kept.report.detection_kind, DetectionKind::LiquidityDrain);
    }

    #[test]
    fn out_of_range_integers_are_refused() {
        let db = open_temp_db();
        let huge = incident(0, DetectionKind::LiquidityDrain, u64::MAX);
        assert!(matches!(
            db.insert_incident(&huge),
            Err(rusqlite::Error::ToSqlConversionFailure(_))
        ));
        assert_eq!(db.get_incident_count().unwrap(), 0);

        let state = PauseState { is_paused: true, timestamp: u64::MAX, reason_kind: None };
        assert!(db.save_pause_state(&state).is_err());
        assert_eq!(db.load_pause_state().unwrap(), PauseState::default());

        db.lock()
            .conn
            .execute("INSERT INTO pause_state (id, is_paused, timestamp, reason_kind) VALUES (1, 1, -5, NULL)", [])
            .unwrap();
        assert!(matches!(
            db.load_pause_state(),
            Err(rusqlite::Error::FromSqlConversionFailure(1, _, _))
        ));
    }

    #[test]
    fn pause_state_roundtrip() {
        let db = open_temp_db();
        let state = PauseState {
            is_paused: true,
            timestamp: 77,
            reason_kind: Some(DetectionKind::SupplyManipulation),
        };
        db.save_pause_state(&state).unwrap();
        assert_eq!(db.load_pause_state().unwrap(), state);
    }
}
