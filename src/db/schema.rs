use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS incidents (
            idx             INTEGER PRIMARY KEY,
            detection_kind  TEXT NOT NULL,
            violator        TEXT,
            sequence_number INTEGER NOT NULL,
            severity        INTEGER NOT NULL,
            confidence      INTEGER NOT NULL,
            pattern_signature TEXT NOT NULL,
            action          TEXT NOT NULL,
            report          TEXT NOT NULL, -- JSON
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS blacklist (
            address     TEXT PRIMARY KEY,
            timestamp   INTEGER NOT NULL,
            reason_kind TEXT NOT NULL,
            confidence  INTEGER NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS threat_intel (
            pattern_signature TEXT PRIMARY KEY,
            first_seen        INTEGER NOT NULL,
            last_seen         INTEGER NOT NULL,
            occurrence_count  INTEGER NOT NULL,
            detection_kind    TEXT NOT NULL,
            resolved          INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS pause_state (
            id          INTEGER PRIMARY KEY CHECK (id = 1),
            is_paused   INTEGER NOT NULL,
            timestamp   INTEGER NOT NULL,
            reason_kind TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_incidents_kind ON incidents(detection_kind);
        CREATE INDEX IF NOT EXISTS idx_incidents_created ON incidents(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_threat_intel_count ON threat_intel(occurrence_count DESC);
        ",
    )?;
    Ok(())
}
