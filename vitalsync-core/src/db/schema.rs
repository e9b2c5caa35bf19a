//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: sync state and retry queue
    r#"
    -- ============================================
    -- Singleton records (sync state, grants, cached samples)
    -- ============================================

    CREATE TABLE IF NOT EXISTS kv (
        key              TEXT PRIMARY KEY,
        value            JSON NOT NULL,
        updated_at       DATETIME NOT NULL
    );

    -- ============================================
    -- Retry queue (FIFO by seq)
    -- ============================================

    CREATE TABLE IF NOT EXISTS retry_queue (
        seq              INTEGER PRIMARY KEY AUTOINCREMENT,
        id               TEXT NOT NULL UNIQUE,
        enqueued_at      DATETIME NOT NULL,
        failure_reason   TEXT NOT NULL,
        failure_class    TEXT NOT NULL
    );
    "#,
    // Version 2: local score history for streaks
    r#"
    CREATE TABLE IF NOT EXISTS productivity_scores (
        user_id          TEXT NOT NULL,
        date             TEXT NOT NULL,
        score            INTEGER NOT NULL,
        breakdown        JSON NOT NULL,
        streak_days      INTEGER NOT NULL,
        computed_at      DATETIME NOT NULL,

        PRIMARY KEY (user_id, date)
    );

    CREATE INDEX IF NOT EXISTS idx_productivity_scores_date
        ON productivity_scores(user_id, date DESC);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["kv", "retry_queue", "productivity_scores"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_upgrade_from_first_version() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.execute("PRAGMA user_version = 1", []).unwrap();

        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }
}
