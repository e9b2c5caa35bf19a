//! Database repository layer
//!
//! The store is the only shared mutable resource of a sync process. Every
//! read-modify-write runs inside one transaction while the connection mutex
//! is held, so concurrent triggers never interleave.

use crate::error::{Error, FailureClass, Result, SyncFailure};
use crate::types::*;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const SYNC_STATE_KEY: &str = "sync_state";
const LAST_BACKGROUND_SYNC_KEY: &str = "last_background_sync";
const ONBOARDING_KEY: &str = "onboarding_completed";
const HEALTH_SAMPLE_PREFIX: &str = "health_sample/";
const USAGE_SAMPLE_PREFIX: &str = "usage_sample/";

fn permission_key(feature: Feature) -> String {
    format!("permission/{}", feature.as_str())
}

fn sample_key(prefix: &str, date: NaiveDate) -> String {
    format!("{}{}", prefix, date.format("%Y-%m-%d"))
}

fn conversion_error(
    column: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(error))
}

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        super::schema::run_migrations(&conn)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Key/value records
    // ============================================

    fn kv_get<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Option<T>> {
        let value: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn kv_put<T: Serialize>(conn: &Connection, key: &str, value: &T) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, serde_json::to_string(value)?, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn kv_range<T: DeserializeOwned>(conn: &Connection, from: &str, to: &str) -> Result<Vec<T>> {
        let mut stmt =
            conn.prepare("SELECT value FROM kv WHERE key >= ?1 AND key <= ?2 ORDER BY key ASC")?;
        let rows = stmt.query_map([from, to], |row| row.get::<_, String>(0))?;

        let mut values = Vec::new();
        for json in rows {
            values.push(serde_json::from_str(&json?)?);
        }
        Ok(values)
    }

    // ============================================
    // Sync state
    // ============================================

    /// Persisted sync state, or the default when never written.
    pub fn sync_state(&self) -> Result<SyncState> {
        let conn = self.lock();
        Ok(Self::kv_get(&conn, SYNC_STATE_KEY)?.unwrap_or_default())
    }

    /// Atomically read, modify and write the sync state.
    pub fn update_sync_state<F>(&self, f: F) -> Result<SyncState>
    where
        F: FnOnce(&mut SyncState),
    {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let mut state: SyncState = Self::kv_get(&tx, SYNC_STATE_KEY)?.unwrap_or_default();
        f(&mut state);
        Self::kv_put(&tx, SYNC_STATE_KEY, &state)?;

        tx.commit()?;
        Ok(state)
    }

    /// Claim the persisted `is_syncing` flag. Returns `false`, without
    /// writing, when another sync already holds it.
    pub fn try_begin_sync(&self) -> Result<bool> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let mut state: SyncState = Self::kv_get(&tx, SYNC_STATE_KEY)?.unwrap_or_default();
        if state.is_syncing {
            return Ok(false);
        }
        state.is_syncing = true;
        Self::kv_put(&tx, SYNC_STATE_KEY, &state)?;

        tx.commit()?;
        Ok(true)
    }

    /// Release the flag claimed by [`try_begin_sync`](Self::try_begin_sync)
    /// without recording an outcome.
    pub fn end_sync(&self) -> Result<SyncState> {
        self.update_sync_state(|state| state.is_syncing = false)
    }

    /// End a failed sync: store the error, clear `is_syncing`, and append
    /// `retry` to the queue, all in one transaction. `last_sync` is kept.
    pub fn record_failure(
        &self,
        failure: &SyncFailure,
        retry: Option<&RetryQueueEntry>,
    ) -> Result<SyncState> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let mut state: SyncState = Self::kv_get(&tx, SYNC_STATE_KEY)?.unwrap_or_default();
        state.is_syncing = false;
        state.error = Some(failure.message.clone());
        Self::kv_put(&tx, SYNC_STATE_KEY, &state)?;

        if let Some(entry) = retry {
            Self::insert_retry_entry(&tx, entry)?;
        }

        tx.commit()?;
        Ok(state)
    }

    /// End a successful sync: set `last_sync`, clear the error and `is_syncing`.
    pub fn record_success(&self, synced_at: DateTime<Utc>) -> Result<SyncState> {
        self.update_sync_state(|state| {
            state.is_syncing = false;
            state.last_sync = Some(synced_at);
            state.error = None;
        })
    }

    // ============================================
    // Retry queue
    // ============================================

    fn insert_retry_entry(tx: &Transaction, entry: &RetryQueueEntry) -> Result<()> {
        tx.execute(
            r#"
            INSERT INTO retry_queue (id, enqueued_at, failure_reason, failure_class)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                entry.id.to_string(),
                entry.enqueued_at.to_rfc3339(),
                entry.failure_reason,
                entry.failure_class.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Append an entry to the end of the retry queue
    pub fn enqueue_retry(&self, entry: &RetryQueueEntry) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        Self::insert_retry_entry(&tx, entry)?;
        tx.commit()?;
        Ok(())
    }

    /// All queued entries in enqueue order
    pub fn list_retry_queue(&self) -> Result<Vec<RetryQueueEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, enqueued_at, failure_reason, failure_class
            FROM retry_queue
            ORDER BY seq ASC
            "#,
        )?;

        let entries = stmt
            .query_map([], Self::row_to_retry_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn retry_queue_len(&self) -> Result<usize> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM retry_queue", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Remove entries by id. Returns how many were removed.
    pub fn remove_retry_entries(&self, ids: &[uuid::Uuid]) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let mut removed = 0;
        for id in ids {
            removed += tx.execute("DELETE FROM retry_queue WHERE id = ?", [id.to_string()])?;
        }

        tx.commit()?;
        Ok(removed)
    }

    fn row_to_retry_entry(row: &Row) -> rusqlite::Result<RetryQueueEntry> {
        let id: String = row.get("id")?;
        let enqueued_at: String = row.get("enqueued_at")?;
        let class: String = row.get("failure_class")?;

        Ok(RetryQueueEntry {
            id: uuid::Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?,
            enqueued_at: DateTime::parse_from_rfc3339(&enqueued_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| conversion_error(1, e))?,
            failure_reason: row.get("failure_reason")?,
            failure_class: FailureClass::parse(&class).unwrap_or(FailureClass::Unknown),
        })
    }

    // ============================================
    // Productivity score history
    // ============================================

    /// Insert or replace the score for its (user, date)
    pub fn upsert_score(&self, score: &ProductivityScore) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO productivity_scores (user_id, date, score, breakdown, streak_days, computed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id, date) DO UPDATE SET
                score = excluded.score,
                breakdown = excluded.breakdown,
                streak_days = excluded.streak_days,
                computed_at = excluded.computed_at
            "#,
            params![
                score.user_id,
                score.date.to_string(),
                score.score,
                serde_json::to_string(&score.breakdown)?,
                score.streak_days,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_score(&self, user_id: &str, date: NaiveDate) -> Result<Option<ProductivityScore>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM productivity_scores WHERE user_id = ?1 AND date = ?2",
            params![user_id, date.to_string()],
            Self::row_to_score,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Most recent persisted score, used as last-known-good data
    pub fn latest_score(&self, user_id: &str) -> Result<Option<ProductivityScore>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM productivity_scores WHERE user_id = ? ORDER BY date DESC LIMIT 1",
            [user_id],
            Self::row_to_score,
        )
        .optional()
        .map_err(Error::from)
    }

    /// The unbroken run of days ending the day before `before` whose score
    /// is above `threshold`, newest first.
    ///
    /// Rows are read newest first and the walk stops at the first missing or
    /// sub-threshold day, so the run is never truncated by a window.
    pub fn streak_run(
        &self,
        user_id: &str,
        before: NaiveDate,
        threshold: u8,
    ) -> Result<Vec<DailyScore>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT date, score FROM productivity_scores
            WHERE user_id = ?1 AND date < ?2
            ORDER BY date DESC
            "#,
        )?;
        let mut rows = stmt.query(params![user_id, before.to_string()])?;

        let mut run = Vec::new();
        let mut expected = before.pred_opt();
        while let Some(row) = rows.next()? {
            let date: String = row.get(0)?;
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| conversion_error(0, e))?;
            let score: u8 = row.get(1)?;

            if Some(date) != expected || score <= threshold {
                break;
            }
            run.push(DailyScore { date, score });
            expected = date.pred_opt();
        }
        Ok(run)
    }

    fn row_to_score(row: &Row) -> rusqlite::Result<ProductivityScore> {
        let date: String = row.get("date")?;
        let breakdown: String = row.get("breakdown")?;

        Ok(ProductivityScore {
            user_id: row.get("user_id")?,
            date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| conversion_error(1, e))?,
            score: row.get("score")?,
            breakdown: serde_json::from_str(&breakdown).unwrap_or_default(),
            streak_days: row.get("streak_days")?,
        })
    }

    // ============================================
    // Cached samples
    // ============================================

    /// Cache a fetched health sample under its date (replaces same-day samples)
    pub fn cache_health_sample(&self, sample: &DailyHealthSample) -> Result<()> {
        let conn = self.lock();
        Self::kv_put(&conn, &sample_key(HEALTH_SAMPLE_PREFIX, sample.date), sample)
    }

    pub fn cache_usage_sample(&self, sample: &DailyUsageSample) -> Result<()> {
        let conn = self.lock();
        Self::kv_put(&conn, &sample_key(USAGE_SAMPLE_PREFIX, sample.date), sample)
    }

    /// Cached health samples with `from <= date <= to`, oldest first.
    pub fn cached_health_samples(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyHealthSample>> {
        let conn = self.lock();
        Self::kv_range(
            &conn,
            &sample_key(HEALTH_SAMPLE_PREFIX, from),
            &sample_key(HEALTH_SAMPLE_PREFIX, to),
        )
    }

    pub fn latest_health_sample(&self) -> Result<Option<DailyHealthSample>> {
        self.latest_with_prefix(HEALTH_SAMPLE_PREFIX)
    }

    pub fn latest_usage_sample(&self) -> Result<Option<DailyUsageSample>> {
        self.latest_with_prefix(USAGE_SAMPLE_PREFIX)
    }

    fn latest_with_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Result<Option<T>> {
        let conn = self.lock();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM kv WHERE key LIKE ?1 || '%' ORDER BY key DESC LIMIT 1",
                [prefix],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Drop cached samples of days before `before`. Returns rows removed.
    pub fn prune_cached_samples(&self, before: NaiveDate) -> Result<usize> {
        let conn = self.lock();
        let mut removed = 0;
        for prefix in [HEALTH_SAMPLE_PREFIX, USAGE_SAMPLE_PREFIX] {
            removed += conn.execute(
                "DELETE FROM kv WHERE key LIKE ?1 || '%' AND key < ?2",
                params![prefix, sample_key(prefix, before)],
            )?;
        }
        Ok(removed)
    }

    // ============================================
    // Onboarding and scheduling
    // ============================================

    pub fn permission(&self, feature: Feature) -> Result<PermissionStatus> {
        let conn = self.lock();
        Ok(Self::kv_get(&conn, &permission_key(feature))?.unwrap_or_default())
    }

    pub fn set_permission(&self, feature: Feature, status: PermissionStatus) -> Result<()> {
        let conn = self.lock();
        Self::kv_put(&conn, &permission_key(feature), &status)
    }

    pub fn onboarding_completed(&self) -> Result<bool> {
        let conn = self.lock();
        Ok(Self::kv_get(&conn, ONBOARDING_KEY)?.unwrap_or(false))
    }

    pub fn set_onboarding_completed(&self, completed: bool) -> Result<()> {
        let conn = self.lock();
        Self::kv_put(&conn, ONBOARDING_KEY, &completed)
    }

    pub fn last_background_sync(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock();
        Self::kv_get(&conn, LAST_BACKGROUND_SYNC_KEY)
    }

    pub fn set_last_background_sync(&self, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock();
        Self::kv_put(&conn, LAST_BACKGROUND_SYNC_KEY, &at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn failure(class: FailureClass, message: &str) -> SyncFailure {
        SyncFailure {
            class,
            message: message.to_string(),
            status: None,
        }
    }

    fn score(d: NaiveDate, value: u8) -> ProductivityScore {
        ProductivityScore {
            user_id: "user-1".to_string(),
            date: d,
            score: value,
            breakdown: ScoreBreakdown {
                steps_component: 15,
                ..Default::default()
            },
            streak_days: 0,
        }
    }

    #[test]
    fn test_sync_state_defaults_and_updates() {
        let db = test_db();
        assert_eq!(db.sync_state().unwrap(), SyncState::default());

        let state = db.update_sync_state(|s| s.is_syncing = true).unwrap();
        assert!(state.is_syncing);
        assert!(db.sync_state().unwrap().is_syncing);
    }

    #[test]
    fn test_record_failure_keeps_last_sync() {
        let db = test_db();
        let synced_at = Utc::now();
        db.record_success(synced_at).unwrap();

        let f = failure(FailureClass::NetworkError, "connection refused");
        let entry = RetryQueueEntry::new(&f, Utc::now());
        let state = db.record_failure(&f, Some(&entry)).unwrap();

        assert_eq!(state.last_sync, Some(synced_at));
        assert_eq!(state.error.as_deref(), Some("connection refused"));
        assert!(!state.is_syncing);
        assert_eq!(db.list_retry_queue().unwrap(), vec![entry]);
    }

    #[test]
    fn test_record_success_clears_error() {
        let db = test_db();
        db.record_failure(&failure(FailureClass::Unknown, "boom"), None)
            .unwrap();
        assert_eq!(db.retry_queue_len().unwrap(), 0);

        let now = Utc::now();
        let state = db.record_success(now).unwrap();
        assert_eq!(state.error, None);
        assert_eq!(state.last_sync, Some(now));
    }

    #[test]
    fn test_retry_queue_is_fifo() {
        let db = test_db();
        let first = RetryQueueEntry::new(&failure(FailureClass::NetworkError, "one"), Utc::now());
        let second = RetryQueueEntry::new(
            &failure(FailureClass::RemoteRejected, "two"),
            first.enqueued_at,
        );
        db.enqueue_retry(&first).unwrap();
        db.enqueue_retry(&second).unwrap();

        let queue = db.list_retry_queue().unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].failure_reason, "one");
        assert_eq!(queue[1].failure_reason, "two");
        assert_eq!(queue[1].failure_class, FailureClass::RemoteRejected);

        assert_eq!(db.remove_retry_entries(&[first.id]).unwrap(), 1);
        let queue = db.list_retry_queue().unwrap();
        assert_eq!(queue, vec![second]);
    }

    #[test]
    fn test_score_upsert_replaces_same_day() {
        let db = test_db();
        let d = date(2025, 3, 10);
        db.upsert_score(&score(d, 60)).unwrap();
        db.upsert_score(&score(d, 80)).unwrap();

        let stored = db.get_score("user-1", d).unwrap().unwrap();
        assert_eq!(stored.score, 80);
        assert_eq!(stored.breakdown.steps_component, 15);
        assert_eq!(db.get_score("user-2", d).unwrap(), None);
    }

    #[test]
    fn test_streak_run_stops_at_gap_or_low_score() {
        let db = test_db();
        for (day, value) in [(5, 90), (7, 90), (8, 75), (9, 88), (10, 40)] {
            db.upsert_score(&score(date(2025, 3, day), value)).unwrap();
        }

        // Day 6 is missing
        let run = db.streak_run("user-1", date(2025, 3, 10), 70).unwrap();
        let dates: Vec<_> = run.iter().map(|s| s.date).collect();
        assert_eq!(
            dates,
            vec![date(2025, 3, 9), date(2025, 3, 8), date(2025, 3, 7)]
        );

        // Day 10 scored 40
        assert!(db.streak_run("user-1", date(2025, 3, 11), 70).unwrap().is_empty());
        assert_eq!(
            db.latest_score("user-1").unwrap().unwrap().date,
            date(2025, 3, 10)
        );
    }

    #[test]
    fn test_streak_run_is_not_capped_at_a_year() {
        let db = test_db();
        let today = date(2025, 3, 10);
        for days_ago in 1..=400 {
            db.upsert_score(&score(today - chrono::Duration::days(days_ago), 85))
                .unwrap();
        }

        assert_eq!(db.streak_run("user-1", today, 70).unwrap().len(), 400);
    }

    #[test]
    fn test_sync_flag_claimed_once() {
        let db = test_db();
        assert!(db.try_begin_sync().unwrap());
        assert!(!db.try_begin_sync().unwrap());
        assert!(db.sync_state().unwrap().is_syncing);

        assert!(!db.end_sync().unwrap().is_syncing);
        assert!(db.try_begin_sync().unwrap());
    }

    #[test]
    fn test_cached_health_window() {
        let db = test_db();
        for day in 1..=9 {
            let mut sample = DailyHealthSample::empty("user-1", date(2025, 3, day));
            sample.steps = day * 1000;
            db.cache_health_sample(&sample).unwrap();
        }

        let window = db
            .cached_health_samples(date(2025, 3, 3), date(2025, 3, 5))
            .unwrap();
        let steps: Vec<_> = window.iter().map(|s| s.steps).collect();
        assert_eq!(steps, vec![3000, 4000, 5000]);

        let latest = db.latest_health_sample().unwrap().unwrap();
        assert_eq!(latest.date, date(2025, 3, 9));

        assert_eq!(db.prune_cached_samples(date(2025, 3, 8)).unwrap(), 7);
        assert_eq!(
            db.cached_health_samples(date(2025, 1, 1), date(2025, 12, 31))
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_permissions_and_onboarding() {
        let db = test_db();
        assert_eq!(
            db.permission(Feature::Health).unwrap(),
            PermissionStatus::NotRequested
        );
        assert!(!db.onboarding_completed().unwrap());

        db.set_permission(Feature::Health, PermissionStatus::Granted)
            .unwrap();
        db.set_permission(Feature::Usage, PermissionStatus::Denied)
            .unwrap();
        db.set_onboarding_completed(true).unwrap();

        assert_eq!(
            db.permission(Feature::Health).unwrap(),
            PermissionStatus::Granted
        );
        assert_eq!(
            db.permission(Feature::Usage).unwrap(),
            PermissionStatus::Denied
        );
        assert!(db.onboarding_completed().unwrap());
        assert_eq!(db.last_background_sync().unwrap(), None);
    }

    #[test]
    fn test_state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.db");

        let entry = RetryQueueEntry::new(&failure(FailureClass::NetworkError, "offline"), Utc::now());
        {
            let db = Database::open(&path).unwrap();
            db.migrate().unwrap();
            db.record_failure(&failure(FailureClass::NetworkError, "offline"), Some(&entry))
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        assert_eq!(db.list_retry_queue().unwrap(), vec![entry]);
        assert_eq!(db.sync_state().unwrap().error.as_deref(), Some("offline"));
    }
}
