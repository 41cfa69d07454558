//! SQLite frontier implementation
//!
//! This module provides a SQLite-based implementation of the FrontierStore
//! trait. Timestamps are fixed-width UTC RFC 3339 strings, so SQL compares
//! them as text.

use crate::config::StrategyKind;
use crate::state::EntryState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{FrontierStore, StorageError, StorageResult};
use crate::storage::{FrontierCounts, FrontierEntry, RunRecord, RunStatus, RunTotals};
use crate::url::normalize_url;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

const ENTRY_COLUMNS: &str =
    "id, url, normalized_key, state, claimed_at, claimed_by, attempts";

const RUN_COLUMNS: &str =
    "id, strategy, started_at, finished_at, status, strategy_yield, dispatched, failed, config_hash";

/// SQLite frontier backend
pub struct SqliteFrontier {
    conn: Connection,
    accept_limit: u64,
}

impl SqliteFrontier {
    /// Opens or creates the frontier database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `accept_limit` - Cap on the accepted counter
    pub fn open(path: &Path, accept_limit: u64) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;

        initialize_schema(&conn)?;

        Ok(Self { conn, accept_limit })
    }

    /// Creates an in-memory frontier (tests and dry runs)
    pub fn open_in_memory(accept_limit: u64) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn, accept_limit })
    }

    pub fn accept_limit(&self) -> u64 {
        self.accept_limit
    }

    /// Stuck-entry listing against an explicit clock
    pub(crate) fn stuck_entries_at(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<FrontierEntry>> {
        let cutoff = cutoff(now, threshold);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM frontier_entries
             WHERE state = ?1 AND claimed_at < ?2
             ORDER BY id",
            ENTRY_COLUMNS
        ))?;

        let entries = stmt
            .query_map(
                params![EntryState::Claimed.to_db_string(), cutoff],
                entry_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Stuck requeue against an explicit clock
    pub(crate) fn requeue_stuck_at(
        &mut self,
        entry: &FrontierEntry,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let cutoff = cutoff(now, threshold);
        // The attempts match keeps a requeue from undoing a newer claim
        let changed = self.conn.execute(
            "UPDATE frontier_entries
             SET state = ?1, claimed_at = NULL, claimed_by = NULL
             WHERE id = ?2 AND state = ?3 AND attempts = ?4 AND claimed_at < ?5",
            params![
                EntryState::Pending.to_db_string(),
                entry.id,
                EntryState::Claimed.to_db_string(),
                entry.attempts,
                cutoff
            ],
        )?;
        Ok(changed == 1)
    }

    /// Lock acquisition against an explicit clock
    pub(crate) fn acquire_lock_at(
        &mut self,
        run_key: &str,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let holder: Option<(String, String)> = tx
            .query_row(
                "SELECT run_key, heartbeat_at FROM invocation_lock WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((holder_key, heartbeat_at)) = holder {
            if holder_key != run_key && heartbeat_at >= cutoff(now, stale_after) {
                return Err(StorageError::Locked(holder_key));
            }
        }

        let stamp = timestamp(now);
        tx.execute(
            "INSERT INTO invocation_lock (id, run_key, acquired_at, heartbeat_at)
             VALUES (1, ?1, ?2, ?2)
             ON CONFLICT(id) DO UPDATE SET
                run_key = excluded.run_key,
                acquired_at = excluded.acquired_at,
                heartbeat_at = excluded.heartbeat_at",
            params![run_key, stamp],
        )?;

        let released = tx.execute(
            "UPDATE frontier_entries
             SET state = ?1, claimed_at = NULL, claimed_by = NULL
             WHERE state = ?2 AND (claimed_by IS NULL OR claimed_by != ?3)",
            params![
                EntryState::Pending.to_db_string(),
                EntryState::Claimed.to_db_string(),
                run_key
            ],
        )?;

        tx.commit()?;
        Ok(released)
    }

    /// Runs raw SQL against the connection; used to simulate storage faults
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> StorageResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn counter(&self, name: &str) -> StorageResult<u64> {
        let value: i64 = self.conn.query_row(
            "SELECT value FROM counters WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(value as u64)
    }

    fn count_state(&self, state: EntryState) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM frontier_entries WHERE state = ?1",
            params![state.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl FrontierStore for SqliteFrontier {
    // ===== Frontier =====

    fn enqueue(&mut self, url: &str) -> StorageResult<bool> {
        let key = normalize_url(url);
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let visited: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM visited WHERE normalized_key = ?1)",
            params![key],
            |row| row.get(0),
        )?;
        if visited {
            return Ok(false);
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO frontier_entries (url, normalized_key, state, discovered_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                url,
                key,
                EntryState::Pending.to_db_string(),
                timestamp(Utc::now())
            ],
        )?;

        tx.commit()?;
        Ok(inserted == 1)
    }

    fn claim_next(&mut self, claimed_by: &str) -> StorageResult<Option<FrontierEntry>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let next: Option<i64> = tx
            .query_row(
                "SELECT id FROM frontier_entries WHERE state = ?1 ORDER BY id LIMIT 1",
                params![EntryState::Pending.to_db_string()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = next else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE frontier_entries
             SET state = ?1, claimed_at = ?2, claimed_by = ?3, attempts = attempts + 1
             WHERE id = ?4",
            params![
                EntryState::Claimed.to_db_string(),
                timestamp(Utc::now()),
                claimed_by,
                id
            ],
        )?;

        let entry = tx.query_row(
            &format!("SELECT {} FROM frontier_entries WHERE id = ?1", ENTRY_COLUMNS),
            params![id],
            entry_from_row,
        )?;

        tx.commit()?;
        Ok(Some(entry))
    }

    fn mark_done(&mut self, entry: &FrontierEntry, accepted: bool) -> StorageResult<bool> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<(String, u32)> = tx
            .query_row(
                "SELECT state, attempts FROM frontier_entries WHERE id = ?1",
                params![entry.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (state, attempts) = current.ok_or(StorageError::EntryNotFound(entry.id))?;
        let state = EntryState::from_db_string(&state).unwrap_or(EntryState::Pending);

        // A different attempt count means the watchdog requeued the entry and
        // it was claimed again; this caller's claim is void.
        if state != EntryState::Claimed || attempts != entry.attempts {
            return Err(StorageError::InvalidTransition {
                key: entry.normalized_key.clone(),
                from: state,
                to: EntryState::Done,
            });
        }

        let now = timestamp(Utc::now());
        tx.execute(
            "UPDATE frontier_entries SET state = ?1 WHERE id = ?2",
            params![EntryState::Done.to_db_string(), entry.id],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO visited (normalized_key, visited_at) VALUES (?1, ?2)",
            params![entry.normalized_key, now],
        )?;

        let counted = if accepted {
            tx.execute(
                "UPDATE counters SET value = value + 1 WHERE name = 'accepted' AND value < ?1",
                params![self.accept_limit as i64],
            )? == 1
        } else {
            false
        };

        tx.commit()?;
        Ok(counted)
    }

    fn release_claim(&mut self, entry: &FrontierEntry) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE frontier_entries
             SET state = ?1, claimed_at = NULL, claimed_by = NULL
             WHERE id = ?2 AND state = ?3 AND attempts = ?4",
            params![
                EntryState::Pending.to_db_string(),
                entry.id,
                EntryState::Claimed.to_db_string(),
                entry.attempts
            ],
        )?;
        Ok(changed == 1)
    }

    fn requeue_stuck(
        &mut self,
        entry: &FrontierEntry,
        threshold: Duration,
    ) -> StorageResult<bool> {
        self.requeue_stuck_at(entry, threshold, Utc::now())
    }

    fn stuck_entries(&self, threshold: Duration) -> StorageResult<Vec<FrontierEntry>> {
        self.stuck_entries_at(threshold, Utc::now())
    }

    fn is_drained(&self) -> StorageResult<bool> {
        let active: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM frontier_entries WHERE state IN (?1, ?2)",
            params![
                EntryState::Pending.to_db_string(),
                EntryState::Claimed.to_db_string()
            ],
            |row| row.get(0),
        )?;
        Ok(active == 0)
    }

    fn is_visited(&self, normalized_key: &str) -> StorageResult<bool> {
        let visited: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM visited WHERE normalized_key = ?1)",
            params![normalized_key],
            |row| row.get(0),
        )?;
        Ok(visited)
    }

    // ===== Counters =====

    fn accepted_count(&self) -> StorageResult<u64> {
        self.counter("accepted")
    }

    fn next_sequence(&mut self) -> StorageResult<u64> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "UPDATE counters SET value = value + 1 WHERE name = 'sequence'",
            [],
        )?;
        let value: i64 = tx.query_row(
            "SELECT value FROM counters WHERE name = 'sequence'",
            [],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(value as u64)
    }

    fn counts(&self) -> StorageResult<FrontierCounts> {
        let visited: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM visited", [], |row| row.get(0))?;

        Ok(FrontierCounts {
            pending: self.count_state(EntryState::Pending)?,
            claimed: self.count_state(EntryState::Claimed)?,
            done: self.count_state(EntryState::Done)?,
            visited: visited as u64,
            accepted: self.accepted_count()?,
        })
    }

    fn health_check(&self) -> StorageResult<()> {
        self.conn.query_row(
            "SELECT (SELECT COUNT(*) FROM frontier_entries WHERE id = 0)
                  + (SELECT COUNT(*) FROM visited WHERE normalized_key = '')
                  + (SELECT value FROM counters WHERE name = 'accepted')",
            [],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(())
    }

    // ===== Run Management =====

    fn create_run(&mut self, strategy: StrategyKind, config_hash: &str) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO runs (strategy, started_at, status, config_hash) VALUES (?1, ?2, ?3, ?4)",
            params![
                strategy.as_str(),
                timestamp(Utc::now()),
                RunStatus::Running.to_db_string(),
                config_hash
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        totals: RunTotals,
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE runs
             SET status = ?1, finished_at = ?2, strategy_yield = ?3, dispatched = ?4, failed = ?5
             WHERE id = ?6",
            params![
                status.to_db_string(),
                timestamp(Utc::now()),
                totals.strategy_yield as i64,
                totals.dispatched as i64,
                totals.failed as i64,
                run_id
            ],
        )?;
        Ok(())
    }

    fn latest_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM runs ORDER BY id DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;

        let runs = stmt
            .query_map(params![limit as i64], |row| {
                Ok(RunRecord {
                    id: row.get(0)?,
                    strategy: StrategyKind::from_db_string(&row.get::<_, String>(1)?)
                        .unwrap_or(StrategyKind::Static),
                    started_at: row.get(2)?,
                    finished_at: row.get(3)?,
                    status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
                        .unwrap_or(RunStatus::Failed),
                    totals: RunTotals {
                        strategy_yield: row.get::<_, i64>(5)? as u64,
                        dispatched: row.get::<_, i64>(6)? as u64,
                        failed: row.get::<_, i64>(7)? as u64,
                    },
                    config_hash: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    // ===== Invocation Lock =====

    fn acquire_lock(&mut self, run_key: &str, stale_after: Duration) -> StorageResult<usize> {
        self.acquire_lock_at(run_key, stale_after, Utc::now())
    }

    fn heartbeat(&mut self, run_key: &str) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE invocation_lock SET heartbeat_at = ?1 WHERE id = 1 AND run_key = ?2",
            params![timestamp(Utc::now()), run_key],
        )?;
        Ok(changed == 1)
    }

    fn release_lock(&mut self, run_key: &str) -> StorageResult<()> {
        self.conn.execute(
            "DELETE FROM invocation_lock WHERE id = 1 AND run_key = ?1",
            params![run_key],
        )?;
        Ok(())
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn cutoff(now: DateTime<Utc>, threshold: Duration) -> String {
    let cutoff = chrono::Duration::from_std(threshold)
        .ok()
        .and_then(|threshold| now.checked_sub_signed(threshold))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    timestamp(cutoff)
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<FrontierEntry> {
    let claimed_at: Option<String> = row.get(4)?;
    Ok(FrontierEntry {
        id: row.get(0)?,
        url: row.get(1)?,
        normalized_key: row.get(2)?,
        state: EntryState::from_db_string(&row.get::<_, String>(3)?)
            .unwrap_or(EntryState::Pending),
        claimed_at: claimed_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc)),
        claimed_by: row.get(5)?,
        attempts: row.get(6)?,
    })
}
