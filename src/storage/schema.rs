//! Database schema definitions
//!
//! One database per task holds the frontier, the visited set, the durable
//! counters, the run history and the invocation lock.

/// SQL schema for the frontier database
pub const SCHEMA_SQL: &str = r#"
-- Every URL the task has ever queued, one row per normalized key
CREATE TABLE IF NOT EXISTS frontier_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    normalized_key TEXT NOT NULL UNIQUE,
    state TEXT NOT NULL,
    claimed_at TEXT,
    claimed_by TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    discovered_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_frontier_state ON frontier_entries(state, id);

-- Append-only set of processed keys
CREATE TABLE IF NOT EXISTS visited (
    normalized_key TEXT PRIMARY KEY,
    visited_at TEXT NOT NULL
);

-- Durable counters: accepted pages and output sequence numbers
CREATE TABLE IF NOT EXISTS counters (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

INSERT OR IGNORE INTO counters (name, value) VALUES ('accepted', 0);
INSERT OR IGNORE INTO counters (name, value) VALUES ('sequence', 0);

-- One row per crawl run (a strategy's pass over the frontier)
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    status TEXT NOT NULL,
    strategy_yield INTEGER NOT NULL DEFAULT 0,
    dispatched INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    config_hash TEXT NOT NULL
);

-- The invocation currently working on this task (at most one row)
CREATE TABLE IF NOT EXISTS invocation_lock (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    run_key TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    heartbeat_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
