//! SQLite pool construction and schema bootstrap.
//!
//! [`create_pool`] connects and applies the schema so callers (including
//! tests using `sqlite::memory:`) get a ready-to-use database without a
//! separate migration step.

use std::sync::atomic::{AtomicU64, Ordering};

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Schema applied on every connect. All statements are idempotent.
/// Timestamps are stored as RFC 3339 strings throughout.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id TEXT NOT NULL,
        item_id TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        paused_reason TEXT,
        rotation_interval_minutes INTEGER NOT NULL,
        winner_metric TEXT NOT NULL,
        start_date TEXT NOT NULL,
        end_date TEXT,
        current_variant_index INTEGER,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS variants (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        test_id INTEGER NOT NULL REFERENCES tests(id),
        text TEXT NOT NULL,
        ord INTEGER NOT NULL,
        activated_at TEXT,
        is_active INTEGER NOT NULL DEFAULT 0,
        UNIQUE (test_id, ord)
    )",
    "CREATE TABLE IF NOT EXISTS analytics_polls (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        variant_id INTEGER NOT NULL REFERENCES variants(id),
        polled_at TEXT NOT NULL,
        views INTEGER NOT NULL,
        impressions INTEGER NOT NULL,
        ctr REAL NOT NULL,
        average_view_duration REAL NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS rotation_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        test_id INTEGER NOT NULL REFERENCES tests(id),
        variant_id INTEGER NOT NULL REFERENCES variants(id),
        rotated_at TEXT NOT NULL,
        rotation_order INTEGER NOT NULL,
        duration_minutes INTEGER NOT NULL,
        views_at_rotation INTEGER NOT NULL,
        ctr_at_rotation REAL NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS variant_summaries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        variant_id INTEGER NOT NULL UNIQUE REFERENCES variants(id),
        total_views INTEGER NOT NULL,
        total_impressions INTEGER NOT NULL,
        final_ctr REAL NOT NULL,
        final_average_view_duration REAL NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS platform_credentials (
        account_id TEXT PRIMARY KEY,
        access_token TEXT NOT NULL,
        refresh_token TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_variants_test ON variants(test_id)",
    "CREATE INDEX IF NOT EXISTS idx_polls_variant ON analytics_polls(variant_id, polled_at)",
    "CREATE INDEX IF NOT EXISTS idx_logs_test ON rotation_logs(test_id)",
];

/// Connect to `url` and apply the schema.
///
/// In-memory databases exist per connection, so those pools are pinned
/// to a single connection; file-backed pools get the default size.
pub async fn create_pool(url: &str) -> Result<SqlitePool, sqlx::Error> {
    if url.contains(":memory:") {
        return create_in_memory_pool().await;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await?;

    apply_schema(&pool).await?;

    Ok(pool)
}

/// Number of connections for in-memory (test) pools.
const IN_MEMORY_CONNECTIONS: u32 = 8;

/// Build an in-memory pool for tests.
///
/// Plain `sqlite::memory:` gives each connection its own private database, so
/// a multi-connection pool over it would see inconsistent data. We therefore
/// use a *shared-cache* in-memory database (`mode=memory&cache=shared`) with a
/// unique name per pool: every connection in the pool sees the same data,
/// while distinct pools stay isolated from one another.
///
/// Several scheduler tests drive this pool under a paused Tokio clock
/// (`start_paused`). sqlx arms a Tokio timeout around both connection
/// establishment and (by default) a pre-acquire liveness ping; whenever an
/// acquire has to *wait* — to open a connection, or because the single
/// connection is busy — the auto-advancing clock can jump onto that timeout
/// before the background SQLite worker replies, surfacing as a spurious
/// `PoolTimedOut`. To keep acquisition non-blocking we:
///   * open several connections (so concurrent callers don't contend), and
///   * pre-establish them all up front (so an acquire never has to open one),
///   * and skip the pre-acquire ping (in-memory connections never go stale).
/// With all connections already warm, an acquire simply pops an idle one
/// without ever awaiting the worker under an armed timer.
async fn create_in_memory_pool() -> Result<SqlitePool, sqlx::Error> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let name = COUNTER.fetch_add(1, Ordering::Relaxed);
    let url = format!("sqlite:file:title_rotator_mem_{name}?mode=memory&cache=shared");

    let pool = SqlitePoolOptions::new()
        .max_connections(IN_MEMORY_CONNECTIONS)
        .min_connections(IN_MEMORY_CONNECTIONS)
        .test_before_acquire(false)
        .connect(&url)
        .await?;

    apply_schema(&pool).await?;

    // Hold every connection at once so each acquire is forced to open a fresh
    // one, leaving the pool fully warmed when they are released back.
    let mut warm = Vec::with_capacity(IN_MEMORY_CONNECTIONS as usize);
    for _ in 0..IN_MEMORY_CONNECTIONS {
        warm.push(pool.acquire().await?);
    }
    drop(warm);

    Ok(pool)
}

/// Apply the schema to `pool`. All statements are idempotent.
async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
