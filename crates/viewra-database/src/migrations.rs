//! Database migrations

use sqlx::SqlitePool;
use tracing::info;
use viewra_core::Result;

/// Schema statements, applied in order. Each is idempotent.
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id             TEXT PRIMARY KEY,
        provider       TEXT NOT NULL,
        state          TEXT NOT NULL,
        input_path     TEXT NOT NULL,
        start_offset   INTEGER NOT NULL DEFAULT 0,
        request_blob   TEXT NOT NULL,
        progress_blob  TEXT NOT NULL,
        result_blob    TEXT,
        start_time     TEXT NOT NULL,
        end_time       TEXT,
        last_accessed  TEXT NOT NULL,
        directory_path TEXT NOT NULL,
        process_id     INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sessions_state ON sessions(state)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_start_time ON sessions(start_time)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_last_accessed ON sessions(last_accessed)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_input_path ON sessions(input_path)",
    // At most one active session per (input_path, start_offset)
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_active_input
    ON sessions(input_path, start_offset)
    WHERE state NOT IN ('completed', 'failed', 'cancelled', 'timed_out')
    "#,
];

/// Run all database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations");

    for statement in MIGRATIONS {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Database migrations completed successfully");
    Ok(())
}
