//! Session repository for database operations

use crate::models::SessionRow;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::warn;
use viewra_core::session::{SessionState, TranscodeSession};
use viewra_core::Result;

/// SQL fragment naming the terminal states
const TERMINAL: &str = "('completed', 'failed', 'cancelled', 'timed_out')";

/// Repository for session-related database operations
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    /// Create a new session repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a session, or return the existing active session for the same
    /// `(input_path, start_offset)` tuple
    ///
    /// The check and insert run in one transaction; the partial unique index
    /// on active rows closes the remaining race, in which case the winner's
    /// row is fetched and returned.
    pub async fn insert_or_dedup(
        &self,
        session: &TranscodeSession,
    ) -> Result<Option<TranscodeSession>> {
        let row = SessionRow::from_session(session)?;

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT * FROM sessions WHERE input_path = ? AND start_offset = ? \
             AND state NOT IN {TERMINAL} LIMIT 1"
        ))
        .bind(&row.input_path)
        .bind(row.start_offset)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(existing) = existing {
            tx.rollback().await?;
            return Ok(Some(existing.into_session()?));
        }

        let inserted = sqlx::query(
            "INSERT INTO sessions (id, provider, state, input_path, start_offset, \
             request_blob, progress_blob, result_blob, start_time, end_time, \
             last_accessed, directory_path, process_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.provider)
        .bind(&row.state)
        .bind(&row.input_path)
        .bind(row.start_offset)
        .bind(&row.request_blob)
        .bind(&row.progress_blob)
        .bind(&row.result_blob)
        .bind(row.start_time)
        .bind(row.end_time)
        .bind(row.last_accessed)
        .bind(&row.directory_path)
        .bind(row.process_id)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                Ok(None)
            }
            Err(e) if is_unique_violation(&e) => {
                // Lost the race to a concurrent create; hand back the winner
                tx.rollback().await?;
                warn!(input = %row.input_path, "concurrent create coalesced on unique index");
                let winner = self
                    .find_active_for_input(Path::new(&row.input_path), row.start_offset as u32)
                    .await?;
                Ok(winner)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e.into())
            }
        }
    }

    /// Get a session by id
    pub async fn get(&self, id: &str) -> Result<Option<TranscodeSession>> {
        let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// Find the active session for a given input/offset, if any
    pub async fn find_active_for_input(
        &self,
        input_path: &Path,
        start_offset: u32,
    ) -> Result<Option<TranscodeSession>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT * FROM sessions WHERE input_path = ? AND start_offset = ? \
             AND state NOT IN {TERMINAL} LIMIT 1"
        ))
        .bind(input_path.to_string_lossy().as_ref())
        .bind(i64::from(start_offset))
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// List sessions, optionally filtered by state
    pub async fn list(&self, state: Option<SessionState>) -> Result<Vec<TranscodeSession>> {
        let rows = match state {
            Some(state) => {
                sqlx::query_as::<_, SessionRow>(
                    "SELECT * FROM sessions WHERE state = ? ORDER BY start_time DESC",
                )
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions ORDER BY start_time DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// List all non-terminal sessions
    pub async fn list_active(&self) -> Result<Vec<TranscodeSession>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT * FROM sessions WHERE state NOT IN {TERMINAL} ORDER BY start_time DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Persist the mutable fields of a session
    pub async fn update(&self, session: &TranscodeSession) -> Result<()> {
        let row = SessionRow::from_session(session)?;

        sqlx::query(
            "UPDATE sessions SET state = ?, request_blob = ?, progress_blob = ?, \
             result_blob = ?, end_time = ?, last_accessed = ?, process_id = ? \
             WHERE id = ?",
        )
        .bind(&row.state)
        .bind(&row.request_blob)
        .bind(&row.progress_blob)
        .bind(&row.result_blob)
        .bind(row.end_time)
        .bind(row.last_accessed)
        .bind(row.process_id)
        .bind(&row.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update only the last-accessed stamp
    pub async fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sessions SET last_accessed = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a session row
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Active sessions with no reads since the cutoff (idle reaping)
    pub async fn find_idle_active(&self, cutoff: DateTime<Utc>) -> Result<Vec<TranscodeSession>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT * FROM sessions WHERE state NOT IN {TERMINAL} AND last_accessed < ?"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Terminal sessions that ended before the cutoff (retention sweeps)
    pub async fn find_terminal_ended_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TranscodeSession>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT * FROM sessions WHERE state IN {TERMINAL} \
             AND end_time IS NOT NULL AND end_time < ?"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// All non-terminal rows (restart recovery scan)
    pub async fn non_terminal(&self) -> Result<Vec<TranscodeSession>> {
        self.list_active().await
    }
}

/// Whether an sqlx error is a unique-constraint violation
fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
