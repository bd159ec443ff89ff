//! # Viewra Database Layer
//!
//! SQLite-backed persistence for transcoding sessions. Sessions survive
//! process restarts in terminal state; non-terminal rows whose encoder is
//! gone are failed by the recovery scan at startup.

pub mod connection;
pub mod migrations;
pub mod models;
pub mod repositories;

// Re-export commonly used types
pub use connection::{DatabaseConnection, DatabaseManager};
pub use models::SessionRow;
pub use repositories::SessionRepository;

use std::path::Path;
use viewra_core::Result;

/// Main database service providing access to session persistence
#[derive(Clone)]
pub struct DatabaseService {
    pub sessions: SessionRepository,
    manager: DatabaseManager,
}

impl DatabaseService {
    /// Open (or create) the session database under the given data directory
    pub async fn new(data_dir: &Path) -> Result<Self> {
        let manager = DatabaseManager::open(data_dir).await?;
        migrations::run_migrations(manager.pool()).await?;

        Ok(Self {
            sessions: SessionRepository::new(manager.pool().clone()),
            manager,
        })
    }

    /// Open an in-memory database (tests)
    pub async fn in_memory() -> Result<Self> {
        let manager = DatabaseManager::in_memory().await?;
        migrations::run_migrations(manager.pool()).await?;

        Ok(Self {
            sessions: SessionRepository::new(manager.pool().clone()),
            manager,
        })
    }

    /// Health check for the database connection
    pub async fn health_check(&self) -> Result<()> {
        self.manager.ping().await
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.manager.close().await;
    }
}
