//! # Viewra Transcoder
//!
//! The authoritative session registry and the encoder supervisor: session
//! creation with duplicate coalescing, the lifecycle state machine, encoder
//! subprocess supervision with progress ingestion and resource policy, and
//! the background janitor that reclaims directories, idle sessions, and
//! orphaned encoder processes.

pub mod command;
pub mod janitor;
pub mod manager;
pub mod orphan;
pub mod progress;
pub mod supervisor;

pub use janitor::Janitor;
pub use manager::{SessionHandle, SessionManager};
pub use supervisor::EncoderSupervisor;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use viewra_core::session::{CreateOutcome, TranscodeRequest};
use viewra_core::{PlaybackConfig, Result, TranscodeParams};
use viewra_database::DatabaseService;

/// Facade bundling the session manager, supervisor, and janitor
#[derive(Clone)]
pub struct TranscoderService {
    manager: SessionManager,
    supervisor: EncoderSupervisor,
    shutdown: CancellationToken,
}

impl TranscoderService {
    /// Wire up the transcoder service and recover persisted state
    pub async fn new(config: Arc<PlaybackConfig>, database: DatabaseService) -> Result<Self> {
        let manager = SessionManager::new(config.clone(), database.sessions.clone());
        manager.recover_after_restart().await?;

        let supervisor = EncoderSupervisor::new(config, manager.clone());

        Ok(Self {
            manager,
            supervisor,
            shutdown: CancellationToken::new(),
        })
    }

    /// The session manager
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// The encoder supervisor
    pub fn supervisor(&self) -> &EncoderSupervisor {
        &self.supervisor
    }

    /// Create a session and start its encoder
    ///
    /// A dedup hit returns the existing session without starting anything.
    pub async fn start_session(
        &self,
        request: TranscodeRequest,
        params: TranscodeParams,
    ) -> Result<CreateOutcome> {
        let outcome = self.manager.create(request, params).await?;
        if let CreateOutcome::Created(session) = &outcome {
            let handle = self.manager.handle(&session.id).await?;
            self.supervisor.start(handle).await?;
        }
        Ok(outcome)
    }

    /// Stop a session (idempotent)
    pub async fn stop_session(&self, id: &str) -> Result<()> {
        self.supervisor.stop(id).await
    }

    /// Spawn the background janitor; returns its task handle
    pub fn spawn_janitor(&self) -> tokio::task::JoinHandle<()> {
        let janitor = Janitor::new(
            self.manager.clone(),
            self.supervisor.clone(),
            self.shutdown.child_token(),
        );
        tokio::spawn(async move { janitor.run().await })
    }

    /// Stop every active session and the janitor
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for session in self.manager.list_registered().await {
            if !session.state.is_terminal() {
                let _ = self.supervisor.stop(&session.id).await;
            }
        }
    }
}
