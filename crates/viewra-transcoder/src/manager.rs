//! Session manager: the single source of truth for sessions
//!
//! All session mutation goes through the manager. Mutation is serialised
//! per session; reads take shared locks. Nothing long-running happens while
//! a lock is held.

use crate::command::session_dir_name;
use crate::orphan;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;
use viewra_core::events::SessionEvent;
use viewra_core::session::{
    CreateOutcome, SessionState, TranscodeProgress, TranscodeRequest, TranscodeSession,
};
use viewra_core::{PlaybackConfig, PlaybackError, Result, TranscodeParams};
use viewra_database::SessionRepository;

/// Broadcast backlog for session events
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Registry entry for one session: the session value behind its own lock,
/// the cancellation scope every per-session task hangs off, and the
/// capacity slot the session occupies while active
pub struct SessionHandle {
    pub id: String,
    session: RwLock<TranscodeSession>,
    pub cancel: CancellationToken,
    permit: StdMutex<Option<OwnedSemaphorePermit>>,
}

impl SessionHandle {
    fn new(session: TranscodeSession, permit: OwnedSemaphorePermit) -> Self {
        Self {
            id: session.id.clone(),
            session: RwLock::new(session),
            cancel: CancellationToken::new(),
            permit: StdMutex::new(Some(permit)),
        }
    }

    /// Copy of the current session value
    pub async fn snapshot(&self) -> TranscodeSession {
        self.session.read().await.clone()
    }

    /// Give the capacity slot back; idempotent
    fn release_capacity(&self) {
        if let Ok(mut permit) = self.permit.lock() {
            permit.take();
        }
    }
}

struct Inner {
    config: Arc<PlaybackConfig>,
    repo: SessionRepository,
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    /// One slot per allowed concurrent session
    capacity: Arc<Semaphore>,
    events: broadcast::Sender<SessionEvent>,
}

/// The authoritative registry of transcoding sessions
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(config: Arc<PlaybackConfig>, repo: SessionRepository) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let capacity = Arc::new(Semaphore::new(config.transcoding.max_concurrent as usize));
        Self {
            inner: Arc::new(Inner {
                config,
                repo,
                sessions: RwLock::new(HashMap::new()),
                capacity,
                events,
            }),
        }
    }

    /// Subscribe to session lifecycle and progress events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.inner.config
    }

    /// Create a session, coalescing duplicates
    ///
    /// A non-terminal session with the same `(input_path, start_offset)`
    /// is returned as [`CreateOutcome::Deduped`] instead of creating a new
    /// one. Refuses with `AT_CAPACITY` when `max_concurrent` is reached.
    pub async fn create(
        &self,
        mut request: TranscodeRequest,
        mut params: TranscodeParams,
    ) -> Result<CreateOutcome> {
        params.validate()?;
        if params.start_offset_seconds == 0 {
            params.start_offset_seconds = request.start_offset_seconds;
        }
        request.start_offset_seconds = params.start_offset_seconds;

        let provider = request
            .provider
            .clone()
            .unwrap_or_else(|| self.inner.config.transcoding.provider.clone());

        // Fast-path dedup before burning capacity on a duplicate
        if let Some(existing) = self
            .inner
            .repo
            .find_active_for_input(&request.input_path, params.start_offset_seconds)
            .await?
        {
            return Ok(CreateOutcome::Deduped(existing));
        }

        // Reserve a capacity slot up front so concurrent creates cannot all
        // pass a count check before any of them inserts. The slot travels
        // with the session handle and is given back on terminal transition.
        let max = self.inner.config.transcoding.max_concurrent;
        let permit = self
            .inner
            .capacity
            .clone()
            .try_acquire_owned()
            .map_err(|_| PlaybackError::AtCapacity { limit: max })?;

        let id = Uuid::new_v4().to_string();
        let directory = self
            .inner
            .config
            .transcoding
            .transcoding_root
            .join(session_dir_name(params.container, &provider, &id));

        let mut session = TranscodeSession::new(
            id.clone(),
            provider,
            request.input_path.clone(),
            params,
            directory.clone(),
        );
        session.request = Some(request);

        // Transactional insert; a concurrent create for the same tuple
        // yields the winner's session and this create's permit is dropped
        if let Some(winner) = self.with_retry_insert(&session).await? {
            return Ok(CreateOutcome::Deduped(winner));
        }

        if let Err(e) = tokio::fs::create_dir_all(&directory).await {
            error!(session_id = %id, error = %e, "failed to create session directory");
            let _ = self.inner.repo.delete(&id).await;
            return Err(PlaybackError::DirCreateFailed {
                path: directory.to_string_lossy().into_owned(),
            });
        }

        let handle = Arc::new(SessionHandle::new(session.clone(), permit));
        self.inner
            .sessions
            .write()
            .await
            .insert(id.clone(), handle);

        info!(session_id = %id, input = %session.input_path.display(), "session created");
        self.emit(SessionEvent::state_changed(&id, SessionState::Pending, None));

        Ok(CreateOutcome::Created(session))
    }

    /// Registry handle for a session
    pub async fn handle(&self, id: &str) -> Result<Arc<SessionHandle>> {
        self.inner
            .sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PlaybackError::not_found("session", id))
    }

    /// Snapshot of a session, falling back to the store for sessions that
    /// are not resident (terminal sessions from a previous run)
    pub async fn get(&self, id: &str) -> Result<TranscodeSession> {
        if let Some(handle) = self.inner.sessions.read().await.get(id).cloned() {
            return Ok(handle.snapshot().await);
        }
        self.inner
            .repo
            .get(id)
            .await?
            .ok_or_else(|| PlaybackError::not_found("session", id))
    }

    /// Snapshots of every registered session
    pub async fn list_registered(&self) -> Vec<TranscodeSession> {
        let handles: Vec<_> = self.inner.sessions.read().await.values().cloned().collect();
        let mut sessions = Vec::with_capacity(handles.len());
        for handle in handles {
            sessions.push(handle.snapshot().await);
        }
        sessions
    }

    /// Snapshots of active (non-terminal) sessions
    pub async fn list_active(&self) -> Vec<TranscodeSession> {
        self.list_registered()
            .await
            .into_iter()
            .filter(|s| !s.state.is_terminal())
            .collect()
    }

    /// Number of active sessions
    pub async fn active_count(&self) -> usize {
        self.list_active().await.len()
    }

    /// Pids of every registered encoder process
    pub async fn active_pids(&self) -> Vec<u32> {
        self.list_registered()
            .await
            .into_iter()
            .filter_map(|s| s.process_id)
            .collect()
    }

    /// Apply a state transition, enforcing the state machine
    pub async fn transition(
        &self,
        id: &str,
        state: SessionState,
        error: Option<String>,
    ) -> Result<TranscodeSession> {
        let handle = self.handle(id).await?;
        let snapshot = {
            let mut session = handle.session.write().await;
            session.transition(state, error.clone())?;
            session.clone()
        };
        if state.is_terminal() {
            handle.release_capacity();
        }
        self.persist(&snapshot).await;

        info!(session_id = %id, state = state.as_str(), "session transition");
        self.emit(SessionEvent::state_changed(id, state, snapshot.error.clone()));
        Ok(snapshot)
    }

    /// Record the encoder pid once spawned
    pub async fn set_process_id(&self, id: &str, pid: Option<u32>) -> Result<()> {
        let handle = self.handle(id).await?;
        let snapshot = {
            let mut session = handle.session.write().await;
            session.process_id = pid;
            session.clone()
        };
        self.persist(&snapshot).await;
        Ok(())
    }

    /// Merge a progress update; late updates on terminal sessions are dropped
    pub async fn update_progress(&self, id: &str, progress: TranscodeProgress) -> Result<()> {
        let handle = self.handle(id).await?;
        let snapshot = {
            let mut session = handle.session.write().await;
            if session.state.is_terminal() {
                return Ok(());
            }
            session.progress.merge_from(&progress);
            session.clone()
        };
        self.persist(&snapshot).await;
        self.emit(SessionEvent::progress(
            id,
            snapshot.state,
            snapshot.progress.clone(),
        ));
        Ok(())
    }

    /// Record a streaming read against the session
    pub async fn touch(&self, id: &str) -> Result<()> {
        let handle = self.handle(id).await?;
        let (id, at) = {
            let mut session = handle.session.write().await;
            session.touch();
            (session.id.clone(), session.last_accessed)
        };
        if let Err(e) = self.inner.repo.touch(&id, at).await {
            warn!(session_id = %id, error = %e, "failed to persist last_accessed");
        }
        Ok(())
    }

    /// Remove a terminal session: registry entry, directory, and stored row
    pub async fn remove(&self, id: &str) -> Result<()> {
        let session = self.get(id).await?;
        if !session.state.is_terminal() {
            return Err(PlaybackError::bad_state(session.state.as_str(), "removed"));
        }

        self.inner.sessions.write().await.remove(id);
        self.inner.repo.delete(id).await?;
        if session.directory.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&session.directory).await {
                warn!(session_id = %id, error = %e, "failed to delete session directory");
            }
        }
        info!(session_id = %id, "session removed");
        Ok(())
    }

    /// Fail any non-terminal persisted session left over from a previous run
    ///
    /// Sessions survive restart in terminal state only. A leftover encoder
    /// process that is somehow still alive is killed first so the terminal
    /// invariant (no live process) holds.
    pub async fn recover_after_restart(&self) -> Result<()> {
        let stale = self.inner.repo.non_terminal().await?;
        for mut session in stale {
            if let Some(pid) = session.process_id {
                if orphan::process_alive(pid) {
                    warn!(session_id = %session.id, pid, "killing leftover encoder from previous run");
                    orphan::kill_process(pid);
                }
            }
            session
                .transition(
                    SessionState::Failed,
                    Some("recovered after restart".to_string()),
                )
                .ok();
            self.persist(&session).await;
            info!(session_id = %session.id, "recovered stale session as failed");
        }
        Ok(())
    }

    /// Sessions idle past the cutoff (candidates for reader-idle cancel)
    pub async fn idle_sessions(&self, idle_for: std::time::Duration) -> Vec<TranscodeSession> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(idle_for).unwrap_or_else(|_| chrono::Duration::zero());
        self.list_active()
            .await
            .into_iter()
            .filter(|s| s.is_idle_since(cutoff))
            .collect()
    }

    /// Terminal sessions whose retention has expired
    pub async fn expired_sessions(
        &self,
        ended_before: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<TranscodeSession>> {
        self.inner.repo.find_terminal_ended_before(ended_before).await
    }

    /// Persist with a single local retry on transient store errors
    async fn persist(&self, session: &TranscodeSession) {
        if let Err(e) = self.inner.repo.update(session).await {
            if e.is_retryable() {
                if let Err(e) = self.inner.repo.update(session).await {
                    error!(session_id = %session.id, error = %e, "failed to persist session after retry");
                }
            } else {
                error!(session_id = %session.id, error = %e, "failed to persist session");
            }
        }
    }

    async fn with_retry_insert(
        &self,
        session: &TranscodeSession,
    ) -> Result<Option<TranscodeSession>> {
        match self.inner.repo.insert_or_dedup(session).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_retryable() => self.inner.repo.insert_or_dedup(session).await,
            Err(e) => Err(e),
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use viewra_database::DatabaseService;

    async fn manager_with_root(root: PathBuf) -> SessionManager {
        let mut config = PlaybackConfig::default();
        config.transcoding.transcoding_root = root;
        config.transcoding.max_concurrent = 2;
        let database = DatabaseService::in_memory().await.unwrap();
        SessionManager::new(Arc::new(config), database.sessions)
    }

    fn request(input: &str) -> TranscodeRequest {
        TranscodeRequest {
            input_path: PathBuf::from(input),
            provider: None,
            params: None,
            probe: None,
            device_profile: None,
            bandwidth_kbps: None,
            start_offset_seconds: 0,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_root(dir.path().to_path_buf()).await;

        let outcome = manager
            .create(request("/media/a.mkv"), TranscodeParams::default())
            .await
            .unwrap();
        let session = outcome.session().clone();
        assert!(!outcome.is_deduped());
        assert_eq!(session.state, SessionState::Pending);
        assert!(session.directory.exists());

        let got = manager.get(&session.id).await.unwrap();
        assert_eq!(got.id, session.id);
    }

    #[tokio::test]
    async fn test_duplicate_create_coalesces() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_root(dir.path().to_path_buf()).await;

        let first = manager
            .create(request("/media/a.mkv"), TranscodeParams::default())
            .await
            .unwrap();
        let second = manager
            .create(request("/media/a.mkv"), TranscodeParams::default())
            .await
            .unwrap();

        assert!(second.is_deduped());
        assert_eq!(first.session().id, second.session().id);
        assert_eq!(manager.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_offset_is_part_of_identity() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_root(dir.path().to_path_buf()).await;

        let mut req = request("/media/a.mkv");
        req.start_offset_seconds = 0;
        let a = manager.create(req, TranscodeParams::default()).await.unwrap();

        let mut req = request("/media/a.mkv");
        req.start_offset_seconds = 300;
        let b = manager.create(req, TranscodeParams::default()).await.unwrap();

        assert!(!b.is_deduped());
        assert_ne!(a.session().id, b.session().id);
    }

    #[tokio::test]
    async fn test_capacity_refusal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_root(dir.path().to_path_buf()).await;

        manager
            .create(request("/media/a.mkv"), TranscodeParams::default())
            .await
            .unwrap();
        manager
            .create(request("/media/b.mkv"), TranscodeParams::default())
            .await
            .unwrap();

        let err = manager
            .create(request("/media/c.mkv"), TranscodeParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "AT_CAPACITY");

        // Dedup still works at capacity
        let outcome = manager
            .create(request("/media/a.mkv"), TranscodeParams::default())
            .await
            .unwrap();
        let deduped_id = outcome.session().id.clone();
        assert!(outcome.is_deduped());

        // A terminal transition gives its slot back
        manager
            .transition(&deduped_id, SessionState::Cancelled, None)
            .await
            .unwrap();
        let outcome = manager
            .create(request("/media/c.mkv"), TranscodeParams::default())
            .await
            .unwrap();
        assert!(!outcome.is_deduped());
    }

    #[tokio::test]
    async fn test_concurrent_creates_respect_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_root(dir.path().to_path_buf()).await;

        // max_concurrent is 2; four concurrent creates for distinct inputs
        let (a, b, c, d) = tokio::join!(
            manager.create(request("/media/a.mkv"), TranscodeParams::default()),
            manager.create(request("/media/b.mkv"), TranscodeParams::default()),
            manager.create(request("/media/c.mkv"), TranscodeParams::default()),
            manager.create(request("/media/d.mkv"), TranscodeParams::default()),
        );

        let outcomes = [a, b, c, d];
        let created = outcomes.iter().filter(|o| o.is_ok()).count();
        let refused = outcomes
            .iter()
            .filter(|o| matches!(o, Err(e) if e.kind() == "AT_CAPACITY"))
            .count();
        assert_eq!(created, 2);
        assert_eq!(refused, 2);
        assert_eq!(manager.active_count().await, 2);
    }

    #[tokio::test]
    async fn test_transition_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_root(dir.path().to_path_buf()).await;
        let mut events = manager.subscribe();

        let session = manager
            .create(request("/media/a.mkv"), TranscodeParams::default())
            .await
            .unwrap()
            .session()
            .clone();

        manager
            .transition(&session.id, SessionState::Starting, None)
            .await
            .unwrap();
        manager
            .transition(&session.id, SessionState::Running, None)
            .await
            .unwrap();

        let err = manager
            .transition(&session.id, SessionState::Starting, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "BAD_STATE");

        let created = events.recv().await.unwrap();
        assert_eq!(created.state, SessionState::Pending);
        let starting = events.recv().await.unwrap();
        assert_eq!(starting.state, SessionState::Starting);
    }

    #[tokio::test]
    async fn test_late_progress_dropped_on_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_root(dir.path().to_path_buf()).await;

        let session = manager
            .create(request("/media/a.mkv"), TranscodeParams::default())
            .await
            .unwrap()
            .session()
            .clone();
        manager
            .transition(&session.id, SessionState::Cancelled, None)
            .await
            .unwrap();

        manager
            .update_progress(
                &session.id,
                TranscodeProgress {
                    percent: 50.0,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let got = manager.get(&session.id).await.unwrap();
        assert_eq!(got.progress.percent, 0.0);
    }

    #[tokio::test]
    async fn test_remove_requires_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_root(dir.path().to_path_buf()).await;

        let session = manager
            .create(request("/media/a.mkv"), TranscodeParams::default())
            .await
            .unwrap()
            .session()
            .clone();

        assert!(manager.remove(&session.id).await.is_err());

        manager
            .transition(&session.id, SessionState::Cancelled, None)
            .await
            .unwrap();
        manager.remove(&session.id).await.unwrap();

        assert!(!session.directory.exists());
        assert!(manager.get(&session.id).await.is_err());
    }

    #[tokio::test]
    async fn test_terminal_session_allows_new_create() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_root(dir.path().to_path_buf()).await;

        let first = manager
            .create(request("/media/a.mkv"), TranscodeParams::default())
            .await
            .unwrap()
            .session()
            .clone();
        manager
            .transition(&first.id, SessionState::Failed, Some("x".into()))
            .await
            .unwrap();

        let second = manager
            .create(request("/media/a.mkv"), TranscodeParams::default())
            .await
            .unwrap();
        assert!(!second.is_deduped());
        assert_ne!(second.session().id, first.id);
    }
}
