//! The update session engine.
//!
//! One session walks the confirm/countdown/execute protocol: an actor queues
//! regions, triggers [`UpdateSession::run`], (optionally) confirms within a
//! timeout, a countdown broadcasts the impending update, then the server is
//! stopped, every pending region's files are pulled from the current
//! upstream with each overwritten file recycled first, and the server is
//! restarted. Any extraction failure rolls the world back to its
//! pre-session state before the session terminates.
//!
//! State machine:
//!
//! ```text
//! Idle -> PendingConfirmation -> Countdown -> Executing -> Done
//!              |        |            |            \-> Failed
//!              |        v            v
//!              \----> Aborted <------/
//! ```
//!
//! At most one session is active per engine; `run` acquires a non-blocking
//! session lock and reports [`SessionError::ConcurrencyConflict`] when it is
//! already held. The pending-region set may only be mutated while no
//! session is active.

use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, Notify, broadcast};
use tokio_util::sync::CancellationToken;

use crate::history::History;
use crate::metrics::Metrics;
use crate::models::{Config, Region, UnknownDimension};
use crate::recycle::{RecycleBin, RecycleError};
use crate::server::{ServerError, ServerHandle};
use crate::upstream::{UpstreamError, UpstreamRegistry};

/// Where a session currently is in its protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    PendingConfirmation,
    Countdown,
    Executing,
    Done,
    Aborted,
    Failed,
}

/// How a completed (non-failed) run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Done,
    Aborted,
}

/// Events emitted over the session's broadcast channel for the embedding
/// layer to render.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    AwaitingConfirm { timeout: Duration },
    Confirmed,
    CountdownTick { remaining_secs: u64, region_count: usize },
    TimedOut,
    Aborted,
    ExecutionStarted,
    ExecutionFinished { success: bool },
    ErrorOccurred { message: String },
}

/// Errors from the session protocol and execution.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("another update session is already running")]
    ConcurrencyConflict,

    #[error("no session is awaiting confirmation")]
    NothingToConfirm,

    #[error("no cancellable session is running")]
    NothingToAbort,

    #[error("no regions are pending for update")]
    NothingToUpdate,

    #[error("current upstream '{0}' is not configured")]
    UpstreamNotConfigured(String),

    #[error(transparent)]
    Dimension(#[from] UnknownDimension),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Recycle(#[from] RecycleError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Per-run cancellation state; recreated from scratch on every `run` so
/// nothing leaks from a previous session into the next one.
struct SessionControl {
    confirm: Arc<Notify>,
    cancel: CancellationToken,
}

impl SessionControl {
    fn new() -> Self {
        Self {
            confirm: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
        }
    }
}

/// The session orchestrator. Owns the pending-region set and drives the
/// whole confirm/countdown/execute/rollback protocol.
///
/// All collaborators are injected at construction; the session holds no
/// global state. Clone-free sharing happens through `Arc<UpdateSession>`.
pub struct UpdateSession {
    config: Arc<Config>,
    upstreams: Arc<UpstreamRegistry>,
    bin: Arc<RecycleBin>,
    history: Arc<History>,
    server: Arc<dyn ServerHandle>,
    metrics: Arc<Metrics>,

    regions: Mutex<IndexMap<Region, Option<String>>>,
    state: Mutex<SessionState>,
    running: AtomicBool,
    session_lock: Arc<AsyncMutex<()>>,
    control: Mutex<Option<SessionControl>>,
    events: broadcast::Sender<SessionEvent>,
}

impl UpdateSession {
    pub fn new(
        config: Arc<Config>,
        upstreams: Arc<UpstreamRegistry>,
        bin: Arc<RecycleBin>,
        history: Arc<History>,
        server: Arc<dyn ServerHandle>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            config,
            upstreams,
            bin,
            history,
            server,
            metrics,
            regions: Mutex::new(IndexMap::new()),
            state: Mutex::new(SessionState::Idle),
            running: AtomicBool::new(false),
            session_lock: Arc::new(AsyncMutex::new(())),
            control: Mutex::new(None),
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Whether a session currently holds the execution lock.
    pub fn is_session_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Subscribe to session events. Multiple subscribers are fine.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the pending-region set.
    pub fn current_regions(&self) -> IndexMap<Region, Option<String>> {
        self.regions.lock().unwrap().clone()
    }

    /// Queue a region for the next update. Returns whether the set changed.
    pub fn add_region(
        &self,
        region: Region,
        actor: Option<String>,
    ) -> Result<bool, SessionError> {
        let mut regions = self.regions.lock().unwrap();
        if self.is_session_running() {
            return Err(SessionError::ConcurrencyConflict);
        }
        if regions.contains_key(&region) {
            return Ok(false);
        }
        tracing::debug!(
            actor = actor.as_deref().unwrap_or("console"),
            %region,
            "added region to session"
        );
        regions.insert(region, actor);
        Ok(true)
    }

    /// Drop a region from the pending set. Returns whether the set changed.
    pub fn remove_region(
        &self,
        region: &Region,
        actor: Option<String>,
    ) -> Result<bool, SessionError> {
        let mut regions = self.regions.lock().unwrap();
        if self.is_session_running() {
            return Err(SessionError::ConcurrencyConflict);
        }
        let removed = regions.shift_remove(region).is_some();
        if removed {
            tracing::debug!(
                actor = actor.as_deref().unwrap_or("console"),
                %region,
                "removed region from session"
            );
        }
        Ok(removed)
    }

    /// Clear the whole pending set.
    pub fn remove_all_regions(&self) -> Result<usize, SessionError> {
        let mut regions = self.regions.lock().unwrap();
        if self.is_session_running() {
            return Err(SessionError::ConcurrencyConflict);
        }
        let count = regions.len();
        regions.clear();
        Ok(count)
    }

    /// Confirm a session waiting in `PendingConfirmation`.
    pub fn confirm(&self, actor: Option<&str>) -> Result<(), SessionError> {
        if self.state() != SessionState::PendingConfirmation {
            return Err(SessionError::NothingToConfirm);
        }
        if let Some(control) = self.control.lock().unwrap().as_ref() {
            control.confirm.notify_one();
        }
        tracing::info!(actor = actor.unwrap_or("console"), "update session confirmed");
        Ok(())
    }

    /// Abort a session before execution begins. Meaningless once extraction
    /// has started; the operation then runs to completion or rollback.
    pub fn abort(&self, actor: Option<&str>) -> Result<(), SessionError> {
        if !matches!(
            self.state(),
            SessionState::PendingConfirmation | SessionState::Countdown
        ) {
            return Err(SessionError::NothingToAbort);
        }
        if let Some(control) = self.control.lock().unwrap().as_ref() {
            control.cancel.cancel();
        }
        tracing::info!(actor = actor.unwrap_or("console"), "update session aborted");
        Ok(())
    }

    /// Run one full session protocol.
    ///
    /// Acquires the session lock non-blockingly; a second concurrent call
    /// fails with [`SessionError::ConcurrencyConflict`] and changes nothing.
    /// `confirm_timeout` falls back to the configured wait when `None`.
    pub async fn run(
        &self,
        actor: Option<String>,
        requires_confirm: bool,
        confirm_timeout: Option<Duration>,
    ) -> Result<SessionOutcome, SessionError> {
        let _guard = self
            .session_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| SessionError::ConcurrencyConflict)?;
        if self.regions.lock().unwrap().is_empty() {
            // Rejected before any state transition
            return Err(SessionError::NothingToUpdate);
        }
        self.running.store(true, Ordering::SeqCst);
        self.metrics.record_session_started();

        let (confirm, cancel) = {
            let control = SessionControl::new();
            let handles = (control.confirm.clone(), control.cancel.clone());
            *self.control.lock().unwrap() = Some(control);
            handles
        };

        if requires_confirm {
            let wait = confirm_timeout
                .unwrap_or_else(|| self.config.update_operation.confirm_time_wait());
            self.set_state(SessionState::PendingConfirmation);
            self.emit(SessionEvent::AwaitingConfirm { timeout: wait });
            let confirmed = tokio::select! {
                _ = confirm.notified() => true,
                _ = cancel.cancelled() => {
                    self.emit(SessionEvent::Aborted);
                    self.server.broadcast("Update task aborted");
                    false
                }
                _ = tokio::time::sleep(wait) => {
                    self.emit(SessionEvent::TimedOut);
                    self.server.broadcast("Confirmation wait timed out, update task aborted");
                    false
                }
            };
            if !confirmed {
                self.metrics.record_session_aborted();
                self.finish(SessionState::Aborted);
                return Ok(SessionOutcome::Aborted);
            }
        }

        // Confirmed (or confirmation not required, which behaves the same):
        // count down before the server goes away.
        self.set_state(SessionState::Countdown);
        self.emit(SessionEvent::Confirmed);
        self.server.broadcast("Update task confirmed");
        let mut remaining = self.config.update_operation.update_delay_secs;
        while remaining > 0 {
            let region_count = self.regions.lock().unwrap().len();
            self.emit(SessionEvent::CountdownTick {
                remaining_secs: remaining,
                region_count,
            });
            self.server.broadcast(&format!(
                "Updating {region_count} region(s) in {remaining} second(s)"
            ));
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.emit(SessionEvent::Aborted);
                    self.server.broadcast("Update task aborted");
                    self.metrics.record_session_aborted();
                    self.finish(SessionState::Aborted);
                    return Ok(SessionOutcome::Aborted);
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    remaining -= 1;
                }
            }
        }

        self.set_state(SessionState::Executing);
        self.emit(SessionEvent::ExecutionStarted);
        match self.execute(actor).await {
            Ok(()) => {
                self.emit(SessionEvent::ExecutionFinished { success: true });
                self.server.broadcast("Region update finished");
                self.metrics.record_session_succeeded();
                self.finish(SessionState::Done);
                Ok(SessionOutcome::Done)
            }
            Err(error) => {
                self.emit(SessionEvent::ErrorOccurred {
                    message: error.to_string(),
                });
                self.emit(SessionEvent::ExecutionFinished { success: false });
                self.metrics.record_session_failed();
                self.finish(SessionState::Failed);
                Err(error)
            }
        }
    }

    /// Stop/extract/start, with transactional rollback and a history record
    /// on the way out.
    async fn execute(&self, actor: Option<String>) -> Result<(), SessionError> {
        let mut captured: Option<IndexMap<Region, Option<String>>> = None;
        let result = self.run_update(&mut captured).await;
        let upstream_name = self.upstreams.current_name();

        match &result {
            Ok(()) => {
                if let Some(regions) = &captured {
                    self.history.record(
                        actor,
                        true,
                        self.file_map(regions),
                        &upstream_name,
                    );
                }
            }
            Err(error) => {
                tracing::error!(%error, "error running update session");
                let restored = self.bin.roll_back();
                self.metrics.record_slots_restored(restored as u64);
                if restored > 0 {
                    tracing::info!(restored, "restored recycled files after failed update");
                }
                if let Some(regions) = &captured {
                    self.history.record(
                        actor,
                        false,
                        self.file_map(regions),
                        &upstream_name,
                    );
                }
                if self.server.is_running().await {
                    self.server.say(&format!(
                        "Error occurred during region update: {error}; check the server log for details"
                    ));
                } else if let Err(e) = self.server.start().await {
                    tracing::error!(error = %e, "failed to restart the server after a failed update");
                }
            }
        }
        result
    }

    async fn run_update(
        &self,
        captured: &mut Option<IndexMap<Region, Option<String>>>,
    ) -> Result<(), SessionError> {
        self.server.stop().await?;

        self.bin.begin()?;
        // The pending set is cleared only once the stop has succeeded; an
        // abort before this point leaves every region selectable.
        let regions = std::mem::take(&mut *self.regions.lock().unwrap());
        *captured = Some(regions.clone());

        let upstream = self.upstreams.current().ok_or_else(|| {
            SessionError::UpstreamNotConfigured(self.upstreams.current_name())
        })?;
        let dest = &self.config.paths.destination_world_directory;
        let skip_missing = self.config.update_operation.treat_missing_as_skip;

        for region in regions.keys() {
            for file in region.file_list(&self.config.paths)? {
                match upstream.extract_file(&file, dest, &self.bin).await {
                    Ok(()) => {
                        self.metrics.record_file_extracted();
                        tracing::info!(
                            upstream = upstream.name(),
                            file = %file,
                            dest = %dest,
                            "extracted region file"
                        );
                    }
                    Err(UpstreamError::FileNotFound(missing)) if skip_missing => {
                        self.metrics.record_file_missing();
                        tracing::info!(
                            upstream = upstream.name(),
                            file = %missing,
                            "upstream has no such file, skipped"
                        );
                    }
                    Err(error) => return Err(error.into()),
                }
            }
        }

        self.bin.commit()?;
        self.server.start().await?;
        Ok(())
    }

    /// Relative file path -> queueing actor, for the history record.
    fn file_map(
        &self,
        regions: &IndexMap<Region, Option<String>>,
    ) -> IndexMap<String, Option<String>> {
        let mut files = IndexMap::new();
        for (region, actor) in regions {
            match region.file_list(&self.config.paths) {
                Ok(list) => {
                    for file in list {
                        files.insert(file.to_string(), actor.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!(%region, error = %e, "cannot resolve files for history record")
                }
            }
        }
        files
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap();
        tracing::debug!(from = ?*state, to = ?next, "session state transition");
        *state = next;
    }

    fn finish(&self, terminal: SessionState) {
        self.set_state(terminal);
        *self.control.lock().unwrap() = None;
        self.running.store(false, Ordering::SeqCst);
    }

    fn emit(&self, event: SessionEvent) {
        // It's fine if no one is listening
        let _ = self.events.send(event);
    }
}
