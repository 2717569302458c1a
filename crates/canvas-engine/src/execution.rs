//! Execution Status Tracker.
//!
//! Keeps the running set and a per-file status overlay. A started run owns
//! one push channel until its completion message arrives, an explicit stop
//! closes it, or the engine tears down. A periodic status poll reconciles the
//! running set against the remote store for anything the channels missed.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use canvas_client::{ChannelHandle, ClientResult, RemoteStore, RunEvent, RunStatus};
use canvas_core::{FileStatus, NodeId};
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{EngineResult, InvalidAction};
use crate::events::EngineEvent;

struct RunSlot {
    channel: Option<ChannelHandle>,
    started_at: Instant,
}

impl RunSlot {
    fn close(&self) {
        if let Some(channel) = &self.channel {
            channel.close();
        }
    }
}

#[derive(Default)]
struct TrackerState {
    runs: HashMap<NodeId, RunSlot>,
    statuses: HashMap<NodeId, FileStatus>,
}

impl TrackerState {
    /// Clear a run and record how it ended.
    fn finish(&mut self, file: &NodeId, status: FileStatus) -> bool {
        let Some(slot) = self.runs.remove(file) else {
            return false;
        };
        slot.close();
        self.statuses.insert(file.clone(), status);
        true
    }
}

pub struct ExecutionTracker {
    client: Arc<dyn RemoteStore>,
    events: broadcast::Sender<EngineEvent>,
    state: Arc<Mutex<TrackerState>>,
    grace: Duration,
}

fn lock(state: &Mutex<TrackerState>) -> MutexGuard<'_, TrackerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ExecutionTracker {
    pub fn new(
        client: Arc<dyn RemoteStore>,
        events: broadcast::Sender<EngineEvent>,
        grace: Duration,
    ) -> Self {
        Self {
            client,
            events,
            state: Arc::new(Mutex::new(TrackerState::default())),
            grace,
        }
    }

    pub fn is_running(&self, file: &NodeId) -> bool {
        lock(&self.state).runs.contains_key(file)
    }

    pub fn running(&self) -> BTreeSet<NodeId> {
        lock(&self.state).runs.keys().cloned().collect()
    }

    pub fn status(&self, file: &NodeId) -> Option<FileStatus> {
        lock(&self.state).statuses.get(file).copied()
    }

    pub fn statuses(&self) -> HashMap<NodeId, FileStatus> {
        lock(&self.state).statuses.clone()
    }

    /// Whether a run channel is open for the file.
    pub fn has_channel(&self, file: &NodeId) -> bool {
        lock(&self.state)
            .runs
            .get(file)
            .and_then(|slot| slot.channel.as_ref())
            .is_some_and(|c| !c.is_closed())
    }

    /// Start a run: mark the file running, open its channel and route the
    /// channel's messages into engine events.
    pub async fn start(&self, file: &NodeId) -> EngineResult<()> {
        {
            let mut state = lock(&self.state);
            if state.runs.contains_key(file) {
                return Err(InvalidAction::AlreadyRunning(file.clone()).into());
            }
            state.runs.insert(
                file.clone(),
                RunSlot {
                    channel: None,
                    started_at: Instant::now(),
                },
            );
            state.statuses.insert(file.clone(), FileStatus::Running);
        }

        let channel = match self.client.run_file(file).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(file = %file, error = %e, "run failed to start");
                lock(&self.state).finish(file, FileStatus::Failed);
                return Err(e.into());
            }
        };
        info!(file = %file, "run started");

        let state = self.state.clone();
        let events = self.events.clone();
        let id = file.clone();
        let handle = channel.on_message(move |event| match event {
            RunEvent::Output(output) => {
                let _ = events.send(EngineEvent::RunOutput {
                    file: id.clone(),
                    output,
                });
            }
            RunEvent::Completed(done) => {
                let status = if done.success {
                    FileStatus::Success
                } else {
                    FileStatus::Failed
                };
                if lock(&state).finish(&id, status) {
                    info!(file = %id, status = status.label(), code = ?done.return_code, "run finished");
                    let _ = events.send(EngineEvent::RunFinished {
                        file: id.clone(),
                        status,
                        return_code: done.return_code,
                    });
                }
            }
            RunEvent::Disconnected => {
                // Left running; the status poll decides.
                debug!(file = %id, "run channel disconnected");
                if let Some(slot) = lock(&state).runs.get_mut(&id) {
                    slot.channel = None;
                }
            }
        });

        let mut state = lock(&self.state);
        match state.runs.get_mut(file) {
            Some(slot) if slot.channel.is_none() => slot.channel = Some(handle),
            // Completed or stopped before the handle was registered.
            _ => handle.close(),
        }
        Ok(())
    }

    /// Stop a run: close the channel, ask the store to stop, then clear the
    /// running flag whatever the stop call returned.
    pub async fn stop(&self, file: &NodeId) {
        if let Some(slot) = lock(&self.state).runs.get(file) {
            slot.close();
        }
        if let Err(e) = self.client.stop_file(file).await {
            warn!(file = %file, error = %e, "stop request failed");
        }
        if lock(&self.state).finish(file, FileStatus::Idle) {
            info!(file = %file, "run stopped");
            let _ = self.events.send(EngineEvent::RunFinished {
                file: file.clone(),
                status: FileStatus::Idle,
                return_code: None,
            });
        }
    }

    /// Re-derive the running set from the status endpoint.
    pub async fn poll(&self, files: &[NodeId]) {
        let answers = self.fetch_statuses(files).await;
        self.apply_statuses(answers);
    }

    /// Ask the status endpoint about every file.
    pub async fn fetch_statuses(&self, files: &[NodeId]) -> Vec<(NodeId, ClientResult<RunStatus>)> {
        join_all(files.iter().map(|id| async move {
            (id.clone(), self.client.file_status(id).await)
        }))
        .await
    }

    /// Reconcile the running set with status answers.
    ///
    /// Files reported running are added. Files reported idle are cleared,
    /// except runs started less than the grace period ago. Failed answers
    /// leave the file as it was.
    pub fn apply_statuses(&self, answers: Vec<(NodeId, ClientResult<RunStatus>)>) {
        let mut cleared = Vec::new();
        {
            let mut state = lock(&self.state);
            for (id, answer) in answers {
                let running = match answer {
                    Ok(status) => status.running,
                    Err(e) if e.is_not_found() => false,
                    Err(e) => {
                        debug!(file = %id, error = %e, "status poll failed");
                        continue;
                    }
                };
                let expired = state
                    .runs
                    .get(&id)
                    .map(|slot| slot.started_at.elapsed() >= self.grace);
                match (running, expired) {
                    (true, None) => {
                        debug!(file = %id, "picked up run from status poll");
                        state.runs.insert(
                            id.clone(),
                            RunSlot {
                                channel: None,
                                started_at: Instant::now(),
                            },
                        );
                        state.statuses.insert(id, FileStatus::Running);
                    }
                    (false, Some(true)) => {
                        debug!(file = %id, "run cleared by status poll");
                        state.finish(&id, FileStatus::Idle);
                        cleared.push(id);
                    }
                    _ => {}
                }
            }
        }
        for file in cleared {
            let _ = self.events.send(EngineEvent::RunFinished {
                file,
                status: FileStatus::Idle,
                return_code: None,
            });
        }
    }

    /// Forget a file that no longer exists.
    pub fn forget(&self, file: &NodeId) {
        let mut state = lock(&self.state);
        if let Some(slot) = state.runs.remove(file) {
            slot.close();
        }
        state.statuses.remove(file);
    }

    /// Close every open channel and clear the running set.
    pub fn close_all(&self) {
        let mut state = lock(&self.state);
        for (file, slot) in state.runs.drain() {
            debug!(file = %file, "closing run channel");
            slot.close();
        }
    }
}
