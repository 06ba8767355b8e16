//! Continuous batch execution: keep up to `concurrent` trial containers
//! running until every trial in `start..=end` has completed or failed.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::Local;
use fieldpanel_core::{has_samples, TrialId};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::event_bus::PanelEvent;
use crate::metrics::{BATCHES_STARTED_TOTAL, TRIALS_STARTED_TOTAL, TRIAL_START_FAILURES_TOTAL};
use crate::state::AppState;

/// Pending trials listed in a status report.
const PENDING_PREVIEW: usize = 10;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchInfo {
    pub start_trial: u32,
    pub end_trial: u32,
    pub concurrent: usize,
    pub total: usize,
    pub started_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchStatus {
    pub active: bool,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub details: Option<BatchDetails>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchDetails {
    pub batch: BatchInfo,
    pub pending: usize,
    pub pending_trials: Vec<TrialId>,
    pub completed: usize,
    pub completed_trials: Vec<TrialId>,
    pub failed: usize,
    pub failed_trials: Vec<TrialId>,
    pub progress: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchStarted {
    pub success: bool,
    pub started: Vec<TrialId>,
    pub total: usize,
    pub pending: usize,
    pub message: String,
}

/// Identifies one batch run; stale monitors hold an outdated generation.
#[derive(Debug, Clone)]
pub struct BatchHandle {
    generation: u64,
    token: CancellationToken,
}

impl BatchHandle {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[derive(Debug, Default)]
pub struct BatchState {
    active: Option<BatchInfo>,
    pending: VecDeque<TrialId>,
    completed: Vec<TrialId>,
    failed: Vec<TrialId>,
    launched: HashSet<TrialId>,
    running: bool,
    concurrent_limit: usize,
    generation: u64,
    token: Option<CancellationToken>,
}

impl BatchState {
    pub fn mark_completed(&mut self, id: TrialId) {
        self.pending.retain(|p| *p != id);
        if !self.completed.contains(&id) {
            self.completed.push(id);
        }
    }

    pub fn mark_failed(&mut self, id: TrialId) {
        self.pending.retain(|p| *p != id);
        if !self.failed.contains(&id) {
            self.failed.push(id);
        }
    }

    fn mark_launched(&mut self, id: TrialId) {
        self.pending.retain(|p| *p != id);
        self.launched.insert(id);
    }

    /// Launched by this batch and not yet classified.
    fn awaiting_result(&self, id: TrialId) -> bool {
        self.launched.contains(&id) && !self.completed.contains(&id) && !self.failed.contains(&id)
    }

    fn status(&self) -> BatchStatus {
        let Some(batch) = self.active.clone() else {
            return BatchStatus {
                active: false,
                details: None,
            };
        };
        let done = self.completed.len() + self.failed.len();
        let progress = if batch.total > 0 {
            (done as f64 / batch.total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        BatchStatus {
            active: self.running,
            details: Some(BatchDetails {
                batch,
                pending: self.pending.len(),
                pending_trials: self.pending.iter().take(PENDING_PREVIEW).copied().collect(),
                completed: self.completed.len(),
                completed_trials: self.completed.clone(),
                failed: self.failed.len(),
                failed_trials: self.failed.clone(),
                progress,
            }),
        }
    }
}

#[derive(Default)]
pub struct BatchScheduler {
    state: Mutex<BatchState>,
}

impl BatchScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new batch, cancelling the monitor of any previous one.
    pub fn start(&self, start: u32, end: u32, concurrent: usize) -> BatchHandle {
        let mut state = self.state.lock();
        if let Some(previous) = state.token.take() {
            previous.cancel();
        }

        let token = CancellationToken::new();
        state.generation += 1;
        state.pending = (start..=end).map(TrialId).collect();
        state.completed.clear();
        state.failed.clear();
        state.launched.clear();
        state.concurrent_limit = concurrent;
        state.active = Some(BatchInfo {
            start_trial: start,
            end_trial: end,
            concurrent,
            total: state.pending.len(),
            started_at: Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        });
        state.running = true;
        state.token = Some(token.clone());

        BatchHandle {
            generation: state.generation,
            token,
        }
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.running = false;
        state.pending.clear();
        state.active = None;
        if let Some(token) = state.token.take() {
            token.cancel();
        }
    }

    pub fn status(&self) -> BatchStatus {
        self.state.lock().status()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn mark_completed(&self, id: TrialId) {
        self.state.lock().mark_completed(id);
    }

    pub fn mark_failed(&self, id: TrialId) {
        self.state.lock().mark_failed(id);
    }

    /// Lock the state if `handle` still refers to the running batch.
    fn current(&self, handle: &BatchHandle) -> Option<MutexGuard<'_, BatchState>> {
        let state = self.state.lock();
        (state.running && state.generation == handle.generation && !handle.token.is_cancelled())
            .then_some(state)
    }
}

fn validate(start: u32, end: u32, concurrent: usize, vnc_base_port: u16) -> ApiResult<()> {
    if start > end {
        return Err(ApiError::Validation(format!(
            "start_trial ({start}) must not exceed end_trial ({end})"
        )));
    }
    // Every trial in range needs a host VNC port; this also bounds the queue.
    if TrialId(end).vnc_port(vnc_base_port).is_err() {
        return Err(ApiError::Validation(format!(
            "end_trial ({end}) exceeds the highest trial with a VNC port ({})",
            u16::MAX - vnc_base_port
        )));
    }
    if concurrent == 0 {
        return Err(ApiError::Validation("concurrent must be at least 1".into()));
    }
    Ok(())
}

/// Start a batch: launch the first trials up to the concurrency limit and
/// hand the rest to a background monitor.
pub async fn launch(state: &AppState, start: u32, end: u32, concurrent: usize) -> ApiResult<BatchStarted> {
    let simulation = state.simulation()?;
    validate(start, end, concurrent, state.settings.containers.vnc_base_port)?;

    let scheduler = &state.batch;
    if scheduler.is_running() {
        info!("Replacing running batch");
        scheduler.stop();
    }
    let handle = scheduler.start(start, end, concurrent);
    BATCHES_STARTED_TOTAL.inc();
    info!(start, end, concurrent, "Batch started");

    let mut started = Vec::new();
    let mut running = simulation.running_count().await?;
    while running < concurrent {
        let next = match scheduler.current(&handle) {
            Some(batch) => batch.pending.front().copied(),
            None => None,
        };
        let Some(id) = next else { break };

        match simulation.start_trial(id).await {
            Ok(_) => {
                TRIALS_STARTED_TOTAL.inc();
                if let Some(mut batch) = scheduler.current(&handle) {
                    batch.mark_launched(id);
                }
                started.push(id);
                running += 1;
            }
            Err(e) => {
                warn!(trial = %id, "Failed to start trial: {}", e);
                TRIAL_START_FAILURES_TOTAL.inc();
                if let Some(mut batch) = scheduler.current(&handle) {
                    batch.mark_failed(id);
                }
            }
        }
    }

    tokio::spawn(monitor(state.clone(), handle));

    let status = scheduler.status();
    let pending = status.details.as_ref().map_or(0, |d| d.pending);
    state.events.publish(PanelEvent::BatchStarted {
        trials: started.clone(),
        batch_status: status,
    });

    Ok(BatchStarted {
        success: true,
        message: format!(
            "Batch started: {} trials running, {} pending",
            started.len(),
            pending
        ),
        started,
        total: (start..=end).count(),
        pending,
    })
}

enum Flow {
    Continue,
    Done,
}

async fn monitor(state: AppState, handle: BatchHandle) {
    let poll = Duration::from_secs(state.settings.batch.poll_interval_secs.max(1));
    debug!("Batch monitor started (poll every {:?})", poll);

    loop {
        if state.batch.current(&handle).is_none() {
            break;
        }

        match tick(&state, &handle).await {
            Ok(Flow::Done) => break,
            Ok(Flow::Continue) => {}
            Err(e) => error!("Batch monitor error: {}", e),
        }

        tokio::select! {
            _ = handle.token.cancelled() => break,
            _ = tokio::time::sleep(poll) => {}
        }
    }

    debug!("Batch monitor stopped");
}

async fn tick(state: &AppState, handle: &BatchHandle) -> ApiResult<Flow> {
    let simulation = state.simulation()?;
    let scheduler = &state.batch;
    let layout = state.layout();

    let containers = simulation.list_containers().await?;
    let mut running = containers.iter().filter(|c| c.is_running()).count();

    let exited: Vec<TrialId> = containers
        .iter()
        .filter(|c| c.status == "exited")
        .filter_map(|c| c.trial())
        .collect();
    {
        let Some(mut batch) = scheduler.current(handle) else {
            return Ok(Flow::Done);
        };
        for id in exited {
            if !batch.awaiting_result(id) {
                continue;
            }
            if has_samples(layout, id) {
                info!(trial = %id, "Trial completed");
                batch.mark_completed(id);
            } else {
                warn!(trial = %id, "Trial exited without samples");
                batch.mark_failed(id);
            }
        }
    }

    loop {
        let (limit, next) = match scheduler.current(handle) {
            Some(batch) => (batch.concurrent_limit, batch.pending.front().copied()),
            None => return Ok(Flow::Done),
        };
        if running >= limit {
            break;
        }
        let Some(id) = next else { break };

        match simulation.start_trial(id).await {
            Ok(_) => {
                TRIALS_STARTED_TOTAL.inc();
                let batch_status = {
                    let Some(mut batch) = scheduler.current(handle) else {
                        return Ok(Flow::Done);
                    };
                    batch.mark_launched(id);
                    batch.status()
                };
                running += 1;
                state.events.publish(PanelEvent::TrialStarted {
                    trial_id: id,
                    batch_status: Some(batch_status),
                });
            }
            Err(e) => {
                warn!(trial = %id, "Failed to start trial: {}", e);
                TRIAL_START_FAILURES_TOTAL.inc();
                match scheduler.current(handle) {
                    Some(mut batch) => batch.mark_failed(id),
                    None => return Ok(Flow::Done),
                }
            }
        }
    }

    state.events.publish(PanelEvent::BatchUpdate {
        batch_status: scheduler.status(),
    });

    let finished = {
        let Some(mut batch) = scheduler.current(handle) else {
            return Ok(Flow::Done);
        };
        if batch.pending.is_empty() && running == 0 {
            batch.running = false;
            true
        } else {
            false
        }
    };
    if finished {
        info!("Batch complete");
        state.events.publish(PanelEvent::BatchComplete {
            batch_status: scheduler.status(),
        });
        return Ok(Flow::Done);
    }

    Ok(Flow::Continue)
}
