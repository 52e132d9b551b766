//! Async job polling controller.
//!
//! One [`JobController`] owns at most one outstanding job. Submitting runs inline (exactly one
//! request), polling runs in a spawned task that holds the poll interval, the elapsed-time
//! ticker and the absolute deadline. The task exits on completion, failure, timeout, `stop`,
//! `retry` and when the controller is dropped, releasing all three.

use crate::{
    client::{JobBackend, SubmissionOutcome, SubmitRequest},
    error::JobError,
    job::{JobId, JobState},
    kind::JobKind,
    tracker::{Generation, JobTracker, Transition},
};
use parking_lot::Mutex;
use smol_str::SmolStr;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval, interval_at, sleep_until},
};
use tracing::{debug, info, warn};

/// Shortest period accepted for the poll and elapsed-time timers.
const MIN_TIMER_PERIOD: Duration = Duration::from_millis(10);

/// Polling configuration that is independent of the job kind.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// How often fallback progress is advanced between polls
    pub refresh_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(1),
        }
    }
}

impl PollerConfig {
    /// Set elapsed-time refresh interval
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }
}

/// Tracker and the channel its state is published on, always updated together.
#[derive(Debug)]
struct Shared {
    tracker: JobTracker,
    state_tx: watch::Sender<JobState>,
}

impl Shared {
    fn publish(&self) {
        self.state_tx.send_replace(self.tracker.state().clone());
    }
}

#[derive(Debug)]
struct PollRun {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Drives one analysis job from submission to a terminal state.
#[derive(Debug)]
pub struct JobController<B> {
    backend: Arc<B>,
    kind: JobKind,
    config: PollerConfig,
    shared: Arc<Mutex<Shared>>,
    run: Option<PollRun>,
    last_request: Option<SubmitRequest>,
}

impl<B: JobBackend> JobController<B> {
    pub fn new(backend: B, kind: JobKind) -> Self {
        Self::with_config(backend, kind, PollerConfig::default())
    }

    pub fn with_config(backend: B, kind: JobKind, config: PollerConfig) -> Self {
        let (state_tx, _) = watch::channel(JobState::Idle);
        let tracker = JobTracker::for_kind(&kind);

        Self {
            backend: Arc::new(backend),
            kind,
            config,
            shared: Arc::new(Mutex::new(Shared { tracker, state_tx })),
            run: None,
            last_request: None,
        }
    }

    /// Submit a new job, discarding any previous one.
    ///
    /// On a [`JobError::Submission`] no job is created and the controller stays `Idle`.
    pub async fn submit(&mut self, request: SubmitRequest) -> Result<(), JobError> {
        self.stop();
        self.last_request = Some(request.clone());

        info!(kind = %self.kind.name, symbol = %request.symbol, "submitting analysis job");
        let outcome = self.backend.submit(&request).await.inspect_err(|error| {
            warn!(kind = %self.kind.name, symbol = %request.symbol, %error, "job submission failed");
        })?;

        let job_id = match &outcome {
            SubmissionOutcome::Accepted(job_id) => Some(job_id.clone()),
            SubmissionOutcome::Immediate(_) => None,
        };

        let generation = {
            let mut shared = self.shared.lock();
            let generation = shared.tracker.begin(outcome, Instant::now());
            shared.publish();
            generation
        };

        match job_id {
            Some(job_id) => {
                info!(kind = %self.kind.name, %job_id, "job accepted, polling for status");
                self.spawn_poller(job_id, request.symbol, generation);
            }
            None => info!(kind = %self.kind.name, "job resolved immediately"),
        }

        Ok(())
    }

    /// Stop the current job and resubmit the last request as a new job.
    pub async fn retry(&mut self) -> Result<(), JobError> {
        let request = self.last_request.clone().ok_or(JobError::NothingToRetry)?;
        debug!(kind = %self.kind.name, symbol = %request.symbol, "retrying job");
        self.submit(request).await
    }

    fn spawn_poller(&mut self, job_id: JobId, symbol: SmolStr, generation: Generation) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_poll_loop(PollLoop {
            backend: Arc::clone(&self.backend),
            shared: Arc::clone(&self.shared),
            job_id,
            symbol,
            generation,
            poll_interval: self.kind.poll_interval,
            refresh_interval: self.config.refresh_interval,
            shutdown_rx,
        }));

        self.run = Some(PollRun { shutdown_tx, task });
    }
}

impl<B> JobController<B> {
    /// Cancel polling and return to `Idle`.
    ///
    /// Idempotent: returns `true` only for the call that cancelled a running poller.
    pub fn stop(&mut self) -> bool {
        let run = self.run.take();

        {
            let mut shared = self.shared.lock();
            if shared.tracker.reset() {
                debug!("job polling cancelled");
            }
            shared.publish();
        }

        match run {
            Some(PollRun { shutdown_tx, task }) => {
                let _ = shutdown_tx.send(());
                let was_running = !task.is_finished();
                drop(task);
                was_running
            }
            None => false,
        }
    }

    /// Snapshot of the current job state.
    pub fn state(&self) -> JobState {
        self.shared.lock().tracker.state().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.shared.lock().state_tx.subscribe()
    }

    /// Owned watcher over this controller's state, usable while the controller is mutated.
    pub fn watch(&self) -> JobWatch {
        JobWatch {
            state_rx: self.subscribe(),
        }
    }

    /// Wait for the current job to reach a terminal state.
    pub async fn wait(&self) -> Result<serde_json::Value, JobError> {
        self.watch().wait().await
    }
}

impl<B> Drop for JobController<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owned receiver of [`JobState`] updates.
#[derive(Debug, Clone)]
pub struct JobWatch {
    state_rx: watch::Receiver<JobState>,
}

impl JobWatch {
    pub fn current(&self) -> JobState {
        self.state_rx.borrow().clone()
    }

    /// Next published state, or `None` once the controller is gone.
    pub async fn next(&mut self) -> Option<JobState> {
        self.state_rx.changed().await.ok()?;
        Some(self.state_rx.borrow_and_update().clone())
    }

    /// Resolve with the result of the job, or the reason it ended without one.
    pub async fn wait(mut self) -> Result<serde_json::Value, JobError> {
        loop {
            let outcome = match &*self.state_rx.borrow_and_update() {
                JobState::Completed { result, .. } => Some(Ok(result.clone())),
                JobState::Failed { reason, .. } => Some(Err(JobError::from(reason.clone()))),
                JobState::Idle => Some(Err(JobError::Stopped)),
                JobState::Polling { .. } => None,
            };

            if let Some(outcome) = outcome {
                return outcome;
            }

            self.state_rx
                .changed()
                .await
                .map_err(|_| JobError::Stopped)?;
        }
    }
}

struct PollLoop<B> {
    backend: Arc<B>,
    shared: Arc<Mutex<Shared>>,
    job_id: JobId,
    symbol: SmolStr,
    generation: Generation,
    poll_interval: Duration,
    refresh_interval: Duration,
    shutdown_rx: oneshot::Receiver<()>,
}

/// Poll-then-wait loop for one job generation.
///
/// Polls are serialised: the next poll tick is only taken once the in-flight poll has
/// resolved. Shutdown, the deadline and the elapsed ticker race every in-flight poll.
async fn run_poll_loop<B: JobBackend>(poll: PollLoop<B>) {
    let PollLoop {
        backend,
        shared,
        job_id,
        symbol,
        generation,
        poll_interval,
        refresh_interval,
        mut shutdown_rx,
    } = poll;

    let Some(deadline) = shared.lock().tracker.deadline() else {
        return;
    };
    let deadline = sleep_until(deadline);
    tokio::pin!(deadline);

    let poll_interval = poll_interval.max(MIN_TIMER_PERIOD);
    let refresh_interval = refresh_interval.max(MIN_TIMER_PERIOD);

    let mut poll_timer = interval(poll_interval);
    poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut elapsed_timer = interval_at(Instant::now() + refresh_interval, refresh_interval);
    elapsed_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut polls: u64 = 0;

    'poll: loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => {
                debug!(%job_id, polls, "poller shut down");
                break;
            }

            _ = &mut deadline => {
                expire(&shared, generation);
                break;
            }

            _ = poll_timer.tick() => {
                polls += 1;

                let mut status = backend.status(&job_id, &symbol);
                let response = loop {
                    tokio::select! {
                        biased;

                        _ = &mut shutdown_rx => {
                            debug!(%job_id, polls, "poller shut down with a poll in flight");
                            break 'poll;
                        }

                        _ = &mut deadline => {
                            expire(&shared, generation);
                            break 'poll;
                        }

                        response = &mut status => break response,

                        _ = elapsed_timer.tick() => {
                            if !refresh(&shared, generation) {
                                break 'poll;
                            }
                        }
                    }
                };

                match response {
                    Ok(response) => {
                        let mut shared = shared.lock();
                        let transition = shared.tracker.apply(generation, &response, Instant::now());
                        if transition == Transition::Stale {
                            break;
                        }
                        shared.publish();

                        debug!(%job_id, polls, status = %response.status, ?transition, "status poll");
                        if transition.is_terminal() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(%job_id, polls, %error, "status poll failed, retrying on next tick");
                    }
                }
            }

            _ = elapsed_timer.tick() => {
                if !refresh(&shared, generation) {
                    break;
                }
            }
        }
    }
}

/// Advance the elapsed time and fallback progress. Returns false once `generation` is no
/// longer the live poll.
fn refresh(shared: &Mutex<Shared>, generation: Generation) -> bool {
    let mut shared = shared.lock();
    if shared.tracker.generation() != generation || !shared.tracker.state().is_polling() {
        return false;
    }
    shared.tracker.refresh(Instant::now());
    shared.publish();
    true
}

fn expire(shared: &Mutex<Shared>, generation: Generation) {
    let mut shared = shared.lock();
    if shared.tracker.generation() != generation {
        return;
    }
    shared.tracker.expire(Instant::now());
    shared.publish();
}
