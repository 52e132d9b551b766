//! Synchronous job state machine.
//!
//! ```text
//! Idle --submit(jobId)--> Polling --success + payload--> Completed
//!   |                        |----failure status-------> Failed
//!   |                        '----elapsed > ceiling----> Failed (timeout)
//!   '--submit(data)--------------------------------------> Completed
//! ```
//!
//! Every poll is tagged with the [`Generation`] it was issued under. [`JobTracker::reset`] bumps
//! the generation, so a response that was in flight while the job was stopped, retried or timed
//! out is discarded instead of applied.

use crate::{
    client::{StatusResponse, SubmissionOutcome},
    job::{FailureReason, JobState},
    kind::JobKind,
    progress::ProgressEstimator,
    status::{JobStatus, Phase, StatusMap},
};
use chrono::Utc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Monotonic counter identifying one submission of a job.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Generation(pub u64);

/// Outcome of applying a status response to the tracker.
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    /// Still polling, with the progress to display.
    Progress(u8),
    Completed,
    Failed(FailureReason),
    /// Response belonged to an older generation, or the job is no longer polling.
    Stale,
}

impl Transition {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Transition::Completed | Transition::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct JobTracker {
    state: JobState,
    generation: Generation,
    status_map: StatusMap,
    estimator: ProgressEstimator,
    timeout: Duration,
    backend_progress: bool,
}

impl JobTracker {
    pub fn new(status_map: StatusMap, estimator: ProgressEstimator, timeout: Duration) -> Self {
        Self {
            state: JobState::Idle,
            generation: Generation::default(),
            status_map,
            estimator,
            timeout,
            backend_progress: false,
        }
    }

    pub fn for_kind(kind: &JobKind) -> Self {
        Self::new(
            kind.status_map.clone(),
            ProgressEstimator::new(kind.expected_duration),
            kind.timeout,
        )
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Absolute deadline of the job being polled.
    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            JobState::Polling { started_at, .. } => Some(*started_at + self.timeout),
            _ => None,
        }
    }

    /// Leave `Idle` after a successful submission.
    ///
    /// Any previous job is discarded first. Returns the generation subsequent polls must carry.
    pub fn begin(&mut self, outcome: SubmissionOutcome, now: Instant) -> Generation {
        self.reset();

        self.state = match outcome {
            SubmissionOutcome::Accepted(job_id) => {
                debug!(%job_id, generation = self.generation.0, "job accepted, polling");
                JobState::Polling {
                    job_id,
                    status: JobStatus::Queued,
                    progress: 0,
                    submitted_at: Utc::now(),
                    started_at: now,
                    estimated_time_remaining: None,
                }
            }
            SubmissionOutcome::Immediate(result) => {
                debug!(generation = self.generation.0, "job resolved on submission");
                JobState::Completed {
                    job_id: None,
                    result,
                }
            }
        };

        self.generation
    }

    /// Apply one status poll response received at `now`.
    pub fn apply(
        &mut self,
        generation: Generation,
        response: &StatusResponse,
        now: Instant,
    ) -> Transition {
        if generation != self.generation || !self.state.is_polling() {
            debug!(
                ?generation,
                current = ?self.generation,
                "discarding stale status response"
            );
            return Transition::Stale;
        }

        if let Some(transition) = self.check_timeout(now) {
            return transition;
        }

        let Some(status) = self.status_map.normalize(&response.status) else {
            warn!(
                raw_status = %response.status,
                "unrecognised job status, continuing to poll"
            );
            return Transition::Progress(self.refresh(now));
        };

        match status.phase() {
            Phase::Succeeded => match response.payload() {
                Some(result) => self.complete(result.clone()),
                None => {
                    debug!("job reported completed without a payload, continuing to poll");
                    self.update_polling(status, None, None, now)
                }
            },
            Phase::Failed => {
                self.fail(FailureReason::from_status(status, response.error.clone()))
            }
            Phase::NotStarted | Phase::InProgress => self.update_polling(
                status,
                response.progress,
                response.estimated_time_remaining(),
                now,
            ),
        }
    }

    /// Advance fallback progress between polls. Returns the displayed progress.
    pub fn refresh(&mut self, now: Instant) -> u8 {
        let estimator = self.estimator;
        let backend_progress = self.backend_progress;

        match &mut self.state {
            JobState::Polling {
                progress,
                started_at,
                ..
            } => {
                if !backend_progress {
                    let elapsed = now.saturating_duration_since(*started_at);
                    *progress = estimator.resolve(None, elapsed, *progress);
                }
                *progress
            }
            state => state.progress_percent(),
        }
    }

    /// Fail the job if its ceiling has passed.
    pub fn check_timeout(&mut self, now: Instant) -> Option<Transition> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        Some(self.expire(now))
    }

    /// Fail the job as timed out, regardless of the backend.
    pub fn expire(&mut self, now: Instant) -> Transition {
        let JobState::Polling {
            job_id, started_at, ..
        } = &self.state
        else {
            return Transition::Stale;
        };

        let elapsed = now.saturating_duration_since(*started_at);
        warn!(
            %job_id,
            elapsed_secs = elapsed.as_secs(),
            timeout_secs = self.timeout.as_secs(),
            "job timed out without a terminal status from the backend"
        );

        let reason = FailureReason::Timeout { elapsed };
        self.state = JobState::Failed {
            job_id: Some(job_id.clone()),
            reason: reason.clone(),
        };
        Transition::Failed(reason)
    }

    /// Return to `Idle`, invalidating in-flight polls.
    ///
    /// Returns `true` if a polling job was cancelled.
    pub fn reset(&mut self) -> bool {
        let cancelled = self.state.is_polling();
        if cancelled || self.state != JobState::Idle {
            self.generation = Generation(self.generation.0 + 1);
        }
        self.state = JobState::Idle;
        self.backend_progress = false;
        cancelled
    }

    fn update_polling(
        &mut self,
        new_status: JobStatus,
        backend: Option<f64>,
        remaining: Option<Duration>,
        now: Instant,
    ) -> Transition {
        let estimator = self.estimator;
        let has_backend_progress = backend.is_some_and(|progress| progress > 0.0);

        let JobState::Polling {
            status,
            progress,
            started_at,
            estimated_time_remaining,
            ..
        } = &mut self.state
        else {
            return Transition::Stale;
        };

        let elapsed = now.saturating_duration_since(*started_at);
        *status = new_status;
        *progress = estimator.resolve(backend, elapsed, *progress);
        if remaining.is_some() {
            *estimated_time_remaining = remaining;
        }

        self.backend_progress = has_backend_progress;
        Transition::Progress(*progress)
    }

    fn complete(&mut self, result: serde_json::Value) -> Transition {
        let job_id = self.state.job_id().cloned();
        debug!(?job_id, "job completed");
        self.state = JobState::Completed { job_id, result };
        self.backend_progress = false;
        Transition::Completed
    }

    fn fail(&mut self, reason: FailureReason) -> Transition {
        let job_id = self.state.job_id().cloned();
        error!(?job_id, %reason, "job failed: backend reported a failure status");
        self.state = JobState::Failed {
            job_id,
            reason: reason.clone(),
        };
        self.backend_progress = false;
        Transition::Failed(reason)
    }
}
