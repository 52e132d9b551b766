use crate::job::FailureReason;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `ucie-jobs`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum JobError {
    #[error("job submission failed: {0}")]
    Submission(String),

    #[error("status poll failed: {0}")]
    PollTransient(String),

    #[error("job failed: {0}")]
    JobFailure(FailureReason),

    #[error("job timed out after {elapsed_secs}s without a terminal status")]
    JobTimeout { elapsed_secs: u64 },

    #[error("invalid base url: {0}")]
    InvalidUrl(String),

    #[error("no job has been submitted")]
    NothingToRetry,

    #[error("job was stopped before reaching a terminal state")]
    Stopped,
}

impl JobError {
    /// Determine if an error ends the job it was raised for.
    ///
    /// A [`JobError::PollTransient`] is swallowed by the poller and the next tick retries
    /// implicitly, every other kind is surfaced to the user with a retry affordance.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_terminal(&self) -> bool {
        match self {
            JobError::PollTransient(_) => false,
            _ => true,
        }
    }
}

impl From<FailureReason> for JobError {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::Timeout { elapsed } => Self::JobTimeout {
                elapsed_secs: elapsed.as_secs(),
            },
            other => Self::JobFailure(other),
        }
    }
}

impl From<url::ParseError> for JobError {
    fn from(value: url::ParseError) -> Self {
        Self::InvalidUrl(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_job_error_is_terminal() {
        struct TestCase {
            input: JobError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: transient poll errors never end a job
                input: JobError::PollTransient("connection reset".to_string()),
                expected: false,
            },
            TestCase {
                // TC1: submission errors are surfaced immediately
                input: JobError::Submission("HTTP 401 Unauthorized".to_string()),
                expected: true,
            },
            TestCase {
                // TC2: backend reported failure
                input: JobError::JobFailure(FailureReason::Cancelled { message: None }),
                expected: true,
            },
            TestCase {
                // TC3: client side ceiling
                input: JobError::JobTimeout { elapsed_secs: 900 },
                expected: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_terminal();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_timeout_reason_maps_to_job_timeout() {
        let error = JobError::from(FailureReason::Timeout {
            elapsed: Duration::from_secs(901),
        });
        assert_eq!(error, JobError::JobTimeout { elapsed_secs: 901 });

        let error = JobError::from(FailureReason::Expired { message: None });
        assert!(matches!(error, JobError::JobFailure(FailureReason::Expired { .. })));
    }
}
