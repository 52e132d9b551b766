use crate::status::JobStatus;
use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use serde::{Deserialize, Deserializer, Serialize};
use smol_str::SmolStr;
use std::time::Duration;
use tokio::time::Instant;

/// Opaque identifier assigned by the backend on submission.
///
/// Backends hand these out as either JSON strings or numbers, both deserialise.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, From, Serialize)]
pub struct JobId(pub SmolStr);

impl JobId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self(SmolStr::new(value.to_string()))
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawJobId {
            Text(SmolStr),
            Number(serde_json::Number),
        }

        match RawJobId::deserialize(deserializer)? {
            RawJobId::Text(id) if id.trim().is_empty() => {
                Err(serde::de::Error::custom("empty job id"))
            }
            RawJobId::Text(id) => Ok(Self(id)),
            RawJobId::Number(id) => Ok(Self(SmolStr::new(id.to_string()))),
        }
    }
}

/// Why a job ended without a result.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Deserialize, Serialize)]
pub enum FailureReason {
    /// Backend explicitly reported the job failed.
    Backend {
        status: JobStatus,
        message: Option<String>,
    },
    Cancelled {
        message: Option<String>,
    },
    Expired {
        message: Option<String>,
    },
    /// Client side ceiling exceeded with no terminal backend response.
    Timeout { elapsed: Duration },
}

impl FailureReason {
    /// Build the reason for a backend reported failure status.
    pub fn from_status(status: JobStatus, message: Option<String>) -> Self {
        match status {
            JobStatus::Cancelled => Self::Cancelled { message },
            JobStatus::Expired => Self::Expired { message },
            status => Self::Backend { status, message },
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Single human-readable message shown next to the retry affordance.
    pub fn user_message(&self) -> String {
        match self {
            Self::Backend {
                message: Some(message),
                ..
            } => format!("Analysis failed: {message}"),
            Self::Backend { message: None, .. } => "Analysis failed".to_string(),
            Self::Cancelled { message } => match message {
                Some(message) => format!("The analysis job was cancelled by the backend: {message}"),
                None => "The analysis job was cancelled by the backend".to_string(),
            },
            Self::Expired { message } => match message {
                Some(message) => format!("The analysis job expired before completion: {message}"),
                None => "The analysis job expired before completion".to_string(),
            },
            Self::Timeout { elapsed } => format!(
                "The analysis did not finish within {} minutes",
                elapsed.as_secs() / 60
            ),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

/// State of one analysis job as seen by the owning view.
///
/// A job holds at most one of `result` and `reason`, and only once terminal.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum JobState {
    #[default]
    Idle,
    Polling {
        job_id: JobId,
        status: JobStatus,
        progress: u8,
        /// Wall-clock submission time, for display only.
        submitted_at: DateTime<Utc>,
        /// Monotonic submission time, drives elapsed time and the timeout ceiling.
        started_at: Instant,
        estimated_time_remaining: Option<Duration>,
    },
    Completed {
        job_id: Option<JobId>,
        result: serde_json::Value,
    },
    Failed {
        job_id: Option<JobId>,
        reason: FailureReason,
    },
}

impl JobState {
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            JobState::Idle => None,
            JobState::Polling { job_id, .. } => Some(job_id),
            JobState::Completed { job_id, .. } | JobState::Failed { job_id, .. } => {
                job_id.as_ref()
            }
        }
    }

    /// Displayed progress. Only a completed job reports 100.
    pub fn progress_percent(&self) -> u8 {
        match self {
            JobState::Idle | JobState::Failed { .. } => 0,
            JobState::Polling { progress, .. } => (*progress).min(100),
            JobState::Completed { .. } => 100,
        }
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        match self {
            JobState::Completed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FailureReason> {
        match self {
            JobState::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Time since submission, while polling.
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        match self {
            JobState::Polling { started_at, .. } => Some(now.saturating_duration_since(*started_at)),
            _ => None,
        }
    }

    pub fn is_polling(&self) -> bool {
        matches!(self, JobState::Polling { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_de_job_id() {
        struct TestCase {
            input: serde_json::Value,
            expected: Option<JobId>,
        }

        let tests = vec![
            TestCase {
                // TC0: numeric id
                input: json!(42),
                expected: Some(JobId::new("42")),
            },
            TestCase {
                // TC1: string id
                input: json!("job_7f3a"),
                expected: Some(JobId::new("job_7f3a")),
            },
            TestCase {
                // TC2: empty string is not an id
                input: json!(""),
                expected: None,
            },
            TestCase {
                // TC3: objects are rejected
                input: json!({"id": 1}),
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = serde_json::from_value::<JobId>(test.input).ok();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_failure_reason_from_status() {
        assert_eq!(
            FailureReason::from_status(JobStatus::Cancelled, None),
            FailureReason::Cancelled { message: None }
        );
        assert_eq!(
            FailureReason::from_status(JobStatus::Expired, Some("ttl".to_string())),
            FailureReason::Expired {
                message: Some("ttl".to_string())
            }
        );
        assert_eq!(
            FailureReason::from_status(JobStatus::Failed, None),
            FailureReason::Backend {
                status: JobStatus::Failed,
                message: None
            }
        );
    }

    #[test]
    fn test_failure_messages_are_distinct() {
        let messages = [
            FailureReason::Backend {
                status: JobStatus::Failed,
                message: None,
            },
            FailureReason::Cancelled { message: None },
            FailureReason::Expired { message: None },
            FailureReason::Timeout {
                elapsed: Duration::from_secs(15 * 60),
            },
        ]
        .map(|reason| reason.user_message());

        assert_eq!(messages[3], "The analysis did not finish within 15 minutes");
        for (i, a) in messages.iter().enumerate() {
            for b in messages.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_job_state_accessors() {
        let idle = JobState::Idle;
        assert_eq!(idle.job_id(), None);
        assert_eq!(idle.progress_percent(), 0);
        assert!(!idle.is_terminal());

        let started_at = Instant::now();
        let polling = JobState::Polling {
            job_id: JobId::from(42u64),
            status: JobStatus::Processing,
            progress: 35,
            submitted_at: Utc::now(),
            started_at,
            estimated_time_remaining: None,
        };
        assert_eq!(polling.job_id(), Some(&JobId::new("42")));
        assert_eq!(polling.progress_percent(), 35);
        assert_eq!(
            polling.elapsed(started_at + Duration::from_secs(90)),
            Some(Duration::from_secs(90))
        );
        assert!(polling.result().is_none() && polling.error().is_none());

        let completed = JobState::Completed {
            job_id: None,
            result: json!({"summary": "..."}),
        };
        assert_eq!(completed.progress_percent(), 100);
        assert_eq!(completed.result(), Some(&json!({"summary": "..."})));
        assert!(completed.error().is_none());
        assert!(completed.is_terminal());
    }
}
