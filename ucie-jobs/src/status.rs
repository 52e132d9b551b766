//! Status vocabulary normalisation.
//!
//! The GPT summary service and the Caesar research service report job status with different
//! vocabularies. Both are mapped onto one [`JobStatus`] enumeration through a [`StatusMap`], and
//! every [`JobStatus`] belongs to exactly one [`Phase`].

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Normalised status of an outstanding analysis job.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Pending,
    Researching,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

/// Lifecycle phase shared by every job kind.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize, Serialize)]
pub enum Phase {
    NotStarted,
    InProgress,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn phase(&self) -> Phase {
        match self {
            JobStatus::Queued | JobStatus::Pending => Phase::NotStarted,
            JobStatus::Researching | JobStatus::Processing => Phase::InProgress,
            JobStatus::Completed => Phase::Succeeded,
            JobStatus::Failed | JobStatus::Cancelled | JobStatus::Expired => Phase::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase(), Phase::Succeeded | Phase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Pending => "pending",
            JobStatus::Researching => "researching",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mapping table from a backend's raw status strings to [`JobStatus`].
///
/// Lookups are case-insensitive. Raw values missing from the table normalise to `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusMap {
    entries: FnvHashMap<SmolStr, JobStatus>,
}

impl StatusMap {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, JobStatus)>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(raw, status)| (SmolStr::new(raw.as_ref().to_ascii_lowercase()), status))
                .collect(),
        }
    }

    /// Vocabulary of the GPT summary service.
    pub fn gpt() -> Self {
        Self::new([
            ("queued", JobStatus::Queued),
            ("processing", JobStatus::Processing),
            ("completed", JobStatus::Completed),
            ("error", JobStatus::Failed),
        ])
    }

    /// Vocabulary of the Caesar research service.
    pub fn caesar() -> Self {
        Self::new([
            ("queued", JobStatus::Queued),
            ("pending", JobStatus::Pending),
            ("researching", JobStatus::Researching),
            ("completed", JobStatus::Completed),
            ("failed", JobStatus::Failed),
            ("cancelled", JobStatus::Cancelled),
            ("expired", JobStatus::Expired),
        ])
    }

    pub fn normalize(&self, raw: &str) -> Option<JobStatus> {
        let raw = raw.trim();
        self.entries
            .get(raw)
            .or_else(|| self.entries.get(raw.to_ascii_lowercase().as_str()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
