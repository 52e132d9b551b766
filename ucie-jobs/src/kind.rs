//! Per job-kind routes, vocabularies and timings.

use crate::{job::JobId, progress::DEFAULT_EXPECTED_DURATION, status::StatusMap};
use smol_str::SmolStr;
use std::time::Duration;

/// Default interval between status polls (60 seconds).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default client side ceiling after which a job is failed as timed out (15 minutes).
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Shape of the status endpoint for a job kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusRoute {
    /// `GET {prefix}/{jobId}`
    Path { prefix: SmolStr },
    /// `GET {prefix}/{symbol}?jobId={jobId}`
    Query { prefix: SmolStr },
}

impl StatusRoute {
    /// Path segments and optional `jobId` query value for a status poll.
    ///
    /// The trailing segment is the raw job id or symbol, left for the transport to
    /// percent-encode.
    pub fn resolve(&self, job_id: &JobId, symbol: &str) -> (Vec<String>, Option<String>) {
        match self {
            StatusRoute::Path { prefix } => (segments(prefix, job_id.as_str()), None),
            StatusRoute::Query { prefix } => {
                (segments(prefix, symbol), Some(job_id.to_string()))
            }
        }
    }
}

fn segments(prefix: &str, last: &str) -> Vec<String> {
    prefix
        .split('/')
        .filter(|segment| !segment.is_empty())
        .chain(std::iter::once(last))
        .map(str::to_string)
        .collect()
}

/// Everything that differs between the long running analysis services.
#[derive(Debug, Clone, PartialEq)]
pub struct JobKind {
    pub name: SmolStr,
    /// Submission path prefix, the symbol is appended: `POST {submit_prefix}/{symbol}`.
    pub submit_prefix: SmolStr,
    pub status_route: StatusRoute,
    pub status_map: StatusMap,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub expected_duration: Duration,
}

impl JobKind {
    /// GPT market summary jobs.
    pub fn gpt_summary() -> Self {
        Self {
            name: SmolStr::new_static("gpt-summary"),
            submit_prefix: SmolStr::new_static("/api/ucie/openai-summary-start"),
            status_route: StatusRoute::Path {
                prefix: SmolStr::new_static("/api/ucie/openai-summary-poll"),
            },
            status_map: StatusMap::gpt(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_JOB_TIMEOUT,
            expected_duration: DEFAULT_EXPECTED_DURATION,
        }
    }

    /// Caesar deep research jobs.
    pub fn caesar_research() -> Self {
        Self {
            name: SmolStr::new_static("caesar-research"),
            submit_prefix: SmolStr::new_static("/api/ucie/research/start"),
            status_route: StatusRoute::Query {
                prefix: SmolStr::new_static("/api/ucie/research"),
            },
            status_map: StatusMap::caesar(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_JOB_TIMEOUT,
            expected_duration: DEFAULT_EXPECTED_DURATION,
        }
    }

    /// Resolve a kind by the short names accepted on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "gpt" | "gpt-summary" | "summary" => Some(Self::gpt_summary()),
            "caesar" | "caesar-research" | "research" => Some(Self::caesar_research()),
            _ => None,
        }
    }

    /// Path segments of the submission endpoint for `symbol`.
    pub fn submit_segments(&self, symbol: &str) -> Vec<String> {
        segments(&self.submit_prefix, symbol)
    }

    pub fn with_submit_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.submit_prefix = SmolStr::new(prefix);
        self
    }

    pub fn with_status_route(mut self, route: StatusRoute) -> Self {
        self.status_route = route;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_expected_duration(mut self, duration: Duration) -> Self {
        self.expected_duration = duration;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let gpt = JobKind::gpt_summary();
        assert_eq!(gpt.poll_interval, Duration::from_secs(60));
        assert_eq!(gpt.timeout, Duration::from_secs(900));
        assert_eq!(gpt.expected_duration, Duration::from_secs(600));
        assert_eq!(gpt.status_map, StatusMap::gpt());

        let caesar = JobKind::caesar_research();
        assert_eq!(caesar.status_map, StatusMap::caesar());
        assert_eq!(
            caesar.submit_segments("BTC"),
            ["api", "ucie", "research", "start", "BTC"]
        );
    }

    #[test]
    fn test_from_name() {
        assert_eq!(JobKind::from_name("GPT").map(|kind| kind.name), Some("gpt-summary".into()));
        assert_eq!(
            JobKind::from_name("research").map(|kind| kind.name),
            Some("caesar-research".into())
        );
        assert_eq!(JobKind::from_name("veritas"), None);
    }

    #[test]
    fn test_status_route_resolve() {
        let job_id = JobId::new("42");

        let path = StatusRoute::Path {
            prefix: "/api/ucie/openai-summary-poll/".into(),
        };
        let (segments, query) = path.resolve(&job_id, "BTC");
        assert_eq!(segments, ["api", "ucie", "openai-summary-poll", "42"]);
        assert_eq!(query, None);

        let query = StatusRoute::Query {
            prefix: "/api/ucie/research".into(),
        };
        let (segments, query) = query.resolve(&job_id, "BTC/USD");
        assert_eq!(segments, ["api", "ucie", "research", "BTC/USD"]);
        assert_eq!(query, Some("42".to_string()));
    }

    #[test]
    fn test_builder() {
        let kind = JobKind::caesar_research()
            .with_poll_interval(Duration::from_secs(5))
            .with_timeout(Duration::from_secs(120))
            .with_expected_duration(Duration::from_secs(60));

        assert_eq!(kind.poll_interval, Duration::from_secs(5));
        assert_eq!(kind.timeout, Duration::from_secs(120));
        assert_eq!(kind.expected_duration, Duration::from_secs(60));
    }
}
