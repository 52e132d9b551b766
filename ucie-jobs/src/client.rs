//! Transport for job submission and status polling.
//!
//! [`JobBackend`] is the seam the controller polls through, [`HttpJobClient`] implements it over
//! the UCIE JSON/HTTP contract:
//!
//! - `POST {submit_prefix}/{symbol}` → [`SubmitResponse`]
//! - `GET {status_prefix}/{jobId}` or `GET {status_prefix}/{symbol}?jobId={jobId}` → [`StatusResponse`]
//!
//! Routes are appended to the base URL path, so a backend mounted under a prefix such as
//! `https://host/ucie/` keeps it. Symbols and job ids are percent-encoded as single segments.

use crate::{error::JobError, job::JobId, kind::JobKind, status::Phase};
use async_trait::async_trait;
use reqwest::{Client, Response, header};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use smol_str::SmolStr;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Context payload for a new analysis job.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// Symbol being analysed, eg/ "BTC".
    pub symbol: SmolStr,
    /// Previously collected data, forwarded so the backend can skip re-fetching it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl SubmitRequest {
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self {
            symbol: SmolStr::new(symbol.as_ref().trim().to_ascii_uppercase()),
            context: None,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(default, deserialize_with = "de_opt_job_id")]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub progress: Option<f64>,
    /// Seconds until the backend expects the job to finish.
    #[serde(default)]
    pub estimated_time_remaining: Option<f64>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusResponse {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            success: true,
            status: status.into(),
            progress: None,
            estimated_time_remaining: None,
            data: None,
            error: None,
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Result payload, if one is attached. JSON `null` counts as absent.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.data.as_ref().filter(|data| !data.is_null())
    }

    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        self.estimated_time_remaining
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

fn default_true() -> bool {
    true
}

fn de_opt_job_id<'de, D>(deserializer: D) -> Result<Option<JobId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// Job accepted, poll for the result.
    Accepted(JobId),
    /// Backend served a cached or synchronous answer.
    Immediate(serde_json::Value),
}

impl TryFrom<SubmitResponse> for SubmissionOutcome {
    type Error = JobError;

    fn try_from(response: SubmitResponse) -> Result<Self, Self::Error> {
        if !response.success {
            return Err(JobError::Submission(
                response
                    .error
                    .unwrap_or_else(|| "backend rejected the job".to_string()),
            ));
        }

        match (response.data, response.job_id) {
            (Some(data), _) if !data.is_null() => Ok(Self::Immediate(data)),
            (_, Some(job_id)) => Ok(Self::Accepted(job_id)),
            _ => Err(JobError::Submission(
                "response carried neither a jobId nor data".to_string(),
            )),
        }
    }
}

/// Backend that accepts analysis jobs and reports their status.
#[async_trait]
pub trait JobBackend: Send + Sync + 'static {
    /// Submit a new job. Issues exactly one request and never retries.
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmissionOutcome, JobError>;

    /// Fetch the current status of an outstanding job.
    async fn status(&self, job_id: &JobId, symbol: &str) -> Result<StatusResponse, JobError>;
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the UCIE backend
    pub base_url: String,
    /// Session cookie attached to every request, eg/ "session=abc"
    pub session_cookie: Option<String>,
    /// Per request timeout
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            session_cookie: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with custom base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set session cookie
    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    /// Set request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// [`JobBackend`] over the UCIE JSON/HTTP contract.
#[derive(Debug, Clone)]
pub struct HttpJobClient {
    http: Client,
    base_url: Url,
    session_cookie: Option<String>,
    kind: JobKind,
}

impl HttpJobClient {
    pub fn new(config: ClientConfig, kind: JobKind) -> Result<Self, JobError> {
        let base_url = Url::parse(&config.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(JobError::InvalidUrl(config.base_url));
        }

        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| JobError::Submission(format!("failed to build http client: {error}")))?;

        Ok(Self {
            http,
            base_url,
            session_cookie: config.session_cookie,
            kind,
        })
    }

    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    /// Append `segments` to the base URL path, percent-encoding each one.
    fn url<I>(&self, segments: I) -> Result<Url, JobError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| JobError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn with_session(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session_cookie {
            Some(cookie) => request.header(header::COOKIE, cookie),
            None => request,
        }
    }
}

/// Decode a JSON body, mapping non-2xx and undecodable bodies to a message.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, String> {
    if let Err(status_err) = response.error_for_status_ref() {
        return Err(status_err.to_string());
    }

    response
        .json::<T>()
        .await
        .map_err(|parse_err| format!("invalid response body: {parse_err}"))
}

#[async_trait]
impl JobBackend for HttpJobClient {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmissionOutcome, JobError> {
        let url = self.url(self.kind.submit_segments(&request.symbol))?;
        debug!(kind = %self.kind.name, %url, symbol = %request.symbol, "submitting job");

        let response = self
            .with_session(self.http.post(url).json(request))
            .send()
            .await
            .map_err(|request_err| JobError::Submission(request_err.to_string()))?;

        let body = decode::<SubmitResponse>(response)
            .await
            .map_err(JobError::Submission)?;

        SubmissionOutcome::try_from(body)
    }

    async fn status(&self, job_id: &JobId, symbol: &str) -> Result<StatusResponse, JobError> {
        let (segments, query) = self.kind.status_route.resolve(job_id, symbol);
        let mut url = self.url(segments)?;
        if let Some(job_id) = query {
            url.query_pairs_mut().append_pair("jobId", &job_id);
        }

        let response = self
            .with_session(self.http.get(url))
            .send()
            .await
            .map_err(|request_err| JobError::PollTransient(request_err.to_string()))?;

        let body = decode::<StatusResponse>(response)
            .await
            .map_err(JobError::PollTransient)?;

        // A failed job may be reported with success: false, which still ends the job
        let reports_failure = matches!(
            self.kind.status_map.normalize(&body.status).map(|status| status.phase()),
            Some(Phase::Failed)
        );

        if !body.success && !reports_failure {
            return Err(JobError::PollTransient(
                body.error
                    .unwrap_or_else(|| "status check reported success: false".to_string()),
            ));
        }

        Ok(body)
    }
}
