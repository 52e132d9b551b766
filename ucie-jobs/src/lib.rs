//! # UCIE Jobs
//! Client side controller for the long running AI analysis jobs of the UCIE backend: GPT
//! market summaries and Caesar deep research.
//!
//! A job is submitted once, then polled on a fixed interval until the backend reports a
//! terminal status or a client side ceiling passes:
//! * **Normalised**: both services' status vocabularies map onto one [`JobStatus`] enumeration.
//! * **Safe**: every exit path (completion, failure, timeout, stop, retry, drop) releases the
//!   poll timer, and responses arriving after the job moved on are discarded.
//! * **Honest progress**: backend progress wins when reported, otherwise a logarithmic estimate
//!   is shown that never claims completion.
//!
//! ## Example
//! ```rust,no_run
//! use ucie_jobs::{
//!     client::{ClientConfig, HttpJobClient, SubmitRequest},
//!     controller::JobController,
//!     kind::JobKind,
//! };
//!
//! # async fn run() -> Result<(), ucie_jobs::error::JobError> {
//! let kind = JobKind::caesar_research();
//! let client = HttpJobClient::new(ClientConfig::new("http://127.0.0.1:3000"), kind.clone())?;
//!
//! let mut controller = JobController::new(client, kind);
//! controller.submit(SubmitRequest::new("BTC")).await?;
//!
//! let research = controller.wait().await?;
//! println!("{research:#}");
//! # Ok(())
//! # }
//! ```

/// Job submission and status transport, including the [`JobBackend`](client::JobBackend) seam.
pub mod client;

/// Async polling controller that owns one job and its timers.
pub mod controller;

/// All [`Error`](std::error::Error)s generated in UCIE Jobs.
pub mod error;

/// Job identifiers, [`JobState`](job::JobState) and failure reasons.
pub mod job;

/// Routes, vocabularies and timings per job kind.
pub mod kind;

/// Fallback progress estimation.
pub mod progress;

/// Status vocabulary normalisation.
pub mod status;

/// Synchronous job state machine.
pub mod tracker;

pub use controller::{JobController, JobWatch, PollerConfig};
pub use error::JobError;
pub use job::{FailureReason, JobId, JobState};
pub use kind::JobKind;
pub use status::{JobStatus, Phase, StatusMap};
