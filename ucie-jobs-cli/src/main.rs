use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use ucie_jobs::{
    JobController, JobError, JobKind, JobState,
    client::{ClientConfig, HttpJobClient, SubmitRequest},
};

#[tokio::main]
async fn main() {
    // Initialize logging
    init_logging();

    let Some(symbol) = std::env::args().nth(1) else {
        eprintln!("usage: ucie-jobs <SYMBOL>");
        std::process::exit(2);
    };

    if let Err(error) = run(symbol).await {
        error!(%error, "analysis job did not produce a result");
        std::process::exit(1);
    }
}

async fn run(symbol: String) -> Result<(), JobError> {
    // Job kind configurable via UCIE_JOB_KIND env var (default: caesar)
    let kind_name = std::env::var("UCIE_JOB_KIND").unwrap_or_else(|_| "caesar".to_string());
    let mut kind = JobKind::from_name(&kind_name).unwrap_or_else(|| {
        warn!("Unknown UCIE_JOB_KIND {}, using caesar research", kind_name);
        JobKind::caesar_research()
    });

    if let Some(secs) = env_secs("UCIE_POLL_INTERVAL_SECS") {
        kind = kind.with_poll_interval(Duration::from_secs(secs));
    }
    if let Some(secs) = env_secs("UCIE_JOB_TIMEOUT_SECS") {
        kind = kind.with_timeout(Duration::from_secs(secs));
    }

    // Backend configurable via UCIE_BASE_URL env var (default: http://127.0.0.1:3000)
    let base_url =
        std::env::var("UCIE_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());
    let mut config = ClientConfig::new(base_url);
    if let Ok(cookie) = std::env::var("UCIE_SESSION_COOKIE") {
        config = config.with_session_cookie(cookie);
    }

    let mut request = SubmitRequest::new(&symbol);
    if let Ok(context) = std::env::var("UCIE_CONTEXT") {
        match serde_json::from_str(&context) {
            Ok(context) => request = request.with_context(context),
            Err(parse_err) => warn!("Ignoring UCIE_CONTEXT, not valid JSON: {}", parse_err),
        }
    }

    info!(
        "Starting {} job for {} (poll every {:?}, give up after {:?})",
        kind.name, request.symbol, kind.poll_interval, kind.timeout
    );

    let client = HttpJobClient::new(config, kind.clone())?;
    let mut controller = JobController::new(client, kind);
    controller.submit(request).await?;

    let mut watch = controller.watch();
    let mut last_progress = None;

    let outcome = loop {
        let state = watch.current();
        match &state {
            JobState::Polling {
                job_id,
                status,
                progress,
                started_at,
                estimated_time_remaining,
                ..
            } => {
                if last_progress != Some(*progress) {
                    last_progress = Some(*progress);
                    info!(
                        "job {} {} {:>3}% elapsed {}s{}",
                        job_id,
                        status,
                        progress,
                        Instant::now().duration_since(*started_at).as_secs(),
                        estimated_time_remaining
                            .map(|eta| format!(" eta {}s", eta.as_secs()))
                            .unwrap_or_default()
                    );
                }
            }
            JobState::Completed { result, .. } => break Ok(result.clone()),
            JobState::Failed { reason, .. } => break Err(JobError::from(reason.clone())),
            JobState::Idle => break Err(JobError::Stopped),
        }

        tokio::select! {
            next = watch.next() => {
                if next.is_none() {
                    break Err(JobError::Stopped);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling job");
                controller.stop();
                break Err(JobError::Stopped);
            }
        }
    };

    let result = outcome?;
    match serde_json::to_string_pretty(&result) {
        Ok(pretty) => println!("{pretty}"),
        Err(_) => println!("{result}"),
    }

    Ok(())
}

fn env_secs(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(cfg!(debug_assertions))
        .init();
}
