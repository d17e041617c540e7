//! Logging and observability setup.
//!
//! Structured logging via `tracing`, with an env-filtered subscriber and
//! phase-scoped helpers used by the orchestrator.

use tracing::{Level, error, info, span};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Honors `RUST_LOG` when set; otherwise defaults to `codeforge=info`
/// (or `codeforge=debug` in verbose mode). Safe to call once per process;
/// a second call returns an error from the underlying registry.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("codeforge=debug,info")
            } else {
                EnvFilter::try_new("codeforge=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(verbose)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init()?;

    Ok(())
}

/// Create a span covering one phase execution.
#[must_use]
pub fn phase_span(phase: &str) -> tracing::Span {
    span!(Level::INFO, "phase_execution", phase = %phase)
}

/// Log the start of a phase.
pub fn log_phase_start(phase: &str) {
    info!(phase = %phase, "phase started");
}

/// Log successful completion of a phase.
pub fn log_phase_complete(phase: &str, duration_ms: u128) {
    info!(phase = %phase, duration_ms = %duration_ms, "phase completed");
}

/// Log a phase failure.
pub fn log_phase_error(phase: &str, err: &str, duration_ms: u128) {
    error!(phase = %phase, error = %err, duration_ms = %duration_ms, "phase failed");
}
