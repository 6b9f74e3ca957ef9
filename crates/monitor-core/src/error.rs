//! Error taxonomy for the engine (spec §7), one `thiserror` enum per
//! component, matching `hook-worker::error::{WebhookError, WorkerError}`.

use monitor_common::contracts::StoreError;
use monitor_common::error::EndpointValidationError;
use thiserror::Error;

/// Errors from a single HTTP probe attempt sequence (spec §4.1).
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("exhausted {attempts} attempt(s), last error: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Errors from submitting a job to the Worker Pool (spec §4.3).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("job queue is full")]
    QueueFull,
    #[error("worker pool has been stopped")]
    Stopped,
}

/// Errors from Scheduler admission/reconciliation (spec §4.5).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("endpoint failed admission validation: {0}")]
    InvalidEndpoint(#[from] EndpointValidationError),
    #[error("failed to reconcile endpoint set: {0}")]
    ReconcileFailed(#[from] StoreError),
}

/// Errors surfaced (and logged, non-fatal) during a detector cycle (spec §4.6, §7).
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("storage error during detection cycle: {0}")]
    Storage(#[from] StoreError),
}

/// Errors the Engine surfaces to its caller (spec §4.7, §7: "only `Start()`
/// surfaces fatal errors").
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start engine: {0}")]
    StartFailed(String),
    #[error("shutdown did not complete within the requested deadline")]
    ShutdownTimeout,
}
