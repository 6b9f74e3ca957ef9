//! Job and outcome types flowing through the Worker Pool (spec §4.3).
//!
//! Per spec §9 ("use tagged sum types for job outcomes... instead of mixed
//! nullable fields"), [`JobOutcome`] is an enum rather than a struct with a
//! handful of `Option` fields.

use std::time::Duration;

use chrono::{DateTime, Utc};
use monitor_common::model::{Endpoint, MonitoringResult};
use uuid::Uuid;

/// One unit of work dispatched by the Scheduler (spec §4.3).
#[derive(Debug, Clone)]
pub struct Job {
    pub endpoint: Endpoint,
    pub dispatched_at: DateTime<Utc>,
}

/// The three ways a job can conclude.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The probe executed and the validator produced a verdict.
    Success {
        endpoint_id: Uuid,
        status_code: u16,
        response_time: Duration,
        body_sample: Option<String>,
        validation_errors: Vec<String>,
        valid: bool,
    },
    /// The prober could not complete an HTTP exchange at all.
    TransportError {
        endpoint_id: Uuid,
        message: String,
    },
}

impl JobOutcome {
    pub fn endpoint_id(&self) -> Uuid {
        match self {
            JobOutcome::Success { endpoint_id, .. } => *endpoint_id,
            JobOutcome::TransportError { endpoint_id, .. } => *endpoint_id,
        }
    }

    /// Render as the immutable [`MonitoringResult`] row the Result Sink
    /// persists (spec §4.3 step 3, §3 "MonitoringResult").
    pub fn into_monitoring_result(self, timestamp: DateTime<Utc>) -> MonitoringResult {
        match self {
            JobOutcome::Success {
                endpoint_id,
                status_code,
                response_time,
                body_sample,
                validation_errors,
                valid,
            } => MonitoringResult {
                endpoint_id,
                timestamp,
                success: valid,
                status_code: Some(status_code),
                response_time_ms: Some(response_time.as_millis() as u64),
                error_message: if validation_errors.is_empty() {
                    None
                } else {
                    Some(validation_errors.join("; "))
                },
                body_sample,
            },
            JobOutcome::TransportError { endpoint_id, message } => MonitoringResult {
                endpoint_id,
                timestamp,
                success: false,
                status_code: None,
                response_time_ms: None,
                error_message: Some(message),
                body_sample: None,
            },
        }
    }
}
