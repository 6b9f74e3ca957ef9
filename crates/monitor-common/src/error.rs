//! Shared validation errors (spec §3 Endpoint invariants).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointValidationError {
    #[error("url must be non-empty and use http or https")]
    InvalidUrl,
    #[error("expected_status_code must be between 100 and 599")]
    InvalidExpectedStatus,
    #[error("timeout must be between 1 and 300 seconds")]
    InvalidTimeout,
    #[error("check_interval must be at least 1 second")]
    InvalidInterval,
}
