//! Response Validator (spec §4.2): a pure function from
//! `(Endpoint, HttpResponse, observed_response_time)` to a [`ValidationResult`].
//! No I/O, so it can be exhaustively table-tested (spec §9).

use std::time::Duration;

use monitor_common::error::EndpointValidationError;
use monitor_common::model::Endpoint;

use crate::prober::HttpResponse;

/// Recognised Validator configuration options (spec §4.2).
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub strict_mode: bool,
    pub max_response_time: Duration,
    pub content_checks_enabled: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            max_response_time: Duration::from_secs(30),
            content_checks_enabled: true,
        }
    }
}

/// Substrings whose presence is recorded as a warning but never flips
/// `content_valid` to false (spec §9 open question, resolved: warning-only).
const CONTENT_ERROR_INDICATORS: &[&str] = &[
    "error",
    "exception",
    "failed",
    "internal server error",
    "service unavailable",
    "bad gateway",
];

/// Structured verdict for one probe outcome.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub status_valid: bool,
    pub response_time_valid: bool,
    pub content_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn success(&self) -> bool {
        self.status_valid && self.response_time_valid && self.content_valid
    }
}

/// Judge one probe outcome against `endpoint`'s expectations.
pub fn validate(
    endpoint: &Endpoint,
    response: &HttpResponse,
    observed_response_time: Duration,
    config: &ValidatorConfig,
) -> ValidationResult {
    let mut result = ValidationResult {
        content_valid: true,
        ..Default::default()
    };

    result.status_valid = check_status(endpoint, response, config);
    if !result.status_valid {
        result.errors.push(format!(
            "unexpected status code {} (expected {})",
            response.status, endpoint.expected_status_code
        ));
    }

    let limit = std::cmp::min(endpoint.timeout, config.max_response_time);
    result.response_time_valid = observed_response_time <= limit;
    if !result.response_time_valid {
        result.errors.push(format!(
            "response time {observed_response_time:?} exceeded limit {limit:?}"
        ));
    }

    if config.content_checks_enabled && !response.body_sample.is_empty() {
        check_content(response, &mut result);
    }

    if endpoint.body.as_ref().is_some_and(|b| !b.is_empty()) && response.body_sample.is_empty() {
        result.content_valid = false;
        result
            .errors
            .push("expected a non-empty response body, got an empty one".to_owned());
    }

    result
}

fn check_status(endpoint: &Endpoint, response: &HttpResponse, config: &ValidatorConfig) -> bool {
    if config.strict_mode {
        return response.status == endpoint.expected_status_code;
    }
    if (200..300).contains(&endpoint.expected_status_code) {
        (200..300).contains(&response.status)
    } else {
        response.status == endpoint.expected_status_code
    }
}

fn check_content(response: &HttpResponse, result: &mut ValidationResult) {
    let content_type_is_json = response
        .headers
        .get("content-type")
        .map(|v| v.contains("application/json"))
        .unwrap_or(false);

    if content_type_is_json && !looks_like_json(&response.body_sample) {
        result.content_valid = false;
        result
            .errors
            .push("response declared application/json but body does not look like JSON".to_owned());
    }

    let lower = response.body_sample.to_ascii_lowercase();
    for indicator in CONTENT_ERROR_INDICATORS {
        if lower.contains(indicator) {
            result
                .warnings
                .push(format!("body contains error indicator \"{indicator}\""));
        }
    }
}

/// A deliberately lightweight structural check (balanced braces/brackets,
/// quoted strings with escapes, recognised primitives) — not a full parser.
/// Sufficient to reject obviously-non-JSON bodies without pulling in a JSON
/// crate for a yes/no question.
fn looks_like_json(sample: &str) -> bool {
    let trimmed = sample.trim();
    if trimmed.is_empty() {
        return false;
    }
    if matches!(trimmed, "true" | "false" | "null") {
        return true;
    }
    if trimmed.parse::<f64>().is_ok() {
        return true;
    }

    let first = trimmed.chars().next().unwrap();
    match first {
        '"' => is_balanced_string(trimmed),
        '{' | '[' => is_balanced_structure(trimmed),
        _ => false,
    }
}

fn is_balanced_string(s: &str) -> bool {
    let mut chars = s.chars();
    if chars.next() != Some('"') {
        return false;
    }
    let mut escaped = false;
    for c in chars {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => return true,
            _ => {}
        }
    }
    false
}

fn is_balanced_structure(s: &str) -> bool {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for c in s.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    depth == 0 && !in_string
}

/// Pre-admission check of the Endpoint invariants from spec §3. Applied by
/// the Scheduler before accepting an endpoint from the provider or from an
/// explicit `AddEndpoint`/`UpdateEndpoint` call.
pub fn validate_endpoint_config(endpoint: &Endpoint) -> Result<(), EndpointValidationError> {
    let scheme_ok = endpoint.url.starts_with("http://") || endpoint.url.starts_with("https://");
    if endpoint.url.is_empty() || !scheme_ok {
        return Err(EndpointValidationError::InvalidUrl);
    }
    if !(100..=599).contains(&endpoint.expected_status_code) {
        return Err(EndpointValidationError::InvalidExpectedStatus);
    }
    if endpoint.timeout < Duration::from_secs(1) || endpoint.timeout > Duration::from_secs(300) {
        return Err(EndpointValidationError::InvalidTimeout);
    }
    if endpoint.check_interval < Duration::from_secs(1) {
        return Err(EndpointValidationError::InvalidInterval);
    }
    Ok(())
}
