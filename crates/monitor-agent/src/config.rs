//! Environment-derived configuration for the monitoring agent binary.
//!
//! Grounded on `hook-worker::config::Config`: one `envconfig::Envconfig`
//! struct per component, nested the same way `RetryPolicyConfig` nests under
//! `Config`, plus the same `EnvMsDuration` newtype for plain-integer
//! millisecond durations.

use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;
        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvSecsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvSecsDurationError;

impl FromStr for EnvSecsDuration {
    type Err = ParseEnvSecsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let secs = s.parse::<u64>().map_err(|_| ParseEnvSecsDurationError)?;
        Ok(EnvSecsDuration(Duration::from_secs(secs)))
    }
}

#[derive(Envconfig, Clone)]
pub struct ProberEnvConfig {
    #[envconfig(from = "PROBER_CONNECT_TIMEOUT_MS", default = "10000")]
    pub connect_timeout: EnvMsDuration,

    #[envconfig(from = "PROBER_MAX_RETRIES", default = "2")]
    pub max_retries: u32,

    #[envconfig(from = "PROBER_BASE_RETRY_DELAY_MS", default = "500")]
    pub base_retry_delay: EnvMsDuration,

    #[envconfig(from = "PROBER_MAX_RETRY_DELAY_MS", default = "10000")]
    pub max_retry_delay: EnvMsDuration,

    #[envconfig(from = "PROBER_MAX_RESPONSE_BODY_BYTES", default = "65536")]
    pub max_response_body_bytes: usize,

    #[envconfig(from = "PROBER_SAMPLE_SIZE", default = "500")]
    pub sample_size: usize,

    #[envconfig(from = "PROBER_FOLLOW_REDIRECTS", default = "true")]
    pub follow_redirects: bool,

    #[envconfig(from = "PROBER_MAX_REDIRECTS", default = "10")]
    pub max_redirects: usize,

    #[envconfig(from = "PROBER_TLS_INSECURE_SKIP_VERIFY", default = "false")]
    pub tls_insecure_skip_verify: bool,

    #[envconfig(from = "PROBER_USER_AGENT", default = "monitor-core-prober/1.0")]
    pub user_agent: String,
}

#[derive(Envconfig, Clone)]
pub struct ValidatorEnvConfig {
    #[envconfig(from = "VALIDATOR_STRICT_MODE", default = "false")]
    pub strict_mode: bool,

    #[envconfig(from = "VALIDATOR_MAX_RESPONSE_TIME_MS", default = "30000")]
    pub max_response_time: EnvMsDuration,

    #[envconfig(from = "VALIDATOR_CONTENT_CHECKS_ENABLED", default = "true")]
    pub content_checks_enabled: bool,
}

#[derive(Envconfig, Clone)]
pub struct WorkerPoolEnvConfig {
    #[envconfig(from = "WORKER_COUNT", default = "5")]
    pub worker_count: usize,

    #[envconfig(from = "JOB_QUEUE_CAPACITY", default = "100")]
    pub job_queue_capacity: usize,

    #[envconfig(from = "RESULT_QUEUE_CAPACITY", default = "50")]
    pub result_queue_capacity: usize,
}

#[derive(Envconfig, Clone)]
pub struct SchedulerEnvConfig {
    #[envconfig(from = "SCHEDULER_TICK_INTERVAL_SECS", default = "10")]
    pub tick_interval: EnvSecsDuration,

    #[envconfig(from = "SCHEDULER_RECONCILE_INTERVAL_SECS", default = "300")]
    pub reconcile_interval: EnvSecsDuration,

    #[envconfig(from = "SCHEDULER_DEACTIVATION_THRESHOLD", default = "5")]
    pub deactivation_threshold: u32,
}

#[derive(Envconfig, Clone)]
pub struct DetectorEnvConfig {
    #[envconfig(from = "DETECTOR_CHECK_INTERVAL_SECS", default = "30")]
    pub check_interval: EnvSecsDuration,

    #[envconfig(from = "DETECTOR_CONSECUTIVE_FAILURES_THRESHOLD", default = "3")]
    pub consecutive_failures_threshold: u32,

    #[envconfig(from = "DETECTOR_FAILURE_WINDOW_SECS", default = "600")]
    pub failure_window: EnvSecsDuration,

    #[envconfig(from = "DETECTOR_RECOVERY_THRESHOLD", default = "2")]
    pub recovery_threshold: u32,

    #[envconfig(from = "DETECTOR_AUTO_RESOLVE", default = "true")]
    pub auto_resolve: bool,

    #[envconfig(from = "DETECTOR_CRITICAL_LATENCY_MS", default = "5000")]
    pub critical_latency_ms: u64,

    #[envconfig(from = "DETECTOR_HIGH_LATENCY_MS", default = "2000")]
    pub high_latency_ms: u64,

    #[envconfig(from = "DETECTOR_MEDIUM_LATENCY_MS", default = "1000")]
    pub medium_latency_ms: u64,
}

#[derive(Envconfig, Clone)]
pub struct AgentConfig {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub prober: ProberEnvConfig,

    #[envconfig(nested = true)]
    pub validator: ValidatorEnvConfig,

    #[envconfig(nested = true)]
    pub worker_pool: WorkerPoolEnvConfig,

    #[envconfig(nested = true)]
    pub scheduler: SchedulerEnvConfig,

    #[envconfig(nested = true)]
    pub detector: DetectorEnvConfig,

    #[envconfig(from = "RESULT_MONITOR_INTERVAL_SECS", default = "15")]
    pub result_monitor_interval: EnvSecsDuration,

    #[envconfig(from = "HEALTH_MONITOR_INTERVAL_SECS", default = "20")]
    pub health_monitor_interval: EnvSecsDuration,

    #[envconfig(from = "QUEUE_SATURATION_WARN_THRESHOLD", default = "0.8")]
    pub queue_saturation_warn_threshold: f64,

    #[envconfig(from = "SHUTDOWN_DEADLINE_SECS", default = "30")]
    pub shutdown_deadline: EnvSecsDuration,

    /// Comma-separated seed URLs, probed with `GET`/`expected_status=200`
    /// defaults. The admin API that would otherwise populate the endpoint
    /// set is out of scope (spec §1); this is the demo binary's only way to
    /// give the engine something to probe.
    #[envconfig(from = "MONITOR_SEED_URLS", default = "")]
    pub seed_urls: String,
}

impl AgentConfig {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn seed_url_list(&self) -> Vec<String> {
        self.seed_urls
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

impl From<&ProberEnvConfig> for monitor_core::prober::ProberConfig {
    fn from(value: &ProberEnvConfig) -> Self {
        Self {
            connect_timeout: value.connect_timeout.0,
            max_retries: value.max_retries,
            base_retry_delay: value.base_retry_delay.0,
            max_retry_delay: value.max_retry_delay.0,
            max_response_body_bytes: value.max_response_body_bytes,
            sample_size: value.sample_size,
            follow_redirects: value.follow_redirects,
            max_redirects: value.max_redirects,
            tls_insecure_skip_verify: value.tls_insecure_skip_verify,
            user_agent: value.user_agent.clone(),
        }
    }
}

impl From<&ValidatorEnvConfig> for monitor_core::validator::ValidatorConfig {
    fn from(value: &ValidatorEnvConfig) -> Self {
        Self {
            strict_mode: value.strict_mode,
            max_response_time: value.max_response_time.0,
            content_checks_enabled: value.content_checks_enabled,
        }
    }
}

impl From<&WorkerPoolEnvConfig> for monitor_core::worker_pool::WorkerPoolConfig {
    fn from(value: &WorkerPoolEnvConfig) -> Self {
        Self {
            worker_count: value.worker_count,
            job_queue_capacity: value.job_queue_capacity,
            result_queue_capacity: value.result_queue_capacity,
        }
    }
}

impl From<&SchedulerEnvConfig> for monitor_core::scheduler::SchedulerConfig {
    fn from(value: &SchedulerEnvConfig) -> Self {
        Self {
            tick_interval: value.tick_interval.0,
            reconcile_interval: value.reconcile_interval.0,
            deactivation_threshold: value.deactivation_threshold,
        }
    }
}

impl From<&DetectorEnvConfig> for monitor_core::detector::DetectorConfig {
    fn from(value: &DetectorEnvConfig) -> Self {
        Self {
            check_interval: value.check_interval.0,
            consecutive_failures_threshold: value.consecutive_failures_threshold,
            failure_window: value.failure_window.0,
            recovery_threshold: value.recovery_threshold,
            auto_resolve: value.auto_resolve,
            critical_latency_ms: value.critical_latency_ms,
            high_latency_ms: value.high_latency_ms,
            medium_latency_ms: value.medium_latency_ms,
        }
    }
}

impl From<&AgentConfig> for monitor_core::engine::EngineConfig {
    fn from(value: &AgentConfig) -> Self {
        Self {
            prober: (&value.prober).into(),
            validator: (&value.validator).into(),
            worker_pool: (&value.worker_pool).into(),
            scheduler: (&value.scheduler).into(),
            detector: (&value.detector).into(),
            result_monitor_interval: value.result_monitor_interval.0,
            health_monitor_interval: value.health_monitor_interval.0,
            queue_saturation_warn_threshold: value.queue_saturation_warn_threshold,
        }
    }
}
