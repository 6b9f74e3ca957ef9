//! Worker Pool (spec §4.3): bounded concurrency executing Prober+Validator
//! per job and emitting results to a Result Sink.
//!
//! Grounded on `hook-worker::worker`'s worker-loop shape, reimplemented
//! around bounded `tokio::mpsc` channels rather than a semaphore: the job
//! channel capacity *is* the queue-full backpressure point spec §4.3/§5
//! call for, and a full channel maps directly onto [`SubmitError::QueueFull`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use monitor_common::contracts::ResultStore;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use monitor_health::HealthHandle;

use crate::error::SubmitError;
use crate::job::{Job, JobOutcome};
use crate::prober::Prober;
use crate::result_sink::ResultSink;
use crate::validator::{self, ValidatorConfig};

/// Recognised Worker Pool configuration options (spec §4.3).
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub job_queue_capacity: usize,
    pub result_queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            job_queue_capacity: 100,
            result_queue_capacity: 50,
        }
    }
}

/// Point-in-time gauges for `GetStatus` (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolStats {
    pub worker_count: usize,
    pub job_queue_len: usize,
    pub job_queue_capacity: usize,
    pub result_queue_len: usize,
    pub result_queue_capacity: usize,
}

impl WorkerPoolStats {
    /// Fraction of job-queue capacity currently in use, used by the
    /// Engine's health monitor to warn above 80% (spec §4.7, §5).
    pub fn job_queue_saturation(&self) -> f64 {
        if self.job_queue_capacity == 0 {
            return 0.0;
        }
        self.job_queue_len as f64 / self.job_queue_capacity as f64
    }
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    prober: Arc<Prober>,
    validator_config: ValidatorConfig,
    health: Option<HealthHandle>,

    job_tx: StdMutex<Option<mpsc::Sender<Job>>>,
    job_rx: Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    result_tx: StdMutex<Option<mpsc::Sender<JobOutcome>>>,
    result_rx: StdMutex<Option<mpsc::Receiver<JobOutcome>>>,

    worker_handles: StdMutex<Vec<JoinHandle<()>>>,
    result_handle: StdMutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        prober: Arc<Prober>,
        validator_config: ValidatorConfig,
        health: Option<HealthHandle>,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel(config.job_queue_capacity.max(1));
        let (result_tx, result_rx) = mpsc::channel(config.result_queue_capacity.max(1));

        Self {
            config,
            prober,
            validator_config,
            health,
            job_tx: StdMutex::new(Some(job_tx)),
            job_rx: Arc::new(AsyncMutex::new(job_rx)),
            result_tx: StdMutex::new(Some(result_tx)),
            result_rx: StdMutex::new(Some(result_rx)),
            worker_handles: StdMutex::new(Vec::new()),
            result_handle: StdMutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Non-blocking, best-effort submission (spec §4.3).
    pub fn submit(&self, job: Job) -> Result<(), SubmitError> {
        let guard = self.job_tx.lock().expect("job_tx mutex poisoned");
        match guard.as_ref() {
            None => Err(SubmitError::Stopped),
            Some(tx) => match tx.try_send(job) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(SubmitError::QueueFull),
                Err(TrySendError::Closed(_)) => Err(SubmitError::Stopped),
            },
        }
    }

    /// Spawn `worker_count` workers plus one result-processor task.
    pub fn start(&self, result_store: Arc<dyn ResultStore>) {
        let mut handles = self.worker_handles.lock().expect("worker_handles mutex poisoned");
        for worker_id in 0..self.config.worker_count {
            let job_rx = Arc::clone(&self.job_rx);
            let result_tx = self
                .result_tx
                .lock()
                .expect("result_tx mutex poisoned")
                .clone();
            let prober = Arc::clone(&self.prober);
            let validator_config = self.validator_config.clone();
            let health = self.health.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, job_rx, result_tx, prober, validator_config, health).await;
            }));
        }

        let result_rx = self
            .result_rx
            .lock()
            .expect("result_rx mutex poisoned")
            .take()
            .expect("start() called more than once");
        *self.result_handle.lock().expect("result_handle mutex poisoned") =
            Some(tokio::spawn(result_processor(result_rx, result_store)));
    }

    /// Close the job queue, let in-flight jobs finish, then close the
    /// result queue and join the processor task (spec §4.3).
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.job_tx.lock().expect("job_tx mutex poisoned").take();

        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.worker_handles.lock().expect("worker_handles mutex poisoned"),
        );
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "worker task panicked during shutdown");
            }
        }

        self.result_tx.lock().expect("result_tx mutex poisoned").take();
        let result_handle = self.result_handle.lock().expect("result_handle mutex poisoned").take();
        if let Some(handle) = result_handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "result processor task panicked during shutdown");
            }
        }
    }

    pub fn stats(&self) -> WorkerPoolStats {
        let job_tx = self.job_tx.lock().expect("job_tx mutex poisoned");
        let result_tx = self.result_tx.lock().expect("result_tx mutex poisoned");
        WorkerPoolStats {
            worker_count: self.config.worker_count,
            job_queue_len: job_tx.as_ref().map(|tx| tx.max_capacity() - tx.capacity()).unwrap_or(0),
            job_queue_capacity: self.config.job_queue_capacity,
            result_queue_len: result_tx
                .as_ref()
                .map(|tx| tx.max_capacity() - tx.capacity())
                .unwrap_or(0),
            result_queue_capacity: self.config.result_queue_capacity,
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    job_rx: Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    result_tx: Option<mpsc::Sender<JobOutcome>>,
    prober: Arc<Prober>,
    validator_config: ValidatorConfig,
    health: Option<HealthHandle>,
) {
    loop {
        let job = {
            let mut rx = job_rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            debug!(worker_id, "job queue closed, worker exiting");
            break;
        };

        let outcome = execute_job(&prober, &validator_config, &job).await;

        if let Some(tx) = &result_tx {
            if tx.send(outcome).await.is_err() {
                warn!(worker_id, "result queue closed while emitting outcome");
            }
        }

        if let Some(handle) = &health {
            handle.report_healthy().await;
        }
    }
}

async fn execute_job(prober: &Prober, validator_config: &ValidatorConfig, job: &Job) -> JobOutcome {
    metrics::counter!("probe_attempts_total", "endpoint" => job.endpoint.name.clone()).increment(1);

    match prober.probe(&job.endpoint).await {
        Ok(response) => {
            metrics::histogram!("probe_duration_seconds", "endpoint" => job.endpoint.name.clone())
                .record(response.response_time.as_secs_f64());

            let verdict = validator::validate(
                &job.endpoint,
                &response,
                response.response_time,
                validator_config,
            );
            JobOutcome::Success {
                endpoint_id: job.endpoint.id,
                status_code: response.status,
                response_time: response.response_time,
                body_sample: Some(response.body_sample),
                validation_errors: verdict.errors,
                valid: verdict.success(),
            }
        }
        Err(err) => JobOutcome::TransportError {
            endpoint_id: job.endpoint.id,
            message: err.to_string(),
        },
    }
}

async fn result_processor(mut result_rx: mpsc::Receiver<JobOutcome>, result_store: Arc<dyn ResultStore>) {
    let sink = ResultSink::new(result_store);
    while let Some(outcome) = result_rx.recv().await {
        let success = matches!(&outcome, JobOutcome::Success { valid: true, .. });
        let result = outcome.into_monitoring_result(Utc::now());

        metrics::counter!(
            "monitoring_results_total",
            "success" => success.to_string()
        )
        .increment(1);

        // Persistence failures are logged by the sink; the pool never stalls on them (spec §4.3, §4.4).
        let _ = sink.record(result).await;
    }
    debug!("result processor exiting, result queue closed");
}
