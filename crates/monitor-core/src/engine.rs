//! Engine (spec §4.7): lifecycle supervisor wiring Worker Pool, Scheduler,
//! and Incident Detector, plus the two background tasks that glue them to
//! storage (result-monitor, health-monitor).
//!
//! Grounded on `hook-janitor::main::main`'s construct-then-`select!` wiring
//! and `hook-worker::worker::WebhookWorker`'s `HealthHandle`-per-component
//! pattern: every owned component registers with the shared
//! `monitor_health::HealthRegistry` before `start()` runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use monitor_common::contracts::{Clock, EndpointProvider, IncidentStore, ResultStore, SystemClock};
use monitor_common::model::Endpoint;
use monitor_health::HealthRegistry;

use crate::detector::{DetectorConfig, IncidentDetector};
use crate::error::{EngineError, SchedulerError};
use crate::prober::{Prober, ProberConfig};
use crate::scheduler::{ScheduleSnapshot, Scheduler, SchedulerConfig};
use crate::validator::ValidatorConfig;
use crate::worker_pool::{WorkerPool, WorkerPoolConfig, WorkerPoolStats};

/// Bundled configuration for every sub-component (spec §4.7, SPEC_FULL §10).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub prober: ProberConfig,
    pub validator: ValidatorConfig,
    pub worker_pool: WorkerPoolConfig,
    pub scheduler: SchedulerConfig,
    pub detector: DetectorConfig,
    /// How often the result-monitor task polls storage for new results.
    pub result_monitor_interval: Duration,
    /// How often the health-monitor task inspects queue saturation.
    pub health_monitor_interval: Duration,
    /// Saturation fraction above which the health monitor warns (spec §4.7, §5).
    pub queue_saturation_warn_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prober: ProberConfig::default(),
            validator: ValidatorConfig::default(),
            worker_pool: WorkerPoolConfig::default(),
            scheduler: SchedulerConfig::default(),
            detector: DetectorConfig::default(),
            result_monitor_interval: Duration::from_secs(15),
            health_monitor_interval: Duration::from_secs(20),
            queue_saturation_warn_threshold: 0.8,
        }
    }
}

/// Point-in-time status surfaced via `GetStatus` (spec §6).
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub healthy: bool,
    pub worker_pool: WorkerPoolStats,
    pub schedule: ScheduleSnapshot,
}

pub struct Engine {
    config: EngineConfig,
    worker_pool: Arc<WorkerPool>,
    scheduler: Arc<Scheduler>,
    detector: Arc<IncidentDetector>,
    result_store: Arc<dyn ResultStore>,
    health: Arc<HealthRegistry>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    background_handles: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Construct every owned component, registering each with the health
    /// registry before it is built (spec §4.7, §5's per-component health).
    pub async fn new(
        config: EngineConfig,
        endpoint_provider: Arc<dyn EndpointProvider>,
        result_store: Arc<dyn ResultStore>,
        incident_store: Arc<dyn IncidentStore>,
    ) -> Result<Self, EngineError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let health = Arc::new(HealthRegistry::new("monitoring-core"));

        let prober = Arc::new(
            Prober::new(config.prober.clone())
                .map_err(|err| EngineError::StartFailed(err.to_string()))?,
        );

        // Each worker reports healthy after every job it drains, so a
        // generous fixed deadline is enough regardless of queue sizing.
        let worker_pool_health = health
            .register("worker_pool".to_owned(), time::Duration::seconds(60))
            .await;
        let worker_pool = Arc::new(WorkerPool::new(
            config.worker_pool,
            prober,
            config.validator.clone(),
            Some(worker_pool_health),
        ));

        let scheduler_health = health
            .register("scheduler".to_owned(), double_as_health_deadline(config.scheduler.tick_interval))
            .await;
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler,
            Arc::clone(&clock),
            Arc::clone(&endpoint_provider),
            Arc::clone(&worker_pool),
            Some(scheduler_health),
        ));

        let detector_health = health
            .register(
                "incident_detector".to_owned(),
                double_as_health_deadline(config.detector.check_interval),
            )
            .await;
        let detector = Arc::new(IncidentDetector::new(
            config.detector,
            Arc::clone(&clock),
            Arc::clone(&result_store),
            incident_store,
            endpoint_provider,
            Some(detector_health),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            worker_pool,
            scheduler,
            detector,
            result_store,
            health,
            shutdown_tx,
            shutdown_rx,
            background_handles: AsyncMutex::new(Vec::new()),
        })
    }

    pub fn health_registry(&self) -> Arc<HealthRegistry> {
        Arc::clone(&self.health)
    }

    /// Start every owned component plus the result-monitor and
    /// health-monitor background tasks (spec §4.7).
    pub async fn start(&self) {
        self.worker_pool.start(Arc::clone(&self.result_store));
        self.scheduler.start();
        self.detector.start();

        let mut handles = self.background_handles.lock().await;
        handles.push(tokio::spawn(result_monitor_loop(
            Arc::clone(&self.result_store),
            Arc::clone(&self.scheduler),
            self.config.result_monitor_interval,
            self.shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(health_monitor_loop(
            Arc::clone(&self.worker_pool),
            self.config.health_monitor_interval,
            self.config.queue_saturation_warn_threshold,
            self.shutdown_rx.clone(),
        )));
    }

    /// Stop every component and background task, honouring `deadline`
    /// (spec §4.7, §8's "shutdown completes within deadline or surfaces a
    /// timeout error").
    pub async fn stop(&self, deadline: Duration) -> Result<(), EngineError> {
        let _ = self.shutdown_tx.send(true);

        tokio::time::timeout(deadline, async {
            self.scheduler.stop().await;
            self.detector.stop().await;
            self.worker_pool.stop().await;

            let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.background_handles.lock().await);
            for handle in handles {
                if let Err(err) = handle.await {
                    warn!(error = %err, "engine background task panicked during shutdown");
                }
            }
        })
        .await
        .map_err(|_| EngineError::ShutdownTimeout)
    }

    pub fn add_endpoint(&self, endpoint: Endpoint) -> Result<(), SchedulerError> {
        self.scheduler.add_endpoint(endpoint)
    }

    pub fn update_endpoint(&self, endpoint: Endpoint) -> Result<(), SchedulerError> {
        self.scheduler.update_endpoint(endpoint)
    }

    pub fn remove_endpoint(&self, id: Uuid) {
        self.scheduler.remove_endpoint(id);
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            healthy: self.health.get_status().healthy,
            worker_pool: self.worker_pool.stats(),
            schedule: self.scheduler.snapshot(),
        }
    }
}

/// A health deadline twice the loop's own tick interval, so one missed
/// report doesn't immediately flip the component to `Stalled`.
fn double_as_health_deadline(tick_interval: Duration) -> time::Duration {
    time::Duration::seconds((tick_interval.as_secs().max(1) * 2) as i64)
}

/// Poll storage for results newer than the last-seen timestamp per endpoint
/// and feed success/failure signals into the Scheduler (spec §4.7's
/// "result-monitor background task... pushes success/failure signals into
/// the Scheduler"). The per-endpoint last-seen map prevents re-counting the
/// same result across overlapping poll windows.
async fn result_monitor_loop(
    result_store: Arc<dyn ResultStore>,
    scheduler: Arc<Scheduler>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_seen: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match result_store.recent_results(interval * 4).await {
                    Ok(mut results) => {
                        results.sort_by_key(|r| r.timestamp);
                        for result in results {
                            let newer = last_seen
                                .get(&result.endpoint_id)
                                .map(|seen| result.timestamp > *seen)
                                .unwrap_or(true);
                            if newer {
                                scheduler.record_result(result.endpoint_id, result.success);
                                last_seen.insert(result.endpoint_id, result.timestamp);
                            }
                        }
                    }
                    Err(err) => warn!(error = %err, "result monitor failed to poll recent results"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("result monitor loop exiting");
}

/// Periodically inspect job-queue saturation and warn above the configured
/// threshold (spec §4.7, §5: "health monitor warns above 80%").
async fn health_monitor_loop(
    worker_pool: Arc<WorkerPool>,
    interval: Duration,
    warn_threshold: f64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = worker_pool.stats();
                let saturation = stats.job_queue_saturation();

                metrics::gauge!("worker_pool_saturation_percent").set(saturation * 100.0);
                metrics::gauge!("job_queue_depth").set(stats.job_queue_len as f64);
                metrics::gauge!("result_queue_depth").set(stats.result_queue_len as f64);

                if saturation >= warn_threshold {
                    warn!(
                        saturation = saturation,
                        job_queue_len = stats.job_queue_len,
                        job_queue_capacity = stats.job_queue_capacity,
                        "job queue saturation above warning threshold"
                    );
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("health monitor loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use monitor_common::contracts::StoreError;
    use monitor_common::model::{EndpointIncident, Incident, IncidentTimelineEvent, MonitoringResult};
    use std::sync::Mutex as StdMutex;

    struct EmptyProvider;

    #[async_trait]
    impl EndpointProvider for EmptyProvider {
        async fn list_enabled_endpoints(&self) -> Result<Vec<Endpoint>, StoreError> {
            Ok(Vec::new())
        }
    }

    struct EmptyResults;

    #[async_trait]
    impl ResultStore for EmptyResults {
        async fn append_result(&self, _result: MonitoringResult) -> Result<(), StoreError> {
            Ok(())
        }

        async fn recent_results(&self, _within: Duration) -> Result<Vec<MonitoringResult>, StoreError> {
            Ok(Vec::new())
        }
    }

    struct EmptyIncidents;

    #[async_trait]
    impl IncidentStore for EmptyIncidents {
        async fn create_incident(&self, _incident: Incident) -> Result<(), StoreError> {
            Ok(())
        }
        async fn get_incident(&self, id: Uuid) -> Result<Incident, StoreError> {
            Err(StoreError::NotFound(id))
        }
        async fn update_incident(&self, _incident: Incident) -> Result<(), StoreError> {
            Ok(())
        }
        async fn create_endpoint_incident(&self, _link: EndpointIncident) -> Result<(), StoreError> {
            Ok(())
        }
        async fn endpoint_incidents_for(&self, _incident_id: Uuid) -> Result<Vec<EndpointIncident>, StoreError> {
            Ok(Vec::new())
        }
        async fn update_endpoint_incident(&self, _link: EndpointIncident) -> Result<(), StoreError> {
            Ok(())
        }
        async fn append_timeline_event(&self, _event: IncidentTimelineEvent) -> Result<(), StoreError> {
            Ok(())
        }
    }

    async fn test_engine() -> Engine {
        Engine::new(
            EngineConfig {
                worker_pool: WorkerPoolConfig {
                    worker_count: 1,
                    job_queue_capacity: 4,
                    result_queue_capacity: 4,
                },
                ..Default::default()
            },
            Arc::new(EmptyProvider),
            Arc::new(EmptyResults),
            Arc::new(EmptyIncidents),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn start_then_stop_within_deadline_succeeds() {
        let engine = test_engine().await;
        engine.start().await;
        let result = engine.stop(Duration::from_secs(5)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn status_reports_worker_pool_and_schedule() {
        let engine = test_engine().await;
        engine.start().await;

        let id = Uuid::new_v4();
        engine
            .add_endpoint(Endpoint {
                id,
                name: "svc".to_owned(),
                url: "http://example.test".to_owned(),
                method: monitor_common::model::HttpMethod::Get,
                headers: Default::default(),
                body: None,
                expected_status_code: 200,
                timeout: Duration::from_secs(5),
                check_interval: Duration::from_secs(60),
                enabled: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .unwrap();

        let status = engine.status().await;
        assert_eq!(status.schedule.total, 1);

        engine.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn stop_with_zero_deadline_times_out() {
        let engine = test_engine().await;
        engine.start().await;
        let result = engine.stop(Duration::from_nanos(1)).await;
        assert!(matches!(result, Err(EngineError::ShutdownTimeout)));
    }
}
