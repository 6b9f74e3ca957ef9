//! Scheduler (spec §4.5): per-endpoint interval timing, periodic
//! reconciliation against the external endpoint set, job dispatch on
//! deadline.
//!
//! Grounded on `hook-janitor::main::cleanup_loop`'s semaphore-guarded
//! `tokio::time::interval` loop shape, doubled into two independently
//! ticking loops (tick loop, reconcile loop) per spec §4.5, each reading a
//! `std::sync::Mutex`-guarded endpoint map rather than a channel, since
//! the scheduler needs point-in-time scans rather than a work queue.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use monitor_common::contracts::{Clock, EndpointProvider};
use monitor_common::model::Endpoint;
use monitor_health::HealthHandle;

use crate::error::SchedulerError;
use crate::job::Job;
use crate::validator::validate_endpoint_config;
use crate::worker_pool::WorkerPool;

/// Recognised Scheduler configuration options (spec §4.5).
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub reconcile_interval: Duration,
    pub deactivation_threshold: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            reconcile_interval: Duration::from_secs(5 * 60),
            deactivation_threshold: 5,
        }
    }
}

/// Per-endpoint schedule state (spec §4.5).
#[derive(Debug, Clone)]
pub struct ScheduledEndpoint {
    pub endpoint: Endpoint,
    pub interval: Duration,
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub active: bool,
    pub failure_count: u32,
}

fn fresh_schedule(endpoint: Endpoint, now: DateTime<Utc>) -> ScheduledEndpoint {
    let interval = endpoint.check_interval;
    ScheduledEndpoint {
        active: endpoint.enabled,
        interval,
        next_run: now + chrono_duration(interval),
        last_run: None,
        failure_count: 0,
        endpoint,
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}

/// One entry of the `GetStatus` schedule snapshot (spec §6).
#[derive(Debug, Clone)]
pub struct ScheduleSnapshotEntry {
    pub endpoint_id: Uuid,
    pub name: String,
    pub active: bool,
    pub interval: Duration,
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub failure_count: u32,
    pub time_until_next: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleSnapshot {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub entries: Vec<ScheduleSnapshotEntry>,
}

type EndpointMap = Arc<StdMutex<HashMap<Uuid, ScheduledEndpoint>>>;

pub struct Scheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    endpoint_provider: Arc<dyn EndpointProvider>,
    worker_pool: Arc<WorkerPool>,
    health: Option<HealthHandle>,
    endpoints: EndpointMap,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        endpoint_provider: Arc<dyn EndpointProvider>,
        worker_pool: Arc<WorkerPool>,
        health: Option<HealthHandle>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            clock,
            endpoint_provider,
            worker_pool,
            health,
            endpoints: Arc::new(StdMutex::new(HashMap::new())),
            shutdown_tx,
            shutdown_rx,
            handles: StdMutex::new(Vec::new()),
        }
    }

    /// Explicit admission entry point. Always yields a fresh schedule
    /// (failure_count = 0, active = endpoint.enabled) even if an entry for
    /// this id already existed — this, together with `remove_endpoint`, is
    /// the "admin explicitly re-adds" reactivation path of spec §4.5's
    /// state machine.
    pub fn add_endpoint(&self, endpoint: Endpoint) -> Result<(), SchedulerError> {
        validate_endpoint_config(&endpoint)?;
        let now = self.clock.now();
        let mut endpoints = self.endpoints.lock().expect("endpoints mutex poisoned");
        endpoints.insert(endpoint.id, fresh_schedule(endpoint, now));
        Ok(())
    }

    /// Explicit update entry point. Updates endpoint fields in place;
    /// `next_run` is only reset when the interval changed (spec §9
    /// idempotence: "repeated UpdateEndpoint with identical fields is a
    /// no-op for next_run"). Does not touch `active`/`failure_count` — per
    /// spec §9's open question, reactivating a deactivated endpoint is the
    /// `add_endpoint` path's job, not `update_endpoint`'s.
    pub fn update_endpoint(&self, endpoint: Endpoint) -> Result<(), SchedulerError> {
        validate_endpoint_config(&endpoint)?;
        let now = self.clock.now();
        let mut endpoints = self.endpoints.lock().expect("endpoints mutex poisoned");
        upsert_merge(&mut endpoints, endpoint, now);
        Ok(())
    }

    pub fn remove_endpoint(&self, id: Uuid) {
        self.endpoints.lock().expect("endpoints mutex poisoned").remove(&id);
    }

    /// Feed a probe outcome's success/failure signal into the deactivation
    /// state machine (spec §4.5). Driven by the Engine's result-monitor,
    /// not by the tick loop itself.
    pub fn record_result(&self, endpoint_id: Uuid, success: bool) {
        let mut endpoints = self.endpoints.lock().expect("endpoints mutex poisoned");
        let Some(entry) = endpoints.get_mut(&endpoint_id) else {
            return;
        };
        if success {
            entry.failure_count = 0;
            return;
        }
        entry.failure_count += 1;
        if entry.active && entry.failure_count >= self.config.deactivation_threshold {
            entry.active = false;
            warn!(
                %endpoint_id,
                failure_count = entry.failure_count,
                "deactivating endpoint after sustained probe failures"
            );
        }
    }

    pub fn snapshot(&self) -> ScheduleSnapshot {
        let now = self.clock.now();
        let endpoints = self.endpoints.lock().expect("endpoints mutex poisoned");
        let mut entries: Vec<ScheduleSnapshotEntry> = endpoints
            .values()
            .map(|e| ScheduleSnapshotEntry {
                endpoint_id: e.endpoint.id,
                name: e.endpoint.name.clone(),
                active: e.active,
                interval: e.interval,
                next_run: e.next_run,
                last_run: e.last_run,
                failure_count: e.failure_count,
                time_until_next: (e.next_run - now).to_std().ok(),
            })
            .collect();
        entries.sort_by_key(|e| e.endpoint_id);

        ScheduleSnapshot {
            total: entries.len(),
            active: entries.iter().filter(|e| e.active).count(),
            inactive: entries.iter().filter(|e| !e.active).count(),
            entries,
        }
    }

    /// Spawn the tick loop and the reconcile loop (spec §4.5).
    pub fn start(&self) {
        let mut handles = self.handles.lock().expect("handles mutex poisoned");

        handles.push(tokio::spawn(tick_loop(
            Arc::clone(&self.endpoints),
            Arc::clone(&self.worker_pool),
            Arc::clone(&self.clock),
            self.config.tick_interval,
            self.health.clone(),
            self.shutdown_rx.clone(),
        )));

        handles.push(tokio::spawn(reconcile_loop(
            Arc::clone(&self.endpoints),
            Arc::clone(&self.endpoint_provider),
            Arc::clone(&self.clock),
            self.config.reconcile_interval,
            self.shutdown_rx.clone(),
        )));
    }

    /// Signal both loops to exit and join them (spec §4.7, §5).
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.handles.lock().expect("handles mutex poisoned"));
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "scheduler task panicked during shutdown");
            }
        }
    }
}

/// Merge a provider-supplied (or explicitly updated) endpoint into the map:
/// insert fresh if unseen, otherwise update fields and reset `next_run` only
/// if the interval changed (spec §4.5 reconcile rule; shared with
/// `update_endpoint`).
fn upsert_merge(endpoints: &mut HashMap<Uuid, ScheduledEndpoint>, endpoint: Endpoint, now: DateTime<Utc>) {
    match endpoints.get_mut(&endpoint.id) {
        Some(existing) => {
            if existing.interval != endpoint.check_interval {
                existing.next_run = now + chrono_duration(endpoint.check_interval);
                existing.interval = endpoint.check_interval;
            }
            existing.endpoint = endpoint;
        }
        None => {
            endpoints.insert(endpoint.id, fresh_schedule(endpoint, now));
        }
    }
}

async fn tick_loop(
    endpoints: EndpointMap,
    worker_pool: Arc<WorkerPool>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    health: Option<HealthHandle>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(tick_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                tick_once(&endpoints, &worker_pool, clock.now());
                if let Some(handle) = &health {
                    handle.report_healthy().await;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("scheduler tick loop exiting");
}

/// Scan all active endpoints, dispatch those due. Queue-full dispatches are
/// skipped without advancing `next_run` (spec §4.3, §4.5, §7).
fn tick_once(endpoints: &StdMutex<HashMap<Uuid, ScheduledEndpoint>>, worker_pool: &WorkerPool, now: DateTime<Utc>) {
    let mut endpoints = endpoints.lock().expect("endpoints mutex poisoned");
    for scheduled in endpoints.values_mut() {
        if !scheduled.active || scheduled.next_run > now {
            continue;
        }

        let job = Job {
            endpoint: scheduled.endpoint.clone(),
            dispatched_at: now,
        };

        match worker_pool.submit(job) {
            Ok(()) => {
                scheduled.last_run = Some(now);
                scheduled.next_run = now + chrono_duration(scheduled.interval);
            }
            Err(err) => {
                warn!(
                    endpoint = %scheduled.endpoint.name,
                    error = %err,
                    "skipping dispatch this tick, next_run not advanced"
                );
            }
        }
    }
}

async fn reconcile_loop(
    endpoints: EndpointMap,
    endpoint_provider: Arc<dyn EndpointProvider>,
    clock: Arc<dyn Clock>,
    reconcile_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(reconcile_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                reconcile_once(&endpoints, &endpoint_provider, clock.now()).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("scheduler reconcile loop exiting");
}

/// Fetch the enabled endpoint set and reconcile it with the schedule (spec
/// §4.5). A fetch error retains the previous schedule and is retried next
/// cycle (spec §7).
async fn reconcile_once(endpoints: &EndpointMap, endpoint_provider: &Arc<dyn EndpointProvider>, now: DateTime<Utc>) {
    let started = std::time::Instant::now();
    reconcile_once_inner(endpoints, endpoint_provider, now).await;
    metrics::histogram!("scheduler_reconcile_duration_seconds").record(started.elapsed().as_secs_f64());
}

async fn reconcile_once_inner(endpoints: &EndpointMap, endpoint_provider: &Arc<dyn EndpointProvider>, now: DateTime<Utc>) {
    let live = match endpoint_provider.list_enabled_endpoints().await {
        Ok(list) => list,
        Err(err) => {
            warn!(error = %err, "failed to fetch enabled endpoints, retaining previous schedule");
            return;
        }
    };

    let live_ids: HashSet<Uuid> = live.iter().map(|e| e.id).collect();
    let mut endpoints = endpoints.lock().expect("endpoints mutex poisoned");

    for endpoint in live {
        if let Err(err) = validate_endpoint_config(&endpoint) {
            warn!(endpoint = %endpoint.name, error = %err, "skipping invalid endpoint during reconcile");
            continue;
        }
        upsert_merge(&mut endpoints, endpoint, now);
    }
    endpoints.retain(|id, _| live_ids.contains(id));

    info!(endpoint_count = endpoints.len(), "scheduler reconcile complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use monitor_common::contracts::StoreError;
    use monitor_common::model::HttpMethod;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct FixedClock(AtomicI64);

    impl FixedClock {
        fn new(now: DateTime<Utc>) -> Self {
            Self(AtomicI64::new(now.timestamp()))
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp(self.0.load(Ordering::SeqCst), 0).unwrap()
        }
    }

    struct StaticProvider(StdMutex<Vec<Endpoint>>);

    #[async_trait]
    impl EndpointProvider for StaticProvider {
        async fn list_enabled_endpoints(&self) -> Result<Vec<Endpoint>, StoreError> {
            Ok(self.0.lock().expect("provider mutex poisoned").clone())
        }
    }

    fn endpoint(id: Uuid, interval_secs: u64) -> Endpoint {
        Endpoint {
            id,
            name: "svc".to_owned(),
            url: "http://example.test".to_owned(),
            method: HttpMethod::Get,
            headers: Default::default(),
            body: None,
            expected_status_code: 200,
            timeout: Duration::from_secs(5),
            check_interval: Duration::from_secs(interval_secs),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn scheduler_with(worker_pool: Arc<WorkerPool>, clock: Arc<dyn Clock>) -> Scheduler {
        Scheduler::new(
            SchedulerConfig::default(),
            clock,
            Arc::new(StaticProvider(StdMutex::new(Vec::new()))),
            worker_pool,
            None,
        )
    }

    fn pool() -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(
            crate::worker_pool::WorkerPoolConfig {
                worker_count: 0,
                job_queue_capacity: 1,
                result_queue_capacity: 1,
            },
            Arc::new(crate::prober::Prober::new(crate::prober::ProberConfig::default()).unwrap()),
            crate::validator::ValidatorConfig::default(),
            None,
        ))
    }

    #[test]
    fn repeated_update_with_identical_fields_is_a_noop_for_next_run() {
        let clock = Arc::new(FixedClock::new(Utc::now())) as Arc<dyn Clock>;
        let scheduler = scheduler_with(pool(), Arc::clone(&clock));
        let id = Uuid::new_v4();
        scheduler.add_endpoint(endpoint(id, 60)).unwrap();

        let before = scheduler.snapshot().entries[0].next_run;
        scheduler.update_endpoint(endpoint(id, 60)).unwrap();
        let after = scheduler.snapshot().entries[0].next_run;

        assert_eq!(before, after);
    }

    #[test]
    fn update_with_changed_interval_resets_next_run() {
        let clock = Arc::new(FixedClock::new(Utc::now())) as Arc<dyn Clock>;
        let scheduler = scheduler_with(pool(), Arc::clone(&clock));
        let id = Uuid::new_v4();
        scheduler.add_endpoint(endpoint(id, 60)).unwrap();

        scheduler.update_endpoint(endpoint(id, 120)).unwrap();
        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.entries[0].interval, Duration::from_secs(120));
    }

    #[test]
    fn remove_then_add_yields_a_fresh_schedule() {
        let clock = Arc::new(FixedClock::new(Utc::now())) as Arc<dyn Clock>;
        let scheduler = scheduler_with(pool(), Arc::clone(&clock));
        let id = Uuid::new_v4();
        scheduler.add_endpoint(endpoint(id, 60)).unwrap();
        for _ in 0..scheduler.config.deactivation_threshold {
            scheduler.record_result(id, false);
        }
        assert!(!scheduler.snapshot().entries[0].active);

        scheduler.remove_endpoint(id);
        scheduler.add_endpoint(endpoint(id, 60)).unwrap();

        let snapshot = scheduler.snapshot();
        assert!(snapshot.entries[0].active);
        assert_eq!(snapshot.entries[0].failure_count, 0);
    }

    #[test]
    fn sustained_failures_deactivate_the_endpoint() {
        let clock = Arc::new(FixedClock::new(Utc::now())) as Arc<dyn Clock>;
        let scheduler = scheduler_with(pool(), Arc::clone(&clock));
        let id = Uuid::new_v4();
        scheduler.add_endpoint(endpoint(id, 60)).unwrap();

        for _ in 0..4 {
            scheduler.record_result(id, false);
        }
        assert!(scheduler.snapshot().entries[0].active);

        scheduler.record_result(id, false);
        assert!(!scheduler.snapshot().entries[0].active);
    }

    #[test]
    fn success_resets_failure_count_but_not_reactivate() {
        let clock = Arc::new(FixedClock::new(Utc::now())) as Arc<dyn Clock>;
        let scheduler = scheduler_with(pool(), Arc::clone(&clock));
        let id = Uuid::new_v4();
        scheduler.add_endpoint(endpoint(id, 60)).unwrap();
        for _ in 0..5 {
            scheduler.record_result(id, false);
        }
        assert!(!scheduler.snapshot().entries[0].active);

        scheduler.record_result(id, true);
        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.entries[0].failure_count, 0);
        assert!(!snapshot.entries[0].active, "reactivation is not update/reconcile's job");
    }

    #[test]
    fn inactive_entry_survives_reconcile_even_if_still_enabled() {
        let clock = Arc::new(FixedClock::new(Utc::now())) as Arc<dyn Clock>;
        let scheduler = scheduler_with(pool(), Arc::clone(&clock));
        let id = Uuid::new_v4();
        scheduler.add_endpoint(endpoint(id, 60)).unwrap();
        for _ in 0..5 {
            scheduler.record_result(id, false);
        }
        assert!(!scheduler.snapshot().entries[0].active);

        let endpoints = scheduler.endpoints.clone();
        let provider: Arc<dyn EndpointProvider> =
            Arc::new(StaticProvider(StdMutex::new(vec![endpoint(id, 60)])));
        futures::executor::block_on(reconcile_once(&endpoints, &provider, clock.now()));

        assert!(!scheduler.snapshot().entries[0].active);
    }

    #[test]
    fn reconcile_drops_endpoints_no_longer_enabled() {
        let clock = Arc::new(FixedClock::new(Utc::now())) as Arc<dyn Clock>;
        let scheduler = scheduler_with(pool(), Arc::clone(&clock));
        let id = Uuid::new_v4();
        scheduler.add_endpoint(endpoint(id, 60)).unwrap();

        let endpoints = scheduler.endpoints.clone();
        let provider: Arc<dyn EndpointProvider> = Arc::new(StaticProvider(StdMutex::new(Vec::new())));
        futures::executor::block_on(reconcile_once(&endpoints, &provider, clock.now()));

        assert_eq!(scheduler.snapshot().total, 0);
    }

    #[tokio::test]
    async fn backpressure_skips_dispatch_without_advancing_next_run() {
        let small_pool = Arc::new(WorkerPool::new(
            crate::worker_pool::WorkerPoolConfig {
                worker_count: 0,
                job_queue_capacity: 1,
                result_queue_capacity: 1,
            },
            Arc::new(crate::prober::Prober::new(crate::prober::ProberConfig::default()).unwrap()),
            crate::validator::ValidatorConfig::default(),
            None,
        ));
        // Fill the single queue slot so every scheduler submit fails with QueueFull.
        small_pool
            .submit(Job {
                endpoint: endpoint(Uuid::new_v4(), 1),
                dispatched_at: Utc::now(),
            })
            .unwrap();

        let now = Utc::now();
        let clock = Arc::new(FixedClock::new(now)) as Arc<dyn Clock>;
        let scheduler = scheduler_with(Arc::clone(&small_pool), Arc::clone(&clock));
        let id = Uuid::new_v4();
        scheduler.add_endpoint(endpoint(id, 1)).unwrap();
        let due_at = scheduler.snapshot().entries[0].next_run;

        // Advance past the due time without touching the scheduler's own clock.
        tick_once(&scheduler.endpoints, &small_pool, due_at + chrono::Duration::seconds(1));

        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.entries[0].next_run, due_at, "next_run must not advance on queue-full");
        assert!(snapshot.entries[0].last_run.is_none());
    }
}
