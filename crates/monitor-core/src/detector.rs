//! Incident Detector (spec §4.6): per-endpoint failure/recovery tracking,
//! incident open/resolve, timeline authoring.
//!
//! Grounded on `hook-janitor::main::cleanup_loop`'s interval-loop shape; the
//! per-endpoint state machine is a direct port of spec §4.6's algorithm onto
//! [`monitor_common::model::FailureTracker`]. `EndpointProvider` is consumed
//! in addition to the literal §6 contract list (`ResultStore`,
//! `IncidentStore`, `Clock`) solely to resolve an endpoint's display name for
//! incident titles — see the design ledger for the reasoning.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::watch;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use monitor_common::contracts::{Clock, EndpointProvider, IncidentStore, ResultStore};
use monitor_common::model::{
    EndpointIncident, FailureTracker, Incident, IncidentSeverity, IncidentStatus, IncidentTimelineEvent,
    MonitoringResult, TimelineEventType,
};
use monitor_health::HealthHandle;

use crate::error::DetectorError;

/// Recognised Incident Detector configuration options (spec §4.6).
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub check_interval: Duration,
    pub consecutive_failures_threshold: u32,
    pub failure_window: Duration,
    pub recovery_threshold: u32,
    pub auto_resolve: bool,
    pub critical_latency_ms: u64,
    pub high_latency_ms: u64,
    pub medium_latency_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            consecutive_failures_threshold: 3,
            failure_window: Duration::from_secs(10 * 60),
            recovery_threshold: 2,
            auto_resolve: true,
            critical_latency_ms: 5_000,
            high_latency_ms: 2_000,
            medium_latency_ms: 1_000,
        }
    }
}

struct DetectorState {
    trackers: HashMap<Uuid, FailureTracker>,
    active_incidents: HashMap<Uuid, Uuid>,
    /// Timestamp of the newest result already folded into each endpoint's
    /// tracker. Without this, re-fetching the same rolling window every
    /// cycle (step 1 of spec §4.6) would re-fold already-seen results onto
    /// the persisted `FailureTracker`, inflating its streak counters beyond
    /// the number of genuinely distinct probes. Mirrors the watermark
    /// `engine::result_monitor_loop` already uses for the same reason.
    last_seen: HashMap<Uuid, DateTime<Utc>>,
}

pub struct IncidentDetector {
    config: DetectorConfig,
    clock: Arc<dyn Clock>,
    result_store: Arc<dyn ResultStore>,
    incident_store: Arc<dyn IncidentStore>,
    endpoint_provider: Arc<dyn EndpointProvider>,
    health: Option<HealthHandle>,
    state: Arc<AsyncMutex<DetectorState>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl IncidentDetector {
    pub fn new(
        config: DetectorConfig,
        clock: Arc<dyn Clock>,
        result_store: Arc<dyn ResultStore>,
        incident_store: Arc<dyn IncidentStore>,
        endpoint_provider: Arc<dyn EndpointProvider>,
        health: Option<HealthHandle>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            clock,
            result_store,
            incident_store,
            endpoint_provider,
            health,
            state: Arc::new(AsyncMutex::new(DetectorState {
                trackers: HashMap::new(),
                active_incidents: HashMap::new(),
                last_seen: HashMap::new(),
            })),
            shutdown_tx,
            shutdown_rx,
            handle: std::sync::Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut handle = self.handle.lock().expect("detector handle mutex poisoned");
        *handle = Some(tokio::spawn(run_loop(
            self.config,
            Arc::clone(&self.clock),
            Arc::clone(&self.result_store),
            Arc::clone(&self.incident_store),
            Arc::clone(&self.endpoint_provider),
            Arc::clone(&self.state),
            self.health.clone(),
            self.shutdown_rx.clone(),
        )));
    }

    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().expect("detector handle mutex poisoned").take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "detector task panicked during shutdown");
            }
        }
    }
}

async fn run_loop(
    config: DetectorConfig,
    clock: Arc<dyn Clock>,
    result_store: Arc<dyn ResultStore>,
    incident_store: Arc<dyn IncidentStore>,
    endpoint_provider: Arc<dyn EndpointProvider>,
    state: Arc<AsyncMutex<DetectorState>>,
    health: Option<HealthHandle>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(config.check_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = run_cycle(
                    &config,
                    clock.as_ref(),
                    result_store.as_ref(),
                    incident_store.as_ref(),
                    endpoint_provider.as_ref(),
                    &state,
                ).await {
                    warn!(error = %err, "detector cycle failed, retrying next interval");
                }
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
    debug!("incident detector loop exiting");
}

/// Run one detection cycle (spec §4.6 steps 1-6).
async fn run_cycle(
    config: &DetectorConfig,
    clock: &dyn Clock,
    result_store: &dyn ResultStore,
    incident_store: &dyn IncidentStore,
    endpoint_provider: &dyn EndpointProvider,
    state: &Arc<AsyncMutex<DetectorState>>,
) -> Result<(), DetectorError> {
    let now = clock.now();
    let results = result_store.recent_results(config.failure_window).await?;

    let mut by_endpoint: HashMap<Uuid, Vec<MonitoringResult>> = HashMap::new();
    for result in results {
        by_endpoint.entry(result.endpoint_id).or_default().push(result);
    }
    for results in by_endpoint.values_mut() {
        results.sort_by_key(|r| r.timestamp);
    }

    // Decide actions with the state lock held only across the synchronous
    // tracker update, then perform the (async, I/O-bound) store calls after
    // releasing it — holding a lock across the whole cycle's awaits would
    // block `record_result` readers from status queries for no reason.
    let mut to_open = Vec::new();
    let mut to_resolve = Vec::new();
    {
        let mut state = state.lock().await;
        for (endpoint_id, results) in &by_endpoint {
            // Only fold results newer than the last-seen watermark: the
            // window fetched above overlaps the previous cycle's window, and
            // folding the same result twice would double-count it onto the
            // persisted tracker (see `DetectorState::last_seen`).
            let watermark = state.last_seen.get(endpoint_id).copied();
            let new_results: Vec<&MonitoringResult> = results
                .iter()
                .filter(|r| watermark.map_or(true, |w| r.timestamp > w))
                .collect();

            let tracker = state.trackers.entry(*endpoint_id).or_default();
            for result in &new_results {
                if result.success {
                    tracker.record_success(result.timestamp);
                } else {
                    tracker.record_failure(result.timestamp);
                }
            }
            tracker.prune(now, config.failure_window);
            let consecutive_failures = tracker.consecutive_failures;
            let consecutive_successes = tracker.consecutive_successes;

            if let Some(latest) = results.last() {
                state.last_seen.insert(*endpoint_id, latest.timestamp);
            }

            let has_active = state.active_incidents.contains_key(endpoint_id);
            if consecutive_failures >= config.consecutive_failures_threshold && !has_active {
                to_open.push(*endpoint_id);
            } else if config.auto_resolve
                && consecutive_successes >= config.recovery_threshold
                && has_active
            {
                to_resolve.push((*endpoint_id, state.active_incidents[endpoint_id]));
            }
        }
    }

    for endpoint_id in to_open {
        let name = endpoint_name(endpoint_provider, endpoint_id).await;
        let tracker_snapshot = {
            let state = state.lock().await;
            state.trackers.get(&endpoint_id).cloned()
        };
        let Some(tracker) = tracker_snapshot else { continue };
        let recent = by_endpoint.get(&endpoint_id).cloned().unwrap_or_default();

        match open_incident(config, incident_store, endpoint_id, &name, &tracker, &recent, now).await {
            Ok(incident_id) => {
                let mut state = state.lock().await;
                state.active_incidents.insert(endpoint_id, incident_id);
            }
            Err(err) => {
                warn!(%endpoint_id, error = %err, "failed to open incident for endpoint");
            }
        }
    }

    for (endpoint_id, incident_id) in to_resolve {
        let tracker_snapshot = {
            let state = state.lock().await;
            state.trackers.get(&endpoint_id).cloned()
        };
        let consecutive_successes = tracker_snapshot.map(|t| t.consecutive_successes).unwrap_or_default();

        match resolve_incident(incident_store, incident_id, consecutive_successes, now).await {
            Ok(()) => {
                let mut state = state.lock().await;
                state.active_incidents.remove(&endpoint_id);
            }
            Err(err) => {
                warn!(%endpoint_id, %incident_id, error = %err, "failed to resolve incident for endpoint");
            }
        }
    }

    Ok(())
}

async fn endpoint_name(endpoint_provider: &dyn EndpointProvider, endpoint_id: Uuid) -> String {
    match endpoint_provider.list_enabled_endpoints().await {
        Ok(endpoints) => endpoints
            .into_iter()
            .find(|e| e.id == endpoint_id)
            .map(|e| e.name)
            .unwrap_or_else(|| endpoint_id.to_string()),
        Err(_) => endpoint_id.to_string(),
    }
}

/// determineSeverity (spec §4.6): timeout/connection keywords win outright,
/// otherwise mean observed latency against the configured cutoffs.
fn determine_severity(config: &DetectorConfig, recent: &[MonitoringResult]) -> IncidentSeverity {
    let has_timeout_or_connection_error = recent.iter().any(|r| {
        r.error_message
            .as_deref()
            .map(|msg| {
                let lower = msg.to_ascii_lowercase();
                lower.contains("timeout") || lower.contains("connection")
            })
            .unwrap_or(false)
    });
    if has_timeout_or_connection_error {
        return IncidentSeverity::Critical;
    }

    let latencies: Vec<u64> = recent.iter().filter_map(|r| r.response_time_ms).collect();
    if latencies.is_empty() {
        return IncidentSeverity::Low;
    }
    let mean = latencies.iter().sum::<u64>() as f64 / latencies.len() as f64;

    if mean >= config.critical_latency_ms as f64 {
        IncidentSeverity::Critical
    } else if mean >= config.high_latency_ms as f64 {
        IncidentSeverity::High
    } else if mean >= config.medium_latency_ms as f64 {
        IncidentSeverity::Medium
    } else {
        IncidentSeverity::Low
    }
}

async fn open_incident(
    config: &DetectorConfig,
    incident_store: &dyn IncidentStore,
    endpoint_id: Uuid,
    endpoint_name: &str,
    tracker: &FailureTracker,
    recent: &[MonitoringResult],
    now: DateTime<Utc>,
) -> Result<Uuid, DetectorError> {
    let severity = determine_severity(config, recent);
    let last_failure_time = tracker.last_failure_time.unwrap_or(now);
    let incident_id = Uuid::new_v4();

    let incident = Incident {
        id: incident_id,
        title: format!("Endpoint {endpoint_name} is failing"),
        description: format!(
            "{} consecutive failures detected, last failure at {}",
            tracker.consecutive_failures,
            last_failure_time.to_rfc3339()
        ),
        severity,
        status: IncidentStatus::Investigating,
        start_time: last_failure_time,
        end_time: None,
        creator: None,
    };
    incident_store.create_incident(incident).await?;

    // Timeline authoring is best-effort (spec §4.6 "failure semantics"): its
    // absence must not block the status transition already persisted above.
    let created_event = IncidentTimelineEvent {
        incident_id,
        user_id: None,
        event_type: TimelineEventType::Created,
        old_value: None,
        new_value: None,
        message: Some("Incident automatically created by monitoring system".to_owned()),
        metadata: HashMap::from([
            ("endpoint_id".to_owned(), json!(endpoint_id)),
            ("endpoint_name".to_owned(), json!(endpoint_name)),
            ("consecutive_failures".to_owned(), json!(tracker.consecutive_failures)),
            ("detection_trigger".to_owned(), json!("automatic")),
            ("severity".to_owned(), json!(severity)),
        ]),
        created_at: now,
    };
    if let Err(err) = incident_store.append_timeline_event(created_event).await {
        warn!(%incident_id, error = %err, "failed to append 'created' timeline event");
    }

    let link = EndpointIncident {
        endpoint_id,
        incident_id,
        affected_start: last_failure_time,
        affected_end: None,
    };
    if let Err(err) = incident_store.create_endpoint_incident(link).await {
        warn!(%incident_id, %endpoint_id, error = %err, "failed to link endpoint to incident");
    }

    let associated_event = IncidentTimelineEvent {
        incident_id,
        user_id: None,
        event_type: TimelineEventType::EndpointAssociated,
        old_value: None,
        new_value: None,
        message: None,
        metadata: HashMap::from([("automatic".to_owned(), json!(true))]),
        created_at: now,
    };
    if let Err(err) = incident_store.append_timeline_event(associated_event).await {
        warn!(%incident_id, error = %err, "failed to append 'endpoint_associated' timeline event");
    }

    metrics::counter!("incidents_opened_total").increment(1);
    info!(%incident_id, %endpoint_id, ?severity, "opened incident");
    Ok(incident_id)
}

async fn resolve_incident(
    incident_store: &dyn IncidentStore,
    incident_id: Uuid,
    consecutive_successes: u32,
    now: DateTime<Utc>,
) -> Result<(), DetectorError> {
    let mut incident = incident_store.get_incident(incident_id).await?;
    if incident.status.is_terminal() {
        return Ok(());
    }

    incident.status = IncidentStatus::Resolved;
    incident.end_time = Some(now);
    incident_store.update_incident(incident).await?;
    metrics::counter!("incidents_resolved_total").increment(1);

    let event = IncidentTimelineEvent {
        incident_id,
        user_id: None,
        event_type: TimelineEventType::Resolved,
        old_value: None,
        new_value: None,
        message: Some("Incident automatically resolved by monitoring system".to_owned()),
        metadata: HashMap::from([
            ("consecutive_successes".to_owned(), json!(consecutive_successes)),
            ("resolution_trigger".to_owned(), json!("automatic")),
        ]),
        created_at: now,
    };
    if let Err(err) = incident_store.append_timeline_event(event).await {
        warn!(%incident_id, error = %err, "failed to append 'resolved' timeline event");
    }

    for mut link in incident_store.endpoint_incidents_for(incident_id).await? {
        if link.affected_end.is_none() {
            link.affected_end = Some(now);
            if let Err(err) = incident_store.update_endpoint_incident(link).await {
                warn!(%incident_id, error = %err, "failed to close endpoint-incident window");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use monitor_common::contracts::StoreError;
    use monitor_common::model::{Endpoint, HttpMethod};
    use std::sync::Mutex as StdMutex;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    struct InMemoryResults(StdMutex<Vec<MonitoringResult>>);

    #[async_trait]
    impl ResultStore for InMemoryResults {
        async fn append_result(&self, result: MonitoringResult) -> Result<(), StoreError> {
            self.0.lock().expect("poisoned").push(result);
            Ok(())
        }

        async fn recent_results(&self, _within: Duration) -> Result<Vec<MonitoringResult>, StoreError> {
            Ok(self.0.lock().expect("poisoned").clone())
        }
    }

    #[derive(Default)]
    struct InMemoryIncidents {
        incidents: StdMutex<HashMap<Uuid, Incident>>,
        links: StdMutex<Vec<EndpointIncident>>,
        events: StdMutex<Vec<IncidentTimelineEvent>>,
    }

    #[async_trait]
    impl IncidentStore for InMemoryIncidents {
        async fn create_incident(&self, incident: Incident) -> Result<(), StoreError> {
            self.incidents.lock().expect("poisoned").insert(incident.id, incident);
            Ok(())
        }

        async fn get_incident(&self, id: Uuid) -> Result<Incident, StoreError> {
            self.incidents
                .lock()
                .expect("poisoned")
                .get(&id)
                .cloned()
                .ok_or(StoreError::NotFound(id))
        }

        async fn update_incident(&self, incident: Incident) -> Result<(), StoreError> {
            self.incidents.lock().expect("poisoned").insert(incident.id, incident);
            Ok(())
        }

        async fn create_endpoint_incident(&self, link: EndpointIncident) -> Result<(), StoreError> {
            self.links.lock().expect("poisoned").push(link);
            Ok(())
        }

        async fn endpoint_incidents_for(&self, incident_id: Uuid) -> Result<Vec<EndpointIncident>, StoreError> {
            Ok(self
                .links
                .lock()
                .expect("poisoned")
                .iter()
                .filter(|l| l.incident_id == incident_id)
                .cloned()
                .collect())
        }

        async fn update_endpoint_incident(&self, link: EndpointIncident) -> Result<(), StoreError> {
            let mut links = self.links.lock().expect("poisoned");
            if let Some(existing) = links
                .iter_mut()
                .find(|l| l.endpoint_id == link.endpoint_id && l.incident_id == link.incident_id)
            {
                *existing = link;
            }
            Ok(())
        }

        async fn append_timeline_event(&self, event: IncidentTimelineEvent) -> Result<(), StoreError> {
            self.events.lock().expect("poisoned").push(event);
            Ok(())
        }
    }

    struct StaticProvider(Vec<Endpoint>);

    #[async_trait]
    impl EndpointProvider for StaticProvider {
        async fn list_enabled_endpoints(&self) -> Result<Vec<Endpoint>, StoreError> {
            Ok(self.0.clone())
        }
    }

    fn endpoint(id: Uuid) -> Endpoint {
        Endpoint {
            id,
            name: "svc".to_owned(),
            url: "http://example.test".to_owned(),
            method: HttpMethod::Get,
            headers: Default::default(),
            body: None,
            expected_status_code: 200,
            timeout: Duration::from_secs(5),
            check_interval: Duration::from_secs(60),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn result(endpoint_id: Uuid, timestamp: DateTime<Utc>, success: bool, error: Option<&str>) -> MonitoringResult {
        MonitoringResult {
            endpoint_id,
            timestamp,
            success,
            status_code: if success { Some(200) } else { Some(500) },
            response_time_ms: Some(42),
            error_message: error.map(|s| s.to_owned()),
            body_sample: None,
        }
    }

    #[tokio::test]
    async fn three_consecutive_failures_open_exactly_one_incident() {
        let now = Utc::now();
        let endpoint_id = Uuid::new_v4();
        let results = InMemoryResults(StdMutex::new(vec![
            result(endpoint_id, now - chrono::Duration::seconds(3), false, None),
            result(endpoint_id, now - chrono::Duration::seconds(2), false, None),
            result(endpoint_id, now - chrono::Duration::seconds(1), false, None),
        ]));
        let incidents = InMemoryIncidents::default();
        let state = Arc::new(AsyncMutex::new(DetectorState {
            trackers: HashMap::new(),
            active_incidents: HashMap::new(),
            last_seen: HashMap::new(),
        }));
        let provider = StaticProvider(vec![endpoint(endpoint_id)]);
        let config = DetectorConfig {
            consecutive_failures_threshold: 3,
            ..Default::default()
        };
        let clock = FixedClock(now);

        run_cycle(&config, &clock, &results, &incidents, &provider, &state)
            .await
            .unwrap();

        assert_eq!(incidents.incidents.lock().unwrap().len(), 1);
        let incident = incidents.incidents.lock().unwrap().values().next().cloned().unwrap();
        assert_eq!(incident.status, IncidentStatus::Investigating);
        assert_eq!(incident.title, "Endpoint svc is failing");
        assert_eq!(incidents.links.lock().unwrap().len(), 1);

        // A second cycle over the same results must not open a duplicate.
        run_cycle(&config, &clock, &results, &incidents, &provider, &state)
            .await
            .unwrap();
        assert_eq!(incidents.incidents.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn overlapping_window_fetches_do_not_double_count_failures() {
        // Each cycle re-fetches the whole rolling window, so a result already
        // folded into the tracker on a previous cycle reappears in the next
        // cycle's fetch. Without the `last_seen` watermark this test would
        // open an incident after only two distinct failures.
        let now = Utc::now();
        let endpoint_id = Uuid::new_v4();
        let incidents = InMemoryIncidents::default();
        let state = Arc::new(AsyncMutex::new(DetectorState {
            trackers: HashMap::new(),
            active_incidents: HashMap::new(),
            last_seen: HashMap::new(),
        }));
        let provider = StaticProvider(vec![endpoint(endpoint_id)]);
        let config = DetectorConfig {
            consecutive_failures_threshold: 3,
            ..Default::default()
        };
        let clock = FixedClock(now);

        let f1 = result(endpoint_id, now - chrono::Duration::seconds(3), false, None);
        let f2 = result(endpoint_id, now - chrono::Duration::seconds(2), false, None);
        let f3 = result(endpoint_id, now - chrono::Duration::seconds(1), false, None);

        // Cycle 1: only F1 has happened so far.
        let cycle1 = InMemoryResults(StdMutex::new(vec![f1.clone()]));
        run_cycle(&config, &clock, &cycle1, &incidents, &provider, &state)
            .await
            .unwrap();
        assert_eq!(incidents.incidents.lock().unwrap().len(), 0);

        // Cycle 2: the window overlaps and re-returns F1 alongside the new F2.
        let cycle2 = InMemoryResults(StdMutex::new(vec![f1.clone(), f2.clone()]));
        run_cycle(&config, &clock, &cycle2, &incidents, &provider, &state)
            .await
            .unwrap();
        assert_eq!(
            incidents.incidents.lock().unwrap().len(),
            0,
            "re-fetching F1 must not inflate the streak to the threshold early"
        );

        // Cycle 3: the window slides forward again with the third distinct failure.
        let cycle3 = InMemoryResults(StdMutex::new(vec![f2.clone(), f3.clone()]));
        run_cycle(&config, &clock, &cycle3, &incidents, &provider, &state)
            .await
            .unwrap();
        assert_eq!(incidents.incidents.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn timeout_error_forces_critical_severity() {
        let now = Utc::now();
        let endpoint_id = Uuid::new_v4();
        let results = InMemoryResults(StdMutex::new(vec![
            result(endpoint_id, now - chrono::Duration::seconds(3), false, Some("context deadline exceeded: timeout")),
            result(endpoint_id, now - chrono::Duration::seconds(2), false, Some("context deadline exceeded: timeout")),
            result(endpoint_id, now - chrono::Duration::seconds(1), false, Some("context deadline exceeded: timeout")),
        ]));
        let incidents = InMemoryIncidents::default();
        let state = Arc::new(AsyncMutex::new(DetectorState {
            trackers: HashMap::new(),
            active_incidents: HashMap::new(),
            last_seen: HashMap::new(),
        }));
        let provider = StaticProvider(vec![endpoint(endpoint_id)]);
        let config = DetectorConfig::default();
        let clock = FixedClock(now);

        run_cycle(&config, &clock, &results, &incidents, &provider, &state)
            .await
            .unwrap();

        let incident = incidents.incidents.lock().unwrap().values().next().cloned().unwrap();
        assert_eq!(incident.severity, IncidentSeverity::Critical);
    }

    #[tokio::test]
    async fn recovery_resolves_open_incident_and_closes_links() {
        let now = Utc::now();
        let endpoint_id = Uuid::new_v4();
        let incidents = InMemoryIncidents::default();
        let state = Arc::new(AsyncMutex::new(DetectorState {
            trackers: HashMap::new(),
            active_incidents: HashMap::new(),
            last_seen: HashMap::new(),
        }));
        let provider = StaticProvider(vec![endpoint(endpoint_id)]);
        let config = DetectorConfig {
            consecutive_failures_threshold: 2,
            recovery_threshold: 2,
            ..Default::default()
        };
        let clock = FixedClock(now);

        let failing = InMemoryResults(StdMutex::new(vec![
            result(endpoint_id, now - chrono::Duration::seconds(4), false, None),
            result(endpoint_id, now - chrono::Duration::seconds(3), false, None),
        ]));
        run_cycle(&config, &clock, &failing, &incidents, &provider, &state)
            .await
            .unwrap();
        assert_eq!(incidents.incidents.lock().unwrap().len(), 1);

        let recovering = InMemoryResults(StdMutex::new(vec![
            result(endpoint_id, now - chrono::Duration::seconds(2), true, None),
            result(endpoint_id, now - chrono::Duration::seconds(1), true, None),
        ]));
        run_cycle(&config, &clock, &recovering, &incidents, &provider, &state)
            .await
            .unwrap();

        let incident = incidents.incidents.lock().unwrap().values().next().cloned().unwrap();
        assert_eq!(incident.status, IncidentStatus::Resolved);
        assert!(incident.end_time.is_some());
        let links = incidents.links.lock().unwrap();
        assert!(links.iter().all(|l| l.affected_end.is_some()));
    }
}
