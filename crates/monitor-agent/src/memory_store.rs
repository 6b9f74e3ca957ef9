//! In-memory implementations of the consumed contracts (spec §6).
//!
//! The real admin API, the SQL schema, and the notification providers are
//! explicitly out of scope (spec §1): this binary has no database to talk
//! to, so it keeps its endpoint set, result log, and incident rows in
//! memory behind the same trait boundary `monitor-core` tests already
//! exercise against their own `Mock*` stores, deliberately kept identical
//! in shape so the demo binary and the test suite drive one contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use monitor_common::contracts::{EndpointProvider, IncidentStore, ResultStore, StoreError, StoreResult};
use monitor_common::model::{Endpoint, EndpointIncident, Incident, IncidentTimelineEvent, MonitoringResult};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    endpoints: HashMap<Uuid, Endpoint>,
    results: Vec<MonitoringResult>,
    incidents: HashMap<Uuid, Incident>,
    endpoint_incidents: Vec<EndpointIncident>,
    timeline: Vec<IncidentTimelineEvent>,
}

/// A single process-local store backing all four consumed-contract traits.
/// Cloning shares the underlying state (`Arc`).
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an endpoint, as the out-of-scope admin API would after
    /// a create/update request. Used by the agent's own seeding step.
    pub async fn put_endpoint(&self, endpoint: Endpoint) {
        self.inner.lock().await.endpoints.insert(endpoint.id, endpoint);
    }

    /// Drop results older than `older_than` ago, relative to now. Not part
    /// of any consumed contract; a maintenance hook so the demo binary's
    /// result log doesn't grow without bound across a long-lived process.
    pub async fn prune_results_older_than(&self, older_than: Duration) {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
        self.inner.lock().await.results.retain(|r| r.timestamp >= cutoff);
    }
}

#[async_trait]
impl EndpointProvider for InMemoryStore {
    async fn list_enabled_endpoints(&self) -> StoreResult<Vec<Endpoint>> {
        Ok(self
            .inner
            .lock()
            .await
            .endpoints
            .values()
            .filter(|e| e.enabled)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ResultStore for InMemoryStore {
    async fn append_result(&self, result: MonitoringResult) -> StoreResult<()> {
        self.inner.lock().await.results.push(result);
        Ok(())
    }

    async fn recent_results(&self, within: Duration) -> StoreResult<Vec<MonitoringResult>> {
        let cutoff = Utc::now() - chrono::Duration::from_std(within).unwrap_or(chrono::Duration::zero());
        Ok(self
            .inner
            .lock()
            .await
            .results
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IncidentStore for InMemoryStore {
    async fn create_incident(&self, incident: Incident) -> StoreResult<()> {
        self.inner.lock().await.incidents.insert(incident.id, incident);
        Ok(())
    }

    async fn get_incident(&self, id: Uuid) -> StoreResult<Incident> {
        self.inner
            .lock()
            .await
            .incidents
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_incident(&self, incident: Incident) -> StoreResult<()> {
        self.inner.lock().await.incidents.insert(incident.id, incident);
        Ok(())
    }

    async fn create_endpoint_incident(&self, link: EndpointIncident) -> StoreResult<()> {
        self.inner.lock().await.endpoint_incidents.push(link);
        Ok(())
    }

    async fn endpoint_incidents_for(&self, incident_id: Uuid) -> StoreResult<Vec<EndpointIncident>> {
        Ok(self
            .inner
            .lock()
            .await
            .endpoint_incidents
            .iter()
            .filter(|l| l.incident_id == incident_id)
            .cloned()
            .collect())
    }

    async fn update_endpoint_incident(&self, link: EndpointIncident) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner
            .endpoint_incidents
            .iter_mut()
            .find(|l| l.endpoint_id == link.endpoint_id && l.incident_id == link.incident_id)
        {
            *existing = link;
        }
        Ok(())
    }

    async fn append_timeline_event(&self, event: IncidentTimelineEvent) -> StoreResult<()> {
        self.inner.lock().await.timeline.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_common::model::HttpMethod;

    fn endpoint(enabled: bool) -> Endpoint {
        Endpoint {
            id: Uuid::new_v4(),
            name: "demo".to_owned(),
            url: "http://example.test".to_owned(),
            method: HttpMethod::Get,
            headers: Default::default(),
            body: None,
            expected_status_code: 200,
            timeout: Duration::from_secs(5),
            check_interval: Duration::from_secs(60),
            enabled,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn list_enabled_endpoints_filters_disabled() {
        let store = InMemoryStore::new();
        store.put_endpoint(endpoint(true)).await;
        store.put_endpoint(endpoint(false)).await;

        let listed = store.list_enabled_endpoints().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].enabled);
    }

    #[tokio::test]
    async fn recent_results_excludes_results_outside_window() {
        let store = InMemoryStore::new();
        let endpoint_id = Uuid::new_v4();
        store
            .append_result(MonitoringResult {
                endpoint_id,
                timestamp: Utc::now() - chrono::Duration::hours(2),
                success: true,
                status_code: Some(200),
                response_time_ms: Some(10),
                error_message: None,
                body_sample: None,
            })
            .await
            .unwrap();
        store
            .append_result(MonitoringResult {
                endpoint_id,
                timestamp: Utc::now(),
                success: true,
                status_code: Some(200),
                response_time_ms: Some(10),
                error_message: None,
                body_sample: None,
            })
            .await
            .unwrap();

        let recent = store.recent_results(Duration::from_secs(600)).await.unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn get_incident_not_found_surfaces_store_error() {
        let store = InMemoryStore::new();
        let err = store.get_incident(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
