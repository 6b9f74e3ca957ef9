//! The trait-like contracts the monitoring core consumes from its
//! surrounding system (spec §6). The admin HTTP/JSON API, the SQL schema,
//! and the notification providers are external collaborators; these traits
//! are the only shape of them the core depends on.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Endpoint, EndpointIncident, Incident, IncidentTimelineEvent, MonitoringResult};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage read failed: {0}")]
    Read(String),
    #[error("storage write failed: {0}")]
    Write(String),
    #[error("no such incident: {0}")]
    NotFound(Uuid),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Source of truth for which endpoints the Scheduler should be probing.
/// Implemented by the admin collaborator (out of scope for this core).
#[async_trait]
pub trait EndpointProvider: Send + Sync {
    async fn list_enabled_endpoints(&self) -> StoreResult<Vec<Endpoint>>;
}

/// Write path for probe outcomes, and the read path the Incident Detector
/// uses to re-derive failure/success streaks.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn append_result(&self, result: MonitoringResult) -> StoreResult<()>;

    /// Results with `timestamp >= now - within`, across all endpoints.
    async fn recent_results(&self, within: Duration) -> StoreResult<Vec<MonitoringResult>>;
}

/// CRUD over Incident, EndpointIncident, and append of IncidentTimelineEvent.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn create_incident(&self, incident: Incident) -> StoreResult<()>;
    async fn get_incident(&self, id: Uuid) -> StoreResult<Incident>;
    async fn update_incident(&self, incident: Incident) -> StoreResult<()>;

    async fn create_endpoint_incident(&self, link: EndpointIncident) -> StoreResult<()>;
    /// All EndpointIncident rows associated with `incident_id`.
    async fn endpoint_incidents_for(&self, incident_id: Uuid) -> StoreResult<Vec<EndpointIncident>>;
    async fn update_endpoint_incident(&self, link: EndpointIncident) -> StoreResult<()>;

    async fn append_timeline_event(&self, event: IncidentTimelineEvent) -> StoreResult<()>;
}

/// Injectable source of the current time, so the Scheduler and Incident
/// Detector can be driven deterministically in tests (spec §9).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real, wall-clock-backed `Clock` used outside tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
