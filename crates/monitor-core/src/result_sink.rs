//! Result Sink (spec §4.4): the thin write path from a completed job to
//! storage. `WorkerPool`'s result processor constructs one `ResultSink` and
//! calls it per outcome (spec §4.3 step 4's "result processor drains...
//! and calls Result Sink"); this type exists so the write path has a name
//! and a single place to attach sink-specific logging, matching how
//! `hook-worker::worker::process_webhook_job` wraps its own database calls
//! rather than inlining them in the worker loop.
//!
//! No read path: downstream consumers (Incident Detector, status page) read
//! from storage directly (spec §4.4).

use std::sync::Arc;

use monitor_common::contracts::{ResultStore, StoreResult};
use monitor_common::model::MonitoringResult;
use tracing::warn;

pub struct ResultSink {
    store: Arc<dyn ResultStore>,
}

impl ResultSink {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    /// Persist one probe outcome. Errors are logged by the caller per spec
    /// §7 ("storage error: logged; core continues"); this just forwards the
    /// underlying result so callers can decide whether to log.
    pub async fn record(&self, result: MonitoringResult) -> StoreResult<()> {
        let endpoint_id = result.endpoint_id;
        let outcome = self.store.append_result(result).await;
        if let Err(err) = &outcome {
            warn!(%endpoint_id, error = %err, "result sink failed to persist monitoring result");
        }
        outcome
    }
}
