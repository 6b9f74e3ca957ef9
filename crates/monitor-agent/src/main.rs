//! Thin binary wiring the monitoring core to in-memory implementations of
//! its consumed contracts (spec §1: the admin API, SQL storage, and
//! notification delivery are out of scope) and exposing `/_liveness`,
//! `/_readiness`, and `/metrics` over axum.
//!
//! Grounded on `hook-worker::main` (config load, health registration,
//! metrics router spawned alongside the main loop) and
//! `hook-janitor::main::main` (`select!` between the HTTP server and the
//! long-running task, so either exiting ends the process).

use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use chrono::Utc;
use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use futures::future::{select, Either};
use monitor_common::model::{Endpoint, HttpMethod};
use uuid::Uuid;

use monitor_core::engine::{Engine, EngineConfig};

mod config;
mod memory_store;

use config::AgentConfig;
use memory_store::InMemoryStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = AgentConfig::init_from_env().wrap_err("invalid configuration")?;
    let engine_config = EngineConfig::from(&config);

    let store = InMemoryStore::new();
    let seeded = build_seed_endpoints(&config);
    for endpoint in &seeded {
        store.put_endpoint(endpoint.clone()).await;
    }

    let engine = Arc::new(
        Engine::new(
            engine_config,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        )
        .await
        .map_err(|err| eyre::eyre!(err.to_string()))
        .wrap_err("failed to construct engine")?,
    );

    // The reconcile loop would eventually pick these up from `store` too,
    // but `add_endpoint` gets them scheduled immediately rather than after
    // the first reconcile interval (spec §4.5).
    for endpoint in seeded {
        if let Err(err) = engine.add_endpoint(endpoint) {
            tracing::warn!(error = %err, "skipping invalid seed endpoint");
        }
    }

    let health = engine.health_registry();
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || ready(health.get_status())),
        )
        .merge(monitor_common::metrics::setup_metrics_router());

    engine.start().await;

    let bind = config.bind();
    let http_server = Box::pin(monitor_common::metrics::serve(router, &bind));
    let shutdown_signal = Box::pin(tokio::signal::ctrl_c());

    match select(http_server, shutdown_signal).await {
        Either::Left((listen_result, _)) => {
            if let Err(err) = listen_result {
                tracing::error!(error = %err, "monitor-agent http server failed");
            }
        }
        Either::Right((signal_result, _)) => {
            if let Err(err) = signal_result {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown signal received");
        }
    }

    engine
        .stop(config.shutdown_deadline.0)
        .await
        .map_err(|err| eyre::eyre!(err.to_string()))
        .wrap_err("engine did not shut down cleanly")?;

    Ok(())
}

pub async fn index() -> &'static str {
    "monitoring-core agent"
}

/// Turn `MONITOR_SEED_URLS` into `Endpoint`s with GET/200/defaults so the
/// demo binary has something to probe without an admin API (spec §1).
fn build_seed_endpoints(config: &AgentConfig) -> Vec<Endpoint> {
    let now = Utc::now();
    config
        .seed_url_list()
        .into_iter()
        .map(|url| Endpoint {
            id: Uuid::new_v4(),
            name: url.clone(),
            url,
            method: HttpMethod::Get,
            headers: Default::default(),
            body: None,
            expected_status_code: 200,
            timeout: Duration::from_secs(10),
            check_interval: Duration::from_secs(60),
            enabled: true,
            created_at: now,
            updated_at: now,
        })
        .collect()
}
