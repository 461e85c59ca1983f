/**
 * NAGSYNC KERNEL - Live replica of Nagios host and service state
 *
 * ROLE: wires the MQTT bus, the engine (session tracker, event processor,
 * snapshot importer), the in-memory store and the HTTP/WebSocket surface.
 *
 * SHUTDOWN (ctrl-c): event client, control client, store, then HTTP server.
 * Subscriber sockets are not drained.
 */

mod config;
mod control;
mod engine;
mod events;
mod fanout;
mod health;
mod http;
mod importer;
mod models;
mod mqtt;
mod priority;
mod processor;
mod query;
mod session;
mod state;
mod store;
mod ws;

use crate::config::{load_config, KernelConfig};
use crate::control::MqttControl;
use crate::engine::{inbox, Engine};
use crate::fanout::Fanout;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::importer::Importer;
use crate::processor::EventProcessor;
use crate::query::QueryService;
use crate::session::SessionTracker;
use crate::state::new_state;
use crate::store::MemoryStore;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const INBOX_CAPACITY: usize = 1024;

fn init_tracing(cfg: &KernelConfig) {
    let default_level = if cfg.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let loaded = load_config().await;
    let cfg = loaded.as_ref().cloned().unwrap_or_default();
    init_tracing(&cfg);
    if let Err(e) = &loaded {
        warn!(error = %e, "using default config");
    }

    let store = MemoryStore::shared();
    let session = new_state(SessionTracker::new());
    let fanout = Fanout::new(cfg.fanout.capacity);
    let health = HealthTracker::new();

    // bus -> engine
    let (tx, rx) = inbox(INBOX_CAPACITY);
    let control_bus = mqtt::spawn_control_client(&cfg.mqtt, &cfg.topics, tx.clone(), health.clone());
    let control = MqttControl::new(control_bus.client(), cfg.topics.snapshot_request.clone(), &cfg.snapshot.request)
        .context("invalid snapshot request")?;
    let event_bus = mqtt::spawn_event_source(&cfg.mqtt, &cfg.topics, tx, health.clone());

    let processor = EventProcessor::new(store.clone(), session.clone(), Arc::new(control), fanout.clone());
    let importer = Importer::new(store.clone(), session.clone(), cfg.snapshot.min_records);
    let engine_task = Engine::new(processor, importer).spawn(rx);
    info!(events = %cfg.topics.events, broker = %cfg.mqtt.host, "waiting for the first heartbeat");

    // HTTP
    let app_state = AppState {
        session,
        query: QueryService::new(store.clone()),
        store: store.clone(),
        fanout,
        health,
    };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    info!("listening on http://{}", cfg.http.bind);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                stop_rx.await.ok();
            })
            .await
    });

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutting down");

    event_bus.close().await;
    control_bus.close().await;
    engine_task.abort();
    if let Err(e) = store.close() {
        error!(error = %e, "failed to close store");
    }
    stop_tx.send(()).ok();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "http server error"),
        Err(e) => error!(error = %e, "http server task failed"),
    }
    info!("stopped");
    Ok(())
}
