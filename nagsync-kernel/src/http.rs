/**
 * HTTP SURFACE - REST queries and the subscriber socket
 *
 * ROUTES:
 * - GET /health                 liveness, plain "ok"
 * - GET /system/health          kernel health (session, store counts, MQTT, subscribers)
 * - GET /issues                 problem services grouped by host
 * - GET /priorities             priority code -> label
 * - GET /hosts/{id}             host details, 404 when unknown
 * - GET /hosts/{id}/services    every service of a host, priority attached
 * - GET /ws                     subscriber socket (see ws.rs)
 *
 * Read-only: the replica is only ever written by the engine task.
 */

use crate::fanout::Fanout;
use crate::health::{HealthTracker, KernelHealth};
use crate::models::{HostDetails, ServiceView};
use crate::query::{FullSync, QueryService};
use crate::state::SharedSession;
use crate::store::SharedStore;
use crate::ws::ws_handler;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use std::collections::BTreeMap;

#[derive(Clone)]
pub struct AppState {
    pub session: SharedSession,
    pub store: SharedStore,
    pub query: QueryService,
    pub fanout: Fanout,
    pub health: HealthTracker,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/issues", get(get_issues))
        .route("/priorities", get(get_priorities))
        .route("/hosts/{id}", get(get_host))
        .route("/hosts/{id}/services", get(get_host_services))
        .route("/ws", get(ws_handler))
        .with_state(app_state)
}

async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(&app.session, &app.store, &app.fanout))
}

async fn get_issues(State(app): State<AppState>) -> Json<FullSync> {
    Json(app.query.full_sync())
}

async fn get_priorities(State(app): State<AppState>) -> Json<BTreeMap<u8, &'static str>> {
    Json(app.query.priorities())
}

async fn get_host(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<HostDetails>, StatusCode> {
    app.query.host_details(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn get_host_services(State(app): State<AppState>, Path(id): Path<String>) -> Json<Vec<ServiceView>> {
    Json(app.query.host_services(&id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Host, Service};
    use crate::priority::Priority;
    use crate::session::SessionTracker;
    use crate::state::new_state;
    use crate::store::{EntityStore, MemoryStore};

    fn app_state() -> AppState {
        let store = MemoryStore::shared();
        store
            .replace_all(
                vec![Host { host: "web01".into(), address: Some("10.0.0.1".into()), ..Host::default() }],
                vec![
                    Service { host: "web01".into(), service: "DOWN".into(), ..Service::default() },
                    Service { host: "web01".into(), service: "HTTP".into(), state: 1, current_attempt: 3, max_attempts: 3, ..Service::default() },
                ],
            )
            .unwrap();
        AppState {
            session: new_state(SessionTracker::new()),
            query: QueryService::new(store.clone()),
            store,
            fanout: Fanout::new(8),
            health: HealthTracker::new(),
        }
    }

    #[tokio::test]
    async fn test_get_host_found_and_missing() {
        let app = app_state();
        let Json(details) = get_host(State(app.clone()), Path("web01".into())).await.unwrap();
        assert_eq!(details.data.address.as_deref(), Some("10.0.0.1"));

        let missing = get_host(State(app), Path("ghost".into())).await;
        assert_eq!(missing.unwrap_err(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_issues_and_services() {
        let app = app_state();
        let Json(issues) = get_issues(State(app.clone())).await;
        assert_eq!(issues["web01"]["HTTP"].priority, Some(Priority::HardWarning));
        assert!(!issues["web01"].contains_key("DOWN"));

        let Json(services) = get_host_services(State(app.clone()), Path("web01".into())).await;
        assert_eq!(services.len(), 2);

        let Json(health) = get_system_health(State(app)).await;
        assert_eq!(health.hosts_tracked, 1);
        assert_eq!(health.problems, 1);
    }

    #[test]
    fn test_router_builds() {
        let _router = build_router(app_state());
    }
}
