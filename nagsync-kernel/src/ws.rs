/**
 * SUBSCRIBER SOCKET - `GET /ws`
 *
 * Each connection gets its own broadcast receiver for deltas and may send
 * requests at any time:
 *   sync issues    -> full sync
 *   get priorities -> priority map
 *   get host <id>  -> host details (no reply when the host is unknown)
 *
 * Frames are JSON text `{"event": "<name>", "data": ...}` both ways.
 * A subscriber that falls behind the broadcast buffer skips the missed
 * deltas; a `sync issues` request brings it back in line.
 */

use crate::fanout::ServerEvent;
use crate::http::AppState;
use crate::query::QueryService;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientRequest {
    #[serde(rename = "sync issues")]
    SyncIssues,
    #[serde(rename = "get priorities")]
    GetPriorities,
    #[serde(rename = "get host")]
    GetHost(String),
}

/// Answer to a subscriber request, if there is one.
pub fn respond(query: &QueryService, request: ClientRequest) -> Option<ServerEvent> {
    match request {
        ClientRequest::SyncIssues => Some(ServerEvent::FullSync(query.full_sync())),
        ClientRequest::GetPriorities => Some(ServerEvent::PriorityMap(query.priorities())),
        ClientRequest::GetHost(host) => query.host_details(&host).map(ServerEvent::HostDetails),
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(txt) => Some(Message::Text(txt.into())),
        Err(e) => {
            warn!(event = event.name(), error = %e, "failed to encode server event");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, app: AppState) {
    let id = Uuid::new_v4();
    let mut deltas = app.fanout.subscribe();
    let (mut sender, mut receiver) = socket.split();
    info!(subscriber = %id, "subscriber connected");

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let txt = match incoming {
                    Some(Ok(Message::Text(txt))) => txt,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(subscriber = %id, error = %e, "socket read failed");
                        break;
                    }
                };
                let request = match serde_json::from_str::<ClientRequest>(txt.as_str()) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(subscriber = %id, error = %e, "ignoring subscriber frame");
                        continue;
                    }
                };
                debug!(subscriber = %id, ?request, "request");
                let Some(msg) = respond(&app.query, request).as_ref().and_then(encode) else {
                    continue;
                };
                if sender.send(msg).await.is_err() {
                    break;
                }
            }
            delta = deltas.recv() => {
                let event = match delta {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(subscriber = %id, skipped, "subscriber lagging, deltas skipped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(msg) = encode(&event) else { continue };
                if sender.send(msg).await.is_err() {
                    break;
                }
            }
        }
    }

    info!(subscriber = %id, "subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Host, Service};
    use crate::store::{EntityStore, MemoryStore};

    fn query() -> QueryService {
        let store = MemoryStore::shared();
        store
            .replace_all(
                vec![Host { host: "web01".into(), alias: Some("front".into()), ..Host::default() }],
                vec![Service { host: "web01".into(), service: "HTTP".into(), state: 2, ..Service::default() }],
            )
            .unwrap();
        QueryService::new(store)
    }

    #[test]
    fn test_parse_requests() {
        let parse = |txt: &str| serde_json::from_str::<ClientRequest>(txt);
        assert_eq!(parse(r#"{"event": "sync issues"}"#).unwrap(), ClientRequest::SyncIssues);
        assert_eq!(parse(r#"{"event": "get priorities", "data": null}"#).unwrap(), ClientRequest::GetPriorities);
        assert_eq!(
            parse(r#"{"event": "get host", "data": "web01"}"#).unwrap(),
            ClientRequest::GetHost("web01".into())
        );
        assert!(parse(r#"{"event": "get host"}"#).is_err());
        assert!(parse(r#"{"event": "delete everything"}"#).is_err());
        assert!(parse("not json").is_err());
    }

    #[test]
    fn test_respond() {
        let query = query();

        let Some(ServerEvent::FullSync(sync)) = respond(&query, ClientRequest::SyncIssues) else {
            panic!("expected full sync");
        };
        assert!(sync["web01"].contains_key("HTTP"));

        let reply = respond(&query, ClientRequest::GetPriorities).unwrap();
        assert_eq!(reply.name(), "priority map");

        let Some(ServerEvent::HostDetails(details)) = respond(&query, ClientRequest::GetHost("web01".into())) else {
            panic!("expected host details");
        };
        assert_eq!(details.data.alias.as_deref(), Some("front"));

        assert!(respond(&query, ClientRequest::GetHost("ghost".into())).is_none());
    }

    #[test]
    fn test_encoded_frame() {
        let Some(Message::Text(txt)) = encode(&ServerEvent::PriorityMap(query().priorities())) else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(txt.as_str()).unwrap();
        assert_eq!(value["event"], "priority map");
        assert_eq!(value["data"]["0"], "hard recovered");
    }
}
