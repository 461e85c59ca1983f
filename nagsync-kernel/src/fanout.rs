//! Server-to-subscriber events and the broadcast channel deltas travel on.

use crate::models::{HostDetails, ServiceKey, ServiceView};
use crate::query::FullSync;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateUpdate {
    pub host: String,
    pub service: String,
    pub data: ServiceView,
}

impl StateUpdate {
    pub fn new(view: ServiceView) -> Self {
        Self {
            host: view.service.host.clone(),
            service: view.service.service.clone(),
            data: view,
        }
    }
}

/// Wire form: `{"event": "<name>", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "full sync")]
    FullSync(FullSync),
    #[serde(rename = "priority map")]
    PriorityMap(BTreeMap<u8, &'static str>),
    #[serde(rename = "host details")]
    HostDetails(HostDetails),
    #[serde(rename = "check init")]
    CheckInit(ServiceKey),
    #[serde(rename = "state update")]
    StateUpdate(StateUpdate),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::FullSync(_) => "full sync",
            ServerEvent::PriorityMap(_) => "priority map",
            ServerEvent::HostDetails(_) => "host details",
            ServerEvent::CheckInit(_) => "check init",
            ServerEvent::StateUpdate(_) => "state update",
        }
    }
}

/// Fire-and-forget delivery to every connected subscriber.
#[derive(Clone)]
pub struct Fanout {
    tx: broadcast::Sender<ServerEvent>,
}

impl Fanout {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many subscribers the event was queued for.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        let name = event.name();
        match self.tx.send(event) {
            Ok(count) => {
                debug!(event = name, subscribers = count, "broadcast");
                count
            }
            Err(_) => {
                debug!(event = name, "broadcast with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
