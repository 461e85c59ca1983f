/**
 * MQTT BUS - Event source and control channel clients
 *
 * Two connections to the broker:
 * - events:  subscribes `{topics.events}/#`, each publish becomes an engine
 *            frame whose header is the topic suffix with `/` as spaces
 * - control: publishes snapshot requests, subscribes the response topic and
 *            forwards replies to the engine
 *
 * Subscriptions are (re)issued on every ConnAck so a broker restart does not
 * silently stop the stream. Connection errors are counted in health and
 * retried by polling again after a pause.
 */

use crate::config::{MqttConf, TopicsConf};
use crate::engine::Inbound;
use crate::events::header_from_topic;
use crate::health::HealthTracker;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// A connected client plus the task polling its event loop.
pub struct BusHandle {
    name: &'static str,
    client: AsyncClient,
    task: JoinHandle<()>,
}

impl BusHandle {
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Sends DISCONNECT and stops the polling task.
    pub async fn close(self) {
        if let Err(e) = self.client.disconnect().await {
            warn!(client = self.name, error = %e, "disconnect failed");
        }
        self.task.abort();
        info!(client = self.name, "mqtt client closed");
    }
}

fn options(conf: &MqttConf, role: &str) -> MqttOptions {
    let mut opts = MqttOptions::new(format!("{}-{role}", conf.client_id), &conf.host, conf.port);
    opts.set_keep_alive(Duration::from_secs(conf.keep_alive_secs.max(5)));
    opts.set_max_packet_size(conf.max_packet_bytes, conf.max_packet_bytes);
    opts
}

/// Maps a publish on the event topics to an engine frame.
pub fn event_frame(prefix: &str, publish: &Publish) -> Option<Inbound> {
    let header = header_from_topic(prefix, &publish.topic)?;
    Some(Inbound::Event { header, payload: publish.payload.to_vec() })
}

/// Maps a publish on the response topic to a snapshot reply.
pub fn snapshot_frame(topic: &str, publish: &Publish) -> Option<Inbound> {
    (publish.topic == topic).then(|| Inbound::Snapshot(publish.payload.to_vec()))
}

pub fn spawn_event_source(
    conf: &MqttConf,
    topics: &TopicsConf,
    inbox: mpsc::Sender<Inbound>,
    health: HealthTracker,
) -> BusHandle {
    let (client, eventloop) = AsyncClient::new(options(conf, "events"), 64);
    let prefix = topics.events.trim_end_matches('/').to_string();
    let filter = format!("{prefix}/#");
    let task = spawn_listener(
        "events",
        client.clone(),
        eventloop,
        filter,
        move |p| event_frame(&prefix, p),
        inbox,
        health,
    );
    BusHandle { name: "events", client, task }
}

pub fn spawn_control_client(
    conf: &MqttConf,
    topics: &TopicsConf,
    inbox: mpsc::Sender<Inbound>,
    health: HealthTracker,
) -> BusHandle {
    let (client, eventloop) = AsyncClient::new(options(conf, "control"), 16);
    let response = topics.snapshot_response.clone();
    let task = spawn_listener(
        "control",
        client.clone(),
        eventloop,
        response.clone(),
        move |p| snapshot_frame(&response, p),
        inbox,
        health,
    );
    BusHandle { name: "control", client, task }
}

/// Hands a frame to the engine. A full inbox pauses polling of this client
/// (keepalives included) until the engine catches up: backpressure reaches
/// the broker instead of frames being dropped. Returns `false` once the
/// engine is gone.
async fn forward(name: &'static str, inbox: &mpsc::Sender<Inbound>, msg: Inbound) -> bool {
    match inbox.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(msg)) => {
            warn!(client = name, capacity = inbox.max_capacity(), "engine inbox full, mqtt polling paused");
            let delivered = inbox.send(msg).await.is_ok();
            if delivered {
                info!(client = name, "engine inbox drained, mqtt polling resumed");
            }
            delivered
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

fn spawn_listener<F>(
    name: &'static str,
    client: AsyncClient,
    mut eventloop: EventLoop,
    filter: String,
    route: F,
    inbox: mpsc::Sender<Inbound>,
    health: HealthTracker,
) -> JoinHandle<()>
where
    F: Fn(&Publish) -> Option<Inbound> + Send + 'static,
{
    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    match client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                        Ok(()) => info!(client = name, filter = %filter, "connected, subscribed"),
                        Err(e) => error!(client = name, filter = %filter, error = %e, "subscribe failed"),
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) => match route(&p) {
                    Some(msg) => {
                        if !forward(name, &inbox, msg).await {
                            info!(client = name, "engine gone, listener stopping");
                            break;
                        }
                    }
                    None => debug!(client = name, topic = %p.topic, "ignoring publish"),
                },
                Ok(Event::Incoming(Packet::Disconnect)) => health.mark_mqtt_disconnected(),
                Ok(_) => {}
                Err(e) => {
                    warn!(client = name, error = %e, "mqtt connection error");
                    health.increment_reconnects();
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    })
}
