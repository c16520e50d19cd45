use crate::config::MqttConf;
use crate::error::BusError;
use crate::health::HealthTracker;
use crate::topics::Topics;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info};

/// Publish/subscribe surface the bridge needs from a bus connection.
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BusError>;
    async fn subscribe(&self, filter: &str) -> Result<(), BusError>;
    async fn disconnect(&self) -> Result<(), BusError>;
}

pub type SharedBus = Arc<dyn BusClient>;

#[async_trait]
impl BusClient for AsyncClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BusError> {
        AsyncClient::publish(self, topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, filter: &str) -> Result<(), BusError> {
        AsyncClient::subscribe(self, filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| BusError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        AsyncClient::disconnect(self)
            .await
            .map_err(|e| BusError::Disconnect(e.to_string()))
    }
}

/// What the event loop hands to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// ConnAck received: subscriptions and discovery must be (re)issued
    Connected,
    Message { topic: String, payload: Vec<u8> },
}

/// Client + event loop with the `offline` last-will on the bridge status topic.
pub fn create_mqtt_client(conf: &MqttConf) -> (AsyncClient, EventLoop) {
    let topics = Topics::new(&conf.topic_prefix, &conf.discovery_prefix);

    let mut opts = MqttOptions::new(&conf.client_id, &conf.host, conf.port);
    opts.set_keep_alive(Duration::from_secs(conf.keep_alive_secs.max(5)));
    opts.set_last_will(LastWill::new(topics.bridge_status(), "offline", QoS::AtLeastOnce, true));
    if let Some(user) = &conf.username {
        opts.set_credentials(user, conf.password.clone().unwrap_or_default());
    }

    info!("MQTT broker {}:{} as {}", conf.host, conf.port, conf.client_id);
    AsyncClient::new(opts, 64)
}

/// Drives the connection until the client disconnects. rumqttc reconnects on
/// the next poll after an error, so errors only pause the loop.
pub fn spawn_event_loop(
    mut eventloop: EventLoop,
    events: mpsc::Sender<BusEvent>,
    health: HealthTracker,
) -> JoinHandle<()> {
    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    info!("connected to MQTT broker ({:?})", ack.code);
                    health.mark_bus_connected();
                    let _ = events.send(BusEvent::Connected).await;
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    debug!("<- {} ({} bytes)", p.topic, p.payload.len());
                    let _ = events
                        .send(BusEvent::Message {
                            topic: p.topic,
                            payload: p.payload.to_vec(),
                        })
                        .await;
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    health.mark_bus_disconnected();
                    info!("MQTT disconnected");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT error: {}", e);
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}

#[cfg(test)]
#[async_trait]
impl BusClient for pdu_bridge_devkit::MockMqttClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BusError> {
        pdu_bridge_devkit::MockMqttClient::publish(self, topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, filter: &str) -> Result<(), BusError> {
        pdu_bridge_devkit::MockMqttClient::subscribe(self, filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| BusError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        pdu_bridge_devkit::MockMqttClient::disconnect(self)
            .await
            .map_err(|e| BusError::Disconnect(e.to_string()))
    }
}
