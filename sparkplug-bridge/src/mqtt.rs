use crate::bridge::TransportEvent;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::health::HealthTracker;
use crate::session::CommandPublisher;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info};

/// Commandes Sparkplug : QoS 0, jamais retenues
impl CommandPublisher for AsyncClient {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        AsyncClient::subscribe(self, topic, QoS::AtMostOnce)
            .await
            .map_err(|e| BridgeError::Subscribe { topic: topic.to_string(), reason: e.to_string() })
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        AsyncClient::publish(self, topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| BridgeError::Publish { topic: topic.to_string(), reason: e.to_string() })
    }
}

pub fn mqtt_options(cfg: &BridgeConfig) -> MqttOptions {
    let mut opts = MqttOptions::new(&cfg.mqtt.client_id, &cfg.mqtt.host, cfg.mqtt.port);
    opts.set_keep_alive(Duration::from_secs(cfg.mqtt.keep_alive_secs.max(5)));
    opts.set_clean_session(true);
    // payloads Sparkplug avec templates : plus gros que la limite par défaut
    opts.set_max_packet_size(1024 * 1024, 1024 * 1024);
    if let Some(username) = &cfg.mqtt.username {
        opts.set_credentials(username, cfg.mqtt.password.clone().unwrap_or_default());
    }
    opts
}

pub fn create_mqtt_client(cfg: &BridgeConfig) -> (AsyncClient, EventLoop) {
    AsyncClient::new(mqtt_options(cfg), 64)
}

/// Pompe l'event loop rumqttc et publie des TransportEvent typés.
/// rumqttc se reconnecte au poll suivant une erreur.
pub fn spawn_transport(
    mut eventloop: EventLoop,
    events: mpsc::Sender<TransportEvent>,
    health: HealthTracker,
    reconnect_delay: Duration,
) -> JoinHandle<()> {
    task::spawn(async move {
        let mut connected = false;

        loop {
            let event = match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    info!(code = ?ack.code, "MQTT connected");
                    connected = true;
                    Some(TransportEvent::Connected)
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    debug!(topic = %p.topic, bytes = p.payload.len(), "MQTT message");
                    Some(TransportEvent::Message { topic: p.topic, payload: p.payload })
                }
                Ok(_) => None,
                Err(e) => {
                    let err = BridgeError::Connect(e.to_string());
                    error!(error = %err, "MQTT error");
                    health.increment_reconnects();
                    let lost = std::mem::take(&mut connected);
                    if lost {
                        if events.send(TransportEvent::Disconnected { reason: e.to_string() }).await.is_err() {
                            break;
                        }
                    }
                    tokio::time::sleep(reconnect_delay).await;
                    None
                }
            };

            if let Some(event) = event {
                if events.send(event).await.is_err() {
                    info!("ingestion loop gone, stopping MQTT transport");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mqtt_options_from_config() {
        let mut cfg = BridgeConfig::default();
        cfg.mqtt.host = "broker.local".into();
        cfg.mqtt.port = 1884;
        cfg.mqtt.client_id = "bridge-test".into();
        cfg.mqtt.keep_alive_secs = 30;
        cfg.mqtt.username = Some("user".into());
        cfg.mqtt.password = Some("secret".into());

        let opts = mqtt_options(&cfg);
        assert_eq!(opts.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(opts.client_id(), "bridge-test");
        assert_eq!(opts.keep_alive(), Duration::from_secs(30));
        assert_eq!(opts.credentials(), Some(("user".to_string(), "secret".to_string())));
    }
}
