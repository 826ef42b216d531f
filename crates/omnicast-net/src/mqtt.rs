//! Broker pub/sub driver (MQTT).
//!
//! Every configured broker is dialed concurrently with a 10 s budget; one
//! successful connection is enough to initialize. Inbound arrives on the
//! persistent-session subscription `dm/{selfHex}`; outbound publishes QoS 1
//! retained to each connected broker and counts per-broker successes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use omnicast_shared::constants::{MQTT_CONNECT_TIMEOUT_SECS, MQTT_RECONNECT_SECS};
use omnicast_shared::{Identity, Protocol, PublicIdentity};

use crate::transport::{Inbound, SendError, Transport, TransportError, TransportStatus};

fn dm_topic(hex_id: &str) -> String {
    format!("dm/{hex_id}")
}

struct Broker {
    url: String,
    client: AsyncClient,
}

pub struct MqttTransport {
    identity: Identity,
    broker_urls: Vec<String>,
    inbound_tx: mpsc::Sender<Inbound>,
    brokers: Mutex<Vec<Broker>>,
    connected: Arc<AtomicUsize>,
    initialized: AtomicBool,
    poll_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MqttTransport {
    pub fn new(
        identity: Identity,
        broker_urls: Vec<String>,
        inbound_tx: mpsc::Sender<Inbound>,
    ) -> Self {
        Self {
            identity,
            broker_urls,
            inbound_tx,
            brokers: Mutex::new(Vec::new()),
            connected: Arc::new(AtomicUsize::new(0)),
            initialized: AtomicBool::new(false),
            poll_tasks: Mutex::new(Vec::new()),
        }
    }

    async fn connect_broker(
        &self,
        url: &str,
        self_topic: &str,
    ) -> Result<(Broker, JoinHandle<()>), TransportError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| TransportError::Config(format!("broker url {url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| TransportError::Config(format!("broker url {url}: no host")))?
            .to_string();
        let port = parsed.port().unwrap_or(1883);

        // Client id is stable per identity so the persistent session is
        // found again after a restart.
        let client_id = format!(
            "omnicast-{}",
            &self.identity.public().eth_address()[2..18]
        );

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(false);

        let (client, mut event_loop) = AsyncClient::new(options, 64);

        let connack = tokio::time::timeout(
            Duration::from_secs(MQTT_CONNECT_TIMEOUT_SECS),
            async {
                loop {
                    match event_loop.poll().await {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => return Ok(()),
                        Ok(_) => continue,
                        Err(e) => return Err(e),
                    }
                }
            },
        )
        .await;

        match connack {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(TransportError::Connect(format!("{url}: {e}"))),
            Err(_) => {
                return Err(TransportError::Connect(format!(
                    "{url}: no ConnAck within {MQTT_CONNECT_TIMEOUT_SECS}s"
                )))
            }
        }

        client
            .subscribe(self_topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Connect(format!("{url}: subscribe: {e}")))?;

        // Per-broker poll loop; rumqttc reconnects on the next poll after
        // an error, we just pace it and keep the connected gauge honest.
        let inbound_tx = self.inbound_tx.clone();
        let connected = self.connected.clone();
        let loop_url = url.to_string();
        connected.fetch_add(1, Ordering::SeqCst);
        let task = tokio::spawn(async move {
            let mut up = true;
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let event = Inbound {
                            protocol: Protocol::Mqtt,
                            payload: publish.payload.to_vec(),
                            server: Some(loop_url.clone()),
                        };
                        if inbound_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        if !up {
                            up = true;
                            connected.fetch_add(1, Ordering::SeqCst);
                            info!(broker = %loop_url, "mqtt broker reconnected");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if up {
                            up = false;
                            connected.fetch_sub(1, Ordering::SeqCst);
                        }
                        warn!(broker = %loop_url, error = %e, "mqtt connection lost, retrying");
                        tokio::time::sleep(Duration::from_secs(MQTT_RECONNECT_SECS)).await;
                    }
                }
            }
        });

        Ok((
            Broker {
                url: url.to_string(),
                client,
            },
            task,
        ))
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn name(&self) -> Protocol {
        Protocol::Mqtt
    }

    async fn init(&self) -> Result<(), TransportError> {
        let self_topic = dm_topic(&self.identity.public().pubsub_id());

        let attempts = join_all(
            self.broker_urls
                .iter()
                .map(|url| self.connect_broker(url, &self_topic)),
        )
        .await;

        let mut brokers = Vec::new();
        let mut tasks = Vec::new();
        for (url, attempt) in self.broker_urls.iter().zip(attempts) {
            match attempt {
                Ok((broker, task)) => {
                    brokers.push(broker);
                    tasks.push(task);
                }
                Err(e) => warn!(broker = %url, error = %e, "mqtt broker unavailable"),
            }
        }

        if brokers.is_empty() {
            return Err(TransportError::Connect(
                "no broker reachable".into(),
            ));
        }

        info!(
            connected = brokers.len(),
            total = self.broker_urls.len(),
            topic = %self_topic,
            "mqtt transport ready"
        );

        *self.brokers.lock().await = brokers;
        *self.poll_tasks.lock().await = tasks;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, recipient: &PublicIdentity, payload: &[u8]) -> Result<String, SendError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(SendError::not_initialized());
        }

        let topic = dm_topic(&recipient.pubsub_id());
        let brokers = self.brokers.lock().await;

        let mut delivered = 0usize;
        for broker in brokers.iter() {
            match broker
                .client
                .publish(topic.clone(), QoS::AtLeastOnce, true, payload.to_vec())
                .await
            {
                Ok(()) => delivered += 1,
                Err(e) => debug!(broker = %broker.url, error = %e, "publish failed"),
            }
        }

        if delivered == 0 {
            return Err(SendError::unreachable("no broker accepted the publish"));
        }
        Ok(format!("published to {delivered}/{} brokers", brokers.len()))
    }

    async fn shutdown(&self) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }
        for broker in self.brokers.lock().await.drain(..) {
            let _ = broker.client.disconnect().await;
        }
        for task in self.poll_tasks.lock().await.drain(..) {
            task.abort();
        }
        self.connected.store(0, Ordering::SeqCst);
        debug!("mqtt transport shut down");
    }

    fn status(&self) -> TransportStatus {
        TransportStatus {
            connected: self.connected.load(Ordering::SeqCst),
            total: self.broker_urls.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dm_topic_shape() {
        let id = Identity::generate().public();
        let topic = dm_topic(&id.pubsub_id());
        assert!(topic.starts_with("dm/04"));
        assert_eq!(topic.len(), 3 + 130);
    }

    #[tokio::test]
    async fn test_send_before_init_fails_cleanly() {
        let (tx, _rx) = mpsc::channel(1);
        let transport = MqttTransport::new(
            Identity::generate(),
            vec!["mqtt://broker.example:1883".into()],
            tx,
        );

        let recipient = Identity::generate().public();
        let err = transport.send(&recipient, b"{}").await.unwrap_err();
        assert_eq!(err.kind, crate::transport::SendErrorKind::NotInitialized);
    }

    #[tokio::test]
    async fn test_init_with_bad_url_is_config_error() {
        let (tx, _rx) = mpsc::channel(1);
        let transport =
            MqttTransport::new(Identity::generate(), vec!["not a url".into()], tx);

        assert!(matches!(
            transport.init().await,
            Err(TransportError::Connect(_))
        ));
    }
}
