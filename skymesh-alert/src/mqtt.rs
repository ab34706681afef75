//! MQTT broker bridge for mesh alerts.
//!
//! Publishes alert payloads to `<topic_prefix>/<region>/c/<channel>/<client_id>`
//! with configurable QoS, TLS and credentials. The rumqttc event loop
//! runs in its own task and flips a shared connected flag on
//! ConnAck/Disconnect, which is what the health probe reads — no blocking
//! network round-trip in the probe path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::outbound::OutboundMessage;
use crate::{AlertError, Result};

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub topic_prefix: String,
    pub region: String,
    pub qos: u8,
    pub keepalive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        MqttConfig {
            broker_host: "localhost".into(),
            broker_port: 1883,
            client_id: "skymesh".into(),
            username: None,
            password: None,
            tls: false,
            topic_prefix: "mesh".into(),
            region: "US".into(),
            qos: 0,
            keepalive_secs: 60,
        }
    }
}

impl MqttConfig {
    fn qos(&self) -> QoS {
        match self.qos {
            1 => QoS::AtLeastOnce,
            _ => QoS::AtMostOnce,
        }
    }

    /// `<prefix>/<region>/c/<channel>/<client_id>`
    pub fn topic(&self, channel: &str) -> String {
        format!(
            "{}/{}/c/{}/{}",
            self.topic_prefix, self.region, channel, self.client_id
        )
    }
}

/// MQTT transport with a background event loop.
pub struct MqttTransport {
    config: MqttConfig,
    client: Option<AsyncClient>,
    connected: Arc<AtomicBool>,
    event_task: Option<tokio::task::JoinHandle<()>>,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        MqttTransport {
            config,
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            event_task: None,
        }
    }

    /// Start the client and its event loop. Connection is confirmed
    /// asynchronously via ConnAck; the first publish after a cold start
    /// may race it, which the retry path absorbs.
    pub async fn connect(&mut self) -> Result<()> {
        if let Some(task) = self.event_task.take() {
            task.abort();
        }

        let mut opts = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.broker_host.clone(),
            self.config.broker_port,
        );
        opts.set_keep_alive(Duration::from_secs(self.config.keepalive_secs));
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            opts.set_credentials(user.clone(), pass.clone());
        }
        if self.config.tls {
            opts.set_transport(Transport::Tls(TlsConfiguration::Native));
        }

        let (client, mut eventloop) = AsyncClient::new(opts, 16);
        let connected = self.connected.clone();

        self.event_task = Some(tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        connected.store(true, Ordering::SeqCst);
                        debug!("mqtt connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        connected.store(false, Ordering::SeqCst);
                        debug!(error = %e, "mqtt event loop error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }));

        self.client = Some(client);
        Ok(())
    }

    pub async fn send(&mut self, msg: &OutboundMessage) -> Result<()> {
        let client = self.client.as_ref().ok_or_else(|| AlertError::Mqtt(
            "not connected".into(),
        ))?;
        if !self.connected.load(Ordering::SeqCst) {
            return Err(AlertError::Mqtt("broker not reachable".into()));
        }

        let topic = self.config.topic(&msg.channel);
        timeout(
            Duration::from_secs(5),
            client.publish(topic, self.config.qos(), false, msg.content.clone()),
        )
        .await
        .map_err(|_| AlertError::Mqtt("publish timed out".into()))?
        .map_err(|e| AlertError::Mqtt(e.to_string()))
    }

    pub async fn probe(&mut self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
