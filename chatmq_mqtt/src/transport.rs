use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeReasonCode};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Error, Result};

/// Outbound side of the transport, owned by the bridge.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Broker connection parameters.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub client_id_prefix: String,
    pub subscribe_topic: String,
    /// Inbound payloads buffered between the event loop and the bridge
    pub channel_capacity: usize,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "broker.emqx.io".to_string(),
            port: 1883,
            keep_alive: Duration::from_secs(60),
            client_id_prefix: "chatmq".to_string(),
            subscribe_topic: "deepseek/chat".to_string(),
            channel_capacity: 64,
        }
    }
}

/// MQTT client handle. Cloning shares the same connection.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    /// Connect, subscribe and start the event loop.
    ///
    /// Fails if the broker cannot be reached or refuses the connection or
    /// subscription; this is not retried. Once connected, transient
    /// connection losses are handled by the spawned event loop.
    pub async fn connect(settings: &MqttSettings) -> Result<(Self, mpsc::Receiver<Vec<u8>>)> {
        let client_id = format!("{}-{}", settings.client_id_prefix, Uuid::now_v7());
        let mut options = MqttOptions::new(&client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive);

        info!(
            "Connecting to MQTT broker {}:{} as {client_id}",
            settings.host, settings.port
        );

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        let (tx, rx) = mpsc::channel(settings.channel_capacity.max(1));

        wait_for_connack(&mut eventloop).await?;
        info!("Connected to {}:{}", settings.host, settings.port);

        client
            .subscribe(&settings.subscribe_topic, QoS::AtMostOnce)
            .await?;
        wait_for_suback(&mut eventloop, &settings.subscribe_topic, &tx).await?;
        info!("Subscribed to {}", settings.subscribe_topic);

        tokio::spawn(drive_event_loop(
            eventloop,
            client.clone(),
            settings.subscribe_topic.clone(),
            tx,
        ));

        Ok((Self { client }, rx))
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| Error::Publish(e.into()))
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

async fn wait_for_suback(
    eventloop: &mut EventLoop,
    topic: &str,
    inbound: &mpsc::Sender<Vec<u8>>,
) -> Result<()> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::SubAck(ack)) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    return Err(Error::Subscribe(topic.to_string()));
                }
                return Ok(());
            }
            Event::Incoming(Packet::Publish(publish)) => {
                if !forward(inbound, publish.payload.to_vec()) {
                    return Err(Error::ChannelClosed);
                }
            }
            _ => {}
        }
    }
}

/// Hand an inbound payload to the bridge without waiting.
///
/// The event loop must keep polling to send keep-alives and queued
/// publishes, so a full buffer drops the payload instead of blocking.
/// Returns `false` once the bridge has dropped its receiver.
fn forward(inbound: &mpsc::Sender<Vec<u8>>, payload: Vec<u8>) -> bool {
    match inbound.try_send(payload) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(
                "Inbound buffer full ({} messages), dropping message",
                inbound.max_capacity()
            );
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Poll the connection for the lifetime of the bridge.
///
/// rumqttc reconnects on the next poll after an error; the delay between
/// attempts grows by 2s per failure up to 10s. The subscription is
/// re-issued after every reconnect.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topic: String,
    inbound: mpsc::Sender<Vec<u8>>,
) {
    const INITIAL_DELAY_SECS: u64 = 2;
    const MAX_DELAY_SECS: u64 = 10;

    let mut failures = 0u64;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "Received {} bytes on {}",
                    publish.payload.len(),
                    publish.topic
                );
                if !forward(&inbound, publish.payload.to_vec()) {
                    info!("Bridge stopped consuming, closing MQTT event loop");
                    return;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) if failures > 0 => {
                info!("Reconnected to broker after {failures} failed polls");
                failures = 0;
                // Non-blocking: the request queue is drained by this same loop
                if let Err(e) = client.try_subscribe(&topic, QoS::AtMostOnce) {
                    warn!("Failed to re-subscribe to {topic}: {e}");
                }
            }
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                info!("Disconnect requested, closing MQTT event loop");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                failures += 1;
                let delay_secs = (INITIAL_DELAY_SECS * failures).min(MAX_DELAY_SECS);
                warn!("MQTT connection error: {e}. Retrying in {delay_secs}s...");
                sleep(Duration::from_secs(delay_secs)).await;
            }
        }
    }
}
