use std::sync::Arc;
use std::time::Duration;

use chatmq_conversation::ConversationStore;
use chatmq_core::Turn;
use chatmq_providers::{CompletionGateway, ResponseMode};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};

use crate::codec::{InboundMessage, OutboundFormat, OutboundMessage};
use crate::transport::{MqttSettings, MqttTransport, Publisher};
use crate::Result;

/// How inbound messages are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One message at a time, replies published in arrival order
    #[default]
    Sequential,
    /// One task per message, serialized per identity only
    Concurrent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Listening,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub publish_topic: String,
    pub format: OutboundFormat,
    pub response_mode: ResponseMode,
    pub dispatch: DispatchMode,
    /// Conversations untouched for this long are dropped
    pub idle_ttl: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            publish_topic: "deepseek/chat".to_string(),
            format: OutboundFormat::Envelope,
            response_mode: ResponseMode::Whole,
            dispatch: DispatchMode::Sequential,
            idle_ttl: None,
        }
    }
}

/// Connects the chat topic to the completion service.
///
/// Every inbound message goes through [`MessageBridge::handle_payload`];
/// replies, including error replies from the gateway, leave through the
/// single publisher the bridge owns.
pub struct MessageBridge<P> {
    publisher: Arc<P>,
    gateway: Arc<CompletionGateway>,
    store: Arc<ConversationStore>,
    config: Arc<BridgeConfig>,
    state: Arc<watch::Sender<BridgeState>>,
}

impl MessageBridge<MqttTransport> {
    /// Connect to the broker and subscribe. A failure here is fatal.
    pub async fn connect(
        settings: &MqttSettings,
        gateway: Arc<CompletionGateway>,
        store: Arc<ConversationStore>,
        config: BridgeConfig,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>)> {
        let (transport, inbound) = MqttTransport::connect(settings).await.inspect_err(|e| {
            error!("Could not connect to MQTT broker {}:{}: {e}", settings.host, settings.port);
        })?;

        let bridge = Self::new(Arc::new(transport), gateway, store, config);
        bridge.set_state(BridgeState::Listening);
        Ok((bridge, inbound))
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.publisher.disconnect().await?;
        self.set_state(BridgeState::Disconnected);
        Ok(())
    }
}

impl<P> MessageBridge<P>
where
    P: Publisher + 'static,
{
    pub fn new(
        publisher: Arc<P>,
        gateway: Arc<CompletionGateway>,
        store: Arc<ConversationStore>,
        config: BridgeConfig,
    ) -> Self {
        let (state, _) = watch::channel(BridgeState::Disconnected);
        Self {
            publisher,
            gateway,
            store,
            config: Arc::new(config),
            state: Arc::new(state),
        }
    }

    #[must_use]
    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    fn set_state(&self, state: BridgeState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!("Bridge state: {previous:?} -> {state:?}");
        }
    }

    /// Consume inbound payloads until the channel closes.
    ///
    /// Per-message failures are logged and never stop the loop.
    pub async fn run(&self, mut inbound: mpsc::Receiver<Vec<u8>>) {
        self.set_state(BridgeState::Listening);
        let reaper = self.config.idle_ttl.map(|ttl| self.spawn_reaper(ttl));
        let mut in_flight = JoinSet::new();

        while let Some(payload) = inbound.recv().await {
            match self.config.dispatch {
                DispatchMode::Sequential => self.process(&payload).await,
                DispatchMode::Concurrent => {
                    let bridge = self.clone();
                    in_flight.spawn(async move { bridge.process(&payload).await });
                    while in_flight.try_join_next().is_some() {}
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
        if let Some(reaper) = reaper {
            reaper.abort();
        }
        info!("Inbound channel closed");
        self.set_state(BridgeState::Disconnected);
    }

    async fn process(&self, payload: &[u8]) {
        if let Err(e) = self.handle_payload(payload).await {
            error!("Failed to handle message: {e}");
        }
    }

    /// Handle one raw payload end to end.
    ///
    /// Returns `Ok(None)` when the message was dropped for being empty.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<Option<OutboundMessage>> {
        let inbound = InboundMessage::decode(payload);
        if inbound.is_empty() {
            info!("[{}] Empty message, ignoring", inbound.user_id);
            return Ok(None);
        }
        info!("[{}] Message: {}", inbound.user_id, inbound.text);

        let InboundMessage { user_id, text } = inbound;

        let lock = self.store.identity_lock(&user_id).await;
        let _guard = lock.lock().await;

        let window = self
            .store
            .append_and_trim(&user_id, Turn::user(text.clone()))
            .await;
        let reply = self
            .gateway
            .reply(&window.context(), self.config.response_mode)
            .await;
        self.store
            .append_and_trim(&user_id, reply.clone().into_turn())
            .await;

        let outbound = OutboundMessage {
            user_id,
            response: reply.text,
            original_message: text,
        };
        self.publish(&outbound).await?;
        Ok(Some(outbound))
    }

    async fn publish(&self, outbound: &OutboundMessage) -> Result<()> {
        let payload = outbound.encode(self.config.format)?;
        info!(
            "[{}] Publishing reply to {}: {}",
            outbound.user_id, self.config.publish_topic, outbound.response
        );
        self.publisher
            .publish(&self.config.publish_topic, payload)
            .await
    }

    fn spawn_reaper(&self, ttl: Duration) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let period = (ttl / 2).max(Duration::from_secs(1));
        info!("Reaping conversations idle for more than {}s", ttl.as_secs());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.reap_idle(ttl).await;
            }
        })
    }
}

impl<P> Clone for MessageBridge<P> {
    fn clone(&self) -> Self {
        Self {
            publisher: Arc::clone(&self.publisher),
            gateway: Arc::clone(&self.gateway),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
        }
    }
}
