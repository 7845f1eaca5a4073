//! Run the MQTT to completion-service bridge.

use std::sync::Arc;

use chatmq_config::{API_KEY_ENV, Config};
use chatmq_conversation::ConversationStore;
use chatmq_mqtt::{DispatchMode, MessageBridge, MqttTransport, OutboundFormat};
use chatmq_providers::{CompletionGateway, OpenAiCompatProvider};
use tracing::info;

/// Command-line overrides for `chatmq serve`.
#[derive(Debug, Clone, Default)]
pub struct ServeInput {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub model: Option<String>,
    /// Assemble replies from a streamed response
    pub streaming: bool,
    /// Publish reply text only, on this topic
    pub reply_topic: Option<String>,
    /// One task per message instead of strict arrival order
    pub concurrent: bool,
}

impl ServeInput {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.mqtt.host = host;
        }
        if let Some(port) = self.port {
            config.mqtt.port = port;
        }
        if let Some(model) = self.model {
            config.provider.model = model;
        }
        if self.streaming {
            config.bridge.streaming = true;
        }
        if let Some(topic) = self.reply_topic {
            config.mqtt.publish_topic = Some(topic);
            config.mqtt.format = OutboundFormat::Bare;
        }
        if self.concurrent {
            config.bridge.dispatch = DispatchMode::Concurrent;
        }
    }
}

/// Strategy for running the bridge until the broker connection ends or
/// Ctrl+C is pressed.
#[derive(Debug, Clone, Copy)]
pub struct ServeStrategy;

impl super::CommandStrategy for ServeStrategy {
    type Input = ServeInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let mut config = Config::load()?;
        input.apply(&mut config);
        config.validate()?;

        let api_key = config
            .provider
            .resolve_api_key(std::env::var(API_KEY_ENV).ok())?;

        let provider = OpenAiCompatProvider::new(api_key, config.provider.base_url.clone())
            .with_default_model(config.provider.model.clone())
            .with_sampling(config.provider.temperature, config.provider.max_tokens)
            .with_retry(config.provider.retry.clone());
        let gateway = CompletionGateway::new(Arc::new(provider))
            .with_error_label(config.provider.error_label.clone());
        let store = ConversationStore::new(config.conversation.window_config())
            .with_max_identities(config.conversation.max_identities);

        let settings = config.mqtt.settings(config.bridge.channel_capacity);
        let runtime = config.bridge_runtime();
        info!(
            "Subscribe: {} | Publish: {} ({:?}) | API: {} | Model: {} | Mode: {:?}",
            settings.subscribe_topic,
            runtime.publish_topic,
            runtime.format,
            config.provider.base_url,
            gateway.model(),
            runtime.response_mode
        );

        let (bridge, inbound) = MessageBridge::<MqttTransport>::connect(
            &settings,
            Arc::new(gateway),
            Arc::new(store),
            runtime,
        )
        .await?;

        info!("Bridge is running. Press Ctrl+C to stop.");
        tokio::select! {
            () = bridge.run(inbound) => {
                info!("Broker connection closed");
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutting down");
                bridge.disconnect().await?;
            }
        }

        Ok(())
    }
}
