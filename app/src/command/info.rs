use chatmq_config::{API_KEY_ENV, Config};

use super::mask_secret;

/// Strategy for displaying configuration information.
///
/// Prints the provider (API key masked), broker, conversation and bridge
/// settings as `serve` would use them.
#[derive(Debug, Clone, Copy)]
pub struct InfoStrategy;

impl super::CommandStrategy for InfoStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;

        println!("=== chatmq Configuration ===\n");

        println!("Provider:");
        match config
            .provider
            .resolve_api_key(std::env::var(API_KEY_ENV).ok())
        {
            Ok(key) => println!("  API Key: {}", mask_secret(&key)),
            Err(e) => println!("  API Key: missing ({e})"),
        }
        println!("  Base URL: {}", config.provider.base_url);
        println!("  Model: {}", config.provider.model);
        if let Some(temperature) = config.provider.temperature {
            println!("  Temperature: {temperature}");
        }
        if let Some(max_tokens) = config.provider.max_tokens {
            println!("  Max Tokens: {max_tokens}");
        }
        println!(
            "  Retry delays: {:?} + {} x {}s",
            config.provider.retry.base_delays_secs,
            config.provider.retry.final_retries,
            config.provider.retry.final_delay_secs
        );
        println!();

        println!("MQTT:");
        println!("  Broker: {}:{}", config.mqtt.host, config.mqtt.port);
        println!("  Keep Alive: {}s", config.mqtt.keep_alive_secs);
        println!("  Subscribe: {}", config.mqtt.subscribe_topic);
        println!("  Publish: {}", config.mqtt.publish_topic());
        println!("  Format: {:?}", config.mqtt.format);
        println!();

        println!("Conversation:");
        match &config.conversation.system_prompt {
            Some(prompt) => println!("  System Prompt: {prompt}"),
            None => println!("  System Prompt: (none)"),
        }
        println!("  Max Turns: {}", config.conversation.max_turns);
        println!("  Max Identities: {}", config.conversation.max_identities);
        match config.conversation.idle_ttl_secs {
            Some(ttl) => println!("  Idle TTL: {ttl}s"),
            None => println!("  Idle TTL: never"),
        }
        println!(
            "  Forward Failed Replies: {}",
            config.conversation.forward_failed_replies
        );
        println!();

        println!("Bridge:");
        println!("  Response Mode: {:?}", config.bridge.response_mode());
        println!("  Dispatch: {:?}", config.bridge.dispatch);

        if let Err(e) = config.validate() {
            println!();
            println!("⚠️  {e}");
        }

        Ok(())
    }
}
