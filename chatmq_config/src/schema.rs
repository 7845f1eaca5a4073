use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chatmq_conversation::WindowConfig;
use chatmq_core::DEFAULT_SYSTEM_PROMPT;
use chatmq_mqtt::{BridgeConfig as BridgeRuntimeConfig, DispatchMode, MqttSettings, OutboundFormat};
use chatmq_providers::{ResponseMode, RetryPolicy};
use tracing::debug;

/// Environment variable that overrides `provider.api_key`.
pub const API_KEY_ENV: &str = "CHATMQ_API_KEY";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "ProviderConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "ProviderConfig::default_model")]
    pub model: String,
    /// Prefix of error replies, e.g. "DeepSeek API error: ..."
    #[serde(default = "ProviderConfig::default_error_label")]
    pub error_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl ProviderConfig {
    fn default_base_url() -> String {
        "https://api.deepseek.com".to_string()
    }

    fn default_model() -> String {
        "deepseek-chat".to_string()
    }

    fn default_error_label() -> String {
        "DeepSeek API".to_string()
    }

    /// Key from the environment if set, otherwise from the file.
    pub fn resolve_api_key(&self, from_env: Option<String>) -> anyhow::Result<String> {
        let key = from_env
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| self.api_key.clone());
        if key.trim().is_empty() {
            anyhow::bail!(
                "API key not configured. Set {API_KEY_ENV} or \"provider.api_key\" in config"
            );
        }
        Ok(key)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    #[serde(default = "MqttConfig::default_host")]
    pub host: String,
    #[serde(default = "MqttConfig::default_port")]
    pub port: u16,
    #[serde(default = "MqttConfig::default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "MqttConfig::default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "MqttConfig::default_subscribe_topic")]
    pub subscribe_topic: String,
    /// Defaults to `subscribe_topic`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_topic: Option<String>,
    #[serde(default)]
    pub format: OutboundFormat,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            keep_alive_secs: Self::default_keep_alive_secs(),
            client_id_prefix: Self::default_client_id_prefix(),
            subscribe_topic: Self::default_subscribe_topic(),
            publish_topic: None,
            format: OutboundFormat::default(),
        }
    }
}

impl MqttConfig {
    fn default_host() -> String {
        "broker.emqx.io".to_string()
    }

    const fn default_port() -> u16 {
        1883
    }

    const fn default_keep_alive_secs() -> u64 {
        60
    }

    fn default_client_id_prefix() -> String {
        "chatmq".to_string()
    }

    fn default_subscribe_topic() -> String {
        "deepseek/chat".to_string()
    }

    #[must_use]
    pub fn publish_topic(&self) -> &str {
        self.publish_topic
            .as_deref()
            .unwrap_or(&self.subscribe_topic)
    }

    #[must_use]
    pub fn settings(&self, channel_capacity: usize) -> MqttSettings {
        MqttSettings {
            host: self.host.clone(),
            port: self.port,
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            client_id_prefix: self.client_id_prefix.clone(),
            subscribe_topic: self.subscribe_topic.clone(),
            channel_capacity,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConversationConfig {
    /// `null` disables the seeded system turn
    #[serde(default = "ConversationConfig::default_system_prompt")]
    pub system_prompt: Option<String>,
    #[serde(default = "ConversationConfig::default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "ConversationConfig::default_max_identities")]
    pub max_identities: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_ttl_secs: Option<u64>,
    #[serde(default)]
    pub forward_failed_replies: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_prompt: Self::default_system_prompt(),
            max_turns: Self::default_max_turns(),
            max_identities: Self::default_max_identities(),
            idle_ttl_secs: None,
            forward_failed_replies: false,
        }
    }
}

impl ConversationConfig {
    #[allow(clippy::unnecessary_wraps)]
    fn default_system_prompt() -> Option<String> {
        Some(DEFAULT_SYSTEM_PROMPT.to_string())
    }

    const fn default_max_turns() -> usize {
        5
    }

    const fn default_max_identities() -> usize {
        10_000
    }

    #[must_use]
    pub fn window_config(&self) -> WindowConfig {
        WindowConfig::default()
            .with_system_prompt(self.system_prompt.clone())
            .with_max_turns(self.max_turns)
            .forward_failed_replies(self.forward_failed_replies)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BridgeConfig {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub dispatch: DispatchMode,
    #[serde(default = "BridgeConfig::default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            streaming: false,
            dispatch: DispatchMode::default(),
            channel_capacity: Self::default_channel_capacity(),
        }
    }
}

impl BridgeConfig {
    const fn default_channel_capacity() -> usize {
        64
    }

    #[must_use]
    pub const fn response_mode(&self) -> ResponseMode {
        if self.streaming {
            ResponseMode::Streaming
        } else {
            ResponseMode::Whole
        }
    }
}

impl Config {
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join("chatmq"))
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'chatmq init' to create config.",
                config_path.display()
            );
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        debug!("Reading config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Reject settings that cannot work at runtime.
    ///
    /// Bare replies carry no envelope, so publishing them on the request
    /// topic would feed every reply back in as a new message.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mqtt.format == OutboundFormat::Bare
            && self.mqtt.publish_topic() == self.mqtt.subscribe_topic
        {
            anyhow::bail!(
                "Bare replies need a distinct \"mqtt.publish_topic\" (subscribed to {})",
                self.mqtt.subscribe_topic
            );
        }
        if self.mqtt.subscribe_topic.is_empty() {
            anyhow::bail!("\"mqtt.subscribe_topic\" must not be empty");
        }
        Ok(())
    }

    /// Runtime settings for the message bridge.
    #[must_use]
    pub fn bridge_runtime(&self) -> BridgeRuntimeConfig {
        BridgeRuntimeConfig {
            publish_topic: self.mqtt.publish_topic().to_string(),
            format: self.mqtt.format,
            response_mode: self.bridge.response_mode(),
            dispatch: self.bridge.dispatch,
            idle_ttl: self.conversation.idle_ttl_secs.map(Duration::from_secs),
        }
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    pub fn create_config() -> anyhow::Result<()> {
        let config_dir = Self::ensure_config_dir()?;
        let config_path = config_dir.join("config.json");

        if config_path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                config_path.display()
            );
        }

        std::fs::write(&config_path, CONFIG_TEMPLATE)?;

        println!("✅ Created config file at: {}", config_path.display());
        println!();
        println!("📝 Next steps:");
        println!("   1. Add your API key to the config file (or export {API_KEY_ENV})");
        println!("   2. Adjust broker host and topics if you are not using the public EMQX broker");
        println!("   3. Run 'chatmq serve' to start bridging");
        println!();
        println!("🔧 Configuration options:");
        println!("   - provider.base_url / model: any OpenAI-compatible endpoint");
        println!("   - mqtt.format: \"envelope\" (JSON reply) or \"bare\" (reply text only)");
        println!("   - conversation.max_turns: turns kept per user, system prompt included");
        println!("   - bridge.streaming: assemble replies from a streamed response");
        println!();
        Ok(())
    }
}

const CONFIG_TEMPLATE: &str = r#"{
  "provider": {
    "api_key": "your-api-key-here",
    "base_url": "https://api.deepseek.com",
    "model": "deepseek-chat",
    "error_label": "DeepSeek API",
    "retry": {
      "base_delays_secs": [2, 4],
      "final_retries": 0,
      "final_delay_secs": 10
    }
  },
  "mqtt": {
    "host": "broker.emqx.io",
    "port": 1883,
    "keep_alive_secs": 60,
    "client_id_prefix": "chatmq",
    "subscribe_topic": "deepseek/chat",
    "format": "envelope"
  },
  "conversation": {
    "system_prompt": "You are a helpful AI assistant.",
    "max_turns": 5,
    "max_identities": 10000,
    "idle_ttl_secs": 86400,
    "forward_failed_replies": false
  },
  "bridge": {
    "streaming": false,
    "dispatch": "sequential",
    "channel_capacity": 64
  }
}"#;
