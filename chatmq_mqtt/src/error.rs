use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("MQTT connection error: {0}")]
    Connect(#[from] rumqttc::ConnectionError),

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Subscription to {0} was rejected by the broker")]
    Subscribe(String),

    #[error("Publish failed: {0}")]
    Publish(anyhow::Error),

    #[error("Failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Inbound channel closed")]
    ChannelClosed,
}
