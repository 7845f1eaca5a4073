#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! MQTT front end: payload codec, broker transport and the message bridge
//! that ties a chat topic to the completion gateway.

mod bridge;
mod codec;
mod error;
mod transport;

pub use bridge::{BridgeConfig, BridgeState, DispatchMode, MessageBridge};
pub use codec::{InboundMessage, OutboundFormat, OutboundMessage};
pub use error::{Error, Result};
pub use transport::{MqttSettings, MqttTransport, Publisher};
