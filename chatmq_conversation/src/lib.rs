#![warn(
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

//! Per-identity conversation state with bounded retention.
//!
//! # Key Features
//! - Fixed system-turn prefix that survives eviction
//! - FIFO eviction once a window reaches its cap
//! - Cap on tracked identities plus idle reaping
//! - Per-identity locks for concurrent handlers

mod store;
mod window;

pub use store::ConversationStore;
pub use window::{ConversationWindow, WindowConfig};
