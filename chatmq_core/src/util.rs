//! Shared constants.

/// Identity used when a payload carries no `user_id`.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Persona seeded as the fixed first turn of every conversation window.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";
