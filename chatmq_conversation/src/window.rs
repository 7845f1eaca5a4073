//! Bounded per-identity turn window.
//!
//! The window keeps at most `max_turns` turns. When a system prompt is
//! configured it is seeded as the first turn and never evicted; overflow
//! removes the oldest turn after it.

use chatmq_core::{DEFAULT_SYSTEM_PROMPT, Role, Turn};
use serde::{Deserialize, Serialize};

/// Configuration shared by every window in a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Persona seeded as the fixed first turn (`None` disables seeding)
    pub system_prompt: Option<String>,
    /// Maximum turns kept, the system turn included
    pub max_turns: usize,
    /// Whether turns tagged as failed replies are sent back to the model
    pub forward_failed_replies: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            max_turns: 5,
            forward_failed_replies: false,
        }
    }
}

impl WindowConfig {
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    #[must_use]
    pub const fn with_max_turns(mut self, max: usize) -> Self {
        self.max_turns = max;
        self
    }

    #[must_use]
    pub const fn forward_failed_replies(mut self, forward: bool) -> Self {
        self.forward_failed_replies = forward;
        self
    }

    /// Cap actually enforced: room for the fixed prefix plus one turn.
    #[must_use]
    pub fn effective_cap(&self) -> usize {
        let fixed = usize::from(self.system_prompt.is_some());
        self.max_turns.max(fixed + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationWindow {
    turns: Vec<Turn>,
    fixed: usize,
    cap: usize,
    forward_failed: bool,
}

impl ConversationWindow {
    /// Fresh window, seeded with the system turn when one is configured.
    #[must_use]
    pub fn new(config: &WindowConfig) -> Self {
        let turns: Vec<Turn> = config
            .system_prompt
            .iter()
            .map(|prompt| Turn::system(prompt.clone()))
            .collect();
        Self {
            fixed: turns.len(),
            turns,
            cap: config.effective_cap(),
            forward_failed: config.forward_failed_replies,
        }
    }

    /// Append `turn`, then drop the oldest non-fixed turns until the cap holds.
    pub fn push_and_trim(&mut self, turn: Turn) {
        self.turns.push(turn);
        while self.turns.len() > self.cap {
            self.turns.remove(self.fixed);
        }
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Turns forwarded to the completion service.
    #[must_use]
    pub fn context(&self) -> Vec<Turn> {
        self.turns
            .iter()
            .filter(|turn| self.forward_failed || !turn.failed)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn system_turn(&self) -> Option<&Turn> {
        self.turns[..self.fixed].first()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[must_use]
    pub const fn cap(&self) -> usize {
        self.cap
    }

    /// Number of exchanged (non-system) turns.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.turns.iter().filter(|t| t.role != Role::System).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(max_turns: usize) -> ConversationWindow {
        ConversationWindow::new(
            &WindowConfig::default()
                .with_system_prompt(Some("persona".to_string()))
                .with_max_turns(max_turns),
        )
    }

    fn contents(window: &ConversationWindow) -> Vec<&str> {
        window.turns().iter().map(|t| t.content.as_str()).collect()
    }

    #[test]
    fn new_window_is_seeded_with_system_turn() {
        let window = window(5);
        assert_eq!(window.len(), 1);
        assert_eq!(window.system_turn(), Some(&Turn::system("persona")));
        assert_eq!(window.history_len(), 0);
    }

    #[test]
    fn never_exceeds_cap_and_keeps_system_turn() {
        let mut window = window(5);
        for i in 0..40 {
            window.push_and_trim(Turn::user(format!("u{i}")));
            assert!(window.len() <= 5);
            assert_eq!(window.turns()[0], Turn::system("persona"));
        }
    }

    #[test]
    fn evicts_oldest_non_fixed_turn_fifo() {
        let mut window = window(5);
        for content in ["a", "b", "c", "d"] {
            window.push_and_trim(Turn::user(content));
        }
        assert_eq!(contents(&window), ["persona", "a", "b", "c", "d"]);

        window.push_and_trim(Turn::assistant("e"));
        assert_eq!(contents(&window), ["persona", "b", "c", "d", "e"]);
    }

    #[test]
    fn without_system_prompt_evicts_from_the_front() {
        let mut window = ConversationWindow::new(
            &WindowConfig::default()
                .with_system_prompt(None)
                .with_max_turns(2),
        );
        assert!(window.is_empty());
        for content in ["a", "b", "c"] {
            window.push_and_trim(Turn::user(content));
        }
        assert_eq!(contents(&window), ["b", "c"]);
        assert_eq!(window.system_turn(), None);
    }

    #[test]
    fn cap_leaves_room_for_one_turn_after_prefix() {
        let mut window = window(1);
        assert_eq!(window.cap(), 2);
        window.push_and_trim(Turn::user("a"));
        window.push_and_trim(Turn::user("b"));
        assert_eq!(contents(&window), ["persona", "b"]);
    }

    #[test]
    fn context_skips_failed_replies_unless_forwarded() {
        let mut window = window(5);
        window.push_and_trim(Turn::user("hi"));
        window.push_and_trim(Turn::failed_assistant("API error: timeout"));
        window.push_and_trim(Turn::user("again"));

        assert_eq!(window.len(), 4);
        let forwarded: Vec<String> = window.context().into_iter().map(|t| t.content).collect();
        assert_eq!(forwarded, ["persona", "hi", "again"]);

        let mut forwarding = ConversationWindow::new(&WindowConfig::default().forward_failed_replies(true));
        forwarding.push_and_trim(Turn::failed_assistant("API error: timeout"));
        assert_eq!(forwarding.context().len(), 2);
    }
}
