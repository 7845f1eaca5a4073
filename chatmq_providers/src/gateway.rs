//! Completion gateway.
//!
//! Wraps an [`LLMProvider`] and never fails: every transport or remote
//! error is turned into a reply-shaped error string so the bridge always
//! has something to publish.

use std::sync::Arc;

use chatmq_core::{LLMProvider, TextStream, Turn};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// How the reply is pulled from the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// One request, one reply blob.
    #[default]
    Whole,
    /// One request, reply assembled from incremental fragments.
    Streaming,
}

/// Text produced by the gateway; `failed` is set when `text` is an error string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub failed: bool,
}

impl Reply {
    #[must_use]
    pub const fn ok(text: String) -> Self {
        Self {
            text,
            failed: false,
        }
    }

    /// Assistant turn recording this reply in a conversation window.
    #[must_use]
    pub fn into_turn(self) -> Turn {
        if self.failed {
            Turn::failed_assistant(self.text)
        } else {
            Turn::assistant(self.text)
        }
    }
}

pub struct CompletionGateway {
    provider: Arc<dyn LLMProvider>,
    model: String,
    error_label: String,
}

impl CompletionGateway {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        let model = provider.get_default_model().to_string();
        Self {
            provider,
            model,
            error_label: "Completion API".to_string(),
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    /// Prefix used in error replies, e.g. `DeepSeek API`.
    #[must_use]
    pub fn with_error_label(mut self, label: String) -> Self {
        self.error_label = label;
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn reply(&self, window: &[Turn], mode: ResponseMode) -> Reply {
        match mode {
            ResponseMode::Whole => self.complete(window).await,
            ResponseMode::Streaming => self.assemble(self.complete_stream(window).await).await,
        }
    }

    /// Single round-trip; blocks until the whole reply is available.
    pub async fn complete(&self, window: &[Turn]) -> Reply {
        match self.provider.chat(window, &self.model).await {
            Ok(response) => Reply::ok(response.content),
            Err(e) => self.failure(&e),
        }
    }

    /// Lazy fragment sequence. A failure to open the stream is delivered as
    /// its only item.
    pub async fn complete_stream(&self, window: &[Turn]) -> TextStream {
        match self.provider.chat_stream(window, &self.model).await {
            Ok(stream) => stream,
            Err(e) => {
                let failed: TextStream =
                    Box::pin(futures::stream::once(async move { Err::<String, _>(e) }));
                failed
            }
        }
    }

    /// Concatenate fragments in arrival order. Any error discards what was
    /// received so far and yields the error reply instead.
    pub async fn assemble(&self, mut stream: TextStream) -> Reply {
        let mut text = String::new();
        let mut fragments = 0_usize;
        while let Some(fragment) = stream.next().await {
            match fragment {
                Ok(fragment) => {
                    text.push_str(&fragment);
                    fragments += 1;
                }
                Err(e) => return self.failure(&e),
            }
        }
        debug!("Assembled reply from {fragments} fragments");
        Reply::ok(text)
    }

    fn failure(&self, e: &anyhow::Error) -> Reply {
        let text = format!("{} error: {e}", self.error_label);
        error!("{text}");
        Reply { text, failed: true }
    }
}
