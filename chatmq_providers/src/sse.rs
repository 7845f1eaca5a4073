//! Server-Sent-Events body -> [`TextStream`] adapter for
//! OpenAI-compatible chat completion streams.

use chatmq_core::TextStream;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use futures::future::ready;
use reqwest::Response;

/// Sentinel `data:` payload that ends an OpenAI-compatible stream.
const DONE_MARKER: &str = "[DONE]";

/// Extract the content fragment from one streamed chunk.
///
/// Returns `Ok(None)` for chunks that carry no text (role headers,
/// finish markers, keep-alives).
pub fn parse_chunk(data: &str) -> anyhow::Result<Option<String>> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }

    let chunk: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| anyhow::anyhow!("Invalid stream chunk: {e}"))?;

    if let Some(message) = chunk["error"]["message"].as_str() {
        anyhow::bail!("Remote stream error: {message}");
    }

    Ok(chunk["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|content| !content.is_empty())
        .map(ToString::to_string))
}

/// Convert a streaming HTTP response into fragments.
///
/// The stream ends at `[DONE]` or when the body closes, whichever comes first.
pub fn text_stream_from_sse(response: Response) -> TextStream {
    let stream = response
        .bytes_stream()
        .eventsource()
        .take_while(|event| {
            ready(!matches!(event, Ok(event) if event.data.trim() == DONE_MARKER))
        })
        .filter_map(|event| {
            ready(match event {
                Ok(event) => parse_chunk(&event.data).transpose(),
                Err(e) => Some(Err(anyhow::anyhow!("Stream transport error: {e}"))),
            })
        });

    Box::pin(stream)
}
