use async_trait::async_trait;
use chatmq_core::{LLMProvider, LLMResponse, TextStream, Turn, Usage};
use reqwest::{Client, Response};
use serde_json::json;
use tracing::{debug, info};

use crate::retry::RetryPolicy;
use crate::sse::text_stream_from_sse;

/// Provider for any endpoint speaking the OpenAI chat-completions protocol
/// (`DeepSeek`, Doubao/Ark, `OpenAI` itself, local gateways).
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    retry: RetryPolicy,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: String, base_url: String) -> Self {
        info!("Creating OpenAiCompatProvider for {base_url}");
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: "deepseek-chat".to_string(),
            temperature: None,
            max_tokens: None,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_default_model(mut self, model: String) -> Self {
        self.default_model = model;
        self
    }

    #[must_use]
    pub const fn with_sampling(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request_body(&self, messages: &[Turn], model: &str, stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": stream,
        });
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    /// Send one request and fail on any non-2xx status, keeping the body text.
    async fn try_send(&self, body: &serde_json::Value) -> anyhow::Result<Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("HTTP {status}: {text}");
        }
        Ok(response)
    }

    fn parse_completion(response: &serde_json::Value) -> anyhow::Result<LLMResponse> {
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid response format: missing content"))?
            .to_string();

        let count = |u: &serde_json::Value, key: &str| {
            u32::try_from(u[key].as_u64().unwrap_or(0)).unwrap_or(0)
        };
        let usage = response
            .get("usage")
            .filter(|u| u.is_object())
            .map(|u| Usage {
                prompt_tokens: count(u, "prompt_tokens"),
                completion_tokens: count(u, "completion_tokens"),
                total_tokens: count(u, "total_tokens"),
            });

        Ok(LLMResponse { content, usage })
    }
}

#[async_trait]
impl LLMProvider for OpenAiCompatProvider {
    async fn chat(&self, messages: &[Turn], model: &str) -> anyhow::Result<LLMResponse> {
        let body = self.request_body(messages, model, false);
        info!(
            "Sending completion request: model={model}, turns={}",
            messages.len()
        );

        let body = &body;
        let response = self
            .retry
            .run(|| async move {
                self.try_send(body)
                    .await?
                    .json::<serde_json::Value>()
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await?;

        let parsed = Self::parse_completion(&response)?;
        if let Some(usage) = &parsed.usage {
            debug!(
                "Tokens: {} prompt + {} completion = {} total",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }
        Ok(parsed)
    }

    async fn chat_stream(&self, messages: &[Turn], model: &str) -> anyhow::Result<TextStream> {
        let body = self.request_body(messages, model, true);
        info!(
            "Opening completion stream: model={model}, turns={}",
            messages.len()
        );

        let response = self.retry.run(|| self.try_send(&body)).await?;
        Ok(text_stream_from_sse(response))
    }

    fn get_default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("test-key".to_string(), format!("{}/", server.uri()))
            .with_retry(RetryPolicy::none())
    }

    fn window() -> Vec<Turn> {
        vec![Turn::system("be nice"), Turn::user("hi")]
    }

    #[tokio::test]
    async fn chat_posts_turns_and_reads_content() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "deepseek-chat",
                "stream": false,
                "messages": [
                    {"role": "system", "content": "be nice"},
                    {"role": "user", "content": "hi"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hello!"}}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = provider(&server)
            .chat(&window(), "deepseek-chat")
            .await?;

        assert_eq!(response.content, "hello!");
        assert_eq!(response.usage.map(|u| u.total_tokens), Some(7));
        Ok(())
    }

    #[tokio::test]
    async fn chat_reports_status_and_body_on_failure() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let Err(err) = provider(&server).chat(&window(), "deepseek-chat").await else {
            anyhow::bail!("a 401 response should fail the request");
        };
        let err = err.to_string();

        assert!(err.contains("401"), "{err}");
        assert!(err.contains("invalid api key"), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn chat_rejects_response_without_content() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let result = provider(&server).chat(&window(), "deepseek-chat").await;
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn chat_stream_yields_fragments_until_done() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let stream = provider(&server)
            .chat_stream(&window(), "deepseek-chat")
            .await?;
        let fragments: Vec<String> = stream.try_collect().await?;

        assert_eq!(fragments, vec!["Hel", "lo", "!"]);
        Ok(())
    }

    #[tokio::test]
    async fn sampling_options_are_sent_when_set() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"temperature": 0.5, "max_tokens": 64})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = provider(&server)
            .with_sampling(Some(0.5), Some(64))
            .chat(&window(), "m")
            .await?;
        assert_eq!(response.content, "ok");
        Ok(())
    }
}
