//! Anthropic Claude LLM provider
//!
//! Implements `LlmProvider` against the Anthropic Messages API
//! (`/v1/messages`), which diverges from the OpenAI shape enough (a top-level
//! `system` field, `x-api-key`/`anthropic-version` headers, no embeddings
//! endpoint) to warrant its own adapter rather than reuse of
//! `openai_compatible`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use provider_core::error::{ProviderError, Result};
use provider_core::provider::{
    Cancellation, Completion, CompletionStream, FinishReason, GenerationOptions, ModelInfo,
    ProviderKind, StructuredCompletion, ToolCompletion, ToolCompletionStream, ToolStreamChunk,
};
use provider_core::tool::ToolCall;
use provider_core::{LlmProvider, Message, ProviderInfo, Role, StreamChunk, TokenUsage, ToolSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Clone, Debug)]
pub struct ClaudeConfig {
    pub base_url: String,
    pub api_key: String,
    pub default_model: String,
    pub timeout: Duration,
}

impl ClaudeConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ProviderError::InvalidConfig("ANTHROPIC_API_KEY not set".into()))?;
        let base_url = std::env::var("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com".into());
        let default_model =
            std::env::var("ANTHROPIC_DEFAULT_MODEL").unwrap_or_else(|_| "claude-3-5-sonnet-latest".into());

        Ok(Self {
            base_url,
            api_key,
            default_model,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }
}

pub struct ClaudeProvider {
    client: reqwest::Client,
    config: ClaudeConfig,
}

impl ClaudeProvider {
    pub fn new(config: ClaudeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }

    /// Anthropic pulls system prompts out of `messages` into a dedicated
    /// top-level field; `Role::System` entries are extracted and joined.
    fn split_system(messages: &[Message]) -> (Option<String>, Vec<ClaudeMessage>) {
        let mut system_parts = Vec::new();
        let mut turns = Vec::new();
        for m in messages {
            match m.role {
                Role::System => system_parts.push(m.content.clone()),
                Role::Tool => turns.push(ClaudeMessage { role: "user".into(), content: m.content.clone() }),
                Role::User => turns.push(ClaudeMessage { role: "user".into(), content: m.content.clone() }),
                Role::Assistant => turns.push(ClaudeMessage { role: "assistant".into(), content: m.content.clone() }),
            }
        }
        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n"));
        (system, turns)
    }

    fn request_body(&self, system: Option<String>, messages: Vec<ClaudeMessage>, tools: &[ToolSchema], opts: &GenerationOptions, stream: bool) -> Value {
        let max_tokens = if opts.max_tokens > 0 { opts.max_tokens } else { DEFAULT_MAX_TOKENS };
        let mut body = json!({
            "model": opts.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "top_p": opts.top_p,
            "stream": stream,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if opts.temperature >= 0.0 {
            body["temperature"] = json!(opts.temperature);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools.iter().map(tool_schema_to_claude).collect::<Vec<_>>());
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::ServiceUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::ServiceUnavailable(format!("{status}: {text}")));
        }
        Ok(response)
    }
}

fn tool_schema_to_claude(schema: &ToolSchema) -> Value {
    let properties: serde_json::Map<String, Value> = schema
        .parameters
        .iter()
        .map(|p| (p.name.clone(), json!({ "type": p.param_type, "description": p.description })))
        .collect();
    let required: Vec<&str> = schema.parameters.iter().filter(|p| p.required).map(|p| p.name.as_str()).collect();

    json!({
        "name": schema.name,
        "description": schema.description,
        "input_schema": {
            "type": "object",
            "properties": properties,
            "required": required,
        }
    })
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        Ok(ProviderInfo {
            name: "Claude".into(),
            version: None,
            models: vec![],
            supports_streaming: true,
            supports_tools: true,
        })
    }

    async fn health(&self, mut ctx: Cancellation) -> Result<()> {
        let body = json!({
            "model": self.config.default_model,
            "messages": [{"role": "user", "content": "ping"}],
            "max_tokens": 1,
        });
        tokio::select! {
            biased;
            () = ctx.cancelled() => Err(ProviderError::Other("health check cancelled".into())),
            result = self.post(&body) => result.map(|_| ()),
        }
    }

    async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<Completion> {
        if prompt.is_empty() {
            return Err(ProviderError::InvalidInput("empty prompt".into()));
        }
        let messages = vec![ClaudeMessage { role: "user".into(), content: prompt.to_string() }];
        let body = self.request_body(None, messages, &[], opts, false);
        let response = self.post(&body).await?;
        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::GenerationFailed(e.to_string()))?;
        parsed.into_completion(&opts.model)
    }

    async fn stream(&self, prompt: &str, opts: &GenerationOptions) -> Result<CompletionStream> {
        if prompt.is_empty() {
            return Err(ProviderError::InvalidInput("empty prompt".into()));
        }
        let messages = vec![ClaudeMessage { role: "user".into(), content: prompt.to_string() }];
        let body = self.request_body(None, messages, &[], opts, true);
        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::ServiceUnavailable(e.to_string()))?;

        let byte_stream = response.bytes_stream();
        let chunk_stream = crate::sse::lines(byte_stream).filter_map(|line| async move {
            let data = line.strip_prefix("data: ")?.trim().to_string();
            let event: ClaudeStreamEvent = serde_json::from_str(&data).ok()?;
            match event {
                ClaudeStreamEvent::ContentBlockDelta { delta } => {
                    Some(Ok(StreamChunk { delta: delta.text, done: false, usage: None }))
                }
                ClaudeStreamEvent::MessageDelta { usage } => Some(Ok(StreamChunk {
                    delta: String::new(),
                    done: true,
                    usage: usage.map(Into::into),
                })),
                ClaudeStreamEvent::Other => None,
            }
        });

        Ok(Box::pin(chunk_stream))
    }

    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        opts: &GenerationOptions,
    ) -> Result<ToolCompletion> {
        if messages.is_empty() {
            return Err(ProviderError::InvalidInput("empty messages".into()));
        }
        let (system, turns) = Self::split_system(messages);
        let body = self.request_body(system, turns, tools, opts, false);
        let response = self.post(&body).await?;
        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::GenerationFailed(e.to_string()))?;
        parsed.into_tool_completion()
    }

    async fn stream_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        opts: &GenerationOptions,
    ) -> Result<ToolCompletionStream> {
        // As in the OpenAI-compatible adapter: resolve the whole turn, then
        // replay it as one terminal chunk rather than reassembling Anthropic's
        // `input_json_delta` fragments.
        let completion = self.generate_with_tools(messages, tools, opts).await?;
        let chunk = ToolStreamChunk {
            delta: completion.content,
            tool_calls: completion.tool_calls,
            done: true,
        };
        Ok(Box::pin(futures::stream::once(async move { Ok(chunk) })))
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        opts: &GenerationOptions,
    ) -> Result<StructuredCompletion> {
        let augmented = format!(
            "{prompt}\n\nRespond with JSON matching this schema exactly, no surrounding prose:\n{schema}"
        );
        let completion = self.generate(&augmented, opts).await?;
        let parsed = serde_json::from_str::<Value>(&completion.content);
        Ok(StructuredCompletion {
            valid: parsed.is_ok(),
            data: parsed.ok(),
            raw: completion.content,
        })
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f64>> {
        Err(ProviderError::EmbeddingFailed("Claude does not expose an embeddings endpoint".into()))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .client
            .get(format!("{}/v1/models", self.config.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(|e| ProviderError::ServiceUnavailable(e.to_string()))?;
        let parsed: ModelListResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ServiceUnavailable(e.to_string()))?;
        Ok(parsed
            .data
            .into_iter()
            .map(|m| ModelInfo { id: m.id.clone(), name: m.id, context_length: None, supports_vision: true })
            .collect())
    }

    fn provider_type(&self) -> ProviderKind {
        ProviderKind::Claude
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<ClaudeUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Clone)]
struct ClaudeUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl From<ClaudeUsage> for TokenUsage {
    fn from(u: ClaudeUsage) -> Self {
        TokenUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        }
    }
}

#[derive(Deserialize)]
struct ModelListResponse {
    data: Vec<ModelListEntry>,
}

#[derive(Deserialize)]
struct ModelListEntry {
    id: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeStreamEvent {
    ContentBlockDelta { delta: TextDelta },
    MessageDelta { usage: Option<ClaudeUsage> },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct TextDelta {
    #[serde(default)]
    text: String,
}

impl MessagesResponse {
    fn into_completion(self, model: &str) -> Result<Completion> {
        let text = self
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");
        Ok(Completion {
            content: text,
            model: model.to_string(),
            usage: self.usage.map(Into::into),
            truncated: self.stop_reason.as_deref() == Some("max_tokens"),
            finish_reason: self.stop_reason.as_deref().map(map_stop_reason),
        })
    }

    fn into_tool_completion(self) -> Result<ToolCompletion> {
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in self.content {
            match block {
                ContentBlock::Text { text } => content.push_str(&text),
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall {
                        name,
                        arguments: provider_core::provider::normalise_tool_arguments(&input),
                        id: Some(id),
                    });
                }
                ContentBlock::Other => {}
            }
        }
        let finish_reason = self.stop_reason.as_deref().map(map_stop_reason);
        Ok(ToolCompletion {
            content,
            finished: !matches!(finish_reason, Some(FinishReason::ToolUse)),
            finish_reason,
            usage: self.usage.map(Into::into),
            tool_calls,
        })
    }
}

fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolUse,
        _ => FinishReason::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_system_extracts_system_messages_and_joins_them() {
        let messages = vec![
            Message::system("Be terse."),
            Message::system("Avoid jokes."),
            Message::user("Hi"),
        ];
        let (system, turns) = ClaudeProvider::split_system(&messages);
        assert_eq!(system.as_deref(), Some("Be terse.\nAvoid jokes."));
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, "user");
    }

    #[test]
    fn map_stop_reason_marks_tool_use_as_nonterminal() {
        let finished = !matches!(map_stop_reason("tool_use"), FinishReason::ToolUse);
        assert!(!finished);
    }

    #[test]
    fn config_rejects_missing_api_key() {
        std::env::remove_var("ANTHROPIC_API_KEY");
        assert!(ClaudeConfig::from_env().is_err());
    }
}
