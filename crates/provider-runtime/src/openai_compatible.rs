//! OpenAI-compatible LLM provider
//!
//! Implements `LlmProvider` against the OpenAI chat-completions wire format,
//! which LMStudio and a wide range of self-hosted inference servers also
//! speak. Grounded on the teacher's `StripeClient` shape (a thin wrapper
//! holding an HTTP client plus credentials, constructed via `new`/`from_env`)
//! adapted from the `stripe` crate's typed client to a hand-rolled
//! `reqwest::Client` since no OpenAI SDK is in the corpus.

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

#[derive(Clone, Debug)]
pub struct OpenAiCompatibleConfig {
    pub base_url: String,
    pub api_key: String,
    pub default_model: String,
    pub timeout: Duration,
}

impl OpenAiCompatibleConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::InvalidConfig("OPENAI_API_KEY not set".into()))?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com".into());
        let default_model = std::env::var("OPENAI_DEFAULT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

        Ok(Self {
            base_url,
            api_key,
            default_model,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }
}

pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    config: OpenAiCompatibleConfig,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn chat_body(&self, messages: Vec<ChatMessage>, tools: &[ToolSchema], opts: &GenerationOptions, stream: bool) -> Value {
        let mut body = json!({
            "model": opts.model,
            "messages": messages,
            "top_p": opts.top_p,
            "stream": stream,
        });
        if opts.temperature >= 0.0 {
            body["temperature"] = json!(opts.temperature);
        }
        if opts.max_tokens > 0 {
            body["max_tokens"] = json!(opts.max_tokens);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools.iter().map(tool_schema_to_openai).collect::<Vec<_>>());
            body["tool_choice"] = tool_choice_to_openai(opts);
        }
        body
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(&self.config.api_key)
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

    async fn chat_completion(&self, messages: Vec<ChatMessage>, tools: &[ToolSchema], opts: &GenerationOptions) -> Result<ChatCompletionResponse> {
        let body = self.chat_body(messages, tools, opts, false);
        let response = self.post_json("/v1/chat/completions", &body).await?;
        response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| ProviderError::GenerationFailed(e.to_string()))
    }
}

fn tool_choice_to_openai(opts: &GenerationOptions) -> Value {
    use provider_core::provider::ToolChoice;
    match &opts.tool_choice {
        ToolChoice::Unset | ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Specific(name) => json!({ "type": "function", "function": { "name": name } }),
    }
}

fn tool_schema_to_openai(schema: &ToolSchema) -> Value {
    let properties: serde_json::Map<String, Value> = schema
        .parameters
        .iter()
        .map(|p| {
            let mut prop = json!({ "type": p.param_type, "description": p.description });
            if let Some(enum_values) = &p.enum_values {
                prop["enum"] = json!(enum_values);
            }
            (p.name.clone(), prop)
        })
        .collect();
    let required: Vec<&str> = schema
        .parameters
        .iter()
        .filter(|p| p.required)
        .map(|p| p.name.as_str())
        .collect();

    json!({
        "type": "function",
        "function": {
            "name": schema.name,
            "description": schema.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        }
    })
}

fn messages_to_openai(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| ChatMessage {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            }
            .to_string(),
            content: m.content.clone(),
        })
        .collect()
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        Ok(ProviderInfo {
            name: "OpenAI-compatible".into(),
            version: None,
            models: self.list_models().await.unwrap_or_default(),
            supports_streaming: true,
            supports_tools: true,
        })
    }

    async fn health(&self, mut ctx: Cancellation) -> Result<()> {
        let body = json!({ "model": self.config.default_model, "messages": [{"role": "user", "content": "ping"}], "max_tokens": 1 });
        tokio::select! {
            biased;
            () = ctx.cancelled() => Err(ProviderError::Other("health check cancelled".into())),
            result = self.post_json("/v1/chat/completions", &body) => result.map(|_| ()),
        }
    }

    async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<Completion> {
        if prompt.is_empty() {
            return Err(ProviderError::InvalidInput("empty prompt".into()));
        }
        let messages = vec![ChatMessage { role: "user".into(), content: prompt.to_string() }];
        let response = self.chat_completion(messages, &[], opts).await?;
        response.into_completion(&opts.model)
    }

    async fn stream(&self, prompt: &str, opts: &GenerationOptions) -> Result<CompletionStream> {
        if prompt.is_empty() {
            return Err(ProviderError::InvalidInput("empty prompt".into()));
        }
        let messages = vec![ChatMessage { role: "user".into(), content: prompt.to_string() }];
        let body = self.chat_body(messages, &[], opts, true);
        let response = self
            .client
            .post(self.endpoint("/v1/chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::ServiceUnavailable(e.to_string()))?;

        let byte_stream = response.bytes_stream();
        let chunk_stream = crate::sse::lines(byte_stream).filter_map(|line| async move {
            let data = line.strip_prefix("data: ")?.trim();
            if data == "[DONE]" {
                return Some(Ok(StreamChunk { delta: String::new(), done: true, usage: None }));
            }
            let parsed: StreamChunkResponse = serde_json::from_str(data).ok()?;
            let choice = parsed.choices.into_iter().next()?;
            Some(Ok(StreamChunk {
                delta: choice.delta.content.unwrap_or_default(),
                done: choice.finish_reason.is_some(),
                usage: parsed.usage.map(Into::into),
            }))
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
        let response = self.chat_completion(messages_to_openai(messages), tools, opts).await?;
        response.into_tool_completion()
    }

    async fn stream_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        opts: &GenerationOptions,
    ) -> Result<ToolCompletionStream> {
        // Tool-call deltas arrive fragmented across SSE events in the native
        // wire format; this adapter resolves the full completion and replays
        // it as a single terminal chunk rather than reassembling fragments,
        // keeping the ordering invariant (tool calls ride with their text)
        // trivially true.
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
        let messages = vec![ChatMessage { role: "user".into(), content: prompt.to_string() }];
        let mut body = self.chat_body(messages, &[], opts, false);
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": { "name": "response", "schema": schema, "strict": true },
        });
        let response = self.post_json("/v1/chat/completions", &body).await?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::GenerationFailed(e.to_string()))?;
        let completion = parsed.into_completion(&opts.model)?;
        let data = serde_json::from_str::<Value>(&completion.content);
        Ok(StructuredCompletion {
            valid: data.is_ok(),
            data: data.ok(),
            raw: completion.content,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        if text.is_empty() {
            return Err(ProviderError::EmbeddingFailed("empty text".into()));
        }
        let body = json!({ "model": "text-embedding-3-small", "input": text });
        let response = self.post_json("/v1/embeddings", &body).await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::EmbeddingFailed(e.to_string()))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::EmbeddingFailed("empty embedding vector".into()))?;
        if vector.is_empty() {
            return Err(ProviderError::EmbeddingFailed("empty embedding vector".into()));
        }
        Ok(vector)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .client
            .get(self.endpoint("/v1/models"))
            .bearer_auth(&self.config.api_key)
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
            .map(|m| ModelInfo { id: m.id.clone(), name: m.id, context_length: None, supports_vision: false })
            .collect())
    }

    fn provider_type(&self) -> ProviderKind {
        ProviderKind::OpenAiCompatible
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatCompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAiToolCall>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunctionCall,
}

#[derive(Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct StreamChunkResponse {
    choices: Vec<StreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize, Clone)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<OpenAiUsage> for TokenUsage {
    fn from(u: OpenAiUsage) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f64>,
}

#[derive(Deserialize)]
struct ModelListResponse {
    data: Vec<ModelListEntry>,
}

#[derive(Deserialize)]
struct ModelListEntry {
    id: String,
}

impl ChatCompletionResponse {
    fn into_completion(self, model: &str) -> Result<Completion> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::GenerationFailed("no choices returned".into()))?;
        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            model: model.to_string(),
            usage: self.usage.map(Into::into),
            truncated: choice.finish_reason.as_deref() == Some("length"),
            finish_reason: choice.finish_reason.as_deref().map(map_finish_reason),
        })
    }

    fn into_tool_completion(self) -> Result<ToolCompletion> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::GenerationFailed("no choices returned".into()))?;
        let finish_reason = choice.finish_reason.as_deref().map(map_finish_reason);
        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| ToolCall {
                name: call.function.name,
                arguments: provider_core::provider::normalise_tool_arguments(&json!(call.function.arguments)),
                id: Some(call.id),
            })
            .collect();
        Ok(ToolCompletion {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            finished: !matches!(finish_reason, Some(FinishReason::ToolUse)),
            finish_reason,
            usage: self.usage.map(Into::into),
        })
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolUse,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_choice_required_maps_to_openai_literal() {
        let mut opts = GenerationOptions::default();
        opts.tool_choice = provider_core::provider::ToolChoice::Required;
        assert_eq!(tool_choice_to_openai(&opts), json!("required"));
    }

    #[test]
    fn map_finish_reason_defaults_unknown_to_error() {
        assert_eq!(map_finish_reason("something_new"), FinishReason::Error);
        assert_eq!(map_finish_reason("tool_calls"), FinishReason::ToolUse);
    }

    #[test]
    fn tool_schema_to_openai_marks_required_parameters() {
        let schema = ToolSchema {
            name: "search".into(),
            description: "search the web".into(),
            parameters: vec![provider_core::tool::ParameterSchema {
                name: "query".into(),
                param_type: "string".into(),
                description: "query text".into(),
                required: true,
                default: None,
                enum_values: None,
            }],
            category: None,
            has_side_effects: false,
        };
        let value = tool_schema_to_openai(&schema);
        assert_eq!(value["function"]["parameters"]["required"][0], "query");
    }
}
