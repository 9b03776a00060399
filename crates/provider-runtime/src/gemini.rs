//! Google Gemini LLM provider
//!
//! Implements `LlmProvider` against the `:generateContent`/`:streamGenerateContent`
//! REST API. The wire shape nests content under `contents[].parts[].text`
//! with a `role` of `user`/`model` only (no `system`/`assistant`/`tool`
//! vocabulary), and auth rides as a query-string API key rather than a
//! header — different enough from both other vendors to need its own codec.

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
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: String,
    pub default_model: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ProviderError::InvalidConfig("GEMINI_API_KEY not set".into()))?;
        let base_url = std::env::var("GEMINI_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into());
        let default_model =
            std::env::var("GEMINI_DEFAULT_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".into());

        Ok(Self {
            base_url,
            api_key,
            default_model,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }
}

pub struct GeminiProvider {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:{method}?key={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_key
        )
    }

    fn to_contents(messages: &[Message]) -> (Option<Value>, Vec<GeminiContent>) {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();
        for m in messages {
            match m.role {
                Role::System => system_parts.push(m.content.clone()),
                Role::User | Role::Tool => contents.push(GeminiContent {
                    role: "user".into(),
                    parts: vec![GeminiPart { text: m.content.clone() }],
                }),
                Role::Assistant => contents.push(GeminiContent {
                    role: "model".into(),
                    parts: vec![GeminiPart { text: m.content.clone() }],
                }),
            }
        }
        let system_instruction = (!system_parts.is_empty())
            .then(|| json!({ "parts": [{ "text": system_parts.join("\n") }] }));
        (system_instruction, contents)
    }

    fn request_body(&self, messages: &[Message], tools: &[ToolSchema], opts: &GenerationOptions) -> Value {
        let (system_instruction, contents) = Self::to_contents(messages);
        let mut generation_config = json!({ "topP": opts.top_p });
        if opts.temperature >= 0.0 {
            generation_config["temperature"] = json!(opts.temperature);
        }
        if opts.max_tokens > 0 {
            generation_config["maxOutputTokens"] = json!(opts.max_tokens);
        }
        if !opts.stop_sequences.is_empty() {
            generation_config["stopSequences"] = json!(opts.stop_sequences);
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if let Some(system_instruction) = system_instruction {
            body["systemInstruction"] = system_instruction;
        }
        if !tools.is_empty() {
            body["tools"] = json!([{ "functionDeclarations": tools.iter().map(tool_schema_to_gemini).collect::<Vec<_>>() }]);
        }
        body
    }

    async fn post(&self, model: &str, method: &str, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint(model, method))
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

fn tool_schema_to_gemini(schema: &ToolSchema) -> Value {
    let properties: serde_json::Map<String, Value> = schema
        .parameters
        .iter()
        .map(|p| (p.name.clone(), json!({ "type": p.param_type.to_uppercase(), "description": p.description })))
        .collect();
    let required: Vec<&str> = schema.parameters.iter().filter(|p| p.required).map(|p| p.name.as_str()).collect();

    json!({
        "name": schema.name,
        "description": schema.description,
        "parameters": {
            "type": "OBJECT",
            "properties": properties,
            "required": required,
        }
    })
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        Ok(ProviderInfo {
            name: "Gemini".into(),
            version: None,
            models: self.list_models().await.unwrap_or_default(),
            supports_streaming: true,
            supports_tools: true,
        })
    }

    async fn health(&self, mut ctx: Cancellation) -> Result<()> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": "ping" }] }],
            "generationConfig": { "maxOutputTokens": 1 },
        });
        tokio::select! {
            biased;
            () = ctx.cancelled() => Err(ProviderError::Other("health check cancelled".into())),
            result = self.post(&self.config.default_model, "generateContent", &body) => result.map(|_| ()),
        }
    }

    async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<Completion> {
        if prompt.is_empty() {
            return Err(ProviderError::InvalidInput("empty prompt".into()));
        }
        let messages = vec![Message::user(prompt)];
        let body = self.request_body(&messages, &[], opts);
        let response = self.post(&opts.model, "generateContent", &body).await?;
        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::GenerationFailed(e.to_string()))?;
        parsed.into_completion(&opts.model)
    }

    async fn stream(&self, prompt: &str, opts: &GenerationOptions) -> Result<CompletionStream> {
        if prompt.is_empty() {
            return Err(ProviderError::InvalidInput("empty prompt".into()));
        }
        let messages = vec![Message::user(prompt)];
        let body = self.request_body(&messages, &[], opts);
        let url = format!(
            "{}&alt=sse",
            self.endpoint(&opts.model, "streamGenerateContent")
        );
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::ServiceUnavailable(e.to_string()))?;

        let byte_stream = response.bytes_stream();
        let chunk_stream = crate::sse::lines(byte_stream).filter_map(|line| async move {
            let data = line.strip_prefix("data: ")?.trim();
            let parsed: GenerateContentResponse = serde_json::from_str(data).ok()?;
            let candidate = parsed.candidates.into_iter().next()?;
            let text = candidate
                .content
                .parts
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("");
            Some(Ok(StreamChunk {
                delta: text,
                done: candidate.finish_reason.is_some(),
                usage: parsed.usage_metadata.map(Into::into),
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
        let body = self.request_body(messages, tools, opts);
        let response = self.post(&opts.model, "generateContent", &body).await?;
        let parsed: GenerateContentResponse = response
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
        let messages = vec![Message::user(prompt)];
        let mut body = self.request_body(&messages, &[], opts);
        body["generationConfig"]["responseMimeType"] = json!("application/json");
        body["generationConfig"]["responseSchema"] = schema.clone();
        let response = self.post(&opts.model, "generateContent", &body).await?;
        let parsed: GenerateContentResponse = response
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
        let body = json!({ "content": { "parts": [{ "text": text }] } });
        let response = self.post("text-embedding-004", "embedContent", &body).await
            .map_err(|e| ProviderError::EmbeddingFailed(e.to_string()))?;
        let parsed: EmbedContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::EmbeddingFailed(e.to_string()))?;
        if parsed.embedding.values.is_empty() {
            return Err(ProviderError::EmbeddingFailed("empty embedding vector".into()));
        }
        Ok(parsed.embedding.values)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!(
            "{}/v1beta/models?key={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_key
        );
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::ServiceUnavailable(e.to_string()))?;
        let parsed: ModelListResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ServiceUnavailable(e.to_string()))?;
        Ok(parsed
            .models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.trim_start_matches("models/").to_string(),
                name: m.display_name.unwrap_or(m.name),
                context_length: m.input_token_limit,
                supports_vision: false,
            })
            .collect())
    }

    fn provider_type(&self) -> ProviderKind {
        ProviderKind::Gemini
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct Candidate {
    content: GeminiContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
    #[serde(rename = "functionCall", default)]
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    args: Value,
}

#[derive(Deserialize, Clone)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount")]
    total_token_count: u32,
}

impl From<GeminiUsage> for TokenUsage {
    fn from(u: GeminiUsage) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }
    }
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f64>,
}

#[derive(Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    name: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(rename = "inputTokenLimit")]
    input_token_limit: Option<u32>,
}

impl GenerateContentResponse {
    fn into_completion(self, model: &str) -> Result<Completion> {
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::GenerationFailed("no candidates returned".into()))?;
        let text = candidate.content.parts.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join("");
        Ok(Completion {
            content: text,
            model: model.to_string(),
            usage: self.usage_metadata.map(Into::into),
            truncated: candidate.finish_reason.as_deref() == Some("MAX_TOKENS"),
            finish_reason: candidate.finish_reason.as_deref().map(map_finish_reason),
        })
    }

    fn into_tool_completion(self) -> Result<ToolCompletion> {
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::GenerationFailed("no candidates returned".into()))?;
        let text = candidate.content.parts.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join("");
        let tool_calls = candidate
            .function_call
            .into_iter()
            .map(|call| ToolCall {
                name: call.name,
                arguments: provider_core::provider::normalise_tool_arguments(&call.args),
                id: None,
            })
            .collect::<Vec<_>>();
        let finish_reason = candidate.finish_reason.as_deref().map(map_finish_reason);
        let finished = tool_calls.is_empty() || !matches!(finish_reason, Some(FinishReason::ToolUse));
        Ok(ToolCompletion {
            content: text,
            tool_calls,
            finished,
            finish_reason,
            usage: self.usage_metadata.map(Into::into),
        })
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" => FinishReason::ContentFilter,
        _ => FinishReason::Error,
    }
}
