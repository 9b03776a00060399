//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference via `ollama-rs`.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use ollama_rs::{
    generation::{
        chat::{request::ChatMessageRequest, ChatMessage, ChatMessageResponse, MessageRole},
        embeddings::request::GenerateEmbeddingsRequest,
        options::GenerationOptions as OllamaOptions,
    },
    Ollama,
};
use provider_core::error::{ProviderError, Result};
use provider_core::provider::{
    Cancellation, Completion, CompletionStream, FinishReason, GenerationOptions, ModelInfo,
    ProviderKind, StructuredCompletion, ToolCompletion, ToolCompletionStream, ToolStreamChunk,
};
use provider_core::{LlmProvider, Message, ProviderInfo, Role, StreamChunk, TokenUsage, ToolSchema};

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Connection timeout in seconds
    pub timeout_secs: u64,

    /// Model used for the `health` probe (§4.1 requires exercising the
    /// configured model, not merely the backend socket).
    pub default_model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            timeout_secs: 120,
            default_model: "llama3.2".into(),
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);
        let default_model =
            std::env::var("OLLAMA_DEFAULT_MODEL").unwrap_or_else(|_| "llama3.2".into());

        Self {
            host,
            port,
            default_model,
            ..Default::default()
        }
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create a new Ollama provider with custom host/port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let config = OllamaConfig {
            host: host.into(),
            port,
            ..Default::default()
        };

        Self {
            client: Ollama::new(&config.host, config.port),
            config,
        }
    }

    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Self {
        Self {
            client: Ollama::new(&config.host, config.port),
            config,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::from_config(OllamaConfig::from_env())
    }

    /// Create with default localhost settings
    pub fn localhost() -> Self {
        Self::from_config(OllamaConfig::default())
    }

    fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => MessageRole::System,
                    Role::User => MessageRole::User,
                    Role::Assistant => MessageRole::Assistant,
                    Role::Tool => MessageRole::User, // Tools appear as user context
                };
                ChatMessage::new(role, m.content.clone())
            })
            .collect()
    }

    fn convert_completion(response: ChatMessageResponse, model: &str) -> Completion {
        Completion {
            content: response.message.content,
            model: model.to_string(),
            usage: response.final_data.as_ref().map(|d| TokenUsage {
                prompt_tokens: d.prompt_eval_count.unwrap_or(0) as u32,
                completion_tokens: d.eval_count.unwrap_or(0) as u32,
                total_tokens: (d.prompt_eval_count.unwrap_or(0) + d.eval_count.unwrap_or(0)) as u32,
            }),
            truncated: false,
            finish_reason: Some(FinishReason::Stop),
        }
    }

    fn build_options(opts: &GenerationOptions) -> OllamaOptions {
        let mut built = OllamaOptions::default().top_p(opts.top_p);
        if opts.temperature >= 0.0 {
            built = built.temperature(opts.temperature);
        }
        if opts.max_tokens > 0 {
            built = built.num_predict(opts.max_tokens as i32);
        }
        built
    }

    async fn chat(&self, messages: Vec<ChatMessage>, opts: &GenerationOptions) -> Result<Completion> {
        let request = ChatMessageRequest::new(opts.model.clone(), messages)
            .options(Self::build_options(opts));

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| ProviderError::GenerationFailed(e.to_string()))?;

        Ok(Self::convert_completion(response, &opts.model))
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        let models = self.list_models().await.unwrap_or_default();

        Ok(ProviderInfo {
            name: "Ollama".into(),
            version: None,
            models,
            supports_streaming: true,
            // ollama-rs has no native tool-calling API as of this adapter;
            // generate_with_tools degrades to plain chat (see below).
            supports_tools: false,
        })
    }

    async fn health(&self, _ctx: Cancellation) -> Result<()> {
        let messages = vec![ChatMessage::new(MessageRole::User, "ping".into())];
        let request = ChatMessageRequest::new(self.config.default_model.clone(), messages);
        self.client
            .send_chat_messages(request)
            .await
            .map(|_| ())
            .map_err(|e| ProviderError::ServiceUnavailable(e.to_string()))
    }

    async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<Completion> {
        if prompt.is_empty() {
            return Err(ProviderError::InvalidInput("empty prompt".into()));
        }
        let messages = vec![ChatMessage::new(MessageRole::User, prompt.to_string())];
        self.chat(messages, opts).await
    }

    async fn stream(&self, prompt: &str, opts: &GenerationOptions) -> Result<CompletionStream> {
        if prompt.is_empty() {
            return Err(ProviderError::InvalidInput("empty prompt".into()));
        }
        let messages = vec![ChatMessage::new(MessageRole::User, prompt.to_string())];
        let request =
            ChatMessageRequest::new(opts.model.clone(), messages).options(Self::build_options(opts));

        let stream = self
            .client
            .send_chat_messages_stream(request)
            .await
            .map_err(|e| ProviderError::GenerationFailed(e.to_string()))?;

        let mapped = stream.map(|result| {
            result
                .map(|chunk| StreamChunk {
                    delta: chunk.message.content,
                    done: chunk.done.unwrap_or(false),
                    usage: chunk.final_data.as_ref().map(|d| TokenUsage {
                        prompt_tokens: d.prompt_eval_count.unwrap_or(0) as u32,
                        completion_tokens: d.eval_count.unwrap_or(0) as u32,
                        total_tokens: (d.prompt_eval_count.unwrap_or(0) + d.eval_count.unwrap_or(0)) as u32,
                    }),
                })
                .map_err(|e| ProviderError::GenerationFailed(e.to_string()))
        });

        Ok(Box::pin(mapped))
    }

    async fn generate_with_tools(
        &self,
        messages: &[Message],
        _tools: &[ToolSchema],
        opts: &GenerationOptions,
    ) -> Result<ToolCompletion> {
        if messages.is_empty() {
            return Err(ProviderError::InvalidInput("empty messages".into()));
        }
        // No native tool-calling support: degrade to plain chat, reporting no
        // tool calls and a terminal stop (§9's resolved `finished` mapping).
        let completion = self.chat(Self::convert_messages(messages), opts).await?;
        Ok(ToolCompletion {
            content: completion.content,
            tool_calls: vec![],
            finished: true,
            finish_reason: completion.finish_reason,
            usage: completion.usage,
        })
    }

    async fn stream_with_tools(
        &self,
        messages: &[Message],
        _tools: &[ToolSchema],
        opts: &GenerationOptions,
    ) -> Result<ToolCompletionStream> {
        let inner = self.stream(&flatten_messages(messages), opts).await?;
        let mapped = inner.map(|chunk| {
            chunk.map(|c| ToolStreamChunk {
                delta: c.delta,
                tool_calls: vec![],
                done: c.done,
            })
        });
        Ok(Box::pin(mapped))
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
        let parsed = serde_json::from_str::<serde_json::Value>(&completion.content);
        Ok(StructuredCompletion {
            valid: parsed.is_ok(),
            data: parsed.ok(),
            raw: completion.content,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        if text.is_empty() {
            return Err(ProviderError::EmbeddingFailed("empty text".into()));
        }
        let request = GenerateEmbeddingsRequest::new("nomic-embed-text".into(), text.into());
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| ProviderError::EmbeddingFailed(e.to_string()))?;

        let vector = response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::EmbeddingFailed("empty embedding vector".into()))?;
        if vector.is_empty() {
            return Err(ProviderError::EmbeddingFailed("empty embedding vector".into()));
        }
        Ok(vector.into_iter().map(f64::from).collect())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| ProviderError::ServiceUnavailable(e.to_string()))?;

        Ok(models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
                context_length: None,
                supports_vision: false,
            })
            .collect())
    }

    fn provider_type(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn estimate_tokens(&self, text: &str) -> u32 {
        (text.len() / 4) as u32
    }
}

fn flatten_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
