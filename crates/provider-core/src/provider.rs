//! The Provider Contract (C1)
//!
//! Defines the uniform interface every backend kind implements: Ollama,
//! OpenAI-compatible, LMStudio, Claude, Gemini, or a pool facade standing in
//! for all of them. Callers work exclusively through this trait.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;

use crate::error::Result;
use crate::message::Message;
use crate::tool::{ToolCall, ToolSchema};

/// A cancellation handle threaded through every call site, per the design note
/// that cancellation should be an explicit context object rather than a
/// global flag or exception. Cloning shares the same underlying signal, so a
/// single `cancel()` call reaches every clone (needed for the gateway's
/// broadcast-shaped `/cancel` command as well as the retry engine's
/// single-call cancellation).
#[derive(Clone, Debug)]
pub struct Cancellation {
    rx: tokio::sync::watch::Receiver<bool>,
}

/// The writer half of a `Cancellation`. Dropping it without calling `cancel()`
/// leaves the handle permanently un-cancelled.
#[derive(Debug)]
pub struct CancellationSource {
    tx: tokio::sync::watch::Sender<bool>,
}

impl CancellationSource {
    /// Signal cancellation to every `Cancellation` clone derived from this source.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Cancellation {
    /// Create a fresh, un-cancelled pair.
    pub fn new() -> (CancellationSource, Self) {
        let (tx, rx) = tokio::sync::watch::channel(false);
        (CancellationSource { tx }, Self { rx })
    }

    /// A handle that never cancels, for callers with nothing to cancel on.
    pub fn none() -> Self {
        let (_tx, rx) = tokio::sync::watch::channel(false);
        Self { rx }
    }

    /// True if cancellation has already been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Intended for use inside
    /// `tokio::select!` alongside the in-flight work being cancelled.
    pub async fn cancelled(&mut self) {
        if self.is_cancelled() {
            return;
        }
        // `changed()` only errors if every sender was dropped; in that case
        // the signal can never fire, so wait forever rather than false-positive.
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::none()
    }
}

/// Generation options recognised by every LLM provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "llama3.2", "gpt-4", "claude-3-sonnet").
    pub model: String,

    /// Sampling temperature. Negative means "unset" — the provider uses its
    /// own default rather than sending an explicit value.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate. Zero means "unset".
    #[serde(default)]
    pub max_tokens: u32,

    /// Top-p nucleus sampling.
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Stop sequences.
    #[serde(default)]
    pub stop_sequences: Vec<String>,

    /// System prompt override, if the provider supports it out-of-band.
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Tool-choice directive for `generate_with_tools`/`stream_with_tools`.
    #[serde(default)]
    pub tool_choice: ToolChoice,
}

fn default_temperature() -> f32 {
    -1.0
}
fn default_top_p() -> f32 {
    0.9
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "llama3.2".into(),
            temperature: default_temperature(),
            max_tokens: 0,
            top_p: default_top_p(),
            stop_sequences: Vec::new(),
            system_prompt: None,
            tool_choice: ToolChoice::default(),
        }
    }
}

/// How a provider should decide whether, and which, tool to call.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// Let the backend decide (most providers' default).
    #[default]
    Unset,
    /// Backend may call a tool if it judges one relevant.
    Auto,
    /// Backend must not call any tool.
    None,
    /// Backend must call some tool.
    Required,
    /// Backend must call this specific tool.
    Specific(String),
}

/// Response from a non-streaming completion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub truncated: bool,
    pub finish_reason: Option<FinishReason>,
}

/// Response from `generate_with_tools`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCompletion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// True iff the backend indicated a terminal stop. Per the resolved open
    /// question in DESIGN.md, this is computed as
    /// `!matches!(finish_reason, Some(FinishReason::ToolUse))`.
    pub finished: bool,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<TokenUsage>,
}

/// Response from `generate_structured`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StructuredCompletion {
    /// Parsed data, present when `valid` is true.
    pub data: Option<serde_json::Value>,
    /// Raw backend text, always present for diagnostics.
    pub raw: String,
    /// Whether `raw` parsed against the requested schema.
    pub valid: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
}

/// A fragment from a plain streaming completion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: String,
    pub done: bool,
    pub usage: Option<TokenUsage>,
}

/// A fragment from `stream_with_tools`: text plus any tool-call deltas that
/// accompany it. Per the ordering invariant, tool-call deltas are surfaced
/// alongside their accompanying text chunk, never separately.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolStreamChunk {
    pub delta: String,
    pub tool_calls: Vec<ToolCall>,
    pub done: bool,
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;
pub type ToolCompletionStream = Pin<Box<dyn Stream<Item = Result<ToolStreamChunk>> + Send>>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub version: Option<String>,
    pub models: Vec<ModelInfo>,
    pub supports_streaming: bool,
    pub supports_tools: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub context_length: Option<u32>,
    pub supports_vision: bool,
}

/// Vendor family a provider adapter belongs to, used by the pool's status
/// reporting and by the factory's dynamic-config discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    OpenAiCompatible,
    LmStudio,
    Claude,
    Gemini,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAiCompatible => "openai_compatible",
            ProviderKind::LmStudio => "lmstudio",
            ProviderKind::Claude => "claude",
            ProviderKind::Gemini => "gemini",
        };
        write!(f, "{label}")
    }
}

/// The uniform capability surface every backend implements.
///
/// The pool facade (see `provider-pool`) implements this same trait,
/// delegating to the selector and retry engine, so callers cannot tell
/// whether they are talking to a single provider or a fully routed pool.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider metadata and capabilities.
    async fn info(&self) -> Result<ProviderInfo>;

    /// Exercise the *configured* model, not merely the backend socket.
    async fn health(&self, ctx: Cancellation) -> Result<()>;

    /// Generate a completion from a single prompt.
    async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<Completion>;

    /// Generate a streaming completion from a single prompt.
    async fn stream(&self, prompt: &str, opts: &GenerationOptions) -> Result<CompletionStream>;

    /// Generate a completion that may include tool calls.
    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        opts: &GenerationOptions,
    ) -> Result<ToolCompletion>;

    /// Generate a streaming completion that may include tool calls.
    async fn stream_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        opts: &GenerationOptions,
    ) -> Result<ToolCompletionStream>;

    /// Generate a completion constrained to a JSON schema, using a
    /// backend-native schema-constrained path when one is available.
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        opts: &GenerationOptions,
    ) -> Result<StructuredCompletion>;

    /// Embed text into a vector. Embedder-only; non-embedding providers
    /// return `ProviderError::EmbeddingFailed`.
    async fn embed(&self, text: &str) -> Result<Vec<f64>>;

    /// List available models.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Vendor family label.
    fn provider_type(&self) -> ProviderKind;

    /// Estimate token count for text (provider-specific tokenization).
    fn estimate_tokens(&self, text: &str) -> u32 {
        (text.len() / 4) as u32
    }
}

/// Normalise a raw argument value into the map-of-name→value shape the
/// Provider Contract requires, accepting either a JSON object already in that
/// shape or a string-encoded JSON object (the two representations vendors use
/// in practice, per the design note on tool-call argument normalisation).
pub fn normalise_tool_arguments(raw: &serde_json::Value) -> HashMap<String, serde_json::Value> {
    match raw {
        serde_json::Value::Object(map) => map.clone().into_iter().collect(),
        serde_json::Value::String(s) => serde_json::from_str::<serde_json::Value>(s)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .map(|map| map.into_iter().collect())
            .unwrap_or_default(),
        _ => HashMap::new(),
    }
}
