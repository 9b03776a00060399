//! Test-only fake provider, grounded on the pack's `MockBehavior<T>` style of
//! driving canned outcomes from outside the implementation under test.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use provider_core::error::{ProviderError, Result};
use provider_core::provider::{
    Cancellation, Completion, CompletionStream, FinishReason, GenerationOptions, ModelInfo,
    ProviderKind, StructuredCompletion, ToolCompletion, ToolCompletionStream,
};
use provider_core::{LlmProvider, Message, ProviderInfo, ToolSchema};
use tokio::sync::Mutex;

/// Canned behavior for one call to a `FakeProvider`.
#[derive(Clone)]
pub enum MockBehavior {
    Succeed,
    Fail(String),
    Hang,
}

/// A fully in-memory `LlmProvider` used across `provider-pool`'s test suites.
///
/// `fail_first_n` lets a test simulate "this provider fails its first K
/// calls, then starts succeeding" — the shape the retry-engine and
/// circuit-breaker tests need most.
pub struct FakeProvider {
    name: String,
    behavior: Mutex<MockBehavior>,
    health_behavior: Mutex<MockBehavior>,
    call_count: AtomicU32,
    fail_first_n: u32,
    latency: Duration,
}

impl FakeProvider {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behavior: Mutex::new(MockBehavior::Succeed),
            health_behavior: Mutex::new(MockBehavior::Succeed),
            call_count: AtomicU32::new(0),
            fail_first_n: 0,
            latency: Duration::ZERO,
        }
    }

    pub fn unhealthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behavior: Mutex::new(MockBehavior::Fail("unhealthy".into())),
            health_behavior: Mutex::new(MockBehavior::Fail("unhealthy".into())),
            call_count: AtomicU32::new(0),
            fail_first_n: 0,
            latency: Duration::ZERO,
        }
    }

    pub fn failing_n_times(name: impl Into<String>, n: u32) -> Self {
        Self {
            name: name.into(),
            behavior: Mutex::new(MockBehavior::Succeed),
            health_behavior: Mutex::new(MockBehavior::Succeed),
            call_count: AtomicU32::new(0),
            fail_first_n: n,
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().await = behavior;
    }

    pub fn calls(&self) -> u32 {
        self.call_count.load(Ordering::Acquire)
    }

    async fn resolve(&self) -> Result<()> {
        let attempt = self.call_count.fetch_add(1, Ordering::AcqRel) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if attempt <= self.fail_first_n {
            return Err(ProviderError::ServiceUnavailable(format!(
                "{} failing attempt {attempt}/{}",
                self.name, self.fail_first_n
            )));
        }
        match &*self.behavior.lock().await {
            MockBehavior::Succeed => Ok(()),
            MockBehavior::Fail(msg) => Err(ProviderError::ServiceUnavailable(msg.clone())),
            MockBehavior::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl LlmProvider for FakeProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        Ok(ProviderInfo {
            name: self.name.clone(),
            version: None,
            models: vec![],
            supports_streaming: true,
            supports_tools: true,
        })
    }

    async fn health(&self, _ctx: Cancellation) -> Result<()> {
        match &*self.health_behavior.lock().await {
            MockBehavior::Succeed => Ok(()),
            MockBehavior::Fail(msg) => Err(ProviderError::ServiceUnavailable(msg.clone())),
            MockBehavior::Hang => std::future::pending().await,
        }
    }

    async fn generate(&self, prompt: &str, _opts: &GenerationOptions) -> Result<Completion> {
        if prompt.is_empty() {
            return Err(ProviderError::InvalidInput("empty prompt".into()));
        }
        self.resolve().await?;
        Ok(Completion {
            content: format!("{}: {prompt}", self.name),
            model: "fake-model".into(),
            usage: None,
            truncated: false,
            finish_reason: Some(FinishReason::Stop),
        })
    }

    async fn stream(&self, prompt: &str, _opts: &GenerationOptions) -> Result<CompletionStream> {
        self.resolve().await?;
        let chunk = provider_core::provider::StreamChunk {
            delta: prompt.to_string(),
            done: true,
            usage: None,
        };
        Ok(Box::pin(futures::stream::once(async move { Ok(chunk) })))
    }

    async fn generate_with_tools(
        &self,
        _messages: &[Message],
        _tools: &[ToolSchema],
        _opts: &GenerationOptions,
    ) -> Result<ToolCompletion> {
        self.resolve().await?;
        Ok(ToolCompletion {
            content: format!("{}: no tool calls", self.name),
            tool_calls: vec![],
            finished: true,
            finish_reason: Some(FinishReason::Stop),
            usage: None,
        })
    }

    async fn stream_with_tools(
        &self,
        _messages: &[Message],
        _tools: &[ToolSchema],
        _opts: &GenerationOptions,
    ) -> Result<ToolCompletionStream> {
        self.resolve().await?;
        let chunk = provider_core::provider::ToolStreamChunk {
            delta: String::new(),
            tool_calls: vec![],
            done: true,
        };
        Ok(Box::pin(futures::stream::once(async move { Ok(chunk) })))
    }

    async fn generate_structured(
        &self,
        _prompt: &str,
        _schema: &serde_json::Value,
        _opts: &GenerationOptions,
    ) -> Result<StructuredCompletion> {
        self.resolve().await?;
        Ok(StructuredCompletion {
            data: Some(serde_json::json!({})),
            raw: "{}".into(),
            valid: true,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        if text.is_empty() {
            return Err(ProviderError::EmbeddingFailed("empty text".into()));
        }
        self.resolve().await?;
        Ok(vec![0.1, 0.2, 0.3])
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![])
    }

    fn provider_type(&self) -> ProviderKind {
        ProviderKind::Ollama
    }
}
