//! Tracked Wrapper (C11)
//!
//! Decorates any `LlmProvider` with usage-accounting hooks, pass-through on
//! every failure mode — tracking never changes outcomes. Grounded on the
//! teacher pack's `BlacklistConnector`, a connector decorator that wraps an
//! inner `BorsaConnector` and forwards every call unchanged while adding one
//! side effect of its own.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use provider_core::error::Result as ProviderResult;
use provider_core::provider::{
    Cancellation, Completion, CompletionStream, GenerationOptions, ModelInfo, ProviderKind,
    StructuredCompletion, ToolCompletion, ToolCompletionStream,
};
use provider_core::{LlmProvider, Message, ProviderInfo, Role, ToolSchema};

/// Narrow collaborator contract a usage sink must satisfy. Production wiring
/// (telemetry backend, billing system) is outside this crate's scope; tests
/// supply an in-memory recorder instead.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn add_message(&self, role: Role, content: &str);
    async fn track_llm_call(&self, backend: ProviderKind, model: &str, input: &str, output: &str, started: Instant);
    async fn track_mcp_call(&self, name: &str, args: &serde_json::Value, started: Instant);
    async fn track_error(&self, kind: &str, backend: ProviderKind, model: &str, reason: &str, started: Instant);
}

/// No-op sink for callers who don't need usage tracking.
pub struct NullUsageSink;

#[async_trait]
impl UsageSink for NullUsageSink {
    async fn add_message(&self, _role: Role, _content: &str) {}
    async fn track_llm_call(&self, _backend: ProviderKind, _model: &str, _input: &str, _output: &str, _started: Instant) {}
    async fn track_mcp_call(&self, _name: &str, _args: &serde_json::Value, _started: Instant) {}
    async fn track_error(&self, _kind: &str, _backend: ProviderKind, _model: &str, _reason: &str, _started: Instant) {}
}

/// Wraps any `LlmProvider`, emitting usage events to a supplied sink around
/// every call. Every method is a thin pass-through: the wrapped provider's
/// result or error is returned unchanged, the sink only observes.
pub struct TrackedProvider<S: UsageSink> {
    inner: Arc<dyn LlmProvider>,
    sink: Arc<S>,
}

impl<S: UsageSink> TrackedProvider<S> {
    pub fn new(inner: Arc<dyn LlmProvider>, sink: Arc<S>) -> Self {
        Self { inner, sink }
    }
}

#[async_trait]
impl<S: UsageSink + 'static> LlmProvider for TrackedProvider<S> {
    async fn info(&self) -> ProviderResult<ProviderInfo> {
        self.inner.info().await
    }

    async fn health(&self, ctx: Cancellation) -> ProviderResult<()> {
        self.inner.health(ctx).await
    }

    async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> ProviderResult<Completion> {
        self.sink.add_message(Role::User, prompt).await;
        let started = Instant::now();
        let result = self.inner.generate(prompt, opts).await;
        match &result {
            Ok(completion) => {
                self.sink.add_message(Role::Assistant, &completion.content).await;
                self.sink
                    .track_llm_call(
                        self.inner.provider_type(),
                        &opts.model,
                        prompt,
                        &completion.content,
                        started,
                    )
                    .await;
            }
            Err(err) => {
                self.sink
                    .track_error("generate", self.inner.provider_type(), &opts.model, &err.to_string(), started)
                    .await;
            }
        }
        result
    }

    async fn stream(&self, prompt: &str, opts: &GenerationOptions) -> ProviderResult<CompletionStream> {
        self.sink.add_message(Role::User, prompt).await;
        self.inner.stream(prompt, opts).await
    }

    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        opts: &GenerationOptions,
    ) -> ProviderResult<ToolCompletion> {
        let started = Instant::now();
        let result = self.inner.generate_with_tools(messages, tools, opts).await;
        match &result {
            Ok(completion) => {
                self.sink.add_message(Role::Assistant, &completion.content).await;
                for call in &completion.tool_calls {
                    self.sink
                        .track_mcp_call(&call.name, &serde_json::to_value(&call.arguments).unwrap_or_default(), started)
                        .await;
                }
                self.sink
                    .track_llm_call(self.inner.provider_type(), &opts.model, "", &completion.content, started)
                    .await;
            }
            Err(err) => {
                self.sink
                    .track_error("generate_with_tools", self.inner.provider_type(), &opts.model, &err.to_string(), started)
                    .await;
            }
        }
        result
    }

    async fn stream_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        opts: &GenerationOptions,
    ) -> ProviderResult<ToolCompletionStream> {
        self.inner.stream_with_tools(messages, tools, opts).await
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        opts: &GenerationOptions,
    ) -> ProviderResult<StructuredCompletion> {
        let started = Instant::now();
        let result = self.inner.generate_structured(prompt, schema, opts).await;
        if let Err(err) = &result {
            self.sink
                .track_error("generate_structured", self.inner.provider_type(), &opts.model, &err.to_string(), started)
                .await;
        }
        result
    }

    async fn embed(&self, text: &str) -> ProviderResult<Vec<f64>> {
        self.inner.embed(text).await
    }

    async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>> {
        self.inner.list_models().await
    }

    fn provider_type(&self) -> ProviderKind {
        self.inner.provider_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeProvider;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<(String, String)>>,
        errors: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UsageSink for RecordingSink {
        async fn add_message(&self, role: Role, content: &str) {
            self.messages.lock().await.push((format!("{role:?}"), content.to_string()));
        }
        async fn track_llm_call(&self, _backend: ProviderKind, _model: &str, _input: &str, _output: &str, _started: Instant) {}
        async fn track_mcp_call(&self, _name: &str, _args: &serde_json::Value, _started: Instant) {}
        async fn track_error(&self, kind: &str, _backend: ProviderKind, _model: &str, reason: &str, _started: Instant) {
            self.errors.lock().await.push(format!("{kind}: {reason}"));
        }
    }

    #[tokio::test]
    async fn records_user_and_assistant_messages_on_success() {
        let sink = Arc::new(RecordingSink::default());
        let tracked = TrackedProvider::new(Arc::new(FakeProvider::healthy("p1")), Arc::clone(&sink));

        tracked.generate("hi", &GenerationOptions::default()).await.unwrap();

        let messages = sink.messages.lock().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].1, "hi");
    }

    #[tokio::test]
    async fn tracking_never_changes_the_outcome_of_a_failing_call() {
        let sink = Arc::new(RecordingSink::default());
        let tracked = TrackedProvider::new(Arc::new(FakeProvider::unhealthy("p1")), Arc::clone(&sink));

        let result = tracked.generate("hi", &GenerationOptions::default()).await;
        assert!(result.is_err());
        assert_eq!(sink.errors.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn null_usage_sink_is_a_true_no_op() {
        let tracked = TrackedProvider::new(Arc::new(FakeProvider::healthy("p1")), Arc::new(NullUsageSink));
        let completion = tracked.generate("hi", &GenerationOptions::default()).await.unwrap();
        assert!(completion.content.ends_with("hi"));
    }
}
