//! Pool Facade (C8)
//!
//! Implements the Provider Contract itself, delegating every method to the
//! retry engine (C7), which in turn consults the selector (C6). Grounded on
//! the teacher pack's `Borsa`/`BorsaBuilder` chained-builder orchestrator
//! that fronts a set of registered connectors the same way this pool fronts
//! a set of registered providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provider_core::error::{PoolError, ProviderError, Result as ProviderResult};
use provider_core::provider::{
    Cancellation, Completion, CompletionStream, GenerationOptions, ModelInfo, ProviderKind,
    StructuredCompletion, ToolCompletion, ToolCompletionStream,
};
use provider_core::{LlmProvider, Message, ProviderInfo, ToolSchema};

use crate::circuit::CircuitState;
use crate::health::HealthMonitor;
use crate::metrics::MetricsSnapshot;
use crate::retry::{call_with_retry, RetryConfig};
use crate::selector::{SelectionStrategy, Selector};
use crate::status::{ProviderHandle, ProviderHandleConfig};

/// Builder for a [`Pool`]. Mirrors the teacher's chained-builder style: no
/// providers registered by default, conservative retry/circuit defaults,
/// health checking off unless an interval is set.
pub struct PoolBuilder {
    providers: Vec<ProviderHandleConfig>,
    strategy: SelectionStrategy,
    retry: RetryConfig,
    health_check_interval: Option<Duration>,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            strategy: SelectionStrategy::default(),
            retry: RetryConfig::default(),
            health_check_interval: None,
        }
    }

    #[must_use]
    pub fn with_provider(mut self, config: ProviderHandleConfig) -> Self {
        self.providers.push(config);
        self
    }

    #[must_use]
    pub fn strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Enable the background health monitor (C3) at the given interval. A
    /// zero or unset interval leaves health entirely to C7's failure-driven
    /// demotion, per §4.3.
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<Pool, PoolError> {
        if self.providers.is_empty() {
            return Err(PoolError::InvalidConfig(
                "pool must be constructed with at least one provider".into(),
            ));
        }

        let providers: Vec<Arc<ProviderHandle>> = self
            .providers
            .into_iter()
            .map(|config| Arc::new(ProviderHandle::new(config)))
            .collect();

        let health_monitor = self
            .health_check_interval
            .filter(|interval| !interval.is_zero())
            .map(|interval| HealthMonitor::spawn(Arc::new(providers.clone()), interval));

        Ok(Pool {
            providers,
            selector: Selector::new(self.strategy),
            retry: self.retry,
            health_monitor: tokio::sync::Mutex::new(health_monitor),
        })
    }
}

/// The pool: a registry of providers plus the routing machinery over them.
/// Implements [`LlmProvider`] itself so callers cannot tell whether they are
/// talking to a single provider or a fully routed pool.
pub struct Pool {
    providers: Vec<Arc<ProviderHandle>>,
    selector: Selector,
    retry: RetryConfig,
    health_monitor: tokio::sync::Mutex<Option<HealthMonitor>>,
}

impl Pool {
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Map of provider name to current health flag.
    pub async fn get_provider_status(&self) -> HashMap<String, bool> {
        let mut status = HashMap::with_capacity(self.providers.len());
        for handle in &self.providers {
            status.insert(handle.name.clone(), handle.is_healthy().await);
        }
        status
    }

    pub async fn get_metrics(&self) -> HashMap<String, MetricsSnapshot> {
        let mut metrics = HashMap::with_capacity(self.providers.len());
        for handle in &self.providers {
            metrics.insert(handle.name.clone(), handle.metrics.snapshot().await);
        }
        metrics
    }

    pub async fn get_circuit_states(&self) -> HashMap<String, CircuitState> {
        let mut states = HashMap::with_capacity(self.providers.len());
        for handle in &self.providers {
            if let Some(circuit) = &handle.circuit {
                states.insert(handle.name.clone(), circuit.state().await);
            }
        }
        states
    }

    /// Stop the health monitor and release resources. Safe to call more than
    /// once: the second call simply finds nothing left to stop.
    pub async fn close(&self) {
        if let Some(monitor) = self.health_monitor.lock().await.take() {
            monitor.close().await;
        }
    }
}

#[async_trait]
impl LlmProvider for Pool {
    async fn info(&self) -> ProviderResult<ProviderInfo> {
        let mut models = Vec::new();
        for handle in &self.providers {
            if let Ok(info) = handle.provider.info().await {
                models.extend(info.models);
            }
        }
        Ok(ProviderInfo {
            name: "provider-pool".into(),
            version: None,
            models,
            supports_streaming: true,
            supports_tools: true,
        })
    }

    /// Iterates eligible providers and returns success if any probe
    /// succeeds; otherwise the last error, per §4.8.
    async fn health(&self, ctx: Cancellation) -> ProviderResult<()> {
        let mut last_error: Option<ProviderError> = None;
        for handle in &self.providers {
            if !handle.is_eligible().await {
                continue;
            }
            match handle.provider.health(ctx.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or(ProviderError::ServiceUnavailable(
            "no eligible providers to probe".into(),
        )))
    }

    async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> ProviderResult<Completion> {
        if prompt.is_empty() {
            return Err(ProviderError::InvalidInput("empty prompt".into()));
        }
        let prompt = prompt.to_string();
        let opts = opts.clone();
        self.route(|handle| {
            let prompt = prompt.clone();
            let opts = opts.clone();
            async move { handle.provider.generate(&prompt, &opts).await }
        })
        .await
        .map_err(Into::into)
    }

    async fn stream(&self, prompt: &str, opts: &GenerationOptions) -> ProviderResult<CompletionStream> {
        let prompt = prompt.to_string();
        let opts = opts.clone();
        self.route(|handle| {
            let prompt = prompt.clone();
            let opts = opts.clone();
            async move { handle.provider.stream(&prompt, &opts).await }
        })
        .await
        .map_err(Into::into)
    }

    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        opts: &GenerationOptions,
    ) -> ProviderResult<ToolCompletion> {
        let messages = messages.to_vec();
        let tools = tools.to_vec();
        let opts = opts.clone();
        self.route(|handle| {
            let messages = messages.clone();
            let tools = tools.clone();
            let opts = opts.clone();
            async move { handle.provider.generate_with_tools(&messages, &tools, &opts).await }
        })
        .await
        .map_err(Into::into)
    }

    async fn stream_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        opts: &GenerationOptions,
    ) -> ProviderResult<ToolCompletionStream> {
        let messages = messages.to_vec();
        let tools = tools.to_vec();
        let opts = opts.clone();
        self.route(|handle| {
            let messages = messages.clone();
            let tools = tools.clone();
            let opts = opts.clone();
            async move { handle.provider.stream_with_tools(&messages, &tools, &opts).await }
        })
        .await
        .map_err(Into::into)
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        opts: &GenerationOptions,
    ) -> ProviderResult<StructuredCompletion> {
        let prompt = prompt.to_string();
        let schema = schema.clone();
        let opts = opts.clone();
        self.route(|handle| {
            let prompt = prompt.clone();
            let schema = schema.clone();
            let opts = opts.clone();
            async move { handle.provider.generate_structured(&prompt, &schema, &opts).await }
        })
        .await
        .map_err(Into::into)
    }

    async fn embed(&self, text: &str) -> ProviderResult<Vec<f64>> {
        if text.is_empty() {
            return Err(ProviderError::EmbeddingFailed("empty text".into()));
        }
        let text = text.to_string();
        self.route(|handle| {
            let text = text.clone();
            async move { handle.provider.embed(&text).await }
        })
        .await
        .map_err(Into::into)
    }

    async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>> {
        let mut models = Vec::new();
        for handle in &self.providers {
            if let Ok(list) = handle.provider.list_models().await {
                models.extend(list);
            }
        }
        Ok(models)
    }

    fn provider_type(&self) -> ProviderKind {
        // The pool itself has no single vendor family; it reports whatever
        // its first registered provider claims, which is what status/metrics
        // displays actually read from in practice.
        self.providers
            .first()
            .map_or(ProviderKind::Ollama, |h| h.provider.provider_type())
    }
}

impl Pool {
    async fn route<T, F, Fut>(&self, action: F) -> Result<T, PoolError>
    where
        F: Fn(Arc<ProviderHandle>) -> Fut,
        Fut: std::future::Future<Output = ProviderResult<T>>,
    {
        call_with_retry(
            &self.providers,
            &self.selector,
            self.retry,
            Cancellation::none(),
            action,
        )
        .await
    }

    /// Same as the trait methods above but threading a caller-supplied
    /// cancellation handle through the retry engine, for callers (like the
    /// gateway) that need `/cancel` to reach an in-flight pool call.
    pub async fn generate_cancellable(
        &self,
        prompt: &str,
        opts: &GenerationOptions,
        cancel: Cancellation,
    ) -> ProviderResult<Completion> {
        if prompt.is_empty() {
            return Err(ProviderError::InvalidInput("empty prompt".into()));
        }
        let prompt = prompt.to_string();
        let opts = opts.clone();
        call_with_retry(
            &self.providers,
            &self.selector,
            self.retry,
            cancel,
            |handle| {
                let prompt = prompt.clone();
                let opts = opts.clone();
                async move { handle.provider.generate(&prompt, &opts).await }
            },
        )
        .await
        .map_err(Into::into)
    }
}
