//! LM Studio LLM provider
//!
//! LM Studio exposes an OpenAI-compatible chat-completions endpoint, so this
//! is a thin specialization of `openai_compatible` with LM Studio's own
//! defaults (no API key required, local base URL) rather than a separate
//! wire-format implementation.

use async_trait::async_trait;
use provider_core::error::Result;
use provider_core::provider::{
    Cancellation, Completion, CompletionStream, GenerationOptions, ModelInfo, ProviderKind,
    StructuredCompletion, ToolCompletion, ToolCompletionStream,
};
use provider_core::{LlmProvider, Message, ProviderInfo, ToolSchema};

use crate::openai_compatible::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};

const DEFAULT_BASE_URL: &str = "http://localhost:1234";

#[derive(Clone, Debug)]
pub struct LmStudioConfig {
    pub base_url: String,
    pub default_model: String,
}

impl Default for LmStudioConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            default_model: "local-model".into(),
        }
    }
}

impl LmStudioConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("LMSTUDIO_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into()),
            default_model: std::env::var("LMSTUDIO_DEFAULT_MODEL").unwrap_or_else(|_| "local-model".into()),
        }
    }
}

pub struct LmStudioProvider {
    inner: OpenAiCompatibleProvider,
}

impl LmStudioProvider {
    pub fn new(config: LmStudioConfig) -> Result<Self> {
        let inner = OpenAiCompatibleProvider::new(OpenAiCompatibleConfig {
            base_url: config.base_url,
            // LM Studio's local server accepts any bearer value; it does not
            // check it, but `reqwest`'s `bearer_auth` needs something to send.
            api_key: "lm-studio".into(),
            default_model: config.default_model,
            timeout: std::time::Duration::from_secs(120),
        })?;
        Ok(Self { inner })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(LmStudioConfig::from_env())
    }

    pub fn localhost() -> Result<Self> {
        Self::new(LmStudioConfig::default())
    }
}

#[async_trait]
impl LlmProvider for LmStudioProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        let mut info = self.inner.info().await?;
        info.name = "LM Studio".into();
        Ok(info)
    }

    async fn health(&self, ctx: Cancellation) -> Result<()> {
        self.inner.health(ctx).await
    }

    async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<Completion> {
        self.inner.generate(prompt, opts).await
    }

    async fn stream(&self, prompt: &str, opts: &GenerationOptions) -> Result<CompletionStream> {
        self.inner.stream(prompt, opts).await
    }

    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        opts: &GenerationOptions,
    ) -> Result<ToolCompletion> {
        self.inner.generate_with_tools(messages, tools, opts).await
    }

    async fn stream_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        opts: &GenerationOptions,
    ) -> Result<ToolCompletionStream> {
        self.inner.stream_with_tools(messages, tools, opts).await
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        opts: &GenerationOptions,
    ) -> Result<StructuredCompletion> {
        self.inner.generate_structured(prompt, schema, opts).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        self.inner.embed(text).await
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.inner.list_models().await
    }

    fn provider_type(&self) -> ProviderKind {
        ProviderKind::LmStudio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_local_server() {
        let config = LmStudioConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn provider_type_is_lmstudio() {
        let provider = LmStudioProvider::localhost().unwrap();
        assert_eq!(provider.provider_type(), ProviderKind::LmStudio);
    }
}
