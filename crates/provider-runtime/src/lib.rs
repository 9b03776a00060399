//! # provider-runtime
//!
//! Concrete `LlmProvider` adapters for every vendor family named in
//! `ProviderKind`, plus the factory that builds a routed `provider_pool::Pool`
//! from typed or dynamic (`serde_json::Value`) configuration.
//!
//! ## Providers
//!
//! - **Ollama** (default, behind the `ollama` feature): local inference via `ollama-rs`.
//! - **OpenAI-compatible**: OpenAI itself and the many self-hosted servers that mirror its wire format.
//! - **LM Studio**: a thin specialization of the OpenAI-compatible client with local defaults.
//! - **Claude**: Anthropic's Messages API.
//! - **Gemini**: Google's `:generateContent` API.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use provider_runtime::factory;
//!
//! let pool = factory::create_pool(configs, pool_config).await?;
//! let completion = pool.generate("hello", &Default::default()).await?;
//! ```

#[cfg(feature = "ollama")]
pub mod ollama;

pub mod claude;
pub mod factory;
pub mod gemini;
pub mod lmstudio;
pub mod openai_compatible;
pub mod sse;

#[cfg(feature = "ollama")]
pub use ollama::OllamaProvider;

pub use claude::{ClaudeConfig, ClaudeProvider};
pub use gemini::{GeminiConfig, GeminiProvider};
pub use lmstudio::{LmStudioConfig, LmStudioProvider};
pub use openai_compatible::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};

// Re-export core types for convenience.
pub use provider_core::{LlmProvider, Message, ProviderError, ProviderInfo, Result, Role};
