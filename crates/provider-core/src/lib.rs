//! # provider-core
//!
//! The uniform contract remote LLM and embedding backends implement, plus the
//! message/tool-call types and the streaming think-tag filter that sit directly
//! on top of it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      LlmProvider                              │
//! │  generate / stream / generate_with_tools / stream_with_tools │
//! │  generate_structured / embed / health                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   implemented by each vendor adapter
//!                   (see the `provider-runtime` crate),
//!                   and by the pool facade itself
//!                   (see the `provider-pool` crate).
//! ```
//!
//! `provider-core` has no knowledge of pooling, retries, or circuit breaking —
//! those live one layer up. It only defines what a single provider looks like.

pub mod error;
pub mod message;
pub mod provider;
pub mod stream_filter;
pub mod tool;

pub use error::{ProviderError, Result};
pub use message::{Conversation, Message, Role};
pub use provider::{
    Completion, GenerationOptions, LlmProvider, ProviderInfo, ProviderKind, StreamChunk,
    StructuredCompletion, ToolChoice, ToolCompletion,
};
pub use stream_filter::ThinkTagFilter;
pub use tool::{ParameterSchema, ToolCall, ToolResult, ToolSchema};
