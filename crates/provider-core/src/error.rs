//! Error Types

use thiserror::Error;

/// Result type alias for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors a single `LlmProvider` implementation can report.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Empty prompt, empty messages, missing sink/callback, malformed arguments.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing required config field, unknown provider type, unparseable duration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Backend reachable negatively: transport error, non-2xx.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Backend responded but the completion failed or returned zero choices.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// Embedding response was empty or had a zero-length vector.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Tool adapter reported non-success; surfaced upstream, not retried by core.
    #[error("tool call failed: {0}")]
    ToolCallFailed(String),

    /// Generic IO error (vendor client setup, local file reads for config, etc).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error.
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Whether a caller may reasonably retry the same or a different provider.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::ServiceUnavailable(_) | ProviderError::GenerationFailed(_)
        )
    }
}

impl From<anyhow::Error> for ProviderError {
    fn from(err: anyhow::Error) -> Self {
        ProviderError::Other(err.to_string())
    }
}

/// Errors the pool (retry/selection layer) can report, one layer above `ProviderError`.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The selector found no eligible provider.
    #[error("no healthy providers available")]
    NoHealthyProviders,

    /// The retry budget was exhausted; wraps the last underlying provider error.
    #[error("all attempts failed, last error from '{provider}': {source}")]
    AllAttemptsFailed {
        /// Name of the provider that produced the final failing attempt.
        provider: String,
        /// The underlying error from that last attempt.
        #[source]
        source: ProviderError,
    },

    /// Per-provider error, tagged with the offending provider's name for diagnosis.
    #[error("provider '{provider}': {source}")]
    Provider {
        /// Name of the provider that raised the error.
        provider: String,
        /// The underlying error.
        #[source]
        source: ProviderError,
    },

    /// Invalid or missing factory configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The caller's cancellation handle fired before the call completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<ProviderError> for PoolError {
    fn from(err: ProviderError) -> Self {
        PoolError::Provider {
            provider: "unknown".into(),
            source: err,
        }
    }
}

/// Lets the pool facade (`provider-pool::Pool`) implement `LlmProvider`
/// itself: every method on that trait returns `Result<T, ProviderError>`, so
/// a `PoolError` raised by the retry engine has to fold back down a level.
impl From<PoolError> for ProviderError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NoHealthyProviders => {
                ProviderError::ServiceUnavailable("no healthy providers available".into())
            }
            PoolError::AllAttemptsFailed { provider, source } => {
                ProviderError::GenerationFailed(format!(
                    "all attempts failed, last error from '{provider}': {source}"
                ))
            }
            PoolError::Provider { source, .. } => source,
            PoolError::InvalidConfig(msg) => ProviderError::InvalidConfig(msg),
            PoolError::Cancelled => ProviderError::Other("operation cancelled".into()),
        }
    }
}

/// Errors the gateway's agent workers can report.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The agent's inbound queue stayed full for the whole back-pressure wait.
    #[error("agent '{0}' is busy")]
    AgentBusy(String),

    /// No agent exists with that name.
    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    /// Underlying pool error surfaced through a worker.
    #[error(transparent)]
    Pool(#[from] PoolError),
}
