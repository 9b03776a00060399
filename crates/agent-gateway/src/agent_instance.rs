//! Agent instance (§3): a named worker loop over the pool, with its own
//! bounded inbound queue, at most one in-flight request, and an accumulated
//! conversation. Exclusively owned by the `Gateway`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use provider_core::error::GatewayError;
use provider_core::provider::{Cancellation, CancellationSource, GenerationOptions};
use provider_core::{Conversation, Message};
use provider_pool::Pool;
use tokio::sync::{mpsc, Mutex};

use crate::gateway::Response;

/// Capacity of an agent's inbound request queue, per §3.
const INBOX_CAPACITY: usize = 10;

/// How long `submit` waits for queue capacity before reporting `AgentBusy`.
const BACKPRESSURE_WAIT: Duration = Duration::from_secs(5);

struct Request {
    prompt: String,
}

/// Handle a caller holds onto an agent: the submission side of its inbox plus
/// the slot used to reach an in-flight request's cancellation.
pub struct AgentInstance {
    pub name: String,
    pub created_at: Instant,
    inbox: mpsc::Sender<Request>,
    current_cancel: Arc<Mutex<Option<CancellationSource>>>,
}

impl AgentInstance {
    /// Spawn a new agent: starts its worker loop immediately and returns the
    /// handle used to submit requests and issue cancellation.
    pub fn spawn(name: impl Into<String>, pool: Arc<Pool>, sink: mpsc::Sender<Response>) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let current_cancel = Arc::new(Mutex::new(None));

        tokio::spawn(run_worker(
            name.clone(),
            rx,
            pool,
            sink,
            Arc::clone(&current_cancel),
        ));

        Self {
            name,
            created_at: Instant::now(),
            inbox: tx,
            current_cancel,
        }
    }

    /// Enqueue a prompt. Returns immediately once the request is queued
    /// (non-blocking from the caller's perspective past the backpressure
    /// wait); the actual completion arrives later via the shared sink.
    pub async fn submit(&self, prompt: impl Into<String>) -> Result<(), GatewayError> {
        let request = Request { prompt: prompt.into() };
        tokio::time::timeout(BACKPRESSURE_WAIT, self.inbox.send(request))
            .await
            .map_err(|_| GatewayError::AgentBusy(self.name.clone()))?
            .map_err(|_| GatewayError::AgentBusy(self.name.clone()))
    }

    /// Cancel the currently in-flight request, if any. A no-op if the agent
    /// is idle.
    pub async fn cancel_current(&self) {
        if let Some(source) = self.current_cancel.lock().await.as_ref() {
            source.cancel();
        }
    }

    pub async fn is_busy(&self) -> bool {
        self.current_cancel.lock().await.is_some()
    }
}

async fn run_worker(
    name: String,
    mut inbox: mpsc::Receiver<Request>,
    pool: Arc<Pool>,
    sink: mpsc::Sender<Response>,
    current_cancel: Arc<Mutex<Option<CancellationSource>>>,
) {
    let mut conversation = Conversation::new();

    while let Some(request) = inbox.recv().await {
        conversation.push(Message::user(request.prompt.clone()));

        let (source, cancel) = Cancellation::new();
        *current_cancel.lock().await = Some(source);

        let opts = GenerationOptions::default();
        let result = pool
            .generate_cancellable(&request.prompt, &opts, cancel)
            .await;

        *current_cancel.lock().await = None;

        let response = match result {
            Ok(completion) => {
                conversation.push(Message::assistant(completion.content.clone()));
                Response::success(name.clone(), completion.content)
            }
            Err(err) => Response::failure(name.clone(), err.to_string()),
        };

        if sink.send(response).await.is_err() {
            // Shared sink's reader has shut down; the gateway is tearing
            // down, so there is nothing further this worker can do.
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use provider_core::error::{ProviderError, Result as ProviderResult};
    use provider_core::provider::{
        Completion, CompletionStream, ModelInfo, ProviderKind, StructuredCompletion,
        ToolCompletion, ToolCompletionStream,
    };
    use provider_core::{LlmProvider, ProviderInfo, ToolSchema};
    use provider_pool::ProviderHandleConfig;

    /// Minimal echo provider: just enough of the Provider Contract for the
    /// gateway's own routing/bookkeeping tests, independent of the pool
    /// crate's own `#[cfg(test)]`-only test double.
    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn info(&self) -> ProviderResult<ProviderInfo> {
            Ok(ProviderInfo {
                name: "echo".into(),
                version: None,
                models: vec![],
                supports_streaming: false,
                supports_tools: false,
            })
        }

        async fn health(&self, _ctx: Cancellation) -> ProviderResult<()> {
            Ok(())
        }

        async fn generate(&self, prompt: &str, _opts: &GenerationOptions) -> ProviderResult<Completion> {
            Ok(Completion {
                content: format!("echo: {prompt}"),
                model: "echo".into(),
                usage: None,
                truncated: false,
                finish_reason: None,
            })
        }

        async fn stream(&self, _prompt: &str, _opts: &GenerationOptions) -> ProviderResult<CompletionStream> {
            Err(ProviderError::Other("not supported".into()))
        }

        async fn generate_with_tools(
            &self,
            _messages: &[Message],
            _tools: &[ToolSchema],
            _opts: &GenerationOptions,
        ) -> ProviderResult<ToolCompletion> {
            Err(ProviderError::Other("not supported".into()))
        }

        async fn stream_with_tools(
            &self,
            _messages: &[Message],
            _tools: &[ToolSchema],
            _opts: &GenerationOptions,
        ) -> ProviderResult<ToolCompletionStream> {
            Err(ProviderError::Other("not supported".into()))
        }

        async fn generate_structured(
            &self,
            _prompt: &str,
            _schema: &serde_json::Value,
            _opts: &GenerationOptions,
        ) -> ProviderResult<StructuredCompletion> {
            Err(ProviderError::Other("not supported".into()))
        }

        async fn embed(&self, _text: &str) -> ProviderResult<Vec<f64>> {
            Err(ProviderError::EmbeddingFailed("echo provider has no embeddings".into()))
        }

        async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>> {
            Ok(vec![])
        }

        fn provider_type(&self) -> ProviderKind {
            ProviderKind::Ollama
        }
    }

    fn test_pool() -> Arc<Pool> {
        Arc::new(
            Pool::builder()
                .with_provider(ProviderHandleConfig::new("p1", Arc::new(EchoProvider)))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn submit_enqueues_and_worker_publishes_a_response() {
        let (sink, mut rx) = mpsc::channel(10);
        let agent = AgentInstance::spawn("alice", test_pool(), sink);

        agent.submit("hello").await.unwrap();
        let response = rx.recv().await.unwrap();
        assert_eq!(response.agent, "alice");
        assert!(response.content.is_ok());
    }

    #[tokio::test]
    async fn is_busy_reflects_in_flight_request_lifecycle() {
        let (sink, mut rx) = mpsc::channel(10);
        let agent = AgentInstance::spawn("bob", test_pool(), sink);
        assert!(!agent.is_busy().await);

        agent.submit("hello").await.unwrap();
        let _ = rx.recv().await.unwrap();

        // Worker clears the slot immediately after publishing.
        tokio::task::yield_now().await;
        assert!(!agent.is_busy().await);
    }
}
