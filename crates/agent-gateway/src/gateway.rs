//! Gateway orchestrator (C10): owns every `AgentInstance`, the current-agent
//! pointer, and the single shared response sink. Grounded on §4.10's
//! architecture — a dedicated worker loop and bounded inbound queue per
//! agent, one shared sink serialising completed output.

use std::collections::HashMap;
use std::sync::Arc;

use provider_pool::Pool;
use tokio::sync::{mpsc, Mutex};

use crate::agent_instance::AgentInstance;
use crate::commands::{self, Command, Input};

/// Capacity of the shared response sink (§5: "a bounded channel with one reader").
const SINK_CAPACITY: usize = 64;

/// A completed (or failed) request, tagged with its originating agent.
pub struct Response {
    pub agent: String,
    pub content: Result<String, String>,
}

impl Response {
    pub fn success(agent: String, content: String) -> Self {
        Self { agent, content: Ok(content) }
    }

    pub fn failure(agent: String, error: String) -> Self {
        Self { agent, content: Err(error) }
    }
}

/// What the caller's input loop should do after dispatching one line.
#[derive(Debug, PartialEq, Eq)]
pub enum Directive {
    Continue,
    Quit,
}

pub struct Gateway {
    pool: Arc<Pool>,
    agents: Mutex<HashMap<String, Arc<AgentInstance>>>,
    current: Mutex<Option<String>>,
    sink: mpsc::Sender<Response>,
    reader: tokio::task::JoinHandle<()>,
}

impl Gateway {
    pub fn new(pool: Arc<Pool>) -> Self {
        let (sink, mut rx) = mpsc::channel(SINK_CAPACITY);
        // The single reader that serialises all completed output; only this
        // task ever writes a response line to stdout.
        let reader = tokio::spawn(async move {
            while let Some(response) = rx.recv().await {
                match response.content {
                    Ok(text) => println!("[{}] {}", response.agent, text),
                    Err(err) => println!("[{}] error: {}", response.agent, err),
                }
            }
        });

        Self {
            pool,
            agents: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            sink,
            reader,
        }
    }

    /// Parse and act on one line of input. Returns `Directive::Quit` once
    /// `/quit` has been issued; the caller's input loop should stop reading.
    pub async fn dispatch(&self, line: &str) -> Directive {
        match commands::parse(line) {
            Ok(Input::Command(Command::Quit)) => Directive::Quit,
            Ok(Input::Command(cmd)) => {
                self.handle_command(cmd).await;
                Directive::Continue
            }
            Ok(Input::Prompt(prompt)) => {
                if !prompt.is_empty() {
                    self.submit_to_current(prompt).await;
                }
                Directive::Continue
            }
            Err(message) => {
                println!("error: {message}");
                Directive::Continue
            }
        }
    }

    async fn handle_command(&self, cmd: Command) {
        match cmd {
            Command::Help => println!("{}", commands::HELP_TEXT),
            Command::Status => self.print_status().await,
            Command::Cancel(name) => self.cancel(name).await,
            Command::AgentList => self.print_agent_list().await,
            Command::AgentCurrent => {
                match self.current.lock().await.as_deref() {
                    Some(name) => println!("current agent: {name}"),
                    None => println!("no current agent"),
                }
            }
            Command::AgentSwitch(name) => self.switch(name).await,
            Command::AgentNew { name, prompt } => self.new_agent(name, prompt).await,
            Command::Quit => unreachable!("Quit is handled in dispatch before reaching here"),
        }
    }

    async fn new_agent(&self, name: String, prompt: Option<String>) {
        let agent = Arc::new(AgentInstance::spawn(name.clone(), Arc::clone(&self.pool), self.sink.clone()));
        self.agents.lock().await.insert(name.clone(), agent);
        *self.current.lock().await = Some(name.clone());
        println!("created agent '{name}' and made it current");

        if let Some(prompt) = prompt {
            self.submit_named(&name, prompt).await;
        }
    }

    async fn switch(&self, name: String) {
        if self.agents.lock().await.contains_key(&name) {
            *self.current.lock().await = Some(name.clone());
            println!("current agent: {name}");
        } else {
            println!("error: unknown agent '{name}'");
        }
    }

    async fn cancel(&self, name: Option<String>) {
        let target = match name {
            Some(name) => Some(name),
            None => self.current.lock().await.clone(),
        };
        let Some(target) = target else {
            println!("error: no current agent to cancel");
            return;
        };
        let agents = self.agents.lock().await;
        match agents.get(&target) {
            Some(agent) => {
                agent.cancel_current().await;
                println!("cancelled '{target}'");
            }
            None => println!("error: unknown agent '{target}'"),
        }
    }

    async fn submit_to_current(&self, prompt: String) {
        let current = self.current.lock().await.clone();
        match current {
            Some(name) => self.submit_named(&name, prompt).await,
            None => println!("error: no current agent; use '/agent new <name>' first"),
        }
    }

    async fn submit_named(&self, name: &str, prompt: String) {
        let agents = self.agents.lock().await;
        match agents.get(name) {
            Some(agent) => {
                if let Err(err) = agent.submit(prompt).await {
                    println!("error: {err}");
                }
            }
            None => println!("error: unknown agent '{name}'"),
        }
    }

    async fn print_status(&self) {
        let agents = self.agents.lock().await;
        if agents.is_empty() {
            println!("no agents");
            return;
        }
        for agent in agents.values() {
            let busy = if agent.is_busy().await { "busy" } else { "idle" };
            println!("{} - {} - created {:.1}s ago", agent.name, busy, agent.created_at.elapsed().as_secs_f64());
        }
    }

    async fn print_agent_list(&self) {
        let agents = self.agents.lock().await;
        let mut names: Vec<&str> = agents.keys().map(String::as_str).collect();
        names.sort_unstable();
        if names.is_empty() {
            println!("no agents");
        } else {
            println!("{}", names.join(", "));
        }
    }

    /// Cancel every agent's in-flight request and stop the response reader.
    /// Called once on `/quit` or external shutdown signal.
    pub async fn shutdown(&self) {
        for agent in self.agents.lock().await.values() {
            agent.cancel_current().await;
        }
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use provider_core::error::{ProviderError, Result as ProviderResult};
    use provider_core::provider::{
        Cancellation, Completion, CompletionStream, GenerationOptions, ModelInfo, ProviderKind,
        StructuredCompletion, ToolCompletion, ToolCompletionStream,
    };
    use provider_core::{LlmProvider, Message, ProviderInfo, ToolSchema};
    use provider_pool::ProviderHandleConfig;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn info(&self) -> ProviderResult<ProviderInfo> {
            Ok(ProviderInfo { name: "echo".into(), version: None, models: vec![], supports_streaming: false, supports_tools: false })
        }
        async fn health(&self, _ctx: Cancellation) -> ProviderResult<()> {
            Ok(())
        }
        async fn generate(&self, prompt: &str, _opts: &GenerationOptions) -> ProviderResult<Completion> {
            Ok(Completion { content: format!("echo: {prompt}"), model: "echo".into(), usage: None, truncated: false, finish_reason: None })
        }
        async fn stream(&self, _prompt: &str, _opts: &GenerationOptions) -> ProviderResult<CompletionStream> {
            Err(ProviderError::Other("not supported".into()))
        }
        async fn generate_with_tools(&self, _messages: &[Message], _tools: &[ToolSchema], _opts: &GenerationOptions) -> ProviderResult<ToolCompletion> {
            Err(ProviderError::Other("not supported".into()))
        }
        async fn stream_with_tools(&self, _messages: &[Message], _tools: &[ToolSchema], _opts: &GenerationOptions) -> ProviderResult<ToolCompletionStream> {
            Err(ProviderError::Other("not supported".into()))
        }
        async fn generate_structured(&self, _prompt: &str, _schema: &serde_json::Value, _opts: &GenerationOptions) -> ProviderResult<StructuredCompletion> {
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
    async fn agent_new_then_plain_prompt_routes_to_the_new_current_agent() {
        let gateway = Gateway::new(test_pool());
        assert_eq!(gateway.dispatch("/agent new alice").await, Directive::Continue);
        assert_eq!(gateway.dispatch("hello").await, Directive::Continue);
        // Give the spawned worker a turn to process and publish.
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn quit_returns_the_quit_directive() {
        let gateway = Gateway::new(test_pool());
        assert_eq!(gateway.dispatch("/quit").await, Directive::Quit);
    }

    #[tokio::test]
    async fn prompt_without_a_current_agent_reports_an_error_but_keeps_running() {
        let gateway = Gateway::new(test_pool());
        assert_eq!(gateway.dispatch("hello").await, Directive::Continue);
    }

    #[tokio::test]
    async fn cancel_on_an_unknown_agent_does_not_panic() {
        let gateway = Gateway::new(test_pool());
        assert_eq!(gateway.dispatch("/cancel ghost").await, Directive::Continue);
    }

    #[tokio::test]
    async fn switch_to_an_unregistered_agent_leaves_current_unchanged() {
        let gateway = Gateway::new(test_pool());
        gateway.dispatch("/agent new alice").await;
        gateway.dispatch("/agent switch ghost").await;
        assert_eq!(gateway.current.lock().await.as_deref(), Some("alice"));
    }
}
