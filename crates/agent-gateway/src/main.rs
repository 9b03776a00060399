//! Multi-Agent Gateway binary (C10): a textual CLI reception desk over the
//! provider pool. Startup mirrors the teacher's `agent-server::main` —
//! tracing from `RUST_LOG`, `.env` via `dotenvy`, a Factory-built pool, an
//! initial health probe, then the command loop on stdin.

mod agent_instance;
mod commands;
mod gateway;

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use provider_core::provider::Cancellation;
use provider_core::LlmProvider;
use provider_runtime::factory::{self, PoolConfig, PoolMemberConfig, PoolMemberSpec};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::gateway::{Directive, Gateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let pool = match factory::create_pool(providers_from_env(), PoolConfig::default()) {
        Ok(pool) => Arc::new(pool),
        Err(err) => {
            tracing::error!("failed to build provider pool: {err}");
            std::process::exit(1);
        }
    };

    match pool.health(Cancellation::none()).await {
        Ok(()) => {
            let status = pool.get_provider_status().await;
            let healthy = status.values().filter(|up| **up).count();
            tracing::info!("pool healthy: {healthy}/{} providers up", status.len());
        }
        Err(err) => tracing::warn!("no provider passed its initial health probe: {err}"),
    }

    let gateway = Gateway::new(pool);
    println!("{}", commands::HELP_TEXT);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received interrupt, shutting down");
                break;
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if gateway.dispatch(&line).await == Directive::Quit {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    gateway.shutdown().await;
    Ok(())
}

/// Builds provider configs from whichever vendor environment variables are
/// present. At least one of `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`,
/// `GEMINI_API_KEY` must be set, or a local LM Studio server is assumed.
fn providers_from_env() -> HashMap<String, PoolMemberConfig> {
    let mut configs = HashMap::new();

    if let Ok(api_key) = env::var("OPENAI_API_KEY") {
        configs.insert(
            "openai".to_string(),
            PoolMemberConfig {
                provider: serde_json::json!({
                    "type": "openai",
                    "api_key": api_key,
                    "default_model": env::var("OPENAI_DEFAULT_MODEL").ok(),
                }),
                member: PoolMemberSpec::default(),
            },
        );
    }

    if let Ok(api_key) = env::var("ANTHROPIC_API_KEY") {
        configs.insert(
            "claude".to_string(),
            PoolMemberConfig {
                provider: serde_json::json!({
                    "type": "claude",
                    "api_key": api_key,
                    "default_model": env::var("ANTHROPIC_DEFAULT_MODEL").ok(),
                }),
                member: PoolMemberSpec::default(),
            },
        );
    }

    if let Ok(api_key) = env::var("GEMINI_API_KEY") {
        configs.insert(
            "gemini".to_string(),
            PoolMemberConfig {
                provider: serde_json::json!({
                    "type": "gemini",
                    "api_key": api_key,
                    "default_model": env::var("GEMINI_DEFAULT_MODEL").ok(),
                }),
                member: PoolMemberSpec::default(),
            },
        );
    }

    if configs.is_empty() {
        configs.insert(
            "lmstudio".to_string(),
            PoolMemberConfig {
                provider: serde_json::json!({
                    "type": "lmstudio",
                    "base_url": env::var("LMSTUDIO_BASE_URL").ok(),
                }),
                member: PoolMemberSpec::default(),
            },
        );
    }

    configs
}
