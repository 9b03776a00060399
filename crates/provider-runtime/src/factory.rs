//! Provider Factory (C9)
//!
//! Builds a concrete `LlmProvider` from either a typed config record or a
//! dynamic `serde_json::Value` carrying a `"type"` discriminator, and wires a
//! full set of them into a `provider_pool::Pool`. Grounded on the teacher's
//! `OllamaConfig::from_env()`/`from_config()` pair: every vendor config here
//! follows the same typed-struct-plus-constructor shape, with the dynamic
//! path layered on top for configuration that arrives as JSON.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use provider_core::error::{PoolError, ProviderError, Result as ProviderResult};
use provider_core::LlmProvider;
use provider_pool::{Pool, ProviderHandleConfig, RetryConfig, SelectionStrategy};
use serde_json::Value;

use crate::claude::{ClaudeConfig, ClaudeProvider};
use crate::gemini::{GeminiConfig, GeminiProvider};
use crate::lmstudio::{LmStudioConfig, LmStudioProvider};
use crate::openai_compatible::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};

#[cfg(feature = "ollama")]
use crate::ollama::{OllamaConfig, OllamaProvider};

/// A typed provider config, for callers who already have one in hand rather
/// than a `serde_json::Value`.
pub enum ProviderSpec {
    #[cfg(feature = "ollama")]
    Ollama(OllamaConfig),
    OpenAiCompatible(OpenAiCompatibleConfig),
    LmStudio(LmStudioConfig),
    Claude(ClaudeConfig),
    Gemini(GeminiConfig),
}

pub fn build_from_spec(spec: ProviderSpec) -> ProviderResult<Arc<dyn LlmProvider>> {
    Ok(match spec {
        #[cfg(feature = "ollama")]
        ProviderSpec::Ollama(config) => Arc::new(OllamaProvider::from_config(config)),
        ProviderSpec::OpenAiCompatible(config) => Arc::new(OpenAiCompatibleProvider::new(config)?),
        ProviderSpec::LmStudio(config) => Arc::new(LmStudioProvider::new(config)?),
        ProviderSpec::Claude(config) => Arc::new(ClaudeProvider::new(config)?),
        ProviderSpec::Gemini(config) => Arc::new(GeminiProvider::new(config)?),
    })
}

/// Per-provider pool registration settings layered on top of its own config.
#[derive(Clone, Debug, Default)]
pub struct PoolMemberSpec {
    pub weight: Option<u32>,
    pub cost_per_unit: Option<f64>,
    pub max_concurrency: Option<u32>,
    pub circuit_enabled: Option<bool>,
}

/// One entry in a dynamic pool configuration: the provider's own config
/// (including its `"type"` discriminator) plus the registration settings.
#[derive(Clone, Debug)]
pub struct PoolMemberConfig {
    pub provider: Value,
    pub member: PoolMemberSpec,
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub strategy: SelectionStrategy,
    pub retry: RetryConfig,
    pub health_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::default(),
            retry: RetryConfig::default(),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

/// Builds a pool from a mapping of name -> dynamic provider config, per §4.9.
pub fn create_pool(
    configs: HashMap<String, PoolMemberConfig>,
    pool_config: PoolConfig,
) -> Result<Pool, PoolError> {
    if configs.is_empty() {
        return Err(PoolError::InvalidConfig(
            "create_pool requires at least one provider config".into(),
        ));
    }

    let mut builder = Pool::builder()
        .strategy(pool_config.strategy)
        .retry(pool_config.retry)
        .health_check_interval(pool_config.health_check_interval);

    for (name, entry) in configs {
        let provider = provider_from_value(&entry.provider).map_err(PoolError::from)?;
        let mut handle_config = ProviderHandleConfig::new(name, provider);
        if let Some(weight) = entry.member.weight {
            handle_config = handle_config.weight(weight);
        }
        if let Some(cost_per_unit) = entry.member.cost_per_unit {
            handle_config = handle_config.cost_per_unit(cost_per_unit);
        }
        if let Some(max_concurrency) = entry.member.max_concurrency {
            handle_config = handle_config.max_concurrency(max_concurrency);
        }
        if let Some(circuit_enabled) = entry.member.circuit_enabled {
            handle_config = handle_config.circuit_enabled(circuit_enabled);
        }
        builder = builder.with_provider(handle_config);
    }

    builder.build()
}

/// Constructs a provider from a dynamic config carrying a `"type"` field,
/// normalising CamelCase keys to snake_case first.
pub fn provider_from_value(value: &Value) -> ProviderResult<Arc<dyn LlmProvider>> {
    let normalised = normalise_keys(value);
    let kind = normalised
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::InvalidConfig("provider config missing 'type' field".into()))?;

    match kind {
        "ollama" => build_ollama(&normalised),
        "openai_compatible" | "openai" => build_openai_compatible(&normalised),
        "lmstudio" | "lm_studio" => build_lmstudio(&normalised),
        "claude" | "anthropic" => build_claude(&normalised),
        "gemini" | "google" => build_gemini(&normalised),
        other => Err(ProviderError::InvalidConfig(format!("unknown provider type '{other}'"))),
    }
}

#[cfg(feature = "ollama")]
fn build_ollama(config: &Value) -> ProviderResult<Arc<dyn LlmProvider>> {
    let defaults = OllamaConfig::default();
    let provider = OllamaProvider::from_config(OllamaConfig {
        host: string_field(config, "host").unwrap_or(defaults.host),
        port: u16_field(config, "port").unwrap_or(defaults.port),
        timeout_secs: duration_field(config, "timeout")
            .map(|d| d.as_secs())
            .unwrap_or(defaults.timeout_secs),
        default_model: string_field(config, "default_model").unwrap_or(defaults.default_model),
    });
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "ollama"))]
fn build_ollama(_config: &Value) -> ProviderResult<Arc<dyn LlmProvider>> {
    Err(ProviderError::InvalidConfig(
        "ollama support is not compiled into this build (enable the 'ollama' feature)".into(),
    ))
}

fn build_openai_compatible(config: &Value) -> ProviderResult<Arc<dyn LlmProvider>> {
    let api_key = string_field(config, "api_key")
        .ok_or_else(|| ProviderError::InvalidConfig("openai_compatible config requires 'apiKey'".into()))?;
    let provider = OpenAiCompatibleProvider::new(OpenAiCompatibleConfig {
        base_url: string_field(config, "base_url").unwrap_or_else(|| "https://api.openai.com".into()),
        api_key,
        default_model: string_field(config, "default_model").unwrap_or_else(|| "gpt-4o-mini".into()),
        timeout: duration_field(config, "timeout").unwrap_or(Duration::from_secs(30)),
    })?;
    Ok(Arc::new(provider))
}

fn build_lmstudio(config: &Value) -> ProviderResult<Arc<dyn LlmProvider>> {
    let defaults = LmStudioConfig::default();
    let provider = LmStudioProvider::new(LmStudioConfig {
        base_url: string_field(config, "base_url").unwrap_or(defaults.base_url),
        default_model: string_field(config, "default_model").unwrap_or(defaults.default_model),
    })?;
    Ok(Arc::new(provider))
}

fn build_claude(config: &Value) -> ProviderResult<Arc<dyn LlmProvider>> {
    let api_key = string_field(config, "api_key")
        .ok_or_else(|| ProviderError::InvalidConfig("claude config requires 'apiKey'".into()))?;
    let provider = ClaudeProvider::new(ClaudeConfig {
        base_url: string_field(config, "base_url").unwrap_or_else(|| "https://api.anthropic.com".into()),
        api_key,
        default_model: string_field(config, "default_model")
            .unwrap_or_else(|| "claude-3-5-sonnet-latest".into()),
        timeout: duration_field(config, "timeout").unwrap_or(Duration::from_secs(30)),
    })?;
    Ok(Arc::new(provider))
}

fn build_gemini(config: &Value) -> ProviderResult<Arc<dyn LlmProvider>> {
    let api_key = string_field(config, "api_key")
        .ok_or_else(|| ProviderError::InvalidConfig("gemini config requires 'apiKey'".into()))?;
    let provider = GeminiProvider::new(GeminiConfig {
        base_url: string_field(config, "base_url")
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into()),
        api_key,
        default_model: string_field(config, "default_model").unwrap_or_else(|| "gemini-1.5-flash".into()),
        timeout: duration_field(config, "timeout").unwrap_or(Duration::from_secs(30)),
    })?;
    Ok(Arc::new(provider))
}

fn string_field(config: &Value, key: &str) -> Option<String> {
    config.get(key).and_then(Value::as_str).map(str::to_string)
}

fn u16_field(config: &Value, key: &str) -> Option<u16> {
    config.get(key).and_then(Value::as_u64).and_then(|n| u16::try_from(n).ok())
}

/// Accepts either a `"30s"`-style duration string or a bare number of seconds.
fn duration_field(config: &Value, key: &str) -> Option<Duration> {
    match config.get(key) {
        Some(Value::String(s)) => parse_duration(s),
        Some(Value::Number(n)) => n.as_f64().map(Duration::from_secs_f64),
        _ => None,
    }
}

fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split_at = raw.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let (value, unit) = raw.split_at(split_at);
    let value: f64 = value.parse().ok()?;
    let seconds = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return None,
    };
    Some(Duration::from_secs_f64(seconds))
}

/// Recursively converts CamelCase object keys to snake_case, per §4.9's
/// dynamic-config normalisation rule.
fn normalise_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let normalised = map
                .iter()
                .map(|(k, v)| (camel_to_snake(k), normalise_keys(v)))
                .collect();
            Value::Object(normalised)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalise_keys).collect()),
        other => other.clone(),
    }
}

fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, c) in key.char_indices() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_to_snake_converts_interior_uppercase_boundaries() {
        assert_eq!(camel_to_snake("baseUrl"), "base_url");
        assert_eq!(camel_to_snake("apiKey"), "api_key");
        assert_eq!(camel_to_snake("defaultModel"), "default_model");
        assert_eq!(camel_to_snake("host"), "host");
    }

    #[test]
    fn parse_duration_accepts_suffixed_strings() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("garbage"), None);
    }

    #[test]
    fn normalise_keys_recurses_into_nested_objects() {
        let value = serde_json::json!({ "baseUrl": "x", "nested": { "apiKey": "y" } });
        let normalised = normalise_keys(&value);
        assert_eq!(normalised["base_url"], "x");
        assert_eq!(normalised["nested"]["api_key"], "y");
    }

    #[test]
    fn provider_from_value_rejects_unknown_type() {
        let value = serde_json::json!({ "type": "unknown-vendor" });
        let result = provider_from_value(&value);
        assert!(result.is_err());
    }

    #[test]
    fn provider_from_value_rejects_openai_without_api_key() {
        let value = serde_json::json!({ "type": "openai_compatible" });
        let result = provider_from_value(&value);
        assert!(matches!(result, Err(ProviderError::InvalidConfig(_))));
    }

    #[test]
    fn create_pool_rejects_empty_config_map() {
        let result = create_pool(HashMap::new(), PoolConfig::default());
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }
}
