use clap::ValueEnum;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::backend::{BackendConfig, EchoBackend, InferenceBackend, OpenAiCompatibleBackend};
use crate::cli::{Provider, provider_label};
use crate::config::{AgentOverride, RuntimeConfig};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const OLLAMA_DEFAULT_HOST: &str = "http://localhost:11434";

pub fn validate_model_for_provider(provider: Provider, model_name: &str) -> Result<()> {
    let is_valid = match provider {
        Provider::Openai => {
            model_name.starts_with("gpt-")
                || model_name.starts_with("o1")
                || model_name.starts_with("o3")
                || model_name.starts_with("o4")
        }
        Provider::Deepseek => model_name.starts_with("deepseek"),
        Provider::Groq | Provider::Ollama | Provider::Echo => !model_name.trim().is_empty(),
        Provider::Auto => true,
    };

    if is_valid {
        return Ok(());
    }

    Err(anyhow::anyhow!(
        "model '{}' is not compatible with provider '{}'",
        model_name,
        provider_label(provider)
    ))
}

pub fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::Openai => "gpt-4o-mini",
        Provider::Groq => "llama-3.3-70b-versatile",
        Provider::Deepseek => "deepseek-chat",
        Provider::Ollama => "llama3.1",
        Provider::Echo | Provider::Auto => "echo",
    }
}

/// Env var holding the API key, when the provider needs one.
pub fn api_key_env(provider: Provider) -> Option<&'static str> {
    match provider {
        Provider::Openai => Some("OPENAI_API_KEY"),
        Provider::Groq => Some("GROQ_API_KEY"),
        Provider::Deepseek => Some("DEEPSEEK_API_KEY"),
        Provider::Ollama | Provider::Echo | Provider::Auto => None,
    }
}

fn default_base_url(provider: Provider) -> String {
    match provider {
        Provider::Openai => OPENAI_BASE_URL.to_string(),
        Provider::Groq => GROQ_BASE_URL.to_string(),
        Provider::Deepseek => DEEPSEEK_BASE_URL.to_string(),
        Provider::Ollama => {
            let host = std::env::var("OLLAMA_HOST")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| OLLAMA_DEFAULT_HOST.to_string());
            format!("{}/v1", host.trim_end_matches('/'))
        }
        Provider::Echo | Provider::Auto => String::new(),
    }
}

/// The backend for one agent: the agent's override first, then the profile.
/// Returns the backend together with the concrete provider and model chosen.
pub fn resolve_backend(
    cfg: &RuntimeConfig,
    agent_override: Option<&AgentOverride>,
) -> Result<(Arc<dyn InferenceBackend>, Provider, String)> {
    let requested = agent_override
        .and_then(|o| o.provider)
        .filter(|p| *p != Provider::Auto)
        .unwrap_or(cfg.provider);
    let provider = match requested {
        Provider::Auto => detect_provider().context(
            "no provider could be auto-detected. Set one of OPENAI_API_KEY, GROQ_API_KEY, \
             DEEPSEEK_API_KEY, OLLAMA_HOST, or use --provider echo",
        )?,
        p => p,
    };

    let model_name = agent_override
        .and_then(|o| o.model.clone())
        .or_else(|| cfg.model.clone())
        .unwrap_or_else(|| default_model(provider).to_string());
    validate_model_for_provider(provider, &model_name)?;

    if provider == Provider::Echo {
        return Ok((Arc::new(EchoBackend), provider, model_name));
    }

    let api_key = match api_key_env(provider) {
        Some(var) => Some(std::env::var(var).with_context(|| {
            format!(
                "{var} is required for the {} provider",
                provider_label(provider)
            )
        })?),
        None => None,
    };

    let base_url = agent_override
        .and_then(|o| o.base_url.clone())
        .or_else(|| cfg.base_url.clone())
        .unwrap_or_else(|| default_base_url(provider));
    let temperature = agent_override
        .and_then(|o| o.temperature)
        .or(cfg.temperature);

    let backend = OpenAiCompatibleBackend::new(BackendConfig {
        base_url,
        model: model_name.clone(),
        api_key,
        temperature,
        max_tokens: cfg.max_tokens,
        request_timeout: cfg.request_timeout(),
    })?;
    Ok((Arc::new(backend), provider, model_name))
}

pub fn detect_provider() -> Option<Provider> {
    if env_present("OPENAI_API_KEY") {
        return Some(Provider::Openai);
    }
    if env_present("GROQ_API_KEY") {
        return Some(Provider::Groq);
    }
    if env_present("DEEPSEEK_API_KEY") {
        return Some(Provider::Deepseek);
    }
    if env_present("OLLAMA_HOST") {
        return Some(Provider::Ollama);
    }
    None
}

pub fn env_present(key: &str) -> bool {
    std::env::var(key)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
}

pub fn parse_provider_name(value: &str) -> Result<Provider> {
    Provider::from_str(value, true).map_err(|_| {
        anyhow::anyhow!(
            "invalid provider '{}'. Supported values: auto, openai, groq, deepseek, ollama, echo",
            value
        )
    })
}
