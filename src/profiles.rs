use anyhow::Result;

use crate::cli::provider_label;
use crate::config::{AgentOverride, ProfilesFile, RuntimeConfig};
use crate::crew::agents::CREW;
use crate::error::redact_sensitive_text;
use crate::provider::env_present;

pub fn run_profiles_list(profiles: &ProfilesFile, cfg: &RuntimeConfig) -> Result<()> {
    let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
    if !names.iter().any(|name| name == "default") {
        names.push("default".to_string());
    }
    names.sort();

    println!("Configured profiles (active='{}'):", cfg.profile);
    for name in names {
        let marker = if name == cfg.profile { "*" } else { " " };
        let source = if profiles.profiles.contains_key(&name) {
            "configured"
        } else {
            "implicit"
        };
        println!("{marker} {name} ({source})");
    }

    Ok(())
}

/// URLs can carry credentials in query strings; mask unless asked not to.
pub fn display_url(cfg: &RuntimeConfig, url: Option<&str>) -> String {
    match url {
        None => "<not configured>".to_string(),
        Some(url) if cfg.show_sensitive_config => url.to_string(),
        Some(url) => match url.split_once('?') {
            Some((base, _)) => format!("{base}?[REDACTED] (set --show-sensitive-config to reveal)"),
            None => redact_sensitive_text(url),
        },
    }
}

pub fn describe_agent_override(key: &str, overrides: &AgentOverride) -> String {
    let mut parts = vec![format!("{key}:")];
    if let Some(provider) = overrides.provider {
        parts.push(format!("provider={}", provider_label(provider)));
    }
    if let Some(model) = overrides.model.as_deref() {
        parts.push(format!("model={model}"));
    }
    if let Some(temperature) = overrides.temperature {
        parts.push(format!("temperature={temperature}"));
    }
    if !overrides.allow_tools.is_empty() {
        parts.push(format!("allow_tools=[{}]", overrides.allow_tools.join(", ")));
    }
    if !overrides.deny_tools.is_empty() {
        parts.push(format!("deny_tools=[{}]", overrides.deny_tools.join(", ")));
    }
    if let Some(rounds) = overrides.max_tool_rounds {
        parts.push(format!("max_tool_rounds={rounds}"));
    }
    if let Some(secs) = overrides.timeout_secs {
        parts.push(format!("timeout_secs={secs}"));
    }
    if parts.len() == 1 {
        parts.push("<no overrides>".to_string());
    }
    parts.join(" ")
}

pub fn run_profiles_show(cfg: &RuntimeConfig) -> Result<()> {
    println!("Active profile: {}", cfg.profile);
    println!("Config path: {}", cfg.config_path);
    println!("Provider: {}", provider_label(cfg.provider));
    println!(
        "Model: {}",
        cfg.model.as_deref().unwrap_or("<provider-default>")
    );
    println!("Base URL: {}", display_url(cfg, cfg.base_url.as_deref()));
    println!(
        "Temperature: {}",
        cfg.temperature
            .map(|t| t.to_string())
            .unwrap_or_else(|| "<provider-default>".to_string())
    );
    println!(
        "Max tokens: {}",
        cfg.max_tokens
            .map(|t| t.to_string())
            .unwrap_or_else(|| "<provider-default>".to_string())
    );
    println!("Request timeout (secs): {}", cfg.request_timeout_secs);
    println!(
        "Agent timeout (secs): {}",
        cfg.agent_timeout_secs
            .map(|t| t.to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );
    println!("Max tool rounds: {}", cfg.max_tool_rounds);
    println!(
        "Knowledge base path: {}",
        cfg.knowledge_base_path
            .as_deref()
            .unwrap_or("<not configured>")
    );
    println!("Knowledge base max chunks: {}", cfg.knowledge_base_max_chunks);
    println!(
        "Search endpoint: {}",
        display_url(cfg, cfg.search_endpoint.as_deref())
    );
    println!(
        "Search API key env: {} ({})",
        cfg.search_api_key_env,
        if env_present(&cfg.search_api_key_env) {
            "set"
        } else {
            "unset"
        }
    );
    println!("Search max results: {}", cfg.search_max_results);
    println!("Tool timeout (secs): {}", cfg.tool_timeout_secs);
    println!("Telemetry enabled: {}", cfg.telemetry_enabled);
    println!("Telemetry path: {}", cfg.telemetry_path);

    println!("Agents:");
    for profile in CREW.iter() {
        match cfg.agent_override(profile.key) {
            Some(overrides) => println!("- {}", describe_agent_override(profile.key, overrides)),
            None => println!("- {}: <no overrides>", profile.key),
        }
    }
    Ok(())
}
