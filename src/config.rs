use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::agent::{AgentSettings, DEFAULT_MAX_TOOL_ROUNDS};
use crate::cli::*;
use crate::crew::agents::{CREW, profile_for_key};
use crate::tools::ToolSettings;
use crate::tools::web_search::WebSearchConfig;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub profile: String,
    pub config_path: String,
    pub provider: Provider,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub request_timeout_secs: u64,
    pub agent_timeout_secs: Option<u64>,
    pub max_tool_rounds: usize,
    pub knowledge_base_path: Option<String>,
    pub knowledge_base_max_chunks: usize,
    pub search_endpoint: Option<String>,
    pub search_api_key_env: String,
    pub search_max_results: usize,
    pub tool_timeout_secs: u64,
    pub show_sensitive_config: bool,
    pub telemetry_enabled: bool,
    pub telemetry_path: String,
    /// Keyed by crew member (`researcher`, `analyst`, `writer`, `reviewer`).
    pub agents: HashMap<String, AgentOverride>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub agent_timeout_secs: Option<u64>,
    pub max_tool_rounds: Option<usize>,
    pub knowledge_base_path: Option<String>,
    pub knowledge_base_max_chunks: Option<usize>,
    pub search_endpoint: Option<String>,
    pub search_api_key_env: Option<String>,
    pub search_max_results: Option<usize>,
    pub tool_timeout_secs: Option<u64>,
    pub telemetry_enabled: Option<bool>,
    pub telemetry_path: Option<String>,
    #[serde(default)]
    pub agents: HashMap<String, AgentOverride>,
}

/// Per-agent settings that take precedence over the profile for one crew member.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentOverride {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub allow_tools: Vec<String>,
    #[serde(default)]
    pub deny_tools: Vec<String>,
    pub max_tool_rounds: Option<usize>,
    pub timeout_secs: Option<u64>,
}

pub fn load_profiles(config_path: &str) -> Result<ProfilesFile> {
    let path = Path::new(config_path);
    if !path.exists() {
        return Ok(ProfilesFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read profile config file at '{}'", path.display()))?;
    toml::from_str::<ProfilesFile>(&content).with_context(|| {
        format!(
            "invalid profile configuration in '{}'. Check provider values and field names.",
            path.display()
        )
    })
}

fn validate_agent_keys(profile: &str, agents: &HashMap<String, AgentOverride>) -> Result<()> {
    let mut unknown = agents
        .keys()
        .filter(|key| profile_for_key(key).is_none())
        .cloned()
        .collect::<Vec<String>>();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort();
    let known = CREW
        .iter()
        .map(|profile| profile.key)
        .collect::<Vec<&str>>();
    Err(anyhow::anyhow!(
        "unknown agent override(s) {} in profile '{}'. Valid agents: {}",
        unknown.join(", "),
        profile,
        known.join(", ")
    ))
}

pub fn resolve_runtime_config(cli: &Cli, profiles: &ProfilesFile) -> Result<RuntimeConfig> {
    let selected = cli.profile.trim();
    if selected.is_empty() {
        return Err(anyhow::anyhow!(
            "profile name cannot be empty. Set --profile <name>."
        ));
    }

    let profile = if selected == "default" && !profiles.profiles.contains_key("default") {
        ProfileConfig::default()
    } else {
        profiles.profiles.get(selected).cloned().ok_or_else(|| {
            let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
            names.sort();
            if names.is_empty() {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. No profiles are defined yet.",
                    selected,
                    cli.config_path
                )
            } else {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. Available profiles: {}",
                    selected,
                    cli.config_path,
                    names.join(", ")
                )
            }
        })?
    };

    validate_agent_keys(selected, &profile.agents)?;

    let provider = if cli.provider != Provider::Auto {
        cli.provider
    } else {
        profile.provider.unwrap_or(Provider::Auto)
    };

    Ok(RuntimeConfig {
        profile: selected.to_string(),
        config_path: cli.config_path.clone(),
        provider,
        model: cli.model.clone().or(profile.model),
        base_url: cli.base_url.clone().or(profile.base_url),
        temperature: cli.temperature.or(profile.temperature),
        max_tokens: cli.max_tokens.or(profile.max_tokens),
        request_timeout_secs: cli
            .request_timeout_secs
            .or(profile.request_timeout_secs)
            .unwrap_or(120)
            .max(1),
        agent_timeout_secs: cli
            .agent_timeout_secs
            .or(profile.agent_timeout_secs)
            .filter(|secs| *secs > 0),
        max_tool_rounds: cli
            .max_tool_rounds
            .or(profile.max_tool_rounds)
            .unwrap_or(DEFAULT_MAX_TOOL_ROUNDS),
        knowledge_base_path: cli
            .knowledge_base_path
            .clone()
            .or(profile.knowledge_base_path),
        knowledge_base_max_chunks: cli
            .knowledge_base_max_chunks
            .or(profile.knowledge_base_max_chunks)
            .unwrap_or(3)
            .max(1),
        search_endpoint: cli.search_endpoint.clone().or(profile.search_endpoint),
        search_api_key_env: cli
            .search_api_key_env
            .clone()
            .or(profile.search_api_key_env)
            .unwrap_or_else(|| "SEARCH_API_KEY".to_string()),
        search_max_results: cli
            .search_max_results
            .or(profile.search_max_results)
            .unwrap_or(5)
            .max(1),
        tool_timeout_secs: cli
            .tool_timeout_secs
            .or(profile.tool_timeout_secs)
            .unwrap_or(30)
            .max(1),
        show_sensitive_config: cli.show_sensitive_config,
        telemetry_enabled: cli
            .telemetry_enabled
            .or(profile.telemetry_enabled)
            .unwrap_or(true),
        telemetry_path: cli
            .telemetry_path
            .clone()
            .or(profile.telemetry_path)
            .unwrap_or_else(|| ".finance-focus/telemetry/events.jsonl".to_string()),
        agents: profile.agents,
    })
}

impl RuntimeConfig {
    pub fn agent_override(&self, key: &str) -> Option<&AgentOverride> {
        self.agents.get(key)
    }

    /// Global limits with the agent's override applied on top.
    pub fn agent_settings(&self, key: &str) -> AgentSettings {
        let overrides = self.agent_override(key);
        AgentSettings {
            max_tool_rounds: overrides
                .and_then(|o| o.max_tool_rounds)
                .unwrap_or(self.max_tool_rounds),
            timeout: overrides
                .and_then(|o| o.timeout_secs)
                .or(self.agent_timeout_secs)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    pub fn tool_settings(&self) -> ToolSettings {
        let api_key = std::env::var(&self.search_api_key_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        ToolSettings {
            knowledge_base_path: self.knowledge_base_path.as_ref().map(PathBuf::from),
            knowledge_base_max_chunks: self.knowledge_base_max_chunks,
            web_search: WebSearchConfig {
                endpoint: self.search_endpoint.clone(),
                api_key,
                max_results: self.search_max_results,
                timeout: Duration::from_secs(self.tool_timeout_secs),
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
