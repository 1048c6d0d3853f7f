//! The Finance Focus crew: research, analysis, writing and compliance review
//! of a single stock ticker, run as a four-stage pipeline.
pub mod agents;
pub mod report;
pub mod tasks;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::agent::{Agent, AgentSettings};
use crate::backend::InferenceBackend;
use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::tool_policy::unmatched_patterns;
use crate::tools::Toolkit;

use self::agents::{ANALYST, AgentProfile, RESEARCHER, REVIEWER, WRITER};
use self::tasks::finance_task_definitions;

pub const DEFAULT_TOPIC: &str = "AAPL";

/// Per-agent knobs resolved from configuration.
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    pub allow_tools: Vec<String>,
    pub deny_tools: Vec<String>,
    pub settings: AgentSettings,
}

#[derive(Debug, Clone)]
pub struct CrewAgents {
    pub researcher: Arc<Agent>,
    pub analyst: Arc<Agent>,
    pub writer: Arc<Agent>,
    pub reviewer: Arc<Agent>,
}

impl CrewAgents {
    /// In pipeline order.
    pub fn in_order(&self) -> [&Arc<Agent>; 4] {
        [&self.researcher, &self.analyst, &self.writer, &self.reviewer]
    }
}

/// Build one crew member. `extra_tools` come first, then any default tool
/// not already present; the result is then narrowed by allow/deny policy.
pub fn create_agent(
    profile: &AgentProfile,
    backend: Arc<dyn InferenceBackend>,
    default_toolkit: &Toolkit,
    extra_tools: &Toolkit,
    options: &AgentOptions,
) -> Result<Agent> {
    let merged = extra_tools.merge(default_toolkit);
    for pattern in unmatched_patterns(&options.allow_tools, &merged.names()) {
        tracing::warn!(
            agent = profile.key,
            pattern,
            "allow_tools pattern matches no available tool"
        );
    }
    let capabilities = merged.filter(&options.allow_tools, &options.deny_tools);
    tracing::debug!(
        agent = profile.key,
        tools = ?capabilities.names(),
        backend = backend.name(),
        "Assembled agent"
    );

    Agent::builder(profile.name)
        .role(profile.role)
        .goal(profile.goal)
        .backstory(profile.backstory)
        .system_prompt(profile.system_prompt)
        .capabilities(capabilities)
        .backend(backend)
        .settings(options.settings)
        .build()
        .with_context(|| format!("failed to build agent '{}'", profile.key))
}

/// Build all four agents. `configure` supplies each member's backend and options.
pub fn assemble_agents<F>(
    default_toolkit: &Toolkit,
    extra_tools: &Toolkit,
    mut configure: F,
) -> Result<CrewAgents>
where
    F: FnMut(&AgentProfile) -> Result<(Arc<dyn InferenceBackend>, AgentOptions)>,
{
    let mut build = |profile: &AgentProfile| -> Result<Arc<Agent>> {
        let (backend, options) = configure(profile)?;
        let agent = create_agent(profile, backend, default_toolkit, extra_tools, &options)?;
        Ok(Arc::new(agent))
    };

    Ok(CrewAgents {
        researcher: build(&RESEARCHER)?,
        analyst: build(&ANALYST)?,
        writer: build(&WRITER)?,
        reviewer: build(&REVIEWER)?,
    })
}

/// Trimmed ticker/topic. Must be a single non-empty line.
pub fn normalize_topic(topic: &str) -> Result<String> {
    let trimmed = topic.trim();
    if trimmed.is_empty() {
        anyhow::bail!("topic cannot be empty; pass a stock ticker such as --topic {DEFAULT_TOPIC}");
    }
    if trimmed.contains(['\n', '\r']) {
        anyhow::bail!("topic must be a single line, got {trimmed:?}");
    }
    Ok(trimmed.to_string())
}

/// Research → analysis → writing → review, each stage fed by the one before.
pub fn build_finance_pipeline(topic: &str, agents: &CrewAgents) -> Result<Pipeline> {
    let topic = normalize_topic(topic)?;
    let mut builder = Pipeline::builder();
    for (definition, agent) in finance_task_definitions(&topic)
        .into_iter()
        .zip(agents.in_order())
    {
        builder
            .add_task(definition, Arc::clone(agent))
            .map_err(PipelineError::from)?;
    }
    Ok(builder.build().map_err(PipelineError::from)?)
}
