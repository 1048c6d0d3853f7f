use std::sync::Arc;

use anyhow::{Context, Result};

use crate::backend::{EchoBackend, InferenceBackend};
use crate::cli::provider_label;
use crate::config::RuntimeConfig;
use crate::crew::report::{
    Recommendation, ReviewVerdict, parse_recommendation, parse_review_verdict,
};
use crate::crew::tasks::ANALYSIS_TASK;
use crate::crew::{
    AgentOptions, CrewAgents, assemble_agents, build_finance_pipeline, normalize_topic,
};
use crate::pipeline::{Pipeline, TaskOutput};
use crate::provider::resolve_backend;
use crate::telemetry::TelemetrySink;
use crate::tools::{ToolRegistry, Toolkit};

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub topic: String,
    pub final_output: String,
    pub outputs: Vec<TaskOutput>,
    pub recommendation: Recommendation,
    pub verdict: ReviewVerdict,
}

pub fn build_registry(cfg: &RuntimeConfig) -> Result<ToolRegistry> {
    ToolRegistry::new(&cfg.tool_settings()).context("failed to initialise the tool registry")
}

fn agent_options(cfg: &RuntimeConfig, key: &str) -> AgentOptions {
    let overrides = cfg.agent_override(key);
    AgentOptions {
        allow_tools: overrides
            .map(|o| o.allow_tools.clone())
            .unwrap_or_default(),
        deny_tools: overrides.map(|o| o.deny_tools.clone()).unwrap_or_default(),
        settings: cfg.agent_settings(key),
    }
}

/// Crew with a real backend per agent, honoring per-agent overrides.
pub fn assemble_crew(cfg: &RuntimeConfig, registry: &ToolRegistry) -> Result<CrewAgents> {
    let default_toolkit = registry.get_default_toolkit();
    assemble_agents(&default_toolkit, &Toolkit::empty(), |profile| {
        let (backend, provider, model) = resolve_backend(cfg, cfg.agent_override(profile.key))
            .with_context(|| format!("failed to configure the model for '{}'", profile.key))?;
        tracing::info!(
            agent = profile.key,
            provider = provider_label(provider),
            model = %model,
            "Using model"
        );
        Ok((backend, agent_options(cfg, profile.key)))
    })
}

/// Crew wired to the offline echo backend; enough to inspect the graph
/// and capability sets without credentials.
pub fn assemble_offline_crew(cfg: &RuntimeConfig, registry: &ToolRegistry) -> Result<CrewAgents> {
    let default_toolkit = registry.get_default_toolkit();
    assemble_agents(&default_toolkit, &Toolkit::empty(), |profile| {
        let backend: Arc<dyn InferenceBackend> = Arc::new(EchoBackend);
        Ok((backend, agent_options(cfg, profile.key)))
    })
}

/// Run the finance pipeline for `topic` and collect the typed summary.
pub async fn execute_finance_pipeline(
    topic: &str,
    agents: &CrewAgents,
    telemetry: Option<TelemetrySink>,
) -> Result<PipelineReport> {
    let topic = normalize_topic(topic)?;
    let mut pipeline = build_finance_pipeline(&topic, agents)?;
    if let Some(sink) = telemetry {
        pipeline = pipeline.with_telemetry(sink);
    }

    tracing::info!(topic = %topic, "Starting Finance Focus pipeline");
    let final_output = pipeline.run().await?;
    let outputs = pipeline.outputs();
    let recommendation = outputs
        .iter()
        .find(|entry| entry.task == ANALYSIS_TASK)
        .map(|entry| parse_recommendation(&entry.output))
        .unwrap_or(Recommendation {
            score: None,
            stance: None,
        });
    let verdict = parse_review_verdict(&final_output);

    Ok(PipelineReport {
        topic,
        final_output,
        outputs,
        recommendation,
        verdict,
    })
}

pub fn render_report_summary(report: &PipelineReport) -> String {
    let score = report
        .recommendation
        .score
        .map(|s| format!("{s}/10"))
        .unwrap_or_else(|| "n/a".to_string());
    let stance = report
        .recommendation
        .stance
        .map(|s| format!("{s:?}"))
        .unwrap_or_else(|| "n/a".to_string());
    let verdict = match report.verdict {
        ReviewVerdict::Approved => "approved",
        ReviewVerdict::ChangesRequested => "changes requested",
    };
    format!(
        "{}: score={score} stance={stance} review={verdict}",
        report.topic
    )
}

pub async fn run_pipeline_command(
    cfg: &RuntimeConfig,
    topic: &str,
    show_intermediate: bool,
) -> Result<()> {
    let topic = normalize_topic(topic)?;
    let registry = build_registry(cfg)?;
    let agents = assemble_crew(cfg, &registry)?;
    let telemetry = TelemetrySink::new(cfg, topic.clone());

    let report = execute_finance_pipeline(&topic, &agents, Some(telemetry)).await?;

    if show_intermediate {
        for entry in report.outputs.iter().take(report.outputs.len().saturating_sub(1)) {
            println!("===== {} ({}) =====", entry.task, entry.agent);
            println!("{}\n", entry.output.trim_end());
        }
        println!("===== Final output =====");
    }
    println!("{}", report.final_output.trim_end());
    eprintln!("{}", render_report_summary(&report));
    Ok(())
}

/// Human-readable task graph: order, owner, context and tools.
pub fn describe_plan(pipeline: &Pipeline) -> String {
    let mut out = String::new();
    for task in pipeline.tasks() {
        let agent = task.agent();
        out.push_str(&format!(
            "{}. {} [agent: {}]\n",
            task.position() + 1,
            task.name(),
            agent.name()
        ));
        let context = if task.context().is_empty() {
            "<none>".to_string()
        } else {
            task.context().join(", ")
        };
        out.push_str(&format!("   context: {context}\n"));
        let tools = agent.capabilities().names();
        let tools = if tools.is_empty() {
            "<none>".to_string()
        } else {
            tools.join(", ")
        };
        out.push_str(&format!("   tools: {tools}\n"));
        let settings = agent.settings();
        out.push_str(&format!(
            "   max_tool_rounds: {} timeout: {}\n",
            settings.max_tool_rounds,
            settings
                .timeout
                .map(|t| format!("{}s", t.as_secs()))
                .unwrap_or_else(|| "none".to_string())
        ));
    }
    out
}

pub fn run_plan_command(cfg: &RuntimeConfig, topic: &str) -> Result<()> {
    let registry = build_registry(cfg)?;
    let agents = assemble_offline_crew(cfg, &registry)?;
    let pipeline = build_finance_pipeline(topic, &agents)?;
    println!("Pipeline for '{}' ({} tasks):", topic.trim(), pipeline.tasks().len());
    print!("{}", describe_plan(&pipeline));
    Ok(())
}

pub fn run_tools_command(cfg: &RuntimeConfig) -> Result<()> {
    let registry = build_registry(cfg)?;
    for spec in registry.get_default_toolkit().specs() {
        println!("{} ({})", spec.name, spec.side_effect.label());
        println!("  {}", spec.description);
        let schema = serde_json::to_string(&spec.input_schema)
            .context("failed to render tool input schema")?;
        println!("  input: {schema}");
        let schema = serde_json::to_string(&spec.output_schema)
            .context("failed to render tool output schema")?;
        println!("  output: {schema}");
    }
    Ok(())
}
