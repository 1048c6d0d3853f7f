use std::time::Duration;

use thiserror::Error;

use crate::task::TaskStatus;

/// A task's context list points at something that is not positioned before it.
///
/// Raised while a task is being constructed, never at run time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidDependencyError {
    #[error("task name cannot be empty")]
    EmptyTaskName,
    #[error("task '{task}' cannot list itself as context")]
    SelfReference { task: String },
    #[error(
        "task '{task}' (position {position}) depends on '{dependency}', which is not positioned before it"
    )]
    NotEarlier {
        task: String,
        position: usize,
        dependency: String,
    },
    #[error("task '{task}' lists context task '{dependency}' more than once")]
    DuplicateContext { task: String, dependency: String },
}

/// The assembled task sequence violates the ordering invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineConfigurationError {
    #[error("pipeline must contain at least one task")]
    Empty,
    #[error("task name '{task}' appears more than once in the pipeline")]
    DuplicateTaskName { task: String },
    #[error("task '{task}' was constructed for position {expected} but sits at position {actual}")]
    MisplacedTask {
        task: String,
        expected: usize,
        actual: usize,
    },
    #[error(
        "task '{task}' at position {position} references context task '{dependency}', which is not strictly earlier in the sequence"
    )]
    OrderingViolation {
        task: String,
        position: usize,
        dependency: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tool '{tool}' failed: {reason}")]
pub struct ToolInvocationError {
    pub tool: String,
    pub reason: String,
}

impl ToolInvocationError {
    pub fn new(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}

/// Why an agent could not produce its output.
#[derive(Debug, Error)]
pub enum AgentFailure {
    #[error("inference backend error: {0:#}")]
    Backend(#[source] anyhow::Error),
    #[error(transparent)]
    Tool(#[from] ToolInvocationError),
    #[error("no final answer after {0} tool-call rounds")]
    ToolRoundsExhausted(usize),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("inference backend returned an empty answer")]
    EmptyResponse,
}

#[derive(Debug, Error)]
#[error("agent '{agent}' failed: {cause}")]
pub struct AgentExecutionError {
    pub agent: String,
    #[source]
    pub cause: AgentFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentConfigError {
    #[error("agent name cannot be empty")]
    EmptyName,
    #[error("agent '{0}' has no inference backend")]
    MissingBackend(String),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task '{task}' has already run (status: {status}); reset it before running again")]
    AlreadyRun { task: String, status: TaskStatus },
    #[error("task '{task}' failed: {source}")]
    Agent {
        task: String,
        #[source]
        source: AgentExecutionError,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidDependency(#[from] InvalidDependencyError),
    #[error(transparent)]
    Configuration(#[from] PipelineConfigurationError),
    #[error("task '{task}' failed: {source}")]
    TaskFailed {
        task: String,
        agent: String,
        #[source]
        source: AgentExecutionError,
    },
    #[error("pipeline already completed; reset it before running again")]
    AlreadyCompleted,
    #[error("pipeline failed at task '{task}'; reset it before running again")]
    AlreadyFailed { task: String },
    #[error("a previous pipeline run was interrupted mid-task; reset it before running again")]
    Interrupted,
    #[error(transparent)]
    Task(TaskError),
}

impl From<TaskError> for PipelineError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Agent { task, source } => PipelineError::TaskFailed {
                task,
                agent: source.agent.clone(),
                source,
            },
            other => PipelineError::Task(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Provider,
    Pipeline,
    Agent,
    Tooling,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Config => "CONFIG",
            ErrorCategory::Provider => "PROVIDER",
            ErrorCategory::Pipeline => "PIPELINE",
            ErrorCategory::Agent => "AGENT",
            ErrorCategory::Tooling => "TOOLING",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Config => {
                "Check --config-path/--profile and the field names in the profile TOML."
            }
            ErrorCategory::Provider => {
                "Set provider credentials (for example OPENAI_API_KEY) or run with --provider ollama or --provider echo."
            }
            ErrorCategory::Pipeline => {
                "Each task may only take context from tasks positioned before it. Run `finance-focus plan` to inspect the graph."
            }
            ErrorCategory::Agent => {
                "The model backend failed mid-run. Retry with RUST_LOG=debug to see each task and tool call."
            }
            ErrorCategory::Tooling => {
                "Review search endpoint/knowledge base settings and retry with RUST_LOG=info for tool logs."
            }
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    if let Some(pipeline_err) = err.downcast_ref::<PipelineError>() {
        return match pipeline_err {
            PipelineError::TaskFailed { source, .. } => match source.cause {
                AgentFailure::Tool(_) => ErrorCategory::Tooling,
                _ => ErrorCategory::Agent,
            },
            _ => ErrorCategory::Pipeline,
        };
    }

    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("api_key")
        || msg.contains("no provider could be auto-detected")
        || msg.contains("provider")
    {
        return ErrorCategory::Provider;
    }

    if msg.contains("profile")
        || msg.contains("config")
        || msg.contains("invalid value")
        || msg.contains("unknown agent")
    {
        return ErrorCategory::Config;
    }

    if msg.contains("tool") || msg.contains("knowledge base") || msg.contains("search") {
        return ErrorCategory::Tooling;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error, show_sensitive_config: bool) -> String {
    let category = categorize_error(err);
    let rendered_error = render_error_message(err, show_sensitive_config);
    format!(
        "[{}] {}\nHint: {}",
        category.code(),
        rendered_error,
        category.hint()
    )
}

pub fn render_error_message(err: &anyhow::Error, show_sensitive_config: bool) -> String {
    let full = format!("{err:#}");
    if show_sensitive_config {
        full
    } else {
        redact_sensitive_text(&full)
    }
}

pub fn redact_sensitive_text(text: &str) -> String {
    redact_api_keys(&redact_bearer_tokens(text))
}

const BEARER_PREFIX: &str = "Bearer ";

fn token_end(remainder: &str) -> usize {
    remainder
        .find(|ch: char| {
            ch.is_whitespace() || matches!(ch, '"' | '\'' | ',' | ';' | ')' | ']' | '}')
        })
        .unwrap_or(remainder.len())
}

pub fn redact_bearer_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;

    while let Some(offset) = text[cursor..].find(BEARER_PREFIX) {
        let start = cursor + offset + BEARER_PREFIX.len();
        out.push_str(&text[cursor..start]);
        let end = token_end(&text[start..]);
        if end > 0 {
            out.push_str("[REDACTED]");
        }
        cursor = start + end;
    }

    out.push_str(&text[cursor..]);
    out
}

/// Masks `sk-...` style secret keys, keeping the prefix so the key family
/// stays recognisable.
pub fn redact_api_keys(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;

    while let Some(offset) = text[cursor..].find("sk-") {
        let start = cursor + offset;
        let at_word_start = text[..start]
            .chars()
            .next_back()
            .map(|ch| !ch.is_ascii_alphanumeric())
            .unwrap_or(true);
        let end = start + token_end(&text[start..]);
        out.push_str(&text[cursor..start]);
        if at_word_start && end - start > 8 {
            out.push_str("sk-[REDACTED]");
        } else {
            out.push_str(&text[start..end]);
        }
        cursor = end.max(start + 3);
    }

    out.push_str(&text[cursor..]);
    out
}
