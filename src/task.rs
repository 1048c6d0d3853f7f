use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::agent::Agent;
use crate::error::{InvalidDependencyError, TaskError};

/// Header that labels each upstream output inside a task's input.
pub const CONTEXT_HEADER_PREFIX: &str = "### Output of task: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// What a task asks for, before it is bound to an agent and a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub name: String,
    pub description: String,
    pub expected_output: String,
    /// Names of upstream tasks, in the order their outputs are handed over.
    pub context: Vec<String>,
}

impl TaskDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            expected_output: expected_output.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context<I, S>(mut self, context: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context = context.into_iter().map(Into::into).collect();
        self
    }
}

/// Render upstream outputs as labeled blocks, in the order given.
pub fn render_context<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    entries
        .into_iter()
        .map(|(name, output)| format!("{CONTEXT_HEADER_PREFIX}{name}\n{}", output.trim_end()))
        .collect::<Vec<String>>()
        .join("\n\n")
}

#[derive(Debug)]
pub struct Task {
    definition: TaskDefinition,
    agent: Arc<Agent>,
    position: usize,
    status: TaskStatus,
    output: Option<String>,
}

impl Task {
    /// Bind a definition to an agent at the next free position after `placed`.
    ///
    /// Every context name must resolve to a task in `placed`; anything else
    /// (itself, a later task, an unknown name) is rejected here.
    pub fn new(
        definition: TaskDefinition,
        agent: Arc<Agent>,
        placed: &[Task],
    ) -> Result<Self, InvalidDependencyError> {
        let name = definition.name.trim().to_string();
        if name.is_empty() {
            return Err(InvalidDependencyError::EmptyTaskName);
        }
        let position = placed.len();

        let mut seen = BTreeSet::<&str>::new();
        for dependency in &definition.context {
            let dependency = dependency.trim();
            if dependency == name {
                return Err(InvalidDependencyError::SelfReference { task: name });
            }
            if !seen.insert(dependency) {
                return Err(InvalidDependencyError::DuplicateContext {
                    task: name,
                    dependency: dependency.to_string(),
                });
            }
            if !placed.iter().any(|task| task.name() == dependency) {
                return Err(InvalidDependencyError::NotEarlier {
                    task: name,
                    position,
                    dependency: dependency.to_string(),
                });
            }
        }

        let context = definition
            .context
            .iter()
            .map(|dep| dep.trim().to_string())
            .collect();
        let definition = TaskDefinition {
            name,
            context,
            ..definition
        };

        Ok(Self {
            definition,
            agent,
            position,
            status: TaskStatus::Pending,
            output: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &TaskDefinition {
        &self.definition
    }

    pub fn context(&self) -> &[String] {
        &self.definition.context
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Set once, when the task completes.
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn compose_input(&self, resolved_context: &str) -> String {
        let mut input = format!(
            "{}\n\nExpected output:\n{}",
            self.definition.description.trim(),
            self.definition.expected_output.trim()
        );
        if !resolved_context.trim().is_empty() {
            input.push_str("\n\nContext from earlier tasks:\n\n");
            input.push_str(resolved_context);
        }
        input
    }

    /// Runs at most once per reset. A second call fails with `AlreadyRun`
    /// and leaves the stored output untouched.
    pub async fn run(&mut self, resolved_context: &str) -> Result<String, TaskError> {
        if self.status != TaskStatus::Pending {
            return Err(TaskError::AlreadyRun {
                task: self.definition.name.clone(),
                status: self.status,
            });
        }

        self.status = TaskStatus::Running;
        let input = self.compose_input(resolved_context);
        match self.agent.execute(&input).await {
            Ok(output) => {
                self.status = TaskStatus::Completed;
                self.output = Some(output.clone());
                Ok(output)
            }
            Err(source) => {
                self.status = TaskStatus::Failed;
                Err(TaskError::Agent {
                    task: self.definition.name.clone(),
                    source,
                })
            }
        }
    }

    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.output = None;
    }
}
