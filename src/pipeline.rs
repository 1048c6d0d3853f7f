use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Value, json};

use crate::agent::Agent;
use crate::error::{InvalidDependencyError, PipelineConfigurationError, PipelineError};
use crate::task::{Task, TaskDefinition, TaskStatus, render_context};
use crate::telemetry::TelemetrySink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutput {
    pub task: String,
    pub agent: String,
    pub output: String,
}

/// Check the whole sequence: non-empty, unique names, each task at the
/// position it was built for, and context drawn only from strictly earlier tasks.
pub fn validate_sequence(tasks: &[Task]) -> Result<(), PipelineConfigurationError> {
    if tasks.is_empty() {
        return Err(PipelineConfigurationError::Empty);
    }

    let mut earlier = BTreeSet::<&str>::new();
    for (index, task) in tasks.iter().enumerate() {
        if task.position() != index {
            return Err(PipelineConfigurationError::MisplacedTask {
                task: task.name().to_string(),
                expected: task.position(),
                actual: index,
            });
        }
        if earlier.contains(task.name()) {
            return Err(PipelineConfigurationError::DuplicateTaskName {
                task: task.name().to_string(),
            });
        }
        if let Some(dependency) = task
            .context()
            .iter()
            .find(|dep| !earlier.contains(dep.as_str()))
        {
            return Err(PipelineConfigurationError::OrderingViolation {
                task: task.name().to_string(),
                position: index,
                dependency: dependency.clone(),
            });
        }
        earlier.insert(task.name());
    }
    Ok(())
}

fn emit(telemetry: &Option<TelemetrySink>, event: &str, payload: Value) {
    if let Some(sink) = telemetry {
        sink.emit(event, payload);
    }
}

/// An ordered, validated sequence of tasks run one at a time, fail-fast.
#[derive(Debug)]
pub struct Pipeline {
    tasks: Vec<Task>,
    status: PipelineStatus,
    failed_task: Option<String>,
    telemetry: Option<TelemetrySink>,
}

impl Pipeline {
    pub fn new(tasks: Vec<Task>) -> Result<Self, PipelineConfigurationError> {
        validate_sequence(&tasks)?;
        Ok(Self {
            tasks,
            status: PipelineStatus::Idle,
            failed_task: None,
            telemetry: None,
        })
    }

    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn with_telemetry(mut self, telemetry: TelemetrySink) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Name of the task that failed the last run, if any.
    pub fn failed_task(&self) -> Option<&str> {
        self.failed_task.as_deref()
    }

    /// Outputs of every completed task, in pipeline order.
    pub fn outputs(&self) -> Vec<TaskOutput> {
        self.tasks
            .iter()
            .filter_map(|task| {
                task.output().map(|output| TaskOutput {
                    task: task.name().to_string(),
                    agent: task.agent().name().to_string(),
                    output: output.to_string(),
                })
            })
            .collect()
    }

    pub fn final_output(&self) -> Option<&str> {
        match self.status {
            PipelineStatus::Completed => self.tasks.last().and_then(Task::output),
            _ => None,
        }
    }

    /// Run every task in order and return the last task's output.
    ///
    /// A completed or failed pipeline refuses to run again until `reset`, as
    /// does one whose previous `run` future was dropped mid-task.
    pub async fn run(&mut self) -> Result<String, PipelineError> {
        match self.status {
            PipelineStatus::Completed => return Err(PipelineError::AlreadyCompleted),
            PipelineStatus::Failed => {
                return Err(PipelineError::AlreadyFailed {
                    task: self.failed_task.clone().unwrap_or_default(),
                });
            }
            PipelineStatus::Running => return Err(PipelineError::Interrupted),
            PipelineStatus::Idle => {}
        }

        self.status = PipelineStatus::Running;
        let started = Instant::now();
        tracing::info!(tasks = self.tasks.len(), "Pipeline started");
        emit(
            &self.telemetry,
            "pipeline.started",
            json!({ "tasks": self.tasks.len() }),
        );

        for index in 0..self.tasks.len() {
            let (done, rest) = self.tasks.split_at_mut(index);
            let task = &mut rest[0];

            let mut entries = Vec::with_capacity(task.context().len());
            let mut missing = None;
            for dependency in task.context() {
                match done
                    .iter()
                    .find(|earlier| earlier.name() == dependency)
                    .and_then(Task::output)
                {
                    Some(output) => entries.push((dependency.as_str(), output)),
                    None => {
                        missing = Some(PipelineConfigurationError::OrderingViolation {
                            task: task.name().to_string(),
                            position: index,
                            dependency: dependency.clone(),
                        });
                        break;
                    }
                }
            }
            if let Some(err) = missing {
                drop(entries);
                let task_name = task.name().to_string();
                tracing::error!(
                    task = %task_name,
                    error = %err,
                    "Context unavailable; stopping pipeline"
                );
                self.mark_failed(task_name, started);
                return Err(err.into());
            }
            let context = render_context(entries);

            let task_name = task.name().to_string();
            let agent_name = task.agent().name().to_string();
            let task_started = Instant::now();
            tracing::info!(
                task = %task_name,
                agent = %agent_name,
                position = index,
                context_tasks = task.context().len(),
                "Task started"
            );
            emit(
                &self.telemetry,
                "task.started",
                json!({ "task": task_name, "agent": agent_name, "position": index }),
            );

            match task.run(&context).await {
                Ok(output) => {
                    let elapsed_ms = task_started.elapsed().as_millis() as u64;
                    tracing::info!(
                        task = %task_name,
                        agent = %agent_name,
                        elapsed_ms,
                        output_chars = output.len(),
                        "Task completed"
                    );
                    emit(
                        &self.telemetry,
                        "task.completed",
                        json!({
                            "task": task_name,
                            "agent": agent_name,
                            "position": index,
                            "elapsed_ms": elapsed_ms,
                            "output_chars": output.len(),
                        }),
                    );
                }
                Err(err) => {
                    let err = PipelineError::from(err);
                    tracing::error!(
                        task = %task_name,
                        agent = %agent_name,
                        error = %err,
                        "Task failed; stopping pipeline"
                    );
                    emit(
                        &self.telemetry,
                        "task.failed",
                        json!({
                            "task": task_name,
                            "agent": agent_name,
                            "position": index,
                            "error": format!("{err:#}"),
                        }),
                    );
                    self.mark_failed(task_name, started);
                    return Err(err);
                }
            }
        }

        self.status = PipelineStatus::Completed;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(elapsed_ms, "Pipeline completed");
        emit(
            &self.telemetry,
            "pipeline.completed",
            json!({ "elapsed_ms": elapsed_ms }),
        );

        Ok(self.final_output().unwrap_or_default().to_string())
    }

    fn mark_failed(&mut self, task: String, started: Instant) {
        emit(
            &self.telemetry,
            "pipeline.failed",
            json!({
                "task": task,
                "elapsed_ms": started.elapsed().as_millis() as u64,
            }),
        );
        self.status = PipelineStatus::Failed;
        self.failed_task = Some(task);
    }

    /// Back to `Idle` with every task `Pending`; the next `run` starts over.
    pub fn reset(&mut self) {
        for task in &mut self.tasks {
            task.reset();
        }
        self.status = PipelineStatus::Idle;
        self.failed_task = None;
    }

    pub fn task_statuses(&self) -> Vec<(&str, TaskStatus)> {
        self.tasks
            .iter()
            .map(|task| (task.name(), task.status()))
            .collect()
    }
}

/// Places tasks one by one, validating each against those already placed.
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    tasks: Vec<Task>,
}

impl PipelineBuilder {
    pub fn add_task(
        &mut self,
        definition: TaskDefinition,
        agent: Arc<Agent>,
    ) -> Result<&mut Self, InvalidDependencyError> {
        let task = Task::new(definition, agent, &self.tasks)?;
        self.tasks.push(task);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn build(self) -> Result<Pipeline, PipelineConfigurationError> {
        Pipeline::new(self.tasks)
    }
}
