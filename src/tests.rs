use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde_json::{Value, json};
use tempfile::tempdir;

use crate::agent::*;
use crate::backend::*;
use crate::cli::*;
use crate::config::*;
use crate::crew::agents::*;
use crate::crew::report::*;
use crate::crew::tasks::*;
use crate::crew::*;
use crate::error::*;
use crate::pipeline::*;
use crate::provider::*;
use crate::runner::*;
use crate::task::*;
use crate::telemetry::*;
use crate::tools::calculator::CalculatorTool;
use crate::tools::*;

/// Answers `label:payload`, where payload is the output of the last context
/// block, or the first line of the task input when there is no context.
struct LabelBackend {
    label: String,
    calls: Arc<AtomicUsize>,
}

impl LabelBackend {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn counted(label: &str, calls: &Arc<AtomicUsize>) -> Self {
        Self {
            label: label.to_string(),
            calls: Arc::clone(calls),
        }
    }
}

fn last_user_message(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|msg| msg.role == ChatRole::User)
        .map(|msg| msg.content.clone())
        .unwrap_or_default()
}

fn payload_of(input: &str) -> String {
    match input.rsplit_once(CONTEXT_HEADER_PREFIX) {
        Some((_, block)) => block
            .split_once('\n')
            .map(|(_, output)| output.trim().to_string())
            .unwrap_or_default(),
        None => input.lines().next().unwrap_or_default().trim().to_string(),
    }
}

#[async_trait]
impl InferenceBackend for LabelBackend {
    fn name(&self) -> &str {
        "label"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> anyhow::Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let input = last_user_message(messages);
        Ok(Completion::text(format!("{}:{}", self.label, payload_of(&input))))
    }
}

/// Fixed reply; remembers every task input it was given.
struct RecordingBackend {
    reply: String,
    inputs: Mutex<Vec<String>>,
}

impl RecordingBackend {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            inputs: Mutex::new(Vec::new()),
        }
    }

    fn inputs(&self) -> Vec<String> {
        self.inputs.lock().expect("inputs lock").clone()
    }
}

#[async_trait]
impl InferenceBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> anyhow::Result<Completion> {
        self.inputs
            .lock()
            .expect("inputs lock")
            .push(last_user_message(messages));
        Ok(Completion::text(self.reply.clone()))
    }
}

/// Plays back completions in order and keeps each transcript it saw.
struct ScriptedBackend {
    script: Mutex<VecDeque<Completion>>,
    repeat_last: bool,
    transcripts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    fn new(script: Vec<Completion>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat_last: false,
            transcripts: Mutex::new(Vec::new()),
        }
    }

    fn forever(completion: Completion) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![completion])
        }
    }

    fn transcripts(&self) -> Vec<Vec<ChatMessage>> {
        self.transcripts.lock().expect("transcripts lock").clone()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> anyhow::Result<Completion> {
        self.transcripts
            .lock()
            .expect("transcripts lock")
            .push(messages.to_vec());
        let mut script = self.script.lock().expect("script lock");
        let next = if self.repeat_last && script.len() == 1 {
            script.front().cloned()
        } else {
            script.pop_front()
        };
        next.ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}

struct FailingBackend;

#[async_trait]
impl InferenceBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> anyhow::Result<Completion> {
        Err(anyhow::anyhow!("backend unavailable (HTTP 503)"))
    }
}

struct SlowBackend(Duration);

#[async_trait]
impl InferenceBackend for SlowBackend {
    fn name(&self) -> &str {
        "slow"
    }

    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> anyhow::Result<Completion> {
        tokio::time::sleep(self.0).await;
        Ok(Completion::text("too late"))
    }
}

struct NamedTool {
    name: String,
    description: String,
}

fn named_tool(name: &str, description: &str) -> Arc<dyn Tool> {
    Arc::new(NamedTool {
        name: name.to_string(),
        description: description.to_string(),
    })
}

#[async_trait]
impl Tool for NamedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn output_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::None
    }

    async fn invoke(&self, _args: Value) -> Result<Value, ToolInvocationError> {
        Ok(json!({"tool": self.name}))
    }
}

fn agent(name: &str, backend: Arc<dyn InferenceBackend>) -> Arc<Agent> {
    Arc::new(
        Agent::builder(name)
            .backend(backend)
            .build()
            .expect("agent should build"),
    )
}

fn label_agent(label: &str) -> Arc<Agent> {
    agent(label, Arc::new(LabelBackend::new(label)))
}

fn calculator_call(id: &str, expression: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: CALCULATOR_TOOL_NAME.to_string(),
        arguments: json!({ "expression": expression }),
    }
}

/// Research → Analysis → Writing → Review, where the research description
/// is just the topic.
fn labeled_chain(topic: &str) -> Pipeline {
    let mut builder = Pipeline::builder();
    builder
        .add_task(TaskDefinition::new("Research", topic, "notes"), label_agent("Research"))
        .expect("research should place")
        .add_task(
            TaskDefinition::new("Analysis", "analyze", "score").with_context(["Research"]),
            label_agent("Analysis"),
        )
        .expect("analysis should place")
        .add_task(
            TaskDefinition::new("Writing", "write", "brief").with_context(["Analysis"]),
            label_agent("Writing"),
        )
        .expect("writing should place")
        .add_task(
            TaskDefinition::new("Review", "review", "verdict").with_context(["Writing"]),
            label_agent("Review"),
        )
        .expect("review should place");
    builder.build().expect("chain should validate")
}

fn cli_from(args: &[&str]) -> Cli {
    let mut argv = vec!["finance-focus"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).expect("cli args should parse")
}

fn profiles_from(toml_text: &str) -> ProfilesFile {
    toml::from_str(toml_text).expect("profiles toml should parse")
}

fn echo_cfg() -> RuntimeConfig {
    resolve_runtime_config(
        &cli_from(&["--provider", "echo", "--telemetry-enabled", "false"]),
        &ProfilesFile::default(),
    )
    .expect("echo config should resolve")
}

fn label_crew(registry: &ToolRegistry, researcher_allow: &[&str]) -> CrewAgents {
    assemble_agents(&registry.get_default_toolkit(), &Toolkit::empty(), |profile| {
        let label = match profile.key {
            "researcher" => "Research",
            "analyst" => "Analysis",
            "writer" => "Writing",
            _ => "Review",
        };
        let mut options = AgentOptions::default();
        if profile.key == "researcher" {
            options.allow_tools = researcher_allow.iter().map(|p| p.to_string()).collect();
        }
        let backend: Arc<dyn InferenceBackend> = Arc::new(LabelBackend::new(label));
        Ok((backend, options))
    })
    .expect("crew should assemble")
}

#[tokio::test]
async fn chain_runs_in_order_and_feeds_each_output_forward() {
    let mut pipeline = labeled_chain("AAPL");
    let output = pipeline.run().await.expect("pipeline should run");

    assert_eq!(output, "Review:Writing:Analysis:Research:AAPL");
    assert_eq!(pipeline.status(), PipelineStatus::Completed);
    assert_eq!(pipeline.final_output(), Some(output.as_str()));

    let outputs = pipeline.outputs();
    let names = outputs
        .iter()
        .map(|entry| entry.task.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(names, vec!["Research", "Analysis", "Writing", "Review"]);
    assert_eq!(outputs[1].output, "Analysis:Research:AAPL");
    assert_eq!(outputs[1].agent, "Analysis");
}

#[tokio::test]
async fn task_without_context_receives_only_its_own_description() {
    let recorder = Arc::new(RecordingBackend::new("done"));
    let mut builder = Pipeline::builder();
    builder
        .add_task(
            TaskDefinition::new("Solo", "Look up MSFT", "one line"),
            agent("solo", recorder.clone()),
        )
        .expect("solo should place");
    let mut pipeline = builder.build().expect("single task pipeline");

    pipeline.run().await.expect("pipeline should run");
    let inputs = recorder.inputs();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0], "Look up MSFT\n\nExpected output:\none line");
    assert!(!inputs[0].contains(CONTEXT_HEADER_PREFIX));
}

#[tokio::test]
async fn fan_in_context_is_concatenated_in_listed_order() {
    let recorder = Arc::new(RecordingBackend::new("merged"));
    let mut builder = Pipeline::builder();
    builder
        .add_task(
            TaskDefinition::new("A", "first", "a"),
            agent("a", Arc::new(RecordingBackend::new("a-out"))),
        )
        .expect("A should place")
        .add_task(
            TaskDefinition::new("B", "second", "b"),
            agent("b", Arc::new(RecordingBackend::new("b-out\n"))),
        )
        .expect("B should place")
        .add_task(
            TaskDefinition::new("C", "combine", "c").with_context(["B", "A"]),
            agent("c", recorder.clone()),
        )
        .expect("C should place");
    let mut pipeline = builder.build().expect("fan-in pipeline");

    pipeline.run().await.expect("pipeline should run");
    let input = recorder.inputs().pop().expect("C should have been invoked");
    assert!(input.starts_with("combine\n\nExpected output:\nc\n\nContext from earlier tasks:\n\n"));
    assert!(input.ends_with("### Output of task: B\nb-out\n\n### Output of task: A\na-out"));
}

#[test]
fn invalid_dependencies_are_rejected_at_construction() {
    let mut builder = Pipeline::builder();
    builder
        .add_task(TaskDefinition::new("A", "first", "a"), label_agent("a"))
        .expect("A should place");

    let err = builder
        .add_task(
            TaskDefinition::new("B", "b", "b").with_context(["B"]),
            label_agent("b"),
        )
        .expect_err("self reference should fail");
    assert_eq!(
        err,
        InvalidDependencyError::SelfReference {
            task: "B".to_string()
        }
    );

    let err = builder
        .add_task(
            TaskDefinition::new("B", "b", "b").with_context(["Later"]),
            label_agent("b"),
        )
        .expect_err("unknown or later task should fail");
    assert_eq!(
        err,
        InvalidDependencyError::NotEarlier {
            task: "B".to_string(),
            position: 1,
            dependency: "Later".to_string(),
        }
    );

    let err = builder
        .add_task(
            TaskDefinition::new("B", "b", "b").with_context(["A", " A "]),
            label_agent("b"),
        )
        .expect_err("duplicate context should fail");
    assert!(matches!(err, InvalidDependencyError::DuplicateContext { .. }));

    let err = builder
        .add_task(TaskDefinition::new("   ", "b", "b"), label_agent("b"))
        .expect_err("blank name should fail");
    assert_eq!(err, InvalidDependencyError::EmptyTaskName);

    assert_eq!(builder.len(), 1, "rejected tasks must not be placed");
}

#[test]
fn forward_reference_fails_even_if_target_is_added_later() {
    let mut builder = Pipeline::builder();
    let err = builder
        .add_task(
            TaskDefinition::new("Analysis", "a", "a").with_context(["Research"]),
            label_agent("analyst"),
        )
        .expect_err("forward reference should fail");
    assert!(matches!(
        err,
        InvalidDependencyError::NotEarlier { position: 0, .. }
    ));
    assert!(builder.is_empty());
}

#[test]
fn pipeline_rejects_bad_sequences() {
    let err = Pipeline::new(Vec::new()).expect_err("empty pipeline should fail");
    assert_eq!(err, PipelineConfigurationError::Empty);

    let first = Task::new(TaskDefinition::new("A", "a", "a"), label_agent("a"), &[])
        .expect("A should construct");
    let twin = Task::new(
        TaskDefinition::new("A", "again", "a"),
        label_agent("a"),
        std::slice::from_ref(&first),
    )
    .expect("same name constructs on its own");
    let err = Pipeline::new(vec![first, twin]).expect_err("duplicate names should fail");
    assert_eq!(
        err,
        PipelineConfigurationError::DuplicateTaskName {
            task: "A".to_string()
        }
    );

    let a = Task::new(TaskDefinition::new("A", "a", "a"), label_agent("a"), &[])
        .expect("A should construct");
    let b = Task::new(TaskDefinition::new("B", "b", "b"), label_agent("b"), &[])
        .expect("B should construct");
    let err = Pipeline::new(vec![a, b]).expect_err("misplaced task should fail");
    assert_eq!(
        err,
        PipelineConfigurationError::MisplacedTask {
            task: "B".to_string(),
            expected: 0,
            actual: 1,
        }
    );
}

#[test]
fn pipeline_rejects_context_that_is_not_earlier_in_the_sequence() {
    let a = Task::new(TaskDefinition::new("A", "a", "a"), label_agent("a"), &[])
        .expect("A should construct");
    let b = Task::new(
        TaskDefinition::new("B", "b", "b").with_context(["A"]),
        label_agent("b"),
        std::slice::from_ref(&a),
    )
    .expect("B should construct after A");
    let c = Task::new(TaskDefinition::new("C", "c", "c"), label_agent("c"), &[])
        .expect("C should construct");

    let err = Pipeline::new(vec![c, b]).expect_err("B's context is missing");
    assert_eq!(
        err,
        PipelineConfigurationError::OrderingViolation {
            task: "B".to_string(),
            position: 1,
            dependency: "A".to_string(),
        }
    );
}

#[tokio::test]
async fn failure_stops_the_pipeline_at_the_failing_task() {
    let research_calls = Arc::new(AtomicUsize::new(0));
    let writing_calls = Arc::new(AtomicUsize::new(0));
    let review_calls = Arc::new(AtomicUsize::new(0));

    let mut builder = Pipeline::builder();
    builder
        .add_task(
            TaskDefinition::new("Research", "AAPL", "notes"),
            agent(
                "researcher",
                Arc::new(LabelBackend::counted("Research", &research_calls)),
            ),
        )
        .expect("research should place")
        .add_task(
            TaskDefinition::new("Analysis", "analyze", "score").with_context(["Research"]),
            agent("analyst", Arc::new(FailingBackend)),
        )
        .expect("analysis should place")
        .add_task(
            TaskDefinition::new("Writing", "write", "brief").with_context(["Analysis"]),
            agent(
                "writer",
                Arc::new(LabelBackend::counted("Writing", &writing_calls)),
            ),
        )
        .expect("writing should place")
        .add_task(
            TaskDefinition::new("Review", "review", "verdict").with_context(["Writing"]),
            agent(
                "reviewer",
                Arc::new(LabelBackend::counted("Review", &review_calls)),
            ),
        )
        .expect("review should place");
    let mut pipeline = builder.build().expect("pipeline should validate");

    let err = pipeline.run().await.expect_err("analysis should fail");
    match &err {
        PipelineError::TaskFailed {
            task,
            agent,
            source,
        } => {
            assert_eq!(task, "Analysis");
            assert_eq!(agent, "analyst");
            assert!(matches!(source.cause, AgentFailure::Backend(_)));
            assert!(source.to_string().contains("backend unavailable"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(research_calls.load(Ordering::SeqCst), 1);
    assert_eq!(writing_calls.load(Ordering::SeqCst), 0);
    assert_eq!(review_calls.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.status(), PipelineStatus::Failed);
    assert_eq!(pipeline.failed_task(), Some("Analysis"));
    assert_eq!(pipeline.final_output(), None);
    assert_eq!(
        pipeline.task_statuses(),
        vec![
            ("Research", TaskStatus::Completed),
            ("Analysis", TaskStatus::Failed),
            ("Writing", TaskStatus::Pending),
            ("Review", TaskStatus::Pending),
        ]
    );

    let err = pipeline.run().await.expect_err("failed pipeline must not rerun");
    assert!(matches!(err, PipelineError::AlreadyFailed { ref task } if task == "Analysis"));
    assert_eq!(research_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dropped_run_leaves_pipeline_interrupted_until_reset() {
    let mut builder = Pipeline::builder();
    builder
        .add_task(
            TaskDefinition::new("Research", "AAPL", "notes"),
            agent(
                "researcher",
                Arc::new(SlowBackend(Duration::from_millis(100))),
            ),
        )
        .expect("research should place");
    let mut pipeline = builder.build().expect("pipeline should validate");

    let cut_short = tokio::time::timeout(Duration::from_millis(5), pipeline.run()).await;
    assert!(cut_short.is_err(), "run should still be in flight");
    assert_eq!(pipeline.status(), PipelineStatus::Running);

    let err = pipeline.run().await.expect_err("interrupted pipeline must not rerun");
    assert!(matches!(err, PipelineError::Interrupted));
    let err = anyhow::Error::new(err);
    assert_eq!(categorize_error(&err), ErrorCategory::Pipeline);

    pipeline.reset();
    let output = pipeline.run().await.expect("run after reset");
    assert_eq!(output, "too late");
    assert_eq!(pipeline.status(), PipelineStatus::Completed);
}

#[tokio::test]
async fn completed_pipeline_refuses_to_rerun_until_reset() {
    let mut pipeline = labeled_chain("MSFT");
    let first = pipeline.run().await.expect("first run");

    let err = pipeline.run().await.expect_err("second run should fail");
    assert!(matches!(err, PipelineError::AlreadyCompleted));
    assert_eq!(pipeline.final_output(), Some(first.as_str()));

    pipeline.reset();
    assert_eq!(pipeline.status(), PipelineStatus::Idle);
    assert!(pipeline.outputs().is_empty());
    assert!(
        pipeline
            .task_statuses()
            .iter()
            .all(|(_, status)| *status == TaskStatus::Pending)
    );

    let second = pipeline.run().await.expect("run after reset");
    assert_eq!(first, second);
}

#[tokio::test]
async fn task_runs_once_per_reset() {
    let mut task = Task::new(
        TaskDefinition::new("Research", "NVDA", "notes"),
        label_agent("Research"),
        &[],
    )
    .expect("task should construct");
    assert_eq!(task.status(), TaskStatus::Pending);

    let output = task.run("").await.expect("first run");
    assert_eq!(output, "Research:NVDA");
    assert_eq!(task.status(), TaskStatus::Completed);

    let err = task.run("").await.expect_err("second run should fail");
    assert!(matches!(
        err,
        TaskError::AlreadyRun {
            status: TaskStatus::Completed,
            ..
        }
    ));
    assert_eq!(task.output(), Some("Research:NVDA"));

    task.reset();
    assert_eq!(task.status(), TaskStatus::Pending);
    assert_eq!(task.output(), None);
}

#[test]
fn task_names_and_context_are_trimmed() {
    let a = Task::new(TaskDefinition::new(" A ", "a", "a"), label_agent("a"), &[])
        .expect("A should construct");
    assert_eq!(a.name(), "A");
    let b = Task::new(
        TaskDefinition::new("B", "b", "b").with_context([" A"]),
        label_agent("b"),
        std::slice::from_ref(&a),
    )
    .expect("B should construct");
    assert_eq!(b.context(), ["A".to_string()]);
    assert_eq!(b.position(), 1);
}

#[test]
fn toolkit_keeps_first_of_each_name_and_merges_in_order() {
    let extra = Toolkit::new(vec![
        named_tool("web_search", "custom search"),
        named_tool("sec_filings", "filings"),
        named_tool("web_search", "duplicate"),
    ]);
    assert_eq!(extra.names(), vec!["web_search", "sec_filings"]);

    let defaults = Toolkit::new(vec![
        named_tool(CALCULATOR_TOOL_NAME, "calc"),
        named_tool("web_search", "default search"),
    ]);
    let merged = extra.merge(&defaults);
    assert_eq!(
        merged.names(),
        vec!["web_search", "sec_filings", CALCULATOR_TOOL_NAME]
    );
    let search = merged.get("web_search").expect("search should be present");
    assert_eq!(search.description(), "custom search");
}

#[test]
fn toolkit_filter_applies_allow_then_deny() {
    let toolkit = Toolkit::new(vec![
        named_tool(CALCULATOR_TOOL_NAME, "calc"),
        named_tool(WEB_SEARCH_TOOL_NAME, "search"),
        named_tool(KNOWLEDGE_BASE_TOOL_NAME, "kb"),
    ]);

    let filtered = toolkit.filter(&["*search*".to_string()], &[]);
    assert_eq!(
        filtered.names(),
        vec![WEB_SEARCH_TOOL_NAME, KNOWLEDGE_BASE_TOOL_NAME]
    );

    let filtered = toolkit.filter(&[], &["web_*".to_string()]);
    assert_eq!(
        filtered.names(),
        vec![CALCULATOR_TOOL_NAME, KNOWLEDGE_BASE_TOOL_NAME]
    );

    let filtered = toolkit.filter(&["*".to_string()], &["*".to_string()]);
    assert!(filtered.is_empty());
}

#[tokio::test]
async fn toolkit_refuses_tools_outside_the_capability_set() {
    let toolkit = Toolkit::new(vec![named_tool(CALCULATOR_TOOL_NAME, "calc")]);
    let err = toolkit
        .invoke(WEB_SEARCH_TOOL_NAME, json!({"query": "AAPL"}))
        .await
        .expect_err("web search is not granted");
    assert_eq!(err.tool, WEB_SEARCH_TOOL_NAME);
    assert!(err.reason.contains("capability set"));
}

#[test]
fn registry_hands_out_the_same_default_tools_every_time() {
    let registry = ToolRegistry::new(&ToolSettings::default()).expect("registry should build");
    let first = registry.get_default_toolkit();
    let second = registry.get_default_toolkit();

    assert_eq!(
        first.names(),
        vec![
            CALCULATOR_TOOL_NAME,
            WEB_SEARCH_TOOL_NAME,
            KNOWLEDGE_BASE_TOOL_NAME
        ]
    );
    assert_eq!(first.specs(), second.specs());
    for name in first.names() {
        let a = first.get(name).expect("tool in first toolkit");
        let b = second.get(name).expect("tool in second toolkit");
        assert!(Arc::ptr_eq(a, b), "{name} should be the same instance");
    }
}

#[tokio::test]
async fn agent_folds_tool_results_into_its_answer() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Completion::calls(vec![calculator_call("call-1", "2 + 3 * 4")]),
        Completion::text("Score: 7/10\nStance: Bullish"),
    ]));
    let analyst = Agent::builder("Financial Data Analyst")
        .capabilities(Toolkit::new(vec![Arc::new(CalculatorTool) as Arc<dyn Tool>]))
        .backend(backend.clone())
        .build()
        .expect("agent should build");

    let output = analyst.execute("analyze").await.expect("agent should answer");
    assert_eq!(output, "Score: 7/10\nStance: Bullish");

    let transcripts = backend.transcripts();
    assert_eq!(transcripts.len(), 2);
    let second = &transcripts[1];
    assert_eq!(second[0].role, ChatRole::System);
    assert!(second[0].content.ends_with(&format!("Tools: {CALCULATOR_TOOL_NAME}")));
    assert_eq!(second[2].role, ChatRole::Assistant);
    assert_eq!(second[2].tool_calls.len(), 1);
    let tool_message = second.last().expect("tool result message");
    assert_eq!(tool_message.role, ChatRole::Tool);
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call-1"));
    let result: Value =
        serde_json::from_str(&tool_message.content).expect("tool result should be json");
    assert_eq!(result["result"].as_f64(), Some(14.0));
}

#[tokio::test]
async fn agent_gives_up_after_max_tool_rounds() {
    let backend = Arc::new(ScriptedBackend::forever(Completion::calls(vec![
        calculator_call("loop", "1 + 1"),
    ])));
    let analyst = Agent::builder("Looping Analyst")
        .capabilities(Toolkit::new(vec![Arc::new(CalculatorTool) as Arc<dyn Tool>]))
        .backend(backend.clone())
        .settings(AgentSettings {
            max_tool_rounds: 2,
            timeout: None,
        })
        .build()
        .expect("agent should build");

    let err = analyst.execute("analyze").await.expect_err("should exhaust rounds");
    assert_eq!(err.agent, "Looping Analyst");
    assert!(matches!(err.cause, AgentFailure::ToolRoundsExhausted(2)));
    assert_eq!(backend.transcripts().len(), 3);
}

#[tokio::test]
async fn agent_tool_failures_escalate_with_agent_identity() {
    let backend = Arc::new(ScriptedBackend::new(vec![Completion::calls(vec![ToolCall {
        id: "call-1".to_string(),
        name: WEB_SEARCH_TOOL_NAME.to_string(),
        arguments: json!({"query": "AAPL"}),
    }])]));
    let writer = Agent::builder("Report Writer")
        .capabilities(Toolkit::new(vec![Arc::new(CalculatorTool) as Arc<dyn Tool>]))
        .backend(backend)
        .build()
        .expect("agent should build");

    let err = writer.execute("write").await.expect_err("tool is not granted");
    assert_eq!(err.agent, "Report Writer");
    match err.cause {
        AgentFailure::Tool(tool_err) => assert_eq!(tool_err.tool, WEB_SEARCH_TOOL_NAME),
        other => panic!("unexpected cause: {other:?}"),
    }
}

#[tokio::test]
async fn agent_rejects_empty_answers() {
    let agent = Agent::builder("Quiet")
        .backend(Arc::new(ScriptedBackend::new(vec![Completion::text("  \n")])))
        .build()
        .expect("agent should build");
    let err = agent.execute("say something").await.expect_err("empty answer");
    assert!(matches!(err.cause, AgentFailure::EmptyResponse));
}

#[tokio::test]
async fn agent_times_out_when_backend_is_slow() {
    let agent = Agent::builder("Slow")
        .backend(Arc::new(SlowBackend(Duration::from_millis(500))))
        .settings(AgentSettings {
            max_tool_rounds: 1,
            timeout: Some(Duration::from_millis(20)),
        })
        .build()
        .expect("agent should build");
    let err = agent.execute("hurry").await.expect_err("should time out");
    assert!(matches!(err.cause, AgentFailure::Timeout(limit) if limit == Duration::from_millis(20)));
}

#[test]
fn finance_pipeline_is_a_linear_four_stage_chain() {
    let registry = ToolRegistry::new(&ToolSettings::default()).expect("registry should build");
    let agents = label_crew(&registry, &[]);
    let pipeline = build_finance_pipeline("  AAPL ", &agents).expect("pipeline should build");

    let tasks = pipeline.tasks();
    assert_eq!(tasks.len(), 4);
    let names = tasks.iter().map(Task::name).collect::<Vec<&str>>();
    assert_eq!(
        names,
        vec![RESEARCH_TASK, ANALYSIS_TASK, WRITING_TASK, REVIEW_TASK]
    );
    assert!(tasks[0].context().is_empty());
    assert_eq!(tasks[1].context(), [RESEARCH_TASK.to_string()]);
    assert_eq!(tasks[2].context(), [ANALYSIS_TASK.to_string()]);
    assert_eq!(tasks[3].context(), [WRITING_TASK.to_string()]);

    let agent_names = tasks
        .iter()
        .map(|task| task.agent().name())
        .collect::<Vec<&str>>();
    assert_eq!(
        agent_names,
        CREW.iter().map(|profile| profile.name).collect::<Vec<&str>>()
    );
    assert!(tasks[0].definition().description.contains("**AAPL**"));
}

#[test]
fn crew_capabilities_follow_allow_patterns() {
    let registry = ToolRegistry::new(&ToolSettings::default()).expect("registry should build");
    let agents = label_crew(&registry, &["web_*", "knowledge_*", "sec_*"]);

    assert_eq!(
        agents.researcher.capabilities().names(),
        vec![WEB_SEARCH_TOOL_NAME, KNOWLEDGE_BASE_TOOL_NAME]
    );
    assert_eq!(agents.analyst.capabilities().len(), 3);
    assert_eq!(agents.researcher.role(), RESEARCHER.role);
}

#[test]
fn extra_tools_take_precedence_over_defaults() {
    let registry = ToolRegistry::new(&ToolSettings::default()).expect("registry should build");
    let extra = Toolkit::new(vec![named_tool(WEB_SEARCH_TOOL_NAME, "licensed news feed")]);
    let agent = create_agent(
        &RESEARCHER,
        Arc::new(EchoBackend),
        &registry.get_default_toolkit(),
        &extra,
        &AgentOptions::default(),
    )
    .expect("agent should build");

    assert_eq!(
        agent.capabilities().names(),
        vec![
            WEB_SEARCH_TOOL_NAME,
            CALCULATOR_TOOL_NAME,
            KNOWLEDGE_BASE_TOOL_NAME
        ]
    );
    let search = agent
        .capabilities()
        .get(WEB_SEARCH_TOOL_NAME)
        .expect("search present");
    assert_eq!(search.description(), "licensed news feed");
}

#[tokio::test]
async fn finance_crew_end_to_end_with_stub_backends() {
    let registry = ToolRegistry::new(&ToolSettings::default()).expect("registry should build");
    let agents = label_crew(&registry, &[]);
    let dir = tempdir().expect("temp directory should create");
    let path = dir.path().join("telemetry").join("events.jsonl");
    let sink = TelemetrySink::at_path(true, &path, "AAPL");

    let report = execute_finance_pipeline("AAPL", &agents, Some(sink))
        .await
        .expect("pipeline should run");

    assert_eq!(report.topic, "AAPL");
    assert!(
        report
            .final_output
            .starts_with("Review:Writing:Analysis:Research:Conduct comprehensive research"),
        "unexpected final output: {}",
        report.final_output
    );
    assert!(report.final_output.contains("**AAPL**"));
    assert_eq!(report.outputs.len(), 4);
    assert_eq!(report.verdict, ReviewVerdict::ChangesRequested);
    assert_eq!(report.recommendation.score, None);

    let lines = std::fs::read_to_string(&path)
        .expect("telemetry file should exist")
        .lines()
        .map(str::to_string)
        .collect::<Vec<String>>();
    let summary = summarize_telemetry_lines(lines, 100);
    assert_eq!(summary.pipeline_started, 1);
    assert_eq!(summary.pipeline_completed, 1);
    assert_eq!(summary.task_completed, 4);
    assert_eq!(summary.task_failed, 0);
    assert_eq!(summary.unique_runs.len(), 1);
    assert_eq!(summary.topic_counts.get("AAPL"), Some(&1));

    let summary_line = render_report_summary(&report);
    assert_eq!(
        summary_line,
        "AAPL: score=n/a stance=n/a review=changes requested"
    );
}

#[tokio::test]
async fn failed_run_is_recorded_in_telemetry() {
    let dir = tempdir().expect("temp directory should create");
    let path = dir.path().join("events.jsonl");
    let mut builder = Pipeline::builder();
    builder
        .add_task(
            TaskDefinition::new("Research", "AAPL", "notes"),
            agent("researcher", Arc::new(FailingBackend)),
        )
        .expect("research should place");
    let mut pipeline = builder
        .build()
        .expect("pipeline should validate")
        .with_telemetry(TelemetrySink::at_path(true, &path, "AAPL"));

    pipeline.run().await.expect_err("research should fail");

    let lines = std::fs::read_to_string(&path)
        .expect("telemetry file should exist")
        .lines()
        .map(str::to_string)
        .collect::<Vec<String>>();
    let summary = summarize_telemetry_lines(lines, 100);
    assert_eq!(summary.pipeline_failed, 1);
    assert_eq!(summary.task_failed, 1);
    assert_eq!(summary.failed_tasks.get("Research"), Some(&1));
}

#[test]
fn telemetry_summary_skips_unparseable_lines_and_honors_limit() {
    let lines = vec![
        json!({"event": "pipeline.started", "run_id": "r1", "topic": "AAPL", "ts_unix_ms": 10})
            .to_string(),
        "not json".to_string(),
        json!({"event": "task.completed", "run_id": "r1", "ts_unix_ms": 20}).to_string(),
        json!({"event": "pipeline.completed", "run_id": "r1", "ts_unix_ms": 30}).to_string(),
    ];
    let summary = summarize_telemetry_lines(lines.clone(), 10);
    assert_eq!(summary.total_lines, 4);
    assert_eq!(summary.parsed_events, 3);
    assert_eq!(summary.parse_errors, 1);
    assert_eq!(summary.last_event_ts_unix_ms, Some(30));

    let recent = summarize_telemetry_lines(lines, 1);
    assert_eq!(recent.parsed_events, 1);
    assert_eq!(recent.pipeline_completed, 1);
    assert_eq!(recent.pipeline_started, 0);
}

#[test]
fn event_times_render_as_utc() {
    assert_eq!(format_event_time(1_700_000_000_123), "2023-11-14T22:13:20.123Z");
    assert_eq!(format_event_time(u128::MAX), u128::MAX.to_string());
}

#[test]
fn disabled_telemetry_writes_nothing() {
    let dir = tempdir().expect("temp directory should create");
    let path = dir.path().join("events.jsonl");
    let sink = TelemetrySink::at_path(false, &path, "AAPL");
    sink.emit("pipeline.started", json!({"tasks": 4}));
    assert!(!path.exists());
}

#[test]
fn plan_lists_tasks_context_and_tools() {
    let cfg = echo_cfg();
    let registry = build_registry(&cfg).expect("registry should build");
    let agents = assemble_offline_crew(&cfg, &registry).expect("offline crew should build");
    let pipeline = build_finance_pipeline("TSLA", &agents).expect("pipeline should build");

    let plan = describe_plan(&pipeline);
    assert!(plan.starts_with("1. Market Research [agent: Market Researcher]\n   context: <none>\n"));
    assert!(plan.contains("2. Financial Data Analysis [agent: Financial Data Analyst]"));
    assert!(plan.contains("   context: Financial Data Analysis\n"));
    assert!(plan.contains(&format!(
        "   tools: {CALCULATOR_TOOL_NAME}, {WEB_SEARCH_TOOL_NAME}, {KNOWLEDGE_BASE_TOOL_NAME}"
    )));
    assert!(plan.contains("max_tool_rounds: 8 timeout: none"));
}

#[test]
fn topic_must_be_a_single_non_empty_line() {
    assert_eq!(normalize_topic("  nvda ").expect("valid topic"), "nvda");
    assert!(normalize_topic("   ").is_err());
    assert!(normalize_topic("AAPL\nMSFT").is_err());
}

#[test]
fn cli_defaults_to_running_the_default_topic() {
    let cli = cli_from(&[]);
    assert!(cli.command.is_none());
    let command = Commands::default_run();
    assert_eq!(command_label(&command), "run");
    match command {
        Commands::Run {
            topic,
            show_intermediate,
        } => {
            assert_eq!(topic, DEFAULT_TOPIC);
            assert!(!show_intermediate);
        }
        other => panic!("unexpected default command: {other:?}"),
    }

    let cli = cli_from(&["plan", "--topic", "MSFT"]);
    let command = cli.command.expect("plan should parse");
    assert_eq!(command_label(&command), "plan");

    let cli = cli_from(&["profiles", "show"]);
    let command = cli.command.expect("profiles should parse");
    assert_eq!(command_label(&command), "profiles.show");
}

#[test]
fn cli_flags_override_profile_values() {
    let profiles = profiles_from(
        r#"
[profiles.research]
provider = "groq"
model = "llama-3.3-70b-versatile"
max_tool_rounds = 3
telemetry_enabled = false
search_max_results = 9
"#,
    );
    let cli = cli_from(&["--profile", "research", "--model", "mixtral-8x7b"]);
    let cfg = resolve_runtime_config(&cli, &profiles).expect("config should resolve");

    assert_eq!(cfg.profile, "research");
    assert_eq!(cfg.provider, Provider::Groq);
    assert_eq!(cfg.model.as_deref(), Some("mixtral-8x7b"));
    assert_eq!(cfg.max_tool_rounds, 3);
    assert!(!cfg.telemetry_enabled);
    assert_eq!(cfg.search_max_results, 9);
    assert_eq!(cfg.knowledge_base_max_chunks, 3);

    let cli = cli_from(&["--profile", "research", "--provider", "echo"]);
    let cfg = resolve_runtime_config(&cli, &profiles).expect("config should resolve");
    assert_eq!(cfg.provider, Provider::Echo);
}

#[test]
fn agent_overrides_layer_on_top_of_profile_limits() {
    let profiles = profiles_from(
        r#"
[profiles.default]
agent_timeout_secs = 120

[profiles.default.agents.analyst]
max_tool_rounds = 2
timeout_secs = 30
allow_tools = ["deterministic_calculator"]
"#,
    );
    let cfg = resolve_runtime_config(&cli_from(&[]), &profiles).expect("config should resolve");

    assert_eq!(
        cfg.agent_settings("analyst"),
        AgentSettings {
            max_tool_rounds: 2,
            timeout: Some(Duration::from_secs(30)),
        }
    );
    assert_eq!(
        cfg.agent_settings("writer"),
        AgentSettings {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            timeout: Some(Duration::from_secs(120)),
        }
    );
    let analyst = cfg.agent_override("analyst").expect("analyst override");
    assert_eq!(analyst.allow_tools, vec![CALCULATOR_TOOL_NAME.to_string()]);
}

#[test]
fn unknown_agent_override_is_a_config_error() {
    let profiles = profiles_from(
        r#"
[profiles.default.agents.trader]
model = "gpt-4o"
"#,
    );
    let err = resolve_runtime_config(&cli_from(&[]), &profiles)
        .expect_err("unknown agent key should fail");
    let message = err.to_string();
    assert!(message.contains("unknown agent override(s) trader"));
    assert!(message.contains("researcher, analyst, writer, reviewer"));
    assert_eq!(categorize_error(&err), ErrorCategory::Config);
}

#[test]
fn unknown_profile_fields_and_missing_profiles_are_rejected() {
    assert!(toml::from_str::<ProfilesFile>("[profiles.default]\nmodle = \"x\"\n").is_err());

    let profiles = profiles_from("[profiles.research]\nmodel = \"gpt-4o\"\n");
    let err = resolve_runtime_config(&cli_from(&["--profile", "ops"]), &profiles)
        .expect_err("missing profile should fail");
    assert!(err.to_string().contains("Available profiles: research"));
}

#[test]
fn load_profiles_reads_toml_and_tolerates_missing_file() {
    let dir = tempdir().expect("temp directory should create");
    let missing = dir.path().join("absent.toml");
    let profiles =
        load_profiles(&missing.to_string_lossy()).expect("missing file should be empty");
    assert!(profiles.profiles.is_empty());

    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[profiles.fast]\nprovider = \"echo\"\n")
        .expect("config should write");
    let profiles = load_profiles(&path.to_string_lossy()).expect("config should load");
    assert_eq!(
        profiles.profiles.get("fast").and_then(|p| p.provider),
        Some(Provider::Echo)
    );

    std::fs::write(&path, "[profiles.fast]\nprovider = \"skynet\"\n")
        .expect("config should write");
    let err = load_profiles(&path.to_string_lossy()).expect_err("bad provider should fail");
    assert!(format!("{err:#}").contains("invalid profile configuration"));
}

#[test]
fn echo_provider_resolves_without_credentials() {
    let cfg = echo_cfg();
    let (backend, provider, model) = resolve_backend(&cfg, None).expect("echo should resolve");
    assert_eq!(backend.name(), "echo");
    assert_eq!(provider, Provider::Echo);
    assert_eq!(model, "echo");

    let overrides = AgentOverride {
        model: Some("echo-analyst".to_string()),
        ..AgentOverride::default()
    };
    let (_, _, model) = resolve_backend(&cfg, Some(&overrides)).expect("override should resolve");
    assert_eq!(model, "echo-analyst");
}

#[test]
fn model_names_are_checked_against_provider() {
    assert!(validate_model_for_provider(Provider::Openai, "gpt-4o-mini").is_ok());
    assert!(validate_model_for_provider(Provider::Openai, "llama3.1").is_err());
    assert!(validate_model_for_provider(Provider::Deepseek, "deepseek-chat").is_ok());
    assert!(validate_model_for_provider(Provider::Groq, " ").is_err());
    assert_eq!(
        parse_provider_name("GROQ").expect("case-insensitive"),
        Provider::Groq
    );
    assert!(parse_provider_name("skynet").is_err());
}

#[test]
fn pipeline_errors_are_categorized() {
    let err = anyhow::Error::new(PipelineError::AlreadyCompleted);
    assert_eq!(categorize_error(&err), ErrorCategory::Pipeline);

    let err = anyhow::Error::new(PipelineError::from(
        InvalidDependencyError::SelfReference {
            task: "Review".to_string(),
        },
    ));
    assert_eq!(categorize_error(&err), ErrorCategory::Pipeline);

    let err = anyhow::Error::new(PipelineError::TaskFailed {
        task: "Analysis".to_string(),
        agent: "Financial Data Analyst".to_string(),
        source: AgentExecutionError {
            agent: "Financial Data Analyst".to_string(),
            cause: AgentFailure::Tool(ToolInvocationError::new(
                CALCULATOR_TOOL_NAME,
                "division by zero",
            )),
        },
    });
    assert_eq!(categorize_error(&err), ErrorCategory::Tooling);

    let err = anyhow::Error::new(PipelineError::TaskFailed {
        task: "Analysis".to_string(),
        agent: "Financial Data Analyst".to_string(),
        source: AgentExecutionError {
            agent: "Financial Data Analyst".to_string(),
            cause: AgentFailure::EmptyResponse,
        },
    });
    assert_eq!(categorize_error(&err), ErrorCategory::Agent);
}

#[test]
fn cli_errors_carry_category_hint_and_redaction() {
    let err = anyhow::anyhow!("OPENAI_API_KEY is required for the openai provider");
    let rendered = format_cli_error(&err, false);
    assert!(rendered.starts_with("[PROVIDER] "));
    assert!(rendered.contains("Hint: "));

    let err = anyhow::anyhow!("request failed: Authorization: Bearer abc.def-123, key sk-live1234567890");
    let redacted = format_cli_error(&err, false);
    assert!(redacted.contains("Bearer [REDACTED]"));
    assert!(redacted.contains("sk-[REDACTED]"));
    assert!(!redacted.contains("abc.def-123"));
    assert!(!redacted.contains("sk-live1234567890"));

    let revealed = format_cli_error(&err, true);
    assert!(revealed.contains("sk-live1234567890"));
}

#[test]
fn redaction_leaves_ordinary_text_alone() {
    assert_eq!(
        redact_sensitive_text("ask-me about risk-free rates"),
        "ask-me about risk-free rates"
    );
    assert_eq!(redact_bearer_tokens("Bearer "), "Bearer ");
}

#[test]
fn report_parsing_reads_score_stance_and_sign_off() {
    let analysis = "## Metrics\n- P/E: 28.1\n**Score:** 8/10\n**Stance:** Bullish (momentum)";
    let recommendation = parse_recommendation(analysis);
    assert_eq!(recommendation.score, Some(8));
    assert_eq!(recommendation.stance, Some(Stance::Bullish));

    assert_eq!(
        parse_review_verdict("Summary: fine\nSIGN-OFF: Approved"),
        ReviewVerdict::Approved
    );
    assert_eq!(
        parse_review_verdict("Actionable Critique: remove guarantees"),
        ReviewVerdict::ChangesRequested
    );
}
