use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{ChatMessage, InferenceBackend};
use crate::error::{AgentConfigError, AgentExecutionError, AgentFailure};
use crate::tools::Toolkit;

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSettings {
    /// How many rounds of tool calls the backend may request before it must answer.
    pub max_tool_rounds: usize,
    pub timeout: Option<Duration>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            timeout: None,
        }
    }
}

/// A configured role: prompt text, an immutable capability set and the
/// backend that answers for it. Never mutated after `build`.
pub struct Agent {
    name: String,
    role: String,
    goal: String,
    backstory: String,
    system_prompt: String,
    capabilities: Toolkit,
    backend: Arc<dyn InferenceBackend>,
    settings: AgentSettings,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("capabilities", &self.capabilities)
            .field("backend", &self.backend.name())
            .field("settings", &self.settings)
            .finish()
    }
}

#[derive(Default)]
pub struct AgentBuilder {
    name: String,
    role: String,
    goal: String,
    backstory: String,
    system_prompt: String,
    capabilities: Toolkit,
    backend: Option<Arc<dyn InferenceBackend>>,
    settings: AgentSettings,
}

impl AgentBuilder {
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    pub fn backstory(mut self, backstory: impl Into<String>) -> Self {
        self.backstory = backstory.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn capabilities(mut self, capabilities: Toolkit) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<Agent, AgentConfigError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(AgentConfigError::EmptyName);
        }
        let backend = self
            .backend
            .ok_or_else(|| AgentConfigError::MissingBackend(name.clone()))?;
        Ok(Agent {
            name,
            role: self.role,
            goal: self.goal,
            backstory: self.backstory,
            system_prompt: self.system_prompt,
            capabilities: self.capabilities,
            backend,
            settings: self.settings,
        })
    }
}

impl Agent {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder {
            name: name.into(),
            ..AgentBuilder::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn backstory(&self) -> &str {
        &self.backstory
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn capabilities(&self) -> &Toolkit {
        &self.capabilities
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn settings(&self) -> AgentSettings {
        self.settings
    }

    /// The system message: prompt, persona framing and the tools on offer.
    pub fn framing(&self) -> String {
        let mut out = String::new();
        if !self.system_prompt.trim().is_empty() {
            out.push_str(self.system_prompt.trim());
            out.push_str("\n\n");
        }
        for (label, value) in [
            ("Role", &self.role),
            ("Goal", &self.goal),
            ("Backstory", &self.backstory),
        ] {
            if !value.trim().is_empty() {
                out.push_str(&format!("{label}: {}\n", value.trim()));
            }
        }
        if self.capabilities.is_empty() {
            out.push_str("Tools: none");
        } else {
            out.push_str(&format!("Tools: {}", self.capabilities.names().join(", ")));
        }
        out
    }

    /// Run the agent against one task input and return its final answer.
    pub async fn execute(&self, input: &str) -> Result<String, AgentExecutionError> {
        let started = Instant::now();
        let outcome = match self.settings.timeout {
            Some(limit) => tokio::time::timeout(limit, self.converse(input))
                .await
                .unwrap_or_else(|_| Err(AgentFailure::Timeout(limit))),
            None => self.converse(input).await,
        };

        match outcome {
            Ok(output) => {
                tracing::debug!(
                    agent = %self.name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    output_chars = output.len(),
                    "Agent produced output"
                );
                Ok(output)
            }
            Err(cause) => {
                tracing::warn!(agent = %self.name, error = %cause, "Agent execution failed");
                Err(AgentExecutionError {
                    agent: self.name.clone(),
                    cause,
                })
            }
        }
    }

    async fn converse(&self, input: &str) -> Result<String, AgentFailure> {
        let specs = self.capabilities.specs();
        let mut messages = vec![ChatMessage::system(self.framing()), ChatMessage::user(input)];
        let max_rounds = self.settings.max_tool_rounds;

        for round in 0..=max_rounds {
            let completion = self
                .backend
                .complete(&messages, &specs)
                .await
                .map_err(AgentFailure::Backend)?;

            if completion.tool_calls.is_empty() {
                let content = completion.content.unwrap_or_default();
                if content.trim().is_empty() {
                    return Err(AgentFailure::EmptyResponse);
                }
                return Ok(content);
            }
            if round == max_rounds {
                break;
            }

            let calls = completion.tool_calls;
            messages.push(ChatMessage::assistant(
                completion.content.unwrap_or_default(),
                calls.clone(),
            ));
            for call in calls {
                tracing::info!(agent = %self.name, tool = %call.name, round, "Invoking tool");
                let result = self.capabilities.invoke(&call.name, call.arguments).await?;
                messages.push(ChatMessage::tool_result(call.id, result.to_string()));
            }
        }

        Err(AgentFailure::ToolRoundsExhausted(max_rounds))
    }
}
