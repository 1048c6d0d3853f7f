pub mod calculator;
pub mod knowledge_base;
pub mod web_search;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ToolInvocationError;
use crate::tool_policy::filter_tools_by_policy;

use self::calculator::CalculatorTool;
use self::knowledge_base::{KnowledgeBase, KnowledgeBaseTool};
use self::web_search::{WebSearchConfig, WebSearchTool};

pub const CALCULATOR_TOOL_NAME: &str = "deterministic_calculator";
pub const WEB_SEARCH_TOOL_NAME: &str = "web_search";
pub const KNOWLEDGE_BASE_TOOL_NAME: &str = "knowledge_base_search";

/// What a tool touches when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    None,
    ReadOnlyLocal,
    ReadOnlyNetwork,
}

impl SideEffect {
    pub fn label(self) -> &'static str {
        match self {
            SideEffect::None => "none",
            SideEffect::ReadOnlyLocal => "read-only local",
            SideEffect::ReadOnlyNetwork => "read-only network",
        }
    }
}

/// Name + signature of a tool, as advertised to the inference backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub side_effect: SideEffect,
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique within a toolkit.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> Value;

    fn output_schema(&self) -> Value;

    fn side_effect(&self) -> SideEffect;

    async fn invoke(&self, args: Value) -> Result<Value, ToolInvocationError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
            output_schema: self.output_schema(),
            side_effect: self.side_effect(),
        }
    }
}

/// JSON Schema for a typed argument struct, without the draft/title noise
/// that function-calling APIs do not need.
pub fn schema_value<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null);
    if let Some(map) = schema.as_object_mut() {
        map.remove("$schema");
        map.remove("title");
    }
    schema
}

pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolInvocationError> {
    serde_json::from_value(args)
        .map_err(|err| ToolInvocationError::new(tool, format!("invalid arguments: {err}")))
}

/// An ordered, immutable set of tools, unique by name.
///
/// This is an agent's capability set: `invoke` refuses anything outside it.
#[derive(Clone, Default)]
pub struct Toolkit {
    tools: Vec<Arc<dyn Tool>>,
}

impl std::fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolkit")
            .field("tools", &self.names())
            .finish()
    }
}

impl Toolkit {
    /// Later duplicates of a name are dropped; the first occurrence wins.
    pub fn new(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        let mut seen = BTreeSet::<String>::new();
        let tools = tools
            .into_iter()
            .filter(|tool| {
                let fresh = seen.insert(tool.name().to_string());
                if !fresh {
                    tracing::debug!(tool = tool.name(), "Dropping duplicate tool");
                }
                fresh
            })
            .collect();
        Self { tools }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// `self`'s tools first, then any of `other`'s not already present.
    pub fn merge(&self, other: &Toolkit) -> Toolkit {
        Toolkit::new(self.tools.iter().chain(other.tools.iter()).cloned())
    }

    /// Apply wildcard allow/deny patterns; deny wins.
    pub fn filter(&self, allow_patterns: &[String], deny_patterns: &[String]) -> Toolkit {
        Toolkit {
            tools: filter_tools_by_policy(self.tools.clone(), allow_patterns, deny_patterns),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|tool| tool.spec()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, ToolInvocationError> {
        let tool = self.get(name).ok_or_else(|| {
            ToolInvocationError::new(name, "tool is not in this agent's capability set")
        })?;
        tool.invoke(args).await
    }
}

#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub knowledge_base_path: Option<PathBuf>,
    pub knowledge_base_max_chunks: usize,
    pub web_search: WebSearchConfig,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            knowledge_base_path: None,
            knowledge_base_max_chunks: 3,
            web_search: WebSearchConfig::default(),
        }
    }
}

/// Builds the fixed default tools once and hands out the same instances.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    toolkit: Toolkit,
}

impl ToolRegistry {
    pub fn new(settings: &ToolSettings) -> Result<Self> {
        let knowledge_base = match settings.knowledge_base_path.as_deref() {
            Some(path) => KnowledgeBase::load(path)?,
            None => KnowledgeBase::empty(),
        };
        tracing::info!(
            chunks = knowledge_base.len(),
            search_configured = settings.web_search.endpoint.is_some(),
            "Tool registry ready"
        );

        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(CalculatorTool),
            Arc::new(WebSearchTool::new(settings.web_search.clone())?),
            Arc::new(KnowledgeBaseTool::new(
                Arc::new(knowledge_base),
                settings.knowledge_base_max_chunks,
            )),
        ];

        Ok(Self {
            toolkit: Toolkit::new(tools),
        })
    }

    /// Same tool instances on every call; no side effects.
    pub fn get_default_toolkit(&self) -> Toolkit {
        self.toolkit.clone()
    }
}
