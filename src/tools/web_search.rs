use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{SideEffect, Tool, WEB_SEARCH_TOOL_NAME, parse_args, schema_value};
use crate::error::ToolInvocationError;

#[derive(Debug, Clone)]
pub struct WebSearchConfig {
    /// Search API URL. Without one the tool is still advertised but every
    /// call fails with a clear error.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub max_results: usize,
    pub timeout: Duration,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            max_results: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebSearchArgs {
    /// Search terms, e.g. "AAPL quarterly earnings analyst sentiment".
    pub query: String,
    pub max_results: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, alias = "content")]
    pub snippet: String,
}

pub struct WebSearchTool {
    client: Client,
    config: WebSearchConfig,
}

impl WebSearchTool {
    pub fn new(config: WebSearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build web search HTTP client")?;
        Ok(Self { client, config })
    }

    async fn search(&self, endpoint: &str, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let mut request = self.client.post(endpoint).json(&SearchRequest {
            query,
            max_results: limit,
        });
        if let Some(key) = self.config.api_key.as_deref() {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("search request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("search endpoint returned {status}: {body}");
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .context("search endpoint returned an unexpected payload")?;
        let mut hits = parsed.results;
        hits.truncate(limit);
        Ok(hits)
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        WEB_SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Searches the web for recent news, filings and analyst sentiment. \
         Args: query (required), max_results."
    }

    fn input_schema(&self) -> Value {
        schema_value::<WebSearchArgs>()
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "results": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "url": { "type": "string" },
                            "snippet": { "type": "string" }
                        }
                    }
                }
            },
            "required": ["query", "results"]
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::ReadOnlyNetwork
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolInvocationError> {
        let args: WebSearchArgs = parse_args(self.name(), args)?;
        if args.query.trim().is_empty() {
            return Err(ToolInvocationError::new(self.name(), "query cannot be empty"));
        }
        let endpoint = self.config.endpoint.as_deref().ok_or_else(|| {
            ToolInvocationError::new(
                self.name(),
                "no search endpoint configured (set search_endpoint in the profile or FINANCE_FOCUS_SEARCH_ENDPOINT)",
            )
        })?;

        let limit = args
            .max_results
            .unwrap_or(self.config.max_results)
            .clamp(1, self.config.max_results.max(1));
        tracing::info!(query = %args.query, limit, "Running web search");

        let hits = self
            .search(endpoint, &args.query, limit)
            .await
            .map_err(|err| ToolInvocationError::new(self.name(), format!("{err:#}")))?;
        tracing::debug!(hits = hits.len(), "Web search finished");

        Ok(json!({
            "query": args.query,
            "results": hits,
        }))
    }
}
