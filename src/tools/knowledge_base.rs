use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{KNOWLEDGE_BASE_TOOL_NAME, SideEffect, Tool, parse_args, schema_value};
use crate::error::ToolInvocationError;

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub source: String,
    pub text: String,
    pub score: usize,
}

/// Local documents (company fundamentals, glossaries, compliance rules)
/// split into paragraph chunks.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    chunks: Vec<RetrievedChunk>,
}

pub fn split_chunks(content: &str, source: &str) -> Vec<RetrievedChunk> {
    content
        .replace("\r\n", "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .enumerate()
        .map(|(index, text)| RetrievedChunk {
            source: format!("{source}#{}", index + 1),
            text: text.to_string(),
            score: 0,
        })
        .collect::<Vec<RetrievedChunk>>()
}

/// Short all-caps tokens are tickers ("GE", "F"), not filler words.
fn is_ticker(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_uppercase())
}

fn is_document(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("md" | "txt" | "markdown")
    )
}

pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_ascii_alphanumeric()))
        .filter(|token| token.len() > 2 || is_ticker(token))
        .map(str::to_ascii_lowercase)
        .collect::<Vec<String>>()
}

/// Occurrences of `term` in the lowercased `body`. Terms of two characters
/// or fewer only count as whole words, so "ge" does not match "change".
fn term_hits(term: &str, body: &str) -> usize {
    if term.len() > 2 {
        body.matches(term).count()
    } else {
        body.split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|word| *word == term)
            .count()
    }
}

impl KnowledgeBase {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_chunks(chunks: Vec<RetrievedChunk>) -> Self {
        Self { chunks }
    }

    /// Load a single document, or every `.md`/`.txt` file directly inside a
    /// directory (sorted by file name).
    pub fn load(path: &Path) -> Result<Self> {
        let mut files = Vec::new();
        if path.is_dir() {
            let entries = std::fs::read_dir(path).with_context(|| {
                format!("failed to read knowledge base directory '{}'", path.display())
            })?;
            for entry in entries {
                let entry = entry.with_context(|| {
                    format!("failed to list knowledge base directory '{}'", path.display())
                })?;
                let file = entry.path();
                if file.is_file() && is_document(&file) {
                    files.push(file);
                }
            }
            files.sort();
        } else {
            files.push(path.to_path_buf());
        }

        let mut chunks = Vec::new();
        for file in files {
            let content = std::fs::read_to_string(&file).with_context(|| {
                format!("failed to read knowledge base document '{}'", file.display())
            })?;
            chunks.extend(split_chunks(&content, &file.display().to_string()));
        }

        tracing::debug!(path = %path.display(), chunks = chunks.len(), "Loaded knowledge base");
        Ok(Self { chunks })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[cfg(not(feature = "semantic-search"))]
    fn score(&self, _query: &str, terms: &[String], body: &str) -> usize {
        terms
            .iter()
            .map(|term| term_hits(term, body))
            .sum::<usize>()
    }

    #[cfg(feature = "semantic-search")]
    fn score(&self, query: &str, terms: &[String], body: &str) -> usize {
        let lexical_hits = terms
            .iter()
            .map(|term| term_hits(term, body))
            .sum::<usize>();
        if lexical_hits == 0 {
            return 0;
        }
        let similarity = strsim::jaro_winkler(&query.to_ascii_lowercase(), body);
        ((similarity * 1000.0) as usize) + (lexical_hits * 25)
    }

    pub fn search(&self, query: &str, max_chunks: usize) -> Vec<RetrievedChunk> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let mut scored = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                let body = chunk.text.to_ascii_lowercase();
                let score = self.score(query, &terms, &body);
                (score > 0).then_some(RetrievedChunk {
                    source: chunk.source.clone(),
                    text: chunk.text.clone(),
                    score,
                })
            })
            .collect::<Vec<RetrievedChunk>>();

        scored.sort_by_key(|chunk| std::cmp::Reverse(chunk.score));
        scored.truncate(max_chunks.max(1));
        scored
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct KnowledgeBaseArgs {
    /// What to look up, e.g. "forward guidance definition" or "non-compliant language".
    pub query: String,
    /// Upper bound on returned passages.
    pub max_results: Option<usize>,
}

pub struct KnowledgeBaseTool {
    knowledge_base: Arc<KnowledgeBase>,
    max_chunks: usize,
}

impl KnowledgeBaseTool {
    pub fn new(knowledge_base: Arc<KnowledgeBase>, max_chunks: usize) -> Self {
        Self {
            knowledge_base,
            max_chunks: max_chunks.max(1),
        }
    }
}

#[async_trait]
impl Tool for KnowledgeBaseTool {
    fn name(&self) -> &str {
        KNOWLEDGE_BASE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Searches the local knowledge base for foundational company information, financial \
         definitions and compliance rules. Args: query (required), max_results."
    }

    fn input_schema(&self) -> Value {
        schema_value::<KnowledgeBaseArgs>()
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
                            "source": { "type": "string" },
                            "text": { "type": "string" },
                            "score": { "type": "integer" }
                        }
                    }
                }
            },
            "required": ["query", "results"]
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::ReadOnlyLocal
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolInvocationError> {
        let args: KnowledgeBaseArgs = parse_args(self.name(), args)?;
        if args.query.trim().is_empty() {
            return Err(ToolInvocationError::new(self.name(), "query cannot be empty"));
        }

        let limit = args.max_results.unwrap_or(self.max_chunks).clamp(1, self.max_chunks.max(1) * 4);
        let results = self.knowledge_base.search(&args.query, limit);
        Ok(json!({
            "query": args.query,
            "results": results,
        }))
    }
}
