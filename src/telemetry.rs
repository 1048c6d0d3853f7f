use std::collections::{BTreeSet, HashMap};
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::config::RuntimeConfig;

pub fn unix_ms_now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Append-only JSONL stream of pipeline lifecycle events for one run.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    pub enabled: bool,
    pub path: PathBuf,
    pub run_id: String,
    pub topic: String,
    pub file_lock: Arc<std::sync::Mutex<()>>,
}

impl TelemetrySink {
    pub fn new(cfg: &RuntimeConfig, topic: impl Into<String>) -> Self {
        Self::at_path(cfg.telemetry_enabled, &cfg.telemetry_path, topic)
    }

    pub fn at_path(enabled: bool, path: impl Into<PathBuf>, topic: impl Into<String>) -> Self {
        let run_id = format!("run-{}-{}", unix_ms_now(), std::process::id());
        Self {
            enabled,
            path: path.into(),
            run_id,
            topic: topic.into(),
            file_lock: Arc::new(std::sync::Mutex::new(())),
        }
    }

    pub fn emit(&self, event: &str, payload: Value) {
        if !self.enabled {
            return;
        }

        let mut record = serde_json::Map::new();
        record.insert("ts_unix_ms".to_string(), json!(unix_ms_now()));
        record.insert("event".to_string(), json!(event));
        record.insert("run_id".to_string(), json!(self.run_id));
        record.insert("topic".to_string(), json!(self.topic));

        if let Some(map) = payload.as_object() {
            for (key, value) in map {
                record.insert(key.clone(), value.clone());
            }
        }

        let value = Value::Object(record);
        if let Err(err) = self.append_event_line(&value) {
            tracing::warn!(
                event = event,
                path = %self.path.display(),
                error = %err,
                "telemetry write failed"
            );
        }
    }

    fn append_event_line(&self, value: &Value) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create telemetry directory '{}'",
                    parent.display()
                )
            })?;
        }

        let _guard = self.file_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open telemetry path '{}'", self.path.display()))?;

        serde_json::to_writer(&mut file, value).with_context(|| {
            format!("failed to serialize telemetry event for run '{}'", self.run_id)
        })?;
        writeln!(file).context("failed to write telemetry newline")
    }
}

#[derive(Debug, Default)]
pub struct TelemetrySummary {
    pub total_lines: usize,
    pub parsed_events: usize,
    pub parse_errors: usize,
    pub unique_runs: BTreeSet<String>,
    pub topic_counts: HashMap<String, usize>,
    pub pipeline_started: usize,
    pub pipeline_completed: usize,
    pub pipeline_failed: usize,
    pub task_completed: usize,
    pub task_failed: usize,
    pub failed_tasks: HashMap<String, usize>,
    pub last_event_ts_unix_ms: Option<u128>,
}

pub fn summarize_telemetry_lines(lines: Vec<String>, limit: usize) -> TelemetrySummary {
    let mut summary = TelemetrySummary::default();
    let max_events = limit.max(1);
    summary.total_lines = lines.len();

    for line in lines.into_iter().rev().take(max_events) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parsed = match serde_json::from_str::<Value>(line) {
            Ok(value) => value,
            Err(_) => {
                summary.parse_errors += 1;
                continue;
            }
        };

        summary.parsed_events += 1;

        if let Some(run_id) = parsed
            .get("run_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        {
            summary.unique_runs.insert(run_id.to_string());
        }

        if let Some(ts) = parsed.get("ts_unix_ms").and_then(Value::as_u64) {
            let ts_u128 = ts as u128;
            summary.last_event_ts_unix_ms = Some(
                summary
                    .last_event_ts_unix_ms
                    .map(|existing| existing.max(ts_u128))
                    .unwrap_or(ts_u128),
            );
        }

        match parsed
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or_default()
        {
            "pipeline.started" => {
                summary.pipeline_started += 1;
                if let Some(topic) = parsed
                    .get("topic")
                    .and_then(Value::as_str)
                    .filter(|topic| !topic.is_empty())
                {
                    *summary.topic_counts.entry(topic.to_string()).or_insert(0) += 1;
                }
            }
            "pipeline.completed" => summary.pipeline_completed += 1,
            "pipeline.failed" => summary.pipeline_failed += 1,
            "task.completed" => summary.task_completed += 1,
            "task.failed" => {
                summary.task_failed += 1;
                if let Some(task) = parsed.get("task").and_then(Value::as_str) {
                    *summary.failed_tasks.entry(task.to_string()).or_insert(0) += 1;
                }
            }
            _ => {}
        }
    }

    summary
}

/// RFC 3339 in UTC, or the raw value when it is out of range.
pub fn format_event_time(ts_unix_ms: u128) -> String {
    i64::try_from(ts_unix_ms)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|at| at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| ts_unix_ms.to_string())
}

fn ranked(counts: &HashMap<String, usize>) -> Vec<(&String, &usize)> {
    let mut entries = counts.iter().collect::<Vec<_>>();
    entries.sort_by_key(|(name, count)| (std::cmp::Reverse(**count), (*name).clone()));
    entries
}

pub fn run_telemetry_report(
    cfg: &RuntimeConfig,
    path_override: Option<String>,
    limit: usize,
) -> Result<()> {
    let path = PathBuf::from(path_override.unwrap_or_else(|| cfg.telemetry_path.clone()));
    if !path.exists() {
        println!("No telemetry file found at '{}'.", path.display());
        return Ok(());
    }

    let file = std::fs::File::open(&path)
        .with_context(|| format!("failed to open telemetry file '{}'", path.display()))?;
    let reader = io::BufReader::new(file);
    let lines = reader
        .lines()
        .collect::<std::result::Result<Vec<String>, std::io::Error>>()
        .with_context(|| format!("failed to read telemetry file '{}'", path.display()))?;

    let summary = summarize_telemetry_lines(lines, limit);

    println!("Telemetry report");
    println!("Path: {}", path.display());
    println!("Lines in file: {}", summary.total_lines);
    println!(
        "Events analyzed: {} (parse_errors={})",
        summary.parsed_events, summary.parse_errors
    );
    println!("Unique runs: {}", summary.unique_runs.len());
    println!(
        "Pipeline outcomes: started={} completed={} failed={}",
        summary.pipeline_started, summary.pipeline_completed, summary.pipeline_failed
    );
    println!(
        "Task outcomes: completed={} failed={}",
        summary.task_completed, summary.task_failed
    );

    if !summary.topic_counts.is_empty() {
        println!("Top topics:");
        for (topic, count) in ranked(&summary.topic_counts).into_iter().take(5) {
            println!("- {}: {}", topic, count);
        }
    }

    if !summary.failed_tasks.is_empty() {
        println!("Failing tasks:");
        for (task, count) in ranked(&summary.failed_tasks) {
            println!("- {}: {}", task, count);
        }
    }

    if let Some(last_ts) = summary.last_event_ts_unix_ms {
        println!("Last event: {} ({last_ts})", format_event_time(last_ts));
    }

    Ok(())
}
