//! Session Debug Recorder
//!
//! Every pipeline run opens a [`DebugSession`], appends one [`DebugEntry`] per
//! stage event and flushes the whole session as a plain-text report when it
//! finishes. The session is owned by its run and passed down by reference, so
//! concurrent runs never share entries.
//!
//! Recording is a side channel: a failing [`DebugSink`] is logged and
//! otherwise ignored.

use crate::error::error_chain;
use crate::unit::UnitType;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};
use uuid::Uuid;

const RULE: &str = "================================================================================";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugStage {
    SessionStart,
    TopicBreakdown,
    SectionGeneration,
    UnitExecution,
    LessonStructure,
    MarkupParse,
    SectionSummary,
    SessionEnd,
}

impl DebugStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebugStage::SessionStart => "SESSION_START",
            DebugStage::TopicBreakdown => "TOPIC_BREAKDOWN",
            DebugStage::SectionGeneration => "SECTION_GENERATION",
            DebugStage::UnitExecution => "UNIT_EXECUTION",
            DebugStage::LessonStructure => "LESSON_STRUCTURE",
            DebugStage::MarkupParse => "MARKUP_PARSE",
            DebugStage::SectionSummary => "SECTION_SUMMARY",
            DebugStage::SessionEnd => "SESSION_END",
        }
    }
}

/// One recorded pipeline event. Built with the chained setters, then handed
/// to [`DebugSession::record`].
#[derive(Debug, Clone, PartialEq)]
pub struct DebugEntry {
    pub timestamp: DateTime<Utc>,
    pub stage: DebugStage,
    pub section_index: Option<usize>,
    pub unit_index: Option<usize>,
    pub unit_type: Option<UnitType>,
    pub prompt: Option<String>,
    pub raw_response: Option<Value>,
    pub parsed_output: Option<Value>,
    pub error: Option<String>,
    pub error_stack: Option<String>,
}

impl DebugEntry {
    pub fn new(stage: DebugStage) -> Self {
        Self {
            timestamp: Utc::now(),
            stage,
            section_index: None,
            unit_index: None,
            unit_type: None,
            prompt: None,
            raw_response: None,
            parsed_output: None,
            error: None,
            error_stack: None,
        }
    }

    pub fn section(mut self, index: usize) -> Self {
        self.section_index = Some(index);
        self
    }

    pub fn unit(mut self, index: usize, unit_type: UnitType) -> Self {
        self.unit_index = Some(index);
        self.unit_type = Some(unit_type);
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn raw_response(mut self, raw: Value) -> Self {
        self.raw_response = Some(raw);
        self
    }

    pub fn parsed_output(mut self, parsed: Value) -> Self {
        self.parsed_output = Some(parsed);
        self
    }

    /// Records the error message; the cause chain goes to the stack section
    /// when there is one.
    pub fn error(mut self, err: &(dyn std::error::Error + 'static)) -> Self {
        self.error = Some(err.to_string());
        if err.source().is_some() {
            self.error_stack = Some(error_chain(err));
        }
        self
    }

    fn render(&self, out: &mut String) {
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(
            out,
            "[{}] {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.stage.as_str()
        );
        if let Some(section) = self.section_index {
            let _ = writeln!(out, "Section: {section}");
        }
        if let Some(unit) = self.unit_index {
            let _ = writeln!(out, "Unit: {unit}");
        }
        if let Some(unit_type) = self.unit_type {
            let _ = writeln!(out, "Type: {unit_type}");
        }
        let blocks = [
            ("PROMPT", self.prompt.clone()),
            ("RAW RESPONSE", self.raw_response.as_ref().map(render_json)),
            ("PARSED OUTPUT", self.parsed_output.as_ref().map(render_json)),
            ("ERROR", self.error.clone()),
            ("STACK", self.error_stack.clone()),
        ];
        for (label, body) in blocks {
            if let Some(body) = body {
                let _ = writeln!(out, "--- {label} ---\n{body}");
            }
        }
        out.push('\n');
    }
}

/// Strings are printed as-is, everything else pretty-printed.
fn render_json(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Durable storage for finished session reports.
#[async_trait]
pub trait DebugSink: Send + Sync {
    async fn write_report(&self, session_id: &str, report: &str) -> std::io::Result<()>;
}

/// Writes each report to `<dir>/<session-id>.log`.
pub struct FileDebugSink {
    dir: PathBuf,
}

impl FileDebugSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DebugSink for FileDebugSink {
    async fn write_report(&self, session_id: &str, report: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{session_id}.log"));
        tokio::fs::write(&path, report).await?;
        debug!(path = %path.display(), "Debug report written");
        Ok(())
    }
}

/// Discards every report.
pub struct NoopDebugSink;

#[async_trait]
impl DebugSink for NoopDebugSink {
    async fn write_report(&self, _session_id: &str, _report: &str) -> std::io::Result<()> {
        Ok(())
    }
}

/// Opens sessions that flush into one shared sink.
#[derive(Clone)]
pub struct DebugRecorder {
    sink: Arc<dyn DebugSink>,
}

impl DebugRecorder {
    pub fn new(sink: Arc<dyn DebugSink>) -> Self {
        Self { sink }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopDebugSink))
    }

    /// Begins a session for one pipeline run.
    pub fn start_session(&self, instructions: &str) -> DebugSession {
        let session = DebugSession {
            id: session_id(Utc::now()),
            entries: Mutex::new(Vec::new()),
            sink: Arc::clone(&self.sink),
        };
        session.record(DebugEntry::new(DebugStage::SessionStart).prompt(instructions));
        session
    }
}

fn session_id(now: DateTime<Utc>) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("{}-{suffix}", now.format("%Y-%m-%dT%H-%M-%S%.3fZ"))
}

/// The append-only entry log of one pipeline run.
pub struct DebugSession {
    id: String,
    entries: Mutex<Vec<DebugEntry>>,
    sink: Arc<dyn DebugSink>,
}

impl DebugSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn record(&self, entry: DebugEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Snapshot of the entries recorded so far.
    pub fn entries(&self) -> Vec<DebugEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn render_report(&self) -> String {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();
        for entry in entries.iter() {
            entry.render(&mut out);
        }
        out
    }

    /// Appends the terminal entry and flushes the report to the sink.
    pub async fn finish(self, success: bool) {
        let count = self.entries.lock().unwrap_or_else(PoisonError::into_inner).len();
        self.record(
            DebugEntry::new(DebugStage::SessionEnd)
                .parsed_output(serde_json::json!({ "success": success, "entries": count })),
        );
        let report = self.render_report();
        if let Err(err) = self.sink.write_report(&self.id, &report).await {
            warn!(session_id = %self.id, error = %err, "Failed to write debug report");
        }
    }
}
