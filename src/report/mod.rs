//! Boundary interfaces for finished runs: the artifact sink the pipeline
//! writes into, and the status channel it publishes progress through.
//! Persistence and delivery beyond these traits belong to the caller.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write artifact {name}: {reason}")]
    Write { name: String, reason: String },
}

/// Artifact names written on a successful run.
pub mod artifacts {
    pub const POLISHED_ARTICLE: &str = "polished_article.md";
    pub const DRAFT_ARTICLE: &str = "draft_article.md";
    pub const OUTLINE: &str = "outline.md";
    pub const DRAFT_OUTLINE: &str = "draft_outline.md";
    pub const CONVERSATION_LOG: &str = "conversation_log.json";
    pub const URL_TO_INFO: &str = "url_to_info.json";
    pub const RUN_CONFIG: &str = "run_config.json";
    pub const LLM_CALL_HISTORY: &str = "llm_call_history.jsonl";
}

/// Write-only key/value store for run artifacts.
pub trait ReportSink: Send + Sync {
    fn write(&self, name: &str, content: &str) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobUpdate {
    pub status: JobState,
    pub progress_percent: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn processing(progress_percent: u8, message: &str) -> Self {
        Self {
            status: JobState::Processing,
            progress_percent,
            message: message.to_string(),
            error: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: JobState::Completed,
            progress_percent: 100,
            message: "report generated".to_string(),
            error: None,
        }
    }

    pub fn failed(error: &str) -> Self {
        Self {
            status: JobState::Failed,
            progress_percent: 0,
            message: "report generation failed".to_string(),
            error: Some(error.to_string()),
        }
    }
}

/// Progress channel for a running job.
pub trait JobStatus: Send + Sync {
    fn publish(&self, job_id: &str, update: JobUpdate);
}

/// Sink writing each artifact as a UTF-8 file under one directory.
pub struct FsReportSink {
    dir: PathBuf,
}

impl FsReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ReportSink for FsReportSink {
    fn write(&self, name: &str, content: &str) -> Result<(), SinkError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| SinkError::Write {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        // Rust strings are UTF-8; fs::write emits the bytes verbatim, so
        // the on-disk encoding is UTF-8 regardless of platform defaults.
        std::fs::write(self.dir.join(name), content.as_bytes()).map_err(|e| SinkError::Write {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct InMemorySink {
    artifacts: Mutex<HashMap<String, String>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.artifacts.lock().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.artifacts.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

impl ReportSink for InMemorySink {
    fn write(&self, name: &str, content: &str) -> Result<(), SinkError> {
        self.artifacts
            .lock()
            .unwrap()
            .insert(name.to_string(), content.to_string());
        Ok(())
    }
}

/// Status double that records every update.
#[derive(Default)]
pub struct RecordingJobStatus {
    updates: Mutex<Vec<(String, JobUpdate)>>,
}

impl RecordingJobStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<(String, JobUpdate)> {
        self.updates.lock().unwrap().clone()
    }
}

impl JobStatus for RecordingJobStatus {
    fn publish(&self, job_id: &str, update: JobUpdate) {
        self.updates
            .lock()
            .unwrap()
            .push((job_id.to_string(), update));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_sink_round_trip() {
        let sink = InMemorySink::new();
        sink.write(artifacts::OUTLINE, "# 개요\n").unwrap();
        assert_eq!(sink.get(artifacts::OUTLINE).as_deref(), Some("# 개요\n"));
        assert!(sink.get(artifacts::POLISHED_ARTICLE).is_none());
    }

    #[test]
    fn fs_sink_writes_utf8_files() {
        let dir = std::env::temp_dir().join(format!("stormgen-sink-{}", uuid::Uuid::new_v4()));
        let sink = FsReportSink::new(&dir);
        sink.write(artifacts::DRAFT_ARTICLE, "한국어 본문 [1]").unwrap();

        let raw = std::fs::read(dir.join(artifacts::DRAFT_ARTICLE)).unwrap();
        assert_eq!(std::str::from_utf8(&raw).unwrap(), "한국어 본문 [1]");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn recording_status_keeps_order() {
        let status = RecordingJobStatus::new();
        status.publish("job-1", JobUpdate::processing(10, "stage 1"));
        status.publish("job-1", JobUpdate::failed("cancelled"));

        let updates = status.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].1.status, JobState::Processing);
        assert_eq!(updates[1].1.status, JobState::Failed);
        assert_eq!(updates[1].1.error.as_deref(), Some("cancelled"));
    }
}
