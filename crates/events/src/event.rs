//! Progress event envelope.

use orthoflow_core::console::{ConsoleOutput, RECENT_LINES_IN_EVENT};
use orthoflow_core::progress::COMPLETE_PROGRESS;
use orthoflow_core::status::ProcessingStatus;
use serde::{Deserialize, Serialize};

/// A snapshot of a task's progress, as sent to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: String,
    pub status: ProcessingStatus,
    pub progress: i32,
    /// At most [`RECENT_LINES_IN_EVENT`] trailing console lines.
    pub recent_log_lines: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    /// An in-flight `processing` update.
    pub fn processing(task_id: impl Into<String>, progress: i32, console: &ConsoleOutput) -> Self {
        Self {
            task_id: task_id.into(),
            status: ProcessingStatus::Processing,
            progress,
            recent_log_lines: console.recent(RECENT_LINES_IN_EVENT),
            error: None,
        }
    }

    /// The final event of a run.
    ///
    /// A `completed` event always reports 100; other terminal states keep
    /// the last persisted progress.
    pub fn terminal(
        task_id: impl Into<String>,
        status: ProcessingStatus,
        progress: i32,
        console: &ConsoleOutput,
        error: Option<String>,
    ) -> Self {
        let progress = if status == ProcessingStatus::Completed {
            COMPLETE_PROGRESS
        } else {
            progress
        };
        Self {
            task_id: task_id.into(),
            status,
            progress,
            recent_log_lines: console.recent(RECENT_LINES_IN_EVENT),
            error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Serialize to the JSON text carried in a WebSocket frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console_with(n: usize) -> ConsoleOutput {
        ConsoleOutput::from((0..n).map(|i| format!("line {i}")).collect::<Vec<_>>())
    }

    #[test]
    fn processing_event_carries_last_five_lines() {
        let event = ProgressEvent::processing("task_x", 55, &console_with(12));
        assert_eq!(event.status, ProcessingStatus::Processing);
        assert_eq!(event.recent_log_lines.len(), RECENT_LINES_IN_EVENT);
        assert_eq!(event.recent_log_lines[0], "line 7");
        assert_eq!(event.recent_log_lines[4], "line 11");
    }

    #[test]
    fn completed_event_reports_full_progress() {
        let event = ProgressEvent::terminal(
            "task_x",
            ProcessingStatus::Completed,
            55,
            &ConsoleOutput::new(),
            None,
        );
        assert_eq!(event.progress, COMPLETE_PROGRESS);
        assert!(event.is_terminal());
    }

    #[test]
    fn failed_event_keeps_progress_and_error() {
        let event = ProgressEvent::terminal(
            "task_x",
            ProcessingStatus::Failed,
            55,
            &ConsoleOutput::new(),
            Some("out of memory".into()),
        );
        assert_eq!(event.progress, 55);
        assert_eq!(event.error.as_deref(), Some("out of memory"));
    }

    #[test]
    fn json_omits_absent_error() {
        let event = ProgressEvent::processing("task_x", 10, &console_with(1));
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["task_id"], "task_x");
        assert_eq!(json["status"], "processing");
        assert_eq!(json["progress"], 10);
        assert_eq!(json["recent_log_lines"][0], "line 0");
        assert!(json.get("error").is_none());
    }
}
