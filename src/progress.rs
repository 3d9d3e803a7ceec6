//! Import progress reporting.
//!
//! Reports observable progress during `chemreg import` so users see the upload,
//! each status poll, and the final outcome. Progress is emitted on **stderr**
//! so stdout stays parseable for scripts; the final summary goes to stdout.

use std::io::Write;

use crate::import::{ImportPhase, ImportState};

/// Reports import progress. Implementations write to stderr (human or JSON).
pub trait ImportProgressReporter: Send + Sync {
    /// Called with every state the poller publishes.
    fn report(&self, state: &ImportState);
}

/// Human-friendly progress on stderr: "import data.xlsx  polling t1  (3 checks)".
pub struct StderrProgress;

impl ImportProgressReporter for StderrProgress {
    fn report(&self, state: &ImportState) {
        let file = state.file_name.as_deref().unwrap_or("-");
        let line = match &state.phase {
            ImportPhase::Idle => return,
            ImportPhase::Uploading => format!("import {}  uploading...\n", file),
            ImportPhase::Polling => {
                let status = state
                    .task
                    .as_ref()
                    .map(|t| t.status.as_str())
                    .unwrap_or("QUEUED");
                format!(
                    "import {}  polling {}  {}  ({} checks)\n",
                    file,
                    state.task_id.as_deref().unwrap_or("-"),
                    status,
                    format_number(state.polls as u64)
                )
            }
            ImportPhase::Succeeded => format!("import {}  done\n", file),
            ImportPhase::Failed(why) => format!("import {}  failed: {}\n", file, why),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ImportProgressReporter for JsonProgress {
    fn report(&self, state: &ImportState) {
        if state.phase == ImportPhase::Idle {
            return;
        }
        let mut obj = serde_json::json!({
            "event": "progress",
            "file": state.file_name,
            "phase": state.phase.name(),
            "task_id": state.task_id,
            "polls": state.polls,
        });
        if let Some(task) = &state.task {
            obj["status"] = serde_json::json!(task.status.as_str());
        }
        if let ImportPhase::Failed(why) = &state.phase {
            obj["error"] = serde_json::json!(why.to_string());
        }
        if let (true, Some(summary)) = (state.phase.is_terminal(), state.summary()) {
            obj["imported"] = serde_json::json!(summary.imported);
            obj["errors"] = serde_json::json!(summary.errors);
        }
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ImportProgressReporter for NoProgress {
    fn report(&self, _state: &ImportState) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ImportProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
