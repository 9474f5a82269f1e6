//! Run report: what ran, what was skipped, and why a run failed.

use crate::cache::{CacheKey, RestoreOutcome, SaveOutcome};
use crate::error::FailureKind;
use crate::gate::GateVerdict;
use crate::runner::StageResult;
use crate::trigger::TriggerEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Passed,
    Failed,
    /// Filtered out by the trigger filter or the gate; no job body ran.
    Skipped,
}

/// Why a run was skipped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotTriggered,
    GateClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheReport {
    pub key: Option<CacheKey>,
    pub restore: RestoreOutcome,
    pub save: Option<SaveOutcome>,
}

impl CacheReport {
    pub fn disabled() -> Self {
        Self {
            key: None,
            restore: RestoreOutcome::Disabled,
            save: None,
        }
    }
}

/// Result of a complete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub trigger: TriggerEvent,
    pub gate: Option<GateVerdict>,
    pub outcome: RunOutcome,
    pub skip_reason: Option<SkipReason>,
    pub failure: Option<FailureReport>,
    pub cache: Option<CacheReport>,
    pub stages: Vec<StageResult>,
    pub host_os: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Passed and skipped runs both count as success.
    pub fn success(&self) -> bool {
        self.outcome != RunOutcome::Failed
    }

    /// Process exit status for the run.
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(
            self.failure,
            Some(FailureReport {
                kind: FailureKind::Timeout,
                ..
            })
        )
    }

    /// Whether a stage with this name was executed.
    pub fn ran(&self, stage_name: &str) -> bool {
        self.stages.iter().any(|s| s.stage_name == stage_name)
    }

    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| !s.passed()).count()
    }

    pub fn outcome_label(&self) -> &'static str {
        match self.outcome {
            RunOutcome::Passed => "passed",
            RunOutcome::Failed => "failed",
            RunOutcome::Skipped => "skipped",
        }
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageKind;

    fn report(outcome: RunOutcome, failure: Option<FailureKind>) -> RunReport {
        let now = Utc::now();
        RunReport {
            run_id: "run123".to_string(),
            trigger: TriggerEvent::schedule("master"),
            gate: None,
            outcome,
            skip_reason: None,
            failure: failure.map(|kind| FailureReport {
                kind,
                message: "boom".to_string(),
            }),
            cache: None,
            stages: vec![
                StageResult {
                    stage_name: "compile".to_string(),
                    kind: StageKind::Compile,
                    exit_code: 0,
                    stdout: "".to_string(),
                    stderr: "".to_string(),
                    duration_ms: 100,
                    success: true,
                    timed_out: false,
                },
                StageResult {
                    stage_name: "test".to_string(),
                    kind: StageKind::Test,
                    exit_code: 101,
                    stdout: "".to_string(),
                    stderr: "error".to_string(),
                    duration_ms: 200,
                    success: false,
                    timed_out: false,
                },
            ],
            host_os: "macos".to_string(),
            started_at: now,
            finished_at: now,
            duration_ms: 300,
        }
    }

    #[test]
    fn test_report_counts() {
        let r = report(RunOutcome::Failed, Some(FailureKind::Test));
        assert_eq!(r.passed_count(), 1);
        assert_eq!(r.failed_count(), 1);
        assert!(r.ran("compile"));
        assert!(!r.ran("provision"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(report(RunOutcome::Passed, None).exit_code(), 0);
        assert_eq!(report(RunOutcome::Skipped, None).exit_code(), 0);
        assert_eq!(report(RunOutcome::Failed, Some(FailureKind::Test)).exit_code(), 1);
    }

    #[test]
    fn test_timed_out() {
        assert!(report(RunOutcome::Failed, Some(FailureKind::Timeout)).timed_out());
        assert!(!report(RunOutcome::Failed, Some(FailureKind::Test)).timed_out());
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report(RunOutcome::Passed, None).write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["outcome"], "passed");
        assert_eq!(value["trigger"]["event"], "schedule");
        assert_eq!(value["stages"][1]["exit_code"], 101);
    }
}
