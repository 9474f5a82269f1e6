//! Error types for the cirun pipeline

use crate::stage::StageKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failures that halt a run.
///
/// A cache miss is not represented here: it degrades the run but never
/// stops it.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Toolchain could not be acquired
    #[error("Toolchain provisioning failed: {0}")]
    ProvisionFailed(String),

    /// Build exited non-zero
    #[error("Compilation failed with exit code {exit_code}")]
    CompileFailed { exit_code: i32 },

    /// Test runner exited non-zero
    #[error("Tests failed with exit code {exit_code}")]
    TestFailed { exit_code: i32 },

    /// A stage exceeded its wall-clock budget
    #[error("Stage '{stage}' timed out after {}s", .limit.as_secs())]
    TimedOut { stage: String, limit: Duration },

    /// Auxiliary tool (git, git exec-path) could not be discovered
    #[error("Tool discovery failed: {0}")]
    ToolDiscovery(String),

    /// Process could not be spawned
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Stage has nothing to execute
    #[error("Stage {0} has empty command")]
    EmptyCommand(String),

    /// A job stage that produced no exit status
    #[error("Stage '{stage}' could not run: {source}")]
    StageAborted {
        stage: String,
        kind: StageKind,
        #[source]
        source: Box<PipelineError>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Map the error onto the run-level failure taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::ProvisionFailed(_) => FailureKind::Provisioning,
            PipelineError::CompileFailed { .. } => FailureKind::Compilation,
            PipelineError::TimedOut { .. } => FailureKind::Timeout,
            PipelineError::TestFailed { .. } | PipelineError::ToolDiscovery(_) => FailureKind::Test,
            PipelineError::StageAborted { kind, .. } => match kind {
                StageKind::Provision => FailureKind::Provisioning,
                StageKind::Compile => FailureKind::Compilation,
                StageKind::Discover | StageKind::Test => FailureKind::Test,
            },
            PipelineError::Spawn { .. }
            | PipelineError::EmptyCommand(_)
            | PipelineError::Config(_)
            | PipelineError::Io(_) => FailureKind::Internal,
        }
    }
}

/// Configuration and trigger-input errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid schedule expression '{0}': only daily 'M H * * *' is supported")]
    InvalidSchedule(String),

    #[error("Unknown event name: {0}")]
    UnknownEvent(String),

    #[error("Invalid test timeout: {0}s (must be at least 1s)")]
    InvalidTimeout(u64),

    #[error("Missing environment variable: {0}")]
    MissingEnv(String),

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Run-level failure classification recorded in reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Provisioning,
    Compilation,
    Test,
    Timeout,
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Provisioning => "provisioning",
            FailureKind::Compilation => "compilation",
            FailureKind::Test => "test",
            FailureKind::Timeout => "timeout",
            FailureKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_timeout() {
        let err = PipelineError::TimedOut {
            stage: "test".to_string(),
            limit: Duration::from_secs(900),
        };
        assert!(err.to_string().contains("timed out after 900s"));
        assert_eq!(err.kind(), FailureKind::Timeout);
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            PipelineError::ProvisionFailed("x".into()).kind(),
            FailureKind::Provisioning
        );
        assert_eq!(
            PipelineError::CompileFailed { exit_code: 101 }.kind(),
            FailureKind::Compilation
        );
        assert_eq!(
            PipelineError::TestFailed { exit_code: 101 }.kind(),
            FailureKind::Test
        );
    }

    #[test]
    fn test_aborted_stage_keeps_its_kind() {
        let spawn = || PipelineError::Spawn {
            command: "cargo".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let aborted = |kind| PipelineError::StageAborted {
            stage: "stage".to_string(),
            kind,
            source: Box::new(spawn()),
        };

        assert_eq!(aborted(StageKind::Provision).kind(), FailureKind::Provisioning);
        assert_eq!(aborted(StageKind::Compile).kind(), FailureKind::Compilation);
        assert_eq!(aborted(StageKind::Discover).kind(), FailureKind::Test);
        assert_eq!(aborted(StageKind::Test).kind(), FailureKind::Test);
        assert_eq!(spawn().kind(), FailureKind::Internal);
        assert!(aborted(StageKind::Compile).to_string().contains("Failed to spawn 'cargo'"));
    }
}
