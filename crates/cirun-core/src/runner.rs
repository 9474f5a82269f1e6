//! CI stage execution.

use crate::error::{PipelineError, Result};
use crate::stage::{StageConfig, StageKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// Result of a stage execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    pub kind: StageKind,

    /// Exit code (0 = success, -1 = killed or never ran).
    pub exit_code: i32,

    /// Captured stdout (empty when output was streamed).
    pub stdout: String,

    /// Captured stderr (empty when output was streamed).
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,

    /// Whether the stage was stopped by its timeout.
    pub timed_out: bool,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Result for a stage that never produced an exit status.
    pub fn aborted(config: &StageConfig, error: &PipelineError, duration_ms: u64) -> Self {
        Self {
            stage_name: config.name.clone(),
            kind: config.kind,
            exit_code: -1,
            stdout: String::new(),
            stderr: error.to_string(),
            duration_ms,
            success: false,
            timed_out: matches!(error, PipelineError::TimedOut { .. }),
        }
    }
}

/// Executes a single stage.
///
/// Implementations return `Err` only when no exit status exists (spawn
/// failure, timeout); a non-zero exit is an `Ok` result with `success`
/// unset.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, config: &StageConfig) -> Result<StageResult>;
}

/// Runs stages as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, config: &StageConfig) -> Result<StageResult> {
        let start = Instant::now();

        let (exe, args) = config
            .command
            .split_first()
            .ok_or_else(|| PipelineError::EmptyCommand(config.name.clone()))?;

        debug!(stage = %config.name, command = %config.command_line(), "spawning stage");

        let mut command = Command::new(exe);
        command.args(args).envs(&config.env).kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }
        if config.inherit_output {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let child = command.spawn().map_err(|source| PipelineError::Spawn {
            command: exe.clone(),
            source,
        })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match config.timeout() {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| PipelineError::TimedOut {
                    stage: config.name.clone(),
                    limit,
                })??,
            None => child.wait_with_output().await?,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);

        Ok(StageResult {
            stage_name: config.name.clone(),
            kind: config.kind,
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            success: output.status.success(),
            timed_out: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn stage(name: &str, command: &[&str]) -> StageConfig {
        StageConfig::new(
            name,
            StageKind::Test,
            command.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_stage_result_passed() {
        let result = StageResult {
            stage_name: "compile".to_string(),
            kind: StageKind::Compile,
            exit_code: 0,
            stdout: "".to_string(),
            stderr: "".to_string(),
            duration_ms: 100,
            success: true,
            timed_out: false,
        };
        assert!(result.passed());
    }

    #[test]
    fn test_aborted_result_marks_timeout() {
        let config = stage("test", &["sleep", "5"]);
        let err = PipelineError::TimedOut {
            stage: "test".to_string(),
            limit: Duration::from_secs(1),
        };
        let result = StageResult::aborted(&config, &err, 1000);
        assert!(result.timed_out);
        assert!(!result.passed());
        assert_eq!(result.exit_code, -1);
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let result = ProcessExecutor
            .execute(&stage("echo_test", &["echo", "hello"]))
            .await
            .expect("execute failed");
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let result = ProcessExecutor
            .execute(&stage("false_test", &["false"]))
            .await
            .expect("execute failed");
        assert!(!result.success);
        assert_ne!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_execute_passes_env() {
        let config = stage("env_test", &["sh", "-c", "echo $CIRUN_PROBE"])
            .with_env(BTreeMap::from([("CIRUN_PROBE".to_string(), "short".to_string())]));
        let result = ProcessExecutor.execute(&config).await.unwrap();
        assert_eq!(result.stdout.trim(), "short");
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let config = stage("sleepy", &["sleep", "5"]).with_timeout(Duration::from_secs(1));
        let err = ProcessExecutor.execute(&config).await.unwrap_err();
        assert!(matches!(err, PipelineError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_execute_empty_command() {
        let config = StageConfig::new("empty", StageKind::Test, vec![]);
        let err = ProcessExecutor.execute(&config).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyCommand(_)));
    }

    #[tokio::test]
    async fn test_execute_missing_binary() {
        let config = stage("missing", &["cirun-definitely-not-a-binary"]);
        let err = ProcessExecutor.execute(&config).await.unwrap_err();
        assert!(matches!(err, PipelineError::Spawn { .. }));
    }
}
