//! Run environment: process-wide build flags and discovered tool paths.
//!
//! The environment is built fresh for every run and never written back to
//! the parent process; stages receive it through [`StageConfig::env`].

use crate::config::WorkflowConfig;
use crate::error::{PipelineError, Result};
use crate::runner::{CommandExecutor, StageResult};
use crate::stage::{StageConfig, StageKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Path of the version-control executable, exported to the test binaries.
pub const TEST_GIT_VAR: &str = "TEST_GIT";

/// Internal execution path of that executable (`git --exec-path`).
pub const TEST_GIT_EXEC_PATH_VAR: &str = "TEST_GIT_EXEC_PATH";

/// Tool locations discovered during the test stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveredTools {
    pub git: PathBuf,
    pub git_exec_path: String,
}

impl DiscoveredTools {
    pub fn to_env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (TEST_GIT_VAR.to_string(), self.git.display().to_string()),
            (TEST_GIT_EXEC_PATH_VAR.to_string(), self.git_exec_path.clone()),
        ])
    }

    /// Build from the finished exec-path probe.
    pub fn from_probe(git: PathBuf, probe: &StageResult) -> Result<Self> {
        if !probe.passed() {
            return Err(PipelineError::ToolDiscovery(format!(
                "'{} --exec-path' exited with code {}",
                git.display(),
                probe.exit_code
            )));
        }

        let git_exec_path = probe.stdout.trim().to_string();
        if git_exec_path.is_empty() {
            return Err(PipelineError::ToolDiscovery(
                "git reported an empty exec-path".to_string(),
            ));
        }

        info!(git = %git.display(), exec_path = %git_exec_path, "discovered test tools");
        Ok(Self { git, git_exec_path })
    }
}

/// Variables applied to every stage of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunEnvironment {
    vars: BTreeMap<String, String>,
}

impl RunEnvironment {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self {
            vars: config.env.clone(),
        }
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Process-wide variables plus the discovered tool variables.
    pub fn for_tests(&self, tools: &DiscoveredTools) -> BTreeMap<String, String> {
        let mut vars = self.vars.clone();
        vars.extend(tools.to_env());
        vars
    }
}

/// Locate `program` the way `which` does.
///
/// A program containing a path separator is checked directly; otherwise each
/// entry of `path_var` is searched in order.
pub fn find_executable(program: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return is_executable(direct).then(|| direct.to_path_buf());
    }

    let path_var = path_var?;
    std::env::split_paths(path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Resolve the configured git program to an executable path.
pub fn locate_git(git_program: &str) -> Result<PathBuf> {
    let path_var = std::env::var_os("PATH");
    let git = find_executable(git_program, path_var.as_deref()).ok_or_else(|| {
        PipelineError::ToolDiscovery(format!("'{}' not found on PATH", git_program))
    })?;
    debug!(git = %git.display(), "located git");
    Ok(git)
}

/// Stage asking `git` for its internal execution path.
pub fn exec_path_probe(git: &Path, vars: &BTreeMap<String, String>) -> StageConfig {
    StageConfig::new(
        "discover_git_exec_path",
        StageKind::Discover,
        vec![git.display().to_string(), "--exec-path".to_string()],
    )
    .with_env(vars.clone())
}

/// Discover the git executable and its exec-path outside of a run.
pub async fn discover_tools(
    executor: &dyn CommandExecutor,
    git_program: &str,
    env: &RunEnvironment,
) -> Result<DiscoveredTools> {
    let git = locate_git(git_program)?;
    let probe = exec_path_probe(&git, env.vars());
    let result = executor
        .execute(&probe)
        .await
        .map_err(|e| PipelineError::ToolDiscovery(e.to_string()))?;
    DiscoveredTools::from_probe(git, &result)
}
