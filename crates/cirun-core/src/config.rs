//! Workflow configuration.
//!
//! Defaults reproduce the macOS test job: nightly at midnight UTC, pushes to
//! `master`, every pull request, `ci-` prefixed head refs, toolchain 1.74
//! with the minimal profile, and a 15 minute test budget.

use crate::error::ConfigError;
use crate::schedule::DailySchedule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default test-step budget (15 minutes).
pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 15 * 60;

/// Toolchain to provision before building.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Toolchain channel or version, e.g. `1.74`
    pub version: String,

    /// rustup install profile
    pub profile: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            version: "1.74".to_string(),
            profile: "minimal".to_string(),
        }
    }
}

/// Complete policy for one workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Head refs starting with this prefix pass the gate.
    pub gate_prefix: String,

    /// Only pushes to this branch trigger the workflow.
    pub push_branch: String,

    /// Daily schedule for nightly runs.
    pub schedule: DailySchedule,

    pub toolchain: ToolchainConfig,

    /// Process-wide variables set for every stage.
    pub env: BTreeMap<String, String>,

    /// Build command producing test and bench binaries.
    pub compile_command: Vec<String>,

    /// Test command run across the whole workspace.
    pub test_command: Vec<String>,

    /// Wall-clock budget for the test stage.
    pub test_timeout_secs: u64,

    /// Root of the dependency cache; `None` disables caching.
    pub cache_dir: Option<PathBuf>,

    /// Version-control executable to discover for the tests.
    pub git_program: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        let env = BTreeMap::from([
            ("CARGO_INCREMENTAL".to_string(), "0".to_string()),
            ("RUST_BACKTRACE".to_string(), "short".to_string()),
        ]);

        Self {
            gate_prefix: "ci-".to_string(),
            push_branch: "master".to_string(),
            schedule: DailySchedule::midnight(),
            toolchain: ToolchainConfig::default(),
            env,
            compile_command: to_args(&["cargo", "build", "--benches", "--tests"]),
            test_command: to_args(&["cargo", "test", "--workspace"]),
            test_timeout_secs: DEFAULT_TEST_TIMEOUT_SECS,
            cache_dir: None,
            git_program: "git".to_string(),
        }
    }
}

impl WorkflowConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// The test step always runs under a finite, non-zero budget.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.test_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(self.test_timeout_secs));
        }
        Ok(())
    }

    /// Load from `path` when given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
