//! CI stage definitions and configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// The role a stage plays in the job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// rustup toolchain install / override
    Provision,

    /// Auxiliary tool lookups (git exec-path)
    Discover,

    /// cargo build --benches --tests
    Compile,

    /// cargo test --workspace
    Test,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Provision => "provision",
            StageKind::Discover => "discover",
            StageKind::Compile => "compile",
            StageKind::Test => "test",
        }
    }
}

/// Configuration for a CI stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    pub kind: StageKind,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Extra environment for this stage, layered over the inherited one.
    pub env: BTreeMap<String, String>,

    /// Working directory; inherits the parent's when `None`.
    pub cwd: Option<PathBuf>,

    /// Wall-clock limit in milliseconds; unbounded when `None`.
    pub timeout_ms: Option<u64>,

    /// Stream output to the terminal instead of capturing it.
    pub inherit_output: bool,
}

impl StageConfig {
    pub fn new(name: impl Into<String>, kind: StageKind, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            command,
            env: BTreeMap::new(),
            cwd: None,
            timeout_ms: None,
            inherit_output: false,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn streaming(mut self, inherit: bool) -> Self {
        self.inherit_output = inherit;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Shell-like rendering of the command line, for plans and logs.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}
