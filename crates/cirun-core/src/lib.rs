//! cirun - CI trigger gating and test-job execution
//!
//! Runs the macOS test job as a program:
//! - Filters repository events and gates on the head ref prefix
//! - Provisions a pinned toolchain and restores a dependency cache
//! - Compiles test and bench binaries, then runs the workspace tests under a
//!   wall-clock budget with discovered git paths exported

pub mod cache;
pub mod config;
pub mod env;
pub mod error;
pub mod gate;
pub mod obs;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod schedule;
pub mod stage;
pub mod telemetry;
pub mod toolchain;
pub mod trigger;

// Re-export key types
pub use cache::{compute_cache_key, CacheKey, DependencyCache, RestoreOutcome, SaveOutcome};
pub use config::{ToolchainConfig, WorkflowConfig};
pub use env::{DiscoveredTools, RunEnvironment, TEST_GIT_EXEC_PATH_VAR, TEST_GIT_VAR};
pub use error::{ConfigError, FailureKind, PipelineError, Result};
pub use gate::{GateVerdict, RefGate};
pub use pipeline::CiPipeline;
pub use report::{RunOutcome, RunReport, SkipReason};
pub use runner::{CommandExecutor, ProcessExecutor, StageResult};
pub use schedule::DailySchedule;
pub use stage::{StageConfig, StageKind};
pub use trigger::{TriggerEvent, TriggerFilter};
