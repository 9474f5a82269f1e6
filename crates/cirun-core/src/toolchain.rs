//! Toolchain provisioning via rustup.
//!
//! Provisioning is fatal on failure and never retried.

use crate::config::ToolchainConfig;
use crate::error::{PipelineError, Result};
use crate::runner::{CommandExecutor, StageResult};
use crate::stage::{StageConfig, StageKind};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Stages that install the toolchain and pin the workspace to it.
pub fn provision_stages(
    toolchain: &ToolchainConfig,
    workspace: &Path,
    env: &BTreeMap<String, String>,
) -> Vec<StageConfig> {
    let install = StageConfig::new(
        "toolchain_install",
        StageKind::Provision,
        vec![
            "rustup".to_string(),
            "toolchain".to_string(),
            "install".to_string(),
            toolchain.version.clone(),
            "--profile".to_string(),
            toolchain.profile.clone(),
        ],
    );

    let pin = StageConfig::new(
        "toolchain_override",
        StageKind::Provision,
        vec![
            "rustup".to_string(),
            "override".to_string(),
            "set".to_string(),
            toolchain.version.clone(),
        ],
    )
    .with_cwd(workspace);

    [install, pin]
        .into_iter()
        .map(|stage| stage.with_env(env.clone()))
        .collect()
}

/// Run the provisioning stages in order, stopping at the first failure.
///
/// Every executed stage is appended to `results`, including the failing one.
pub async fn provision(
    executor: &dyn CommandExecutor,
    stages: &[StageConfig],
    results: &mut Vec<StageResult>,
) -> Result<()> {
    for stage in stages {
        let result = match executor.execute(stage).await {
            Ok(r) => r,
            Err(e) => {
                results.push(StageResult::aborted(stage, &e, 0));
                return Err(PipelineError::ProvisionFailed(format!("{}: {}", stage.name, e)));
            }
        };

        let passed = result.passed();
        let exit_code = result.exit_code;
        results.push(result);

        if !passed {
            return Err(PipelineError::ProvisionFailed(format!(
                "'{}' exited with code {}",
                stage.command_line(),
                exit_code
            )));
        }
    }

    info!(stages = stages.len(), "toolchain provisioned");
    Ok(())
}
