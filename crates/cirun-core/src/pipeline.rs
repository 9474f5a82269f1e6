//! CI pipeline orchestration.
//!
//! A run is a single linear sequence:
//!
//! event -> trigger filter -> gate -> environment -> provision
//!       -> cache restore -> compile -> test -> cache save
//!
//! The first failing stage halts the run. Cache problems are logged and
//! recorded but never fail it.

use crate::cache::{compute_cache_key, CacheKey, DependencyCache, RestoreOutcome, SaveOutcome};
use crate::config::WorkflowConfig;
use crate::env::{
    exec_path_probe, locate_git, DiscoveredTools, RunEnvironment, TEST_GIT_EXEC_PATH_VAR,
    TEST_GIT_VAR,
};
use crate::error::{PipelineError, Result};
use crate::gate::RefGate;
use crate::obs;
use crate::report::{CacheReport, FailureReport, RunOutcome, RunReport, SkipReason};
use crate::runner::{CommandExecutor, ProcessExecutor, StageResult};
use crate::stage::{StageConfig, StageKind};
use crate::toolchain;
use crate::trigger::{TriggerEvent, TriggerFilter};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, Instrument};
use uuid::Uuid;

/// Mutable state accumulated while a run progresses.
struct RunState {
    run_id: String,
    trigger: TriggerEvent,
    gate: Option<crate::gate::GateVerdict>,
    cache: Option<CacheReport>,
    stages: Vec<StageResult>,
    started_at: DateTime<Utc>,
    start: Instant,
}

impl RunState {
    fn finish(
        self,
        outcome: RunOutcome,
        skip_reason: Option<SkipReason>,
        failure: Option<PipelineError>,
    ) -> RunReport {
        let duration_ms = self.start.elapsed().as_millis() as u64;
        let failure = failure.map(|e| FailureReport {
            kind: e.kind(),
            message: e.to_string(),
        });

        let report = RunReport {
            run_id: self.run_id,
            trigger: self.trigger,
            gate: self.gate,
            outcome,
            skip_reason,
            failure,
            cache: self.cache,
            stages: self.stages,
            host_os: std::env::consts::OS.to_string(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_ms,
        };

        obs::emit_run_finished(&report.run_id, duration_ms, report.outcome_label());
        report
    }
}

/// CI pipeline orchestrator.
pub struct CiPipeline {
    config: WorkflowConfig,
    workspace: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    stream_output: bool,
}

impl CiPipeline {
    /// Pipeline that runs stages as child processes in `workspace`.
    pub fn new(config: WorkflowConfig, workspace: impl Into<PathBuf>) -> Self {
        Self {
            config,
            workspace: workspace.into(),
            executor: Arc::new(ProcessExecutor),
            stream_output: false,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Stream compile and test output to the terminal.
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream_output = stream;
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn compile_stage(&self, env: &RunEnvironment) -> StageConfig {
        StageConfig::new("compile", StageKind::Compile, self.config.compile_command.clone())
            .with_env(env.vars().clone())
            .with_cwd(&self.workspace)
            .streaming(self.stream_output)
    }

    pub fn test_stage(&self, vars: BTreeMap<String, String>) -> StageConfig {
        StageConfig::new("test", StageKind::Test, self.config.test_command.clone())
            .with_env(vars)
            .with_cwd(&self.workspace)
            .with_timeout(self.config.test_timeout())
            .streaming(self.stream_output)
    }

    /// Every stage the job body would run, in order, without executing any.
    ///
    /// Tool variables are shown as placeholders since they are only known
    /// once the test stage starts.
    pub fn plan(&self) -> Vec<StageConfig> {
        let env = RunEnvironment::from_config(&self.config);
        let mut stages =
            toolchain::provision_stages(&self.config.toolchain, &self.workspace, env.vars());
        stages.push(self.compile_stage(&env));

        let mut test_vars = env.vars().clone();
        test_vars.insert(TEST_GIT_VAR.to_string(), format!("$(which {})", self.config.git_program));
        test_vars.insert(
            TEST_GIT_EXEC_PATH_VAR.to_string(),
            format!("$({} --exec-path)", self.config.git_program),
        );
        stages.push(self.test_stage(test_vars));
        stages
    }

    /// Execute the workflow for one event.
    ///
    /// Never returns an error: every failure is captured in the report, and
    /// [`RunReport::exit_code`] gives the process status.
    pub async fn run(&self, event: &TriggerEvent) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        self.run_inner(run_id, event).instrument(span).await
    }

    async fn run_inner(&self, run_id: String, event: &TriggerEvent) -> RunReport {
        obs::emit_run_started(&run_id, event.name(), event.gate_ref_name());

        let mut state = RunState {
            run_id,
            trigger: event.clone(),
            gate: None,
            cache: None,
            stages: Vec::new(),
            started_at: Utc::now(),
            start: Instant::now(),
        };

        if !TriggerFilter::new(&self.config.push_branch).accepts(event) {
            info!(trigger = %event, "event does not trigger this workflow");
            return state.finish(RunOutcome::Skipped, Some(SkipReason::NotTriggered), None);
        }

        let verdict = RefGate::new(&self.config.gate_prefix).evaluate(event);
        let passed = verdict.passed;
        info!(trigger = %event, "{}", verdict.message);
        state.gate = Some(verdict);
        if !passed {
            return state.finish(RunOutcome::Skipped, Some(SkipReason::GateClosed), None);
        }

        match self.execute_job(&mut state).await {
            Ok(()) => {
                info!("CI pipeline completed successfully");
                state.finish(RunOutcome::Passed, None, None)
            }
            Err(e) => {
                error!(kind = %e.kind(), error = %e, "CI pipeline failed");
                state.finish(RunOutcome::Failed, None, Some(e))
            }
        }
    }

    async fn execute_job(&self, state: &mut RunState) -> Result<()> {
        let env = RunEnvironment::from_config(&self.config);

        let provision =
            toolchain::provision_stages(&self.config.toolchain, &self.workspace, env.vars());
        toolchain::provision(self.executor.as_ref(), &provision, &mut state.stages).await?;

        let cache = self.restore_cache(state).await;

        let compile = self.compile_stage(&env);
        let result = self.run_stage(&compile, &mut state.stages).await?;
        if !result.passed() {
            return Err(PipelineError::CompileFailed {
                exit_code: result.exit_code,
            });
        }

        let tested = self.run_tests(&env, state).await;

        // Build output exists once compilation passed, whatever the tests did.
        if let Some((cache, key)) = cache {
            self.save_cache(cache, key, state).await;
        }

        tested
    }

    /// Tool discovery and the test command share the test-step budget.
    async fn run_tests(&self, env: &RunEnvironment, state: &mut RunState) -> Result<()> {
        let limit = self.config.test_timeout();
        let deadline = Instant::now() + limit;
        let step_timed_out = |e: PipelineError| match e {
            PipelineError::TimedOut { .. } => PipelineError::TimedOut {
                stage: "test".to_string(),
                limit,
            },
            other => other,
        };

        let git = locate_git(&self.config.git_program)?;
        let probe = exec_path_probe(&git, env.vars()).with_timeout(limit);
        let result = self
            .run_stage(&probe, &mut state.stages)
            .await
            .map_err(step_timed_out)?;
        let tools = DiscoveredTools::from_probe(git, &result)?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        let test = self
            .test_stage(env.for_tests(&tools))
            .with_timeout(remaining);
        let result = self
            .run_stage(&test, &mut state.stages)
            .await
            .map_err(step_timed_out)?;
        if !result.passed() {
            return Err(PipelineError::TestFailed {
                exit_code: result.exit_code,
            });
        }
        Ok(())
    }

    /// Execute one stage and record its result, including aborted stages.
    ///
    /// A stage that never produced an exit status fails as its own kind;
    /// timeouts pass through unchanged.
    async fn run_stage(
        &self,
        config: &StageConfig,
        results: &mut Vec<StageResult>,
    ) -> Result<StageResult> {
        info!(stage = %config.name, command = %config.command_line(), "Executing stage");
        let start = Instant::now();

        match self.executor.execute(config).await {
            Ok(result) => {
                obs::emit_stage_finished(
                    &result.stage_name,
                    result.exit_code,
                    result.duration_ms,
                    result.passed(),
                );
                results.push(result.clone());
                Ok(result)
            }
            Err(e) => {
                let aborted = StageResult::aborted(config, &e, start.elapsed().as_millis() as u64);
                obs::emit_stage_finished(&aborted.stage_name, -1, aborted.duration_ms, false);
                results.push(aborted);
                match e {
                    PipelineError::TimedOut { .. } => Err(e),
                    other => Err(PipelineError::StageAborted {
                        stage: config.name.clone(),
                        kind: config.kind,
                        source: Box::new(other),
                    }),
                }
            }
        }
    }

    async fn restore_cache(&self, state: &mut RunState) -> Option<(DependencyCache, CacheKey)> {
        let Some(root) = self.config.cache_dir.clone() else {
            state.cache = Some(CacheReport::disabled());
            return None;
        };

        let cache = DependencyCache::new(root);
        let workspace = self.workspace.clone();
        let toolchain = self.config.toolchain.clone();
        let store = cache.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let key = compute_cache_key(&workspace, &toolchain)?;
            let outcome = store.restore(&key, &workspace);
            Ok::<_, std::io::Error>((key, outcome))
        })
        .await;

        let (key, restore) = match joined {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return self.cache_unavailable(state, &e),
            Err(e) => return self.cache_unavailable(state, &e),
        };

        if let RestoreOutcome::Error(e) = &restore {
            obs::emit_cache_degraded("restore", e);
        }
        state.cache = Some(CacheReport {
            key: Some(key.clone()),
            restore,
            save: None,
        });
        Some((cache, key))
    }

    fn cache_unavailable(
        &self,
        state: &mut RunState,
        error: &dyn std::fmt::Display,
    ) -> Option<(DependencyCache, CacheKey)> {
        obs::emit_cache_degraded("key", error);
        state.cache = Some(CacheReport {
            key: None,
            restore: RestoreOutcome::Error(error.to_string()),
            save: None,
        });
        None
    }

    async fn save_cache(&self, cache: DependencyCache, key: CacheKey, state: &mut RunState) {
        let workspace = self.workspace.clone();
        let outcome = tokio::task::spawn_blocking(move || cache.save(&key, &workspace))
            .await
            .unwrap_or_else(|e| SaveOutcome::Error(e.to_string()));

        if let SaveOutcome::Error(e) = &outcome {
            obs::emit_cache_degraded("save", e);
        }
        if let Some(report) = state.cache.as_mut() {
            report.save = Some(outcome);
        }
    }
}
