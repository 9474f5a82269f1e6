//! Structured lifecycle events for a cirun run.
//!
//! All events are emitted at `info!` (or `warn!` for degraded paths) with an
//! `event` field so they can be filtered in JSON log output.

use tracing::{info, warn, Span};

/// Span tagged with the run id; attach with `Instrument::instrument` so it
/// stays correct across await points.
pub fn run_span(run_id: &str) -> Span {
    tracing::info_span!("cirun.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, trigger: &str, ref_name: &str) {
    info!(event = "run.started", run_id = %run_id, trigger = %trigger, ref_name = %ref_name);
}

/// Emit event: gate decision for the triggering ref.
pub fn emit_gate_evaluated(ref_name: &str, prefix: &str, passed: bool) {
    info!(
        event = "gate.evaluated",
        ref_name = %ref_name,
        prefix = %prefix,
        passed = passed,
    );
}

pub fn emit_stage_finished(stage: &str, exit_code: i32, duration_ms: u64, success: bool) {
    info!(
        event = "stage.finished",
        stage = %stage,
        exit_code = exit_code,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: cache operation degraded the run without failing it.
pub fn emit_cache_degraded(operation: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cache.degraded", operation = %operation, error = %error);
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, outcome: &str) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        outcome = %outcome,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _entered = run_span("test-run-id").entered();
        emit_run_started("test-run-id", "schedule", "");
    }
}
