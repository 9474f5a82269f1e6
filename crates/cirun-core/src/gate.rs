//! Ref gate deciding whether the job body executes.

use crate::obs;
use crate::trigger::TriggerEvent;
use serde::{Deserialize, Serialize};

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the job body should run.
    pub passed: bool,

    /// Ref name the gate looked at (may be empty).
    pub ref_name: String,

    /// Summary message.
    pub message: String,
}

/// Prefix gate over the triggering ref name.
///
/// Gate rule: pass iff the ref name is empty or starts with the prefix.
#[derive(Debug, Clone)]
pub struct RefGate {
    prefix: String,
}

impl RefGate {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Pure gate predicate.
    pub fn allows(&self, ref_name: &str) -> bool {
        ref_name.is_empty() || ref_name.starts_with(&self.prefix)
    }

    /// Evaluate the gate for an event and log the decision.
    pub fn evaluate(&self, event: &TriggerEvent) -> GateVerdict {
        let ref_name = event.gate_ref_name();
        let passed = self.allows(ref_name);
        obs::emit_gate_evaluated(ref_name, &self.prefix, passed);

        let message = if ref_name.is_empty() {
            "No head ref; job runs".to_string()
        } else if passed {
            format!("Ref '{}' matches prefix '{}'; job runs", ref_name, self.prefix)
        } else {
            format!(
                "Ref '{}' does not match prefix '{}'; job skipped",
                ref_name, self.prefix
            )
        };

        GateVerdict {
            passed,
            ref_name: ref_name.to_string(),
            message,
        }
    }
}
