//! Repository events that may start a run, and the event-level filter.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// An event delivered by the repository host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerEvent {
    /// Daily scheduled tick; runs against the default branch.
    Schedule { branch: String },

    /// Push to a branch. `head_ref` is whatever head ref the host reported,
    /// normally empty for pushes.
    Push { branch: String, head_ref: String },

    /// Pull request opened or updated.
    PullRequest { head_ref: String, base_ref: String },
}

impl TriggerEvent {
    pub fn schedule(branch: impl Into<String>) -> Self {
        TriggerEvent::Schedule {
            branch: branch.into(),
        }
    }

    pub fn push(branch: impl Into<String>) -> Self {
        TriggerEvent::Push {
            branch: branch.into(),
            head_ref: String::new(),
        }
    }

    /// Push event that carries an explicit head ref.
    pub fn push_with_head_ref(branch: impl Into<String>, head_ref: impl Into<String>) -> Self {
        TriggerEvent::Push {
            branch: branch.into(),
            head_ref: head_ref.into(),
        }
    }

    pub fn pull_request(head_ref: impl Into<String>, base_ref: impl Into<String>) -> Self {
        TriggerEvent::PullRequest {
            head_ref: head_ref.into(),
            base_ref: base_ref.into(),
        }
    }

    /// Event name as the host reports it.
    pub fn name(&self) -> &'static str {
        match self {
            TriggerEvent::Schedule { .. } => "schedule",
            TriggerEvent::Push { .. } => "push",
            TriggerEvent::PullRequest { .. } => "pull_request",
        }
    }

    /// Ref name the gate is evaluated against.
    ///
    /// Scheduled ticks have no head ref, so this is empty by construction.
    pub fn gate_ref_name(&self) -> &str {
        match self {
            TriggerEvent::PullRequest { head_ref, .. } | TriggerEvent::Push { head_ref, .. } => {
                head_ref
            }
            TriggerEvent::Schedule { .. } => "",
        }
    }

    /// Build an event from the GitHub Actions environment.
    pub fn from_github_env() -> Result<Self, ConfigError> {
        Self::from_github_vars(|key| std::env::var(key).ok())
    }

    /// Build an event from a variable lookup.
    ///
    /// Reads `GITHUB_EVENT_NAME`, `GITHUB_REF_NAME`, `GITHUB_HEAD_REF` and
    /// `GITHUB_BASE_REF`.
    pub fn from_github_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let event_name = lookup("GITHUB_EVENT_NAME")
            .ok_or_else(|| ConfigError::MissingEnv("GITHUB_EVENT_NAME".to_string()))?;
        let ref_name = lookup("GITHUB_REF_NAME").unwrap_or_default();

        match event_name.as_str() {
            "schedule" => Ok(Self::schedule(ref_name)),
            "push" => Ok(Self::push_with_head_ref(
                ref_name,
                lookup("GITHUB_HEAD_REF").unwrap_or_default(),
            )),
            "pull_request" => Ok(Self::pull_request(
                lookup("GITHUB_HEAD_REF").unwrap_or_default(),
                lookup("GITHUB_BASE_REF").unwrap_or_default(),
            )),
            other => Err(ConfigError::UnknownEvent(other.to_string())),
        }
    }
}

impl std::fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerEvent::Schedule { branch } => write!(f, "schedule ({})", branch),
            TriggerEvent::Push { branch, .. } => write!(f, "push to {}", branch),
            TriggerEvent::PullRequest { head_ref, base_ref } => {
                write!(f, "pull request {} -> {}", head_ref, base_ref)
            }
        }
    }
}

/// Event-level filter evaluated before the gate.
///
/// Scheduled ticks and pull requests always pass; pushes pass only for the
/// configured branch.
#[derive(Debug, Clone)]
pub struct TriggerFilter {
    push_branch: String,
}

impl TriggerFilter {
    pub fn new(push_branch: impl Into<String>) -> Self {
        Self {
            push_branch: push_branch.into(),
        }
    }

    pub fn accepts(&self, event: &TriggerEvent) -> bool {
        match event {
            TriggerEvent::Schedule { .. } | TriggerEvent::PullRequest { .. } => true,
            TriggerEvent::Push { branch, .. } => *branch == self.push_branch,
        }
    }
}
