//! Error recovery: classify a failure, log it, then run the recovery
//! strategy its kind calls for.
//!
//! Every handled error is appended to `logs/errors.jsonl` and
//! `logs/errors.log` before any recovery is attempted. A strategy that
//! fails is re-raised as [`Error::RecoveryFailed`]; nothing is swallowed.

use crate::checkpoint::{CheckpointManager, CheckpointTrigger};
use crate::config::{Config, RecoveryConfig};
use crate::error::{Error, Result};
use crate::io;
use crate::machine::{self, WorkflowEvent};
use crate::paths;
use crate::store::StateStore;
use crate::types::WorkflowState;
use crate::validate::{self, ValidationReport, Validator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    StateCorruption,
    InvalidPhase,
    NetworkError,
    AgentFailure,
    ValidationError,
}

impl ErrorKind {
    pub fn all() -> &'static [ErrorKind] {
        &[
            ErrorKind::StateCorruption,
            ErrorKind::InvalidPhase,
            ErrorKind::NetworkError,
            ErrorKind::AgentFailure,
            ErrorKind::ValidationError,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::StateCorruption => "STATE_CORRUPTION",
            ErrorKind::InvalidPhase => "INVALID_PHASE",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::AgentFailure => "AGENT_FAILURE",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = Error;

    /// Accepts `STATE_CORRUPTION` as well as `state-corruption`.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        ErrorKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| Error::InvalidInput(format!("unknown error kind: {s}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(default)]
    pub critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// State-directory file the error concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub details: ErrorDetails,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    RestoreCheckpoint,
    ResetPhase,
    Retry,
    SkipAgent,
    RepairState,
    ManualIntervention,
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecoveryStrategy::RestoreCheckpoint => "restore_checkpoint",
            RecoveryStrategy::ResetPhase => "reset_phase",
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::SkipAgent => "skip_agent",
            RecoveryStrategy::RepairState => "repair_state",
            RecoveryStrategy::ManualIntervention => "manual_intervention",
        };
        f.write_str(s)
    }
}

impl WorkflowError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: ErrorDetails::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Pure function of kind and details.
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self.kind {
            ErrorKind::StateCorruption => RecoveryStrategy::RestoreCheckpoint,
            ErrorKind::InvalidPhase => RecoveryStrategy::ResetPhase,
            ErrorKind::NetworkError => RecoveryStrategy::Retry,
            ErrorKind::AgentFailure if self.details.critical => {
                RecoveryStrategy::ManualIntervention
            }
            ErrorKind::AgentFailure if self.details.agent.is_some() => RecoveryStrategy::SkipAgent,
            ErrorKind::AgentFailure => RecoveryStrategy::ManualIntervention,
            ErrorKind::ValidationError => match &self.details.file {
                Some(file) if validate::has_schema(file) => RecoveryStrategy::RepairState,
                _ => RecoveryStrategy::ManualIntervention,
            },
        }
    }
}

impl Error {
    /// Map a crate error onto the recovery taxonomy.
    pub fn classify(&self) -> WorkflowError {
        let mut details = ErrorDetails::default();
        let kind = match self {
            Error::StateCorruption { file, .. } => {
                details.file = Some(file.clone());
                ErrorKind::StateCorruption
            }
            Error::ChecksumMismatch(_) | Error::Json(_) => ErrorKind::StateCorruption,
            Error::InvalidPhase(_) => ErrorKind::InvalidPhase,
            Error::UnknownGate(gate) => {
                details.gate = Some(gate.clone());
                ErrorKind::InvalidPhase
            }
            Error::Network(_) | Error::Io(_) => ErrorKind::NetworkError,
            Error::AgentFailure {
                agent, critical, ..
            } => {
                details.agent = Some(agent.clone());
                details.critical = *critical;
                ErrorKind::AgentFailure
            }
            Error::FileConflict {
                path, requested_by, ..
            } => {
                details.agent = Some(requested_by.clone());
                details
                    .extra
                    .insert("path".to_string(), serde_json::Value::from(path.clone()));
                ErrorKind::AgentFailure
            }
            Error::NoApprovalPending { gate, .. } | Error::AwaitingApproval(gate) => {
                details.gate = Some(gate.clone());
                ErrorKind::ValidationError
            }
            Error::RecoveryFailed { kind, .. } => *kind,
            Error::ManualIntervention(report) => {
                details.agent = report.agent.clone();
                details.phase = report.phase.clone();
                details.gate = report.gate.clone();
                report.kind
            }
            Error::NotInitialized
            | Error::WorkflowActive(_)
            | Error::CannotResume(_)
            | Error::InvalidTransition(_)
            | Error::InvalidInput(_)
            | Error::CheckpointNotFound(_)
            | Error::BackupNotFound(_)
            | Error::PreflightFailed(_)
            | Error::InvalidConfig(_)
            | Error::Yaml(_) => ErrorKind::ValidationError,
        };
        WorkflowError::new(kind, self.to_string()).with_details(details)
    }
}

// ---------------------------------------------------------------------------
// Outcomes and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Restored {
        checkpoint_id: String,
        workflow_id: String,
    },
    PhaseReset {
        phase: Option<String>,
    },
    Retry {
        attempt: u32,
        delay_ms: u64,
    },
    AgentSkipped {
        agent: String,
    },
    Repaired {
        report: ValidationReport,
    },
}

/// Written to `logs/interventions/` when automated recovery is not possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionReport {
    pub summary: String,
    pub kind: ErrorKind,
    pub message: String,
    pub agent: Option<String>,
    pub phase: Option<String>,
    pub gate: Option<String>,
    pub suggested_command: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryContext {
    /// Attempts of the failed operation made so far.
    pub attempt: u32,
}

#[derive(Serialize)]
struct ErrorLogEntry<'a> {
    timestamp: DateTime<Utc>,
    kind: ErrorKind,
    message: &'a str,
    details: &'a ErrorDetails,
    strategy: RecoveryStrategy,
}

// ---------------------------------------------------------------------------
// RecoveryHandler
// ---------------------------------------------------------------------------

pub struct RecoveryHandler<'a> {
    root: &'a Path,
    config: &'a Config,
}

impl<'a> RecoveryHandler<'a> {
    pub fn new(root: &'a Path, config: &'a Config) -> Self {
        Self { root, config }
    }

    pub fn handle_workflow_error(
        &self,
        error: &WorkflowError,
        context: &RecoveryContext,
    ) -> Result<RecoveryOutcome> {
        let strategy = error.recovery_strategy();
        self.log_error(error, strategy)?;

        let result = match strategy {
            RecoveryStrategy::RestoreCheckpoint => self.restore_checkpoint(),
            RecoveryStrategy::ResetPhase => self.reset_phase(),
            RecoveryStrategy::Retry => self.retry(error, context),
            RecoveryStrategy::SkipAgent => self.skip_agent(error),
            RecoveryStrategy::RepairState => self.repair_state(error),
            RecoveryStrategy::ManualIntervention => Err(self.manual_intervention(error)?),
        };

        match result {
            Ok(outcome) => {
                tracing::info!(kind = %error.kind, strategy = %strategy, "recovered from workflow error");
                Ok(outcome)
            }
            Err(e @ Error::ManualIntervention(_)) => Err(e),
            Err(e) => {
                tracing::error!(kind = %error.kind, strategy = %strategy, error = %e, "recovery failed");
                Err(Error::RecoveryFailed {
                    kind: error.kind,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn log_error(&self, error: &WorkflowError, strategy: RecoveryStrategy) -> Result<()> {
        tracing::error!(
            kind = %error.kind,
            strategy = %strategy,
            agent = error.details.agent.as_deref().unwrap_or("-"),
            "{}",
            error.message
        );
        let logs = paths::logs_dir(self.root);
        let entry = ErrorLogEntry {
            timestamp: error.timestamp,
            kind: error.kind,
            message: &error.message,
            details: &error.details,
            strategy,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        io::append_text(&logs.join(paths::ERROR_LOG_JSON), &line)?;
        io::append_text(
            &logs.join(paths::ERROR_LOG_TEXT),
            &format!(
                "[{}] {}: {} (strategy: {strategy})\n",
                error.timestamp.to_rfc3339(),
                error.kind,
                error.message
            ),
        )
    }

    fn store(&self) -> StateStore {
        StateStore::new(self.root)
    }

    fn checkpoints(&self) -> CheckpointManager {
        CheckpointManager::new(self.root, &self.config.checkpoints)
    }

    /// Apply recovery events to the stored state and checkpoint the result.
    fn transition(&self, events: Vec<WorkflowEvent>) -> Result<WorkflowState> {
        let store = self.store();
        let mut state = store.load_workflow()?;
        let graph = self.config.graph_for(state.workflow_type);
        let now = Utc::now();
        for event in events {
            state = machine::apply(&state, &graph, event, now)?.state;
        }
        Validator::new(self.root, self.config).ensure_state(&state)?;
        store.save_workflow(&state)?;
        self.checkpoints()
            .create(&state, CheckpointTrigger::Recovery, None)?;
        Ok(state)
    }

    fn restore_checkpoint(&self) -> Result<RecoveryOutcome> {
        let store = self.store();
        let current = store.load_workflow().ok();
        if let Some(state) = &current {
            let graph = self.config.graph_for(state.workflow_type);
            if let Ok(t) = machine::apply(state, &graph, WorkflowEvent::BeginRecovery, Utc::now()) {
                store.save_workflow(&t.state)?;
            }
        }
        let expected = current.map(|s| s.workflow_id);
        let validator = Validator::new(self.root, self.config);

        let checkpoint = self
            .checkpoints()
            .latest_verified(|cp| {
                expected.as_deref().map_or(true, |id| cp.workflow_id == id)
                    && validator
                        .check_state(&cp.state)
                        .map(|issues| issues.is_empty())
                        .unwrap_or(false)
            })?
            .ok_or_else(|| {
                Error::CheckpointNotFound("no verified checkpoint to restore from".to_string())
            })?;

        let path = paths::workflow_state_path(self.root);
        if path.exists() {
            let now = Utc::now();
            let name = format!(
                "{}.backup-{}",
                paths::WORKFLOW_STATE_FILE,
                io::file_timestamp(now)
            );
            std::fs::copy(&path, path.with_file_name(name))?;
        }

        let mut state = checkpoint.state.clone();
        state.recovery_in_progress = false;
        state.last_updated = Utc::now().max(state.created_at);
        store.save_workflow(&state)?;
        tracing::info!(checkpoint = %checkpoint.id, workflow = %state.workflow_id, "state restored from checkpoint");
        Ok(RecoveryOutcome::Restored {
            checkpoint_id: checkpoint.id,
            workflow_id: state.workflow_id,
        })
    }

    fn reset_phase(&self) -> Result<RecoveryOutcome> {
        let state = self.transition(vec![
            WorkflowEvent::BeginRecovery,
            WorkflowEvent::ResetPhase,
            WorkflowEvent::EndRecovery,
        ])?;
        Ok(RecoveryOutcome::PhaseReset {
            phase: state.current_phase,
        })
    }

    fn retry(&self, error: &WorkflowError, context: &RecoveryContext) -> Result<RecoveryOutcome> {
        let attempt = context.attempt + 1;
        if attempt > self.config.recovery.max_retries {
            tracing::warn!(attempts = context.attempt, "retries exhausted");
            return Err(self.manual_intervention(error)?);
        }
        Ok(RecoveryOutcome::Retry {
            attempt,
            delay_ms: backoff_delay(&self.config.recovery, attempt).as_millis() as u64,
        })
    }

    fn skip_agent(&self, error: &WorkflowError) -> Result<RecoveryOutcome> {
        let agent = error
            .details
            .agent
            .clone()
            .ok_or_else(|| Error::InvalidInput("agent failure names no agent".to_string()))?;
        self.transition(vec![WorkflowEvent::SkipAgent {
            agent: agent.clone(),
            reason: error.message.clone(),
        }])?;
        Ok(RecoveryOutcome::AgentSkipped { agent })
    }

    fn repair_state(&self, error: &WorkflowError) -> Result<RecoveryOutcome> {
        let file = error
            .details
            .file
            .as_deref()
            .ok_or_else(|| Error::InvalidInput("validation error names no file".to_string()))?;
        let report = Validator::new(self.root, self.config).validate_file(file, true)?;
        if !report.valid {
            return Err(self.manual_intervention(error)?);
        }
        Ok(RecoveryOutcome::Repaired { report })
    }

    /// Write the intervention report and return the error that carries it.
    fn manual_intervention(&self, error: &WorkflowError) -> Result<Error> {
        let phase = error.details.phase.clone().or_else(|| {
            self.store()
                .load_workflow()
                .ok()
                .and_then(|s| s.current_phase)
        });
        let report = InterventionReport {
            summary: intervention_summary(error, phase.as_deref()),
            kind: error.kind,
            message: error.message.clone(),
            agent: error.details.agent.clone(),
            phase,
            gate: error.details.gate.clone(),
            suggested_command: suggested_command(error),
            created_at: Utc::now(),
        };
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let path = paths::interventions_dir(self.root).join(format!(
            "{}-{}.json",
            io::file_timestamp(report.created_at),
            &suffix[..8]
        ));
        io::write_json(&path, &report)?;
        tracing::warn!(path = %path.display(), "manual intervention required");
        Ok(Error::ManualIntervention(Box::new(report)))
    }
}

fn intervention_summary(error: &WorkflowError, phase: Option<&str>) -> String {
    let mut parts = vec![format!("{}: {}", error.kind, error.message)];
    if let Some(agent) = &error.details.agent {
        parts.push(format!("agent '{agent}'"));
    }
    if let Some(phase) = phase {
        parts.push(format!("phase '{phase}'"));
    }
    if let Some(gate) = &error.details.gate {
        parts.push(format!("gate '{gate}'"));
    }
    parts.join(", ")
}

fn suggested_command(error: &WorkflowError) -> String {
    let d = &error.details;
    match error.kind {
        ErrorKind::StateCorruption => "flowstate checkpoint list".to_string(),
        ErrorKind::InvalidPhase => "flowstate status".to_string(),
        ErrorKind::NetworkError => "flowstate resume".to_string(),
        ErrorKind::AgentFailure => match &d.agent {
            Some(agent) => format!("flowstate recover agent-failure --agent {agent}"),
            None => "flowstate status".to_string(),
        },
        ErrorKind::ValidationError => match (&d.gate, &d.file) {
            (Some(gate), _) => format!("flowstate approve {gate}"),
            (None, Some(_)) => "flowstate validate --repair".to_string(),
            (None, None) => "flowstate status".to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Exponential backoff: `base * 2^(attempt - 1)`.
pub fn backoff_delay(cfg: &RecoveryConfig, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(16);
    Duration::from_millis(cfg.retry_base_delay_ms.saturating_mul(factor))
}

/// Run `op` until it succeeds, retrying transient failures with backoff.
/// Non-transient errors are returned immediately.
pub fn retry_with_backoff<T>(
    cfg: &RecoveryConfig,
    mut op: impl FnMut(u32) -> Result<T>,
) -> Result<T> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if e.classify().kind == ErrorKind::NetworkError && attempt <= cfg.max_retries => {
                let delay = backoff_delay(cfg, attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                std::thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
