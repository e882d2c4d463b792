use crate::recovery::{ErrorKind, InterventionReport};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no workflow state found: run 'flowstate start'")]
    NotInitialized,

    #[error("workflow {0} is still active: finish it or start with --force")]
    WorkflowActive(String),

    #[error("invalid phase: {0}")]
    InvalidPhase(String),

    #[error("unknown approval gate: {0}")]
    UnknownGate(String),

    #[error("no approval pending for gate '{gate}'")]
    NoApprovalPending {
        gate: String,
        pending: Option<String>,
    },

    #[error("workflow is awaiting approval for gate '{0}'")]
    AwaitingApproval(String),

    #[error("cannot resume: {0}")]
    CannotResume(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("state corruption in {file}: {reason}")]
    StateCorruption { file: String, reason: String },

    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("backup not found: {0}")]
    BackupNotFound(String),

    #[error("agent '{agent}' failed: {reason}")]
    AgentFailure {
        agent: String,
        reason: String,
        critical: bool,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("file conflict: '{path}' is owned by agent '{owner}', requested by '{requested_by}'")]
    FileConflict {
        path: String,
        owner: String,
        requested_by: String,
    },

    #[error("preflight failed: {0}")]
    PreflightFailed(String),

    #[error("Recovery failed for {kind}: {reason}")]
    RecoveryFailed { kind: ErrorKind, reason: String },

    #[error("manual intervention required: {}", .0.summary)]
    ManualIntervention(Box<InterventionReport>),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
