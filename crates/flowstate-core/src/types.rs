use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const STATE_VERSION: &str = "1.0.0";

// ---------------------------------------------------------------------------
// WorkflowType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowType {
    NewProject,
    ExistingProject,
}

impl WorkflowType {
    pub fn all() -> &'static [WorkflowType] {
        &[WorkflowType::NewProject, WorkflowType::ExistingProject]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowType::NewProject => "new-project",
            WorkflowType::ExistingProject => "existing-project",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new-project" | "new" => Ok(WorkflowType::NewProject),
            "existing-project" | "existing" => Ok(WorkflowType::ExistingProject),
            _ => Err(crate::error::Error::InvalidInput(format!(
                "unknown workflow type '{s}': must be new-project or existing-project"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Active,
    /// Sequential phases are done; operational phases are unlocked.
    SequentialComplete,
    Completed,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Active => "active",
            WorkflowStatus::SequentialComplete => "sequential_complete",
            WorkflowStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Agents in a phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Pending,
    Working,
    Completed,
    Failed,
    Skipped,
}

impl AgentStatus {
    pub fn icon(self) -> &'static str {
        match self {
            AgentStatus::Pending => "○",
            AgentStatus::Working => "◐",
            AgentStatus::Completed => "●",
            AgentStatus::Failed => "✗",
            AgentStatus::Skipped => "–",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Working => "working",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAgent {
    pub name: String,
    pub status: AgentStatus,
    pub icon: String,
}

impl ActiveAgent {
    pub fn new(name: impl Into<String>, status: AgentStatus) -> Self {
        Self {
            name: name.into(),
            status,
            icon: status.icon().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedAgent {
    pub name: String,
    pub phase: Option<String>,
    pub reason: String,
    pub skipped_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// PhaseDetails
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseDetails {
    #[serde(default)]
    pub progress_percentage: f64,
    #[serde(default)]
    pub documents_created: u32,
    #[serde(default)]
    pub documents_total: u32,
    #[serde(default)]
    pub active_agents: Vec<ActiveAgent>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Minutes.
    #[serde(default)]
    pub estimated_time_remaining: Option<u32>,
}

impl PhaseDetails {
    pub fn starting(at: DateTime<Utc>, estimate_minutes: Option<u32>) -> Self {
        Self {
            started_at: Some(at),
            estimated_time_remaining: estimate_minutes,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Approval gates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalGateState {
    pub approved: bool,
    #[serde(default)]
    pub approval_requested_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    pub timeout_minutes: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ApprovalGateState {
    pub fn pending(timeout_minutes: u32) -> Self {
        Self {
            approved: false,
            approval_requested_at: None,
            approved_at: None,
            approved_by: None,
            timeout_minutes,
            metadata: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoint index / metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckpointIndex {
    #[serde(default)]
    pub last_save: Option<DateTime<Utc>>,
    #[serde(default)]
    pub phase_checkpoints: BTreeMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub documents_created: u32,
    #[serde(default)]
    pub decisions_made: u32,
    #[serde(default)]
    pub approvals_obtained: u32,
    #[serde(default)]
    pub phases_completed: u32,
}

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(default = "default_version")]
    pub version: String,
    pub workflow_id: String,
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub status: WorkflowStatus,
    pub current_phase: Option<String>,
    pub phase_index: usize,
    pub phases_completed: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub phase_summaries: BTreeMap<String, String>,
    #[serde(default)]
    pub phase_details: PhaseDetails,
    pub approval_gates: BTreeMap<String, ApprovalGateState>,
    pub awaiting_approval: Option<String>,
    #[serde(default)]
    pub checkpoints: CheckpointIndex,
    #[serde(default)]
    pub metrics: Metrics,
    pub can_resume: bool,
    #[serde(default)]
    pub recovery_in_progress: bool,
    #[serde(default)]
    pub parallel_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operational_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_agents: Vec<SkippedAgent>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

fn default_version() -> String {
    STATE_VERSION.to_string()
}

impl WorkflowState {
    /// A workflow blocks a new `start` until it is explicitly completed.
    pub fn is_active(&self) -> bool {
        self.status != WorkflowStatus::Completed
    }

    pub fn is_awaiting_approval(&self) -> bool {
        self.awaiting_approval.is_some()
    }

    pub fn has_completed(&self, phase: &str) -> bool {
        self.phases_completed.iter().any(|p| p == phase)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
