//! Pure workflow transitions: `(state, event) -> state`.
//!
//! Nothing in this module touches the filesystem. [`crate::workflow`] wraps
//! [`apply`] with load, validate, persist and checkpoint.

use crate::error::{Error, Result};
use crate::graph::PhaseGraph;
use crate::types::{
    ActiveAgent, ApprovalGateState, CheckpointIndex, Metrics, PhaseDetails, SkippedAgent,
    WorkflowState, WorkflowStatus, WorkflowType, STATE_VERSION,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Partial update merged into `phase_details`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    #[serde(default)]
    pub documents_created: Option<u32>,
    #[serde(default)]
    pub documents_total: Option<u32>,
    #[serde(default)]
    pub active_agents: Option<Vec<ActiveAgent>>,
    #[serde(default)]
    pub estimated_time_remaining: Option<u32>,
    #[serde(default)]
    pub progress_percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    CompletePhase {
        summary: Option<String>,
    },
    ApproveGate {
        gate: String,
        approved_by: Option<String>,
        metadata: BTreeMap<String, serde_json::Value>,
    },
    UpdateProgress(ProgressUpdate),
    ResetPhase,
    SkipAgent {
        agent: String,
        reason: String,
    },
    BeginRecovery,
    EndRecovery,
    SelectOperationalPhase {
        phase: String,
    },
    CompleteWorkflow,
    DecisionRecorded,
    MarkCheckpoint,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Advanced { from: String, to: String },
    AwaitingApproval { phase: String, gate: String },
    /// Sequential phases finished; operational phases are unlocked.
    SequentialComplete { last_phase: String },
    GateApproved { gate: String, next_phase: String },
    ProgressUpdated { progress_percentage: f64 },
    PhaseReset { phase: Option<String> },
    AgentSkipped { agent: String },
    RecoveryStarted,
    RecoveryEnded,
    OperationalPhaseSelected { phase: String },
    WorkflowCompleted,
    DecisionRecorded,
    CheckpointMarked,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub state: WorkflowState,
    pub outcome: Outcome,
}

// ---------------------------------------------------------------------------
// Initial state
// ---------------------------------------------------------------------------

pub fn initial_state(
    workflow_type: WorkflowType,
    graph: &PhaseGraph,
    parallel_mode: bool,
    now: DateTime<Utc>,
) -> WorkflowState {
    let first = graph.first_phase().map(str::to_string);
    let approval_gates = graph
        .approval_gates
        .iter()
        .map(|(name, def)| (name.clone(), ApprovalGateState::pending(def.timeout_minutes)))
        .collect();
    let estimate = first.as_deref().and_then(|p| graph.duration(p));

    WorkflowState {
        version: STATE_VERSION.to_string(),
        workflow_id: format!("wf-{}", uuid::Uuid::new_v4()),
        workflow_type,
        status: WorkflowStatus::Active,
        current_phase: first,
        phase_index: 0,
        phases_completed: Vec::new(),
        phase_summaries: BTreeMap::new(),
        phase_details: PhaseDetails::starting(now, estimate),
        approval_gates,
        awaiting_approval: None,
        checkpoints: CheckpointIndex::default(),
        metrics: Metrics::default(),
        can_resume: true,
        recovery_in_progress: false,
        parallel_mode,
        operational_phase: None,
        skipped_agents: Vec::new(),
        created_at: now,
        last_updated: now,
    }
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Compute the state that follows `event`. The input is never modified; on
/// error no new state exists.
pub fn apply(
    state: &WorkflowState,
    graph: &PhaseGraph,
    event: WorkflowEvent,
    now: DateTime<Utc>,
) -> Result<Transition> {
    if state.status == WorkflowStatus::Completed {
        return Err(Error::InvalidTransition(format!(
            "workflow {} is completed",
            state.workflow_id
        )));
    }

    let mut next = state.clone();
    let outcome = match event {
        WorkflowEvent::CompletePhase { summary } => complete_phase(&mut next, graph, summary, now)?,
        WorkflowEvent::ApproveGate {
            gate,
            approved_by,
            metadata,
        } => approve_gate(&mut next, graph, &gate, approved_by, metadata, now)?,
        WorkflowEvent::UpdateProgress(update) => update_progress(&mut next, update)?,
        WorkflowEvent::ResetPhase => {
            next.phase_details.progress_percentage = 0.0;
            next.phase_details.documents_created = 0;
            next.phase_details.started_at = Some(now);
            next.awaiting_approval = None;
            next.can_resume = true;
            Outcome::PhaseReset {
                phase: next.current_phase.clone(),
            }
        }
        WorkflowEvent::SkipAgent { agent, reason } => {
            next.phase_details.active_agents.retain(|a| a.name != agent);
            next.skipped_agents.push(SkippedAgent {
                name: agent.clone(),
                phase: next.current_phase.clone(),
                reason,
                skipped_at: now,
            });
            Outcome::AgentSkipped { agent }
        }
        WorkflowEvent::BeginRecovery => {
            next.recovery_in_progress = true;
            next.can_resume = false;
            Outcome::RecoveryStarted
        }
        WorkflowEvent::EndRecovery => {
            next.recovery_in_progress = false;
            next.can_resume = next.awaiting_approval.is_none();
            Outcome::RecoveryEnded
        }
        WorkflowEvent::SelectOperationalPhase { phase } => {
            if next.status != WorkflowStatus::SequentialComplete {
                return Err(Error::InvalidTransition(
                    "operational phases unlock after the sequential phases complete".to_string(),
                ));
            }
            if !graph.is_operational(&phase) {
                return Err(Error::InvalidPhase(format!(
                    "'{phase}' is not an operational phase of {}",
                    next.workflow_type
                )));
            }
            next.operational_phase = Some(phase.clone());
            next.phase_details = PhaseDetails::starting(now, None);
            Outcome::OperationalPhaseSelected { phase }
        }
        WorkflowEvent::CompleteWorkflow => {
            if next.status != WorkflowStatus::SequentialComplete {
                return Err(Error::InvalidTransition(
                    "sequential phases are not complete".to_string(),
                ));
            }
            next.status = WorkflowStatus::Completed;
            next.can_resume = false;
            Outcome::WorkflowCompleted
        }
        WorkflowEvent::DecisionRecorded => {
            next.metrics.decisions_made += 1;
            Outcome::DecisionRecorded
        }
        WorkflowEvent::MarkCheckpoint => {
            next.checkpoints.last_save = Some(now);
            if let Some(phase) = &next.current_phase {
                next.checkpoints.phase_checkpoints.insert(phase.clone(), now);
            }
            Outcome::CheckpointMarked
        }
    };

    next.last_updated = now;
    Ok(Transition {
        state: next,
        outcome,
    })
}

fn complete_phase(
    state: &mut WorkflowState,
    graph: &PhaseGraph,
    summary: Option<String>,
    now: DateTime<Utc>,
) -> Result<Outcome> {
    if let Some(gate) = &state.awaiting_approval {
        return Err(Error::AwaitingApproval(gate.clone()));
    }
    let phase = state
        .current_phase
        .clone()
        .ok_or_else(|| Error::InvalidTransition("no sequential phase is in progress".to_string()))?;
    let position = graph.position(&phase).ok_or_else(|| {
        Error::InvalidPhase(format!(
            "'{phase}' is not part of the {} phase graph",
            state.workflow_type
        ))
    })?;
    if position != state.phase_index {
        return Err(Error::InvalidPhase(format!(
            "phase_index {} does not match position {position} of '{phase}'",
            state.phase_index
        )));
    }

    if !state.has_completed(&phase) {
        state.phases_completed.push(phase.clone());
    }
    state.metrics.phases_completed = state.phases_completed.len() as u32;
    if let Some(summary) = summary.filter(|s| !s.trim().is_empty()) {
        state.phase_summaries.insert(phase.clone(), summary);
    }
    state.phase_details.progress_percentage = 100.0;
    state.phase_details.estimated_time_remaining = Some(0);

    if let Some((gate_name, def)) = graph.gate_after(&phase) {
        let gate = state
            .approval_gates
            .entry(gate_name.to_string())
            .or_insert_with(|| ApprovalGateState::pending(def.timeout_minutes));
        gate.approval_requested_at = Some(now);
        state.awaiting_approval = Some(gate_name.to_string());
        state.can_resume = false;
        tracing::info!(phase = %phase, gate = %gate_name, "phase complete, awaiting approval");
        return Ok(Outcome::AwaitingApproval {
            phase,
            gate: gate_name.to_string(),
        });
    }

    match graph.next_phase(&phase) {
        Some(to) => {
            enter_phase(state, graph, to, position + 1, now);
            tracing::info!(from = %phase, to = %to, "phase advanced");
            Ok(Outcome::Advanced {
                from: phase,
                to: to.to_string(),
            })
        }
        None => {
            state.current_phase = None;
            state.phase_index = graph.len();
            state.status = WorkflowStatus::SequentialComplete;
            tracing::info!(last = %phase, "sequential phases complete");
            Ok(Outcome::SequentialComplete { last_phase: phase })
        }
    }
}

fn approve_gate(
    state: &mut WorkflowState,
    graph: &PhaseGraph,
    gate: &str,
    approved_by: Option<String>,
    metadata: BTreeMap<String, serde_json::Value>,
    now: DateTime<Utc>,
) -> Result<Outcome> {
    if state.awaiting_approval.as_deref() != Some(gate) {
        return Err(Error::NoApprovalPending {
            gate: gate.to_string(),
            pending: state.awaiting_approval.clone(),
        });
    }
    let def = graph
        .gate(gate)
        .ok_or_else(|| Error::UnknownGate(gate.to_string()))?;
    let position = graph
        .position(&def.before)
        .ok_or_else(|| Error::InvalidPhase(def.before.clone()))?;

    let entry = state
        .approval_gates
        .entry(gate.to_string())
        .or_insert_with(|| ApprovalGateState::pending(def.timeout_minutes));
    entry.approved = true;
    entry.approved_at = Some(now);
    entry.approved_by = approved_by;
    entry.metadata.extend(metadata);

    state.awaiting_approval = None;
    state.can_resume = !state.recovery_in_progress;
    state.metrics.approvals_obtained += 1;
    enter_phase(state, graph, &def.before, position, now);
    tracing::info!(gate = %gate, next = %def.before, "approval gate passed");

    Ok(Outcome::GateApproved {
        gate: gate.to_string(),
        next_phase: def.before.clone(),
    })
}

fn enter_phase(
    state: &mut WorkflowState,
    graph: &PhaseGraph,
    phase: &str,
    index: usize,
    now: DateTime<Utc>,
) {
    state.current_phase = Some(phase.to_string());
    state.phase_index = index;
    state.phase_details = PhaseDetails::starting(now, graph.duration(phase));
}

fn update_progress(state: &mut WorkflowState, update: ProgressUpdate) -> Result<Outcome> {
    if let Some(pct) = update.progress_percentage {
        if !pct.is_finite() || !(0.0..=100.0).contains(&pct) {
            return Err(Error::InvalidInput(format!(
                "progress_percentage must be within 0..=100, got {pct}"
            )));
        }
    }

    let details = &mut state.phase_details;
    if let Some(created) = update.documents_created {
        if created > details.documents_created {
            state.metrics.documents_created += created - details.documents_created;
        }
        details.documents_created = created;
    }
    if let Some(total) = update.documents_total {
        details.documents_total = total;
    }
    if let Some(agents) = update.active_agents {
        details.active_agents = agents;
    }
    if let Some(eta) = update.estimated_time_remaining {
        details.estimated_time_remaining = Some(eta);
    }
    if let Some(pct) = update.progress_percentage {
        details.progress_percentage = pct;
    }

    let touched_documents = update.documents_created.is_some() || update.documents_total.is_some();
    if touched_documents && details.documents_total > 0 {
        let pct = f64::from(details.documents_created) / f64::from(details.documents_total) * 100.0;
        details.progress_percentage = pct.clamp(0.0, 100.0);
    }

    Ok(Outcome::ProgressUpdated {
        progress_percentage: details.progress_percentage,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentStatus;

    fn new_project() -> (WorkflowState, PhaseGraph) {
        let graph = PhaseGraph::default_for(WorkflowType::NewProject);
        let state = initial_state(WorkflowType::NewProject, &graph, false, Utc::now());
        (state, graph)
    }

    fn step(state: &WorkflowState, graph: &PhaseGraph, event: WorkflowEvent) -> WorkflowState {
        apply(state, graph, event, Utc::now()).unwrap().state
    }

    fn complete(state: &WorkflowState, graph: &PhaseGraph) -> WorkflowState {
        step(state, graph, WorkflowEvent::CompletePhase { summary: None })
    }

    fn approve(gate: &str) -> WorkflowEvent {
        WorkflowEvent::ApproveGate {
            gate: gate.to_string(),
            approved_by: Some("lead".to_string()),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn initializes_at_first_phase() {
        let (state, graph) = new_project();
        assert_eq!(state.current_phase.as_deref(), graph.first_phase());
        assert_eq!(state.phase_index, 0);
        assert!(state.phases_completed.is_empty());
        assert!(state.workflow_id.starts_with("wf-"));
        assert_eq!(state.approval_gates.len(), 2);
        assert!(state.approval_gates.values().all(|g| !g.approved));
    }

    #[test]
    fn completing_a_phase_advances() {
        let (state, graph) = new_project();
        let t = apply(
            &state,
            &graph,
            WorkflowEvent::CompletePhase {
                summary: Some("stakeholders interviewed".to_string()),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(
            t.outcome,
            Outcome::Advanced {
                from: "discovery".to_string(),
                to: "research".to_string()
            }
        );
        assert_eq!(t.state.current_phase.as_deref(), Some("research"));
        assert_eq!(t.state.phase_index, 1);
        assert_eq!(t.state.phases_completed, ["discovery"]);
        assert_eq!(t.state.metrics.phases_completed, 1);
        assert_eq!(
            t.state.phase_summaries["discovery"],
            "stakeholders interviewed"
        );
        // the input state is untouched
        assert_eq!(state.phase_index, 0);
    }

    #[test]
    fn completing_phase_before_gate_blocks() {
        let (state, graph) = new_project();
        let state = complete(&state, &graph);
        let state = complete(&state, &graph);
        assert_eq!(state.awaiting_approval.as_deref(), Some("post-research"));
        assert!(!state.can_resume);
        assert!(state.approval_gates["post-research"]
            .approval_requested_at
            .is_some());
        assert!(state.phase_index <= state.phases_completed.len());
    }

    #[test]
    fn approving_gate_advances_to_before_phase() {
        let (state, graph) = new_project();
        let state = complete(&complete(&state, &graph), &graph);
        let state = step(&state, &graph, approve("post-research"));
        assert_eq!(state.awaiting_approval, None);
        assert_eq!(state.current_phase.as_deref(), Some("architecture"));
        assert_eq!(state.phase_index, 2);
        assert!(state.can_resume);
        assert!(state.approval_gates["post-research"].approved);
        assert_eq!(state.metrics.approvals_obtained, 1);
    }

    #[test]
    fn approving_wrong_gate_fails_without_change() {
        let (state, graph) = new_project();
        let blocked = complete(&complete(&state, &graph), &graph);
        let err = apply(&blocked, &graph, approve("wrong-gate"), Utc::now()).unwrap_err();
        assert!(err.to_string().contains("no approval pending"));
        assert_eq!(blocked.awaiting_approval.as_deref(), Some("post-research"));
    }

    #[test]
    fn approving_with_nothing_pending_fails() {
        let (state, graph) = new_project();
        let err = apply(&state, &graph, approve("post-research"), Utc::now()).unwrap_err();
        assert!(matches!(err, Error::NoApprovalPending { pending: None, .. }));
    }

    #[test]
    fn cannot_complete_while_awaiting_approval() {
        let (state, graph) = new_project();
        let blocked = complete(&complete(&state, &graph), &graph);
        let err = apply(
            &blocked,
            &graph,
            WorkflowEvent::CompletePhase { summary: None },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::AwaitingApproval(_)));
    }

    #[test]
    fn walking_every_phase_reaches_sequential_complete() {
        let (mut state, graph) = new_project();
        for _ in 0..20 {
            if state.status == WorkflowStatus::SequentialComplete {
                break;
            }
            state = match state.awaiting_approval.clone() {
                Some(gate) => step(&state, &graph, approve(&gate)),
                None => complete(&state, &graph),
            };
        }
        assert_eq!(state.status, WorkflowStatus::SequentialComplete);
        assert_eq!(state.current_phase, None);
        assert_eq!(state.phases_completed.len(), graph.len());
        assert_eq!(state.phase_index, graph.len());
        assert_eq!(state.metrics.approvals_obtained, 2);

        let state = step(
            &state,
            &graph,
            WorkflowEvent::SelectOperationalPhase {
                phase: "maintenance".to_string(),
            },
        );
        assert_eq!(state.operational_phase.as_deref(), Some("maintenance"));
        let state = step(&state, &graph, WorkflowEvent::CompleteWorkflow);
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert!(apply(&state, &graph, WorkflowEvent::ResetPhase, Utc::now()).is_err());
    }

    #[test]
    fn operational_phase_requires_sequential_completion() {
        let (state, graph) = new_project();
        let err = apply(
            &state,
            &graph,
            WorkflowEvent::SelectOperationalPhase {
                phase: "maintenance".to_string(),
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition(_)));
    }

    #[test]
    fn inconsistent_phase_index_is_invalid_phase() {
        let (mut state, graph) = new_project();
        state.phase_index = 3;
        let err = apply(
            &state,
            &graph,
            WorkflowEvent::CompletePhase { summary: None },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidPhase(_)));
    }

    #[test]
    fn progress_recomputed_from_documents() {
        let (state, graph) = new_project();
        let state = step(
            &state,
            &graph,
            WorkflowEvent::UpdateProgress(ProgressUpdate {
                documents_created: Some(3),
                documents_total: Some(4),
                ..ProgressUpdate::default()
            }),
        );
        assert_eq!(state.phase_details.progress_percentage, 75.0);
        assert_eq!(state.metrics.documents_created, 3);

        let state = step(
            &state,
            &graph,
            WorkflowEvent::UpdateProgress(ProgressUpdate {
                documents_created: Some(4),
                ..ProgressUpdate::default()
            }),
        );
        assert_eq!(state.phase_details.progress_percentage, 100.0);
        assert_eq!(state.metrics.documents_created, 4);
    }

    #[test]
    fn progress_out_of_range_is_rejected() {
        let (state, graph) = new_project();
        let result = apply(
            &state,
            &graph,
            WorkflowEvent::UpdateProgress(ProgressUpdate {
                progress_percentage: Some(140.0),
                ..ProgressUpdate::default()
            }),
            Utc::now(),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn reset_phase_zeroes_progress_and_unblocks() {
        let (state, graph) = new_project();
        let mut state = complete(&complete(&state, &graph), &graph);
        state.phase_details.documents_created = 7;
        let state = step(&state, &graph, WorkflowEvent::ResetPhase);
        assert_eq!(state.phase_details.progress_percentage, 0.0);
        assert_eq!(state.phase_details.documents_created, 0);
        assert_eq!(state.awaiting_approval, None);
        assert!(state.can_resume);
    }

    #[test]
    fn skip_agent_moves_it_to_audit_list() {
        let (mut state, graph) = new_project();
        state.phase_details.active_agents = vec![
            ActiveAgent::new("business-analyst", AgentStatus::Working),
            ActiveAgent::new("technical-researcher", AgentStatus::Failed),
        ];
        let state = step(
            &state,
            &graph,
            WorkflowEvent::SkipAgent {
                agent: "technical-researcher".to_string(),
                reason: "timed out".to_string(),
            },
        );
        assert_eq!(state.phase_details.active_agents.len(), 1);
        assert_eq!(state.skipped_agents[0].name, "technical-researcher");
        assert_eq!(state.skipped_agents[0].phase.as_deref(), Some("discovery"));
    }

    #[test]
    fn recovery_blocks_resume_until_ended() {
        let (state, graph) = new_project();
        let state = step(&state, &graph, WorkflowEvent::BeginRecovery);
        assert!(!state.can_resume);
        assert!(state.recovery_in_progress);
        let state = step(&state, &graph, WorkflowEvent::EndRecovery);
        assert!(state.can_resume);
    }

    #[test]
    fn mark_checkpoint_records_phase_timestamp() {
        let (state, graph) = new_project();
        let state = step(&state, &graph, WorkflowEvent::MarkCheckpoint);
        assert!(state.checkpoints.last_save.is_some());
        assert!(state.checkpoints.phase_checkpoints.contains_key("discovery"));
    }
}
