//! Read-only views over approval gates. Timeouts are advisory: nothing
//! here changes state, the operator decides what to do with a timed-out
//! gate.

use crate::graph::PhaseGraph;
use crate::types::WorkflowState;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeoutReport {
    pub gate: String,
    pub requested_at: Option<DateTime<Utc>>,
    pub elapsed_minutes: i64,
    pub timeout_minutes: u32,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateView {
    pub name: String,
    pub after: String,
    pub before: String,
    pub approved: bool,
    pub pending: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub timeout_minutes: u32,
}

/// Timeout verdict for the pending gate, if any.
pub fn check_approval_timeouts(state: &WorkflowState, now: DateTime<Utc>) -> Option<TimeoutReport> {
    let gate = state.awaiting_approval.as_ref()?;
    let entry = state.approval_gates.get(gate);
    let requested_at = entry.and_then(|g| g.approval_requested_at);
    let timeout_minutes = entry.map(|g| g.timeout_minutes).unwrap_or(0);
    let elapsed_minutes = requested_at
        .map(|at| (now - at).num_minutes().max(0))
        .unwrap_or(0);
    let timed_out = requested_at.is_some() && elapsed_minutes > i64::from(timeout_minutes);
    if timed_out {
        tracing::warn!(gate = %gate, elapsed_minutes, timeout_minutes, "approval gate timed out");
    }
    Some(TimeoutReport {
        gate: gate.clone(),
        requested_at,
        elapsed_minutes,
        timeout_minutes,
        timed_out,
    })
}

/// Every gate of the graph joined with its recorded state.
pub fn gate_views(state: &WorkflowState, graph: &PhaseGraph) -> Vec<GateView> {
    graph
        .approval_gates
        .iter()
        .map(|(name, def)| {
            let recorded = state.approval_gates.get(name);
            GateView {
                name: name.clone(),
                after: def.after.clone(),
                before: def.before.clone(),
                approved: recorded.is_some_and(|g| g.approved),
                pending: state.awaiting_approval.as_deref() == Some(name.as_str()),
                approved_by: recorded.and_then(|g| g.approved_by.clone()),
                approved_at: recorded.and_then(|g| g.approved_at),
                timeout_minutes: recorded
                    .map(|g| g.timeout_minutes)
                    .unwrap_or(def.timeout_minutes),
            }
        })
        .collect()
}
