use crate::graph::PhaseGraph;
use crate::types::{Metrics, WorkflowState, WorkflowStatus, WorkflowType};
use serde::Serialize;

const BAR_CELLS: usize = 20;

/// Read-only status snapshot for CLI and dashboard renderers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub active: bool,
    pub workflow_id: Option<String>,
    pub workflow_type: Option<WorkflowType>,
    pub status: Option<WorkflowStatus>,
    pub current_phase: Option<String>,
    pub operational_phase: Option<String>,
    pub phase_progress: f64,
    pub overall_progress: u32,
    pub phases_completed: usize,
    pub phases_total: usize,
    pub awaiting_approval: Option<String>,
    pub can_resume: bool,
    pub metrics: Metrics,
    /// Minutes.
    pub estimated_time_remaining: Option<u32>,
}

impl StatusReport {
    pub fn inactive() -> Self {
        Self {
            active: false,
            workflow_id: None,
            workflow_type: None,
            status: None,
            current_phase: None,
            operational_phase: None,
            phase_progress: 0.0,
            overall_progress: 0,
            phases_completed: 0,
            phases_total: 0,
            awaiting_approval: None,
            can_resume: false,
            metrics: Metrics::default(),
            estimated_time_remaining: None,
        }
    }

    pub fn from_state(state: &WorkflowState, graph: &PhaseGraph) -> Self {
        let total = graph.len();
        let completed = state.phases_completed.len();
        let overall = if total == 0 {
            0
        } else {
            ((completed as f64 / total as f64) * 100.0).round().min(100.0) as u32
        };
        let eta = match &state.current_phase {
            Some(phase) => {
                let current = state
                    .phase_details
                    .estimated_time_remaining
                    .or_else(|| graph.duration(phase))
                    .unwrap_or(0);
                Some(current + graph.remaining_minutes(state.phase_index + 1))
            }
            None => Some(0),
        };
        Self {
            active: state.is_active(),
            workflow_id: Some(state.workflow_id.clone()),
            workflow_type: Some(state.workflow_type),
            status: Some(state.status),
            current_phase: state.current_phase.clone(),
            operational_phase: state.operational_phase.clone(),
            phase_progress: state.phase_details.progress_percentage,
            overall_progress: overall,
            phases_completed: completed,
            phases_total: total,
            awaiting_approval: state.awaiting_approval.clone(),
            can_resume: state.can_resume,
            metrics: state.metrics.clone(),
            estimated_time_remaining: eta,
        }
    }
}

fn bar(percent: f64) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * BAR_CELLS as f64).round() as usize;
    format!(
        "[{}{}]",
        "█".repeat(filled),
        "░".repeat(BAR_CELLS - filled)
    )
}

fn duration(minutes: u32) -> String {
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}

/// Plain-text status display.
pub fn render(report: &StatusReport) -> String {
    let (Some(id), Some(workflow_type), Some(status)) =
        (&report.workflow_id, report.workflow_type, report.status)
    else {
        return "No active workflow. Run 'flowstate start <type>'.\n".to_string();
    };

    let mut out = format!("Workflow {id} ({workflow_type}) [{status}]\n");
    match (&report.current_phase, &report.operational_phase) {
        (Some(phase), _) => out.push_str(&format!(
            "Phase:     {phase} ({}/{})\n",
            (report.phases_completed + 1).min(report.phases_total),
            report.phases_total
        )),
        (None, Some(op)) => out.push_str(&format!("Phase:     {op} (operational)\n")),
        (None, None) => out.push_str("Phase:     sequential phases complete\n"),
    }
    out.push_str(&format!(
        "Phase      {} {:>3.0}%\n",
        bar(report.phase_progress),
        report.phase_progress
    ));
    out.push_str(&format!(
        "Overall    {} {:>3}%  ({}/{} phases)\n",
        bar(f64::from(report.overall_progress)),
        report.overall_progress,
        report.phases_completed,
        report.phases_total
    ));
    if let Some(gate) = &report.awaiting_approval {
        out.push_str(&format!(
            "Awaiting approval: {gate}  (flowstate approve {gate})\n"
        ));
    }
    let m = &report.metrics;
    out.push_str(&format!(
        "Metrics:   {} documents, {} decisions, {} approvals\n",
        m.documents_created, m.decisions_made, m.approvals_obtained
    ));
    if let Some(eta) = report.estimated_time_remaining.filter(|e| *e > 0) {
        out.push_str(&format!("Remaining: ~{}\n", duration(eta)));
    }
    out
}
