//! The workflow service: every state change goes through [`Workflow::mutate`],
//! which reads the state fresh from disk, applies a pure transition,
//! validates the result, persists it atomically and writes a checkpoint.

use crate::approval::{self, GateView, TimeoutReport};
use crate::backup::{BackupManager, BackupTrigger};
use crate::checkpoint::{Checkpoint, CheckpointManager, CheckpointTrigger};
use crate::config::Config;
use crate::decision::{Decision, DecisionLog};
use crate::error::{Error, Result};
use crate::io;
use crate::machine::{self, Outcome, ProgressUpdate, WorkflowEvent};
use crate::parallel::{self, AgentAssignment, WorkUnit};
use crate::paths;
use crate::preflight::{self, DescriptorProbe, PreflightReport};
use crate::recovery::{RecoveryContext, RecoveryHandler, RecoveryOutcome};
use crate::status::StatusReport;
use crate::store::StateStore;
use crate::types::{WorkflowState, WorkflowType};
use crate::validate::Validator;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    pub parallel_mode: bool,
    /// Replace a workflow that is still active.
    pub force: bool,
    pub skip_preflight: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartResult {
    pub state: WorkflowState,
    pub checkpoint_id: String,
    pub preflight: Option<PreflightReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub state: WorkflowState,
    pub outcome: Outcome,
    pub checkpoint_id: Option<String>,
    pub backup_id: Option<String>,
}

pub struct Workflow {
    root: PathBuf,
    config: Config,
    store: StateStore,
}

impl Workflow {
    /// Open the workflow rooted at `root`, loading `.flowstate/config.yaml`.
    pub fn open(root: &Path) -> Result<Self> {
        Ok(Self::with_config(root, Config::load(root)?))
    }

    pub fn with_config(root: &Path, config: Config) -> Self {
        Self {
            root: root.to_path_buf(),
            store: StateStore::new(root),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn checkpoints(&self) -> CheckpointManager {
        CheckpointManager::new(&self.root, &self.config.checkpoints)
    }

    pub fn backups(&self) -> BackupManager {
        BackupManager::new(&self.root, &self.config.backup)
    }

    pub fn validator(&self) -> Validator<'_> {
        Validator::new(&self.root, &self.config)
    }

    pub fn recovery(&self) -> RecoveryHandler<'_> {
        RecoveryHandler::new(&self.root, &self.config)
    }

    pub fn has_active_workflow(&self) -> Result<bool> {
        Ok(self.store.active_workflow()?.is_some())
    }

    pub fn load(&self) -> Result<WorkflowState> {
        self.store.load_workflow()
    }

    pub fn preflight(&self, workflow_type: WorkflowType) -> PreflightReport {
        let probe = DescriptorProbe::new(&self.root, &self.config.agents);
        preflight::run_preflight(workflow_type, &self.config.agents, &probe)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn start(&self, workflow_type: WorkflowType, options: StartOptions) -> Result<StartResult> {
        if let Some(existing) = self.store.active_workflow()? {
            if !options.force {
                return Err(Error::WorkflowActive(existing.workflow_id));
            }
            tracing::warn!(workflow = %existing.workflow_id, "replacing active workflow");
        }

        let graph = self.config.graph_for(workflow_type);
        let problems = graph.problems();
        if !problems.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "{workflow_type} phase graph: {}",
                problems.join("; ")
            )));
        }

        let preflight = if options.skip_preflight {
            None
        } else {
            let report = self.preflight(workflow_type);
            if !report.passed {
                return Err(Error::PreflightFailed(format!(
                    "required agents not ready: {}",
                    report.blocking().join(", ")
                )));
            }
            for warning in &report.warnings {
                tracing::warn!("{warning}");
            }
            Some(report)
        };

        let now = Utc::now();
        let state = machine::initial_state(workflow_type, &graph, options.parallel_mode, now);
        let state = machine::apply(&state, &graph, WorkflowEvent::MarkCheckpoint, now)?.state;
        self.ensure_valid(&state)?;
        io::ensure_dir(&paths::state_dir(&self.root))?;
        self.store.save_workflow(&state)?;
        let checkpoint = self
            .checkpoints()
            .create(&state, CheckpointTrigger::Initialized, None)?;
        tracing::info!(workflow = %state.workflow_id, workflow_type = %workflow_type, "workflow started");

        Ok(StartResult {
            state,
            checkpoint_id: checkpoint.id,
            preflight,
        })
    }

    pub fn complete_phase(&self, summary: Option<String>) -> Result<StepResult> {
        self.mutate(
            WorkflowEvent::CompletePhase { summary },
            Some(CheckpointTrigger::PhaseCompleted),
        )
    }

    pub fn approve_gate(
        &self,
        gate: &str,
        approved_by: Option<String>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<StepResult> {
        self.mutate(
            WorkflowEvent::ApproveGate {
                gate: gate.to_string(),
                approved_by,
                metadata,
            },
            Some(CheckpointTrigger::GateApproved),
        )
    }

    pub fn update_phase_progress(&self, update: ProgressUpdate) -> Result<StepResult> {
        self.mutate(WorkflowEvent::UpdateProgress(update), None)
    }

    /// Checkpoint the current state with an operator note.
    pub fn save_partial_state(&self, note: Option<String>) -> Result<Checkpoint> {
        let state = self.store.load_workflow()?;
        let graph = self.config.graph_for(state.workflow_type);
        let state = machine::apply(&state, &graph, WorkflowEvent::MarkCheckpoint, Utc::now())?.state;
        self.ensure_valid(&state)?;
        self.store.save_workflow(&state)?;
        self.checkpoints()
            .create(&state, CheckpointTrigger::PartialSave, note)
    }

    /// A read: the state to continue from, or why it cannot continue.
    pub fn resume_workflow(&self) -> Result<WorkflowState> {
        let state = self.store.load_workflow()?;
        if let Some(gate) = &state.awaiting_approval {
            return Err(Error::CannotResume(format!(
                "awaiting approval for gate '{gate}'"
            )));
        }
        if !state.can_resume {
            let reason = if state.recovery_in_progress {
                "recovery is in progress"
            } else {
                "workflow is not resumable"
            };
            return Err(Error::CannotResume(reason.to_string()));
        }
        Ok(state)
    }

    pub fn check_approval_timeouts(&self, now: DateTime<Utc>) -> Result<Option<TimeoutReport>> {
        let state = self.store.load_workflow()?;
        Ok(approval::check_approval_timeouts(&state, now))
    }

    pub fn gates(&self) -> Result<Vec<GateView>> {
        let state = self.store.load_workflow()?;
        Ok(approval::gate_views(
            &state,
            &self.config.graph_for(state.workflow_type),
        ))
    }

    pub fn select_operational_phase(&self, phase: &str) -> Result<StepResult> {
        self.mutate(
            WorkflowEvent::SelectOperationalPhase {
                phase: phase.to_string(),
            },
            Some(CheckpointTrigger::Manual),
        )
    }

    pub fn complete_workflow(&self) -> Result<StepResult> {
        self.mutate(WorkflowEvent::CompleteWorkflow, Some(CheckpointTrigger::Manual))
    }

    pub fn status(&self) -> Result<StatusReport> {
        Ok(match self.store.read::<WorkflowState>(paths::WORKFLOW_STATE_FILE)? {
            Some(state) => {
                StatusReport::from_state(&state, &self.config.graph_for(state.workflow_type))
            }
            None => StatusReport::inactive(),
        })
    }

    /// Append to the decision log and count it against the active workflow.
    pub fn record_decision(
        &self,
        title: &str,
        rationale: Option<String>,
        decided_by: Option<String>,
    ) -> Result<Decision> {
        let active = self.store.active_workflow()?;
        let phase = active.as_ref().and_then(|s| {
            s.current_phase
                .clone()
                .or_else(|| s.operational_phase.clone())
        });
        let mut log = DecisionLog::load(&self.store)?;
        let decision = log
            .record(title, rationale, phase, decided_by, Utc::now())?
            .clone();
        if active.is_some() {
            self.mutate(WorkflowEvent::DecisionRecorded, None)?;
        }
        log.save(&self.store)?;
        Ok(decision)
    }

    /// Replace the current state with a verified checkpoint.
    pub fn restore_checkpoint(&self, id: &str) -> Result<WorkflowState> {
        let checkpoint = self.checkpoints().load(id)?;
        let mut state = checkpoint.state;
        self.ensure_valid(&state)?;
        state.recovery_in_progress = false;
        state.last_updated = Utc::now().max(state.created_at);
        self.store.save_workflow(&state)?;
        tracing::info!(checkpoint = %id, workflow = %state.workflow_id, "checkpoint restored");
        Ok(state)
    }

    /// Classify `error` and run its recovery strategy.
    pub fn recover(&self, error: &Error) -> Result<RecoveryOutcome> {
        self.recovery()
            .handle_workflow_error(&error.classify(), &RecoveryContext::default())
    }

    /// Split `units` across agents without sharing a file between two of
    /// them. An empty `agents` list means the workflow type's configured
    /// agents minus any skipped in this workflow.
    pub fn plan_parallel_work(
        &self,
        agents: &[String],
        units: Vec<WorkUnit>,
    ) -> Result<Vec<AgentAssignment>> {
        let state = self.store.active_workflow()?.ok_or(Error::NotInitialized)?;
        if !state.parallel_mode {
            return Err(Error::InvalidInput(format!(
                "workflow {} was not started in parallel mode",
                state.workflow_id
            )));
        }
        let agents: Vec<String> = if agents.is_empty() {
            self.config
                .agents
                .for_workflow(state.workflow_type)
                .iter()
                .filter(|r| !state.skipped_agents.iter().any(|s| s.name == r.name))
                .map(|r| r.name.clone())
                .collect()
        } else {
            agents.to_vec()
        };
        let plan = parallel::plan_assignments(&agents, units, &self.config.parallel)?;
        debug_assert!(parallel::is_conflict_free(&plan));
        Ok(plan)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn ensure_valid(&self, state: &WorkflowState) -> Result<()> {
        self.validator().ensure_state(state)
    }

    /// Load fresh, apply, validate, persist, checkpoint.
    fn mutate(
        &self,
        event: WorkflowEvent,
        checkpoint: Option<CheckpointTrigger>,
    ) -> Result<StepResult> {
        let state = self.store.load_workflow()?;
        let graph = self.config.graph_for(state.workflow_type);
        let now = Utc::now();

        let transition = machine::apply(&state, &graph, event, now)?;
        let outcome = transition.outcome;
        let mut next = transition.state;
        if checkpoint.is_some() {
            next = machine::apply(&next, &graph, WorkflowEvent::MarkCheckpoint, now)?.state;
        }
        self.ensure_valid(&next)?;
        self.store.save_workflow(&next)?;

        let checkpoint_id = match checkpoint {
            Some(trigger) => Some(self.checkpoints().create(&next, trigger, None)?.id),
            None => None,
        };
        let backup_id = if is_phase_transition(&outcome) {
            self.backup_on_transition(now)
        } else {
            None
        };

        Ok(StepResult {
            state: next,
            outcome,
            checkpoint_id,
            backup_id,
        })
    }

    fn backup_on_transition(&self, now: DateTime<Utc>) -> Option<String> {
        let backups = self.backups();
        let trigger = BackupTrigger::PhaseTransition;
        let result = backups
            .should_backup(&trigger, now)
            .and_then(|due| due.then(|| backups.create(trigger)).transpose());
        match result {
            Ok(manifest) => manifest.map(|m| m.id),
            Err(e) => {
                tracing::warn!(error = %e, "backup after phase transition failed");
                None
            }
        }
    }
}

fn is_phase_transition(outcome: &Outcome) -> bool {
    matches!(
        outcome,
        Outcome::Advanced { .. }
            | Outcome::AwaitingApproval { .. }
            | Outcome::GateApproved { .. }
            | Outcome::SequentialComplete { .. }
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkflowStatus;
    use tempfile::TempDir;

    fn skip() -> StartOptions {
        StartOptions {
            skip_preflight: true,
            ..StartOptions::default()
        }
    }

    fn workflow(dir: &TempDir) -> Workflow {
        Workflow::with_config(dir.path(), Config::default())
    }

    fn to_gate(wf: &Workflow) {
        wf.start(WorkflowType::NewProject, skip()).unwrap();
        wf.complete_phase(None).unwrap();
        wf.complete_phase(Some("market is real".to_string())).unwrap();
    }

    #[test]
    fn start_initializes_first_phase() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        let result = wf.start(WorkflowType::NewProject, skip()).unwrap();
        let state = wf.load().unwrap();
        assert_eq!(state, result.state);
        assert_eq!(state.current_phase.as_deref(), Some("discovery"));
        assert_eq!(state.phase_index, 0);
        assert!(state.phases_completed.is_empty());
        assert_eq!(state.approval_gates.len(), 2);
        assert!(state.approval_gates.values().all(|g| !g.approved));
        assert_eq!(wf.checkpoints().list().unwrap().len(), 1);
    }

    #[test]
    fn start_refuses_active_workflow_without_force() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        let first = wf.start(WorkflowType::NewProject, skip()).unwrap();
        assert!(wf.has_active_workflow().unwrap());
        assert!(matches!(
            wf.start(WorkflowType::ExistingProject, skip()),
            Err(Error::WorkflowActive(ref id)) if *id == first.state.workflow_id
        ));
        let forced = wf
            .start(
                WorkflowType::ExistingProject,
                StartOptions {
                    force: true,
                    ..skip()
                },
            )
            .unwrap();
        assert_ne!(forced.state.workflow_id, first.state.workflow_id);
    }

    #[test]
    fn start_blocked_by_preflight() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        let err = wf
            .start(WorkflowType::NewProject, StartOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::PreflightFailed(_)));
        assert!(!wf.has_active_workflow().unwrap());
    }

    #[test]
    fn gate_blocks_and_approval_advances() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        to_gate(&wf);
        let state = wf.load().unwrap();
        assert_eq!(state.awaiting_approval.as_deref(), Some("post-research"));
        assert!(!state.can_resume);
        assert_eq!(
            state.phase_summaries.get("research").map(String::as_str),
            Some("market is real")
        );
        assert!(matches!(wf.resume_workflow(), Err(Error::CannotResume(_))));
        assert!(matches!(
            wf.complete_phase(None),
            Err(Error::AwaitingApproval(_))
        ));

        let step = wf
            .approve_gate("post-research", Some("lead".to_string()), BTreeMap::new())
            .unwrap();
        assert!(step.checkpoint_id.is_some());
        let state = wf.load().unwrap();
        assert_eq!(state.awaiting_approval, None);
        assert_eq!(state.current_phase.as_deref(), Some("architecture"));
        assert!(state.can_resume);
        assert_eq!(state.metrics.approvals_obtained, 1);
        assert_eq!(
            state.approval_gates["post-research"].approved_by.as_deref(),
            Some("lead")
        );
        assert_eq!(wf.resume_workflow().unwrap(), state);
    }

    #[test]
    fn wrong_gate_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        to_gate(&wf);
        let path = paths::workflow_state_path(dir.path());
        let before = std::fs::read(&path).unwrap();
        let err = wf
            .approve_gate("wrong-gate", None, BTreeMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("no approval pending"));
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn timeouts_are_read_only() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        to_gate(&wf);
        let before = wf.load().unwrap();
        let later = Utc::now() + chrono::Duration::days(2);
        let a = wf.check_approval_timeouts(later).unwrap().unwrap();
        let b = wf.check_approval_timeouts(later).unwrap().unwrap();
        assert_eq!(a, b);
        assert!(a.timed_out);
        assert_eq!(wf.load().unwrap(), before);
    }

    #[test]
    fn progress_and_partial_save() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        wf.start(WorkflowType::ExistingProject, skip()).unwrap();
        let step = wf
            .update_phase_progress(ProgressUpdate {
                documents_created: Some(1),
                documents_total: Some(4),
                ..ProgressUpdate::default()
            })
            .unwrap();
        assert_eq!(step.state.phase_details.progress_percentage, 25.0);
        assert!(step.checkpoint_id.is_none());

        let cp = wf.save_partial_state(Some("end of day".to_string())).unwrap();
        assert_eq!(cp.trigger, CheckpointTrigger::PartialSave);
        assert_eq!(cp.progress_percentage, 25.0);
        assert!(wf.load().unwrap().checkpoints.last_save.is_some());
    }

    #[test]
    fn full_run_to_completion_then_restart() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        wf.start(WorkflowType::ExistingProject, skip()).unwrap();
        let graph = wf.config().graph_for(WorkflowType::ExistingProject);
        loop {
            let state = wf.load().unwrap();
            if let Some(gate) = &state.awaiting_approval {
                wf.approve_gate(gate, None, BTreeMap::new()).unwrap();
            } else if state.current_phase.is_some() {
                wf.complete_phase(None).unwrap();
            } else {
                break;
            }
        }
        let state = wf.load().unwrap();
        assert_eq!(state.status, WorkflowStatus::SequentialComplete);
        assert_eq!(state.phases_completed, graph.phases);
        assert_eq!(wf.status().unwrap().overall_progress, 100);

        assert!(wf.select_operational_phase("sprint-execution").is_err());
        wf.select_operational_phase("refactoring").unwrap();
        wf.complete_workflow().unwrap();
        assert!(!wf.has_active_workflow().unwrap());
        wf.start(WorkflowType::NewProject, skip()).unwrap();
    }

    #[test]
    fn phase_transition_takes_a_backup() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        wf.start(WorkflowType::NewProject, skip()).unwrap();
        let step = wf.complete_phase(None).unwrap();
        let id = step.backup_id.expect("first transition backs up");
        assert!(wf.backups().verify(&id).unwrap().valid);
        // Within the interval a second transition does not.
        assert!(wf.complete_phase(None).unwrap().backup_id.is_none());
    }

    #[test]
    fn decisions_feed_metrics() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        wf.start(WorkflowType::NewProject, skip()).unwrap();
        let decision = wf
            .record_decision("Use Rust", Some("safety".to_string()), None)
            .unwrap();
        assert_eq!(decision.phase.as_deref(), Some("discovery"));
        assert_eq!(wf.load().unwrap().metrics.decisions_made, 1);
    }

    #[test]
    fn decision_log_untouched_when_state_update_fails() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        wf.start(WorkflowType::NewProject, skip()).unwrap();
        let mut state = wf.load().unwrap();
        state.phase_index = 3;
        wf.store().save_workflow(&state).unwrap();

        assert!(wf.record_decision("Use Rust", None, None).is_err());
        assert!(!paths::decisions_path(dir.path()).exists());
        assert_eq!(wf.load().unwrap().metrics.decisions_made, 0);
    }

    #[test]
    fn restore_named_checkpoint() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        let start = wf.start(WorkflowType::NewProject, skip()).unwrap();
        wf.complete_phase(None).unwrap();
        let restored = wf.restore_checkpoint(&start.checkpoint_id).unwrap();
        assert_eq!(restored.current_phase.as_deref(), Some("discovery"));
        assert_eq!(wf.load().unwrap().phase_index, 0);
    }

    #[test]
    fn corrupted_state_recovers_through_checkpoint() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        let start = wf.start(WorkflowType::NewProject, skip()).unwrap();
        wf.store()
            .write_raw(paths::WORKFLOW_STATE_FILE, b"{\"truncated\":")
            .unwrap();
        let err = wf.complete_phase(None).unwrap_err();
        let outcome = wf.recover(&err).unwrap();
        assert!(matches!(outcome, RecoveryOutcome::Restored { .. }));
        assert_eq!(wf.load().unwrap().workflow_id, start.state.workflow_id);
    }

    #[test]
    fn parallel_plan_uses_configured_agents() {
        let dir = TempDir::new().unwrap();
        let wf = workflow(&dir);
        let units = vec![
            WorkUnit::new("u1", "docs/prd.md", "requirements"),
            WorkUnit::new("u2", "docs/prd.md", "requirements"),
            WorkUnit::new("u3", "docs/arch.md", "architecture"),
        ];

        wf.start(WorkflowType::NewProject, skip()).unwrap();
        assert!(matches!(
            wf.plan_parallel_work(&[], units.clone()),
            Err(Error::InvalidInput(_))
        ));

        wf.start(
            WorkflowType::NewProject,
            StartOptions {
                parallel_mode: true,
                force: true,
                skip_preflight: true,
            },
        )
        .unwrap();
        let plan = wf.plan_parallel_work(&[], units).unwrap();
        assert_eq!(plan.len(), 5);
        assert!(parallel::is_conflict_free(&plan));
        let prd_owners: Vec<_> = plan
            .iter()
            .filter(|a| a.paths().contains("docs/prd.md"))
            .collect();
        assert_eq!(prd_owners.len(), 1);
        assert_eq!(prd_owners[0].units.len(), 2);
    }
}
