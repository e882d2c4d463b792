use crate::output::print_json;
use anyhow::Context;
use flowstate_core::machine::{Outcome, ProgressUpdate};
use flowstate_core::types::{ActiveAgent, AgentStatus};
use flowstate_core::workflow::StepResult;
use std::path::Path;

pub(crate) fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Advanced { from, to } => format!("Completed '{from}'. Current phase: {to}"),
        Outcome::AwaitingApproval { phase, gate } => format!(
            "Completed '{phase}'. Awaiting approval: {gate}\nRun 'flowstate approve {gate}' to continue."
        ),
        Outcome::SequentialComplete { last_phase } => format!(
            "Completed '{last_phase}'. All sequential phases are done; select an operational phase with 'flowstate select <phase>'."
        ),
        Outcome::GateApproved { gate, next_phase } => {
            format!("Approved '{gate}'. Current phase: {next_phase}")
        }
        Outcome::ProgressUpdated {
            progress_percentage,
        } => format!("Phase progress: {progress_percentage:.0}%"),
        Outcome::PhaseReset { phase } => format!(
            "Reset phase {}",
            phase.as_deref().unwrap_or("(none)")
        ),
        Outcome::AgentSkipped { agent } => format!("Skipped agent '{agent}'"),
        Outcome::RecoveryStarted => "Recovery started".to_string(),
        Outcome::RecoveryEnded => "Recovery ended".to_string(),
        Outcome::OperationalPhaseSelected { phase } => format!("Operational phase: {phase}"),
        Outcome::WorkflowCompleted => "Workflow completed".to_string(),
        Outcome::DecisionRecorded => "Decision recorded".to_string(),
        Outcome::CheckpointMarked => "Checkpoint marked".to_string(),
    }
}

pub(crate) fn print_step(step: &StepResult, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(step);
    }
    println!("{}", describe(&step.outcome));
    if let Some(id) = &step.backup_id {
        println!("Backup:     {id}");
    }
    Ok(())
}

pub fn complete(root: &Path, summary: Option<String>, json: bool) -> anyhow::Result<()> {
    let wf = super::open(root)?;
    let step = wf
        .complete_phase(summary)
        .context("failed to complete phase")?;
    print_step(&step, json)
}

fn parse_agent(arg: &str) -> anyhow::Result<ActiveAgent> {
    let (name, status) = match arg.split_once('=') {
        Some((name, status)) => (name, status),
        None => (arg, "working"),
    };
    let status = match status {
        "pending" => AgentStatus::Pending,
        "working" => AgentStatus::Working,
        "completed" => AgentStatus::Completed,
        "failed" => AgentStatus::Failed,
        "skipped" => AgentStatus::Skipped,
        other => anyhow::bail!("unknown agent status '{other}'"),
    };
    Ok(ActiveAgent::new(name, status))
}

pub fn progress(
    root: &Path,
    created: Option<u32>,
    total: Option<u32>,
    percent: Option<f64>,
    eta: Option<u32>,
    agents: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let active_agents = if agents.is_empty() {
        None
    } else {
        Some(
            agents
                .iter()
                .map(|a| parse_agent(a))
                .collect::<anyhow::Result<Vec<_>>>()?,
        )
    };
    let wf = super::open(root)?;
    let step = wf
        .update_phase_progress(ProgressUpdate {
            documents_created: created,
            documents_total: total,
            active_agents,
            estimated_time_remaining: eta,
            progress_percentage: percent,
        })
        .context("failed to update progress")?;
    print_step(&step, json)
}

pub fn select(root: &Path, phase: &str, json: bool) -> anyhow::Result<()> {
    let wf = super::open(root)?;
    let step = wf
        .select_operational_phase(phase)
        .with_context(|| format!("failed to select phase '{phase}'"))?;
    print_step(&step, json)
}

pub fn finish(root: &Path, json: bool) -> anyhow::Result<()> {
    let wf = super::open(root)?;
    let step = wf
        .complete_workflow()
        .context("failed to complete workflow")?;
    print_step(&step, json)
}
