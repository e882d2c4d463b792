use crate::output::{print_json, print_table, yes_no};
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum CheckpointSubcommand {
    /// List checkpoints, newest first
    List,

    /// Replace the current state with a checkpoint
    Restore {
        /// Checkpoint ID (cp-...)
        id: String,
    },
}

pub fn run(root: &Path, subcmd: CheckpointSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        CheckpointSubcommand::List => list(root, json),
        CheckpointSubcommand::Restore { id } => restore(root, &id, json),
    }
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let wf = super::open(root)?;
    let checkpoints = wf
        .checkpoints()
        .list()
        .context("failed to list checkpoints")?;
    if json {
        return print_json(&checkpoints);
    }
    if checkpoints.is_empty() {
        println!("No checkpoints.");
        return Ok(());
    }
    let rows = checkpoints
        .iter()
        .map(|c| {
            vec![
                c.id.clone(),
                c.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                c.trigger.to_string(),
                c.phase.clone().unwrap_or_else(|| "-".to_string()),
                format!("{:.0}%", c.progress_percentage),
                yes_no(c.verified),
            ]
        })
        .collect();
    print_table(
        &["ID", "CREATED", "TRIGGER", "PHASE", "PROGRESS", "VERIFIED"],
        rows,
    );
    Ok(())
}

fn restore(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let wf = super::open(root)?;
    let state = wf
        .restore_checkpoint(id)
        .with_context(|| format!("failed to restore checkpoint '{id}'"))?;
    if json {
        return print_json(&state);
    }
    println!(
        "Restored {id}. Workflow {} at phase {}",
        state.workflow_id,
        state.current_phase.as_deref().unwrap_or("-")
    );
    Ok(())
}
