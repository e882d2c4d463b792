use crate::output::print_json;
use anyhow::Context;
use flowstate_core::types::WorkflowType;
use flowstate_core::workflow::StartOptions;
use std::path::Path;

pub fn run(
    root: &Path,
    workflow_type: &str,
    parallel: bool,
    force: bool,
    skip_preflight: bool,
    json: bool,
) -> anyhow::Result<()> {
    let workflow_type: WorkflowType = workflow_type.parse()?;
    let wf = super::open(root)?;
    let result = wf
        .start(
            workflow_type,
            StartOptions {
                parallel_mode: parallel,
                force,
                skip_preflight,
            },
        )
        .with_context(|| format!("failed to start {workflow_type} workflow"))?;

    if json {
        return print_json(&result);
    }

    let state = &result.state;
    println!("Started {workflow_type} workflow {}", state.workflow_id);
    if let Some(phase) = &state.current_phase {
        println!("Current phase: {phase}");
    }
    if let Some(report) = &result.preflight {
        for warning in &report.warnings {
            println!("warning: {warning}");
        }
    }
    println!("Checkpoint:    {}", result.checkpoint_id);
    Ok(())
}
