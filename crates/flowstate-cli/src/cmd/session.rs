use crate::output::print_json;
use anyhow::Context;
use std::path::Path;

pub fn pause(root: &Path, note: Option<String>, json: bool) -> anyhow::Result<()> {
    let wf = super::open(root)?;
    let checkpoint = wf
        .save_partial_state(note)
        .context("failed to save partial state")?;
    if json {
        return print_json(&checkpoint.summary());
    }
    println!("Saved checkpoint {}", checkpoint.id);
    if let Some(phase) = &checkpoint.phase {
        println!(
            "Phase {phase} at {:.0}%",
            checkpoint.progress_percentage
        );
    }
    Ok(())
}

pub fn resume(root: &Path, json: bool) -> anyhow::Result<()> {
    let wf = super::open(root)?;
    let state = wf.resume_workflow().context("cannot resume workflow")?;
    if json {
        return print_json(&state);
    }
    match (&state.current_phase, &state.operational_phase) {
        (Some(phase), _) => println!(
            "Resume {} at phase {phase} ({:.0}% complete)",
            state.workflow_id, state.phase_details.progress_percentage
        ),
        (None, Some(op)) => println!("Resume {} in operational phase {op}", state.workflow_id),
        (None, None) => println!(
            "Sequential phases are complete. Select an operational phase with 'flowstate select <phase>'."
        ),
    }
    Ok(())
}
