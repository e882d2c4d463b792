use crate::output::print_json;
use anyhow::Context;
use flowstate_core::recovery::{
    ErrorDetails, ErrorKind, RecoveryContext, RecoveryOutcome, WorkflowError,
};
use std::path::Path;

pub struct RecoverArgs {
    pub kind: String,
    pub message: Option<String>,
    pub agent: Option<String>,
    pub critical: bool,
    pub phase: Option<String>,
    pub gate: Option<String>,
    pub file: Option<String>,
    pub attempt: u32,
}

impl RecoverArgs {
    fn into_error(self) -> anyhow::Result<WorkflowError> {
        let kind: ErrorKind = self.kind.parse()?;
        let message = self.message.unwrap_or_else(|| format!("reported {kind}"));
        Ok(WorkflowError::new(kind, message).with_details(ErrorDetails {
            critical: self.critical,
            agent: self.agent,
            phase: self.phase,
            gate: self.gate,
            file: self.file,
            ..ErrorDetails::default()
        }))
    }
}

pub fn run(root: &Path, args: RecoverArgs, json: bool) -> anyhow::Result<()> {
    let context = RecoveryContext {
        attempt: args.attempt,
    };
    let error = args.into_error()?;
    let wf = super::open(root)?;
    let outcome = wf
        .recovery()
        .handle_workflow_error(&error, &context)
        .with_context(|| format!("could not recover from {}", error.kind))?;

    if json {
        return print_json(&outcome);
    }
    match outcome {
        RecoveryOutcome::Restored {
            checkpoint_id,
            workflow_id,
        } => println!("Restored workflow {workflow_id} from {checkpoint_id}"),
        RecoveryOutcome::PhaseReset { phase } => {
            println!("Reset phase {}", phase.as_deref().unwrap_or("-"))
        }
        RecoveryOutcome::Retry { attempt, delay_ms } => {
            println!("Retry attempt {attempt} after {delay_ms} ms")
        }
        RecoveryOutcome::AgentSkipped { agent } => println!("Skipped agent '{agent}'"),
        RecoveryOutcome::Repaired { report } => {
            println!("Repaired {}", report.file);
            for repair in &report.repairs {
                println!("  fixed: {repair}");
            }
        }
    }
    Ok(())
}
