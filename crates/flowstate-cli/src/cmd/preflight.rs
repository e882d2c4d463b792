use crate::output::{print_json, print_table, yes_no};
use flowstate_core::types::WorkflowType;
use std::path::Path;

pub fn run(root: &Path, workflow_type: &str, json: bool) -> anyhow::Result<()> {
    let workflow_type: WorkflowType = workflow_type.parse()?;
    let wf = super::open(root)?;
    let report = wf.preflight(workflow_type);

    if json {
        print_json(&report)?;
    } else {
        let rows = report
            .agents
            .iter()
            .map(|a| {
                vec![
                    a.name.clone(),
                    if a.required { "required" } else { "optional" }.to_string(),
                    yes_no(a.exists),
                    yes_no(a.responsive),
                    yes_no(a.resources_available),
                    yes_no(a.ready),
                ]
            })
            .collect();
        print_table(
            &["AGENT", "KIND", "EXISTS", "RESPONSIVE", "RESOURCES", "READY"],
            rows,
        );
        for warning in &report.warnings {
            println!("warning: {warning}");
        }
    }

    if !report.passed {
        anyhow::bail!(
            "preflight failed: required agents not ready: {}",
            report.blocking().join(", ")
        );
    }
    if !json {
        println!("Preflight passed for {workflow_type}.");
    }
    Ok(())
}
