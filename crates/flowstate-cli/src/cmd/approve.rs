use super::phase::print_step;
use crate::output::{print_json, print_table};
use anyhow::Context;
use std::collections::BTreeMap;
use std::path::Path;

fn parse_metadata(pairs: &[String]) -> anyhow::Result<BTreeMap<String, serde_json::Value>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("metadata '{pair}' is not KEY=VALUE"))?;
            let value = serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::from(value));
            Ok((key.to_string(), value))
        })
        .collect()
}

pub fn approve(
    root: &Path,
    gate: &str,
    approved_by: Option<String>,
    metadata: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let metadata = parse_metadata(metadata)?;
    let wf = super::open(root)?;
    let step = wf
        .approve_gate(gate, approved_by, metadata)
        .with_context(|| format!("failed to approve gate '{gate}'"))?;
    print_step(&step, json)
}

pub fn timeouts(root: &Path, json: bool) -> anyhow::Result<()> {
    let wf = super::open(root)?;
    let report = wf
        .check_approval_timeouts(chrono::Utc::now())
        .context("failed to read workflow state")?;
    if json {
        return print_json(&report);
    }
    match report {
        None => println!("No approval pending."),
        Some(r) => {
            let verdict = if r.timed_out { "TIMED OUT" } else { "within timeout" };
            println!(
                "Gate {}: waiting {} of {} minutes ({verdict})",
                r.gate, r.elapsed_minutes, r.timeout_minutes
            );
            if r.timed_out {
                println!("Approve with 'flowstate approve {}' or escalate to the owner.", r.gate);
            }
        }
    }
    Ok(())
}

pub fn gates(root: &Path, json: bool) -> anyhow::Result<()> {
    let wf = super::open(root)?;
    let views = wf.gates().context("failed to read workflow state")?;
    if json {
        return print_json(&views);
    }
    if views.is_empty() {
        println!("No approval gates defined.");
        return Ok(());
    }
    let rows = views
        .into_iter()
        .map(|v| {
            let state = if v.approved {
                "approved"
            } else if v.pending {
                "pending"
            } else {
                "-"
            };
            vec![
                v.name,
                format!("{} -> {}", v.after, v.before),
                state.to_string(),
                v.approved_by.unwrap_or_else(|| "-".to_string()),
                v.timeout_minutes.to_string(),
            ]
        })
        .collect();
    print_table(&["GATE", "BETWEEN", "STATE", "BY", "TIMEOUT_MIN"], rows);
    Ok(())
}
