use crate::output::{print_json, print_table};
use anyhow::Context;
use flowstate_core::parallel::WorkUnit;
use std::path::Path;

/// `PATH[:CATEGORY]`; units without a category fall into `general`.
fn parse_units(specs: &[String]) -> anyhow::Result<Vec<WorkUnit>> {
    specs
        .iter()
        .enumerate()
        .map(|(i, arg)| {
            let (path, category) = match arg.rsplit_once(':') {
                Some((path, category)) if !category.is_empty() => (path, category),
                _ => (arg.as_str(), "general"),
            };
            if path.is_empty() {
                anyhow::bail!("work unit '{arg}' has no path");
            }
            Ok(WorkUnit::new(format!("unit-{}", i + 1), path, category))
        })
        .collect()
}

pub fn run(root: &Path, units: &[String], agents: &[String], json: bool) -> anyhow::Result<()> {
    let units = parse_units(units)?;
    let wf = super::open(root)?;
    let plan = wf
        .plan_parallel_work(agents, units)
        .context("failed to plan parallel work")?;

    if json {
        return print_json(&plan);
    }
    let rows = plan
        .iter()
        .map(|a| {
            let paths: Vec<&str> = a.paths().into_iter().collect();
            vec![
                a.agent.clone(),
                a.units.len().to_string(),
                if paths.is_empty() {
                    "-".to_string()
                } else {
                    paths.join(", ")
                },
                a.resources.memory_mb.to_string(),
                a.resources.cpu_shares.to_string(),
                a.resources.file_handles.to_string(),
            ]
        })
        .collect();
    print_table(
        &["AGENT", "UNITS", "FILES", "MEMORY_MB", "CPU", "HANDLES"],
        rows,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_specs_parse() {
        let units = parse_units(&["docs/prd.md:requirements".to_string(), "notes.md".to_string()])
            .unwrap();
        assert_eq!(units[0].path, "docs/prd.md");
        assert_eq!(units[0].category, "requirements");
        assert_eq!(units[1].category, "general");
        assert_eq!(units[1].id, "unit-2");
        assert!(parse_units(&[":x".to_string()]).is_err());
    }
}
