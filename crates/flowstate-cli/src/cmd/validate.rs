use crate::output::print_json;
use anyhow::Context;
use flowstate_core::validate::ValidationReport;
use std::path::Path;

pub fn run(root: &Path, file: Option<&str>, repair: bool, json: bool) -> anyhow::Result<()> {
    let wf = super::open(root)?;
    let validator = wf.validator();
    let reports = match file {
        Some(file) => vec![validator
            .validate_file(file, repair)
            .with_context(|| format!("failed to validate {file}"))?],
        None => validator
            .validate_all(repair)
            .context("failed to validate state directory")?,
    };

    if json {
        print_json(&reports)?;
    } else if reports.is_empty() {
        println!("No state files to validate.");
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    let invalid: Vec<&str> = reports
        .iter()
        .filter(|r| !r.valid)
        .map(|r| r.file.as_str())
        .collect();
    if !invalid.is_empty() {
        anyhow::bail!("validation failed: {}", invalid.join(", "));
    }
    Ok(())
}

fn print_report(report: &ValidationReport) {
    let verdict = match (report.valid, report.repaired) {
        (true, true) => "repaired",
        (true, false) => "ok",
        (false, _) => "INVALID",
    };
    println!("{}: {verdict}", report.file);
    for repair in &report.repairs {
        println!("  fixed: {repair}");
    }
    let remaining = if report.repaired {
        &report.unrepaired
    } else {
        &report.errors
    };
    for issue in remaining {
        match &issue.field {
            Some(field) => println!("  {field}: {}", issue.message),
            None => println!("  {}", issue.message),
        }
    }
    if let Some(path) = &report.backup_path {
        println!("  backup: {}", path.display());
    }
}
