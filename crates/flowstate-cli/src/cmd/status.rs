use crate::output::print_json;
use anyhow::Context;
use flowstate_core::status;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let wf = super::open(root)?;
    let report = wf.status().context("failed to read workflow state")?;
    if json {
        return print_json(&report);
    }
    print!("{}", status::render(&report));
    Ok(())
}
