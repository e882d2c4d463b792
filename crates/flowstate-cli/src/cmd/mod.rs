pub mod approve;
pub mod backup;
pub mod checkpoint;
pub mod config;
pub mod decision;
pub mod phase;
pub mod plan;
pub mod preflight;
pub mod recover;
pub mod session;
pub mod start;
pub mod status;
pub mod validate;

use anyhow::Context;
use flowstate_core::workflow::Workflow;
use std::path::Path;

pub(crate) fn open(root: &Path) -> anyhow::Result<Workflow> {
    Workflow::open(root).context("failed to load config")
}
