use crate::error::{Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const STATE_DIR: &str = ".flowstate";
pub const CHECKPOINTS_DIR: &str = ".flowstate/checkpoints";
pub const BACKUPS_DIR: &str = ".flowstate/backups";
pub const INTEGRITY_REPORTS_DIR: &str = ".flowstate/integrity-reports";
pub const LOGS_DIR: &str = ".flowstate/logs";
pub const INTERVENTIONS_DIR: &str = ".flowstate/logs/interventions";
pub const SPRINTS_DIR: &str = ".flowstate/sprints";

pub const CONFIG_FILE: &str = ".flowstate/config.yaml";

pub const WORKFLOW_STATE_FILE: &str = "workflow-state.json";
pub const DECISIONS_FILE: &str = "decisions.json";
pub const SPRINT_STATUS_FILE: &str = "sprint-status.json";
pub const MANIFEST_FILE: &str = "manifest.json";

pub const ERROR_LOG_JSON: &str = "errors.jsonl";
pub const ERROR_LOG_TEXT: &str = "errors.log";

/// Compact UTC timestamp used in file and directory names.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn state_file(root: &Path, name: &str) -> PathBuf {
    state_dir(root).join(name)
}

pub fn workflow_state_path(root: &Path) -> PathBuf {
    state_file(root, WORKFLOW_STATE_FILE)
}

pub fn decisions_path(root: &Path) -> PathBuf {
    state_file(root, DECISIONS_FILE)
}

pub fn checkpoints_dir(root: &Path) -> PathBuf {
    root.join(CHECKPOINTS_DIR)
}

pub fn backups_dir(root: &Path) -> PathBuf {
    root.join(BACKUPS_DIR)
}

pub fn integrity_reports_dir(root: &Path) -> PathBuf {
    root.join(INTEGRITY_REPORTS_DIR)
}

pub fn logs_dir(root: &Path) -> PathBuf {
    root.join(LOGS_DIR)
}

pub fn interventions_dir(root: &Path) -> PathBuf {
    root.join(INTERVENTIONS_DIR)
}

pub fn sprint_dir(root: &Path, sprint: &str) -> PathBuf {
    root.join(SPRINTS_DIR).join(sprint)
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static SLUG_RE: OnceLock<Regex> = OnceLock::new();

fn slug_re() -> &'static Regex {
    SLUG_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").expect("valid slug regex")
    })
}

/// Phase, gate and agent names share the slug shape.
pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() || slug.len() > 64 || !slug_re().is_match(slug) {
        return Err(Error::InvalidInput(format!(
            "invalid name '{slug}': must be lowercase alphanumeric with hyphens"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
