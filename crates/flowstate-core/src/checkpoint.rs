//! Workflow checkpoints: immutable, checksummed snapshots of
//! `WorkflowState` written at transition boundaries and on manual pause.
//!
//! Layout:
//!   .flowstate/checkpoints/cp-<timestamp>-<suffix>.json
//!
//! The checksum is the MD5 of the compact JSON serialization of the
//! embedded state, so a checkpoint whose state was edited after the fact
//! fails verification.

use crate::config::CheckpointConfig;
use crate::error::{Error, Result};
use crate::io;
use crate::paths;
use crate::types::WorkflowState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrigger {
    Initialized,
    PhaseCompleted,
    GateApproved,
    PartialSave,
    Recovery,
    Manual,
}

impl fmt::Display for CheckpointTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckpointTrigger::Initialized => "initialized",
            CheckpointTrigger::PhaseCompleted => "phase_completed",
            CheckpointTrigger::GateApproved => "gate_approved",
            CheckpointTrigger::PartialSave => "partial_save",
            CheckpointTrigger::Recovery => "recovery",
            CheckpointTrigger::Manual => "manual",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub workflow_id: String,
    pub created_at: DateTime<Utc>,
    pub trigger: CheckpointTrigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub phase: Option<String>,
    pub progress_percentage: f64,
    pub checksum: String,
    pub state: WorkflowState,
}

impl Checkpoint {
    pub fn verify(&self) -> bool {
        state_checksum(&self.state)
            .map(|sum| sum == self.checksum)
            .unwrap_or(false)
    }

    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            id: self.id.clone(),
            workflow_id: self.workflow_id.clone(),
            created_at: self.created_at,
            trigger: self.trigger,
            note: self.note.clone(),
            phase: self.phase.clone(),
            progress_percentage: self.progress_percentage,
            verified: self.verify(),
        }
    }
}

/// Listing entry; `verified` is computed on read.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointSummary {
    pub id: String,
    pub workflow_id: String,
    pub created_at: DateTime<Utc>,
    pub trigger: CheckpointTrigger,
    pub note: Option<String>,
    pub phase: Option<String>,
    pub progress_percentage: f64,
    pub verified: bool,
}

pub fn state_checksum(state: &WorkflowState) -> Result<String> {
    let bytes = serde_json::to_vec(state)?;
    Ok(io::md5_hex(&bytes))
}

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    max_checkpoints: usize,
}

impl CheckpointManager {
    pub fn new(root: &Path, cfg: &CheckpointConfig) -> Self {
        Self {
            dir: paths::checkpoints_dir(root),
            max_checkpoints: cfg.max_checkpoints.max(1),
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn create(
        &self,
        state: &WorkflowState,
        trigger: CheckpointTrigger,
        note: Option<String>,
    ) -> Result<Checkpoint> {
        let now = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let id = format!("cp-{}-{}", io::file_timestamp(now), &suffix[..8]);
        let checkpoint = Checkpoint {
            id: id.clone(),
            workflow_id: state.workflow_id.clone(),
            created_at: now,
            trigger,
            note,
            phase: state
                .current_phase
                .clone()
                .or_else(|| state.operational_phase.clone()),
            progress_percentage: state.phase_details.progress_percentage,
            checksum: state_checksum(state)?,
            state: state.clone(),
        };
        io::write_json(&self.path_for(&id), &checkpoint)?;
        tracing::info!(id = %id, trigger = %trigger, "checkpoint written");

        let pruned = self.prune()?;
        if !pruned.is_empty() {
            tracing::debug!(count = pruned.len(), "pruned old checkpoints");
        }
        Ok(checkpoint)
    }

    /// All readable checkpoints, newest first. Unreadable files are skipped
    /// with a warning.
    pub fn load_all(&self) -> Result<Vec<Checkpoint>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut checkpoints = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Checkpoint>(&data) {
                Ok(cp) => checkpoints.push(cp),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint")
                }
            }
        }
        checkpoints.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(checkpoints)
    }

    pub fn list(&self) -> Result<Vec<CheckpointSummary>> {
        Ok(self.load_all()?.iter().map(Checkpoint::summary).collect())
    }

    /// Load a checkpoint by id, refusing one whose checksum does not match.
    pub fn load(&self, id: &str) -> Result<Checkpoint> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(Error::CheckpointNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        let checkpoint: Checkpoint =
            serde_json::from_str(&data).map_err(|e| Error::StateCorruption {
                file: format!("checkpoints/{id}.json"),
                reason: e.to_string(),
            })?;
        if !checkpoint.verify() {
            return Err(Error::ChecksumMismatch(format!("checkpoint {id}")));
        }
        Ok(checkpoint)
    }

    /// Newest checkpoint whose checksum verifies and which `accept` approves.
    pub fn latest_verified(
        &self,
        accept: impl Fn(&Checkpoint) -> bool,
    ) -> Result<Option<Checkpoint>> {
        for checkpoint in self.load_all()? {
            if !checkpoint.verify() {
                tracing::warn!(id = %checkpoint.id, "checkpoint failed checksum verification");
                continue;
            }
            if accept(&checkpoint) {
                return Ok(Some(checkpoint));
            }
            tracing::warn!(id = %checkpoint.id, "checkpoint state rejected by validation");
        }
        Ok(None)
    }

    /// Delete the oldest checkpoints beyond the retention limit. Returns the
    /// removed ids.
    pub fn prune(&self) -> Result<Vec<String>> {
        let all = self.load_all()?;
        let mut removed = Vec::new();
        for checkpoint in all.into_iter().skip(self.max_checkpoints) {
            std::fs::remove_file(self.path_for(&checkpoint.id))?;
            removed.push(checkpoint.id);
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PhaseGraph;
    use crate::machine;
    use crate::types::WorkflowType;
    use tempfile::TempDir;

    fn state() -> WorkflowState {
        let graph = PhaseGraph::default_for(WorkflowType::ExistingProject);
        machine::initial_state(WorkflowType::ExistingProject, &graph, false, Utc::now())
    }

    fn manager(dir: &TempDir, max: usize) -> CheckpointManager {
        CheckpointManager::new(
            dir.path(),
            &CheckpointConfig {
                max_checkpoints: max,
            },
        )
    }

    #[test]
    fn create_then_load_verifies() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, 20);
        let st = state();
        let cp = mgr
            .create(&st, CheckpointTrigger::PartialSave, Some("lunch".to_string()))
            .unwrap();
        let loaded = mgr.load(&cp.id).unwrap();
        assert_eq!(loaded.state, st);
        assert_eq!(loaded.note.as_deref(), Some("lunch"));
        assert_eq!(loaded.phase.as_deref(), Some("codebase-analysis"));
    }

    #[test]
    fn tampered_checkpoint_fails_load() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, 20);
        let cp = mgr.create(&state(), CheckpointTrigger::Manual, None).unwrap();
        let path = mgr.path_for(&cp.id);
        let data = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, data.replace("\"phase_index\": 0", "\"phase_index\": 4")).unwrap();
        assert!(matches!(mgr.load(&cp.id), Err(Error::ChecksumMismatch(_))));
        assert!(mgr.latest_verified(|_| true).unwrap().is_none());
    }

    #[test]
    fn retention_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, 3);
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(mgr.create(&state(), CheckpointTrigger::Manual, None).unwrap().id);
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let listed: Vec<String> = mgr.list().unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0], ids[4]);
        assert!(!listed.contains(&ids[0]));
    }

    #[test]
    fn missing_checkpoint_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, 20);
        assert!(matches!(
            mgr.load("cp-nope"),
            Err(Error::CheckpointNotFound(_))
        ));
        assert!(mgr.list().unwrap().is_empty());
    }

    #[test]
    fn latest_verified_respects_acceptance() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, 20);
        let first = mgr.create(&state(), CheckpointTrigger::Manual, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        mgr.create(&state(), CheckpointTrigger::Manual, None).unwrap();
        let picked = mgr
            .latest_verified(|cp| cp.workflow_id == first.workflow_id)
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, first.id);
    }
}
