//! The state directory: a small repository over the JSON documents kept
//! under `.flowstate/`.
//!
//! The "current workflow" is a single-row store keyed by the fixed file
//! name `workflow-state.json`. Callers check [`StateStore::active_workflow`]
//! before starting a new workflow; nothing here holds an OS-level lock.

use crate::error::{Error, Result};
use crate::io;
use crate::paths;
use crate::types::WorkflowState;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self) -> PathBuf {
        paths::state_dir(&self.root)
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        paths::state_file(&self.root, name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_of(name).exists()
    }

    // -----------------------------------------------------------------------
    // Generic documents
    // -----------------------------------------------------------------------

    /// Read and parse a state document. Unparseable content is reported as
    /// corruption so the recovery handler can act on it.
    pub fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.path_of(name);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| Error::StateCorruption {
                file: name.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        io::write_json(&self.path_of(name), value)
    }

    pub fn write_raw(&self, name: &str, data: &[u8]) -> Result<()> {
        io::atomic_write(&self.path_of(name), data)
    }

    // -----------------------------------------------------------------------
    // Current workflow
    // -----------------------------------------------------------------------

    pub fn load_workflow(&self) -> Result<WorkflowState> {
        self.read(paths::WORKFLOW_STATE_FILE)?
            .ok_or(Error::NotInitialized)
    }

    pub fn save_workflow(&self, state: &WorkflowState) -> Result<()> {
        self.write(paths::WORKFLOW_STATE_FILE, state)
    }

    /// The stored workflow if one exists and has not been completed.
    pub fn active_workflow(&self) -> Result<Option<WorkflowState>> {
        Ok(self
            .read::<WorkflowState>(paths::WORKFLOW_STATE_FILE)?
            .filter(|s| s.is_active()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
