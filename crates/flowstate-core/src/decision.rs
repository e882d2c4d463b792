//! Decision log kept in `decisions.json`.

use crate::error::{Error, Result};
use crate::paths;
use crate::store::StateStore;
use crate::types::STATE_VERSION;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLog {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub decisions: Vec<Decision>,
    pub total_count: usize,
}

impl DecisionLog {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            created_at: now,
            last_updated: now,
            decisions: Vec::new(),
            total_count: 0,
        }
    }

    pub fn load(store: &StateStore) -> Result<Self> {
        Ok(store
            .read(paths::DECISIONS_FILE)?
            .unwrap_or_else(|| Self::new(Utc::now())))
    }

    pub fn save(&self, store: &StateStore) -> Result<()> {
        store.write(paths::DECISIONS_FILE, self)
    }

    /// Append a decision; ids are `D-001`, `D-002`, ...
    pub fn record(
        &mut self,
        title: &str,
        rationale: Option<String>,
        phase: Option<String>,
        decided_by: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<&Decision> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("decision title is empty".to_string()));
        }
        let decision = Decision {
            id: format!("D-{:03}", self.decisions.len() + 1),
            title: title.to_string(),
            rationale,
            phase,
            decided_by,
            recorded_at: now,
        };
        self.decisions.push(decision);
        self.total_count = self.decisions.len();
        self.last_updated = now.max(self.created_at);
        Ok(&self.decisions[self.decisions.len() - 1])
    }
}
