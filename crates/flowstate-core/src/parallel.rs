//! Parallel agent coordination.
//!
//! Planning is pure: [`plan_assignments`] partitions work units across
//! agents so that every file path has exactly one owner, balancing load and
//! keeping categories together where loads tie. Execution runs one tokio task
//! per agent; a [`FileLockTable`] enforces file ownership at run time and
//! completion events flow back over an mpsc channel.

use crate::config::ParallelConfig;
use crate::error::{Error, Result};
use crate::recovery::{ErrorDetails, ErrorKind, WorkflowError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What to do when a second agent asks for a file that is already owned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Wait in line until the owner releases the file.
    #[default]
    Queue,
    /// Pause the requester; it retries on its own schedule.
    Pause,
    /// Let both proceed on separate sections of the file.
    Split,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictPolicy::Queue => "queue",
            ConflictPolicy::Pause => "pause",
            ConflictPolicy::Split => "split",
        };
        f.write_str(s)
    }
}

impl FromStr for ConflictPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queue" => Ok(ConflictPolicy::Queue),
            "pause" => Ok(ConflictPolicy::Pause),
            "split" => Ok(ConflictPolicy::Split),
            other => Err(Error::InvalidInput(format!(
                "unknown conflict policy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: String,
    pub path: String,
    pub category: String,
}

impl WorkUnit {
    pub fn new(id: impl Into<String>, path: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            category: category.into(),
        }
    }
}

/// Simulated scheduling budget; not enforced by the OS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceBudget {
    pub memory_mb: u64,
    pub cpu_shares: u32,
    pub file_handles: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentAssignment {
    pub agent: String,
    pub units: Vec<WorkUnit>,
    pub resources: ResourceBudget,
}

impl AgentAssignment {
    pub fn paths(&self) -> BTreeSet<&str> {
        self.units.iter().map(|u| u.path.as_str()).collect()
    }

    fn has_category(&self, category: &str) -> bool {
        self.units.iter().any(|u| u.category == category)
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

pub fn plan_assignments(
    agents: &[String],
    units: Vec<WorkUnit>,
    cfg: &ParallelConfig,
) -> Result<Vec<AgentAssignment>> {
    let mut seen = HashSet::new();
    for agent in agents {
        if !seen.insert(agent.as_str()) {
            return Err(Error::InvalidInput(format!("agent '{agent}' listed twice")));
        }
    }
    if agents.is_empty() && !units.is_empty() {
        return Err(Error::InvalidInput(
            "work units given but no agents to run them".to_string(),
        ));
    }

    let mut groups: BTreeMap<String, Vec<WorkUnit>> = BTreeMap::new();
    for unit in units {
        groups.entry(unit.path.clone()).or_default().push(unit);
    }
    let mut groups: Vec<Vec<WorkUnit>> = groups.into_values().collect();
    groups.sort_by(|a, b| {
        a[0].category
            .cmp(&b[0].category)
            .then_with(|| b.len().cmp(&a.len()))
            .then_with(|| a[0].path.cmp(&b[0].path))
    });

    let mut plan: Vec<AgentAssignment> = agents
        .iter()
        .map(|agent| AgentAssignment {
            agent: agent.clone(),
            units: Vec::new(),
            resources: ResourceBudget::default(),
        })
        .collect();

    for group in groups {
        let category = group[0].category.clone();
        let target = plan
            .iter()
            .enumerate()
            .min_by_key(|(i, a)| (a.units.len(), !a.has_category(&category), *i))
            .map(|(i, _)| i)
            .ok_or_else(|| Error::InvalidInput("no agents".to_string()))?;
        plan[target].units.extend(group);
    }

    allocate_resources(&mut plan, cfg);
    tracing::debug!(agents = plan.len(), "work assignment planned");
    Ok(plan)
}

fn allocate_resources(plan: &mut [AgentAssignment], cfg: &ParallelConfig) {
    let weights: Vec<f64> = plan
        .iter()
        .map(|a| a.units.iter().map(|u| cfg.weight_for(&u.category)).sum())
        .collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return;
    }
    for (assignment, weight) in plan.iter_mut().zip(weights) {
        let share = weight / total;
        let distinct_paths = assignment.paths().len() as u32;
        assignment.resources = ResourceBudget {
            memory_mb: (cfg.total_memory_mb as f64 * share).floor() as u64,
            cpu_shares: (f64::from(cfg.total_cpu_shares) * share).floor() as u32,
            file_handles: ((f64::from(cfg.total_file_handles) * share).floor() as u32)
                .max(distinct_paths),
        };
    }
}

/// True when no file path is owned by more than one agent.
pub fn is_conflict_free(plan: &[AgentAssignment]) -> bool {
    let mut owners: HashMap<&str, &str> = HashMap::new();
    for assignment in plan {
        for path in assignment.paths() {
            if let Some(owner) = owners.insert(path, &assignment.agent) {
                if owner != assignment.agent {
                    return false;
                }
            }
        }
    }
    true
}

// ---------------------------------------------------------------------------
// FileLockTable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    AlreadyHeld,
    Queued { position: usize },
    Paused { owner: String },
    Split { owner: String },
}

/// Exclusive file ownership. One owner per path.
#[derive(Debug, Default)]
pub struct FileLockTable {
    policy: ConflictPolicy,
    owners: HashMap<String, String>,
    waiters: HashMap<String, VecDeque<String>>,
    shared: HashMap<String, BTreeSet<String>>,
}

impl FileLockTable {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn owner(&self, path: &str) -> Option<&str> {
        self.owners.get(path).map(String::as_str)
    }

    pub fn acquire(&mut self, path: &str, agent: &str) -> LockOutcome {
        match self.owners.get(path) {
            None => {
                self.owners.insert(path.to_string(), agent.to_string());
                LockOutcome::Acquired
            }
            Some(owner) if owner == agent => LockOutcome::AlreadyHeld,
            Some(owner) => {
                let owner = owner.clone();
                tracing::debug!(path = %path, owner = %owner, requested_by = %agent, policy = %self.policy, "file conflict");
                match self.policy {
                    ConflictPolicy::Queue => {
                        let queue = self.waiters.entry(path.to_string()).or_default();
                        if !queue.iter().any(|w| w == agent) {
                            queue.push_back(agent.to_string());
                        }
                        let position = queue.iter().position(|w| w == agent).unwrap_or(0) + 1;
                        LockOutcome::Queued { position }
                    }
                    ConflictPolicy::Pause => LockOutcome::Paused { owner },
                    ConflictPolicy::Split => {
                        self.shared
                            .entry(path.to_string())
                            .or_default()
                            .insert(agent.to_string());
                        LockOutcome::Split { owner }
                    }
                }
            }
        }
    }

    /// Acquire or fail with a conflict error, regardless of policy.
    pub fn acquire_exclusive(&mut self, path: &str, agent: &str) -> Result<()> {
        match self.owners.get(path) {
            Some(owner) if owner != agent => Err(Error::FileConflict {
                path: path.to_string(),
                owner: owner.clone(),
                requested_by: agent.to_string(),
            }),
            _ => {
                self.owners.insert(path.to_string(), agent.to_string());
                Ok(())
            }
        }
    }

    /// Release `path` if `agent` owns it. A queued waiter becomes the new
    /// owner and is returned.
    pub fn release(&mut self, path: &str, agent: &str) -> Option<String> {
        if let Some(sharers) = self.shared.get_mut(path) {
            sharers.remove(agent);
            if sharers.is_empty() {
                self.shared.remove(path);
            }
        }
        if self.owners.get(path).map(String::as_str) != Some(agent) {
            return None;
        }
        self.owners.remove(path);
        let next = self.waiters.get_mut(path).and_then(VecDeque::pop_front);
        if let Some(next) = &next {
            self.owners.insert(path.to_string(), next.clone());
        }
        if self.waiters.get(path).is_some_and(VecDeque::is_empty) {
            self.waiters.remove(path);
        }
        next
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    Started { agent: String },
    UnitCompleted { agent: String, unit: String },
    UnitFailed { agent: String, unit: String, reason: String },
    Finished { agent: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitFailure {
    pub agent: String,
    pub unit: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionSummary {
    pub completed: Vec<String>,
    pub failures: Vec<UnitFailure>,
    pub events: Vec<AgentEvent>,
}

impl ExecutionSummary {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures as recovery-ready `AGENT_FAILURE` errors.
    pub fn workflow_errors(&self) -> Vec<WorkflowError> {
        self.failures
            .iter()
            .map(|f| {
                WorkflowError::new(
                    ErrorKind::AgentFailure,
                    format!("unit {} failed: {}", f.unit, f.reason),
                )
                .with_details(ErrorDetails {
                    agent: Some(f.agent.clone()),
                    ..Default::default()
                })
            })
            .collect()
    }
}

const LOCK_RETRY: std::time::Duration = std::time::Duration::from_millis(10);

/// Run each assignment on its own task. `worker` performs a single unit.
pub async fn execute_plan<F, Fut>(
    plan: Vec<AgentAssignment>,
    locks: Arc<Mutex<FileLockTable>>,
    worker: F,
) -> ExecutionSummary
where
    F: Fn(String, WorkUnit) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), String>> + Send + 'static,
{
    let worker = Arc::new(worker);
    let (tx, mut rx) = mpsc::unbounded_channel::<AgentEvent>();
    let mut join_set = JoinSet::new();
    let mut names: HashMap<tokio::task::Id, String> = HashMap::new();

    for assignment in plan {
        let tx = tx.clone();
        let locks = Arc::clone(&locks);
        let worker = Arc::clone(&worker);
        let name = assignment.agent.clone();
        let handle = join_set.spawn(async move {
            let agent = assignment.agent;
            let _ = tx.send(AgentEvent::Started {
                agent: agent.clone(),
            });
            for unit in assignment.units {
                wait_for_lock(&locks, &unit.path, &agent).await;
                let id = unit.id.clone();
                let path = unit.path.clone();
                // A unit runs on its own task so a panic cannot leave the
                // file locked.
                let outcome = tokio::spawn(worker(agent.clone(), unit)).await;
                locks.lock().await.release(&path, &agent);
                let event = match outcome {
                    Ok(Ok(())) => AgentEvent::UnitCompleted {
                        agent: agent.clone(),
                        unit: id,
                    },
                    Ok(Err(reason)) => AgentEvent::UnitFailed {
                        agent: agent.clone(),
                        unit: id,
                        reason,
                    },
                    Err(e) => AgentEvent::UnitFailed {
                        agent: agent.clone(),
                        unit: id,
                        reason: format!("worker panicked: {e}"),
                    },
                };
                let _ = tx.send(event);
            }
            let _ = tx.send(AgentEvent::Finished { agent });
        });
        names.insert(handle.id(), name);
    }
    drop(tx);

    let mut summary = ExecutionSummary::default();
    while let Some(event) = rx.recv().await {
        match &event {
            AgentEvent::UnitCompleted { unit, .. } => summary.completed.push(unit.clone()),
            AgentEvent::UnitFailed {
                agent,
                unit,
                reason,
            } => {
                tracing::warn!(agent = %agent, unit = %unit, reason = %reason, "work unit failed");
                summary.failures.push(UnitFailure {
                    agent: agent.clone(),
                    unit: unit.clone(),
                    reason: reason.clone(),
                });
            }
            AgentEvent::Started { .. } | AgentEvent::Finished { .. } => {}
        }
        summary.events.push(event);
    }

    while let Some(joined) = join_set.join_next().await {
        if let Err(e) = joined {
            let agent = names
                .get(&e.id())
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            tracing::error!(agent = %agent, error = %e, "agent task aborted");
            summary.failures.push(UnitFailure {
                agent,
                unit: "-".to_string(),
                reason: e.to_string(),
            });
        }
    }
    tracing::info!(
        agents = names.len(),
        completed = summary.completed.len(),
        failed = summary.failures.len(),
        "parallel execution finished"
    );
    summary
}

async fn wait_for_lock(locks: &Mutex<FileLockTable>, path: &str, agent: &str) {
    loop {
        let outcome = locks.lock().await.acquire(path, agent);
        match outcome {
            LockOutcome::Acquired | LockOutcome::AlreadyHeld | LockOutcome::Split { .. } => return,
            LockOutcome::Queued { .. } | LockOutcome::Paused { .. } => {
                tokio::time::sleep(LOCK_RETRY).await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
