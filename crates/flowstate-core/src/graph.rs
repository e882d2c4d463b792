use crate::paths::validate_slug;
use crate::types::WorkflowType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

// ---------------------------------------------------------------------------
// GateDefinition
// ---------------------------------------------------------------------------

/// An approval gate sitting between two consecutive phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateDefinition {
    pub after: String,
    pub before: String,
    #[serde(default = "default_gate_timeout")]
    pub timeout_minutes: u32,
}

fn default_gate_timeout() -> u32 {
    1440
}

// ---------------------------------------------------------------------------
// PhaseGraph
// ---------------------------------------------------------------------------

/// Static phase configuration for one workflow type. Never mutated by the
/// state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseGraph {
    pub phases: Vec<String>,
    #[serde(default)]
    pub approval_gates: BTreeMap<String, GateDefinition>,
    /// Estimated minutes per phase.
    #[serde(default)]
    pub phase_durations: BTreeMap<String, u32>,
    /// Phases selectable once the sequential phases are complete.
    #[serde(default)]
    pub operational_phases: Vec<String>,
}

impl PhaseGraph {
    pub fn default_for(workflow_type: WorkflowType) -> Self {
        match workflow_type {
            WorkflowType::NewProject => Self::build(
                &[
                    ("discovery", 60),
                    ("research", 120),
                    ("architecture", 180),
                    ("requirements", 120),
                    ("project-planning", 90),
                    ("environment-setup", 60),
                    ("sprint-preparation", 45),
                ],
                &[
                    ("post-research", "research", "architecture", 1440),
                    ("pre-development", "project-planning", "environment-setup", 1440),
                ],
                &["sprint-execution", "feature-development", "maintenance"],
            ),
            WorkflowType::ExistingProject => Self::build(
                &[
                    ("codebase-analysis", 120),
                    ("documentation-audit", 90),
                    ("gap-assessment", 90),
                    ("improvement-planning", 120),
                    ("implementation-preparation", 60),
                ],
                &[
                    ("post-analysis", "documentation-audit", "gap-assessment", 1440),
                    (
                        "pre-changes",
                        "improvement-planning",
                        "implementation-preparation",
                        2880,
                    ),
                ],
                &["refactoring", "feature-development", "maintenance"],
            ),
        }
    }

    fn build(
        phases: &[(&str, u32)],
        gates: &[(&str, &str, &str, u32)],
        operational: &[&str],
    ) -> Self {
        Self {
            phases: phases.iter().map(|(p, _)| p.to_string()).collect(),
            approval_gates: gates
                .iter()
                .map(|(name, after, before, timeout)| {
                    (
                        name.to_string(),
                        GateDefinition {
                            after: after.to_string(),
                            before: before.to_string(),
                            timeout_minutes: *timeout,
                        },
                    )
                })
                .collect(),
            phase_durations: phases.iter().map(|(p, d)| (p.to_string(), *d)).collect(),
            operational_phases: operational.iter().map(|p| p.to_string()).collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn first_phase(&self) -> Option<&str> {
        self.phases.first().map(String::as_str)
    }

    pub fn position(&self, phase: &str) -> Option<usize> {
        self.phases.iter().position(|p| p == phase)
    }

    pub fn contains(&self, phase: &str) -> bool {
        self.position(phase).is_some()
    }

    pub fn next_phase(&self, phase: &str) -> Option<&str> {
        let i = self.position(phase)?;
        self.phases.get(i + 1).map(String::as_str)
    }

    pub fn gate(&self, name: &str) -> Option<&GateDefinition> {
        self.approval_gates.get(name)
    }

    /// The gate immediately following `phase`, if any.
    pub fn gate_after(&self, phase: &str) -> Option<(&str, &GateDefinition)> {
        self.approval_gates
            .iter()
            .find(|(_, g)| g.after == phase)
            .map(|(name, g)| (name.as_str(), g))
    }

    pub fn duration(&self, phase: &str) -> Option<u32> {
        self.phase_durations.get(phase).copied()
    }

    /// Sum of estimated durations for phases at `from_index` and later.
    pub fn remaining_minutes(&self, from_index: usize) -> u32 {
        self.phases
            .iter()
            .skip(from_index)
            .filter_map(|p| self.duration(p))
            .sum()
    }

    pub fn is_operational(&self, phase: &str) -> bool {
        self.operational_phases.iter().any(|p| p == phase)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Structural problems with this graph. Empty means usable.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.phases.is_empty() {
            problems.push("phase list is empty".to_string());
        }

        let mut seen = HashSet::new();
        for phase in self.phases.iter().chain(self.operational_phases.iter()) {
            if validate_slug(phase).is_err() {
                problems.push(format!("phase name '{phase}' is not a valid slug"));
            }
            if !seen.insert(phase.as_str()) {
                problems.push(format!("phase '{phase}' is listed more than once"));
            }
        }

        let mut gated_phases = HashSet::new();
        for (name, gate) in &self.approval_gates {
            if validate_slug(name).is_err() {
                problems.push(format!("gate name '{name}' is not a valid slug"));
            }
            match (self.position(&gate.after), self.position(&gate.before)) {
                (Some(a), Some(b)) if b == a + 1 => {}
                (Some(_), Some(_)) => problems.push(format!(
                    "gate '{name}': '{}' and '{}' are not consecutive phases",
                    gate.after, gate.before
                )),
                _ => problems.push(format!(
                    "gate '{name}' references unknown phases '{}' → '{}'",
                    gate.after, gate.before
                )),
            }
            if !gated_phases.insert(gate.after.as_str()) {
                problems.push(format!(
                    "more than one gate follows phase '{}'",
                    gate.after
                ));
            }
        }

        for phase in self.phase_durations.keys() {
            if !self.contains(phase) {
                problems.push(format!("duration given for unknown phase '{phase}'"));
            }
        }

        problems
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
