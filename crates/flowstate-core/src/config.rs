use crate::error::{Error, Result};
use crate::graph::PhaseGraph;
use crate::parallel::ConflictPolicy;
use crate::paths;
use crate::types::WorkflowType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// BackupConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_interval")]
    pub interval_minutes: u32,
    /// State-dir-relative files that are snapshotted and whose changes
    /// always trigger a backup.
    #[serde(default = "default_critical_files")]
    pub critical_files: Vec<String>,
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    #[serde(default = "default_compress_threshold")]
    pub compress_threshold_bytes: u64,
}

fn default_backup_interval() -> u32 {
    30
}

fn default_critical_files() -> Vec<String> {
    vec![
        paths::WORKFLOW_STATE_FILE.to_string(),
        paths::DECISIONS_FILE.to_string(),
        paths::SPRINT_STATUS_FILE.to_string(),
    ]
}

fn default_max_backups() -> usize {
    20
}

fn default_compress_threshold() -> u64 {
    1024 * 1024
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_backup_interval(),
            critical_files: default_critical_files(),
            max_backups: default_max_backups(),
            compress_threshold_bytes: default_compress_threshold(),
        }
    }
}

impl BackupConfig {
    pub fn is_critical(&self, relative: &str) -> bool {
        let relative = relative.trim_start_matches("./");
        self.critical_files.iter().any(|c| c == relative)
    }
}

// ---------------------------------------------------------------------------
// CheckpointConfig / RecoveryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,
}

fn default_max_checkpoints() -> usize {
    20
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            max_checkpoints: default_max_checkpoints(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    500
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_delay(),
        }
    }
}

// ---------------------------------------------------------------------------
// ParallelConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default = "default_total_memory")]
    pub total_memory_mb: u64,
    #[serde(default = "default_total_cpu")]
    pub total_cpu_shares: u32,
    #[serde(default = "default_total_handles")]
    pub total_file_handles: u32,
    /// Priority weight per work-unit category; unknown categories weigh 1.0.
    #[serde(default)]
    pub category_weights: BTreeMap<String, f64>,
}

fn default_total_memory() -> u64 {
    4096
}

fn default_total_cpu() -> u32 {
    100
}

fn default_total_handles() -> u32 {
    256
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            total_memory_mb: default_total_memory(),
            total_cpu_shares: default_total_cpu(),
            total_file_handles: default_total_handles(),
            category_weights: BTreeMap::new(),
        }
    }
}

impl ParallelConfig {
    pub fn weight_for(&self, category: &str) -> f64 {
        self.category_weights.get(category).copied().unwrap_or(1.0)
    }
}

// ---------------------------------------------------------------------------
// AgentsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequirement {
    pub name: String,
    #[serde(default)]
    pub optional: bool,
}

impl AgentRequirement {
    fn required(name: &str) -> Self {
        Self {
            name: name.to_string(),
            optional: false,
        }
    }

    fn optional(name: &str) -> Self {
        Self {
            name: name.to_string(),
            optional: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Root-relative directory holding `<agent>.md` descriptors.
    #[serde(default = "default_descriptor_dir")]
    pub descriptor_dir: String,
    #[serde(default = "default_required_agents")]
    pub required: BTreeMap<WorkflowType, Vec<AgentRequirement>>,
}

fn default_descriptor_dir() -> String {
    ".claude/agents".to_string()
}

fn default_required_agents() -> BTreeMap<WorkflowType, Vec<AgentRequirement>> {
    let mut m = BTreeMap::new();
    m.insert(
        WorkflowType::NewProject,
        vec![
            AgentRequirement::required("business-analyst"),
            AgentRequirement::required("technical-researcher"),
            AgentRequirement::required("solution-architect"),
            AgentRequirement::required("project-planner"),
            AgentRequirement::optional("ui-ux-designer"),
        ],
    );
    m.insert(
        WorkflowType::ExistingProject,
        vec![
            AgentRequirement::required("codebase-analyzer"),
            AgentRequirement::required("documentation-specialist"),
            AgentRequirement::required("project-planner"),
            AgentRequirement::optional("refactoring-specialist"),
        ],
    );
    m
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            descriptor_dir: default_descriptor_dir(),
            required: default_required_agents(),
        }
    }
}

impl AgentsConfig {
    pub fn for_workflow(&self, workflow_type: WorkflowType) -> &[AgentRequirement] {
        self.required
            .get(&workflow_type)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Overrides for the built-in phase graphs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub workflows: BTreeMap<WorkflowType, PhaseGraph>,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub parallel: ParallelConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            workflows: BTreeMap::new(),
            backup: BackupConfig::default(),
            checkpoints: CheckpointConfig::default(),
            recovery: RecoveryConfig::default(),
            parallel: ParallelConfig::default(),
            agents: AgentsConfig::default(),
        }
    }
}

impl Config {
    pub fn graph_for(&self, workflow_type: WorkflowType) -> PhaseGraph {
        self.workflows
            .get(&workflow_type)
            .cloned()
            .unwrap_or_else(|| PhaseGraph::default_for(workflow_type))
    }

    /// Parse `.flowstate/config.yaml` without validating it. Defaults apply
    /// when the file is absent.
    pub fn read(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    /// Load `.flowstate/config.yaml`, rejecting error-level problems.
    pub fn load(root: &Path) -> Result<Self> {
        let cfg = Self::read(root)?;
        let errors: Vec<String> = cfg
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if !errors.is_empty() {
            return Err(Error::InvalidConfig(errors.join("; ")));
        }
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for (workflow_type, graph) in &self.workflows {
            for problem in graph.problems() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("workflows.{workflow_type}: {problem}"),
                });
            }
        }

        if self.backup.max_backups == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "backup.max_backups must be at least 1".to_string(),
            });
        }
        if self.checkpoints.max_checkpoints == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "checkpoints.max_checkpoints must be at least 1".to_string(),
            });
        }
        if self.backup.critical_files.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "backup.critical_files is empty: backups will contain no files"
                    .to_string(),
            });
        }
        if self.recovery.max_retries > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "recovery.max_retries={} (>10 is unusual)",
                    self.recovery.max_retries
                ),
            });
        }

        for (category, weight) in &self.parallel.category_weights {
            if !weight.is_finite() || *weight <= 0.0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "parallel.category_weights.{category} must be a positive number"
                    ),
                });
            }
        }

        for (workflow_type, agents) in &self.agents.required {
            for agent in agents {
                if crate::paths::validate_slug(&agent.name).is_err() {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!(
                            "agents.required.{workflow_type}: '{}' is not a valid agent name",
                            agent.name
                        ),
                    });
                }
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.backup.interval_minutes, 30);
        assert_eq!(cfg.backup.max_backups, 20);
        assert_eq!(cfg.checkpoints.max_checkpoints, 20);
        assert_eq!(cfg.backup.compress_threshold_bytes, 1024 * 1024);
    }

    #[test]
    fn default_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        Config::default().save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(
            loaded.agents.for_workflow(WorkflowType::NewProject).len(),
            5
        );
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "backup:\n  interval_minutes: 5\nparallel:\n  conflict_policy: split\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.backup.interval_minutes, 5);
        assert_eq!(cfg.backup.max_backups, 20);
        assert_eq!(cfg.parallel.conflict_policy, ConflictPolicy::Split);
    }

    #[test]
    fn graph_override_replaces_default() {
        let yaml = "workflows:\n  new-project:\n    phases: [alpha, beta]\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.graph_for(WorkflowType::NewProject).phases, ["alpha", "beta"]);
        assert_eq!(
            cfg.graph_for(WorkflowType::ExistingProject).first_phase(),
            Some("codebase-analysis")
        );
    }

    #[test]
    fn broken_graph_fails_load() {
        let dir = TempDir::new().unwrap();
        let yaml = "workflows:\n  new-project:\n    phases: [alpha, beta]\n    approval_gates:\n      g:\n        after: beta\n        before: alpha\n";
        crate::io::atomic_write(&paths::config_path(dir.path()), yaml.as_bytes()).unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn critical_file_match_ignores_dot_slash() {
        let cfg = BackupConfig::default();
        assert!(cfg.is_critical("./workflow-state.json"));
        assert!(!cfg.is_critical("notes.md"));
    }

    #[test]
    fn zero_retention_is_an_error() {
        let mut cfg = Config::default();
        cfg.backup.max_backups = 0;
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("max_backups")));
    }
}
