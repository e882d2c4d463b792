//! Agent availability preflight.
//!
//! A required agent that is not ready fails the preflight and blocks
//! `start`; an optional one only produces a warning.

use crate::config::AgentsConfig;
use crate::types::WorkflowType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub exists: bool,
    pub responsive: bool,
    pub resources_available: bool,
}

pub trait AgentProbe {
    fn probe(&self, agent: &str) -> ProbeResult;
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentCheck {
    pub name: String,
    pub required: bool,
    pub exists: bool,
    pub responsive: bool,
    pub ready: bool,
    pub resources_available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub workflow_type: WorkflowType,
    pub agents: Vec<AgentCheck>,
    pub passed: bool,
    pub warnings: Vec<String>,
}

impl PreflightReport {
    /// Required agents that are not ready.
    pub fn blocking(&self) -> Vec<&str> {
        self.agents
            .iter()
            .filter(|a| a.required && !a.ready)
            .map(|a| a.name.as_str())
            .collect()
    }
}

pub fn run_preflight(
    workflow_type: WorkflowType,
    agents: &AgentsConfig,
    probe: &dyn AgentProbe,
) -> PreflightReport {
    let mut checks = Vec::new();
    let mut warnings = Vec::new();
    for requirement in agents.for_workflow(workflow_type) {
        let result = probe.probe(&requirement.name);
        let ready = result.exists && result.responsive && result.resources_available;
        if !ready {
            let what = describe_failure(&result);
            if requirement.optional {
                warnings.push(format!("optional agent '{}' {what}", requirement.name));
            } else {
                tracing::warn!(agent = %requirement.name, problem = %what, "required agent not ready");
            }
        }
        checks.push(AgentCheck {
            name: requirement.name.clone(),
            required: !requirement.optional,
            exists: result.exists,
            responsive: result.responsive,
            ready,
            resources_available: result.resources_available,
        });
    }
    let passed = checks.iter().all(|c| !c.required || c.ready);
    PreflightReport {
        workflow_type,
        agents: checks,
        passed,
        warnings,
    }
}

fn describe_failure(result: &ProbeResult) -> &'static str {
    if !result.exists {
        "has no descriptor"
    } else if !result.responsive {
        "did not respond"
    } else {
        "has no resources available"
    }
}

// ---------------------------------------------------------------------------
// DescriptorProbe
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DescriptorMeta {
    name: String,
    #[serde(default)]
    status: Option<String>,
}

/// Probes `<descriptor_dir>/<agent>.md` files with YAML frontmatter.
pub struct DescriptorProbe {
    dir: PathBuf,
}

impl DescriptorProbe {
    pub fn new(root: &Path, agents: &AgentsConfig) -> Self {
        Self {
            dir: root.join(&agents.descriptor_dir),
        }
    }
}

impl AgentProbe for DescriptorProbe {
    fn probe(&self, agent: &str) -> ProbeResult {
        let path = self.dir.join(format!("{agent}.md"));
        let Ok(content) = std::fs::read_to_string(&path) else {
            return ProbeResult::default();
        };
        let meta = extract_frontmatter(&content)
            .and_then(|fm| serde_yaml::from_str::<DescriptorMeta>(fm).ok());
        match meta {
            Some(meta) if meta.name == agent => ProbeResult {
                exists: true,
                responsive: true,
                resources_available: meta.status.as_deref() != Some("disabled"),
            },
            _ => ProbeResult {
                exists: true,
                ..ProbeResult::default()
            },
        }
    }
}

/// The YAML between the opening and closing `---` lines.
fn extract_frontmatter(content: &str) -> Option<&str> {
    let rest = content.strip_prefix("---")?;
    let rest = rest
        .strip_prefix('\n')
        .or_else(|| rest.strip_prefix("\r\n"))?;
    let end = rest.find("\n---")?;
    Some(&rest[..end])
}
