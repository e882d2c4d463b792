#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn flowstate(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("flowstate").unwrap();
    cmd.current_dir(dir.path()).env("FLOWSTATE_ROOT", dir.path());
    cmd
}

fn start_new_project(dir: &TempDir) {
    flowstate(dir)
        .args(["start", "new-project", "--skip-preflight"])
        .assert()
        .success();
}

fn json_of(cmd: &mut Command) -> Value {
    let output = cmd.arg("--json").output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn state_file(dir: &TempDir) -> Value {
    let raw =
        std::fs::read_to_string(dir.path().join(".flowstate/workflow-state.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

/// Drive a new-project workflow to the post-research gate.
fn reach_post_research(dir: &TempDir) {
    start_new_project(dir);
    flowstate(dir).arg("complete").assert().success();
    flowstate(dir)
        .arg("complete")
        .assert()
        .success()
        .stdout(predicate::str::contains("Awaiting approval: post-research"));
}

// ---------------------------------------------------------------------------
// flowstate start / status
// ---------------------------------------------------------------------------

#[test]
fn start_initializes_first_phase() {
    let dir = TempDir::new().unwrap();
    let result = json_of(flowstate(&dir).args(["start", "new-project", "--skip-preflight"]));

    let state = &result["state"];
    assert_eq!(state["current_phase"], "discovery");
    assert_eq!(state["phase_index"], 0);
    assert_eq!(state["phases_completed"], serde_json::json!([]));
    assert!(dir.path().join(".flowstate/workflow-state.json").exists());

    let checkpoints = std::fs::read_dir(dir.path().join(".flowstate/checkpoints"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("cp-"))
        .count();
    assert_eq!(checkpoints, 1);
}

#[test]
fn start_rejects_unknown_type() {
    let dir = TempDir::new().unwrap();
    flowstate(&dir)
        .args(["start", "side-project", "--skip-preflight"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn start_twice_requires_force() {
    let dir = TempDir::new().unwrap();
    start_new_project(&dir);
    flowstate(&dir)
        .args(["start", "existing-project", "--skip-preflight"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("still active"));

    flowstate(&dir)
        .args(["start", "existing-project", "--skip-preflight", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("codebase-analysis"));
}

#[test]
fn start_without_agents_fails_preflight() {
    let dir = TempDir::new().unwrap();
    flowstate(&dir)
        .args(["start", "new-project"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("preflight failed"));
    assert!(!dir.path().join(".flowstate/workflow-state.json").exists());
}

#[test]
fn status_without_workflow() {
    let dir = TempDir::new().unwrap();
    flowstate(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No active workflow"));
}

#[test]
fn status_shows_phase_and_progress_bar() {
    let dir = TempDir::new().unwrap();
    start_new_project(&dir);
    flowstate(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("discovery (1/7)"))
        .stdout(predicate::str::contains("░"));
}

// ---------------------------------------------------------------------------
// Phases and approval gates
// ---------------------------------------------------------------------------

#[test]
fn completing_research_waits_for_gate() {
    let dir = TempDir::new().unwrap();
    reach_post_research(&dir);

    let state = state_file(&dir);
    assert_eq!(state["awaiting_approval"], "post-research");
    assert_eq!(state["can_resume"], false);

    flowstate(&dir)
        .arg("resume")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot resume"));
    flowstate(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("flowstate approve post-research"));
}

#[test]
fn approving_gate_advances_to_target_phase() {
    let dir = TempDir::new().unwrap();
    reach_post_research(&dir);

    let step = json_of(flowstate(&dir).args([
        "approve",
        "post-research",
        "--by",
        "lead",
        "--meta",
        "score=9",
    ]));
    assert_eq!(step["outcome"]["outcome"], "gate_approved");
    let state = &step["state"];
    assert_eq!(state["awaiting_approval"], Value::Null);
    assert_eq!(state["current_phase"], "architecture");
    assert_eq!(state["can_resume"], true);
    assert_eq!(state["approval_gates"]["post-research"]["approved_by"], "lead");
}

#[test]
fn wrong_gate_leaves_state_unchanged() {
    let dir = TempDir::new().unwrap();
    reach_post_research(&dir);
    let before =
        std::fs::read_to_string(dir.path().join(".flowstate/workflow-state.json")).unwrap();

    flowstate(&dir)
        .args(["approve", "wrong-gate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no approval pending"));

    let after =
        std::fs::read_to_string(dir.path().join(".flowstate/workflow-state.json")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn pending_gate_is_within_timeout() {
    let dir = TempDir::new().unwrap();
    reach_post_research(&dir);
    flowstate(&dir)
        .arg("timeouts")
        .assert()
        .success()
        .stdout(predicate::str::contains("post-research"))
        .stdout(predicate::str::contains("within timeout"));
}

#[test]
fn gates_show_pending_then_approved() {
    let dir = TempDir::new().unwrap();
    reach_post_research(&dir);
    let gates = json_of(flowstate(&dir).arg("gates"));
    let gates = gates.as_array().unwrap();
    assert_eq!(gates.len(), 2);
    let research = gates.iter().find(|g| g["name"] == "post-research").unwrap();
    assert_eq!(research["pending"], true);
    assert_eq!(research["before"], "architecture");

    flowstate(&dir)
        .args(["approve", "post-research", "--by", "lead"])
        .assert()
        .success();
    flowstate(&dir)
        .arg("gates")
        .assert()
        .success()
        .stdout(predicate::str::contains("research -> architecture"))
        .stdout(predicate::str::contains("approved"))
        .stdout(predicate::str::contains("lead"));
}

#[test]
fn progress_then_pause_and_resume() {
    let dir = TempDir::new().unwrap();
    start_new_project(&dir);
    flowstate(&dir)
        .args([
            "progress",
            "--created",
            "2",
            "--total",
            "4",
            "--agent",
            "business-analyst=working",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("50%"));

    flowstate(&dir)
        .args(["pause", "--note", "lunch"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved checkpoint cp-"));
    flowstate(&dir)
        .arg("resume")
        .assert()
        .success()
        .stdout(predicate::str::contains("at phase discovery"));
}

#[test]
fn phase_transition_takes_backup() {
    let dir = TempDir::new().unwrap();
    start_new_project(&dir);
    flowstate(&dir)
        .arg("complete")
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup:"));

    let manifests = json_of(flowstate(&dir).args(["backup", "list"]));
    let manifests = manifests.as_array().unwrap();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0]["trigger"]["type"], "phase_transition");
}

// ---------------------------------------------------------------------------
// flowstate validate
// ---------------------------------------------------------------------------

#[test]
fn validate_repairs_decision_log() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join(".flowstate")).unwrap();
    std::fs::write(
        dir.path().join(".flowstate/decisions.json"),
        r#"{"created_at": "2025-01-01T00:00:00Z", "last_updated": "2025-01-02T00:00:00Z",
            "decisions": [{"title": "a"}, {"title": "b"}, {"title": "c"}], "total_count": 5}"#,
    )
    .unwrap();

    flowstate(&dir)
        .args(["validate", "decisions.json", "--repair"])
        .assert()
        .success()
        .stdout(predicate::str::contains("decisions.json: repaired"));

    let raw = std::fs::read_to_string(dir.path().join(".flowstate/decisions.json")).unwrap();
    let repaired: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(repaired["version"], "1.0.0");
    assert_eq!(repaired["total_count"], 3);

    let backups = std::fs::read_dir(dir.path().join(".flowstate"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("decisions.json.backup-")
        })
        .count();
    assert_eq!(backups, 1);
}

#[test]
fn validate_without_repair_reports_failure() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join(".flowstate")).unwrap();
    std::fs::write(
        dir.path().join(".flowstate/decisions.json"),
        r#"{"created_at": "2025-01-01T00:00:00Z", "last_updated": "2025-01-01T00:00:00Z", "decisions": [], "total_count": 2}"#,
    )
    .unwrap();

    flowstate(&dir)
        .arg("validate")
        .assert()
        .failure()
        .stdout(predicate::str::contains("INVALID"))
        .stderr(predicate::str::contains("validation failed: decisions.json"));
}

#[test]
fn validate_clean_workflow() {
    let dir = TempDir::new().unwrap();
    start_new_project(&dir);
    flowstate(&dir)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("workflow-state.json: ok"));
}

// ---------------------------------------------------------------------------
// Checkpoints, backups, recovery
// ---------------------------------------------------------------------------

#[test]
fn checkpoint_list_and_restore() {
    let dir = TempDir::new().unwrap();
    start_new_project(&dir);
    let checkpoints = json_of(flowstate(&dir).args(["checkpoint", "list"]));
    let first = checkpoints[0]["id"].as_str().unwrap().to_string();
    assert_eq!(checkpoints[0]["verified"], true);

    flowstate(&dir).arg("complete").assert().success();
    assert_eq!(state_file(&dir)["current_phase"], "research");

    flowstate(&dir)
        .args(["checkpoint", "restore", &first])
        .assert()
        .success()
        .stdout(predicate::str::contains("at phase discovery"));
    assert_eq!(state_file(&dir)["current_phase"], "discovery");
}

#[test]
fn restore_unknown_checkpoint_fails() {
    let dir = TempDir::new().unwrap();
    start_new_project(&dir);
    flowstate(&dir)
        .args(["checkpoint", "restore", "cp-nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("checkpoint not found"));
}

#[test]
fn backup_create_and_verify() {
    let dir = TempDir::new().unwrap();
    start_new_project(&dir);
    let manifest = json_of(flowstate(&dir).args(["backup", "create"]));
    let id = manifest["id"].as_str().unwrap().to_string();
    assert!(manifest["files"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f == "workflow-state.json"));

    flowstate(&dir)
        .args(["backup", "verify", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup is intact."));
}

#[test]
fn recover_corruption_without_checkpoints_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join(".flowstate")).unwrap();
    std::fs::write(dir.path().join(".flowstate/workflow-state.json"), "{not json").unwrap();

    flowstate(&dir)
        .args(["recover", "state-corruption"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Recovery failed"));
    assert!(dir.path().join(".flowstate/logs/errors.jsonl").exists());
}

#[test]
fn recover_corruption_restores_checkpoint() {
    let dir = TempDir::new().unwrap();
    start_new_project(&dir);
    let workflow_id = state_file(&dir)["workflow_id"].as_str().unwrap().to_string();
    std::fs::write(dir.path().join(".flowstate/workflow-state.json"), "{not json").unwrap();

    flowstate(&dir)
        .args(["recover", "state-corruption", "--message", "truncated write"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Restored workflow {workflow_id}")));
    assert_eq!(state_file(&dir)["workflow_id"], workflow_id.as_str());
    flowstate(&dir).arg("validate").assert().success();
}

#[test]
fn recover_agent_failure_skips_agent() {
    let dir = TempDir::new().unwrap();
    start_new_project(&dir);
    flowstate(&dir)
        .args(["recover", "agent-failure", "--agent", "ui-ux-designer"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Skipped agent 'ui-ux-designer'"));
}

#[test]
fn recover_critical_agent_failure_needs_intervention() {
    let dir = TempDir::new().unwrap();
    start_new_project(&dir);
    flowstate(&dir)
        .args([
            "recover",
            "agent-failure",
            "--agent",
            "project-planner",
            "--critical",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("manual intervention required"));
    assert!(dir.path().join(".flowstate/logs/interventions").is_dir());
}

// ---------------------------------------------------------------------------
// preflight / decision / config
// ---------------------------------------------------------------------------

#[test]
fn preflight_with_descriptors() {
    let dir = TempDir::new().unwrap();
    flowstate(&dir)
        .args(["preflight", "new-project"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("business-analyst"));

    let agents = dir.path().join(".claude/agents");
    std::fs::create_dir_all(&agents).unwrap();
    for name in [
        "business-analyst",
        "technical-researcher",
        "solution-architect",
        "project-planner",
    ] {
        std::fs::write(
            agents.join(format!("{name}.md")),
            format!("---\nname: {name}\n---\nAgent body.\n"),
        )
        .unwrap();
    }

    flowstate(&dir)
        .args(["preflight", "new-project"])
        .assert()
        .success()
        .stdout(predicate::str::contains("optional agent 'ui-ux-designer'"))
        .stdout(predicate::str::contains("Preflight passed"));
    flowstate(&dir).args(["start", "new-project"]).assert().success();
}

#[test]
fn plan_requires_parallel_mode() {
    let dir = TempDir::new().unwrap();
    start_new_project(&dir);
    flowstate(&dir)
        .args(["plan", "--unit", "docs/prd.md"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("parallel mode"));
}

#[test]
fn plan_keeps_each_file_with_one_agent() {
    let dir = TempDir::new().unwrap();
    flowstate(&dir)
        .args(["start", "new-project", "--skip-preflight", "--parallel"])
        .assert()
        .success();

    let plan = json_of(flowstate(&dir).args([
        "plan",
        "--unit",
        "docs/prd.md:requirements",
        "--unit",
        "docs/prd.md:requirements",
        "--unit",
        "docs/arch.md:architecture",
        "--agent",
        "alpha",
        "--agent",
        "beta",
    ]));
    let plan = plan.as_array().unwrap();
    assert_eq!(plan.len(), 2);
    let owners: Vec<&Value> = plan
        .iter()
        .filter(|a| {
            a["units"]
                .as_array()
                .unwrap()
                .iter()
                .any(|u| u["path"] == "docs/prd.md")
        })
        .collect();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0]["units"].as_array().unwrap().len(), 2);
}

#[test]
fn decisions_are_numbered() {
    let dir = TempDir::new().unwrap();
    start_new_project(&dir);
    flowstate(&dir)
        .args(["decision", "add", "Use Postgres", "--rationale", "team knows it"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded D-001"));
    flowstate(&dir)
        .args(["decision", "add", "Monorepo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded D-002"));

    flowstate(&dir)
        .args(["decision", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Use Postgres"))
        .stdout(predicate::str::contains("discovery"));
    assert_eq!(state_file(&dir)["metrics"]["decisions_made"], 2);
}

#[test]
fn config_validate_defaults() {
    let dir = TempDir::new().unwrap();
    flowstate(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_with_broken_graph_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join(".flowstate")).unwrap();
    std::fs::write(
        dir.path().join(".flowstate/config.yaml"),
        "workflows:\n  new-project:\n    phases: []\n    approval_gates: {}\n    operational_phases: []\n",
    )
    .unwrap();

    flowstate(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"));
    flowstate(&dir)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid config"));
}
