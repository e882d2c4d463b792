//! Integrity checks for the JSON documents in the state directory.
//!
//! Three independent checks run on every file: JSON well-formedness,
//! schema conformance (per file name), and semantic consistency. Every
//! check runs even when an earlier one fails so the report is complete.
//!
//! Repairs only touch fields with an unambiguous default. The original is
//! copied to `<file>.backup-<timestamp>` before the repaired document is
//! written, and the report records `repaired: true`.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::io;
use crate::paths;
use crate::types::{WorkflowState, WorkflowType, STATE_VERSION};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    String,
    Integer,
    Bool,
    Array,
    Object,
    Null,
}

impl Kind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Kind::String => value.is_string(),
            Kind::Integer => value.is_u64() || value.is_i64(),
            Kind::Bool => value.is_boolean(),
            Kind::Array => value.is_array(),
            Kind::Object => value.is_object(),
            Kind::Null => value.is_null(),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::String => "string",
            Kind::Integer => "integer",
            Kind::Bool => "boolean",
            Kind::Array => "array",
            Kind::Object => "object",
            Kind::Null => "null",
        };
        f.write_str(s)
    }
}

struct Field {
    name: &'static str,
    kinds: &'static [Kind],
}

const fn field(name: &'static str, kinds: &'static [Kind]) -> Field {
    Field { name, kinds }
}

const STR: &[Kind] = &[Kind::String];
const STR_OR_NULL: &[Kind] = &[Kind::String, Kind::Null];
const INT: &[Kind] = &[Kind::Integer];
const BOOL: &[Kind] = &[Kind::Bool];
const ARRAY: &[Kind] = &[Kind::Array];
const OBJECT: &[Kind] = &[Kind::Object];

const WORKFLOW_STATE_FIELDS: &[Field] = &[
    field("version", STR),
    field("workflow_id", STR),
    field("workflow_type", STR),
    field("current_phase", STR_OR_NULL),
    field("phase_index", INT),
    field("phases_completed", ARRAY),
    field("approval_gates", OBJECT),
    field("awaiting_approval", STR_OR_NULL),
    field("can_resume", BOOL),
    field("created_at", STR),
    field("last_updated", STR),
];

const DECISIONS_FIELDS: &[Field] = &[
    field("version", STR),
    field("created_at", STR),
    field("last_updated", STR),
    field("decisions", ARRAY),
    field("total_count", INT),
];

const SPRINT_STATUS_FIELDS: &[Field] = &[
    field("version", STR),
    field("created_at", STR),
    field("last_updated", STR),
    field("current_sprint", STR_OR_NULL),
    field("sprints", ARRAY),
    field("total_count", INT),
];

fn schema_for(file: &str) -> Option<&'static [Field]> {
    match file {
        paths::WORKFLOW_STATE_FILE => Some(WORKFLOW_STATE_FIELDS),
        paths::DECISIONS_FILE => Some(DECISIONS_FIELDS),
        paths::SPRINT_STATUS_FILE => Some(SPRINT_STATUS_FIELDS),
        _ => None,
    }
}

/// Whether `file` is one of the state documents with a known schema.
pub fn has_schema(file: &str) -> bool {
    schema_for(file).is_some()
}

/// `(array field, counter field)` pairs whose lengths must agree.
fn counted_arrays(file: &str) -> &'static [(&'static str, &'static str)] {
    match file {
        paths::DECISIONS_FILE => &[("decisions", "total_count")],
        paths::SPRINT_STATUS_FILE => &[("sprints", "total_count")],
        _ => &[],
    }
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Syntax,
    Schema,
    Semantic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub check: CheckKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    pub repairable: bool,
}

impl ValidationIssue {
    fn new(check: CheckKind, field: Option<&str>, message: String, repairable: bool) -> Self {
        Self {
            check,
            field: field.map(str::to_string),
            message,
            repairable,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub file: String,
    pub valid: bool,
    pub repaired: bool,
    pub errors: Vec<ValidationIssue>,
    pub repairs: Vec<String>,
    pub unrepaired: Vec<ValidationIssue>,
    pub backup_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
    pub checked_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

pub struct Validator<'a> {
    root: &'a Path,
    config: &'a Config,
}

impl<'a> Validator<'a> {
    pub fn new(root: &'a Path, config: &'a Config) -> Self {
        Self { root, config }
    }

    /// Run all three checks against `raw` as if it were the file `file`.
    pub fn check(&self, file: &str, raw: &str) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let parsed = match serde_json::from_str::<Value>(raw) {
            Ok(v) => Some(v),
            Err(e) => {
                issues.push(ValidationIssue::new(
                    CheckKind::Syntax,
                    None,
                    format!("invalid JSON: {e}"),
                    false,
                ));
                None
            }
        };

        match &parsed {
            Some(value) => {
                issues.extend(self.check_schema(file, value));
                issues.extend(self.check_semantics(file, value));
            }
            None if schema_for(file).is_some() => {
                for check in [CheckKind::Schema, CheckKind::Semantic] {
                    issues.push(ValidationIssue::new(
                        check,
                        None,
                        "not checked: document did not parse".to_string(),
                        false,
                    ));
                }
            }
            None => {}
        }
        issues
    }

    /// Check an in-memory workflow state before it is persisted.
    pub fn check_state(&self, state: &WorkflowState) -> Result<Vec<ValidationIssue>> {
        let value = serde_json::to_value(state)?;
        let mut issues = self.check_schema(paths::WORKFLOW_STATE_FILE, &value);
        issues.extend(self.check_semantics(paths::WORKFLOW_STATE_FILE, &value));
        Ok(issues)
    }

    /// Fail with `StateCorruption` unless `state` passes every check.
    pub fn ensure_state(&self, state: &WorkflowState) -> Result<()> {
        let issues = self.check_state(state)?;
        if issues.is_empty() {
            return Ok(());
        }
        let reason = issues
            .iter()
            .map(|i| i.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::StateCorruption {
            file: paths::WORKFLOW_STATE_FILE.to_string(),
            reason,
        })
    }

    fn check_schema(&self, file: &str, value: &Value) -> Vec<ValidationIssue> {
        let Some(fields) = schema_for(file) else {
            return Vec::new();
        };
        let Some(obj) = value.as_object() else {
            return vec![ValidationIssue::new(
                CheckKind::Schema,
                None,
                "document root must be an object".to_string(),
                false,
            )];
        };

        let mut issues = Vec::new();
        for f in fields {
            match obj.get(f.name) {
                None => issues.push(ValidationIssue::new(
                    CheckKind::Schema,
                    Some(f.name),
                    format!("missing required field '{}'", f.name),
                    is_defaultable(file, f.name),
                )),
                Some(v) if !f.kinds.iter().any(|k| k.matches(v)) => {
                    let expected: Vec<String> = f.kinds.iter().map(|k| k.to_string()).collect();
                    issues.push(ValidationIssue::new(
                        CheckKind::Schema,
                        Some(f.name),
                        format!(
                            "field '{}' must be {}, found {}",
                            f.name,
                            expected.join(" or "),
                            kind_name(v)
                        ),
                        false,
                    ));
                }
                Some(_) => {}
            }
        }
        issues
    }

    fn check_semantics(&self, file: &str, value: &Value) -> Vec<ValidationIssue> {
        let Some(obj) = value.as_object() else {
            return Vec::new();
        };
        let mut issues = Vec::new();
        if schema_for(file).is_some() {
            issues.extend(check_timestamps(obj));
        }

        for &(array, counter) in counted_arrays(file) {
            if let (Some(items), Some(count)) = (
                obj.get(array).and_then(Value::as_array),
                obj.get(counter).and_then(Value::as_u64),
            ) {
                if items.len() as u64 != count {
                    issues.push(ValidationIssue::new(
                        CheckKind::Semantic,
                        Some(counter),
                        format!(
                            "{counter} is {count} but {array} has {} entries",
                            items.len()
                        ),
                        true,
                    ));
                }
            }
        }

        match file {
            paths::WORKFLOW_STATE_FILE => issues.extend(self.check_workflow(obj)),
            paths::SPRINT_STATUS_FILE => {
                if let Some(sprint) = obj.get("current_sprint").and_then(Value::as_str) {
                    if !paths::sprint_dir(self.root, sprint).is_dir() {
                        issues.push(ValidationIssue::new(
                            CheckKind::Semantic,
                            Some("current_sprint"),
                            format!("current_sprint '{sprint}' has no directory under sprints/"),
                            false,
                        ));
                    }
                }
            }
            _ => {}
        }
        issues
    }

    fn check_workflow(&self, obj: &Map<String, Value>) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let completed: Vec<&str> = obj
            .get("phases_completed")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        if let Some(index) = obj.get("phase_index") {
            match index.as_u64() {
                Some(i) if i as usize > completed.len() => issues.push(ValidationIssue::new(
                    CheckKind::Semantic,
                    Some("phase_index"),
                    format!(
                        "phase_index {i} exceeds the {} completed phases",
                        completed.len()
                    ),
                    false,
                )),
                None if index.is_i64() => issues.push(ValidationIssue::new(
                    CheckKind::Semantic,
                    Some("phase_index"),
                    "phase_index must not be negative".to_string(),
                    false,
                )),
                _ => {}
            }
        }

        let mut seen = HashSet::new();
        for phase in &completed {
            if !seen.insert(*phase) {
                issues.push(ValidationIssue::new(
                    CheckKind::Semantic,
                    Some("phases_completed"),
                    format!("phase '{phase}' is completed more than once"),
                    false,
                ));
            }
        }

        if let Some(t) = obj
            .get("workflow_type")
            .and_then(Value::as_str)
            .and_then(|s| WorkflowType::from_str(s).ok())
        {
            let graph = self.config.graph_for(t);
            if completed.len() > graph.len() {
                issues.push(ValidationIssue::new(
                    CheckKind::Semantic,
                    Some("phases_completed"),
                    format!(
                        "{} completed phases exceed the {} phases of {t}",
                        completed.len(),
                        graph.len()
                    ),
                    false,
                ));
            }
            for phase in &completed {
                if !graph.contains(phase) {
                    issues.push(ValidationIssue::new(
                        CheckKind::Semantic,
                        Some("phases_completed"),
                        format!("completed phase '{phase}' is not part of {t}"),
                        false,
                    ));
                }
            }
        }

        if let Some(gate) = obj.get("awaiting_approval").and_then(Value::as_str) {
            let known = obj
                .get("approval_gates")
                .and_then(Value::as_object)
                .is_some_and(|g| g.contains_key(gate));
            if !known {
                issues.push(ValidationIssue::new(
                    CheckKind::Semantic,
                    Some("awaiting_approval"),
                    format!("awaiting_approval names unknown gate '{gate}'"),
                    false,
                ));
            }
        }

        if let Some(count) = obj
            .get("metrics")
            .and_then(|m| m.get("phases_completed"))
            .and_then(Value::as_u64)
        {
            if count as usize != completed.len() {
                issues.push(ValidationIssue::new(
                    CheckKind::Semantic,
                    Some("metrics.phases_completed"),
                    format!(
                        "metrics.phases_completed is {count} but {} phases are completed",
                        completed.len()
                    ),
                    true,
                ));
            }
        }
        issues
    }

    // -----------------------------------------------------------------------
    // File-level validation and repair
    // -----------------------------------------------------------------------

    /// Validate a state-directory file, optionally repairing it. A report is
    /// written to `integrity-reports/` whenever problems were found.
    pub fn validate_file(&self, file: &str, repair: bool) -> Result<ValidationReport> {
        let path = paths::state_file(self.root, file);
        let now = Utc::now();
        let raw = std::fs::read_to_string(&path)?;
        let errors = self.check(file, &raw);

        let mut report = ValidationReport {
            file: file.to_string(),
            valid: errors.is_empty(),
            repaired: false,
            errors: errors.clone(),
            repairs: Vec::new(),
            unrepaired: errors.clone(),
            backup_path: None,
            report_path: None,
            checked_at: now,
        };
        if errors.is_empty() {
            return Ok(report);
        }

        if repair && errors.iter().any(|e| e.repairable) {
            if let Ok(mut value) = serde_json::from_str::<Value>(&raw) {
                let repairs = repair_value(file, &mut value, now);
                if !repairs.is_empty() {
                    let backup = backup_path_for(&path, now);
                    std::fs::copy(&path, &backup)?;
                    io::write_json(&path, &value)?;
                    tracing::warn!(
                        file = %file,
                        backup = %backup.display(),
                        repairs = repairs.len(),
                        "state file repaired"
                    );
                    let remaining = self.check(file, &serde_json::to_string(&value)?);
                    report.repaired = true;
                    report.repairs = repairs;
                    report.valid = remaining.is_empty();
                    report.unrepaired = remaining;
                    report.backup_path = Some(backup);
                }
            }
        }

        report.report_path = Some(self.write_report(&report)?);
        if !report.valid {
            tracing::warn!(
                file = %file,
                problems = report.unrepaired.len(),
                "state file has unrepaired problems"
            );
        }
        Ok(report)
    }

    /// Validate every JSON document directly under the state directory.
    pub fn validate_all(&self, repair: bool) -> Result<Vec<ValidationReport>> {
        let dir = paths::state_dir(self.root);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();
        names
            .iter()
            .map(|name| self.validate_file(name, repair))
            .collect()
    }

    fn write_report(&self, report: &ValidationReport) -> Result<PathBuf> {
        let stem = report.file.trim_end_matches(".json");
        let path = paths::integrity_reports_dir(self.root).join(format!(
            "{stem}-{}.json",
            io::file_timestamp(report.checked_at)
        ));
        io::write_json(&path, report)?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_defaultable(file: &str, field: &str) -> bool {
    matches!(field, "version" | "created_at" | "last_updated")
        || counted_arrays(file).iter().any(|(_, c)| *c == field)
}

fn parse_ts(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn check_timestamps(obj: &Map<String, Value>) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for name in ["created_at", "last_updated"] {
        if let Some(v) = obj.get(name).filter(|v| v.is_string()) {
            if parse_ts(Some(v)).is_none() {
                issues.push(ValidationIssue::new(
                    CheckKind::Semantic,
                    Some(name),
                    format!("{name} is not an RFC 3339 timestamp"),
                    true,
                ));
            }
        }
    }
    if let (Some(created), Some(updated)) = (
        parse_ts(obj.get("created_at")),
        parse_ts(obj.get("last_updated")),
    ) {
        if updated < created {
            issues.push(ValidationIssue::new(
                CheckKind::Semantic,
                Some("last_updated"),
                "last_updated is earlier than created_at".to_string(),
                true,
            ));
        }
    }
    issues
}

/// Apply every safe repair to `value`; returns a description of each.
fn repair_value(file: &str, value: &mut Value, now: DateTime<Utc>) -> Vec<String> {
    let Some(obj) = value.as_object_mut() else {
        return Vec::new();
    };
    let mut repairs = Vec::new();
    let now_str = now.to_rfc3339();

    if schema_for(file).is_some() && !obj.contains_key("version") {
        obj.insert("version".to_string(), Value::from(STATE_VERSION));
        repairs.push(format!("set version to \"{STATE_VERSION}\""));
    }

    if schema_for(file).is_some() {
        for name in ["created_at", "last_updated"] {
            if parse_ts(obj.get(name)).is_none() {
                obj.insert(name.to_string(), Value::from(now_str.clone()));
                repairs.push(format!("set {name} to now"));
            }
        }
        if let (Some(created), Some(updated)) = (
            parse_ts(obj.get("created_at")),
            parse_ts(obj.get("last_updated")),
        ) {
            if updated < created {
                obj.insert("last_updated".to_string(), Value::from(now_str.clone()));
                repairs.push("set last_updated to now (was before created_at)".to_string());
            }
        }
    }

    for &(array, counter) in counted_arrays(file) {
        if let Some(len) = obj.get(array).and_then(Value::as_array).map(Vec::len) {
            let current = obj.get(counter).and_then(Value::as_u64);
            if current != Some(len as u64) {
                obj.insert(counter.to_string(), Value::from(len as u64));
                repairs.push(format!("recomputed {counter} = {len} from {array}"));
            }
        }
    }

    if file == paths::WORKFLOW_STATE_FILE {
        let len = obj
            .get("phases_completed")
            .and_then(Value::as_array)
            .map(Vec::len);
        if let (Some(len), Some(metrics)) = (len, obj.get_mut("metrics").and_then(Value::as_object_mut)) {
            let current = metrics.get("phases_completed").and_then(Value::as_u64);
            if current.is_some() && current != Some(len as u64) {
                metrics.insert("phases_completed".to_string(), Value::from(len as u64));
                repairs.push(format!("recomputed metrics.phases_completed = {len}"));
            }
        }
    }

    repairs
}

fn backup_path_for(path: &Path, at: DateTime<Utc>) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.backup-{}", io::file_timestamp(at)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
