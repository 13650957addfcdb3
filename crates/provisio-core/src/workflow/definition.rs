//! Workflow definition parsing, validation, and filesystem discovery.
//!
//! Converts between YAML template files and the canonical `WorkflowDefinition`,
//! validates structural constraints (unique IDs, resolvable references,
//! phase membership, acyclic dependencies), and discovers template files on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use provisio_types::workflow::WorkflowDefinition;
use thiserror::Error;

use super::dag::StepGraph;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or registering a definition.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// The definition violates one or more structural rules.
    #[error("definition rejected: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    ensure_valid(&def)?;
    Ok(def)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Collect every structural violation in a definition.
///
/// An empty result means the definition is acceptable. Checks:
/// - at least one phase and one step
/// - unique phase names and unique step IDs
/// - every step's phase is declared
/// - `depends_on` references exist and never point into a later phase
/// - parallel-group members exist, are parallel-eligible, and belong to one group
/// - `max_concurrency >= 1` and `retry_attempts >= 1`
/// - rollback steps reference existing steps and name at least one action
/// - no dependency cycles (reported once, without enumerating members)
pub fn validate_definition(def: &WorkflowDefinition) -> Vec<String> {
    let mut violations = Vec::new();

    if def.id.trim().is_empty() {
        violations.push("workflow id must not be empty".to_string());
    }
    if def.phases.is_empty() {
        violations.push("workflow must declare at least one phase".to_string());
    }
    if def.steps.is_empty() {
        violations.push("workflow must have at least one step".to_string());
    }

    let mut phases = HashSet::new();
    for phase in &def.phases {
        if !phases.insert(phase.as_str()) {
            violations.push(format!("duplicate phase: '{phase}'"));
        }
    }

    let mut step_ids = HashSet::new();
    for step in &def.steps {
        if !step_ids.insert(step.id.as_str()) {
            violations.push(format!("duplicate step ID: '{}'", step.id));
        }
    }

    let phase_position = |name: &str| def.phases.iter().position(|p| p == name);

    for step in &def.steps {
        if !phases.contains(step.phase.as_str()) {
            violations.push(format!(
                "step '{}' belongs to undeclared phase '{}'",
                step.id, step.phase
            ));
        }
        if step.retry_attempts == 0 {
            violations.push(format!("step '{}' must allow at least one attempt", step.id));
        }
        for dep in &step.depends_on {
            let Some(dep_step) = def.step(dep) else {
                violations.push(format!(
                    "step '{}' depends on unknown step '{dep}'",
                    step.id
                ));
                continue;
            };
            if let (Some(own), Some(theirs)) =
                (phase_position(&step.phase), phase_position(&dep_step.phase))
            {
                if theirs > own {
                    violations.push(format!(
                        "step '{}' depends on '{dep}' from later phase '{}'",
                        step.id, dep_step.phase
                    ));
                }
            }
        }
    }

    let mut grouped = HashSet::new();
    for group in &def.parallel_groups {
        if group.max_concurrency == 0 {
            violations.push(format!(
                "parallel group '{}' must allow at least one concurrent step",
                group.id
            ));
        }
        for member in &group.steps {
            match def.step(member) {
                None => violations.push(format!(
                    "parallel group '{}' references unknown step '{member}'",
                    group.id
                )),
                Some(step) if !step.parallel => violations.push(format!(
                    "parallel group '{}' contains step '{member}' which is not parallel-eligible",
                    group.id
                )),
                Some(_) => {
                    if !grouped.insert(member.as_str()) {
                        violations.push(format!(
                            "step '{member}' belongs to more than one parallel group"
                        ));
                    }
                }
            }
        }
    }

    for rollback in &def.rollback_steps {
        if !step_ids.contains(rollback.step_id.as_str()) {
            violations.push(format!(
                "rollback references unknown step '{}'",
                rollback.step_id
            ));
        }
        if rollback.actions.is_empty() {
            violations.push(format!(
                "rollback for step '{}' has no actions",
                rollback.step_id
            ));
        }
    }

    if let Some(step_id) = StepGraph::build(&def.steps).find_cycle() {
        violations.push(format!("circular dependency detected involving step '{step_id}'"));
    }

    violations
}

/// Fail with `WorkflowError::Validation` when the definition has violations.
pub fn ensure_valid(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    let violations = validate_definition(def);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::Validation(violations))
    }
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Discover all workflow YAML files under `base_dir`.
///
/// Scans for `.yaml`, `.yml`, and `.json` files recursively (JSON parses as
/// YAML). Files that fail to parse or validate are skipped with a warning.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml" || ext == "json")
        {
            match load_workflow_file(&path) {
                Ok(def) => results.push((path, def)),
                Err(e) => {
                    tracing::warn!(?path, error = %e, "skipping invalid workflow template");
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use provisio_types::workflow::{ParallelGroup, RollbackStep, RollbackTrigger, WorkflowStep};
    use std::collections::HashMap;

    fn step(id: &str, phase: &str, depends_on: Vec<&str>) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            name: id.to_string(),
            step_type: "noop".to_string(),
            phase: phase.to_string(),
            depends_on: depends_on.into_iter().map(String::from).collect(),
            parallel: false,
            required: true,
            timeout_ms: 1_000,
            retry_attempts: 1,
            config: HashMap::new(),
        }
    }

    fn definition(steps: Vec<WorkflowStep>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "bootstrap".to_string(),
            name: "Bootstrap".to_string(),
            version: "1.0.0".to_string(),
            description: None,
            phases: vec!["setup".to_string(), "configure".to_string()],
            steps,
            parallel_groups: vec![],
            rollback_steps: vec![],
            metadata: HashMap::new(),
        }
    }

    fn valid_definition() -> WorkflowDefinition {
        let mut a = step("create-project", "setup", vec![]);
        a.parallel = true;
        let mut b = step("create-environment", "setup", vec![]);
        b.parallel = true;
        let c = step("register-app", "configure", vec!["create-project", "create-environment"]);
        let mut def = definition(vec![a, b, c]);
        def.parallel_groups.push(ParallelGroup {
            id: "provision".to_string(),
            steps: vec!["create-project".to_string(), "create-environment".to_string()],
            max_concurrency: 2,
            fail_fast: true,
        });
        def.rollback_steps.push(RollbackStep {
            step_id: "create-project".to_string(),
            actions: vec!["noop".to_string()],
            trigger: RollbackTrigger::OnFailure,
        });
        def
    }

    fn has_violation(violations: &[String], needle: &str) -> bool {
        violations.iter().any(|v| v.contains(needle))
    }

    #[test]
    fn test_valid_definition_has_no_violations() {
        let violations = validate_definition(&valid_definition());
        assert!(violations.is_empty(), "unexpected: {violations:?}");
        assert!(ensure_valid(&valid_definition()).is_ok());
    }

    #[test]
    fn test_duplicate_step_id() {
        let def = definition(vec![step("a", "setup", vec![]), step("a", "setup", vec![])]);
        let violations = validate_definition(&def);
        assert!(has_violation(&violations, "duplicate step ID: 'a'"));
    }

    #[test]
    fn test_unknown_dependency_names_step_and_target() {
        let def = definition(vec![step("a", "setup", vec!["ghost"])]);
        let violations = validate_definition(&def);
        assert!(has_violation(&violations, "'a' depends on unknown step 'ghost'"));
    }

    #[test]
    fn test_unknown_group_member_names_group() {
        let mut def = valid_definition();
        def.parallel_groups[0].steps.push("ghost".to_string());
        let violations = validate_definition(&def);
        assert!(has_violation(
            &violations,
            "parallel group 'provision' references unknown step 'ghost'"
        ));
    }

    #[test]
    fn test_non_parallel_group_member_rejected() {
        let mut def = valid_definition();
        def.steps[0].parallel = false;
        let violations = validate_definition(&def);
        assert!(has_violation(&violations, "not parallel-eligible"));
    }

    #[test]
    fn test_step_in_two_groups_rejected() {
        let mut def = valid_definition();
        def.parallel_groups.push(ParallelGroup {
            id: "other".to_string(),
            steps: vec!["create-project".to_string()],
            max_concurrency: 1,
            fail_fast: false,
        });
        let violations = validate_definition(&def);
        assert!(has_violation(&violations, "more than one parallel group"));
    }

    #[test]
    fn test_cycle_rejected() {
        let def = definition(vec![
            step("a", "setup", vec!["c"]),
            step("b", "setup", vec!["a"]),
            step("c", "setup", vec!["b"]),
        ]);
        let violations = validate_definition(&def);
        assert!(has_violation(&violations, "circular dependency"));
        assert!(matches!(
            ensure_valid(&def),
            Err(WorkflowError::Validation(v)) if !v.is_empty()
        ));
    }

    #[test]
    fn test_undeclared_phase_rejected() {
        let def = definition(vec![step("a", "teardown", vec![])]);
        let violations = validate_definition(&def);
        assert!(has_violation(&violations, "undeclared phase 'teardown'"));
    }

    #[test]
    fn test_dependency_on_later_phase_rejected() {
        let def = definition(vec![
            step("a", "setup", vec!["b"]),
            step("b", "configure", vec![]),
        ]);
        let violations = validate_definition(&def);
        assert!(has_violation(&violations, "from later phase 'configure'"));
    }

    #[test]
    fn test_rollback_for_unknown_step_rejected() {
        let mut def = valid_definition();
        def.rollback_steps[0].step_id = "ghost".to_string();
        let violations = validate_definition(&def);
        assert!(has_violation(&violations, "rollback references unknown step 'ghost'"));
    }

    #[test]
    fn test_zero_attempts_and_zero_concurrency_rejected() {
        let mut def = valid_definition();
        def.steps[2].retry_attempts = 0;
        def.parallel_groups[0].max_concurrency = 0;
        let violations = validate_definition(&def);
        assert!(has_violation(&violations, "at least one attempt"));
        assert!(has_violation(&violations, "at least one concurrent step"));
    }

    #[test]
    fn test_all_violations_reported_together() {
        let def = definition(vec![
            step("a", "setup", vec!["ghost"]),
            step("a", "setup", vec![]),
        ]);
        assert!(validate_definition(&def).len() >= 2);
    }

    #[test]
    fn test_parse_yaml_template() {
        let yaml = r#"
id: project-bootstrap
name: Project Bootstrap
version: "1.0.0"
phases: [setup, configure]
steps:
  - id: create-project
    name: Create project
    type: http
    phase: setup
    parallel: true
    config:
      method: POST
      url: "https://dev.azure.com/contoso/_apis/projects"
  - id: register-app
    name: Register application
    type: http
    phase: configure
    depends_on: [create-project]
    retry_attempts: 5
parallel_groups:
  - id: provision
    steps: [create-project]
    max_concurrency: 2
rollback_steps:
  - step_id: create-project
    actions: [noop]
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        assert_eq!(def.id, "project-bootstrap");
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[1].retry_attempts, 5);
        assert!(def.steps[1].required);

        let yaml_out = serde_yaml_ng::to_string(&def).unwrap();
        let reparsed = parse_workflow_yaml(&yaml_out).unwrap();
        assert_eq!(reparsed.steps.len(), 2);
    }

    #[test]
    fn test_parse_yaml_rejects_invalid_definition() {
        let yaml = r#"
id: broken
name: Broken
version: "1"
phases: [main]
steps:
  - id: a
    name: A
    type: noop
    phase: main
    depends_on: [a]
"#;
        assert!(matches!(
            parse_workflow_yaml(yaml),
            Err(WorkflowError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_yaml_syntax_error() {
        assert!(matches!(
            parse_workflow_yaml("id: [unclosed"),
            Err(WorkflowError::ParseError(_))
        ));
    }

    #[test]
    fn test_discover_workflows_skips_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir_all(&nested).unwrap();

        let yaml = serde_yaml_ng::to_string(&valid_definition()).unwrap();
        std::fs::write(nested.join("bootstrap.yaml"), yaml).unwrap();
        std::fs::write(dir.path().join("broken.yml"), "not: [valid").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let found = discover_workflows(dir.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.id, "bootstrap");
    }

    #[test]
    fn test_discover_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let found = discover_workflows(&dir.path().join("absent")).unwrap();
        assert!(found.is_empty());
    }
}
