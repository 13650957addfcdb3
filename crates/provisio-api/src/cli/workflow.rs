//! CLI workflow commands: validate, run, status.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;
use uuid::Uuid;

use provisio_core::service::ServiceError;
use provisio_core::workflow::definition::{WorkflowError, load_workflow_file};
use provisio_types::workflow::{
    ExecutionStatus, RollbackOutcome, StepStatus, WorkflowDefinition, WorkflowExecution,
};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

/// Parse and validate a template, printing every violation.
pub fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let violations = match load_workflow_file(file) {
        Ok(def) => {
            if json {
                let out = serde_json::json!({
                    "file": file.display().to_string(),
                    "valid": true,
                    "id": def.id,
                    "steps": def.steps.len(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!();
                println!(
                    "  {} '{}' is valid ({} steps in {} phases)",
                    style("*").green().bold(),
                    style(&def.id).cyan(),
                    def.steps.len(),
                    def.phases.len()
                );
                println!();
            }
            return Ok(());
        }
        Err(WorkflowError::Validation(violations)) => violations,
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to load '{}'", file.display()));
        }
    };

    if json {
        let out = serde_json::json!({
            "file": file.display().to_string(),
            "valid": false,
            "violations": violations,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} '{}' has {} problem(s):",
            style("x").red().bold(),
            file.display(),
            violations.len()
        );
        for v in &violations {
            println!("    - {v}");
        }
        println!();
    }
    bail!("workflow template is invalid")
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Register a template and drive one run to a terminal state.
pub async fn handle_run(
    state: &AppState,
    file: &Path,
    vars: Vec<(String, Value)>,
    json: bool,
) -> Result<()> {
    let def = load_workflow_file(file).map_err(|e| match e {
        WorkflowError::Validation(v) => {
            anyhow::anyhow!("Workflow validation failed:\n  - {}", v.join("\n  - "))
        }
        other => anyhow::anyhow!("Failed to load '{}': {other}", file.display()),
    })?;

    let def = state.workflow_service.register_definition(def)?;
    let variables: HashMap<String, Value> = vars.into_iter().collect();

    if !json {
        println!();
        println!(
            "  {} Running '{}' v{}",
            style(">").cyan().bold(),
            style(&def.name).cyan(),
            def.version
        );
    }

    let exec = state
        .workflow_service
        .run_to_completion(&def.id, variables)
        .await?;

    display_run(&exec, Some(&def), json)?;

    if exec.status != ExecutionStatus::Completed {
        bail!("run {} finished as {}", exec.id, exec.status);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Show a recorded run.
pub async fn handle_status(state: &AppState, run_id: Uuid, json: bool) -> Result<()> {
    let exec = match state.workflow_service.get_status(run_id).await {
        Ok(exec) => exec,
        Err(ServiceError::UnknownOperation(id)) => bail!("No run with ID '{id}'"),
        Err(e) => return Err(e.into()),
    };
    let def = state.workflow_service.get_definition(&exec.definition_id);
    display_run(&exec, def.as_deref(), json)
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn display_run(
    exec: &WorkflowExecution,
    def: Option<&WorkflowDefinition>,
    json: bool,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(exec)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Run {}",
        style("Workflow:").bold(),
        style(exec.id.to_string()).cyan()
    );
    println!("  Definition: {}", style(&exec.definition_id).cyan());
    println!("  Status: {}", format_status(exec.status));
    let history: Vec<String> = exec.status_history.iter().map(|s| s.to_string()).collect();
    println!("  History: {}", style(history.join(" -> ")).dim());
    println!("  Started: {}", exec.started_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(completed) = exec.completed_at {
        let elapsed = completed - exec.started_at;
        println!(
            "  Completed: {} ({} ms)",
            completed.format("%Y-%m-%d %H:%M:%S"),
            elapsed.num_milliseconds()
        );
    }
    if let Some(ref failure) = exec.failure {
        match failure.step_id {
            Some(ref step) => println!("  Failure: {} ({})", style(&failure.message).red(), step),
            None => println!("  Failure: {}", style(&failure.message).red()),
        }
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Phase"),
            Cell::new("Status"),
            Cell::new("Attempt"),
            Cell::new("Error"),
        ]);

    for s in &exec.steps {
        let phase = def
            .and_then(|d| d.step(&s.step_id))
            .map(|step| step.phase.as_str())
            .unwrap_or("-");
        table.add_row(vec![
            Cell::new(&s.step_id),
            Cell::new(phase),
            format_step_status(s.status),
            Cell::new(s.attempt),
            Cell::new(s.error.as_deref().map(truncate).unwrap_or_else(|| "-".to_string())),
        ]);
    }
    println!("{table}");

    if !exec.rollbacks.is_empty() {
        println!();
        println!("  {}", style("Rollbacks").bold());
        for r in &exec.rollbacks {
            let mark = match r.outcome {
                RollbackOutcome::Completed => style("ok").green(),
                RollbackOutcome::Failed => style("failed").red(),
            };
            match r.error {
                Some(ref e) => println!("    {} {} [{}] {}", r.step_id, r.action, mark, e),
                None => println!("    {} {} [{}]", r.step_id, r.action, mark),
            }
        }
    }

    let terminal: Vec<_> = exec.errors.iter().filter(|e| !e.recoverable).collect();
    if !terminal.is_empty() {
        println!();
        println!("  {}", style("Errors").bold());
        for e in terminal {
            println!("    {} ({}): {}", e.step_id, e.phase, style(&e.message).red());
        }
    }
    println!();

    Ok(())
}

fn truncate(s: &str) -> String {
    const MAX: usize = 60;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(MAX).collect();
        out.push_str("...");
        out
    }
}

fn format_status(status: ExecutionStatus) -> console::StyledObject<String> {
    let text = status.to_string();
    match status {
        ExecutionStatus::Completed => style(text).green(),
        ExecutionStatus::Failed => style(text).red(),
        ExecutionStatus::Cancelled => style(text).yellow(),
        ExecutionStatus::RollingBack => style(text).magenta(),
        ExecutionStatus::Pending | ExecutionStatus::Running => style(text).blue(),
    }
}

fn format_step_status(status: StepStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        StepStatus::Pending => cell.fg(Color::Yellow),
        StepStatus::Running => cell.fg(Color::Blue),
        StepStatus::Retrying => cell.fg(Color::Magenta),
        StepStatus::Completed => cell.fg(Color::Green),
        StepStatus::Failed => cell.fg(Color::Red),
        StepStatus::Skipped => cell.fg(Color::DarkYellow),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use provisio_infra::memory::InMemoryExecutionStore;
    use provisio_infra::store::AnyExecutionStore;
    use provisio_types::config::GlobalConfig;

    const TEMPLATE: &str = r#"
id: project-bootstrap
name: Project bootstrap
version: "1.0.0"
phases: [plan, provision]
steps:
  - id: plan
    name: Plan
    type: noop
    phase: plan
    config:
      project: "{{ vars.project }}"
  - id: create-repo
    name: Create repo
    type: noop
    phase: provision
    depends_on: [plan]
"#;

    fn write_template(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("bootstrap.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    fn memory_state(dir: &tempfile::TempDir) -> AppState {
        let store = AnyExecutionStore::Memory(InMemoryExecutionStore::new(
            Duration::from_secs(3600),
            100,
        ));
        AppState::with_store(store, GlobalConfig::default(), dir.path().to_path_buf())
    }

    #[test]
    fn test_validate_accepts_and_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_template(&dir, TEMPLATE);
        assert!(handle_validate(&path, true).is_ok());

        let broken = TEMPLATE.replace("depends_on: [plan]", "depends_on: [missing]");
        let path = write_template(&dir, &broken);
        assert!(handle_validate(&path, true).is_err());
    }

    #[tokio::test]
    async fn test_run_then_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_template(&dir, TEMPLATE);
        let state = memory_state(&dir);

        handle_run(
            &state,
            &path,
            vec![("project".to_string(), Value::String("contoso-web".to_string()))],
            true,
        )
        .await
        .unwrap();

        let runs = state.workflow_service.list_runs(None, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, ExecutionStatus::Completed);
        assert!(handle_status(&state, runs[0].id, true).await.is_ok());
        assert!(handle_status(&state, Uuid::now_v7(), true).await.is_err());
    }

    #[test]
    fn test_truncate_long_errors() {
        assert_eq!(truncate("short"), "short");
        let long = "x".repeat(100);
        assert_eq!(truncate(&long).chars().count(), 63);
    }
}
