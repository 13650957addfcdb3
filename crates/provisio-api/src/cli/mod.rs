//! CLI command definitions for the `provisio` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use provisio_observe::LogFormat;

/// Run provisioning workflows against Azure DevOps, Power Platform and Microsoft Graph.
#[derive(Parser)]
#[command(name = "provisio", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log record format: plain or json.
    #[arg(long, global = true, default_value = "plain")]
    pub log_format: LogFormat,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a workflow template without running it.
    Validate {
        /// Path to the workflow YAML or JSON file.
        file: PathBuf,
    },

    /// Register a workflow template and run it to completion.
    Run {
        /// Path to the workflow YAML or JSON file.
        file: PathBuf,

        /// Run variable as key=value (value parsed as JSON, else kept as a string).
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, serde_json::Value)>,
    },

    /// Show the recorded state of a run.
    Status {
        /// Run UUID.
        run_id: uuid::Uuid,
    },

    /// Start the REST API server.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Directory of workflow templates to register at startup.
        #[arg(long)]
        templates: Option<PathBuf>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Parse a `--var key=value` argument.
fn parse_var(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_var_json_and_string() {
        assert_eq!(parse_var("count=3").unwrap(), ("count".to_string(), json!(3)));
        assert_eq!(
            parse_var("project=contoso-web").unwrap(),
            ("project".to_string(), json!("contoso-web"))
        );
        assert_eq!(
            parse_var("url=https://x.test/?a=b").unwrap(),
            ("url".to_string(), json!("https://x.test/?a=b"))
        );
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=3").is_err());
    }

    #[test]
    fn test_run_collects_repeated_vars() {
        let cli = Cli::parse_from([
            "provisio", "run", "bootstrap.yaml", "--var", "a=1", "--var", "b=x", "-vv",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run { file, vars } => {
                assert_eq!(file, PathBuf::from("bootstrap.yaml"));
                assert_eq!(vars.len(), 2);
                assert_eq!(vars[1], ("b".to_string(), json!("x")));
            }
            _ => panic!("expected run"),
        }
    }
}
