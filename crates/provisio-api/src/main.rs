//! Provisio CLI and REST API entry point.
//!
//! Binary name: `provisio`
//!
//! Parses CLI arguments, initializes tracing and services, then dispatches
//! to the appropriate command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use provisio_types::config::StoreBackend;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let serving = matches!(cli.command, Commands::Serve { .. });
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 if serving => "info",
        0 => "warn",
        1 => "info,provisio_core=debug,provisio_infra=debug,provisio_api=debug",
        _ => "trace",
    };
    provisio_observe::init_tracing(cli.log_format, filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    provisio_observe::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(shell, &mut cmd, "provisio", &mut std::io::stdout());
        }

        Commands::Validate { file } => {
            cli::workflow::handle_validate(&file, cli.json)?;
        }

        Commands::Run { file, vars } => {
            // Persist to SQLite so `status` can read the run afterwards.
            let state = AppState::init(Some(StoreBackend::Sqlite)).await?;
            cli::workflow::handle_run(&state, &file, vars, cli.json).await?;
        }

        Commands::Status { run_id } => {
            let state = AppState::init(Some(StoreBackend::Sqlite)).await?;
            cli::workflow::handle_status(&state, run_id, cli.json).await?;
        }

        Commands::Serve {
            port,
            host,
            templates,
        } => {
            let state = AppState::init(None).await?;
            tracing::info!(
                data_dir = %state.data_dir.display(),
                backend = ?state.config.registry.backend,
                services = state.config.services.len(),
                "starting API server"
            );
            if let Some(dir) = templates {
                let count = state.register_templates(&dir)?;
                tracing::info!(dir = %dir.display(), count, "templates registered");
            }

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            if !cli.quiet {
                println!(
                    "  {} Provisio API listening on {}",
                    console::style(">").bold(),
                    console::style(format!("http://{addr}")).cyan()
                );
                println!("  {}", console::style("Press Ctrl+C to stop").dim());
            }

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            if !cli.quiet {
                println!("\n  Server stopped.");
            }
        }
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
