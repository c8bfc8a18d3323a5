//! Agora orchestration daemon entry point.
//!
//! Binary name: `agorad`
//!
//! Parses CLI arguments, initializes tracing and application state, then
//! serves the REST and realtime API.

mod http;
mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::{Shell, generate};

use state::AppState;

/// Multi-agent world orchestration daemon.
#[derive(Parser)]
#[command(name = "agorad", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Suppress all output except errors.
    #[arg(long, global = true)]
    quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server.
    Serve {
        /// Port to listen on (overrides config).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config).
        #[arg(long)]
        host: Option<String>,

        /// Data directory (defaults to AGORA_DATA_DIR or ~/.agora).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Export spans to stdout via OpenTelemetry.
        #[arg(long)]
        otel: bool,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions need neither tracing nor app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "agorad", &mut std::io::stdout());
        return Ok(());
    }

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,agora=debug",
        _ => "trace",
    };

    let Commands::Serve {
        port,
        host,
        data_dir,
        otel,
    } = cli.command
    else {
        unreachable!("completions handled above");
    };

    agora_observe::tracing_setup::init_tracing(filter, otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let data_dir = data_dir.unwrap_or_else(agora_infra::config::resolve_data_dir);
    let config = agora_infra::config::load_config(&data_dir).await;

    // Explicit host/port flags win over the configured bind address.
    let addr = if host.is_some() || port.is_some() {
        format!(
            "{}:{}",
            host.unwrap_or_else(|| "127.0.0.1".to_string()),
            port.unwrap_or(7000)
        )
    } else {
        config.bind_addr.clone()
    };

    let state = AppState::init(data_dir.clone(), config).await?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!(
        "  {} Agora API listening on {}",
        console::style("⚡").bold(),
        console::style(format!("http://{addr}")).cyan()
    );
    println!(
        "  {} data dir: {}",
        console::style("·").dim(),
        console::style(data_dir.display().to_string()).dim()
    );
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    let router = http::router::build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    agora_observe::tracing_setup::shutdown_tracing();

    println!("\n  Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
