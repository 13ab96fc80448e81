use anyhow::Result;
use clap::{Parser, Subcommand};
use runtime::{AppConfig, CliArgs};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

mod builtin;
mod server;

use server::Host;

/// Vulnerability dashboard server with runtime-pluggable feature modules
#[derive(Parser)]
#[command(name = "vulndash-server")]
#[command(about = "Vulnerability dashboard server with runtime-pluggable feature modules")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print current configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Check configuration and validate every discovered module
    Check,
    /// List discovered modules
    Modules,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    match &config.logging {
        Some(logging) => runtime::logging::init_logging_from_config(logging, config.home_dir()),
        None => runtime::logging::init_default_logging(),
    }

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(config).await,
        Commands::Modules => list_modules(config).await,
    }
}

async fn run_server(config: AppConfig) -> Result<()> {
    tracing::info!(addr = %config.bind_addr(), "vulndash server starting");
    let cancel = CancellationToken::new();
    server::cancel_on_signal(cancel.clone());

    let host = Host::build(&config, cancel)?;
    host.run(&config).await
}

async fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("checking configuration");
    let host = Host::build(&config, CancellationToken::new())?;

    let mut invalid = 0usize;
    for (descriptor, report) in host.check().await? {
        if report.is_valid {
            println!("ok      {}", descriptor.id);
        } else {
            invalid += 1;
            println!("invalid {}", descriptor.id);
            for error in &report.errors {
                println!("        - {error}");
            }
        }
        for warning in &report.warnings {
            println!("        ! {warning}");
        }
    }

    if invalid > 0 {
        anyhow::bail!("{invalid} module(s) failed validation");
    }
    println!("Configuration check passed");
    Ok(())
}

async fn list_modules(config: AppConfig) -> Result<()> {
    let host = Host::build(&config, CancellationToken::new())?;
    for d in host.discover().await? {
        let location = d
            .location
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "builtin".to_string());
        let status = if d.enabled { "enabled" } else { "disabled" };
        println!("{:<24} {:<28} {:<9} {}", d.id, d.name, status, location);
    }
    Ok(())
}
