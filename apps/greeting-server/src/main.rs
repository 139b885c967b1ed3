use anyhow::Result;
use apikit::Server;
use clap::{Parser, Subcommand};
use runtime::{AppConfig, CliArgs};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

mod greeting;

/// Greeting Server - demo service for the apikit request pipeline
#[derive(Parser)]
#[command(name = "greeting-server")]
#[command(about = "Greeting Server - demo service for the apikit request pipeline")]
#[command(version = "0.1.0")]
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
    /// Check configuration
    Check,
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

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let logging_config = config
        .logging
        .clone()
        .unwrap_or_else(runtime::default_logging_config);
    runtime::logging::init_logging_from_config(&logging_config, &config.home_dir());
    tracing::info!("Greeting Server starting");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(config),
    }
}

fn build_server(config: &AppConfig) -> Result<Server> {
    let server = Server::builder(config.server.clone(), config.docs.clone())
        .controller(greeting::greeting_controller()?)
        .build()?;
    Ok(server)
}

async fn run_server(config: AppConfig) -> Result<()> {
    let server = build_server(&config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        on_signal.cancel();
    });

    server.serve(cancel).await
}

fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration...");
    let server = build_server(&config)?;

    tracing::info!("Configuration is valid");
    println!("Configuration check passed");
    println!(
        "Operations: {}",
        server.api_description().operation_count()
    );
    println!("{}", config.to_yaml()?);
    Ok(())
}
