use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

mod cli;

use bspsync::config::{Config, normalize_map_name};
use bspsync::daemon::Daemon;
use bspsync::toolchain::{Toolchain, check_dependencies};
use bspsync::version::VersionResolver;
use cli::Cli;
use cli::commands::Commands;

const DEFAULT_LOG_LEVEL: &str = "info";

fn setup_logging(verbose: bool, level: Option<&str>) -> Result<()> {
    let env = env_logger::Env::default().default_filter_or(level.unwrap_or(DEFAULT_LOG_LEVEL));
    let mut builder = env_logger::Builder::from_env(env);

    if verbose {
        builder.target(env_logger::Target::Stderr).init();
        return Ok(());
    }

    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bspsync")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("bspsync.log");
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: Config) -> Result<()> {
    match &cli.command {
        Commands::Watch { .. } => handle_watch_command(config).await,
        Commands::Check => handle_check_command(&config),
        Commands::NextVersion { map, dir } => handle_next_version_command(map, dir.as_deref(), &config).await,
    }
}

async fn handle_watch_command(config: Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    info!("Starting watch daemon");

    let daemon = Daemon::new(config).context("Preflight check failed")?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for ctrl-c: {}", e);
        }
        println!("{}", "Shutting down, finishing queued work (ctrl-c again to abort)...".yellow());
    };
    // only polled once the first signal has been handled
    let force = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => println!("{}", "Aborting queued work".red()),
            Err(_) => std::future::pending::<()>().await,
        }
    };

    daemon.run(shutdown, force).await.context("Watcher failed")?;
    Ok(())
}

fn handle_check_command(config: &Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    println!("{} configuration", "✓".green());

    let toolchain = Toolchain::from_config(&config.tools);
    check_dependencies(config, &toolchain).context("Preflight check failed")?;
    println!("{} external tools", "✓".green());

    let effective = serde_yaml::to_string(&config.redacted()).context("Failed to render configuration")?;
    println!("\n{}", "Effective configuration:".cyan());
    print!("{}", effective);
    Ok(())
}

async fn handle_next_version_command(map: &str, dir: Option<&Path>, config: &Config) -> Result<()> {
    let file_name = normalize_map_name(map);
    let base_name = Path::new(&file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(file_name.clone());
    let directory = dir.unwrap_or_else(|| config.output_dir());

    let version = VersionResolver::new()
        .resolve(&base_name, directory)
        .await
        .context(format!("Failed to resolve next version in {}", directory.display()))?;

    println!("{}_dev{}", base_name, version);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration, then layer environment and command line on top
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config
        .apply_env(|key| std::env::var(key).ok())
        .context("Invalid environment override")?;
    config.apply_overrides(&cli.overrides());

    setup_logging(cli.is_verbose(), config.log_level.as_deref()).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, config).await.context("Application failed")?;

    Ok(())
}
