//! loadswarm - Distributed Load Generation Engine
//!
//! Executes a weighted mix of tests against a target system, either on one
//! machine or fanned out over agents coordinated by a set of drivers.
//!
//! ## Features
//!
//! - Weighted random scheduling with per-test count limits and timeouts
//! - Fixed or ramping concurrency per phase
//! - Histogram based latency statistics, published while the phase runs
//! - Driver election, agent heartbeats and work redistribution
//!
//! ## Usage
//!
//! ```bash
//! # Create a configuration and run it locally
//! loadswarm config init
//! loadswarm run --config loadswarm.yaml
//!
//! # Start a cluster
//! loadswarm driver --config loadswarm.yaml --id 0
//! loadswarm agent --driver http://loadswarm-driver:4000
//!
//! # Execute a configuration on the cluster
//! loadswarm submit --driver http://loadswarm-driver:4000 --config loadswarm.yaml
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

mod agent;
mod cli;
mod cluster;
mod config;
mod engine;
mod http;
mod models;
mod output;
mod publish;
mod registry;
mod stats;
mod utils;

use cli::Args;
use cluster::{driver_id_from_hostname, ClusterClient, Driver};
use config::{Configuration, EnvConfig};
use engine::Engine;
use output::{OutputFormat, ResultFormatter};
use registry::TestRegistry;
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = args.log_level.clone();

    match args.command {
        cli::Command::Run(run_args) => run_local(run_args, log_level.as_deref()).await,
        cli::Command::Driver(driver_args) => run_driver(driver_args, log_level.as_deref()).await,
        cli::Command::Agent(agent_args) => run_agent(agent_args, log_level.as_deref()).await,
        cli::Command::Submit(submit_args) => {
            setup_logging(log_level.as_deref(), None);
            submit(submit_args).await
        }
        cli::Command::List => {
            list_kinds();
            Ok(())
        }
        cli::Command::Config(config_args) => manage_config(config_args),
    }
}

/// CLI level first, then configuration, then info
fn setup_logging(cli_level: Option<&str>, config: Option<&Configuration>) {
    let requested = cli_level.or(config.map(|c| c.globals.log_level.as_str()));
    let level = match requested {
        Some(name) => LogLevel::parse(name).unwrap_or_else(|| {
            eprintln!("Unknown log level '{name}', using info");
            LogLevel::Info
        }),
        None => LogLevel::Info,
    };
    init_logger(level);
}

/// Explicit path, `LOADSWARM_CONFIG`, then the standard locations; the
/// environment overrides are applied on top.
fn load_config(path: Option<&Path>, required: bool) -> Result<Configuration> {
    let env = EnvConfig::load();
    let path: Option<PathBuf> = path
        .map(Path::to_path_buf)
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));

    let mut config = match (path, Configuration::find()) {
        (Some(path), _) => Configuration::load(&path)?,
        (None, Some(found)) => Configuration::load(&found)?,
        (None, None) if required => Configuration::load_or_find(None)?,
        (None, None) => Configuration::default(),
    };

    if env.has_any() {
        env.apply(&mut config);
        config.validate().context("Invalid configuration after environment overrides")?;
    }
    Ok(config)
}

/// Stop `f` on Ctrl-C
fn on_ctrl_c(f: impl FnOnce() + Send + 'static) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, shutting down");
            f();
        }
    });
}

async fn run_local(args: cli::RunArgs, log_level: Option<&str>) -> Result<()> {
    let mut config = load_config(args.config.as_deref(), true)?;
    setup_logging(log_level, Some(&config));

    if let Some(target) = args.target {
        config.globals.target = target;
    }
    if let Some(name) = &args.phase {
        config.phases.retain(|p| &p.name == name);
        if config.phases.is_empty() {
            bail!("No phase named '{name}' in the configuration");
        }
    }
    let format = OutputFormat::from_str(&args.format)
        .with_context(|| format!("Unknown output format: {}", args.format))?;

    let publishers = publish::build_publishers(&config.publishers)?;
    let registry = Arc::new(TestRegistry::with_builtins());
    let engine = Arc::new(Engine::new(config.globals.clone(), registry, publishers)?);

    let stopper = engine.clone();
    on_ctrl_c(move || stopper.stop());

    info!(
        "Running {} phases against {}",
        config.phases.len(),
        config.globals.target
    );
    let summary = engine.run(&config).await?;

    println!("{}", ResultFormatter::new(format).format_run(&summary));
    if let Some(path) = args.output {
        output::write_run_to_file(&path, &summary, format)?;
        println!("Summary written to {path}");
    }
    Ok(())
}

async fn run_driver(args: cli::DriverArgs, log_level: Option<&str>) -> Result<()> {
    let config = load_config(args.config.as_deref(), false)?;
    setup_logging(log_level, Some(&config));

    let id = args
        .id
        .or(config.cluster.driver_id)
        .or_else(|| {
            config
                .globals
                .hostname()
                .and_then(|h| driver_id_from_hostname(&h))
        })
        .context("Cannot determine the driver id: pass --id or use a hostname ending in digits")?;
    if id < 0 || id as usize >= config.cluster.nr_drivers {
        bail!(
            "Driver id {} is outside 0..{}",
            id,
            config.cluster.nr_drivers
        );
    }
    let port = args.port.unwrap_or(config.cluster.driver_port);

    let client = ClusterClient::from_config(&config.cluster)?;
    let driver = Arc::new(Driver::new(id, config.cluster.clone(), client));
    if !config.phases.is_empty() {
        driver.accept_config(config.clone());
    }

    let stopper = driver.clone();
    on_ctrl_c(move || stopper.shutdown());

    driver.serve(SocketAddr::from(([0, 0, 0, 0], port))).await
}

async fn run_agent(args: cli::AgentArgs, log_level: Option<&str>) -> Result<()> {
    let config = load_config(args.config.as_deref(), false)?;
    setup_logging(log_level, Some(&config));

    let port = args.port.unwrap_or(config.cluster.agent_port);
    let driver_url = args
        .driver
        .unwrap_or_else(|| config.cluster.driver_service_url.clone());
    let advertise = match args.advertise {
        Some(url) => url,
        None => {
            let host = config
                .globals
                .hostname()
                .unwrap_or_else(|| "localhost".to_string());
            format!("http://{host}:{port}")
        }
    };

    let publishers = publish::build_publishers(&config.publishers)?;
    let client = ClusterClient::from_config(&config.cluster)?;
    let agent = Arc::new(agent::Agent::new(
        advertise,
        driver_url,
        Arc::new(TestRegistry::with_builtins()),
        publishers,
        client,
    ));

    let stopper = agent.clone();
    on_ctrl_c(move || stopper.shutdown());

    agent.serve(SocketAddr::from(([0, 0, 0, 0], port))).await
}

async fn submit(args: cli::SubmitArgs) -> Result<()> {
    let config = Configuration::load(&args.config)?;
    let client = ClusterClient::from_config(&config.cluster)?;

    client
        .submit_config(&args.driver, &config, true)
        .await
        .with_context(|| format!("Failed to submit configuration to {}", args.driver))?;

    println!(
        "✓ Submitted {} phases to {}",
        config.phases.len(),
        args.driver
    );
    Ok(())
}

fn list_kinds() {
    let registry = TestRegistry::with_builtins();

    println!("\nTest kinds\n");
    println!("──────────────────────────────────────────────────────────────────────");
    for (kind, description) in registry.kinds() {
        println!("  {kind:12} {description}");
    }
    println!();
}

fn manage_config(args: cli::ConfigArgs) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                bail!("Configuration file already exists: {output}. Use --force to overwrite.");
            }

            Configuration::example().save(path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .or_else(Configuration::find)
                .unwrap_or_else(|| PathBuf::from("./loadswarm.yaml"));

            match Configuration::load(&path) {
                Ok(config) => {
                    println!("✓ Configuration file is valid: {}", path.display());
                    println!("  {} phases, {} publishers", config.phases.len(), config.publishers.len());
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }

        cli::ConfigAction::Show { file, env, format } => {
            if env {
                config::print_env_help();
                return Ok(());
            }

            let config = load_config(file.as_deref(), true)?;
            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }
    }

    Ok(())
}
