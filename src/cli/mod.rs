//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Distributed load generation engine
#[derive(Parser, Debug)]
#[command(name = "loadswarm")]
#[command(version)]
#[command(about = "Run weighted load tests locally or across a cluster of agents")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute every phase of a configuration on this machine
    Run(RunArgs),

    /// Start a driver (coordinator)
    Driver(DriverArgs),

    /// Start an agent
    Agent(AgentArgs),

    /// Send a configuration to a driver for distributed execution
    Submit(SubmitArgs),

    /// List registered test kinds
    List,

    /// Manage configuration files
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Configuration file (searched in standard locations when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Only run the named phase
    #[arg(short, long)]
    pub phase: Option<String>,

    /// Override the target base URL
    #[arg(short, long)]
    pub target: Option<String>,

    /// Summary format (table, json, json-pretty, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Write the run summary to a file
    #[arg(short, long)]
    pub output: Option<String>,
}

/// Arguments for driver command
#[derive(Parser, Debug)]
pub struct DriverArgs {
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Driver id (default: trailing digits of the hostname)
    #[arg(long)]
    pub id: Option<i64>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// Arguments for agent command
#[derive(Parser, Debug)]
pub struct AgentArgs {
    /// URL of the driver service
    #[arg(short, long)]
    pub driver: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// URL drivers use to reach this agent (default: http://<hostname>:<port>)
    #[arg(short, long)]
    pub advertise: Option<String>,

    /// Configuration file for cluster and publisher settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for submit command
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// URL of any driver
    #[arg(short, long)]
    pub driver: String,

    #[arg(short, long)]
    pub config: PathBuf,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        #[arg(short, long, default_value = "loadswarm.yaml")]
        output: String,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Check a configuration file
    Validate {
        file: Option<PathBuf>,
    },

    /// Print the effective configuration
    Show {
        file: Option<PathBuf>,

        /// Print the environment variables instead
        #[arg(short, long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let args = Args::parse_from([
            "loadswarm",
            "run",
            "--config",
            "load.yaml",
            "--phase",
            "soak",
            "-l",
            "debug",
        ]);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.config, Some(PathBuf::from("load.yaml")));
                assert_eq!(run.phase.as_deref(), Some("soak"));
                assert_eq!(run.format, "table");
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_driver_and_agent_args() {
        let args = Args::parse_from(["loadswarm", "driver", "--id", "2", "--port", "4100"]);
        match args.command {
            Command::Driver(driver) => {
                assert_eq!(driver.id, Some(2));
                assert_eq!(driver.port, Some(4100));
            }
            _ => panic!("Expected Driver command"),
        }

        let args = Args::parse_from([
            "loadswarm",
            "agent",
            "--driver",
            "http://loadswarm-driver:4000",
            "--advertise",
            "http://10.0.0.7:4001",
        ]);
        match args.command {
            Command::Agent(agent) => {
                assert_eq!(agent.driver.as_deref(), Some("http://loadswarm-driver:4000"));
                assert_eq!(agent.advertise.as_deref(), Some("http://10.0.0.7:4001"));
                assert!(agent.port.is_none());
            }
            _ => panic!("Expected Agent command"),
        }
    }

    #[test]
    fn test_config_subcommands() {
        let args = Args::parse_from(["loadswarm", "config", "init", "--force"]);
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { output, force },
            }) => {
                assert_eq!(output, "loadswarm.yaml");
                assert!(force);
            }
            _ => panic!("Expected config init"),
        }
    }
}
