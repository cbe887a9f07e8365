// CLI module - User-facing command-line interface

mod output;

use crate::error::{FlotillaError, Result};
use crate::ipc::{Command, IpcClient, ResponseData, DEFAULT_SOCKET_PATH};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Flotilla - supervise a fleet of long-running processes
#[derive(Parser)]
#[command(name = "flotilla")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path of the daemon's control socket
    #[arg(long, global = true, env = "FLOTILLA_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch processes (all when no name is given)
    Start {
        /// Spec names, or `all`
        names: Vec<String>,
    },

    /// Gracefully stop processes (all when no name is given)
    Stop {
        /// Spec names, or `all`
        names: Vec<String>,
    },

    /// Show the state of processes (all when no name is given)
    Status {
        /// Spec names, or `all`
        names: Vec<String>,
    },

    /// Show the state of every process
    List,

    /// Stop processes and forget their specs
    Delete {
        /// Spec names, or `all`
        names: Vec<String>,
    },

    /// Check that the daemon is answering
    Ping,
}

impl Cli {
    /// Run the CLI application
    ///
    /// # Returns
    /// `Ok(true)` when every name succeeded, `Ok(false)` when the daemon
    /// reported a per-name failure.
    pub fn run() -> Result<bool> {
        let cli = Cli::parse();
        cli.execute()
    }

    /// Execute the parsed command
    fn execute(&self) -> Result<bool> {
        let command = self.build_command();
        let client = IpcClient::with_socket_path(&self.socket);

        // Stopping waits out each child's grace period
        let spinner = match &command {
            Command::Stop { .. } => Some(output::create_spinner("Stopping processes...")),
            Command::Delete { .. } => Some(output::create_spinner("Deleting processes...")),
            _ => None,
        };

        let result = client.request(command);
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }

        match result? {
            ResponseData::Report(report) => {
                output::print_report(&report);
                Ok(!report.has_failures())
            }
            ResponseData::Status(processes) => {
                output::print_status_table(&processes);
                Ok(true)
            }
            ResponseData::Pong { uptime } => {
                output::print_pong(&uptime);
                Ok(true)
            }
        }
    }

    /// Build an IPC command from the CLI arguments
    fn build_command(&self) -> Command {
        match &self.command {
            Commands::Start { names } => Command::Start {
                names: names.clone(),
            },
            Commands::Stop { names } => Command::Stop {
                names: names.clone(),
            },
            Commands::Status { names } => Command::Status {
                names: names.clone(),
            },
            Commands::List => Command::Status { names: Vec::new() },
            Commands::Delete { names } => Command::Delete {
                names: names.clone(),
            },
            Commands::Ping => Command::Ping,
        }
    }
}

/// Report a failed CLI run to the operator
pub fn report_error(error: &FlotillaError) {
    let message = match error {
        FlotillaError::DaemonNotRunning => {
            "Daemon not running (start it with `flotilla-daemon --config <file>`)".to_string()
        }
        other => other.to_string(),
    };
    output::print_error(&message);
}
