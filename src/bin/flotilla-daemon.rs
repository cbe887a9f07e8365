use anyhow::{Context, Result};
use clap::Parser;
use flotilla::config::SpecStore;
use flotilla::daemon::{shutdown_signal, Daemon};
use flotilla::ipc::DEFAULT_SOCKET_PATH;
use flotilla::process::{Supervisor, SupervisorConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Flotilla daemon - keeps a fleet of processes running
#[derive(Parser, Debug)]
#[command(name = "flotilla-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Spec file describing the fleet (TOML or JSON)
    #[arg(short, long, env = "FLOTILLA_CONFIG")]
    config: PathBuf,

    /// Path of the control socket
    #[arg(long, env = "FLOTILLA_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Seconds between liveness and memory samples
    #[arg(long, default_value_t = 5)]
    sample_interval: u64,

    /// Seconds to wait after the stop signal before SIGKILL
    #[arg(long, default_value_t = 5)]
    kill_timeout: u64,

    /// Upper bound in seconds for restart backoff
    #[arg(long, default_value_t = 60)]
    max_backoff: u64,

    /// Launch the whole fleet right after loading
    #[arg(long)]
    start: bool,
}

impl Args {
    fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            sample_interval: Duration::from_secs(self.sample_interval.max(1)),
            kill_timeout: Duration::from_secs(self.kill_timeout),
            max_backoff: Duration::from_secs(self.max_backoff),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let store = SpecStore::from_file(&args.config)
        .with_context(|| format!("Failed to load spec file {}", args.config.display()))?;
    tracing::info!(
        "Loaded {} process specs from {} ({} skipped)",
        store.len(),
        args.config.display(),
        store.rejected().len()
    );

    let supervisor = Supervisor::new(&store, args.supervisor_config());
    let daemon = Daemon::new(supervisor, &args.socket).with_autostart(args.start);

    daemon
        .run(async {
            if let Err(e) = shutdown_signal().await {
                tracing::error!("{}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        })
        .await
        .with_context(|| format!("Daemon failed on socket {}", args.socket.display()))?;

    Ok(())
}
