// Daemon - wires the supervisor to the IPC server and handles shutdown

use crate::error::{FlotillaError, Result};
use crate::ipc::{Command, IpcServer, ResponseData};
use crate::process::Supervisor;
use std::future::Future;
use std::path::Path;
use std::time::Instant;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

/// Long-lived supervisor process serving operator commands
pub struct Daemon {
    supervisor: Supervisor,
    ipc_server: IpcServer,
    start_time: Instant,
    autostart: bool,
}

impl Daemon {
    pub fn new<P: AsRef<Path>>(supervisor: Supervisor, socket_path: P) -> Self {
        Self {
            supervisor,
            ipc_server: IpcServer::with_socket_path(socket_path),
            start_time: Instant::now(),
            autostart: false,
        }
    }

    /// Launch the whole fleet once the socket is bound
    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Serve commands until `shutdown` resolves, then stop the fleet
    ///
    /// The socket is bound before anything is launched, so a bind failure
    /// leaves the fleet untouched.
    pub async fn run<S>(mut self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        self.ipc_server.start()?;
        info!(
            "IPC server listening on: {}",
            self.ipc_server.socket_path().display()
        );

        if self.autostart {
            match self.supervisor.start(&[]).await {
                Ok(report) => {
                    let failed = report.entries.iter().filter(|e| e.outcome.is_failure());
                    for entry in failed {
                        error!("Failed to start {}: {:?}", entry.name, entry.outcome);
                    }
                    info!("Started fleet of {} processes", report.entries.len());
                }
                Err(e) => error!("Failed to start fleet: {}", e),
            }
        }

        let monitor = {
            let supervisor = self.supervisor.clone();
            tokio::spawn(async move { supervisor.run_monitor().await })
        };

        let supervisor = self.supervisor.clone();
        let start_time = self.start_time;
        let ipc_server = self.ipc_server;
        let server = tokio::spawn(async move {
            let result = ipc_server
                .run(move |command| {
                    let supervisor = supervisor.clone();
                    async move { Self::handle_command(&supervisor, start_time, command).await }
                })
                .await;

            if let Err(e) = result {
                error!("IPC server error: {}", e);
            }
        });

        shutdown.await;
        info!("Shutting down daemon gracefully...");

        // Dropping the server task removes the socket file
        server.abort();
        let _ = server.await;
        monitor.abort();
        let _ = monitor.await;

        let report = self.supervisor.shutdown().await;
        for entry in report.entries.iter().filter(|e| e.outcome.is_failure()) {
            error!("Failed to stop {}: {:?}", entry.name, entry.outcome);
        }

        info!("Daemon shutdown complete");
        Ok(())
    }

    /// Dispatch one operator command to the supervisor
    pub async fn handle_command(
        supervisor: &Supervisor,
        start_time: Instant,
        command: Command,
    ) -> Result<ResponseData> {
        info!("Handling {} command", command.name());

        match command {
            Command::Start { names } => Ok(ResponseData::Report(supervisor.start(&names).await?)),
            Command::Stop { names } => Ok(ResponseData::Report(supervisor.stop(&names).await?)),
            Command::Delete { names } => {
                Ok(ResponseData::Report(supervisor.delete(&names).await?))
            }
            Command::Status { names } => Ok(ResponseData::Status(supervisor.status(&names).await?)),
            Command::Ping => Ok(ResponseData::Pong {
                uptime: start_time.elapsed(),
            }),
        }
    }
}

/// Resolve once SIGTERM or SIGINT arrives
pub async fn shutdown_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
        FlotillaError::SignalError(format!("Failed to install SIGTERM handler: {}", e))
    })?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
        FlotillaError::SignalError(format!("Failed to install SIGINT handler: {}", e))
    })?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }

    Ok(())
}
