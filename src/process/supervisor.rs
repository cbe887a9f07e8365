use crate::config::SpecStore;
use crate::error::{FlotillaError, Result};
use crate::ipc::protocol::{Outcome, ProcessInfo, Report};
use crate::process::fleet::{Fleet, MemoryBreach, StopTicket};
use crate::process::monitor::ProcessMonitor;
use crate::process::restart::RestartDecision;
use crate::process::spawner::spawn_process;
use crate::process::types::{ExitInfo, ExitReason};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How often liveness and memory are sampled
    pub sample_interval: Duration,
    /// Grace period before SIGKILL for specs without `kill_timeout`
    pub kill_timeout: Duration,
    /// Upper bound for restart backoff
    pub max_backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(5),
            kill_timeout: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Owns the fleet and drives every lifecycle transition
///
/// Cheap to clone; clones share the same fleet.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    fleet: RwLock<Fleet>,
    /// Serializes start/stop/delete/restart per name
    guards: HashMap<String, Arc<Mutex<()>>>,
    monitor: Mutex<ProcessMonitor>,
    config: SupervisorConfig,
}

impl Supervisor {
    /// Create a supervisor for every spec in the store; nothing is launched yet
    pub fn new(store: &SpecStore, config: SupervisorConfig) -> Self {
        let fleet = Fleet::from_store(store, config.max_backoff);
        let guards = store
            .names()
            .into_iter()
            .map(|name| (name, Arc::new(Mutex::new(()))))
            .collect();

        Self {
            inner: Arc::new(Inner {
                fleet: RwLock::new(fleet),
                guards,
                monitor: Mutex::new(ProcessMonitor::new()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Launch the named specs (all when empty); running specs are left alone
    pub async fn start(&self, names: &[String]) -> Result<Report> {
        let names = self.resolve(names).await?;
        Ok(self
            .run_batch(names, |supervisor, name| async move {
                supervisor.start_one(&name).await
            })
            .await)
    }

    /// Gracefully stop the named specs (all when empty)
    pub async fn stop(&self, names: &[String]) -> Result<Report> {
        let names = self.resolve(names).await?;
        Ok(self
            .run_batch(names, |supervisor, name| async move {
                supervisor.stop_one(&name).await
            })
            .await)
    }

    /// Stop the named specs if running, then forget them
    pub async fn delete(&self, names: &[String]) -> Result<Report> {
        let names = self.resolve(names).await?;
        Ok(self
            .run_batch(names, |supervisor, name| async move {
                supervisor.delete_one(&name).await
            })
            .await)
    }

    /// Current state of the named specs (all when empty)
    pub async fn status(&self, names: &[String]) -> Result<Vec<ProcessInfo>> {
        let fleet = self.inner.fleet.read().await;
        let names = fleet.resolve(names)?;

        Ok(names
            .iter()
            .filter_map(|name| fleet.snapshot(name))
            .collect())
    }

    /// Stop everything still running, used on daemon shutdown
    pub async fn shutdown(&self) -> Report {
        info!("Stopping all processes");
        match self.stop(&[]).await {
            Ok(report) => report,
            Err(e) => {
                error!("Failed to stop fleet: {}", e);
                Report::default()
            }
        }
    }

    /// Run health checks forever at the configured interval
    pub async fn run_monitor(&self) {
        info!(
            "Starting health monitor (sample interval: {:?})",
            self.inner.config.sample_interval
        );

        let mut interval = tokio::time::interval(self.inner.config.sample_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.check_health().await;
        }
    }

    /// Perform a single health check cycle
    ///
    /// Reaps instances that exited on their own, samples memory and CPU of
    /// the rest, and starts termination of any instance over its memory
    /// threshold. Restarts are only ever scheduled, never awaited here.
    pub async fn check_health(&self) {
        debug!("Performing health check");

        let terminated = self.inner.fleet.write().await.poll();
        for termination in terminated {
            tokio::spawn(termination.logs.close());
            self.schedule_restart(
                termination.name,
                termination.exit.reason,
                termination.generation,
            );
        }

        let pids = self.inner.fleet.read().await.live_pids();
        if pids.is_empty() {
            return;
        }

        let samples = self.inner.monitor.lock().await.sample(&pids);
        let breaches = self.inner.fleet.write().await.apply_samples(&samples);

        for breach in breaches {
            let supervisor = self.clone();
            tokio::spawn(async move { supervisor.enforce_memory_limit(breach).await });
        }
    }

    async fn resolve(&self, names: &[String]) -> Result<Vec<String>> {
        self.inner.fleet.read().await.resolve(names)
    }

    fn guard(&self, name: &str) -> Arc<Mutex<()>> {
        self.inner
            .guards
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(())))
    }

    /// Run `op` for every name concurrently and collect a report in input order
    async fn run_batch<F, Fut>(&self, names: Vec<String>, op: F) -> Report
    where
        F: Fn(Supervisor, String) -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let handles: Vec<_> = names
            .into_iter()
            .map(|name| {
                let task = tokio::spawn(op(self.clone(), name.clone()));
                (name, task)
            })
            .collect();

        let mut report = Report::default();
        for (name, task) in handles {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Outcome::failed(&FlotillaError::Other(format!(
                    "operation on {} aborted: {}",
                    name, e
                ))),
            };
            report.push(name, outcome);
        }
        report
    }

    /// Operator start; supersedes any restart still waiting out its backoff
    async fn start_one(&self, name: &str) -> Outcome {
        let guard = self.guard(name);
        let _held = guard.lock().await;
        self.inner.fleet.write().await.cancel_pending_restart(name);
        self.launch_locked(name, false).await
    }

    async fn stop_one(&self, name: &str) -> Outcome {
        let guard = self.guard(name);
        let _held = guard.lock().await;
        self.stop_locked(name).await
    }

    async fn delete_one(&self, name: &str) -> Outcome {
        let guard = self.guard(name);
        let _held = guard.lock().await;

        let outcome = self.stop_locked(name).await;
        if outcome.is_failure() {
            return outcome;
        }

        match self.inner.fleet.write().await.remove(name) {
            Some(_) => {
                info!("Process {} deleted", name);
                Outcome::Deleted
            }
            None => Outcome::failed(&FlotillaError::NotFound(name.to_string())),
        }
    }

    /// Spawn and register `name`; caller holds the name guard
    async fn launch_locked(&self, name: &str, is_restart: bool) -> Outcome {
        let spec = {
            let fleet = self.inner.fleet.read().await;
            match fleet.get(name) {
                None => return Outcome::failed(&FlotillaError::NotFound(name.to_string())),
                Some(process) => {
                    if let Some(pid) = process.pid() {
                        debug!("Process {} already running (PID: {})", name, pid);
                        return Outcome::AlreadyRunning { pid };
                    }
                    Arc::clone(&process.spec)
                }
            }
        };

        let spawned = match spawn_process(&spec).await {
            Ok(spawned) => spawned,
            Err(e) => {
                error!("{}", e);
                return Outcome::failed(&e);
            }
        };

        match self.inner.fleet.write().await.register(spawned, is_restart) {
            Ok(pid) => {
                info!("Started process {} (PID: {})", name, pid);
                Outcome::Started { pid }
            }
            Err(e) => Outcome::failed(&e),
        }
    }

    /// Stop `name` if running and cancel any pending restart; caller holds the name guard
    async fn stop_locked(&self, name: &str) -> Outcome {
        let ticket = {
            let mut fleet = self.inner.fleet.write().await;
            fleet.cancel_pending_restart(name);
            fleet.begin_stop(name, ExitReason::Stopped)
        };

        let Some(ticket) = ticket else {
            debug!("Process {} is not running", name);
            return Outcome::NotRunning;
        };

        let exit = self.terminate(&ticket).await;
        self.finish(&ticket.name, exit.clone()).await;
        info!("Process {} stopped successfully", name);

        Outcome::Stopped { exit }
    }

    async fn enforce_memory_limit(&self, breach: MemoryBreach) {
        let guard = self.guard(&breach.name);
        let _held = guard.lock().await;

        let ticket = {
            let mut fleet = self.inner.fleet.write().await;
            let current = fleet.get(&breach.name).and_then(|p| p.pid());
            if current != Some(breach.pid) {
                return;
            }
            fleet.begin_stop(&breach.name, ExitReason::MemoryExceeded)
        };
        let Some(ticket) = ticket else {
            return;
        };

        warn!(
            "{}",
            FlotillaError::MemoryExceeded(breach.name.clone(), breach.memory, breach.limit)
        );

        let exit = self.terminate(&ticket).await;
        self.finish(&ticket.name, exit).await;

        let generation = self
            .inner
            .fleet
            .read()
            .await
            .get(&ticket.name)
            .map(|p| p.generation);
        if let Some(generation) = generation {
            self.schedule_restart(ticket.name, ExitReason::MemoryExceeded, generation);
        }
    }

    async fn finish(&self, name: &str, exit: ExitInfo) {
        let logs = self.inner.fleet.write().await.finish_stop(name, exit);
        if let Some(logs) = logs {
            logs.close().await;
        }
    }

    /// Signal the instance's process group, wait, then force kill
    ///
    /// Holds only the instance's own child handle while waiting.
    async fn terminate(&self, ticket: &StopTicket) -> ExitInfo {
        let timeout = ticket.timeout.unwrap_or(self.inner.config.kill_timeout);
        let mut child = ticket.child.lock().await;

        if let Ok(Some(status)) = child.try_wait() {
            return ExitInfo::new(ticket.reason, Some(status));
        }

        let stop_signal = parse_signal(&ticket.signal).unwrap_or_else(|e| {
            warn!("{}; using SIGTERM", e);
            Signal::SIGTERM
        });

        info!(
            "Stopping process {} (PID: {}) with {}",
            ticket.name, ticket.pid, ticket.signal
        );
        if let Err(e) = signal_group(ticket.pid, stop_signal) {
            warn!("{}", e);
        }

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!("Wait failed for process {}: {}", ticket.name, e);
                None
            }
            Err(_) => {
                warn!(
                    "Process {} did not exit within {:?}, sending SIGKILL",
                    ticket.name, timeout
                );
                if let Err(e) = signal_group(ticket.pid, Signal::SIGKILL) {
                    warn!("{}", e);
                }
                child.wait().await.ok()
            }
        };

        // Descendants left behind by a wrapper shell
        let _ = signal::killpg(Pid::from_raw(ticket.pid as i32), Signal::SIGKILL);

        ExitInfo::new(ticket.reason, status)
    }

    /// Apply the restart policy to `name` after it ended for `reason`
    ///
    /// `generation` is the one the instance ended in. The relaunch runs in
    /// its own task after the backoff delay and is dropped if the spec was
    /// started, stopped or deleted in the meantime.
    fn schedule_restart(&self, name: String, reason: ExitReason, generation: u64) {
        let supervisor = self.clone();

        tokio::spawn(async move {
            let decision = supervisor
                .inner
                .fleet
                .read()
                .await
                .restart_decision(&name, reason, generation);
            let Some(decision) = decision else {
                debug!("Pending restart of {} cancelled", name);
                return;
            };

            let delay = match decision {
                RestartDecision::Restart { delay } => delay,
                RestartDecision::LeaveDown => {
                    if reason.warrants_restart() {
                        info!("Process {} left stopped (autorestart disabled)", name);
                    }
                    return;
                }
                RestartDecision::LimitReached => {
                    warn!(
                        "Process {} reached its restart limit, leaving it stopped",
                        name
                    );
                    return;
                }
            };

            info!("Restarting process {} in {:?}", name, delay);
            sleep(delay).await;

            let guard = supervisor.guard(&name);
            let _held = guard.lock().await;

            {
                let mut fleet = supervisor.inner.fleet.write().await;
                if !fleet.is_current(&name, generation) {
                    debug!("Pending restart of {} cancelled", name);
                    return;
                }
                fleet.note_restart_attempt(&name);
            }

            match supervisor.launch_locked(&name, true).await {
                Outcome::Started { pid } => {
                    info!("Process {} restarted (PID: {})", name, pid);
                }
                Outcome::Failed { message, .. } => {
                    error!("Restart of {} failed: {}", name, message);
                    supervisor.schedule_restart(name.clone(), ExitReason::Crashed, generation);
                }
                _ => {}
            }
        });
    }
}

fn signal_group(pid: u32, sig: Signal) -> Result<()> {
    let pid = Pid::from_raw(pid as i32);

    // Children lead their own process group; fall back to the single pid
    // if the group is already gone.
    signal::killpg(pid, sig)
        .or_else(|_| signal::kill(pid, sig))
        .map_err(|e| FlotillaError::SignalError(format!("Failed to send {} to {}: {}", sig, pid, e)))
}

pub(crate) fn parse_signal(signal_name: &str) -> Result<Signal> {
    match signal_name {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        _ => Err(FlotillaError::SignalError(format!(
            "Invalid signal name: {}",
            signal_name
        ))),
    }
}
