use crate::config::{ProcessSpec, SpecStore};
use crate::error::{FlotillaError, Result};
use crate::ipc::protocol::ProcessInfo;
use crate::logs::LogCapture;
use crate::process::monitor::ResourceSample;
use crate::process::restart::RestartDecision;
use crate::process::spawner::SpawnedProcess;
use crate::process::types::{
    ExitInfo, ExitReason, ManagedProcess, ProcessInstance, ProcessState, ProcessStats,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::Mutex;

/// Everything needed to terminate one instance without holding the fleet lock
#[derive(Debug, Clone)]
pub struct StopTicket {
    pub name: String,
    pub pid: u32,
    pub child: Arc<Mutex<Child>>,
    pub signal: String,
    pub timeout: Option<Duration>,
    pub reason: ExitReason,
}

/// An instance the poller found exited on its own
#[derive(Debug)]
pub struct Termination {
    pub name: String,
    pub exit: ExitInfo,
    pub logs: LogCapture,
    /// Generation the instance ended in
    pub generation: u64,
}

/// A live instance whose resident memory went over its threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBreach {
    pub name: String,
    pub pid: u32,
    pub memory: u64,
    pub limit: u64,
}

/// Registry of every spec and its current instance
pub struct Fleet {
    processes: HashMap<String, ManagedProcess>,
    /// Declaration order, used for listings and reports
    order: Vec<String>,
    max_backoff: Duration,
}

impl Fleet {
    pub fn new(max_backoff: Duration) -> Self {
        Self {
            processes: HashMap::new(),
            order: Vec::new(),
            max_backoff,
        }
    }

    /// Build a fleet with every spec of the store in state `Stopped`
    pub fn from_store(store: &SpecStore, max_backoff: Duration) -> Self {
        let mut fleet = Self::new(max_backoff);
        for spec in store.iter() {
            fleet.insert_spec(Arc::clone(spec));
        }
        fleet
    }

    pub fn insert_spec(&mut self, spec: Arc<ProcessSpec>) {
        let name = spec.name.clone();
        if !self.processes.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.processes
            .insert(name, ManagedProcess::new(spec, self.max_backoff));
    }

    pub fn get(&self, name: &str) -> Option<&ManagedProcess> {
        self.processes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processes.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Expand an operator's name list into fleet names
    ///
    /// An empty list or the name `all` selects every spec. Any unknown name
    /// fails the whole resolution, even alongside `all`.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<String>> {
        let unknown: Vec<&str> = names
            .iter()
            .filter(|n| *n != "all" && !self.contains(n))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(FlotillaError::NotFound(unknown.join(", ")));
        }

        if names.is_empty() || names.iter().any(|n| n == "all") {
            return Ok(self.names());
        }

        // Fleet order, duplicates dropped
        Ok(self
            .order
            .iter()
            .filter(|n| names.contains(n))
            .cloned()
            .collect())
    }

    /// Bind a freshly spawned child to its spec
    ///
    /// Operator starts reset the restart window; automatic restarts count
    /// towards the restart total.
    pub fn register(&mut self, spawned: SpawnedProcess, is_restart: bool) -> Result<u32> {
        let process = self
            .processes
            .get_mut(&spawned.name)
            .ok_or_else(|| FlotillaError::NotFound(spawned.name.clone()))?;

        let pid = spawned.pid;
        process.instance = Some(ProcessInstance {
            stats: ProcessStats::new(pid),
            child: Arc::new(Mutex::new(spawned.child)),
            logs: spawned.logs,
            stop_requested: false,
        });
        process.state = ProcessState::Starting;
        process.generation += 1;

        if is_restart {
            process.restarts += 1;
        } else {
            process.restart_tracker.clear();
        }

        Ok(pid)
    }

    /// Invalidate any restart scheduled for `name`
    pub fn cancel_pending_restart(&mut self, name: &str) {
        if let Some(process) = self.processes.get_mut(name) {
            process.generation += 1;
        }
    }

    pub fn is_current(&self, name: &str, generation: u64) -> bool {
        self.processes
            .get(name)
            .map(|p| p.generation == generation)
            .unwrap_or(false)
    }

    /// Count a restart attempt against the policy window
    pub fn note_restart_attempt(&mut self, name: &str) {
        if let Some(process) = self.processes.get_mut(name) {
            let window = process.restart_policy.window;
            process.restart_tracker.prune_old_restarts(window);
            process.restart_tracker.record_restart();
        }
    }

    /// Consult the restart policy after `name` ended for `reason`
    ///
    /// Returns `None` if the spec is gone or `generation` is no longer current.
    pub fn restart_decision(
        &self,
        name: &str,
        reason: ExitReason,
        generation: u64,
    ) -> Option<RestartDecision> {
        self.processes
            .get(name)
            .filter(|p| p.generation == generation)
            .map(|p| p.restart_policy.decide(reason, &p.restart_tracker))
    }

    /// Mark an instance for termination and hand out what is needed to do it
    ///
    /// Returns `None` when there is no live instance or another stop is
    /// already in flight.
    pub fn begin_stop(&mut self, name: &str, reason: ExitReason) -> Option<StopTicket> {
        let process = self.processes.get_mut(name)?;
        let spec = Arc::clone(&process.spec);
        let instance = process.instance.as_mut()?;

        if instance.stop_requested {
            return None;
        }
        instance.stop_requested = true;

        let ticket = StopTicket {
            name: name.to_string(),
            pid: instance.stats.pid,
            child: Arc::clone(&instance.child),
            signal: spec.stop_signal.clone(),
            timeout: spec.kill_timeout,
            reason,
        };

        process.state = match reason {
            ExitReason::MemoryExceeded => ProcessState::MemoryExceeded,
            _ => ProcessState::Stopping,
        };

        Some(ticket)
    }

    /// Release a terminated instance and record how it ended
    ///
    /// Returns the log capture so the caller can drain it outside the lock.
    pub fn finish_stop(&mut self, name: &str, exit: ExitInfo) -> Option<LogCapture> {
        let process = self.processes.get_mut(name)?;
        let instance = process.instance.take()?;

        process.mark_stopped();
        process.last_exit = Some(exit);

        Some(instance.logs)
    }

    /// Reap instances that exited without a stop request
    ///
    /// Instances whose child handle is busy (being stopped) are skipped.
    /// Live instances still in `Starting` move to `Running`. A crashed
    /// instance is reported `Crashed` until the following poll settles it
    /// to `Stopped`.
    pub fn poll(&mut self) -> Vec<Termination> {
        let mut terminated = Vec::new();

        for name in &self.order {
            let Some(process) = self.processes.get_mut(name) else {
                continue;
            };
            let Some(instance) = process.instance.as_ref() else {
                if process.state == ProcessState::Crashed {
                    process.mark_stopped();
                }
                continue;
            };
            if instance.stop_requested {
                continue;
            }

            let status = {
                let Ok(mut child) = instance.child.try_lock() else {
                    continue;
                };
                child.try_wait()
            };

            match status {
                Ok(None) => {
                    if process.state == ProcessState::Starting {
                        process.mark_running();
                        tracing::debug!("Process {} is running", name);
                    }
                }
                Ok(Some(status)) => {
                    let exit = ExitInfo::unrequested(status);
                    if let Some(instance) = process.instance.take() {
                        if exit.reason == ExitReason::Crashed {
                            process.state = ProcessState::Crashed;
                            tracing::warn!(
                                "{}",
                                FlotillaError::RuntimeCrash(name.clone(), exit.describe())
                            );
                        } else {
                            process.mark_stopped();
                            tracing::info!("Process {} exited cleanly", name);
                        }

                        process.last_exit = Some(exit.clone());
                        terminated.push(Termination {
                            name: name.clone(),
                            exit,
                            logs: instance.logs,
                            generation: process.generation,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to poll process {}: {}", name, e);
                }
            }
        }

        terminated
    }

    /// Pids of live instances not already being stopped
    pub fn live_pids(&self) -> Vec<u32> {
        self.order
            .iter()
            .filter_map(|name| self.processes.get(name))
            .filter_map(|p| p.instance.as_ref())
            .filter(|i| !i.stop_requested)
            .map(|i| i.stats.pid)
            .collect()
    }

    /// Record resource samples and report memory threshold breaches
    pub fn apply_samples(&mut self, samples: &HashMap<u32, ResourceSample>) -> Vec<MemoryBreach> {
        let mut breaches = Vec::new();

        for name in &self.order {
            let Some(process) = self.processes.get_mut(name) else {
                continue;
            };
            let limit = process.spec.max_memory_restart;
            let Some(instance) = process.instance.as_mut() else {
                continue;
            };
            let Some(sample) = samples.get(&instance.stats.pid) else {
                continue;
            };

            instance.stats.memory_usage = sample.memory;
            instance.stats.cpu_usage = sample.cpu;

            if let Some(limit) = limit {
                if sample.memory > limit && !instance.stop_requested {
                    breaches.push(MemoryBreach {
                        name: name.clone(),
                        pid: instance.stats.pid,
                        memory: sample.memory,
                        limit,
                    });
                }
            }
        }

        breaches
    }

    /// Drop a spec and its record
    pub fn remove(&mut self, name: &str) -> Option<ManagedProcess> {
        self.order.retain(|n| n != name);
        self.processes.remove(name)
    }

    pub fn snapshot(&self, name: &str) -> Option<ProcessInfo> {
        let process = self.processes.get(name)?;
        let instance = process.instance.as_ref();

        Some(ProcessInfo {
            name: process.name.clone(),
            state: process.state,
            pid: instance.map(|i| i.stats.pid),
            uptime: instance.map(|i| i.stats.uptime()),
            restarts: process.restarts,
            memory_usage: instance.map(|i| i.stats.memory_usage).unwrap_or(0),
            cpu_usage: instance.map(|i| i.stats.cpu_usage).unwrap_or(0.0),
            max_memory: process.spec.max_memory_restart,
            autorestart: process.spec.autorestart,
            last_exit: process.last_exit.clone(),
        })
    }

    pub fn snapshot_all(&self) -> Vec<ProcessInfo> {
        self.order
            .iter()
            .filter_map(|name| self.snapshot(name))
            .collect()
    }
}
