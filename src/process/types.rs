use crate::config::ProcessSpec;
use crate::logs::LogCapture;
use crate::process::restart::{RestartPolicy, RestartTracker};
use serde::{Deserialize, Serialize};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::process::Child;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Starting,
    Running,
    Stopping,
    Crashed,
    MemoryExceeded,
    Stopped,
}

impl ProcessState {
    /// An OS process may still exist for this state
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting
                | ProcessState::Running
                | ProcessState::Stopping
                | ProcessState::MemoryExceeded
        )
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopping => write!(f, "stopping"),
            ProcessState::Crashed => write!(f, "crashed"),
            ProcessState::MemoryExceeded => write!(f, "memory-exceeded"),
            ProcessState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why an instance ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Exited on its own with status 0
    Exited,
    /// Nonzero exit or unexpected signal
    Crashed,
    /// Terminated for exceeding its memory threshold
    MemoryExceeded,
    /// Terminated on operator request
    Stopped,
}

impl ExitReason {
    pub fn warrants_restart(&self) -> bool {
        matches!(self, ExitReason::Crashed | ExitReason::MemoryExceeded)
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Exited => write!(f, "exited"),
            ExitReason::Crashed => write!(f, "crashed"),
            ExitReason::MemoryExceeded => write!(f, "memory-exceeded"),
            ExitReason::Stopped => write!(f, "stopped"),
        }
    }
}

/// Final status of a reaped instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub reason: ExitReason,
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub at: SystemTime,
}

impl ExitInfo {
    pub fn new(reason: ExitReason, status: Option<ExitStatus>) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.and_then(|s| s.signal())
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            reason,
            code: status.and_then(|s| s.code()),
            signal,
            at: SystemTime::now(),
        }
    }

    /// Classify an exit that nobody asked for
    pub fn unrequested(status: ExitStatus) -> Self {
        let reason = if status.success() {
            ExitReason::Exited
        } else {
            ExitReason::Crashed
        };
        Self::new(reason, Some(status))
    }

    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("{} (code {})", self.reason, code),
            (None, Some(signal)) => format!("{} (signal {})", self.reason, signal),
            (None, None) => self.reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStats {
    pub pid: u32,
    pub started_at: SystemTime,
    pub cpu_usage: f32,
    pub memory_usage: u64,
}

impl ProcessStats {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            started_at: SystemTime::now(),
            cpu_usage: 0.0,
            memory_usage: 0,
        }
    }

    pub fn uptime(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.started_at)
            .unwrap_or(Duration::from_secs(0))
    }
}

/// One live OS process bound to a spec
#[derive(Debug)]
pub struct ProcessInstance {
    pub stats: ProcessStats,
    pub child: Arc<Mutex<Child>>,
    pub logs: LogCapture,
    pub stop_requested: bool,
}

/// Per-spec record kept in the fleet for as long as the spec is registered
#[derive(Debug)]
pub struct ManagedProcess {
    pub name: String,
    pub spec: Arc<ProcessSpec>,
    pub state: ProcessState,
    pub instance: Option<ProcessInstance>,
    pub restarts: usize,
    pub last_exit: Option<ExitInfo>,
    pub restart_policy: RestartPolicy,
    pub restart_tracker: RestartTracker,
    /// Bumped on every launch and operator stop; pending restarts for an
    /// older generation are dropped
    pub generation: u64,
}

impl ManagedProcess {
    pub fn new(spec: Arc<ProcessSpec>, max_backoff: Duration) -> Self {
        let restart_policy = RestartPolicy::from_spec(&spec, max_backoff);

        Self {
            name: spec.name.clone(),
            spec,
            state: ProcessState::Stopped,
            instance: None,
            restarts: 0,
            last_exit: None,
            restart_policy,
            restart_tracker: RestartTracker::new(),
            generation: 0,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.instance.as_ref().map(|i| i.stats.pid)
    }

    pub fn is_active(&self) -> bool {
        self.instance.is_some()
    }

    pub fn mark_running(&mut self) {
        self.state = ProcessState::Running;
    }

    pub fn mark_stopped(&mut self) {
        self.state = ProcessState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_state_display() {
        assert_eq!(ProcessState::Running.to_string(), "running");
        assert_eq!(ProcessState::MemoryExceeded.to_string(), "memory-exceeded");
        assert!(ProcessState::Stopping.is_active());
        assert!(!ProcessState::Crashed.is_active());
        assert!(!ProcessState::Stopped.is_active());
    }

    #[test]
    fn test_exit_info_classification() {
        let ok = Command::new("/bin/sh").args(["-c", "exit 0"]).status().unwrap();
        let info = ExitInfo::unrequested(ok);
        assert_eq!(info.reason, ExitReason::Exited);
        assert_eq!(info.code, Some(0));
        assert!(!info.reason.warrants_restart());

        let failed = Command::new("/bin/sh").args(["-c", "exit 3"]).status().unwrap();
        let info = ExitInfo::unrequested(failed);
        assert_eq!(info.reason, ExitReason::Crashed);
        assert_eq!(info.describe(), "crashed (code 3)");
        assert!(info.reason.warrants_restart());
    }

    #[test]
    fn test_exit_info_signal() {
        let killed = Command::new("/bin/sh")
            .args(["-c", "kill -9 $$"])
            .status()
            .unwrap();
        let info = ExitInfo::unrequested(killed);
        assert_eq!(info.reason, ExitReason::Crashed);
        assert_eq!(info.code, None);
        assert_eq!(info.signal, Some(9));
        assert_eq!(info.describe(), "crashed (signal 9)");
    }
}
