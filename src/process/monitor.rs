use std::collections::HashMap;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Resource usage of one process at one point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// Resident memory in bytes
    pub memory: u64,
    /// CPU usage in percent since the previous refresh
    pub cpu: f32,
}

/// Samples resident memory and CPU of supervised children
pub struct ProcessMonitor {
    /// System information collector
    system: System,
}

impl ProcessMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Refresh and sample the given pids
    ///
    /// Pids the OS no longer knows about are absent from the result.
    /// CPU usage is only meaningful from the second sample of a pid onwards.
    ///
    /// # Arguments
    /// * `pids` - Process IDs of live instances
    ///
    /// # Returns
    /// Map of pid to its current sample
    pub fn sample(&mut self, pids: &[u32]) -> HashMap<u32, ResourceSample> {
        if pids.is_empty() {
            return HashMap::new();
        }

        let sys_pids: Vec<Pid> = pids.iter().map(|&pid| Pid::from_u32(pid)).collect();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&sys_pids),
            true,
            ProcessRefreshKind::everything(),
        );

        pids.iter()
            .filter_map(|&pid| {
                self.system.process(Pid::from_u32(pid)).map(|process| {
                    (
                        pid,
                        ResourceSample {
                            memory: process.memory(),
                            cpu: process.cpu_usage(),
                        },
                    )
                })
            })
            .collect()
    }

}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_sample_reports_memory() {
        let mut monitor = ProcessMonitor::new();

        let mut child = Command::new("/bin/sleep")
            .arg("5")
            .spawn()
            .expect("Failed to spawn process");
        let pid = child.id().expect("Failed to get PID");

        let samples = monitor.sample(&[pid]);
        let sample = samples.get(&pid).expect("sample for live pid");
        assert!(sample.memory > 0);

        let _ = child.kill().await;
        let _ = child.wait().await;
    }

    #[tokio::test]
    async fn test_sample_skips_reaped_pids() {
        let mut monitor = ProcessMonitor::new();

        let mut child = Command::new("/bin/sh")
            .args(["-c", "exit 1"])
            .spawn()
            .expect("Failed to spawn process");
        let pid = child.id().expect("Failed to get PID");
        let _ = child.wait().await;
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        assert!(monitor.sample(&[pid]).is_empty());
    }

    #[test]
    fn test_sample_empty() {
        let mut monitor = ProcessMonitor::default();
        assert!(monitor.sample(&[]).is_empty());
    }
}
