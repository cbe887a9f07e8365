use crate::config::ProcessSpec;
use crate::process::types::ExitReason;
use std::time::{Duration, SystemTime};

/// Window in which `max_restarts` is counted
pub const RESTART_WINDOW: Duration = Duration::from_secs(60);

/// Restart policy configuration
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Whether automatic restart is enabled
    pub enabled: bool,
    /// Maximum number of restarts within the time window
    pub max_restarts: usize,
    /// Time window for counting restarts
    pub window: Duration,
    /// Delay before the first restart
    pub initial_delay: Duration,
    /// Upper bound for the exponential backoff
    pub max_delay: Duration,
}

/// Outcome of consulting the policy after an instance ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Relaunch after the given delay
    Restart { delay: Duration },
    /// Policy does not apply; stay stopped until an operator start
    LeaveDown,
    /// Too many restarts inside the window
    LimitReached,
}

impl RestartPolicy {
    /// Create a new restart policy with default values
    pub fn new() -> Self {
        Self {
            enabled: true,
            max_restarts: 10,
            window: RESTART_WINDOW,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Build the policy for a spec, capping backoff at `max_backoff`
    pub fn from_spec(spec: &ProcessSpec, max_backoff: Duration) -> Self {
        Self {
            enabled: spec.autorestart,
            max_restarts: spec.max_restarts,
            window: RESTART_WINDOW,
            initial_delay: spec.restart_delay,
            max_delay: max_backoff,
        }
    }

    /// Check if restart should be attempted based on restart history
    pub fn should_restart(&self, tracker: &RestartTracker) -> bool {
        if !self.enabled {
            return false;
        }

        tracker.count_recent_restarts(self.window) < self.max_restarts
    }

    /// Calculate the delay before the next restart attempt
    ///
    /// Only restarts inside the window count, so a process that stayed up
    /// for a while starts again from the initial delay.
    pub fn calculate_delay(&self, tracker: &RestartTracker) -> Duration {
        let recent = tracker.count_recent_restarts(self.window);
        backoff_delay(self.initial_delay, recent, self.max_delay)
    }

    /// Decide what to do after an instance ended for `reason`
    pub fn decide(&self, reason: ExitReason, tracker: &RestartTracker) -> RestartDecision {
        if !self.enabled || !reason.warrants_restart() {
            return RestartDecision::LeaveDown;
        }

        if !self.should_restart(tracker) {
            return RestartDecision::LimitReached;
        }

        RestartDecision::Restart {
            delay: self.calculate_delay(tracker),
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff: `initial_delay * 2^restart_count`, capped at `max_delay`
pub fn backoff_delay(
    initial_delay: Duration,
    restart_count: usize,
    max_delay: Duration,
) -> Duration {
    let factor = 2_u32.saturating_pow(restart_count.min(31) as u32);
    initial_delay
        .checked_mul(factor)
        .unwrap_or(max_delay)
        .min(max_delay)
}

/// Tracks restart history for a process
#[derive(Debug, Clone)]
pub struct RestartTracker {
    /// Timestamps of all restart attempts
    restart_times: Vec<SystemTime>,
}

impl RestartTracker {
    /// Create a new restart tracker
    pub fn new() -> Self {
        Self {
            restart_times: Vec::new(),
        }
    }

    /// Record a restart attempt
    pub fn record_restart(&mut self) {
        self.restart_times.push(SystemTime::now());
    }

    /// Count restarts within the given window
    pub fn count_recent_restarts(&self, window: Duration) -> usize {
        let now = SystemTime::now();

        self.restart_times
            .iter()
            .filter(|&&time| {
                now.duration_since(time)
                    .map(|d| d < window)
                    .unwrap_or(false)
            })
            .count()
    }

    /// Forget history, used when an operator starts the process by hand
    pub fn clear(&mut self) {
        self.restart_times.clear();
    }

    /// Remove restart records older than the window
    pub fn prune_old_restarts(&mut self, window: Duration) {
        let now = SystemTime::now();

        self.restart_times.retain(|&time| {
            now.duration_since(time)
                .map(|d| d < window)
                .unwrap_or(false)
        });
    }
}

impl Default for RestartTracker {
    fn default() -> Self {
        Self::new()
    }
}
