// Process module - Core process lifecycle management

pub mod fleet;
pub mod monitor;
pub mod restart;
pub mod spawner;
pub mod supervisor;
pub mod types;

pub use fleet::{Fleet, MemoryBreach, StopTicket, Termination};
pub use monitor::{ProcessMonitor, ResourceSample};
pub use restart::{backoff_delay, RestartDecision, RestartPolicy, RestartTracker};
pub use spawner::{spawn_process, SpawnedProcess};
pub use supervisor::{Supervisor, SupervisorConfig};
pub use types::{ExitInfo, ExitReason, ManagedProcess, ProcessInstance, ProcessState, ProcessStats};
