// IPC Protocol definitions for client-daemon communication

use crate::error::{ErrorKind, FlotillaError};
use crate::process::{ExitInfo, ProcessState};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// All available commands
///
/// An empty `names` list targets the whole fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Start { names: Vec<String> },
    Stop { names: Vec<String> },
    Status { names: Vec<String> },
    Delete { names: Vec<String> },
    Ping,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start { .. } => "start",
            Command::Stop { .. } => "stop",
            Command::Status { .. } => "status",
            Command::Delete { .. } => "delete",
            Command::Ping => "ping",
        }
    }
}

/// Per-spec state reported by `status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub uptime: Option<Duration>,
    pub restarts: usize,
    pub memory_usage: u64,
    pub cpu_usage: f32,
    pub max_memory: Option<u64>,
    pub autorestart: bool,
    pub last_exit: Option<ExitInfo>,
}

/// What happened to one name in a batch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Started { pid: u32 },
    AlreadyRunning { pid: u32 },
    Stopped { exit: ExitInfo },
    NotRunning,
    Deleted,
    Failed { kind: ErrorKind, message: String },
}

impl Outcome {
    pub fn failed(error: &FlotillaError) -> Self {
        Outcome::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub name: String,
    pub outcome: Outcome,
}

/// Per-name outcomes of a batch operation, in fleet order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub entries: Vec<ReportEntry>,
}

impl Report {
    pub fn push(&mut self, name: impl Into<String>, outcome: Outcome) {
        self.entries.push(ReportEntry {
            name: name.into(),
            outcome,
        });
    }

    pub fn get(&self, name: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.outcome)
    }

    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|e| e.outcome.is_failure())
    }
}

/// Response data variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseData {
    /// Outcome of start, stop or delete
    Report(Report),
    /// Result of status
    Status(Vec<ProcessInfo>),
    /// Daemon liveness
    Pong { uptime: Duration },
}

/// Request message from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

/// Response message from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<ResponseData, String>,
}

impl Request {
    pub fn new(id: u64, command: Command) -> Self {
        Self { id, command }
    }
}

impl Response {
    pub fn success(id: u64, data: ResponseData) -> Self {
        Self {
            id,
            result: Ok(data),
        }
    }

    pub fn error(id: u64, error: String) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }
}
