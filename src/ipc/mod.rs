// IPC module - Communication between client and daemon

pub mod client;
pub mod protocol;
pub mod server;

/// Default socket path for daemon communication
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/flotilla.sock";

pub use client::IpcClient;
pub use protocol::{
    Command, Outcome, ProcessInfo, Report, ReportEntry, Request, Response, ResponseData,
};
pub use server::IpcServer;
