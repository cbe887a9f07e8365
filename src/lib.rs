// Library exports for the Flotilla process supervisor

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod ipc;
pub mod logs;
pub mod process;
