// Logs module - Capture of child stdout/stderr into log files

mod capture;
mod writer;

pub use capture::{LogCapture, LogSinks};
pub use writer::LogWriter;
