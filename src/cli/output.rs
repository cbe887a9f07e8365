// Output formatting and display for CLI

use crate::ipc::{Outcome, ProcessInfo, Report};
use crate::process::{ExitInfo, ProcessState};
use chrono::{DateTime, Local};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print the per-name outcomes of a start, stop or delete
pub fn print_report(report: &Report) {
    if report.entries.is_empty() {
        println!("{}", "No processes selected".yellow());
        return;
    }

    for entry in &report.entries {
        println!("{}", format_outcome(&entry.name, &entry.outcome));
    }
}

fn format_outcome(name: &str, outcome: &Outcome) -> String {
    let name = name.cyan();
    match outcome {
        Outcome::Started { pid } => {
            format!("{} {} started (pid {})", "✓".green().bold(), name, pid)
        }
        Outcome::AlreadyRunning { pid } => {
            format!("{} {} already running (pid {})", "•".blue(), name, pid)
        }
        Outcome::Stopped { exit } => {
            format!("{} {} {}", "✓".green().bold(), name, exit.describe())
        }
        Outcome::NotRunning => format!("{} {} not running", "•".blue(), name),
        Outcome::Deleted => format!("{} {} deleted", "✓".green().bold(), name),
        Outcome::Failed { kind, message } => {
            format!("{} {} {}: {}", "✗".red().bold(), name, kind.to_string().red(), message)
        }
    }
}

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print daemon liveness
pub fn print_pong(uptime: &Duration) {
    println!("{}", "✓ Daemon is running".green().bold());
    println!("  {}: {}", "Uptime".bold(), format_duration(uptime));
}

/// Print a formatted table of processes
pub fn print_status_table(processes: &[ProcessInfo]) {
    if processes.is_empty() {
        println!("{}", "No processes are configured".yellow());
        return;
    }

    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "CPU")]
        cpu: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
        #[tabled(rename = "Last exit")]
        last_exit: String,
    }

    let rows: Vec<StatusRow> = processes
        .iter()
        .map(|p| StatusRow {
            name: truncate(&p.name, 24),
            state: format_state_colored(&p.state),
            pid: p
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            cpu: match p.pid {
                Some(_) => format!("{:.1}%", p.cpu_usage),
                None => "-".to_string(),
            },
            memory: format_memory_with_limit(p),
            uptime: p
                .uptime
                .as_ref()
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string()),
            restarts: p.restarts.to_string(),
            last_exit: p
                .last_exit
                .as_ref()
                .map(format_exit)
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);

    let running = processes.iter().filter(|p| p.state.is_active()).count();
    println!(
        "{}",
        format!("Total: {} process(es), {} active", processes.len(), running)
            .dimmed()
            .italic()
    );
}

fn format_memory_with_limit(process: &ProcessInfo) -> String {
    let used = match process.pid {
        Some(_) => format_memory(process.memory_usage),
        None => "-".to_string(),
    };
    match process.max_memory {
        Some(limit) => format!("{} / {}", used, format_memory(limit)),
        None => used,
    }
}

fn format_exit(exit: &ExitInfo) -> String {
    let at: DateTime<Local> = exit.at.into();
    format!("{} at {}", exit.describe(), at.format("%H:%M:%S"))
}

/// Format a process state with color coding
fn format_state_colored(state: &ProcessState) -> String {
    match state {
        ProcessState::Running => state.to_string().green().to_string(),
        ProcessState::Starting | ProcessState::Stopping => state.to_string().yellow().to_string(),
        ProcessState::Stopped => state.to_string().bright_black().to_string(),
        ProcessState::Crashed | ProcessState::MemoryExceeded => {
            state.to_string().red().bold().to_string()
        }
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    let (major, major_unit, minor, minor_unit) = if secs < 60 {
        return format!("{}s", secs);
    } else if secs < 3600 {
        (secs / 60, "m", secs % 60, "s")
    } else if secs < 86400 {
        (secs / 3600, "h", (secs % 3600) / 60, "m")
    } else {
        (secs / 86400, "d", (secs % 86400) / 3600, "h")
    };

    if minor > 0 {
        format!("{}{} {}{}", major, major_unit, minor, minor_unit)
    } else {
        format!("{}{}", major, major_unit)
    }
}

/// Format memory usage in human-readable format
fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

/// Truncate a string to at most `max_len` characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Create a spinner for commands that wait on children to exit
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
