use crate::config::ProcessSpec;
use crate::error::{FlotillaError, Result};
use crate::logs::{LogCapture, LogSinks};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,

    /// Process name from the spec
    pub name: String,

    /// Tasks copying the child's output into its log files
    pub logs: LogCapture,
}

/// Spawn a process for the given spec
///
/// Runs `interpreter script args...` (or `script args...` when no
/// interpreter is set) in the spec's working directory with the
/// supervisor's environment overridden by `spec.env`. The child gets its
/// own process group and a null stdin; stdout/stderr are piped only when a
/// log destination exists for them.
///
/// # Arguments
/// * `spec` - Validated process spec
///
/// # Returns
/// * `Ok(SpawnedProcess)` - Child handle, pid and running log capture
/// * `Err(FlotillaError::Launch)` - Missing cwd, unresolvable program, log
///   files that cannot be opened, or a failed exec
pub async fn spawn_process(spec: &ProcessSpec) -> Result<SpawnedProcess> {
    let launch_error = |reason: String| FlotillaError::Launch(spec.name.clone(), reason);

    if !spec.cwd.is_dir() {
        return Err(launch_error(format!(
            "working directory does not exist: {}",
            spec.cwd.display()
        )));
    }

    let search_path = spec
        .env
        .get("PATH")
        .map(OsString::from)
        .or_else(|| std::env::var_os("PATH"));

    let mut command = match &spec.interpreter {
        Some(interpreter) => {
            let program = resolve_program(interpreter, &spec.cwd, search_path.as_deref())
                .ok_or_else(|| launch_error(format!("interpreter not found: {}", interpreter)))?;
            let script = resolve_program(&spec.script, &spec.cwd, search_path.as_deref())
                .unwrap_or_else(|| PathBuf::from(&spec.script));

            let mut command = Command::new(program);
            command.arg(script);
            command
        }
        None => {
            let program = resolve_program(&spec.script, &spec.cwd, search_path.as_deref())
                .ok_or_else(|| launch_error(format!("command not found: {}", spec.script)))?;
            Command::new(program)
        }
    };

    command.args(&spec.args);
    command.current_dir(&spec.cwd);
    command.envs(&spec.env);

    let sinks = LogSinks::open(spec).map_err(|e| launch_error(e.to_string()))?;

    command.stdin(Stdio::null());
    command.stdout(if sinks.captures_stdout() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    command.stderr(if sinks.captures_stderr() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    #[cfg(unix)]
    command.process_group(0);

    let mut child = command
        .spawn()
        .map_err(|e| launch_error(format!("spawn failed: {}", e)))?;

    let pid = child
        .id()
        .ok_or_else(|| launch_error("child exited before its pid was read".to_string()))?;

    let logs = LogCapture::attach(&spec.name, sinks, &mut child);

    tracing::debug!("Spawned {} with PID {}", spec.name, pid);

    Ok(SpawnedProcess {
        child,
        pid,
        name: spec.name.clone(),
        logs,
    })
}

/// Locate an executable the way a shell would
///
/// Names containing a slash are taken relative to `cwd`; bare names are
/// looked up on `search_path`.
fn resolve_program(name: &str, cwd: &Path, search_path: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    if name.contains('/') {
        let candidate = cwd.join(name);
        return is_executable(&candidate).then_some(candidate);
    }

    let search_path = search_path?;
    std::env::split_paths(search_path)
        .map(|dir| cwd.join(dir).join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
