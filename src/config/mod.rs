// Config module - Process spec store loaded from an ecosystem file

mod memory;

pub use memory::parse_memory;

use crate::error::{FlotillaError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Signal sent on stop when a spec does not name one
pub const DEFAULT_STOP_SIGNAL: &str = "SIGTERM";

const VALID_SIGNALS: [&str; 7] = [
    "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
];

/// Validated, immutable description of one supervised process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    /// Unique name across the fleet
    pub name: String,

    /// Script or executable to run
    pub script: String,

    /// Arguments passed after the script
    pub args: Vec<String>,

    /// Runtime binary the script is handed to (`None` runs the script directly)
    pub interpreter: Option<String>,

    /// Absolute working directory
    pub cwd: PathBuf,

    /// Overrides applied on top of the supervisor's environment
    pub env: BTreeMap<String, String>,

    /// Always 1; kept so configs declaring it round-trip
    pub instances: usize,

    /// Relaunch after a crash or memory breach
    pub autorestart: bool,

    /// Parsed but not acted upon
    pub watch: bool,

    /// Resident memory threshold in bytes
    pub max_memory_restart: Option<u64>,

    /// Combined stdout + stderr log
    pub log_file: Option<PathBuf>,

    /// Stderr log
    pub error_file: Option<PathBuf>,

    /// Stdout log
    pub out_file: Option<PathBuf>,

    /// Prefix captured log lines with a timestamp
    pub time: bool,

    /// Signal sent for a graceful stop
    pub stop_signal: String,

    /// Grace period before SIGKILL (`None` uses the supervisor default)
    pub kill_timeout: Option<Duration>,

    /// Restarts allowed inside the restart window
    pub max_restarts: usize,

    /// Base delay for exponential restart backoff
    pub restart_delay: Duration,
}

impl ProcessSpec {
    /// TCP ports this spec will bind, taken from `PORT` and `--port`/`-p` arguments
    pub fn ports(&self) -> BTreeSet<u16> {
        let mut ports = BTreeSet::new();

        if let Some(port) = self.env.get("PORT").and_then(|v| v.trim().parse().ok()) {
            ports.insert(port);
        }

        let mut args = self.args.iter();
        while let Some(arg) = args.next() {
            if arg == "--port" || arg == "-p" {
                if let Some(port) = args.next().and_then(|v| v.parse().ok()) {
                    ports.insert(port);
                }
            } else if let Some(value) = arg.strip_prefix("--port=") {
                if let Ok(port) = value.parse() {
                    ports.insert(port);
                }
            }
        }

        ports
    }
}

/// A string or a list of strings, as PM2 accepts for `args`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawArgs {
    Line(String),
    List(Vec<String>),
}

/// Scalar config value; TOML and JSON users write ports as numbers
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl RawScalar {
    fn into_string(self) -> String {
        match self {
            RawScalar::Text(s) => s,
            RawScalar::Integer(i) => i.to_string(),
            RawScalar::Float(f) => f.to_string(),
            RawScalar::Bool(b) => b.to_string(),
        }
    }
}

/// One app entry exactly as written in the config file
#[derive(Debug, Clone, Deserialize)]
pub struct RawSpec {
    #[serde(default)]
    name: Option<String>,

    #[serde(default, alias = "command")]
    script: Option<String>,

    #[serde(default)]
    args: Option<RawArgs>,

    #[serde(default)]
    interpreter: Option<String>,

    #[serde(default)]
    cwd: Option<PathBuf>,

    #[serde(default)]
    env: HashMap<String, RawScalar>,

    #[serde(default = "default_instances")]
    instances: usize,

    #[serde(default)]
    autorestart: bool,

    #[serde(default)]
    watch: bool,

    #[serde(default)]
    max_memory_restart: Option<RawScalar>,

    #[serde(default)]
    log_file: Option<PathBuf>,

    #[serde(default)]
    error_file: Option<PathBuf>,

    #[serde(default)]
    out_file: Option<PathBuf>,

    #[serde(default)]
    time: bool,

    #[serde(default)]
    stop_signal: Option<String>,

    /// Milliseconds
    #[serde(default)]
    kill_timeout: Option<u64>,

    #[serde(default = "default_max_restarts")]
    max_restarts: usize,

    /// Milliseconds
    #[serde(default = "default_restart_delay")]
    restart_delay: u64,
}

fn default_instances() -> usize {
    1
}

fn default_max_restarts() -> usize {
    10
}

fn default_restart_delay() -> u64 {
    1000
}

#[derive(Deserialize)]
struct FleetFile {
    #[serde(alias = "processes")]
    apps: Vec<RawSpec>,
}

impl RawSpec {
    /// Validate a single entry and resolve it against `base_dir`
    fn into_spec(self, index: usize, base_dir: &Path) -> Result<ProcessSpec> {
        let name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                FlotillaError::Validation(format!(
                    "spec #{}: missing required field 'name'",
                    index + 1
                ))
            })?;

        let script = self
            .script
            .map(|s| expand_env(s.trim()))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                FlotillaError::Validation(format!("{}: missing required field 'script'", name))
            })?;

        let args = match self.args {
            None => Vec::new(),
            Some(RawArgs::Line(line)) => shlex::split(&line)
                .ok_or_else(|| {
                    FlotillaError::Validation(format!("{}: unbalanced quotes in args", name))
                })?
                .iter()
                .map(|arg| expand_env(arg))
                .collect(),
            Some(RawArgs::List(list)) => list.iter().map(|arg| expand_env(arg)).collect(),
        };

        let interpreter = self
            .interpreter
            .map(|i| expand_env(i.trim()))
            .filter(|i| !i.is_empty() && i != "none");

        let cwd = match self.cwd {
            Some(cwd) => resolve_path(base_dir, &expand_path(&cwd)),
            None => base_dir.to_path_buf(),
        };

        let env = self
            .env
            .into_iter()
            .map(|(key, value)| (key, expand_env(&value.into_string())))
            .collect();

        if self.instances != 1 {
            return Err(FlotillaError::Validation(format!(
                "{}: instances must be 1, got {}",
                name, self.instances
            )));
        }

        let max_memory_restart = self
            .max_memory_restart
            .map(parse_threshold)
            .transpose()
            .map_err(|e| {
                FlotillaError::Validation(format!("{}: invalid max_memory_restart: {}", name, e))
            })?;

        let stop_signal = self
            .stop_signal
            .map(|s| s.trim().to_ascii_uppercase())
            .unwrap_or_else(|| DEFAULT_STOP_SIGNAL.to_string());
        if !VALID_SIGNALS.contains(&stop_signal.as_str()) {
            return Err(FlotillaError::Validation(format!(
                "{}: invalid stop_signal {}. Must be one of: {}",
                name,
                stop_signal,
                VALID_SIGNALS.join(", ")
            )));
        }

        if self.kill_timeout == Some(0) {
            return Err(FlotillaError::Validation(format!(
                "{}: kill_timeout must be greater than zero",
                name
            )));
        }

        if self.max_restarts == 0 {
            return Err(FlotillaError::Validation(format!(
                "{}: max_restarts must be at least 1",
                name
            )));
        }

        let log_path = |path: Option<PathBuf>| path.map(|p| resolve_path(&cwd, &expand_path(&p)));
        let log_file = log_path(self.log_file);
        let error_file = log_path(self.error_file);
        let out_file = log_path(self.out_file);

        Ok(ProcessSpec {
            name,
            script,
            args,
            interpreter,
            cwd,
            env,
            instances: self.instances,
            autorestart: self.autorestart,
            watch: self.watch,
            max_memory_restart,
            log_file,
            error_file,
            out_file,
            time: self.time,
            stop_signal,
            kill_timeout: self.kill_timeout.map(Duration::from_millis),
            max_restarts: self.max_restarts,
            restart_delay: Duration::from_millis(self.restart_delay),
        })
    }
}

fn parse_threshold(value: RawScalar) -> std::result::Result<u64, String> {
    match value {
        RawScalar::Integer(bytes) if bytes > 0 => Ok(bytes as u64),
        RawScalar::Integer(_) => Err("must be a positive quantity".to_string()),
        RawScalar::Text(text) => parse_memory(&text),
        RawScalar::Float(_) | RawScalar::Bool(_) => {
            Err("expected a byte count or a quantity like \"2G\"".to_string())
        }
    }
}

/// Read-only set of validated specs, in declaration order
#[derive(Debug, Clone, Default)]
pub struct SpecStore {
    specs: Vec<Arc<ProcessSpec>>,
    /// Entries dropped at load time, one message each
    rejected: Vec<String>,
}

impl SpecStore {
    /// Load specs from a `.toml` or `.json` ecosystem file
    ///
    /// Relative `cwd` values resolve against the directory holding the file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FlotillaError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let base_dir = std::env::current_dir()?.join(path.parent().unwrap_or(Path::new("")));
        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        match extension {
            "toml" => Self::from_toml_str(&contents, &base_dir),
            "json" => Self::from_json_str(&contents, &base_dir),
            _ => Err(FlotillaError::ConfigError(format!(
                "Unsupported file format: {}. Use .toml or .json",
                extension
            ))),
        }
    }

    /// Parse a TOML document with `[[apps]]` tables or a single top-level app
    pub fn from_toml_str(contents: &str, base_dir: &Path) -> Result<Self> {
        let table: toml::Table = toml::from_str(contents)
            .map_err(|e| FlotillaError::ConfigError(format!("Failed to parse TOML: {}", e)))?;

        let raw = if table.contains_key("apps") || table.contains_key("processes") {
            toml::Value::Table(table)
                .try_into::<FleetFile>()
                .map(|file| file.apps)
        } else {
            toml::Value::Table(table)
                .try_into::<RawSpec>()
                .map(|single| vec![single])
        }
        .map_err(|e| FlotillaError::ConfigError(format!("Failed to parse TOML: {}", e)))?;

        Self::load(raw, base_dir)
    }

    /// Parse a JSON document `{"apps": [...]}` or a single app object
    pub fn from_json_str(contents: &str, base_dir: &Path) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(contents)
            .map_err(|e| FlotillaError::ConfigError(format!("Failed to parse JSON: {}", e)))?;

        let is_fleet = value
            .as_object()
            .map(|obj| obj.contains_key("apps") || obj.contains_key("processes"))
            .unwrap_or(false);

        let raw = if is_fleet {
            serde_json::from_value::<FleetFile>(value).map(|file| file.apps)
        } else {
            serde_json::from_value::<RawSpec>(value).map(|single| vec![single])
        }
        .map_err(|e| FlotillaError::ConfigError(format!("Failed to parse JSON: {}", e)))?;

        Self::load(raw, base_dir)
    }

    /// Validate raw entries into a store
    ///
    /// Each entry stands on its own: an invalid entry, or the later of two
    /// entries sharing a name or a port, is logged and left out. Fails only
    /// when no entry survives.
    pub fn load(raw: Vec<RawSpec>, base_dir: &Path) -> Result<Self> {
        if raw.is_empty() {
            return Err(FlotillaError::Validation(
                "No process specs found in configuration".to_string(),
            ));
        }

        let entries = raw
            .into_iter()
            .enumerate()
            .map(|(index, entry)| entry.into_spec(index, base_dir));
        let (specs, rejected) = admit(entries);

        for error in &rejected {
            tracing::warn!("Skipping process spec: {}", error);
        }

        if specs.is_empty() {
            return Err(rejected.into_iter().next().unwrap_or_else(|| {
                FlotillaError::Validation("No valid process specs in configuration".to_string())
            }));
        }

        Ok(Self {
            specs,
            rejected: rejected.iter().map(ToString::to_string).collect(),
        })
    }

    /// Build a store from already-resolved specs
    ///
    /// Unlike `load`, any duplicate name or port collision fails the call.
    pub fn from_specs(specs: Vec<ProcessSpec>) -> Result<Self> {
        let (specs, rejected) = admit(specs.into_iter().map(Ok));
        if let Some(error) = rejected.into_iter().next() {
            return Err(error);
        }

        Ok(Self {
            specs,
            rejected: Vec::new(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ProcessSpec>> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProcessSpec>> {
        self.specs.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }

    /// Why each skipped entry was left out
    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Split validated entries into admitted specs and rejections
///
/// The first spec to claim a name or a port keeps it.
fn admit<I>(entries: I) -> (Vec<Arc<ProcessSpec>>, Vec<FlotillaError>)
where
    I: IntoIterator<Item = Result<ProcessSpec>>,
{
    let mut specs = Vec::new();
    let mut rejected = Vec::new();
    let mut names = HashSet::new();
    let mut claimed: HashMap<u16, String> = HashMap::new();

    for entry in entries {
        let spec = match entry {
            Ok(spec) => spec,
            Err(e) => {
                rejected.push(e);
                continue;
            }
        };

        if names.contains(&spec.name) {
            rejected.push(FlotillaError::Validation(format!(
                "duplicate process name: {}",
                spec.name
            )));
            continue;
        }

        let ports = spec.ports();
        let collision = ports
            .iter()
            .find_map(|port| claimed.get(port).map(|owner| (*port, owner.clone())));
        if let Some((port, owner)) = collision {
            rejected.push(FlotillaError::Validation(format!(
                "port {} is claimed by both {} and {}",
                port, owner, spec.name
            )));
            continue;
        }

        names.insert(spec.name.clone());
        for port in ports {
            claimed.insert(port, spec.name.clone());
        }
        specs.push(Arc::new(spec));
    }

    (specs, rejected)
}

/// Expand `$VAR` and `${VAR}` from the supervisor's environment
///
/// Unknown variables are left verbatim.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            if let Some(end) = braced.find('}') {
                let key = &braced[..end];
                match std::env::var(key) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => out.push_str(&rest[pos..pos + end + 3]),
                }
                rest = &braced[end + 1..];
                continue;
            }
        } else {
            let len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            if len > 0 {
                let key = &after[..len];
                match std::env::var(key) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => out.push_str(&rest[pos..pos + 1 + len]),
                }
                rest = &after[len..];
                continue;
            }
        }

        out.push('$');
        rest = after;
    }

    out.push_str(rest);
    out
}

fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_env(&path.to_string_lossy()))
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
