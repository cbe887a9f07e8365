use crate::config::ProcessSpec;
use crate::error::Result;
use crate::logs::LogWriter;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How long `close` waits for pipes to drain before giving up
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest run copied as one line; output without newlines is split here
const MAX_LINE_BYTES: u64 = 64 * 1024;

type SharedWriter = Arc<Mutex<LogWriter>>;

/// Log destinations for one launch, opened before the child is spawned
#[derive(Default)]
pub struct LogSinks {
    out: Option<SharedWriter>,
    err: Option<SharedWriter>,
    combined: Option<SharedWriter>,
}

impl LogSinks {
    /// Open every log file named by the spec
    ///
    /// Fails if any destination cannot be created, so a launch never starts
    /// with silently missing logs.
    pub fn open(spec: &ProcessSpec) -> Result<Self> {
        let open = |path: &Option<std::path::PathBuf>| -> Result<Option<SharedWriter>> {
            path.as_deref()
                .map(|p| LogWriter::open(p, spec.time).map(|w| Arc::new(Mutex::new(w))))
                .transpose()
        };

        Ok(Self {
            out: open(&spec.out_file)?,
            err: open(&spec.error_file)?,
            combined: open(&spec.log_file)?,
        })
    }

    pub fn captures_stdout(&self) -> bool {
        self.out.is_some() || self.combined.is_some()
    }

    pub fn captures_stderr(&self) -> bool {
        self.err.is_some() || self.combined.is_some()
    }
}

/// Background tasks copying a child's output into its log files
#[derive(Debug, Default)]
pub struct LogCapture {
    tasks: Vec<JoinHandle<()>>,
}

impl LogCapture {
    /// Take the child's piped stdout/stderr and start copying them
    pub fn attach(name: &str, sinks: LogSinks, child: &mut Child) -> Self {
        let mut tasks = Vec::new();

        if let Some(stdout) = child.stdout.take() {
            let targets = [sinks.out.clone(), sinks.combined.clone()];
            tasks.push(tokio::spawn(pump(
                name.to_string(),
                "stdout",
                stdout,
                targets.into_iter().flatten().collect(),
            )));
        }

        if let Some(stderr) = child.stderr.take() {
            let targets = [sinks.err, sinks.combined];
            tasks.push(tokio::spawn(pump(
                name.to_string(),
                "stderr",
                stderr,
                targets.into_iter().flatten().collect(),
            )));
        }

        Self { tasks }
    }

    /// Wait for the copy tasks to reach end of stream
    ///
    /// Descendants that inherited the pipes can keep them open after the
    /// child itself exits; those tasks are aborted after a short grace period.
    pub async fn close(self) {
        for mut task in self.tasks {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await.is_err() {
                task.abort();
            }
        }
    }
}

async fn pump<R>(name: String, stream: &'static str, reader: R, targets: Vec<SharedWriter>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        let mut bounded = (&mut reader).take(MAX_LINE_BYTES);
        match bounded.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                for target in &targets {
                    let mut writer = target.lock().await;
                    if let Err(e) = writer.write_line(&line).await {
                        tracing::warn!("Dropping {} line for {}: {}", stream, name, e);
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to read {} of {}: {}", stream, name, e);
                break;
            }
        }
    }

    for target in &targets {
        if let Err(e) = target.lock().await.flush().await {
            tracing::warn!("Failed to flush {} log for {}: {}", stream, name, e);
        }
    }
}
