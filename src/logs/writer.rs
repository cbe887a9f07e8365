use crate::error::{FlotillaError, Result};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;

/// Appends captured output lines to a single log file
pub struct LogWriter {
    /// Destination path
    path: PathBuf,
    /// Async file handle opened in append mode
    file: TokioFile,
    /// Prefix each line with a local timestamp
    timestamps: bool,
    /// Bytes written through this writer
    written: u64,
}

impl LogWriter {
    /// Open (or create) a log file for appending
    ///
    /// Missing parent directories are created.
    ///
    /// # Arguments
    /// * `path` - Log file destination
    /// * `timestamps` - Whether to prefix each line with `[%Y-%m-%d %H:%M:%S%.3f]`
    ///
    /// # Returns
    /// * `Ok(LogWriter)` - Writer ready for appending
    /// * `Err(FlotillaError::LogError)` - The directory or file could not be created
    pub fn open(path: &Path, timestamps: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FlotillaError::LogError(format!(
                    "Failed to create log directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                FlotillaError::LogError(format!(
                    "Failed to open log file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            file: TokioFile::from_std(file),
            timestamps,
            written: 0,
        })
    }

    /// Append one line of output
    ///
    /// A missing trailing newline is added so partial lines flushed at exit
    /// stay on their own line.
    pub async fn write_line(&mut self, line: &[u8]) -> Result<()> {
        let entry = self.format_entry(&Local::now(), line);

        self.file
            .write_all(&entry)
            .await
            .map_err(|e| FlotillaError::LogError(format!("Failed to write log: {}", e)))?;
        self.written += entry.len() as u64;

        Ok(())
    }

    fn format_entry(&self, timestamp: &DateTime<Local>, line: &[u8]) -> Vec<u8> {
        let mut entry = Vec::with_capacity(line.len() + 32);

        if self.timestamps {
            entry.extend_from_slice(
                format!("[{}] ", timestamp.format("%Y-%m-%d %H:%M:%S%.3f")).as_bytes(),
            );
        }

        entry.extend_from_slice(line);
        if !line.ends_with(b"\n") {
            entry.push(b'\n');
        }

        entry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .map_err(|e| FlotillaError::LogError(format!("Failed to flush log: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs/nested/app.log");

        let writer = LogWriter::open(&path, false).unwrap();

        assert!(path.exists());
        assert_eq!(writer.path(), path);
        assert_eq!(writer.written(), 0);
    }

    #[tokio::test]
    async fn test_write_plain_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.log");

        let mut writer = LogWriter::open(&path, false).unwrap();
        writer.write_line(b"hello\n").await.unwrap();
        writer.write_line(b"partial").await.unwrap();
        writer.flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "hello\npartial\n");
        assert_eq!(writer.written(), content.len() as u64);
    }

    #[tokio::test]
    async fn test_timestamped_entries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.log");

        let mut writer = LogWriter::open(&path, true).unwrap();
        writer.write_line(b"ready\n").await.unwrap();
        writer.flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with('['));
        assert!(content.ends_with("] ready\n"));
        // [YYYY-MM-DD HH:MM:SS.mmm]
        assert_eq!(content.find(']'), Some(24));
    }

    #[tokio::test]
    async fn test_appends_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.log");

        {
            let mut writer = LogWriter::open(&path, false).unwrap();
            writer.write_line(b"first\n").await.unwrap();
            writer.flush().await.unwrap();
        }
        {
            let mut writer = LogWriter::open(&path, false).unwrap();
            writer.write_line(b"second\n").await.unwrap();
            writer.flush().await.unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_open_fails_on_directory() {
        let temp_dir = TempDir::new().unwrap();

        let result = LogWriter::open(temp_dir.path(), false);
        assert!(matches!(result, Err(FlotillaError::LogError(_))));
    }
}
