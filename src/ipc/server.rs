// IPC Server - Listens for operator connections and dispatches commands

use crate::error::{FlotillaError, Result};
use crate::ipc::{Command, Request, Response, ResponseData, DEFAULT_SOCKET_PATH};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// IPC server for handling client connections
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    /// Create a new IPC server with the default socket path
    pub fn new() -> Self {
        Self::with_socket_path(DEFAULT_SOCKET_PATH)
    }

    /// Create a new IPC server with a custom socket path
    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            listener: None,
        }
    }

    /// Bind to the Unix socket
    ///
    /// A stale socket file is replaced; a socket another daemon still
    /// answers on is an error. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            if std::os::unix::net::UnixStream::connect(&self.socket_path).is_ok() {
                return Err(FlotillaError::IpcError(format!(
                    "Another daemon is already listening on {}",
                    self.socket_path.display()
                )));
            }
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                FlotillaError::IpcError(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| FlotillaError::IpcError(format!("Failed to bind to socket: {}", e)))?;

        // Owner only (0600)
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.socket_path, permissions).map_err(|e| {
                FlotillaError::IpcError(format!("Failed to set socket permissions: {}", e))
            })?;
        }

        self.listener = Some(listener);
        Ok(())
    }

    /// Accept a single incoming connection
    pub async fn accept(&self) -> Result<UnixStream> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| FlotillaError::IpcError("Server not started".to_string()))?;

        let (stream, _addr) = listener
            .accept()
            .await
            .map_err(|e| FlotillaError::IpcError(format!("Failed to accept connection: {}", e)))?;

        Ok(stream)
    }

    /// Run the accept loop, answering each connection in its own task
    ///
    /// Each connection carries one request line and gets one response line.
    pub async fn run<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResponseData>> + Send,
    {
        let handler = Arc::new(handler);

        loop {
            let stream = match self.accept().await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("{}", e);
                    continue;
                }
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, handler.as_ref()).await {
                    tracing::warn!("Connection error: {}", e);
                }
            });
        }
    }

    /// Read one request, dispatch it and write the response
    pub async fn handle_connection<F, Fut>(stream: UnixStream, handler: &F) -> Result<()>
    where
        F: Fn(Command) -> Fut,
        Fut: Future<Output = Result<ResponseData>>,
    {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut request_line = String::new();

        reader
            .read_line(&mut request_line)
            .await
            .map_err(|e| FlotillaError::IpcError(format!("Failed to read request: {}", e)))?;

        let response = match serde_json::from_str::<Request>(&request_line) {
            Ok(request) => {
                tracing::debug!("Received {} request #{}", request.command.name(), request.id);
                match handler(request.command).await {
                    Ok(data) => Response::success(request.id, data),
                    Err(e) => Response::error(request.id, e.to_string()),
                }
            }
            Err(e) => Response::error(0, format!("Malformed request: {}", e)),
        };

        let mut response_json = serde_json::to_string(&response).map_err(|e| {
            FlotillaError::SerializationError(format!("Failed to serialize response: {}", e))
        })?;
        response_json.push('\n');

        write_half
            .write_all(response_json.as_bytes())
            .await
            .map_err(|e| FlotillaError::IpcError(format!("Failed to write response: {}", e)))?;
        write_half
            .flush()
            .await
            .map_err(|e| FlotillaError::IpcError(format!("Failed to flush stream: {}", e)))?;

        Ok(())
    }

    /// Stop the server and clean up the socket file
    pub fn stop(&mut self) -> Result<()> {
        if self.listener.take().is_none() {
            return Ok(());
        }

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                FlotillaError::IpcError(format!("Failed to remove socket file: {}", e))
            })?;
        }

        Ok(())
    }

    /// Get the socket path being used
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Default for IpcServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
