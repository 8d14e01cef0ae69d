//! Socket transport: Unix domain socket, or a named pipe on Windows.
//!
//! One request and one response per connection. Each record is terminated by
//! a NUL byte; end of stream also terminates a record.

use crate::channel::{CommandHandler, ControlChannel};
use crate::config::ControlConfig;
use crate::error::{ControlError, Result};
use crate::wire::{Request, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

#[cfg(windows)]
use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};

const RECORD_TERMINATOR: u8 = 0;

pub(crate) async fn read_record<R: AsyncRead + Unpin>(reader: R, max_bytes: usize) -> Result<String> {
    let mut reader = BufReader::new(reader.take(max_bytes as u64 + 1));
    let mut data = Vec::new();
    reader.read_until(RECORD_TERMINATOR, &mut data).await?;

    if data.last() == Some(&RECORD_TERMINATOR) {
        data.pop();
    } else if data.len() > max_bytes {
        return Err(ControlError::Protocol(format!(
            "record exceeds {} bytes",
            max_bytes
        )));
    }

    String::from_utf8(data)
        .map_err(|e| ControlError::Protocol(format!("record is not UTF-8: {}", e)))
}

pub(crate) async fn write_record<W: AsyncWrite + Unpin>(writer: &mut W, record: &str) -> Result<()> {
    writer.write_all(record.as_bytes()).await?;
    writer.write_u8(RECORD_TERMINATOR).await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Blocking client for the socket transport.
///
/// Owns a current-thread runtime so callers need no async context.
pub struct PipeChannel {
    config: ControlConfig,
    runtime: tokio::runtime::Runtime,
}

impl PipeChannel {
    pub fn new(config: &ControlConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            config: config.clone(),
            runtime,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// [`ControlChannel::call`] with the configured timeout for this command.
    pub fn request(&mut self, request: &Request) -> Result<String> {
        let timeout = self.config.timeout_for(request);
        self.call(request, timeout)
    }

    #[cfg(unix)]
    async fn exchange(path: &Path, request: &str, max_bytes: usize) -> Result<String> {
        let mut stream = UnixStream::connect(path).await?;
        write_record(&mut stream, request).await?;
        read_record(&mut stream, max_bytes).await
    }

    #[cfg(windows)]
    async fn exchange(path: &Path, request: &str, max_bytes: usize) -> Result<String> {
        let mut client = ClientOptions::new().open(path)?;
        write_record(&mut client, request).await?;
        read_record(&mut client, max_bytes).await
    }
}

impl ControlChannel for PipeChannel {
    fn send(&mut self, request: &Request, timeout: Duration) -> Result<Response> {
        let encoded = request.encode()?;
        let exchange = Self::exchange(
            &self.config.socket_path,
            &encoded,
            self.config.max_response_bytes,
        );

        let record = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, exchange).await })
            .map_err(|_| ControlError::Timeout {
                operation: request.command().to_string(),
                duration_ms: timeout.as_millis() as u64,
            })??;

        Response::parse(&record)
    }

    fn transport(&self) -> &'static str {
        "pipe"
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[cfg(unix)]
struct Listener {
    listener: UnixListener,
    path: PathBuf,
}

#[cfg(unix)]
impl Listener {
    fn bind(path: &Path) -> Result<Self> {
        // Remove a socket left behind by a previous run
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    async fn accept(&mut self) -> Result<UnixStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }
}

#[cfg(unix)]
impl Drop for Listener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(windows)]
struct Listener {
    pipe_name: PathBuf,
    next: NamedPipeServer,
}

#[cfg(windows)]
impl Listener {
    fn bind(pipe_name: &Path) -> Result<Self> {
        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .create(pipe_name)?;
        Ok(Self {
            pipe_name: pipe_name.to_path_buf(),
            next,
        })
    }

    /// Wait for a client, leaving a fresh instance for the next one.
    async fn accept(&mut self) -> Result<NamedPipeServer> {
        self.next.connect().await?;
        let fresh = ServerOptions::new().create(&self.pipe_name)?;
        Ok(std::mem::replace(&mut self.next, fresh))
    }
}

/// Answers requests on the socket transport from a background thread.
pub struct PipeServer {
    socket_path: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl PipeServer {
    /// Bind the socket and start serving. Returns once the socket is bound.
    pub fn spawn(config: &ControlConfig, handler: Arc<dyn CommandHandler>) -> Result<Self> {
        let socket_path = config.socket_path.clone();
        let max_bytes = config.max_response_bytes;
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let path = socket_path.clone();
        let thread = thread::Builder::new()
            .name("synthbus-control".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };

                runtime.block_on(Self::serve(path, handler, max_bytes, ready_tx, shutdown_rx));
            })?;

        match ready_rx.blocking_recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(ControlError::Protocol(
                    "control server thread exited before binding".to_string(),
                ));
            }
        }

        tracing::debug!(path = %socket_path.display(), "Control server listening");
        Ok(Self {
            socket_path,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn serve(
        path: PathBuf,
        handler: Arc<dyn CommandHandler>,
        max_bytes: usize,
        ready: oneshot::Sender<Result<()>>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut listener = match Listener::bind(&path) {
            Ok(listener) => {
                let _ = ready.send(Ok(()));
                listener
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(connection) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            if let Err(e) = Self::serve_connection(connection, handler, max_bytes).await {
                                tracing::debug!("Control connection failed: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Control accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }
    }

    async fn serve_connection<C>(mut connection: C, handler: Arc<dyn CommandHandler>, max_bytes: usize) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let record = read_record(&mut connection, max_bytes).await?;

        let response = match Request::parse(&record) {
            Ok(request) => {
                tracing::debug!(command = request.command(), "Control request");
                tokio::task::spawn_blocking(move || handler.handle(&request))
                    .await
                    .unwrap_or_else(|e| Response::error(format!("handler failed: {}", e)))
            }
            Err(e) => Response::error(e.to_string()),
        };

        write_record(&mut connection, &response.encode()).await?;
        connection.shutdown().await?;
        Ok(())
    }

    /// Stop accepting and join the server thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PipeServer {
    fn drop(&mut self) {
        self.stop();
    }
}
