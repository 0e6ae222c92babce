use crate::defs::{CLIENT_WRITE_TIMEOUT_SEC, TCP_CONNECTION_TICK_PERIOD_MSEC};
use crate::errors::{ConfigError, TcpServerError};
use crate::price_poller::PricePoller;
use crate::shutdown::ShutdownSignal;
use crate::worker::{CloseReason, ConnectionWorker, WorkerSettings};

use std::fmt;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How accepted connections are handed to workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// One thread per connection; acceptance never waits on a worker.
    #[default]
    Concurrent,
    /// Each worker runs on the acceptor thread; one client at a time.
    Serial,
}

impl FromStr for DispatchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "concurrent" | "threaded" => Ok(DispatchMode::Concurrent),
            "serial" | "single" => Ok(DispatchMode::Serial),
            other => Err(ConfigError::Invalid {
                key: "dispatch".into(),
                value: other.into(),
            }),
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DispatchMode::Concurrent => "concurrent",
            DispatchMode::Serial => "serial",
        })
    }
}

/// TCP listener that relays price updates to connected clients.
///
/// Each client sends one product id and then receives a framed message
/// whenever the product's price changes on the backend. See
/// [`ConnectionWorker`] for the per-connection protocol.
pub struct TcpServer<P: PricePoller + ?Sized + 'static> {
    /// TCP listener socket
    listener: TcpListener,

    /// Price source shared by all workers
    poller: Arc<P>,

    settings: WorkerSettings,
    dispatch: DispatchMode,
    shutdown: ShutdownSignal,
}

impl<P: PricePoller + ?Sized + 'static> TcpServer<P> {
    /// Creates a new TCP server bound to the given address.
    ///
    /// # Arguments
    /// * `addr` - Address to bind, e.g., `"127.0.0.1:8050"`.
    /// * `poller` - Price source shared by all connection workers.
    /// * `settings` - Poll cadence and framing for every worker.
    /// * `dispatch` - Whether connections are served concurrently.
    /// * `shutdown` - Signal that stops the accept loop and all workers.
    ///
    /// # Returns
    /// * `Ok(TcpServer)` if binding succeeds.
    /// * `Err(TcpServerError::BindError)` if the address is unavailable.
    pub fn new(
        addr: &str,
        poller: Arc<P>,
        settings: WorkerSettings,
        dispatch: DispatchMode,
        shutdown: ShutdownSignal,
    ) -> Result<Self, TcpServerError> {
        log::info!("Binding TCP server to address: {}", addr);
        let listener =
            TcpListener::bind(addr).map_err(|e| TcpServerError::BindError(e.to_string()))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| TcpServerError::BindError(e.to_string()))?;
        log::info!("TCP server successfully bound to: {}", addr);

        Ok(Self {
            listener,
            poller,
            settings,
            dispatch,
            shutdown,
        })
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TcpServerError> {
        self.listener
            .local_addr()
            .map_err(|e| TcpServerError::BindError(e.to_string()))
    }

    /// Handle to the signal that stops this server.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Runs the accept loop until shutdown is requested.
    ///
    /// Every live worker is joined before returning, so all client
    /// connections are closed when this returns `Ok`.
    pub fn start(&self) -> Result<(), TcpServerError> {
        log::info!("TCP server starting main loop ({} dispatch)", self.dispatch);
        let tick = Duration::from_millis(TCP_CONNECTION_TICK_PERIOD_MSEC);
        let mut workers: Vec<JoinHandle<CloseReason>> = Vec::new();

        let result = loop {
            if self.shutdown.is_triggered() {
                log::info!("Shutdown requested, no longer accepting connections");
                break Ok(());
            }

            match self.listener.accept() {
                Ok((stream, addr)) => {
                    log::info!("{} is connected", addr);
                    if let Err(e) = prepare_stream(&stream) {
                        log::warn!("Dropping connection from {}: {}", addr, e);
                        continue;
                    }
                    match self.dispatch {
                        DispatchMode::Concurrent => {
                            if let Some(handle) = self.spawn_worker(stream, addr) {
                                workers.push(handle);
                            }
                        }
                        DispatchMode::Serial => {
                            self.worker_for(stream, addr).run();
                        }
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    reap_finished(&mut workers);
                    self.shutdown.wait_timeout(tick);
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        ErrorKind::Interrupted
                            | ErrorKind::ConnectionAborted
                            | ErrorKind::ConnectionReset
                    ) =>
                {
                    log::debug!("Transient accept error: {}", e);
                }
                Err(e) => {
                    log::error!("Failed to accept TCP connection: {}", e);
                    self.shutdown.trigger();
                    break Err(TcpServerError::AcceptError(e.to_string()));
                }
            }
        };

        log::info!("Waiting for {} worker(s) to close", workers.len());
        for handle in workers {
            if handle.join().is_err() {
                log::error!("Worker thread panicked");
            }
        }
        log::info!("TCP server stopped");
        result
    }

    fn worker_for(&self, stream: TcpStream, addr: SocketAddr) -> ConnectionWorker<P> {
        ConnectionWorker::new(
            stream,
            addr,
            Arc::clone(&self.poller),
            self.settings.clone(),
            self.shutdown.clone(),
        )
    }

    fn spawn_worker(&self, stream: TcpStream, addr: SocketAddr) -> Option<JoinHandle<CloseReason>> {
        let worker = self.worker_for(stream, addr);
        log::debug!("Spawning handler thread for client: {}", addr);
        match thread::Builder::new()
            .name(format!("client-{}", addr))
            .spawn(move || worker.run())
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to spawn worker for {}: {}", addr, e);
                None
            }
        }
    }
}

/// Restores blocking mode (inherited from the listener on some platforms)
/// and bounds how long a write to a stalled client may block.
fn prepare_stream(stream: &TcpStream) -> Result<(), TcpServerError> {
    stream
        .set_nonblocking(false)
        .map_err(|e| TcpServerError::ClientIoError(e.to_string()))?;
    stream
        .set_write_timeout(Some(Duration::from_secs(CLIENT_WRITE_TIMEOUT_SEC)))
        .map_err(|e| TcpServerError::ClientIoError(e.to_string()))
}

fn reap_finished(workers: &mut Vec<JoinHandle<CloseReason>>) {
    let mut i = 0;
    while i < workers.len() {
        if workers[i].is_finished() {
            let handle = workers.swap_remove(i);
            if handle.join().is_err() {
                log::error!("Worker thread panicked");
            }
        } else {
            i += 1;
        }
    }
}
