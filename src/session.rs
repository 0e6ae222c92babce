use crate::change_detector::ChangeDetector;
use crate::framing::{Framing, encode_frame};
use crate::price_snapshot::PriceSnapshot;
use crate::product_id::ProductId;

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// State of one accepted connection.
///
/// Owned by exactly one [`ConnectionWorker`](crate::worker::ConnectionWorker).
/// The socket is shut down exactly once: either through [`close`](Self::close)
/// or, if the worker unwinds, when the session is dropped.
#[derive(Debug)]
pub struct ClientSession {
    stream: TcpStream,
    peer: SocketAddr,
    product_id: Option<ProductId>,
    detector: ChangeDetector,
    closed: bool,
}

impl ClientSession {
    /// Wraps a freshly accepted connection.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            product_id: None,
            detector: ChangeDetector::new(),
            closed: false,
        }
    }

    /// Remote address of the client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// The validated product id, once received.
    pub fn product_id(&self) -> Option<&ProductId> {
        self.product_id.as_ref()
    }

    /// Stores the product id. The protocol carries a single identifier per
    /// connection, so this returns `false` (and keeps the first id) if one
    /// is already set.
    pub fn set_product_id(&mut self, product_id: ProductId) -> bool {
        if self.product_id.is_some() {
            log::warn!("[{}] product id already set, ignoring {}", self.peer, product_id);
            return false;
        }
        self.product_id = Some(product_id);
        true
    }

    /// Last snapshot successfully delivered to the client.
    pub fn last_snapshot(&self) -> Option<&PriceSnapshot> {
        self.detector.last()
    }

    /// Whether `snapshot` differs from the last delivered one.
    pub fn is_changed(&self, snapshot: &PriceSnapshot) -> bool {
        self.detector.is_changed(snapshot)
    }

    /// Records `snapshot` as delivered.
    pub fn commit(&mut self, snapshot: PriceSnapshot) {
        self.detector.commit(snapshot);
    }

    /// Sets the read timeout used while waiting for the identifier.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    /// Performs a single read into `buf`.
    pub fn read_once(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    /// Writes `payload` as one frame.
    pub fn send(&mut self, framing: Framing, payload: &[u8]) -> io::Result<()> {
        let frame = encode_frame(framing, payload);
        self.stream.write_all(&frame)?;
        self.stream.flush()
    }

    /// Checks, without blocking, whether the client has gone away.
    ///
    /// Pending input is read and discarded: a connection carries a single
    /// identifier, so anything after it is ignored. Returns `true` on
    /// end-of-stream or a socket error. The socket is back in blocking mode
    /// when this returns.
    pub fn is_peer_closed(&mut self) -> bool {
        if let Err(e) = self.stream.set_nonblocking(true) {
            log::debug!("[{}] cannot check connection: {}", self.peer, e);
            return true;
        }

        let mut scratch = [0u8; 64];
        let closed = loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => break true,
                Ok(n) => log::debug!("[{}] ignoring {} unexpected bytes", self.peer, n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break false,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::debug!("[{}] connection check failed: {}", self.peer, e);
                    break true;
                }
            }
        };

        if let Err(e) = self.stream.set_nonblocking(false) {
            log::debug!("[{}] cannot restore blocking mode: {}", self.peer, e);
            return true;
        }
        closed
    }

    /// Whether [`close`](Self::close) already ran.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Shuts the connection down in both directions. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            // Already reset by the peer; nothing left to release.
            log::debug!("[{}] shutdown after peer close: {}", self.peer, e);
        }
        log::debug!("[{}] connection closed", self.peer);
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.close();
    }
}
