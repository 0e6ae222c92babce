//! Per-connection worker.
//!
//! A worker owns one [`ClientSession`] and drives it through
//! `AwaitingIdentifier → Validating → Polling → Closed`. The machine only
//! moves forward and runs once per connection. Every failure is handled here
//! and reported as a [`CloseReason`]; nothing propagates to the acceptor or
//! to other connections.

use crate::config::RelayConfig;
use crate::defs::{
    BACKEND_UNREACHABLE_MSG, INVALID_PRODUCT_ID_MSG, MAX_BACKOFF_SEC, MAX_PRODUCT_ID_LEN,
    MAX_UNREACHABLE_POLLS, POLL_INTERVAL_SEC, TCP_CONNECTION_TICK_PERIOD_MSEC,
};
use crate::framing::Framing;
use crate::price_poller::{PollOutcome, PricePoller};
use crate::product_id::ProductId;
use crate::session::ClientSession;
use crate::shutdown::ShutdownSignal;

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle states of a connection worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for the client's single identifier message.
    AwaitingIdentifier,
    /// Checking the received bytes.
    Validating,
    /// Polling the backend and forwarding changes.
    Polling,
    /// Connection released; terminal.
    Closed,
}

/// Why a worker closed its connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed or reset the connection.
    ClientDisconnected,
    /// The identifier was malformed.
    InvalidProductId,
    /// The backend returned an error, which was forwarded to the client.
    BackendError(String),
    /// The backend stayed unreachable for too many consecutive polls.
    BackendUnreachable,
    /// Writing to the client failed (peer gone or write timeout).
    PeerGone,
    /// Process shutdown was requested.
    Shutdown,
}

/// Timing and protocol parameters shared by all workers of a server.
#[derive(Clone, Debug)]
pub struct WorkerSettings {
    /// Pause between two successful polls.
    pub poll_interval: Duration,
    /// Consecutive unreachable polls tolerated before closing; `0` = unlimited.
    pub max_unreachable_polls: u32,
    /// Cap for the retry delay after an unreachable poll.
    pub max_backoff: Duration,
    /// Framing of server-to-client messages.
    pub framing: Framing,
    /// Read timeout used to re-check shutdown while awaiting the identifier.
    pub read_tick: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(POLL_INTERVAL_SEC),
            max_unreachable_polls: MAX_UNREACHABLE_POLLS,
            max_backoff: Duration::from_secs(MAX_BACKOFF_SEC),
            framing: Framing::default(),
            read_tick: Duration::from_millis(TCP_CONNECTION_TICK_PERIOD_MSEC),
        }
    }
}

impl From<&RelayConfig> for WorkerSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            max_unreachable_polls: config.max_unreachable_polls,
            max_backoff: config.max_backoff,
            framing: config.framing,
            ..Self::default()
        }
    }
}

/// Delay before the next poll after `misses` consecutive unreachable polls.
///
/// Doubles from `poll_interval` on each miss, capped at `max_backoff`
/// (but never shorter than `poll_interval`).
pub fn backoff_delay(poll_interval: Duration, max_backoff: Duration, misses: u32) -> Duration {
    let exponent = misses.saturating_sub(1).min(16);
    poll_interval
        .saturating_mul(1u32 << exponent)
        .min(max_backoff.max(poll_interval))
}

/// Drives one client connection from accept to close.
pub struct ConnectionWorker<P: PricePoller + ?Sized> {
    session: ClientSession,
    poller: Arc<P>,
    settings: WorkerSettings,
    shutdown: ShutdownSignal,
    state: WorkerState,
}

impl<P: PricePoller + ?Sized> ConnectionWorker<P> {
    /// Creates a worker for an accepted connection.
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        poller: Arc<P>,
        settings: WorkerSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            session: ClientSession::new(stream, peer),
            poller,
            settings,
            shutdown,
            state: WorkerState::AwaitingIdentifier,
        }
    }

    /// Current state of the machine.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Runs the connection to completion and releases it.
    pub fn run(mut self) -> CloseReason {
        let peer = self.session.peer_addr();
        log::info!("[{}] worker started", peer);

        let reason = self.drive();

        self.state = WorkerState::Closed;
        self.session.close();
        log::info!("[{}] worker finished: {:?}", peer, reason);
        reason
    }

    fn drive(&mut self) -> CloseReason {
        let raw = match self.await_identifier() {
            Ok(raw) => raw,
            Err(reason) => return reason,
        };

        self.state = WorkerState::Validating;
        let product_id = match self.validate(&raw) {
            Ok(id) => id,
            Err(reason) => return reason,
        };

        self.state = WorkerState::Polling;
        self.poll_loop(&product_id)
    }

    fn await_identifier(&mut self) -> Result<Vec<u8>, CloseReason> {
        let peer = self.session.peer_addr();
        if let Err(e) = self.session.set_read_timeout(Some(self.settings.read_tick)) {
            log::warn!("[{}] failed to set read timeout: {}", peer, e);
            return Err(CloseReason::ClientDisconnected);
        }

        let mut buf = [0u8; MAX_PRODUCT_ID_LEN];
        loop {
            if self.shutdown.is_triggered() {
                return Err(CloseReason::Shutdown);
            }
            match self.session.read_once(&mut buf) {
                Ok(0) => {
                    log::info!("[{}] no data from client", peer);
                    return Err(CloseReason::ClientDisconnected);
                }
                Ok(n) => {
                    log::debug!("[{}] received {} bytes", peer, n);
                    return Ok(buf[..n].to_vec());
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    log::warn!("[{}] read failed: {}", peer, e);
                    return Err(CloseReason::ClientDisconnected);
                }
            }
        }
    }

    fn validate(&mut self, raw: &[u8]) -> Result<ProductId, CloseReason> {
        let peer = self.session.peer_addr();
        match ProductId::from_wire(raw) {
            Ok(product_id) => {
                log::info!("[{}] received id {}", peer, product_id);
                self.session.set_product_id(product_id.clone());
                Ok(product_id)
            }
            Err(e) => {
                log::warn!("[{}] rejected product id: {}", peer, e);
                self.send_final(INVALID_PRODUCT_ID_MSG);
                Err(CloseReason::InvalidProductId)
            }
        }
    }

    fn poll_loop(&mut self, product_id: &ProductId) -> CloseReason {
        let peer = self.session.peer_addr();
        let mut misses: u32 = 0;

        loop {
            if self.shutdown.is_triggered() {
                return CloseReason::Shutdown;
            }
            if self.session.is_peer_closed() {
                log::info!("[{}] client disconnected", peer);
                return CloseReason::ClientDisconnected;
            }

            let delay = match self.poller.poll(product_id) {
                PollOutcome::Snapshot(snapshot) => {
                    misses = 0;
                    if self.session.is_changed(&snapshot) {
                        if let Err(e) = self.session.send(self.settings.framing, &snapshot.raw) {
                            log::info!("[{}] client connection closed: {}", peer, e);
                            return CloseReason::PeerGone;
                        }
                        log::debug!(
                            "[{}] forwarded prices for {}: {} / {}",
                            peer,
                            product_id,
                            snapshot.purchase_price,
                            snapshot.sale_price
                        );
                        self.session.commit(snapshot);
                    } else {
                        log::debug!("[{}] no new price for product {}", peer, product_id);
                    }
                    self.settings.poll_interval
                }
                PollOutcome::NotFound(message) => {
                    log::warn!("[{}] backend error for {}: {}", peer, product_id, message);
                    self.send_final(&message);
                    return CloseReason::BackendError(message);
                }
                PollOutcome::Unreachable => {
                    misses = misses.saturating_add(1);
                    let limit = self.settings.max_unreachable_polls;
                    if limit > 0 && misses >= limit {
                        log::warn!(
                            "[{}] backend unreachable {} times in a row, closing",
                            peer,
                            misses
                        );
                        self.send_final(BACKEND_UNREACHABLE_MSG);
                        return CloseReason::BackendUnreachable;
                    }
                    let delay =
                        backoff_delay(self.settings.poll_interval, self.settings.max_backoff, misses);
                    log::info!(
                        "[{}] backend unreachable (miss {}), retrying in {:?}",
                        peer,
                        misses,
                        delay
                    );
                    delay
                }
            };

            if self.shutdown.wait_timeout(delay) {
                return CloseReason::Shutdown;
            }
        }
    }

    /// Best-effort message sent right before closing.
    fn send_final(&mut self, message: &str) {
        if let Err(e) = self.session.send(self.settings.framing, message.as_bytes()) {
            log::debug!(
                "[{}] could not deliver final message: {}",
                self.session.peer_addr(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::FrameReader;
    use crate::price_snapshot::PriceSnapshot;
    use crate::test_support::ScriptedPoller;
    use std::io::{Read, Write};
    use std::net::{Shutdown, TcpListener};
    use std::thread::{self, JoinHandle};
    use std::time::Instant;

    fn fast_settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(10),
            max_unreachable_polls: 3,
            max_backoff: Duration::from_millis(40),
            framing: Framing::Newline,
            read_tick: Duration::from_millis(20),
        }
    }

    /// Accepts one connection and runs a worker on it in the background.
    fn spawn_worker(
        poller: Arc<ScriptedPoller>,
        settings: WorkerSettings,
        shutdown: ShutdownSignal,
    ) -> (TcpStream, JoinHandle<CloseReason>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        let worker = ConnectionWorker::new(stream, peer, poller, settings, shutdown);
        assert_eq!(worker.state(), WorkerState::AwaitingIdentifier);
        let handle = thread::spawn(move || worker.run());
        (client, handle)
    }

    fn read_all_frames(client: TcpStream) -> Vec<String> {
        let mut reader = FrameReader::new(client, Framing::Newline);
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = reader.read_frame() {
            frames.push(String::from_utf8(frame).unwrap());
        }
        frames
    }

    fn snapshot(purchase: f64, sale: f64) -> PollOutcome {
        PollOutcome::Snapshot(PriceSnapshot::new(purchase, sale))
    }

    #[test]
    fn test_forwards_only_changed_snapshots() {
        let poller = ScriptedPoller::new(
            vec![
                snapshot(100.0, 90.0),
                snapshot(100.0, 90.0),
                snapshot(105.0, 90.0),
                snapshot(105.0, 90.0),
            ],
            PollOutcome::NotFound("Product discontinued".into()),
        );
        let (mut client, handle) = spawn_worker(poller.clone(), fast_settings(), ShutdownSignal::new());

        client.write_all(b"42").unwrap();
        let frames = read_all_frames(client);
        let reason = handle.join().unwrap();

        assert_eq!(frames.len(), 3);
        let first: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        let second: serde_json::Value = serde_json::from_str(&frames[1]).unwrap();
        assert_eq!(first["purchaseprice"], 100.0);
        assert_eq!(second["purchaseprice"], 105.0);
        assert_eq!(frames[2], "Product discontinued");
        assert_eq!(reason, CloseReason::BackendError("Product discontinued".into()));
        assert_eq!(poller.calls(), 5);
        assert!(poller.polled_ids().iter().all(|id| id == "42"));
    }

    #[test]
    fn test_empty_first_read_never_polls() {
        let poller = ScriptedPoller::new(vec![], snapshot(1.0, 1.0));
        let (client, handle) = spawn_worker(poller.clone(), fast_settings(), ShutdownSignal::new());

        client.shutdown(Shutdown::Write).unwrap();
        let frames = read_all_frames(client);

        assert_eq!(handle.join().unwrap(), CloseReason::ClientDisconnected);
        assert!(frames.is_empty());
        assert_eq!(poller.calls(), 0);
    }

    #[test]
    fn test_invalid_product_id_is_rejected() {
        for input in [&b"4a"[..], b"   ", b"12ab", b"-3"] {
            let poller = ScriptedPoller::new(vec![], snapshot(1.0, 1.0));
            let (mut client, handle) =
                spawn_worker(poller.clone(), fast_settings(), ShutdownSignal::new());

            client.write_all(input).unwrap();
            let frames = read_all_frames(client);

            assert_eq!(handle.join().unwrap(), CloseReason::InvalidProductId);
            assert_eq!(frames, vec![INVALID_PRODUCT_ID_MSG.to_string()]);
            assert_eq!(poller.calls(), 0);
        }
    }

    #[test]
    fn test_backend_error_sent_once_then_closed() {
        let poller = ScriptedPoller::new(
            vec![PollOutcome::NotFound("Product discontinued".into())],
            snapshot(1.0, 1.0),
        );
        let (mut client, handle) = spawn_worker(poller.clone(), fast_settings(), ShutdownSignal::new());

        client.write_all(b" 7\n").unwrap();
        let frames = read_all_frames(client);

        assert_eq!(frames, vec!["Product discontinued".to_string()]);
        assert_eq!(
            handle.join().unwrap(),
            CloseReason::BackendError("Product discontinued".into())
        );
        assert_eq!(poller.calls(), 1);
    }

    #[test]
    fn test_unreachable_retries_then_recovers() {
        let poller = ScriptedPoller::new(
            vec![
                PollOutcome::Unreachable,
                PollOutcome::Unreachable,
                snapshot(3.0, 2.0),
                PollOutcome::Unreachable,
                PollOutcome::Unreachable,
                PollOutcome::NotFound("gone".into()),
            ],
            snapshot(3.0, 2.0),
        );
        let (mut client, handle) = spawn_worker(poller.clone(), fast_settings(), ShutdownSignal::new());

        client.write_all(b"1").unwrap();
        let frames = read_all_frames(client);

        // The miss counter resets after the successful poll, so the limit of 3
        // is never reached.
        assert_eq!(handle.join().unwrap(), CloseReason::BackendError("gone".into()));
        assert_eq!(frames.len(), 2);
        assert_eq!(poller.calls(), 6);
    }

    #[test]
    fn test_unreachable_limit_closes_connection() {
        let poller = ScriptedPoller::new(vec![], PollOutcome::Unreachable);
        let (mut client, handle) = spawn_worker(poller.clone(), fast_settings(), ShutdownSignal::new());

        client.write_all(b"1").unwrap();
        let frames = read_all_frames(client);

        assert_eq!(handle.join().unwrap(), CloseReason::BackendUnreachable);
        assert_eq!(frames, vec![BACKEND_UNREACHABLE_MSG.to_string()]);
        assert_eq!(poller.calls(), 3);
    }

    #[test]
    fn test_write_failure_ends_worker() {
        // Every poll reports a new price, so every cycle writes.
        let script: Vec<PollOutcome> = (0..200).map(|i| snapshot(f64::from(i), 1.0)).collect();
        let poller = ScriptedPoller::new(script, PollOutcome::Unreachable);
        let settings = WorkerSettings {
            max_unreachable_polls: 0,
            ..fast_settings()
        };
        let (mut client, handle) = spawn_worker(poller.clone(), settings, ShutdownSignal::new());

        client.write_all(b"5").unwrap();
        let mut reader = FrameReader::new(client, Framing::Newline);
        assert!(reader.read_frame().unwrap().is_some());
        drop(reader);

        // Either the next write or the next liveness check notices first.
        let reason = handle.join().unwrap();
        assert!(
            matches!(reason, CloseReason::PeerGone | CloseReason::ClientDisconnected),
            "unexpected close reason {:?}",
            reason
        );
        assert!(poller.calls() < 200);
    }

    #[test]
    fn test_gone_client_with_stable_prices_is_released() {
        // Prices never change, so nothing is ever written after the first frame.
        let poller = ScriptedPoller::new(vec![], snapshot(3.0, 2.0));
        let (mut client, handle) = spawn_worker(poller.clone(), fast_settings(), ShutdownSignal::new());

        client.write_all(b"8").unwrap();
        let mut reader = FrameReader::new(client, Framing::Newline);
        assert!(reader.read_frame().unwrap().is_some());
        let calls_at_drop = poller.calls();
        drop(reader);

        let deadline = Instant::now() + Duration::from_secs(2);
        while !handle.is_finished() {
            assert!(Instant::now() < deadline, "worker kept polling for a gone client");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(handle.join().unwrap(), CloseReason::ClientDisconnected);
        assert!(poller.calls() <= calls_at_drop + 2);
    }

    #[test]
    fn test_shutdown_interrupts_poll_wait() {
        let poller = ScriptedPoller::new(vec![], snapshot(1.0, 1.0));
        let settings = WorkerSettings {
            poll_interval: Duration::from_secs(30),
            ..fast_settings()
        };
        let shutdown = ShutdownSignal::new();
        let (mut client, handle) = spawn_worker(poller.clone(), settings, shutdown.clone());

        client.write_all(b"9").unwrap();
        let mut reader = FrameReader::new(client.try_clone().unwrap(), Framing::Newline);
        assert!(reader.read_frame().unwrap().is_some());

        let start = Instant::now();
        shutdown.trigger();
        assert_eq!(handle.join().unwrap(), CloseReason::Shutdown);
        assert!(start.elapsed() < Duration::from_secs(5));

        let mut buf = [0u8; 16];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
        assert_eq!(poller.calls(), 1);
    }

    #[test]
    fn test_shutdown_while_awaiting_identifier() {
        let poller = ScriptedPoller::new(vec![], snapshot(1.0, 1.0));
        let shutdown = ShutdownSignal::new();
        let (_client, handle) = spawn_worker(poller.clone(), fast_settings(), shutdown.clone());

        thread::sleep(Duration::from_millis(50));
        shutdown.trigger();
        assert_eq!(handle.join().unwrap(), CloseReason::Shutdown);
        assert_eq!(poller.calls(), 0);
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let base = Duration::from_secs(10);
        let cap = Duration::from_secs(60);
        assert_eq!(backoff_delay(base, cap, 1), Duration::from_secs(10));
        assert_eq!(backoff_delay(base, cap, 2), Duration::from_secs(20));
        assert_eq!(backoff_delay(base, cap, 3), Duration::from_secs(40));
        assert_eq!(backoff_delay(base, cap, 4), Duration::from_secs(60));
        assert_eq!(backoff_delay(base, cap, 100), Duration::from_secs(60));
        // A cap below the interval never shortens the regular cadence.
        assert_eq!(backoff_delay(base, Duration::from_secs(1), 3), base);
    }
}
