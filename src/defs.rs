/// Maximum number of bytes read from a client when waiting for its product id.
///
/// The client sends exactly one message; anything beyond this size is not
/// part of the identifier and is never read.
pub const MAX_PRODUCT_ID_LEN: usize = 16;

/// Default interval (in seconds) between two backend polls for one connection.
pub const POLL_INTERVAL_SEC: u64 = 10;

/// Default timeout (in seconds) for a single backend request.
///
/// The effective timeout is never longer than the poll interval, so a worker
/// stuck in a backend call delays shutdown by at most one interval.
pub const BACKEND_TIMEOUT_SEC: u64 = 5;

/// Default number of consecutive unreachable polls tolerated before a
/// connection is closed. `0` disables the limit.
pub const MAX_UNREACHABLE_POLLS: u32 = 5;

/// Upper bound (in seconds) for the retry delay after an unreachable poll.
pub const MAX_BACKOFF_SEC: u64 = 60;

/// Write timeout (in seconds) for client sockets.
///
/// A write that times out is treated as the peer being gone.
pub const CLIENT_WRITE_TIMEOUT_SEC: u64 = 5;

/// Polling interval (in milliseconds) used while waiting for the client's
/// product id and by the acceptor while waiting for new connections.
///
/// Both loops check the shutdown signal on every tick.
pub const TCP_CONNECTION_TICK_PERIOD_MSEC: u64 = 200;

/// Message sent when the product id received from a client is malformed.
pub const INVALID_PRODUCT_ID_MSG: &str = "Invalid product ID";

/// Message sent when the backend returns an error without a `message` field.
pub const HTTP_SERVER_ERROR_MSG: &str = "HTTP Server Error";

/// Message sent when the backend answers with a body that is not a valid snapshot.
pub const SOCKET_SERVER_ERROR_MSG: &str = "Socket Server Error";

/// Message sent before closing a connection after too many unreachable polls.
pub const BACKEND_UNREACHABLE_MSG: &str = "HTTP Server not reachable";
