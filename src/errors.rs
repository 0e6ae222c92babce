use thiserror::Error;

/// Errors produced while resolving the process configuration.
///
/// Any of these is fatal: the server exits before binding a socket.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required setting was not supplied by any source.
    #[error("Missing configuration value: {0}")]
    Missing(String),

    /// A setting was supplied but could not be parsed.
    #[error("Invalid configuration value for {key}: {value}")]
    Invalid {
        /// Name of the setting (environment variable name).
        key: String,
        /// Raw value that failed to parse.
        value: String,
    },

    /// The env file could not be read or contains a malformed line.
    #[error("Failed to read env file: {0}")]
    EnvFile(String),
}

/// Reasons a product id received from a client is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProductIdError {
    /// Nothing but whitespace was received.
    #[error("product id is empty")]
    Empty,

    /// The trimmed input contains a character that is not a decimal digit.
    #[error("product id must contain only digits: {0:?}")]
    NonDigit(String),

    /// The raw input is longer than a single identifier read.
    #[error("product id exceeds {0} bytes")]
    TooLong(usize),

    /// The raw bytes are not valid UTF-8.
    #[error("product id is not valid UTF-8")]
    NotUtf8,
}

/// Errors decoding a backend response body into a
/// [`PriceSnapshot`](crate::price_snapshot::PriceSnapshot).
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The body is not JSON or lacks one of the required price fields.
    #[error("Malformed price payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A price field holds a string that is not a number.
    #[error("Price field is not numeric: {0:?}")]
    NotNumeric(String),
}

/// Errors constructing a [`PricePoller`](crate::price_poller::PricePoller).
#[derive(Error, Debug)]
pub enum PollerError {
    /// The underlying HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// Errors produced by the TCP listener/acceptor.
///
/// Per-connection failures never appear here; they end in a
/// [`CloseReason`](crate::worker::CloseReason) inside the owning worker.
#[derive(Error, Debug)]
pub enum TcpServerError {
    /// The TCP listener failed to bind to the specified address/port.
    #[error("Failed to bind TCP listener: {0}")]
    BindError(String),

    /// Error while accepting an incoming TCP client connection.
    #[error("Failed to accept TCP connection: {0}")]
    AcceptError(String),

    /// I/O error while preparing a freshly accepted client socket.
    #[error("Client IO error: {0}")]
    ClientIoError(String),
}

/// High-level errors returned by the server and client binaries.
#[derive(Error, Debug)]
pub enum CliError {
    /// General wrapper around any textual failure.
    #[error("Cli failed with error: {0}")]
    GeneralError(String),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}

impl From<PollerError> for CliError {
    fn from(err: PollerError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}

impl From<TcpServerError> for CliError {
    fn from(err: TcpServerError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::GeneralError(err.to_string())
    }
}
