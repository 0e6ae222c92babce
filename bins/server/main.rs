//! # Price Relay Server
//!
//! Listens for TCP clients, reads one product id from each, and pushes the
//! product's prices every time they change on the HTTP pricing backend.
//!
//! ## Configuration
//! Addresses come from flags, then environment variables, then an env file
//! (`--env-file`, or `.env` in the working directory):
//! - `--socket-host` / `SOCKET_HOST`, `--socket-port` / `SOCKET_PORT`: listen address.
//! - `--rest-api-host` / `REST_API_HOST`, `--rest-api-port` / `REST_API_PORT`: backend.
//!
//! ## Other Options
//! - `--poll-interval-sec`: pause between polls of one connection (default `10`).
//! - `--backend-timeout-sec`: backend request timeout (default `5`).
//! - `--max-unreachable-polls`: misses tolerated before closing, `0` = unlimited.
//! - `--framing`: `newline`, `length` or `raw`.
//! - `--dispatch`: `concurrent` (thread per client) or `serial`.
//! - `--log-level` / `-l`: `error`, `warn`, `info`, `debug`, `trace`.
//!
//! Ctrl-C stops accepting, closes every open client connection and exits.

use price_relay::config::{
    BackendConfig, EnvFile, REST_API_HOST, REST_API_PORT, RelayConfig, SOCKET_HOST, SOCKET_PORT,
    resolve_address,
};
use price_relay::defs::{BACKEND_TIMEOUT_SEC, MAX_UNREACHABLE_POLLS, POLL_INTERVAL_SEC};
use price_relay::errors::{CliError, ConfigError};
use price_relay::framing::Framing;
use price_relay::price_poller::HttpPricePoller;
use price_relay::shutdown::ShutdownSignal;
use price_relay::tcp_server::{DispatchMode, TcpServer};
use price_relay::worker::WorkerSettings;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;

/// Command-line options for the Price Relay server
#[derive(Debug, StructOpt)]
#[structopt(
    name = "price_relay_server",
    about = "TCP relay pushing product price changes from an HTTP backend"
)]
struct Opt {
    /// Host to listen on
    #[structopt(long, env = "SOCKET_HOST")]
    socket_host: Option<String>,

    /// Port to listen on
    #[structopt(long, env = "SOCKET_PORT")]
    socket_port: Option<String>,

    /// Pricing backend host
    #[structopt(long, env = "REST_API_HOST")]
    rest_api_host: Option<String>,

    /// Pricing backend port
    #[structopt(long, env = "REST_API_PORT")]
    rest_api_port: Option<String>,

    /// Env file with KEY=VALUE settings (defaults to ./.env when present)
    #[structopt(long, parse(from_os_str))]
    env_file: Option<PathBuf>,

    /// Seconds between two backend polls for one client
    #[structopt(long, default_value = "10")]
    poll_interval_sec: u64,

    /// Backend request timeout in seconds (capped at the poll interval)
    #[structopt(long, default_value = "5")]
    backend_timeout_sec: u64,

    /// Consecutive unreachable polls before a client is disconnected (0 = never)
    #[structopt(long, default_value = "5")]
    max_unreachable_polls: u32,

    /// Message framing: newline, length, raw
    #[structopt(long, default_value = "newline")]
    framing: Framing,

    /// Connection dispatch: concurrent, serial
    #[structopt(long, default_value = "concurrent")]
    dispatch: DispatchMode,

    /// Log level: error, warn, info, debug, trace
    #[structopt(short, long, default_value = "info")]
    log_level: String,
}

/// Initializes the logger using env_logger with the given level
fn init_logger(level: &str) -> Result<(), CliError> {
    let mut builder = env_logger::Builder::new();

    let log_level = match level.to_lowercase().as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };

    builder.filter_level(log_level);
    builder.format_timestamp_micros();
    builder.format_module_path(false);
    builder.format_target(false);
    builder
        .try_init()
        .map_err(|e| CliError::GeneralError(format!("Failed to initialize logger: {}", e)))
}

/// Resolves every setting; any failure aborts startup before binding.
fn build_config(opt: &Opt) -> Result<RelayConfig, ConfigError> {
    let env_file = EnvFile::discover(opt.env_file.as_deref())?;

    let (host, port) = resolve_address(
        SOCKET_HOST,
        SOCKET_PORT,
        opt.socket_host.clone(),
        opt.socket_port.clone(),
        env_file.as_ref(),
    )?;
    let (api_host, api_port) = resolve_address(
        REST_API_HOST,
        REST_API_PORT,
        opt.rest_api_host.clone(),
        opt.rest_api_port.clone(),
        env_file.as_ref(),
    )?;

    if opt.poll_interval_sec == 0 {
        return Err(ConfigError::Invalid {
            key: "poll-interval-sec".into(),
            value: "0".into(),
        });
    }

    let mut config = RelayConfig::new(&host, port, BackendConfig::new(&api_host, api_port))
        .with_poll_interval(Duration::from_secs(opt.poll_interval_sec))
        .with_backend_timeout(Duration::from_secs(opt.backend_timeout_sec.max(1)));
    config.max_unreachable_polls = opt.max_unreachable_polls;
    config.framing = opt.framing;
    config.dispatch = opt.dispatch;
    Ok(config)
}

fn main() -> Result<(), CliError> {
    // Parse CLI arguments
    let opt = Opt::from_args();

    // Initialize logger
    init_logger(&opt.log_level)?;

    log::info!("Starting Price Relay server");
    log::debug!("Command line options: {:?}", opt);
    log::debug!(
        "Defaults: poll {}s, backend timeout {}s, max unreachable polls {}",
        POLL_INTERVAL_SEC,
        BACKEND_TIMEOUT_SEC,
        MAX_UNREACHABLE_POLLS
    );

    let config = build_config(&opt).map_err(|e| {
        log::error!("Error with configuration: {}", e);
        CliError::from(e)
    })?;
    log::info!(
        "Relaying {} to clients on {} ({} framing)",
        config.backend.base_url,
        config.bind_addr,
        config.framing
    );

    let poller = Arc::new(HttpPricePoller::new(&config.backend)?);
    let shutdown = ShutdownSignal::new();

    let tcp_server = TcpServer::new(
        &config.bind_addr,
        poller,
        WorkerSettings::from(&config),
        config.dispatch,
        shutdown.clone(),
    )?;

    let on_interrupt = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("Closing Server");
        on_interrupt.trigger();
    })
    .map_err(|e| CliError::GeneralError(format!("Failed to set Ctrl-C handler: {}", e)))?;

    log::info!("Socket is listening..");
    tcp_server.start()?;

    log::info!("Server shutdown complete");
    Ok(())
}
