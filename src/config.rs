//! Process configuration.
//!
//! The relay needs two addresses: where to listen (`SOCKET_HOST`/`SOCKET_PORT`)
//! and where the pricing backend lives (`REST_API_HOST`/`REST_API_PORT`).
//! Each value is taken from the first source that provides it:
//!
//! 1. a command-line flag,
//! 2. the process environment,
//! 3. an optional `.env`-style file.
//!
//! The first two are merged by the binaries' argument parser; this module
//! adds the env-file fallback and turns the result into a [`RelayConfig`].
//! A missing or malformed address is a [`ConfigError`].

use crate::defs::{BACKEND_TIMEOUT_SEC, MAX_BACKOFF_SEC, MAX_UNREACHABLE_POLLS, POLL_INTERVAL_SEC};
use crate::errors::ConfigError;
use crate::framing::Framing;
use crate::tcp_server::DispatchMode;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

/// Env var naming the host the relay listens on.
pub const SOCKET_HOST: &str = "SOCKET_HOST";
/// Env var naming the port the relay listens on.
pub const SOCKET_PORT: &str = "SOCKET_PORT";
/// Env var naming the pricing backend host.
pub const REST_API_HOST: &str = "REST_API_HOST";
/// Env var naming the pricing backend port.
pub const REST_API_PORT: &str = "REST_API_PORT";

/// Env file picked up from the working directory when none is given.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Key/value pairs loaded from a `.env`-style file.
#[derive(Debug, Default, Clone)]
pub struct EnvFile {
    vars: HashMap<String, String>,
}

impl EnvFile {
    /// Loads `KEY=VALUE` lines from `path`.
    ///
    /// Blank lines and `#` comments are skipped, an optional `export ` prefix
    /// is ignored, and values may be wrapped in single or double quotes.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        log::info!("Loading env file: {:?}", path.as_ref());
        let file = File::open(&path).map_err(|e| ConfigError::EnvFile(e.to_string()))?;
        let reader = BufReader::new(file);

        let mut vars = HashMap::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| ConfigError::EnvFile(e.to_string()))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=').ok_or_else(|| {
                ConfigError::EnvFile(format!("line {}: expected KEY=VALUE", index + 1))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::EnvFile(format!("line {}: empty key", index + 1)));
            }
            vars.insert(key.to_string(), unquote(value.trim()).to_string());
        }

        log::debug!("Loaded {} entries from env file", vars.len());
        Ok(Self { vars })
    }

    /// Loads `explicit` if given (it must exist), otherwise
    /// [`DEFAULT_ENV_FILE`] if present in the working directory.
    pub fn discover(explicit: Option<&Path>) -> Result<Option<Self>, ConfigError> {
        match explicit {
            Some(path) => Self::load(path).map(Some),
            None => {
                let default = Path::new(DEFAULT_ENV_FILE);
                if default.is_file() {
                    Self::load(default).map(Some)
                } else {
                    log::debug!("No {} file found, using flags and environment only", DEFAULT_ENV_FILE);
                    Ok(None)
                }
            }
        }
    }

    /// Looks up `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Returns `explicit` if set, otherwise the env file's value for `key`.
pub fn resolve(
    key: &str,
    explicit: Option<String>,
    env_file: Option<&EnvFile>,
) -> Result<String, ConfigError> {
    explicit
        .filter(|v| !v.trim().is_empty())
        .or_else(|| env_file.and_then(|f| f.get(key)).map(str::to_string))
        .map(|v| v.trim().to_string())
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

/// Parses a TCP port, reporting `key` on failure.
pub fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Resolves a `host:port` pair from two settings.
pub fn resolve_address(
    host_key: &str,
    port_key: &str,
    host: Option<String>,
    port: Option<String>,
    env_file: Option<&EnvFile>,
) -> Result<(String, u16), ConfigError> {
    let host = resolve(host_key, host, env_file)?;
    let port = resolve(port_key, port, env_file)?;
    let port = parse_port(port_key, &port)?;
    Ok((host, port))
}

/// Location of the pricing backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL without trailing slash, e.g. `http://127.0.0.1:4000`.
    pub base_url: String,
    /// Timeout applied to each backend request.
    pub timeout: Duration,
}

impl BackendConfig {
    /// Builds the configuration for a backend served over plain HTTP.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            base_url: format!("http://{}:{}", host, port),
            timeout: Duration::from_secs(BACKEND_TIMEOUT_SEC),
        }
    }
}

/// Full configuration of a relay server.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the listener binds to, e.g. `127.0.0.1:8050`.
    pub bind_addr: String,
    /// Pricing backend location.
    pub backend: BackendConfig,
    /// Pause between two polls of the same connection.
    pub poll_interval: Duration,
    /// Consecutive unreachable polls tolerated before closing; `0` = unlimited.
    pub max_unreachable_polls: u32,
    /// Upper bound for the retry delay after an unreachable poll.
    pub max_backoff: Duration,
    /// Message framing on the client-facing stream.
    pub framing: Framing,
    /// Whether connections are served concurrently or one at a time.
    pub dispatch: DispatchMode,
}

impl RelayConfig {
    /// Creates a configuration with default timings.
    pub fn new(bind_host: &str, bind_port: u16, backend: BackendConfig) -> Self {
        let mut config = Self {
            bind_addr: format!("{}:{}", bind_host, bind_port),
            backend,
            poll_interval: Duration::from_secs(POLL_INTERVAL_SEC),
            max_unreachable_polls: MAX_UNREACHABLE_POLLS,
            max_backoff: Duration::from_secs(MAX_BACKOFF_SEC),
            framing: Framing::default(),
            dispatch: DispatchMode::default(),
        };
        config.clamp_backend_timeout();
        config
    }

    /// Overrides the poll interval, re-clamping the backend timeout to it.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.clamp_backend_timeout();
        self
    }

    /// Overrides the backend request timeout (never longer than the poll interval).
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend.timeout = timeout;
        self.clamp_backend_timeout();
        self
    }

    fn clamp_backend_timeout(&mut self) {
        if self.backend.timeout > self.poll_interval {
            log::debug!(
                "Clamping backend timeout {:?} to poll interval {:?}",
                self.backend.timeout,
                self.poll_interval
            );
            self.backend.timeout = self.poll_interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_env_file_parsing() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "# relay settings")?;
        writeln!(file)?;
        writeln!(file, "SOCKET_HOST=127.0.0.1")?;
        writeln!(file, "export SOCKET_PORT = 8050")?;
        writeln!(file, "REST_API_HOST=\"localhost\"")?;
        writeln!(file, "REST_API_PORT='4000'")?;

        let env = EnvFile::load(file.path())?;
        assert_eq!(env.get(SOCKET_HOST), Some("127.0.0.1"));
        assert_eq!(env.get(SOCKET_PORT), Some("8050"));
        assert_eq!(env.get(REST_API_HOST), Some("localhost"));
        assert_eq!(env.get(REST_API_PORT), Some("4000"));
        assert_eq!(env.get("MISSING"), None);
        Ok(())
    }

    #[test]
    fn test_env_file_malformed_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "SOCKET_HOST").unwrap();
        match EnvFile::load(file.path()) {
            Err(ConfigError::EnvFile(msg)) => assert!(msg.contains("line 1")),
            other => panic!("Expected EnvFile error, got {:?}", other),
        }
    }

    #[test]
    fn test_env_file_missing() {
        assert!(matches!(
            EnvFile::load("nonexistent.env"),
            Err(ConfigError::EnvFile(_))
        ));
    }

    #[test]
    fn test_discover_explicit_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "REST_API_PORT=4000").unwrap();
        let env = EnvFile::discover(Some(file.path())).unwrap().unwrap();
        assert_eq!(env.get(REST_API_PORT), Some("4000"));

        assert!(EnvFile::discover(Some(Path::new("nonexistent.env"))).is_err());
    }

    #[test]
    fn test_explicit_value_wins_over_env_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "SOCKET_HOST=10.0.0.1").unwrap();
        let env = EnvFile::load(file.path()).unwrap();

        let host = resolve(SOCKET_HOST, Some("0.0.0.0".into()), Some(&env)).unwrap();
        assert_eq!(host, "0.0.0.0");
        let host = resolve(SOCKET_HOST, None, Some(&env)).unwrap();
        assert_eq!(host, "10.0.0.1");
    }

    #[test]
    fn test_missing_value_is_reported_by_name() {
        match resolve_address(REST_API_HOST, REST_API_PORT, Some("localhost".into()), None, None)
        {
            Err(ConfigError::Missing(key)) => assert_eq!(key, REST_API_PORT),
            other => panic!("Expected Missing error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_port() {
        let res = resolve_address(
            SOCKET_HOST,
            SOCKET_PORT,
            Some("localhost".into()),
            Some("eighty".into()),
            None,
        );
        assert!(matches!(res, Err(ConfigError::Invalid { .. })));
        assert!(parse_port(SOCKET_PORT, "70000").is_err());
        assert_eq!(parse_port(SOCKET_PORT, " 8050 ").unwrap(), 8050);
    }

    #[test]
    fn test_backend_timeout_clamped_to_poll_interval() {
        let config = RelayConfig::new("127.0.0.1", 0, BackendConfig::new("localhost", 4000))
            .with_poll_interval(Duration::from_secs(2));
        assert_eq!(config.backend.timeout, Duration::from_secs(2));
        assert_eq!(config.backend.base_url, "http://localhost:4000");
        assert_eq!(config.bind_addr, "127.0.0.1:0");

        let config = config.with_backend_timeout(Duration::from_millis(500));
        assert_eq!(config.backend.timeout, Duration::from_millis(500));
    }
}
