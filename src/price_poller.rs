use crate::config::BackendConfig;
use crate::defs::{HTTP_SERVER_ERROR_MSG, SOCKET_SERVER_ERROR_MSG};
use crate::errors::PollerError;
use crate::price_snapshot::PriceSnapshot;
use crate::product_id::ProductId;

use reqwest::StatusCode;
use reqwest::blocking::Client;

/// Result of a single backend poll.
#[derive(Clone, Debug)]
pub enum PollOutcome {
    /// The backend returned a complete price reading.
    Snapshot(PriceSnapshot),
    /// The backend answered with an error; the message is forwarded to the client.
    NotFound(String),
    /// The backend could not be reached (connect failure, timeout, broken response).
    Unreachable,
}

/// Source of price readings for the connection workers.
///
/// Implementations perform exactly one request per call and never retry;
/// retry cadence belongs to the worker's poll loop.
pub trait PricePoller: Send + Sync {
    /// Fetches the current price of `product_id`.
    fn poll(&self, product_id: &ProductId) -> PollOutcome;
}

/// [`PricePoller`] backed by the HTTP pricing service
/// (`GET {base_url}/product/{id}`).
#[derive(Debug, Clone)]
pub struct HttpPricePoller {
    client: Client,
    base_url: String,
}

impl HttpPricePoller {
    /// Creates a poller with the request timeout from `config`.
    pub fn new(config: &BackendConfig) -> Result<Self, PollerError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| PollerError::ClientBuild(e.to_string()))?;

        log::info!(
            "HTTP price poller targeting {} (timeout {:?})",
            config.base_url,
            config.timeout
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL of the product-price endpoint for `product_id`.
    pub fn product_url(&self, product_id: &ProductId) -> String {
        format!("{}/product/{}", self.base_url, product_id)
    }
}

impl PricePoller for HttpPricePoller {
    fn poll(&self, product_id: &ProductId) -> PollOutcome {
        let url = self.product_url(product_id);
        log::debug!("Requesting prices: GET {}", url);

        let response = match self.client.get(&url).send() {
            Ok(response) => response,
            Err(e) => {
                log::warn!("HTTP Server not reachable {}: {}", self.base_url, e);
                return PollOutcome::Unreachable;
            }
        };

        let status = response.status();
        match response.bytes() {
            Ok(body) => classify_response(status, &body),
            Err(e) => {
                log::warn!("Failed to read response body from {}: {}", url, e);
                PollOutcome::Unreachable
            }
        }
    }
}

/// Maps a backend HTTP response onto a [`PollOutcome`].
///
/// - `200` with both prices present → `Snapshot`
/// - `200` with an unusable body → `NotFound("Socket Server Error")`
/// - `4xx`/`5xx` → `NotFound` with the body's `message` field, or
///   `"HTTP Server Error"` when there is none
/// - any other status → `NotFound("HTTP Server Error")`
pub fn classify_response(status: StatusCode, body: &[u8]) -> PollOutcome {
    if status == StatusCode::OK {
        return match PriceSnapshot::from_body(body) {
            Ok(snapshot) => PollOutcome::Snapshot(snapshot),
            Err(e) => {
                log::warn!("Backend returned an unusable price payload: {}", e);
                PollOutcome::NotFound(SOCKET_SERVER_ERROR_MSG.to_string())
            }
        };
    }

    if status.is_client_error() || status.is_server_error() {
        let message = error_message(body).unwrap_or_else(|| HTTP_SERVER_ERROR_MSG.to_string());
        log::warn!("HTTP Server Error ({}): {}", status, message);
        return PollOutcome::NotFound(message);
    }

    log::warn!("Unexpected backend status: {}", status);
    PollOutcome::NotFound(HTTP_SERVER_ERROR_MSG.to_string())
}

fn error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("message")?
        .as_str()
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}
