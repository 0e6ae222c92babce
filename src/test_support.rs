//! Shared fixtures for unit tests: a scripted poller and a mock HTTP backend.

use crate::price_poller::{PollOutcome, PricePoller};
use crate::product_id::ProductId;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::runtime::Runtime;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Poller returning a fixed sequence of outcomes, then repeating `fallback`.
pub(crate) struct ScriptedPoller {
    script: Mutex<VecDeque<PollOutcome>>,
    fallback: PollOutcome,
    delay: Duration,
    calls: AtomicUsize,
    polled_ids: Mutex<Vec<String>>,
}

impl ScriptedPoller {
    pub(crate) fn new(script: Vec<PollOutcome>, fallback: PollOutcome) -> Arc<Self> {
        Self::with_delay(script, fallback, Duration::ZERO)
    }

    /// Every poll blocks for `delay` before answering (a slow backend).
    pub(crate) fn with_delay(
        script: Vec<PollOutcome>,
        fallback: PollOutcome,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            delay,
            calls: AtomicUsize::new(0),
            polled_ids: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn polled_ids(&self) -> Vec<String> {
        self.polled_ids.lock().unwrap().clone()
    }
}

impl PricePoller for ScriptedPoller {
    fn poll(&self, product_id: &ProductId) -> PollOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.polled_ids
            .lock()
            .unwrap()
            .push(product_id.as_str().to_string());
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Pricing backend served by a `wiremock` server.
///
/// The server runs on its own tokio runtime so the blocking `reqwest`
/// client under test is called from plain test threads, outside any runtime.
pub(crate) struct MockBackend {
    // Dropped before the runtime that serves it.
    server: MockServer,
    runtime: Runtime,
}

impl MockBackend {
    pub(crate) fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let server = runtime.block_on(MockServer::start());
        Self { server, runtime }
    }

    /// Answers `GET /product/{product_id}` with `response` for the next
    /// `times` requests. Earlier mounts are served first.
    pub(crate) fn respond(&self, product_id: &str, response: ResponseTemplate, times: u64) {
        let mock = Mock::given(method("GET"))
            .and(path(format!("/product/{}", product_id)))
            .respond_with(response)
            .up_to_n_times(times);
        self.runtime.block_on(mock.mount(&self.server));
    }

    pub(crate) fn base_url(&self) -> String {
        self.server.uri()
    }

    /// Paths of every request received so far, in arrival order.
    pub(crate) fn request_paths(&self) -> Vec<String> {
        self.runtime
            .block_on(self.server.received_requests())
            .unwrap_or_default()
            .iter()
            .map(|request| request.url.path().to_string())
            .collect()
    }
}
