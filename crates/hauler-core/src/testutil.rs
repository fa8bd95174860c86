//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::AppError;
use crate::models::{CanonicalRecord, Method, Request, Response};
use crate::traits::{RecordSink, Transform, Transport};

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// One request observed by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: Instant,
    pub method: Method,
    pub url: String,
    pub body: Option<Vec<u8>>,
}

#[derive(Clone)]
enum Route {
    Page { status: u16, body: Vec<u8> },
    Sequence(Arc<Mutex<Vec<(u16, Vec<u8>)>>>),
    NetworkError,
}

/// Mock transport serving canned responses keyed by path (plus query).
///
/// Unknown paths answer `404`. Every call is recorded with its timestamp,
/// and the highest number of overlapping calls is tracked.
#[derive(Clone)]
pub struct MockTransport {
    routes: Arc<Mutex<HashMap<String, Route>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    latency: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            routes: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_page(self, path: &str, status: u16, body: &str) -> Self {
        self.with_raw_page(path, status, body.as_bytes().to_vec())
    }

    pub fn with_raw_page(self, path: &str, status: u16, body: Vec<u8>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Route::Page { status, body });
        self
    }

    /// Serve `bodies` in order for `path`; the last one repeats.
    pub fn with_sequence(self, path: &str, bodies: Vec<(u16, &str)>) -> Self {
        let bodies = bodies
            .into_iter()
            .map(|(status, body)| (status, body.as_bytes().to_vec()))
            .collect();
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route::Sequence(Arc::new(Mutex::new(bodies))),
        );
        self
    }

    pub fn with_network_error(self, path: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Route::NetworkError);
        self
    }

    /// Delay every response, so overlapping calls become observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Paths requested so far, in order.
    pub fn paths(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| route_key_str(&c.url))
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn respond(&self, key: &str) -> Result<Response, AppError> {
        let route = self.routes.lock().unwrap().get(key).cloned();
        match route {
            None => Ok(Response::new(404, "not found")),
            Some(Route::Page { status, body }) => Ok(Response::new(status, body)),
            Some(Route::Sequence(bodies)) => {
                let mut bodies = bodies.lock().unwrap();
                let (status, body) = if bodies.len() > 1 {
                    bodies.remove(0)
                } else {
                    bodies
                        .first()
                        .cloned()
                        .unwrap_or((404, b"not found".to_vec()))
                };
                Ok(Response::new(status, body))
            }
            Some(Route::NetworkError) => Err(AppError::NetworkError(format!(
                "Connection failed: {key}"
            ))),
        }
    }
}

fn route_key(request: &Request) -> String {
    match request.url.query() {
        Some(q) => format!("{}?{}", request.url.path(), q),
        None => request.url.path().to_string(),
    }
}

fn route_key_str(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(u) => match u.query() {
            Some(q) => format!("{}?{}", u.path(), q),
            None => u.path().to_string(),
        },
        Err(_) => url.to_string(),
    }
}

impl Transport for MockTransport {
    async fn execute(&self, request: &Request) -> Result<Response, AppError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.calls.lock().unwrap().push(RecordedCall {
            at: Instant::now(),
            method: request.method,
            url: request.url.to_string(),
            body: request.body.clone(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let response = self.respond(&route_key(request));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

// ---------------------------------------------------------------------------
// MockTransform
// ---------------------------------------------------------------------------

type TransformFn =
    dyn Fn(&serde_json::Value) -> Result<Option<serde_json::Value>, AppError> + Send + Sync;

/// Transform backed by a closure.
#[derive(Clone)]
pub struct MockTransform {
    f: Arc<TransformFn>,
}

impl MockTransform {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<Option<serde_json::Value>, AppError>
            + Send
            + Sync
            + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Wraps every input as `{"wrapped": input}`.
    pub fn wrapping() -> Self {
        Self::new(|v| Ok(Some(serde_json::json!({ "wrapped": v }))))
    }

    /// Always yields nothing.
    pub fn empty() -> Self {
        Self::new(|_| Ok(None))
    }

    pub fn failing(message: &'static str) -> Self {
        Self::new(move |_| Err(AppError::TransformError(message.to_string())))
    }
}

impl Transform for MockTransform {
    fn apply(&self, input: &serde_json::Value) -> Result<Option<serde_json::Value>, AppError> {
        (self.f)(input)
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

/// Mock sink that records inserts.
#[derive(Clone)]
pub struct MockSink {
    pub inserted: Arc<Mutex<Vec<CanonicalRecord>>>,
    /// Number of `insert` / `insert_many` calls, in that order.
    pub writes: Arc<Mutex<Vec<usize>>>,
    insert_error: Arc<Mutex<Option<AppError>>>,
}

impl MockSink {
    pub fn empty() -> Self {
        Self {
            inserted: Arc::new(Mutex::new(Vec::new())),
            writes: Arc::new(Mutex::new(Vec::new())),
            insert_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Sink whose next write fails with `error`.
    pub fn with_insert_error(error: AppError) -> Self {
        let sink = Self::empty();
        *sink.insert_error.lock().unwrap() = Some(error);
        sink
    }

    pub fn records(&self) -> Vec<CanonicalRecord> {
        self.inserted.lock().unwrap().clone()
    }
}

impl RecordSink for MockSink {
    async fn insert(&self, record: &CanonicalRecord) -> Result<(), AppError> {
        if let Some(e) = self.insert_error.lock().unwrap().take() {
            return Err(e);
        }
        self.writes.lock().unwrap().push(1);
        self.inserted.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn insert_many(&self, records: &[CanonicalRecord]) -> Result<u64, AppError> {
        if let Some(e) = self.insert_error.lock().unwrap().take() {
            return Err(e);
        }
        self.writes.lock().unwrap().push(records.len());
        self.inserted.lock().unwrap().extend_from_slice(records);
        Ok(records.len() as u64)
    }
}
