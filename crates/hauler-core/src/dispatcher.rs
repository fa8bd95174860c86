//! Single-flight job dispatcher.
//!
//! One [`Dispatcher`] task owns the transport and performs every outbound
//! request of a run, one at a time, paced by a shared [`RateLimiter`].
//! Callers talk to it through a cloneable [`DispatcherHandle`]; each
//! submission blocks until its own [`TypedResult`] comes back.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Semaphore, mpsc, oneshot};

use crate::error::AppError;
use crate::models::{Document, JobKind, Request, TypedResult};
use crate::rate_limiter::RateLimiter;
use crate::traits::Transport;

/// A unit of work for the dispatcher, consumed exactly once.
#[derive(Debug)]
pub struct Job {
    pub kind: JobKind,
    pub request: Request,
    reply: oneshot::Sender<TypedResult>,
}

/// Create a dispatcher and the handle used to submit jobs to it.
///
/// The dispatcher does nothing until [`Dispatcher::run`] is awaited or
/// spawned. It stops once every handle has been dropped.
pub fn dispatcher<T: Transport>(transport: T, limiter: RateLimiter) -> (Dispatcher<T>, DispatcherHandle) {
    let (tx, rx) = mpsc::channel(1);
    let dispatcher = Dispatcher {
        transport,
        limiter,
        jobs: rx,
    };
    let handle = DispatcherHandle {
        jobs: tx,
        gate: Arc::new(Semaphore::new(1)),
    };
    (dispatcher, handle)
}

/// The worker side: dequeues jobs and performs the network calls.
pub struct Dispatcher<T: Transport> {
    transport: T,
    limiter: RateLimiter,
    jobs: mpsc::Receiver<Job>,
}

impl<T: Transport> Dispatcher<T> {
    /// Process jobs until all handles are dropped. Returns the number of
    /// requests issued.
    pub async fn run(mut self) -> u64 {
        tracing::info!(interval_ms = %self.limiter.interval().as_millis(), "Dispatcher started");
        let mut issued = 0u64;

        while let Some(job) = self.jobs.recv().await {
            self.limiter.until_ready().await;
            issued += 1;

            let result = self.execute(job.kind, &job.request).await;
            if let Err(e) = result_error(&result) {
                tracing::warn!(kind = %job.kind, url = %job.request.url, error = %e, "Request failed");
            }
            if job.reply.send(result).is_err() {
                tracing::warn!(url = %job.request.url, "Submitter went away before its result was delivered");
            }
        }

        tracing::info!(%issued, "Dispatcher stopped");
        issued
    }

    async fn execute(&self, kind: JobKind, request: &Request) -> TypedResult {
        tracing::info!(%kind, method = %request.method, url = %request.url, "Fetching");
        let body = self.fetch(request).await;

        match kind {
            JobKind::Document => TypedResult::Document(
                body.and_then(|bytes| Document::from_body(request.url.clone(), &bytes)),
            ),
            JobKind::Bytes => TypedResult::Bytes(body),
        }
    }

    async fn fetch(&self, request: &Request) -> Result<Bytes, AppError> {
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(AppError::HttpStatus {
                status: response.status,
                url: request.url.to_string(),
            });
        }
        tracing::debug!(url = %request.url, bytes = response.body.len(), "Fetched");
        Ok(response.body)
    }
}

fn result_error(result: &TypedResult) -> Result<(), &AppError> {
    match result {
        TypedResult::Document(Err(e)) | TypedResult::Bytes(Err(e)) => Err(e),
        _ => Ok(()),
    }
}

/// Submission side of the dispatcher.
///
/// Clones share one admission gate: a job is only enqueued once the
/// previous job's result has been received, so at most one job is ever
/// in flight no matter how many callers share the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    jobs: mpsc::Sender<Job>,
    gate: Arc<Semaphore>,
}

impl DispatcherHandle {
    /// Submit a job and wait for its result.
    ///
    /// The outer error is only ever [`AppError::ChannelClosed`]: the
    /// dispatcher is gone. Request failures travel inside the result.
    pub async fn submit(&self, kind: JobKind, request: Request) -> Result<TypedResult, AppError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| AppError::ChannelClosed("dispatcher gate"))?;

        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(Job {
                kind,
                request,
                reply,
            })
            .await
            .map_err(|_| AppError::ChannelClosed("dispatcher jobs"))?;

        rx.await
            .map_err(|_| AppError::ChannelClosed("dispatcher reply"))
    }

    pub async fn fetch_document(&self, request: Request) -> Result<Document, AppError> {
        self.submit(JobKind::Document, request).await?.into_document()
    }

    pub async fn fetch_bytes(&self, request: Request) -> Result<Bytes, AppError> {
        self.submit(JobKind::Bytes, request).await?.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::rate_limiter::RateLimiterConfig;
    use crate::testutil::MockTransport;

    fn spawn_dispatcher(transport: MockTransport, interval: Duration) -> DispatcherHandle {
        let limiter = RateLimiter::new(RateLimiterConfig::new(interval));
        let (dispatcher, handle) = dispatcher(transport, limiter);
        tokio::spawn(dispatcher.run());
        handle
    }

    fn get(path: &str) -> Request {
        Request::get(&format!("http://shop.test{path}")).unwrap()
    }

    #[tokio::test]
    async fn document_job_returns_document() {
        let transport = MockTransport::new().with_page("/", 200, "<html><h1>Index</h1></html>");
        let handle = spawn_dispatcher(transport, Duration::ZERO);

        let result = handle.submit(JobKind::Document, get("/")).await.unwrap();
        assert_eq!(result.kind(), JobKind::Document);
        let doc = result.into_document().unwrap();
        assert!(doc.body.contains("Index"));
        assert_eq!(doc.url.path(), "/");
    }

    #[tokio::test]
    async fn bytes_job_returns_raw_body() {
        let transport = MockTransport::new().with_page("/api", 200, r#"{"items":[]}"#);
        let handle = spawn_dispatcher(transport, Duration::ZERO);

        let bytes = handle.fetch_bytes(get("/api")).await.unwrap();
        assert_eq!(&bytes[..], br#"{"items":[]}"#);
    }

    #[tokio::test]
    async fn result_kind_always_matches_job_kind() {
        let transport = MockTransport::new()
            .with_page("/ok", 200, "<p>ok</p>")
            .with_page("/boom", 500, "oops");
        let handle = spawn_dispatcher(transport, Duration::ZERO);

        for kind in [JobKind::Document, JobKind::Bytes] {
            for path in ["/ok", "/boom", "/missing"] {
                let result = handle.submit(kind, get(path)).await.unwrap();
                assert_eq!(result.kind(), kind, "{kind} job for {path}");
            }
        }
    }

    #[tokio::test]
    async fn non_success_status_is_an_error_without_payload() {
        let transport = MockTransport::new().with_page("/boom", 500, "<html>error</html>");
        let handle = spawn_dispatcher(transport.clone(), Duration::ZERO);

        let err = handle.fetch_document(get("/boom")).await.unwrap_err();
        assert!(matches!(err, AppError::HttpStatus { status: 500, .. }));
        assert_eq!(transport.calls().len(), 1, "errors are not retried");
    }

    #[tokio::test]
    async fn transport_failure_is_reported_in_result() {
        let transport = MockTransport::new().with_network_error("/down");
        let handle = spawn_dispatcher(transport, Duration::ZERO);

        let result = handle.submit(JobKind::Bytes, get("/down")).await.unwrap();
        assert!(!result.is_ok());
        assert!(matches!(
            result.into_bytes().unwrap_err(),
            AppError::NetworkError(_)
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_document_is_a_parse_error() {
        let transport = MockTransport::new().with_raw_page("/bin", 200, vec![0xff, 0xfe, 0x00]);
        let handle = spawn_dispatcher(transport.clone(), Duration::ZERO);

        let err = handle.fetch_document(get("/bin")).await.unwrap_err();
        assert!(matches!(err, AppError::ParseError(_)));

        // The same body is fine as bytes.
        let bytes = handle.fetch_bytes(get("/bin")).await.unwrap();
        assert_eq!(bytes.len(), 3);
    }

    #[tokio::test]
    async fn requests_are_spaced_by_the_limiter() {
        let transport = MockTransport::new().with_page("/", 200, "ok");
        let handle = spawn_dispatcher(transport.clone(), Duration::from_millis(80));

        for _ in 0..3 {
            handle.fetch_bytes(get("/")).await.unwrap();
        }

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            let gap = pair[1].at - pair[0].at;
            assert!(gap >= Duration::from_millis(75), "gap too small: {gap:?}");
        }
    }

    #[tokio::test]
    async fn concurrent_submitters_are_single_flight() {
        let transport = MockTransport::new()
            .with_page("/", 200, "ok")
            .with_latency(Duration::from_millis(20));
        let handle = spawn_dispatcher(transport.clone(), Duration::ZERO);

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.fetch_bytes(get("/")).await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(transport.calls().len(), 4);
        assert_eq!(transport.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn submit_after_dispatcher_stopped_is_channel_closed() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(Duration::ZERO));
        let (dispatcher, handle) = dispatcher(MockTransport::new(), limiter);
        drop(dispatcher);

        let err = handle.fetch_bytes(get("/")).await.unwrap_err();
        assert!(matches!(err, AppError::ChannelClosed(_)));
    }

    #[tokio::test]
    async fn run_returns_issued_count_when_handles_drop() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(Duration::ZERO));
        let (dispatcher, handle) = dispatcher(MockTransport::new().with_page("/", 200, "ok"), limiter);
        let task = tokio::spawn(dispatcher.run());

        handle.fetch_bytes(get("/")).await.unwrap();
        handle.fetch_bytes(get("/")).await.unwrap();
        drop(handle);

        assert_eq!(task.await.unwrap(), 2);
    }
}
