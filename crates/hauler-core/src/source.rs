use std::future::Future;

use bytes::Bytes;
use serde::Serialize;

use crate::dispatcher::DispatcherHandle;
use crate::error::{AppError, ErrorPolicy, Severity};
use crate::models::{Document, Persistable, Request};
use crate::persistence::RecordSender;

/// Source-specific logic: decides what to fetch and assembles records.
///
/// A driver runs to completion on the caller's task. It submits one job at
/// a time through the context, derives further jobs from each result and
/// emits records as entities are completed.
pub trait SourceDriver {
    type Record: Persistable;

    /// Short name used in logs and reports.
    fn name(&self) -> &str;

    fn run(
        self,
        ctx: &mut DriverContext<Self::Record>,
    ) -> impl Future<Output = Result<(), AppError>>;
}

/// Counters kept by a [`DriverContext`] over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverSummary {
    /// Successful fetches.
    pub fetched: u64,
    /// Fetches that failed with a reportable error.
    pub skipped: u64,
    /// Records handed to the persistence worker.
    pub emitted: u64,
}

/// Everything a driver can reach: the dispatcher, the persistence queue and
/// the error policy.
pub struct DriverContext<R> {
    dispatcher: DispatcherHandle,
    records: RecordSender<R>,
    policy: ErrorPolicy,
    summary: DriverSummary,
}

impl<R: Persistable> DriverContext<R> {
    pub fn new(dispatcher: DispatcherHandle, records: RecordSender<R>, policy: ErrorPolicy) -> Self {
        Self {
            dispatcher,
            records,
            policy,
            summary: DriverSummary::default(),
        }
    }

    /// Fetch a page as a document.
    ///
    /// Fatal errors are returned; reportable ones are logged and yield
    /// `Ok(None)` so the driver can move on.
    pub async fn document(&mut self, request: Request) -> Result<Option<Document>, AppError> {
        let url = request.url.to_string();
        let result = self.dispatcher.fetch_document(request).await;
        self.settle(&url, result)
    }

    /// Fetch a response body as raw bytes. Errors as for [`Self::document`].
    pub async fn bytes(&mut self, request: Request) -> Result<Option<Bytes>, AppError> {
        let url = request.url.to_string();
        let result = self.dispatcher.fetch_bytes(request).await;
        self.settle(&url, result)
    }

    /// Hand a finished record to the persistence worker.
    pub async fn emit(&mut self, record: R) -> Result<(), AppError> {
        self.records.send(record).await?;
        self.summary.emitted += 1;
        Ok(())
    }

    /// Hand off an explicit batch, persisted with one bulk insert.
    pub async fn emit_batch(&mut self, records: Vec<R>) -> Result<(), AppError> {
        if records.is_empty() {
            return Ok(());
        }
        let n = records.len() as u64;
        self.records.send_batch(records).await?;
        self.summary.emitted += n;
        Ok(())
    }

    pub fn policy(&self) -> &ErrorPolicy {
        &self.policy
    }

    pub fn summary(&self) -> DriverSummary {
        self.summary
    }

    /// Consume the context, releasing its dispatcher handle and queue
    /// sender.
    pub fn into_summary(self) -> DriverSummary {
        self.summary
    }

    fn settle<T>(&mut self, url: &str, result: Result<T, AppError>) -> Result<Option<T>, AppError> {
        match result {
            Ok(value) => {
                self.summary.fetched += 1;
                Ok(Some(value))
            }
            Err(e) => match self.policy.classify(&e) {
                Severity::Fatal => Err(e),
                Severity::Reportable => {
                    tracing::warn!(%url, error = %e, category = %e.category(), "Skipping failed fetch");
                    self.summary.skipped += 1;
                    Ok(None)
                }
            },
        }
    }
}
