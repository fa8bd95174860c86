use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, ErrorPolicy, Severity};
use crate::models::{CanonicalRecord, Persistable};
use crate::traits::{RecordSink, Transform};

/// One hand-off from a source driver to the persistence worker.
#[derive(Debug)]
pub enum PersistCommand<R> {
    Record(R),
    /// Explicit batch, written with a single `insert_many`.
    Batch(Vec<R>),
}

/// Create the hand-off queue between a driver and the persistence worker.
///
/// Capacity is one: a driver emitting a record waits until the worker has
/// taken the previous one.
pub fn persistence_channel<R: Persistable>() -> (RecordSender<R>, mpsc::Receiver<PersistCommand<R>>) {
    let (tx, rx) = mpsc::channel(1);
    (RecordSender { tx }, rx)
}

/// Producer side of the hand-off queue.
#[derive(Debug)]
pub struct RecordSender<R> {
    tx: mpsc::Sender<PersistCommand<R>>,
}

impl<R> Clone for RecordSender<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<R: Persistable> RecordSender<R> {
    /// Hand a record off. Ownership moves to the worker; this does not wait
    /// for the write.
    pub async fn send(&self, record: R) -> Result<(), AppError> {
        self.tx
            .send(PersistCommand::Record(record))
            .await
            .map_err(|_| AppError::ChannelClosed("persistence queue"))
    }

    pub async fn send_batch(&self, records: Vec<R>) -> Result<(), AppError> {
        self.tx
            .send(PersistCommand::Batch(records))
            .await
            .map_err(|_| AppError::ChannelClosed("persistence queue"))
    }
}

/// Events emitted by the persistence worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started,
    RecordReceived {
        kind: &'a str,
    },
    RecordPersisted {
        kind: &'a str,
        data_hash: &'a str,
    },
    BatchPersisted {
        records: usize,
        accepted: u64,
    },
    RecordDropped {
        error: &'a AppError,
    },
    Failed {
        error: &'a AppError,
    },
    Stopped {
        persisted: u64,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started => {
                tracing::info!("Persistence worker started");
            }
            WorkerEvent::RecordReceived { kind } => {
                tracing::debug!(%kind, "Record received");
            }
            WorkerEvent::RecordPersisted { kind, data_hash } => {
                tracing::info!(%kind, data_hash = %&data_hash[..8], "Record persisted");
            }
            WorkerEvent::BatchPersisted { records, accepted } => {
                tracing::info!(%records, %accepted, "Batch persisted");
            }
            WorkerEvent::RecordDropped { error } => {
                tracing::warn!(%error, category = %error.category(), "Record dropped");
            }
            WorkerEvent::Failed { error } => {
                tracing::error!(%error, category = %error.category(), "Persistence failed");
            }
            WorkerEvent::Stopped { persisted } => {
                tracing::info!(%persisted, "Persistence worker stopped");
            }
        }
    }
}

/// Passes data through unchanged; the transform of a worker without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl Transform for Identity {
    fn apply(&self, input: &serde_json::Value) -> Result<Option<serde_json::Value>, AppError> {
        Ok(Some(input.clone()))
    }
}

/// Sequential worker that canonicalises, transforms, validates and writes
/// records, one at a time.
pub struct PersistenceWorker<S, T = Identity>
where
    S: RecordSink,
    T: Transform,
{
    sink: S,
    transform: Option<T>,
    validator: Option<jsonschema::Validator>,
    policy: ErrorPolicy,
}

impl<S: RecordSink> PersistenceWorker<S, Identity> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            transform: None,
            validator: None,
            policy: ErrorPolicy::default(),
        }
    }
}

impl<S, T> PersistenceWorker<S, T>
where
    S: RecordSink,
    T: Transform,
{
    /// Reshape each record's data with `transform` before writing it.
    pub fn with_transform<U: Transform>(self, transform: U) -> PersistenceWorker<S, U> {
        PersistenceWorker {
            sink: self.sink,
            transform: Some(transform),
            validator: self.validator,
            policy: self.policy,
        }
    }

    /// Validate each record's (transformed) data against a JSON Schema.
    pub fn with_schema(mut self, schema: &serde_json::Value) -> Result<Self, AppError> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| AppError::ConfigError(format!("Invalid JSON Schema: {e}")))?;
        self.validator = Some(validator);
        Ok(self)
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run the worker until the queue closes or `cancel_token` fires.
    ///
    /// Returns the number of records written, or the first fatal error.
    pub async fn run<R, WR>(
        self,
        mut records: mpsc::Receiver<PersistCommand<R>>,
        cancel_token: CancellationToken,
        reporter: WR,
    ) -> Result<u64, AppError>
    where
        R: Persistable,
        WR: WorkerReporter,
    {
        reporter.report(WorkerEvent::Started);
        let mut persisted = 0u64;

        loop {
            let command = tokio::select! {
                command = records.recv() => command,
                () = cancel_token.cancelled() => break,
            };
            let Some(command) = command else { break };

            // Prepare synchronously so no borrow of the record spans an await.
            let outcome = match command {
                PersistCommand::Record(record) => {
                    let prepared = self.prepare(&record, &reporter);
                    match prepared {
                        Ok(canonical) => self.write_one(canonical, &reporter).await,
                        Err(e) => Err(e),
                    }
                }
                PersistCommand::Batch(batch) => {
                    let prepared = self.prepare_batch(&batch, &reporter);
                    match prepared {
                        Ok(prepared) => self.write_batch(prepared, &reporter).await,
                        Err(e) => Err(e),
                    }
                }
            };

            match outcome {
                Ok(n) => persisted += n,
                Err(e) => match self.policy.classify(&e) {
                    Severity::Fatal => {
                        reporter.report(WorkerEvent::Failed { error: &e });
                        return Err(e);
                    }
                    Severity::Reportable => {
                        reporter.report(WorkerEvent::RecordDropped { error: &e });
                    }
                },
            }
        }

        reporter.report(WorkerEvent::Stopped { persisted });
        Ok(persisted)
    }

    async fn write_one<WR: WorkerReporter>(
        &self,
        canonical: CanonicalRecord,
        reporter: &WR,
    ) -> Result<u64, AppError> {
        self.sink.insert(&canonical).await?;
        reporter.report(WorkerEvent::RecordPersisted {
            kind: &canonical.kind,
            data_hash: &canonical.data_hash(),
        });
        Ok(1)
    }

    async fn write_batch<WR: WorkerReporter>(
        &self,
        prepared: Vec<CanonicalRecord>,
        reporter: &WR,
    ) -> Result<u64, AppError> {
        if prepared.is_empty() {
            return Ok(0);
        }
        let accepted = self.sink.insert_many(&prepared).await?;
        reporter.report(WorkerEvent::BatchPersisted {
            records: prepared.len(),
            accepted,
        });
        Ok(accepted)
    }

    /// Prepare every record of a batch. Reportable failures drop the
    /// record; a fatal one fails the whole batch.
    fn prepare_batch<R: Persistable, WR: WorkerReporter>(
        &self,
        batch: &[R],
        reporter: &WR,
    ) -> Result<Vec<CanonicalRecord>, AppError> {
        let mut prepared = Vec::with_capacity(batch.len());
        for record in batch {
            match self.prepare(record, reporter) {
                Ok(canonical) => prepared.push(canonical),
                Err(e) if self.policy.classify(&e) == Severity::Reportable => {
                    reporter.report(WorkerEvent::RecordDropped { error: &e });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(prepared)
    }

    /// Canonicalise, transform and validate one record.
    fn prepare<R: Persistable, WR: WorkerReporter>(
        &self,
        record: &R,
        reporter: &WR,
    ) -> Result<CanonicalRecord, AppError> {
        let mut canonical = record.to_persistable()?;
        reporter.report(WorkerEvent::RecordReceived {
            kind: &canonical.kind,
        });

        if let Some(transform) = &self.transform {
            canonical.data = transform
                .apply(&canonical.data)?
                .ok_or(AppError::EmptyTransform)?;
        }

        if let Some(validator) = &self.validator {
            validator
                .validate(&canonical.data)
                .map_err(|e| AppError::SchemaValidationError(e.to_string()))?;
        }

        Ok(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::testutil::{MockSink, MockTransform};

    #[derive(Debug)]
    enum Sample {
        Product { path: String, title: String },
        Catalog { path: String },
    }

    impl Persistable for Sample {
        fn to_persistable(&self) -> Result<CanonicalRecord, AppError> {
            Ok(match self {
                Sample::Product { path, title } => CanonicalRecord::new(
                    "product",
                    serde_json::json!({"path": path, "title": title}),
                ),
                Sample::Catalog { path } => {
                    CanonicalRecord::new("catalog", serde_json::json!({"path": path}))
                }
            })
        }
    }

    fn product(path: &str) -> Sample {
        Sample::Product {
            path: path.into(),
            title: format!("Title of {path}"),
        }
    }

    async fn run_with<S: RecordSink, T: Transform>(
        worker: PersistenceWorker<S, T>,
        commands: Vec<PersistCommand<Sample>>,
    ) -> Result<u64, AppError> {
        let (tx, rx) = mpsc::channel(commands.len().max(1));
        for c in commands {
            tx.send(c).await.unwrap();
        }
        drop(tx);
        worker
            .run(rx, CancellationToken::new(), TracingWorkerReporter)
            .await
    }

    #[tokio::test]
    async fn writes_each_record_individually_in_order() {
        let sink = MockSink::empty();
        let worker = PersistenceWorker::new(sink.clone());

        let persisted = run_with(
            worker,
            vec![
                PersistCommand::Record(product("/p/1")),
                PersistCommand::Record(Sample::Catalog {
                    path: "/c/a".into(),
                }),
                PersistCommand::Record(product("/p/2")),
            ],
        )
        .await
        .unwrap();

        assert_eq!(persisted, 3);
        assert_eq!(*sink.writes.lock().unwrap(), vec![1, 1, 1]);
        let kinds: Vec<_> = sink.records().iter().map(|r| r.kind.clone()).collect();
        assert_eq!(kinds, vec!["product", "catalog", "product"]);
    }

    #[tokio::test]
    async fn applies_transform_before_writing() {
        let sink = MockSink::empty();
        let worker = PersistenceWorker::new(sink.clone()).with_transform(MockTransform::wrapping());

        run_with(worker, vec![PersistCommand::Record(product("/p/1"))])
            .await
            .unwrap();

        let records = sink.records();
        assert_eq!(records[0].data["wrapped"]["path"], "/p/1");
    }

    #[tokio::test]
    async fn transform_error_is_fatal_by_default() {
        let sink = MockSink::empty();
        let worker =
            PersistenceWorker::new(sink.clone()).with_transform(MockTransform::failing("bad script"));

        let err = run_with(
            worker,
            vec![
                PersistCommand::Record(product("/p/1")),
                PersistCommand::Record(product("/p/2")),
            ],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::TransformError(_)));
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn empty_transform_output_is_an_error() {
        let worker = PersistenceWorker::new(MockSink::empty()).with_transform(MockTransform::empty());
        let err = run_with(worker, vec![PersistCommand::Record(product("/p/1"))])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmptyTransform));
    }

    #[tokio::test]
    async fn store_error_stops_the_worker() {
        let sink = MockSink::with_insert_error(AppError::DatabaseError("connection lost".into()));
        let worker = PersistenceWorker::new(sink.clone());

        let err = run_with(
            worker,
            vec![
                PersistCommand::Record(product("/p/1")),
                PersistCommand::Record(product("/p/2")),
            ],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::DatabaseError(_)));
        assert!(sink.records().is_empty(), "nothing after the fatal error");
    }

    #[tokio::test]
    async fn reportable_store_error_drops_only_that_record() {
        let sink = MockSink::with_insert_error(AppError::DatabaseError("duplicate".into()));
        let worker = PersistenceWorker::new(sink.clone())
            .with_policy(ErrorPolicy::strict().with_reportable(ErrorCategory::Store));

        let persisted = run_with(
            worker,
            vec![
                PersistCommand::Record(product("/p/1")),
                PersistCommand::Record(product("/p/2")),
            ],
        )
        .await
        .unwrap();

        assert_eq!(persisted, 1);
        assert_eq!(sink.records()[0].data["path"], "/p/2");
    }

    #[tokio::test]
    async fn schema_violation_is_rejected() {
        let schema = serde_json::json!({
            "type": "object",
            "required": ["title"],
            "properties": {"title": {"type": "string"}}
        });
        let sink = MockSink::empty();
        let worker = PersistenceWorker::new(sink.clone()).with_schema(&schema).unwrap();

        let err = run_with(
            worker,
            vec![PersistCommand::Record(Sample::Catalog {
                path: "/c/a".into(),
            })],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::SchemaValidationError(_)));
        assert!(sink.records().is_empty());
    }

    #[test]
    fn invalid_schema_is_a_config_error() {
        let schema = serde_json::json!({"type": 12});
        let result = PersistenceWorker::new(MockSink::empty()).with_schema(&schema);
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    #[tokio::test]
    async fn batch_is_written_with_one_call() {
        let sink = MockSink::empty();
        let worker = PersistenceWorker::new(sink.clone());

        let persisted = run_with(
            worker,
            vec![PersistCommand::Batch(vec![
                product("/p/1"),
                product("/p/2"),
                product("/p/3"),
            ])],
        )
        .await
        .unwrap();

        assert_eq!(persisted, 3);
        assert_eq!(*sink.writes.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn cancellation_stops_an_idle_worker() {
        let (_tx, rx) = mpsc::channel::<PersistCommand<Sample>>(1);
        let cancel = CancellationToken::new();
        let worker = PersistenceWorker::new(MockSink::empty());

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { worker.run(rx, cancel, TracingWorkerReporter).await }
        });
        cancel.cancel();

        assert_eq!(task.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn sender_hands_off_records() {
        let sink = MockSink::empty();
        let (sender, rx) = persistence_channel::<Sample>();
        let worker = PersistenceWorker::new(sink.clone());
        let task = tokio::spawn(worker.run(rx, CancellationToken::new(), TracingWorkerReporter));

        sender.send(product("/p/1")).await.unwrap();
        sender.send_batch(vec![product("/p/2")]).await.unwrap();
        drop(sender);

        assert_eq!(task.await.unwrap().unwrap(), 2);
        assert_eq!(sink.records().len(), 2);
    }
}
