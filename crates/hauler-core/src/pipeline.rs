use serde::Serialize;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::dispatcher;
use crate::error::{AppError, ErrorPolicy};
use crate::persistence::{Identity, PersistenceWorker, TracingWorkerReporter, persistence_channel};
use crate::preflight::{EgressCheckConfig, EgressIdentity, check_egress};
use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::source::{DriverContext, DriverSummary, SourceDriver};
use crate::traits::{RecordSink, Transform, Transport};

/// Run-wide settings for a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub rate: RateLimiterConfig,
    pub egress: EgressCheckConfig,
    pub policy: ErrorPolicy,
    /// Wait for the persistence worker to write the record in hand before
    /// returning. When false the worker is abandoned as soon as the driver
    /// finishes.
    pub drain_on_exit: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate: RateLimiterConfig::default(),
            egress: EgressCheckConfig::default(),
            policy: ErrorPolicy::default(),
            drain_on_exit: true,
        }
    }
}

impl PipelineConfig {
    pub fn with_rate(mut self, rate: RateLimiterConfig) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_egress(mut self, egress: EgressCheckConfig) -> Self {
        self.egress = egress;
        self
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_drain_on_exit(mut self, drain: bool) -> Self {
        self.drain_on_exit = drain;
        self
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub source: String,
    pub egress: Option<EgressIdentity>,
    pub summary: DriverSummary,
    /// Records written, if the worker was drained.
    pub persisted: Option<u64>,
}

/// Wires preflight, dispatcher, persistence worker and one source driver.
pub struct Pipeline<T, S, X = Identity>
where
    T: Transport,
    S: RecordSink,
    X: Transform,
{
    transport: T,
    worker: PersistenceWorker<S, X>,
    config: PipelineConfig,
}

enum Finished {
    Driver(Result<(), AppError>),
    Worker(Result<Result<u64, AppError>, JoinError>),
}

impl<T, S, X> Pipeline<T, S, X>
where
    T: Transport,
    S: RecordSink,
    X: Transform,
{
    pub fn new(transport: T, worker: PersistenceWorker<S, X>, config: PipelineConfig) -> Self {
        Self {
            transport,
            worker,
            config,
        }
    }

    /// Run `driver` to completion.
    ///
    /// 1. Egress preflight (must pass)
    /// 2. Spawn the dispatcher and the persistence worker
    /// 3. Drive the source on this task, watching the worker
    /// 4. Tear down: abort the dispatcher, drain or abandon the worker
    ///
    /// The first fatal error from any stage ends the run.
    pub async fn run<D: SourceDriver>(self, driver: D) -> Result<PipelineReport, AppError> {
        let source = driver.name().to_string();
        let egress = check_egress(&self.transport, &self.config.egress).await?;

        let limiter = RateLimiter::new(self.config.rate.clone());
        let (dispatcher, handle) = dispatcher(self.transport, limiter);
        let dispatcher_task = tokio::spawn(dispatcher.run());

        let (records, queue) = persistence_channel::<D::Record>();
        let cancel = CancellationToken::new();
        let worker = self.worker.with_policy(self.config.policy.clone());
        let mut worker_task = tokio::spawn(worker.run(queue, cancel.clone(), TracingWorkerReporter));

        tracing::info!(%source, "Pipeline started");
        let mut ctx = DriverContext::new(handle, records, self.config.policy.clone());

        let finished = tokio::select! {
            result = driver.run(&mut ctx) => Finished::Driver(result),
            joined = &mut worker_task => Finished::Worker(joined),
        };

        let summary = ctx.into_summary();
        dispatcher_task.abort();

        match finished {
            Finished::Worker(joined) => {
                let err = match flatten(joined) {
                    Ok(persisted) => {
                        tracing::error!(%persisted, "Persistence worker stopped before the driver finished");
                        AppError::ChannelClosed("persistence worker stopped early")
                    }
                    Err(e) => e,
                };
                Err(err)
            }
            Finished::Driver(Err(e)) => {
                // A closed queue means the worker died; its error is the real cause.
                if matches!(e, AppError::ChannelClosed("persistence queue")) {
                    if let Err(worker_err) = flatten(worker_task.await) {
                        return Err(worker_err);
                    }
                } else {
                    cancel.cancel();
                    worker_task.abort();
                }
                tracing::error!(%source, error = %e, "Source driver failed");
                Err(e)
            }
            Finished::Driver(Ok(())) => {
                let persisted = if self.config.drain_on_exit {
                    Some(flatten(worker_task.await)?)
                } else {
                    cancel.cancel();
                    worker_task.abort();
                    None
                };
                tracing::info!(
                    %source,
                    fetched = summary.fetched,
                    emitted = summary.emitted,
                    skipped = summary.skipped,
                    ?persisted,
                    "Pipeline finished"
                );
                Ok(PipelineReport {
                    source,
                    egress,
                    summary,
                    persisted,
                })
            }
        }
    }
}

fn flatten(joined: Result<Result<u64, AppError>, JoinError>) -> Result<u64, AppError> {
    joined.map_err(|e| AppError::Generic(format!("persistence worker panicked: {e}")))?
}
