pub mod dispatcher;
pub mod error;
pub mod frontier;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod preflight;
pub mod rate_limiter;
pub mod source;
pub mod testutil;
pub mod traits;
pub mod util;

pub use dispatcher::{DispatcherHandle, dispatcher};
pub use error::{AppError, ErrorCategory, ErrorPolicy, Severity};
pub use frontier::Frontier;
pub use models::{
    CanonicalRecord, Document, JobKind, Method, Persistable, Request, Response, TypedResult,
    compute_hash,
};
pub use persistence::{PersistenceWorker, RecordSender, TracingWorkerReporter};
pub use pipeline::{Pipeline, PipelineConfig, PipelineReport};
pub use preflight::{EgressCheckConfig, EgressIdentity, check_egress};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use source::{DriverContext, DriverSummary, SourceDriver};
pub use traits::{RecordSink, Transform, Transport};
