use std::future::Future;

use crate::error::AppError;
use crate::models::{CanonicalRecord, Request, Response};

/// Performs one outbound network call.
///
/// Implementations report transport failures only; status classification
/// is the dispatcher's job.
pub trait Transport: Send + Sync + Clone + 'static {
    fn execute(&self, request: &Request)
    -> impl Future<Output = Result<Response, AppError>> + Send;
}

/// A declarative reshaping step applied to JSON values.
///
/// `Ok(None)` is the explicit "no results" signal.
pub trait Transform: Send + Sync + Clone + 'static {
    fn apply(&self, input: &serde_json::Value) -> Result<Option<serde_json::Value>, AppError>;
}

/// Writes canonical records to a destination bound at construction.
pub trait RecordSink: Send + Sync + Clone + 'static {
    fn insert(&self, record: &CanonicalRecord) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Insert all records; returns how many the store accepted.
    fn insert_many(
        &self,
        records: &[CanonicalRecord],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}
