use std::path::Path;

use hauler_core::error::{AppError, Severity};
use hauler_core::models::{CanonicalRecord, Persistable, Request};
use hauler_core::source::{DriverContext, SourceDriver};
use hauler_core::traits::Transform;
use serde_json::{Value, json};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// One item of a paged API response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiItem(pub Value);

impl Persistable for ApiItem {
    fn to_persistable(&self) -> Result<CanonicalRecord, AppError> {
        Ok(CanonicalRecord::new("item", self.0.clone()))
    }
}

/// Walks a GraphQL-style endpoint page by page.
///
/// Every page is requested with `{"query": ..., "variables": {"page", "size"}}`.
/// The transform receives `{"response_body": <body text>}` and must yield
/// the page's items as an array; an empty array or no output ends the walk.
pub struct PagedApiDriver<X: Transform> {
    name: String,
    endpoint: String,
    query: String,
    items: X,
    page_size: u32,
}

impl<X: Transform> PagedApiDriver<X> {
    pub fn new(endpoint: impl Into<String>, query: impl Into<String>, items: X) -> Self {
        Self {
            name: "paged".into(),
            endpoint: endpoint.into(),
            query: query.into(),
            items,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Read the query text from a file.
    pub fn from_query_file(endpoint: impl Into<String>, path: &Path, items: X) -> Result<Self, AppError> {
        let query = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read query {}: {e}", path.display()))
        })?;
        Ok(Self::new(endpoint, query, items))
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn request(&self, page: u32) -> Result<Request, AppError> {
        Request::post(&self.endpoint)?.with_json(&json!({
            "query": self.query,
            "variables": { "page": page, "size": self.page_size },
        }))
    }

    /// Items of one page body, or `None` when the walk is over.
    fn page_items(&self, body: &[u8]) -> Result<Option<Vec<Value>>, AppError> {
        let text = std::str::from_utf8(body)
            .map_err(|e| AppError::ParseError(format!("response is not valid UTF-8: {e}")))?;

        match self.items.apply(&json!({ "response_body": text }))? {
            None => Ok(None),
            Some(Value::Array(items)) if items.is_empty() => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items)),
            Some(other) => Err(AppError::TransformError(format!(
                "expected an array of items, got {}",
                type_name(&other)
            ))),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl<X: Transform> SourceDriver for PagedApiDriver<X> {
    type Record = ApiItem;

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(self, ctx: &mut DriverContext<ApiItem>) -> Result<(), AppError> {
        let mut page = 0u32;
        loop {
            let Some(body) = ctx.bytes(self.request(page)?).await? else {
                tracing::warn!(%page, "Page skipped, stopping pagination");
                break;
            };

            let items = match self.page_items(&body) {
                Ok(Some(items)) => items,
                Ok(None) => {
                    tracing::info!(%page, "No more items");
                    break;
                }
                Err(e) => match ctx.policy().classify(&e) {
                    Severity::Fatal => return Err(e),
                    Severity::Reportable => {
                        tracing::warn!(%page, error = %e, "Undecodable page, stopping pagination");
                        break;
                    }
                },
            };

            tracing::debug!(%page, items = items.len(), "Page decoded");
            ctx.emit_batch(items.into_iter().map(ApiItem).collect()).await?;
            page += 1;
        }
        Ok(())
    }
}
