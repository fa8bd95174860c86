use std::fmt;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::AppError;

/// HTTP method of an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outbound request descriptor carried by a job.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: Method, url: &str) -> Result<Self, AppError> {
        let url = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL {url}: {e}")))?;
        Ok(Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        })
    }

    pub fn get(url: &str) -> Result<Self, AppError> {
        Self::new(Method::Get, url)
    }

    pub fn post(url: &str) -> Result<Self, AppError> {
        Self::new(Method::Post, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.url.query_pairs_mut().append_pair(key, value);
        self
    }

    /// Serialize `value` as the request body and mark it as JSON.
    pub fn with_json<T: serde::Serialize>(mut self, value: &T) -> Result<Self, AppError> {
        self.body = Some(serde_json::to_vec(value)?);
        Ok(self.with_header("Content-Type", "application/json"))
    }
}

/// Raw response handed back by a [`Transport`](crate::traits::Transport).
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Expected shape of a job's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Document,
    Bytes,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Document => "document",
            JobKind::Bytes => "bytes",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fetched markup page, decoded as UTF-8.
///
/// Selector queries live in the HTML layer, which parses `body` into a
/// DOM tree on the consumer's side.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub url: Url,
    pub body: String,
}

impl Document {
    pub fn from_body(url: Url, body: &[u8]) -> Result<Self, AppError> {
        let body = std::str::from_utf8(body)
            .map_err(|e| AppError::ParseError(format!("{url} is not valid UTF-8: {e}")))?
            .to_string();
        Ok(Self { url, body })
    }
}

/// The dispatcher's answer to one job. The variant always matches the
/// job's [`JobKind`].
#[derive(Debug)]
pub enum TypedResult {
    Document(Result<Document, AppError>),
    Bytes(Result<Bytes, AppError>),
}

impl TypedResult {
    pub fn kind(&self) -> JobKind {
        match self {
            TypedResult::Document(_) => JobKind::Document,
            TypedResult::Bytes(_) => JobKind::Bytes,
        }
    }

    pub fn is_ok(&self) -> bool {
        match self {
            TypedResult::Document(r) => r.is_ok(),
            TypedResult::Bytes(r) => r.is_ok(),
        }
    }

    pub fn into_document(self) -> Result<Document, AppError> {
        match self {
            TypedResult::Document(r) => r,
            TypedResult::Bytes(_) => Err(AppError::Generic(
                "expected a document result, got bytes".into(),
            )),
        }
    }

    pub fn into_bytes(self) -> Result<Bytes, AppError> {
        match self {
            TypedResult::Bytes(r) => r,
            TypedResult::Document(_) => Err(AppError::Generic(
                "expected a bytes result, got a document".into(),
            )),
        }
    }
}

/// Source-agnostic form of a record, ready for the store.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CanonicalRecord {
    /// Entity schema name, e.g. `"product"`.
    pub kind: String,
    pub data: serde_json::Value,
}

impl CanonicalRecord {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// SHA-256 of the serialized data.
    pub fn data_hash(&self) -> String {
        compute_hash(&self.data.to_string())
    }
}

/// Capability every raw record type offers to the persistence worker.
pub trait Persistable: Send + 'static {
    fn to_persistable(&self) -> Result<CanonicalRecord, AppError>;
}

impl Persistable for CanonicalRecord {
    fn to_persistable(&self) -> Result<CanonicalRecord, AppError> {
        Ok(self.clone())
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("hello world");
        let h2 = compute_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_request_builder() {
        let req = Request::get("https://example.com/ingredients/")
            .unwrap()
            .with_query("abc", "b")
            .with_header("User-Agent", "hauler");
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.url.as_str(), "https://example.com/ingredients/?abc=b");
        assert_eq!(req.headers.len(), 1);
    }

    #[test]
    fn test_request_with_json_sets_content_type() {
        let req = Request::post("https://example.com/graphql")
            .unwrap()
            .with_json(&serde_json::json!({"page": 0}))
            .unwrap();
        assert_eq!(req.body.as_deref(), Some(br#"{"page":0}"#.as_slice()));
        assert!(
            req.headers
                .iter()
                .any(|(k, v)| k == "Content-Type" && v == "application/json")
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            Request::get("not a url"),
            Err(AppError::HttpError(_))
        ));
    }

    #[test]
    fn test_document_rejects_invalid_utf8() {
        let url = Url::parse("https://example.com").unwrap();
        let err = Document::from_body(url, &[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, AppError::ParseError(_)));
    }

    #[test]
    fn test_typed_result_kind_mismatch() {
        let result = TypedResult::Bytes(Ok(Bytes::from_static(b"x")));
        assert_eq!(result.kind(), JobKind::Bytes);
        assert!(result.into_document().is_err());
    }

    #[test]
    fn test_response_success_range() {
        assert!(Response::new(200, "ok").is_success());
        assert!(Response::new(299, "ok").is_success());
        assert!(!Response::new(301, "").is_success());
        assert!(!Response::new(500, "").is_success());
    }
}
