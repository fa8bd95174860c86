use std::time::Duration;

use hauler_core::error::AppError;
use hauler_core::models::{Method, Request, Response};
use hauler_core::traits::Transport;
use reqwest::{Client, Proxy};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) Hauler/0.1";

/// Outbound proxy every request is routed through.
///
/// `url` may use `http://`, `https://` or `socks5://`.
#[derive(Debug, Clone)]
pub struct EgressProxy {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl EgressProxy {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Read `PROXY_URL`, `PROXY_USERNAME` and `PROXY_PASS`.
    ///
    /// Returns `None` when `PROXY_URL` is unset or empty.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("PROXY_URL").ok().filter(|u| !u.is_empty())?;
        let mut proxy = Self::new(url);
        if let Ok(username) = std::env::var("PROXY_USERNAME") {
            proxy.username = Some(username);
            proxy.password = Some(std::env::var("PROXY_PASS").unwrap_or_default());
        }
        Some(proxy)
    }

    fn build(&self) -> Result<Proxy, AppError> {
        let proxy = Proxy::all(&self.url)
            .map_err(|e| AppError::ConfigError(format!("Invalid proxy URL {}: {e}", self.url)))?;
        Ok(match &self.username {
            Some(user) => proxy.basic_auth(user, self.password.as_deref().unwrap_or("")),
            None => proxy,
        })
    }
}

/// HTTP transport using reqwest.
///
/// Sends requests as described and hands back status and body; status
/// classification is left to the dispatcher.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, AppError> {
        Self::builder().build()
    }

    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestTransportBuilder {
    timeout: Duration,
    user_agent: String,
    proxy: Option<EgressProxy>,
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
        }
    }
}

impl ReqwestTransportBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn proxy(mut self, proxy: Option<EgressProxy>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn build(self) -> Result<ReqwestTransport, AppError> {
        let mut builder = Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout);

        if let Some(proxy) = &self.proxy {
            tracing::info!(proxy = %proxy.url, "Routing traffic through egress proxy");
            builder = builder.proxy(proxy.build()?);
        }

        let client = builder
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(ReqwestTransport {
            client,
            timeout_secs: self.timeout.as_secs(),
        })
    }
}

impl Transport for ReqwestTransport {
    async fn execute(&self, request: &Request) -> Result<Response, AppError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;

        tracing::debug!(url = %request.url, %status, bytes = body.len(), "Response received");
        Ok(Response::new(status, body))
    }
}

impl ReqwestTransport {
    fn map_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else {
            AppError::HttpError(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_with_defaults() {
        assert!(ReqwestTransport::new().is_ok());
    }

    #[test]
    fn test_builds_with_socks_proxy() {
        let proxy = EgressProxy::new("socks5://127.0.0.1:1080").with_credentials("user", "secret");
        let transport = ReqwestTransport::builder()
            .timeout(Duration::from_secs(5))
            .proxy(Some(proxy))
            .build();
        assert!(transport.is_ok());
    }

    #[test]
    fn test_rejects_malformed_proxy() {
        let result = ReqwestTransport::builder()
            .proxy(Some(EgressProxy::new("not a proxy url")))
            .build();
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let transport = ReqwestTransport::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let request = Request::get("http://127.0.0.1:1/").unwrap();
        let err = transport.execute(&request).await.unwrap_err();
        assert!(matches!(err, AppError::NetworkError(_)), "got {err}");
    }
}
