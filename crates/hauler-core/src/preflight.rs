//! One-shot egress identity check.
//!
//! Before any work starts, ask an external "what is my IP" endpoint how the
//! world sees us. If traffic exits from the denied country, the proxy is not
//! doing its job and the run must not start.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::Request;
use crate::traits::Transport;

pub const DEFAULT_EGRESS_CHECK_URL: &str = "https://api.myip.com/";
pub const DEFAULT_DENIED_COUNTRY: &str = "RU";

#[derive(Debug, Clone)]
pub struct EgressCheckConfig {
    /// Identity endpoint. `None` skips the check.
    pub endpoint: Option<String>,
    /// Country code that means "traffic is not leaving through the proxy".
    pub denied_country_code: String,
}

impl Default for EgressCheckConfig {
    fn default() -> Self {
        Self {
            endpoint: Some(DEFAULT_EGRESS_CHECK_URL.to_string()),
            denied_country_code: DEFAULT_DENIED_COUNTRY.to_string(),
        }
    }
}

impl EgressCheckConfig {
    pub fn disabled() -> Self {
        Self {
            endpoint: None,
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_denied_country(mut self, code: impl Into<String>) -> Self {
        self.denied_country_code = code.into();
        self
    }
}

/// How the identity endpoint sees our outbound traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EgressIdentity {
    pub ip: String,
    #[serde(default)]
    pub country: String,
    #[serde(rename = "cc", alias = "countryCode", alias = "country_code")]
    pub country_code: String,
}

/// Run the egress check once.
///
/// Returns `Ok(None)` when the check is disabled. Every failure, including
/// an unreachable endpoint, is a [`AppError::PreflightError`].
pub async fn check_egress<T: Transport>(
    transport: &T,
    config: &EgressCheckConfig,
) -> Result<Option<EgressIdentity>, AppError> {
    let Some(endpoint) = &config.endpoint else {
        tracing::warn!("Egress check disabled, skipping preflight");
        return Ok(None);
    };

    let request = Request::get(endpoint)
        .map_err(|e| AppError::PreflightError(format!("bad identity endpoint: {e}")))?;

    let response = transport
        .execute(&request)
        .await
        .map_err(|e| AppError::PreflightError(format!("identity endpoint unreachable: {e}")))?;

    if !response.is_success() {
        return Err(AppError::PreflightError(format!(
            "identity endpoint answered HTTP {}",
            response.status
        )));
    }

    let identity: EgressIdentity = serde_json::from_slice(&response.body)
        .map_err(|e| AppError::PreflightError(format!("undecodable identity response: {e}")))?;

    if identity
        .country_code
        .eq_ignore_ascii_case(&config.denied_country_code)
    {
        return Err(AppError::PreflightError(format!(
            "broken proxy: egress {} resolves to denied country {}",
            identity.ip, identity.country_code
        )));
    }

    tracing::info!(
        ip = %identity.ip,
        country = %identity.country,
        country_code = %identity.country_code,
        "Egress check passed"
    );
    Ok(Some(identity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;

    fn config() -> EgressCheckConfig {
        EgressCheckConfig::default().with_endpoint("http://ip.test/")
    }

    #[tokio::test]
    async fn accepts_foreign_egress() {
        let transport = MockTransport::new().with_page(
            "/",
            200,
            r#"{"ip":"203.0.113.7","country":"Netherlands","cc":"NL"}"#,
        );

        let identity = check_egress(&transport, &config()).await.unwrap().unwrap();
        assert_eq!(identity.ip, "203.0.113.7");
        assert_eq!(identity.country_code, "NL");
    }

    #[tokio::test]
    async fn rejects_denied_country() {
        let transport = MockTransport::new().with_page(
            "/",
            200,
            r#"{"ip":"198.51.100.1","country":"Russia","cc":"RU"}"#,
        );

        let err = check_egress(&transport, &config()).await.unwrap_err();
        assert!(matches!(err, AppError::PreflightError(_)));
        assert!(err.to_string().contains("broken proxy"));
    }

    #[tokio::test]
    async fn denied_country_is_configurable_and_case_insensitive() {
        let transport = MockTransport::new()
            .with_page("/", 200, r#"{"ip":"1.2.3.4","countryCode":"de"}"#);

        let cfg = config().with_denied_country("DE");
        assert!(check_egress(&transport, &cfg).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_fatal() {
        let transport = MockTransport::new().with_network_error("/");
        let err = check_egress(&transport, &config()).await.unwrap_err();
        assert!(matches!(err, AppError::PreflightError(_)));
    }

    #[tokio::test]
    async fn bad_status_or_body_is_fatal() {
        let transport = MockTransport::new().with_page("/", 503, "");
        assert!(check_egress(&transport, &config()).await.is_err());

        let transport = MockTransport::new().with_page("/", 200, "<html>captcha</html>");
        assert!(check_egress(&transport, &config()).await.is_err());
    }

    #[tokio::test]
    async fn disabled_check_makes_no_request() {
        let transport = MockTransport::new();
        let result = check_egress(&transport, &EgressCheckConfig::disabled())
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(transport.calls().is_empty());
    }
}
