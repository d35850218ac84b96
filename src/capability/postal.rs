use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;

use super::{required, Capability, CapabilityError, CapabilityParams};

/// Default upstream; `{code}` is replaced by the normalized postal code.
pub const DEFAULT_POSTAL_URL: &str = "https://viacep.com.br/ws/{code}/json/";

const CODE_DIGITS: usize = 8;

/// Proxies a postal-code lookup to an HTTP JSON upstream.
#[derive(Debug, Clone)]
pub struct PostalCodeLookup {
    client: reqwest::Client,
    url_template: String,
}

impl PostalCodeLookup {
    pub fn new(
        url_template: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CapabilityError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CapabilityError::Unavailable(format!("http client: {e}")))?;
        Ok(Self { client, url_template: url_template.into() })
    }

    fn url_for(&self, code: &str) -> String {
        self.url_template.replace("{code}", code)
    }
}

/// Strip one separator dash and require exactly eight ASCII digits.
pub fn normalize_code(raw: &str) -> Result<String, CapabilityError> {
    let code: String = raw.chars().filter(|c| *c != '-').collect();
    if code.len() != CODE_DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CapabilityError::InvalidParam {
            name: "code",
            reason: format!("expected {CODE_DIGITS} digits"),
        });
    }
    Ok(code)
}

#[async_trait]
impl Capability for PostalCodeLookup {
    fn name(&self) -> &'static str {
        "postal"
    }

    async fn invoke(&self, params: &CapabilityParams) -> Result<JsonValue, CapabilityError> {
        let code = normalize_code(required(params, "code")?)?;

        let response = self
            .client
            .get(self.url_for(&code))
            .send()
            .await
            .map_err(|e| CapabilityError::Upstream(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CapabilityError::NotFound(format!("postal code {code}")));
        }
        if !status.is_success() {
            return Err(CapabilityError::Upstream(format!("upstream answered {status}")));
        }

        let body: JsonValue =
            response.json().await.map_err(|e| CapabilityError::Upstream(e.to_string()))?;
        // viacep answers 200 with `{"erro": true}` for unknown codes.
        let flagged = body
            .get("erro")
            .is_some_and(|v| v.as_bool() == Some(true) || v.as_str() == Some("true"));
        if flagged {
            return Err(CapabilityError::NotFound(format!("postal code {code}")));
        }
        Ok(body)
    }
}
