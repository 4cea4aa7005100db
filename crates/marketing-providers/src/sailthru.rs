use crate::http::send_with_retry;
use anyhow::Context;
use marketing_core::provider::{
    MarketingClient, ProviderError, ProviderFuture, ProviderResponse,
};
use md5::{Digest, Md5};
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub struct SailthruClient {
    client: Client,
    api_url: String,
    api_key: String,
    secret: String,
}

impl SailthruClient {
    pub fn new(
        api_url: &str,
        api_key: &str,
        secret: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        if api_key.is_empty() {
            anyhow::bail!("Sailthru API key is empty");
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("marketing-sync")
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            secret: secret.to_string(),
        })
    }

    fn signed_form(&self, params: &Value) -> Result<Vec<(&'static str, String)>, ProviderError> {
        let payload = serde_json::to_string(params)
            .map_err(|err| ProviderError::transport(format!("encode params: {err}")))?;
        let mut form = vec![
            ("api_key", self.api_key.clone()),
            ("format", "json".to_string()),
            ("json", payload),
        ];
        let values: Vec<&str> = form.iter().map(|(_, value)| value.as_str()).collect();
        let sig = signature(&self.secret, &values);
        form.push(("sig", sig));
        Ok(form)
    }

    async fn call(
        &self,
        method: Method,
        resource: &str,
        params: Value,
    ) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/{}", self.api_url, resource);
        let form = self.signed_form(&params)?;
        debug!(%method, resource, "calling Sailthru");
        let response = send_with_retry(|| {
            let builder = self.client.request(method.clone(), &url);
            if method == Method::GET {
                builder.query(&form)
            } else {
                builder.form(&form)
            }
        })
        .await
        .map_err(|err| ProviderError::transport(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| ProviderError::transport(format!("read response: {err}")))?;
        debug!(%status, resource, "Sailthru responded");
        decode_response(&text)
    }
}

impl MarketingClient for SailthruClient {
    fn post<'a>(
        &'a self,
        resource: &'a str,
        params: Value,
    ) -> ProviderFuture<'a, ProviderResponse> {
        Box::pin(self.call(Method::POST, resource, params))
    }

    fn get<'a>(&'a self, resource: &'a str, params: Value) -> ProviderFuture<'a, ProviderResponse> {
        Box::pin(self.call(Method::GET, resource, params))
    }
}

/// Hex MD5 of the secret followed by the sorted request values.
pub fn signature(secret: &str, values: &[&str]) -> String {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mut hasher = Md5::new();
    hasher.update(secret.as_bytes());
    for value in sorted {
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub(crate) fn decode_response(text: &str) -> Result<ProviderResponse, ProviderError> {
    let body: Value = serde_json::from_str(text)
        .map_err(|err| ProviderError::transport(format!("decode response: {err}")))?;
    let Some(error) = body.get("error") else {
        return Ok(ProviderResponse::new(body));
    };
    let code = match error {
        Value::Number(code) => code.as_i64(),
        Value::String(code) => code.parse().ok(),
        _ => None,
    }
    .unwrap_or(0);
    let message = body
        .get("errormsg")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    Err(ProviderError::Api { code, message })
}
