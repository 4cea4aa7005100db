use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Decoded body of a successful provider call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProviderResponse {
    body: Value,
}

impl ProviderResponse {
    pub fn new(body: Value) -> Self {
        Self { body }
    }

    pub fn ok() -> Self {
        Self::new(serde_json::json!({"ok": true}))
    }

    pub fn json(&self) -> &Value {
        &self.body
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ProviderError {
    #[error("provider error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Retryable,
    Permanent,
}

impl ProviderError {
    pub fn api(code: i64, message: impl Into<String>) -> Self {
        ProviderError::Api {
            code,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ProviderError::Transport(message.into())
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            ProviderError::Api { code, .. } => Some(*code),
            ProviderError::Transport(_) => None,
        }
    }

    /// Transport failures always retry; API errors retry only for whitelisted codes.
    pub fn kind(&self, retryable_codes: &[i64]) -> ErrorKind {
        match self {
            ProviderError::Api { code, .. } if retryable_codes.contains(code) => {
                ErrorKind::Retryable
            }
            ProviderError::Api { .. } => ErrorKind::Permanent,
            ProviderError::Transport(_) => ErrorKind::Retryable,
        }
    }
}

pub trait MarketingClient: Send + Sync {
    fn post<'a>(&'a self, resource: &'a str, params: Value)
    -> ProviderFuture<'a, ProviderResponse>;
    fn get<'a>(&'a self, resource: &'a str, params: Value) -> ProviderFuture<'a, ProviderResponse>;
}
