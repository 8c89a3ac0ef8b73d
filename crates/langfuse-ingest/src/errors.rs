// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the ingestion pipeline.
//!
//! Every failure the pipeline can observe is an [`IngestError`] tagged with an
//! [`ErrorKind`]. The kind decides whether the Delivery Engine retries:
//! network failures, HTTP 5xx and HTTP 429 are transient, everything else is
//! terminal.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use reqwest::StatusCode;

/// Category of an [`IngestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid setup, fatal at construction.
    Config,
    /// Malformed event, rejected before it is queued or sent.
    Validation,
    /// Transient transport failure (timeout, connection refused).
    Network,
    /// The ingestion API answered with an error status.
    Api,
    /// Internal failure while building, encoding or decoding a request.
    Processing,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "CONFIG",
            Self::Validation => "VALIDATION",
            Self::Network => "NETWORK",
            Self::Api => "API",
            Self::Processing => "PROCESSING",
        };
        f.write_str(s)
    }
}

/// Structured error carrying a stable code, a category and optional context.
///
/// Values are immutable: the `with_*` methods consume the error and hand back
/// a new one, so the predefined constructors can be shared freely.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}{}", suffix(.status, .cause))]
pub struct IngestError {
    kind: ErrorKind,
    code: &'static str,
    message: String,
    status: Option<StatusCode>,
    details: BTreeMap<String, String>,
    #[source]
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

fn suffix(
    status: &Option<StatusCode>,
    cause: &Option<Arc<dyn std::error::Error + Send + Sync>>,
) -> String {
    let mut out = String::new();
    if let Some(status) = status {
        out.push_str(&format!(" (HTTP {})", status.as_u16()));
    }
    if let Some(cause) = cause {
        out.push_str(&format!(" (caused by: {cause})"));
    }
    out
}

impl IngestError {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            status: None,
            details: BTreeMap::new(),
            cause: None,
        }
    }

    #[must_use]
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    #[must_use]
    pub fn with_details<K, V, I>(mut self, details: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.details
            .extend(details.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn details(&self) -> &BTreeMap<String, String> {
        &self.details
    }

    /// Whether the Delivery Engine may try the same request again.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Network => true,
            ErrorKind::Api => self.status.is_some_and(|s| {
                s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS
            }),
            ErrorKind::Config | ErrorKind::Validation | ErrorKind::Processing => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == "CANCELLED"
    }

    /// Maps an HTTP error status returned by the ingestion API.
    pub fn from_status(status: StatusCode, body: impl Into<String>) -> Self {
        let base = match status {
            StatusCode::UNAUTHORIZED => Self::new(
                ErrorKind::Api,
                "UNAUTHORIZED",
                "unauthorized access to langfuse API",
            ),
            StatusCode::FORBIDDEN => Self::new(
                ErrorKind::Api,
                "FORBIDDEN",
                "forbidden access to langfuse resource",
            ),
            StatusCode::NOT_FOUND => {
                Self::new(ErrorKind::Api, "NOT_FOUND", "langfuse resource not found")
            }
            StatusCode::TOO_MANY_REQUESTS => Self::new(
                ErrorKind::Api,
                "RATE_LIMIT",
                "langfuse API rate limit exceeded",
            ),
            s if s.is_server_error() => {
                Self::new(ErrorKind::Api, "SERVER_ERROR", "langfuse server error")
            }
            s if s.is_client_error() => Self::new(ErrorKind::Api, "CLIENT_ERROR", "client error"),
            _ => Self::new(ErrorKind::Network, "HTTP_ERROR", "unexpected HTTP status"),
        };
        let body: String = body.into();
        base.with_status(status)
            .with_details([("response_body", body)])
    }

    pub fn validation(field: &str, reason: &str) -> Self {
        Self::new(ErrorKind::Validation, "EVENT_VALIDATION", "event validation failed")
            .with_details([("field", field), ("reason", reason)])
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, "REQUEST_FAILED", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, "NETWORK_TIMEOUT", message)
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Processing, "EVENT_PROCESSING", message)
    }

    pub fn cancelled() -> Self {
        Self::new(
            ErrorKind::Processing,
            "CANCELLED",
            "delivery cancelled by submission context",
        )
    }

    pub fn service_stopped() -> Self {
        Self::new(
            ErrorKind::Processing,
            "SERVICE_STOPPED",
            "langfuse service is stopped",
        )
    }

    pub fn stop_timeout() -> Self {
        Self::new(
            ErrorKind::Processing,
            "STOP_TIMEOUT",
            "event processors did not drain before the deadline",
        )
    }
}

/// Reasons an [`crate::config::IngestConfig`] is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("langfuse URL is required")]
    MissingUrl,

    #[error("invalid langfuse URL '{0}'")]
    InvalidUrl(String),

    #[error("langfuse public key is required")]
    MissingPublicKey,

    #[error("langfuse secret key is required")]
    MissingSecretKey,

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    #[error("invalid log level '{0}', must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

impl ConfigError {
    fn field(&self) -> &'static str {
        match self {
            Self::MissingUrl | Self::InvalidUrl(_) => "url",
            Self::MissingPublicKey => "public_key",
            Self::MissingSecretKey => "secret_key",
            Self::NotPositive(field) => field,
            Self::InvalidLogLevel(_) => "log_level",
        }
    }
}

impl From<ConfigError> for IngestError {
    fn from(err: ConfigError) -> Self {
        let field = err.field();
        IngestError::new(ErrorKind::Config, "INVALID_CONFIG", err.to_string())
            .with_details([("field", field)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IngestError::from_status(StatusCode::SERVICE_UNAVAILABLE, "down");
        assert_eq!(
            err.to_string(),
            "SERVER_ERROR: langfuse server error (HTTP 503)"
        );
        assert_eq!(err.details().get("response_body").map(String::as_str), Some("down"));
    }

    #[test]
    fn test_error_display_with_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = IngestError::processing("failed to compress payload").with_cause(io);
        assert_eq!(
            err.to_string(),
            "EVENT_PROCESSING: failed to compress payload (caused by: boom)"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_source_chain_reaches_cause() {
        use std::error::Error;

        let plain = IngestError::network("connection refused");
        assert!(plain.source().is_none());

        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = IngestError::network("connection refused")
            .with_status(StatusCode::BAD_GATEWAY)
            .with_cause(io);
        assert_eq!(
            err.to_string(),
            "REQUEST_FAILED: connection refused (HTTP 502) (caused by: boom)"
        );
        let boxed: Box<dyn Error + Send + Sync> = Box::new(err.clone());
        let source = boxed.source().expect("cause is exposed as source");
        assert_eq!(source.to_string(), "boom");
    }

    #[test]
    fn test_with_methods_leave_original_untouched() {
        let base = IngestError::network("connection refused");
        let detailed = base.clone().with_details([("attempt", "2")]);
        assert!(base.details().is_empty());
        assert_eq!(detailed.details().len(), 1);
    }

    #[test]
    fn test_retry_classification() {
        let cases = [
            (StatusCode::TOO_MANY_REQUESTS, true),
            (StatusCode::INTERNAL_SERVER_ERROR, true),
            (StatusCode::BAD_GATEWAY, true),
            (StatusCode::GATEWAY_TIMEOUT, true),
            (StatusCode::BAD_REQUEST, false),
            (StatusCode::UNAUTHORIZED, false),
            (StatusCode::FORBIDDEN, false),
            (StatusCode::NOT_FOUND, false),
            (StatusCode::UNPROCESSABLE_ENTITY, false),
        ];
        for (status, retryable) in cases {
            assert_eq!(
                IngestError::from_status(status, "").is_retryable(),
                retryable,
                "status {status}"
            );
        }
        assert!(IngestError::network("reset").is_retryable());
        assert!(IngestError::timeout("slow").is_retryable());
        assert!(!IngestError::processing("bad json").is_retryable());
        assert!(!IngestError::cancelled().is_retryable());
        assert!(!IngestError::validation("name", "required").is_retryable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            IngestError::from_status(StatusCode::UNAUTHORIZED, "").code(),
            "UNAUTHORIZED"
        );
        assert_eq!(
            IngestError::from_status(StatusCode::TOO_MANY_REQUESTS, "").code(),
            "RATE_LIMIT"
        );
        assert_eq!(
            IngestError::from_status(StatusCode::IM_A_TEAPOT, "").code(),
            "CLIENT_ERROR"
        );
        let err = IngestError::from_status(StatusCode::CONFLICT, "");
        assert_eq!(err.code(), "CLIENT_ERROR");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_config_error_conversion() {
        let err: IngestError = ConfigError::NotPositive("batch_size").into();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.code(), "INVALID_CONFIG");
        assert_eq!(
            err.details().get("field").map(String::as_str),
            Some("batch_size")
        );
        assert_eq!(err.message(), "batch_size must be greater than zero");
    }
}
