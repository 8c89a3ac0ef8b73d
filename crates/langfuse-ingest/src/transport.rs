// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transport to the Langfuse ingestion endpoint.
//!
//! [`Transport`] is the narrow seam the Delivery Engine talks to: hand over a
//! batch, get back either per-event API errors or a classified failure.
//! [`HttpTransport`] is the production implementation on top of `reqwest`.
//! It makes exactly one request per call; retries live in
//! [`crate::delivery::DeliveryEngine`].

use std::io::Write;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::context::EventContext;
use crate::envelope::Envelope;
use crate::errors::{ErrorKind, IngestError};
use crate::event::{Event, EventType};

/// Request bodies above this size are gzip-compressed.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// An event the API accepted at transport level but refused individually.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiEventError {
    pub id: Uuid,
    pub status: u16,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl ApiEventError {
    pub fn into_error(self) -> IngestError {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_REQUEST);
        let mut body = self.message.unwrap_or_default();
        if let Some(detail) = self.error {
            body = format!("{body} {detail}").trim().to_string();
        }
        IngestError::from_status(status, body).with_details([("event_id", self.id.to_string())])
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the whole batch in one request.
    ///
    /// `Ok` means the request itself went through; the returned list holds the
    /// events the API rejected individually, usually empty.
    async fn send_batch(
        &self,
        ctx: &EventContext,
        events: &[Envelope],
    ) -> Result<Vec<ApiEventError>, IngestError>;

    /// Sends a single event. A per-event rejection is reported as an error.
    async fn send(&self, ctx: &EventContext, event: &Envelope) -> Result<(), IngestError>;
}

#[derive(Debug, Serialize)]
struct IngestionRequest<'a> {
    batch: Vec<WireEvent<'a>>,
}

#[derive(Debug, Serialize)]
struct WireEvent<'a> {
    id: Uuid,
    #[serde(rename = "type")]
    event_type: EventType,
    timestamp: DateTime<Utc>,
    body: &'a Event,
}

impl<'a> From<&'a Envelope> for WireEvent<'a> {
    fn from(envelope: &'a Envelope) -> Self {
        WireEvent {
            id: envelope.id(),
            event_type: envelope.event_type(),
            timestamp: envelope.submitted_at(),
            body: envelope.event(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct IngestionResponse {
    #[serde(default)]
    #[allow(dead_code)]
    successes: Vec<IngestionSuccess>,
    #[serde(default)]
    errors: Vec<ApiEventError>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct IngestionSuccess {
    id: Uuid,
    status: u16,
}

/// Ships events to `{url}/api/public/ingestion` with basic auth.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    public_key: String,
    secret_key: String,
}

impl HttpTransport {
    pub fn new(config: &IngestConfig) -> Result<Self, IngestError> {
        let url = config.ingestion_url()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(config.idle_conn_timeout)
            .pool_max_idle_per_host(config.max_idle_conns_per_host)
            .build()
            .map_err(|e| {
                IngestError::new(ErrorKind::Config, "INVALID_CONFIG", "failed to build HTTP client")
                    .with_cause(e)
            })?;
        Ok(Self {
            client,
            url,
            public_key: config.public_key.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    async fn post(
        &self,
        ctx: &EventContext,
        events: &[Envelope],
    ) -> Result<IngestionResponse, IngestError> {
        let request = IngestionRequest {
            batch: events.iter().map(WireEvent::from).collect(),
        };
        let payload = serde_json::to_vec(&request).map_err(|e| {
            error!("failed to marshal request payload: {e}");
            IngestError::processing("failed to marshal request payload").with_cause(e)
        })?;

        let mut builder = self
            .client
            .post(self.url.clone())
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .header(CONTENT_TYPE, "application/json");

        let body = if payload.len() > COMPRESSION_THRESHOLD {
            builder = builder.header(CONTENT_ENCODING, "gzip");
            encode(&payload)?
        } else {
            payload
        };

        debug!("posting {} events ({} bytes) to {}", events.len(), body.len(), self.url);

        let exchange = async {
            let response = builder
                .body(body)
                .send()
                .await
                .map_err(classify_request_error)?;
            let status = response.status();
            if status.is_client_error() || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                return Err(IngestError::from_status(status, body));
            }
            response.bytes().await.map_err(classify_request_error)
        };

        // The context bounds the whole exchange, body reads included.
        let bytes = tokio::select! {
            biased;
            () = ctx.done() => return Err(IngestError::cancelled()),
            result = exchange => result?,
        };
        serde_json::from_slice::<IngestionResponse>(&bytes).map_err(|e| {
            error!("failed to parse response: {e}");
            IngestError::processing("failed to parse response").with_cause(e)
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_batch(
        &self,
        ctx: &EventContext,
        events: &[Envelope],
    ) -> Result<Vec<ApiEventError>, IngestError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.post(ctx, events).await?;
        Ok(response.errors)
    }

    async fn send(&self, ctx: &EventContext, event: &Envelope) -> Result<(), IngestError> {
        let response = self.post(ctx, std::slice::from_ref(event)).await?;
        match response.errors.into_iter().next() {
            None => Ok(()),
            Some(api_error) => {
                error!("request to langfuse returned errors in response: {api_error:?}");
                Err(api_error.into_error())
            }
        }
    }
}

fn encode(data: &[u8]) -> Result<Vec<u8>, IngestError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .map_err(|e| IngestError::processing("failed to compress payload").with_cause(e))
}

fn classify_request_error(err: reqwest::Error) -> IngestError {
    if err.is_timeout() {
        IngestError::timeout("request to langfuse timed out").with_cause(err)
    } else if err.is_builder() {
        IngestError::new(
            ErrorKind::Config,
            "INVALID_CONFIG",
            "failed to create langfuse request",
        )
        .with_cause(err)
    } else if err.is_connect() {
        IngestError::new(
            ErrorKind::Network,
            "CONNECTION_FAILED",
            "failed to connect to langfuse",
        )
        .with_cause(err)
    } else {
        IngestError::network("request to langfuse failed").with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TraceEvent;
    use std::io::Read;

    #[test]
    fn test_encode_roundtrip() {
        let data = vec![b'x'; 4 * COMPRESSION_THRESHOLD];
        let compressed = encode(&data).expect("compress");
        assert!(compressed.len() < data.len());

        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).expect("decompress");
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_wire_event_shape() {
        let envelope = Envelope::new(
            EventContext::background(),
            TraceEvent {
                name: "LLM".to_string(),
                ..Default::default()
            }
            .into(),
        )
        .expect("valid event");
        let request = IngestionRequest {
            batch: vec![WireEvent::from(&envelope)],
        };
        let value = serde_json::to_value(&request).expect("serialize");
        let item = &value["batch"][0];
        assert_eq!(item["id"], envelope.id().to_string());
        assert_eq!(item["type"], "trace-create");
        assert_eq!(item["body"]["name"], "LLM");
        assert!(item["timestamp"].is_string());
    }

    #[test]
    fn test_api_event_error_classification() {
        let id = Uuid::new_v4();
        let err = ApiEventError {
            id,
            status: 400,
            message: Some("invalid body".to_string()),
            error: None,
        }
        .into_error();
        assert!(!err.is_retryable());
        assert_eq!(
            err.details().get("event_id").map(String::as_str),
            Some(id.to_string().as_str())
        );

        let err = ApiEventError {
            id,
            status: 500,
            message: None,
            error: None,
        }
        .into_error();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_new_rejects_missing_url() {
        let err = HttpTransport::new(&IngestConfig::default()).expect_err("no url");
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
