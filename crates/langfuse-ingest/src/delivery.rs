// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery Engine: retries, backoff and per-event fallback.
//!
//! A batch is first sent in one request. If that request fails, every event
//! of the batch is resent on its own so a single poison event cannot take its
//! siblings down with it. If the request succeeds but the API rejects some
//! events individually, only those are resent. Every send, batch or single,
//! goes through the same [`RetryPolicy`].

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn, Instrument};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::context::EventContext;
use crate::envelope::Envelope;
use crate::errors::IngestError;
use crate::metrics::MetricsCollector;
use crate::transport::Transport;

/// Exponential backoff: the wait before retry `i` (1-based) is
/// `base_delay * 2^(i-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_delay,
        }
    }

    /// Backoff before the given retry. Saturates instead of overflowing.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

pub struct DeliveryEngine {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    metrics: Arc<MetricsCollector>,
}

impl DeliveryEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            transport,
            retry,
            metrics,
        }
    }

    /// Delivers one context group. Always returns; failures end up in the
    /// metrics and the logs.
    pub async fn send_batch(&self, ctx: &EventContext, events: Vec<Envelope>) {
        if events.is_empty() {
            return;
        }
        let span = ctx.span();
        self.deliver_batch(ctx, events).instrument(span).await;
    }

    async fn deliver_batch(&self, ctx: &EventContext, events: Vec<Envelope>) {
        let count = events.len();
        debug!("sending batch of {count} events to langfuse");

        let result = self
            .with_retries(ctx, || self.transport.send_batch(ctx, &events))
            .await;

        match result {
            Ok(api_errors) if api_errors.is_empty() => {
                self.metrics.increment_events_processed(count as u64);
                self.metrics.increment_batches_processed();
                debug!("batch of {count} events delivered");
            }
            Ok(api_errors) => {
                warn!(
                    "langfuse rejected {} of {count} events in batch",
                    api_errors.len()
                );
                self.metrics.increment_batches_failed(Some(&format!(
                    "{} events rejected in batch",
                    api_errors.len()
                )));

                let rejected: HashSet<Uuid> = api_errors.iter().map(|e| e.id).collect();
                for api_error in &api_errors {
                    if !events.iter().any(|e| e.id() == api_error.id) {
                        warn!("langfuse reported an error for unknown event {}", api_error.id);
                    }
                }

                let (retry, accepted): (Vec<_>, Vec<_>) =
                    events.into_iter().partition(|e| rejected.contains(&e.id()));
                self.metrics.increment_events_processed(accepted.len() as u64);
                self.fallback(retry).await;
            }
            Err(err) if err.is_cancelled() => {
                warn!("batch of {count} events cancelled: {err}");
                self.metrics.increment_batches_failed(Some(&err.to_string()));
                for _ in 0..count {
                    self.metrics.increment_events_failed(Some(&err.to_string()));
                }
            }
            Err(err) => {
                error!("failed to send batch of {count} events: {err}");
                self.metrics.increment_batches_failed(Some(&err.to_string()));
                self.fallback(events).await;
            }
        }
    }

    async fn fallback(&self, events: Vec<Envelope>) {
        for envelope in events {
            // Failures are already logged and counted.
            let _ = self.deliver_single(&envelope).await;
        }
    }

    /// Sends one event on its own under the retry policy.
    pub async fn send_single(&self, envelope: &Envelope) -> Result<(), IngestError> {
        let span = envelope.context().span();
        self.deliver_single(envelope).instrument(span).await
    }

    async fn deliver_single(&self, envelope: &Envelope) -> Result<(), IngestError> {
        let ctx = envelope.context();
        let result = self
            .with_retries(ctx, || self.transport.send(ctx, envelope))
            .await;
        match &result {
            Ok(()) => self.metrics.increment_events_processed(1),
            Err(err) => {
                error!(
                    "failed to send individual {} event {}: {err}",
                    envelope.event_type(),
                    envelope.id()
                );
                self.metrics.increment_events_failed(Some(&err.to_string()));
            }
        }
        result
    }

    /// Runs `attempt` until it succeeds, fails terminally, or `max_retries`
    /// retries were spent. Backoff waits end early when `ctx` is done.
    async fn with_retries<T, F, Fut>(&self, ctx: &EventContext, attempt: F) -> Result<T, IngestError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let started = Instant::now();
            let result = attempt().await;
            let elapsed = started.elapsed();

            let err = match result {
                Ok(value) => {
                    self.metrics.record_http_request(true, elapsed);
                    return Ok(value);
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => err,
            };
            self.metrics.record_http_request(false, elapsed);

            if !err.is_retryable() {
                debug!("attempt {attempts} failed with a terminal error: {err}");
                return Err(err);
            }
            if attempts > self.retry.max_retries {
                error!("giving up after {attempts} attempts: {err}");
                return Err(err);
            }

            let delay = self.retry.delay_for(attempts);
            warn!(
                "attempt {attempts} failed, retrying in {} ms: {err}",
                delay.as_millis()
            );
            tokio::select! {
                biased;
                () = ctx.done() => return Err(IngestError::cancelled()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
