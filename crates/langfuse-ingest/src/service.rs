// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Worker pool and lifecycle of the ingestion pipeline.
//!
//! [`IngestService`] owns the shared [`EventQueue`] and spawns
//! `number_of_event_processor` symmetric workers. Each worker loops over
//! queue receive, batch timer and stop signal, hands ready batches to the
//! [`DeliveryEngine`] grouped by submission context, and drains the queue
//! before exiting.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument, Span};
use uuid::Uuid;

use crate::accumulator::{group_by_context, BatchAccumulator};
use crate::config::IngestConfig;
use crate::context::EventContext;
use crate::delivery::{DeliveryEngine, RetryPolicy};
use crate::envelope::Envelope;
use crate::errors::{ErrorKind, IngestError};
use crate::event::Event;
use crate::metrics::{HealthStatus, Metrics, MetricsCollector};
use crate::queue::{EventQueue, QUEUE_CAPACITY};
use crate::transport::{HttpTransport, Transport};
use crate::Result;

struct Shared {
    queue: EventQueue,
    delivery: DeliveryEngine,
    metrics: Arc<MetricsCollector>,
    batch_size: usize,
    batch_timeout: Duration,
}

impl Shared {
    async fn flush(&self, batch: Vec<Envelope>) {
        if batch.is_empty() {
            return;
        }
        for group in group_by_context(batch) {
            self.delivery
                .send_batch(&group.context, group.envelopes)
                .await;
        }
    }
}

/// Asynchronous, batching Langfuse client.
///
/// Must be created inside a tokio runtime. Dropping the service without
/// calling [`IngestService::stop`] still closes the queue; workers then drain
/// in the background.
pub struct IngestService {
    shared: Arc<Shared>,
    stop: CancellationToken,
    tracker: TaskTracker,
    span: Span,
}

impl IngestService {
    /// Validates `config`, builds the HTTP transport and starts the workers.
    pub fn new(config: IngestConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        Self::with_span(config, Arc::new(transport), Span::current())
    }

    /// Starts the pipeline on a caller-supplied transport. Only the pipeline
    /// settings of `config` are validated.
    pub fn with_transport(config: IngestConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_span(config, transport, Span::current())
    }

    /// Like [`Self::with_transport`], with every log line of the pipeline
    /// recorded under `span`.
    pub fn with_span(
        config: IngestConfig,
        transport: Arc<dyn Transport>,
        span: Span,
    ) -> Result<Self> {
        config.validate_pipeline()?;
        let handle = Handle::try_current().map_err(|e| {
            IngestError::new(
                ErrorKind::Config,
                "NO_RUNTIME",
                "langfuse service must be started inside a tokio runtime",
            )
            .with_cause(e)
        })?;

        let metrics = Arc::new(MetricsCollector::new());
        let shared = Arc::new(Shared {
            queue: EventQueue::new(QUEUE_CAPACITY, Arc::clone(&metrics)),
            delivery: DeliveryEngine::new(
                transport,
                RetryPolicy::from_config(&config),
                Arc::clone(&metrics),
            ),
            metrics,
            batch_size: config.batch_size,
            batch_timeout: config.batch_timeout,
        });
        let stop = CancellationToken::new();
        let tracker = TaskTracker::new();

        span.in_scope(|| {
            if config.number_of_event_processor == 0 {
                warn!(
                    "number_of_event_processor is 0, no event processor will run and queued events will never be sent"
                );
            }
            info!(
                "starting langfuse service with {} event processors, batch size {}, batch timeout {} ms",
                config.number_of_event_processor,
                config.batch_size,
                config.batch_timeout.as_millis()
            );
        });

        for processor in 0..config.number_of_event_processor {
            let worker_span = tracing::info_span!(parent: &span, "langfuse_worker", processor);
            tracker.spawn_on(
                run_worker(Arc::clone(&shared), stop.clone()).instrument(worker_span),
                &handle,
            );
        }

        Ok(Self {
            shared,
            stop,
            tracker,
            span,
        })
    }

    /// Validates the event, assigns it an id if needed and queues it.
    ///
    /// Waits while the queue is full. Delivery happens later; its outcome
    /// shows up only in [`Self::metrics`] and the logs.
    pub async fn add_event(&self, ctx: &EventContext, event: impl Into<Event>) -> Result<Uuid> {
        let envelope = Envelope::new(ctx.clone(), event.into()).map_err(|e| {
            warn!(parent: &self.span, "rejected invalid event: {e}");
            e
        })?;
        let id = envelope.id();
        let event_type = envelope.event_type();

        self.shared
            .queue
            .enqueue(envelope)
            .instrument(self.span.clone())
            .await?;
        debug!(parent: &self.span, "queued {event_type} event {id}");
        Ok(id)
    }

    /// Stops the workers after they flushed every queued event.
    ///
    /// Returns `STOP_TIMEOUT` if `ctx` ends first; workers keep draining in
    /// the background. Calling it again waits on the same drain.
    pub async fn stop(&self, ctx: &EventContext) -> Result<()> {
        info!(parent: &self.span, "stopping langfuse service");
        self.stop.cancel();
        self.shared.queue.close();
        self.tracker.close();

        tokio::select! {
            biased;
            () = self.tracker.wait() => {
                info!(parent: &self.span, "langfuse service stopped gracefully");
                Ok(())
            }
            () = ctx.done() => {
                warn!(parent: &self.span, "langfuse service stop timed out");
                Err(IngestError::stop_timeout())
            }
        }
    }

    pub fn metrics(&self) -> Metrics {
        self.shared.metrics.metrics()
    }

    /// Last computed health, `Starting` until [`Self::check_health`] runs.
    pub fn health_status(&self) -> HealthStatus {
        self.shared.metrics.health_status()
    }

    pub fn check_health(&self) -> HealthStatus {
        self.shared.metrics.check_health()
    }

    pub fn queue_capacity(&self) -> usize {
        self.shared.queue.capacity()
    }
}

impl Drop for IngestService {
    fn drop(&mut self) {
        self.stop.cancel();
        self.shared.queue.close();
        self.tracker.close();
    }
}

async fn run_worker(shared: Arc<Shared>, stop: CancellationToken) {
    debug!("starting batch processor");
    shared.metrics.processor_started();

    let mut pending = BatchAccumulator::new(shared.batch_size);
    let timeout = shared.batch_timeout;
    let mut ticker = interval_at(Instant::now() + timeout, timeout);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            received = shared.queue.dequeue() => {
                let Some(envelope) = received else { break };
                if let Some(batch) = pending.push(envelope) {
                    shared.flush(batch).await;
                    ticker.reset();
                }
            }
            _ = ticker.tick() => {
                shared.flush(pending.take()).await;
            }
        }
    }

    // Drain: the queue yields None once it is closed and empty.
    while let Some(envelope) = shared.queue.dequeue().await {
        if let Some(batch) = pending.push(envelope) {
            shared.flush(batch).await;
        }
    }
    shared.flush(pending.take()).await;

    shared.metrics.processor_stopped();
    debug!("batch processor stopped");
}
