// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded multi-producer, multi-consumer event queue.
//!
//! Producers wait for a free slot when the queue is full; nothing is ever
//! dropped. Workers pop with [`EventQueue::dequeue`], which yields `None` only
//! once the queue has been closed *and* every queued envelope was handed out.

use std::sync::{Arc, PoisonError, RwLock};

use crate::envelope::Envelope;
use crate::errors::IngestError;
use crate::metrics::MetricsCollector;

/// Capacity of the event queue, independent of the number of processors.
pub const QUEUE_CAPACITY: usize = 512;

#[derive(Debug)]
pub struct EventQueue {
    tx: RwLock<Option<flume::Sender<Envelope>>>,
    rx: flume::Receiver<Envelope>,
    capacity: usize,
    metrics: Arc<MetricsCollector>,
}

impl EventQueue {
    pub fn new(capacity: usize, metrics: Arc<MetricsCollector>) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        metrics.update_queue_metrics(|| 0, capacity);
        Self {
            tx: RwLock::new(Some(tx)),
            rx,
            capacity,
            metrics,
        }
    }

    /// Waits for a free slot and enqueues the envelope.
    ///
    /// Fails only when the queue was closed before the envelope got in.
    pub async fn enqueue(&self, envelope: Envelope) -> Result<(), IngestError> {
        // Clone the sender out of the lock so a blocked producer never holds it.
        let tx = self
            .tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(IngestError::service_stopped)?;

        tx.send_async(envelope)
            .await
            .map_err(|_| IngestError::service_stopped())?;

        self.metrics.increment_events_queued();
        self.publish_size();
        Ok(())
    }

    /// Waits for the next envelope, or `None` once closed and drained.
    pub async fn dequeue(&self) -> Option<Envelope> {
        let envelope = self.rx.recv_async().await.ok()?;
        self.publish_size();
        Some(envelope)
    }

    /// Pops an envelope only if one is immediately available.
    #[cfg(test)]
    pub fn try_dequeue(&self) -> Option<Envelope> {
        let envelope = self.rx.try_recv().ok()?;
        self.publish_size();
        Some(envelope)
    }

    /// Rejects further enqueues. Envelopes already queued stay available to
    /// workers until drained.
    pub fn close(&self) {
        self.tx
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn publish_size(&self) {
        self.metrics
            .update_queue_metrics(|| self.rx.len(), self.capacity);
    }
}
