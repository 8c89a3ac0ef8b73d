// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Recording transport used to observe what the pipeline sends

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use langfuse_ingest::context::EventContext;
use langfuse_ingest::envelope::Envelope;
use langfuse_ingest::{ApiEventError, IngestError, Transport};
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: Instant,
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default)]
enum Behavior {
    #[default]
    Accept,
    /// Every call fails with this error.
    Fail(IngestError),
    /// Batch calls succeed but report these ids as rejected; singles succeed.
    RejectInBatch(HashSet<Uuid>),
    /// Any call containing one of these ids fails terminally.
    Poison(HashSet<Uuid>),
}

/// Transport that records every call and answers per its configured behavior
#[derive(Debug, Default)]
pub struct RecordingTransport {
    behavior: Behavior,
    batches: Mutex<Vec<RecordedCall>>,
    singles: Mutex<Vec<RecordedCall>>,
}

#[allow(dead_code)]
impl RecordingTransport {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn failing_with(err: IngestError) -> Self {
        Self {
            behavior: Behavior::Fail(err),
            ..Default::default()
        }
    }

    pub fn rejecting_in_batch(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            behavior: Behavior::RejectInBatch(ids.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn poisoned(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            behavior: Behavior::Poison(ids.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn batches(&self) -> Vec<RecordedCall> {
        self.batches.lock().expect("lock").clone()
    }

    pub fn singles(&self) -> Vec<RecordedCall> {
        self.singles.lock().expect("lock").clone()
    }

    /// Every id that reached the transport at least once, batch or single.
    pub fn attempted_ids(&self) -> HashSet<Uuid> {
        self.batches()
            .into_iter()
            .chain(self.singles())
            .flat_map(|call| call.ids)
            .collect()
    }

    fn record(calls: &Mutex<Vec<RecordedCall>>, events: &[Envelope]) {
        calls.lock().expect("lock").push(RecordedCall {
            at: Instant::now(),
            ids: events.iter().map(Envelope::id).collect(),
        });
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_batch(
        &self,
        _ctx: &EventContext,
        events: &[Envelope],
    ) -> Result<Vec<ApiEventError>, IngestError> {
        Self::record(&self.batches, events);
        match &self.behavior {
            Behavior::Accept => Ok(Vec::new()),
            Behavior::Fail(err) => Err(err.clone()),
            Behavior::RejectInBatch(ids) => Ok(events
                .iter()
                .filter(|e| ids.contains(&e.id()))
                .map(|e| ApiEventError {
                    id: e.id(),
                    status: 500,
                    message: Some("temporary failure".to_string()),
                    error: None,
                })
                .collect()),
            Behavior::Poison(ids) => {
                if events.iter().any(|e| ids.contains(&e.id())) {
                    Err(IngestError::from_status(
                        reqwest::StatusCode::BAD_REQUEST,
                        "invalid event in batch",
                    ))
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    async fn send(&self, _ctx: &EventContext, event: &Envelope) -> Result<(), IngestError> {
        Self::record(&self.singles, std::slice::from_ref(event));
        match &self.behavior {
            Behavior::Accept | Behavior::RejectInBatch(_) => Ok(()),
            Behavior::Fail(err) => Err(err.clone()),
            Behavior::Poison(ids) if ids.contains(&event.id()) => Err(IngestError::from_status(
                reqwest::StatusCode::BAD_REQUEST,
                "invalid event",
            )),
            Behavior::Poison(_) => Ok(()),
        }
    }
}
