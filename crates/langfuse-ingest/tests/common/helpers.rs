// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use std::time::Duration;

use langfuse_ingest::{IngestConfig, TraceEvent};
use uuid::Uuid;

/// Pipeline settings without HTTP credentials.
#[allow(dead_code)]
pub fn pipeline_config(batch_size: usize, batch_timeout: Duration) -> IngestConfig {
    IngestConfig {
        number_of_event_processor: 1,
        batch_size,
        batch_timeout,
        max_retries: 2,
        retry_delay: Duration::from_millis(100),
        ..Default::default()
    }
}

/// A trace with a fixed id so tests can follow it through the pipeline.
#[allow(dead_code)]
pub fn trace(name: &str) -> (Uuid, TraceEvent) {
    let id = Uuid::new_v4();
    let event = TraceEvent {
        id: Some(id),
        name: name.to_string(),
        ..Default::default()
    };
    (id, event)
}
