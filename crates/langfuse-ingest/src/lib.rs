// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous, batching client for the Langfuse ingestion API.
//!
//! Events submitted through [`IngestService::add_event`] go into a bounded
//! queue, are batched by a pool of workers on size or time, and are delivered
//! with retries and per-event fallback. Callers get an event id back right
//! away; delivery outcomes are visible through [`IngestService::metrics`],
//! [`IngestService::check_health`] and the logs.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod accumulator;
pub mod config;
pub mod context;
pub mod delivery;
pub mod envelope;
pub mod errors;
pub mod event;
pub mod logger;
pub mod metrics;
pub mod queue;
pub mod service;
pub mod transport;

pub use config::IngestConfig;
pub use context::EventContext;
pub use errors::{ConfigError, ErrorKind, IngestError};
pub use event::{
    Event, EventType, GenerationEvent, Level, ScoreEvent, SpanEvent, TraceEvent, Usage, UsageUnit,
};
pub use metrics::{ComponentHealth, HealthStatus, Metrics, ServiceStatus};
pub use service::IngestService;
pub use transport::{ApiEventError, HttpTransport, Transport};

pub type Result<T> = std::result::Result<T, IngestError>;
