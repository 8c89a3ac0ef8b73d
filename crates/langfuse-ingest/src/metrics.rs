// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline metrics and health classification.
//!
//! Counters are updated by the queue and the Delivery Engine and read back as
//! an owned [`Metrics`] snapshot. [`MetricsCollector::check_health`] derives a
//! [`HealthStatus`] from the current snapshot and caches it for
//! [`MetricsCollector::health_status`].

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Number of recent response times kept for the rolling average.
pub const RESPONSE_TIME_WINDOW: usize = 100;

const QUEUE_CRITICAL_RATIO: f64 = 0.9;
const QUEUE_WARNING_RATIO: f64 = 0.7;
const API_CRITICAL_ERROR_RATE: f64 = 0.10;
const API_WARNING_ERROR_RATE: f64 = 0.05;
const RECENT_ERROR_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub events_processed: u64,
    pub events_queued: u64,
    pub events_failed: u64,
    pub batches_processed: u64,
    pub batches_failed: u64,
    pub http_requests_total: u64,
    pub http_requests_success: u64,
    pub http_requests_failure: u64,
    pub average_response_time: Duration,
    pub total_response_time: Duration,
    pub max_response_time: Duration,
    pub min_response_time: Duration,
    pub active_processors: usize,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub start_time: DateTime<Utc>,
    pub last_event_processed_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Metrics {
    fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            events_processed: 0,
            events_queued: 0,
            events_failed: 0,
            batches_processed: 0,
            batches_failed: 0,
            http_requests_total: 0,
            http_requests_success: 0,
            http_requests_failure: 0,
            average_response_time: Duration::ZERO,
            total_response_time: Duration::ZERO,
            max_response_time: Duration::ZERO,
            min_response_time: Duration::ZERO,
            active_processors: 0,
            queue_size: 0,
            queue_capacity: 0,
            start_time,
            last_event_processed_at: None,
            last_error_at: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Starting,
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentHealth {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub status: ServiceStatus,
    pub uptime: Duration,
    pub queue_health: ComponentHealth,
    pub processor_health: ComponentHealth,
    pub api_health: ComponentHealth,
    pub last_health_check: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl HealthStatus {
    fn starting(now: DateTime<Utc>) -> Self {
        Self {
            status: ServiceStatus::Starting,
            uptime: Duration::ZERO,
            queue_health: ComponentHealth::Unknown,
            processor_health: ComponentHealth::Unknown,
            api_health: ComponentHealth::Unknown,
            last_health_check: now,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn degrade(&mut self) {
        if self.status == ServiceStatus::Healthy {
            self.status = ServiceStatus::Degraded;
        }
    }

    fn fail(&mut self) {
        self.status = ServiceStatus::Unhealthy;
    }
}

/// Classifies a snapshot. Pure apart from the `now` it is given.
pub fn classify(metrics: &Metrics, now: DateTime<Utc>) -> HealthStatus {
    let mut health = HealthStatus {
        status: ServiceStatus::Healthy,
        uptime: (now - metrics.start_time).to_std().unwrap_or_default(),
        queue_health: ComponentHealth::Healthy,
        processor_health: ComponentHealth::Healthy,
        api_health: ComponentHealth::Unknown,
        last_health_check: now,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    let queue_utilization = if metrics.queue_capacity == 0 {
        0.0
    } else {
        metrics.queue_size as f64 / metrics.queue_capacity as f64
    };
    if queue_utilization > QUEUE_CRITICAL_RATIO {
        health.queue_health = ComponentHealth::Critical;
        health.errors.push("Queue utilization critical (>90%)".to_string());
        health.fail();
    } else if queue_utilization > QUEUE_WARNING_RATIO {
        health.queue_health = ComponentHealth::Warning;
        health.warnings.push("Queue utilization high (>70%)".to_string());
        health.degrade();
    }

    if metrics.active_processors == 0 {
        health.processor_health = ComponentHealth::Critical;
        health.errors.push("No active processors".to_string());
        health.fail();
    }

    if metrics.http_requests_total > 0 {
        let error_rate =
            metrics.http_requests_failure as f64 / metrics.http_requests_total as f64;
        if error_rate > API_CRITICAL_ERROR_RATE {
            health.api_health = ComponentHealth::Critical;
            health.errors.push("High API error rate (>10%)".to_string());
            health.fail();
        } else if error_rate > API_WARNING_ERROR_RATE {
            health.api_health = ComponentHealth::Warning;
            health.warnings.push("Elevated API error rate (>5%)".to_string());
            health.degrade();
        } else {
            health.api_health = ComponentHealth::Healthy;
        }
    }

    let recent_error = metrics
        .last_error_at
        .and_then(|at| (now - at).to_std().ok())
        .is_some_and(|age| age < RECENT_ERROR_WINDOW);
    if recent_error {
        health.warnings.push("Recent errors detected".to_string());
        health.degrade();
    }

    health
}

#[derive(Debug)]
struct State {
    metrics: Metrics,
    health: HealthStatus,
    response_times: VecDeque<Duration>,
}

impl State {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            metrics: Metrics::new(now),
            health: HealthStatus::starting(now),
            response_times: VecDeque::with_capacity(RESPONSE_TIME_WINDOW),
        }
    }

    fn record_error(&mut self, error: Option<&str>) {
        self.metrics.last_error_at = Some(Utc::now());
        if let Some(error) = error {
            self.metrics.last_error = Some(error.to_string());
        }
    }
}

/// Thread-safe counters shared by the queue, the workers and the callers.
#[derive(Debug)]
pub struct MetricsCollector {
    state: Mutex<State>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn increment_events_processed(&self, count: u64) {
        if count == 0 {
            return;
        }
        let mut state = self.lock();
        state.metrics.events_processed += count;
        state.metrics.last_event_processed_at = Some(Utc::now());
    }

    pub fn increment_events_queued(&self) {
        self.lock().metrics.events_queued += 1;
    }

    pub fn increment_events_failed(&self, error: Option<&str>) {
        let mut state = self.lock();
        state.metrics.events_failed += 1;
        state.record_error(error);
    }

    pub fn increment_batches_processed(&self) {
        self.lock().metrics.batches_processed += 1;
    }

    pub fn increment_batches_failed(&self, error: Option<&str>) {
        let mut state = self.lock();
        state.metrics.batches_failed += 1;
        state.record_error(error);
    }

    /// Records one HTTP attempt and its latency.
    pub fn record_http_request(&self, success: bool, response_time: Duration) {
        let mut state = self.lock();
        let State {
            metrics,
            response_times,
            ..
        } = &mut *state;

        metrics.http_requests_total += 1;
        if success {
            metrics.http_requests_success += 1;
        } else {
            metrics.http_requests_failure += 1;
        }

        metrics.total_response_time += response_time;
        metrics.max_response_time = metrics.max_response_time.max(response_time);
        if metrics.http_requests_total == 1 || response_time < metrics.min_response_time {
            metrics.min_response_time = response_time;
        }

        if response_times.len() == RESPONSE_TIME_WINDOW {
            response_times.pop_front();
        }
        response_times.push_back(response_time);
        let window_total: Duration = response_times.iter().sum();
        // The window never exceeds RESPONSE_TIME_WINDOW entries.
        #[allow(clippy::cast_possible_truncation)]
        let samples = response_times.len() as u32;
        metrics.average_response_time = window_total / samples;
    }

    /// Records the queue depth. `size` runs under the collector lock so the
    /// last publisher always stores the latest depth.
    pub fn update_queue_metrics(&self, size: impl FnOnce() -> usize, capacity: usize) {
        let mut state = self.lock();
        state.metrics.queue_size = size();
        state.metrics.queue_capacity = capacity;
    }

    pub fn processor_started(&self) {
        self.lock().metrics.active_processors += 1;
    }

    pub fn processor_stopped(&self) {
        let mut state = self.lock();
        state.metrics.active_processors = state.metrics.active_processors.saturating_sub(1);
    }

    pub fn metrics(&self) -> Metrics {
        self.lock().metrics.clone()
    }

    /// Recomputes health from the current counters and caches the result.
    pub fn check_health(&self) -> HealthStatus {
        let mut state = self.lock();
        let health = classify(&state.metrics, Utc::now());
        state.health = health.clone();
        health
    }

    /// Last result of [`Self::check_health`], or `Starting` if never run.
    pub fn health_status(&self) -> HealthStatus {
        self.lock().health.clone()
    }

    /// Reinitializes every counter. Intended for tests.
    pub fn reset(&self) {
        *self.lock() = State::new();
    }
}
