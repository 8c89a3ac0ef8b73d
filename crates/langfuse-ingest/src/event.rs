// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Langfuse ingestion event payloads.
//!
//! [`Event`] is a closed set of the four kinds of observations the pipeline
//! knows how to ship. The wire type tag comes from the variant, so an event of
//! an unknown kind cannot be built in the first place.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::errors::IngestError;

/// Wire type tag of an ingestion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventType {
    #[serde(rename = "trace-create")]
    TraceCreate,
    #[serde(rename = "span-create")]
    SpanCreate,
    #[serde(rename = "generation-create")]
    GenerationCreate,
    #[serde(rename = "score-create")]
    ScoreCreate,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TraceCreate => "trace-create",
            Self::SpanCreate => "span-create",
            Self::GenerationCreate => "generation-create",
            Self::ScoreCreate => "score-create",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observation log level, used by the UI for filtering and highlighting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    #[default]
    Default,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UsageUnit {
    Characters,
    #[default]
    Tokens,
    Milliseconds,
    Seconds,
    Images,
}

/// Token and cost usage of a model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(skip_serializing_if = "is_zero")]
    pub input: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub output: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub total: u64,
    pub unit: UsageUnit,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub input_cost: f64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub output_cost: f64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub total_cost: f64,
    #[serde(skip_serializing_if = "is_zero")]
    pub prompt_tokens: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub completion_tokens: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub total_tokens: u64,
}

impl Usage {
    pub fn builder() -> UsageBuilder {
        UsageBuilder {
            usage: Usage::default(),
        }
    }
}

/// Fluent construction of [`Usage`]; the unit defaults to tokens.
#[derive(Debug, Clone)]
pub struct UsageBuilder {
    usage: Usage,
}

impl UsageBuilder {
    #[must_use]
    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.usage.input = input;
        self.usage.output = output;
        self.usage.total = input + output;
        self.usage.prompt_tokens = input;
        self.usage.completion_tokens = output;
        self.usage.total_tokens = input + output;
        self.usage.unit = UsageUnit::Tokens;
        self
    }

    #[must_use]
    pub fn with_characters(mut self, input: u64, output: u64) -> Self {
        self.usage.input = input;
        self.usage.output = output;
        self.usage.total = input + output;
        self.usage.unit = UsageUnit::Characters;
        self
    }

    #[must_use]
    pub fn with_costs(mut self, input_cost: f64, output_cost: f64) -> Self {
        self.usage.input_cost = input_cost;
        self.usage.output_cost = output_cost;
        self.usage.total_cost = input_cost + output_cost;
        self
    }

    #[must_use]
    pub fn with_unit(mut self, unit: UsageUnit) -> Self {
        self.usage.unit = unit;
        self
    }

    pub fn build(self) -> Usage {
        self.usage
    }
}

/// A trace groups all observations of one request or workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

/// A span is the duration of a unit of work inside a trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanEvent {
    pub id: Option<Uuid>,
    pub trace_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_observation_id: Option<Uuid>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl SpanEvent {
    /// Marks the span as ended now.
    pub fn end(&mut self) -> &mut Self {
        self.end_time = Some(Utc::now());
        self
    }

    /// Ends the span with level ERROR and the given status message.
    pub fn error(&mut self, status_message: impl Into<String>) -> &mut Self {
        self.status_message = Some(status_message.into());
        self.level = Some(Level::Error);
        self.end()
    }
}

/// A generation is a span that records a model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationEvent {
    pub id: Option<Uuid>,
    pub trace_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_observation_id: Option<Uuid>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub model_parameters: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

/// A score attached to a trace, and optionally to one of its observations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEvent {
    pub id: Option<Uuid>,
    pub name: String,
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation_id: Option<String>,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// An ingestion event of one of the supported kinds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Event {
    Trace(TraceEvent),
    Span(SpanEvent),
    Generation(GenerationEvent),
    Score(ScoreEvent),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Trace(_) => EventType::TraceCreate,
            Self::Span(_) => EventType::SpanCreate,
            Self::Generation(_) => EventType::GenerationCreate,
            Self::Score(_) => EventType::ScoreCreate,
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        match self {
            Self::Trace(e) => e.id,
            Self::Span(e) => e.id,
            Self::Generation(e) => e.id,
            Self::Score(e) => e.id,
        }
    }

    pub fn set_id(&mut self, id: Uuid) {
        let slot = match self {
            Self::Trace(e) => &mut e.id,
            Self::Span(e) => &mut e.id,
            Self::Generation(e) => &mut e.id,
            Self::Score(e) => &mut e.id,
        };
        *slot = Some(id);
    }

    /// Returns the event id, generating and storing a v4 UUID if missing.
    pub fn ensure_id(&mut self) -> Uuid {
        match self.id() {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4();
                self.set_id(id);
                id
            }
        }
    }

    /// Structural checks the ingestion API would otherwise reject.
    pub fn validate(&self) -> Result<(), IngestError> {
        if let Self::Score(score) = self {
            if score.name.trim().is_empty() {
                return Err(IngestError::validation("name", "required"));
            }
            if score.value == 0.0 {
                return Err(IngestError::validation("value", "non zero value required"));
            }
        }
        Ok(())
    }
}

impl From<TraceEvent> for Event {
    fn from(event: TraceEvent) -> Self {
        Self::Trace(event)
    }
}

impl From<SpanEvent> for Event {
    fn from(event: SpanEvent) -> Self {
        Self::Span(event)
    }
}

impl From<GenerationEvent> for Event {
    fn from(event: GenerationEvent) -> Self {
        Self::Generation(event)
    }
}

impl From<ScoreEvent> for Event {
    fn from(event: ScoreEvent) -> Self {
        Self::Score(event)
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(v: &u64) -> bool {
    *v == 0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_tags() {
        assert_eq!(Event::from(TraceEvent::default()).event_type().as_str(), "trace-create");
        assert_eq!(Event::from(SpanEvent::default()).event_type().as_str(), "span-create");
        assert_eq!(
            Event::from(GenerationEvent::default()).event_type().as_str(),
            "generation-create"
        );
        assert_eq!(Event::from(ScoreEvent::default()).event_type().as_str(), "score-create");
    }

    #[test]
    fn test_ensure_id_keeps_existing_id() {
        let id = Uuid::parse_str("f8359e80-1ecd-471b-bf2a-49d2009a9179").expect("uuid");
        let mut event = Event::from(TraceEvent {
            id: Some(id),
            ..Default::default()
        });
        assert_eq!(event.ensure_id(), id);
    }

    #[test]
    fn test_ensure_id_generates_missing_id() {
        let mut event = Event::from(SpanEvent::default());
        let id = event.ensure_id();
        assert_eq!(event.id(), Some(id));
        assert_eq!(event.ensure_id(), id);
    }

    #[test]
    fn test_score_validation() {
        let missing_name = Event::from(ScoreEvent {
            value: 0.3,
            ..Default::default()
        });
        let err = missing_name.validate().expect_err("name is required");
        assert_eq!(err.details().get("field").map(String::as_str), Some("name"));

        let missing_value = Event::from(ScoreEvent {
            name: "score".to_string(),
            ..Default::default()
        });
        let err = missing_value.validate().expect_err("value is required");
        assert_eq!(err.details().get("field").map(String::as_str), Some("value"));

        let valid = Event::from(ScoreEvent {
            name: "accuracy".to_string(),
            value: 0.9,
            ..Default::default()
        });
        assert!(valid.validate().is_ok());
    }

    #[test]
    fn test_trace_serialization() {
        let id = Uuid::parse_str("f8359e80-1ecd-471b-bf2a-49d2009a9179").expect("uuid");
        let event = Event::from(TraceEvent {
            id: Some(id),
            name: "LLM".to_string(),
            session_id: Some("session-1".to_string()),
            ..Default::default()
        });
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            value,
            json!({
                "id": "f8359e80-1ecd-471b-bf2a-49d2009a9179",
                "name": "LLM",
                "sessionId": "session-1",
                "public": false,
            })
        );
    }

    #[test]
    fn test_span_error_sets_level_and_end_time() {
        let mut span = SpanEvent::default();
        span.error("upstream timeout");
        assert_eq!(span.level, Some(Level::Error));
        assert_eq!(span.status_message.as_deref(), Some("upstream timeout"));
        assert!(span.end_time.is_some());
    }

    #[test]
    fn test_usage_builder() {
        let usage = Usage::builder().with_tokens(10, 5).with_costs(0.5, 0.25).build();
        assert_eq!(usage.total, 15);
        assert_eq!(usage.total_tokens, 15);
        assert_eq!(usage.unit, UsageUnit::Tokens);
        assert!((usage.total_cost - 0.75).abs() < f64::EPSILON);

        let usage = Usage::builder().with_characters(3, 4).build();
        assert_eq!(usage.unit, UsageUnit::Characters);
        assert_eq!(usage.total, 7);
        assert_eq!(usage.total_tokens, 0);
    }
}
