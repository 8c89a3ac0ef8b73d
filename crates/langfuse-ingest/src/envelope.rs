// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::context::EventContext;
use crate::errors::IngestError;
use crate::event::{Event, EventType};

/// An event together with its delivery metadata.
///
/// Built once in [`crate::service::IngestService::add_event`]; the id and type
/// tag never change afterwards.
#[derive(Debug, Clone)]
pub struct Envelope {
    id: Uuid,
    event_type: EventType,
    event: Event,
    context: EventContext,
    submitted_at: DateTime<Utc>,
}

impl Envelope {
    /// Validates the event and assigns it an id if it has none.
    pub fn new(context: EventContext, mut event: Event) -> Result<Self, IngestError> {
        event.validate()?;
        let id = event.ensure_id();
        Ok(Self {
            id,
            event_type: event.event_type(),
            event,
            context,
            submitted_at: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn context(&self) -> &EventContext {
        &self.context
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ScoreEvent, TraceEvent};

    #[test]
    fn test_envelope_assigns_id_and_type() {
        let envelope = Envelope::new(
            EventContext::background(),
            TraceEvent {
                name: "LLM".to_string(),
                ..Default::default()
            }
            .into(),
        )
        .expect("valid event");

        assert_eq!(envelope.event_type(), EventType::TraceCreate);
        assert_eq!(envelope.event().id(), Some(envelope.id()));
    }

    #[test]
    fn test_envelope_rejects_invalid_event() {
        let result = Envelope::new(EventContext::background(), ScoreEvent::default().into());
        assert!(result.is_err());
    }
}
