// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-worker batch buffer.
//!
//! The accumulator only decides *when* a batch is ready. The worker loop in
//! [`crate::service`] owns the timer and hands ready batches to the
//! [`crate::delivery::DeliveryEngine`].

use std::collections::HashMap;

use crate::context::{ContextId, EventContext};
use crate::envelope::Envelope;

/// Envelopes sharing one submission context, in arrival order.
#[derive(Debug)]
pub struct ContextGroup {
    pub context: EventContext,
    pub envelopes: Vec<Envelope>,
}

#[derive(Debug)]
pub struct BatchAccumulator {
    pending: Vec<Envelope>,
    batch_size: usize,
}

impl BatchAccumulator {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            pending: Vec::with_capacity(batch_size),
            batch_size,
        }
    }

    /// Buffers the envelope. Returns the full batch once `batch_size` is
    /// reached, leaving the accumulator empty.
    pub fn push(&mut self, envelope: Envelope) -> Option<Vec<Envelope>> {
        self.pending.push(envelope);
        if self.pending.len() >= self.batch_size {
            Some(self.take())
        } else {
            None
        }
    }

    /// Drains everything pending, possibly nothing.
    pub fn take(&mut self) -> Vec<Envelope> {
        std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[cfg(test)]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// Splits a batch by submission context. Groups come out in the order their
/// first envelope arrived, and each keeps its own arrival order.
pub fn group_by_context(batch: Vec<Envelope>) -> Vec<ContextGroup> {
    let mut index: HashMap<ContextId, usize> = HashMap::new();
    let mut groups: Vec<ContextGroup> = Vec::new();

    for envelope in batch {
        let slot = *index.entry(envelope.context().id()).or_insert_with(|| {
            groups.push(ContextGroup {
                context: envelope.context().clone(),
                envelopes: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].envelopes.push(envelope);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TraceEvent;
    use proptest::prelude::*;

    fn envelope(ctx: &EventContext) -> Envelope {
        Envelope::new(ctx.clone(), TraceEvent::default().into()).expect("valid event")
    }

    #[test]
    fn test_push_flushes_at_batch_size() {
        let ctx = EventContext::background();
        let mut acc = BatchAccumulator::new(3);

        assert!(acc.push(envelope(&ctx)).is_none());
        assert!(acc.push(envelope(&ctx)).is_none());
        let batch = acc.push(envelope(&ctx)).expect("batch is full");

        assert_eq!(batch.len(), 3);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_take_on_empty_is_noop() {
        let mut acc = BatchAccumulator::new(3);
        assert!(acc.take().is_empty());
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let mut acc = BatchAccumulator::new(0);
        assert_eq!(acc.batch_size(), 1);
        let ctx = EventContext::background();
        assert_eq!(acc.push(envelope(&ctx)).map(|b| b.len()), Some(1));
    }

    #[test]
    fn test_group_by_context_preserves_order() {
        let first = EventContext::background();
        let second = EventContext::background();
        let batch = vec![
            envelope(&first),
            envelope(&second),
            envelope(&first),
            envelope(&second),
            envelope(&first),
        ];
        let ids: Vec<_> = batch.iter().map(Envelope::id).collect();

        let groups = group_by_context(batch);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].context.id(), first.id());
        assert_eq!(
            groups[0].envelopes.iter().map(Envelope::id).collect::<Vec<_>>(),
            vec![ids[0], ids[2], ids[4]]
        );
        assert_eq!(
            groups[1].envelopes.iter().map(Envelope::id).collect::<Vec<_>>(),
            vec![ids[1], ids[3]]
        );
    }

    proptest! {
        #[test]
        fn batches_never_exceed_batch_size(
            batch_size in 1usize..16,
            contexts in proptest::collection::vec(0usize..4, 0..128),
        ) {
            let pool: Vec<EventContext> = (0..4).map(|_| EventContext::background()).collect();
            let mut acc = BatchAccumulator::new(batch_size);
            let mut seen = 0;

            for slot in &contexts {
                if let Some(batch) = acc.push(envelope(&pool[*slot])) {
                    prop_assert_eq!(batch.len(), batch_size);
                    for group in group_by_context(batch) {
                        prop_assert!(!group.envelopes.is_empty());
                        prop_assert!(group.envelopes.len() <= batch_size);
                        seen += group.envelopes.len();
                    }
                }
                prop_assert!(acc.len() < batch_size);
            }
            seen += acc.take().len();
            prop_assert_eq!(seen, contexts.len());
        }
    }
}
