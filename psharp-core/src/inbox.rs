//! Event inbox: enqueue, dequeue-with-filter, deferral, and the blocking
//! receive rule (spec.md §3 invariants 3–5, §4.1 "Receive semantics").

use crate::event::EventEnvelope;
use crate::state::{EventType, FlattenedState};
use std::collections::{HashSet, VecDeque};

#[derive(Default)]
pub struct Inbox {
    queue: VecDeque<EventEnvelope>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, envelope: EventEnvelope) {
        self.queue.push_back(envelope);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Number of undequeued envelopes of `event_type`, for `assert_at_most_n`.
    pub fn count_of(&self, event_type: &str) -> usize {
        self.queue
            .iter()
            .filter(|e| e.event.event_type == event_type)
            .count()
    }

    /// Read-only: would `dequeue` return something right now, against the
    /// top state's flattened handler map? Ignored-type envelopes ahead of
    /// a dequeuable one don't block it; deferred-type envelopes do not
    /// count as dequeuable themselves but don't block scanning past them.
    pub fn has_dequeuable(&self, flat: &FlattenedState) -> bool {
        self.queue.iter().any(|env| {
            !flat.ignored.contains(&env.event.event_type)
                && !flat.deferred.contains(&env.event.event_type)
        })
    }

    /// Discards any ignored-type envelopes ahead of the first dequeuable
    /// one, leaves deferred-type envelopes in place, and removes/returns
    /// the first handleable envelope (spec.md §4.1 step 1, invariant 4).
    pub fn dequeue(&mut self, flat: &FlattenedState) -> Option<EventEnvelope> {
        let mut idx = 0;
        while idx < self.queue.len() {
            let ty = self.queue[idx].event.event_type.clone();
            if flat.ignored.contains(&ty) {
                self.queue.remove(idx);
                continue;
            }
            if flat.deferred.contains(&ty) {
                idx += 1;
                continue;
            }
            return self.queue.remove(idx);
        }
        None
    }

    /// Receive replaces the dequeue rule entirely: nothing is discarded,
    /// and anything not in `waiting_on` is deferred regardless of the
    /// state's own deferred set (spec.md §4.1, invariant 5).
    pub fn has_matching(&self, waiting_on: &HashSet<EventType>) -> bool {
        self.queue
            .iter()
            .any(|e| waiting_on.contains(&e.event.event_type))
    }

    pub fn take_matching(&mut self, waiting_on: &HashSet<EventType>) -> Option<EventEnvelope> {
        let idx = self
            .queue
            .iter()
            .position(|e| waiting_on.contains(&e.event.event_type))?;
        self.queue.remove(idx)
    }

    pub fn drain(&mut self) -> Vec<EventEnvelope> {
        self.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use uuid::Uuid;

    fn envelope(event_type: &str) -> EventEnvelope {
        EventEnvelope {
            event: Event::new(event_type),
            sender_id: None,
            operation_group_id: Uuid::nil(),
            send_seq: 0,
        }
    }

    fn flat(deferred: &[&str], ignored: &[&str]) -> FlattenedState {
        let mut f = FlattenedState::default();
        f.deferred = deferred.iter().map(|s| s.to_string()).collect();
        f.ignored = ignored.iter().map(|s| s.to_string()).collect();
        f
    }

    #[test]
    fn deferral_keeps_ordering_scenario_s3() {
        // S3: S1 defers E1, handles E2. Peer sends E1 then E2.
        let mut inbox = Inbox::new();
        inbox.enqueue(envelope("E1"));
        inbox.enqueue(envelope("E2"));
        let flat = flat(&["E1"], &[]);
        let dequeued = inbox.dequeue(&flat).unwrap();
        assert_eq!(dequeued.event.event_type, "E2");
        // E1 is still present, at the front.
        assert_eq!(inbox.len(), 1);
        assert!(inbox.has_dequeuable(&FlattenedState::default()));
    }

    #[test]
    fn ignored_events_are_discarded_on_dequeue() {
        let mut inbox = Inbox::new();
        inbox.enqueue(envelope("Noise"));
        inbox.enqueue(envelope("Real"));
        let flat = flat(&[], &["Noise"]);
        let dequeued = inbox.dequeue(&flat).unwrap();
        assert_eq!(dequeued.event.event_type, "Real");
        assert!(inbox.is_empty());
    }

    #[test]
    fn receive_defers_everything_not_matching_scenario_s4() {
        let mut inbox = Inbox::new();
        inbox.enqueue(envelope("E2"));
        let waiting_on: HashSet<EventType> = ["E1".to_string()].into_iter().collect();
        assert!(!inbox.has_matching(&waiting_on));
        inbox.enqueue(envelope("E1"));
        assert!(inbox.has_matching(&waiting_on));
        let got = inbox.take_matching(&waiting_on).unwrap();
        assert_eq!(got.event.event_type, "E1");
        // E2 is still present even though it isn't in any deferred set.
        assert_eq!(inbox.len(), 1);
    }
}
