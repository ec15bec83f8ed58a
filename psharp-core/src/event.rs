//! Immutable value types: typed events and machine identities (spec.md §3).

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Globally unique, partition-tagged machine identity.
///
/// Two ids are equal iff the monotonic counter matches; the rest of the
/// tuple is carried for diagnostics and is stable across serialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MachineId {
    id: u64,
    pub type_name: String,
    pub friendly_name: Option<String>,
    pub partition: String,
}

impl MachineId {
    pub fn new(id: u64, type_name: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            friendly_name: None,
            partition: partition.into(),
        }
    }

    pub fn with_friendly_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = Some(name.into());
        self
    }

    pub fn raw_id(&self) -> u64 {
        self.id
    }
}

impl PartialEq for MachineId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for MachineId {}

impl std::hash::Hash for MachineId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for MachineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.friendly_name {
            Some(name) => write!(f, "{}({}#{})", self.type_name, name, self.id),
            None => write!(f, "{}(#{})", self.type_name, self.id),
        }
    }
}

/// Allocates runtime-scoped monotonic machine ids. One per `Scheduler`.
#[derive(Debug, Default)]
pub struct MachineIdAllocator {
    next: AtomicU64,
}

impl MachineIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    pub fn allocate(&self, type_name: impl Into<String>, partition: impl Into<String>) -> MachineId {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        MachineId::new(id, type_name, partition)
    }
}

/// Send-time options recognized by `send_event` (spec.md §4.1).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SendOptions {
    pub operation_group_id: Option<Uuid>,
    pub must_handle: bool,
    pub assert_at_most_n: Option<u32>,
}

/// Immutable payload plus an event-type identifier.
///
/// Events are value-equal by identity (`event_type`) for dedup purposes;
/// payload equality is not required and payloads are treated as opaque
/// by the runtime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub options: SendOptions,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: serde_json::Value::Null,
            options: SendOptions::default(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_options(mut self, options: SendOptions) -> Self {
        self.options = options;
        self
    }
}

/// An event plus the delivery metadata the inbox needs to enforce FIFO
/// and deferral ordering (spec.md §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: Event,
    pub sender_id: Option<MachineId>,
    pub operation_group_id: Uuid,
    pub send_seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_ids_compare_by_counter_only() {
        let a = MachineId::new(3, "Client", "default").with_friendly_name("alice");
        let b = MachineId::new(3, "Client", "other-partition");
        assert_eq!(a, b, "ids are equal iff the u64 matches, per spec.md §3");
    }

    #[test]
    fn allocator_is_monotonic() {
        let alloc = MachineIdAllocator::new();
        let a = alloc.allocate("Client", "default");
        let b = alloc.allocate("Server", "default");
        assert_ne!(a, b);
        assert_eq!(a.raw_id(), 0);
        assert_eq!(b.raw_id(), 1);
    }
}
