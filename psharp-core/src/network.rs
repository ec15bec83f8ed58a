//! Network provider boundary (spec.md §4.7): "the core treats 'same
//! partition' sends as local enqueues; others are delegated. Only the
//! local forwarder is specified here; production transports are
//! plugins." Shaped like the teacher's `ProcessStore` trait: the core
//! depends only on the trait object, and a remote transport is a
//! drop-in implementation the bug-finding runtime never needs to know
//! about.
//!
//! The scheduler itself is synchronous and single-threaded (spec.md §5),
//! so unlike `reliable.rs`'s overlay (an out-of-band commit path that
//! genuinely awaits I/O) this boundary has no use for `async`; a real
//! remote transport would do its own blocking/async dispatch behind
//! these plain synchronous signatures.

use crate::error::{Result, RuntimeError};
use crate::event::{Event, MachineId};

pub trait NetworkProvider: Send + Sync {
    fn create_remote(&self, target_partition: &str, machine_type: &str, event: Option<Event>) -> Result<MachineId>;
    fn send_remote(&self, target_id: MachineId, event: Event) -> Result<()>;
    fn local_endpoint(&self) -> String;
}

/// The only implementation this specification requires. Every target
/// whose partition matches `self.partition` *is* local, so `send_remote`
/// succeeds and hands control back to the scheduler, which performs the
/// actual enqueue into its own machine map right after consulting this
/// boundary (spec.md:154 "the core treats 'same partition' sends as local
/// enqueues"). A target in any other partition has nowhere to go — this
/// forwarder carries no transport — so it reports that honestly instead
/// of silently dropping the event; a production `NetworkProvider` plugs
/// in at this same trait to actually reach other partitions.
pub struct LocalForwarder {
    endpoint: String,
    partition: String,
}

impl LocalForwarder {
    pub fn new(partition: impl Into<String>) -> Self {
        let partition = partition.into();
        Self {
            endpoint: format!("partition://{partition}"),
            partition,
        }
    }

    fn unreachable(&self, target_partition: &str) -> RuntimeError {
        RuntimeError::Configuration(format!(
            "no transport configured to reach partition {target_partition:?}; this build only forwards in-process within {:?}",
            self.partition
        ))
    }
}

impl NetworkProvider for LocalForwarder {
    fn create_remote(&self, target_partition: &str, _machine_type: &str, _event: Option<Event>) -> Result<MachineId> {
        Err(self.unreachable(target_partition))
    }

    fn send_remote(&self, target_id: MachineId, _event: Event) -> Result<()> {
        if target_id.partition == self.partition {
            Ok(())
        } else {
            Err(self.unreachable(&target_id.partition))
        }
    }

    fn local_endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_forwarder_reports_its_endpoint() {
        let forwarder = LocalForwarder::new("default");
        assert_eq!(forwarder.local_endpoint(), "partition://default");
    }

    #[test]
    fn local_forwarder_accepts_sends_within_its_own_partition() {
        let forwarder = LocalForwarder::new("default");
        let target = MachineId::new(0, "Server", "default");
        assert!(forwarder.send_remote(target, Event::new("Ping")).is_ok());
    }

    #[test]
    fn local_forwarder_refuses_other_partitions() {
        let forwarder = LocalForwarder::new("default");
        let target = MachineId::new(0, "Server", "other");
        let err = forwarder.send_remote(target, Event::new("Ping")).unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));

        let err = forwarder.create_remote("other", "Server", None).unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
    }
}
