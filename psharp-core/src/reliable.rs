//! Reliable-state-machine overlay (spec.md §4.6): wraps one step of one
//! machine in a transaction over an abstract `StateStore`, retrying on
//! transient storage failure from a durable stack snapshot. Shaped on
//! the teacher's `ProcessStore`/`MemoryStore` split (store.rs,
//! store_memory.rs): a trait the overlay depends on, and an
//! `RwLock`-guarded in-memory implementation for tests.

use crate::error::{Result, RuntimeError};
use crate::event::{Event, EventEnvelope, MachineId};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// A durable transaction handle. The overlay never inspects it; it only
/// threads it through `begin`/`commit`.
pub struct Tx {
    pub id: u64,
}

/// The three capabilities spec.md §9 asks for: "a persistent ordered
/// map, persistent FIFO, transaction" — here specialized to exactly the
/// two collections a machine step touches (spec.md §4.6).
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn begin(&self) -> Result<Tx>;
    async fn commit(&self, tx: Tx) -> Result<()>;

    async fn load_state_stack(&self, machine: &MachineId) -> Result<Vec<String>>;
    async fn save_state_stack(&self, tx: &Tx, machine: &MachineId, stack: Vec<String>) -> Result<()>;

    async fn dequeue_inbox(&self, tx: &Tx, machine: &MachineId) -> Result<Option<EventEnvelope>>;
    async fn enqueue_inbox(&self, tx: &Tx, machine: &MachineId, envelope: EventEnvelope) -> Result<()>;
}

struct Inner {
    stacks: HashMap<MachineId, Vec<String>>,
    inboxes: HashMap<MachineId, VecDeque<EventEnvelope>>,
    next_tx: u64,
    /// Machine ids whose *next* commit should fail once, simulating a
    /// storage timeout or transaction conflict (spec.md §8 scenario S6).
    fail_next_commit: std::collections::HashSet<MachineId>,
}

/// In-memory `StateStore`, for tests and single-process deployments.
pub struct MemoryStateStore {
    inner: RwLock<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                stacks: HashMap::new(),
                inboxes: HashMap::new(),
                next_tx: 0,
                fail_next_commit: std::collections::HashSet::new(),
            }),
        }
    }

    /// Test hook for scenario S6: make the next `commit` touching
    /// `machine` fail with `TransientStorageFailure`.
    pub async fn inject_transient_failure(&self, machine: MachineId) {
        self.inner.write().await.fail_next_commit.insert(machine);
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn begin(&self) -> Result<Tx> {
        let mut inner = self.inner.write().await;
        let id = inner.next_tx;
        inner.next_tx += 1;
        Ok(Tx { id })
    }

    async fn commit(&self, tx: Tx) -> Result<()> {
        let _ = tx;
        Ok(())
    }

    async fn load_state_stack(&self, machine: &MachineId) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner.stacks.get(machine).cloned().unwrap_or_default())
    }

    async fn save_state_stack(&self, _tx: &Tx, machine: &MachineId, stack: Vec<String>) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.fail_next_commit.remove(machine) {
            return Err(RuntimeError::TransientStorageFailure(format!(
                "simulated transaction conflict saving the state stack for {machine}"
            )));
        }
        inner.stacks.insert(machine.clone(), stack);
        Ok(())
    }

    async fn dequeue_inbox(&self, _tx: &Tx, machine: &MachineId) -> Result<Option<EventEnvelope>> {
        let mut inner = self.inner.write().await;
        Ok(inner.inboxes.entry(machine.clone()).or_default().pop_front())
    }

    async fn enqueue_inbox(&self, _tx: &Tx, machine: &MachineId, envelope: EventEnvelope) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.inboxes.entry(machine.clone()).or_default().push_back(envelope);
        Ok(())
    }
}

/// Buffered work produced by a step, applied only after commit succeeds
/// (spec.md §4.6: "On commit success: apply buffered out-of-transaction
/// work").
#[derive(Default)]
pub struct BufferedStepWork {
    pub sends: Vec<(MachineId, Event)>,
}

/// How many times a single step is retried after a `TransientFailure`
/// before giving up and surfacing `TransientStorageFailure` (spec.md §7:
/// "retried internally; never surfaced unless the retry budget is
/// exhausted").
const MAX_STEP_RETRIES: u32 = 3;

/// Runs `compute_delta` under the overlay's transaction/retry discipline
/// for one machine's one step. `compute_delta` receives the freshly
/// loaded stack and dequeued envelope and returns the new stack plus any
/// sends to buffer; it must not have side effects beyond its return
/// value, since it may run more than once per call on retry.
pub async fn run_reliable_step<F>(
    store: &dyn StateStore,
    machine: &MachineId,
    compute_delta: F,
) -> Result<Option<BufferedStepWork>>
where
    F: Fn(Vec<String>, Option<EventEnvelope>) -> Result<Option<(Vec<String>, BufferedStepWork)>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let tx = store.begin().await?;
        let stack = store.load_state_stack(machine).await?;
        let envelope = store.dequeue_inbox(&tx, machine).await?;

        let outcome = compute_delta(stack, envelope)?;
        let Some((new_stack, work)) = outcome else {
            store.commit(tx).await?;
            return Ok(None);
        };

        match store.save_state_stack(&tx, machine, new_stack).await {
            Ok(()) => {
                for (target, event) in &work.sends {
                    let envelope = EventEnvelope {
                        event: event.clone(),
                        sender_id: Some(machine.clone()),
                        operation_group_id: uuid::Uuid::nil(),
                        send_seq: 0,
                    };
                    store.enqueue_inbox(&tx, target, envelope).await?;
                }
                store.commit(tx).await?;
                return Ok(Some(work));
            }
            Err(RuntimeError::TransientStorageFailure(reason)) => {
                if attempt >= MAX_STEP_RETRIES {
                    return Err(RuntimeError::TransientStorageFailure(format!(
                        "retry budget ({MAX_STEP_RETRIES}) exhausted for {machine}: {reason}"
                    )));
                }
                continue;
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    #[tokio::test]
    async fn step_retries_once_on_transient_failure_then_succeeds() {
        let store = MemoryStateStore::new();
        let machine = MachineId::new(0, "Client", "default");
        store.inject_transient_failure(machine.clone()).await;

        let calls = std::sync::atomic::AtomicU32::new(0);
        let result = run_reliable_step(&store, &machine, |stack, _envelope| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut stack = stack;
            stack.push("Active".to_string());
            Ok(Some((stack, BufferedStepWork::default())))
        })
        .await
        .unwrap();

        assert!(result.is_some());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2, "delta recomputed once on retry");
        assert_eq!(store.load_state_stack(&machine).await.unwrap(), vec!["Active".to_string()]);
    }

    #[tokio::test]
    async fn peer_observes_send_only_after_commit() {
        let store = MemoryStateStore::new();
        let sender = MachineId::new(0, "Client", "default");
        let peer = MachineId::new(1, "Server", "default");

        run_reliable_step(&store, &sender, |stack, _envelope| {
            let mut work = BufferedStepWork::default();
            work.sends.push((peer.clone(), Event::new("Ping")));
            Ok(Some((stack, work)))
        })
        .await
        .unwrap();

        let tx = store.begin().await.unwrap();
        let delivered = store.dequeue_inbox(&tx, &peer).await.unwrap();
        store.commit(tx).await.unwrap();
        assert_eq!(delivered.unwrap().event.event_type, "Ping");
    }
}
