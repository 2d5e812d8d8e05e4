//! Coalescing FIFO queue.
//!
//! A blocking FIFO queue with set semantics on a caller-supplied dedup key:
//! a `put` whose key is already pending is a silent no-op. The previously
//! queued item will, when processed, observe the *live* state of the file,
//! so the newest change is not lost even though the duplicate notification
//! was dropped.
//!
//! `stop()` appends a sentinel that is never deduplicated; the consumer
//! observes it only after everything enqueued ahead of it has drained, which
//! is what guarantees "finish current work, refuse new" shutdown.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// Dedup key function. The key is an opaque comparable value used only for
/// queue membership, never for business logic.
pub type KeyFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

enum Slot<T> {
    Item(T),
    Sentinel,
}

/// Result of [`CoalescingQueue::get`].
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeued<T> {
    /// The next pending item, in first-arrival order.
    Item(T),
    /// The stop sentinel; the consumer loop should exit.
    Stopped,
}

struct State<T> {
    slots: VecDeque<Slot<T>>,
    pending: HashSet<String>,
}

/// FIFO queue that silently drops an item whose dedup key is already pending.
///
/// `put` and `stop` are synchronous and callable from any thread (including
/// the notify callback thread); `get` is async and intended for a single
/// consumer task.
pub struct CoalescingQueue<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    key_fn: KeyFn<T>,
}

impl<T> CoalescingQueue<T> {
    /// Creates a queue using the given dedup key function.
    pub fn new(key_fn: KeyFn<T>) -> Self {
        Self {
            state: Mutex::new(State {
                slots: VecDeque::new(),
                pending: HashSet::new(),
            }),
            notify: Notify::new(),
            key_fn,
        }
    }

    /// Enqueues `item` unless an item with the same key is already pending.
    ///
    /// Returns `true` if the item was enqueued, `false` if it coalesced with
    /// a pending one. A re-arriving key does not change the pending item's
    /// position.
    pub fn put(&self, item: T) -> bool {
        let key = (self.key_fn)(&item);
        let mut state = self.state.lock().expect("queue state poisoned");
        if !state.pending.insert(key) {
            return false;
        }
        state.slots.push_back(Slot::Item(item));
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Appends the stop sentinel after all currently-pending items.
    ///
    /// Safe to call more than once; every extra sentinel is observed as
    /// another [`Dequeued::Stopped`].
    pub fn stop(&self) {
        self.state
            .lock()
            .expect("queue state poisoned")
            .slots
            .push_back(Slot::Sentinel);
        self.notify.notify_one();
    }

    /// Waits until an item (or the sentinel) is available and pops it.
    ///
    /// Popping an item releases its dedup key, so the same key may be
    /// enqueued again while the item is being processed.
    pub async fn get(&self) -> Dequeued<T> {
        loop {
            if let Some(slot) = self.pop_front() {
                return match slot {
                    Slot::Item(item) => Dequeued::Item(item),
                    Slot::Sentinel => Dequeued::Stopped,
                };
            }
            // notify_one stores a permit when no task is waiting, so a put
            // racing with this await is not lost.
            self.notify.notified().await;
        }
    }

    fn pop_front(&self) -> Option<Slot<T>> {
        let mut state = self.state.lock().expect("queue state poisoned");
        let slot = state.slots.pop_front()?;
        if let Slot::Item(item) = &slot {
            let key = (self.key_fn)(item);
            state.pending.remove(&key);
        }
        Some(slot)
    }

    /// Number of pending entries, the sentinel included.
    pub fn len(&self) -> usize {
        self.state.lock().expect("queue state poisoned").slots.len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
