//! Delivery of grid notifications on the thread that owns the consumer.

use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

pub type Task = Box<dyn FnOnce() + Send>;

/// Marshals callbacks onto a consumer-owned thread.
pub trait Dispatcher: Send + Sync {
    /// Whether the calling thread may run consumer callbacks directly.
    fn check_access(&self) -> bool;

    /// Queues `task` to run on the owning thread.
    fn post(&self, task: Task);
}

/// Runs `task` now if the caller has access, otherwise posts it.
pub fn dispatch(dispatcher: &dyn Dispatcher, task: Task) {
    if dispatcher.check_access() {
        task();
    } else {
        dispatcher.post(task);
    }
}

/// Runs every callback immediately on whichever thread raised it.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn check_access(&self) -> bool {
        true
    }

    fn post(&self, task: Task) {
        task();
    }
}

/// A dispatcher bound to the thread that created it.
///
/// Callbacks raised on other threads are parked in a channel until the owner
/// calls [`QueuedDispatcher::drain`], typically once per UI frame.
pub struct QueuedDispatcher {
    owner: ThreadId,
    tx: Sender<Task>,
    rx: Receiver<Task>,
}

impl QueuedDispatcher {
    pub fn new() -> Self {
        Self::for_thread(thread::current().id())
    }

    pub fn for_thread(owner: ThreadId) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { owner, tx, rx }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Runs the parked callbacks and returns how many ran.
    ///
    /// Calls from a thread other than the owner run nothing.
    pub fn drain(&self) -> usize {
        if !self.check_access() {
            tracing::warn!(target: "treevirt_runtime", "QueuedDispatcher::drain called off the owner thread");
            return 0;
        }
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }
}

impl Default for QueuedDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for QueuedDispatcher {
    fn check_access(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn post(&self, task: Task) {
        // Both ends live in `self`, so the send cannot fail.
        let _ = self.tx.send(task);
    }
}

impl core::fmt::Debug for QueuedDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueuedDispatcher")
            .field("owner", &self.owner)
            .field("pending", &self.pending())
            .finish()
    }
}

new_key_type! {
    /// Identifies one subscriber in a [`Subscribers`] list.
    pub struct SubscriberId;
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;
type Slots<E> = Mutex<SlotMap<SubscriberId, Callback<E>>>;

/// A list of event callbacks.
///
/// Callbacks are invoked outside the lock, so a callback may subscribe or
/// unsubscribe without deadlocking.
pub struct Subscribers<E> {
    slots: Arc<Slots<E>>,
}

impl<E: 'static> Subscribers<E> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(SlotMap::with_key())),
        }
    }

    /// Registers `callback`. It stays registered until the returned
    /// [`Subscription`] is dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let id = self.slots.lock().insert(Arc::new(callback));
        let slots: Weak<Slots<E>> = Arc::downgrade(&self.slots);
        tracing::trace!(target: "treevirt_runtime", ?id, "subscriber added");
        Subscription {
            id,
            remove: Some(Box::new(move || {
                if let Some(slots) = slots.upgrade() {
                    slots.lock().remove(id);
                }
            })),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emit(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self.slots.lock().values().cloned().collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl<E: 'static> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Subscribers<E> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<E> core::fmt::Debug for Subscribers<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.slots.lock().len())
            .finish()
    }
}

/// Unsubscribes when dropped.
pub struct Subscription {
    id: SubscriberId,
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Keeps the callback registered for the lifetime of the list.
    pub fn detach(mut self) {
        self.remove = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
