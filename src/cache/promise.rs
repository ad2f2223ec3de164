//! Cancellable delivery of cache results to one observer
//!
//! A `DeliveryHandle` is returned as soon as a request is made. The engine
//! pushes values into it as they become known (cached value first, fresh value
//! later); the caller attaches an observer whenever it is ready and receives
//! the latest value immediately. After `cancel()` nothing more is delivered.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// How a request finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A recent refresh existed; the cached value was final
    Elided,
    /// The fetch produced a value that was delivered and persisted
    Refreshed,
    /// The fetch produced nothing; the cached value stayed
    KeptCached,
    /// The fetch produced nothing and there was no cached value
    Unavailable,
}

type Observer<T> = Box<dyn FnMut(T) + Send>;
type CancelHook = Box<dyn FnOnce() + Send>;

/// The observer and the values queued for it
///
/// The observer is taken out of the slot while it runs, so it may call back
/// into the handle (attach, cancel) without deadlocking.
struct Slot<T> {
    observer: Option<Observer<T>>,
    /// Bumped by every `on_update`; a stale observer is not put back
    generation: u64,
    pending: VecDeque<T>,
    dispatching: bool,
}

struct Shared<T> {
    /// Last value passed to `deliver`, replayed to a late observer
    last: Mutex<Option<T>>,
    slot: Mutex<Slot<T>>,
    on_cancel: Mutex<Option<CancelHook>>,
    cancelled: AtomicBool,
    outcome: watch::Receiver<Option<RequestOutcome>>,
    settler: Mutex<Option<Settler>>,
}

/// Write side of a handle's outcome, owned by the task running the request
///
/// Dropping it without calling [`settle`](Settler::settle) tells waiters the
/// request died.
#[derive(Debug)]
pub(crate) struct Settler(watch::Sender<Option<RequestOutcome>>);

impl Settler {
    pub(crate) fn settle(self, outcome: RequestOutcome) {
        self.0.send_replace(Some(outcome));
    }
}

/// Handle to one in-flight cache request
///
/// Clones share the same state, so one clone can be kept for cancelling while
/// another is moved into UI code.
pub struct DeliveryHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for DeliveryHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for DeliveryHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("cancelled", &self.shared.cancelled.load(Ordering::SeqCst))
            .field("outcome", &*self.shared.outcome.borrow())
            .finish()
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<T: Clone + Send + 'static> DeliveryHandle<T> {
    pub(crate) fn new() -> Self {
        let (sender, outcome) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                last: Mutex::new(None),
                slot: Mutex::new(Slot {
                    observer: None,
                    generation: 0,
                    pending: VecDeque::new(),
                    dispatching: false,
                }),
                on_cancel: Mutex::new(None),
                cancelled: AtomicBool::new(false),
                outcome,
                settler: Mutex::new(Some(Settler(sender))),
            }),
        }
    }

    /// Hands out the outcome writer; only the first call gets it
    pub(crate) fn take_settler(&self) -> Option<Settler> {
        lock(&self.shared.settler).take()
    }

    /// Attaches the observer, replacing any previous one
    ///
    /// If a value was already delivered, the observer receives it right away.
    /// The observer may call [`cancel`](Self::cancel) or `on_update` on a
    /// clone of this handle.
    pub fn on_update<F>(&self, action: F)
    where
        F: FnMut(T) + Send + 'static,
    {
        let mut slot = lock(&self.shared.slot);
        slot.generation += 1;
        slot.observer = Some(Box::new(action));
        slot.pending.clear();
        if !self.is_cancelled() {
            if let Some(value) = lock(&self.shared.last).clone() {
                slot.pending.push_back(value);
            }
        }
        self.dispatch(slot);
    }

    /// Pushes a value to the observer; a no-op once cancelled
    pub(crate) fn deliver(&self, value: T) {
        // `last` only changes under the slot lock, so an attaching observer
        // replays exactly the values it missed
        let mut slot = lock(&self.shared.slot);
        if self.is_cancelled() {
            return;
        }
        *lock(&self.shared.last) = Some(value.clone());
        slot.pending.push_back(value);
        self.dispatch(slot);
    }

    /// Hands pending values to the observer, one call at a time
    ///
    /// A call made while another dispatch is running only queues; the running
    /// loop picks the value up.
    fn dispatch<'a>(&'a self, mut slot: MutexGuard<'a, Slot<T>>) {
        if slot.dispatching {
            return;
        }
        slot.dispatching = true;
        loop {
            if self.is_cancelled() {
                slot.pending.clear();
                break;
            }
            let Some(value) = slot.pending.pop_front() else {
                break;
            };
            let Some(mut action) = slot.observer.take() else {
                slot.pending.clear();
                break;
            };
            let generation = slot.generation;
            drop(slot);

            action(value);

            slot = lock(&self.shared.slot);
            if slot.generation == generation {
                slot.observer = Some(action);
            }
        }
        slot.dispatching = false;
    }

    /// Registers the hook run by the first `cancel()`
    ///
    /// If the handle is already cancelled the hook runs immediately.
    pub(crate) fn set_cancel_hook<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_cancelled() {
            hook();
            return;
        }
        *lock(&self.shared.on_cancel) = Some(Box::new(hook));
        // cancel() may have raced with the registration above
        if self.is_cancelled() {
            if let Some(hook) = lock(&self.shared.on_cancel).take() {
                hook();
            }
        }
    }

    /// Stops all further delivery and signals the fetch operation
    ///
    /// Idempotent. The underlying fetch may keep running; only delivery is
    /// guaranteed to stop.
    pub fn cancel(&self) {
        if self.shared.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let hook = lock(&self.shared.on_cancel).take();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// The last delivered value, if any
    pub fn current(&self) -> Option<T> {
        lock(&self.shared.last).clone()
    }

    /// Waits until the engine has finished with this request
    ///
    /// Returns `None` if the request task ended without settling (it panicked
    /// or the runtime shut down).
    pub async fn settled(&self) -> Option<RequestOutcome> {
        let mut receiver = self.shared.outcome.clone();
        let outcome = receiver.wait_for(Option::is_some).await.ok()?;
        *outcome
    }

    /// The outcome if the request already finished
    pub fn outcome(&self) -> Option<RequestOutcome> {
        *self.shared.outcome.borrow()
    }
}
