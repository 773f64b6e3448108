use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

/// Ordered set of subscriber callbacks.
///
/// Entries are keyed by a monotonically increasing id, so iteration order is
/// registration order and removal only ever touches one entry. Once closed the
/// registry refuses new entries, which is what makes terminal fan-out fire at
/// most once.
pub(crate) struct Registry<A: ?Sized> {
    inner: Arc<Mutex<RegistryInner<A>>>,
}

struct RegistryInner<A: ?Sized> {
    next_id: u64,
    entries: BTreeMap<u64, Arc<A>>,
    closed: bool,
}

pub(crate) type Snapshot<A> = SmallVec<[Arc<A>; 4]>;

impl<A: ?Sized + Send + Sync + 'static> Registry<A> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 0,
                entries: BTreeMap::new(),
                closed: false,
            })),
        }
    }

    /// Register `callback`, or hand it back if the registry is already closed.
    pub(crate) fn insert(&self, callback: Arc<A>) -> Result<Subscription, Arc<A>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(callback);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(id, callback);
        drop(inner);

        let weak: Weak<Mutex<RegistryInner<A>>> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().entries.remove(&id);
            }
        }))
    }

    /// Clone the live callbacks so they can be invoked without the lock held.
    pub(crate) fn snapshot(&self) -> Snapshot<A> {
        let inner = self.inner.lock();
        if inner.closed {
            return SmallVec::new();
        }
        inner.entries.values().cloned().collect()
    }

    /// Close the registry and take its callbacks. Returns `None` if it was
    /// already closed.
    pub(crate) fn close(&self) -> Option<Snapshot<A>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        inner.closed = true;
        let entries = std::mem::take(&mut inner.entries);
        Some(entries.into_values().collect())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

/// Handle to one callback registration.
///
/// Dropping a `Subscription` leaves the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[must_use = "dropping a Subscription keeps the callback registered; call unsubscribe() to remove it"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(remove: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// A subscription that is not attached to anything.
    pub(crate) fn inert() -> Self {
        Self { remove: None }
    }

    /// Remove exactly this registration. Other registrations are unaffected.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }

    /// Whether this subscription was attached to a live registry when created.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.remove.is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.remove.is_some())
            .finish()
    }
}
