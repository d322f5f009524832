//! Subject Implementation
//!
//! A Subject is one observable slot: a single property of a wrapped object,
//! or a whole wrapped container. It does not hold the value itself; it only
//! knows which computations read the slot during their last evaluation.
//!
//! # How Subjects Work
//!
//! 1. When a slot is read while a computation is evaluating, the slot's
//!    subject calls [`Subject::record`], which registers the subject with the
//!    active computation and the computation with the subject.
//!
//! 2. When the slot is written, [`Subject::notify`] calls `update` on every
//!    subscriber, in the order they subscribed.
//!
//! The subscriber set and the computation's dependency set always mirror each
//! other: a computation subscribes through `add_dependency` and unsubscribes
//! when it prunes stale dependencies or is torn down.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::computation::{Computation, ComputationId};
use super::runtime::Runtime;

/// Unique identifier for a subject.
///
/// Ids are handed out from a process-wide counter, so they increase in
/// creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubjectId(u64);

impl SubjectId {
    /// Generate a new unique subject ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubjectId {
    fn default() -> Self {
        Self::new()
    }
}

struct SubjectInner {
    id: SubjectId,

    /// Computations that read this subject during their last evaluation,
    /// in subscription order.
    subscribers: RefCell<IndexMap<ComputationId, Computation>>,
}

/// An observable slot. Cloning a `Subject` yields another handle to the same
/// slot.
#[derive(Clone)]
pub struct Subject {
    inner: Rc<SubjectInner>,
}

impl Subject {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SubjectInner {
                id: SubjectId::new(),
                subscribers: RefCell::new(IndexMap::new()),
            }),
        }
    }

    pub fn id(&self) -> SubjectId {
        self.inner.id
    }

    /// Record a read of this slot against the active computation, if any.
    pub fn record(&self, rt: &Runtime) {
        if let Some(computation) = rt.context().current() {
            computation.add_dependency(self);
        }
    }

    /// Tell every subscriber that the slot changed.
    ///
    /// Iterates over a snapshot: an update may subscribe or unsubscribe
    /// computations (a sync computation re-evaluating, a teardown inside a
    /// callback) without disturbing the rest of this pass.
    pub fn notify(&self, rt: &Runtime) {
        let mut subscribers: SmallVec<[Computation; 8]> = self
            .inner
            .subscribers
            .borrow()
            .values()
            .cloned()
            .collect();

        if subscribers.is_empty() {
            return;
        }

        // Without a deferred flush nothing re-sorts the queue, so keep
        // creation order here.
        if !rt.config().async_flush {
            subscribers.sort_by_key(|c| c.id());
        }

        tracing::trace!(subject = self.id().raw(), count = subscribers.len(), "notify");

        for computation in subscribers {
            computation.update(rt);
        }
    }

    /// Add a subscriber. Adding one twice keeps its original position.
    pub fn subscribe(&self, computation: &Computation) {
        self.inner
            .subscribers
            .borrow_mut()
            .entry(computation.id())
            .or_insert_with(|| computation.clone());
    }

    /// Remove a subscriber. Removing one that is absent is a no-op.
    pub fn unsubscribe(&self, id: ComputationId) {
        self.inner.subscribers.borrow_mut().shift_remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    pub fn has_subscriber(&self, id: ComputationId) -> bool {
        self.inner.subscribers.borrow().contains_key(&id)
    }

    /// Subscriber ids in subscription order.
    pub fn subscriber_ids(&self) -> Vec<ComputationId> {
        self.inner.subscribers.borrow().keys().copied().collect()
    }
}

impl Default for Subject {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Subject {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Subject {}

impl Debug for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subject")
            .field("id", &self.inner.id)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
