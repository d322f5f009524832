//! Next Tick
//!
//! Deferred callbacks run after the current synchronous work, in the order
//! they were queued. The first callback queued in a turn asks the runtime's
//! [`Host`] to run a drain task soon; later callbacks in the same turn ride
//! along with it.
//!
//! The host decides what "soon" means. [`ManualHost`] keeps tasks until the
//! embedder runs them (tests, custom event loops). [`TokioHost`] spawns them
//! onto the current `LocalSet`.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::mem;

use crate::error::{ReactiveError, Result};
use crate::reactive::Runtime;

/// A unit of work handed to a host.
pub type Task = Box<dyn FnOnce()>;

pub(crate) type TickCallback = Box<dyn FnOnce(&Runtime) -> Result<()>>;

/// The event loop the runtime defers work onto.
pub trait Host {
    /// Run `task` after the current synchronous work.
    fn run_soon(&self, task: Task);

    /// Run whatever tasks are ready right now, if the host allows it.
    /// Returns how many ran.
    fn run_pending(&self) -> usize {
        0
    }
}

/// Host that queues tasks until told to run them.
#[derive(Default)]
pub struct ManualHost {
    tasks: RefCell<VecDeque<Task>>,
}

impl ManualHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run tasks until none are left, including tasks queued while running.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.tasks.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Host for ManualHost {
    fn run_soon(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }

    /// Runs the tasks queued so far. Tasks they queue wait for the next call.
    fn run_pending(&self) -> usize {
        let batch = mem::take(&mut *self.tasks.borrow_mut());
        let ran = batch.len();
        for task in batch {
            task();
        }
        ran
    }
}

/// Host backed by tokio's `spawn_local`.
///
/// Must be used from inside a [`tokio::task::LocalSet`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioHost;

impl Host for TokioHost {
    fn run_soon(&self, task: Task) {
        tokio::task::spawn_local(async move { task() });
    }
}

/// The next-tick callback queue of one runtime.
#[derive(Default)]
pub struct NextTick {
    callbacks: RefCell<Vec<TickCallback>>,
    pending: Cell<bool>,
}

impl NextTick {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `callback`. Returns `true` when the queue was idle and a drain
    /// has to be scheduled.
    pub(crate) fn push(&self, callback: TickCallback) -> bool {
        self.callbacks.borrow_mut().push(callback);
        !self.pending.replace(true)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    pub fn len(&self) -> usize {
        self.callbacks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.borrow().is_empty()
    }

    /// Run the callbacks queued so far. Failures are reported, and do not
    /// stop the remaining callbacks.
    pub(crate) fn drain(&self, rt: &Runtime) {
        self.pending.set(false);
        let callbacks = mem::take(&mut *self.callbacks.borrow_mut());
        for callback in callbacks {
            if let Err(err) = callback(rt) {
                rt.report_error(ReactiveError::NextTick {
                    source: Box::new(err),
                });
            }
        }
    }
}
