//! Update Queue
//!
//! Computations that are neither lazy nor sync are not re-run when a
//! dependency notifies. They are queued here instead and run together in one
//! flush, on the next tick.
//!
//! # Algorithm
//!
//! 1. `enqueue` ignores computations that are already pending, so any number
//!    of writes between two flushes re-runs each computation at most once.
//!
//! 2. `flush` sorts the queue by computation id (creation order) and drains
//!    it with a cursor. Creation order runs owners before the things they
//!    create and user watches before render computations.
//!
//! 3. A computation queued while a flush is in progress is inserted in id
//!    order, but never at or before the cursor, so it runs later in the same
//!    flush.
//!
//! 4. Every run is counted per computation. One that is re-entered more
//!    than `max_update_count` times in a single flush, whether it triggers
//!    itself or is caught in a loop with others, is reported and dropped for
//!    the rest of the flush.
//!
//! 5. A failing computation does not stop the flush. The rest of the queue
//!    still runs; the first failure is returned once it is drained.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::error::{ReactiveError, Result, Warning};
use crate::reactive::{Computation, ComputationId, Runtime};

#[derive(Default)]
struct QueueState {
    queue: Vec<Computation>,
    /// Ids currently pending in `queue`.
    has: HashSet<ComputationId>,
    /// Runs per computation in the current flush.
    circular: HashMap<ComputationId, usize>,
    /// Computations dropped for the rest of the current flush.
    suppressed: HashSet<ComputationId>,
    /// A flush has been scheduled and has not finished yet.
    waiting: bool,
    flushing: bool,
    /// Position of the next computation to run. Entries before it have
    /// already been taken by the current flush.
    index: usize,
}

/// The scheduler of one runtime.
#[derive(Default)]
pub struct Scheduler {
    state: RefCell<QueueState>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `computation` for the next flush.
    pub fn enqueue(&self, rt: &Runtime, computation: &Computation) {
        let id = computation.id();
        let schedule = {
            let mut state = self.state.borrow_mut();
            if state.suppressed.contains(&id) || !state.has.insert(id) {
                return;
            }

            if state.flushing {
                let mut pos = state.queue.len();
                while pos > state.index && state.queue[pos - 1].id() > id {
                    pos -= 1;
                }
                state.queue.insert(pos, computation.clone());
            } else {
                state.queue.push(computation.clone());
            }

            !std::mem::replace(&mut state.waiting, true)
        };

        tracing::trace!(computation = id.raw(), label = %computation.label(), "enqueue");

        if !schedule {
            return;
        }
        if rt.config().async_flush {
            rt.next_tick(|rt| rt.flush());
        } else if let Err(err) = self.flush(rt) {
            rt.report_error(err);
        }
    }

    /// Run every queued computation, then the after-flush hooks.
    ///
    /// Bookkeeping is reset even when a computation fails; the failure is
    /// returned and the hooks are skipped.
    pub fn flush(&self, rt: &Runtime) -> Result<()> {
        {
            let mut state = self.state.borrow_mut();
            if state.flushing {
                return Ok(());
            }
            state.flushing = true;
            state.index = 0;
            state.queue.sort_by_key(Computation::id);
        }

        let span = tracing::debug_span!("flush", pending = self.pending());
        let _enter = span.enter();

        let failure = self.drain(rt);
        let ran = self.reset();
        if let Some(err) = failure {
            return Err(err);
        }

        if !ran.is_empty() {
            rt.call_after_flush(&ran);
        }
        Ok(())
    }

    /// Run the queue to the end. Returns the first failure; later ones are
    /// reported.
    fn drain(&self, rt: &Runtime) -> Option<ReactiveError> {
        let max_update_count = rt.config().max_update_count;
        let mut failure = None;

        loop {
            let computation = {
                let mut state = self.state.borrow_mut();
                let index = state.index;
                let Some(computation) = state.queue.get(index).cloned() else {
                    break;
                };
                state.index += 1;
                computation
            };
            let id = computation.id();

            let runaway = {
                let mut state = self.state.borrow_mut();
                if state.suppressed.contains(&id) {
                    continue;
                }
                if !computation.is_active() {
                    state.has.remove(&id);
                    continue;
                }

                let runs = state.circular.get(&id).copied().unwrap_or(0);
                if runs > max_update_count {
                    state.suppressed.insert(id);
                    state.has.remove(&id);
                    Some(runs)
                } else {
                    state.circular.insert(id, runs + 1);
                    None
                }
            };

            if let Some(count) = runaway {
                rt.warn(Warning::InfiniteUpdateLoop {
                    label: computation.label().to_string(),
                    count,
                });
                continue;
            }

            if let Some(before) = computation.before() {
                rt.untracked(|| before(rt));
            }

            self.state.borrow_mut().has.remove(&id);
            if let Err(err) = computation.run(rt) {
                if failure.is_none() {
                    failure = Some(err);
                } else {
                    rt.report_error(err);
                }
            }
        }

        failure
    }

    /// Clear the queue and return the primary computations that ran in this
    /// flush and are still active, most recently queued first.
    fn reset(&self) -> Vec<Computation> {
        let mut state = self.state.borrow_mut();
        let mut seen = HashSet::new();
        let ran = state.queue[..state.index.min(state.queue.len())]
            .iter()
            .rev()
            .filter(|c| {
                c.is_primary()
                    && c.is_active()
                    && state.circular.contains_key(&c.id())
                    && seen.insert(c.id())
            })
            .cloned()
            .collect();

        *state = QueueState::default();
        ran
    }

    pub fn is_flushing(&self) -> bool {
        self.state.borrow().flushing
    }

    /// Number of computations still waiting to run.
    pub fn pending(&self) -> usize {
        let state = self.state.borrow();
        state.queue.len().saturating_sub(state.index)
    }
}
