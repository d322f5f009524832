//! Reactive Context
//!
//! The reactive context tracks which computation is currently evaluating.
//! This enables automatic dependency tracking: when a subject is read, the
//! computation on top of the stack is registered as a dependent.
//!
//! # Implementation
//!
//! The stack belongs to a [`Runtime`](super::Runtime) and is reached through
//! it, never through a global. Entering a computation pushes it; the returned
//! [`Frame`] pops it when dropped, so the stack stays balanced even if an
//! evaluator panics.
//!
//! Frames nest: a computed value read from inside a render computation pushes
//! the computed value, records its reads against it alone, and pops back to
//! the render computation.
//!
//! An *untracked* frame pushes an empty entry. Reads made under it register
//! nothing, even if a computation is evaluating further down the stack.

use std::cell::RefCell;

use super::computation::{Computation, ComputationId};

/// The active-computation stack of one runtime.
#[derive(Default)]
pub struct ContextStack {
    frames: RefCell<Vec<Option<Computation>>>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `computation` the active computation until the frame drops.
    pub fn enter(&self, computation: Computation) -> Frame<'_> {
        let id = computation.id();
        self.frames.borrow_mut().push(Some(computation));
        Frame {
            stack: self,
            id: Some(id),
        }
    }

    /// Suspend tracking until the frame drops.
    pub fn enter_untracked(&self) -> Frame<'_> {
        self.frames.borrow_mut().push(None);
        Frame {
            stack: self,
            id: None,
        }
    }

    /// The computation on top of the stack, if the top frame is tracked.
    pub fn current(&self) -> Option<Computation> {
        self.frames.borrow().last().cloned().flatten()
    }

    /// Check if reads would currently be recorded.
    pub fn is_tracking(&self) -> bool {
        matches!(self.frames.borrow().last(), Some(Some(_)))
    }

    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }
}

/// Guard that pops its frame when dropped.
pub struct Frame<'a> {
    stack: &'a ContextStack,
    id: Option<ComputationId>,
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        let popped = self.stack.frames.borrow_mut().pop();

        // Verify we're popping the right frame.
        if let Some(entry) = popped {
            debug_assert_eq!(
                entry.as_ref().map(|c| c.id()),
                self.id,
                "context frame mismatch"
            );
        }
    }
}
