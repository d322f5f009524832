//! Computed Values
//!
//! A cached derived value built on a lazy computation. Notifications only
//! mark it dirty; the next [`Computed::get`] re-evaluates. Reading it from
//! inside another computation makes the reader depend on the computed
//! value's own dependencies, so chains of computed values propagate without
//! subscribing to each other.

use super::computation::Computation;
use super::runtime::Runtime;
use crate::error::Result;
use crate::state::Value;

#[derive(Clone, Debug)]
pub struct Computed {
    computation: Computation,
}

impl Computed {
    pub(crate) fn new(computation: Computation) -> Self {
        Self { computation }
    }

    /// The current value, re-evaluating first if a dependency changed.
    pub fn get(&self, rt: &Runtime) -> Result<Value> {
        if self.computation.is_dirty() {
            self.computation.force_evaluate(rt)?;
        }
        if rt.is_tracking() {
            self.computation.depend(rt);
        }
        Ok(self.computation.value())
    }

    pub fn computation(&self) -> &Computation {
        &self.computation
    }
}
