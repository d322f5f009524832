//! Scheduling
//!
//! Batches re-runs of queued computations into one flush per tick.
//!
//! - [`queue`]: the deduplicating, id-ordered update queue and its flush.
//! - [`tick`]: the next-tick callback queue and the hosts it defers onto.

pub mod queue;
pub mod tick;

pub use queue::Scheduler;
pub use tick::{Host, ManualHost, NextTick, Task, TokioHost};
