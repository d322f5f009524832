//! Reactive Primitives
//!
//! This module implements the dependency-tracking core: subjects,
//! computations and the runtime that connects them.
//!
//! # Concepts
//!
//! ## Subjects
//!
//! A Subject is one observable slot, such as a property of an observed
//! object or the structure of an observed list. It keeps the set of
//! computations that read it during their last evaluation.
//!
//! ## Computations
//!
//! A Computation is a derived value. While it evaluates it sits on top of the
//! runtime's context stack, and every subject read in the meantime registers
//! it as a subscriber. When one of those subjects is written, the computation
//! is marked dirty (lazy), re-run on the spot (sync) or queued on the
//! scheduler.
//!
//! ## Computed Values
//!
//! A Computed is a lazy computation with a cache. Reading it from another
//! computation forwards its dependencies to the reader.
//!
//! # Implementation Notes
//!
//! Dependencies are rediscovered on every evaluation, so conditional reads
//! only subscribe to the branch that actually ran. The context stack lives on
//! the [`Runtime`] rather than in a thread-local, and every tracked operation
//! takes the runtime by reference.

mod computation;
mod computed;
mod context;
mod path;
mod runtime;
mod subject;
mod traverse;

pub use computation::{
    BeforeHook, Callback, Computation, ComputationId, ComputationOptions, Evaluator,
};
pub use computed::Computed;
pub use context::{ContextStack, Frame};
pub use path::WatchPath;
pub use runtime::{HookId, Runtime, WatchOptions, WatchSource};
pub use subject::{Subject, SubjectId};
pub use traverse::traverse;
