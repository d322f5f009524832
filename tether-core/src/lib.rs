//! Tether Core
//!
//! This crate provides the core runtime for the Tether fine-grained
//! reactivity engine. It implements:
//!
//! - Observable state (objects and lists whose reads and writes are tracked)
//! - Automatic dependency tracking for derived computations
//! - A batching scheduler that re-runs each affected computation once per tick
//! - Instances: state roots with computed values, watches and a render
//!   computation
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `state`: the value model and the conversion of plain state into
//!   observed state
//! - `reactive`: subjects, computations, computed values and the runtime
//! - `scheduler`: the update queue and the next-tick queue
//! - `instance`: the consumer-side host for state, watches and rendering
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use tether_core::{Runtime, RuntimeConfig, Value, WatchOptions, WatchSource};
//!
//! let rt = Runtime::new(RuntimeConfig::default());
//! let state = Value::from(json!({ "count": 1 }));
//! rt.observe(&state);
//!
//! rt.watch(
//!     WatchSource::path(&state, "count"),
//!     |_, new, old| {
//!         println!("count: {old:?} -> {new:?}");
//!         Ok(())
//!     },
//!     WatchOptions::new(),
//! )?;
//!
//! let object = state.as_object().unwrap();
//! object.set(&rt, "count", Value::from(2));
//! object.set(&rt, "count", Value::from(3));
//!
//! // Both writes are folded into one run of the watch.
//! rt.tick();
//! # Ok::<(), tether_core::ReactiveError>(())
//! ```

pub mod config;
pub mod error;
pub mod instance;
pub mod reactive;
pub mod scheduler;
pub mod state;

pub use config::RuntimeConfig;
pub use error::{BoxError, Phase, ReactiveError, Result, Warning};
pub use instance::{Instance, InstanceOptions, WatchSpec};
pub use reactive::{
    Computation, ComputationId, ComputationOptions, Computed, Runtime, Subject, SubjectId,
    WatchOptions, WatchSource,
};
pub use scheduler::{Host, ManualHost, TokioHost};
pub use state::{Array, Key, Object, Value};
