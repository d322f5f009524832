//! Errors and Warnings
//!
//! Two channels leave the runtime:
//!
//! - [`ReactiveError`]: something failed. User-declared computations have
//!   their failures reported through the runtime's error handler; internal
//!   computations return them to the caller.
//! - [`Warning`]: a misuse that the runtime recovers from (invalid watch
//!   path, unsafe structural mutation, runaway update loop). Warnings are
//!   only emitted in development mode.

use std::fmt;

use thiserror::Error;

/// Error type returned by user evaluators and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Where inside a computation an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Getter,
    Callback,
    ImmediateCallback,
    SyncUpdate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Phase::Getter => "getter",
            Phase::Callback => "callback",
            Phase::ImmediateCallback => "callback for immediate",
            Phase::SyncUpdate => "sync update",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum ReactiveError {
    #[error("error in {phase} for watcher \"{label}\"{}: {source}", owner_suffix(.owner))]
    Evaluation {
        phase: Phase,
        label: String,
        owner: Option<String>,
        #[source]
        source: BoxError,
    },

    #[error("error in next-tick callback: {source}")]
    NextTick {
        #[source]
        source: Box<ReactiveError>,
    },

    #[error("invalid watch path: \"{path}\"")]
    InvalidPath { path: String },

    #[error("invalid runtime config: {0}")]
    Config(#[from] serde_json::Error),
}

impl ReactiveError {
    /// The label of the computation that failed, if the error came from one.
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Evaluation { label, .. } => Some(label),
            Self::NextTick { source } => source.label(),
            _ => None,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Evaluation { phase, .. } => Some(*phase),
            Self::NextTick { source } => source.phase(),
            _ => None,
        }
    }
}

fn owner_suffix(owner: &Option<String>) -> String {
    match owner {
        Some(owner) => format!(" (in {owner})"),
        None => String::new(),
    }
}

/// Recoverable misuse reported in development mode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Warning {
    #[error(
        "failed watching path \"{path}\": only simple dot-delimited paths are accepted, use a function instead"
    )]
    InvalidWatchPath { path: String },

    #[error("cannot write to read-only property \"{key}\"")]
    ReadOnlyWrite { key: String },

    #[error("avoid adding reactive property \"{key}\" to root state at runtime, declare it upfront")]
    UnsafeAddition { key: String },

    #[error("avoid deleting property \"{key}\" from root state, set it to null instead")]
    UnsafeDeletion { key: String },

    #[error("cannot set reactive property \"{key}\" on null or primitive value")]
    NonContainerTarget { key: String },

    #[error("\"{key}\" is not a valid list index")]
    InvalidArrayKey { key: String },

    #[error("possible infinite update loop in watcher \"{label}\" ({count} re-runs in one flush)")]
    InfiniteUpdateLoop { label: String, count: usize },

    #[error("wrote container into \"{key}\" while observation is disabled, it stays unobserved")]
    ObservationDisabled { key: String },
}
