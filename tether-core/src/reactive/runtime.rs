//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects state, computations
//! and the scheduler. Every operation that tracks or notifies takes it by
//! reference; there is no global runtime.
//!
//! # What It Owns
//!
//! - the active-computation stack used for dependency tracking,
//! - the update queue and the next-tick queue,
//! - the host the next-tick queue defers onto,
//! - the switch that enables or disables observation of new state,
//! - the outbound channels: error handler, warning handler and after-flush
//!   hooks.
//!
//! # Threading
//!
//! A runtime and everything it observes live on one thread. Handles are
//! `Rc`-based and neither `Send` nor `Sync`; run one runtime per thread (or
//! per `LocalSet`).

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::computation::{Callback, Computation, ComputationOptions, Evaluator};
use super::computed::Computed;
use super::context::ContextStack;
use super::path::WatchPath;
use crate::config::RuntimeConfig;
use crate::error::{BoxError, Phase, ReactiveError, Result, Warning};
use crate::scheduler::{Host, ManualHost, NextTick, Scheduler};
use crate::state::{self, Key, Object, Observer, Value};

type ErrorHandler = Rc<dyn Fn(&ReactiveError)>;
type WarningHandler = Rc<dyn Fn(&Warning)>;
type AfterFlushHook = Rc<dyn Fn(&Runtime, &[Computation])>;

/// Identifies an after-flush hook so it can be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// What a watch observes.
#[derive(Clone)]
pub enum WatchSource {
    /// A dotted path resolved from a root value.
    Path { root: Value, path: String },
    /// An arbitrary evaluator.
    Getter(Evaluator),
}

impl WatchSource {
    pub fn path(root: &Value, path: impl Into<String>) -> Self {
        WatchSource::Path {
            root: root.clone(),
            path: path.into(),
        }
    }

    pub fn getter(
        getter: impl Fn(&Runtime) -> std::result::Result<Value, BoxError> + 'static,
    ) -> Self {
        WatchSource::Getter(Rc::new(getter))
    }
}

/// Options for [`Runtime::watch`].
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub deep: bool,
    pub immediate: bool,
    pub sync: bool,
    pub label: Option<String>,
    pub owner: Option<String>,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    /// Invoke the callback once right away, with `Null` as the old value.
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

struct RuntimeInner {
    config: RuntimeConfig,
    context: ContextStack,
    scheduler: Scheduler,
    next_tick: NextTick,
    host: Rc<dyn Host>,
    observing: Cell<bool>,
    error_handler: RefCell<Option<ErrorHandler>>,
    warning_handler: RefCell<Option<WarningHandler>>,
    after_flush: RefCell<IndexMap<HookId, AfterFlushHook>>,
    next_hook_id: Cell<u64>,
}

/// Handle to a reactive runtime. Clones share the same runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime whose next-tick work waits for [`Runtime::tick`].
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_host(config, Rc::new(ManualHost::new()))
    }

    pub fn with_host(config: RuntimeConfig, host: Rc<dyn Host>) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                context: ContextStack::new(),
                scheduler: Scheduler::new(),
                next_tick: NextTick::new(),
                host,
                observing: Cell::new(true),
                error_handler: RefCell::new(None),
                warning_handler: RefCell::new(None),
                after_flush: RefCell::new(IndexMap::new()),
                next_hook_id: Cell::new(0),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn context(&self) -> &ContextStack {
        &self.inner.context
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Check if reads would currently be recorded.
    pub fn is_tracking(&self) -> bool {
        self.inner.context.is_tracking()
    }

    /// Run `f` with dependency tracking suspended.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = self.inner.context.enter_untracked();
        f()
    }

    // ----- observation -----

    /// Observe `value` (see [`state::observe`]).
    pub fn observe(&self, value: &Value) -> Option<Observer> {
        state::observe(self, value, false)
    }

    /// Observe `value` as root state. Root state refuses new reactive keys
    /// and deletions.
    pub fn observe_root(&self, value: &Value) -> Option<Observer> {
        state::observe(self, value, true)
    }

    /// Undo one [`Runtime::observe_root`].
    pub fn release_root(&self, value: &Value) {
        if let Some(observer) = value.observer() {
            observer.release_root();
        }
    }

    /// Enable or disable observation of containers that are not yet observed.
    pub fn set_observing(&self, observing: bool) {
        self.inner.observing.set(observing);
    }

    pub fn is_observing(&self) -> bool {
        self.inner.observing.get()
    }

    /// Run `f` with observation disabled.
    pub fn without_observing<R>(&self, f: impl FnOnce() -> R) -> R {
        let previous = self.inner.observing.replace(false);
        let result = f();
        self.inner.observing.set(previous);
        result
    }

    pub fn add_property(&self, target: &Value, key: impl Into<Key>, value: Value) {
        state::add_property(self, target, key.into(), value)
    }

    pub fn delete_property(&self, target: &Value, key: impl Into<Key>) {
        state::delete_property(self, target, key.into())
    }

    /// Make `key` of `object` a reactive property holding `value`.
    pub fn define_reactive(&self, object: &Object, key: &str, value: Value) {
        state::define_reactive(self, object, key, Some(value), false)
    }

    /// Like [`Runtime::define_reactive`], but values stored in the property
    /// are never observed.
    pub fn define_shallow(&self, object: &Object, key: &str, value: Value) {
        state::define_reactive(self, object, key, Some(value), true)
    }

    // ----- computations -----

    /// Create a computation. Unless lazy, it evaluates once right away; an
    /// evaluation error of a non-user computation is returned.
    pub fn computation<G, C>(
        &self,
        getter: G,
        callback: C,
        options: ComputationOptions,
    ) -> Result<Computation>
    where
        G: Fn(&Runtime) -> std::result::Result<Value, BoxError> + 'static,
        C: Fn(&Runtime, &Value, &Value) -> std::result::Result<(), BoxError> + 'static,
    {
        Computation::new(self, Rc::new(getter), Rc::new(callback), options)
    }

    /// Create a cached computed value.
    pub fn computed<G>(&self, getter: G) -> Computed
    where
        G: Fn(&Runtime) -> std::result::Result<Value, BoxError> + 'static,
    {
        self.computed_with(getter, ComputationOptions::new())
    }

    pub fn computed_with<G>(&self, getter: G, options: ComputationOptions) -> Computed
    where
        G: Fn(&Runtime) -> std::result::Result<Value, BoxError> + 'static,
    {
        let computation = Computation::new_lazy(Rc::new(getter), Rc::new(ignore), options);
        Computed::new(computation)
    }

    /// Watch `source` and call `callback` with `(new, old)` when it changes.
    ///
    /// The watch is a user computation: its failures are reported through
    /// the error handler. An invalid path warns and watches nothing.
    pub fn watch<C>(
        &self,
        source: WatchSource,
        callback: C,
        options: WatchOptions,
    ) -> Result<Computation>
    where
        C: Fn(&Runtime, &Value, &Value) -> std::result::Result<(), BoxError> + 'static,
    {
        let (evaluator, label) = match source {
            WatchSource::Path { root, path } => {
                let evaluator: Evaluator = match WatchPath::parse(&path) {
                    Ok(parsed) => {
                        Rc::new(move |rt: &Runtime| Ok::<_, BoxError>(parsed.resolve(rt, &root)))
                    }
                    Err(_) => {
                        self.warn(Warning::InvalidWatchPath { path: path.clone() });
                        Rc::new(|_: &Runtime| Ok::<_, BoxError>(Value::Null))
                    }
                };
                (evaluator, Some(path))
            }
            WatchSource::Getter(getter) => (getter, None),
        };

        let mut computation_options = ComputationOptions::new().user();
        if options.deep {
            computation_options = computation_options.deep();
        }
        if options.sync {
            computation_options = computation_options.sync();
        }
        if let Some(label) = options.label.or(label) {
            computation_options = computation_options.label(label);
        }
        if let Some(owner) = options.owner {
            computation_options = computation_options.owner(owner);
        }

        let callback: Callback = Rc::new(callback);
        let computation = Computation::new(self, evaluator, callback.clone(), computation_options)?;

        if options.immediate {
            let value = computation.value();
            let result = self.untracked(|| callback(self, &value, &Value::Null));
            if let Err(source) = result {
                self.report_error(ReactiveError::Evaluation {
                    phase: Phase::ImmediateCallback,
                    label: computation.label().to_string(),
                    owner: computation.owner().map(str::to_string),
                    source,
                });
            }
        }

        Ok(computation)
    }

    // ----- scheduling -----

    /// Run `callback` on the next tick.
    pub fn next_tick(&self, callback: impl FnOnce(&Runtime) -> Result<()> + 'static) {
        if self.inner.next_tick.push(Box::new(callback)) {
            let runtime = Rc::downgrade(&self.inner);
            self.inner.host.run_soon(Box::new(move || {
                if let Some(inner) = runtime.upgrade() {
                    let rt = Runtime { inner };
                    rt.inner.next_tick.drain(&rt);
                }
            }));
        }
    }

    /// Drive one tick: let the host run its ready tasks, then drain whatever
    /// next-tick callbacks are still queued.
    pub fn tick(&self) {
        self.inner.host.run_pending();
        if self.inner.next_tick.is_pending() {
            self.inner.next_tick.drain(self);
        }
    }

    /// Flush the update queue now.
    pub fn flush(&self) -> Result<()> {
        self.inner.scheduler.flush(self)
    }

    // ----- channels -----

    /// Replace the error handler. Without one, errors are logged.
    pub fn on_error(&self, handler: impl Fn(&ReactiveError) + 'static) {
        *self.inner.error_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Replace the warning handler. Warnings are logged either way.
    pub fn on_warning(&self, handler: impl Fn(&Warning) + 'static) {
        *self.inner.warning_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Register a hook called after every flush with the primary computations
    /// that ran in it.
    pub fn on_after_flush(&self, hook: impl Fn(&Runtime, &[Computation]) + 'static) -> HookId {
        let id = HookId(self.inner.next_hook_id.get());
        self.inner.next_hook_id.set(id.0 + 1);
        self.inner.after_flush.borrow_mut().insert(id, Rc::new(hook));
        id
    }

    pub fn remove_after_flush(&self, id: HookId) -> bool {
        self.inner.after_flush.borrow_mut().shift_remove(&id).is_some()
    }

    pub(crate) fn call_after_flush(&self, ran: &[Computation]) {
        let hooks: Vec<AfterFlushHook> = self.inner.after_flush.borrow().values().cloned().collect();
        for hook in hooks {
            hook(self, ran);
        }
    }

    pub(crate) fn report_error(&self, err: ReactiveError) {
        let handler = self.inner.error_handler.borrow().clone();
        match handler {
            Some(handler) => handler(&err),
            None => tracing::error!(error = %err, "unhandled reactive error"),
        }
    }

    /// Emit a development warning. Outside development mode this is a no-op.
    pub(crate) fn warn(&self, warning: Warning) {
        if !self.inner.config.development {
            return;
        }
        tracing::warn!("{warning}");
        let handler = self.inner.warning_handler.borrow().clone();
        if let Some(handler) = handler {
            handler(&warning);
        }
    }
}

fn ignore(_: &Runtime, _: &Value, _: &Value) -> std::result::Result<(), BoxError> {
    Ok(())
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("depth", &self.inner.context.depth())
            .field("pending", &self.inner.scheduler.pending())
            .finish()
    }
}
