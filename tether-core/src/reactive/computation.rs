//! Computation Implementation
//!
//! A Computation is one derived value: an evaluator, the value it produced
//! last, and the set of subjects it read while producing it.
//!
//! # Lifecycle
//!
//! 1. On creation a non-lazy computation evaluates once to collect its
//!    initial dependencies. A lazy one stays dirty until someone asks for
//!    its value.
//!
//! 2. When a dependency notifies, [`Computation::update`] decides what to do:
//!    lazy computations only mark themselves dirty, sync ones re-run on the
//!    spot, everything else goes to the scheduler.
//!
//! 3. Every evaluation rebuilds the dependency set from scratch. Reads are
//!    collected into `new_deps`; afterwards subjects that were not read again
//!    are unsubscribed and the two sets are swapped.
//!
//! 4. [`Computation::teardown`] unsubscribes from everything and deactivates
//!    the computation for good.
//!
//! # Errors
//!
//! Failures of *user* computations (declared watches) are reported through
//! the runtime's error handler and evaluation carries on with `Null`.
//! Failures of internal computations are returned to the caller.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::runtime::Runtime;
use super::subject::{Subject, SubjectId};
use super::traverse::traverse;
use crate::error::{BoxError, Phase, ReactiveError, Result};
use crate::state::Value;

/// Produces a computation's value.
pub type Evaluator = Rc<dyn Fn(&Runtime) -> std::result::Result<Value, BoxError>>;

/// Receives `(new, old)` whenever a re-run produced a different value.
pub type Callback = Rc<dyn Fn(&Runtime, &Value, &Value) -> std::result::Result<(), BoxError>>;

/// Runs before each scheduled re-run.
pub type BeforeHook = Rc<dyn Fn(&Runtime)>;

/// Unique identifier for a computation.
///
/// Ids increase in creation order, which is the order the scheduler runs
/// computations in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComputationId(u64);

impl ComputationId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ComputationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Flags and hooks for a new computation.
#[derive(Clone, Default)]
pub struct ComputationOptions {
    deep: bool,
    lazy: bool,
    sync: bool,
    user: bool,
    primary: bool,
    before: Option<BeforeHook>,
    label: Option<String>,
    owner: Option<String>,
}

impl ComputationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Depend on everything reachable from the value, not just the value.
    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    /// Evaluate on demand only; notifications just mark the value dirty.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Re-run inside the notifying write instead of being queued.
    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    /// Declared by user code: failures are reported, not returned.
    pub fn user(mut self) -> Self {
        self.user = true;
        self
    }

    /// The main computation of its owner (the render computation). The
    /// scheduler hands primaries that ran to the after-flush hooks.
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn before(mut self, hook: impl Fn(&Runtime) + 'static) -> Self {
        self.before = Some(Rc::new(hook));
        self
    }

    /// Text identifying the computation in diagnostics.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Name of the instance the computation belongs to.
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

struct ComputationInner {
    id: ComputationId,
    label: String,
    owner: Option<String>,
    evaluator: Evaluator,
    callback: Callback,
    before: Option<BeforeHook>,
    deep: bool,
    lazy: bool,
    sync: bool,
    user: bool,
    primary: bool,

    value: RefCell<Value>,
    dirty: Cell<bool>,
    active: Cell<bool>,

    /// Subjects read during the last completed evaluation.
    deps: RefCell<IndexMap<SubjectId, Subject>>,

    /// Subjects read during the evaluation in progress.
    new_deps: RefCell<IndexMap<SubjectId, Subject>>,
}

/// Handle to a computation. Clones share the same computation.
#[derive(Clone)]
pub struct Computation {
    inner: Rc<ComputationInner>,
}

impl Computation {
    /// Create a computation and, unless it is lazy, evaluate it once.
    pub(crate) fn new(
        rt: &Runtime,
        evaluator: Evaluator,
        callback: Callback,
        options: ComputationOptions,
    ) -> Result<Self> {
        let computation = Self::build(evaluator, callback, options);
        if !computation.inner.lazy {
            let value = computation.evaluate(rt)?;
            *computation.inner.value.borrow_mut() = value;
        }
        Ok(computation)
    }

    /// Create a lazy computation. Nothing is evaluated until it is forced.
    pub(crate) fn new_lazy(
        evaluator: Evaluator,
        callback: Callback,
        options: ComputationOptions,
    ) -> Self {
        Self::build(evaluator, callback, options.lazy())
    }

    fn build(evaluator: Evaluator, callback: Callback, options: ComputationOptions) -> Self {
        let id = ComputationId::new();
        Self {
            inner: Rc::new(ComputationInner {
                id,
                label: options
                    .label
                    .unwrap_or_else(|| format!("anonymous#{}", id.raw())),
                owner: options.owner,
                evaluator,
                callback,
                before: options.before,
                deep: options.deep,
                lazy: options.lazy,
                sync: options.sync,
                user: options.user,
                primary: options.primary,
                value: RefCell::new(Value::Null),
                dirty: Cell::new(options.lazy),
                active: Cell::new(true),
                deps: RefCell::new(IndexMap::new()),
                new_deps: RefCell::new(IndexMap::new()),
            }),
        }
    }

    pub fn id(&self) -> ComputationId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn owner(&self) -> Option<&str> {
        self.inner.owner.as_deref()
    }

    /// The value produced by the last run.
    pub fn value(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub fn is_lazy(&self) -> bool {
        self.inner.lazy
    }

    pub fn is_user(&self) -> bool {
        self.inner.user
    }

    pub fn is_primary(&self) -> bool {
        self.inner.primary
    }

    pub fn before(&self) -> Option<BeforeHook> {
        self.inner.before.clone()
    }

    /// Ids of the confirmed dependencies, in the order they were first read.
    pub fn dependency_ids(&self) -> Vec<SubjectId> {
        self.inner.deps.borrow().keys().copied().collect()
    }

    /// Register `subject` as read by the evaluation in progress.
    ///
    /// Subscribes only when the subject was not already a confirmed
    /// dependency, so re-reads across runs never duplicate subscriptions.
    pub fn add_dependency(&self, subject: &Subject) {
        if !self.is_active() {
            return;
        }

        let id = subject.id();
        {
            let mut new_deps = self.inner.new_deps.borrow_mut();
            if new_deps.contains_key(&id) {
                return;
            }
            new_deps.insert(id, subject.clone());
        }

        if !self.inner.deps.borrow().contains_key(&id) {
            subject.subscribe(self);
        }
    }

    /// Drop subjects that were not read again and promote `new_deps`.
    fn cleanup_deps(&self) {
        let stale: SmallVec<[Subject; 8]> = {
            let deps = self.inner.deps.borrow();
            let new_deps = self.inner.new_deps.borrow();
            deps.iter()
                .filter(|(id, _)| !new_deps.contains_key(*id))
                .map(|(_, subject)| subject.clone())
                .collect()
        };

        for subject in stale {
            subject.unsubscribe(self.id());
        }

        let mut deps = self.inner.deps.borrow_mut();
        let mut new_deps = self.inner.new_deps.borrow_mut();
        std::mem::swap(&mut *deps, &mut *new_deps);
        new_deps.clear();
    }

    /// Run the evaluator with this computation active and rebuild the
    /// dependency set from what it read.
    pub fn evaluate(&self, rt: &Runtime) -> Result<Value> {
        let result = {
            let _frame = rt.context().enter(self.clone());
            let result = (self.inner.evaluator)(rt);
            if self.inner.deep {
                if let Ok(value) = &result {
                    traverse(rt, value);
                }
            }
            result
        };
        self.cleanup_deps();

        match result {
            Ok(value) => Ok(value),
            Err(source) => {
                let err = self.error(Phase::Getter, source);
                if self.inner.user {
                    rt.report_error(err);
                    Ok(Value::Null)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// React to a notification from one of the dependencies.
    pub fn update(&self, rt: &Runtime) {
        if self.inner.lazy {
            self.inner.dirty.set(true);
        } else if self.inner.sync {
            if let Err(err) = self.run(rt) {
                rt.report_error(self.error(Phase::SyncUpdate, Box::new(err)));
            }
        } else {
            rt.scheduler().enqueue(rt, self);
        }
    }

    /// Re-evaluate and fire the callback if the value changed.
    ///
    /// Containers and deep computations always fire: their contents may
    /// have changed in place.
    pub fn run(&self, rt: &Runtime) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }

        let value = self.evaluate(rt)?;
        let fire = value.is_container()
            || self.inner.deep
            || !value.same(&self.inner.value.borrow());
        if !fire {
            return Ok(());
        }

        let old = self.inner.value.replace(value.clone());
        match (self.inner.callback)(rt, &value, &old) {
            Ok(()) => Ok(()),
            Err(source) => {
                let err = self.error(Phase::Callback, source);
                if self.inner.user {
                    rt.report_error(err);
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Evaluate now, cache the value and clear the dirty flag.
    pub fn force_evaluate(&self, rt: &Runtime) -> Result<Value> {
        let value = self.evaluate(rt)?;
        *self.inner.value.borrow_mut() = value.clone();
        self.inner.dirty.set(false);
        Ok(value)
    }

    /// Make the active computation depend on everything this one depends on.
    pub fn depend(&self, rt: &Runtime) {
        let deps: SmallVec<[Subject; 8]> = self.inner.deps.borrow().values().cloned().collect();
        for subject in deps {
            subject.record(rt);
        }
    }

    /// Unsubscribe from every dependency and deactivate. Idempotent.
    ///
    /// Subjects read by an evaluation still in progress are already
    /// subscribed, so they are released as well.
    pub fn teardown(&self) {
        if !self.inner.active.replace(false) {
            return;
        }

        let deps: SmallVec<[Subject; 8]> = {
            let mut deps = self.inner.deps.borrow_mut();
            let mut new_deps = self.inner.new_deps.borrow_mut();
            deps.drain(..)
                .chain(new_deps.drain(..))
                .map(|(_, subject)| subject)
                .collect()
        };
        for subject in deps {
            subject.unsubscribe(self.id());
        }

        tracing::trace!(computation = self.id().raw(), label = %self.label(), "teardown");
    }

    fn error(&self, phase: Phase, source: BoxError) -> ReactiveError {
        ReactiveError::Evaluation {
            phase,
            label: self.inner.label.clone(),
            owner: self.inner.owner.clone(),
            source,
        }
    }
}

impl PartialEq for Computation {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Computation {}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("active", &self.is_active())
            .field("dirty", &self.is_dirty())
            .field("deps", &self.inner.deps.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;
    use crate::state::Object;
    use crate::RuntimeConfig;
    use serde_json::json;

    fn observed(rt: &Runtime, json: serde_json::Value) -> Object {
        let value = Value::from(json);
        rt.observe(&value);
        value.as_object().cloned().unwrap()
    }

    fn errors(rt: &Runtime) -> Rc<RefCell<Vec<String>>> {
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        rt.on_error(move |err| sink.borrow_mut().push(err.to_string()));
        errors
    }

    #[test]
    fn ids_increase_in_creation_order() {
        let a = ComputationId::new();
        let b = ComputationId::new();
        assert!(a < b);
    }

    #[test]
    fn conditional_branch_prunes_dependencies() {
        let rt = Runtime::default();
        let state = observed(&rt, json!({ "flag": true, "a": 1, "b": 2 }));

        let source = state.clone();
        let computation = rt
            .computation(
                move |rt| {
                    let branch = if source.get(rt, "flag").as_bool() == Some(true) {
                        "a"
                    } else {
                        "b"
                    };
                    Ok(source.get(rt, branch))
                },
                |_, _, _| Ok(()),
                ComputationOptions::new().sync(),
            )
            .unwrap();

        let flag = state.subject_of("flag").unwrap();
        let a = state.subject_of("a").unwrap();
        let b = state.subject_of("b").unwrap();
        assert_eq!(computation.dependency_ids(), vec![flag.id(), a.id()]);

        state.set(&rt, "flag", Value::from(false));
        assert_eq!(computation.dependency_ids(), vec![flag.id(), b.id()]);
        assert!(!a.has_subscriber(computation.id()));
        assert!(b.has_subscriber(computation.id()));
    }

    #[test]
    fn repeated_reads_subscribe_once() {
        let rt = Runtime::default();
        let state = observed(&rt, json!({ "a": 1 }));

        let source = state.clone();
        let computation = rt
            .computation(
                move |rt| {
                    source.get(rt, "a");
                    Ok(source.get(rt, "a"))
                },
                |_, _, _| Ok(()),
                ComputationOptions::new(),
            )
            .unwrap();

        assert_eq!(computation.dependency_ids().len(), 1);
        assert_eq!(state.subject_of("a").unwrap().subscriber_count(), 1);
    }

    #[test]
    fn lazy_computation_waits_until_forced() {
        let rt = Runtime::default();
        let state = observed(&rt, json!({ "a": 1 }));
        let evaluations = Rc::new(Cell::new(0));

        let source = state.clone();
        let counter = evaluations.clone();
        let computation = rt
            .computation(
                move |rt| {
                    counter.set(counter.get() + 1);
                    Ok(source.get(rt, "a"))
                },
                |_, _, _| Ok(()),
                ComputationOptions::new().lazy(),
            )
            .unwrap();

        assert_eq!(evaluations.get(), 0);
        assert!(computation.is_dirty());

        assert_eq!(computation.force_evaluate(&rt).unwrap(), Value::from(1));
        assert!(!computation.is_dirty());

        state.set(&rt, "a", Value::from(2));
        assert!(computation.is_dirty());
        assert_eq!(evaluations.get(), 1);
        assert_eq!(computation.value(), Value::from(1));
    }

    #[test]
    fn same_primitive_does_not_fire_callback() {
        let rt = Runtime::default();
        let state = observed(&rt, json!({ "a": 1, "b": 1 }));
        let calls = Rc::new(Cell::new(0));

        let source = state.clone();
        let counter = calls.clone();
        let _computation = rt
            .computation(
                move |rt| Ok(Value::from(source.get(rt, "a").as_f64().unwrap_or(0.0) > 0.0)),
                move |_, _, _| {
                    counter.set(counter.get() + 1);
                    Ok(())
                },
                ComputationOptions::new().sync(),
            )
            .unwrap();

        state.set(&rt, "a", Value::from(5));
        assert_eq!(calls.get(), 0);

        state.set(&rt, "a", Value::from(-1));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn deep_computation_always_fires() {
        let rt = Runtime::default();
        let state = observed(&rt, json!({ "a": 1 }));
        let calls = Rc::new(Cell::new(0));

        let source = state.clone();
        let counter = calls.clone();
        let computation = rt
            .computation(
                move |rt| Ok(Value::from(source.get(rt, "a").is_null())),
                move |_, _, _| {
                    counter.set(counter.get() + 1);
                    Ok(())
                },
                ComputationOptions::new().deep(),
            )
            .unwrap();

        computation.run(&rt).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn user_getter_error_is_reported() {
        let rt = Runtime::default();
        let errors = errors(&rt);

        let computation = rt
            .computation(
                |_| Err("boom".into()),
                |_, _, _| Ok(()),
                ComputationOptions::new().user().label("a.b").owner("Card"),
            )
            .unwrap();

        assert_eq!(computation.value(), Value::Null);
        assert_eq!(
            *errors.borrow(),
            vec!["error in getter for watcher \"a.b\" (in Card): boom".to_string()]
        );
    }

    #[test]
    fn internal_getter_error_is_returned() {
        let rt = Runtime::default();
        let errors = errors(&rt);

        let err = rt
            .computation(
                |_| Err("boom".into()),
                |_, _, _| Ok(()),
                ComputationOptions::new().label("render"),
            )
            .unwrap_err();

        assert!(matches!(err, ReactiveError::Evaluation { phase: Phase::Getter, .. }));
        assert!(errors.borrow().is_empty());
    }

    #[test]
    fn user_callback_error_is_reported() {
        let rt = Runtime::default();
        let errors = errors(&rt);
        let state = observed(&rt, json!({ "a": 1 }));

        let source = state.clone();
        let _computation = rt
            .computation(
                move |rt| Ok(source.get(rt, "a")),
                |_, _, _| Err("bad callback".into()),
                ComputationOptions::new().user().sync().label("a"),
            )
            .unwrap();

        state.set(&rt, "a", Value::from(2));
        assert_eq!(errors.borrow().len(), 1);
        assert!(errors.borrow()[0].starts_with("error in callback for watcher \"a\""));
    }

    #[test]
    fn sync_internal_failure_is_reported_as_sync_update() {
        let rt = Runtime::default();
        let errors = errors(&rt);
        let state = observed(&rt, json!({ "a": 1 }));

        let source = state.clone();
        let _computation = rt
            .computation(
                move |rt| Ok(source.get(rt, "a")),
                |_, _, _| Err("bad".into()),
                ComputationOptions::new().sync().label("sync"),
            )
            .unwrap();

        state.set(&rt, "a", Value::from(2));
        assert_eq!(errors.borrow().len(), 1);
        assert!(errors.borrow()[0].starts_with("error in sync update for watcher \"sync\""));
    }

    #[test]
    fn depend_forwards_dependencies_to_outer_computation() {
        let rt = Runtime::default();
        let state = observed(&rt, json!({ "a": 1, "b": 2 }));

        let source = state.clone();
        let inner = rt
            .computation(
                move |rt| {
                    source.get(rt, "a");
                    Ok(source.get(rt, "b"))
                },
                |_, _, _| Ok(()),
                ComputationOptions::new(),
            )
            .unwrap();

        let forwarded = inner.clone();
        let outer = rt
            .computation(
                move |rt| {
                    forwarded.depend(rt);
                    Ok(Value::Null)
                },
                |_, _, _| Ok(()),
                ComputationOptions::new(),
            )
            .unwrap();

        assert_eq!(outer.dependency_ids(), inner.dependency_ids());
    }

    #[test]
    fn teardown_unsubscribes_and_is_idempotent() {
        let rt = Runtime::new(RuntimeConfig::default());
        let state = observed(&rt, json!({ "a": 1 }));
        let calls = Rc::new(Cell::new(0));

        let source = state.clone();
        let counter = calls.clone();
        let computation = rt
            .computation(
                move |rt| Ok(source.get(rt, "a")),
                move |_, _, _| {
                    counter.set(counter.get() + 1);
                    Ok(())
                },
                ComputationOptions::new().sync(),
            )
            .unwrap();

        computation.teardown();
        computation.teardown();

        assert!(!computation.is_active());
        assert!(computation.dependency_ids().is_empty());
        assert_eq!(state.subject_of("a").unwrap().subscriber_count(), 0);

        state.set(&rt, "a", Value::from(2));
        computation.run(&rt).unwrap();
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn teardown_during_own_evaluation_releases_new_reads() {
        let rt = Runtime::default();
        let state = observed(&rt, json!({ "a": 1, "b": 2 }));
        let slot: Rc<RefCell<Option<Computation>>> = Rc::new(RefCell::new(None));

        let source = state.clone();
        let this = slot.clone();
        let computation = rt
            .computation(
                move |rt| {
                    let value = source.get(rt, "a");
                    if let Some(computation) = this.borrow().as_ref() {
                        computation.teardown();
                    }
                    source.get(rt, "b");
                    Ok(value)
                },
                |_, _, _| Ok(()),
                ComputationOptions::new().lazy(),
            )
            .unwrap();
        *slot.borrow_mut() = Some(computation.clone());

        computation.force_evaluate(&rt).unwrap();

        assert!(!computation.is_active());
        assert!(computation.dependency_ids().is_empty());
        assert!(!state.subject_of("a").unwrap().has_subscriber(computation.id()));
        assert!(!state.subject_of("b").unwrap().has_subscriber(computation.id()));
    }
}
