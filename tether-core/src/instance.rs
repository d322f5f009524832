//! Instances
//!
//! An instance bundles what a consuming runtime declares per component:
//! a root state tree, computed values, user watches and one primary render
//! computation, plus lifecycle hooks around re-renders.
//!
//! # Lifecycle
//!
//! 1. [`Instance::new`] observes the state as root state, creates the
//!    computed values (lazy) and the watches, in declaration order.
//!
//! 2. [`Instance::mount`] creates the render computation. It is created
//!    last, so within a flush every watch of the instance runs before it.
//!    Before each scheduled re-render the `before_update` hook runs; after a
//!    flush in which the render computation ran, the `updated` hook runs.
//!
//! 3. [`Instance::dispose`] tears every computation down and releases the
//!    root state.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::{BoxError, Result};
use crate::reactive::{
    Callback, Computation, ComputationOptions, Computed, HookId, Runtime, WatchOptions,
    WatchSource,
};
use crate::state::Value;

/// Derives a value from an instance's state.
pub type DataGetter = Rc<dyn Fn(&Runtime, &Value) -> std::result::Result<Value, BoxError>>;

/// Lifecycle hook.
pub type Hook = Rc<dyn Fn(&Runtime)>;

/// What a declared watch observes.
#[derive(Clone)]
pub enum WatchTarget {
    /// Dotted path from the instance's state.
    Path(String),
    Getter(DataGetter),
}

/// A declared watch.
#[derive(Clone)]
pub struct WatchSpec {
    target: WatchTarget,
    callback: Callback,
    options: WatchOptions,
}

impl WatchSpec {
    pub fn path<C>(path: impl Into<String>, callback: C) -> Self
    where
        C: Fn(&Runtime, &Value, &Value) -> std::result::Result<(), BoxError> + 'static,
    {
        Self {
            target: WatchTarget::Path(path.into()),
            callback: Rc::new(callback),
            options: WatchOptions::new(),
        }
    }

    pub fn getter<G, C>(getter: G, callback: C) -> Self
    where
        G: Fn(&Runtime, &Value) -> std::result::Result<Value, BoxError> + 'static,
        C: Fn(&Runtime, &Value, &Value) -> std::result::Result<(), BoxError> + 'static,
    {
        Self {
            target: WatchTarget::Getter(Rc::new(getter)),
            callback: Rc::new(callback),
            options: WatchOptions::new(),
        }
    }

    pub fn deep(mut self) -> Self {
        self.options = self.options.deep();
        self
    }

    pub fn immediate(mut self) -> Self {
        self.options = self.options.immediate();
        self
    }

    pub fn sync(mut self) -> Self {
        self.options = self.options.sync();
        self
    }
}

/// Declarations for a new instance.
#[derive(Clone, Default)]
pub struct InstanceOptions {
    name: Option<String>,
    data: Value,
    computed: Vec<(String, DataGetter)>,
    watch: Vec<WatchSpec>,
    before_update: Option<Hook>,
    updated: Option<Hook>,
}

impl InstanceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Initial state from JSON.
    pub fn with_json_data(self, json: serde_json::Value) -> Self {
        self.data(Value::from(json))
    }

    pub fn computed<G>(mut self, name: impl Into<String>, getter: G) -> Self
    where
        G: Fn(&Runtime, &Value) -> std::result::Result<Value, BoxError> + 'static,
    {
        self.computed.push((name.into(), Rc::new(getter)));
        self
    }

    pub fn watch(mut self, spec: WatchSpec) -> Self {
        self.watch.push(spec);
        self
    }

    pub fn before_update(mut self, hook: impl Fn(&Runtime) + 'static) -> Self {
        self.before_update = Some(Rc::new(hook));
        self
    }

    pub fn updated(mut self, hook: impl Fn(&Runtime) + 'static) -> Self {
        self.updated = Some(Rc::new(hook));
        self
    }
}

struct InstanceInner {
    name: String,
    data: Value,
    computed: IndexMap<String, Computed>,
    watchers: RefCell<Vec<Computation>>,
    render: RefCell<Option<Computation>>,
    after_flush: Cell<Option<HookId>>,
    before_update: Option<Hook>,
    updated: Option<Hook>,
    mounted: Cell<bool>,
    destroyed: Cell<bool>,
}

impl InstanceInner {
    fn is_live(&self) -> bool {
        self.mounted.get() && !self.destroyed.get()
    }
}

/// A state root with its computed values, watches and render computation.
#[derive(Clone)]
pub struct Instance {
    inner: Rc<InstanceInner>,
}

impl Instance {
    pub fn new(rt: &Runtime, options: InstanceOptions) -> Result<Self> {
        let name = options.name.unwrap_or_else(|| "anonymous".to_string());
        let data = options.data;
        rt.observe_root(&data);

        let computed = options
            .computed
            .into_iter()
            .map(|(key, getter)| {
                let root = data.clone();
                let computed = rt.computed_with(
                    move |rt| getter(rt, &root),
                    ComputationOptions::new().label(key.clone()).owner(name.clone()),
                );
                (key, computed)
            })
            .collect();

        let instance = Self {
            inner: Rc::new(InstanceInner {
                name,
                data,
                computed,
                watchers: RefCell::new(Vec::new()),
                render: RefCell::new(None),
                after_flush: Cell::new(None),
                before_update: options.before_update,
                updated: options.updated,
                mounted: Cell::new(false),
                destroyed: Cell::new(false),
            }),
        };

        for spec in options.watch {
            instance.watch(rt, spec)?;
        }

        tracing::debug!(instance = %instance.inner.name, "created");
        Ok(instance)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The observed root state.
    pub fn data(&self) -> &Value {
        &self.inner.data
    }

    pub fn computed(&self, name: &str) -> Option<&Computed> {
        self.inner.computed.get(name)
    }

    pub fn render_computation(&self) -> Option<Computation> {
        self.inner.render.borrow().clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Add a watch on this instance's state.
    pub fn watch(&self, rt: &Runtime, spec: WatchSpec) -> Result<Computation> {
        let source = match spec.target {
            WatchTarget::Path(path) => WatchSource::path(&self.inner.data, path),
            WatchTarget::Getter(getter) => {
                let root = self.inner.data.clone();
                WatchSource::getter(move |rt| getter(rt, &root))
            }
        };
        let callback = spec.callback;
        let computation = rt.watch(
            source,
            move |rt, new, old| callback(rt, new, old),
            spec.options.owner(self.inner.name.clone()),
        )?;
        self.inner.watchers.borrow_mut().push(computation.clone());
        Ok(computation)
    }

    /// Create the render computation and start reacting to state changes.
    ///
    /// Failures of the render function are returned here and from the flush
    /// that re-runs it.
    pub fn mount<R>(&self, rt: &Runtime, render: R) -> Result<Computation>
    where
        R: Fn(&Runtime, &Value) -> std::result::Result<Value, BoxError> + 'static,
    {
        let weak: Weak<InstanceInner> = Rc::downgrade(&self.inner);
        let before = move |rt: &Runtime| {
            if let Some(inner) = weak.upgrade() {
                if inner.is_live() {
                    if let Some(hook) = &inner.before_update {
                        hook(rt);
                    }
                }
            }
        };

        let root = self.inner.data.clone();
        let render = rt.computation(
            move |rt| render(rt, &root),
            |_, _, _| Ok(()),
            ComputationOptions::new()
                .primary()
                .before(before)
                .label("render")
                .owner(self.inner.name.clone()),
        )?;
        *self.inner.render.borrow_mut() = Some(render.clone());
        self.inner.mounted.set(true);

        let weak = Rc::downgrade(&self.inner);
        let render_id = render.id();
        let hook = rt.on_after_flush(move |rt, ran| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.is_live() && ran.iter().any(|c| c.id() == render_id) {
                if let Some(hook) = &inner.updated {
                    hook(rt);
                }
            }
        });
        self.inner.after_flush.set(Some(hook));

        tracing::debug!(instance = %self.inner.name, "mounted");
        Ok(render)
    }

    /// Tear everything down. Idempotent.
    pub fn dispose(&self, rt: &Runtime) {
        if self.inner.destroyed.replace(true) {
            return;
        }

        if let Some(render) = self.inner.render.borrow_mut().take() {
            render.teardown();
        }
        for watcher in self.inner.watchers.borrow_mut().drain(..) {
            watcher.teardown();
        }
        for computed in self.inner.computed.values() {
            computed.computation().teardown();
        }
        if let Some(hook) = self.inner.after_flush.take() {
            rt.remove_after_flush(hook);
        }
        rt.release_root(&self.inner.data);

        tracing::debug!(instance = %self.inner.name, "disposed");
    }
}
