//! Observed Objects
//!
//! An [`Object`] is an ordered string-keyed map of [`Value`]s. Each key holds
//! a slot:
//!
//! - a plain data slot, read and written without interception,
//! - a getter-only accessor (read-only, computed on every read), or
//! - a reactive property: the value plus its own [`Subject`].
//!
//! Once the object is observed every key is converted into a reactive
//! property. [`Object::get`] and [`Object::set`] are the accessor pair: the
//! read records the property's subject against the active computation, the
//! write notifies it.

use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::observer::{self, Observer};
use super::value::Value;
use crate::error::Warning;
use crate::reactive::{Runtime, Subject};

/// A read-only accessor.
pub type Getter = Rc<dyn Fn() -> Value>;

pub(crate) enum Slot {
    Data(Value),
    Accessor(Getter),
    Reactive(Property),
}

pub(crate) struct Property {
    pub(crate) subject: Subject,
    pub(crate) value: Value,
    /// Getter-only properties keep their accessor and refuse writes.
    pub(crate) getter: Option<Getter>,
    /// Shallow properties never observe the values written into them.
    pub(crate) shallow: bool,
}

impl Property {
    pub(crate) fn new(value: Value, getter: Option<Getter>, shallow: bool) -> Self {
        Self {
            subject: Subject::new(),
            value,
            getter,
            shallow,
        }
    }
}

enum Write {
    ReadOnly(Getter),
    Changed(Subject, bool),
}

struct ObjectInner {
    entries: RefCell<IndexMap<String, Slot>>,
    observer: RefCell<Option<Observer>>,
    raw: Cell<bool>,
}

/// Shared handle to an object. Cloning the handle does not copy the object.
#[derive(Clone)]
pub struct Object {
    inner: Rc<ObjectInner>,
}

impl Object {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ObjectInner {
                entries: RefCell::new(IndexMap::new()),
                observer: RefCell::new(None),
                raw: Cell::new(false),
            }),
        }
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    /// Exclude this object from observation for good.
    pub fn mark_raw(&self) {
        self.inner.raw.set(true);
    }

    pub fn is_raw(&self) -> bool {
        self.inner.raw.get()
    }

    pub fn observer(&self) -> Option<Observer> {
        self.inner.observer.borrow().clone()
    }

    pub(crate) fn set_observer(&self, observer: Observer) {
        *self.inner.observer.borrow_mut() = Some(observer);
    }

    pub(crate) fn slots(&self) -> RefMut<'_, IndexMap<String, Slot>> {
        self.inner.entries.borrow_mut()
    }

    /// Read `key`, recording the dependency. Missing keys read as `Null`.
    pub fn get(&self, rt: &Runtime, key: &str) -> Value {
        let (subject, shallow, value) = {
            let entries = self.inner.entries.borrow();
            match entries.get(key) {
                None => return Value::Null,
                Some(Slot::Data(value)) => return value.clone(),
                Some(Slot::Accessor(getter)) => {
                    let getter = getter.clone();
                    drop(entries);
                    return getter();
                }
                Some(Slot::Reactive(property)) => (
                    property.subject.clone(),
                    property.shallow,
                    property.getter.clone().ok_or_else(|| property.value.clone()),
                ),
            }
        };

        // Getters may read other state, so they run with the map released.
        let value = match value {
            Ok(getter) => getter(),
            Err(value) => value,
        };

        if rt.is_tracking() {
            subject.record(rt);
            if !shallow {
                if let Some(child) = value.observer() {
                    child.subject().record(rt);
                    if let Value::Array(array) = &value {
                        observer::depend_array(rt, array);
                    }
                }
            }
        }

        value
    }

    /// Assign `key`.
    ///
    /// Reactive properties compare, observe the new value and notify; an
    /// unchanged value (NaN included) is a no-op. Plain keys and new keys
    /// are written without interception: adding a key this way notifies
    /// nobody, use [`Runtime::add_property`] for that.
    pub fn set(&self, rt: &Runtime, key: &str, value: Value) {
        let write = {
            let mut entries = self.inner.entries.borrow_mut();
            match entries.get_mut(key) {
                Some(Slot::Data(slot)) => {
                    *slot = value;
                    return;
                }
                Some(Slot::Accessor(getter)) => Write::ReadOnly(getter.clone()),
                Some(Slot::Reactive(property)) => match &property.getter {
                    Some(getter) => Write::ReadOnly(getter.clone()),
                    None if property.value.same(&value) => return,
                    None => {
                        property.value = value.clone();
                        Write::Changed(property.subject.clone(), property.shallow)
                    }
                },
                None => {
                    entries.insert(key.to_string(), Slot::Data(value));
                    return;
                }
            }
        };

        match write {
            Write::ReadOnly(getter) => {
                if !getter().same(&value) {
                    rt.warn(Warning::ReadOnlyWrite {
                        key: key.to_string(),
                    });
                }
            }
            Write::Changed(subject, shallow) => {
                if !shallow {
                    observer::observe_assigned(rt, key, &value);
                }
                subject.notify(rt);
            }
        }
    }

    /// Keys in insertion order, recording a dependency on the whole object.
    pub fn keys(&self, rt: &Runtime) -> Vec<String> {
        self.depend(rt);
        self.keys_untracked()
    }

    pub fn len(&self, rt: &Runtime) -> usize {
        self.depend(rt);
        self.inner.entries.borrow().len()
    }

    pub fn is_empty(&self, rt: &Runtime) -> bool {
        self.len(rt) == 0
    }

    pub fn contains_key(&self, rt: &Runtime, key: &str) -> bool {
        self.depend(rt);
        self.contains_key_untracked(key)
    }

    /// Record a dependency on the object's structure (key set).
    pub fn depend(&self, rt: &Runtime) {
        if let Some(observer) = self.observer() {
            observer.subject().record(rt);
        }
    }

    /// The subject behind a reactive property.
    pub fn subject_of(&self, key: &str) -> Option<Subject> {
        match self.inner.entries.borrow().get(key) {
            Some(Slot::Reactive(property)) => Some(property.subject.clone()),
            _ => None,
        }
    }

    /// Read without recording anything.
    pub fn get_untracked(&self, key: &str) -> Option<Value> {
        let entries = self.inner.entries.borrow();
        let getter = match entries.get(key)? {
            Slot::Data(value) => return Some(value.clone()),
            Slot::Reactive(property) if property.getter.is_none() => {
                return Some(property.value.clone())
            }
            Slot::Reactive(property) => property.getter.clone()?,
            Slot::Accessor(getter) => getter.clone(),
        };
        drop(entries);
        Some(getter())
    }

    pub fn keys_untracked(&self) -> Vec<String> {
        self.inner.entries.borrow().keys().cloned().collect()
    }

    pub fn contains_key_untracked(&self, key: &str) -> bool {
        self.inner.entries.borrow().contains_key(key)
    }

    pub fn entries_untracked(&self) -> Vec<(String, Value)> {
        self.keys_untracked()
            .into_iter()
            .filter_map(|key| {
                let value = self.get_untracked(&key)?;
                Some((key, value))
            })
            .collect()
    }

    /// Store `value` without interception. A reactive property keeps its
    /// subject but nobody is notified.
    pub fn insert_untracked(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let mut entries = self.inner.entries.borrow_mut();
        match entries.get_mut(&key) {
            Some(Slot::Reactive(property)) if property.getter.is_none() => property.value = value,
            _ => {
                entries.insert(key, Slot::Data(value));
            }
        }
    }

    pub(crate) fn remove_untracked(&self, key: &str) -> bool {
        self.inner.entries.borrow_mut().shift_remove(key).is_some()
    }

    /// Install a getter-only accessor. Observation keeps it read-only.
    pub fn define_getter(&self, key: impl Into<String>, getter: impl Fn() -> Value + 'static) {
        self.inner
            .entries
            .borrow_mut()
            .insert(key.into(), Slot::Accessor(Rc::new(getter)));
    }

    fn current_untracked(slot: &Slot) -> Option<Value> {
        match slot {
            Slot::Data(value) => Some(value.clone()),
            Slot::Reactive(property) if property.getter.is_none() => Some(property.value.clone()),
            _ => None,
        }
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let object = Object::new();
        for (key, value) in iter {
            object.insert_untracked(key, value);
        }
        object
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.inner.entries.borrow();
        let mut map = f.debug_map();
        for (key, slot) in entries.iter() {
            match Self::current_untracked(slot) {
                Some(value) => map.entry(key, &value),
                None => map.entry(key, &"<getter>"),
            };
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ComputationOptions;
    use serde_json::json;
    use std::cell::RefCell;

    fn observed(json: serde_json::Value) -> (Runtime, Object) {
        let rt = Runtime::new(Default::default());
        let value = Value::from(json);
        rt.observe(&value);
        let object = value.as_object().cloned().unwrap();
        (rt, object)
    }

    #[test]
    fn plain_object_reads_and_writes() {
        let rt = Runtime::default();
        let object: Object = [("a", Value::from(1))].into_iter().collect();

        assert_eq!(object.get(&rt, "a"), Value::from(1));
        object.set(&rt, "a", Value::from(2));
        object.set(&rt, "b", Value::from(3));
        assert_eq!(object.get_untracked("a"), Some(Value::from(2)));
        assert_eq!(object.keys_untracked(), ["a", "b"]);
        assert!(object.subject_of("a").is_none());
    }

    #[test]
    fn observing_converts_every_key() {
        let (_rt, object) = observed(json!({ "a": 1, "b": { "c": 2 } }));

        assert!(object.subject_of("a").is_some());
        assert!(object.subject_of("b").is_some());
        let nested = object.get_untracked("b").unwrap();
        assert!(nested.observer().is_some());
        assert!(nested.as_object().unwrap().subject_of("c").is_some());
    }

    #[test]
    fn reading_records_key_and_child_container() {
        let (rt, object) = observed(json!({ "a": 1, "b": { "c": 2 } }));

        let source = object.clone();
        let computation = rt
            .computation(
                move |rt| Ok(source.get(rt, "b")),
                |_, _, _| Ok(()),
                ComputationOptions::new(),
            )
            .unwrap();

        let b = object.get_untracked("b").unwrap();
        let expected = vec![
            object.subject_of("b").unwrap().id(),
            b.observer().unwrap().subject().id(),
        ];
        assert_eq!(computation.dependency_ids(), expected);
    }

    #[test]
    fn write_notifies_only_on_change() {
        let (rt, object) = observed(json!({ "a": 1, "n": null }));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let source = object.clone();
        let log = seen.clone();
        let _watch = rt
            .computation(
                move |rt| Ok(source.get(rt, "a")),
                move |_, new, old| {
                    log.borrow_mut().push((new.clone(), old.clone()));
                    Ok(())
                },
                ComputationOptions::new().sync(),
            )
            .unwrap();

        object.set(&rt, "a", Value::from(1));
        assert!(seen.borrow().is_empty());

        object.set(&rt, "a", Value::from(2));
        assert_eq!(*seen.borrow(), vec![(Value::from(2), Value::from(1))]);
    }

    #[test]
    fn nan_over_nan_does_not_notify() {
        let (rt, object) = observed(json!({ "x": 0 }));
        object.set(&rt, "x", Value::from(f64::NAN));

        let runs = Rc::new(Cell::new(0));
        let source = object.clone();
        let counter = runs.clone();
        let _watch = rt
            .computation(
                move |rt| {
                    counter.set(counter.get() + 1);
                    Ok(source.get(rt, "x"))
                },
                |_, _, _| Ok(()),
                ComputationOptions::new().sync(),
            )
            .unwrap();

        object.set(&rt, "x", Value::from(f64::NAN));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn written_containers_are_observed() {
        let (rt, object) = observed(json!({ "a": null }));

        object.set(&rt, "a", Value::from(json!({ "deep": [1] })));
        let a = object.get_untracked("a").unwrap();
        assert!(a.observer().is_some());
        let deep = a.as_object().unwrap().get_untracked("deep").unwrap();
        assert!(deep.observer().is_some());
    }

    #[test]
    fn getter_only_property_is_read_only() {
        let rt = Runtime::new(crate::RuntimeConfig::default().with_development(true));
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let sink = warnings.clone();
        rt.on_warning(move |w| sink.borrow_mut().push(w.clone()));

        let object = Object::new();
        object.define_getter("answer", || Value::from(42));
        rt.observe(&Value::Object(object.clone()));

        assert_eq!(object.get(&rt, "answer"), Value::from(42));
        object.set(&rt, "answer", Value::from(7));
        assert_eq!(object.get(&rt, "answer"), Value::from(42));
        assert_eq!(
            *warnings.borrow(),
            vec![Warning::ReadOnlyWrite {
                key: "answer".into()
            }]
        );
    }

    #[test]
    fn structural_reads_depend_on_container() {
        let (rt, object) = observed(json!({ "a": 1 }));

        let source = object.clone();
        let computation = rt
            .computation(
                move |rt| Ok(Value::from(source.keys(rt).len())),
                |_, _, _| Ok(()),
                ComputationOptions::new(),
            )
            .unwrap();

        assert_eq!(
            computation.dependency_ids(),
            vec![object.observer().unwrap().subject().id()]
        );
    }
}
