//! State Conversion
//!
//! Turns plain objects and lists into observed state. Observing a container
//! attaches an [`Observer`] to it (the container's own subject, used for
//! structural changes) and walks its contents:
//!
//! - every key of an object is converted into a reactive property, whose
//!   value is observed in turn;
//! - every element of a list is observed. Lists are not intercepted per
//!   index; their mutators notify the container subject instead.
//!
//! Observation is idempotent. A container that already carries an observer
//! is returned as is, which also makes cyclic state safe to walk.

use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use super::array::Array;
use super::object::{Object, Property, Slot};
use super::value::Value;
use crate::error::Warning;
use crate::reactive::{Runtime, Subject};

/// Key addressing a property of an object or an element of a list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Index(usize),
    Name(String),
}

impl Key {
    /// The key as a list index. Names that parse as non-negative integers
    /// count as indices.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(index) => Some(*index),
            Key::Name(name) => name.parse().ok(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(index) => write!(f, "{index}"),
            Key::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

struct ObserverInner {
    subject: Subject,
    /// How many times the container was observed as root state.
    root_count: Cell<usize>,
}

/// The wrapper attached to an observed container.
#[derive(Clone)]
pub struct Observer {
    inner: Rc<ObserverInner>,
}

impl Observer {
    pub(crate) fn new() -> Self {
        Self {
            inner: Rc::new(ObserverInner {
                subject: Subject::new(),
                root_count: Cell::new(0),
            }),
        }
    }

    /// The container subject, notified on structural changes.
    pub fn subject(&self) -> &Subject {
        &self.inner.subject
    }

    pub fn root_count(&self) -> usize {
        self.inner.root_count.get()
    }

    pub(crate) fn retain_root(&self) {
        self.inner.root_count.set(self.root_count() + 1);
    }

    pub(crate) fn release_root(&self) {
        self.inner
            .root_count
            .set(self.root_count().saturating_sub(1));
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("subject", &self.subject().id())
            .field("root_count", &self.root_count())
            .finish()
    }
}

/// Observe `value` and return its observer.
///
/// Primitives and raw containers are never observed. A container without an
/// observer is only wrapped while observation is enabled on the runtime.
/// `as_root` marks the container as root state.
pub fn observe(rt: &Runtime, value: &Value, as_root: bool) -> Option<Observer> {
    let observer = match value {
        Value::Object(object) if !object.is_raw() => match object.observer() {
            Some(observer) => observer,
            None if rt.is_observing() => {
                let observer = Observer::new();
                // Attach first: a cycle back to this object sees the observer
                // and stops.
                object.set_observer(observer.clone());
                for key in object.keys_untracked() {
                    define_reactive(rt, object, &key, None, false);
                }
                observer
            }
            None => return None,
        },
        Value::Array(array) if !array.is_raw() => match array.observer() {
            Some(observer) => observer,
            None if rt.is_observing() => {
                let observer = Observer::new();
                array.set_observer(observer.clone());
                for item in array.to_vec_untracked() {
                    observe(rt, &item, false);
                }
                observer
            }
            None => return None,
        },
        _ => return None,
    };

    if as_root {
        observer.retain_root();
    }

    Some(observer)
}

/// Convert `key` of `object` into a reactive property.
///
/// The property keeps the current value unless `value` is given. A key that
/// is already reactive is simply assigned. Getter-only accessors stay
/// read-only. Unless `shallow`, the stored value is observed.
pub fn define_reactive(
    rt: &Runtime,
    object: &Object,
    key: &str,
    value: Option<Value>,
    shallow: bool,
) {
    if matches!(object.slots().get(key), Some(Slot::Reactive(_))) {
        if let Some(value) = value {
            object.set(rt, key, value);
        }
        return;
    }

    let child = {
        let mut slots = object.slots();
        let (current, getter) = match slots.get(key) {
            Some(Slot::Accessor(getter)) => (Value::Null, Some(getter.clone())),
            Some(Slot::Data(existing)) => (value.unwrap_or_else(|| existing.clone()), None),
            _ => (value.unwrap_or_default(), None),
        };
        let child = getter.is_none().then(|| current.clone());
        slots.insert(
            key.to_string(),
            Slot::Reactive(Property::new(current, getter, shallow)),
        );
        child
    };

    if !shallow {
        if let Some(child) = child {
            observe(rt, &child, false);
        }
    }
}

/// Record the container subject of every observed element of `array`,
/// recursing into nested lists.
///
/// Elements are not intercepted per index, so reading a list through a
/// property has to depend on the nested containers explicitly.
pub fn depend_array(rt: &Runtime, array: &Array) {
    let mut seen = HashSet::new();
    depend_items(rt, array, &mut seen);
}

fn depend_items(rt: &Runtime, array: &Array, seen: &mut HashSet<usize>) {
    if !seen.insert(array.addr()) {
        return;
    }
    for item in array.to_vec_untracked() {
        if let Some(observer) = item.observer() {
            observer.subject().record(rt);
        }
        if let Value::Array(nested) = &item {
            depend_items(rt, nested, seen);
        }
    }
}

/// Observe a value written into a reactive property.
pub(crate) fn observe_assigned(rt: &Runtime, key: &str, value: &Value) {
    if observe(rt, value, false).is_some() || !value.is_container() || is_raw(value) {
        return;
    }
    if !rt.is_observing() {
        rt.warn(Warning::ObservationDisabled {
            key: key.to_string(),
        });
    }
}

fn is_raw(value: &Value) -> bool {
    match value {
        Value::Object(object) => object.is_raw(),
        Value::Array(array) => array.is_raw(),
        _ => false,
    }
}

/// Add `key` to `target` so that the new property is reactive, and notify
/// the container.
///
/// - On a list, the key must be an index: the element is replaced (or the
///   list grown) through an intercepted splice.
/// - An existing key is simply assigned.
/// - Unobserved objects receive a plain key.
/// - Root state refuses new reactive keys; the value is stored unobserved
///   and a warning is emitted.
pub fn add_property(rt: &Runtime, target: &Value, key: Key, value: Value) {
    match target {
        Value::Array(array) => match key.as_index() {
            Some(index) => {
                array.pad_untracked(index);
                array.splice(rt, index, 1, vec![value]);
            }
            None => rt.warn(Warning::InvalidArrayKey {
                key: key.to_string(),
            }),
        },
        Value::Object(object) => {
            let name = key.to_string();
            if object.contains_key_untracked(&name) {
                object.set(rt, &name, value);
                return;
            }
            match object.observer() {
                None => object.insert_untracked(name, value),
                Some(observer) if observer.root_count() > 0 => {
                    rt.warn(Warning::UnsafeAddition { key: name.clone() });
                    object.insert_untracked(name, value);
                }
                Some(observer) => {
                    define_reactive(rt, object, &name, Some(value), false);
                    observer.subject().notify(rt);
                }
            }
        }
        _ => rt.warn(Warning::NonContainerTarget {
            key: key.to_string(),
        }),
    }
}

/// Remove `key` from `target` and notify the container.
///
/// Missing keys are a no-op. Root state refuses deletion with a warning.
pub fn delete_property(rt: &Runtime, target: &Value, key: Key) {
    match target {
        Value::Array(array) => match key.as_index() {
            Some(index) => {
                array.splice(rt, index, 1, Vec::new());
            }
            None => rt.warn(Warning::InvalidArrayKey {
                key: key.to_string(),
            }),
        },
        Value::Object(object) => {
            let name = key.to_string();
            let observer = object.observer();
            if observer.as_ref().is_some_and(|o| o.root_count() > 0) {
                rt.warn(Warning::UnsafeDeletion { key: name });
                return;
            }
            if !object.remove_untracked(&name) {
                return;
            }
            if let Some(observer) = observer {
                observer.subject().notify(rt);
            }
        }
        _ => rt.warn(Warning::NonContainerTarget {
            key: key.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ComputationOptions;
    use crate::RuntimeConfig;
    use serde_json::json;
    use std::cell::RefCell;

    fn runtime() -> (Runtime, Rc<RefCell<Vec<Warning>>>) {
        let rt = Runtime::new(RuntimeConfig::default().with_development(true));
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let sink = warnings.clone();
        rt.on_warning(move |w| sink.borrow_mut().push(w.clone()));
        (rt, warnings)
    }

    /// A sync computation over the object's key set; returns its run count.
    fn watch_keys(rt: &Runtime, object: &Object) -> Rc<Cell<usize>> {
        let runs = Rc::new(Cell::new(0));
        let source = object.clone();
        let counter = runs.clone();
        rt.computation(
            move |rt| Ok(Value::from(source.keys(rt).join(","))),
            move |_, _, _| {
                counter.set(counter.get() + 1);
                Ok(())
            },
            ComputationOptions::new().sync(),
        )
        .unwrap();
        runs
    }

    #[test]
    fn observe_is_idempotent() {
        let (rt, _) = runtime();
        let value = Value::from(json!({ "a": [1, { "b": 2 }] }));

        let first = observe(&rt, &value, false).unwrap();
        let second = observe(&rt, &value, false).unwrap();
        assert_eq!(first.subject().id(), second.subject().id());
        assert!(observe(&rt, &Value::from(1), false).is_none());
    }

    #[test]
    fn raw_containers_are_skipped() {
        let (rt, _) = runtime();
        let object = Object::new();
        object.mark_raw();

        assert!(observe(&rt, &Value::Object(object), false).is_none());
    }

    #[test]
    fn disabled_observation_leaves_containers_plain() {
        let (rt, _) = runtime();
        let value = Value::from(json!({ "a": 1 }));

        rt.without_observing(|| assert!(observe(&rt, &value, false).is_none()));
        assert!(value.observer().is_none());
        assert!(observe(&rt, &value, false).is_some());
    }

    #[test]
    fn cyclic_state_is_observed_once() {
        let (rt, _) = runtime();
        let object = Object::new();
        let list = Array::new();
        object.insert_untracked("list", Value::Array(list.clone()));
        list.push_untracked(Value::Object(object.clone()));

        observe(&rt, &Value::Object(object.clone()), false);
        assert!(list.observer().is_some());
        assert!(object.subject_of("list").is_some());
    }

    #[test]
    fn root_count_tracks_root_observation() {
        let (rt, _) = runtime();
        let value = Value::from(json!({}));

        let observer = observe(&rt, &value, true).unwrap();
        observe(&rt, &value, true);
        assert_eq!(observer.root_count(), 2);

        observer.release_root();
        observer.release_root();
        observer.release_root();
        assert_eq!(observer.root_count(), 0);
    }

    #[test]
    fn add_property_notifies_container() {
        let (rt, warnings) = runtime();
        let data = Value::from(json!({ "user": { "name": "ada" } }));
        observe(&rt, &data, false);
        let user = data.as_object().unwrap().get_untracked("user").unwrap();
        let object = user.as_object().unwrap().clone();
        let runs = watch_keys(&rt, &object);

        add_property(&rt, &user, "age".into(), Value::from(json!({ "years": 36 })));

        assert_eq!(runs.get(), 1);
        assert!(object.subject_of("age").is_some());
        assert!(object.get_untracked("age").unwrap().observer().is_some());
        assert!(warnings.borrow().is_empty());
    }

    #[test]
    fn plain_assignment_of_new_key_notifies_nobody() {
        let (rt, _) = runtime();
        let data = Value::from(json!({ "a": 1 }));
        observe(&rt, &data, false);
        let object = data.as_object().unwrap().clone();
        let runs = watch_keys(&rt, &object);

        object.set(&rt, "b", Value::from(2));

        assert_eq!(runs.get(), 0);
        assert!(object.subject_of("b").is_none());
    }

    #[test]
    fn add_property_on_existing_key_assigns() {
        let (rt, _) = runtime();
        let data = Value::from(json!({ "a": 1 }));
        observe(&rt, &data, false);

        add_property(&rt, &data, "a".into(), Value::from(5));
        assert_eq!(
            data.as_object().unwrap().get_untracked("a"),
            Some(Value::from(5))
        );
    }

    #[test]
    fn add_property_on_root_warns_and_stores_plainly() {
        let (rt, warnings) = runtime();
        let data = Value::from(json!({}));
        observe(&rt, &data, true);

        add_property(&rt, &data, "late".into(), Value::from(1));

        let object = data.as_object().unwrap();
        assert_eq!(object.get_untracked("late"), Some(Value::from(1)));
        assert!(object.subject_of("late").is_none());
        assert_eq!(
            *warnings.borrow(),
            vec![Warning::UnsafeAddition {
                key: "late".into()
            }]
        );
    }

    #[test]
    fn add_property_on_list_grows_it() {
        let (rt, warnings) = runtime();
        let data = Value::from(json!([1]));
        observe(&rt, &data, false);

        add_property(&rt, &data, 3.into(), Value::from(4));
        add_property(&rt, &data, "0".into(), Value::from(0));
        add_property(&rt, &data, "x".into(), Value::from(0));

        assert_eq!(data.to_json(), json!([0, null, null, 4]));
        assert_eq!(
            *warnings.borrow(),
            vec![Warning::InvalidArrayKey { key: "x".into() }]
        );
    }

    #[test]
    fn add_property_on_primitive_warns() {
        let (rt, warnings) = runtime();
        add_property(&rt, &Value::from(1), "a".into(), Value::Null);

        assert_eq!(
            *warnings.borrow(),
            vec![Warning::NonContainerTarget { key: "a".into() }]
        );
    }

    #[test]
    fn delete_property_notifies_container() {
        let (rt, _) = runtime();
        let data = Value::from(json!({ "a": 1, "b": 2 }));
        observe(&rt, &data, false);
        let object = data.as_object().unwrap().clone();
        let runs = watch_keys(&rt, &object);

        delete_property(&rt, &data, "missing".into());
        assert_eq!(runs.get(), 0);

        delete_property(&rt, &data, "a".into());
        assert_eq!(runs.get(), 1);
        assert_eq!(object.keys_untracked(), ["b"]);
    }

    #[test]
    fn delete_property_on_root_is_refused() {
        let (rt, warnings) = runtime();
        let data = Value::from(json!({ "a": 1 }));
        observe(&rt, &data, true);

        delete_property(&rt, &data, "a".into());

        assert!(data.as_object().unwrap().contains_key_untracked("a"));
        assert_eq!(
            *warnings.borrow(),
            vec![Warning::UnsafeDeletion { key: "a".into() }]
        );
    }

    #[test]
    fn delete_property_on_list_splices() {
        let (rt, _) = runtime();
        let data = Value::from(json!([1, 2, 3]));
        observe(&rt, &data, false);

        delete_property(&rt, &data, 1.into());
        assert_eq!(data.to_json(), json!([1, 3]));
    }

    #[test]
    fn shallow_property_keeps_written_values_plain() {
        let (rt, _) = runtime();
        let object = Object::new();
        observe(&rt, &Value::Object(object.clone()), false);

        define_reactive(&rt, &object, "raw", Some(Value::from(json!({ "x": 1 }))), true);
        object.set(&rt, "raw", Value::from(json!({ "y": 1 })));

        assert!(object.subject_of("raw").is_some());
        assert!(object.get_untracked("raw").unwrap().observer().is_none());
    }

    #[test]
    fn assigning_while_observation_is_disabled_warns() {
        let (rt, warnings) = runtime();
        let data = Value::from(json!({ "a": null }));
        observe(&rt, &data, false);
        let object = data.as_object().unwrap().clone();

        rt.without_observing(|| object.set(&rt, "a", Value::from(json!({}))));

        assert!(object.get_untracked("a").unwrap().observer().is_none());
        assert_eq!(
            *warnings.borrow(),
            vec![Warning::ObservationDisabled { key: "a".into() }]
        );
    }

    #[test]
    fn list_property_read_depends_on_nested_containers() {
        let (rt, _) = runtime();
        let data = Value::from(json!({ "items": [{ "a": 1 }, [2]] }));
        observe(&rt, &data, false);
        let object = data.as_object().unwrap().clone();

        let source = object.clone();
        let computation = rt
            .computation(
                move |rt| Ok(source.get(rt, "items")),
                |_, _, _| Ok(()),
                ComputationOptions::new(),
            )
            .unwrap();

        // key, the list, its object element, its nested list
        assert_eq!(computation.dependency_ids().len(), 4);
    }
}
