//! Observed Lists
//!
//! Element access inside a list is not intercepted per index. Instead, every
//! mutating operation goes through [`Array`]'s own methods, which observe
//! the inserted elements and notify the list's container subject once the
//! mutation is done. Tracked reads record that same container subject, so a
//! computation that reads any element depends on the whole list.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use super::observer::{self, Observer};
use super::value::Value;
use crate::reactive::Runtime;

struct ArrayInner {
    items: RefCell<Vec<Value>>,
    observer: RefCell<Option<Observer>>,
    raw: Cell<bool>,
}

/// Shared handle to a list. Cloning the handle does not copy the list.
#[derive(Clone)]
pub struct Array {
    inner: Rc<ArrayInner>,
}

impl Array {
    pub fn new() -> Self {
        Vec::new().into()
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    /// Exclude this list from observation for good.
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

    /// Record a dependency on the whole list.
    pub fn depend(&self, rt: &Runtime) {
        if let Some(observer) = self.observer() {
            observer.subject().record(rt);
        }
    }

    pub fn get(&self, rt: &Runtime, index: usize) -> Value {
        self.depend(rt);
        self.get_untracked(index).unwrap_or_default()
    }

    pub fn len(&self, rt: &Runtime) -> usize {
        self.depend(rt);
        self.len_untracked()
    }

    pub fn is_empty(&self, rt: &Runtime) -> bool {
        self.len(rt) == 0
    }

    pub fn to_vec(&self, rt: &Runtime) -> Vec<Value> {
        self.depend(rt);
        self.to_vec_untracked()
    }

    pub fn get_untracked(&self, index: usize) -> Option<Value> {
        self.inner.items.borrow().get(index).cloned()
    }

    pub fn len_untracked(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn to_vec_untracked(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    /// Append without interception.
    pub fn push_untracked(&self, value: Value) {
        self.inner.items.borrow_mut().push(value);
    }

    /// Grow to at least `len` elements, padding with `Null`, without
    /// interception.
    pub(crate) fn pad_untracked(&self, len: usize) {
        let mut items = self.inner.items.borrow_mut();
        if items.len() < len {
            items.resize(len, Value::Null);
        }
    }

    pub fn push(&self, rt: &Runtime, value: Value) {
        let item = value.clone();
        self.intercept(rt, &[value], move |items| items.push(item))
    }

    pub fn extend(&self, rt: &Runtime, values: impl IntoIterator<Item = Value>) {
        let values: Vec<Value> = values.into_iter().collect();
        let items_to_add = values.clone();
        self.intercept(rt, &values, move |items| items.extend(items_to_add))
    }

    pub fn pop(&self, rt: &Runtime) -> Option<Value> {
        self.intercept(rt, &[], |items| items.pop())
    }

    pub fn shift(&self, rt: &Runtime) -> Option<Value> {
        self.intercept(rt, &[], |items| {
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        })
    }

    pub fn unshift(&self, rt: &Runtime, value: Value) {
        let item = value.clone();
        self.intercept(rt, &[value], move |items| items.insert(0, item))
    }

    /// Insert at `index`, clamped to the list's length.
    pub fn insert(&self, rt: &Runtime, index: usize, value: Value) {
        let item = value.clone();
        self.intercept(rt, &[value], move |items| {
            let index = index.min(items.len());
            items.insert(index, item)
        })
    }

    pub fn remove(&self, rt: &Runtime, index: usize) -> Option<Value> {
        self.intercept(rt, &[], |items| {
            if index < items.len() {
                Some(items.remove(index))
            } else {
                None
            }
        })
    }

    /// Remove `delete_count` elements at `start` and insert `values` in their
    /// place. Both bounds are clamped. Returns the removed elements.
    pub fn splice(
        &self,
        rt: &Runtime,
        start: usize,
        delete_count: usize,
        values: Vec<Value>,
    ) -> Vec<Value> {
        let replacement = values.clone();
        self.intercept(rt, &values, move |items| {
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items.splice(start..end, replacement).collect()
        })
    }

    pub fn truncate(&self, rt: &Runtime, len: usize) {
        self.intercept(rt, &[], |items| items.truncate(len))
    }

    /// Sort with `compare`. The comparator may read the list; it sees the
    /// order from before the sort.
    pub fn sort_by(&self, rt: &Runtime, compare: impl FnMut(&Value, &Value) -> Ordering) {
        let mut sorted = self.to_vec_untracked();
        sorted.sort_by(compare);
        self.intercept(rt, &[], move |items| *items = sorted)
    }

    pub fn reverse(&self, rt: &Runtime) {
        self.intercept(rt, &[], |items| items.reverse())
    }

    /// Apply `mutation`, then, if the list is observed, observe `inserted`
    /// and notify the container subject. Notifies even when the mutation
    /// changed nothing.
    fn intercept<R>(
        &self,
        rt: &Runtime,
        inserted: &[Value],
        mutation: impl FnOnce(&mut Vec<Value>) -> R,
    ) -> R {
        let result = mutation(&mut self.inner.items.borrow_mut());

        if let Some(observer) = self.observer() {
            for value in inserted {
                observer::observe(rt, value, false);
            }
            observer.subject().notify(rt);
        }

        result
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self {
        Self {
            inner: Rc::new(ArrayInner {
                items: RefCell::new(items),
                observer: RefCell::new(None),
                raw: Cell::new(false),
            }),
        }
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.items.borrow().iter()).finish()
    }
}
