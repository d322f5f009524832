//! Observable State
//!
//! The state model the runtime observes: a tree of [`Value`]s whose objects
//! and lists are shared, interior-mutable handles.
//!
//! Plain containers behave like ordinary maps and vectors. Once observed
//! (see [`observe`]), every object key becomes a reactive property with its
//! own subject, and every container gains an [`Observer`] whose subject
//! stands for the container's structure. Reads made through the tracked
//! accessors register dependencies on the active computation; writes made
//! through them notify.

mod array;
mod object;
mod observer;
mod value;

pub use array::Array;
pub use object::{Getter, Object};
pub use observer::{
    add_property, define_reactive, delete_property, depend_array, observe, Key, Observer,
};
pub use value::Value;
