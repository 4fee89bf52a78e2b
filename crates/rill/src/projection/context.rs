//! Committed-state snapshot handed to resolvers.

use std::any::Any;
use std::collections::HashSet;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Snapshot entry for one dependency; `None` when the dependency has not
/// committed yet.
pub(crate) enum ContextEntry {
    Set(Option<Rc<dyn Any>>),
    Value(Option<Rc<dyn Any>>),
}

/// Snapshot of the last committed state of every dependency of a
/// projection engine, taken right after the delta being resolved was
/// committed.
///
/// Dependencies are heterogeneous, so the typed accessors recover the
/// concrete element type; asking for the wrong kind or the wrong type
/// reports the wiring mismatch as [`Error::InvalidDependencyKind`].
#[derive(Clone)]
pub struct ProjectionContext {
    entries: Rc<IndexMap<Rc<str>, ContextEntry>>,
}

impl ProjectionContext {
    pub(crate) fn new(entries: IndexMap<Rc<str>, ContextEntry>) -> Self {
        Self { entries: Rc::new(entries) }
    }

    /// Committed contents of the collection dependency `name`, or `None`
    /// when it has not committed yet (or is not a dependency at all).
    pub fn set<S: Eq + Hash + 'static>(&self, name: &str) -> Result<Option<Rc<HashSet<S>>>> {
        match self.entries.get(name) {
            None | Some(ContextEntry::Set(None)) => Ok(None),
            Some(ContextEntry::Set(Some(state))) => Rc::clone(state)
                .downcast::<HashSet<S>>()
                .map(Some)
                .map_err(|_| Error::InvalidDependencyKind { name: name.to_owned() }),
            Some(ContextEntry::Value(_)) => {
                Err(Error::InvalidDependencyKind { name: name.to_owned() })
            }
        }
    }

    /// Committed value of the cell dependency `name`, or `None` when it has
    /// not committed yet (or is not a dependency at all).
    pub fn value<V: 'static>(&self, name: &str) -> Result<Option<Rc<V>>> {
        match self.entries.get(name) {
            None | Some(ContextEntry::Value(None)) => Ok(None),
            Some(ContextEntry::Value(Some(value))) => Rc::clone(value)
                .downcast::<V>()
                .map(Some)
                .map_err(|_| Error::InvalidDependencyKind { name: name.to_owned() }),
            Some(ContextEntry::Set(_)) => {
                Err(Error::InvalidDependencyKind { name: name.to_owned() })
            }
        }
    }
}
