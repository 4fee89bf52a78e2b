//! Reactive collection: a set container with granular, batch, overwrite and
//! transactional mutation.
//!
//! Every mutation path funnels through the same two-buffer transaction
//! algebra: additions and removals are staged in disjoint pending sets, and
//! closing computes the net effect against the committed storage, emitting
//! at most one delta. Granular operations outside a transaction settle
//! immediately.
//!
//! Collections produced by combinators are read-only from the outside;
//! their state is updated through a privileged crate-internal path.

use std::cell::RefCell;
use std::collections::HashSet;
use std::hash::Hash;
use std::rc::Rc;

use crate::change::{SetDelta, SetInput};
use crate::error::{Error, Result};
use crate::signal::{SignalController, SignalObserver};

/// Constructor options for [`Collection`].
pub struct CollectionOptions<T> {
    pub values: Vec<T>,
    pub label: Option<String>,
}

impl<T> Default for CollectionOptions<T> {
    fn default() -> Self {
        Self { values: Vec::new(), label: None }
    }
}

impl<T> CollectionOptions<T> {
    pub fn values(mut self, values: impl IntoIterator<Item = T>) -> Self {
        self.values = values.into_iter().collect();
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

struct SetState<T> {
    items: HashSet<T>,
    /// Staged additions; disjoint from `pending_removed`.
    pending_added: HashSet<T>,
    /// Staged removals; disjoint from `pending_added`.
    pending_removed: HashSet<T>,
    in_transaction: bool,
    reactive: bool,
}

impl<T: Clone + Eq + Hash> SetState<T> {
    fn stage_add(&mut self, value: T) {
        self.pending_removed.remove(&value);
        self.pending_added.insert(value);
    }

    fn stage_remove(&mut self, value: T) {
        self.pending_added.remove(&value);
        self.pending_removed.insert(value);
    }

    fn stage_clear(&mut self) {
        self.pending_removed = self.items.clone();
        self.pending_added.clear();
    }

    fn stage_overwrite(&mut self, replacement: HashSet<T>) {
        self.pending_removed = self.items.difference(&replacement).cloned().collect();
        self.pending_added = replacement;
    }

    fn cancel(&mut self) {
        self.pending_added.clear();
        self.pending_removed.clear();
        self.in_transaction = false;
    }

    /// Computes the net effect of the staged buffers against storage,
    /// applies it in place, and returns the delta to emit (if any).
    fn settle(&mut self) -> Option<Rc<SetDelta<T>>> {
        self.in_transaction = false;
        let staged_added = std::mem::take(&mut self.pending_added);
        let staged_removed = std::mem::take(&mut self.pending_removed);

        let increment: HashSet<T> =
            staged_added.into_iter().filter(|value| !self.items.contains(value)).collect();
        let decrement: HashSet<T> =
            staged_removed.into_iter().filter(|value| self.items.contains(value)).collect();

        for value in &decrement {
            self.items.remove(value);
        }
        self.items.extend(increment.iter().cloned());

        SetDelta::from_parts(increment, decrement).map(Rc::new)
    }
}

struct SetShared<T> {
    state: RefCell<SetState<T>>,
    on_change: SignalController<Rc<SetDelta<T>>>,
    on_switch: SignalController<bool>,
    label: Option<Rc<str>>,
    readonly: bool,
}

/// Reactive container for a set of unique values.
///
/// Cheap to clone; clones share the same underlying collection.
pub struct Collection<T> {
    shared: Rc<SetShared<T>>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self { shared: Rc::clone(&self.shared) }
    }
}

impl<T: Clone + Eq + Hash + 'static> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Eq + Hash + 'static> Collection<T> {
    pub fn new() -> Self {
        Self::with_options(CollectionOptions::default())
    }

    pub fn from_values(values: impl IntoIterator<Item = T>) -> Self {
        Self::with_options(CollectionOptions::default().values(values))
    }

    pub fn with_options(options: CollectionOptions<T>) -> Self {
        Self::build(options, false)
    }

    /// Read-only collection owned by a combinator; mutated only through the
    /// crate-internal path.
    pub(crate) fn new_readonly(label: Option<Rc<str>>) -> Self {
        let mut options = CollectionOptions::default();
        options.label = label.map(|l| l.to_string());
        Self::build(options, true)
    }

    fn build(options: CollectionOptions<T>, readonly: bool) -> Self {
        Self {
            shared: Rc::new(SetShared {
                state: RefCell::new(SetState {
                    items: options.values.into_iter().collect(),
                    pending_added: HashSet::new(),
                    pending_removed: HashSet::new(),
                    in_transaction: false,
                    reactive: true,
                }),
                on_change: SignalController::new(),
                on_switch: SignalController::new(),
                label: options.label.map(Into::into),
                readonly,
            }),
        }
    }

    // --- Reads ---

    pub fn contains(&self, value: &T) -> bool {
        self.shared.state.borrow().items.contains(value)
    }

    pub fn len(&self) -> usize {
        self.shared.state.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.borrow().items.is_empty()
    }

    /// Snapshot of the current contents.
    pub fn to_set(&self) -> HashSet<T> {
        self.shared.state.borrow().items.clone()
    }

    pub fn is_readonly(&self) -> bool {
        self.shared.readonly
    }

    pub fn is_reactive(&self) -> bool {
        self.shared.state.borrow().reactive
    }

    pub fn in_transaction(&self) -> bool {
        self.shared.state.borrow().in_transaction
    }

    pub fn label(&self) -> Option<&str> {
        self.shared.label.as_deref()
    }

    /// Whether two handles refer to the same collection.
    pub fn same_collection(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    /// Emitted once per committed change.
    pub fn on_change(&self) -> SignalObserver<Rc<SetDelta<T>>> {
        self.shared.on_change.observer()
    }

    /// Emitted once per reactivity transition, with the new state.
    pub fn on_switch(&self) -> SignalObserver<bool> {
        self.shared.on_switch.observer()
    }

    // --- Mutation ---

    /// Adds a single element. Idempotent; emits immediately unless a
    /// transaction is open.
    pub fn insert(&self, value: T) -> Result<()> {
        self.mutate(|state| state.stage_add(value))
    }

    /// Removes a single element. Removing an absent element emits nothing.
    pub fn remove(&self, value: &T) -> Result<()> {
        let value = value.clone();
        self.mutate(|state| state.stage_remove(value))
    }

    /// Removes every element.
    pub fn clear(&self) -> Result<()> {
        self.mutate(SetState::stage_clear)
    }

    /// Adds many elements, emitting at most one delta.
    pub fn batch_insert(&self, values: impl IntoIterator<Item = T>) -> Result<()> {
        self.mutate(|state| {
            for value in values {
                state.stage_add(value);
            }
        })
    }

    /// Removes many elements, emitting at most one delta.
    pub fn batch_remove(&self, values: impl IntoIterator<Item = T>) -> Result<()> {
        self.mutate(|state| {
            for value in values {
                state.stage_remove(value);
            }
        })
    }

    /// Replaces the contents, emitting at most one delta describing the
    /// difference.
    pub fn overwrite(&self, values: impl IntoIterator<Item = T>) -> Result<()> {
        let replacement: HashSet<T> = values.into_iter().collect();
        self.mutate(|state| state.stage_overwrite(replacement))
    }

    /// Applies a delta or overwrite payload inside an implicit transaction,
    /// so a single delta is emitted.
    pub fn apply(&self, input: SetInput<T>) -> Result<()> {
        self.guard_mutable()?;
        self.apply_unchecked(input);
        Ok(())
    }

    /// Opens a transaction; mutations stage until close. Re-entrant open is
    /// a no-op.
    pub fn open_transaction(&self) -> Result<()> {
        self.guard_mutable()?;
        self.shared.state.borrow_mut().in_transaction = true;
        Ok(())
    }

    /// Closes the transaction, emitting one delta iff the net effect is
    /// non-empty.
    pub fn close_transaction(&self) -> Result<()> {
        self.guard_mutable()?;
        let delta = {
            let mut state = self.shared.state.borrow_mut();
            if !state.in_transaction {
                return Ok(());
            }
            state.settle()
        };
        if let Some(delta) = delta {
            self.shared.on_change.emit(&delta);
        }
        Ok(())
    }

    /// Discards both staging buffers without committing. No emission.
    pub fn cancel_transaction(&self) -> Result<()> {
        self.guard_mutable()?;
        self.shared.state.borrow_mut().cancel();
        Ok(())
    }

    /// Turns reactivity off: cancels any open transaction, clears storage
    /// silently, and rejects further mutation until re-enabled.
    pub fn disable_reactivity(&self) -> Result<()> {
        if self.shared.readonly {
            return Err(Error::ReadonlyAccess);
        }
        self.deactivate(false);
        Ok(())
    }

    /// Turns reactivity back on.
    pub fn enable_reactivity(&self) -> Result<()> {
        if self.shared.readonly {
            return Err(Error::ReadonlyAccess);
        }
        self.reactivate();
        Ok(())
    }

    // --- Crate-internal (privileged) paths ---

    /// Applies a payload bypassing the read-only gate. Combinators use this
    /// to update their result collections.
    pub(crate) fn apply_internal(&self, input: SetInput<T>) {
        debug_assert!(self.shared.state.borrow().reactive);
        self.apply_unchecked(input);
    }

    /// Drops out of the reactive state: cancels staging, emits one switch,
    /// then clears storage. With `emit_clear_delta` the clear is announced
    /// to delta observers (combination results); otherwise it is silent
    /// (leaf collections).
    pub(crate) fn deactivate(&self, emit_clear_delta: bool) {
        {
            let mut state = self.shared.state.borrow_mut();
            if !state.reactive {
                return;
            }
            state.cancel();
            state.reactive = false;
        }
        self.announce_switch(false);

        let delta = {
            let mut state = self.shared.state.borrow_mut();
            let removed = std::mem::take(&mut state.items);
            if emit_clear_delta { SetDelta::of_decrement(removed).map(Rc::new) } else { None }
        };
        if let Some(delta) = delta {
            self.shared.on_change.emit(&delta);
        }
    }

    /// Re-enters the reactive state. Storage stays empty; whoever owns the
    /// collection repopulates it.
    pub(crate) fn reactivate(&self) {
        if self.begin_reactivation() {
            self.announce_switch(true);
        }
    }

    /// Flips the reactive flag back on without announcing it. Returns
    /// whether a transition happened. Combinators use this to rebuild their
    /// result before the switch goes out.
    pub(crate) fn begin_reactivation(&self) -> bool {
        let mut state = self.shared.state.borrow_mut();
        if state.reactive {
            return false;
        }
        state.reactive = true;
        true
    }

    /// Emits the switch signal for a transition already performed.
    pub(crate) fn announce_switch(&self, enabled: bool) {
        log::trace!(
            "collection{} reactivity {}",
            self.label_suffix(),
            if enabled { "enabled" } else { "disabled" }
        );
        self.shared.on_switch.emit(&enabled);
    }

    // --- Internals ---

    fn guard_mutable(&self) -> Result<()> {
        if self.shared.readonly {
            return Err(Error::ReadonlyAccess);
        }
        if !self.shared.state.borrow().reactive {
            return Err(Error::ReactivityDisabled);
        }
        Ok(())
    }

    /// Stages through `f`; settles and emits immediately unless an explicit
    /// transaction is open.
    fn mutate(&self, f: impl FnOnce(&mut SetState<T>)) -> Result<()> {
        self.guard_mutable()?;
        let delta = {
            let mut state = self.shared.state.borrow_mut();
            f(&mut state);
            if state.in_transaction {
                return Ok(());
            }
            state.settle()
        };
        if let Some(delta) = delta {
            self.shared.on_change.emit(&delta);
        }
        Ok(())
    }

    fn apply_unchecked(&self, input: SetInput<T>) {
        let delta = {
            let mut state = self.shared.state.borrow_mut();
            match input {
                SetInput::Delta(delta) => {
                    if let Some(decrement) = delta.decrement {
                        for value in decrement {
                            state.stage_remove(value);
                        }
                    }
                    if let Some(increment) = delta.increment {
                        for value in increment {
                            state.stage_add(value);
                        }
                    }
                }
                SetInput::Overwrite(overwrite) => state.stage_overwrite(overwrite.overwrite),
            }
            if state.in_transaction {
                return;
            }
            state.settle()
        };
        if let Some(delta) = delta {
            self.shared.on_change.emit(&delta);
        }
    }

    fn label_suffix(&self) -> String {
        match &self.shared.label {
            Some(label) => format!(" `{label}`"),
            None => String::new(),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("label", &self.shared.label)
            .field("readonly", &self.shared.readonly)
            .field("items", &self.shared.state.borrow().items)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::SetOverwrite;
    use std::cell::RefCell as StdRefCell;

    fn set<const N: usize>(values: [u32; N]) -> HashSet<u32> {
        values.into_iter().collect()
    }

    fn recorded(collection: &Collection<u32>) -> Rc<StdRefCell<Vec<SetDelta<u32>>>> {
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _id = collection.on_change().subscribe(move |delta: &Rc<SetDelta<u32>>| {
            sink.borrow_mut().push((**delta).clone());
        });
        seen
    }

    #[test]
    fn insert_is_idempotent() {
        let collection = Collection::new();
        let seen = recorded(&collection);

        collection.insert(1).unwrap();
        collection.insert(1).unwrap();

        assert_eq!(collection.to_set(), set([1]));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn removing_an_absent_element_emits_nothing() {
        let collection = Collection::from_values([1u32]);
        let seen = recorded(&collection);

        collection.remove(&2).unwrap();
        assert!(seen.borrow().is_empty());

        collection.remove(&1).unwrap();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn batch_insert_matches_repeated_insert_with_one_delta() {
        let batched = Collection::new();
        let granular = Collection::new();
        let batched_seen = recorded(&batched);
        let granular_seen = recorded(&granular);

        batched.batch_insert([1, 2, 3]).unwrap();
        for value in [1, 2, 3] {
            granular.insert(value).unwrap();
        }

        assert_eq!(batched.to_set(), granular.to_set());
        assert_eq!(batched_seen.borrow().len(), 1);
        assert_eq!(granular_seen.borrow().len(), 3);

        let batched_added: HashSet<u32> =
            batched_seen.borrow().iter().flat_map(|d| d.added().copied().collect::<Vec<_>>()).collect();
        let granular_added: HashSet<u32> =
            granular_seen.borrow().iter().flat_map(|d| d.added().copied().collect::<Vec<_>>()).collect();
        assert_eq!(batched_added, granular_added);
    }

    #[test]
    fn second_identical_overwrite_emits_nothing() {
        let collection = Collection::from_values([1u32, 2]);
        let seen = recorded(&collection);

        collection.overwrite([2, 3]).unwrap();
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].increment, Some(set([3])));
        assert_eq!(seen.borrow()[0].decrement, Some(set([1])));

        collection.overwrite([2, 3]).unwrap();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn transaction_coalesces_into_one_net_delta() {
        let collection: Collection<&'static str> = Collection::new();
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _id = collection.on_change().subscribe(move |delta: &Rc<SetDelta<&'static str>>| {
            sink.borrow_mut().push((**delta).clone());
        });

        collection.open_transaction().unwrap();
        collection.insert("a").unwrap();
        collection.insert("b").unwrap();
        collection.remove(&"a").unwrap();
        collection.close_transaction().unwrap();

        assert_eq!(seen.borrow().len(), 1);
        let delta = seen.borrow()[0].clone();
        assert_eq!(delta.increment, Some(["b"].into_iter().collect()));
        assert_eq!(delta.decrement, None);
    }

    #[test]
    fn transaction_net_delta_never_overlaps() {
        let collection = Collection::from_values([1u32, 2, 3]);
        let seen = recorded(&collection);
        let old = collection.to_set();

        collection.open_transaction().unwrap();
        collection.remove(&1).unwrap();
        collection.insert(1).unwrap();
        collection.insert(4).unwrap();
        collection.remove(&2).unwrap();
        collection.close_transaction().unwrap();

        let new = collection.to_set();
        assert_eq!(new, set([1, 3, 4]));
        assert_eq!(seen.borrow().len(), 1);
        let delta = seen.borrow()[0].clone();
        let increment = delta.increment.clone().unwrap_or_default();
        let decrement = delta.decrement.clone().unwrap_or_default();
        assert!(increment.is_disjoint(&decrement));
        assert!(increment.is_subset(&new.difference(&old).copied().collect()));
        assert!(decrement.is_subset(&old.difference(&new).copied().collect()));
    }

    #[test]
    fn clear_inside_a_transaction_stages_a_full_removal() {
        let collection = Collection::from_values([1u32, 2]);
        let seen = recorded(&collection);

        collection.open_transaction().unwrap();
        collection.clear().unwrap();
        collection.insert(3).unwrap();
        collection.close_transaction().unwrap();

        assert_eq!(collection.to_set(), set([3]));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn cancel_discards_staged_mutations() {
        let collection = Collection::from_values([1u32]);
        let seen = recorded(&collection);

        collection.open_transaction().unwrap();
        collection.insert(2).unwrap();
        collection.remove(&1).unwrap();
        collection.cancel_transaction().unwrap();

        assert_eq!(collection.to_set(), set([1]));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn apply_delta_emits_a_single_coalesced_delta() {
        let collection = Collection::from_values([1u32, 2]);
        let seen = recorded(&collection);

        collection
            .apply(SetInput::Delta(SetDelta::from_parts(set([3]), set([1])).unwrap()))
            .unwrap();

        assert_eq!(collection.to_set(), set([2, 3]));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn apply_overwrite_replaces_contents() {
        let collection = Collection::from_values([1u32, 2]);
        collection.apply(SetInput::Overwrite(SetOverwrite::new(set([2, 5])))).unwrap();
        assert_eq!(collection.to_set(), set([2, 5]));
    }

    #[test]
    fn readonly_collection_rejects_every_mutating_entry_point() {
        let collection: Collection<u32> = Collection::new_readonly(None);

        assert!(matches!(collection.insert(1), Err(Error::ReadonlyAccess)));
        assert!(matches!(collection.remove(&1), Err(Error::ReadonlyAccess)));
        assert!(matches!(collection.clear(), Err(Error::ReadonlyAccess)));
        assert!(matches!(collection.batch_insert([1]), Err(Error::ReadonlyAccess)));
        assert!(matches!(collection.overwrite([1]), Err(Error::ReadonlyAccess)));
        assert!(matches!(collection.open_transaction(), Err(Error::ReadonlyAccess)));
        assert!(matches!(collection.disable_reactivity(), Err(Error::ReadonlyAccess)));

        // The privileged path still works.
        collection.apply_internal(SetInput::Delta(SetDelta::of_increment(set([1])).unwrap()));
        assert!(collection.contains(&1));
    }

    #[test]
    fn disabling_reactivity_clears_silently_and_switches_once() {
        let collection = Collection::from_values([1u32, 2]);
        let seen = recorded(&collection);
        let switches = Rc::new(StdRefCell::new(Vec::new()));
        let _id = {
            let switches = Rc::clone(&switches);
            collection.on_switch().subscribe(move |enabled: &bool| switches.borrow_mut().push(*enabled))
        };

        collection.disable_reactivity().unwrap();
        collection.disable_reactivity().unwrap();

        assert!(collection.is_empty());
        assert!(seen.borrow().is_empty());
        assert_eq!(*switches.borrow(), vec![false]);
        assert!(matches!(collection.insert(1), Err(Error::ReactivityDisabled)));

        collection.enable_reactivity().unwrap();
        assert_eq!(*switches.borrow(), vec![false, true]);
        collection.insert(3).unwrap();
        assert_eq!(collection.to_set(), set([3]));
    }
}
