//! Variadic combinators: union, intersection and difference over any number
//! of reactive sources.
//!
//! All three share one engine: an occurrence-count map recording, for every
//! value, how many *included* sources currently contain it. A source is
//! included only while it is reactive; sources that switch off are excluded
//! (their values leave the count) and re-included when they switch back on.
//! Each mode derives result membership from the count:
//!
//! - union: `occ[v] >= 1`
//! - intersection: `occ[v] == |included|`
//! - difference: `v ∈ superset && occ[v] == 0` (counts over excluded sets)
//!
//! Source changes are processed synchronously; every source delta produces
//! at most one result delta.

use std::cell::RefCell;
use std::collections::HashSet;
use std::hash::Hash;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::change::{SetDelta, SetInput};
use crate::collection::Collection;
use crate::combine::CombineOptions;
use crate::error::{Error, Result};
use crate::signal::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VariadicMode {
    Union,
    Intersection,
    Difference,
}

impl VariadicMode {
    fn name(self) -> &'static str {
        match self {
            Self::Union => "union",
            Self::Intersection => "intersection",
            Self::Difference => "difference",
        }
    }
}

/// Which registered source an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKey {
    Superset,
    Subset(u64),
}

struct SourceEntry<T> {
    id: u64,
    collection: Collection<T>,
    /// Part of the calculation right now (reactive and mounted).
    included: bool,
    switch_sub: Option<Subscription>,
    change_sub: Option<Subscription>,
}

struct VariadicInner<T> {
    mode: VariadicMode,
    enabled: bool,
    /// Distinguished source bounding a difference; `None` for union and
    /// intersection.
    superset: Option<SourceEntry<T>>,
    sources: SmallVec<[SourceEntry<T>; 4]>,
    occurrence: FxHashMap<T, u32>,
    next_source_id: u64,
}

impl<T> VariadicInner<T> {
    fn included_count(&self) -> u32 {
        self.sources.iter().filter(|entry| entry.included).count() as u32
    }

    fn entry_mut(&mut self, key: SourceKey) -> Option<&mut SourceEntry<T>> {
        match key {
            SourceKey::Superset => self.superset.as_mut(),
            SourceKey::Subset(id) => self.sources.iter_mut().find(|entry| entry.id == id),
        }
    }
}

struct VariadicShared<T> {
    inner: RefCell<VariadicInner<T>>,
    result: Collection<T>,
    label: Option<Rc<str>>,
}

/// Shared engine behind the three public combinator types.
struct VariadicCore<T> {
    shared: Rc<VariadicShared<T>>,
}

impl<T> Clone for VariadicCore<T> {
    fn clone(&self) -> Self {
        Self { shared: Rc::clone(&self.shared) }
    }
}

impl<T: Clone + Eq + Hash + 'static> VariadicCore<T> {
    fn new(
        mode: VariadicMode,
        superset: Option<&Collection<T>>,
        subsets: impl IntoIterator<Item = Collection<T>>,
        options: CombineOptions,
    ) -> Result<Self> {
        let label: Option<Rc<str>> = options.label.map(Into::into);
        let mut inner = VariadicInner {
            mode,
            enabled: false,
            superset: None,
            sources: SmallVec::new(),
            occurrence: FxHashMap::default(),
            next_source_id: 0,
        };

        if let Some(superset) = superset {
            inner.superset = Some(SourceEntry {
                id: u64::MAX,
                collection: superset.clone(),
                included: false,
                switch_sub: None,
                change_sub: None,
            });
        }

        for subset in subsets {
            register_subset(&mut inner, subset, mode)?;
        }

        let core = Self {
            shared: Rc::new(VariadicShared {
                inner: RefCell::new(inner),
                result: Collection::new_readonly(label.clone()),
                label,
            }),
        };
        if options.enabled {
            core.enable();
        } else {
            // Start in the disabled state; the fresh result collection is
            // reactive by construction.
            core.shared.result.deactivate(false);
        }
        Ok(core)
    }

    fn contents(&self) -> Collection<T> {
        self.shared.result.clone()
    }

    fn is_enabled(&self) -> bool {
        self.shared.inner.borrow().enabled
    }

    fn label(&self) -> Option<&str> {
        self.shared.label.as_deref()
    }

    /// Mounts every reactive source and rebuilds the result, then announces
    /// the transition. No-op when already enabled.
    fn enable(&self) {
        {
            let mut inner = self.shared.inner.borrow_mut();
            if inner.enabled {
                return;
            }
            inner.enabled = true;
        }
        let transitioned = self.shared.result.begin_reactivation();

        let keys: Vec<SourceKey> = {
            let inner = self.shared.inner.borrow();
            inner
                .superset
                .iter()
                .map(|_| SourceKey::Superset)
                .chain(inner.sources.iter().map(|entry| SourceKey::Subset(entry.id)))
                .collect()
        };
        for key in keys {
            self.watch_source(key);
            self.mount_if_reactive(key);
        }

        if transitioned {
            self.shared.result.announce_switch(true);
        }
    }

    /// Announces the transition (dependents unmount against the populated
    /// result), clears the result, and detaches every source. No-op when
    /// already disabled.
    fn disable(&self) {
        {
            let mut inner = self.shared.inner.borrow_mut();
            if !inner.enabled {
                return;
            }
            inner.enabled = false;
        }
        // Switch first, then the clear delta: Collection::deactivate keeps
        // that order.
        self.shared.result.deactivate(true);
        let mut inner = self.shared.inner.borrow_mut();
        if let Some(superset) = inner.superset.as_mut() {
            detach_entry(superset);
        }
        for entry in inner.sources.iter_mut() {
            detach_entry(entry);
        }
        inner.occurrence.clear();
    }

    /// Registers an additional subset source.
    fn add_subset(&self, subset: &Collection<T>) -> Result<()> {
        let (key, enabled) = {
            let mut inner = self.shared.inner.borrow_mut();
            let mode = inner.mode;
            let id = register_subset(&mut inner, subset.clone(), mode)?;
            (SourceKey::Subset(id), inner.enabled)
        };
        if enabled {
            self.watch_source(key);
            self.mount_if_reactive(key);
        }
        Ok(())
    }

    /// Unregisters a subset source. Returns whether it was registered.
    fn remove_subset(&self, subset: &Collection<T>) -> bool {
        let (key, included) = {
            let inner = self.shared.inner.borrow();
            match inner.sources.iter().find(|entry| entry.collection.same_collection(subset)) {
                Some(entry) => (SourceKey::Subset(entry.id), entry.included),
                None => return false,
            }
        };
        if included {
            self.unmount(key);
        }
        let mut inner = self.shared.inner.borrow_mut();
        if let SourceKey::Subset(id) = key {
            inner.sources.retain(|entry| entry.id != id);
        }
        true
    }

    /// Subscribes to the source's switch signal so it can be excluded and
    /// re-included as its reactivity toggles.
    fn watch_source(&self, key: SourceKey) {
        let weak = Rc::downgrade(&self.shared);
        let sub = {
            let inner = self.shared.inner.borrow();
            let entry = match key {
                SourceKey::Superset => inner.superset.as_ref(),
                SourceKey::Subset(id) => inner.sources.iter().find(|entry| entry.id == id),
            };
            let Some(entry) = entry else { return };
            entry.collection.on_switch().subscribe_guarded(move |reactive: &bool| {
                let Some(shared) = weak.upgrade() else { return };
                let core = VariadicCore { shared };
                if *reactive {
                    core.mount_if_reactive(key);
                } else {
                    core.unmount(key);
                }
            })
        };
        let mut inner = self.shared.inner.borrow_mut();
        if let Some(entry) = inner.entry_mut(key) {
            entry.switch_sub = Some(sub);
        }
    }

    /// Includes a source in the calculation: subscribes to its deltas,
    /// counts its contents in, and applies the membership consequences.
    fn mount_if_reactive(&self, key: SourceKey) {
        let input = {
            let contents = {
                let inner = self.shared.inner.borrow();
                let entry = match key {
                    SourceKey::Superset => inner.superset.as_ref(),
                    SourceKey::Subset(id) => inner.sources.iter().find(|entry| entry.id == id),
                };
                let Some(entry) = entry else { return };
                if entry.included || !entry.collection.is_reactive() {
                    return;
                }
                entry.collection.to_set()
            };

            let change_sub = self.subscribe_changes(key);
            let mut inner = self.shared.inner.borrow_mut();
            let Some(entry) = inner.entry_mut(key) else { return };
            entry.included = true;
            entry.change_sub = Some(change_sub);
            mount_input(&mut inner, &self.shared.result, key, contents)
        };
        if let Some(input) = input {
            self.shared.result.apply_internal(input);
        }
    }

    /// Excludes a source: drops its delta subscription, counts its contents
    /// out, and applies the membership consequences. The source still holds
    /// its values at this point (the switch fires before the clear).
    fn unmount(&self, key: SourceKey) {
        let input = {
            let mut inner = self.shared.inner.borrow_mut();
            let Some(entry) = inner.entry_mut(key) else { return };
            if !entry.included {
                return;
            }
            entry.included = false;
            entry.change_sub = None;
            let contents = entry.collection.to_set();
            unmount_input(&mut inner, &self.shared.result, key, contents)
        };
        if let Some(input) = input {
            self.shared.result.apply_internal(input);
        }
    }

    fn subscribe_changes(&self, key: SourceKey) -> Subscription {
        let weak = Rc::downgrade(&self.shared);
        let observer = {
            let inner = self.shared.inner.borrow();
            let entry = match key {
                SourceKey::Superset => inner.superset.as_ref(),
                SourceKey::Subset(id) => inner.sources.iter().find(|entry| entry.id == id),
            };
            entry.map(|entry| entry.collection.on_change())
        };
        let Some(observer) = observer else {
            return Subscription::noop();
        };
        observer.subscribe_guarded(move |delta: &Rc<SetDelta<T>>| {
            let Some(shared) = weak.upgrade() else { return };
            let input = {
                let mut inner = shared.inner.borrow_mut();
                let still_included =
                    inner.entry_mut(key).map(|entry| entry.included).unwrap_or(false);
                if !still_included {
                    None
                } else {
                    delta_input(&mut inner, &shared.result, key, delta)
                }
            };
            if let Some(input) = input {
                shared.result.apply_internal(input);
            }
        })
    }
}

fn detach_entry<T>(entry: &mut SourceEntry<T>) {
    entry.included = false;
    entry.switch_sub = None;
    entry.change_sub = None;
}

fn register_subset<T: Clone + Eq + Hash + 'static>(
    inner: &mut VariadicInner<T>,
    subset: Collection<T>,
    mode: VariadicMode,
) -> Result<u64> {
    if inner.sources.iter().any(|entry| entry.collection.same_collection(&subset)) {
        return Err(Error::DuplicateSource);
    }
    if inner
        .superset
        .as_ref()
        .is_some_and(|entry| entry.collection.same_collection(&subset))
    {
        log::warn!("{} superset registered among its own excluded sets", mode.name());
    }
    let id = inner.next_source_id;
    inner.next_source_id += 1;
    inner.sources.push(SourceEntry {
        id,
        collection: subset,
        included: false,
        switch_sub: None,
        change_sub: None,
    });
    Ok(id)
}

fn bump<T: Clone + Eq + Hash>(occurrence: &mut FxHashMap<T, u32>, value: &T) -> u32 {
    let count = occurrence.entry(value.clone()).or_insert(0);
    *count += 1;
    *count
}

/// Decrements the count, dropping the entry at zero. Underflow is a contract
/// violation.
fn drop_one<T: Clone + Eq + Hash>(occurrence: &mut FxHashMap<T, u32>, value: &T) -> u32 {
    let Some(count) = occurrence.get_mut(value) else {
        panic!("occurrence count underflow");
    };
    assert!(*count > 0, "occurrence count underflow");
    *count -= 1;
    let remaining = *count;
    if remaining == 0 {
        occurrence.remove(value);
    }
    remaining
}

/// Result delta for a delta arriving from an included source.
fn delta_input<T: Clone + Eq + Hash + 'static>(
    inner: &mut VariadicInner<T>,
    result: &Collection<T>,
    key: SourceKey,
    delta: &SetDelta<T>,
) -> Option<SetInput<T>> {
    let mut increment = HashSet::new();
    let mut decrement = HashSet::new();

    match (inner.mode, key) {
        (VariadicMode::Union, _) => {
            for value in delta.added() {
                if bump(&mut inner.occurrence, value) == 1 {
                    increment.insert(value.clone());
                }
            }
            for value in delta.removed() {
                if drop_one(&mut inner.occurrence, value) == 0 {
                    decrement.insert(value.clone());
                }
            }
        }
        (VariadicMode::Intersection, _) => {
            let included = inner.included_count();
            for value in delta.added() {
                if bump(&mut inner.occurrence, value) == included && !result.contains(value) {
                    increment.insert(value.clone());
                }
            }
            for value in delta.removed() {
                drop_one(&mut inner.occurrence, value);
                if result.contains(value) {
                    decrement.insert(value.clone());
                }
            }
        }
        (VariadicMode::Difference, SourceKey::Superset) => {
            for value in delta.added() {
                if !inner.occurrence.contains_key(value) && !result.contains(value) {
                    increment.insert(value.clone());
                }
            }
            for value in delta.removed() {
                if result.contains(value) {
                    decrement.insert(value.clone());
                }
            }
        }
        (VariadicMode::Difference, SourceKey::Subset(_)) => {
            for value in delta.added() {
                if bump(&mut inner.occurrence, value) == 1 && result.contains(value) {
                    decrement.insert(value.clone());
                }
            }
            for value in delta.removed() {
                if drop_one(&mut inner.occurrence, value) == 0 {
                    let in_superset = inner
                        .superset
                        .as_ref()
                        .is_some_and(|entry| entry.collection.contains(value));
                    if in_superset && !result.contains(value) {
                        increment.insert(value.clone());
                    }
                }
            }
        }
    }

    SetDelta::from_parts(increment, decrement).map(Into::into)
}

/// Result delta for a source entering the calculation with `contents`.
/// The entry is already marked included.
fn mount_input<T: Clone + Eq + Hash + 'static>(
    inner: &mut VariadicInner<T>,
    result: &Collection<T>,
    key: SourceKey,
    contents: HashSet<T>,
) -> Option<SetInput<T>> {
    let mut increment = HashSet::new();
    let mut decrement = HashSet::new();

    match (inner.mode, key) {
        (VariadicMode::Union, _) => {
            for value in &contents {
                if bump(&mut inner.occurrence, value) == 1 {
                    increment.insert(value.clone());
                }
            }
        }
        (VariadicMode::Intersection, _) => {
            let included = inner.included_count();
            for value in &contents {
                if bump(&mut inner.occurrence, value) == included && !result.contains(value) {
                    increment.insert(value.clone());
                }
            }
            // Everything in the result but outside the new source drops out.
            for value in result.to_set() {
                if !contents.contains(&value) {
                    decrement.insert(value);
                }
            }
        }
        (VariadicMode::Difference, SourceKey::Superset) => {
            for value in contents {
                if !inner.occurrence.contains_key(&value) && !result.contains(&value) {
                    increment.insert(value);
                }
            }
        }
        (VariadicMode::Difference, SourceKey::Subset(_)) => {
            for value in &contents {
                if bump(&mut inner.occurrence, value) == 1 && result.contains(value) {
                    decrement.insert(value.clone());
                }
            }
        }
    }

    SetDelta::from_parts(increment, decrement).map(Into::into)
}

/// Result delta for a source leaving the calculation while still holding
/// `contents`. The entry is already marked excluded.
fn unmount_input<T: Clone + Eq + Hash + 'static>(
    inner: &mut VariadicInner<T>,
    result: &Collection<T>,
    key: SourceKey,
    contents: HashSet<T>,
) -> Option<SetInput<T>> {
    let mut increment = HashSet::new();
    let mut decrement = HashSet::new();

    match (inner.mode, key) {
        (VariadicMode::Union, _) => {
            for value in &contents {
                if drop_one(&mut inner.occurrence, value) == 0 {
                    decrement.insert(value.clone());
                }
            }
        }
        (VariadicMode::Intersection, _) => {
            for value in &contents {
                drop_one(&mut inner.occurrence, value);
            }
            let included = inner.included_count();
            if included == 0 {
                decrement = result.to_set();
            } else {
                // Values present in every remaining source enter the result.
                for (value, count) in &inner.occurrence {
                    if *count == included && !result.contains(value) {
                        increment.insert(value.clone());
                    }
                }
            }
        }
        (VariadicMode::Difference, SourceKey::Superset) => {
            decrement = result.to_set();
        }
        (VariadicMode::Difference, SourceKey::Subset(_)) => {
            for value in &contents {
                if drop_one(&mut inner.occurrence, value) == 0 {
                    let in_superset = inner
                        .superset
                        .as_ref()
                        .is_some_and(|entry| entry.collection.contains(value));
                    if in_superset && !result.contains(value) {
                        increment.insert(value.clone());
                    }
                }
            }
        }
    }

    SetDelta::from_parts(increment, decrement).map(Into::into)
}

/// Derived collection holding the union of its sources.
pub struct Union<T> {
    core: VariadicCore<T>,
}

impl<T: Clone + Eq + Hash + 'static> Union<T> {
    pub fn new(
        subsets: impl IntoIterator<Item = Collection<T>>,
        options: CombineOptions,
    ) -> Result<Self> {
        Ok(Self { core: VariadicCore::new(VariadicMode::Union, None, subsets, options)? })
    }

    /// The read-only result collection.
    pub fn contents(&self) -> Collection<T> {
        self.core.contents()
    }

    pub fn enable(&self) {
        self.core.enable();
    }

    pub fn disable(&self) {
        self.core.disable();
    }

    pub fn is_enabled(&self) -> bool {
        self.core.is_enabled()
    }

    pub fn add_subset(&self, subset: &Collection<T>) -> Result<()> {
        self.core.add_subset(subset)
    }

    pub fn remove_subset(&self, subset: &Collection<T>) -> bool {
        self.core.remove_subset(subset)
    }

    pub fn label(&self) -> Option<&str> {
        self.core.label()
    }
}

/// Derived collection holding the intersection of its sources.
pub struct Intersection<T> {
    core: VariadicCore<T>,
}

impl<T: Clone + Eq + Hash + 'static> Intersection<T> {
    pub fn new(
        subsets: impl IntoIterator<Item = Collection<T>>,
        options: CombineOptions,
    ) -> Result<Self> {
        Ok(Self { core: VariadicCore::new(VariadicMode::Intersection, None, subsets, options)? })
    }

    /// The read-only result collection.
    pub fn contents(&self) -> Collection<T> {
        self.core.contents()
    }

    pub fn enable(&self) {
        self.core.enable();
    }

    pub fn disable(&self) {
        self.core.disable();
    }

    pub fn is_enabled(&self) -> bool {
        self.core.is_enabled()
    }

    pub fn add_subset(&self, subset: &Collection<T>) -> Result<()> {
        self.core.add_subset(subset)
    }

    pub fn remove_subset(&self, subset: &Collection<T>) -> bool {
        self.core.remove_subset(subset)
    }

    pub fn label(&self) -> Option<&str> {
        self.core.label()
    }
}

/// Derived collection holding `superset` minus the union of the excluded
/// sets.
pub struct Difference<T> {
    core: VariadicCore<T>,
}

impl<T: Clone + Eq + Hash + 'static> Difference<T> {
    pub fn new(
        superset: &Collection<T>,
        excluded: impl IntoIterator<Item = Collection<T>>,
        options: CombineOptions,
    ) -> Result<Self> {
        Ok(Self {
            core: VariadicCore::new(VariadicMode::Difference, Some(superset), excluded, options)?,
        })
    }

    /// The read-only result collection.
    pub fn contents(&self) -> Collection<T> {
        self.core.contents()
    }

    pub fn enable(&self) {
        self.core.enable();
    }

    pub fn disable(&self) {
        self.core.disable();
    }

    pub fn is_enabled(&self) -> bool {
        self.core.is_enabled()
    }

    /// Registers another excluded set.
    pub fn add_excluded(&self, subset: &Collection<T>) -> Result<()> {
        self.core.add_subset(subset)
    }

    /// Unregisters an excluded set. Returns whether it was registered.
    pub fn remove_excluded(&self, subset: &Collection<T>) -> bool {
        self.core.remove_subset(subset)
    }

    pub fn label(&self) -> Option<&str> {
        self.core.label()
    }
}
