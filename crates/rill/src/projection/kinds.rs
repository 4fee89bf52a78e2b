//! Concrete projections: thin configurations over the projection engine.
//!
//! Each constructor wires a fixed dependency layout (`superset` plus
//! `relation`, or a single `source`) with resolvers that re-project only
//! what a delta touched, falling back to a full re-projection when the
//! relation itself moves.

use std::cell::Cell as FlagCell;
use std::collections::HashSet;
use std::hash::Hash;
use std::rc::Rc;

use crate::cell::Cell;
use crate::change::{SetDelta, SetInput, SetOverwrite, ValueDelta};
use crate::collection::Collection;
use crate::combine::CombineOptions;
use crate::error::Result;
use crate::projection::{Projection, ProjectionContext, Resolved};

/// Subset of `superset` selected through the value of a cell.
///
/// `resolver` projects candidate elements through the relation's current
/// value. Superset deltas re-project only the added elements (removed
/// elements leave directly); a relation change overwrites the result with a
/// full re-projection of the committed superset.
pub fn subset_via_cell<T, R, F>(
    superset: &Collection<T>,
    relation: &Cell<R>,
    resolver: F,
    options: CombineOptions,
) -> Result<Projection<T>>
where
    T: Clone + Eq + Hash + 'static,
    R: Clone + PartialEq + 'static,
    F: Fn(&R, &HashSet<T>) -> HashSet<T> + 'static,
{
    let resolver = Rc::new(resolver);

    let superset_resolver = {
        let resolver = Rc::clone(&resolver);
        move |ctx: ProjectionContext, delta: SetDelta<T>| {
            let resolved = (|| -> Resolved<T> {
                let relation = ctx.value::<R>("relation")?;
                let increment = match (&relation, &delta.increment) {
                    (Some(relation), Some(added)) => resolver(relation, added),
                    _ => HashSet::new(),
                };
                let decrement = delta.decrement.unwrap_or_default();
                Ok(SetDelta::from_parts(increment, decrement).map(SetInput::Delta))
            })();
            std::future::ready(resolved)
        }
    };

    let relation_resolver = {
        let resolver = Rc::clone(&resolver);
        move |ctx: ProjectionContext, delta: ValueDelta<R>| {
            let resolved = (|| -> Resolved<T> {
                let Some(next) = delta.increment else { return Ok(None) };
                let base = match ctx.set::<T>("superset")? {
                    Some(state) => (*state).clone(),
                    None => HashSet::new(),
                };
                let projected = resolver(&next.value, &base);
                Ok(Some(SetInput::Overwrite(SetOverwrite::new(projected))))
            })();
            std::future::ready(resolved)
        }
    };

    Projection::builder()
        .set_dependency("superset", superset, superset_resolver)
        .value_dependency("relation", relation, relation_resolver)
        .options(options)
        .build()
}

/// Subset of `superset` selected through a collection of relation keys.
///
/// `resolver` projects a set of keys against a set of candidate elements.
/// Relation deltas re-project the added/removed keys against the whole
/// committed superset; superset deltas re-project only the added elements
/// against the whole committed relation.
pub fn subset_via_collection<T, R, F>(
    superset: &Collection<T>,
    relation: &Collection<R>,
    resolver: F,
    options: CombineOptions,
) -> Result<Projection<T>>
where
    T: Clone + Eq + Hash + 'static,
    R: Clone + Eq + Hash + 'static,
    F: Fn(&HashSet<R>, &HashSet<T>) -> HashSet<T> + 'static,
{
    let resolver = Rc::new(resolver);

    let superset_resolver = {
        let resolver = Rc::clone(&resolver);
        move |ctx: ProjectionContext, delta: SetDelta<T>| {
            let resolved = (|| -> Resolved<T> {
                let keys = ctx.set::<R>("relation")?;
                let increment = match (&keys, &delta.increment) {
                    (Some(keys), Some(added)) => resolver(keys, added),
                    _ => HashSet::new(),
                };
                let decrement = delta.decrement.unwrap_or_default();
                Ok(SetDelta::from_parts(increment, decrement).map(SetInput::Delta))
            })();
            std::future::ready(resolved)
        }
    };

    let relation_resolver = {
        let resolver = Rc::clone(&resolver);
        move |ctx: ProjectionContext, delta: SetDelta<R>| {
            let resolved = (|| -> Resolved<T> {
                let base = match ctx.set::<T>("superset")? {
                    Some(state) => (*state).clone(),
                    None => HashSet::new(),
                };
                let increment =
                    delta.increment.map(|keys| resolver(&keys, &base)).unwrap_or_default();
                let decrement =
                    delta.decrement.map(|keys| resolver(&keys, &base)).unwrap_or_default();
                Ok(SetDelta::from_parts(increment, decrement).map(SetInput::Delta))
            })();
            std::future::ready(resolved)
        }
    };

    Projection::builder()
        .set_dependency("superset", superset, superset_resolver)
        .set_dependency("relation", relation, relation_resolver)
        .options(options)
        .build()
}

/// Complement of [`subset_via_cell`]: the result is
/// `superset − projection`.
pub fn complement_via_cell<T, R, F>(
    superset: &Collection<T>,
    relation: &Cell<R>,
    resolver: F,
    options: CombineOptions,
) -> Result<Projection<T>>
where
    T: Clone + Eq + Hash + 'static,
    R: Clone + PartialEq + 'static,
    F: Fn(&R, &HashSet<T>) -> HashSet<T> + 'static,
{
    let resolver = Rc::new(resolver);

    let superset_resolver = {
        let resolver = Rc::clone(&resolver);
        move |ctx: ProjectionContext, delta: SetDelta<T>| {
            let resolved = (|| -> Resolved<T> {
                let relation = ctx.value::<R>("relation")?;
                let added = delta.increment.unwrap_or_default();
                let projected =
                    relation.map(|relation| resolver(&relation, &added)).unwrap_or_default();
                let increment = added.difference(&projected).cloned().collect();
                let decrement = delta.decrement.unwrap_or_default();
                Ok(SetDelta::from_parts(increment, decrement).map(SetInput::Delta))
            })();
            std::future::ready(resolved)
        }
    };

    let relation_resolver = {
        let resolver = Rc::clone(&resolver);
        move |ctx: ProjectionContext, delta: ValueDelta<R>| {
            let resolved = (|| -> Resolved<T> {
                let Some(next) = delta.increment else { return Ok(None) };
                let base = match ctx.set::<T>("superset")? {
                    Some(state) => (*state).clone(),
                    None => HashSet::new(),
                };
                let projected = resolver(&next.value, &base);
                let complement = base.difference(&projected).cloned().collect();
                Ok(Some(SetInput::Overwrite(SetOverwrite::new(complement))))
            })();
            std::future::ready(resolved)
        }
    };

    Projection::builder()
        .set_dependency("superset", superset, superset_resolver)
        .value_dependency("relation", relation, relation_resolver)
        .options(options)
        .build()
}

/// Complement of [`subset_via_collection`]: the result is
/// `superset − projection`.
///
/// The first relation delta after enable resolves the full initial
/// complement as an overwrite; afterwards relation increments remove from
/// the complement and decrements add back. The one-shot flag resets when
/// the engine switches off.
pub fn complement_via_collection<T, R, F>(
    superset: &Collection<T>,
    relation: &Collection<R>,
    resolver: F,
    options: CombineOptions,
) -> Result<Projection<T>>
where
    T: Clone + Eq + Hash + 'static,
    R: Clone + Eq + Hash + 'static,
    F: Fn(&HashSet<R>, &HashSet<T>) -> HashSet<T> + 'static,
{
    let resolver = Rc::new(resolver);
    let initialized = Rc::new(FlagCell::new(false));

    let superset_resolver = {
        let resolver = Rc::clone(&resolver);
        move |ctx: ProjectionContext, delta: SetDelta<T>| {
            let resolved = (|| -> Resolved<T> {
                let keys = ctx.set::<R>("relation")?;
                let added = delta.increment.unwrap_or_default();
                let projected = keys.map(|keys| resolver(&keys, &added)).unwrap_or_default();
                let increment = added.difference(&projected).cloned().collect();
                let decrement = delta.decrement.unwrap_or_default();
                Ok(SetDelta::from_parts(increment, decrement).map(SetInput::Delta))
            })();
            std::future::ready(resolved)
        }
    };

    let relation_resolver = {
        let resolver = Rc::clone(&resolver);
        let initialized = Rc::clone(&initialized);
        move |ctx: ProjectionContext, delta: SetDelta<R>| {
            let resolved = (|| -> Resolved<T> {
                let base = match ctx.set::<T>("superset")? {
                    Some(state) => (*state).clone(),
                    None => HashSet::new(),
                };
                if !initialized.replace(true) {
                    let keys = match ctx.set::<R>("relation")? {
                        Some(state) => (*state).clone(),
                        None => HashSet::new(),
                    };
                    let projected = resolver(&keys, &base);
                    let complement = base.difference(&projected).cloned().collect();
                    return Ok(Some(SetInput::Overwrite(SetOverwrite::new(complement))));
                }
                let decrement =
                    delta.increment.map(|keys| resolver(&keys, &base)).unwrap_or_default();
                let increment =
                    delta.decrement.map(|keys| resolver(&keys, &base)).unwrap_or_default();
                Ok(SetDelta::from_parts(increment, decrement).map(SetInput::Delta))
            })();
            std::future::ready(resolved)
        }
    };

    let engine = Projection::builder()
        .set_dependency("superset", superset, superset_resolver)
        .set_dependency("relation", relation, relation_resolver)
        .options(options)
        .build()?;

    let reset = {
        let initialized = Rc::clone(&initialized);
        engine.contents().on_switch().subscribe_guarded(move |reactive: &bool| {
            if !*reactive {
                initialized.set(false);
            }
        })
    };
    engine.retain_subscription(reset);
    Ok(engine)
}

/// Maps one collection onto another, delta by delta, without a context.
///
/// `resolver` turns each source delta into the output's payload; the engine
/// applies it. Returning `None` drops the delta.
pub fn mapped_set<S, T, F>(
    source: &Collection<S>,
    resolver: F,
    options: CombineOptions,
) -> Result<Projection<T>>
where
    S: Clone + Eq + Hash + 'static,
    T: Clone + Eq + Hash + 'static,
    F: Fn(&SetDelta<S>) -> Option<SetInput<T>> + 'static,
{
    Projection::builder()
        .set_dependency("source", source, move |_ctx: ProjectionContext, delta: SetDelta<S>| {
            std::future::ready(Ok(resolver(&delta)))
        })
        .options(options)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task;

    fn set<const N: usize>(values: [u32; N]) -> HashSet<u32> {
        values.into_iter().collect()
    }

    fn parity_filter(mode: &String, candidates: &HashSet<u32>) -> HashSet<u32> {
        let wants_even = mode == "even";
        candidates.iter().copied().filter(|value| (value % 2 == 0) == wants_even).collect()
    }

    #[test]
    fn subset_via_cell_projects_and_reprojects() {
        let all = Collection::from_values(1u32..=6);
        let mode = Cell::new("even".to_owned());
        let subset =
            subset_via_cell(&all, &mode, parity_filter, CombineOptions::default()).unwrap();

        task::drain();
        assert_eq!(subset.contents().to_set(), set([2, 4, 6]));

        all.insert(8).unwrap();
        all.remove(&2).unwrap();
        task::drain();
        assert_eq!(subset.contents().to_set(), set([4, 6, 8]));

        mode.set("odd".to_owned()).unwrap();
        task::drain();
        assert_eq!(subset.contents().to_set(), set([1, 3, 5]));
    }

    #[test]
    fn subset_via_collection_follows_both_sides() {
        let all = Collection::from_values([10u32, 11, 20, 21, 30]);
        // Keys are decades; an element matches when its decade is a key.
        let decades = Collection::from_values([1u32]);
        let project = |keys: &HashSet<u32>, candidates: &HashSet<u32>| {
            candidates.iter().copied().filter(|value| keys.contains(&(value / 10))).collect()
        };
        let subset =
            subset_via_collection(&all, &decades, project, CombineOptions::default()).unwrap();

        task::drain();
        assert_eq!(subset.contents().to_set(), set([10, 11]));

        decades.insert(2).unwrap();
        task::drain();
        assert_eq!(subset.contents().to_set(), set([10, 11, 20, 21]));

        decades.remove(&1).unwrap();
        task::drain();
        assert_eq!(subset.contents().to_set(), set([20, 21]));

        all.insert(22).unwrap();
        task::drain();
        assert_eq!(subset.contents().to_set(), set([20, 21, 22]));
    }

    #[test]
    fn complement_via_cell_keeps_the_rest() {
        let all = Collection::from_values(1u32..=6);
        let mode = Cell::new("even".to_owned());
        let complement =
            complement_via_cell(&all, &mode, parity_filter, CombineOptions::default()).unwrap();

        task::drain();
        assert_eq!(complement.contents().to_set(), set([1, 3, 5]));

        mode.set("odd".to_owned()).unwrap();
        task::drain();
        assert_eq!(complement.contents().to_set(), set([2, 4, 6]));

        all.insert(7).unwrap();
        task::drain();
        assert_eq!(complement.contents().to_set(), set([2, 4, 6]));
        all.insert(8).unwrap();
        task::drain();
        assert_eq!(complement.contents().to_set(), set([2, 4, 6, 8]));
    }

    #[test]
    fn complement_via_collection_initializes_then_tracks_deltas() {
        let all = Collection::from_values([10u32, 11, 20, 21]);
        let decades = Collection::from_values([1u32]);
        let project = |keys: &HashSet<u32>, candidates: &HashSet<u32>| {
            candidates.iter().copied().filter(|value| keys.contains(&(value / 10))).collect()
        };
        let complement =
            complement_via_collection(&all, &decades, project, CombineOptions::default()).unwrap();

        task::drain();
        assert_eq!(complement.contents().to_set(), set([20, 21]));

        // New key: its matches leave the complement.
        decades.insert(2).unwrap();
        task::drain();
        assert_eq!(complement.contents().to_set(), set([]));

        // Key retreats: its matches come back.
        decades.remove(&1).unwrap();
        task::drain();
        assert_eq!(complement.contents().to_set(), set([10, 11]));

        // Toggling re-runs the one-shot initialization against the current
        // sources.
        complement.disable();
        complement.enable();
        task::drain();
        assert_eq!(complement.contents().to_set(), set([10, 11]));
    }

    #[test]
    fn mapped_set_transforms_deltas_without_context() {
        let source = Collection::from_values([1u32, 2]);
        let doubled = mapped_set(
            &source,
            |delta: &SetDelta<u32>| {
                let increment: HashSet<u32> = delta.added().map(|value| value * 2).collect();
                let decrement: HashSet<u32> = delta.removed().map(|value| value * 2).collect();
                SetDelta::from_parts(increment, decrement).map(SetInput::Delta)
            },
            CombineOptions::default(),
        )
        .unwrap();

        task::drain();
        assert_eq!(doubled.contents().to_set(), set([2, 4]));

        source.insert(5).unwrap();
        source.remove(&1).unwrap();
        task::drain();
        assert_eq!(doubled.contents().to_set(), set([4, 10]));
    }
}
