//! End-to-end convergence of the variadic combinators.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use rill::{Collection, CombineOptions, Difference, Intersection, SetDelta, Union};

fn set<const N: usize>(values: [u32; N]) -> HashSet<u32> {
    values.into_iter().collect()
}

#[test]
fn intersection_converges_one_delta_per_mutation() {
    let a = Collection::from_values([1u32, 2, 3]);
    let b = Collection::from_values([2u32, 3, 4]);
    let intersection = Intersection::new([a.clone(), b.clone()], CombineOptions::default()).unwrap();

    let deltas = Rc::new(RefCell::new(0usize));
    let _sub = {
        let deltas = Rc::clone(&deltas);
        intersection
            .contents()
            .on_change()
            .subscribe_guarded(move |_delta: &Rc<SetDelta<u32>>| *deltas.borrow_mut() += 1)
    };

    assert_eq!(intersection.contents().to_set(), set([2, 3]));

    a.remove(&2).unwrap();
    assert_eq!(intersection.contents().to_set(), set([3]));

    b.remove(&3).unwrap();
    assert_eq!(intersection.contents().to_set(), set([]));

    assert_eq!(*deltas.borrow(), 2);
}

#[test]
fn difference_recovers_as_exclusions_move() {
    let universe = Collection::from_values(1u32..=5);
    let excluded = Collection::from_values([2u32, 4]);
    let difference =
        Difference::new(&universe, [excluded.clone()], CombineOptions::default()).unwrap();

    assert_eq!(difference.contents().to_set(), set([1, 3, 5]));

    excluded.insert(5).unwrap();
    assert_eq!(difference.contents().to_set(), set([1, 3]));

    excluded.remove(&2).unwrap();
    assert_eq!(difference.contents().to_set(), set([1, 2, 3]));

    universe.remove(&1).unwrap();
    assert_eq!(difference.contents().to_set(), set([2, 3]));
}

#[test]
fn union_equals_the_union_of_its_sources_through_toggles() {
    let a = Collection::from_values([1u32, 2]);
    let b = Collection::from_values([3u32]);
    let c = Collection::from_values([2u32, 4]);
    let union =
        Union::new([a.clone(), b.clone(), c.clone()], CombineOptions::default()).unwrap();

    let expect_union = |sources: &[&Collection<u32>]| -> HashSet<u32> {
        sources.iter().flat_map(|source| source.to_set()).collect()
    };

    assert_eq!(union.contents().to_set(), expect_union(&[&a, &b, &c]));

    a.batch_insert([5, 6]).unwrap();
    b.remove(&3).unwrap();
    assert_eq!(union.contents().to_set(), expect_union(&[&a, &b, &c]));

    // A disabled source contributes nothing until it returns.
    c.disable_reactivity().unwrap();
    assert_eq!(union.contents().to_set(), expect_union(&[&a, &b]));

    c.enable_reactivity().unwrap();
    c.batch_insert([7]).unwrap();
    assert_eq!(union.contents().to_set(), expect_union(&[&a, &b, &c]));

    // Toggling the combinator itself lands on the same contents.
    let before = union.contents().to_set();
    union.disable();
    union.enable();
    assert_eq!(union.contents().to_set(), before);
}

#[test]
fn intersection_of_three_sources_follows_every_mutation() {
    let sources: Vec<Collection<u32>> = (0u32..3)
        .map(|offset| Collection::from_values((1u32..=6).map(|v| v + offset).collect::<Vec<_>>()))
        .collect();
    let intersection = Intersection::new(sources.clone(), CombineOptions::default()).unwrap();

    let expected: HashSet<u32> = sources
        .iter()
        .map(Collection::to_set)
        .reduce(|left, right| left.intersection(&right).copied().collect())
        .unwrap();
    assert_eq!(intersection.contents().to_set(), expected);

    sources[1].insert(1).unwrap();
    sources[2].insert(1).unwrap();
    assert!(intersection.contents().contains(&1));

    sources[0].remove(&3).unwrap();
    assert!(!intersection.contents().contains(&3));
}
