//! Incremental reactive set computation.
//!
//! rill lets callers build a DAG of reactive nodes whose values are either
//! a single element (a [`Cell`]) or a set of unique elements (a
//! [`Collection`]). Leaves are mutated directly; derived nodes recompute
//! incrementally from the deltas of their dependencies — only added and
//! removed elements ever flow through the graph.
//!
//! # Architecture
//!
//! ```text
//! Cell / Collection (leaves)
//!      │  mutations → deltas
//!      ▼
//! Union / Intersection / Difference     Projection engine
//!   (occurrence-count engine,           (per-dependency delta buffers,
//!    synchronous)                        async resolvers, sync worker)
//!      │                                     │
//!      ▼                                     ▼
//!   read-only result Collection ──────► further combinators / observers
//! ```
//!
//! Derived nodes are read-only from the outside and follow an
//! enable/disable lifecycle that cascades from parents to children. The
//! whole graph runs on one cooperative thread; the only suspension point
//! is the await of a projection resolver, driven by the executor in
//! [`task`].
//!
//! ```
//! use rill::{Collection, CombineOptions, Intersection};
//!
//! let a = Collection::from_values([1u32, 2, 3]);
//! let b = Collection::from_values([2u32, 3, 4]);
//! let both = Intersection::new([a.clone(), b.clone()], CombineOptions::default())?;
//!
//! a.remove(&2)?;
//! assert_eq!(both.contents().to_set(), [3].into_iter().collect());
//! # Ok::<(), rill::Error>(())
//! ```

mod buffer;
pub mod cell;
pub mod change;
pub mod collection;
pub mod combine;
pub mod error;
pub mod projection;
pub mod signal;
pub mod task;

pub use cell::{Cell, CellOptions};
pub use change::{
    SetDelta, SetInput, SetOverwrite, ValueBox, ValueDelta, ValueInput, ValueOverwrite,
};
pub use collection::{Collection, CollectionOptions};
pub use combine::{CombineOptions, Difference, Intersection, Union};
pub use error::{Error, Result};
pub use projection::{
    Projection, ProjectionBuilder, ProjectionContext, Resolved, ResolverError,
    complement_via_cell, complement_via_collection, mapped_set, subset_via_cell,
    subset_via_collection,
};
pub use signal::{
    CancelToken, Signal, SignalController, SignalHandler, SignalObserver, Subscription,
    SubscriptionId,
};
