//! Generalized projection engine: a read-only collection derived from a
//! named set of heterogeneous dependencies through user-supplied resolvers.
//!
//! Each dependency (a cell or a collection) feeds a delta buffer. A single
//! channel-driven sync worker drains the buffers in declaration order, one
//! delta at a time:
//!
//! 1. pick the first buffer with a pending delta,
//! 2. commit it, then snapshot the committed state of *all* dependencies,
//! 3. await the dependency's resolver against the snapshot and the delta,
//! 4. apply the resolved payload to the result collection,
//! 5. restart the scan (other buffers may have advanced during the await).
//!
//! Committing before the await guarantees the resolver sees a context that
//! already includes the delta it is resolving. The worker is the only thing
//! in the graph that suspends; disabling the engine aborts it and discards
//! any in-flight resolver result. A resolver failure is logged once and
//! quarantines the engine until it is manually re-enabled.

mod context;
mod kinds;

pub use context::ProjectionContext;
pub use kinds::{
    complement_via_cell, complement_via_collection, mapped_set, subset_via_cell,
    subset_via_collection,
};

use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use futures_channel::mpsc;
use futures_util::FutureExt;
use futures_util::StreamExt;
use futures_util::future::LocalBoxFuture;
use indexmap::IndexMap;

use crate::buffer::{SetDeltaBuffer, ValueDeltaBuffer};
use crate::cell::Cell;
use crate::change::{SetDelta, SetInput, ValueDelta};
use crate::collection::Collection;
use crate::combine::CombineOptions;
use crate::error::{Error, Result};
use crate::projection::context::ContextEntry;
use crate::signal::Subscription;
use crate::task::{self, TaskHandle};

/// Error type resolvers are allowed to fail with.
pub type ResolverError = Box<dyn std::error::Error>;

/// What a resolver produces: a payload for the result collection, or
/// nothing to apply.
pub type Resolved<T> = std::result::Result<Option<SetInput<T>>, ResolverError>;

type ResolverFuture<T> = LocalBoxFuture<'static, Resolved<T>>;

/// One named dependency: its buffer, its resolver, and its subscriptions.
/// The element type of the source is erased here; the typed halves live in
/// [`SetDependency`] and [`ValueDependency`].
trait DependencyRecord<T> {
    /// Subscribes to the source's deltas and seeds the buffer with its
    /// current state.
    fn attach(&mut self, engine: &Rc<EngineShared<T>>, index: usize);

    /// Drops the delta subscription and detaches the buffer.
    fn detach(&mut self);

    fn source_reactive(&self) -> bool;

    /// Subscription following the source's switch signal for the cascade.
    fn watch_switch(&self, engine: &Rc<EngineShared<T>>) -> Subscription;

    /// Folds a freshly emitted source delta into the buffer.
    fn record_any(&mut self, delta: &dyn Any);

    /// Commits the buffered delta and stashes it for [`Self::run_resolver`].
    /// Returns whether there was anything to resolve.
    fn stage_resolution(&mut self) -> bool;

    /// Runs the resolver against the stashed delta.
    fn run_resolver(&mut self, ctx: ProjectionContext) -> ResolverFuture<T>;

    fn context_entry(&self) -> ContextEntry;
}

struct SetDependency<S, T> {
    buffer: SetDeltaBuffer<S>,
    resolver: Rc<dyn Fn(ProjectionContext, SetDelta<S>) -> ResolverFuture<T>>,
    change_sub: Option<Subscription>,
    staged: Option<SetDelta<S>>,
}

impl<S, T> SetDependency<S, T>
where
    S: Clone + Eq + Hash + 'static,
{
    fn new(
        source: &Collection<S>,
        resolver: Rc<dyn Fn(ProjectionContext, SetDelta<S>) -> ResolverFuture<T>>,
    ) -> Self {
        Self {
            buffer: SetDeltaBuffer::new(source.clone()),
            resolver,
            change_sub: None,
            staged: None,
        }
    }
}

impl<S, T> DependencyRecord<T> for SetDependency<S, T>
where
    S: Clone + Eq + Hash + 'static,
    T: Clone + Eq + Hash + 'static,
{
    fn attach(&mut self, engine: &Rc<EngineShared<T>>, index: usize) {
        let weak = Rc::downgrade(engine);
        self.change_sub =
            Some(self.buffer.source().on_change().subscribe_guarded(
                move |delta: &Rc<SetDelta<S>>| {
                    on_source_delta(&weak, index, &**delta);
                },
            ));
        self.buffer.enable();
    }

    fn detach(&mut self) {
        self.change_sub = None;
        self.buffer.disable();
        self.staged = None;
    }

    fn source_reactive(&self) -> bool {
        self.buffer.source().is_reactive()
    }

    fn watch_switch(&self, engine: &Rc<EngineShared<T>>) -> Subscription {
        let weak = Rc::downgrade(engine);
        self.buffer
            .source()
            .on_switch()
            .subscribe_guarded(move |_reactive: &bool| on_source_switch(&weak))
    }

    fn record_any(&mut self, delta: &dyn Any) {
        if !self.buffer.is_enabled() {
            return;
        }
        if let Some(delta) = delta.downcast_ref::<SetDelta<S>>() {
            self.buffer.record(delta);
        }
    }

    fn stage_resolution(&mut self) -> bool {
        if !self.buffer.is_enabled() {
            return false;
        }
        match self.buffer.buffered_changes() {
            Ok(Some(delta)) => {
                // Commit before the resolver runs so the context snapshot
                // already reflects this delta.
                if self.buffer.commit().is_err() {
                    return false;
                }
                self.staged = Some(delta);
                true
            }
            _ => false,
        }
    }

    fn run_resolver(&mut self, ctx: ProjectionContext) -> ResolverFuture<T> {
        match self.staged.take() {
            Some(delta) => (self.resolver)(ctx, delta),
            None => std::future::ready(Ok(None)).boxed_local(),
        }
    }

    fn context_entry(&self) -> ContextEntry {
        let state = self
            .buffer
            .committed_state()
            .ok()
            .flatten()
            .map(|state| Rc::new(state) as Rc<dyn Any>);
        ContextEntry::Set(state)
    }
}

struct ValueDependency<V, T> {
    buffer: ValueDeltaBuffer<V>,
    resolver: Rc<dyn Fn(ProjectionContext, ValueDelta<V>) -> ResolverFuture<T>>,
    change_sub: Option<Subscription>,
    staged: Option<ValueDelta<V>>,
}

impl<V, T> ValueDependency<V, T>
where
    V: Clone + PartialEq + 'static,
{
    fn new(
        source: &Cell<V>,
        resolver: Rc<dyn Fn(ProjectionContext, ValueDelta<V>) -> ResolverFuture<T>>,
    ) -> Self {
        Self { buffer: ValueDeltaBuffer::new(source.clone()), resolver, change_sub: None, staged: None }
    }
}

impl<V, T> DependencyRecord<T> for ValueDependency<V, T>
where
    V: Clone + PartialEq + 'static,
    T: Clone + Eq + Hash + 'static,
{
    fn attach(&mut self, engine: &Rc<EngineShared<T>>, index: usize) {
        let weak = Rc::downgrade(engine);
        self.change_sub =
            Some(self.buffer.source().on_change().subscribe_guarded(
                move |delta: &Rc<ValueDelta<V>>| {
                    on_source_delta(&weak, index, &**delta);
                },
            ));
        self.buffer.enable();
    }

    fn detach(&mut self) {
        self.change_sub = None;
        self.buffer.disable();
        self.staged = None;
    }

    fn source_reactive(&self) -> bool {
        self.buffer.source().is_reactive()
    }

    fn watch_switch(&self, engine: &Rc<EngineShared<T>>) -> Subscription {
        let weak = Rc::downgrade(engine);
        self.buffer
            .source()
            .on_switch()
            .subscribe_guarded(move |_reactive: &bool| on_source_switch(&weak))
    }

    fn record_any(&mut self, delta: &dyn Any) {
        if !self.buffer.is_enabled() {
            return;
        }
        if let Some(delta) = delta.downcast_ref::<ValueDelta<V>>() {
            self.buffer.record(delta);
        }
    }

    fn stage_resolution(&mut self) -> bool {
        if !self.buffer.is_enabled() {
            return false;
        }
        match self.buffer.buffered_change() {
            Ok(Some(delta)) => {
                if self.buffer.commit().is_err() {
                    return false;
                }
                self.staged = Some(delta);
                true
            }
            _ => false,
        }
    }

    fn run_resolver(&mut self, ctx: ProjectionContext) -> ResolverFuture<T> {
        match self.staged.take() {
            Some(delta) => (self.resolver)(ctx, delta),
            None => std::future::ready(Ok(None)).boxed_local(),
        }
    }

    fn context_entry(&self) -> ContextEntry {
        let value = self
            .buffer
            .committed_value()
            .ok()
            .flatten()
            .map(|boxed| Rc::new(boxed.value) as Rc<dyn Any>);
        ContextEntry::Value(value)
    }
}

struct EngineInner<T> {
    /// The caller's flag; survives parent cascades, cleared by resolver
    /// failure quarantine.
    local_enabled: bool,
    /// Effective state: locally enabled and every parent reactive.
    active: bool,
    deps: IndexMap<Rc<str>, Box<dyn DependencyRecord<T>>>,
    switch_subs: Vec<Subscription>,
    worker: Option<TaskHandle>,
    notify_tx: Option<mpsc::UnboundedSender<()>>,
    /// Guards kept alive for the engine's lifetime (used by the concrete
    /// projections).
    retained: Vec<Subscription>,
}

struct EngineShared<T> {
    inner: RefCell<EngineInner<T>>,
    result: Collection<T>,
    label: Option<Rc<str>>,
}

/// Routes a source delta into its dependency buffer and wakes the worker.
fn on_source_delta<T: Clone + Eq + Hash + 'static>(
    engine: &Weak<EngineShared<T>>,
    index: usize,
    delta: &dyn Any,
) {
    let Some(shared) = engine.upgrade() else { return };
    let tx = {
        let mut inner = shared.inner.borrow_mut();
        if !inner.active {
            return;
        }
        if let Some((_, record)) = inner.deps.get_index_mut(index) {
            record.record_any(delta);
        }
        inner.notify_tx.clone()
    };
    if let Some(tx) = tx {
        let _ = tx.unbounded_send(());
    }
}

/// Re-evaluates the cascade when any parent's switch fires.
fn on_source_switch<T: Clone + Eq + Hash + 'static>(engine: &Weak<EngineShared<T>>) {
    let Some(shared) = engine.upgrade() else { return };
    Projection { shared }.recompute();
}

fn build_context<T>(inner: &EngineInner<T>) -> ProjectionContext {
    let entries = inner
        .deps
        .iter()
        .map(|(name, record)| (Rc::clone(name), record.context_entry()))
        .collect();
    ProjectionContext::new(entries)
}

/// The sync worker: one per enabled engine, woken through the notify
/// channel, draining buffers one resolver call at a time.
async fn run_worker<T: Clone + Eq + Hash + 'static>(
    engine: Weak<EngineShared<T>>,
    mut wake: mpsc::UnboundedReceiver<()>,
) {
    while wake.next().await.is_some() {
        loop {
            let step = {
                let Some(shared) = engine.upgrade() else { return };
                let mut inner = shared.inner.borrow_mut();
                if !inner.active {
                    return;
                }
                let staged_index = (0..inner.deps.len()).find(|&index| {
                    inner
                        .deps
                        .get_index_mut(index)
                        .map(|(_, record)| record.stage_resolution())
                        .unwrap_or(false)
                });
                match staged_index {
                    None => None,
                    Some(index) => {
                        let ctx = build_context(&inner);
                        inner.deps.get_index_mut(index).map(|(name, record)| {
                            (Rc::clone(name), record.run_resolver(ctx))
                        })
                    }
                }
            };

            let Some((name, future)) = step else { break };
            let resolved = future.await;

            let Some(shared) = engine.upgrade() else { return };
            match resolved {
                Ok(payload) => {
                    if !shared.inner.borrow().active {
                        // Disabled while the resolver was in flight; the
                        // result is discarded.
                        return;
                    }
                    if let Some(input) = payload {
                        shared.result.apply_internal(input);
                    }
                }
                Err(error) => {
                    let failure = Error::ResolverFailure {
                        name: name.to_string(),
                        message: error.to_string(),
                    };
                    log::error!(
                        "projection{} disabled: {failure}",
                        shared
                            .label
                            .as_deref()
                            .map(|label| format!(" `{label}`"))
                            .unwrap_or_default()
                    );
                    Projection { shared }.disable();
                    return;
                }
            }
            // A new delta may have arrived during the await: restart the
            // scan from the top.
        }
    }
}

/// Builder for [`Projection`]: dependencies are declared in order, each as
/// a `(name, source, resolver)` record.
pub struct ProjectionBuilder<T> {
    deps: Vec<(Rc<str>, Box<dyn DependencyRecord<T>>)>,
    options: CombineOptions,
}

impl<T: Clone + Eq + Hash + 'static> Default for ProjectionBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Eq + Hash + 'static> ProjectionBuilder<T> {
    pub fn new() -> Self {
        Self { deps: Vec::new(), options: CombineOptions::default() }
    }

    /// Declares a collection dependency. The resolver receives the context
    /// snapshot and the committed delta, and may be asynchronous.
    pub fn set_dependency<S, F, Fut>(
        mut self,
        name: impl Into<String>,
        source: &Collection<S>,
        resolver: F,
    ) -> Self
    where
        S: Clone + Eq + Hash + 'static,
        F: Fn(ProjectionContext, SetDelta<S>) -> Fut + 'static,
        Fut: Future<Output = Resolved<T>> + 'static,
    {
        let resolver = Rc::new(move |ctx: ProjectionContext, delta: SetDelta<S>| {
            resolver(ctx, delta).boxed_local()
        });
        self.deps.push((name.into().into(), Box::new(SetDependency::new(source, resolver))));
        self
    }

    /// Declares a cell dependency.
    pub fn value_dependency<V, F, Fut>(
        mut self,
        name: impl Into<String>,
        source: &Cell<V>,
        resolver: F,
    ) -> Self
    where
        V: Clone + PartialEq + 'static,
        F: Fn(ProjectionContext, ValueDelta<V>) -> Fut + 'static,
        Fut: Future<Output = Resolved<T>> + 'static,
    {
        let resolver = Rc::new(move |ctx: ProjectionContext, delta: ValueDelta<V>| {
            resolver(ctx, delta).boxed_local()
        });
        self.deps.push((name.into().into(), Box::new(ValueDependency::new(source, resolver))));
        self
    }

    pub fn options(mut self, options: CombineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<Projection<T>> {
        let mut names: Vec<&str> = self.deps.iter().map(|(name, _)| name.as_ref()).collect();
        names.sort_unstable();
        if names.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(Error::DuplicateSource);
        }

        let label: Option<Rc<str>> = self.options.label.map(Into::into);
        let engine = Projection {
            shared: Rc::new(EngineShared {
                inner: RefCell::new(EngineInner {
                    local_enabled: false,
                    active: false,
                    deps: self.deps.into_iter().collect(),
                    switch_subs: Vec::new(),
                    worker: None,
                    notify_tx: None,
                    retained: Vec::new(),
                }),
                result: Collection::new_readonly(label.clone()),
                label,
            }),
        };
        if self.options.enabled {
            engine.enable();
        } else {
            engine.shared.result.deactivate(false);
        }
        Ok(engine)
    }
}

/// Derived read-only collection computed by resolvers over named
/// dependencies.
pub struct Projection<T> {
    shared: Rc<EngineShared<T>>,
}

impl<T> Clone for Projection<T> {
    fn clone(&self) -> Self {
        Self { shared: Rc::clone(&self.shared) }
    }
}

impl<T: Clone + Eq + Hash + 'static> Projection<T> {
    pub fn builder() -> ProjectionBuilder<T> {
        ProjectionBuilder::new()
    }

    /// The read-only result collection.
    pub fn contents(&self) -> Collection<T> {
        self.shared.result.clone()
    }

    /// Effective state: locally enabled and every parent reactive.
    pub fn is_enabled(&self) -> bool {
        self.shared.inner.borrow().active
    }

    pub fn label(&self) -> Option<&str> {
        self.shared.label.as_deref()
    }

    /// Sets the local flag and attaches if every parent is reactive.
    /// Re-enabling re-initializes the engine as if freshly created.
    pub fn enable(&self) {
        {
            let mut inner = self.shared.inner.borrow_mut();
            if inner.local_enabled {
                return;
            }
            inner.local_enabled = true;
        }
        self.watch_parents();
        self.recompute();
    }

    /// Clears the local flag, aborting any in-flight resolver and clearing
    /// the result.
    pub fn disable(&self) {
        {
            let mut inner = self.shared.inner.borrow_mut();
            if !inner.local_enabled {
                return;
            }
            inner.local_enabled = false;
            inner.switch_subs.clear();
        }
        self.recompute();
    }

    /// Keeps a subscription guard alive for the engine's lifetime.
    pub(crate) fn retain_subscription(&self, sub: Subscription) {
        self.shared.inner.borrow_mut().retained.push(sub);
    }

    /// Subscribes to every parent's switch signal; the subscriptions live
    /// while the local flag is set.
    fn watch_parents(&self) {
        let subs: Vec<Subscription> = {
            let inner = self.shared.inner.borrow();
            inner.deps.values().map(|record| record.watch_switch(&self.shared)).collect()
        };
        self.shared.inner.borrow_mut().switch_subs = subs;
    }

    /// Re-evaluates the effective state and runs the matching transition.
    fn recompute(&self) {
        let (should_be_active, currently_active) = {
            let inner = self.shared.inner.borrow();
            let parents_reactive = inner.deps.values().all(|record| record.source_reactive());
            (inner.local_enabled && parents_reactive, inner.active)
        };
        if should_be_active && !currently_active {
            self.activate();
        } else if !should_be_active && currently_active {
            self.deactivate();
        }
    }

    /// Attaches buffers, spawns the worker, and seeds the first sync pass.
    fn activate(&self) {
        let transitioned = self.shared.result.begin_reactivation();
        let notify = {
            let mut inner = self.shared.inner.borrow_mut();
            inner.active = true;
            let (tx, rx) = mpsc::unbounded();
            inner.notify_tx = Some(tx.clone());
            inner.worker = Some(task::spawn(run_worker(Rc::downgrade(&self.shared), rx)));
            for index in 0..inner.deps.len() {
                if let Some((_, record)) = inner.deps.get_index_mut(index) {
                    record.attach(&self.shared, index);
                }
            }
            tx
        };
        // Seed pass: the buffers were primed with the full source states.
        let _ = notify.unbounded_send(());
        if transitioned {
            self.shared.result.announce_switch(true);
        }
    }

    /// Aborts the worker, detaches buffers, and clears the result (switch
    /// first, then the clear delta).
    fn deactivate(&self) {
        {
            let mut inner = self.shared.inner.borrow_mut();
            inner.active = false;
            inner.worker = None;
            inner.notify_tx = None;
            for record in inner.deps.values_mut() {
                record.detach();
            }
        }
        self.shared.result.deactivate(true);
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Projection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projection")
            .field("label", &self.shared.label)
            .field("active", &self.shared.inner.borrow().active)
            .finish()
    }
}
