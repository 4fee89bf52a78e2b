//! Delta buffer over a cell source.

use crate::cell::Cell;
use crate::change::{ValueBox, ValueDelta};
use crate::error::{Error, Result};

/// Accumulates the uncommitted value change from one cell source.
///
/// Only the latest pending value is kept; a pending value structurally
/// equal to the committed one cancels itself out.
pub(crate) struct ValueDeltaBuffer<V> {
    source: Cell<V>,
    pending: Option<ValueBox<V>>,
    committed: Option<ValueBox<V>>,
    enabled: bool,
}

impl<V: Clone + PartialEq + 'static> ValueDeltaBuffer<V> {
    /// New buffer, detached until [`ValueDeltaBuffer::enable`].
    pub fn new(source: Cell<V>) -> Self {
        Self { source, pending: None, committed: None, enabled: false }
    }

    pub fn source(&self) -> &Cell<V> {
        &self.source
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Attaches the buffer and stages the source's current value as the
    /// initial pending change.
    pub fn enable(&mut self) {
        self.enabled = true;
        self.pending = Some(ValueBox::new(self.source.get()));
        self.committed = None;
    }

    /// Detaches the buffer, discarding all staged and committed state.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.pending = None;
        self.committed = None;
    }

    /// Folds a source delta into the pending slot.
    pub fn record(&mut self, delta: &ValueDelta<V>) {
        debug_assert!(self.enabled, "recording into a disabled buffer");
        let Some(increment) = &delta.increment else { return };
        if self.committed.as_ref() == Some(increment) {
            self.pending = None;
        } else {
            self.pending = Some(increment.clone());
        }
    }

    /// The buffered change, or `None` when nothing is pending.
    pub fn buffered_change(&self) -> Result<Option<ValueDelta<V>>> {
        self.ensure_enabled()?;
        Ok(self
            .pending
            .as_ref()
            .map(|pending| ValueDelta::new(Some(pending.clone()), self.committed.clone())))
    }

    /// Moves the pending value into the committed slot.
    ///
    /// Committing with nothing pending is a protocol violation; call sites
    /// guard on [`ValueDeltaBuffer::buffered_change`], the error stays the
    /// canonical contract.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_enabled()?;
        match self.pending.take() {
            Some(pending) => {
                self.committed = Some(pending);
                Ok(())
            }
            None => Err(Error::CommitWithoutPending),
        }
    }

    /// The committed container, or `None` when nothing has been committed
    /// yet.
    pub fn committed_value(&self) -> Result<Option<ValueBox<V>>> {
        self.ensure_enabled()?;
        Ok(self.committed.clone())
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.enabled { Ok(()) } else { Err(Error::BufferDisabled) }
    }
}
