//! Delta buffer over a collection source.

use std::collections::HashSet;
use std::hash::Hash;

use crate::change::SetDelta;
use crate::collection::Collection;
use crate::error::{Error, Result};

/// Accumulates uncommitted add/remove deltas from one collection source.
///
/// The two pending sets stay disjoint unconditionally; that is what makes
/// the committed-state formula `(source − pending_added) ∪ pending_removed`
/// reproduce the source as it looked immediately after the last commit.
pub(crate) struct SetDeltaBuffer<S> {
    source: Collection<S>,
    pending_added: HashSet<S>,
    pending_removed: HashSet<S>,
    has_committed_once: bool,
    enabled: bool,
}

impl<S: Clone + Eq + Hash + 'static> SetDeltaBuffer<S> {
    /// New buffer, detached until [`SetDeltaBuffer::enable`].
    pub fn new(source: Collection<S>) -> Self {
        Self {
            source,
            pending_added: HashSet::new(),
            pending_removed: HashSet::new(),
            has_committed_once: false,
            enabled: false,
        }
    }

    pub fn source(&self) -> &Collection<S> {
        &self.source
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Attaches the buffer and stages the entire current source contents as
    /// the initial increment.
    pub fn enable(&mut self) {
        self.enabled = true;
        self.has_committed_once = false;
        self.pending_added = self.source.to_set();
        self.pending_removed.clear();
    }

    /// Detaches the buffer, discarding all staged and committed state.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.has_committed_once = false;
        self.pending_added.clear();
        self.pending_removed.clear();
    }

    /// Folds a source delta into the pending sets.
    pub fn record(&mut self, delta: &SetDelta<S>) {
        debug_assert!(self.enabled, "recording into a disabled buffer");
        for value in delta.removed() {
            self.pending_added.remove(value);
            self.pending_removed.insert(value.clone());
        }
        for value in delta.added() {
            self.pending_removed.remove(value);
            self.pending_added.insert(value.clone());
        }
    }

    /// Copy of the buffered delta, or `None` when nothing is pending.
    pub fn buffered_changes(&self) -> Result<Option<SetDelta<S>>> {
        self.ensure_enabled()?;
        Ok(SetDelta::from_parts(self.pending_added.clone(), self.pending_removed.clone()))
    }

    /// Clears the pending sets. The source itself is untouched; from here
    /// on the committed state tracks the source as of this moment.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_enabled()?;
        self.pending_added.clear();
        self.pending_removed.clear();
        self.has_committed_once = true;
        Ok(())
    }

    /// The source as it looked immediately after the last commit, or `None`
    /// when nothing has been committed yet.
    pub fn committed_state(&self) -> Result<Option<HashSet<S>>> {
        self.ensure_enabled()?;
        if !self.has_committed_once {
            return Ok(None);
        }
        let mut state: HashSet<S> = self
            .source
            .to_set()
            .into_iter()
            .filter(|value| !self.pending_added.contains(value))
            .collect();
        state.extend(self.pending_removed.iter().cloned());
        Ok(Some(state))
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.enabled { Ok(()) } else { Err(Error::BufferDisabled) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set<const N: usize>(values: [u32; N]) -> HashSet<u32> {
        values.into_iter().collect()
    }

    fn delta(increment: HashSet<u32>, decrement: HashSet<u32>) -> SetDelta<u32> {
        SetDelta::from_parts(increment, decrement).unwrap()
    }

    #[test]
    fn enable_stages_the_whole_source_as_initial_increment() {
        let source = Collection::from_values([1u32, 2]);
        let mut buffer = SetDeltaBuffer::new(source);

        buffer.enable();
        let buffered = buffer.buffered_changes().unwrap().unwrap();
        assert_eq!(buffered.increment, Some(set([1, 2])));
        assert_eq!(buffered.decrement, None);
        assert_eq!(buffer.committed_state().unwrap(), None);
    }

    #[test]
    fn committed_state_reproduces_the_source_at_commit_time() {
        let source = Collection::from_values([1u32, 2]);
        let mut buffer = SetDeltaBuffer::new(source.clone());
        buffer.enable();
        buffer.commit().unwrap();

        // Source moves on: +3, -1.
        source.insert(3).unwrap();
        buffer.record(&delta(set([3]), set([])));
        source.remove(&1).unwrap();
        buffer.record(&delta(set([]), set([1])));

        // The committed view still shows {1, 2}.
        assert_eq!(buffer.committed_state().unwrap(), Some(set([1, 2])));

        buffer.commit().unwrap();
        assert_eq!(buffer.committed_state().unwrap(), Some(set([2, 3])));
    }

    #[test]
    fn record_keeps_the_pending_sets_disjoint() {
        let source = Collection::from_values([1u32]);
        let mut buffer = SetDeltaBuffer::new(source);
        buffer.enable();
        buffer.commit().unwrap();

        buffer.record(&delta(set([2]), set([])));
        buffer.record(&delta(set([]), set([2])));
        // Add cancelled by remove; remove of 2 stays staged.
        let buffered = buffer.buffered_changes().unwrap().unwrap();
        assert_eq!(buffered.increment, None);
        assert_eq!(buffered.decrement, Some(set([2])));

        buffer.record(&delta(set([2]), set([])));
        let buffered = buffer.buffered_changes().unwrap().unwrap();
        assert_eq!(buffered.increment, Some(set([2])));
        assert_eq!(buffered.decrement, None);
    }

    #[test]
    fn commit_clears_pending_and_empty_buffer_reports_none() {
        let source = Collection::from_values([1u32]);
        let mut buffer = SetDeltaBuffer::new(source);
        buffer.enable();

        buffer.commit().unwrap();
        assert_eq!(buffer.buffered_changes().unwrap(), None);
    }

    #[test]
    fn disabled_buffer_rejects_extraction_and_commit() {
        let source = Collection::from_values([1u32]);
        let mut buffer = SetDeltaBuffer::new(source);

        assert!(matches!(buffer.buffered_changes(), Err(Error::BufferDisabled)));
        assert!(matches!(buffer.commit(), Err(Error::BufferDisabled)));
        assert!(matches!(buffer.committed_state(), Err(Error::BufferDisabled)));

        buffer.enable();
        buffer.disable();
        assert!(matches!(buffer.buffered_changes(), Err(Error::BufferDisabled)));
    }
}
