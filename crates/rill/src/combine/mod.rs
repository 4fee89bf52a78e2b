//! Derived nodes: read-only collections computed from reactive sources.
//!
//! A combination owns its result collection and a lifecycle flag. Disabling
//! emits the switch first (so dependents unmount against the still-populated
//! result), then clears the result with a delta for plain observers, then
//! detaches the sources. Enabling mounts the sources and rebuilds the result
//! before the switch goes out, so dependents remount against the final
//! state. Redundant transitions are no-ops.

mod variadic;

pub use variadic::{Difference, Intersection, Union};

/// Constructor options shared by every combinator.
pub struct CombineOptions {
    pub label: Option<String>,
    /// Whether the combination starts enabled.
    pub enabled: bool,
}

impl Default for CombineOptions {
    fn default() -> Self {
        Self { label: None, enabled: true }
    }
}

impl CombineOptions {
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
