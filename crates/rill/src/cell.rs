//! Reactive cell: a single-value container with a transaction buffer and an
//! equality gate.
//!
//! The observable value only ever changes through [`Cell::set`],
//! [`Cell::apply`], or a transaction close, and every committed change emits
//! exactly one delta. Writing a value equal to the current one is a no-op —
//! listeners never see redundant emissions.

use std::cell::RefCell;
use std::rc::Rc;

use crate::change::{ValueBox, ValueDelta, ValueInput};
use crate::error::{Error, Result};
use crate::signal::{SignalController, SignalObserver};

/// Constructor options for [`Cell`].
pub struct CellOptions<T> {
    pub value: T,
    pub label: Option<String>,
}

impl<T> CellOptions<T> {
    pub fn new(value: T) -> Self {
        Self { value, label: None }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

struct CellState<T> {
    value: T,
    /// Staged write while a transaction is open.
    staged: Option<T>,
    in_transaction: bool,
    reactive: bool,
}

struct CellShared<T> {
    state: RefCell<CellState<T>>,
    on_change: SignalController<Rc<ValueDelta<T>>>,
    on_switch: SignalController<bool>,
    label: Option<Rc<str>>,
}

/// Reactive single-value container.
///
/// Cheap to clone; clones share the same underlying cell.
pub struct Cell<T> {
    shared: Rc<CellShared<T>>,
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self { shared: Rc::clone(&self.shared) }
    }
}

impl<T: Clone + PartialEq + 'static> Cell<T> {
    pub fn new(value: T) -> Self {
        Self::with_options(CellOptions::new(value))
    }

    pub fn with_options(options: CellOptions<T>) -> Self {
        Self {
            shared: Rc::new(CellShared {
                state: RefCell::new(CellState {
                    value: options.value,
                    staged: None,
                    in_transaction: false,
                    reactive: true,
                }),
                on_change: SignalController::new(),
                on_switch: SignalController::new(),
                label: options.label.map(Into::into),
            }),
        }
    }

    /// Current value, cloned.
    pub fn get(&self) -> T {
        self.shared.state.borrow().value.clone()
    }

    /// Runs `f` against the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.shared.state.borrow().value)
    }

    /// Assigns a new value.
    ///
    /// Inside a transaction the write is staged; otherwise it commits
    /// immediately, emitting one delta unless the value is unchanged.
    pub fn set(&self, next: T) -> Result<()> {
        let delta = {
            let mut state = self.shared.state.borrow_mut();
            if !state.reactive {
                return Err(Error::ReactivityDisabled);
            }
            if state.in_transaction {
                state.staged = Some(next);
                return Ok(());
            }
            match Self::commit(&mut state, next) {
                Some(delta) => delta,
                None => return Ok(()),
            }
        };
        self.shared.on_change.emit(&delta);
        Ok(())
    }

    /// Applies a delta or overwrite payload.
    ///
    /// Overwrites assign the replacement value; deltas assign the increment
    /// value. A delta without an increment carries nothing to assign and is
    /// a no-op.
    pub fn apply(&self, input: ValueInput<T>) -> Result<()> {
        match input {
            ValueInput::Overwrite(overwrite) => self.set(overwrite.overwrite.value),
            ValueInput::Delta(delta) => match delta.increment {
                Some(increment) => self.set(increment.value),
                None => {
                    self.ensure_reactive()?;
                    Ok(())
                }
            },
        }
    }

    /// Opens a transaction; subsequent writes are staged until close.
    /// Re-entrant open is a no-op.
    pub fn open_transaction(&self) -> Result<()> {
        let mut state = self.shared.state.borrow_mut();
        if !state.reactive {
            return Err(Error::ReactivityDisabled);
        }
        if !state.in_transaction {
            state.in_transaction = true;
            state.staged = None;
        }
        Ok(())
    }

    /// Closes the transaction, committing the staged value through the
    /// equality gate. Emits at most one delta.
    pub fn close_transaction(&self) -> Result<()> {
        let delta = {
            let mut state = self.shared.state.borrow_mut();
            if !state.reactive {
                return Err(Error::ReactivityDisabled);
            }
            if !state.in_transaction {
                return Ok(());
            }
            state.in_transaction = false;
            match state.staged.take() {
                Some(next) => match Self::commit(&mut state, next) {
                    Some(delta) => delta,
                    None => return Ok(()),
                },
                None => return Ok(()),
            }
        };
        self.shared.on_change.emit(&delta);
        Ok(())
    }

    /// Discards the transaction buffer without committing.
    pub fn cancel_transaction(&self) -> Result<()> {
        let mut state = self.shared.state.borrow_mut();
        if !state.reactive {
            return Err(Error::ReactivityDisabled);
        }
        state.in_transaction = false;
        state.staged = None;
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.shared.state.borrow().in_transaction
    }

    pub fn is_reactive(&self) -> bool {
        self.shared.state.borrow().reactive
    }

    /// Turns reactivity off: cancels any open transaction and rejects
    /// further mutation until re-enabled. Emits one switch per transition.
    pub fn disable_reactivity(&self) {
        {
            let mut state = self.shared.state.borrow_mut();
            if !state.reactive {
                return;
            }
            state.reactive = false;
            state.in_transaction = false;
            state.staged = None;
        }
        log::trace!("cell{} reactivity disabled", self.label_suffix());
        self.shared.on_switch.emit(&false);
    }

    /// Turns reactivity back on. Emits one switch per transition.
    pub fn enable_reactivity(&self) {
        {
            let mut state = self.shared.state.borrow_mut();
            if state.reactive {
                return;
            }
            state.reactive = true;
        }
        log::trace!("cell{} reactivity enabled", self.label_suffix());
        self.shared.on_switch.emit(&true);
    }

    /// Emitted once per committed change.
    pub fn on_change(&self) -> SignalObserver<Rc<ValueDelta<T>>> {
        self.shared.on_change.observer()
    }

    /// Emitted once per reactivity transition, with the new state.
    pub fn on_switch(&self) -> SignalObserver<bool> {
        self.shared.on_switch.observer()
    }

    pub fn label(&self) -> Option<&str> {
        self.shared.label.as_deref()
    }

    /// Whether two handles refer to the same cell.
    pub fn same_cell(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    fn ensure_reactive(&self) -> Result<()> {
        if self.shared.state.borrow().reactive {
            Ok(())
        } else {
            Err(Error::ReactivityDisabled)
        }
    }

    fn commit(state: &mut CellState<T>, next: T) -> Option<Rc<ValueDelta<T>>> {
        if state.value == next {
            return None;
        }
        let previous = std::mem::replace(&mut state.value, next.clone());
        Some(Rc::new(ValueDelta::new(
            Some(ValueBox::new(next)),
            Some(ValueBox::new(previous)),
        )))
    }

    fn label_suffix(&self) -> String {
        match &self.shared.label {
            Some(label) => format!(" `{label}`"),
            None => String::new(),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("label", &self.shared.label)
            .field("value", &self.shared.state.borrow().value)
            .finish()
    }
}
