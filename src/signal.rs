//! Single-threaded notification signals.
//!
//! A [`Signal`] keeps an ordered list of slots. Connecting a slot returns a
//! [`SubscriptionToken`] that is the only way to disconnect it again, so no
//! connection state is hidden inside the receiver.
//!
//! Slots run synchronously on the emitting thread. A slot may disconnect
//! itself (or any other slot) while the signal is being emitted; slots
//! removed during an emission are not invoked for the rest of it.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Handle identifying one connected slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

type Slot<T> = Rc<RefCell<dyn FnMut(&T)>>;

/// An observable event source carrying values of type `T`.
pub struct Signal<T: ?Sized + 'static> {
    next_token: Cell<u64>,
    slots: RefCell<Vec<(SubscriptionToken, Slot<T>)>>,
}

impl<T: ?Sized + 'static> Signal<T> {
    /// Creates a signal with no connected slots.
    pub fn new() -> Self {
        Self {
            next_token: Cell::new(0),
            slots: RefCell::new(Vec::new()),
        }
    }

    /// Connects a slot and returns the token needed to disconnect it.
    pub fn connect<F>(&self, slot: F) -> SubscriptionToken
    where
        F: FnMut(&T) + 'static,
    {
        let token = SubscriptionToken(self.next_token.get());
        self.next_token.set(token.0 + 1);
        let slot: Slot<T> = Rc::new(RefCell::new(slot));
        self.slots.borrow_mut().push((token, slot));
        token
    }

    /// Disconnects the slot identified by `token`.
    ///
    /// Returns `false` if the token was not (or no longer) connected.
    pub fn disconnect(&self, token: SubscriptionToken) -> bool {
        let mut slots = self.slots.borrow_mut();
        let before = slots.len();
        slots.retain(|(t, _)| *t != token);
        slots.len() != before
    }

    /// Returns true if `token` is currently connected.
    pub fn is_connected(&self, token: SubscriptionToken) -> bool {
        self.slots.borrow().iter().any(|(t, _)| *t == token)
    }

    /// Invokes every connected slot, in connection order.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<(SubscriptionToken, Slot<T>)> = self
            .slots
            .borrow()
            .iter()
            .map(|(token, slot)| (*token, Rc::clone(slot)))
            .collect();

        for (token, slot) in snapshot {
            if !self.is_connected(token) {
                continue;
            }
            // A slot that re-emits the same signal is not re-entered.
            match slot.try_borrow_mut() {
                Ok(mut slot) => (&mut *slot)(value),
                Err(_) => tracing::warn!(?token, "skipping re-entrant signal slot"),
            }
        }
    }

    /// Number of connected slots.
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Returns true if no slot is connected.
    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }
}

impl<T: ?Sized + 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("slots", &self.len())
            .finish()
    }
}
