//! Bookkeeping for reference counts held by the bridge.
//!
//! Every count the bridge owns on an engine value is recorded here: one
//! entry per live owning handle (a slot) plus anchors held by the binding
//! registry. The per-identity tally is what `QjsContext::outstanding_refs`
//! reports; it returns to zero once every owning handle on a value is gone.
//! Slots also let context teardown release whatever is still outstanding
//! before the runtime is destroyed.

use rustc_hash::FxHashMap;

use crate::ffi::{self, JSValue};

/// Identifier of a live owning handle inside its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotId(u64);

#[derive(Default)]
pub(crate) struct HandleTable {
    next: u64,
    live: FxHashMap<SlotId, JSValue>,
    refs: FxHashMap<usize, usize>,
}

impl HandleTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a count now owned by a handle. Values without a reference
    /// count need no slot.
    pub(crate) fn track(&mut self, value: JSValue) -> Option<SlotId> {
        let id = ffi::identity(value)?;
        let slot = SlotId(self.next);
        self.next += 1;
        self.live.insert(slot, value);
        *self.refs.entry(id).or_insert(0) += 1;
        Some(slot)
    }

    /// Forget a slot, returning the value whose count the caller must now
    /// release or hand on.
    pub(crate) fn untrack(&mut self, slot: SlotId) -> Option<JSValue> {
        let value = self.live.remove(&slot)?;
        if let Some(id) = ffi::identity(value) {
            self.decrement(id);
        }
        Some(value)
    }

    /// Record a count held outside any handle (binding anchors).
    pub(crate) fn retain_anchor(&mut self, value: JSValue) {
        if let Some(id) = ffi::identity(value) {
            *self.refs.entry(id).or_insert(0) += 1;
        }
    }

    pub(crate) fn release_anchor(&mut self, value: JSValue) {
        if let Some(id) = ffi::identity(value) {
            self.decrement(id);
        }
    }

    fn decrement(&mut self, id: usize) {
        if let Some(count) = self.refs.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                self.refs.remove(&id);
            }
        }
    }

    /// Counts the bridge currently holds on the value at `id`.
    pub(crate) fn outstanding(&self, id: usize) -> usize {
        self.refs.get(&id).copied().unwrap_or(0)
    }

    /// Number of live owning handles on counted values.
    pub(crate) fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Take every outstanding slot, for teardown.
    pub(crate) fn drain(&mut self) -> Vec<JSValue> {
        let values: Vec<JSValue> = self.live.drain().map(|(_, v)| v).collect();
        for value in &values {
            if let Some(id) = ffi::identity(*value) {
                self.decrement(id);
            }
        }
        values
    }
}
