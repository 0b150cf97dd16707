//! Interrupt handling for long-running scripts.
//!
//! The engine polls the runtime's interrupt handler while it executes
//! bytecode. One trampoline is installed per runtime; it consults the
//! evaluation deadline (from `QjsConfig::timeout_ms`) and then the optional
//! user handler. Raising an interrupt makes the engine throw an uncatchable
//! `InternalError: interrupted`.

use std::cell::RefCell;
use std::ffi::{c_int, c_void};
use std::time::{Duration, Instant};

use crate::ffi::JSRuntime;

pub(crate) type InterruptHandler = dyn FnMut() -> bool;

pub(crate) struct InterruptState {
    handler: Option<Box<InterruptHandler>>,
    /// Bumped whenever the handler is replaced or cleared.
    generation: u64,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    /// Nesting depth of script entry; host functions may re-enter.
    depth: u32,
    timed_out: bool,
}

impl InterruptState {
    pub(crate) fn new(timeout_ms: Option<u64>) -> Self {
        Self {
            handler: None,
            generation: 0,
            timeout: timeout_ms.map(Duration::from_millis),
            deadline: None,
            depth: 0,
            timed_out: false,
        }
    }

    pub(crate) fn set_handler(&mut self, handler: Box<InterruptHandler>) {
        self.handler = Some(handler);
        self.generation += 1;
    }

    pub(crate) fn clear_handler(&mut self) {
        self.handler = None;
        self.generation += 1;
    }

    /// Start the deadline on the outermost entry into script.
    pub(crate) fn enter(&mut self) {
        if self.depth == 0 {
            self.timed_out = false;
            self.deadline = self.timeout.map(|t| Instant::now() + t);
        }
        self.depth += 1;
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.deadline = None;
        }
    }

    /// Whether script is running somewhere up the stack.
    pub(crate) fn in_script(&self) -> bool {
        self.depth > 0
    }

    /// Timeout in milliseconds if the last interrupt came from the
    /// deadline. Clears the flag.
    pub(crate) fn take_timeout(&mut self) -> Option<u64> {
        if !std::mem::take(&mut self.timed_out) {
            return None;
        }
        self.timeout.map(|t| t.as_millis() as u64)
    }

    /// Flag a timeout again after its exception was rethrown.
    pub(crate) fn mark_timed_out(&mut self) {
        self.timed_out = true;
    }

    fn deadline_passed(&mut self) -> bool {
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            self.timed_out = true;
            return true;
        }
        false
    }

    fn lend_handler(&mut self) -> Option<(Box<InterruptHandler>, u64)> {
        self.handler.take().map(|handler| (handler, self.generation))
    }

    /// Put a lent handler back unless it was replaced or cleared while out.
    fn return_handler(&mut self, handler: Box<InterruptHandler>, generation: u64) {
        if self.generation == generation && self.handler.is_none() {
            self.handler = Some(handler);
        }
    }
}

/// Check the deadline, then ask the user handler.
///
/// The handler runs with the state unborrowed, so it may install or clear
/// handlers itself.
fn poll(state: &RefCell<InterruptState>) -> bool {
    // Busy means the host is reconfiguring the handler from a callback.
    let lent = match state.try_borrow_mut() {
        Ok(mut state) => {
            if state.deadline_passed() {
                return true;
            }
            state.lend_handler()
        }
        Err(_) => return false,
    };
    let Some((mut handler, generation)) = lent else {
        return false;
    };
    let interrupt = handler();
    if let Ok(mut state) = state.try_borrow_mut() {
        state.return_handler(handler, generation);
    }
    interrupt
}

/// Runtime interrupt callback. `opaque` points at the context's
/// `RefCell<InterruptState>`, which outlives the runtime.
pub(crate) unsafe extern "C" fn interrupt_trampoline(
    _rt: *mut JSRuntime,
    opaque: *mut c_void,
) -> c_int {
    if opaque.is_null() {
        return 0;
    }
    // SAFETY: installed by ContextInner with a pointer to its boxed state
    let state = unsafe { &*opaque.cast::<RefCell<InterruptState>>() };
    c_int::from(poll(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_no_deadline_without_timeout() {
        let state = RefCell::new(InterruptState::new(None));
        state.borrow_mut().enter();
        assert!(!poll(&state));
        state.borrow_mut().leave();
        assert!(state.borrow_mut().take_timeout().is_none());
    }

    #[test]
    fn test_expired_deadline_interrupts() {
        let state = RefCell::new(InterruptState::new(Some(0)));
        state.borrow_mut().enter();
        assert!(poll(&state));
        state.borrow_mut().leave();
        let mut state = state.borrow_mut();
        assert_eq!(state.take_timeout(), Some(0));
        assert_eq!(state.take_timeout(), None);
        state.mark_timed_out();
        assert_eq!(state.take_timeout(), Some(0));
    }

    #[test]
    fn test_nested_entry_keeps_outer_deadline() {
        let mut state = InterruptState::new(Some(60_000));
        assert!(!state.in_script());
        state.enter();
        let outer = state.deadline;
        state.enter();
        state.leave();
        assert_eq!(state.deadline, outer);
        assert!(state.in_script());
        state.leave();
        assert!(state.deadline.is_none());
        assert!(!state.in_script());
    }

    #[test]
    fn test_user_handler() {
        let state = RefCell::new(InterruptState::new(None));
        let mut calls = 0;
        state.borrow_mut().set_handler(Box::new(move || {
            calls += 1;
            calls > 2
        }));
        assert!(!poll(&state));
        assert!(!poll(&state));
        assert!(poll(&state));
        assert!(state.borrow_mut().take_timeout().is_none());

        state.borrow_mut().clear_handler();
        assert!(!poll(&state));
    }

    #[test]
    fn test_handler_clears_itself() {
        let state = Rc::new(RefCell::new(InterruptState::new(None)));
        let weak = Rc::downgrade(&state);
        state.borrow_mut().set_handler(Box::new(move || {
            if let Some(state) = weak.upgrade() {
                state.borrow_mut().clear_handler();
            }
            true
        }));

        assert!(poll(&state));
        assert!(state.borrow().handler.is_none());
        assert!(!poll(&state));
    }

    #[test]
    fn test_handler_replaces_itself() {
        let state = Rc::new(RefCell::new(InterruptState::new(None)));
        let weak = Rc::downgrade(&state);
        state.borrow_mut().set_handler(Box::new(move || {
            if let Some(state) = weak.upgrade() {
                state.borrow_mut().set_handler(Box::new(|| true));
            }
            false
        }));

        assert!(!poll(&state));
        // The replacement is kept instead of the handler that installed it.
        assert!(poll(&state));
        assert!(poll(&state));
    }
}
