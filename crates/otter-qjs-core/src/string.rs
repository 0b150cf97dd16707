//! String conversion between Rust and the engine.

use std::ffi::c_char;

use crate::ffi::{self, JSContext, JSValue};

/// UTF-8 bytes borrowed from the engine by `JS_ToCStringLen`.
///
/// Released with `JS_FreeCString` on drop.
pub(crate) struct EngineStr {
    ctx: *mut JSContext,
    ptr: *const c_char,
    len: usize,
}

impl EngineStr {
    /// Convert any value to its string form.
    ///
    /// Returns `None` when the conversion throws (symbols, a throwing
    /// `toString`); the exception is left pending for the caller.
    ///
    /// # Safety
    ///
    /// `ctx` must be alive and `value` must belong to it.
    pub(crate) unsafe fn from_value(ctx: *mut JSContext, value: JSValue) -> Option<Self> {
        let mut len = 0usize;
        // SAFETY: guaranteed by the caller
        let ptr = unsafe { ffi::JS_ToCStringLen(ctx, &mut len, value) };
        if ptr.is_null() {
            return None;
        }
        Some(Self { ctx, ptr, len })
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        // SAFETY: the engine guarantees `len` readable bytes until freed
        unsafe { std::slice::from_raw_parts(self.ptr.cast::<u8>(), self.len) }
    }

    /// Lone surrogates come out of the engine as invalid UTF-8 and are
    /// replaced.
    pub(crate) fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

impl Drop for EngineStr {
    fn drop(&mut self) {
        // SAFETY: ptr came from JS_ToCStringLen on this context
        unsafe { ffi::JS_FreeCString(self.ctx, self.ptr) };
    }
}

/// Create an engine string from UTF-8. Interior NUL bytes are kept.
///
/// Returns the exception marker if the engine is out of memory.
///
/// # Safety
///
/// `ctx` must be alive.
pub(crate) unsafe fn new_string(ctx: *mut JSContext, s: &str) -> JSValue {
    // SAFETY: the engine copies `len` bytes and needs no terminator
    unsafe { ffi::JS_NewStringLen(ctx, s.as_ptr().cast::<c_char>(), s.len() as _) }
}
