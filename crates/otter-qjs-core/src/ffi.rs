//! Thin layer over the raw QuickJS bindings.
//!
//! Everything that has to know how the engine lays out a `JSValue` lives
//! here: tag decoding, identity, and the immediate-value constants. The rest
//! of the crate calls the engine API directly but never inspects a value's
//! representation on its own.

pub(crate) use rquickjs_sys::*;

use std::ffi::{CString, c_int};

use crate::error::{QjsError, QjsResult};

/// Engine-level type of a value, decoded from its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QjsType {
    Undefined,
    Null,
    Bool,
    Int,
    Float,
    String,
    Symbol,
    Object,
    Exception,
    /// Any tag the bridge does not marshal (big numbers, module records,
    /// uninitialized slots).
    Other,
}

impl QjsType {
    /// Name used in diagnostics and type errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool => "boolean",
            Self::Int | Self::Float => "number",
            Self::String => "string",
            Self::Symbol => "symbol",
            Self::Object => "object",
            Self::Exception => "exception",
            Self::Other => "unknown",
        }
    }

    pub fn is_number(self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }
}

impl std::fmt::Display for QjsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Decode the tag of a raw value. Reads only the tag word, never the
/// payload, so it is valid even for values whose context is gone.
pub(crate) fn type_of(value: JSValue) -> QjsType {
    // SAFETY: reading the tag does not dereference the value
    let tag = unsafe { JS_VALUE_GET_NORM_TAG(value) };
    match tag {
        JS_TAG_UNDEFINED => QjsType::Undefined,
        JS_TAG_NULL => QjsType::Null,
        JS_TAG_BOOL => QjsType::Bool,
        JS_TAG_INT => QjsType::Int,
        JS_TAG_FLOAT64 => QjsType::Float,
        JS_TAG_STRING => QjsType::String,
        JS_TAG_SYMBOL => QjsType::Symbol,
        JS_TAG_OBJECT => QjsType::Object,
        JS_TAG_EXCEPTION => QjsType::Exception,
        _ => QjsType::Other,
    }
}

/// Whether the value carries an engine reference count.
///
/// Mirrors `JS_VALUE_HAS_REF_COUNT`: every heap tag is negative.
pub(crate) fn has_ref_count(value: JSValue) -> bool {
    // SAFETY: tag-only read
    let tag = unsafe { JS_VALUE_GET_NORM_TAG(value) };
    (tag as i32) < 0
}

/// Address of the engine allocation behind a counted value.
pub(crate) fn identity(value: JSValue) -> Option<usize> {
    if !has_ref_count(value) {
        return None;
    }
    // SAFETY: counted values always carry a heap pointer
    Some(unsafe { JS_VALUE_GET_PTR(value) } as usize)
}

pub(crate) fn undefined() -> JSValue {
    JS_UNDEFINED
}

pub(crate) fn null() -> JSValue {
    JS_NULL
}

pub(crate) fn boolean(b: bool) -> JSValue {
    if b { JS_TRUE } else { JS_FALSE }
}

pub(crate) fn exception() -> JSValue {
    JS_EXCEPTION
}

/// Eval flags for plain global scripts.
pub(crate) fn eval_global_flags() -> c_int {
    JS_EVAL_TYPE_GLOBAL as c_int
}

/// Build a C string for the engine, rejecting interior NUL bytes.
pub(crate) fn c_string(s: &str) -> QjsResult<CString> {
    CString::new(s).map_err(|e| QjsError::StringEncoding(e.to_string()))
}
