//! Value handles with explicit ownership
//!
//! A `QjsValue` owns exactly one engine reference count and gives it back
//! when dropped (or when `free` consumes it). A `QjsValueRef` is a borrowed
//! view that owns nothing; its lifetime is tied to whatever it was borrowed
//! from, so it cannot outlive the count that keeps the engine value alive.
//!
//! Both carry a weak back-reference to their context. Once the context is
//! torn down every operation on a surviving handle degrades to `undefined`,
//! `None` or `false`, and dropping it does nothing.

use serde::de::DeserializeOwned;
use std::ffi::c_int;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::array::QjsArray;
use crate::context::ContextInner;
use crate::convert::FromQjs;
use crate::error::{QjsError, QjsResult};
use crate::ffi::{self, JSValue, QjsType};
use crate::handles::SlotId;
use crate::object::QjsObject;
use crate::string::EngineStr;

/// An owning handle on an engine value.
///
/// # Thread Safety
///
/// This type is `!Send` and `!Sync`: engine reference counts are not
/// atomic and the context it points back to is confined to one thread.
pub struct QjsValue {
    raw: JSValue,
    ctx: Weak<ContextInner>,
    /// Present while this handle holds a tracked count.
    slot: Option<SlotId>,
}

/// A borrowed view of an engine value. Owns no reference count.
#[derive(Clone, Copy)]
pub struct QjsValueRef<'a> {
    raw: JSValue,
    ctx: &'a Weak<ContextInner>,
}

impl<'a> QjsValueRef<'a> {
    pub(crate) fn new(raw: JSValue, ctx: &'a Weak<ContextInner>) -> Self {
        Self { raw, ctx }
    }

    pub(crate) fn raw(&self) -> JSValue {
        self.raw
    }

    pub(crate) fn context(&self) -> Option<Rc<ContextInner>> {
        self.ctx.upgrade()
    }

    pub(crate) fn owner(&self) -> &'a Weak<ContextInner> {
        self.ctx
    }
}

/// Operations shared by every kind of handle: owning values, borrowed
/// views and the object/array/function facades.
pub trait QjsHandle {
    /// Borrow this handle as a view.
    fn as_value_ref(&self) -> QjsValueRef<'_>;

    /// Engine type of the value, read from its tag.
    fn type_of(&self) -> QjsType {
        ffi::type_of(self.as_value_ref().raw)
    }

    fn is_undefined(&self) -> bool {
        self.type_of() == QjsType::Undefined
    }

    fn is_null(&self) -> bool {
        self.type_of() == QjsType::Null
    }

    fn is_boolean(&self) -> bool {
        self.type_of() == QjsType::Bool
    }

    fn is_number(&self) -> bool {
        self.type_of().is_number()
    }

    fn is_string(&self) -> bool {
        self.type_of() == QjsType::String
    }

    fn is_symbol(&self) -> bool {
        self.type_of() == QjsType::Symbol
    }

    fn is_object(&self) -> bool {
        self.type_of() == QjsType::Object
    }

    /// Whether this is the engine's exception marker. The thrown value
    /// itself is pending in the context; see [`QjsValue::into_result`].
    fn is_exception(&self) -> bool {
        self.type_of() == QjsType::Exception
    }

    /// Check if the value is callable. False without a live context.
    fn is_function(&self) -> bool {
        let view = self.as_value_ref();
        if !self.is_object() {
            return false;
        }
        view.context().is_some_and(|inner| {
            // SAFETY: the context is alive and the value belongs to it
            unsafe { ffi::JS_IsFunction(inner.raw_ctx(), view.raw) != 0 }
        })
    }

    /// Check if the value is an array. False without a live context.
    fn is_array(&self) -> bool {
        let view = self.as_value_ref();
        if !self.is_object() {
            return false;
        }
        view.context().is_some_and(|inner| {
            // SAFETY: the context is alive and the value belongs to it
            unsafe { ffi::JS_IsArray(inner.raw_ctx(), view.raw) > 0 }
        })
    }

    /// Take a new owning handle on the same engine value.
    fn dup(&self) -> QjsValue {
        let view = self.as_value_ref();
        match view.context() {
            Some(inner) => inner.dup(view.raw),
            None if !ffi::has_ref_count(view.raw) => QjsValue::detached(view.raw),
            None => QjsValue::undefined(),
        }
    }

    /// Convert to a native value. `None` on type mismatch or without a
    /// live context.
    ///
    /// An exception already pending in the engine survives the conversion,
    /// even one that runs getters which throw.
    fn get<T: FromQjs>(&self) -> Option<T>
    where
        Self: Sized,
    {
        let view = self.as_value_ref();
        match view.context() {
            Some(inner) => inner.preserving_exception(|| T::from_qjs(view)),
            None => T::from_qjs(view),
        }
    }

    /// Like [`get`](Self::get), but reports a mismatch as a type error.
    fn get_as<T: FromQjs>(&self) -> QjsResult<T>
    where
        Self: Sized,
    {
        self.get::<T>()
            .ok_or_else(|| QjsError::type_error(std::any::type_name::<T>(), self.type_of().name()))
    }

    /// Serialize through the engine's `JSON.stringify` with the given
    /// indentation (0 for compact output).
    fn to_json_text(&self, indent: u32) -> QjsResult<String> {
        let view = self.as_value_ref();
        let inner = view.context().ok_or(QjsError::NoContext)?;
        let ctx = inner.raw_ctx();

        let space = ffi::JS_NewFloat64(f64::from(indent));
        // SAFETY: ctx is alive; the space argument is an immediate number
        let raw = unsafe { ffi::JS_JSONStringify(ctx, view.raw, ffi::undefined(), space) };
        let json = inner.check(raw)?;
        if !json.is_string() {
            return Err(QjsError::type_error(
                "JSON-serializable value",
                self.type_of().name(),
            ));
        }

        // SAFETY: json is a live string value of this context
        unsafe { EngineStr::from_value(ctx, json.raw) }
            .map(|s| s.to_string_lossy())
            .ok_or_else(|| inner.take_error())
    }

    /// Compact JSON text of the value
    fn to_json(&self) -> QjsResult<String> {
        self.to_json_text(0)
    }

    /// Deserialize from JSON to Rust type
    fn deserialize<T: DeserializeOwned>(&self) -> QjsResult<T>
    where
        Self: Sized,
    {
        let json = self.to_json()?;
        serde_json::from_str(&json).map_err(QjsError::JsonError)
    }

    /// Call the value as a function. Script errors come back as an
    /// exception value; calling a non-function throws a `TypeError` into
    /// the engine the same way script would.
    fn call(&self, this: Option<&QjsValue>, args: &[&QjsValue]) -> QjsValue {
        let view = self.as_value_ref();
        let Some(inner) = view.context() else {
            return QjsValue::undefined();
        };
        if !self.is_function() {
            return inner.throw_type_error("value is not a function");
        }

        let this_raw = match this {
            Some(this) if !inner.owns(this.as_value_ref()) => {
                return inner.throw_type_error("'this' belongs to another context");
            }
            Some(this) => this.raw,
            None => ffi::undefined(),
        };
        let mut argv = Vec::with_capacity(args.len());
        for arg in args {
            if !inner.owns(arg.as_value_ref()) {
                return inner.throw_type_error("argument belongs to another context");
            }
            argv.push(arg.raw);
        }

        let _guard = inner.enter_script();
        // SAFETY: every value passed belongs to this live context
        let raw = unsafe {
            ffi::JS_Call(
                inner.raw_ctx(),
                view.raw,
                this_raw,
                argv.len() as c_int,
                argv.as_mut_ptr(),
            )
        };
        inner.adopt(raw)
    }
}

impl QjsHandle for QjsValueRef<'_> {
    fn as_value_ref(&self) -> QjsValueRef<'_> {
        *self
    }
}

impl QjsHandle for QjsValue {
    fn as_value_ref(&self) -> QjsValueRef<'_> {
        QjsValueRef::new(self.raw, &self.ctx)
    }
}

impl QjsValue {
    /// Wrap a value whose count the context has already recorded.
    pub(crate) fn from_parts(raw: JSValue, ctx: Weak<ContextInner>, slot: Option<SlotId>) -> Self {
        Self { raw, ctx, slot }
    }

    /// A handle bound to no context. Only valid for immediate values.
    pub(crate) fn detached(raw: JSValue) -> Self {
        debug_assert!(!ffi::has_ref_count(raw));
        Self {
            raw,
            ctx: Weak::new(),
            slot: None,
        }
    }

    /// The inert `undefined` returned by operations without a live context.
    pub fn undefined() -> Self {
        Self::detached(ffi::undefined())
    }

    /// A context-free `null`.
    pub fn null() -> Self {
        Self::detached(ffi::null())
    }

    pub(crate) fn raw(&self) -> JSValue {
        self.raw
    }

    pub(crate) fn owner(&self) -> &Weak<ContextInner> {
        &self.ctx
    }

    pub(crate) fn context(&self) -> Option<Rc<ContextInner>> {
        self.ctx.upgrade()
    }

    /// Give up the tracked count without releasing it. The caller becomes
    /// responsible for it (the engine, when handing a value back from a
    /// host function).
    pub(crate) fn take_slot(&mut self) -> Option<SlotId> {
        self.slot.take()
    }

    /// Whether this handle holds an engine reference count.
    pub fn is_owning(&self) -> bool {
        self.slot.is_some() && self.ctx.strong_count() > 0
    }

    /// Whether the context this handle came from is gone.
    pub fn is_detached(&self) -> bool {
        self.ctx.strong_count() == 0
    }

    /// Release this handle's reference count now.
    ///
    /// Consumes the handle, so a value can never be freed twice:
    ///
    /// ```compile_fail
    /// use otter_qjs_core::QjsContext;
    ///
    /// let ctx = QjsContext::new().unwrap();
    /// let value = ctx.eval("({})").unwrap();
    /// value.free();
    /// value.free();
    /// ```
    pub fn free(self) {
        drop(self)
    }

    /// Turn an exception value into the error it carries. Any other value
    /// is returned unchanged.
    pub fn into_result(self) -> QjsResult<QjsValue> {
        if !self.is_exception() {
            return Ok(self);
        }
        let inner = self.context().ok_or(QjsError::NoContext)?;
        Err(inner.take_error())
    }

    /// Narrow to an object facade, moving this handle's count into it.
    /// Gives the value back unchanged when it is not an object.
    pub fn into_object(self) -> Result<QjsObject, QjsValue> {
        if self.is_object() {
            Ok(QjsObject::from_value(self))
        } else {
            Err(self)
        }
    }

    /// Narrow to an array facade, moving this handle's count into it.
    pub fn into_array(self) -> Result<QjsArray, QjsValue> {
        if self.is_array() {
            Ok(QjsArray::from_object(QjsObject::from_value(self)))
        } else {
            Err(self)
        }
    }
}

impl Drop for QjsValue {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        // A dead context already released everything it handed out.
        if let Some(inner) = self.ctx.upgrade() {
            inner.release(slot);
        }
    }
}

impl Clone for QjsValue {
    fn clone(&self) -> Self {
        self.dup()
    }
}

impl fmt::Debug for QjsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QjsValue")
            .field("type", &self.type_of())
            .field("owning", &self.is_owning())
            .finish()
    }
}

impl fmt::Debug for QjsValueRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QjsValueRef({})", self.type_of())
    }
}

/// Build a structured error from a thrown value.
///
/// Error objects contribute their `name`, `message` and `stack`; any other
/// thrown value is reported by its string form.
pub(crate) fn extract_exception(inner: &ContextInner, exception: &QjsValue) -> QjsError {
    if !exception.is_object() {
        let message = string_of(inner, exception.raw).unwrap_or_else(|| "Unknown error".into());
        return QjsError::script_error("Error", message);
    }

    let error_type = string_property(inner, exception.raw, "name").unwrap_or_else(|| "Error".into());
    let message = string_property(inner, exception.raw, "message")
        .or_else(|| string_of(inner, exception.raw))
        .unwrap_or_else(|| "Unknown error".into());
    let stack = string_property(inner, exception.raw, "stack").filter(|s| !s.is_empty());

    if error_type == "SyntaxError" {
        QjsError::SyntaxError { message, stack }
    } else {
        QjsError::script_error_with_stack(error_type, message, stack)
    }
}

/// Read a string-valued property, ignoring anything that is not a string.
fn string_property(inner: &ContextInner, object: JSValue, name: &str) -> Option<String> {
    let value = inner.get_property(object, name);
    if value.is_exception() {
        inner.discard_exception();
        return None;
    }
    if !value.is_string() {
        return None;
    }
    string_of(inner, value.raw)
}

/// String form of any value, as `String(value)` would produce it.
fn string_of(inner: &ContextInner, value: JSValue) -> Option<String> {
    // SAFETY: value belongs to the live context
    match unsafe { EngineStr::from_value(inner.raw_ctx(), value) } {
        Some(s) => Some(s.to_string_lossy()),
        None => {
            // Symbols and throwing toString() land here.
            inner.discard_exception();
            None
        }
    }
}
