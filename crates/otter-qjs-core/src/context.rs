//! Engine runtime and context ownership
//!
//! `QjsContext` owns one engine runtime with a single context. Every engine
//! reference count the bridge takes or gives back goes through
//! `ContextInner`, which records it in the handle table. Handles point back
//! at the context weakly, so tearing the context down first releases every
//! count still held by a surviving handle and then destroys the engine;
//! those handles become inert.

use serde::Serialize;
use std::cell::RefCell;
use std::ffi::c_void;
use std::fmt;
use std::ptr;
use std::rc::{Rc, Weak};
use tracing::{debug, trace, warn};

use crate::array::QjsArray;
use crate::binding::BindingRegistry;
use crate::config::QjsConfig;
use crate::error::{QjsError, QjsResult};
use crate::ffi::{self, JSContext, JSRuntime, JSValue};
use crate::handles::{HandleTable, SlotId};
use crate::interrupt::{InterruptState, interrupt_trampoline};
use crate::object::QjsObject;
use crate::string;
use crate::value::{QjsHandle, QjsValue, QjsValueRef, extract_exception};

/// Shared state behind a context. Handles hold it weakly.
pub(crate) struct ContextInner {
    rt: *mut JSRuntime,
    ctx: *mut JSContext,
    this: Weak<ContextInner>,
    config: QjsConfig,
    handles: RefCell<HandleTable>,
    pub(crate) bindings: RefCell<BindingRegistry>,
    /// Boxed so the runtime's interrupt opaque pointer stays stable.
    interrupt: Box<RefCell<InterruptState>>,
    caught: RefCell<Option<CaughtException>>,
}

/// An exception taken while script was running further up the stack.
///
/// Kept so the host function it unwinds through can throw the same value
/// again: QuickJS marks uncatchable errors on the error object itself.
pub(crate) struct CaughtException {
    value: QjsValue,
    /// `Display` of the error reported for it.
    summary: String,
    timed_out: bool,
}

impl CaughtException {
    /// Whether `error` is the one reported for this exception.
    pub(crate) fn reported_as(&self, error: &QjsError) -> bool {
        match error {
            QjsError::Timeout(_) => self.timed_out,
            QjsError::ScriptError { .. } | QjsError::SyntaxError { .. } => {
                !self.timed_out && error.to_string() == self.summary
            }
            _ => false,
        }
    }
}

/// Keeps the interrupt deadline armed while script runs.
pub(crate) struct ScriptGuard<'a> {
    inner: &'a ContextInner,
}

impl Drop for ScriptGuard<'_> {
    fn drop(&mut self) {
        self.inner.interrupt.borrow_mut().leave();
    }
}

impl ContextInner {
    pub(crate) fn raw_ctx(&self) -> *mut JSContext {
        self.ctx
    }

    pub(crate) fn weak(&self) -> &Weak<ContextInner> {
        &self.this
    }

    /// Wrap a value returned by the engine whose count the caller now owns.
    pub(crate) fn adopt(&self, raw: JSValue) -> QjsValue {
        let slot = self.handles.borrow_mut().track(raw);
        QjsValue::from_parts(raw, self.this.clone(), slot)
    }

    /// Like [`adopt`](Self::adopt), but turns the exception marker into
    /// the pending error.
    pub(crate) fn check(&self, raw: JSValue) -> QjsResult<QjsValue> {
        if ffi::type_of(raw) == ffi::QjsType::Exception {
            return Err(self.take_error());
        }
        Ok(self.adopt(raw))
    }

    /// Take one more count on a value and wrap it.
    pub(crate) fn dup(&self, raw: JSValue) -> QjsValue {
        // SAFETY: raw belongs to this live context
        let raw = unsafe { ffi::JS_DupValue(raw) };
        trace!(id = ?ffi::identity(raw), "dup");
        self.adopt(raw)
    }

    /// Give back the count held by a slot.
    pub(crate) fn release(&self, slot: SlotId) {
        let raw = self.handles.borrow_mut().untrack(slot);
        if let Some(raw) = raw {
            trace!(id = ?ffi::identity(raw), "free");
            // SAFETY: the slot held exactly this count
            unsafe { ffi::JS_FreeValue(self.ctx, raw) };
        }
    }

    /// Take a count that goes straight to the engine (property stores and
    /// the like consume one). Not recorded: the engine owns it.
    pub(crate) fn hand_to_engine(&self, raw: JSValue) -> JSValue {
        // SAFETY: raw belongs to this live context
        unsafe { ffi::JS_DupValue(raw) }
    }

    /// Move a handle's own count to the engine, consuming the handle.
    pub(crate) fn transfer(&self, mut value: QjsValue) -> QjsResult<JSValue> {
        if !self.owns(value.as_value_ref()) {
            return Err(QjsError::internal("value belongs to another context"));
        }
        let raw = value.raw();
        if let Some(slot) = value.take_slot() {
            self.handles.borrow_mut().untrack(slot);
            trace!(id = ?ffi::identity(raw), "transfer to engine");
        }
        Ok(raw)
    }

    /// Record a count held outside any handle.
    pub(crate) fn retain_anchor(&self, raw: JSValue) -> JSValue {
        let raw = self.hand_to_engine(raw);
        self.handles.borrow_mut().retain_anchor(raw);
        raw
    }

    pub(crate) fn release_anchor(&self, raw: JSValue) {
        self.handles.borrow_mut().release_anchor(raw);
        // SAFETY: the anchor held exactly this count
        unsafe { ffi::JS_FreeValue(self.ctx, raw) };
    }

    /// Whether a value may be used with this context. Immediates belong to
    /// every context.
    pub(crate) fn owns(&self, value: QjsValueRef<'_>) -> bool {
        !ffi::has_ref_count(value.raw()) || Weak::ptr_eq(value.owner(), &self.this)
    }

    /// Clear the pending exception and build an error from it.
    ///
    /// Inside a host function the exception value is kept until the
    /// function returns, see [`take_caught`](Self::take_caught).
    pub(crate) fn take_error(&self) -> QjsError {
        let (timed_out, in_script) = {
            let mut state = self.interrupt.borrow_mut();
            (state.take_timeout(), state.in_script())
        };
        // SAFETY: ctx is alive; the returned count is adopted
        let exception = self.adopt(unsafe { ffi::JS_GetException(self.ctx) });
        let error = match timed_out {
            Some(ms) => {
                debug!(timeout_ms = ms, "script interrupted by timeout");
                QjsError::Timeout(ms)
            }
            None => extract_exception(self, &exception),
        };
        if in_script {
            let caught = CaughtException {
                value: exception,
                summary: error.to_string(),
                timed_out: timed_out.is_some(),
            };
            // Drop the replaced one outside the borrow.
            drop(self.caught.replace(Some(caught)));
        }
        error
    }

    /// Take the exception most recently turned into an error while script
    /// was running.
    pub(crate) fn take_caught(&self) -> Option<CaughtException> {
        self.caught.take()
    }

    pub(crate) fn restore_caught(&self, caught: Option<CaughtException>) {
        drop(self.caught.replace(caught));
    }

    /// Throw a caught exception again, unchanged.
    pub(crate) fn rethrow(&self, caught: CaughtException) -> JSValue {
        if caught.timed_out {
            self.interrupt.borrow_mut().mark_timed_out();
        }
        match self.transfer(caught.value) {
            // SAFETY: JS_Throw takes over the transferred count
            Ok(raw) => unsafe { ffi::JS_Throw(self.ctx, raw) },
            Err(err) => self.throw_error("InternalError", &err.to_string()),
        }
    }

    /// Run `f` with the pending exception set aside. Whatever `f` leaves
    /// pending is discarded and the earlier exception is reinstated, along
    /// with the caught exception a host function may still rethrow.
    pub(crate) fn preserving_exception<R>(&self, f: impl FnOnce() -> R) -> R {
        // SAFETY: ctx is alive. With nothing pending the engine hands back
        // null, which is also what it stores for "no exception".
        let saved = unsafe { ffi::JS_GetException(self.ctx) };
        let caught = self.take_caught();
        let _restore = scopeguard::guard((saved, caught), |(saved, caught)| {
            // SAFETY: JS_Throw frees the current exception and takes over
            // the saved count
            unsafe { ffi::JS_Throw(self.ctx, saved) };
            self.restore_caught(caught);
        });
        f()
    }

    /// Clear the pending exception without reporting it.
    pub(crate) fn discard_exception(&self) {
        // SAFETY: ctx is alive
        let raw = unsafe { ffi::JS_GetException(self.ctx) };
        // SAFETY: JS_GetException handed us its count
        unsafe { ffi::JS_FreeValue(self.ctx, raw) };
    }

    /// Throw a `TypeError` into the engine and return the exception value.
    pub(crate) fn throw_type_error(&self, message: &str) -> QjsValue {
        let message = ffi::c_string(message)
            .unwrap_or_else(|_| c"invalid message".to_owned());
        // SAFETY: format and argument are valid C strings
        let raw = unsafe { ffi::JS_ThrowTypeError(self.ctx, c"%s".as_ptr(), message.as_ptr()) };
        self.adopt(raw)
    }

    /// Throw an `Error` with the given name and message.
    pub(crate) fn throw_error(&self, name: &str, message: &str) -> JSValue {
        // SAFETY: ctx is alive; JS_Throw consumes the error object
        unsafe {
            let error = ffi::JS_NewError(self.ctx);
            if ffi::type_of(error) == ffi::QjsType::Exception {
                return error;
            }
            for (key, text) in [(c"name", name), (c"message", message)] {
                let value = string::new_string(self.ctx, text);
                if ffi::type_of(value) != ffi::QjsType::Exception {
                    ffi::JS_SetPropertyStr(self.ctx, error, key.as_ptr(), value);
                }
            }
            ffi::JS_Throw(self.ctx, error)
        }
    }

    /// Arm the interrupt deadline until the guard drops.
    pub(crate) fn enter_script(&self) -> ScriptGuard<'_> {
        self.interrupt.borrow_mut().enter();
        ScriptGuard { inner: self }
    }

    /// Read a property. Returns an owning handle, the exception value if a
    /// getter throws, or `undefined` for names the engine cannot take.
    pub(crate) fn get_property(&self, object: JSValue, name: &str) -> QjsValue {
        let Ok(c_name) = ffi::c_string(name) else {
            warn!(name, "property name contains a NUL byte");
            return QjsValue::undefined();
        };
        // SAFETY: object belongs to this context; the result is owned
        let raw = unsafe { ffi::JS_GetPropertyStr(self.ctx, object, c_name.as_ptr()) };
        self.adopt(raw)
    }

    /// Store a property. The engine gets its own count; `value` keeps its.
    pub(crate) fn set_property(&self, object: JSValue, name: &str, value: &QjsValue) -> QjsResult<()> {
        if !self.owns(value.as_value_ref()) {
            return Err(QjsError::internal("value belongs to another context"));
        }
        let c_name = ffi::c_string(name)?;
        let raw = self.hand_to_engine(value.raw());
        // SAFETY: JS_SetPropertyStr consumes `raw` even on failure
        let rc = unsafe { ffi::JS_SetPropertyStr(self.ctx, object, c_name.as_ptr(), raw) };
        if rc < 0 {
            return Err(self.take_error());
        }
        Ok(())
    }

    pub(crate) fn get_index(&self, object: JSValue, index: u32) -> QjsValue {
        // SAFETY: object belongs to this context; the result is owned
        let raw = unsafe { ffi::JS_GetPropertyUint32(self.ctx, object, index) };
        self.adopt(raw)
    }

    pub(crate) fn set_index(&self, object: JSValue, index: u32, value: &QjsValue) -> QjsResult<()> {
        if !self.owns(value.as_value_ref()) {
            return Err(QjsError::internal("value belongs to another context"));
        }
        let raw = self.hand_to_engine(value.raw());
        // SAFETY: JS_SetPropertyUint32 consumes `raw` even on failure
        let rc = unsafe { ffi::JS_SetPropertyUint32(self.ctx, object, index, raw) };
        if rc < 0 {
            return Err(self.take_error());
        }
        Ok(())
    }

    fn evaluate(&self, source: &str, filename: &str) -> QjsValue {
        let (Ok(c_source), Ok(c_filename)) = (ffi::c_string(source), ffi::c_string(filename)) else {
            return self.throw_type_error("script source contains a NUL byte");
        };
        trace!(filename, len = source.len(), "evaluating script");

        let _guard = self.enter_script();
        // SAFETY: the source is NUL-terminated and `len` excludes the NUL
        let raw = unsafe {
            ffi::JS_Eval(
                self.ctx,
                c_source.as_ptr(),
                source.len() as _,
                c_filename.as_ptr(),
                ffi::eval_global_flags(),
            )
        };
        self.adopt(raw)
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        let outstanding = self.handles.get_mut().drain();
        let anchors = self.bindings.get_mut().drain();
        debug!(
            handles = outstanding.len(),
            bindings = anchors.len(),
            "tearing down context"
        );

        // SAFETY: every count below was taken by this context and is
        // released exactly once; handles still alive see a dead Weak and
        // will not touch them again.
        unsafe {
            for raw in outstanding.into_iter().chain(anchors) {
                ffi::JS_FreeValue(self.ctx, raw);
            }
            ffi::JS_SetContextOpaque(self.ctx, ptr::null_mut());
            ffi::JS_FreeContext(self.ctx);
            ffi::JS_FreeRuntime(self.rt);
        }
    }
}

/// A QuickJS runtime with one context.
///
/// Owns the engine: dropping the context releases every reference count the
/// bridge still holds and destroys the runtime. Handles that outlive it
/// become inert.
///
/// # Thread Safety
///
/// This type is `!Send` and `!Sync`. The engine runtime must only be used
/// from the thread that created it.
pub struct QjsContext {
    inner: Rc<ContextInner>,
}

impl QjsContext {
    /// Create a context with default configuration.
    pub fn new() -> QjsResult<Self> {
        Self::with_config(QjsConfig::default())
    }

    /// Create a context with the given runtime limits.
    pub fn with_config(config: QjsConfig) -> QjsResult<Self> {
        // SAFETY: plain constructors; null signals failure
        let rt = unsafe { ffi::JS_NewRuntime() };
        if rt.is_null() {
            return Err(QjsError::context_creation("JS_NewRuntime returned null"));
        }

        // SAFETY: rt is a fresh runtime
        unsafe {
            if let Some(limit) = config.memory_limit {
                ffi::JS_SetMemoryLimit(rt, limit as _);
            }
            if let Some(size) = config.max_stack_size {
                ffi::JS_SetMaxStackSize(rt, size as _);
            }
            if let Some(threshold) = config.gc_threshold {
                ffi::JS_SetGCThreshold(rt, threshold as _);
            }
        }

        // SAFETY: rt is alive
        let ctx = unsafe { ffi::JS_NewContext(rt) };
        if ctx.is_null() {
            // SAFETY: no context was created on rt
            unsafe { ffi::JS_FreeRuntime(rt) };
            return Err(QjsError::context_creation("JS_NewContext returned null"));
        }

        let interrupt = Box::new(RefCell::new(InterruptState::new(config.timeout_ms)));
        let inner = Rc::new_cyclic(|this| ContextInner {
            rt,
            ctx,
            this: this.clone(),
            config,
            handles: RefCell::new(HandleTable::new()),
            bindings: RefCell::new(BindingRegistry::default()),
            interrupt,
            caught: RefCell::new(None),
        });

        // SAFETY: both pointers stay valid until ContextInner::drop, which
        // frees the runtime before the box and clears the opaque first.
        unsafe {
            let state: *const RefCell<InterruptState> = &*inner.interrupt;
            ffi::JS_SetInterruptHandler(rt, Some(interrupt_trampoline), state as *mut c_void);
            ffi::JS_SetContextOpaque(ctx, Rc::as_ptr(&inner) as *mut c_void);
        }

        debug!(
            memory_limit = ?inner.config.memory_limit,
            timeout_ms = ?inner.config.timeout_ms,
            "created QuickJS context"
        );
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Rc<ContextInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<ContextInner> {
        &self.inner
    }

    /// Configuration this context was created with.
    pub fn config(&self) -> &QjsConfig {
        &self.inner.config
    }

    /// Raw engine context, for direct FFI calls.
    pub fn raw(&self) -> *mut JSContext {
        self.inner.ctx
    }

    /// Evaluate a global script.
    ///
    /// Returns the completion value, or the exception value when the script
    /// throws (including syntax errors). Use [`eval`](Self::eval) to get a
    /// `Result` instead.
    pub fn evaluate(&self, source: &str, filename: &str) -> QjsValue {
        self.inner.evaluate(source, filename)
    }

    /// Evaluate a script and convert a thrown exception into an error.
    pub fn eval(&self, source: &str) -> QjsResult<QjsValue> {
        self.eval_with_source(source, &self.inner.config.default_filename)
    }

    /// Evaluate with a file name for stack traces.
    pub fn eval_with_source(&self, source: &str, filename: &str) -> QjsResult<QjsValue> {
        self.inner.evaluate(source, filename).into_result()
    }

    pub fn undefined(&self) -> QjsValue {
        self.inner.adopt(ffi::undefined())
    }

    pub fn null(&self) -> QjsValue {
        self.inner.adopt(ffi::null())
    }

    pub fn boolean(&self, value: bool) -> QjsValue {
        self.inner.adopt(ffi::boolean(value))
    }

    /// Create a number. Integral values are stored as engine integers.
    pub fn number(&self, value: f64) -> QjsValue {
        self.inner.adopt(ffi::JS_NewFloat64(value))
    }

    pub fn string(&self, value: &str) -> QjsResult<QjsValue> {
        // SAFETY: ctx is alive
        self.inner.check(unsafe { string::new_string(self.inner.ctx, value) })
    }

    /// Create an empty object.
    pub fn new_object(&self) -> QjsResult<QjsObject> {
        // SAFETY: ctx is alive
        let value = self.inner.check(unsafe { ffi::JS_NewObject(self.inner.ctx) })?;
        Ok(QjsObject::from_value(value))
    }

    /// Create an empty array.
    pub fn new_array(&self) -> QjsResult<QjsArray> {
        // SAFETY: ctx is alive
        let value = self.inner.check(unsafe { ffi::JS_NewArray(self.inner.ctx) })?;
        Ok(QjsArray::from_object(QjsObject::from_value(value)))
    }

    /// Take another owning handle on a value.
    pub fn duplicate(&self, value: &impl QjsHandle) -> QjsValue {
        value.dup()
    }

    /// Release an owning handle now.
    pub fn release(&self, value: QjsValue) {
        value.free();
    }

    /// The global object.
    pub fn global_object(&self) -> QjsResult<QjsObject> {
        // SAFETY: ctx is alive; the result is owned
        let value = self.inner.check(unsafe { ffi::JS_GetGlobalObject(self.inner.ctx) })?;
        Ok(QjsObject::from_value(value))
    }

    /// Define or overwrite a global variable. Consumes the handle.
    pub fn set_global(&self, name: &str, value: QjsValue) -> QjsResult<()> {
        let global = self.global_object()?;
        self.inner.set_property(global.as_value().raw(), name, &value)
    }

    /// Read a global variable; `undefined` when it is not defined.
    pub fn get_global(&self, name: &str) -> QjsResult<QjsValue> {
        let global = self.global_object()?;
        global.get_property(name).into_result()
    }

    /// Parse JSON text with the engine's parser.
    pub fn parse_json(&self, json: &str) -> QjsResult<QjsValue> {
        let c_json = ffi::c_string(json)?;
        // SAFETY: buffer is NUL-terminated; len excludes the NUL
        let raw = unsafe {
            ffi::JS_ParseJSON(self.inner.ctx, c_json.as_ptr(), json.len() as _, c"<json>".as_ptr())
        };
        self.inner.check(raw)
    }

    /// Build an engine value from any serializable Rust value.
    pub fn from_serde<T: Serialize + ?Sized>(&self, value: &T) -> QjsResult<QjsValue> {
        let json = serde_json::to_string(value)?;
        self.parse_json(&json)
    }

    /// Run a full engine GC cycle.
    pub fn run_gc(&self) {
        trace!("running engine GC");
        // SAFETY: rt is alive
        unsafe { ffi::JS_RunGC(self.inner.rt) };
    }

    /// Number of live owning handles on counted values.
    pub fn live_handles(&self) -> usize {
        self.inner.handles.borrow().live_count()
    }

    /// Counts the bridge holds on the engine value behind `value`:
    /// one per owning handle plus binding anchors. Zero for immediates and
    /// for values of another context.
    pub fn outstanding_refs(&self, value: &impl QjsHandle) -> usize {
        let view = value.as_value_ref();
        if !Weak::ptr_eq(view.owner(), &self.inner.this) {
            return 0;
        }
        ffi::identity(view.raw())
            .map(|id| self.inner.handles.borrow().outstanding(id))
            .unwrap_or(0)
    }

    /// Install a handler the engine polls during execution; returning
    /// `true` aborts the running script with an uncatchable error.
    pub fn set_interrupt_handler<F>(&self, handler: F)
    where
        F: FnMut() -> bool + 'static,
    {
        self.inner.interrupt.borrow_mut().set_handler(Box::new(handler));
    }

    pub fn clear_interrupt_handler(&self) {
        self.inner.interrupt.borrow_mut().clear_handler();
    }
}

impl fmt::Debug for QjsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QjsContext")
            .field("ctx", &self.inner.ctx)
            .field("live_handles", &self.live_handles())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_eval_number() {
        let ctx = QjsContext::new().unwrap();
        let result = ctx.eval("1 + 1").unwrap();
        assert_eq!(result.get::<f64>(), Some(2.0));
    }

    #[test]
    fn test_evaluate_returns_exception_value() {
        let ctx = QjsContext::new().unwrap();
        let result = ctx.evaluate("throw new Error('boom')", "test.js");
        assert!(result.is_exception());
        let err = result.into_result().unwrap_err();
        assert_eq!(err.error_type(), "Error");
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn test_syntax_error() {
        let ctx = QjsContext::new().unwrap();
        let err = ctx.eval("function (").unwrap_err();
        assert!(matches!(err, QjsError::SyntaxError { .. }));
    }

    #[test]
    fn test_reference_error_has_stack() {
        let ctx = QjsContext::new().unwrap();
        let err = ctx
            .eval_with_source("function f() { return missing; }\nf();", "trace.js")
            .unwrap_err();
        assert_eq!(err.error_type(), "ReferenceError");
        assert!(err.stack_trace().is_some_and(|s| s.contains("trace.js")));
    }

    #[test]
    fn test_source_with_nul_is_exception() {
        let ctx = QjsContext::new().unwrap();
        let result = ctx.evaluate("1\0", "nul.js");
        assert!(result.is_exception());
        assert_eq!(result.into_result().unwrap_err().error_type(), "TypeError");
    }

    #[test]
    fn test_primitive_constructors() {
        let ctx = QjsContext::new().unwrap();
        assert!(ctx.undefined().is_undefined());
        assert!(ctx.null().is_null());
        assert_eq!(ctx.boolean(true).get::<bool>(), Some(true));
        assert_eq!(ctx.number(1.5).get::<f64>(), Some(1.5));
        assert_eq!(ctx.number(3.0).type_of(), ffi::QjsType::Int);
        assert_eq!(ctx.string("hi").unwrap().get::<String>().as_deref(), Some("hi"));
        // Immediates take no slots.
        assert_eq!(ctx.live_handles(), 0);
    }

    #[test]
    fn test_globals() {
        let ctx = QjsContext::new().unwrap();
        ctx.set_global("answer", ctx.number(42.0)).unwrap();
        assert_eq!(ctx.eval("answer + 1").unwrap().get::<i32>(), Some(43));
        assert_eq!(ctx.get_global("answer").unwrap().get::<i32>(), Some(42));
        assert!(ctx.get_global("nothing_here").unwrap().is_undefined());
    }

    #[test]
    fn test_parse_json() {
        let ctx = QjsContext::new().unwrap();
        let value = ctx.parse_json(r#"{"a": [1, 2, 3]}"#).unwrap();
        assert_eq!(value.to_json().unwrap(), r#"{"a":[1,2,3]}"#);

        let err = ctx.parse_json("{ broken").unwrap_err();
        assert_eq!(err.error_type(), "SyntaxError");
    }

    #[test]
    fn test_from_serde() {
        #[derive(Serialize)]
        struct Config {
            name: &'static str,
            retries: u32,
        }

        let ctx = QjsContext::new().unwrap();
        let value = ctx.from_serde(&Config { name: "otter", retries: 3 }).unwrap();
        ctx.set_global("config", value).unwrap();
        let result = ctx.eval("config.name + ':' + config.retries").unwrap();
        assert_eq!(result.get::<String>().as_deref(), Some("otter:3"));
    }

    #[test]
    fn test_live_handles_track_owning_values() {
        let ctx = QjsContext::new().unwrap();
        let a = ctx.eval("({})").unwrap();
        let b = ctx.eval("[]").unwrap();
        assert_eq!(ctx.live_handles(), 2);
        drop(a);
        assert_eq!(ctx.live_handles(), 1);
        ctx.release(b);
        assert_eq!(ctx.live_handles(), 0);
    }

    #[test]
    fn test_handles_survive_context_teardown() {
        let ctx = QjsContext::new().unwrap();
        let object = ctx.eval("({ a: 1 })").unwrap().into_object().unwrap();
        let value = ctx.eval("'still here'").unwrap();
        drop(ctx);

        assert!(value.is_detached());
        assert!(!value.is_owning());
        assert!(value.get::<String>().is_none());
        assert!(object.get_property("a").is_undefined());
        drop(object);
        drop(value);
    }

    #[test]
    fn test_memory_limit() {
        let ctx = QjsContext::with_config(QjsConfig::new().memory_limit(2 * 1024 * 1024)).unwrap();
        let err = ctx
            .eval("let a = []; for (;;) a.push(new Array(1024).fill(1));")
            .unwrap_err();
        assert!(err.is_script_error());
    }

    #[test]
    fn test_timeout() {
        let ctx = QjsContext::with_config(QjsConfig::new().timeout_ms(50)).unwrap();
        let err = ctx.eval("for (;;) {}").unwrap_err();
        assert!(matches!(err, QjsError::Timeout(50)));

        // The deadline re-arms for the next evaluation.
        assert_eq!(ctx.eval("2 * 21").unwrap().get::<i32>(), Some(42));
    }

    #[test]
    fn test_interrupt_handler() {
        let ctx = QjsContext::new().unwrap();
        let polls = Rc::new(Cell::new(0u32));
        let counter = polls.clone();
        ctx.set_interrupt_handler(move || {
            counter.set(counter.get() + 1);
            true
        });

        let err = ctx.eval("for (;;) {}").unwrap_err();
        assert_eq!(err.error_type(), "InternalError");
        assert!(polls.get() > 0);

        ctx.clear_interrupt_handler();
        assert_eq!(ctx.eval("1").unwrap().get::<i32>(), Some(1));
    }

    #[test]
    fn test_run_gc_keeps_owned_values() {
        let ctx = QjsContext::new().unwrap();
        let object = ctx.eval("({ keep: 'me' })").unwrap().into_object().unwrap();
        ctx.run_gc();
        assert_eq!(object.get_property("keep").get::<String>().as_deref(), Some("me"));
    }
}
