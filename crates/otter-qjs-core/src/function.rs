//! Host functions callable from script
//!
//! A host function is an engine C function whose data slot holds an anchor
//! object bound (through the binding registry) to the Rust callback. The
//! engine never stores a Rust pointer: when script calls the function, the
//! trampoline resolves the anchor back to the callback. Once the
//! `QjsFunction` is dropped the callback is gone and further calls from
//! script throw a `TypeError`.

use std::any::Any;
use std::ffi::c_int;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{trace, warn};

use crate::context::{ContextInner, QjsContext};
use crate::error::{QjsError, QjsResult};
use crate::ffi::{self, JSContext, JSValue};
use crate::value::{QjsHandle, QjsValue, QjsValueRef};

type HostCallback = dyn Fn(&QjsContext, QjsValueRef<'_>, &[QjsValueRef<'_>]) -> QjsResult<QjsValue>;

struct HostFunction {
    name: String,
    callback: Box<HostCallback>,
}

/// A Rust closure exposed to script as a function.
///
/// The engine function stays valid as long as script references it, but it
/// only dispatches to the closure while this handle is alive.
pub struct QjsFunction {
    value: QjsValue,
    host: Rc<HostFunction>,
}

impl QjsFunction {
    /// The engine function value.
    pub fn as_value(&self) -> &QjsValue {
        &self.value
    }

    /// A new owning handle on the engine function, e.g. to store it in a
    /// global. Does not keep the closure alive.
    pub fn to_value(&self) -> QjsValue {
        self.value.dup()
    }

    pub fn name(&self) -> &str {
        &self.host.name
    }
}

impl QjsHandle for QjsFunction {
    fn as_value_ref(&self) -> QjsValueRef<'_> {
        self.value.as_value_ref()
    }
}

impl fmt::Debug for QjsFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QjsFunction")
            .field("name", &self.host.name)
            .finish()
    }
}

impl QjsContext {
    /// Create a function that calls `callback` when invoked from script.
    ///
    /// `length` is the arity reported by `Function.prototype.length`. The
    /// callback receives the context, `this` and the arguments as borrowed
    /// views. An `Err` passed on from script the callback ran rethrows the
    /// original exception value; any other `Err` is thrown as a new error.
    pub fn new_function<F>(&self, name: &str, length: u32, callback: F) -> QjsResult<QjsFunction>
    where
        F: Fn(&QjsContext, QjsValueRef<'_>, &[QjsValueRef<'_>]) -> QjsResult<QjsValue> + 'static,
    {
        let host = Rc::new(HostFunction {
            name: name.to_string(),
            callback: Box::new(callback),
        });

        let anchor = self.new_object()?;
        let weak: Weak<dyn Any> = Rc::downgrade(&host) as Weak<dyn Any>;
        self.inner().bind_raw(anchor.as_value().raw(), weak)?;

        let mut data = [anchor.as_value().raw()];
        // SAFETY: the engine dups the data values it stores
        let raw = unsafe {
            ffi::JS_NewCFunctionData(
                self.raw(),
                Some(host_function_trampoline),
                c_int::try_from(length).unwrap_or(c_int::MAX),
                0,
                data.len() as c_int,
                data.as_mut_ptr(),
            )
        };
        let value = self.inner().check(raw)?;
        trace!(name, length, "created host function");
        Ok(QjsFunction { value, host })
    }
}

unsafe extern "C" fn host_function_trampoline(
    ctx: *mut JSContext,
    this_val: JSValue,
    argc: c_int,
    argv: *mut JSValue,
    _magic: c_int,
    func_data: *mut JSValue,
) -> JSValue {
    // SAFETY: the opaque is set to the ContextInner for the context's whole
    // life and cleared before teardown
    let inner = unsafe {
        let opaque = ffi::JS_GetContextOpaque(ctx).cast::<ContextInner>();
        if opaque.is_null() {
            return ffi::JS_ThrowTypeError(ctx, c"%s".as_ptr(), c"context is not managed".as_ptr());
        }
        (*opaque).weak().upgrade()
    };
    let Some(inner) = inner else {
        // SAFETY: ctx is the calling context
        return unsafe { ffi::JS_ThrowTypeError(ctx, c"%s".as_ptr(), c"context is shutting down".as_ptr()) };
    };

    // SAFETY: the function was created with one data value
    let anchor = unsafe { *func_data };
    let Some(host) = inner
        .resolve_raw(anchor)
        .and_then(|host| host.downcast::<HostFunction>().ok())
    else {
        return inner.transfer_or_throw(inner.throw_type_error("host function has been released"));
    };

    let args: &[JSValue] = if argc <= 0 || argv.is_null() {
        &[]
    } else {
        // SAFETY: the engine passes argc readable values
        unsafe { std::slice::from_raw_parts(argv, argc as usize) }
    };
    let this_ref = QjsValueRef::new(this_val, inner.weak());
    let arg_refs: Vec<QjsValueRef<'_>> = args
        .iter()
        .map(|raw| QjsValueRef::new(*raw, inner.weak()))
        .collect();

    let ctx_handle = QjsContext::from_inner(inner.clone());
    let outer = inner.take_caught();
    let result = (host.callback)(&ctx_handle, this_ref, &arg_refs);
    let caught = inner.take_caught();
    let raw = match result {
        Ok(value) => inner.transfer_or_throw(value),
        // The callback passed on an exception from script it ran: throw the
        // same value, so uncatchable interrupts stay uncatchable.
        Err(err) => match caught.filter(|caught| caught.reported_as(&err)) {
            Some(caught) => inner.rethrow(caught),
            None => inner.throw_callback_error(&host.name, err),
        },
    };
    inner.restore_caught(outer);
    raw
}

impl ContextInner {
    /// Throw an error a callback returned as a new engine error.
    fn throw_callback_error(&self, function: &str, err: QjsError) -> JSValue {
        match err {
            QjsError::ScriptError { error_type, message, .. } => {
                self.throw_error(&error_type, &message)
            }
            QjsError::SyntaxError { message, .. } => self.throw_error("SyntaxError", &message),
            err => {
                let err = QjsError::HostFunction(format!("{function}: {err}"));
                warn!(error = %err, "host function failed");
                self.throw_error("Error", &err.to_string())
            }
        }
    }

    /// Hand a callback's result to the engine, throwing if it cannot be.
    fn transfer_or_throw(&self, value: QjsValue) -> JSValue {
        // An exception value means an error is already pending.
        if value.is_exception() {
            return ffi::exception();
        }
        match self.transfer(value) {
            Ok(raw) => raw,
            Err(err) => self.throw_error("TypeError", &err.to_string()),
        }
    }
}
