//! Object facade with named property access
//!
//! Values stored through `set_property` are also kept in a host-side map
//! keyed by name, so the handle passed in stays alive for as long as the
//! facade does. Overwriting a name releases the previous handle. The map is
//! only a retention record: reads always go to the engine.

use rustc_hash::FxHashMap;
use std::ffi::c_char;
use std::fmt;

use crate::context::ContextInner;
use crate::convert::{FromQjs, ToQjs};
use crate::error::{QjsError, QjsResult};
use crate::ffi::{self, JSAtom};
use crate::value::{QjsHandle, QjsValue, QjsValueRef};
use crate::QjsContext;

/// An owning handle on an engine object.
///
/// # Thread Safety
///
/// This type is `!Send` and `!Sync`, like every handle in this crate.
pub struct QjsObject {
    value: QjsValue,
    properties: FxHashMap<String, QjsValue>,
}

impl QjsObject {
    /// Wrap an owning handle known to hold an object.
    pub(crate) fn from_value(value: QjsValue) -> Self {
        Self {
            value,
            properties: FxHashMap::default(),
        }
    }

    /// The underlying owning handle.
    pub fn as_value(&self) -> &QjsValue {
        &self.value
    }

    /// Give up the facade, keeping the object handle. Retained property
    /// handles are released; the engine keeps its own counts on them.
    pub fn into_value(self) -> QjsValue {
        self.value
    }

    /// Read a property.
    ///
    /// Returns a new owning handle. A throwing getter yields the exception
    /// value; a dead context or a name containing NUL yields `undefined`.
    pub fn get_property(&self, name: &str) -> QjsValue {
        match self.value.context() {
            Some(inner) => inner.get_property(self.value.raw(), name),
            None => QjsValue::undefined(),
        }
    }

    /// Store a property and retain `value` under `name`.
    ///
    /// Without a live context this does nothing.
    pub fn set_property(&mut self, name: &str, value: QjsValue) -> QjsResult<()> {
        let Some(inner) = self.value.context() else {
            return Ok(());
        };
        inner.set_property(self.value.raw(), name, &value)?;
        self.properties.insert(name.to_string(), value);
        Ok(())
    }

    /// Read a property and convert it to a native value.
    pub fn property<T: FromQjs>(&self, name: &str) -> Option<T> {
        self.get_property(name).get::<T>()
    }

    /// Convert a native value and store it.
    pub fn set<V: ToQjs + ?Sized>(&mut self, ctx: &QjsContext, name: &str, value: &V) -> QjsResult<()> {
        let value = value.to_qjs(ctx)?;
        self.set_property(name, value)
    }

    /// Whether the object or its prototype chain has the property.
    pub fn has_property(&self, name: &str) -> QjsResult<bool> {
        let Some(inner) = self.value.context() else {
            return Ok(false);
        };
        with_atom(&inner, name, |atom| {
            // SAFETY: object and atom belong to this context
            unsafe { ffi::JS_HasProperty(inner.raw_ctx(), self.value.raw(), atom) }
        })
        .map(|found| found != 0)
    }

    /// Delete an own property. Returns `false` when it is not configurable.
    pub fn delete_property(&mut self, name: &str) -> QjsResult<bool> {
        let Some(inner) = self.value.context() else {
            return Ok(false);
        };
        let deleted = with_atom(&inner, name, |atom| {
            // SAFETY: object and atom belong to this context
            unsafe { ffi::JS_DeleteProperty(inner.raw_ctx(), self.value.raw(), atom, 0) }
        })? != 0;
        if deleted {
            self.properties.remove(name);
        }
        Ok(deleted)
    }

    /// Call a method of this object with the object as `this`.
    pub fn call_method(&self, name: &str, args: &[&QjsValue]) -> QjsValue {
        let method = self.get_property(name);
        if method.is_exception() {
            return method;
        }
        method.call(Some(&self.value), args)
    }

    /// Number of handles retained by `set_property`.
    pub fn retained_count(&self) -> usize {
        self.properties.len()
    }

    pub fn is_retained(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }
}

/// Run `f` with an atom for `name`, freeing the atom afterwards. Negative
/// results from `f` mean the engine threw.
fn with_atom(
    inner: &ContextInner,
    name: &str,
    f: impl FnOnce(JSAtom) -> std::ffi::c_int,
) -> QjsResult<std::ffi::c_int> {
    let ctx = inner.raw_ctx();
    // SAFETY: the engine copies `len` bytes of the name
    let atom = unsafe { ffi::JS_NewAtomLen(ctx, name.as_ptr().cast::<c_char>(), name.len() as _) };
    if atom == ffi::JS_ATOM_NULL as JSAtom {
        return Err(inner.take_error());
    }
    scopeguard::defer! {
        // SAFETY: atom was created above on this context
        unsafe { ffi::JS_FreeAtom(ctx, atom) };
    }

    let rc = f(atom);
    if rc < 0 {
        return Err(inner.take_error());
    }
    Ok(rc)
}

impl QjsHandle for QjsObject {
    fn as_value_ref(&self) -> QjsValueRef<'_> {
        self.value.as_value_ref()
    }
}

impl From<QjsObject> for QjsValue {
    fn from(object: QjsObject) -> Self {
        object.into_value()
    }
}

impl TryFrom<QjsValue> for QjsObject {
    type Error = QjsError;

    fn try_from(value: QjsValue) -> QjsResult<Self> {
        value
            .into_object()
            .map_err(|v| QjsError::type_error("object", v.type_of().name()))
    }
}

impl fmt::Debug for QjsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QjsObject")
            .field("retained", &self.properties.len())
            .finish()
    }
}
