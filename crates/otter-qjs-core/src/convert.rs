//! Marshalling between Rust values and engine values
//!
//! `ToQjs` always produces a new owning handle. `FromQjs` reads through a
//! borrowed view and never takes a count of its own except where the
//! target type is itself a handle. A tag or type mismatch is `None`, not an
//! error. Conversions that can run script (getters, `toJSON`) set aside any
//! exception already pending and reinstate it afterwards, dropping whatever
//! they threw themselves.
//!
//! Numbers follow the engine's own conversions (`ToInt32`, `ToInt64`,
//! `ToNumber`), so narrowing wraps the way it does in script.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::context::{ContextInner, QjsContext};
use crate::error::{QjsError, QjsResult};
use crate::ffi;
use crate::string::EngineStr;
use crate::value::{QjsHandle, QjsValue, QjsValueRef};

/// Rust values that can be turned into engine values.
pub trait ToQjs {
    fn to_qjs(&self, ctx: &QjsContext) -> QjsResult<QjsValue>;
}

/// Rust values that can be read back from engine values.
pub trait FromQjs: Sized {
    fn from_qjs(value: QjsValueRef<'_>) -> Option<Self>;
}

/// Types that convert in both directions.
pub trait QjsInterop: ToQjs + FromQjs {}

impl<T: ToQjs + FromQjs> QjsInterop for T {}

/// Wrapper that marshals any serde type through JSON.
///
/// # Example
///
/// ```
/// use otter_qjs_core::{Json, QjsContext, ToQjs, QjsHandle};
/// use std::collections::BTreeMap;
///
/// let ctx = QjsContext::new().unwrap();
/// let map = BTreeMap::from([("a", 1), ("b", 2)]);
/// let value = Json(map).to_qjs(&ctx).unwrap();
/// assert_eq!(value.to_json().unwrap(), r#"{"a":1,"b":2}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Json<T>(pub T);

impl<T: ToQjs + ?Sized> ToQjs for &T {
    fn to_qjs(&self, ctx: &QjsContext) -> QjsResult<QjsValue> {
        (**self).to_qjs(ctx)
    }
}

impl ToQjs for bool {
    fn to_qjs(&self, ctx: &QjsContext) -> QjsResult<QjsValue> {
        Ok(ctx.boolean(*self))
    }
}

impl FromQjs for bool {
    fn from_qjs(value: QjsValueRef<'_>) -> Option<Self> {
        if !value.is_boolean() {
            return None;
        }
        let inner = value.context()?;
        // SAFETY: value is a boolean of the live context
        Some(unsafe { ffi::JS_ToBool(inner.raw_ctx(), value.raw()) } != 0)
    }
}

macro_rules! impl_number_to_qjs {
    ($($ty:ty),*) => {
        $(
            impl ToQjs for $ty {
                fn to_qjs(&self, ctx: &QjsContext) -> QjsResult<QjsValue> {
                    Ok(ctx.number(*self as f64))
                }
            }
        )*
    };
}

impl_number_to_qjs!(i32, u32, i64, f64, f32, isize, usize);

impl FromQjs for i32 {
    fn from_qjs(value: QjsValueRef<'_>) -> Option<Self> {
        if !value.is_number() {
            return None;
        }
        let inner = value.context()?;
        let mut out = 0i32;
        // SAFETY: value is a number of the live context
        if unsafe { ffi::JS_ToInt32(inner.raw_ctx(), &mut out, value.raw()) } < 0 {
            return None;
        }
        Some(out)
    }
}

impl FromQjs for u32 {
    fn from_qjs(value: QjsValueRef<'_>) -> Option<Self> {
        // ToUint32 and ToInt32 agree modulo 2^32.
        i32::from_qjs(value).map(|n| n as u32)
    }
}

impl FromQjs for i64 {
    fn from_qjs(value: QjsValueRef<'_>) -> Option<Self> {
        if !value.is_number() {
            return None;
        }
        let inner = value.context()?;
        let mut out = 0i64;
        // SAFETY: value is a number of the live context
        if unsafe { ffi::JS_ToInt64(inner.raw_ctx(), &mut out, value.raw()) } < 0 {
            return None;
        }
        Some(out)
    }
}

impl FromQjs for f64 {
    fn from_qjs(value: QjsValueRef<'_>) -> Option<Self> {
        if !value.is_number() {
            return None;
        }
        let inner = value.context()?;
        let mut out = 0f64;
        // SAFETY: value is a number of the live context
        if unsafe { ffi::JS_ToFloat64(inner.raw_ctx(), &mut out, value.raw()) } < 0 {
            return None;
        }
        Some(out)
    }
}

impl FromQjs for f32 {
    fn from_qjs(value: QjsValueRef<'_>) -> Option<Self> {
        f64::from_qjs(value).map(|n| n as f32)
    }
}

impl FromQjs for isize {
    fn from_qjs(value: QjsValueRef<'_>) -> Option<Self> {
        i64::from_qjs(value).map(|n| n as isize)
    }
}

impl FromQjs for usize {
    fn from_qjs(value: QjsValueRef<'_>) -> Option<Self> {
        u32::from_qjs(value).map(|n| n as usize)
    }
}

impl ToQjs for str {
    fn to_qjs(&self, ctx: &QjsContext) -> QjsResult<QjsValue> {
        ctx.string(self)
    }
}

impl ToQjs for String {
    fn to_qjs(&self, ctx: &QjsContext) -> QjsResult<QjsValue> {
        ctx.string(self)
    }
}

impl FromQjs for String {
    fn from_qjs(value: QjsValueRef<'_>) -> Option<Self> {
        if !value.is_string() {
            return None;
        }
        let inner = value.context()?;
        // SAFETY: value is a string of the live context
        unsafe { EngineStr::from_value(inner.raw_ctx(), value.raw()) }.map(|s| s.to_string_lossy())
    }
}

/// `None` maps to `null`; both `null` and `undefined` read back as `None`.
impl<T: ToQjs> ToQjs for Option<T> {
    fn to_qjs(&self, ctx: &QjsContext) -> QjsResult<QjsValue> {
        match self {
            Some(value) => value.to_qjs(ctx),
            None => Ok(ctx.null()),
        }
    }
}

impl<T: FromQjs> FromQjs for Option<T> {
    fn from_qjs(value: QjsValueRef<'_>) -> Option<Self> {
        if value.is_null() || value.is_undefined() {
            return Some(None);
        }
        T::from_qjs(value).map(Some)
    }
}

impl ToQjs for () {
    fn to_qjs(&self, ctx: &QjsContext) -> QjsResult<QjsValue> {
        Ok(ctx.undefined())
    }
}

impl FromQjs for () {
    fn from_qjs(value: QjsValueRef<'_>) -> Option<Self> {
        value.is_undefined().then_some(())
    }
}

/// Handles convert to themselves, taking a new count.
impl ToQjs for QjsValue {
    fn to_qjs(&self, ctx: &QjsContext) -> QjsResult<QjsValue> {
        if !ctx.inner().owns(self.as_value_ref()) {
            return Err(QjsError::internal("value belongs to another context"));
        }
        Ok(self.dup())
    }
}

impl FromQjs for QjsValue {
    fn from_qjs(value: QjsValueRef<'_>) -> Option<Self> {
        Some(value.dup())
    }
}

/// Sequences become engine arrays with elements at `0..len`.
impl<T: ToQjs> ToQjs for [T] {
    fn to_qjs(&self, ctx: &QjsContext) -> QjsResult<QjsValue> {
        let mut array = ctx.new_array()?;
        for (index, element) in self.iter().enumerate() {
            let index = u32::try_from(index)
                .map_err(|_| QjsError::internal("sequence is too long for an engine array"))?;
            array.set_index(index, element.to_qjs(ctx)?)?;
        }
        Ok(array.into_value())
    }
}

impl<T: ToQjs> ToQjs for Vec<T> {
    fn to_qjs(&self, ctx: &QjsContext) -> QjsResult<QjsValue> {
        self.as_slice().to_qjs(ctx)
    }
}

/// Reads any object with a numeric `length` (arrays and array-likes).
/// All-or-nothing: one element that fails to convert fails the whole read.
/// A throwing `length` or element getter reads as `None` and leaves any
/// earlier pending exception in place.
impl<T: FromQjs> FromQjs for Vec<T> {
    fn from_qjs(value: QjsValueRef<'_>) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let inner = value.context()?;
        inner.preserving_exception(|| read_sequence(&inner, value))
    }
}

fn read_sequence<T: FromQjs>(inner: &ContextInner, value: QjsValueRef<'_>) -> Option<Vec<T>> {
    let length = inner.get_property(value.raw(), "length");
    if length.is_exception() {
        return None;
    }

    let mut len = 0u64;
    // SAFETY: length belongs to the live context
    if unsafe { ffi::JS_ToIndex(inner.raw_ctx(), &mut len, length.raw()) } < 0 {
        return None;
    }
    let len = u32::try_from(len).ok()?;

    let mut out = Vec::with_capacity(len.min(1024) as usize);
    for index in 0..len {
        let element = inner.get_index(value.raw(), index);
        if element.is_exception() {
            return None;
        }
        out.push(T::from_qjs(element.as_value_ref())?);
    }
    Some(out)
}

impl<T: Serialize> ToQjs for Json<T> {
    fn to_qjs(&self, ctx: &QjsContext) -> QjsResult<QjsValue> {
        ctx.from_serde(&self.0)
    }
}

impl<T: DeserializeOwned> FromQjs for Json<T> {
    fn from_qjs(value: QjsValueRef<'_>) -> Option<Self> {
        match value.context() {
            Some(inner) => inner.preserving_exception(|| value.deserialize::<T>().ok().map(Json)),
            None => None,
        }
    }
}

impl QjsContext {
    /// Convert a native value into an owning handle.
    pub fn to_value<T: ToQjs + ?Sized>(&self, value: &T) -> QjsResult<QjsValue> {
        value.to_qjs(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_bool() {
        let ctx = QjsContext::new().unwrap();
        let value = true.to_qjs(&ctx).unwrap();
        assert_eq!(value.get::<bool>(), Some(true));
        assert_eq!(ctx.number(1.0).get::<bool>(), None);
    }

    #[test]
    fn test_numbers() {
        let ctx = QjsContext::new().unwrap();
        assert_eq!((-7i32).to_qjs(&ctx).unwrap().get::<i32>(), Some(-7));
        assert_eq!(3_000_000_000u32.to_qjs(&ctx).unwrap().get::<u32>(), Some(3_000_000_000));
        assert_eq!((1i64 << 40).to_qjs(&ctx).unwrap().get::<i64>(), Some(1 << 40));
        assert_eq!(2.5f64.to_qjs(&ctx).unwrap().get::<f64>(), Some(2.5));
        assert_eq!(0.5f32.to_qjs(&ctx).unwrap().get::<f32>(), Some(0.5));
        assert_eq!(12usize.to_qjs(&ctx).unwrap().get::<usize>(), Some(12));
        assert_eq!((-12isize).to_qjs(&ctx).unwrap().get::<isize>(), Some(-12));
    }

    #[test]
    fn test_number_narrowing_follows_engine() {
        let ctx = QjsContext::new().unwrap();
        assert_eq!(ctx.eval("3.9").unwrap().get::<i32>(), Some(3));
        assert_eq!(ctx.eval("-1").unwrap().get::<u32>(), Some(u32::MAX));
        assert_eq!(ctx.eval("2 ** 32 + 5").unwrap().get::<i32>(), Some(5));
        assert_eq!(ctx.eval("NaN").unwrap().get::<i32>(), Some(0));
    }

    #[test]
    fn test_type_mismatch_is_none() {
        let ctx = QjsContext::new().unwrap();
        let text = ctx.string("12").unwrap();
        assert_eq!(text.get::<i32>(), None);
        assert_eq!(text.get::<bool>(), None);
        assert_eq!(ctx.number(12.0).get::<String>(), None);
        assert_eq!(ctx.eval("({})").unwrap().get::<f64>(), None);
    }

    #[test]
    fn test_strings() {
        let ctx = QjsContext::new().unwrap();
        let owned = String::from("owned").to_qjs(&ctx).unwrap();
        assert_eq!(owned.get::<String>().as_deref(), Some("owned"));
        let borrowed = "borrowed".to_qjs(&ctx).unwrap();
        assert_eq!(borrowed.get::<String>().as_deref(), Some("borrowed"));
    }

    #[test]
    fn test_option() {
        let ctx = QjsContext::new().unwrap();
        let none: Option<i32> = None;
        assert!(none.to_qjs(&ctx).unwrap().is_null());
        assert_eq!(Some(4).to_qjs(&ctx).unwrap().get::<Option<i32>>(), Some(Some(4)));
        assert_eq!(ctx.undefined().get::<Option<i32>>(), Some(None));
        assert_eq!(ctx.string("x").unwrap().get::<Option<i32>>(), None);
    }

    #[test]
    fn test_unit() {
        let ctx = QjsContext::new().unwrap();
        assert!(().to_qjs(&ctx).unwrap().is_undefined());
        assert_eq!(ctx.undefined().get::<()>(), Some(()));
        assert_eq!(ctx.null().get::<()>(), None);
    }

    #[test]
    fn test_vec_round_trip() {
        let ctx = QjsContext::new().unwrap();
        let value = vec![1, 2, 3].to_qjs(&ctx).unwrap();
        assert!(value.is_array());
        assert_eq!(value.get::<Vec<i32>>(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_vec_reads_exactly_len_elements() {
        let ctx = QjsContext::new().unwrap();
        let value = ctx.eval("[10, 20, 30]").unwrap();
        let out = value.get::<Vec<i32>>().unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out, vec![10, 20, 30]);
    }

    #[test]
    fn test_vec_empty_and_holes() {
        let ctx = QjsContext::new().unwrap();
        assert_eq!(ctx.eval("[]").unwrap().get::<Vec<i32>>(), Some(vec![]));
        assert_eq!(
            ctx.eval("[1, , 3]").unwrap().get::<Vec<Option<i32>>>(),
            Some(vec![Some(1), None, Some(3)])
        );
    }

    #[test]
    fn test_vec_is_all_or_nothing() {
        let ctx = QjsContext::new().unwrap();
        assert_eq!(ctx.eval("[1, 'two', 3]").unwrap().get::<Vec<i32>>(), None);
        assert_eq!(ctx.number(1.0).get::<Vec<i32>>(), None);
    }

    #[test]
    fn test_vec_from_array_like() {
        let ctx = QjsContext::new().unwrap();
        let value = ctx.eval("({ length: 2, 0: 'a', 1: 'b' })").unwrap();
        assert_eq!(
            value.get::<Vec<String>>(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_vec_conversion_releases_elements() {
        let ctx = QjsContext::new().unwrap();
        let value = ctx.eval("[{}, {}, {}]").unwrap();
        let before = ctx.live_handles();
        let handles = value.get::<Vec<QjsValue>>().unwrap();
        assert_eq!(ctx.live_handles(), before + 3);
        drop(handles);
        assert_eq!(ctx.live_handles(), before);
    }

    #[test]
    fn test_nested_vec() {
        let ctx = QjsContext::new().unwrap();
        let nested = vec![vec![1, 2], vec![3]];
        let value = nested.to_qjs(&ctx).unwrap();
        assert_eq!(value.to_json().unwrap(), "[[1,2],[3]]");
        assert_eq!(value.get::<Vec<Vec<i32>>>(), Some(nested));
    }

    #[test]
    fn test_json_wrapper() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct User {
            name: String,
            tags: Vec<String>,
        }

        let ctx = QjsContext::new().unwrap();
        let user = User {
            name: "ana".into(),
            tags: vec!["admin".into()],
        };
        let value = Json(user).to_qjs(&ctx).unwrap();
        ctx.set_global("user", value).unwrap();
        let back = ctx.eval("user.tags.push('dev'); user").unwrap();
        let Json(user) = back.get::<Json<User>>().unwrap();
        assert_eq!(user.tags, vec!["admin".to_string(), "dev".to_string()]);
    }

    #[test]
    fn test_value_passthrough() {
        let ctx = QjsContext::new().unwrap();
        let object = ctx.eval("({})").unwrap();
        let copy = object.to_qjs(&ctx).unwrap();
        assert_eq!(ctx.outstanding_refs(&object), 2);
        drop(copy);

        let other = QjsContext::new().unwrap();
        assert!(object.to_qjs(&other).is_err());
    }

    #[test]
    fn test_to_value_helper() {
        let ctx = QjsContext::new().unwrap();
        let value = ctx.to_value(&[1.5, 2.5][..]).unwrap();
        assert_eq!(value.get::<Vec<f64>>(), Some(vec![1.5, 2.5]));
    }

    #[test]
    fn test_failed_sequence_read_keeps_pending_exception() {
        let ctx = QjsContext::new().unwrap();
        let failed = ctx.evaluate("throw new Error('original')", "throw.js");
        assert!(failed.is_exception());

        let negative = ctx.eval("({ length: -1 })").unwrap();
        assert_eq!(negative.get::<Vec<i32>>(), None);
        let throwing = ctx
            .eval("({ get length() { throw new TypeError('length getter'); } })")
            .unwrap();
        assert_eq!(throwing.get::<Vec<i32>>(), None);
        let element = ctx
            .eval("({ length: 1, get 0() { throw new TypeError('element getter'); } })")
            .unwrap();
        assert_eq!(element.get::<Vec<i32>>(), None);

        let err = failed.into_result().unwrap_err();
        assert_eq!(err.error_type(), "Error");
        assert_eq!(err.message(), "original");
    }

    #[test]
    fn test_direct_and_json_reads_keep_pending_exception() {
        let ctx = QjsContext::new().unwrap();
        let negative = ctx.eval("({ length: -1 })").unwrap();
        let cyclic = ctx.eval("const a = {}; a.self = a; a").unwrap();
        let failed = ctx.evaluate("throw new Error('first')", "throw.js");

        assert_eq!(Vec::<i32>::from_qjs(negative.as_value_ref()), None);
        assert!(cyclic.get::<Json<serde_json::Value>>().is_none());

        let err = failed.into_result().unwrap_err();
        assert_eq!(err.message(), "first");
    }
}
