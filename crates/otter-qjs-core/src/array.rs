//! Array facade with indexed access
//!
//! Derefs to [`QjsObject`] for named properties. Indexed stores are retained
//! host-side per index the same way named stores are.

use rustc_hash::FxHashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::convert::FromQjs;
use crate::error::{QjsError, QjsResult};
use crate::object::QjsObject;
use crate::value::{QjsHandle, QjsValue, QjsValueRef};

/// An owning handle on an engine array.
pub struct QjsArray {
    object: QjsObject,
    elements: FxHashMap<u32, QjsValue>,
}

impl QjsArray {
    pub(crate) fn from_object(object: QjsObject) -> Self {
        Self {
            object,
            elements: FxHashMap::default(),
        }
    }

    /// Current `length`. Zero when it is missing, not a number, or the
    /// context is gone.
    pub fn len(&self) -> u32 {
        self.object.get_property("length").get::<u32>().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read an element. Same failure behavior as
    /// [`QjsObject::get_property`].
    pub fn get_index(&self, index: u32) -> QjsValue {
        let value = self.object.as_value();
        match value.context() {
            Some(inner) => inner.get_index(value.raw(), index),
            None => QjsValue::undefined(),
        }
    }

    /// Store an element and retain `value` under `index`.
    pub fn set_index(&mut self, index: u32, value: QjsValue) -> QjsResult<()> {
        let target = self.object.as_value();
        let Some(inner) = target.context() else {
            return Ok(());
        };
        inner.set_index(target.raw(), index, &value)?;
        self.elements.insert(index, value);
        Ok(())
    }

    /// Append an element, returning its index.
    pub fn push(&mut self, value: QjsValue) -> QjsResult<u32> {
        let index = self.len();
        if index == u32::MAX {
            return Err(QjsError::internal("array is at maximum length"));
        }
        self.set_index(index, value)?;
        Ok(index)
    }

    /// Convert every element. `None` if any element fails to convert.
    pub fn to_vec<T: FromQjs>(&self) -> Option<Vec<T>> {
        Vec::<T>::from_qjs(self.as_value_ref())
    }

    /// Number of handles retained by `set_index`.
    pub fn retained_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn into_object(self) -> QjsObject {
        self.object
    }

    pub fn into_value(self) -> QjsValue {
        self.object.into_value()
    }
}

impl Deref for QjsArray {
    type Target = QjsObject;

    fn deref(&self) -> &QjsObject {
        &self.object
    }
}

impl DerefMut for QjsArray {
    fn deref_mut(&mut self) -> &mut QjsObject {
        &mut self.object
    }
}

impl QjsHandle for QjsArray {
    fn as_value_ref(&self) -> QjsValueRef<'_> {
        self.object.as_value_ref()
    }
}

impl From<QjsArray> for QjsValue {
    fn from(array: QjsArray) -> Self {
        array.into_value()
    }
}

impl fmt::Debug for QjsArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QjsArray")
            .field("len", &self.len())
            .field("retained", &self.elements.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{QjsContext, QjsHandle};

    #[test]
    fn test_push_and_len() {
        let ctx = QjsContext::new().unwrap();
        let mut array = ctx.new_array().unwrap();
        assert!(array.is_empty());

        assert_eq!(array.push(ctx.number(1.0)).unwrap(), 0);
        assert_eq!(array.push(ctx.string("two").unwrap()).unwrap(), 1);
        assert_eq!(array.len(), 2);
        assert_eq!(array.get_index(1).get::<String>().as_deref(), Some("two"));
        assert!(array.get_index(5).is_undefined());
    }

    #[test]
    fn test_set_index_retains() {
        let ctx = QjsContext::new().unwrap();
        let mut array = ctx.new_array().unwrap();
        let element = ctx.new_object().unwrap().into_value();
        let probe = element.dup();

        array.set_index(3, element).unwrap();
        assert_eq!(array.len(), 4);
        assert_eq!(array.retained_elements(), 1);
        assert_eq!(ctx.outstanding_refs(&probe), 2);

        drop(array);
        assert_eq!(ctx.outstanding_refs(&probe), 1);
    }

    #[test]
    fn test_len_of_array_like() {
        let ctx = QjsContext::new().unwrap();
        let mut fake = ctx.new_object().unwrap();
        fake.set_property("length", ctx.string("many").unwrap()).unwrap();
        let array = crate::QjsArray::from_object(fake);
        assert_eq!(array.len(), 0);
    }

    #[test]
    fn test_to_vec() {
        let ctx = QjsContext::new().unwrap();
        let array = ctx.eval("[1, 2, 3]").unwrap().into_array().unwrap();
        assert_eq!(array.to_vec::<i32>(), Some(vec![1, 2, 3]));
        assert_eq!(array.to_vec::<String>(), None);
    }

    #[test]
    fn test_named_properties_through_deref() {
        let ctx = QjsContext::new().unwrap();
        let mut array = ctx.new_array().unwrap();
        array.set_property("tag", ctx.boolean(true)).unwrap();
        assert_eq!(array.property::<bool>("tag"), Some(true));
        assert!(array.is_array());
    }

    #[test]
    fn test_into_array_rejects_plain_object() {
        let ctx = QjsContext::new().unwrap();
        assert!(ctx.eval("({ length: 2 })").unwrap().into_array().is_err());
    }
}
