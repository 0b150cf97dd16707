//! Host object bindings
//!
//! Associates engine objects with Rust objects without storing anything in
//! the engine. The registry is keyed by object address and holds a counted
//! anchor on each bound object, so an address cannot be reused by a new
//! object while its binding exists. The host side is held weakly: dropping
//! the Rust object makes `resolve` return `None`, and dead entries are
//! pruned lazily.

use rustc_hash::FxHashMap;
use std::any::Any;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

use crate::context::{ContextInner, QjsContext};
use crate::error::{QjsError, QjsResult};
use crate::ffi::{self, JSValue};
use crate::value::QjsHandle;

struct Binding {
    /// Counted reference keeping the bound object (and its address) alive.
    anchor: JSValue,
    host: Weak<dyn Any>,
}

#[derive(Default)]
pub(crate) struct BindingRegistry {
    entries: FxHashMap<usize, Binding>,
}

impl BindingRegistry {
    /// Insert a binding, returning the anchor of the one it replaces.
    fn insert(&mut self, id: usize, anchor: JSValue, host: Weak<dyn Any>) -> Option<JSValue> {
        self.entries
            .insert(id, Binding { anchor, host })
            .map(|old| old.anchor)
    }

    fn lookup(&self, id: usize) -> Option<Rc<dyn Any>> {
        self.entries.get(&id)?.host.upgrade()
    }

    fn remove(&mut self, id: usize) -> Option<JSValue> {
        self.entries.remove(&id).map(|binding| binding.anchor)
    }

    /// Remove bindings whose host object is gone, returning their anchors.
    fn take_dead(&mut self) -> Vec<JSValue> {
        let mut dead = Vec::new();
        self.entries.retain(|_, binding| {
            let alive = binding.host.strong_count() > 0;
            if !alive {
                dead.push(binding.anchor);
            }
            alive
        });
        dead
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Take every anchor, for teardown.
    pub(crate) fn drain(&mut self) -> Vec<JSValue> {
        self.entries.drain().map(|(_, binding)| binding.anchor).collect()
    }
}

impl ContextInner {
    /// Host object bound to a raw engine value, if it is still alive.
    pub(crate) fn resolve_raw(&self, raw: JSValue) -> Option<Rc<dyn Any>> {
        let id = ffi::identity(raw)?;
        let host = self.bindings.borrow().lookup(id);
        if host.is_none() {
            let anchor = self.bindings.borrow_mut().remove(id);
            if let Some(anchor) = anchor {
                debug!(id, "dropping binding of released host object");
                self.release_anchor(anchor);
            }
        }
        host
    }

    pub(crate) fn bind_raw(&self, raw: JSValue, host: Weak<dyn Any>) -> QjsResult<()> {
        if ffi::type_of(raw) != ffi::QjsType::Object {
            return Err(QjsError::type_error("object", ffi::type_of(raw).name()));
        }
        let id = ffi::identity(raw).ok_or_else(|| QjsError::internal("object without identity"))?;
        let anchor = self.retain_anchor(raw);
        let replaced = self.bindings.borrow_mut().insert(id, anchor, host);
        if let Some(old) = replaced {
            self.release_anchor(old);
        }
        trace!(id, "bound host object");
        Ok(())
    }
}

impl QjsContext {
    /// Associate an engine object with a host object.
    ///
    /// The binding holds the host weakly and keeps the engine object alive
    /// until it is unbound, the host is dropped and the entry pruned, or
    /// the context is torn down. Rebinding replaces the previous host.
    pub fn bind<T: Any>(&self, target: &impl QjsHandle, host: &Rc<T>) -> QjsResult<()> {
        let view = target.as_value_ref();
        if !self.inner().owns(view) {
            return Err(QjsError::internal("value belongs to another context"));
        }
        self.prune_bindings();
        let host: Weak<dyn Any> = Rc::downgrade(host) as Weak<dyn Any>;
        self.inner().bind_raw(view.raw(), host)
    }

    /// Host object bound to `target`, if any and if it is still alive and
    /// of type `T`.
    pub fn resolve<T: Any>(&self, target: &impl QjsHandle) -> Option<Rc<T>> {
        let view = target.as_value_ref();
        if !ffi::has_ref_count(view.raw()) || !self.inner().owns(view) {
            return None;
        }
        self.inner().resolve_raw(view.raw())?.downcast::<T>().ok()
    }

    /// Remove the binding on `target`. Returns whether one existed.
    pub fn unbind(&self, target: &impl QjsHandle) -> bool {
        let view = target.as_value_ref();
        if !self.inner().owns(view) {
            return false;
        }
        let Some(id) = ffi::identity(view.raw()) else {
            return false;
        };
        let anchor = self.inner().bindings.borrow_mut().remove(id);
        match anchor {
            Some(anchor) => {
                self.inner().release_anchor(anchor);
                true
            }
            None => false,
        }
    }

    /// Drop bindings whose host objects are gone. Returns how many were
    /// removed.
    pub fn prune_bindings(&self) -> usize {
        let dead = self.inner().bindings.borrow_mut().take_dead();
        let count = dead.len();
        for anchor in dead {
            self.inner().release_anchor(anchor);
        }
        if count > 0 {
            debug!(count, "pruned dead bindings");
        }
        count
    }

    /// Number of bindings currently registered, dead or alive.
    pub fn binding_count(&self) -> usize {
        self.inner().bindings.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use crate::{QjsContext, QjsHandle};
    use std::cell::Cell;
    use std::rc::Rc;

    struct Counter {
        hits: Cell<u32>,
    }

    #[test]
    fn test_bind_and_resolve() {
        let ctx = QjsContext::new().unwrap();
        let object = ctx.new_object().unwrap();
        let host = Rc::new(Counter { hits: Cell::new(0) });

        ctx.bind(&object, &host).unwrap();
        let resolved = ctx.resolve::<Counter>(&object).unwrap();
        resolved.hits.set(5);
        assert_eq!(host.hits.get(), 5);
        assert!(Rc::ptr_eq(&resolved, &host));
    }

    #[test]
    fn test_resolve_wrong_type() {
        let ctx = QjsContext::new().unwrap();
        let object = ctx.new_object().unwrap();
        let host = Rc::new(String::from("host"));
        ctx.bind(&object, &host).unwrap();
        assert!(ctx.resolve::<Counter>(&object).is_none());
        assert_eq!(ctx.resolve::<String>(&object).as_deref().map(String::as_str), Some("host"));
    }

    #[test]
    fn test_resolve_after_host_dropped() {
        let ctx = QjsContext::new().unwrap();
        let object = ctx.new_object().unwrap();
        let host = Rc::new(Counter { hits: Cell::new(0) });
        ctx.bind(&object, &host).unwrap();
        drop(host);

        assert!(ctx.resolve::<Counter>(&object).is_none());
        assert_eq!(ctx.binding_count(), 0);
    }

    #[test]
    fn test_binding_keeps_object_identity() {
        let ctx = QjsContext::new().unwrap();
        let object = ctx.new_object().unwrap();
        let host = Rc::new(Counter { hits: Cell::new(0) });
        ctx.bind(&object, &host).unwrap();
        assert_eq!(ctx.outstanding_refs(&object), 2);

        // Re-acquiring the same object from script resolves to the host.
        ctx.set_global("bound", object.dup()).unwrap();
        let again = ctx.eval("bound").unwrap();
        assert!(ctx.resolve::<Counter>(&again).is_some());
    }

    #[test]
    fn test_unbind() {
        let ctx = QjsContext::new().unwrap();
        let object = ctx.new_object().unwrap();
        let host = Rc::new(Counter { hits: Cell::new(0) });
        ctx.bind(&object, &host).unwrap();

        assert!(ctx.unbind(&object));
        assert!(!ctx.unbind(&object));
        assert!(ctx.resolve::<Counter>(&object).is_none());
        assert_eq!(ctx.outstanding_refs(&object), 1);
    }

    #[test]
    fn test_prune_bindings() {
        let ctx = QjsContext::new().unwrap();
        let a = ctx.new_object().unwrap();
        let b = ctx.new_object().unwrap();
        let kept = Rc::new(Counter { hits: Cell::new(0) });
        let gone = Rc::new(Counter { hits: Cell::new(0) });
        ctx.bind(&a, &kept).unwrap();
        ctx.bind(&b, &gone).unwrap();
        drop(gone);

        assert_eq!(ctx.prune_bindings(), 1);
        assert_eq!(ctx.binding_count(), 1);
        assert!(ctx.resolve::<Counter>(&a).is_some());
    }

    #[test]
    fn test_bind_rejects_primitives() {
        let ctx = QjsContext::new().unwrap();
        let host = Rc::new(Counter { hits: Cell::new(0) });
        assert!(ctx.bind(&ctx.number(1.0), &host).is_err());
        assert!(ctx.resolve::<Counter>(&ctx.number(1.0)).is_none());
    }

    #[test]
    fn test_rebind_replaces_host() {
        let ctx = QjsContext::new().unwrap();
        let object = ctx.new_object().unwrap();
        let first = Rc::new(Counter { hits: Cell::new(1) });
        let second = Rc::new(Counter { hits: Cell::new(2) });
        ctx.bind(&object, &first).unwrap();
        ctx.bind(&object, &second).unwrap();

        assert_eq!(ctx.resolve::<Counter>(&object).unwrap().hits.get(), 2);
        assert_eq!(ctx.binding_count(), 1);
        assert_eq!(ctx.outstanding_refs(&object), 2);
        assert!(object.is_object());
    }
}
