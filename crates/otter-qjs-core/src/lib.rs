//! Safe ownership and marshalling layer for QuickJS.
//!
//! This crate wraps the raw engine bindings from `rquickjs-sys` with handles
//! that make reference counting explicit: an owning [`QjsValue`] holds one
//! engine count and releases it on drop, a borrowed [`QjsValueRef`] holds
//! none. Rust values cross the boundary through [`ToQjs`] and [`FromQjs`].
//!
//! # Example
//!
//! ```
//! use otter_qjs_core::{QjsContext, QjsHandle};
//!
//! let ctx = QjsContext::new().unwrap();
//! let result = ctx.eval("1 + 1").unwrap();
//! assert_eq!(result.get::<f64>(), Some(2.0));
//! ```
//!
//! # Ownership
//!
//! Every count the bridge takes is recorded by its context, so
//! [`QjsContext::outstanding_refs`] can tell how many handles keep a value
//! alive. Values stored into objects through [`QjsObject::set_property`] are
//! retained by the facade until it is dropped or the name is overwritten.
//!
//! ```
//! use otter_qjs_core::QjsContext;
//!
//! let ctx = QjsContext::new().unwrap();
//! let mut config = ctx.new_object().unwrap();
//! let list = ctx.new_array().unwrap().into_value();
//! config.set_property("items", list).unwrap();
//! assert!(config.is_retained("items"));
//! ```
//!
//! Dropping the context releases everything still outstanding; handles that
//! survive it turn inert.
//!
//! # Thread Safety
//!
//! All types in this crate are `!Send` and `!Sync` because engine reference
//! counts are not atomic and a runtime must stay on the thread that created
//! it.
//!
//! ## Example: Wrong (won't compile)
//!
//! ```compile_fail
//! use otter_qjs_core::QjsContext;
//! use std::thread;
//!
//! let ctx = QjsContext::new().unwrap();
//! thread::spawn(move || {
//!     ctx.eval("1 + 1"); // Error: QjsContext is !Send
//! });
//! ```

mod array;
mod binding;
mod config;
mod context;
mod convert;
mod error;
mod ffi;
mod function;
mod handles;
mod interrupt;
mod object;
mod string;
mod value;

pub use array::QjsArray;
pub use config::QjsConfig;
pub use context::QjsContext;
pub use convert::{FromQjs, Json, QjsInterop, ToQjs};
pub use error::{QjsError, QjsResult};
pub use ffi::QjsType;
pub use function::QjsFunction;
pub use object::QjsObject;
pub use value::{QjsHandle, QjsValue, QjsValueRef};

// Re-export the raw bindings for direct FFI access when needed
pub use rquickjs_sys;
