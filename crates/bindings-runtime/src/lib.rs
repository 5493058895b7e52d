//! Bindings Runtime - memory-safe FFI boundary layer
//!
//! This library provides:
//! - Loading native libraries and resolving symbols
//! - Binding symbols to checked signatures and calling them
//! - Bounds-checked views and exactly-once ownership of native buffers
//! - Trampolines that let native code call back into Rust
//!
//! # Example
//!
//! ```no_run
//! use bindings_runtime::ffi::{NativeHandle, NativeSurface};
//!
//! let handle = NativeHandle::open("bindings_demo")?;
//! let surface = NativeSurface::open(handle)?;
//! assert_eq!(surface.func_ret_str("Some str")?, "Some str");
//! # Ok::<(), bindings_runtime::FfiError>(())
//! ```

/// Bindings runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;
pub mod ffi;
pub mod options;

// Re-export commonly used types
pub use error::{ErrorKind, FfiError, FfiResult};
pub use ffi::{
    BufferView, CallbackTrampoline, LibraryLoader, NativeHandle, OwnedNativeBuffer,
    SignatureBinder, TypeDescriptor, Value,
};
pub use options::BoundaryOptions;
