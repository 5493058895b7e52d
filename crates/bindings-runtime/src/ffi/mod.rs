//! Foreign Function Interface (FFI) boundary
//!
//! Lets Rust code drive a native library through:
//! - Library handles with process-wide registration (`loader`)
//! - Typed bindings checked before every call (`types`, `caller`)
//! - Views and owned buffers over native memory (`view`, `owned`)
//! - Callbacks from native code into Rust (`callbacks`)
//! - Header-driven declarations (`interface`) and the typed surface built on them
//!
//! # Safety
//!
//! FFI operations involve `unsafe` code and careful memory management.
//! Asserting a signature (`SignatureBinder::bind`) and wrapping raw memory
//! (`BufferView::from_borrowed`, `NativePtr::from_raw`) are the unsafe entry
//! points; everything built on them is checked.

pub mod callbacks;
pub mod caller;
pub mod events;
pub mod global;
pub mod interface;
pub mod loader;
pub mod marshal;
pub mod owned;
pub mod safety;
pub mod surface;
pub mod types;
pub mod view;

pub use callbacks::CallbackTrampoline;
pub use caller::SignatureBinder;
pub use events::{
    BoundaryEvent, ColorMode, EventEntry, EventLogger, MemoryEventLogger, NullEventLogger,
    Severity, StderrEventLogger,
};
pub use global::GlobalVariable;
pub use interface::InterfaceDescription;
pub use loader::{LibraryLoader, NativeHandle};
pub use marshal::{check_value, decode_text, encode_text, MarshalContext};
pub use owned::OwnedNativeBuffer;
pub use safety::{check_null, Liveness, LivenessToken};
pub use surface::{NativeSurface, SURFACE_HEADER};
pub use types::{CallbackRef, NativePtr, NativeScalar, Signature, TypeDescriptor, Value};
pub use view::BufferView;
