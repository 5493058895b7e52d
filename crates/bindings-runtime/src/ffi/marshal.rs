//! Type marshaling - local values ↔ native representations
//!
//! One rule per `TypeDescriptor` variant, no implicit coercion:
//! - `check_value()`: does a value fit a declared type (including liveness)
//! - `read_native()` / `write_native()`: load or store a value in native memory
//! - `MarshalContext`: argument slots for one call, owning every temporary
//!
//! # Memory Safety
//!
//! - Strings passed to native code are copied into `CString`s owned by the
//!   context, so they live exactly as long as the call
//! - Pointer and callback arguments are rejected when their owner is gone

use crate::error::{FfiError, FfiResult};
use crate::ffi::types::{NativePtr, TypeDescriptor, Value};
use bindings_config::TextEncoding;
use libffi::low::ffi_arg;
use libffi::middle::{arg, Arg, Cif, CodePtr};
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;

/// Encode a string for native code
pub fn encode_text(text: &str, encoding: TextEncoding) -> FfiResult<CString> {
    let bytes = match encoding {
        TextEncoding::Utf8 => text.as_bytes().to_vec(),
        TextEncoding::Ascii => {
            if let Some(ch) = text.chars().find(|c| !c.is_ascii()) {
                return Err(encode_error(
                    encoding,
                    format!("character {:?} is not ASCII", ch),
                ));
            }
            text.as_bytes().to_vec()
        }
        TextEncoding::Latin1 => text
            .chars()
            .map(|ch| {
                u8::try_from(u32::from(ch)).map_err(|_| {
                    encode_error(encoding, format!("character {:?} is outside Latin-1", ch))
                })
            })
            .collect::<FfiResult<Vec<u8>>>()?,
    };

    CString::new(bytes).map_err(|e| {
        encode_error(
            encoding,
            format!("interior NUL byte at position {}", e.nul_position()),
        )
    })
}

/// Decode bytes produced by native code (terminator already stripped)
pub fn decode_text(bytes: &[u8], encoding: TextEncoding) -> FfiResult<String> {
    match encoding {
        TextEncoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|e| FfiError::DecodeError {
            encoding: encoding.to_string(),
            reason: e.utf8_error().to_string(),
        }),
        TextEncoding::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
            Some(pos) => Err(FfiError::DecodeError {
                encoding: encoding.to_string(),
                reason: format!("byte {:#04x} at position {} is not ASCII", bytes[pos], pos),
            }),
            None => Ok(bytes.iter().map(|&b| b as char).collect()),
        },
        TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
    }
}

fn encode_error(encoding: TextEncoding, reason: String) -> FfiError {
    FfiError::EncodeError {
        encoding: encoding.to_string(),
        reason,
    }
}

/// Check that `value` may be passed where `ty` is declared
pub fn check_value(ty: &TypeDescriptor, value: &Value) -> FfiResult<()> {
    match (ty, value) {
        (TypeDescriptor::Int32, Value::Int32(_))
        | (TypeDescriptor::Int64, Value::Int64(_))
        | (TypeDescriptor::Int16, Value::Int16(_))
        | (TypeDescriptor::UInt32, Value::UInt32(_))
        | (TypeDescriptor::USize, Value::USize(_))
        | (TypeDescriptor::Double, Value::Double(_))
        | (TypeDescriptor::Char, Value::Char(_))
        | (TypeDescriptor::CString, Value::Str(_))
        | (TypeDescriptor::Void, Value::Void) => Ok(()),
        (TypeDescriptor::Pointer(pointee), Value::Pointer(ptr)) => {
            if **pointee != TypeDescriptor::Void && ptr.pointee() != &**pointee {
                return Err(FfiError::type_mismatch(ty, value.descriptor()));
            }
            ptr.ensure_alive()
        }
        (TypeDescriptor::FunctionPointer { .. }, Value::Callback(callback)) => {
            if callback.descriptor() != ty {
                return Err(FfiError::type_mismatch(ty, callback.descriptor()));
            }
            callback.ensure_alive()
        }
        _ => Err(FfiError::type_mismatch(ty, value.descriptor())),
    }
}

/// Load a value of type `ty` stored at `ptr`
///
/// # Safety
///
/// `ptr` must be valid for an unaligned read of `ty.size()` bytes, and for
/// `CString` the stored pointer must be null or point to a terminated string.
pub(crate) unsafe fn read_native(
    ptr: *const c_void,
    ty: &TypeDescriptor,
    encoding: TextEncoding,
) -> FfiResult<Value> {
    let value = match ty {
        TypeDescriptor::Int32 => Value::Int32((ptr as *const i32).read_unaligned()),
        TypeDescriptor::Int64 => Value::Int64((ptr as *const i64).read_unaligned()),
        TypeDescriptor::Int16 => Value::Int16((ptr as *const i16).read_unaligned()),
        TypeDescriptor::UInt32 => Value::UInt32((ptr as *const u32).read_unaligned()),
        TypeDescriptor::USize => Value::USize((ptr as *const usize).read_unaligned()),
        TypeDescriptor::Double => Value::Double((ptr as *const f64).read_unaligned()),
        TypeDescriptor::Char => Value::Char((ptr as *const u8).read_unaligned()),
        TypeDescriptor::CString => {
            let text = (ptr as *const *const c_char).read_unaligned();
            if text.is_null() {
                return Err(FfiError::NullPointer("string read".to_string()));
            }
            Value::Str(decode_text(CStr::from_ptr(text).to_bytes(), encoding)?)
        }
        TypeDescriptor::Pointer(pointee) => {
            let address = (ptr as *const usize).read_unaligned();
            Value::Pointer(NativePtr::unchecked(address, (**pointee).clone()))
        }
        TypeDescriptor::FunctionPointer { .. } => {
            return Err(FfiError::UnsupportedType(format!(
                "cannot read a {} from native memory",
                ty
            )))
        }
        TypeDescriptor::Void => Value::Void,
    };
    Ok(value)
}

/// Store `value` as type `ty` at `ptr`
///
/// # Safety
///
/// `ptr` must be valid for an unaligned write of `ty.size()` bytes.
pub(crate) unsafe fn write_native(
    ptr: *mut c_void,
    ty: &TypeDescriptor,
    value: &Value,
) -> FfiResult<()> {
    check_value(ty, value)?;
    match value {
        Value::Int32(v) => (ptr as *mut i32).write_unaligned(*v),
        Value::Int64(v) => (ptr as *mut i64).write_unaligned(*v),
        Value::Int16(v) => (ptr as *mut i16).write_unaligned(*v),
        Value::UInt32(v) => (ptr as *mut u32).write_unaligned(*v),
        Value::USize(v) => (ptr as *mut usize).write_unaligned(*v),
        Value::Double(v) => (ptr as *mut f64).write_unaligned(*v),
        Value::Char(v) => (ptr as *mut u8).write_unaligned(*v),
        Value::Pointer(p) => (ptr as *mut usize).write_unaligned(p.address()),
        Value::Str(_) | Value::Callback(_) | Value::Void => {
            return Err(FfiError::UnsupportedType(format!(
                "cannot store a {} in native memory",
                ty
            )))
        }
    }
    Ok(())
}

/// Native representation of one argument
#[derive(Debug)]
enum ArgSlot {
    I32(i32),
    I64(i64),
    I16(i16),
    U32(u32),
    USize(usize),
    F64(f64),
    Char(c_char),
    Ptr(*const c_void),
}

/// Marshal context for one native call
///
/// Holds the argument slots and every string copy until the call returns.
///
/// # Example
///
/// ```
/// # use bindings_runtime::ffi::{MarshalContext, TypeDescriptor, Value};
/// # use bindings_config::TextEncoding;
/// let mut ctx = MarshalContext::new(TextEncoding::Utf8);
/// ctx.push(&Value::Int32(42), &TypeDescriptor::Int32).unwrap();
/// ctx.push(&Value::str("hello"), &TypeDescriptor::CString).unwrap();
/// assert_eq!(ctx.len(), 2);
/// // string copies are freed when ctx drops
/// ```
pub struct MarshalContext {
    encoding: TextEncoding,
    slots: Vec<ArgSlot>,
    strings: Vec<CString>,
}

impl MarshalContext {
    pub fn new(encoding: TextEncoding) -> Self {
        Self {
            encoding,
            slots: Vec::new(),
            strings: Vec::new(),
        }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Marshal `value` as the next argument of type `ty`
    pub fn push(&mut self, value: &Value, ty: &TypeDescriptor) -> FfiResult<()> {
        check_value(ty, value)?;
        let slot = match value {
            Value::Int32(v) => ArgSlot::I32(*v),
            Value::Int64(v) => ArgSlot::I64(*v),
            Value::Int16(v) => ArgSlot::I16(*v),
            Value::UInt32(v) => ArgSlot::U32(*v),
            Value::USize(v) => ArgSlot::USize(*v),
            Value::Double(v) => ArgSlot::F64(*v),
            Value::Char(v) => ArgSlot::Char(*v as c_char),
            Value::Str(s) => {
                let copy = encode_text(s, self.encoding)?;
                let ptr = copy.as_ptr() as *const c_void;
                self.strings.push(copy);
                ArgSlot::Ptr(ptr)
            }
            Value::Pointer(p) => ArgSlot::Ptr(p.as_ptr()),
            Value::Callback(c) => ArgSlot::Ptr(c.address() as *const c_void),
            Value::Void => return Err(FfiError::type_mismatch(ty, "void")),
        };
        self.slots.push(slot);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// libffi argument pointers into the slots
    pub(crate) fn ffi_args(&self) -> Vec<Arg> {
        self.slots
            .iter()
            .map(|slot| match slot {
                ArgSlot::I32(v) => arg(v),
                ArgSlot::I64(v) => arg(v),
                ArgSlot::I16(v) => arg(v),
                ArgSlot::U32(v) => arg(v),
                ArgSlot::USize(v) => arg(v),
                ArgSlot::F64(v) => arg(v),
                ArgSlot::Char(v) => arg(v),
                ArgSlot::Ptr(v) => arg(v),
            })
            .collect()
    }
}

/// Perform the native call described by `cif` and decode its result
///
/// Integer results narrower than a register come back in a full `ffi_arg`
/// slot and are narrowed here.
///
/// # Safety
///
/// `code` must be a function whose real signature matches `cif` and `ret`.
pub(crate) unsafe fn call_native(
    cif: &Cif,
    code: usize,
    ret: &TypeDescriptor,
    ctx: &MarshalContext,
    symbol: &str,
) -> FfiResult<Value> {
    let args = ctx.ffi_args();
    let fun = CodePtr(code as *mut c_void);

    let value = match ret {
        TypeDescriptor::Void => {
            cif.call::<()>(fun, &args);
            Value::Void
        }
        TypeDescriptor::Int32 => Value::Int32(cif.call::<ffi_arg>(fun, &args) as i32),
        TypeDescriptor::Int16 => Value::Int16(cif.call::<ffi_arg>(fun, &args) as i16),
        TypeDescriptor::UInt32 => Value::UInt32(cif.call::<ffi_arg>(fun, &args) as u32),
        TypeDescriptor::Char => Value::Char(cif.call::<ffi_arg>(fun, &args) as u8),
        TypeDescriptor::Int64 => Value::Int64(cif.call::<i64>(fun, &args)),
        TypeDescriptor::USize => Value::USize(cif.call::<usize>(fun, &args)),
        TypeDescriptor::Double => Value::Double(cif.call::<f64>(fun, &args)),
        TypeDescriptor::CString => {
            let text = cif.call::<*const c_char>(fun, &args);
            if text.is_null() {
                return Err(FfiError::NullPointer(symbol.to_string()));
            }
            Value::Str(decode_text(CStr::from_ptr(text).to_bytes(), ctx.encoding)?)
        }
        TypeDescriptor::Pointer(pointee) => {
            let address = cif.call::<*mut c_void>(fun, &args);
            Value::Pointer(NativePtr::unchecked(address as usize, (**pointee).clone()))
        }
        TypeDescriptor::FunctionPointer { .. } => {
            return Err(FfiError::UnsupportedType(format!(
                "'{}' returns a function pointer",
                symbol
            )))
        }
    };
    Ok(value)
}
