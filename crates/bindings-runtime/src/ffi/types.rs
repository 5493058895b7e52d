//! FFI type system - descriptors for native signatures and marshaled values
//!
//! Defines:
//! - `TypeDescriptor`: closed set of C types a signature may use
//! - `Signature`: argument and return descriptors of one native function
//! - `Value`: local representation of a value crossing the boundary
//!
//! Type mapping:
//! - TypeDescriptor::Int32 → Value::Int32(i32)   (C `int`)
//! - TypeDescriptor::Int64 → Value::Int64(i64)   (C `long long`)
//! - TypeDescriptor::Int16 → Value::Int16(i16)   (C `short`)
//! - TypeDescriptor::UInt32 → Value::UInt32(u32) (C `unsigned int`)
//! - TypeDescriptor::USize → Value::USize(usize) (C `size_t`)
//! - TypeDescriptor::Double → Value::Double(f64) (C `double`)
//! - TypeDescriptor::Char → Value::Char(u8)      (C `char`)
//! - TypeDescriptor::CString → Value::Str(String) (C `char*`, null-terminated)
//! - TypeDescriptor::Pointer(T) → Value::Pointer(NativePtr)
//! - TypeDescriptor::FunctionPointer → Value::Callback(CallbackRef)
//! - TypeDescriptor::Void → Value::Void (return only)

use crate::error::{FfiError, FfiResult};
use crate::ffi::marshal;
use crate::ffi::safety::{FaultSlot, LivenessToken};
use bindings_config::TextEncoding;
use libffi::middle::{Cif, Type};
use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use std::fmt;
use std::os::raw::c_char;

/// C type of a parameter, return value, global or buffer element
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeDescriptor {
    Int32,
    Int64,
    Int16,
    UInt32,
    USize,
    Double,
    Char,
    /// Null-terminated string, copied in and decoded out
    CString,
    /// Return type or pointee only
    Void,
    Pointer(Box<TypeDescriptor>),
    FunctionPointer {
        args: Vec<TypeDescriptor>,
        ret: Box<TypeDescriptor>,
    },
}

impl TypeDescriptor {
    /// `Pointer(pointee)`
    pub fn pointer(pointee: TypeDescriptor) -> Self {
        TypeDescriptor::Pointer(Box::new(pointee))
    }

    /// `FunctionPointer { args, ret }`
    pub fn function(args: Vec<TypeDescriptor>, ret: TypeDescriptor) -> Self {
        TypeDescriptor::FunctionPointer {
            args,
            ret: Box::new(ret),
        }
    }

    /// Fixed-size numeric or character type
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            TypeDescriptor::Int32
                | TypeDescriptor::Int64
                | TypeDescriptor::Int16
                | TypeDescriptor::UInt32
                | TypeDescriptor::USize
                | TypeDescriptor::Double
                | TypeDescriptor::Char
        )
    }

    /// Size in bytes of one value of this type in native memory
    pub fn size(&self) -> usize {
        match self {
            TypeDescriptor::Int32 => std::mem::size_of::<i32>(),
            TypeDescriptor::Int64 => std::mem::size_of::<i64>(),
            TypeDescriptor::Int16 => std::mem::size_of::<i16>(),
            TypeDescriptor::UInt32 => std::mem::size_of::<u32>(),
            TypeDescriptor::USize => std::mem::size_of::<usize>(),
            TypeDescriptor::Double => std::mem::size_of::<f64>(),
            TypeDescriptor::Char => std::mem::size_of::<c_char>(),
            TypeDescriptor::CString
            | TypeDescriptor::Pointer(_)
            | TypeDescriptor::FunctionPointer { .. } => std::mem::size_of::<*const c_void>(),
            TypeDescriptor::Void => 0,
        }
    }

    /// libffi type used to build call interfaces
    pub(crate) fn ffi_type(&self) -> Type {
        match self {
            TypeDescriptor::Int32 => Type::i32(),
            TypeDescriptor::Int64 => Type::i64(),
            TypeDescriptor::Int16 => Type::i16(),
            TypeDescriptor::UInt32 => Type::u32(),
            TypeDescriptor::USize => Type::usize(),
            TypeDescriptor::Double => Type::f64(),
            TypeDescriptor::Char => {
                if c_char::MIN == 0 {
                    Type::c_uchar()
                } else {
                    Type::c_schar()
                }
            }
            TypeDescriptor::CString
            | TypeDescriptor::Pointer(_)
            | TypeDescriptor::FunctionPointer { .. } => Type::pointer(),
            TypeDescriptor::Void => Type::void(),
        }
    }

    /// Reject descriptors that cannot be passed as an argument
    fn validate_arg(&self, symbol: &str) -> FfiResult<()> {
        match self {
            TypeDescriptor::Void => Err(FfiError::signature(
                symbol,
                "void is only valid as a return type or pointee",
            )),
            TypeDescriptor::Pointer(pointee) => pointee.validate_pointee(symbol),
            TypeDescriptor::FunctionPointer { args, ret } => {
                for arg in args {
                    arg.validate_arg(symbol)?;
                }
                ret.validate_return(symbol)
            }
            _ => Ok(()),
        }
    }

    fn validate_return(&self, symbol: &str) -> FfiResult<()> {
        match self {
            TypeDescriptor::Void => Ok(()),
            TypeDescriptor::FunctionPointer { .. } => Err(FfiError::signature(
                symbol,
                "function pointer return values are not supported",
            )),
            other => other.validate_arg(symbol),
        }
    }

    fn validate_pointee(&self, symbol: &str) -> FfiResult<()> {
        match self {
            TypeDescriptor::Void => Ok(()),
            other => other.validate_arg(symbol),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Int32 => write!(f, "int"),
            TypeDescriptor::Int64 => write!(f, "long long"),
            TypeDescriptor::Int16 => write!(f, "short"),
            TypeDescriptor::UInt32 => write!(f, "unsigned int"),
            TypeDescriptor::USize => write!(f, "size_t"),
            TypeDescriptor::Double => write!(f, "double"),
            TypeDescriptor::Char => write!(f, "char"),
            TypeDescriptor::CString => write!(f, "char*"),
            TypeDescriptor::Void => write!(f, "void"),
            TypeDescriptor::Pointer(pointee) => write!(f, "{}*", pointee),
            TypeDescriptor::FunctionPointer { args, ret } => {
                write!(f, "{}(*)(", ret)?;
                write_list(f, args)?;
                write!(f, ")")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, types: &[TypeDescriptor]) -> fmt::Result {
    if types.is_empty() {
        return write!(f, "void");
    }
    for (i, ty) in types.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", ty)?;
    }
    Ok(())
}

/// Argument and return types of one native function
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub args: Vec<TypeDescriptor>,
    pub ret: TypeDescriptor,
}

impl Signature {
    pub fn new(args: Vec<TypeDescriptor>, ret: TypeDescriptor) -> Self {
        Self { args, ret }
    }

    /// Signature described by a `FunctionPointer` descriptor
    pub fn from_descriptor(descriptor: &TypeDescriptor) -> Option<Self> {
        match descriptor {
            TypeDescriptor::FunctionPointer { args, ret } => {
                Some(Self::new(args.clone(), (**ret).clone()))
            }
            _ => None,
        }
    }

    /// `FunctionPointer` descriptor with this signature
    pub fn to_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::function(self.args.clone(), self.ret.clone())
    }

    /// Bind-time checks: `void` only as return or pointee, nested
    /// function pointers checked recursively
    pub fn validate(&self, symbol: &str) -> FfiResult<()> {
        for arg in &self.args {
            arg.validate_arg(symbol)?;
        }
        self.ret.validate_return(symbol)
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub(crate) fn cif(&self) -> Cif {
        Cif::new(
            self.args.iter().map(TypeDescriptor::ffi_type).collect::<Vec<_>>(),
            self.ret.ffi_type(),
        )
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.ret)?;
        write_list(f, &self.args)?;
        write!(f, ")")
    }
}

/// Address of native memory together with the type stored there
#[derive(Debug, Clone)]
pub struct NativePtr {
    address: usize,
    pointee: TypeDescriptor,
    liveness: Option<LivenessToken>,
}

impl NativePtr {
    /// Null pointer to `pointee`
    pub fn null(pointee: TypeDescriptor) -> Self {
        Self {
            address: 0,
            pointee,
            liveness: None,
        }
    }

    /// Wrap a raw address
    ///
    /// # Safety
    ///
    /// `address` must be null or valid for reads and writes of `pointee`
    /// (for as many elements as native code will touch) for as long as the
    /// pointer is used. Without a liveness token nothing is checked.
    pub unsafe fn from_raw(address: *mut c_void, pointee: TypeDescriptor) -> Self {
        Self::unchecked(address as usize, pointee)
    }

    pub(crate) fn unchecked(address: usize, pointee: TypeDescriptor) -> Self {
        Self {
            address,
            pointee,
            liveness: None,
        }
    }

    pub(crate) fn tracked(address: usize, pointee: TypeDescriptor, token: LivenessToken) -> Self {
        Self {
            address,
            pointee,
            liveness: Some(token),
        }
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.address as *mut c_void
    }

    pub fn pointee(&self) -> &TypeDescriptor {
        &self.pointee
    }

    pub fn is_null(&self) -> bool {
        self.address == 0
    }

    /// False once the memory's owner is gone; untracked pointers are always alive
    pub fn is_alive(&self) -> bool {
        self.liveness.as_ref().map_or(true, LivenessToken::is_alive)
    }

    /// `DanglingView` if the owner of the memory is gone
    pub fn ensure_alive(&self) -> FfiResult<()> {
        match &self.liveness {
            Some(token) => token.ensure_view(),
            None => Ok(()),
        }
    }

    /// Same address viewed as another pointee type
    pub fn cast(&self, pointee: TypeDescriptor) -> Self {
        Self {
            address: self.address,
            pointee,
            liveness: self.liveness.clone(),
        }
    }

    /// Read the value the pointer refers to
    ///
    /// # Safety
    ///
    /// The address must be valid for a read of the pointee type.
    pub unsafe fn read(&self, encoding: TextEncoding) -> FfiResult<Value> {
        self.ensure_alive()?;
        if self.is_null() {
            return Err(FfiError::NullPointer("pointer read".to_string()));
        }
        marshal::read_native(self.as_ptr(), &self.pointee, encoding)
    }

    /// Read a scalar of type `T`
    ///
    /// # Safety
    ///
    /// The address must be valid for a read of `T`.
    pub unsafe fn read_scalar<T: NativeScalar>(&self) -> FfiResult<T> {
        if self.pointee != T::DESCRIPTOR {
            return Err(FfiError::type_mismatch(T::DESCRIPTOR, &self.pointee));
        }
        let value = self.read(TextEncoding::default())?;
        T::from_value(&value).ok_or_else(|| FfiError::type_mismatch(T::DESCRIPTOR, &self.pointee))
    }

    /// Write a value of the pointee type
    ///
    /// # Safety
    ///
    /// The address must be valid for a write of the pointee type.
    pub unsafe fn write(&self, value: &Value) -> FfiResult<()> {
        self.ensure_alive()?;
        if self.is_null() {
            return Err(FfiError::NullPointer("pointer write".to_string()));
        }
        marshal::write_native(self.as_ptr(), &self.pointee, value)
    }
}

impl PartialEq for NativePtr {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.pointee == other.pointee
    }
}

/// Native-callable entry point of a live trampoline
#[derive(Debug, Clone)]
pub struct CallbackRef {
    address: usize,
    descriptor: TypeDescriptor,
    liveness: LivenessToken,
    faults: FaultSlot,
}

impl CallbackRef {
    pub(crate) fn new(
        address: usize,
        descriptor: TypeDescriptor,
        liveness: LivenessToken,
        faults: FaultSlot,
    ) -> Self {
        Self {
            address,
            descriptor,
            liveness,
            faults,
        }
    }

    pub fn address(&self) -> usize {
        self.address
    }

    /// The `FunctionPointer` descriptor the trampoline was wrapped with
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    pub(crate) fn ensure_alive(&self) -> FfiResult<()> {
        self.liveness.ensure_callback()
    }

    pub(crate) fn faults(&self) -> &FaultSlot {
        &self.faults
    }
}

impl PartialEq for CallbackRef {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.descriptor == other.descriptor
    }
}

/// A value crossing the boundary
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Int16(i16),
    UInt32(u32),
    USize(usize),
    Double(f64),
    Char(u8),
    Str(String),
    Pointer(NativePtr),
    Callback(CallbackRef),
    Void,
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Descriptor of the type this value carries
    pub fn descriptor(&self) -> TypeDescriptor {
        match self {
            Value::Int32(_) => TypeDescriptor::Int32,
            Value::Int64(_) => TypeDescriptor::Int64,
            Value::Int16(_) => TypeDescriptor::Int16,
            Value::UInt32(_) => TypeDescriptor::UInt32,
            Value::USize(_) => TypeDescriptor::USize,
            Value::Double(_) => TypeDescriptor::Double,
            Value::Char(_) => TypeDescriptor::Char,
            Value::Str(_) => TypeDescriptor::CString,
            Value::Pointer(p) => TypeDescriptor::pointer(p.pointee.clone()),
            Value::Callback(c) => c.descriptor.clone(),
            Value::Void => TypeDescriptor::Void,
        }
    }

    /// Extract a scalar of type `T`
    pub fn get<T: NativeScalar>(&self) -> Option<T> {
        T::from_value(self)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<&NativePtr> {
        match self {
            Value::Pointer(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::USize(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "'{}'", v.escape_ascii()),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Pointer(p) => write!(f, "({}*){:#x}", p.pointee, p.address),
            Value::Callback(c) => write!(f, "<callback {:#x}>", c.address),
            Value::Void => write!(f, "void"),
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Rust types with a one-to-one scalar descriptor
pub trait NativeScalar: Copy + sealed::Sealed + 'static {
    const DESCRIPTOR: TypeDescriptor;

    fn into_value(self) -> Value;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! native_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl NativeScalar for $ty {
                const DESCRIPTOR: TypeDescriptor = TypeDescriptor::$variant;

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(*v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

native_scalar! {
    i32 => Int32,
    i64 => Int64,
    i16 => Int16,
    u32 => UInt32,
    usize => USize,
    f64 => Double,
    u8 => Char,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn comparator() -> TypeDescriptor {
        TypeDescriptor::function(
            vec![
                TypeDescriptor::pointer(TypeDescriptor::Int32),
                TypeDescriptor::pointer(TypeDescriptor::Int32),
            ],
            TypeDescriptor::Int32,
        )
    }

    #[rstest]
    #[case(TypeDescriptor::Int32, "int")]
    #[case(TypeDescriptor::UInt32, "unsigned int")]
    #[case(TypeDescriptor::CString, "char*")]
    #[case(TypeDescriptor::pointer(TypeDescriptor::Void), "void*")]
    #[case(TypeDescriptor::pointer(TypeDescriptor::pointer(TypeDescriptor::Int16)), "short**")]
    #[case(comparator(), "int(*)(int*, int*)")]
    #[case(TypeDescriptor::function(vec![], TypeDescriptor::Void), "void(*)(void)")]
    fn test_descriptor_display(#[case] ty: TypeDescriptor, #[case] expected: &str) {
        assert_eq!(ty.to_string(), expected);
    }

    #[rstest]
    #[case(TypeDescriptor::Int32, 4)]
    #[case(TypeDescriptor::Int64, 8)]
    #[case(TypeDescriptor::Int16, 2)]
    #[case(TypeDescriptor::Double, 8)]
    #[case(TypeDescriptor::Char, 1)]
    #[case(TypeDescriptor::Void, 0)]
    fn test_descriptor_size(#[case] ty: TypeDescriptor, #[case] expected: usize) {
        assert_eq!(ty.size(), expected);
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(comparator(), comparator());
        assert_ne!(
            TypeDescriptor::pointer(TypeDescriptor::Int32),
            TypeDescriptor::pointer(TypeDescriptor::Int64)
        );
    }

    #[test]
    fn test_signature_display() {
        let sig = Signature::new(
            vec![
                TypeDescriptor::Int32,
                TypeDescriptor::Double,
                TypeDescriptor::Char,
                TypeDescriptor::Int16,
            ],
            TypeDescriptor::Char,
        );
        insta::assert_snapshot!(sig.to_string(), @"char (int, double, char, short)");
    }

    #[test]
    fn test_void_argument_rejected() {
        let sig = Signature::new(vec![TypeDescriptor::Void], TypeDescriptor::Int32);
        assert!(matches!(
            sig.validate("f"),
            Err(FfiError::SignatureMismatch { .. })
        ));
    }

    #[test]
    fn test_void_inside_function_pointer_rejected() {
        let nested = TypeDescriptor::function(vec![TypeDescriptor::Void], TypeDescriptor::Int32);
        let sig = Signature::new(vec![nested], TypeDescriptor::Void);
        assert!(sig.validate("upd_arr").is_err());
    }

    #[test]
    fn test_void_pointee_and_return_accepted() {
        let sig = Signature::new(
            vec![TypeDescriptor::pointer(TypeDescriptor::Void)],
            TypeDescriptor::Void,
        );
        assert!(sig.validate("free_arr").is_ok());
    }

    #[test]
    fn test_function_pointer_return_rejected() {
        let sig = Signature::new(vec![], comparator());
        assert!(sig.validate("f").is_err());
    }

    #[test]
    fn test_descriptor_serde_round_trip() {
        let json = serde_json::to_string(&comparator()).unwrap();
        let back: TypeDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, comparator());
    }

    #[test]
    fn test_value_descriptor() {
        assert_eq!(Value::Int16(3).descriptor(), TypeDescriptor::Int16);
        assert_eq!(Value::str("x").descriptor(), TypeDescriptor::CString);
        assert_eq!(
            Value::Pointer(NativePtr::null(TypeDescriptor::Double)).descriptor(),
            TypeDescriptor::pointer(TypeDescriptor::Double)
        );
    }

    #[test]
    fn test_scalar_extraction_is_exact() {
        assert_eq!(Value::Int32(7).get::<i32>(), Some(7));
        assert_eq!(Value::Int32(7).get::<i64>(), None);
        assert_eq!(Value::Char(b'X').get::<u8>(), Some(b'X'));
    }

    #[test]
    fn test_read_scalar_checks_pointee() {
        let mut x = 5i32;
        let ptr = unsafe {
            NativePtr::from_raw(&mut x as *mut i32 as *mut c_void, TypeDescriptor::Int32)
        };
        assert_eq!(unsafe { ptr.read_scalar::<i32>() }, Ok(5));
        assert!(matches!(
            unsafe { ptr.read_scalar::<f64>() },
            Err(FfiError::TypeMismatch { .. })
        ));
    }
}
