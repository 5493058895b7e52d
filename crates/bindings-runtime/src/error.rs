//! Boundary error taxonomy
//!
//! Every fallible operation of the boundary layer reports one of these
//! variants to its immediate caller. Nothing is swallowed.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised at the FFI boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FfiError {
    #[error("Failed to load library '{name}': {reason}")]
    LoadError { name: String, reason: String },

    #[error("Symbol '{symbol}' not found in library '{}'", .library.display())]
    SymbolNotFound { library: PathBuf, symbol: String },

    #[error("Signature mismatch for '{symbol}': {reason}")]
    SignatureMismatch { symbol: String, reason: String },

    #[error("Expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Index {index} out of bounds for view of {len} elements")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Shape {shape:?} does not cover {count} elements")]
    ShapeMismatch { shape: Vec<usize>, count: usize },

    #[error("Stride {stride} is smaller than element size {element_size}")]
    InvalidStride { stride: usize, element_size: usize },

    #[error("Buffer view used after its owner was released")]
    DanglingView,

    #[error("Callback used after its trampoline was dropped")]
    DanglingCallback,

    #[error("Library '{}' used after release", .0.display())]
    UseAfterRelease(PathBuf),

    #[error("Native buffer at {address:#x} was already released")]
    DoubleFree { address: usize },

    #[error("Cannot encode string as {encoding}: {reason}")]
    EncodeError { encoding: String, reason: String },

    #[error("Cannot decode string as {encoding}: {reason}")]
    DecodeError { encoding: String, reason: String },

    #[error("Null pointer returned by '{0}'")]
    NullPointer(String),

    #[error("Native call '{symbol}' faulted: {reason}")]
    NativeFault { symbol: String, reason: String },

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Interface parse error at line {line}: {message}")]
    InterfaceParse { line: usize, message: String },
}

/// Error category, without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Load,
    SymbolNotFound,
    SignatureMismatch,
    ArityMismatch,
    TypeMismatch,
    IndexOutOfBounds,
    ShapeMismatch,
    InvalidStride,
    DanglingView,
    DanglingCallback,
    UseAfterRelease,
    DoubleFree,
    Encode,
    Decode,
    NullPointer,
    NativeFault,
    UnsupportedType,
    InterfaceParse,
}

impl FfiError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            FfiError::LoadError { .. } => ErrorKind::Load,
            FfiError::SymbolNotFound { .. } => ErrorKind::SymbolNotFound,
            FfiError::SignatureMismatch { .. } => ErrorKind::SignatureMismatch,
            FfiError::ArityMismatch { .. } => ErrorKind::ArityMismatch,
            FfiError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            FfiError::IndexOutOfBounds { .. } => ErrorKind::IndexOutOfBounds,
            FfiError::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            FfiError::InvalidStride { .. } => ErrorKind::InvalidStride,
            FfiError::DanglingView => ErrorKind::DanglingView,
            FfiError::DanglingCallback => ErrorKind::DanglingCallback,
            FfiError::UseAfterRelease(_) => ErrorKind::UseAfterRelease,
            FfiError::DoubleFree { .. } => ErrorKind::DoubleFree,
            FfiError::EncodeError { .. } => ErrorKind::Encode,
            FfiError::DecodeError { .. } => ErrorKind::Decode,
            FfiError::NullPointer(_) => ErrorKind::NullPointer,
            FfiError::NativeFault { .. } => ErrorKind::NativeFault,
            FfiError::UnsupportedType(_) => ErrorKind::UnsupportedType,
            FfiError::InterfaceParse { .. } => ErrorKind::InterfaceParse,
        }
    }

    pub(crate) fn type_mismatch(expected: impl ToString, got: impl ToString) -> Self {
        FfiError::TypeMismatch {
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }

    pub(crate) fn signature(symbol: &str, reason: impl Into<String>) -> Self {
        FfiError::SignatureMismatch {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for boundary operations
pub type FfiResult<T> = Result<T, FfiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_stable() {
        insta::assert_snapshot!(
            FfiError::ArityMismatch { expected: 2, got: 3 }.to_string(),
            @"Expected 2 arguments, got 3"
        );
        insta::assert_snapshot!(
            FfiError::DoubleFree { address: 0x1000 }.to_string(),
            @"Native buffer at 0x1000 was already released"
        );
        insta::assert_snapshot!(
            FfiError::UseAfterRelease(PathBuf::from("/tmp/libdemo.so")).to_string(),
            @"Library '/tmp/libdemo.so' used after release"
        );
        insta::assert_snapshot!(
            FfiError::ShapeMismatch { shape: vec![2, 4], count: 9 }.to_string(),
            @"Shape [2, 4] does not cover 9 elements"
        );
    }

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(FfiError::DanglingView.kind(), ErrorKind::DanglingView);
        assert_eq!(
            FfiError::type_mismatch("int", "long long").kind(),
            ErrorKind::TypeMismatch
        );
        assert_eq!(
            FfiError::signature("f", "void argument").kind(),
            ErrorKind::SignatureMismatch
        );
    }
}
