//! Typed bindings to native functions
//!
//! A [`SignatureBinder`] pairs a resolved symbol with the signature the
//! caller asserts for it. The assertion is the one unchecked step and is
//! made once, at bind time; every call afterwards is checked against it.

use crate::error::{FfiError, FfiResult};
use crate::ffi::events::{BoundaryEvent, EventLogger};
use crate::ffi::interface::InterfaceDescription;
use crate::ffi::loader::NativeHandle;
use crate::ffi::marshal::{self, MarshalContext};
use crate::ffi::types::{Signature, Value};
use bindings_config::TextEncoding;
use libffi::middle::Cif;
use std::sync::Arc;

/// Callable binding of one exported function
#[derive(Clone)]
pub struct SignatureBinder {
    handle: Arc<NativeHandle>,
    symbol: String,
    signature: Signature,
    /// Function address (type-erased)
    code: usize,
    cif: Cif,
    encoding: TextEncoding,
    logger: Arc<dyn EventLogger>,
}

// Safety: the cif is immutable after construction and libffi only reads it
// during a call; the code address stays valid while the handle is open,
// which every call checks.
unsafe impl Send for SignatureBinder {}
unsafe impl Sync for SignatureBinder {}

impl SignatureBinder {
    /// Bind `symbol` with an asserted signature
    ///
    /// Fails with `SymbolNotFound` when the library does not export the
    /// symbol and `SignatureMismatch` when the signature itself is malformed.
    ///
    /// # Safety
    ///
    /// The caller must ensure the function's actual C signature matches
    /// `signature`. This cannot be verified; a wrong assertion is undefined
    /// behavior on the first call.
    pub unsafe fn bind(
        handle: &Arc<NativeHandle>,
        symbol: &str,
        signature: Signature,
    ) -> FfiResult<Self> {
        signature.validate(symbol)?;
        let code = handle.resolve(symbol)? as usize;
        let cif = signature.cif();

        let logger = Arc::clone(handle.logger());
        logger.log(BoundaryEvent::SymbolBound {
            symbol: symbol.to_string(),
            signature: signature.to_string(),
        });

        Ok(Self {
            handle: Arc::clone(handle),
            symbol: symbol.to_string(),
            signature,
            code,
            cif,
            encoding: handle.encoding(),
            logger,
        })
    }

    /// Bind `symbol`, rejecting a signature that differs from its declaration
    ///
    /// # Safety
    ///
    /// As for [`bind`](Self::bind); the declaration must describe the library.
    pub unsafe fn bind_checked(
        handle: &Arc<NativeHandle>,
        interface: &InterfaceDescription,
        symbol: &str,
        signature: Signature,
    ) -> FfiResult<Self> {
        if let Some(declared) = interface.function(symbol) {
            if *declared != signature {
                return Err(FfiError::signature(
                    symbol,
                    format!("declared as {}, bound as {}", declared, signature),
                ));
            }
        }
        Self::bind(handle, symbol, signature)
    }

    /// Bind `symbol` with the signature its declaration gives it
    ///
    /// # Safety
    ///
    /// As for [`bind`](Self::bind); the declaration must describe the library.
    pub unsafe fn bind_declared(
        handle: &Arc<NativeHandle>,
        interface: &InterfaceDescription,
        symbol: &str,
    ) -> FfiResult<Self> {
        let signature = interface
            .function(symbol)
            .cloned()
            .ok_or_else(|| FfiError::signature(symbol, "no declaration for this symbol"))?;
        Self::bind(handle, symbol, signature)
    }

    /// Text encoding for `char*` arguments and results of this binding
    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn handle(&self) -> &Arc<NativeHandle> {
        &self.handle
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Call the function
    ///
    /// Arguments are checked against the bound signature before any native
    /// code runs. A failure raised by a callback during the call is returned
    /// as `NativeFault` after native code has returned.
    pub fn call(&self, args: &[Value]) -> FfiResult<Value> {
        let _guard = self.handle.enter()?;
        let ctx = self.marshal(args).map_err(|e| {
            self.logger.log(BoundaryEvent::CallRejected {
                symbol: self.symbol.clone(),
                reason: e.to_string(),
            });
            e
        })?;

        let callbacks: Vec<_> = args
            .iter()
            .filter_map(|arg| match arg {
                Value::Callback(callback) => Some(callback.faults()),
                _ => None,
            })
            .collect();
        // Native code may have run a callback outside any call; that failure
        // belongs to no call, so it is logged and dropped
        for faults in &callbacks {
            if let Some(stale) = faults.take() {
                self.logger.log(BoundaryEvent::FaultDiscarded {
                    symbol: self.symbol.clone(),
                    reason: stale.to_string(),
                });
            }
        }

        // Safety: the signature was asserted at bind time and the guard keeps
        // the library mapped for the duration of the call
        let result = unsafe {
            marshal::call_native(&self.cif, self.code, &self.signature.ret, &ctx, &self.symbol)
        };

        if let Some(fault) = callbacks.iter().find_map(|faults| faults.take()) {
            return Err(FfiError::NativeFault {
                symbol: self.symbol.clone(),
                reason: fault.to_string(),
            });
        }
        result
    }

    fn marshal(&self, args: &[Value]) -> FfiResult<MarshalContext> {
        if args.len() != self.signature.arity() {
            return Err(FfiError::ArityMismatch {
                expected: self.signature.arity(),
                got: args.len(),
            });
        }

        let mut ctx = MarshalContext::new(self.encoding);
        for (arg, ty) in args.iter().zip(&self.signature.args) {
            ctx.push(arg, ty)?;
        }
        Ok(ctx)
    }
}

impl std::fmt::Debug for SignatureBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureBinder")
            .field("symbol", &self.symbol)
            .field("signature", &self.signature.to_string())
            .field("code", &format_args!("{:#x}", self.code))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::events::MemoryEventLogger;
    use crate::ffi::loader::LibraryLoader;
    use crate::ffi::types::TypeDescriptor;
    use rstest::rstest;

    fn fixture() -> Arc<NativeHandle> {
        NativeHandle::open(bindings_fixture::library_path().to_str().unwrap()).unwrap()
    }

    fn int_to_int() -> Signature {
        Signature::new(vec![TypeDescriptor::Int32], TypeDescriptor::Int32)
    }

    #[test]
    fn test_call_int_function() {
        let f = unsafe { SignatureBinder::bind(&fixture(), "func_ret_int", int_to_int()) }.unwrap();
        assert_eq!(f.call(&[Value::Int32(42)]), Ok(Value::Int32(42)));
        assert_eq!(f.call(&[Value::Int32(-7)]), Ok(Value::Int32(-7)));
    }

    #[test]
    fn test_call_double_function() {
        let sig = Signature::new(vec![TypeDescriptor::Double], TypeDescriptor::Double);
        let f = unsafe { SignatureBinder::bind(&fixture(), "func_ret_double", sig) }.unwrap();
        assert_eq!(f.call(&[Value::Double(2.5)]), Ok(Value::Double(2.5)));
    }

    #[test]
    fn test_bind_missing_symbol() {
        let result = unsafe { SignatureBinder::bind(&fixture(), "no_such_function", int_to_int()) };
        assert!(matches!(result, Err(FfiError::SymbolNotFound { .. })));
    }

    #[test]
    fn test_bind_rejects_void_argument() {
        let sig = Signature::new(vec![TypeDescriptor::Void], TypeDescriptor::Int32);
        let result = unsafe { SignatureBinder::bind(&fixture(), "func_ret_int", sig) };
        assert!(matches!(result, Err(FfiError::SignatureMismatch { .. })));
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![Value::Int32(1), Value::Int32(2)])]
    fn test_arity_checked(#[case] args: Vec<Value>) {
        let f = unsafe { SignatureBinder::bind(&fixture(), "func_ret_int", int_to_int()) }.unwrap();
        assert_eq!(
            f.call(&args),
            Err(FfiError::ArityMismatch {
                expected: 1,
                got: args.len()
            })
        );
    }

    #[test]
    fn test_rejected_call_is_logged() {
        let dir = tempfile::TempDir::new().unwrap();
        let fixture = bindings_fixture::library_path();
        let copy = dir.path().join(fixture.file_name().unwrap());
        std::fs::copy(fixture, &copy).unwrap();

        let logger = Arc::new(MemoryEventLogger::new());
        let handle = LibraryLoader::new()
            .with_logger(logger.clone())
            .open(copy.to_str().unwrap())
            .unwrap();

        let f = unsafe { SignatureBinder::bind(&handle, "func_ret_int", int_to_int()) }.unwrap();
        assert!(f.call(&[Value::Double(1.0)]).is_err());
        assert!(logger
            .events()
            .iter()
            .any(|e| matches!(e, BoundaryEvent::CallRejected { .. })));

        handle.close();
        assert!(matches!(
            f.call(&[Value::Int32(1)]),
            Err(FfiError::UseAfterRelease(_))
        ));
    }
}
